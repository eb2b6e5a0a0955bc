use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::matcher::MatchPolicy;

/// Operating mode of the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Add every matching product, forever, until disabled.
    Continuous,
    /// Add the first exact match once, then disable.
    SingleShot,
}

impl Mode {
    pub fn default_policy(self) -> MatchPolicy {
        match self {
            Mode::Continuous => MatchPolicy::Contains,
            Mode::SingleShot => MatchPolicy::Exact,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Continuous => "continuous",
            Mode::SingleShot => "single-shot",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continuous" => Ok(Mode::Continuous),
            "single-shot" | "single_shot" | "singleshot" => Ok(Mode::SingleShot),
            other => Err(format!(
                "unknown mode '{}' (expected continuous or single-shot)",
                other
            )),
        }
    }
}

/// Timer periods for one watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Period of the scanning tick. The first tick fires immediately.
    pub scan_interval: Duration,
    /// Period of the page reload. The first reload fires one period after start.
    pub reload_interval: Duration,
    /// Retry period while waiting for the first product to appear.
    /// Only single-shot mode waits for content.
    pub content_retry: Option<Duration>,
}

impl Timing {
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Continuous => Self {
                scan_interval: Duration::from_millis(2000),
                reload_interval: Duration::from_millis(1000),
                content_retry: None,
            },
            Mode::SingleShot => Self {
                scan_interval: Duration::from_millis(500),
                reload_interval: Duration::from_millis(1210),
                content_retry: Some(Duration::from_millis(300)),
            },
        }
    }
}
