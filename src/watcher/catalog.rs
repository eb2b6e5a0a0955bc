//! What a scan sees on the catalog page, and the page capability the
//! monitor drives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One product container as seen during a single scan.
///
/// `name` is `None` when the container has no name element and
/// `action_classes` is `None` when it has no action element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductEntry {
    /// Position in the page's container list at scan time.
    pub index: usize,
    pub name: Option<String>,
    pub action_classes: Option<Vec<String>>,
}

impl ProductEntry {
    pub fn new(index: usize, name: &str, action_classes: &[&str]) -> Self {
        Self {
            index,
            name: Some(name.to_string()),
            action_classes: Some(action_classes.iter().map(|c| c.to_string()).collect()),
        }
    }
}

/// Availability of an entry's action element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionState {
    Available,
    Triggered,
    Unavailable,
}

/// Class names that encode the action element's state on the host page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMarkers {
    /// All of these present means the action already fired.
    pub triggered: Vec<String>,
    /// Any of these present means the action cannot fire right now.
    pub unavailable: Vec<String>,
}

impl ActionMarkers {
    pub fn classify(&self, classes: &[String]) -> ActionState {
        let has = |marker: &String| classes.iter().any(|c| c == marker);

        if !self.triggered.is_empty() && self.triggered.iter().all(has) {
            ActionState::Triggered
        } else if self.unavailable.iter().any(has) {
            ActionState::Unavailable
        } else {
            ActionState::Available
        }
    }
}

/// Capability interface over the live catalog page.
#[async_trait]
pub trait CatalogPage: Send + Sync {
    /// List every product container currently on the page.
    async fn list_entries(&self) -> Result<Vec<ProductEntry>>;

    /// Fire the action element of `entry`.
    async fn trigger(&self, entry: &ProductEntry) -> Result<()>;

    /// Reload the hosting page.
    async fn reload(&self) -> Result<()>;
}
