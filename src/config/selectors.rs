use serde::{Deserialize, Serialize};

use crate::watcher::ActionMarkers;

/// Where products live on the catalog page and how their buttons are marked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// CSS selector for each product container
    #[serde(default = "default_container")]
    pub container: String,

    /// CSS selector for the name element, relative to the container
    #[serde(default = "default_name")]
    pub name: String,

    /// CSS selector for the add-to-cart element, relative to the container
    #[serde(default = "default_action")]
    pub action: String,

    /// Classes that together mark the product as already added
    #[serde(default = "default_triggered_markers")]
    pub triggered_markers: Vec<String>,

    /// Classes of which any one marks the product as unavailable
    #[serde(default = "default_unavailable_markers")]
    pub unavailable_markers: Vec<String>,
}

fn default_container() -> String {
    ".product".to_string()
}

fn default_name() -> String {
    ".model_product".to_string()
}

fn default_action() -> String {
    ".main-basked-icon.add2cart".to_string()
}

fn default_triggered_markers() -> Vec<String> {
    vec!["clicked".to_string(), "yellow".to_string()]
}

fn default_unavailable_markers() -> Vec<String> {
    vec!["disabled".to_string()]
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            container: default_container(),
            name: default_name(),
            action: default_action(),
            triggered_markers: default_triggered_markers(),
            unavailable_markers: default_unavailable_markers(),
        }
    }
}

impl SelectorConfig {
    pub fn markers(&self) -> ActionMarkers {
        ActionMarkers {
            triggered: self.triggered_markers.clone(),
            unavailable: self.unavailable_markers.clone(),
        }
    }
}

/// Parse a comma-separated class list, dropping blanks.
pub fn parse_marker_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
