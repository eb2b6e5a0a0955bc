//! Catalog watcher: filter matching, the monitoring state machine and the
//! seams it talks through (page, storage, status).

mod catalog;
mod matcher;
mod mode;
mod monitor;
mod status;

pub use catalog::{ActionMarkers, ActionState, CatalogPage, ProductEntry};
pub use matcher::{
    is_active_filter, normalize_whitespace, ContainsMatcher, ExactMatcher, FilterMatcher,
    MatchPolicy,
};
pub use mode::{Mode, Timing};
pub use monitor::{Monitor, MonitorSettings, Phase, RunState};
pub use status::{
    BroadcastNotifier, ControlRequest, Stats, StatusMessage, StatusNotifier, TrackingStatus,
};
