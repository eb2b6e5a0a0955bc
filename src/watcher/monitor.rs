//! The observer/actuator: scans the catalog, clicks matches, reloads the page.
//!
//! One [`Monitor`] owns its run state and its [`Session`] (the monitoring
//! timer and the reload timer together). Everything is driven from a single
//! `select!` loop, so ticks, reloads and storage changes are handled one at a
//! time and never overlap.

use tokio::sync::{broadcast, watch};
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::catalog::{ActionMarkers, ActionState, CatalogPage, ProductEntry};
use super::matcher::{is_active_filter, normalize_whitespace, FilterMatcher, MatchPolicy};
use super::mode::{Mode, Timing};
use super::status::{Stats, StatusMessage, StatusNotifier, TrackingStatus};
use crate::config::Config;
use crate::storage::{ConfigStore, StorageChange};

/// Where the monitor currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Stopped,
    /// Single-shot only: retrying until the page lists any product.
    WaitingForContent,
    Scanning,
}

/// In-memory state. Rebuilt from storage after every page reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    pub enabled: bool,
    pub filter_text: String,
    /// Products added since the last (re)load. Continuous mode only resets it on disable.
    pub added_count: u64,
}

/// Static settings for one monitor.
pub struct MonitorSettings {
    pub mode: Mode,
    pub timing: Timing,
    pub matcher: Box<dyn FilterMatcher>,
    pub markers: ActionMarkers,
}

impl MonitorSettings {
    pub fn for_mode(mode: Mode, markers: ActionMarkers) -> Self {
        Self {
            mode,
            timing: Timing::for_mode(mode),
            matcher: mode.default_policy().matcher(),
            markers,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.watcher.mode,
            timing: config.watcher.timing(),
            matcher: config.watcher.policy().matcher(),
            markers: config.selectors.markers(),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.matcher = policy.matcher();
        self
    }
}

/// Both timers of a running session. Dropping it cancels both.
struct Session {
    phase: Phase,
    monitor: Interval,
    reload: Interval,
}

impl Session {
    fn start(timing: &Timing) -> Self {
        let (phase, period) = match timing.content_retry {
            Some(retry) => (Phase::WaitingForContent, retry),
            None => (Phase::Scanning, timing.scan_interval),
        };
        Self {
            phase,
            monitor: immediate_interval(period),
            reload: delayed_interval(timing.reload_interval),
        }
    }
}

fn immediate_interval(period: std::time::Duration) -> Interval {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

fn delayed_interval(period: std::time::Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn next_tick(timer: Option<&mut Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

enum Event {
    Shutdown,
    Storage(std::result::Result<StorageChange, broadcast::error::RecvError>),
    MonitorTick,
    ReloadTick,
}

pub struct Monitor<P, S, N> {
    page: P,
    store: S,
    notifier: N,
    mode: Mode,
    timing: Timing,
    matcher: Box<dyn FilterMatcher>,
    markers: ActionMarkers,
    run: RunState,
    session: Option<Session>,
    stats_tx: watch::Sender<Stats>,
}

impl<P, S, N> Monitor<P, S, N>
where
    P: CatalogPage,
    S: ConfigStore,
    N: StatusNotifier,
{
    pub fn new(page: P, store: S, notifier: N, settings: MonitorSettings) -> Self {
        let (stats_tx, _) = watch::channel(Stats::default());
        Self {
            page,
            store,
            notifier,
            mode: settings.mode,
            timing: settings.timing,
            matcher: settings.matcher,
            markers: settings.markers,
            run: RunState::default(),
            session: None,
            stats_tx,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn phase(&self) -> Phase {
        self.session.as_ref().map_or(Phase::Stopped, |s| s.phase)
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn run_state(&self) -> &RunState {
        &self.run
    }

    /// Live stats snapshot, answered to `getStats` requests.
    pub fn stats(&self) -> watch::Receiver<Stats> {
        self.stats_tx.subscribe()
    }

    /// Initialize from storage, then run until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let changes = self.store.subscribe();
        self.initialize().await;
        self.drive(changes, &shutdown).await;
    }

    /// Run the event loop on the current state until `shutdown` fires.
    pub async fn run_until(&mut self, shutdown: &CancellationToken) {
        let changes = self.store.subscribe();
        self.drive(changes, shutdown).await;
    }

    async fn drive(
        &mut self,
        mut changes: broadcast::Receiver<StorageChange>,
        shutdown: &CancellationToken,
    ) {
        loop {
            let event = {
                let (monitor, reload) = match self.session.as_mut() {
                    Some(session) => (Some(&mut session.monitor), Some(&mut session.reload)),
                    None => (None, None),
                };
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => Event::Shutdown,
                    change = changes.recv() => Event::Storage(change),
                    _ = next_tick(monitor) => Event::MonitorTick,
                    _ = next_tick(reload) => Event::ReloadTick,
                }
            };

            match event {
                Event::Shutdown => break,
                Event::Storage(Ok(change)) => self.apply_change(change).await,
                Event::Storage(Err(broadcast::error::RecvError::Lagged(missed))) => {
                    tracing::warn!("Missed {} storage notifications, re-syncing", missed);
                    self.resync().await;
                }
                Event::Storage(Err(broadcast::error::RecvError::Closed)) => {
                    tracing::info!("Storage closed, stopping monitor");
                    break;
                }
                Event::MonitorTick => self.on_monitor_tick().await,
                Event::ReloadTick => self.on_reload_tick().await,
            }
        }

        self.stop_session();
    }

    /// Fresh run state from storage, as on a newly loaded page.
    pub async fn initialize(&mut self) {
        self.stop_session();
        self.run = RunState::default();

        match self.store.load().await {
            Ok(config) if config.enabled && is_active_filter(&config.filter_text) => {
                self.run.enabled = true;
                self.run.filter_text = config.filter_text;
                self.start_session();
            }
            Ok(config) => {
                self.run.filter_text = config.filter_text;
                tracing::debug!("Tracking is off");
            }
            Err(e) => tracing::warn!("Failed to read storage: {}", e),
        }

        self.publish_stats();
    }

    /// Start (or restart) both timers. Any previous session is dropped first.
    pub fn start_session(&mut self) {
        let session = Session::start(&self.timing);
        tracing::info!(
            mode = %self.mode,
            phase = ?session.phase,
            filter = %self.run.filter_text,
            "Tracking started"
        );
        self.session = Some(session);
    }

    /// Cancel both timers.
    pub fn stop_session(&mut self) {
        if self.session.take().is_some() {
            tracing::info!("Tracking stopped");
        }
    }

    pub async fn apply_change(&mut self, change: StorageChange) {
        match change {
            StorageChange::ToggleEnabled {
                new_value: true, ..
            } => {
                self.run.enabled = true;
                match self.store.load().await {
                    Ok(config) => self.run.filter_text = config.filter_text,
                    Err(e) => tracing::warn!("Failed to read filter text: {}", e),
                }
                self.start_session();
            }
            StorageChange::ToggleEnabled {
                new_value: false, ..
            } => self.disable(),
            StorageChange::FilterText { new_value, .. } => {
                tracing::debug!(filter = %new_value, "Filter updated");
                self.run.filter_text = new_value;
            }
        }
        self.publish_stats();
    }

    fn disable(&mut self) {
        self.run.enabled = false;
        self.stop_session();
        if self.mode == Mode::Continuous {
            self.run.added_count = 0;
        }
    }

    /// Bring run state in line with storage after missed notifications.
    async fn resync(&mut self) {
        let config = match self.store.load().await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to read storage: {}", e);
                return;
            }
        };

        self.run.filter_text = config.filter_text;
        if config.enabled && !self.run.enabled {
            self.run.enabled = true;
            self.start_session();
        } else if !config.enabled && self.run.enabled {
            self.disable();
        }
        self.publish_stats();
    }

    pub async fn on_monitor_tick(&mut self) {
        if !self.run.enabled {
            tracing::trace!("Tick skipped, tracking disabled");
            return;
        }

        match self.phase() {
            Phase::WaitingForContent => self.wait_for_content().await,
            Phase::Scanning => self.scan_pass().await,
            Phase::Stopped => {}
        }
    }

    async fn wait_for_content(&mut self) {
        match self.page.list_entries().await {
            Ok(entries) if !entries.is_empty() => {
                tracing::debug!("{} products on page, scanning", entries.len());
                let scan_interval = self.timing.scan_interval;
                if let Some(session) = self.session.as_mut() {
                    session.phase = Phase::Scanning;
                    session.monitor = immediate_interval(scan_interval);
                }
            }
            Ok(_) => tracing::debug!("No products on page yet"),
            Err(e) => tracing::warn!("Failed to list products: {}", e),
        }
    }

    /// One scan over the current page.
    pub async fn scan_pass(&mut self) {
        match self.mode {
            Mode::Continuous => self.continuous_pass().await,
            Mode::SingleShot => self.single_shot_pass().await,
        }
    }

    async fn continuous_pass(&mut self) {
        if !is_active_filter(&self.run.filter_text) {
            return;
        }

        let entries = match self.page.list_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Scan pass failed: {}", e);
                return;
            }
        };

        let mut added = 0u64;
        for entry in &entries {
            let Some(name) = entry.name.as_deref() else {
                tracing::debug!(index = entry.index, "Product has no name element");
                continue;
            };
            if !self.matcher.matches(&self.run.filter_text, name) {
                continue;
            }
            let Some(classes) = entry.action_classes.as_deref() else {
                tracing::debug!(index = entry.index, "Product has no add-to-cart element");
                continue;
            };
            if self.markers.classify(classes) == ActionState::Triggered {
                continue;
            }

            match self.page.trigger(entry).await {
                Ok(()) => {
                    added += 1;
                    self.run.added_count += 1;
                    tracing::info!(product = %name.trim(), "Added to cart");
                }
                Err(e) => tracing::warn!("Failed to add product #{}: {}", entry.index, e),
            }
        }

        if added > 0 {
            self.publish_stats();
            self.notifier.notify(StatusMessage::StatsUpdate {
                added_count: self.run.added_count,
            });
        }
    }

    async fn single_shot_pass(&mut self) {
        if !is_active_filter(&self.run.filter_text) {
            return;
        }
        let wanted = normalize_whitespace(&self.run.filter_text);

        let entries = match self.page.list_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Scan pass failed: {}", e);
                return;
            }
        };

        let found = entries.iter().find(|entry| {
            entry
                .name
                .as_deref()
                .is_some_and(|name| self.matcher.matches(&self.run.filter_text, name))
        });

        let Some(entry) = found else {
            match entries.iter().find(|entry| entry.name.is_none()) {
                Some(nameless) => self.report(
                    TrackingStatus::Error,
                    format!("Product #{} has no name element", nameless.index),
                ),
                None => self.report(
                    TrackingStatus::Searching,
                    format!("Searching for \"{}\"...", wanted),
                ),
            }
            return;
        };

        let Some(classes) = entry.action_classes.as_deref() else {
            self.report(
                TrackingStatus::Error,
                format!("\"{}\" has no add-to-cart button", wanted),
            );
            return;
        };

        match self.markers.classify(classes) {
            ActionState::Available => {
                let entry = entry.clone();
                self.complete(entry, wanted).await;
            }
            ActionState::Unavailable | ActionState::Triggered => self.report(
                TrackingStatus::Waiting,
                format!("Found \"{}\", waiting for it to become available", wanted),
            ),
        }
    }

    /// Stop both timers, click, then persist the disabled state.
    async fn complete(&mut self, entry: ProductEntry, wanted: String) {
        self.run.enabled = false;
        self.stop_session();

        if let Err(e) = self.page.trigger(&entry).await {
            tracing::warn!("Failed to add \"{}\": {}", wanted, e);
            self.report(
                TrackingStatus::Error,
                format!("Failed to add \"{}\": {}", wanted, e),
            );
            self.run.enabled = true;
            self.start_session();
            return;
        }

        self.run.added_count += 1;
        tracing::info!(product = %wanted, "Added to cart, tracking complete");

        if let Err(e) = self.store.set_enabled(false).await {
            tracing::warn!("Failed to persist disabled state: {}", e);
        }
        self.publish_stats();
        self.report(
            TrackingStatus::Completed,
            format!("\"{}\" added to cart", wanted),
        );
    }

    pub async fn on_reload_tick(&mut self) {
        if !self.run.enabled {
            return;
        }

        match self.page.reload().await {
            // A fresh document starts with nothing but what storage holds.
            Ok(()) => self.initialize().await,
            Err(e) => tracing::warn!("Reload failed: {}", e),
        }
    }

    fn report(&self, status: TrackingStatus, message: String) {
        self.notifier.notify(StatusMessage::status(status, message));
    }

    fn publish_stats(&self) {
        self.stats_tx.send_replace(Stats {
            added_count: self.run.added_count,
            is_enabled: self.run.enabled,
        });
    }
}
