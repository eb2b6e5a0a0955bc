//! Monitor behaviour against a scripted catalog page.
//!
//! Time is paused in every test, so timer-driven scenarios advance
//! instantly and deterministically.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use cartwatch::error::{CartwatchError, Result};
use cartwatch::storage::{ConfigStore, Configuration, MemoryStore};
use cartwatch::watcher::{
    ActionMarkers, CatalogPage, Mode, Monitor, MonitorSettings, Phase, ProductEntry,
    StatusMessage, StatusNotifier, Timing, TrackingStatus,
};

#[derive(Default)]
struct PageState {
    entries: Vec<ProductEntry>,
    list_calls: usize,
    triggered: Vec<usize>,
    reloads: usize,
    fail_list: bool,
    fail_reload: bool,
    fail_trigger_for: Vec<usize>,
    /// Store read at click time, to observe what was persisted before the click.
    store: Option<Arc<MemoryStore>>,
    click_delay: Option<Duration>,
    enabled_at_click: Vec<bool>,
    list_calls_at_click: Vec<usize>,
}

/// Catalog page whose contents the test controls. Triggering an entry
/// marks it the way the real page does.
#[derive(Clone, Default)]
struct FakePage {
    state: Arc<Mutex<PageState>>,
}

impl FakePage {
    fn with_entries(entries: Vec<ProductEntry>) -> Self {
        let page = Self::default();
        page.state.lock().unwrap().entries = entries;
        page
    }

    fn set_entries(&self, entries: Vec<ProductEntry>) {
        self.state.lock().unwrap().entries = entries;
    }

    fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    fn triggered(&self) -> Vec<usize> {
        self.state.lock().unwrap().triggered.clone()
    }

    fn reloads(&self) -> usize {
        self.state.lock().unwrap().reloads
    }

    fn enabled_at_click(&self) -> Vec<bool> {
        self.state.lock().unwrap().enabled_at_click.clone()
    }

    fn list_calls_at_click(&self) -> Vec<usize> {
        self.state.lock().unwrap().list_calls_at_click.clone()
    }
}

#[async_trait]
impl CatalogPage for FakePage {
    async fn list_entries(&self) -> Result<Vec<ProductEntry>> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if state.fail_list {
            return Err(CartwatchError::JavaScriptError("page crashed".to_string()));
        }
        Ok(state.entries.clone())
    }

    async fn trigger(&self, entry: &ProductEntry) -> Result<()> {
        let (store, delay) = {
            let mut state = self.state.lock().unwrap();
            if state.fail_trigger_for.contains(&entry.index) {
                return Err(CartwatchError::ElementNotFound(format!(
                    "product #{}",
                    entry.index
                )));
            }
            let calls = state.list_calls;
            state.list_calls_at_click.push(calls);
            (state.store.clone(), state.click_delay)
        };

        if let Some(store) = store {
            let enabled = store.load().await?.enabled;
            self.state.lock().unwrap().enabled_at_click.push(enabled);
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.triggered.push(entry.index);
        if let Some(classes) = state.entries[entry.index].action_classes.as_mut() {
            classes.push("clicked".to_string());
            classes.push("yellow".to_string());
        }
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.reloads += 1;
        if state.fail_reload {
            return Err(CartwatchError::Timeout("reload".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    messages: Arc<Mutex<Vec<StatusMessage>>>,
}

impl RecordingNotifier {
    fn messages(&self) -> Vec<StatusMessage> {
        self.messages.lock().unwrap().clone()
    }

    fn statuses(&self) -> Vec<TrackingStatus> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                StatusMessage::StatusUpdate { status, .. } => Some(status),
                _ => None,
            })
            .collect()
    }
}

impl StatusNotifier for RecordingNotifier {
    fn notify(&self, message: StatusMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

type TestMonitor = Monitor<FakePage, Arc<MemoryStore>, RecordingNotifier>;

fn markers() -> ActionMarkers {
    ActionMarkers {
        triggered: vec!["clicked".to_string(), "yellow".to_string()],
        unavailable: vec!["disabled".to_string()],
    }
}

fn store(enabled: bool, filter: &str) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(Configuration {
        enabled,
        filter_text: filter.to_string(),
    }))
}

fn monitor(
    mode: Mode,
    page: &FakePage,
    store: &Arc<MemoryStore>,
    notifier: &RecordingNotifier,
) -> TestMonitor {
    Monitor::new(
        page.clone(),
        Arc::clone(store),
        notifier.clone(),
        MonitorSettings::for_mode(mode, markers()),
    )
}

fn coin_page() -> FakePage {
    FakePage::with_entries(vec![
        ProductEntry::new(0, "Gold Coin 2024", &["add2cart"]),
        ProductEntry::new(1, "Silver Coin", &["add2cart"]),
        ProductEntry::new(2, "gold coin limited", &["add2cart", "clicked", "yellow"]),
        ProductEntry::new(3, "  GOLD COIN set ", &["add2cart"]),
    ])
}

mod continuous {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn adds_every_untriggered_match() {
        let page = coin_page();
        let store = store(true, "Gold Coin");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::Continuous, &page, &store, &notifier);

        monitor.initialize().await;
        assert!(monitor.is_running());
        assert_eq!(monitor.phase(), Phase::Scanning);

        monitor.scan_pass().await;

        assert_eq!(page.triggered(), vec![0, 3]);
        assert_eq!(monitor.run_state().added_count, 2);
        assert_eq!(monitor.stats().borrow().added_count, 2);
        assert!(matches!(
            notifier.messages().as_slice(),
            [StatusMessage::StatsUpdate { added_count: 2 }]
        ));

        // Everything matching is now marked, so a second pass is a no-op.
        monitor.scan_pass().await;
        assert_eq!(page.triggered(), vec![0, 3]);
        assert_eq!(notifier.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_storage_does_not_start() {
        let page = coin_page();
        let store = store(false, "Gold Coin");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::Continuous, &page, &store, &notifier);

        monitor.initialize().await;
        assert!(!monitor.is_running());
        assert_eq!(monitor.phase(), Phase::Stopped);
        assert_eq!(monitor.run_state().filter_text, "Gold Coin");

        monitor.on_monitor_tick().await;
        assert_eq!(page.list_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_filter_does_not_start() {
        let page = coin_page();
        let store = store(true, "   ");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::Continuous, &page, &store, &notifier);

        monitor.initialize().await;
        assert!(!monitor.is_running());
        assert!(!monitor.run_state().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_pass_keeps_session() {
        let page = coin_page();
        page.state.lock().unwrap().fail_list = true;
        let store = store(true, "Gold Coin");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::Continuous, &page, &store, &notifier);

        monitor.initialize().await;
        monitor.scan_pass().await;

        assert!(monitor.is_running());
        assert_eq!(monitor.run_state().added_count, 0);
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_click_moves_on_to_next_entry() {
        let page = coin_page();
        page.state.lock().unwrap().fail_trigger_for = vec![0];
        let store = store(true, "Gold Coin");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::Continuous, &page, &store, &notifier);

        monitor.initialize().await;
        monitor.scan_pass().await;

        assert_eq!(page.triggered(), vec![3]);
        assert_eq!(monitor.run_state().added_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disable_stops_and_resets_counter() {
        let page = coin_page();
        let store = store(true, "Gold Coin");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::Continuous, &page, &store, &notifier);
        let mut changes = store.subscribe();

        monitor.initialize().await;
        monitor.scan_pass().await;
        assert_eq!(monitor.run_state().added_count, 2);

        assert_ok!(store.set_enabled(false).await);
        let change = changes.recv().await.unwrap();
        monitor.apply_change(change).await;

        assert!(!monitor.is_running());
        assert_eq!(monitor.run_state().added_count, 0);
        let stats = *monitor.stats().borrow();
        assert!(!stats.is_enabled);
        assert_eq!(stats.added_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn filter_change_keeps_timers() {
        let page = coin_page();
        let store = store(true, "Gold Coin");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::Continuous, &page, &store, &notifier);
        let mut changes = store.subscribe();

        monitor.initialize().await;
        assert_ok!(store.set_filter_text("Silver").await);
        let change = changes.recv().await.unwrap();
        monitor.apply_change(change).await;

        assert!(monitor.is_running());
        assert_eq!(monitor.run_state().filter_text, "Silver");

        monitor.scan_pass().await;
        assert_eq!(page.triggered(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn enable_reads_latest_filter() {
        let page = coin_page();
        let store = store(false, "");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::Continuous, &page, &store, &notifier);
        let mut changes = store.subscribe();

        monitor.initialize().await;
        assert_ok!(store.set_filter_text("silver").await);
        assert_ok!(store.set_enabled(true).await);

        // Apply only the toggle; the filter is re-read from storage.
        let _filter = changes.recv().await.unwrap();
        let toggle = changes.recv().await.unwrap();
        monitor.apply_change(toggle).await;

        assert!(monitor.is_running());
        assert_eq!(monitor.run_state().filter_text, "silver");
    }

    #[tokio::test(start_paused = true)]
    async fn reload_reinitializes_from_storage() {
        let page = coin_page();
        let store = store(true, "Gold Coin");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::Continuous, &page, &store, &notifier);

        monitor.initialize().await;
        monitor.scan_pass().await;
        assert_eq!(monitor.run_state().added_count, 2);

        monitor.on_reload_tick().await;

        assert_eq!(page.reloads(), 1);
        assert!(monitor.is_running());
        assert_eq!(monitor.run_state().added_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reload_keeps_state() {
        let page = coin_page();
        page.state.lock().unwrap().fail_reload = true;
        let store = store(true, "Gold Coin");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::Continuous, &page, &store, &notifier);

        monitor.initialize().await;
        monitor.scan_pass().await;
        monitor.on_reload_tick().await;

        assert_eq!(page.reloads(), 1);
        assert!(monitor.is_running());
        assert_eq!(monitor.run_state().added_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_session_keeps_a_single_timer() {
        let page = FakePage::with_entries(vec![ProductEntry::new(0, "Bronze", &["add2cart"])]);
        let store = store(true, "Gold");
        let notifier = RecordingNotifier::default();
        let mut monitor = Monitor::new(
            page.clone(),
            Arc::clone(&store),
            notifier.clone(),
            MonitorSettings::for_mode(Mode::Continuous, markers()).with_timing(Timing {
                scan_interval: Duration::from_millis(2000),
                reload_interval: Duration::from_secs(3600),
                content_retry: None,
            }),
        );

        monitor.initialize().await;
        monitor.start_session();
        monitor.start_session();

        let shutdown = CancellationToken::new();
        let _ = tokio::time::timeout(Duration::from_millis(4500), monitor.run_until(&shutdown))
            .await;

        // Ticks at 0, 2000 and 4000 ms.
        assert_eq!(page.list_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn reload_restarts_scanning_immediately() {
        let page = FakePage::with_entries(vec![ProductEntry::new(0, "Bronze", &["add2cart"])]);
        let store = store(true, "Gold");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::Continuous, &page, &store, &notifier);

        monitor.initialize().await;
        let shutdown = CancellationToken::new();
        let _ = tokio::time::timeout(Duration::from_millis(2500), monitor.run_until(&shutdown))
            .await;

        // Scans at 0, 1000 and 2000 ms, each reload starting a fresh session.
        assert_eq!(page.reloads(), 2);
        assert_eq!(page.list_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn follows_storage_toggles_while_running() {
        let page = coin_page();
        let store = store(false, "Gold Coin");
        let notifier = RecordingNotifier::default();
        let monitor = monitor(Mode::Continuous, &page, &store, &notifier);
        let stats = monitor.stats();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(monitor.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(page.list_calls(), 0);

        assert_ok!(store.set_enabled(true).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(page.triggered(), vec![0, 3]);
        assert_eq!(stats.borrow().added_count, 2);
        assert!(stats.borrow().is_enabled);

        assert_ok!(store.set_enabled(false).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let calls = page.list_calls();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(page.list_calls(), calls);
        assert_eq!(page.reloads(), 0);
        assert!(!stats.borrow().is_enabled);

        shutdown.cancel();
        assert_ok!(task.await);
    }
}

mod single_shot {
    use super::*;

    fn token_page(classes: &[&str]) -> FakePage {
        FakePage::with_entries(vec![
            ProductEntry::new(0, "Token AB", &["add2cart"]),
            ProductEntry::new(1, "  Token   A ", classes),
            ProductEntry::new(2, "Token A+", &["add2cart"]),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_content_before_scanning() {
        let page = FakePage::default();
        let store = store(true, "Token A");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::SingleShot, &page, &store, &notifier);

        monitor.initialize().await;
        assert_eq!(monitor.phase(), Phase::WaitingForContent);

        monitor.on_monitor_tick().await;
        assert_eq!(monitor.phase(), Phase::WaitingForContent);
        assert!(notifier.messages().is_empty());

        page.set_entries(vec![ProductEntry::new(0, "Other", &["add2cart"])]);
        monitor.on_monitor_tick().await;
        assert_eq!(monitor.phase(), Phase::Scanning);
    }

    #[tokio::test(start_paused = true)]
    async fn exact_match_completes_and_disables() {
        let page = token_page(&["add2cart"]);
        let store = store(true, "Token A");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::SingleShot, &page, &store, &notifier);

        monitor.initialize().await;
        monitor.on_monitor_tick().await;
        monitor.on_monitor_tick().await;

        assert_eq!(page.triggered(), vec![1]);
        assert!(!monitor.is_running());
        assert_eq!(monitor.phase(), Phase::Stopped);
        assert!(!assert_ok!(store.load().await).enabled);
        assert_eq!(notifier.statuses(), vec![TrackingStatus::Completed]);

        let stats = *monitor.stats().borrow();
        assert_eq!(stats.added_count, 1);
        assert!(!stats.is_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_searching_when_absent() {
        let page = FakePage::with_entries(vec![ProductEntry::new(0, "Token B", &["add2cart"])]);
        let store = store(true, "Token A");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::SingleShot, &page, &store, &notifier);

        monitor.initialize().await;
        monitor.on_monitor_tick().await;
        monitor.on_monitor_tick().await;

        assert!(monitor.is_running());
        assert!(page.triggered().is_empty());
        assert_eq!(notifier.statuses(), vec![TrackingStatus::Searching]);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_while_unavailable() {
        let page = token_page(&["add2cart", "disabled"]);
        let store = store(true, "Token A");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::SingleShot, &page, &store, &notifier);

        monitor.initialize().await;
        monitor.on_monitor_tick().await;
        monitor.on_monitor_tick().await;

        assert!(monitor.is_running());
        assert!(page.triggered().is_empty());
        assert_eq!(notifier.statuses(), vec![TrackingStatus::Waiting]);
    }

    #[tokio::test(start_paused = true)]
    async fn nameless_product_is_an_error() {
        let page = FakePage::with_entries(vec![
            ProductEntry::new(0, "Token B", &["add2cart"]),
            ProductEntry {
                index: 1,
                name: None,
                action_classes: Some(vec!["add2cart".to_string()]),
            },
        ]);
        let store = store(true, "Token A");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::SingleShot, &page, &store, &notifier);

        monitor.initialize().await;
        monitor.on_monitor_tick().await;
        monitor.on_monitor_tick().await;

        assert!(monitor.is_running());
        assert!(page.triggered().is_empty());
        assert!(matches!(
            notifier.messages().as_slice(),
            [StatusMessage::StatusUpdate { status: TrackingStatus::Error, message }]
                if message.contains("#1")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_button_is_an_error() {
        let page = FakePage::with_entries(vec![ProductEntry {
            index: 0,
            name: Some("Token A".to_string()),
            action_classes: None,
        }]);
        let store = store(true, "Token A");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::SingleShot, &page, &store, &notifier);

        monitor.initialize().await;
        monitor.on_monitor_tick().await;
        monitor.on_monitor_tick().await;

        assert!(monitor.is_running());
        assert_eq!(notifier.statuses(), vec![TrackingStatus::Error]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_click_restarts_tracking() {
        let page = token_page(&["add2cart"]);
        page.state.lock().unwrap().fail_trigger_for = vec![1];
        let store = store(true, "Token A");
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(Mode::SingleShot, &page, &store, &notifier);

        monitor.initialize().await;
        monitor.on_monitor_tick().await;
        monitor.on_monitor_tick().await;

        assert!(monitor.is_running());
        assert!(monitor.run_state().enabled);
        assert!(assert_ok!(store.load().await).enabled);
        assert_eq!(notifier.statuses(), vec![TrackingStatus::Error]);
    }

    #[tokio::test(start_paused = true)]
    async fn completes_once_when_running() {
        let page = token_page(&["add2cart"]);
        let store = store(true, "Token A");
        let notifier = RecordingNotifier::default();
        let monitor = monitor(Mode::SingleShot, &page, &store, &notifier);
        let stats = monitor.stats();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(monitor.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(page.triggered(), vec![1]);
        assert_eq!(page.reloads(), 0);
        assert_eq!(notifier.statuses(), vec![TrackingStatus::Completed]);
        assert_eq!(stats.borrow().added_count, 1);
        assert!(!stats.borrow().is_enabled);

        shutdown.cancel();
        assert_ok!(task.await);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_stop_before_click_and_disable_is_saved_after() {
        let page = token_page(&["add2cart"]);
        let store = store(true, "Token A");
        {
            let mut state = page.state.lock().unwrap();
            state.store = Some(Arc::clone(&store));
            // Longer than the 1210 ms reload period.
            state.click_delay = Some(Duration::from_secs(5));
        }
        let notifier = RecordingNotifier::default();
        let monitor = monitor(Mode::SingleShot, &page, &store, &notifier);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(monitor.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(20)).await;

        // Still enabled in storage while the click was in flight...
        assert_eq!(page.enabled_at_click(), vec![true]);
        // ...and persisted off once it landed.
        assert!(!assert_ok!(store.load().await).enabled);
        assert_eq!(page.triggered(), vec![1]);

        // No timer fired during or after the click.
        assert_eq!(page.reloads(), 0);
        assert_eq!(page.list_calls_at_click(), vec![page.list_calls()]);
        assert_eq!(notifier.statuses(), vec![TrackingStatus::Completed]);

        shutdown.cancel();
        assert_ok!(task.await);
    }
}
