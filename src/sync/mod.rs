//! Sync orchestration: adapter selection and the periodic sync timer.

mod debounce;

pub use debounce::DebouncedWriter;

use crate::adapters::{ApiClient, HybridSessionStore, LocalSessionStore, RemoteSessionStore, SessionStore};
use crate::config::{DaybookConfig, StorageMode, SyncSettings};
use crate::models::Session;
use crate::storage::TieredKv;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Result of one outbound synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncOutcome {
    /// Sessions pushed to the replica.
    pub pushed: usize,
}

impl SyncOutcome {
    /// Human-readable one-line summary for logs and the CLI.
    #[must_use]
    pub fn summary(&self) -> String {
        format!("pushed {} session(s)", self.pushed)
    }
}

/// Owns the active record-store adapter and the periodic sync timer.
///
/// Settings are applied wholesale: every [`Self::apply_settings`] call tears
/// down the timer, rebuilds the adapter for the new mode, and re-arms the
/// timer, so a caller can never observe an adapter/timer pair from two
/// different configurations. An interval of zero, or offline mode, leaves
/// the timer disarmed.
pub struct SyncOrchestrator {
    config: Option<DaybookConfig>,
    settings: SyncSettings,
    store: Arc<dyn SessionStore>,
    timer: Option<JoinHandle<()>>,
}

impl SyncOrchestrator {
    /// Builds an orchestrator from configuration, constructing the adapter
    /// the configured mode asks for and arming the timer.
    ///
    /// # Errors
    ///
    /// Returns an error if the local tiers cannot be opened, or if a remote
    /// mode is configured without a base URL.
    pub async fn new(config: DaybookConfig) -> Result<Self> {
        let settings = config.sync.clone();
        let store = build_store(&config, &settings).await?;

        let mut orchestrator = Self {
            config: Some(config),
            settings: settings.clone(),
            store,
            timer: None,
        };
        orchestrator.arm_timer();
        Ok(orchestrator)
    }

    /// Builds an orchestrator over an explicit store; settings changes keep
    /// the store and only affect the timer. Used by tests and embedders that
    /// manage their own adapter.
    #[must_use]
    pub fn with_store(store: Arc<dyn SessionStore>, settings: SyncSettings) -> Self {
        let mut orchestrator = Self {
            config: None,
            settings,
            store,
            timer: None,
        };
        orchestrator.arm_timer();
        orchestrator
    }

    /// Replaces the settings: disarms the timer, rebuilds the adapter, and
    /// re-arms the timer under the new cadence.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement adapter cannot be built; the
    /// previous adapter stays active in that case.
    pub async fn apply_settings(&mut self, settings: SyncSettings) -> Result<()> {
        self.disarm_timer();

        if let Some(config) = &self.config {
            let config = config.clone().with_sync(settings.clone());
            self.store = build_store(&config, &settings).await?;
            self.config = Some(config);
        }

        tracing::info!(
            mode = settings.mode.as_str(),
            interval_ms = settings.sync_interval_ms,
            offline = settings.offline_mode_enabled,
            "Sync settings applied"
        );
        self.settings = settings;
        self.arm_timer();
        Ok(())
    }

    /// Returns the active adapter.
    #[must_use]
    pub fn store(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.store)
    }

    /// Returns the active settings.
    #[must_use]
    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Returns whether the periodic timer is currently armed.
    #[must_use]
    pub const fn timer_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Runs one outbound push immediately, independent of the timer. Pulls
    /// never happen implicitly; see [`Self::pull_now`].
    ///
    /// # Errors
    ///
    /// Propagates adapter failures; a degraded hybrid adapter reports
    /// `Ok` with zero pushed instead.
    pub async fn sync_now(&self) -> Result<SyncOutcome> {
        let start = Instant::now();
        let result = run_sync_pass(self.store.as_ref()).await;

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::counter!("session_sync_total", "status" => status, "trigger" => "manual")
            .increment(1);
        metrics::histogram!("session_sync_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        result
    }

    /// Pulls replica state into the active adapter and returns the merged
    /// sessions. This is always an explicit call, never part of a timer
    /// tick, so a pull cannot silently resurrect sessions deleted locally
    /// between ticks.
    ///
    /// # Errors
    ///
    /// Propagates adapter failures.
    pub async fn pull_now(&self) -> Result<Vec<Session>> {
        let start = Instant::now();
        let result = self.store.sync_from_cloud().await;

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::counter!("session_sync_total", "status" => status, "trigger" => "pull")
            .increment(1);
        metrics::histogram!("session_sync_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        result
    }

    /// Disarms the timer without touching the adapter.
    pub fn shutdown(&mut self) {
        self.disarm_timer();
    }

    fn arm_timer(&mut self) {
        if self.settings.sync_interval_ms == 0 || self.settings.offline_mode_enabled {
            return;
        }

        let store = Arc::clone(&self.store);
        let interval_ms = self.settings.sync_interval_ms;

        self.timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of an interval fires immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let start = Instant::now();
                let result = run_sync_pass(store.as_ref()).await;

                let status = if result.is_ok() { "success" } else { "error" };
                metrics::counter!("session_sync_total", "status" => status, "trigger" => "timer")
                    .increment(1);
                metrics::histogram!("session_sync_duration_ms")
                    .record(start.elapsed().as_secs_f64() * 1000.0);

                match result {
                    Ok(outcome) => {
                        tracing::debug!(
                            backend = store.backend_name(),
                            pushed = outcome.pushed,
                            "Periodic sync pass finished"
                        );
                    },
                    Err(e) => {
                        // A failed pass never stops the timer
                        tracing::warn!(
                            backend = store.backend_name(),
                            error = %e,
                            "Periodic sync pass failed"
                        );
                    },
                }
            }
        }));
    }

    fn disarm_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        self.disarm_timer();
    }
}

/// One outbound pass: push only. Pulling stays a separate explicit call.
async fn run_sync_pass(store: &dyn SessionStore) -> Result<SyncOutcome> {
    let pushed = store.sync_to_cloud().await?;
    Ok(SyncOutcome { pushed })
}

/// Builds the adapter a settings snapshot calls for.
///
/// Offline mode forces the local adapter regardless of the configured mode,
/// so nothing can reach the network while it is set.
async fn build_store(
    config: &DaybookConfig,
    settings: &SyncSettings,
) -> Result<Arc<dyn SessionStore>> {
    let mode = if settings.offline_mode_enabled {
        StorageMode::Local
    } else {
        settings.mode
    };

    match mode {
        StorageMode::Local => {
            let kv = TieredKv::open(&config.data_dir)?;
            Ok(Arc::new(LocalSessionStore::new(kv)))
        },
        StorageMode::Remote => {
            let kv = TieredKv::open(&config.data_dir)?;
            let cache = LocalSessionStore::new(kv);
            let api = api_client(config, settings)?;
            Ok(Arc::new(RemoteSessionStore::new(api).with_local_cache(cache)))
        },
        StorageMode::Hybrid => {
            let kv = TieredKv::open(&config.data_dir)?;
            let local = LocalSessionStore::new(kv);
            let api = api_client(config, settings)?;
            Ok(Arc::new(HybridSessionStore::connect(local, api).await))
        },
    }
}

fn api_client(config: &DaybookConfig, settings: &SyncSettings) -> Result<ApiClient> {
    let base_url = config.api_base_url.as_deref().ok_or_else(|| {
        Error::InvalidInput(format!(
            "{} mode needs an api_base_url",
            settings.mode.as_str()
        ))
    })?;

    ApiClient::new(base_url, config.api_token.clone(), settings.max_retries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, Session, SessionId};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::assert_ok;

    /// Store that counts pushes and pulls separately.
    #[derive(Default)]
    struct CountingStore {
        syncs: AtomicUsize,
        pulls: AtomicUsize,
    }

    #[async_trait]
    impl SessionStore for CountingStore {
        async fn save_session(&self, _session: &Session) -> Result<()> {
            Ok(())
        }

        async fn load_sessions(&self) -> Result<Vec<Session>> {
            Ok(Vec::new())
        }

        async fn delete_session(&self, _id: &SessionId) -> Result<bool> {
            Ok(false)
        }

        async fn save_message(&self, _id: &SessionId, _message: &ChatMessage) -> Result<()> {
            Ok(())
        }

        async fn load_messages(&self, _id: &SessionId) -> Result<Vec<ChatMessage>> {
            Ok(Vec::new())
        }

        async fn sync_to_cloud(&self) -> Result<usize> {
            self.syncs.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }

        async fn sync_from_cloud(&self) -> Result<Vec<Session>> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Session::new()])
        }

        async fn set_user_id(&self, _user_id: &str) -> Result<()> {
            Ok(())
        }

        async fn user_id(&self) -> Result<Option<String>> {
            Ok(None)
        }

        fn backend_name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_zero_interval_leaves_timer_disarmed() {
        let orchestrator = SyncOrchestrator::with_store(
            Arc::new(CountingStore::default()),
            SyncSettings::new(),
        );
        assert!(!orchestrator.timer_armed());
    }

    #[tokio::test]
    async fn test_offline_mode_suppresses_timer() {
        let orchestrator = SyncOrchestrator::with_store(
            Arc::new(CountingStore::default()),
            SyncSettings::new()
                .with_sync_interval_ms(10)
                .with_offline_mode(true),
        );
        assert!(!orchestrator.timer_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_drives_sync_passes() {
        let store = Arc::new(CountingStore::default());
        let orchestrator = SyncOrchestrator::with_store(
            store.clone(),
            SyncSettings::new().with_sync_interval_ms(100),
        );
        assert!(orchestrator.timer_armed());

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(store.syncs.load(Ordering::SeqCst) >= 3);
        // Ticks push only; a pull is always an explicit call
        assert_eq!(store.pulls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_settings_swaps_timer_cadence() {
        let store = Arc::new(CountingStore::default());
        let mut orchestrator = SyncOrchestrator::with_store(
            store.clone(),
            SyncSettings::new().with_sync_interval_ms(100),
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        let before = store.syncs.load(Ordering::SeqCst);
        assert!(before >= 1);

        // Interval 0 disarms the timer entirely
        assert_ok!(orchestrator.apply_settings(SyncSettings::new()).await);
        assert!(!orchestrator.timer_armed());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.syncs.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_sync_now_pushes_without_pulling() {
        let store = Arc::new(CountingStore::default());
        let orchestrator =
            SyncOrchestrator::with_store(store.clone(), SyncSettings::new());

        let outcome = orchestrator.sync_now().await.unwrap();
        assert_eq!(outcome, SyncOutcome { pushed: 1 });
        assert_eq!(store.syncs.load(Ordering::SeqCst), 1);
        assert_eq!(store.pulls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.summary(), "pushed 1 session(s)");
    }

    #[tokio::test]
    async fn test_pull_now_is_explicit() {
        let store = Arc::new(CountingStore::default());
        let orchestrator =
            SyncOrchestrator::with_store(store.clone(), SyncSettings::new());

        let pulled = orchestrator.pull_now().await.unwrap();
        assert_eq!(pulled.len(), 1);
        assert_eq!(store.pulls.load(Ordering::SeqCst), 1);
        assert_eq!(store.syncs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_disarms_timer() {
        let mut orchestrator = SyncOrchestrator::with_store(
            Arc::new(CountingStore::default()),
            SyncSettings::new().with_sync_interval_ms(50),
        );
        assert!(orchestrator.timer_armed());

        orchestrator.shutdown();
        assert!(!orchestrator.timer_armed());
    }

    #[tokio::test]
    async fn test_local_mode_builds_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaybookConfig::new().with_data_dir(dir.path());

        let orchestrator = SyncOrchestrator::new(config).await.unwrap();
        assert_eq!(orchestrator.store().backend_name(), "local");
        assert!(!orchestrator.timer_armed());
    }

    #[tokio::test]
    async fn test_remote_mode_without_url_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaybookConfig::new()
            .with_data_dir(dir.path())
            .with_sync(SyncSettings::new().with_mode(StorageMode::Remote));

        let result = SyncOrchestrator::new(config).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_offline_forces_local_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaybookConfig::new()
            .with_data_dir(dir.path())
            .with_api_base_url("https://api.example.com")
            .with_sync(
                SyncSettings::new()
                    .with_mode(StorageMode::Remote)
                    .with_offline_mode(true),
            );

        let orchestrator = SyncOrchestrator::new(config).await.unwrap();
        assert_eq!(orchestrator.store().backend_name(), "local");
    }
}
