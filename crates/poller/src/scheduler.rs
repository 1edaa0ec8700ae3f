//! Supervisor that keeps one polling loop running per active instance.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tradewatch_core::{
    AdapterSource, AppConfig, ErrorRecord, FetchError, InstanceUpdate, MonitoredInstance,
    StorageConnector,
};
use tradewatch_notify::{ChatTransport, EventDispatcher};

use crate::poller::{CycleOutcome, Poller};
use crate::recovery::ErrorRecoveryManager;

/// Everything a polling loop needs to build its own poller.
pub struct PollerContext {
    connector: Arc<dyn StorageConnector>,
    adapters: Arc<dyn AdapterSource>,
    chat: Option<Arc<dyn ChatTransport>>,
    config: Arc<AppConfig>,
}

impl std::fmt::Debug for PollerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerContext").finish_non_exhaustive()
    }
}

impl PollerContext {
    #[must_use]
    pub fn new(
        connector: Arc<dyn StorageConnector>,
        adapters: Arc<dyn AdapterSource>,
        config: AppConfig,
    ) -> Self {
        Self {
            connector,
            adapters,
            chat: None,
            config: Arc::new(config),
        }
    }

    /// Sends chat messages through `chat` instead of the Telegram Bot API.
    #[must_use]
    pub fn with_chat_transport(mut self, chat: Arc<dyn ChatTransport>) -> Self {
        self.chat = Some(chat);
        self
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Opens a storage session of its own for one loop.
    ///
    /// # Errors
    /// Returns an error if no session can be opened within the retry budget.
    pub async fn open_storage(&self) -> Result<Arc<ErrorRecoveryManager>> {
        let manager = ErrorRecoveryManager::connect(self.connector.clone(), &self.config.recovery)
            .await
            .context("failed to open storage session")?;
        Ok(Arc::new(manager))
    }

    /// Builds a poller for `instance` with a fresh adapter and dispatcher.
    ///
    /// # Errors
    /// Returns an error if the adapter or an HTTP client cannot be built.
    pub async fn build_poller(
        &self,
        instance: MonitoredInstance,
        storage: Arc<ErrorRecoveryManager>,
    ) -> Result<Poller> {
        let adapter = self.adapters.adapter_for(&instance).await?;
        let notifications = &self.config.notifications;
        let dispatcher = match &self.chat {
            Some(chat) => EventDispatcher::with_transport(&instance, notifications, chat.clone())?,
            None => EventDispatcher::for_instance(&instance, notifications)?,
        };
        Ok(Poller::new(
            instance,
            adapter,
            storage,
            dispatcher,
            &self.config.balance,
        ))
    }
}

/// Spawns and supervises per-instance polling loops.
pub struct Scheduler {
    context: Arc<PollerContext>,
    loops: HashMap<i64, JoinHandle<()>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("loops", &self.loops.len())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new(context: PollerContext) -> Self {
        Self {
            context: Arc::new(context),
            loops: HashMap::new(),
        }
    }

    /// Instance ids with a running loop.
    #[must_use]
    pub fn running(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .loops
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Runs until `shutdown` flips to true, re-listing active instances every
    /// `scheduler.refresh_interval_secs`. In-flight cycles finish before this
    /// returns.
    ///
    /// # Errors
    /// Returns an error if the supervisor cannot open its storage session.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let supervisor = self.context.open_storage().await?;
        let refresh = self.context.config.scheduler.refresh_interval();
        info!(refresh_secs = refresh.as_secs(), "Scheduler started");

        loop {
            self.reconcile(&supervisor, &shutdown).await;

            tokio::select! {
                () = tokio::time::sleep(refresh) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }

        info!("Shutting down, waiting for {} polling loops", self.loops.len());
        for (instance_id, handle) in self.loops.drain() {
            if let Err(e) = handle.await {
                error!(instance_id, "Polling loop panicked: {}", e);
            }
        }
        info!("Scheduler stopped");
        Ok(())
    }

    /// Drops finished loops and starts one for every active instance
    /// without a loop.
    async fn reconcile(&mut self, supervisor: &ErrorRecoveryManager, shutdown: &watch::Receiver<bool>) {
        self.loops.retain(|instance_id, handle| {
            let running = !handle.is_finished();
            if !running {
                debug!(instance_id = *instance_id, "Polling loop has exited");
            }
            running
        });

        let instances = match supervisor
            .run("list_active_instances", |s| async move { s.list_active_instances().await })
            .await
        {
            Ok(instances) => instances,
            Err(e) => {
                error!("Failed to list active instances: {}", e);
                return;
            }
        };

        for instance in instances {
            if self.loops.contains_key(&instance.id) {
                continue;
            }
            info!(
                instance_id = instance.id,
                exchange = %instance.exchange,
                "Starting polling loop for {}",
                instance.name
            );
            let handle = tokio::spawn(run_instance_loop(
                self.context.clone(),
                instance.id,
                shutdown.clone(),
            ));
            self.loops.insert(instance.id, handle);
        }
    }
}

/// Polls one instance until it is deactivated, removed, or shutdown is
/// signalled. The instance row is re-read at the top of every cycle.
pub async fn run_instance_loop(
    context: Arc<PollerContext>,
    instance_id: i64,
    mut shutdown: watch::Receiver<bool>,
) {
    let storage = match context.open_storage().await {
        Ok(storage) => storage,
        Err(e) => {
            error!(instance_id, "Polling loop not started: {:#}", e);
            return;
        }
    };
    let default_secs = context.config.scheduler.default_polling_interval_secs;
    let mut poller: Option<Poller> = None;
    let mut interval = std::time::Duration::from_secs(default_secs.max(1));

    loop {
        if *shutdown.borrow() {
            break;
        }

        match storage
            .run("load_instance", move |s| async move { s.load_instance(instance_id).await })
            .await
        {
            Ok(Some(instance)) if instance.is_active => {
                interval = instance.polling_interval(default_secs);
                poll_cycle(&context, &storage, &mut poller, instance).await;
            }
            Ok(_) => {
                info!(instance_id, "Instance inactive or removed, stopping polling loop");
                break;
            }
            Err(e) => error!(instance_id, "Failed to load instance: {}", e),
        }

        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!(instance_id, "Polling loop exited");
}

async fn poll_cycle(
    context: &PollerContext,
    storage: &Arc<ErrorRecoveryManager>,
    poller: &mut Option<Poller>,
    instance: MonitoredInstance,
) {
    let instance_id = instance.id;
    let reusable = poller
        .as_ref()
        .is_some_and(|p| p.instance().exchange == instance.exchange);

    if reusable {
        if let Some(p) = poller.as_mut() {
            p.refresh(instance, &context.config.notifications);
        }
    } else {
        match context.build_poller(instance, storage.clone()).await {
            Ok(p) => *poller = Some(p),
            Err(e) => {
                *poller = None;
                warn!(instance_id, "Cannot build poller: {:#}", e);
                record_setup_failure(storage, instance_id, &e).await;
                return;
            }
        }
    }

    let Some(p) = poller.as_mut() else { return };
    let outcome = p.poll_once().await;
    if outcome.report().auth_rejected {
        // Keys may have been rotated in the instance row; rebuild next cycle.
        info!(instance_id, "Exchange rejected API keys, adapter will be rebuilt");
        *poller = None;
    }
    match outcome {
        CycleOutcome::Success(_) => {}
        CycleOutcome::PartialFailure(report) => {
            warn!(instance_id, failed = ?report.fetch_failures, "Cycle completed with fetch failures");
        }
        CycleOutcome::HardFailure { error, .. } => {
            error!(instance_id, "Cycle failed: {}", error);
        }
    }
}

async fn record_setup_failure(storage: &ErrorRecoveryManager, instance_id: i64, err: &anyhow::Error) {
    let error_type = match err.downcast_ref::<FetchError>() {
        Some(FetchError::Authentication(_)) => "credentials",
        Some(FetchError::UnsupportedExchange(_)) => "unsupported_exchange",
        Some(FetchError::Network(_) | FetchError::Timeout(_)) => "setup_transient",
        _ => "adapter_init",
    };
    let record = ErrorRecord::new(instance_id, error_type, format!("{err:#}"));
    let update = InstanceUpdate::Failed {
        error: format!("{err:#}"),
    };
    let (record, update) = (&record, &update);

    if let Err(e) = storage
        .run("append_error", move |s| async move { s.append_error(record).await })
        .await
    {
        warn!(instance_id, "Could not log setup failure: {}", e);
    }
    if let Err(e) = storage
        .run("update_instance", move |s| async move {
            s.update_instance(instance_id, update).await
        })
        .await
    {
        warn!(instance_id, "Could not record last_error: {}", e);
    }
}
