//! Runtime service driving every configured entry
//!
//! Each entry runs in its own task: build and set up the coordinator
//! (retrying while the failure is retryable), register it, then tick on
//! debounced change notifications and on the periodic poll interval until
//! shutdown is requested.

use crate::config::{Config, EntryConfig};
use crate::coordinator::{Coordinator, UpdateOutcome};
use crate::diagnostics::DiagnosticsPublisher;
use crate::host::Host;
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::registry::CoordinatorRegistry;
use crate::scheduler::{RefreshRequester, refresh_channel};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

/// Requests a running service to stop
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

pub struct BalancerService {
    config: Config,
    host: Arc<dyn Host>,
    registry: Arc<CoordinatorRegistry>,
    shutdown: ShutdownHandle,
}

impl BalancerService {
    pub fn new(config: Config, host: Arc<dyn Host>) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            config,
            host,
            registry: Arc::new(CoordinatorRegistry::new()),
            shutdown: ShutdownHandle { tx: Arc::new(tx) },
        }
    }

    pub fn registry(&self) -> Arc<CoordinatorRegistry> {
        self.registry.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Start one task per configured entry
    pub fn spawn_entries(&self) -> Vec<JoinHandle<()>> {
        self.config
            .entries
            .iter()
            .map(|entry| {
                let runner = EntryRunner {
                    entry: entry.clone(),
                    config: self.config.clone(),
                    host: self.host.clone(),
                    registry: self.registry.clone(),
                    shutdown: self.shutdown.tx.subscribe(),
                    logger: get_logger_with_context(
                        LogContext::new("service").with_entry(&entry.id),
                    ),
                };
                tokio::spawn(runner.run())
            })
            .collect()
    }

    /// Run until `signal` completes, then shut every entry down
    pub async fn run_until<F>(&self, signal: F)
    where
        F: Future<Output = ()>,
    {
        let tasks = self.spawn_entries();
        signal.await;
        self.shutdown.shutdown();
        for task in tasks {
            let _ = task.await;
        }
        self.registry.unload_all().await;
    }
}

struct EntryRunner {
    entry: EntryConfig,
    config: Config,
    host: Arc<dyn Host>,
    registry: Arc<CoordinatorRegistry>,
    shutdown: watch::Receiver<bool>,
    logger: StructuredLogger,
}

impl EntryRunner {
    async fn run(mut self) {
        let (refresh, mut debouncer) = refresh_channel(self.config.refresh.cooldown());

        let Some(mut coordinator) = self.set_up(&refresh).await else {
            return;
        };

        let publisher_task = self.start_diagnostics(&mut coordinator);

        let handle = match self.registry.insert(coordinator) {
            Ok(handle) => handle,
            Err(e) => {
                self.logger.error(&e.to_string());
                if let Some(task) = publisher_task {
                    task.abort();
                }
                return;
            }
        };

        let mut poll = self.config.refresh.poll_interval().map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        // Without periodic polling the first tick waits for a change otherwise
        if poll.is_none() {
            refresh.request_refresh();
        }

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = debouncer.next() => {}
                _ = next_poll(&mut poll) => {}
            }
            if *self.shutdown.borrow() {
                break;
            }

            let outcome = handle.lock().await.update().await;
            self.log_outcome(outcome);
        }

        self.registry.unload(&self.entry.id).await;
        if let Some(task) = publisher_task {
            task.abort();
        }
        self.logger.info("Entry stopped");
    }

    /// Build and set up the coordinator, retrying retryable failures
    async fn set_up(&mut self, refresh: &RefreshRequester) -> Option<Coordinator> {
        let retry = self.config.refresh.setup_retry();
        loop {
            if *self.shutdown.borrow() {
                return None;
            }

            let result = match Coordinator::from_entry(
                &self.entry,
                self.host.clone(),
                refresh.clone(),
                self.config.statistics.history_policy(),
            )
            .await
            {
                Ok(mut coordinator) => coordinator.setup().await.map(|()| coordinator),
                Err(e) => Err(e),
            };

            match result {
                Ok(coordinator) => {
                    self.logger.info("Entry set up");
                    return Some(coordinator);
                }
                Err(e) if e.is_retryable() => {
                    self.logger.warn(&format!(
                        "Setup not ready ({}), retrying in {}s",
                        e,
                        retry.as_secs()
                    ));
                }
                Err(e) => {
                    self.logger.error(&format!("Setup failed permanently: {}", e));
                    return None;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(retry) => {}
                _ = self.shutdown.changed() => return None,
            }
        }
    }

    fn start_diagnostics(&self, coordinator: &mut Coordinator) -> Option<JoinHandle<()>> {
        if !self.config.diagnostics.publish {
            return None;
        }

        let notify = Arc::new(Notify::new());
        let listener_notify = notify.clone();
        coordinator.register_update_listener(Box::new(move || listener_notify.notify_one()));

        let status = coordinator.status();
        let publisher =
            DiagnosticsPublisher::new(self.host.clone(), &self.entry.id, &self.entry.slug());
        let logger = self.logger.clone();
        Some(tokio::spawn(async move {
            loop {
                if let Err(e) = publisher.publish(&status.snapshot()).await {
                    logger.warn(&format!("Failed to publish diagnostics: {}", e));
                }
                notify.notified().await;
            }
        }))
    }

    fn log_outcome(&self, outcome: crate::error::Result<UpdateOutcome>) {
        match outcome {
            Ok(UpdateOutcome::Applied(limits)) => self.logger.debug(&format!(
                "Applied limits {:.2}/{:.2}/{:.2}",
                limits[0], limits[1], limits[2]
            )),
            Ok(UpdateOutcome::Inactive) => self.logger.trace("Charger inactive"),
            Ok(UpdateOutcome::Unavailable { phase, missing }) => self
                .logger
                .debug(&format!("Skipped tick, {:?} missing for {}", missing, phase)),
            Ok(UpdateOutcome::NotReady) => self.logger.debug("Coordinator not ready"),
            Err(e) => self.logger.error(&format!("Update failed: {}", e)),
        }
    }
}

async fn next_poll(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
