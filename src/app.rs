use std::{sync::Arc, time::Duration};

use anyhow::Result;
use reqwest::Client;
use tokio::time::timeout;

use crate::{
    classifier::Classifiers,
    config::AppConfig,
    dashboard::{self, DashboardState},
    infrastructure::{
        directories::ResolvedPaths, metrics::MetricsSink, notifier::NotificationState,
        secrets::SecretKey, shutdown::Shutdown,
    },
    mailbox::{ImapConnector, MailboxConnector},
    tasks::{
        coordinator::{AccountState, PassSummary, RunCoordinator, Sweep},
        executor::ActionExecutor,
        queue::RecentActivityQueue,
        scheduler::configure_sweep_job,
    },
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct EatspamApp {
    _paths: ResolvedPaths,
    config: Arc<AppConfig>,
    sweep: Arc<Sweep>,
    dashboard: DashboardState,
    shutdown: Shutdown,
}

impl EatspamApp {
    pub async fn initialize(
        config: AppConfig,
        paths: ResolvedPaths,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let config = Arc::new(config);

        let (key, created) = SecretKey::load_or_create(&paths.key_file)?;
        if created {
            tracing::warn!(
                target: "config",
                key_file = %paths.key_file.display(),
                "created a new key, passwords encrypted with another key will not decrypt"
            );
        }
        let key = Arc::new(key);

        let http_client = Client::builder()
            .user_agent(format!("eatspam/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        let classifiers = Classifiers::from_config(&config, http_client, &key)?;
        if classifiers.enabled().next().is_none() {
            tracing::warn!(target: "config", "neither spamd nor rspamd is enabled, no message will be judged");
        }

        let queue = Arc::new(RecentActivityQueue::new(config.queue_capacity));
        let metrics = Arc::new(MetricsSink::new());
        let notifications = Arc::new(NotificationState::new());

        let coordinator = Arc::new(RunCoordinator::new(
            classifiers.clone(),
            config.strategy,
            config.thresholds.clone(),
            ActionExecutor::new(config.marking.clone()),
            queue.clone(),
            metrics.clone(),
        ));

        let accounts: Vec<Arc<AccountState>> = config
            .accounts
            .iter()
            .cloned()
            .map(|account| Arc::new(AccountState::new(account)))
            .collect();
        let connector: Arc<dyn MailboxConnector> = Arc::new(ImapConnector::new(key));
        let sweep = Arc::new(Sweep::new(coordinator, connector, accounts.clone()));

        let dashboard = DashboardState {
            queue,
            metrics,
            notifications,
            classifiers,
            accounts,
            collect_metrics: config.collect_metrics,
        };

        Ok(Self {
            _paths: paths,
            config,
            sweep,
            dashboard,
            shutdown,
        })
    }

    pub async fn run(self) -> Result<()> {
        tracing::info!(
            target: "lifecycle",
            accounts = self.config.accounts.len(),
            strategy = %self.config.strategy,
            daemon = self.config.daemon,
            "eatspam starting"
        );
        if self.config.daemon {
            self.run_daemon().await
        } else {
            self.run_once().await
        }
    }

    async fn run_once(self) -> Result<()> {
        let summaries = self.sweep.run(&self.shutdown.subscribe()).await;
        log_totals(&summaries);
        tracing::info!(target: "lifecycle", "eatspam finished");
        Ok(())
    }

    async fn run_daemon(self) -> Result<()> {
        let EatspamApp {
            _paths: _,
            config,
            sweep,
            dashboard,
            shutdown,
        } = self;

        let mut scheduler =
            configure_sweep_job(config.interval, sweep.clone(), shutdown.clone()).await?;

        let first_sweep = {
            let sweep = sweep.clone();
            let listener = shutdown.subscribe();
            tokio::spawn(async move { log_totals(&sweep.run(&listener).await) })
        };

        let mut dashboard_handle = tokio::spawn(dashboard::serve(
            config.http.port,
            dashboard,
            shutdown.subscribe(),
        ));
        let mut dashboard_completed = false;

        let mut shutdown_listener = shutdown.subscribe();
        tokio::select! {
            _ = shutdown_listener.notified() => {
                tracing::info!(target: "lifecycle", "shutdown requested");
            }
            res = &mut dashboard_handle => {
                dashboard_completed = true;
                match res {
                    Ok(Err(err)) => tracing::error!(target: "dashboard", error = %err, "dashboard failed"),
                    Err(err) => tracing::error!(target: "dashboard", error = %err, "dashboard task aborted"),
                    Ok(Ok(())) => {}
                }
            }
        }

        shutdown.trigger();

        match timeout(SHUTDOWN_TIMEOUT, scheduler.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(target: "scheduler", ?err, "scheduler shutdown failed"),
            Err(_) => tracing::warn!(
                target: "scheduler",
                "scheduler did not stop within {:?}",
                SHUTDOWN_TIMEOUT
            ),
        }

        if !dashboard_completed {
            if timeout(SHUTDOWN_TIMEOUT, &mut dashboard_handle).await.is_err() {
                tracing::warn!(
                    target: "dashboard",
                    "dashboard did not stop within {:?}; aborting",
                    SHUTDOWN_TIMEOUT
                );
                dashboard_handle.abort();
            }
        }

        if timeout(SHUTDOWN_TIMEOUT, sweep.wait_idle()).await.is_err() {
            tracing::warn!(
                target: "coordinator",
                "running sweep did not finish within {:?}",
                SHUTDOWN_TIMEOUT
            );
        }
        first_sweep.abort();

        tracing::info!(target: "lifecycle", "eatspam stopped");
        Ok(())
    }
}

fn log_totals(summaries: &[PassSummary]) {
    let candidates: usize = summaries.iter().map(|s| s.candidates).sum();
    let acted: usize = summaries.iter().map(|s| s.acted).sum();
    let errors: usize = summaries.iter().map(|s| s.errors).sum();
    tracing::info!(
        target: "coordinator",
        accounts = summaries.len(),
        candidates,
        acted,
        errors,
        "sweep complete"
    );
}
