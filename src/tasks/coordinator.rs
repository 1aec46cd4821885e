use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::OptionFuture;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::{
    classifier::Classifiers,
    config::AccountConfig,
    domain::{ActionThresholds, Backend, InboxBehaviour, Strategy, Verdict, EATSPAM_SEEN_FLAG},
    infrastructure::{metrics::MetricsSink, shutdown::ShutdownListener},
    mailbox::{MailboxConnector, MailboxError, MailboxStore},
    tasks::{
        executor::{ActionExecutor, ExecutorError, Outcome},
        queue::{ActivityEntry, RecentActivityQueue},
        strategy::decide,
    },
};

#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountStats {
    pub candidates: usize,
    pub connected: bool,
    pub last_pass: Option<DateTime<Utc>>,
}

/// One configured account plus what the last pass learned about it.
pub struct AccountState {
    pub config: AccountConfig,
    stats: Mutex<AccountStats>,
    pass_lock: tokio::sync::Mutex<()>,
}

impl AccountState {
    pub fn new(config: AccountConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(AccountStats::default()),
            pass_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn stats(&self) -> AccountStats {
        self.stats.lock().clone()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub account: String,
    pub candidates: usize,
    pub processed: usize,
    pub acted: usize,
    pub failed_verdicts: usize,
    pub errors: usize,
    pub interrupted: bool,
}

#[derive(Debug, Error)]
pub enum PassError {
    #[error("a pass for account {0} is already running")]
    Busy(String),
    #[error("cannot connect: {0}")]
    Connect(#[source] MailboxError),
    #[error("cannot select inbox: {0}")]
    Select(#[source] MailboxError),
    #[error("cannot list candidates: {0}")]
    List(#[source] MailboxError),
}

/// Highest sequence number first so moves and expunges never shift ids still
/// waiting to be processed. Duplicates are kept.
pub fn processing_order(mut ids: Vec<u32>) -> Vec<u32> {
    ids.sort_unstable_by(|a, b| b.cmp(a));
    ids
}

pub struct RunCoordinator {
    classifiers: Classifiers,
    strategy: Strategy,
    thresholds: ActionThresholds,
    executor: ActionExecutor,
    queue: Arc<RecentActivityQueue>,
    metrics: Arc<MetricsSink>,
}

impl RunCoordinator {
    pub fn new(
        classifiers: Classifiers,
        strategy: Strategy,
        thresholds: ActionThresholds,
        executor: ActionExecutor,
        queue: Arc<RecentActivityQueue>,
        metrics: Arc<MetricsSink>,
    ) -> Self {
        Self {
            classifiers,
            strategy,
            thresholds,
            executor,
            queue,
            metrics,
        }
    }

    pub async fn run_pass(
        &self,
        account: &AccountState,
        connector: &dyn MailboxConnector,
        shutdown: &ShutdownListener,
    ) -> Result<PassSummary, PassError> {
        let name = account.config.name.clone();
        let Ok(_running) = account.pass_lock.try_lock() else {
            tracing::warn!(target: "coordinator", account = %name, "pass already running, skipping");
            return Err(PassError::Busy(name));
        };

        let mut store = match connector.connect(&account.config).await {
            Ok(store) => store,
            Err(err) => {
                let mut stats = account.stats.lock();
                stats.connected = false;
                stats.last_pass = Some(Utc::now());
                return Err(PassError::Connect(err));
            }
        };
        account.stats.lock().connected = true;

        let result = self
            .process_inbox(store.as_mut(), &account.config, shutdown)
            .await;

        if let Err(err) = store.logout().await {
            tracing::debug!(target: "coordinator", account = %name, error = %err, "logout failed");
        }

        let mut stats = account.stats.lock();
        stats.last_pass = Some(Utc::now());
        if let Ok(summary) = &result {
            stats.candidates = summary.candidates;
        }
        result
    }

    async fn process_inbox(
        &self,
        store: &mut dyn MailboxStore,
        account: &AccountConfig,
        shutdown: &ShutdownListener,
    ) -> Result<PassSummary, PassError> {
        let mut summary = PassSummary {
            account: account.name.clone(),
            ..PassSummary::default()
        };

        let exists = store.select(&account.inbox).await.map_err(PassError::Select)?;
        if exists == 0 {
            tracing::debug!(target: "coordinator", account = %account.name, "inbox is empty");
            return Ok(summary);
        }

        let candidates = store
            .list_candidates(account.behaviour)
            .await
            .map_err(PassError::List)?;
        summary.candidates = candidates.len();
        tracing::info!(
            target: "coordinator",
            account = %account.name,
            candidates = summary.candidates,
            "processing inbox"
        );

        for seq in processing_order(candidates) {
            if shutdown.is_triggered() {
                tracing::info!(target: "coordinator", account = %account.name, "shutdown requested, stopping pass");
                summary.interrupted = true;
                break;
            }

            match self.process_message(store, account, seq).await {
                Ok(verdict) => {
                    summary.processed += 1;
                    if verdict.is_failed() {
                        summary.failed_verdicts += 1;
                    } else if verdict.is_actionable() {
                        summary.acted += 1;
                    }
                }
                Err(err) => {
                    summary.errors += 1;
                    tracing::warn!(
                        target: "coordinator",
                        account = %account.name,
                        seq,
                        error = %err,
                        "message step failed"
                    );
                }
            }
        }

        Ok(summary)
    }

    async fn process_message(
        &self,
        store: &mut dyn MailboxStore,
        account: &AccountConfig,
        seq: u32,
    ) -> Result<Verdict, ExecutorError> {
        let message = store.fetch(seq).await?;

        let spamd = self
            .classifiers
            .spamd
            .as_ref()
            .filter(|_| self.strategy.consults(Backend::Spamd))
            .map(|c| c.score(&message.body));
        let rspamd = self
            .classifiers
            .rspamd
            .as_ref()
            .filter(|_| self.strategy.consults(Backend::Rspamd))
            .map(|c| c.score(&message.body));
        let (primary, secondary) =
            tokio::join!(OptionFuture::from(spamd), OptionFuture::from(rspamd));

        for err in [&primary, &secondary]
            .into_iter()
            .filter_map(|result| result.as_ref().and_then(|r| r.as_ref().err()))
        {
            tracing::warn!(target: "classifier", seq, backend = %err.backend(), error = %err, "classifier failed");
        }

        let verdict = decide(self.strategy, &self.thresholds, primary, secondary);
        if let Some(failure) = &verdict.failure {
            tracing::warn!(
                target: "coordinator",
                account = %account.name,
                seq,
                subject = %message.envelope.subject,
                reason = %failure,
                "no verdict, leaving message for the next pass"
            );
            return Ok(verdict);
        }

        tracing::info!(
            target: "coordinator",
            account = %account.name,
            seq,
            sender = %message.envelope.sender,
            subject = %message.envelope.subject,
            score = verdict.score,
            action = %verdict.action,
            "verdict"
        );
        self.metrics.increment_action(verdict.action);
        self.queue
            .push(ActivityEntry::new(&account.name, &message, &verdict));

        let outcome = if verdict.is_actionable() {
            self.executor.apply(store, account, &message, &verdict).await?
        } else {
            Outcome::Skipped
        };

        if account.behaviour == InboxBehaviour::EatspamMarkedUnseen && outcome.left_in_place() {
            store.set_flag(seq, EATSPAM_SEEN_FLAG, true).await?;
        }

        Ok(verdict)
    }
}

/// Runs one pass per account, one account after the other.
pub struct Sweep {
    coordinator: Arc<RunCoordinator>,
    connector: Arc<dyn MailboxConnector>,
    accounts: Vec<Arc<AccountState>>,
    running: tokio::sync::Mutex<()>,
}

impl Sweep {
    pub fn new(
        coordinator: Arc<RunCoordinator>,
        connector: Arc<dyn MailboxConnector>,
        accounts: Vec<Arc<AccountState>>,
    ) -> Self {
        Self {
            coordinator,
            connector,
            accounts,
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Resolves once no sweep is running.
    pub async fn wait_idle(&self) {
        let _idle = self.running.lock().await;
    }

    /// Per-account failures are logged, never returned. A sweep started while
    /// another one runs does nothing.
    pub async fn run(&self, shutdown: &ShutdownListener) -> Vec<PassSummary> {
        let Ok(_running) = self.running.try_lock() else {
            tracing::warn!(target: "coordinator", "previous sweep still running, skipping");
            return Vec::new();
        };

        let mut summaries = Vec::with_capacity(self.accounts.len());
        for account in &self.accounts {
            if shutdown.is_triggered() {
                break;
            }
            match self
                .coordinator
                .run_pass(account, self.connector.as_ref(), shutdown)
                .await
            {
                Ok(summary) => {
                    tracing::info!(
                        target: "coordinator",
                        account = %summary.account,
                        candidates = summary.candidates,
                        acted = summary.acted,
                        errors = summary.errors,
                        "pass finished"
                    );
                    summaries.push(summary);
                }
                Err(err) => {
                    tracing::error!(target: "coordinator", account = %account.config.name, error = %err, "pass aborted");
                }
            }
        }
        summaries
    }
}
