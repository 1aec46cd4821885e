use thiserror::Error;

use crate::{
    config::{AccountConfig, MarkingConfig},
    domain::{FetchedMessage, InboxBehaviour, SpamAction, Verdict, EATSPAM_SEEN_FLAG},
    mailbox::{MailboxError, MailboxStore},
    tasks::rewrite,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Moved to the quarantine folder.
    Moved,
    /// Deleted and appended again with edited content.
    Replaced,
    /// Nothing to do, the original stays untouched.
    Skipped,
    /// Action kept on record only.
    Recorded,
}

impl Outcome {
    pub fn left_in_place(&self) -> bool {
        matches!(self, Outcome::Skipped | Outcome::Recorded)
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Mailbox(#[from] MailboxError),
}

pub struct ActionExecutor {
    marking: MarkingConfig,
}

impl ActionExecutor {
    pub fn new(marking: MarkingConfig) -> Self {
        Self { marking }
    }

    /// Carries out the verdict's action on the message. The mailbox holding
    /// `message` must be selected on `store`.
    pub async fn apply(
        &self,
        store: &mut dyn MailboxStore,
        account: &AccountConfig,
        message: &FetchedMessage,
        verdict: &Verdict,
    ) -> Result<Outcome, ExecutorError> {
        if verdict.is_failed() {
            return Ok(Outcome::Skipped);
        }

        match verdict.action {
            SpamAction::NoAction => Ok(Outcome::Skipped),
            SpamAction::SoftReject | SpamAction::Greylist => Ok(Outcome::Recorded),
            SpamAction::Reject => {
                store.move_to(&[message.seq], &account.quarantine).await?;
                tracing::info!(
                    target: "executor",
                    account = %account.name,
                    seq = message.seq,
                    folder = %account.quarantine,
                    "moved to quarantine"
                );
                Ok(Outcome::Moved)
            }
            SpamAction::AddHeader => {
                if rewrite::has_spam_flag(&message.body) {
                    tracing::debug!(target: "executor", seq = message.seq, "spam header already present");
                    return Ok(Outcome::Skipped);
                }
                let block =
                    rewrite::render_header_block(&self.marking.header_template, true, verdict.score);
                let body = rewrite::prepend_headers(&message.body, &block);
                self.replace(store, account, message, &body).await
            }
            SpamAction::RewriteSubject => {
                if rewrite::subject_has_mark(&message.body, &self.marking.subject_mark) {
                    tracing::debug!(target: "executor", seq = message.seq, "subject already marked");
                    return Ok(Outcome::Skipped);
                }
                let body = rewrite::mark_subject(&message.body, &self.marking.subject_mark);
                self.replace(store, account, message, &body).await
            }
        }
    }

    /// Swaps the original for `body`. Not atomic: the original is expunged
    /// before the copy is appended.
    async fn replace(
        &self,
        store: &mut dyn MailboxStore,
        account: &AccountConfig,
        message: &FetchedMessage,
        body: &[u8],
    ) -> Result<Outcome, ExecutorError> {
        let flags = match account.behaviour {
            InboxBehaviour::EatspamMarkedUnseen => vec![EATSPAM_SEEN_FLAG.to_string()],
            InboxBehaviour::Unseen | InboxBehaviour::All => Vec::new(),
        };

        store.delete_and_expunge(&[message.seq]).await?;
        if let Err(err) = store
            .append(&account.inbox, &flags, message.envelope.date, body)
            .await
        {
            tracing::error!(
                target: "executor",
                account = %account.name,
                seq = message.seq,
                subject = %message.envelope.subject,
                error = %err,
                "original expunged but the edited copy could not be appended"
            );
            return Err(err.into());
        }

        tracing::info!(target: "executor", account = %account.name, seq = message.seq, "message replaced");
        Ok(Outcome::Replaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{DEFAULT_HEADER_TEMPLATE, DEFAULT_SUBJECT_MARK},
        mailbox::memory::{MemoryMailbox, StoredMessage},
    };

    const SPAM: &str = "From: bad@example.org\r\nSubject: Win now\r\nDate: Fri, 1 Mar 2024 10:00:00 +0000\r\n\r\nclick here\r\n";

    fn executor() -> ActionExecutor {
        ActionExecutor::new(MarkingConfig {
            subject_mark: DEFAULT_SUBJECT_MARK.to_string(),
            header_template: DEFAULT_HEADER_TEMPLATE.to_string(),
        })
    }

    fn account(behaviour: InboxBehaviour) -> AccountConfig {
        AccountConfig {
            name: "test".into(),
            host: "imap.example.org".into(),
            port: 993,
            username: "user".into(),
            password: String::new(),
            insecure_skip_verify: false,
            inbox: "INBOX".into(),
            quarantine: "Spam".into(),
            behaviour,
        }
    }

    #[tokio::test]
    async fn reject_moves_to_quarantine() {
        let mailbox = MemoryMailbox::new().with_folder("INBOX", vec![StoredMessage::new(SPAM)]);
        let mut store = mailbox.store();
        store.select("INBOX").await.unwrap();
        let message = store.fetch(1).await.unwrap();

        let outcome = executor()
            .apply(
                &mut store,
                &account(InboxBehaviour::Unseen),
                &message,
                &Verdict::new(12.0, SpamAction::Reject),
            )
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Moved);
        assert!(mailbox.folder("INBOX").is_empty());
        assert_eq!(mailbox.folder("Spam").len(), 1);
    }

    #[tokio::test]
    async fn add_header_twice_leaves_the_body_alone() {
        let mailbox = MemoryMailbox::new().with_folder("INBOX", vec![StoredMessage::new(SPAM)]);
        let mut store = mailbox.store();
        let account = account(InboxBehaviour::EatspamMarkedUnseen);
        let verdict = Verdict::new(5.0, SpamAction::AddHeader);

        store.select("INBOX").await.unwrap();
        let message = store.fetch(1).await.unwrap();
        let first = executor().apply(&mut store, &account, &message, &verdict).await.unwrap();
        assert_eq!(first, Outcome::Replaced);

        let after_first = mailbox.folder("INBOX");
        assert_eq!(after_first.len(), 1);
        assert!(after_first[0].body_str().starts_with("X-Spam-Flag: YES\r\n"));
        assert!(after_first[0].flags.contains(EATSPAM_SEEN_FLAG));
        assert_eq!(after_first[0].date, message.envelope.date);

        let again = store.fetch(1).await.unwrap();
        let second = executor().apply(&mut store, &account, &again, &verdict).await.unwrap();
        assert_eq!(second, Outcome::Skipped);
        assert_eq!(mailbox.folder("INBOX")[0].body, after_first[0].body);
    }

    #[tokio::test]
    async fn huge_score_header_stays_bounded() {
        let mailbox = MemoryMailbox::new().with_folder("INBOX", vec![StoredMessage::new(SPAM)]);
        let mut store = mailbox.store();
        store.select("INBOX").await.unwrap();
        let message = store.fetch(1).await.unwrap();

        let outcome = executor()
            .apply(
                &mut store,
                &account(InboxBehaviour::Unseen),
                &message,
                &Verdict::new(1e30, SpamAction::AddHeader),
            )
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Replaced);
        let stored = mailbox.folder("INBOX");
        let level = format!("X-Spam-Level: {}\r\n", "*".repeat(50));
        assert!(stored[0].body_str().contains(&level));
        assert!(stored[0].body.len() < SPAM.len() + 1024);
    }

    #[tokio::test]
    async fn rewrite_subject_is_idempotent() {
        let mailbox = MemoryMailbox::new().with_folder("INBOX", vec![StoredMessage::new(SPAM)]);
        let mut store = mailbox.store();
        let account = account(InboxBehaviour::Unseen);
        let verdict = Verdict::new(7.0, SpamAction::RewriteSubject);

        store.select("INBOX").await.unwrap();
        let message = store.fetch(1).await.unwrap();
        executor().apply(&mut store, &account, &message, &verdict).await.unwrap();

        let stored = mailbox.folder("INBOX");
        assert!(stored[0].body_str().contains("Subject: *** SPAM *** Win now\r\n"));
        assert!(stored[0].flags.is_empty());

        let again = store.fetch(1).await.unwrap();
        let outcome = executor().apply(&mut store, &account, &again, &verdict).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped);
    }

    #[tokio::test]
    async fn soft_actions_and_failures_touch_nothing() {
        let mailbox = MemoryMailbox::new().with_folder("INBOX", vec![StoredMessage::new(SPAM)]);
        let mut store = mailbox.store();
        let account = account(InboxBehaviour::Unseen);
        store.select("INBOX").await.unwrap();
        let message = store.fetch(1).await.unwrap();

        for (verdict, expected) in [
            (Verdict::new(9.0, SpamAction::Greylist), Outcome::Recorded),
            (Verdict::new(9.0, SpamAction::SoftReject), Outcome::Recorded),
            (
                Verdict::failed(crate::domain::VerdictFailure::NoBackendEnabled),
                Outcome::Skipped,
            ),
        ] {
            let outcome = executor().apply(&mut store, &account, &message, &verdict).await.unwrap();
            assert_eq!(outcome, expected);
        }
        assert_eq!(mailbox.folder("INBOX"), vec![StoredMessage::new(SPAM)]);
    }

    #[tokio::test]
    async fn failed_append_is_reported() {
        let mailbox = MemoryMailbox::new().with_folder("INBOX", vec![StoredMessage::new(SPAM)]);
        mailbox.fail_append();
        let mut store = mailbox.store();
        store.select("INBOX").await.unwrap();
        let message = store.fetch(1).await.unwrap();

        let result = executor()
            .apply(
                &mut store,
                &account(InboxBehaviour::Unseen),
                &message,
                &Verdict::new(5.0, SpamAction::AddHeader),
            )
            .await;

        assert!(matches!(result, Err(ExecutorError::Mailbox(MailboxError::Protocol(_)))));
        assert!(mailbox.folder("INBOX").is_empty());
    }
}
