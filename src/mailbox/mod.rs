pub mod imap;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use thiserror::Error;

use crate::{
    config::AccountConfig,
    domain::{FetchedMessage, InboxBehaviour},
    infrastructure::secrets::SecretError,
};

pub use self::imap::ImapConnector;

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("connection failed: {0}")]
    Transport(String),
    #[error("server rejected command: {0}")]
    Protocol(String),
    #[error("session is gone")]
    Disconnected,
    #[error("inbox behaviour `{0}` is not supported")]
    UnsupportedBehaviour(InboxBehaviour),
    #[error("message {0} not found")]
    NotFound(u32),
    #[error("cannot decrypt account password: {0}")]
    Secret(#[from] SecretError),
}

/// An authenticated session on one account. Ids are sequence numbers in the
/// currently selected mailbox.
#[async_trait]
pub trait MailboxStore: Send {
    /// Selects `mailbox` and returns how many messages it holds.
    async fn select(&mut self, mailbox: &str) -> Result<u32, MailboxError>;

    async fn list_candidates(&mut self, behaviour: InboxBehaviour)
        -> Result<Vec<u32>, MailboxError>;

    /// Fetches without touching `\Seen`.
    async fn fetch(&mut self, seq: u32) -> Result<FetchedMessage, MailboxError>;

    async fn move_to(&mut self, seqs: &[u32], folder: &str) -> Result<(), MailboxError>;

    async fn delete_and_expunge(&mut self, seqs: &[u32]) -> Result<(), MailboxError>;

    async fn append(
        &mut self,
        folder: &str,
        flags: &[String],
        date: DateTime<FixedOffset>,
        body: &[u8],
    ) -> Result<(), MailboxError>;

    async fn set_flag(&mut self, seq: u32, flag: &str, on: bool) -> Result<(), MailboxError>;

    async fn logout(&mut self) -> Result<(), MailboxError>;
}

#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(&self, account: &AccountConfig) -> Result<Box<dyn MailboxStore>, MailboxError>;
}
