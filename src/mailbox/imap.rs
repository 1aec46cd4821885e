use std::{net::TcpStream, sync::Arc};

use ::imap::types::Flag;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use native_tls::{TlsConnector, TlsStream};
use tokio::task;

use super::{MailboxConnector, MailboxError, MailboxStore};
use crate::{
    config::AccountConfig,
    domain::{FetchedMessage, InboxBehaviour, EATSPAM_SEEN_FLAG},
    infrastructure::secrets::SecretKey,
};

type ImapSession = ::imap::Session<TlsStream<TcpStream>>;

/// Opens implicit-TLS sessions, decrypting the account password at connect time.
pub struct ImapConnector {
    key: Arc<SecretKey>,
}

impl ImapConnector {
    pub fn new(key: Arc<SecretKey>) -> Self {
        Self { key }
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self, account: &AccountConfig) -> Result<Box<dyn MailboxStore>, MailboxError> {
        let password = self.key.decrypt(&account.password)?;
        let account = account.clone();
        let session = task::spawn_blocking(move || open_session(&account, &password))
            .await
            .map_err(|err| MailboxError::Transport(err.to_string()))??;
        Ok(Box::new(ImapStore {
            session: Some(session),
        }))
    }
}

fn open_session(account: &AccountConfig, password: &str) -> Result<ImapSession, MailboxError> {
    let tls = TlsConnector::builder()
        .danger_accept_invalid_certs(account.insecure_skip_verify)
        .danger_accept_invalid_hostnames(account.insecure_skip_verify)
        .build()
        .map_err(|err| MailboxError::Transport(err.to_string()))?;

    let client = ::imap::connect(
        (account.host.as_str(), account.port),
        account.host.as_str(),
        &tls,
    )
    .map_err(from_imap)?;

    tracing::debug!(target: "imap", account = %account.name, host = %account.host, "connected");

    client
        .login(account.username.as_str(), password)
        .map_err(|(err, _client)| MailboxError::Protocol(format!("login refused: {err}")))
}

fn from_imap(err: ::imap::Error) -> MailboxError {
    match err {
        ::imap::Error::Io(err) => MailboxError::Transport(err.to_string()),
        ::imap::Error::ConnectionLost => MailboxError::Disconnected,
        other => MailboxError::Protocol(other.to_string()),
    }
}

fn sequence_set(seqs: &[u32]) -> String {
    seqs.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

pub struct ImapStore {
    session: Option<ImapSession>,
}

impl ImapStore {
    /// Runs a blocking IMAP command off the runtime. The session is handed to
    /// the blocking task and put back once it returns.
    async fn with_session<T, F>(&mut self, op: F) -> Result<T, MailboxError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession) -> Result<T, ::imap::Error> + Send + 'static,
    {
        let mut session = self.session.take().ok_or(MailboxError::Disconnected)?;
        let (session, result) = task::spawn_blocking(move || {
            let result = op(&mut session);
            (session, result)
        })
        .await
        .map_err(|_| MailboxError::Disconnected)?;

        match result {
            Err(::imap::Error::ConnectionLost) => Err(MailboxError::Disconnected),
            other => {
                self.session = Some(session);
                other.map_err(from_imap)
            }
        }
    }
}

#[async_trait]
impl MailboxStore for ImapStore {
    async fn select(&mut self, mailbox: &str) -> Result<u32, MailboxError> {
        let mailbox = mailbox.to_string();
        self.with_session(move |session| session.select(&mailbox).map(|mb| mb.exists))
            .await
    }

    async fn list_candidates(
        &mut self,
        behaviour: InboxBehaviour,
    ) -> Result<Vec<u32>, MailboxError> {
        let query = match behaviour {
            InboxBehaviour::Unseen => "UNSEEN".to_string(),
            InboxBehaviour::EatspamMarkedUnseen => format!("UNKEYWORD {EATSPAM_SEEN_FLAG}"),
            InboxBehaviour::All => return Err(MailboxError::UnsupportedBehaviour(behaviour)),
        };
        let found = self
            .with_session(move |session| session.search(&query))
            .await?;
        Ok(found.into_iter().collect())
    }

    async fn fetch(&mut self, seq: u32) -> Result<FetchedMessage, MailboxError> {
        let fetched = self
            .with_session(move |session| {
                let fetches = session.fetch(seq.to_string(), "(INTERNALDATE BODY.PEEK[])")?;
                let first = fetches.iter().find_map(|fetch| {
                    fetch
                        .body()
                        .map(|body| (body.to_vec(), fetch.internal_date()))
                });
                Ok(first)
            })
            .await?;

        let (body, internal_date) = fetched.ok_or(MailboxError::NotFound(seq))?;
        Ok(FetchedMessage::new(seq, body, internal_date))
    }

    async fn move_to(&mut self, seqs: &[u32], folder: &str) -> Result<(), MailboxError> {
        let set = sequence_set(seqs);
        let folder = folder.to_string();
        self.with_session(move |session| session.mv(&set, &folder))
            .await
    }

    async fn delete_and_expunge(&mut self, seqs: &[u32]) -> Result<(), MailboxError> {
        let set = sequence_set(seqs);
        self.with_session(move |session| {
            session.store(&set, "+FLAGS (\\Deleted)")?;
            session.expunge()?;
            Ok(())
        })
        .await
    }

    async fn append(
        &mut self,
        folder: &str,
        flags: &[String],
        date: DateTime<FixedOffset>,
        body: &[u8],
    ) -> Result<(), MailboxError> {
        let folder = folder.to_string();
        let flags: Vec<Flag<'static>> = flags.iter().cloned().map(Flag::from).collect();
        let body = body.to_vec();
        self.with_session(move |session| {
            session.append_with_flags_and_date(&folder, &body, &flags, date)
        })
        .await
    }

    async fn set_flag(&mut self, seq: u32, flag: &str, on: bool) -> Result<(), MailboxError> {
        let query = format!("{}FLAGS ({flag})", if on { "+" } else { "-" });
        self.with_session(move |session| session.store(seq.to_string(), &query).map(|_| ()))
            .await
    }

    async fn logout(&mut self) -> Result<(), MailboxError> {
        match self.session.take() {
            Some(mut session) => task::spawn_blocking(move || session.logout())
                .await
                .map_err(|_| MailboxError::Disconnected)?
                .map_err(from_imap),
            None => Ok(()),
        }
    }
}
