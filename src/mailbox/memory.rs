//! In-memory mailbox used by the coordinator and executor tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use parking_lot::Mutex;

use super::{MailboxConnector, MailboxError, MailboxStore};
use crate::{
    config::AccountConfig,
    domain::{FetchedMessage, InboxBehaviour, EATSPAM_SEEN_FLAG, SEEN_FLAG},
};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub body: Vec<u8>,
    pub flags: BTreeSet<String>,
    pub date: DateTime<FixedOffset>,
}

impl StoredMessage {
    pub fn new(body: &str) -> Self {
        Self {
            body: body.as_bytes().to_vec(),
            flags: BTreeSet::new(),
            date: Utc
                .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
                .single()
                .map(|d| d.fixed_offset())
                .unwrap_or_else(|| Utc::now().fixed_offset()),
        }
    }

    pub fn flagged(mut self, flag: &str) -> Self {
        self.flags.insert(flag.to_string());
        self
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    folders: BTreeMap<String, Vec<StoredMessage>>,
    fail_connect: bool,
    fail_append: bool,
    connects: usize,
    logouts: usize,
}

/// Shared handle to the fake server; clones see the same folders.
#[derive(Clone, Default)]
pub struct MemoryMailbox {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_folder(self, name: &str, messages: Vec<StoredMessage>) -> Self {
        self.state.lock().folders.insert(name.to_string(), messages);
        self
    }

    pub fn fail_connect(&self) {
        self.state.lock().fail_connect = true;
    }

    pub fn fail_append(&self) {
        self.state.lock().fail_append = true;
    }

    pub fn folder(&self, name: &str) -> Vec<StoredMessage> {
        self.state
            .lock()
            .folders
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn logouts(&self) -> usize {
        self.state.lock().logouts
    }

    pub fn store(&self) -> MemoryStore {
        MemoryStore {
            state: self.state.clone(),
            selected: None,
        }
    }
}

#[async_trait]
impl MailboxConnector for MemoryMailbox {
    async fn connect(&self, account: &AccountConfig) -> Result<Box<dyn MailboxStore>, MailboxError> {
        let mut state = self.state.lock();
        if state.fail_connect {
            return Err(MailboxError::Transport(format!(
                "{}:{} refused",
                account.host, account.port
            )));
        }
        state.connects += 1;
        drop(state);
        Ok(Box::new(self.store()))
    }
}

pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    selected: Option<String>,
}

impl MemoryStore {
    fn selected(&self) -> Result<String, MailboxError> {
        self.selected
            .clone()
            .ok_or_else(|| MailboxError::Protocol("no mailbox selected".into()))
    }

    /// Removes the given sequence numbers from the selected folder, highest first.
    fn take(&self, seqs: &[u32]) -> Result<Vec<StoredMessage>, MailboxError> {
        let selected = self.selected()?;
        let mut state = self.state.lock();
        let folder = state.folders.entry(selected).or_default();

        let mut sorted: Vec<u32> = seqs.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();

        let mut removed = Vec::new();
        for seq in sorted {
            let index = seq as usize;
            if index == 0 || index > folder.len() {
                return Err(MailboxError::NotFound(seq));
            }
            removed.push(folder.remove(index - 1));
        }
        removed.reverse();
        Ok(removed)
    }
}

#[async_trait]
impl MailboxStore for MemoryStore {
    async fn select(&mut self, mailbox: &str) -> Result<u32, MailboxError> {
        let state = self.state.lock();
        let folder = state
            .folders
            .get(mailbox)
            .ok_or_else(|| MailboxError::Protocol(format!("no such mailbox {mailbox}")))?;
        let exists = folder.len() as u32;
        drop(state);
        self.selected = Some(mailbox.to_string());
        Ok(exists)
    }

    async fn list_candidates(
        &mut self,
        behaviour: InboxBehaviour,
    ) -> Result<Vec<u32>, MailboxError> {
        let flag = match behaviour {
            InboxBehaviour::Unseen => SEEN_FLAG,
            InboxBehaviour::EatspamMarkedUnseen => EATSPAM_SEEN_FLAG,
            InboxBehaviour::All => return Err(MailboxError::UnsupportedBehaviour(behaviour)),
        };
        let selected = self.selected()?;
        let state = self.state.lock();
        Ok(state
            .folders
            .get(&selected)
            .map(|messages| {
                messages
                    .iter()
                    .enumerate()
                    .filter(|(_, message)| !message.flags.contains(flag))
                    .map(|(index, _)| index as u32 + 1)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch(&mut self, seq: u32) -> Result<FetchedMessage, MailboxError> {
        let selected = self.selected()?;
        let state = self.state.lock();
        let message = state
            .folders
            .get(&selected)
            .and_then(|messages| messages.get((seq as usize).wrapping_sub(1)))
            .ok_or(MailboxError::NotFound(seq))?;
        Ok(FetchedMessage::new(
            seq,
            message.body.clone(),
            Some(message.date),
        ))
    }

    async fn move_to(&mut self, seqs: &[u32], folder: &str) -> Result<(), MailboxError> {
        let moved = self.take(seqs)?;
        self.state
            .lock()
            .folders
            .entry(folder.to_string())
            .or_default()
            .extend(moved);
        Ok(())
    }

    async fn delete_and_expunge(&mut self, seqs: &[u32]) -> Result<(), MailboxError> {
        self.take(seqs).map(|_| ())
    }

    async fn append(
        &mut self,
        folder: &str,
        flags: &[String],
        date: DateTime<FixedOffset>,
        body: &[u8],
    ) -> Result<(), MailboxError> {
        let mut state = self.state.lock();
        if state.fail_append {
            return Err(MailboxError::Protocol("APPEND rejected".into()));
        }
        state
            .folders
            .entry(folder.to_string())
            .or_default()
            .push(StoredMessage {
                body: body.to_vec(),
                flags: flags.iter().cloned().collect(),
                date,
            });
        Ok(())
    }

    async fn set_flag(&mut self, seq: u32, flag: &str, on: bool) -> Result<(), MailboxError> {
        let selected = self.selected()?;
        let mut state = self.state.lock();
        let message = state
            .folders
            .get_mut(&selected)
            .and_then(|messages| messages.get_mut((seq as usize).wrapping_sub(1)))
            .ok_or(MailboxError::NotFound(seq))?;
        if on {
            message.flags.insert(flag.to_string());
        } else {
            message.flags.remove(flag);
        }
        Ok(())
    }

    async fn logout(&mut self) -> Result<(), MailboxError> {
        self.state.lock().logouts += 1;
        self.selected = None;
        Ok(())
    }
}
