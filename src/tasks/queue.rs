use std::{collections::VecDeque, sync::Arc};

use chrono::{DateTime, FixedOffset};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::{FetchedMessage, SpamAction, Verdict};

pub const DEFAULT_CAPACITY: usize = 50;

/// Lower-case hex SHA-256 of the raw message.
pub fn fingerprint(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub fingerprint: String,
    pub score: f64,
    pub action: SpamAction,
    pub account: String,
    pub sender: String,
    pub subject: String,
    pub date: DateTime<FixedOffset>,
    #[serde(skip)]
    pub body: Vec<u8>,
}

impl ActivityEntry {
    pub fn new(account: &str, message: &FetchedMessage, verdict: &Verdict) -> Self {
        Self {
            fingerprint: fingerprint(&message.body),
            score: verdict.score,
            action: verdict.action,
            account: account.to_string(),
            sender: message.envelope.sender.clone(),
            subject: message.envelope.subject.clone(),
            date: message.envelope.date,
            body: message.body.clone(),
        }
    }
}

/// Bounded history of recent verdicts, oldest evicted first.
#[derive(Debug)]
pub struct RecentActivityQueue {
    entries: Mutex<VecDeque<Arc<ActivityEntry>>>,
    capacity: usize,
}

impl RecentActivityQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, entry: ActivityEntry) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(Arc::new(entry));
    }

    /// Snapshot in insertion order.
    pub fn list(&self) -> Vec<Arc<ActivityEntry>> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Most recent entry with this fingerprint.
    pub fn find_by_fingerprint(&self, fingerprint: &str) -> Option<Arc<ActivityEntry>> {
        self.entries
            .lock()
            .iter()
            .rev()
            .find(|entry| entry.fingerprint == fingerprint)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Default for RecentActivityQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
