pub mod rspamd;
pub mod spamd;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::{
    config::AppConfig,
    domain::{Backend, ClassifierError, Feedback, ScoreResult},
    infrastructure::secrets::SecretKey,
};

pub use rspamd::RspamdClient;
pub use spamd::SpamdClient;

/// A spam classification backend.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn backend(&self) -> Backend;

    async fn score(&self, body: &[u8]) -> ScoreResult;

    /// Feeds a correction back into the backend's learning.
    async fn learn(&self, body: &[u8], feedback: Feedback) -> Result<(), ClassifierError>;
}

/// The enabled gateways. A disabled backend is `None` and is never called.
#[derive(Clone, Default)]
pub struct Classifiers {
    pub spamd: Option<Arc<dyn Classifier>>,
    pub rspamd: Option<Arc<dyn Classifier>>,
}

impl Classifiers {
    pub fn from_config(config: &AppConfig, http: Client, key: &SecretKey) -> Result<Self> {
        let spamd = config
            .spamd
            .enabled
            .then(|| Arc::new(SpamdClient::new(&config.spamd)) as Arc<dyn Classifier>);

        let rspamd = if config.rspamd.enabled {
            let password = config
                .rspamd
                .password
                .as_deref()
                .map(|encrypted| key.decrypt(encrypted))
                .transpose()
                .context("failed to decrypt rspamd controller password")?;
            let client = RspamdClient::new(http, &config.rspamd, password)
                .context("invalid rspamd address")?;
            Some(Arc::new(client) as Arc<dyn Classifier>)
        } else {
            None
        };

        Ok(Self { spamd, rspamd })
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Arc<dyn Classifier>> {
        self.spamd.iter().chain(self.rspamd.iter())
    }
}
