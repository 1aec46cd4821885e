use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::{
    config::RspamdConfig,
    domain::{Backend, ClassifierError, Feedback, Score, ScoreResult, SpamAction},
};

use super::Classifier;

/// HTTP client for the rspamd normal worker (`/checkv2`) and controller (`/learn*`).
pub struct RspamdClient {
    http: Client,
    check_url: Url,
    controller_url: Url,
    password: Option<String>,
    timeout: Duration,
}

impl RspamdClient {
    pub fn new(
        http: Client,
        config: &RspamdConfig,
        password: Option<String>,
    ) -> Result<Self, url::ParseError> {
        let worker = Url::parse(&format!("http://{}:{}/", config.host, config.port))?;
        let controller =
            Url::parse(&format!("http://{}:{}/", config.host, config.controller_port))?;
        Ok(Self {
            http,
            check_url: worker.join("checkv2")?,
            controller_url: controller,
            password,
            timeout: config.timeout,
        })
    }

    fn map_error(&self, err: reqwest::Error) -> ClassifierError {
        if err.is_timeout() {
            ClassifierError::Timeout {
                backend: Backend::Rspamd,
                seconds: self.timeout.as_secs(),
            }
        } else if err.is_decode() {
            ClassifierError::Protocol {
                backend: Backend::Rspamd,
                message: err.to_string(),
            }
        } else {
            ClassifierError::Transport {
                backend: Backend::Rspamd,
                message: err.to_string(),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckResponse {
    pub score: f64,
    #[serde(default)]
    pub action: Option<String>,
}

impl CheckResponse {
    pub fn into_score(self) -> Score {
        let action = self.action.map(|raw| {
            raw.parse::<SpamAction>().unwrap_or_else(|err| {
                tracing::warn!(target: "classifier", error = %err, "rspamd suggested an unknown action; ignoring it");
                SpamAction::NoAction
            })
        });
        Score::new(self.score, action)
    }
}

#[async_trait]
impl Classifier for RspamdClient {
    fn backend(&self) -> Backend {
        Backend::Rspamd
    }

    async fn score(&self, body: &[u8]) -> ScoreResult {
        let response = self
            .http
            .post(self.check_url.clone())
            .timeout(self.timeout)
            .body(body.to_vec())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| self.map_error(err))?;

        let check: CheckResponse = response.json().await.map_err(|err| self.map_error(err))?;
        Ok(check.into_score())
    }

    async fn learn(&self, body: &[u8], feedback: Feedback) -> Result<(), ClassifierError> {
        let url = self
            .controller_url
            .join(&format!("learn{feedback}"))
            .map_err(|err| ClassifierError::Protocol {
                backend: Backend::Rspamd,
                message: err.to_string(),
            })?;

        let mut request = self
            .http
            .post(url)
            .timeout(self.timeout)
            .body(body.to_vec());
        if let Some(password) = &self.password {
            request = request.header("Password", password);
        }

        request
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| self.map_error(err))?;
        Ok(())
    }
}
