use std::{io, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

use crate::{
    config::SpamdConfig,
    domain::{Backend, ClassifierError, Feedback, Score, ScoreResult, SpamAction},
};

use super::Classifier;

const PROTOCOL_VERSION: &str = "SPAMC/1.5";

/// Talks the SPAMC protocol to a SpamAssassin daemon.
pub struct SpamdClient {
    address: String,
    timeout: Duration,
}

impl SpamdClient {
    pub fn new(config: &SpamdConfig) -> Self {
        Self {
            address: format!("{}:{}", config.host, config.port),
            timeout: config.timeout,
        }
    }

    async fn exchange(&self, request: Vec<u8>) -> Result<String, ClassifierError> {
        let conversation = async {
            let mut stream = TcpStream::connect(&self.address).await?;
            stream.write_all(&request).await?;
            stream.shutdown().await?;
            let mut response = Vec::new();
            stream.read_to_end(&mut response).await?;
            Ok::<_, io::Error>(response)
        };

        match timeout(self.timeout, conversation).await {
            Ok(Ok(response)) => Ok(String::from_utf8_lossy(&response).into_owned()),
            Ok(Err(err)) => Err(ClassifierError::Transport {
                backend: Backend::Spamd,
                message: err.to_string(),
            }),
            Err(_) => Err(ClassifierError::Timeout {
                backend: Backend::Spamd,
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl Classifier for SpamdClient {
    fn backend(&self) -> Backend {
        Backend::Spamd
    }

    async fn score(&self, body: &[u8]) -> ScoreResult {
        let response = self.exchange(build_request("CHECK", &[], body)).await?;
        parse_check_response(&response)
    }

    async fn learn(&self, body: &[u8], feedback: Feedback) -> Result<(), ClassifierError> {
        let class = feedback.to_string();
        let headers = [("Message-class", class.as_str()), ("Set", "local")];
        let response = self.exchange(build_request("TELL", &headers, body)).await?;
        parse_status_line(&response).map(|_| ())
    }
}

pub(crate) fn build_request(command: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut request = format!(
        "{command} {PROTOCOL_VERSION}\r\nContent-length: {}\r\n",
        body.len()
    );
    for (name, value) in headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");
    let mut bytes = request.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

fn protocol_error(message: impl Into<String>) -> ClassifierError {
    ClassifierError::Protocol {
        backend: Backend::Spamd,
        message: message.into(),
    }
}

/// Checks `SPAMD/1.1 0 EX_OK` and returns the remaining lines.
fn parse_status_line(response: &str) -> Result<std::str::Lines<'_>, ClassifierError> {
    let mut lines = response.lines();
    let status = lines
        .next()
        .ok_or_else(|| protocol_error("empty response"))?;
    let mut parts = status.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some("0")) if version.starts_with("SPAMD/") => Ok(lines),
        (Some(version), Some(_)) if version.starts_with("SPAMD/") => {
            Err(protocol_error(format!("spamd refused request: {status}")))
        }
        _ => Err(protocol_error(format!("malformed status line `{status}`"))),
    }
}

/// Reads the `Spam: True ; 15.0 / 5.0` header of a CHECK response.
pub(crate) fn parse_check_response(response: &str) -> ScoreResult {
    let spam_header = parse_status_line(response)?
        .take_while(|line| !line.is_empty())
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim().eq_ignore_ascii_case("Spam").then(|| value.trim())
        })
        .ok_or_else(|| protocol_error("missing Spam header"))?;

    let (flag, scores) = spam_header
        .split_once(';')
        .ok_or_else(|| protocol_error(format!("malformed Spam header `{spam_header}`")))?;
    let is_spam = matches!(flag.trim().to_ascii_lowercase().as_str(), "true" | "yes");
    let score = scores
        .split('/')
        .next()
        .and_then(|score| score.trim().parse::<f64>().ok())
        .filter(|score| score.is_finite())
        .ok_or_else(|| protocol_error(format!("malformed score in `{spam_header}`")))?;

    let action = if is_spam {
        SpamAction::Reject
    } else {
        SpamAction::NoAction
    };
    Ok(Score::new(score, Some(action)))
}
