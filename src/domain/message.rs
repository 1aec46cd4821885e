use chrono::{DateTime, FixedOffset, Utc};
use mail_parser::MessageParser;

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub sender: String,
    pub subject: String,
    pub date: DateTime<FixedOffset>,
}

impl Envelope {
    /// Reads sender, subject and date from the message headers. `fallback_date`
    /// is used when the Date header is missing or unparsable.
    pub fn from_raw(raw: &[u8], fallback_date: Option<DateTime<FixedOffset>>) -> Self {
        let fallback = fallback_date.unwrap_or_else(|| Utc::now().fixed_offset());
        let Some(parsed) = MessageParser::default().parse(raw) else {
            return Self {
                sender: String::new(),
                subject: String::new(),
                date: fallback,
            };
        };

        let sender = parsed
            .from()
            .or_else(|| parsed.sender())
            .and_then(|address| address.first())
            .and_then(|addr| addr.address())
            .unwrap_or_default()
            .to_string();
        let subject = parsed.subject().unwrap_or_default().to_string();
        let date = parsed
            .date()
            .and_then(|date| DateTime::from_timestamp(date.to_timestamp(), 0))
            .map(|date| date.fixed_offset())
            .unwrap_or(fallback);

        Self {
            sender,
            subject,
            date,
        }
    }
}

/// One candidate message, fetched once per pass.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub seq: u32,
    pub envelope: Envelope,
    pub body: Vec<u8>,
}

impl FetchedMessage {
    pub fn new(seq: u32, body: Vec<u8>, internal_date: Option<DateTime<FixedOffset>>) -> Self {
        let envelope = Envelope::from_raw(&body, internal_date);
        Self {
            seq,
            envelope,
            body,
        }
    }
}
