//! Byte-level edits of a raw RFC 5322 message: spam header block and subject marker.

use once_cell::sync::Lazy;
use regex::bytes::Regex;

static SPAM_FLAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^X-Spam-Flag: (?:YES|NO)\r?$").expect("valid spam flag regex")
});

static SUBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^subject:[ \t]*").expect("valid subject regex"));

/// Everything up to the blank line separating headers from the body.
pub fn header_section(raw: &[u8]) -> &[u8] {
    let crlf = raw.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = raw.windows(2).position(|w| w == b"\n\n");
    let end = match (crlf, lf) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => raw.len(),
    };
    &raw[..end]
}

pub fn has_spam_flag(raw: &[u8]) -> bool {
    SPAM_FLAG.is_match(header_section(raw))
}

/// Longest `{level}` / `{bar}` rendering, as SpamAssassin caps `X-Spam-Level`.
const MAX_POINTS: f64 = 50.0;

/// Fills the header template. Level and bar repeat once per whole score point.
pub fn render_header_block(template: &str, is_spam: bool, score: f64) -> String {
    let points = if score.is_nan() {
        0
    } else {
        score.clamp(0.0, MAX_POINTS).floor() as usize
    };
    let (yes_no, yes_no_cap) = if is_spam { ("YES", "Yes") } else { ("NO", "No") };

    let mut block = template
        .replace("{yes_no_cap}", yes_no_cap)
        .replace("{yes_no}", yes_no)
        .replace("{score}", &format!("{score:.1}"))
        .replace("{level}", &"*".repeat(points))
        .replace("{bar}", &"+".repeat(points));
    if !block.ends_with('\n') {
        block.push_str("\r\n");
    }
    block
}

pub fn prepend_headers(raw: &[u8], block: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(block.len() + raw.len());
    out.extend_from_slice(block.as_bytes());
    out.extend_from_slice(raw);
    out
}

pub fn subject_has_mark(raw: &[u8], mark: &str) -> bool {
    let headers = header_section(raw);
    SUBJECT
        .find(headers)
        .is_some_and(|m| headers[m.end()..].starts_with(mark.as_bytes()))
}

/// Prefixes the first Subject header with `mark`. A message without one gets
/// a new `Subject: <mark>` line in front.
pub fn mark_subject(raw: &[u8], mark: &str) -> Vec<u8> {
    let headers = header_section(raw);
    let Some(found) = SUBJECT.find(headers) else {
        let mut out = format!("Subject: {mark}\r\n").into_bytes();
        out.extend_from_slice(raw);
        return out;
    };

    let at = found.end();
    let empty = matches!(raw.get(at), None | Some(b'\r') | Some(b'\n'));
    let mut out = Vec::with_capacity(raw.len() + mark.len() + 2);
    out.extend_from_slice(&raw[..at]);
    if found.as_bytes().ends_with(b":") {
        out.push(b' ');
    }
    out.extend_from_slice(mark.as_bytes());
    if !empty {
        out.push(b' ');
    }
    out.extend_from_slice(&raw[at..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_HEADER_TEMPLATE;

    const MAIL: &[u8] = b"From: a@example.org\r\nSubject: Cheap pills\r\n\r\nX-Spam-Flag: YES\r\nbody\r\n";

    #[test]
    fn renders_the_default_block() {
        let block = render_header_block(DEFAULT_HEADER_TEMPLATE, true, 3.333);
        assert_eq!(
            block,
            "X-Spam-Flag: YES\r\nX-Spam-Score: 3.3\r\nX-Spam-Level: ***\r\nX-Spam-Bar: +++\r\nX-Spam-Status: Yes, score=3.3\r\n"
        );
    }

    #[test]
    fn negative_scores_have_no_bar() {
        let block = render_header_block("{level}|{bar}|{yes_no}|{score}", false, -2.5);
        assert_eq!(block, "||NO|-2.5\r\n");
    }

    #[test]
    fn huge_scores_cap_the_bar() {
        for score in [1e30, f64::INFINITY] {
            let block = render_header_block("{level}|{bar}", true, score);
            assert_eq!(block, format!("{}|{}\r\n", "*".repeat(50), "+".repeat(50)));
        }
        assert_eq!(render_header_block("{level}", false, f64::NAN), "\r\n");
    }

    #[test]
    fn spam_flag_only_counts_in_headers() {
        assert!(!has_spam_flag(MAIL));
        let flagged = prepend_headers(MAIL, "X-Spam-Flag: NO\r\n");
        assert!(has_spam_flag(&flagged));
    }

    #[test]
    fn subject_gets_prefixed_once() {
        let marked = mark_subject(MAIL, "*** SPAM ***");
        assert!(marked.starts_with(b"From: a@example.org\r\nSubject: *** SPAM *** Cheap pills\r\n"));
        assert!(subject_has_mark(&marked, "*** SPAM ***"));
        assert!(!subject_has_mark(MAIL, "*** SPAM ***"));
    }

    #[test]
    fn empty_and_missing_subjects() {
        let empty = mark_subject(b"Subject:\r\n\r\nhi", "[spam]");
        assert_eq!(empty, b"Subject: [spam]\r\n\r\nhi".to_vec());

        let missing = mark_subject(b"From: a@b\r\n\r\nhi", "[spam]");
        assert_eq!(missing, b"Subject: [spam]\r\nFrom: a@b\r\n\r\nhi".to_vec());
        assert!(subject_has_mark(&missing, "[spam]"));
    }
}
