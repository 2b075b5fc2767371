//! Raw message bytes to structured fields.
//!
//! Parsing never fails the pipeline: a message the parser cannot make sense
//! of degrades to its raw body as plain text, and absent fields come back
//! as empty strings to satisfy the non-null contract of stored records.

use mailparse::{MailHeaderMap, ParsedMail};
use tracing::warn;

/// Structured fields extracted from a raw message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Parse a raw RFC 5322 message.
pub fn parse_message(raw: &[u8]) -> ParsedMessage {
    let parsed = match mailparse::parse_mail(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(error = %err, "message parse failed, storing raw body as text");
            return ParsedMessage {
                subject: scan_subject(raw).unwrap_or_default(),
                text: strip_headers(raw),
                html: String::new(),
            };
        }
    };

    let subject = parsed
        .get_headers()
        .get_first_value("Subject")
        .unwrap_or_default();

    let mut text = String::new();
    let mut html = String::new();
    collect_bodies(&parsed, &mut text, &mut html);

    if text.trim().is_empty() && html.trim().is_empty() {
        text = strip_headers(raw);
    }

    ParsedMessage { subject, text, html }
}

/// Parse off the async runtime; bodies can be large and mailparse is
/// CPU-bound.
pub async fn parse_message_blocking(raw: Vec<u8>) -> ParsedMessage {
    match tokio::task::spawn_blocking(move || parse_message(&raw)).await {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(error = %err, "message parse task failed");
            ParsedMessage::default()
        }
    }
}

fn collect_bodies(part: &ParsedMail, text: &mut String, html: &mut String) {
    if part.subparts.is_empty() {
        match part.ctype.mimetype.as_str() {
            "text/html" => {
                if html.is_empty() {
                    if let Ok(body) = part.get_body() {
                        *html = body;
                    }
                }
            }
            mimetype if mimetype.starts_with("text/") => {
                if text.is_empty() {
                    if let Ok(body) = part.get_body() {
                        *text = body;
                    }
                }
            }
            _ => {}
        }
        return;
    }
    for sub in &part.subparts {
        collect_bodies(sub, text, html);
    }
}

/// Fallback subject extraction when full parsing is off the table.
fn scan_subject(raw: &[u8]) -> Option<String> {
    let raw = String::from_utf8_lossy(raw);
    for line in raw.lines() {
        if line.is_empty() {
            break;
        }
        if let Some(rest) = line
            .get(..8)
            .filter(|prefix| prefix.eq_ignore_ascii_case("subject:"))
            .map(|_| &line[8..])
        {
            return Some(rest.trim().to_string());
        }
    }
    None
}

/// Everything after the header block, as lossy UTF-8.
fn strip_headers(raw: &[u8]) -> String {
    let raw = String::from_utf8_lossy(raw);
    if let Some(start) = raw.find("\r\n\r\n") {
        return raw[start + 4..].to_string();
    }
    if let Some(start) = raw.find("\n\n") {
        return raw[start + 2..].to_string();
    }
    raw.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_message_yields_subject_and_text() {
        let raw = b"From: sender@example.org\r\nSubject: hello\r\n\r\nbody line\r\n";
        let parsed = parse_message(raw);
        assert_eq!(parsed.subject, "hello");
        assert_eq!(parsed.text.trim(), "body line");
        assert!(parsed.html.is_empty());
    }

    #[test]
    fn missing_subject_is_empty_never_null_like() {
        let raw = b"From: sender@example.org\r\n\r\nbody\r\n";
        let parsed = parse_message(raw);
        assert_eq!(parsed.subject, "");
        assert_eq!(parsed.text.trim(), "body");
    }

    #[test]
    fn multipart_alternative_fills_both_bodies() {
        let raw = concat!(
            "Subject: multi\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/alternative; boundary=\"sep\"\r\n",
            "\r\n",
            "--sep\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "plain part\r\n",
            "--sep\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>html part</p>\r\n",
            "--sep--\r\n",
        )
        .as_bytes();

        let parsed = parse_message(raw);
        assert_eq!(parsed.subject, "multi");
        assert_eq!(parsed.text.trim(), "plain part");
        assert_eq!(parsed.html.trim(), "<p>html part</p>");
    }

    #[test]
    fn html_only_message_keeps_text_empty() {
        let raw = concat!(
            "Subject: html\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<b>hi</b>\r\n",
        )
        .as_bytes();

        let parsed = parse_message(raw);
        assert_eq!(parsed.html.trim(), "<b>hi</b>");
        // The html body satisfies the non-empty check; text stays empty.
        assert!(parsed.text.is_empty());
    }

    #[test]
    fn header_only_message_degrades_to_empty_text() {
        let raw = b"Subject: nothing else\r\n\r\n";
        let parsed = parse_message(raw);
        assert_eq!(parsed.subject, "nothing else");
        assert_eq!(parsed.text.trim(), "");
    }

    #[test]
    fn strip_headers_handles_bare_newlines() {
        assert_eq!(strip_headers(b"A: b\n\nrest"), "rest");
        assert_eq!(strip_headers(b"no separator at all"), "no separator at all");
    }
}
