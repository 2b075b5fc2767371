//! One SMTP session over a byte stream.
//!
//! Line discipline only - no TLS, no AUTH, no pipelining guarantees beyond
//! sequential command handling. The transport is generic so tests drive
//! sessions over in-memory duplex streams.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::smtp::{Envelope, RcptDecision, SessionHooks};

pub struct Session<H: SessionHooks> {
    hooks: Arc<H>,
    max_message_bytes: usize,
}

impl<H: SessionHooks> Session<H> {
    pub fn new(hooks: Arc<H>, max_message_bytes: usize) -> Self {
        Self {
            hooks,
            max_message_bytes,
        }
    }

    pub async fn run<S>(&self, stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        writer.write_all(b"220 mailsink service ready\r\n").await?;

        let mut envelope = Envelope::default();
        let mut line = String::new();

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let command = line.trim_end();
            let verb = command
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_ascii_uppercase();

            match verb.as_str() {
                "HELO" | "EHLO" => {
                    writer.write_all(b"250 Hello\r\n").await?;
                }
                "MAIL" => {
                    envelope.sender = address_after_colon(command);
                    writer.write_all(b"250 Ok\r\n").await?;
                }
                "RCPT" => {
                    let address = address_after_colon(command);
                    match self.hooks.recipient(&address).await {
                        RcptDecision::Accept => {
                            envelope.recipients.push(address);
                            writer.write_all(b"250 Ok\r\n").await?;
                        }
                        RcptDecision::DeniedPermanent => {
                            writer.write_all(b"550 Recipient domain not allowed\r\n").await?;
                        }
                        RcptDecision::DeniedTemporary => {
                            writer
                                .write_all(b"450 Recipient temporarily unavailable\r\n")
                                .await?;
                        }
                    }
                }
                "DATA" => {
                    if envelope.recipients.is_empty() {
                        writer.write_all(b"503 Bad sequence of commands\r\n").await?;
                        continue;
                    }
                    let slot = match self.hooks.begin_data() {
                        Ok(slot) => slot,
                        Err(_) => {
                            writer
                                .write_all(b"451 Server busy, try again later\r\n")
                                .await?;
                            continue;
                        }
                    };
                    writer
                        .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                        .await?;

                    let mut raw: Vec<u8> = Vec::new();
                    let mut buf: Vec<u8> = Vec::new();
                    let mut oversize = false;
                    loop {
                        buf.clear();
                        if reader.read_until(b'\n', &mut buf).await? == 0 {
                            // Sender vanished mid-DATA; the slot drops here.
                            return Ok(());
                        }
                        while matches!(buf.last(), Some(&b'\r') | Some(&b'\n')) {
                            buf.pop();
                        }
                        if buf.as_slice() == b"." {
                            break;
                        }
                        // Transparency: a leading dot was doubled in transit.
                        let body_line: &[u8] =
                            if buf.first() == Some(&b'.') { &buf[1..] } else { &buf };
                        if raw.len() + body_line.len() + 2 > self.max_message_bytes {
                            oversize = true;
                            continue;
                        }
                        raw.extend_from_slice(body_line);
                        raw.extend_from_slice(b"\r\n");
                    }

                    if oversize {
                        drop(slot);
                        envelope = Envelope::default();
                        writer
                            .write_all(b"552 Message size exceeds limit\r\n")
                            .await?;
                    } else {
                        let finished = std::mem::take(&mut envelope);
                        self.hooks.message(slot, finished, raw).await;
                        writer.write_all(b"250 Ok: message accepted\r\n").await?;
                    }
                }
                "RSET" => {
                    envelope = Envelope::default();
                    writer.write_all(b"250 Ok\r\n").await?;
                }
                "NOOP" => {
                    writer.write_all(b"250 Ok\r\n").await?;
                }
                "QUIT" => {
                    writer.write_all(b"221 Bye\r\n").await?;
                    return Ok(());
                }
                _ => {
                    writer.write_all(b"502 Command not implemented\r\n").await?;
                }
            }
        }
    }
}

/// Pull the address out of `MAIL FROM:<...>` / `RCPT TO:<...>`, dropping
/// any trailing parameters. Addresses are normalized to lowercase.
fn address_after_colon(command: &str) -> String {
    let Some((_, rest)) = command.split_once(':') else {
        return String::new();
    };
    let token = rest.trim().split_whitespace().next().unwrap_or("");
    let token = token
        .strip_prefix('<')
        .and_then(|inner| inner.strip_suffix('>'))
        .unwrap_or(token);
    token.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::limits::{DataSlot, IngestLimits};
    use async_trait::async_trait;
    use mailsink_config::LimitsConfig;
    use mailsink_error::IngestResult;
    use tokio::sync::Mutex;

    struct MockHooks {
        decision: RcptDecision,
        limits: IngestLimits,
        messages: Mutex<Vec<(Envelope, Vec<u8>)>>,
    }

    impl MockHooks {
        fn new(decision: RcptDecision, max_data_streams: usize) -> Arc<Self> {
            Arc::new(Self {
                decision,
                limits: IngestLimits::new(&LimitsConfig {
                    max_data_streams,
                    process_concurrency: 4,
                }),
                messages: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SessionHooks for MockHooks {
        async fn recipient(&self, _address: &str) -> RcptDecision {
            self.decision
        }

        fn begin_data(&self) -> IngestResult<DataSlot> {
            self.limits.try_begin_data()
        }

        async fn message(&self, slot: DataSlot, envelope: Envelope, raw: Vec<u8>) {
            drop(slot);
            self.messages.lock().await.push((envelope, raw));
        }
    }

    /// Drive a whole session: send every line, collect every reply.
    async fn converse(hooks: Arc<MockHooks>, max_bytes: usize, lines: &[&str]) -> Vec<String> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let session_hooks = Arc::clone(&hooks);
        let server_task = tokio::spawn(async move {
            Session::new(session_hooks, max_bytes).run(server).await
        });

        let (client_read, mut client_write) = tokio::io::split(client);
        let mut input = lines.join("\r\n");
        input.push_str("\r\n");
        client_write.write_all(input.as_bytes()).await.unwrap();

        let mut replies = Vec::new();
        let mut reader = BufReader::new(client_read);
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            replies.push(line.trim_end().to_string());
        }

        server_task.await.unwrap().unwrap();
        replies
    }

    #[tokio::test]
    async fn greeting_and_quit() {
        let hooks = MockHooks::new(RcptDecision::Accept, 4);
        let replies = converse(hooks, 1024, &["QUIT"]).await;
        assert_eq!(replies[0], "220 mailsink service ready");
        assert_eq!(replies[1], "221 Bye");
    }

    #[tokio::test]
    async fn denied_recipient_gets_permanent_rejection() {
        let hooks = MockHooks::new(RcptDecision::DeniedPermanent, 4);
        let replies = converse(
            Arc::clone(&hooks),
            1024,
            &["HELO client", "MAIL FROM:<a@b.org>", "RCPT TO:<x@nope.org>", "QUIT"],
        )
        .await;
        assert!(replies[3].starts_with("550"));
    }

    #[tokio::test]
    async fn temporarily_denied_recipient_gets_transient_rejection() {
        let hooks = MockHooks::new(RcptDecision::DeniedTemporary, 4);
        let replies = converse(
            hooks,
            1024,
            &["HELO client", "MAIL FROM:<a@b.org>", "RCPT TO:<x@later.org>", "QUIT"],
        )
        .await;
        assert!(replies[3].starts_with("450"));
    }

    #[tokio::test]
    async fn data_without_recipients_is_a_bad_sequence() {
        let hooks = MockHooks::new(RcptDecision::Accept, 4);
        let replies = converse(hooks, 1024, &["HELO client", "DATA", "QUIT"]).await;
        assert!(replies[2].starts_with("503"));
    }

    #[tokio::test]
    async fn saturated_limits_reject_data_with_transient_code() {
        let hooks = MockHooks::new(RcptDecision::Accept, 0);
        let replies = converse(
            hooks,
            1024,
            &["HELO client", "MAIL FROM:<a@b.org>", "RCPT TO:<x@ok.org>", "DATA", "QUIT"],
        )
        .await;
        assert!(replies[4].starts_with("451"));
    }

    #[tokio::test]
    async fn full_transaction_delivers_envelope_and_raw_message() {
        let hooks = MockHooks::new(RcptDecision::Accept, 4);
        let replies = converse(
            Arc::clone(&hooks),
            1024,
            &[
                "HELO client",
                "MAIL FROM:<Sender@Example.ORG>",
                "RCPT TO:<User@Allowed.ORG>",
                "DATA",
                "Subject: hi",
                "",
                "line one",
                "..stuffed",
                ".",
                "QUIT",
            ],
        )
        .await;

        assert_eq!(replies[0], "220 mailsink service ready");
        assert!(replies[4].starts_with("354"));
        assert!(replies[5].starts_with("250 Ok: message accepted"));

        let messages = hooks.messages.lock().await;
        assert_eq!(messages.len(), 1);
        let (envelope, raw) = &messages[0];
        assert_eq!(envelope.sender, "sender@example.org");
        assert_eq!(envelope.recipients, vec!["user@allowed.org".to_string()]);
        assert_eq!(
            raw.as_slice(),
            b"Subject: hi\r\n\r\nline one\r\n.stuffed\r\n"
        );
    }

    #[tokio::test]
    async fn oversized_message_is_rejected_and_slot_released() {
        let hooks = MockHooks::new(RcptDecision::Accept, 1);
        let replies = converse(
            Arc::clone(&hooks),
            16,
            &[
                "MAIL FROM:<a@b.org>",
                "RCPT TO:<x@ok.org>",
                "DATA",
                "this line alone is longer than sixteen bytes",
                ".",
                // The slot must be free again for a second transaction.
                "MAIL FROM:<a@b.org>",
                "RCPT TO:<x@ok.org>",
                "DATA",
                "ok",
                ".",
                "QUIT",
            ],
        )
        .await;

        assert!(replies[4].starts_with("552"));
        assert!(replies[8].starts_with("250 Ok: message accepted"));
        assert_eq!(hooks.messages.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn rset_clears_the_transaction() {
        let hooks = MockHooks::new(RcptDecision::Accept, 4);
        let replies = converse(
            hooks,
            1024,
            &[
                "MAIL FROM:<a@b.org>",
                "RCPT TO:<x@ok.org>",
                "RSET",
                "DATA",
                "QUIT",
            ],
        )
        .await;
        // DATA right after RSET has no recipients.
        assert!(replies[4].starts_with("503"));
    }

    #[tokio::test]
    async fn unknown_commands_get_502() {
        let hooks = MockHooks::new(RcptDecision::Accept, 4);
        let replies = converse(hooks, 1024, &["VRFY user", "QUIT"]).await;
        assert!(replies[1].starts_with("502"));
    }

    #[test]
    fn address_extraction_handles_brackets_params_and_case() {
        assert_eq!(address_after_colon("MAIL FROM:<A@B.Org>"), "a@b.org");
        assert_eq!(address_after_colon("MAIL FROM:<a@b.org> SIZE=100"), "a@b.org");
        assert_eq!(address_after_colon("RCPT TO: user@host.org"), "user@host.org");
        assert_eq!(address_after_colon("MAIL FROM:<>"), "");
        assert_eq!(address_after_colon("DATA"), "");
    }
}
