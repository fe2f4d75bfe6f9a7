//! Plain SMTP email adapter
//!
//! Speaks just enough SMTP to hand a message to a relay:
//!
//! ```text
//! S: 220 greeting
//! C: EHLO   -> 250
//! C: AUTH PLAIN (only when credentials are configured) -> 235
//! C: MAIL FROM / RCPT TO -> 250
//! C: DATA   -> 354, message, "." -> 250
//! C: QUIT   -> 221
//! ```
//!
//! The connection is not encrypted; point it at a local or trusted relay.

use super::{AdapterError, EmailAdapter};
use crate::types::{Attachment, EmailRequest};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    /// Falls back to `SMTP_PASSWORD`
    #[serde(default)]
    pub password: Option<SecretString>,
    pub from_address: String,
    /// Name announced in EHLO; defaults to the sender's domain
    #[serde(default)]
    pub helo_name: Option<String>,
}

fn default_port() -> u16 {
    25
}

pub struct SmtpAdapter {
    config: SmtpConfig,
}

impl SmtpAdapter {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn helo_name(&self) -> &str {
        self.config.helo_name.as_deref().unwrap_or_else(|| {
            self.config
                .from_address
                .rsplit_once('@')
                .map(|(_, domain)| domain)
                .unwrap_or("localhost")
        })
    }

    async fn open(&self) -> Result<Session, AdapterError> {
        let stream = TcpStream::connect((self.config.host.as_str(), self.config.port)).await?;
        let (read, write) = stream.into_split();
        let mut session = Session {
            reader: BufReader::new(read),
            writer: write,
        };
        session.expect_reply(&[220]).await?;
        session
            .command(&format!("EHLO {}", self.helo_name()), &[250])
            .await?;
        Ok(session)
    }
}

#[async_trait]
impl EmailAdapter for SmtpAdapter {
    fn provider(&self) -> &str {
        "smtp"
    }

    async fn send(&self, request: &EmailRequest) -> Result<String, AdapterError> {
        let mut session = self.open().await?;

        if let (Some(user), Some(password)) = (&self.config.username, &self.config.password) {
            let token = STANDARD.encode(format!("\0{}\0{}", user, password.expose_secret()));
            session
                .command(&format!("AUTH PLAIN {}", token), &[235])
                .await
                .map_err(|e| match e {
                    AdapterError::Smtp { code, message } => {
                        AdapterError::Auth(format!("{} {}", code, message))
                    }
                    other => other,
                })?;
        }

        let from = request.from.as_deref().unwrap_or(&self.config.from_address);
        session
            .command(&format!("MAIL FROM:<{}>", from), &[250])
            .await?;
        session
            .command(&format!("RCPT TO:<{}>", request.to), &[250, 251])
            .await?;
        session.command("DATA", &[354]).await?;

        let domain = from.rsplit_once('@').map(|(_, d)| d).unwrap_or("localhost");
        let message_id = format!("<{}@{}>", uuid::Uuid::new_v4().simple(), domain);
        let message = build_message(request, from, &message_id);
        session.write_data(&message).await?;
        session.expect_reply(&[250]).await?;

        // The message is accepted; a failed QUIT changes nothing
        if let Err(e) = session.command("QUIT", &[221]).await {
            debug!(error = %e, "SMTP QUIT failed after successful delivery");
        }

        Ok(message_id)
    }

    async fn ping(&self) -> Result<(), AdapterError> {
        let mut session = self.open().await?;
        session.command("QUIT", &[221]).await?;
        Ok(())
    }
}

struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

#[derive(Debug)]
struct Reply {
    code: u16,
    text: String,
}

impl Session {
    async fn command(&mut self, line: &str, expected: &[u16]) -> Result<Reply, AdapterError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        self.expect_reply(expected).await
    }

    async fn expect_reply(&mut self, expected: &[u16]) -> Result<Reply, AdapterError> {
        let reply = self.read_reply().await?;
        if expected.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(AdapterError::Smtp {
                code: reply.code,
                message: reply.text,
            })
        }
    }

    /// Read a possibly multi-line reply (`250-...` continues, `250 ...` ends)
    async fn read_reply(&mut self) -> Result<Reply, AdapterError> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(AdapterError::Protocol(
                    "SMTP server closed the connection".to_string(),
                ));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.len() < 3 || !line.is_char_boundary(3) {
                return Err(AdapterError::Protocol(format!("malformed SMTP reply '{}'", line)));
            }
            let code = line[..3]
                .parse::<u16>()
                .map_err(|_| AdapterError::Protocol(format!("malformed SMTP reply '{}'", line)))?;
            let more = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line.get(4..).unwrap_or_default().to_string());
            if !more {
                return Ok(Reply {
                    code,
                    text: lines.join(" "),
                });
            }
        }
    }

    async fn write_data(&mut self, message: &str) -> Result<(), AdapterError> {
        self.writer.write_all(dot_stuff(message).as_bytes()).await?;
        self.writer.write_all(b".\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// CRLF-normalise and escape leading dots; the result always ends in CRLF
fn dot_stuff(message: &str) -> String {
    let mut out = String::with_capacity(message.len() + 64);
    for line in message.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    // split leaves an empty tail after a trailing newline
    if message.ends_with('\n') {
        out.truncate(out.len() - 2);
    }
    out
}

fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value))
    }
}

fn wrap_base64(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 76 * 2 + 2);
    for chunk in encoded.as_bytes().chunks(76) {
        // base64 output is ASCII
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push_str("\r\n");
    }
    out
}

fn text_part(content_type: &str, body: &str) -> String {
    format!(
        "Content-Type: {}; charset=utf-8\r\nContent-Transfer-Encoding: 8bit\r\n\r\n{}\r\n",
        content_type, body
    )
}

fn attachment_part(attachment: &Attachment) -> String {
    format!(
        "Content-Type: {}; name=\"{}\"\r\nContent-Transfer-Encoding: base64\r\nContent-Disposition: attachment; filename=\"{}\"\r\n\r\n{}",
        attachment.content_type,
        attachment.filename,
        attachment.filename,
        wrap_base64(&attachment.content)
    )
}

fn multipart(subtype: &str, boundary: &str, parts: &[String]) -> String {
    let mut out = format!(
        "Content-Type: multipart/{}; boundary=\"{}\"\r\n\r\n",
        subtype, boundary
    );
    for part in parts {
        out.push_str(&format!("--{}\r\n{}", boundary, part));
    }
    out.push_str(&format!("--{}--\r\n", boundary));
    out
}

fn build_message(request: &EmailRequest, from: &str, message_id: &str) -> String {
    let mut headers = format!(
        "From: {}\r\nTo: {}\r\nSubject: {}\r\nDate: {}\r\nMessage-ID: {}\r\nMIME-Version: 1.0\r\n",
        from,
        request.to,
        encode_header(&request.subject),
        chrono::Utc::now().to_rfc2822(),
        message_id
    );

    let body = match (&request.html_body, request.body.is_empty()) {
        (Some(html), true) => text_part("text/html", html),
        (Some(html), false) => multipart(
            "alternative",
            &boundary("alt"),
            &[text_part("text/plain", &request.body), text_part("text/html", html)],
        ),
        (None, _) => text_part("text/plain", &request.body),
    };

    let entity = if request.attachments.is_empty() {
        body
    } else {
        let mut parts = vec![body];
        parts.extend(request.attachments.iter().map(attachment_part));
        multipart("mixed", &boundary("mixed"), &parts)
    };

    headers.push_str(&entity);
    headers
}

fn boundary(kind: &str) -> String {
    format!("shield-{}-{}", kind, uuid::Uuid::new_v4().simple())
}
