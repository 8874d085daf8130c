//! Gmail mailbox: unprocessed messages are those without the processed label.

use std::sync::OnceLock;

use async_trait::async_trait;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use billflow_intake::{Attachment, FetchedMessage, MailError, MailMessage, MailSource};
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use crate::error::ConnectorError;
use crate::http::{ApiClient, RetryPolicy};
use crate::oauth::RefreshingToken;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_PROCESSED_LABEL: &str = "ai_checked";
const SERVICE: &str = "Gmail";

/// Gmail sends URL-safe base64 with or without padding.
const URL_SAFE_ANY_PADDING: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub fn decode_base64url(data: &str) -> Result<Vec<u8>, ConnectorError> {
    URL_SAFE_ANY_PADDING
        .decode(data.trim())
        .map_err(|e| ConnectorError::invalid(SERVICE, format!("bad base64 body: {e}")))
}

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_hidden_blocks, r"(?is)<(script|style|head)\b[^>]*>.*?</(script|style|head)\s*>");
re!(re_line_breaks, r"(?i)<\s*(br|/p|/div|/tr|/li|/h[1-6])\b[^>]*>");
re!(re_tags, r"(?s)<[^>]*>");
re!(re_spaces, r"[ \t\x{a0}]+");
re!(re_blank_lines, r"\n\s*\n+");

/// Reduces an HTML body to readable text.
pub fn html_to_text(html: &str) -> String {
    let text = re_hidden_blocks().replace_all(html, "");
    let text = re_line_breaks().replace_all(&text, "\n");
    let text = re_tags().replace_all(&text, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let text = re_spaces().replace_all(&text, " ");
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    re_blank_lines().replace_all(lines.join("\n").trim(), "\n\n").into_owned()
}

fn looks_like_html(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["<html", "<div", "<p", "<br", "<table"]
        .iter()
        .any(|tag| lower.contains(tag))
}

fn body_to_text(raw: &[u8]) -> String {
    let decoded = String::from_utf8_lossy(raw);
    if looks_like_html(&decoded) {
        html_to_text(&decoded)
    } else {
        decoded.trim().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentPart {
    Inline { filename: String, data: Vec<u8> },
    Remote { filename: String, attachment_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub id: String,
    pub subject: String,
    pub body_text: String,
    pub attachments: Vec<AttachmentPart>,
}

/// Reads a `format=full` message resource. The body is the top-level body,
/// else the first part that carries data. Attachments are every part with a
/// filename, in document order.
pub fn parse_message(message: &Value) -> Result<ParsedMessage, ConnectorError> {
    let id = message["id"]
        .as_str()
        .ok_or_else(|| ConnectorError::invalid(SERVICE, "message without id"))?
        .to_string();
    let payload = &message["payload"];

    let subject = payload["headers"]
        .as_array()
        .into_iter()
        .flatten()
        .find(|h| h["name"].as_str().is_some_and(|n| n.eq_ignore_ascii_case("subject")))
        .and_then(|h| h["value"].as_str())
        .unwrap_or("")
        .to_string();

    let raw_body = payload["body"]["data"]
        .as_str()
        .filter(|d| !d.is_empty())
        .or_else(|| {
            payload["parts"]
                .as_array()
                .into_iter()
                .flatten()
                .find_map(|p| p["body"]["data"].as_str().filter(|d| !d.is_empty()))
        });
    let body_text = match raw_body {
        Some(data) => body_to_text(&decode_base64url(data)?),
        None => String::new(),
    };

    let mut attachments = Vec::new();
    collect_attachments(payload, &mut attachments)?;

    Ok(ParsedMessage { id, subject, body_text, attachments })
}

fn collect_attachments(part: &Value, out: &mut Vec<AttachmentPart>) -> Result<(), ConnectorError> {
    if let Some(filename) = part["filename"].as_str().filter(|f| !f.is_empty()) {
        let body = &part["body"];
        if let Some(data) = body["data"].as_str().filter(|d| !d.is_empty()) {
            out.push(AttachmentPart::Inline {
                filename: filename.to_string(),
                data: decode_base64url(data)?,
            });
            return Ok(());
        }
        if let Some(attachment_id) = body["attachmentId"].as_str() {
            out.push(AttachmentPart::Remote {
                filename: filename.to_string(),
                attachment_id: attachment_id.to_string(),
            });
        }
    }

    for child in part["parts"].as_array().into_iter().flatten() {
        collect_attachments(child, out)?;
    }
    Ok(())
}

pub fn find_label_id(labels: &Value, name: &str) -> Option<String> {
    labels["labels"]
        .as_array()?
        .iter()
        .find(|l| l["name"].as_str() == Some(name))
        .and_then(|l| l["id"].as_str())
        .map(str::to_string)
}

fn extract_gmail_error(body: &Value, status: u16) -> String {
    body["error"]["message"]
        .as_str()
        .or_else(|| body["error_description"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"))
}

/// Malformed content fails the same way on every fetch; anything else may
/// succeed next time.
fn load_failure(id: &str, error: ConnectorError) -> MailError {
    match error {
        ConnectorError::InvalidResponse { message, .. } => {
            MailError::Decode { id: id.to_string(), message }
        }
        other => MailError::Unavailable { id: id.to_string(), message: other.to_string() },
    }
}

// ── Client ──────────────────────────────────────────────────────────

pub struct GmailClient {
    api: ApiClient,
    token: RefreshingToken,
    base_url: String,
    label: String,
    label_id: OnceCell<String>,
}

impl GmailClient {
    pub fn new(token: RefreshingToken, label: impl Into<String>) -> Result<Self, ConnectorError> {
        Ok(Self {
            api: ApiClient::new(SERVICE, extract_gmail_error)?,
            token,
            base_url: GMAIL_API_BASE.to_string(),
            label: label.into(),
            label_id: OnceCell::new(),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ConnectorError> {
        let url = format!("{}/{path}", self.base_url);
        self.api
            .send_authorized(&self.token, RetryPolicy::Idempotent, |http, token| {
                http.get(&url).bearer_auth(token).query(query)
            })
            .await
    }

    async fn post(
        &self,
        path: &str,
        body: &Value,
        policy: RetryPolicy,
    ) -> Result<Value, ConnectorError> {
        let url = format!("{}/{path}", self.base_url);
        self.api
            .send_authorized(&self.token, policy, |http, token| {
                http.post(&url).bearer_auth(token).json(body)
            })
            .await
    }

    async fn processed_label_id(&self) -> Result<&String, ConnectorError> {
        self.label_id
            .get_or_try_init(|| async {
                let labels = self.get("labels", &[]).await?;
                if let Some(id) = find_label_id(&labels, &self.label) {
                    return Ok(id);
                }
                tracing::info!(label = %self.label, "creating mailbox label");
                let created = self
                    .post(
                        "labels",
                        &json!({
                            "name": self.label,
                            "labelListVisibility": "labelShow",
                            "messageListVisibility": "show",
                        }),
                        RetryPolicy::ThrottleOnly,
                    )
                    .await?;
                created["id"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ConnectorError::invalid(SERVICE, "created label has no id"))
            })
            .await
    }

    async fn load_message(&self, id: &str) -> Result<MailMessage, ConnectorError> {
        let raw = self.get(&format!("messages/{id}"), &[("format", "full".to_string())]).await?;
        let parsed = parse_message(&raw)?;

        let mut attachments = Vec::with_capacity(parsed.attachments.len());
        for part in parsed.attachments {
            match part {
                AttachmentPart::Inline { filename, data } => {
                    attachments.push(Attachment::new(filename, data));
                }
                AttachmentPart::Remote { filename, attachment_id } => {
                    let path = format!("messages/{id}/attachments/{attachment_id}");
                    let body = self.get(&path, &[]).await?;
                    let data = body["data"].as_str().ok_or_else(|| {
                        ConnectorError::invalid(SERVICE, "attachment without data")
                    })?;
                    attachments.push(Attachment::new(filename, decode_base64url(data)?));
                }
            }
        }

        Ok(MailMessage {
            id: parsed.id,
            subject: parsed.subject,
            body_text: parsed.body_text,
            attachments,
        })
    }
}

#[async_trait]
impl MailSource for GmailClient {
    async fn fetch_unprocessed(
        &self,
        max_results: usize,
    ) -> Result<Vec<FetchedMessage>, MailError> {
        let query = [
            ("maxResults", max_results.to_string()),
            ("q", format!("-label:{}", self.label)),
        ];
        let list = self.get("messages", &query).await?;

        let ids: Vec<&str> = list["messages"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|m| m["id"].as_str())
            .collect();
        tracing::debug!(count = ids.len(), "listed unprocessed messages");

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            let fetched = self.load_message(id).await.map_err(|e| load_failure(id, e));
            if let Err(e) = &fetched {
                tracing::warn!(id, error = %e, "message not loaded");
            }
            messages.push(fetched);
        }
        Ok(messages)
    }

    async fn mark_processed(&self, message_id: &str) -> Result<(), MailError> {
        let label_id = self.processed_label_id().await?.clone();
        // Adding a label the message already has is a no-op.
        self.post(
            &format!("messages/{message_id}/modify"),
            &json!({ "addLabelIds": [label_id] }),
            RetryPolicy::Idempotent,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(data: &[u8]) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
    }

    #[test]
    fn malformed_message_is_a_decode_failure() {
        let bad = json!({
            "id": "18c1",
            "payload": {"headers": [], "body": {"data": "not base64!"}}
        });
        let err = load_failure("18c1", parse_message(&bad).unwrap_err());
        assert!(matches!(err, MailError::Decode { ref id, .. } if id == "18c1"));

        let status =
            ConnectorError::Status { service: SERVICE, status: 500, message: "backend".into() };
        assert!(matches!(load_failure("18c2", status), MailError::Unavailable { .. }));
    }

    #[test]
    fn decodes_with_and_without_padding() {
        assert_eq!(decode_base64url("aGk").unwrap(), b"hi");
        assert_eq!(decode_base64url("aGk=").unwrap(), b"hi");
        assert_eq!(decode_base64url("-_8").unwrap(), vec![0xfb, 0xff]);
        assert!(decode_base64url("not base64!").is_err());
    }

    #[test]
    fn html_is_reduced_to_text() {
        let html = "<html><head><title>x</title><style>p{}</style></head>\
            <body><p>Invoice&nbsp;#1042</p><div>Total: <b>$93.25</b></div>\
            <script>var a;</script></body></html>";
        assert_eq!(html_to_text(html), "Invoice #1042\nTotal: $93.25");
    }

    #[test]
    fn parses_nested_message() {
        let message = json!({
            "id": "18c1",
            "payload": {
                "headers": [
                    {"name": "From", "value": "a@b.c"},
                    {"name": "Subject", "value": "Invoice 1042"}
                ],
                "body": {"size": 0},
                "parts": [
                    {
                        "mimeType": "text/plain",
                        "filename": "",
                        "body": {"data": b64(b"Please find attached.")}
                    },
                    {
                        "mimeType": "multipart/mixed",
                        "filename": "",
                        "body": {"size": 0},
                        "parts": [
                            {
                                "filename": "inv-1042.pdf",
                                "body": {"attachmentId": "ANGjdJ8", "size": 52311}
                            },
                            {"filename": "logo.png", "body": {"data": b64(&[1, 2, 3])}}
                        ]
                    }
                ]
            }
        });

        let parsed = parse_message(&message).unwrap();
        assert_eq!(parsed.id, "18c1");
        assert_eq!(parsed.subject, "Invoice 1042");
        assert_eq!(parsed.body_text, "Please find attached.");
        assert_eq!(
            parsed.attachments,
            vec![
                AttachmentPart::Remote {
                    filename: "inv-1042.pdf".into(),
                    attachment_id: "ANGjdJ8".into(),
                },
                AttachmentPart::Inline { filename: "logo.png".into(), data: vec![1, 2, 3] },
            ]
        );
    }

    #[test]
    fn html_top_level_body() {
        let message = json!({
            "id": "m2",
            "payload": {
                "headers": [],
                "body": {"data": b64(b"<div>Thanks for your <b>order</b></div>")}
            }
        });
        let parsed = parse_message(&message).unwrap();
        assert_eq!(parsed.subject, "");
        assert_eq!(parsed.body_text, "Thanks for your order");
        assert!(parsed.attachments.is_empty());
    }

    #[test]
    fn finds_label_by_name() {
        let labels = json!({"labels": [
            {"id": "INBOX", "name": "INBOX"},
            {"id": "Label_7", "name": "ai_checked"}
        ]});
        assert_eq!(find_label_id(&labels, "ai_checked").as_deref(), Some("Label_7"));
        assert_eq!(find_label_id(&labels, "other"), None);
    }
}
