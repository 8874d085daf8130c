//! Invoice triage and extraction over an OpenAI-compatible chat completions
//! endpoint, using strict JSON-schema response formats.

use async_trait::async_trait;
use base64::Engine;
use billflow_intake::{
    DocumentContent, ExtractionRequest, InvoiceExtraction, InvoiceModel, MailMessage, MessageLabel,
    ModelError, CLASSIFY_PROMPT,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ConnectorError;
use crate::http::ApiClient;

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const SERVICE: &str = "OpenAI";

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub base_url: String,
    pub classify_model: String,
    pub extract_model: String,
}

fn nullable(kind: &str) -> Value {
    json!({ "type": [kind, "null"] })
}

pub fn label_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "label": { "type": "string", "enum": ["invoice", "none"] }
        },
        "required": ["label"],
        "additionalProperties": false
    })
}

/// Strict mode needs every property listed as required; optional fields are
/// nullable instead.
pub fn invoice_schema() -> Value {
    let line = json!({
        "type": "object",
        "properties": {
            "item": { "type": "string" },
            "rate": { "type": "number" },
            "quantity": { "type": "number" },
            "description": nullable("string"),
            "category": nullable("string")
        },
        "required": ["item", "rate", "quantity", "description", "category"],
        "additionalProperties": false
    });

    json!({
        "type": "object",
        "properties": {
            "vendor_display_name": { "type": "string" },
            "memo": nullable("string"),
            "line_items": { "type": "array", "items": line },
            "tax": nullable("number"),
            "total_amount": nullable("number"),
            "due_date": nullable("string"),
            "invoice_number": nullable("string"),
            "invoice_date": nullable("string"),
            "is_receipt": { "type": "boolean" },
            "job_site_address": nullable("string"),
            "customer_name": nullable("string")
        },
        "required": [
            "vendor_display_name", "memo", "line_items", "tax", "total_amount", "due_date",
            "invoice_number", "invoice_date", "is_receipt", "job_site_address", "customer_name"
        ],
        "additionalProperties": false
    })
}

fn response_format(name: &str, schema: Value) -> Value {
    json!({
        "type": "json_schema",
        "json_schema": { "name": name, "strict": true, "schema": schema }
    })
}

pub fn classification_body(model: &str, message: &MailMessage) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": CLASSIFY_PROMPT },
            { "role": "user", "content": message.classification_text() }
        ],
        "response_format": response_format("message_label", label_schema())
    })
}

pub fn extraction_body(model: &str, request: &ExtractionRequest<'_>) -> Value {
    let mut parts = Vec::new();
    if !request.message_text.trim().is_empty() {
        let text = format!("Email text:\n{}", request.message_text.trim());
        parts.push(json!({ "type": "text", "text": text }));
    }
    match request.content {
        DocumentContent::Text(text) => parts.push(json!({ "type": "text", "text": text })),
        DocumentContent::Image { data, mime } => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(data);
            parts.push(json!({
                "type": "image_url",
                "image_url": { "url": format!("data:{mime};base64,{encoded}") }
            }));
        }
    }

    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": request.instructions() },
            { "role": "user", "content": parts }
        ],
        "response_format": response_format("invoice_data", invoice_schema())
    })
}

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// The JSON document in the first choice, decoded into `T`.
pub fn parse_completion<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, ModelError> {
    let completion: Completion = serde_json::from_value(body)
        .map_err(|e| ModelError::Response(format!("unexpected completion shape: {e}")))?;
    let message = completion
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| ModelError::Response("no choices returned".into()))?;

    if let Some(refusal) = message.refusal.filter(|r| !r.is_empty()) {
        return Err(ModelError::Refused(refusal));
    }
    let content = message
        .content
        .ok_or_else(|| ModelError::Response("empty message content".into()))?;
    serde_json::from_str(&content)
        .map_err(|e| ModelError::Response(format!("content is not valid JSON: {e}")))
}

#[derive(Debug, Deserialize)]
struct LabelSort {
    label: MessageLabel,
}

fn extract_openai_error(body: &Value, status: u16) -> String {
    body["error"]["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"))
}

// ── Client ──────────────────────────────────────────────────────────

pub struct OpenAiModel {
    api: ApiClient,
    settings: OpenAiSettings,
}

impl OpenAiModel {
    pub fn new(settings: OpenAiSettings) -> Result<Self, ConnectorError> {
        Ok(Self { api: ApiClient::new(SERVICE, extract_openai_error)?, settings })
    }

    async fn complete(&self, body: &Value) -> Result<Value, ConnectorError> {
        let url = format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'));
        self.api
            .send_json(|http| http.post(&url).bearer_auth(&self.settings.api_key).json(body))
            .await
    }
}

#[async_trait]
impl InvoiceModel for OpenAiModel {
    async fn classify(&self, message: &MailMessage) -> Result<MessageLabel, ModelError> {
        let body = classification_body(&self.settings.classify_model, message);
        let response = self.complete(&body).await?;
        let sorted: LabelSort = parse_completion(response)?;
        tracing::debug!(id = %message.id, label = %sorted.label, "message classified");
        Ok(sorted.label)
    }

    async fn extract(
        &self,
        request: ExtractionRequest<'_>,
    ) -> Result<InvoiceExtraction, ModelError> {
        let body = extraction_body(&self.settings.extract_model, &request);
        let response = self.complete(&body).await?;
        let extraction: InvoiceExtraction = parse_completion(response)?;
        tracing::debug!(
            vendor = %extraction.vendor_display_name,
            lines = extraction.line_items.len(),
            "invoice extracted"
        );
        Ok(extraction)
    }
}
