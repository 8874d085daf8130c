use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::document::{DocumentContent, DocumentKind};
use crate::types::{InvoiceExtraction, MailMessage, MessageLabel};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model request failed: {0}")]
    Request(String),
    #[error("Model returned an unusable response: {0}")]
    Response(String),
    #[error("Model refused: {0}")]
    Refused(String),
}

pub const CLASSIFY_PROMPT: &str = "Decide whether the following email is an invoice. \
An email with an attachment is most likely an invoice. \
Answer with the label invoice or none.";

/// Everything the model sees when asked to extract one document.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionRequest<'a> {
    pub kind: DocumentKind,
    pub content: &'a DocumentContent,
    pub message_text: &'a str,
    pub customers_context: Option<&'a str>,
}

impl ExtractionRequest<'_> {
    pub fn instructions(&self) -> String {
        extraction_prompt(self.kind, self.customers_context)
    }
}

/// System instructions for invoice extraction.
pub fn extraction_prompt(kind: DocumentKind, customers_context: Option<&str>) -> String {
    let source = match kind {
        DocumentKind::TextPdf => "document",
        DocumentKind::ImagePdf | DocumentKind::Image => "image",
    };
    let mut prompt = format!(
        "Extract structured invoice data from this {source}. \
         Decide whether it is an INVOICE (requests payment, unpaid) \
         or a RECEIPT (already paid, marked PAID or SOLD ON) \
         and set is_receipt=true for receipts. \
         Extract any job site, project or service address as job_site_address. \
         Give every line item a category such as Materials, Labor, Equipment, Fuel, \
         Permits or Supplies based on its description. \
         REQUIRED: vendor_display_name, line_items (item, rate, quantity, category), \
         total_amount, is_receipt. \
         OPTIONAL: invoice_number, invoice_date, due_date, tax, memo, job_site_address, \
         customer_name. \
         Return all dates as MM/DD/YYYY."
    );

    if let Some(context) = customers_context {
        prompt.push_str(&format!(
            "\n\nMatch the job site address on the invoice to one of these customers:\n\
             {context}\n\n\
             If an address matches, set customer_name to the customer name exactly as listed."
        ));
    }

    prompt
}

/// The language model used to triage mail and read invoices.
#[async_trait]
pub trait InvoiceModel: Send + Sync {
    async fn classify(&self, message: &MailMessage) -> Result<MessageLabel, ModelError>;
    async fn extract(
        &self,
        request: ExtractionRequest<'_>,
    ) -> Result<InvoiceExtraction, ModelError>;
}

// ── Scripted model (used for tests) ─────────────────────────────────

/// Answers every message with the same label and extraction, and records the
/// instructions it was given.
pub struct ScriptedModel {
    pub label: MessageLabel,
    pub extraction: Option<InvoiceExtraction>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn invoice(extraction: InvoiceExtraction) -> Self {
        Self {
            label: MessageLabel::Invoice,
            extraction: Some(extraction),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn not_invoice() -> Self {
        Self { label: MessageLabel::None, extraction: None, prompts: Mutex::new(Vec::new()) }
    }

    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl InvoiceModel for ScriptedModel {
    async fn classify(&self, _message: &MailMessage) -> Result<MessageLabel, ModelError> {
        Ok(self.label)
    }

    async fn extract(
        &self,
        request: ExtractionRequest<'_>,
    ) -> Result<InvoiceExtraction, ModelError> {
        self.prompts.lock().await.push(request.instructions());
        self.extraction
            .clone()
            .ok_or_else(|| ModelError::Response("no extraction scripted".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_mentions_source_kind() {
        assert!(extraction_prompt(DocumentKind::TextPdf, None).contains("from this document"));
        assert!(extraction_prompt(DocumentKind::Image, None).contains("from this image"));
    }

    #[test]
    fn prompt_includes_customer_list() {
        let prompt =
            extraction_prompt(DocumentKind::TextPdf, Some("- Smith Residence: 12 Ocean Ave"));
        assert!(prompt.contains("- Smith Residence: 12 Ocean Ave"));
        assert!(prompt.contains("exactly as listed"));
        assert!(!extraction_prompt(DocumentKind::TextPdf, None).contains("customers:"));
    }

    #[tokio::test]
    async fn scripted_model_records_prompts() {
        let model = ScriptedModel::invoice(InvoiceExtraction {
            vendor_display_name: "Acme".into(),
            ..Default::default()
        });
        let content = DocumentContent::Text("Invoice".into());
        let request = ExtractionRequest {
            kind: DocumentKind::TextPdf,
            content: &content,
            message_text: "",
            customers_context: None,
        };
        let out = model.extract(request).await.unwrap();
        assert_eq!(out.vendor_display_name, "Acme");
        assert_eq!(model.prompts().await.len(), 1);
        assert_eq!(model.classify(&MailMessage::default()).await.unwrap(), MessageLabel::Invoice);
    }

    #[tokio::test]
    async fn not_invoice_cannot_extract() {
        let model = ScriptedModel::not_invoice();
        let content = DocumentContent::Text("x".into());
        let request = ExtractionRequest {
            kind: DocumentKind::TextPdf,
            content: &content,
            message_text: "",
            customers_context: None,
        };
        assert!(matches!(model.extract(request).await, Err(ModelError::Response(_))));
    }
}
