use billflow_core::{DraftLine, DraftTransaction, Money};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A file attached to an incoming message, already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self { filename: filename.into(), data: data.into() }
    }

    /// Lowercased extension, `bin` when the filename has none.
    pub fn extension(&self) -> String {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "bin".to_string())
    }

    pub fn content_type(&self) -> &'static str {
        match self.extension().as_str() {
            "pdf" => "application/pdf",
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            _ => "application/octet-stream",
        }
    }
}

/// One unprocessed message from the mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MailMessage {
    pub id: String,
    pub subject: String,
    /// Plain text, or HTML already reduced to text.
    pub body_text: String,
    pub attachments: Vec<Attachment>,
}

impl MailMessage {
    /// The text the classifier sees: body followed by attachment names.
    pub fn classification_text(&self) -> String {
        if self.attachments.is_empty() {
            return self.body_text.clone();
        }
        let names: Vec<String> = self
            .attachments
            .iter()
            .map(|a| format!("- {}", a.filename))
            .collect();
        format!("{}\n\nAttachments found:\n{}", self.body_text, names.join("\n"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLabel {
    Invoice,
    None,
}

impl std::fmt::Display for MessageLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageLabel::Invoice => write!(f, "invoice"),
            MessageLabel::None => write!(f, "none"),
        }
    }
}

fn default_quantity() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedLine {
    pub item: String,
    pub rate: f64,
    #[serde(default = "default_quantity")]
    pub quantity: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Structured invoice data as returned by the extraction model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InvoiceExtraction {
    pub vendor_display_name: String,
    #[serde(default)]
    pub vendor_company_name: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub line_items: Vec<ExtractedLine>,
    #[serde(default)]
    pub tax: Option<f64>,
    #[serde(default)]
    pub total_amount: Option<f64>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub invoice_date: Option<String>,
    #[serde(default)]
    pub is_receipt: Option<bool>,
    #[serde(default)]
    pub job_site_address: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl InvoiceExtraction {
    /// Converts model floats to exact amounts. Quantities that cannot be
    /// represented become zero and fail draft validation.
    pub fn into_draft(self) -> DraftTransaction {
        let line_items = self
            .line_items
            .into_iter()
            .map(|l| DraftLine {
                item_name: l.item.trim().to_string(),
                unit_rate: Money::from_f64(l.rate).unwrap_or_default(),
                quantity: Decimal::from_f64(l.quantity).unwrap_or(Decimal::ZERO).normalize(),
                category: non_blank(l.category),
                description: non_blank(l.description),
            })
            .collect();

        DraftTransaction {
            counterparty_display_name: self.vendor_display_name.trim().to_string(),
            counterparty_company_name: non_blank(self.vendor_company_name),
            total_amount: self.total_amount.and_then(Money::from_f64),
            invoice_date: non_blank(self.invoice_date),
            due_date: non_blank(self.due_date),
            invoice_number: non_blank(self.invoice_number),
            line_items,
            tax: self.tax.and_then(Money::from_f64),
            memo: non_blank(self.memo),
            is_receipt: self.is_receipt.unwrap_or(false),
            job_site_address: non_blank(self.job_site_address),
            customer_name: non_blank(self.customer_name),
        }
    }
}
