use async_trait::async_trait;
use thiserror::Error;

use crate::types::Attachment;

/// PDFs with less extractable text than this are treated as scans.
pub const MIN_PDF_TEXT_CHARS: usize = 10;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF tool `{tool}` failed: {message}")]
    Tool { tool: &'static str, message: String },
}

/// Text extraction and page rendering for PDF attachments.
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    /// Embedded text of the whole document, `None` if the tool produced nothing.
    async fn extract_text(&self, pdf: &[u8]) -> Result<Option<String>, PdfError>;
    /// First page as JPEG bytes.
    async fn render_first_page(&self, pdf: &[u8]) -> Result<Option<Vec<u8>>, PdfError>;
}

/// How an attachment is handed to the extraction model. Decided once per
/// attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    TextPdf,
    ImagePdf,
    Image,
}

impl DocumentKind {
    pub fn is_pdf(filename: &str) -> bool {
        filename.to_lowercase().ends_with(".pdf")
    }

    pub fn image_mime(filename: &str) -> Option<&'static str> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
            Some("image/jpeg")
        } else if lower.ends_with(".png") {
            Some("image/png")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentContent {
    Text(String),
    Image { data: Vec<u8>, mime: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub kind: DocumentKind,
    pub content: DocumentContent,
}

/// Turns an attachment into model input. `Ok(None)` means the attachment type
/// is unsupported or a scanned PDF could not be rendered.
pub async fn load_document<P: PdfRenderer + ?Sized>(
    attachment: &Attachment,
    pdf: &P,
) -> Result<Option<Document>, PdfError> {
    if DocumentKind::is_pdf(&attachment.filename) {
        let text = pdf.extract_text(&attachment.data).await?.unwrap_or_default();
        let trimmed = text.trim();
        if trimmed.chars().count() >= MIN_PDF_TEXT_CHARS {
            tracing::debug!(file = %attachment.filename, chars = trimmed.len(), "text PDF");
            return Ok(Some(Document {
                kind: DocumentKind::TextPdf,
                content: DocumentContent::Text(trimmed.to_string()),
            }));
        }

        tracing::debug!(file = %attachment.filename, "no usable text, rendering first page");
        return Ok(pdf.render_first_page(&attachment.data).await?.map(|data| Document {
            kind: DocumentKind::ImagePdf,
            content: DocumentContent::Image { data, mime: "image/jpeg" },
        }));
    }

    Ok(DocumentKind::image_mime(&attachment.filename).map(|mime| Document {
        kind: DocumentKind::Image,
        content: DocumentContent::Image { data: attachment.data.clone(), mime },
    }))
}

/// Fixed responses for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct StaticPdf {
    pub text: Option<String>,
    pub first_page: Option<Vec<u8>>,
}

impl StaticPdf {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), first_page: None }
    }

    pub fn scanned(first_page: impl Into<Vec<u8>>) -> Self {
        Self { text: None, first_page: Some(first_page.into()) }
    }
}

#[async_trait]
impl PdfRenderer for StaticPdf {
    async fn extract_text(&self, _pdf: &[u8]) -> Result<Option<String>, PdfError> {
        Ok(self.text.clone())
    }

    async fn render_first_page(&self, _pdf: &[u8]) -> Result<Option<Vec<u8>>, PdfError> {
        Ok(self.first_page.clone())
    }
}
