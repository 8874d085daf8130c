pub mod document;
pub mod hash;
pub mod ledger;
pub mod mail;
pub mod model;
pub mod pipeline;
pub mod posting;
pub mod types;

pub use document::{
    load_document, Document, DocumentContent, DocumentKind, PdfError, PdfRenderer, StaticPdf,
};
pub use hash::{sha256_bytes, to_hex, AttachmentStore, StoredAttachment};
pub use ledger::{EntityRegistry, InMemoryLedger, LedgerClient, LedgerError, TransactionRegistry};
pub use mail::{FetchedMessage, MailError, MailSource, MockMailbox};
pub use model::{
    extraction_prompt, ExtractionRequest, InvoiceModel, ModelError, ScriptedModel, CLASSIFY_PROMPT,
};
pub use pipeline::{
    MessageOutcome, MessageReport, Pipeline, PipelineError, PipelineOptions, Resolvers, RunReport,
};
pub use posting::{build_transaction, NewTransaction, PostingLine, PostingTargets};
pub use types::{Attachment, ExtractedLine, InvoiceExtraction, MailMessage, MessageLabel};
