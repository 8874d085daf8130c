//! HTTP-backed implementations of the intake collaborators: Gmail as the
//! mail source, an OpenAI-compatible model, QuickBooks Online as the ledger,
//! and poppler for PDFs.

pub mod error;
pub mod gmail;
pub mod http;
pub mod oauth;
pub mod openai;
pub mod poppler;
pub mod quickbooks;

pub use error::ConnectorError;
pub use gmail::{GmailClient, DEFAULT_PROCESSED_LABEL, GOOGLE_TOKEN_URL};
pub use http::ApiClient;
pub use oauth::{load_refresh_token, ClientAuth, OAuthCredentials, RefreshingToken};
pub use openai::{OpenAiModel, OpenAiSettings, OPENAI_API_BASE};
pub use poppler::PopplerPdf;
pub use quickbooks::{QuickBooksClient, QBO_TOKEN_URL};
