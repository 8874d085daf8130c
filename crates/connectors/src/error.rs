use billflow_intake::{LedgerError, MailError, ModelError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("{service} request failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} rejected credentials ({status}): {message}")]
    Unauthorized { service: &'static str, status: u16, message: String },
    #[error("{service} returned {status}: {message}")]
    Status { service: &'static str, status: u16, message: String },
    #[error("{service} response invalid: {message}")]
    InvalidResponse { service: &'static str, message: String },
    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectorError {
    pub(crate) fn invalid(service: &'static str, message: impl Into<String>) -> Self {
        ConnectorError::InvalidResponse { service, message: message.into() }
    }
}

impl From<ConnectorError> for MailError {
    fn from(e: ConnectorError) -> Self {
        MailError::Request(e.to_string())
    }
}

impl From<ConnectorError> for ModelError {
    fn from(e: ConnectorError) -> Self {
        match e {
            ConnectorError::InvalidResponse { message, .. } => ModelError::Response(message),
            other => ModelError::Request(other.to_string()),
        }
    }
}

impl From<ConnectorError> for LedgerError {
    fn from(e: ConnectorError) -> Self {
        match e {
            ConnectorError::Status { service, status, message } if status == 400 => {
                LedgerError::Rejected { operation: service.to_string(), message }
            }
            ConnectorError::InvalidResponse { message, .. } => LedgerError::Response(message),
            other => LedgerError::Request(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_maps_to_rejected() {
        let e = ConnectorError::Status {
            service: "QuickBooks",
            status: 400,
            message: "Invalid Reference Id".into(),
        };
        match LedgerError::from(e) {
            LedgerError::Rejected { message, .. } => assert_eq!(message, "Invalid Reference Id"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn invalid_model_response_keeps_message() {
        let e = ConnectorError::invalid("OpenAI", "missing content");
        assert!(matches!(ModelError::from(e), ModelError::Response(m) if m == "missing content"));
    }
}
