use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::types::MailMessage;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mail request failed: {0}")]
    Request(String),
    /// The message is malformed and will not decode on a later fetch either.
    #[error("Could not decode message {id}: {message}")]
    Decode { id: String, message: String },
    /// The message was listed but could not be downloaded this time.
    #[error("Could not download message {id}: {message}")]
    Unavailable { id: String, message: String },
}

impl MailError {
    /// Id of the message a per-message failure belongs to.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            MailError::Decode { id, .. } | MailError::Unavailable { id, .. } => Some(id),
            MailError::Request(_) => None,
        }
    }
}

/// A listed message, or the reason it could not be loaded.
pub type FetchedMessage = Result<MailMessage, MailError>;

/// A mailbox that hands out messages not yet labelled as processed.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// `Err` only when the mailbox itself cannot be listed; a message that
    /// fails to load is returned in place.
    async fn fetch_unprocessed(&self, max_results: usize) -> Result<Vec<FetchedMessage>, MailError>;
    async fn mark_processed(&self, message_id: &str) -> Result<(), MailError>;
}

/// In-memory mailbox. Processed messages are no longer returned.
#[derive(Default)]
pub struct MockMailbox {
    messages: Vec<MailMessage>,
    undecodable: Vec<String>,
    processed: Mutex<Vec<String>>,
}

impl MockMailbox {
    pub fn new(messages: Vec<MailMessage>) -> Self {
        Self { messages, undecodable: Vec::new(), processed: Mutex::new(Vec::new()) }
    }

    /// Messages with these ids come back as decode failures.
    pub fn with_undecodable(mut self, ids: &[&str]) -> Self {
        self.undecodable = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub async fn processed(&self) -> Vec<String> {
        self.processed.lock().await.clone()
    }
}

#[async_trait]
impl MailSource for MockMailbox {
    async fn fetch_unprocessed(
        &self,
        max_results: usize,
    ) -> Result<Vec<FetchedMessage>, MailError> {
        let processed = self.processed.lock().await;
        Ok(self
            .messages
            .iter()
            .filter(|m| !processed.contains(&m.id))
            .take(max_results)
            .map(|m| {
                if self.undecodable.contains(&m.id) {
                    Err(MailError::Decode { id: m.id.clone(), message: "malformed body".into() })
                } else {
                    Ok(m.clone())
                }
            })
            .collect())
    }

    async fn mark_processed(&self, message_id: &str) -> Result<(), MailError> {
        let mut processed = self.processed.lock().await;
        if !processed.iter().any(|id| id == message_id) {
            processed.push(message_id.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str) -> MailMessage {
        MailMessage { id: id.into(), ..Default::default() }
    }

    #[tokio::test]
    async fn processed_messages_are_not_refetched() {
        let mailbox = MockMailbox::new(vec![message("a"), message("b"), message("c")]);
        assert_eq!(mailbox.fetch_unprocessed(2).await.unwrap().len(), 2);

        mailbox.mark_processed("a").await.unwrap();
        mailbox.mark_processed("a").await.unwrap();
        let ids: Vec<String> = mailbox
            .fetch_unprocessed(10)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.unwrap().id)
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(mailbox.processed().await, vec!["a"]);
    }

    #[tokio::test]
    async fn undecodable_message_is_returned_in_place() {
        let mailbox = MockMailbox::new(vec![message("a"), message("b")]).with_undecodable(&["a"]);
        let fetched = mailbox.fetch_unprocessed(10).await.unwrap();
        assert_eq!(fetched.len(), 2);
        let err = fetched[0].as_ref().unwrap_err();
        assert!(matches!(err, MailError::Decode { .. }));
        assert_eq!(err.message_id(), Some("a"));
        assert_eq!(fetched[1].as_ref().unwrap().id, "b");
        assert_eq!(MailError::Request("down".into()).message_id(), None);
    }
}
