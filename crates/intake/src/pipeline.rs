use billflow_core::{
    payment_account, DraftError, DraftTransaction, EntityKind, EntityRef, Money, TransactionId,
    TransactionKind,
};
use billflow_matching::{
    customers_context, CategoryRouter, CustomerMatcher, DuplicateCheck, DuplicateDetector,
    DuplicateRule, MatchError, NameMatcher, Resolution,
};
use thiserror::Error;

use crate::document::{load_document, PdfError, PdfRenderer};
use crate::hash::AttachmentStore;
use crate::ledger::{LedgerClient, LedgerError};
use crate::mail::{MailError, MailSource};
use crate::model::{ExtractionRequest, InvoiceModel, ModelError};
use crate::posting::{build_transaction, PostingTargets};
use crate::types::{Attachment, MailMessage, MessageLabel};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Mail(#[from] MailError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Pdf(#[from] PdfError),
    #[error(transparent)]
    Match(#[from] MatchError),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_results: usize,
    /// Receipts are reported and skipped unless set.
    pub post_receipts: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { max_results: 10, post_receipts: false }
    }
}

/// The decision components, configured once per run.
#[derive(Default)]
pub struct Resolvers {
    pub vendors: NameMatcher,
    pub customers: CustomerMatcher,
    pub duplicates: DuplicateDetector,
    pub categories: CategoryRouter,
}

/// What happened to one message. Every variant means the message was handled
/// and will not be fetched again.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    NotInvoice,
    NoAttachment,
    Unsupported { filename: String },
    Rejected(DraftError),
    SkippedReceipt,
    Duplicate { kind: TransactionKind, id: TransactionId, rule: DuplicateRule },
    Posted {
        kind: TransactionKind,
        id: TransactionId,
        counterparty: EntityRef,
        created_counterparty: bool,
        total: Money,
    },
}

#[derive(Debug)]
pub struct MessageReport {
    pub message_id: String,
    pub subject: String,
    pub outcome: Result<MessageOutcome, PipelineError>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub messages: Vec<MessageReport>,
}

impl RunReport {
    pub fn posted(&self) -> usize {
        self.count(|o| matches!(o, Ok(MessageOutcome::Posted { .. })))
    }

    pub fn duplicates(&self) -> usize {
        self.count(|o| matches!(o, Ok(MessageOutcome::Duplicate { .. })))
    }

    pub fn failed(&self) -> usize {
        self.count(Result::is_err)
    }

    fn count(&self, pred: impl Fn(&Result<MessageOutcome, PipelineError>) -> bool) -> usize {
        self.messages.iter().filter(|m| pred(&m.outcome)).count()
    }
}

/// Orchestrates: fetch → classify → store → load document → extract →
/// duplicate check → resolve vendor and customer → post → attach → label.
pub struct Pipeline<M, L, P, G> {
    mail: M,
    model: L,
    pdf: P,
    ledger: G,
    store: AttachmentStore,
    resolvers: Resolvers,
    options: PipelineOptions,
}

impl<M, L, P, G> Pipeline<M, L, P, G>
where
    M: MailSource,
    L: InvoiceModel,
    P: PdfRenderer,
    G: LedgerClient,
{
    pub fn new(mail: M, model: L, pdf: P, ledger: G, store: AttachmentStore) -> Self {
        Self {
            mail,
            model,
            pdf,
            ledger,
            store,
            resolvers: Resolvers::default(),
            options: PipelineOptions::default(),
        }
    }

    pub fn with_resolvers(mut self, resolvers: Resolvers) -> Self {
        self.resolvers = resolvers;
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn mail(&self) -> &M {
        &self.mail
    }

    pub fn ledger(&self) -> &G {
        &self.ledger
    }

    /// Handles every unprocessed message once. A failing message is reported
    /// and left unlabelled so the next run retries it; only a failure to list
    /// the mailbox or the customer list aborts the run. A message that cannot
    /// be decoded is reported and labelled, since fetching it again would fail
    /// the same way.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let customers = self.ledger.list_entities(EntityKind::Customer).await?;
        let context = customers_context(&customers);
        tracing::info!(customers = customers.len(), "loaded customers");

        let messages = self.mail.fetch_unprocessed(self.options.max_results).await?;
        tracing::info!(count = messages.len(), "fetched unprocessed messages");

        let mut report = RunReport::default();
        for (idx, fetched) in messages.into_iter().enumerate() {
            let message = match fetched {
                Ok(message) => message,
                Err(e) => {
                    report.messages.push(self.unreadable(e).await);
                    continue;
                }
            };
            tracing::info!(
                n = idx + 1,
                id = %message.id,
                subject = %message.subject,
                "processing message"
            );
            let outcome = self.process_message(&message, context.as_deref()).await;

            match &outcome {
                Ok(o) => {
                    tracing::info!(id = %message.id, outcome = ?o, "message handled");
                    if let Err(e) = self.mail.mark_processed(&message.id).await {
                        tracing::warn!(id = %message.id, error = %e, "could not label message");
                    }
                }
                Err(e) => tracing::error!(id = %message.id, error = %e, "message failed"),
            }

            report.messages.push(MessageReport {
                message_id: message.id.clone(),
                subject: message.subject.clone(),
                outcome,
            });
        }

        tracing::info!(
            posted = report.posted(),
            duplicates = report.duplicates(),
            failed = report.failed(),
            "run complete"
        );
        Ok(report)
    }

    async fn unreadable(&self, error: MailError) -> MessageReport {
        let message_id = error.message_id().unwrap_or("unknown").to_string();
        tracing::error!(id = %message_id, error = %error, "message could not be loaded");

        if matches!(error, MailError::Decode { .. }) {
            if let Err(e) = self.mail.mark_processed(&message_id).await {
                tracing::warn!(id = %message_id, error = %e, "could not label message");
            }
        }
        MessageReport {
            message_id,
            subject: String::new(),
            outcome: Err(PipelineError::Mail(error)),
        }
    }

    pub async fn process_message(
        &self,
        message: &MailMessage,
        customers_context: Option<&str>,
    ) -> Result<MessageOutcome, PipelineError> {
        if self.model.classify(message).await? != MessageLabel::Invoice {
            return Ok(MessageOutcome::NotInvoice);
        }

        let Some(attachment) = message.attachments.first() else {
            tracing::warn!(id = %message.id, "classified as invoice but has no attachment");
            return Ok(MessageOutcome::NoAttachment);
        };

        let stored = self.store.store(attachment).await?;
        tracing::debug!(file = %attachment.filename, hash = %stored.hash_hex, "attachment saved");

        let Some(document) = load_document(attachment, &self.pdf).await? else {
            tracing::warn!(file = %attachment.filename, "unsupported attachment");
            return Ok(MessageOutcome::Unsupported { filename: attachment.filename.clone() });
        };

        let extraction = self
            .model
            .extract(ExtractionRequest {
                kind: document.kind,
                content: &document.content,
                message_text: &message.body_text,
                customers_context,
            })
            .await?;
        let draft = extraction.into_draft();

        for issue in draft.review() {
            tracing::warn!(id = %message.id, %issue, "draft issue");
        }

        if draft.is_receipt && !self.options.post_receipts {
            tracing::info!(vendor = %draft.counterparty_display_name, "receipt skipped");
            return Ok(MessageOutcome::SkippedReceipt);
        }
        if let Err(e) = draft.validate() {
            tracing::warn!(id = %message.id, error = %e, "draft rejected");
            return Ok(MessageOutcome::Rejected(e));
        }

        let kind = if draft.is_receipt { TransactionKind::Purchase } else { TransactionKind::Bill };
        self.post_draft(kind, &draft, Some(attachment)).await
    }

    /// Posts a validated draft unless the ledger already holds it. Snapshots
    /// are fetched fresh here, never cached across messages.
    pub async fn post_draft(
        &self,
        kind: TransactionKind,
        draft: &DraftTransaction,
        attachment: Option<&Attachment>,
    ) -> Result<MessageOutcome, PipelineError> {
        let snapshot = self.ledger.list_transactions(kind).await?;
        let check = self.resolvers.duplicates.find_duplicate(draft, &snapshot)?;
        if let DuplicateCheck::Duplicate { record, rule } = check {
            tracing::info!(%kind, id = %record.id, ?rule, "duplicate, not posting");
            return Ok(MessageOutcome::Duplicate { kind, id: record.id.clone(), rule });
        }

        let vendors = self.ledger.list_entities(EntityKind::Vendor).await?;
        let resolution = self.resolvers.vendors.resolve(&draft.candidate(), &vendors);
        let (counterparty, created_counterparty) = match resolution {
            Resolution::Existing { entity, .. } => (entity.to_ref(), false),
            Resolution::Create(new) => {
                let created = self.ledger.create_entity(EntityKind::Vendor, &new).await?;
                tracing::info!(vendor = %created.display_name, id = %created.id, "vendor created");
                (created.to_ref(), true)
            }
        };

        let customer = if draft.customer_name.is_some() || draft.job_site_address.is_some() {
            let customers = self.ledger.list_entities(EntityKind::Customer).await?;
            self.resolvers
                .customers
                .resolve(
                    draft.customer_name.as_deref(),
                    draft.job_site_address.as_deref(),
                    &customers,
                )
                .map(|c| c.to_ref())
        } else {
            None
        };

        let funding = match kind {
            TransactionKind::Bill => None,
            TransactionKind::Purchase => {
                let accounts = self.ledger.list_accounts().await?;
                let account = payment_account(&accounts).ok_or(LedgerError::NoPaymentAccount)?;
                tracing::debug!(account = %account.name, "paying purchase from account");
                Some(account.id.clone())
            }
        };

        let transaction = build_transaction(
            kind,
            draft,
            PostingTargets {
                counterparty: counterparty.clone(),
                customer,
                payment_account: funding,
                router: &self.resolvers.categories,
                today: chrono::Local::now().date_naive(),
            },
        );
        let record = self.ledger.create_transaction(&transaction).await?;
        tracing::info!(
            %kind,
            id = %record.id,
            total = %transaction.total(),
            vendor = %counterparty.name,
            "posted"
        );

        if let Some(attachment) = attachment {
            if let Err(e) = self.ledger.attach_file(kind, &record.id, attachment).await {
                tracing::warn!(id = %record.id, error = %e, "attachment upload failed");
            }
        }

        Ok(MessageOutcome::Posted {
            kind,
            id: record.id,
            counterparty,
            created_counterparty,
            total: transaction.total(),
        })
    }
}
