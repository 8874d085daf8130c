use async_trait::async_trait;
use billflow_core::{
    Entity, EntityId, EntityKind, LedgerAccount, NewEntity, TransactionId, TransactionKind,
    TransactionRecord,
};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::posting::NewTransaction;
use crate::types::Attachment;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger request failed: {0}")]
    Request(String),
    #[error("Ledger rejected {operation}: {message}")]
    Rejected { operation: String, message: String },
    #[error("Unexpected ledger response: {0}")]
    Response(String),
    #[error("No bank or credit card account available to pay a purchase")]
    NoPaymentAccount,
}

/// Vendors and customers known to the ledger.
#[async_trait]
pub trait EntityRegistry: Send + Sync {
    async fn list_entities(&self, kind: EntityKind) -> Result<Vec<Entity>, LedgerError>;
    async fn create_entity(
        &self,
        kind: EntityKind,
        entity: &NewEntity,
    ) -> Result<Entity, LedgerError>;
}

/// Posted bills and purchases, read as a snapshot for duplicate checks.
#[async_trait]
pub trait TransactionRegistry: Send + Sync {
    async fn list_transactions(
        &self,
        kind: TransactionKind,
    ) -> Result<Vec<TransactionRecord>, LedgerError>;
}

#[async_trait]
pub trait LedgerClient: EntityRegistry + TransactionRegistry {
    async fn list_accounts(&self) -> Result<Vec<LedgerAccount>, LedgerError>;
    async fn create_transaction(
        &self,
        transaction: &NewTransaction,
    ) -> Result<TransactionRecord, LedgerError>;
    async fn attach_file(
        &self,
        kind: TransactionKind,
        id: &TransactionId,
        attachment: &Attachment,
    ) -> Result<(), LedgerError>;
}

// ── In-memory ledger (used for tests) ───────────────────────────────

#[derive(Default)]
struct LedgerState {
    vendors: Vec<Entity>,
    customers: Vec<Entity>,
    bills: Vec<TransactionRecord>,
    purchases: Vec<TransactionRecord>,
    accounts: Vec<LedgerAccount>,
    posted: Vec<NewTransaction>,
    attachments: Vec<(TransactionId, String)>,
    next_id: u64,
}

impl LedgerState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }
}

/// A ledger held in memory. Ids are assigned sequentially.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entities(self, kind: EntityKind, entities: Vec<Entity>) -> Self {
        let mut state = self.state.into_inner();
        match kind {
            EntityKind::Vendor => state.vendors = entities,
            EntityKind::Customer => state.customers = entities,
        }
        Self { state: Mutex::new(state) }
    }

    pub fn with_transactions(self, kind: TransactionKind, records: Vec<TransactionRecord>) -> Self {
        let mut state = self.state.into_inner();
        match kind {
            TransactionKind::Bill => state.bills = records,
            TransactionKind::Purchase => state.purchases = records,
        }
        Self { state: Mutex::new(state) }
    }

    pub fn with_accounts(self, accounts: Vec<LedgerAccount>) -> Self {
        let mut state = self.state.into_inner();
        state.accounts = accounts;
        Self { state: Mutex::new(state) }
    }

    /// Every payload passed to `create_transaction`, in order.
    pub async fn posted(&self) -> Vec<NewTransaction> {
        self.state.lock().await.posted.clone()
    }

    /// `(transaction id, filename)` for every uploaded attachment.
    pub async fn attachments(&self) -> Vec<(TransactionId, String)> {
        self.state.lock().await.attachments.clone()
    }
}

#[async_trait]
impl EntityRegistry for InMemoryLedger {
    async fn list_entities(&self, kind: EntityKind) -> Result<Vec<Entity>, LedgerError> {
        let state = self.state.lock().await;
        Ok(match kind {
            EntityKind::Vendor => state.vendors.clone(),
            EntityKind::Customer => state.customers.clone(),
        })
    }

    async fn create_entity(
        &self,
        kind: EntityKind,
        entity: &NewEntity,
    ) -> Result<Entity, LedgerError> {
        let mut state = self.state.lock().await;
        let prefix = match kind {
            EntityKind::Vendor => "V",
            EntityKind::Customer => "C",
        };
        let created = Entity {
            id: EntityId(state.next_id(prefix)),
            display_name: entity.display_name.clone(),
            company_name: entity.company_name.clone(),
            addresses: Vec::new(),
        };
        match kind {
            EntityKind::Vendor => state.vendors.push(created.clone()),
            EntityKind::Customer => state.customers.push(created.clone()),
        }
        Ok(created)
    }
}

#[async_trait]
impl TransactionRegistry for InMemoryLedger {
    async fn list_transactions(
        &self,
        kind: TransactionKind,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        let state = self.state.lock().await;
        Ok(match kind {
            TransactionKind::Bill => state.bills.clone(),
            TransactionKind::Purchase => state.purchases.clone(),
        })
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn list_accounts(&self) -> Result<Vec<LedgerAccount>, LedgerError> {
        Ok(self.state.lock().await.accounts.clone())
    }

    async fn create_transaction(
        &self,
        transaction: &NewTransaction,
    ) -> Result<TransactionRecord, LedgerError> {
        let mut state = self.state.lock().await;
        let prefix = match transaction.kind {
            TransactionKind::Bill => "B",
            TransactionKind::Purchase => "P",
        };
        let record = TransactionRecord {
            id: TransactionId(state.next_id(prefix)),
            counterparty_name: Some(transaction.counterparty.name.clone()),
            total_amount: transaction.total(),
            txn_date: transaction.txn_date,
            doc_number: transaction.doc_number.clone(),
            line_amounts: transaction.lines.iter().map(|l| l.amount).collect(),
        };
        match transaction.kind {
            TransactionKind::Bill => state.bills.push(record.clone()),
            TransactionKind::Purchase => state.purchases.push(record.clone()),
        }
        state.posted.push(transaction.clone());
        Ok(record)
    }

    async fn attach_file(
        &self,
        kind: TransactionKind,
        id: &TransactionId,
        attachment: &Attachment,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let known = match kind {
            TransactionKind::Bill => state.bills.iter().any(|r| &r.id == id),
            TransactionKind::Purchase => state.purchases.iter().any(|r| &r.id == id),
        };
        if !known {
            return Err(LedgerError::Rejected {
                operation: "attach".into(),
                message: format!("{kind} {id} does not exist"),
            });
        }
        state.attachments.push((id.clone(), attachment.filename.clone()));
        Ok(())
    }
}
