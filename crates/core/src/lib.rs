pub mod account;
pub mod date;
pub mod entity;
pub mod money;
pub mod transaction;

pub use account::{
    payment_account, AccountId, AccountType, LedgerAccount, DEFAULT_CATEGORY_ACCOUNTS,
    DEFAULT_EXPENSE_ACCOUNT,
};
pub use date::{format_ledger_date, normalize_invoice_date, parse_invoice_date};
pub use entity::{CandidateRecord, Entity, EntityId, EntityKind, EntityRef, NewEntity};
pub use money::{Money, AMOUNT_TOLERANCE};
pub use transaction::{
    DraftError, DraftIssue, DraftLine, DraftTransaction, TransactionId, TransactionKind,
    TransactionRecord,
};
