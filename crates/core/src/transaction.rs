use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::entity::CandidateRecord;
use super::money::{Money, AMOUNT_TOLERANCE};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        TransactionId(s.to_string())
    }
}

/// Bills are unpaid invoices; purchases are already-paid receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Bill,
    Purchase,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Bill => write!(f, "Bill"),
            TransactionKind::Purchase => write!(f, "Purchase"),
        }
    }
}

/// An existing transaction as read from the ledger snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub counterparty_name: Option<String>,
    pub total_amount: Money,
    pub txn_date: Option<NaiveDate>,
    pub doc_number: Option<String>,
    pub line_amounts: Vec<Money>,
}

impl TransactionRecord {
    /// The ledger does not always populate the header total, so duplicate
    /// checks sum the lines instead.
    pub fn line_total(&self) -> Money {
        self.line_amounts.iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftLine {
    pub item_name: String,
    pub unit_rate: Money,
    pub quantity: Decimal,
    pub category: Option<String>,
    pub description: Option<String>,
}

impl DraftLine {
    pub fn new(item_name: impl Into<String>, unit_rate: Money, quantity: Decimal) -> Self {
        DraftLine {
            item_name: item_name.into(),
            unit_rate,
            quantity,
            category: None,
            description: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn amount(&self) -> Money {
        (self.unit_rate * self.quantity).round_cents()
    }
}

/// A not-yet-posted bill or purchase derived from extracted invoice data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DraftTransaction {
    pub counterparty_display_name: String,
    pub counterparty_company_name: Option<String>,
    pub total_amount: Option<Money>,
    /// As extracted, usually `MM/DD/YYYY`.
    pub invoice_date: Option<String>,
    pub due_date: Option<String>,
    pub invoice_number: Option<String>,
    pub line_items: Vec<DraftLine>,
    pub tax: Option<Money>,
    pub memo: Option<String>,
    pub is_receipt: bool,
    pub job_site_address: Option<String>,
    pub customer_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DraftError {
    #[error("Draft has no counterparty name")]
    MissingCounterparty,
    #[error("Draft must have a positive total_amount")]
    InvalidTotal(Option<Money>),
    #[error("Line {line}: quantity must be positive (got {quantity})")]
    NonPositiveQuantity { line: usize, quantity: Decimal },
}

/// Soft problems worth a warning but not worth rejecting the draft.
#[derive(Debug, Clone, PartialEq)]
pub enum DraftIssue {
    MissingCounterparty,
    NoLineItems,
    MissingTotal,
    InvalidQuantity { line: usize },
    InvalidRate { line: usize },
    MissingItemName { line: usize },
    TotalMismatch { stated: Money, calculated: Money },
    CreditNote,
}

impl fmt::Display for DraftIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DraftIssue::MissingCounterparty => write!(f, "counterparty name missing or too short"),
            DraftIssue::NoLineItems => write!(f, "no line items extracted"),
            DraftIssue::MissingTotal => write!(f, "total amount not specified"),
            DraftIssue::InvalidQuantity { line } => write!(f, "line {line}: invalid quantity"),
            DraftIssue::InvalidRate { line } => write!(f, "line {line}: invalid rate"),
            DraftIssue::MissingItemName { line } => {
                write!(f, "line {line}: item name missing or too short")
            }
            DraftIssue::TotalMismatch { stated, calculated } => {
                write!(f, "total mismatch: invoice={stated}, calculated={calculated}")
            }
            DraftIssue::CreditNote => write!(f, "negative total, may be a credit note"),
        }
    }
}

impl DraftTransaction {
    pub fn candidate(&self) -> CandidateRecord {
        CandidateRecord {
            display_name: self.counterparty_display_name.trim().to_string(),
            company_name: self.counterparty_company_name.clone(),
        }
    }

    /// Sum of the line amounts plus tax.
    pub fn calculated_total(&self) -> Money {
        let lines: Money = self.line_items.iter().map(DraftLine::amount).sum();
        lines + self.tax.unwrap_or_default()
    }

    /// Hard preconditions for posting or duplicate checks.
    pub fn validate(&self) -> Result<Money, DraftError> {
        if self.counterparty_display_name.trim().is_empty() {
            return Err(DraftError::MissingCounterparty);
        }
        let total = match self.total_amount {
            Some(total) if total.is_positive() => total,
            other => return Err(DraftError::InvalidTotal(other)),
        };
        if let Some((idx, line)) = self
            .line_items
            .iter()
            .enumerate()
            .find(|(_, l)| l.quantity <= Decimal::ZERO)
        {
            return Err(DraftError::NonPositiveQuantity { line: idx + 1, quantity: line.quantity });
        }
        Ok(total)
    }

    /// Line numbers in issues are 1-based.
    pub fn review(&self) -> Vec<DraftIssue> {
        let mut issues = Vec::new();

        if self.counterparty_display_name.trim().chars().count() < 2 {
            issues.push(DraftIssue::MissingCounterparty);
        }
        if self.line_items.is_empty() {
            issues.push(DraftIssue::NoLineItems);
        }
        if self.total_amount.map_or(true, Money::is_zero) {
            issues.push(DraftIssue::MissingTotal);
        }

        for (idx, line) in self.line_items.iter().enumerate() {
            let n = idx + 1;
            if line.quantity <= Decimal::ZERO {
                issues.push(DraftIssue::InvalidQuantity { line: n });
            }
            if !line.unit_rate.is_positive() {
                issues.push(DraftIssue::InvalidRate { line: n });
            }
            if line.item_name.trim().chars().count() < 2 {
                issues.push(DraftIssue::MissingItemName { line: n });
            }
        }

        if let Some(stated) = self.total_amount.filter(|t| !t.is_zero()) {
            let calculated = self.calculated_total();
            if !stated.within(calculated, AMOUNT_TOLERANCE) {
                issues.push(DraftIssue::TotalMismatch { stated, calculated });
            }
            if stated < Money::zero() {
                issues.push(DraftIssue::CreditNote);
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(name: &str, rate_cents: i64, qty: i64) -> DraftLine {
        DraftLine::new(name, Money::from_cents(rate_cents), Decimal::from(qty))
    }

    fn draft(total_cents: Option<i64>, lines: Vec<DraftLine>) -> DraftTransaction {
        DraftTransaction {
            counterparty_display_name: "Acme".to_string(),
            total_amount: total_cents.map(Money::from_cents),
            line_items: lines,
            ..Default::default()
        }
    }

    #[test]
    fn line_amount_is_rate_times_quantity() {
        let l = DraftLine::new("Mulch", Money::from_cents(1_250), Decimal::new(25, 1));
        assert_eq!(l.amount(), Money::from_cents(3_125));
    }

    #[test]
    fn validate_accepts_positive_total() {
        let d = draft(Some(10_000), vec![line("Pavers", 10_000, 1)]);
        assert_eq!(d.validate().unwrap(), Money::from_cents(10_000));
    }

    #[test]
    fn validate_rejects_missing_or_zero_total() {
        assert_eq!(draft(None, vec![]).validate(), Err(DraftError::InvalidTotal(None)));
        assert!(matches!(
            draft(Some(0), vec![]).validate(),
            Err(DraftError::InvalidTotal(Some(_)))
        ));
        assert!(matches!(
            draft(Some(-500), vec![]).validate(),
            Err(DraftError::InvalidTotal(Some(_)))
        ));
    }

    #[test]
    fn validate_rejects_blank_counterparty() {
        let mut d = draft(Some(100), vec![]);
        d.counterparty_display_name = "  ".into();
        assert_eq!(d.validate(), Err(DraftError::MissingCounterparty));
    }

    #[test]
    fn validate_rejects_non_positive_quantity() {
        let d = draft(Some(100), vec![line("Soil", 100, 1), line("Sod", 100, 0)]);
        assert!(matches!(
            d.validate(),
            Err(DraftError::NonPositiveQuantity { line: 2, .. })
        ));
    }

    #[test]
    fn review_clean_draft_has_no_issues() {
        let mut d = draft(Some(10_800), vec![line("Pavers", 5_000, 2)]);
        d.tax = Some(Money::from_cents(800));
        assert!(d.review().is_empty(), "{:?}", d.review());
    }

    #[test]
    fn review_flags_total_mismatch() {
        let d = draft(Some(12_000), vec![line("Pavers", 5_000, 2)]);
        let issues = d.review();
        assert_eq!(
            issues,
            vec![DraftIssue::TotalMismatch {
                stated: Money::from_cents(12_000),
                calculated: Money::from_cents(10_000),
            }]
        );
    }

    #[test]
    fn review_flags_empty_extraction() {
        let mut d = draft(None, vec![]);
        d.counterparty_display_name = String::new();
        let issues = d.review();
        assert!(issues.contains(&DraftIssue::MissingCounterparty));
        assert!(issues.contains(&DraftIssue::NoLineItems));
        assert!(issues.contains(&DraftIssue::MissingTotal));
    }

    #[test]
    fn review_flags_bad_lines_and_credit_notes() {
        let d = draft(Some(-2_000), vec![line("X", -2_000, 1)]);
        let issues = d.review();
        assert!(issues.contains(&DraftIssue::InvalidRate { line: 1 }));
        assert!(issues.contains(&DraftIssue::MissingItemName { line: 1 }));
        assert!(issues.contains(&DraftIssue::CreditNote));
    }

    #[test]
    fn record_line_total_sums_lines() {
        let r = TransactionRecord {
            id: TransactionId::from("B1"),
            counterparty_name: Some("Acme".into()),
            total_amount: Money::zero(),
            txn_date: None,
            doc_number: None,
            line_amounts: vec![Money::from_cents(6_000), Money::from_cents(4_000)],
        };
        assert_eq!(r.line_total(), Money::from_cents(10_000));
    }

    #[test]
    fn candidate_is_trimmed() {
        let mut d = draft(Some(100), vec![]);
        d.counterparty_display_name = "  Acme  ".into();
        assert_eq!(d.candidate().display_name, "Acme");
    }
}
