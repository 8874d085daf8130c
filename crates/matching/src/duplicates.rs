use std::collections::HashMap;

use billflow_core::{
    format_ledger_date, normalize_invoice_date, DraftTransaction, Money, TransactionRecord,
    AMOUNT_TOLERANCE,
};
use chrono::NaiveDate;

use crate::MatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateRule {
    InvoiceNumber,
    /// Counterparty, date and line total all agree.
    Composite,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DuplicateCheck<'a> {
    Duplicate { record: &'a TransactionRecord, rule: DuplicateRule },
    None,
}

impl<'a> DuplicateCheck<'a> {
    pub fn record(&self) -> Option<&'a TransactionRecord> {
        match self {
            DuplicateCheck::Duplicate { record, .. } => Some(record),
            DuplicateCheck::None => None,
        }
    }
}

pub struct DuplicateDetector {
    pub amount_tolerance: Money,
    /// Counterparty names compare trimmed and case-insensitive unless set.
    pub case_sensitive_names: bool,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self {
            amount_tolerance: AMOUNT_TOLERANCE,
            case_sensitive_names: false,
        }
    }
}

impl DuplicateDetector {
    pub fn new(amount_tolerance: Money, case_sensitive_names: bool) -> Self {
        Self {
            amount_tolerance,
            case_sensitive_names,
        }
    }

    /// Walks the snapshot in order and returns the first record that matches
    /// the draft by invoice number or by the composite key.
    ///
    /// Fails fast when the draft has no positive total.
    pub fn find_duplicate<'a>(
        &self,
        draft: &DraftTransaction,
        snapshot: &'a [TransactionRecord],
    ) -> Result<DuplicateCheck<'a>, MatchError> {
        let total = draft.validate()?;
        let draft_date = normalize_invoice_date(draft.invoice_date.as_deref());
        let invoice_number = draft
            .invoice_number
            .as_deref()
            .filter(|n| !n.trim().is_empty());

        for record in snapshot {
            if let (Some(number), Some(doc)) = (invoice_number, record.doc_number.as_deref()) {
                if !doc.trim().is_empty() && doc == number {
                    tracing::info!(
                        id = %record.id,
                        doc_number = doc,
                        "duplicate found by invoice number"
                    );
                    return Ok(DuplicateCheck::Duplicate {
                        record,
                        rule: DuplicateRule::InvoiceNumber,
                    });
                }
            }

            if self.same_counterparty(record, &draft.counterparty_display_name)
                && record.txn_date.map(format_ledger_date) == draft_date
                && record.line_total().within(total, self.amount_tolerance)
            {
                tracing::info!(id = %record.id, "duplicate found by counterparty/date/amount");
                return Ok(DuplicateCheck::Duplicate {
                    record,
                    rule: DuplicateRule::Composite,
                });
            }
        }

        Ok(DuplicateCheck::None)
    }

    fn same_counterparty(&self, record: &TransactionRecord, name: &str) -> bool {
        let Some(existing) = record.counterparty_name.as_deref() else {
            return false;
        };
        if self.case_sensitive_names {
            existing == name
        } else {
            existing.trim().to_lowercase() == name.trim().to_lowercase()
        }
    }
}

/// Checks a draft against a snapshot with the default tolerance and
/// case-insensitive counterparty names.
pub fn find_duplicate<'a>(
    draft: &DraftTransaction,
    snapshot: &'a [TransactionRecord],
) -> Result<DuplicateCheck<'a>, MatchError> {
    DuplicateDetector::default().find_duplicate(draft, snapshot)
}

/// How existing records are bucketed when auditing a ledger for duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKey {
    /// Counterparty, total and date.
    Strict,
    /// Total and date only.
    Soft,
}

#[derive(Debug, Clone)]
pub struct DuplicateGroup<'a> {
    /// `None` for soft groups.
    pub counterparty: Option<String>,
    pub total: Money,
    pub date: Option<NaiveDate>,
    pub records: Vec<&'a TransactionRecord>,
}

/// Groups of two or more records sharing a key, in first-seen order.
pub fn find_duplicate_groups(
    records: &[TransactionRecord],
    key: GroupKey,
) -> Vec<DuplicateGroup<'_>> {
    let mut index: HashMap<(Option<String>, Money, Option<NaiveDate>), usize> = HashMap::new();
    let mut groups: Vec<DuplicateGroup<'_>> = Vec::new();

    for record in records {
        let counterparty = match key {
            GroupKey::Strict => Some(
                record
                    .counterparty_name
                    .clone()
                    .unwrap_or_else(|| "Unknown".to_string()),
            ),
            GroupKey::Soft => None,
        };
        let k = (counterparty, record.total_amount, record.txn_date);

        match index.get(&k) {
            Some(&i) => groups[i].records.push(record),
            None => {
                index.insert(k.clone(), groups.len());
                groups.push(DuplicateGroup {
                    counterparty: k.0,
                    total: k.1,
                    date: k.2,
                    records: vec![record],
                });
            }
        }
    }

    groups.retain(|g| g.records.len() > 1);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use billflow_core::{DraftError, DraftLine, TransactionId};
    use rust_decimal::Decimal;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(
        id: &str,
        who: &str,
        lines: &[i64],
        day: Option<NaiveDate>,
        doc: Option<&str>,
    ) -> TransactionRecord {
        let line_amounts: Vec<Money> = lines.iter().map(|c| Money::from_cents(*c)).collect();
        TransactionRecord {
            id: TransactionId::from(id),
            counterparty_name: Some(who.to_string()),
            total_amount: line_amounts.iter().sum(),
            txn_date: day,
            doc_number: doc.map(str::to_string),
            line_amounts,
        }
    }

    fn draft(
        who: &str,
        total_cents: i64,
        invoice_date: Option<&str>,
        number: Option<&str>,
    ) -> DraftTransaction {
        DraftTransaction {
            counterparty_display_name: who.to_string(),
            total_amount: Some(Money::from_cents(total_cents)),
            invoice_date: invoice_date.map(str::to_string),
            invoice_number: number.map(str::to_string),
            line_items: vec![DraftLine::new("Item", Money::from_cents(total_cents), Decimal::ONE)],
            ..Default::default()
        }
    }

    fn acme_b1() -> Vec<TransactionRecord> {
        vec![record("B1", "Acme", &[6_000, 4_000], Some(date(2024, 1, 15)), Some("INV-1"))]
    }

    fn matched_id(check: &DuplicateCheck<'_>) -> Option<String> {
        check.record().map(|r| r.id.0.clone())
    }

    #[test]
    fn invoice_number_match() {
        let snapshot = acme_b1();
        let d = draft("Acme", 10_000, Some("01/15/2024"), Some("INV-1"));
        let check = find_duplicate(&d, &snapshot).unwrap();
        assert_eq!(matched_id(&check), Some("B1".into()));
        assert!(matches!(
            check,
            DuplicateCheck::Duplicate { rule: DuplicateRule::InvoiceNumber, .. }
        ));
    }

    #[test]
    fn invoice_number_matches_regardless_of_other_fields() {
        let snapshot = acme_b1();
        for d in [
            draft("Someone Else", 99_900, None, Some("INV-1")),
            draft("Acme", 1, Some("12/31/2023"), Some("INV-1")),
        ] {
            assert_eq!(matched_id(&find_duplicate(&d, &snapshot).unwrap()), Some("B1".into()));
        }
    }

    #[test]
    fn composite_match_with_different_invoice_number() {
        let snapshot = acme_b1();
        let d = draft("Acme", 10_000, Some("01/15/2024"), Some("INV-2"));
        let check = find_duplicate(&d, &snapshot).unwrap();
        assert_eq!(matched_id(&check), Some("B1".into()));
        assert!(matches!(check, DuplicateCheck::Duplicate { rule: DuplicateRule::Composite, .. }));
    }

    #[test]
    fn composite_amount_tolerance_is_one_cent() {
        let snapshot = acme_b1();
        for cents in [9_999, 10_000, 10_001] {
            let d = draft("Acme", cents, Some("01/15/2024"), None);
            assert_eq!(matched_id(&find_duplicate(&d, &snapshot).unwrap()), Some("B1".into()));
        }
        let off = draft("Acme", 15_000, Some("01/15/2024"), None);
        assert_eq!(find_duplicate(&off, &snapshot).unwrap(), DuplicateCheck::None);
    }

    #[test]
    fn large_amount_difference_is_not_duplicate() {
        let snapshot = acme_b1();
        let d = draft("Acme", 50_000, Some("01/15/2024"), Some("INV-3"));
        assert_eq!(find_duplicate(&d, &snapshot).unwrap(), DuplicateCheck::None);
    }

    #[test]
    fn composite_requires_same_date() {
        let snapshot = acme_b1();
        let d = draft("Acme", 10_000, Some("01/16/2024"), None);
        assert_eq!(find_duplicate(&d, &snapshot).unwrap(), DuplicateCheck::None);
    }

    #[test]
    fn iso_draft_date_also_matches() {
        let snapshot = acme_b1();
        let d = draft("Acme", 10_000, Some("2024-01-15"), None);
        assert!(find_duplicate(&d, &snapshot).unwrap().record().is_some());
    }

    #[test]
    fn counterparty_case_insensitive_by_default() {
        let snapshot = acme_b1();
        let d = draft(" ACME ", 10_000, Some("01/15/2024"), None);
        assert!(find_duplicate(&d, &snapshot).unwrap().record().is_some());

        let strict = DuplicateDetector::new(AMOUNT_TOLERANCE, true);
        assert_eq!(strict.find_duplicate(&d, &snapshot).unwrap(), DuplicateCheck::None);
    }

    #[test]
    fn undated_draft_only_matches_undated_record() {
        let dated = acme_b1();
        let d = draft("Acme", 10_000, None, None);
        assert_eq!(find_duplicate(&d, &dated).unwrap(), DuplicateCheck::None);

        let undated = vec![record("B9", "Acme", &[10_000], None, None)];
        assert_eq!(matched_id(&find_duplicate(&d, &undated).unwrap()), Some("B9".into()));
    }

    #[test]
    fn unparseable_date_compares_raw() {
        let snapshot = acme_b1();
        let d = draft("Acme", 10_000, Some("15 Jan 2024"), None);
        assert_eq!(find_duplicate(&d, &snapshot).unwrap(), DuplicateCheck::None);
    }

    #[test]
    fn first_matching_record_wins() {
        let snapshot = vec![
            record("B1", "Acme", &[10_000], Some(date(2024, 1, 15)), None),
            record("B2", "Acme", &[10_000], Some(date(2024, 1, 15)), Some("INV-7")),
        ];
        let d = draft("Acme", 10_000, Some("01/15/2024"), Some("INV-7"));
        assert_eq!(matched_id(&find_duplicate(&d, &snapshot).unwrap()), Some("B1".into()));
    }

    #[test]
    fn blank_numbers_never_match() {
        let snapshot = vec![record("B1", "Other", &[1], None, Some(""))];
        let d = draft("Acme", 10_000, Some("01/15/2024"), Some(""));
        assert_eq!(find_duplicate(&d, &snapshot).unwrap(), DuplicateCheck::None);
    }

    #[test]
    fn rejects_draft_without_positive_total() {
        let snapshot = acme_b1();
        let mut d = draft("Acme", 10_000, None, Some("INV-1"));
        d.total_amount = None;
        assert!(matches!(
            find_duplicate(&d, &snapshot),
            Err(MatchError::InvalidDraft(DraftError::InvalidTotal(None)))
        ));
        d.total_amount = Some(Money::zero());
        assert!(find_duplicate(&d, &snapshot).is_err());
    }

    #[test]
    fn strict_groups_need_same_counterparty() {
        let day = Some(date(2024, 2, 1));
        let records = vec![
            record("1", "Acme", &[5_000], day, None),
            record("2", "Acme", &[5_000], day, None),
            record("3", "Beta", &[5_000], day, None),
            record("4", "Acme", &[7_000], day, None),
        ];
        let strict = find_duplicate_groups(&records, GroupKey::Strict);
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].counterparty.as_deref(), Some("Acme"));
        let ids: Vec<&str> = strict[0].records.iter().map(|r| r.id.0.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);

        let soft = find_duplicate_groups(&records, GroupKey::Soft);
        assert_eq!(soft.len(), 1);
        assert_eq!(soft[0].records.len(), 3);
        assert_eq!(soft[0].total, Money::from_cents(5_000));
    }

    #[test]
    fn missing_counterparty_groups_as_unknown() {
        let mut a = record("1", "x", &[100], None, None);
        let mut b = record("2", "y", &[100], None, None);
        a.counterparty_name = None;
        b.counterparty_name = None;
        let txns = [a, b];
        let groups = find_duplicate_groups(&txns, GroupKey::Strict);
        assert_eq!(groups[0].counterparty.as_deref(), Some("Unknown"));
    }
}
