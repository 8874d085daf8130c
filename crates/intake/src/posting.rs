use billflow_core::{
    parse_invoice_date, AccountId, DraftLine, DraftTransaction, EntityRef, Money, TransactionKind,
};
use billflow_matching::CategoryRouter;
use chrono::NaiveDate;
use serde::Serialize;

/// One account-based expense line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostingLine {
    pub amount: Money,
    pub account: AccountId,
    pub description: String,
    pub customer: Option<EntityRef>,
}

/// A bill or purchase ready to be sent to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub counterparty: EntityRef,
    pub txn_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub doc_number: Option<String>,
    pub memo: Option<String>,
    /// Funding account; set for purchases only.
    pub payment_account: Option<AccountId>,
    pub lines: Vec<PostingLine>,
}

impl NewTransaction {
    pub fn total(&self) -> Money {
        self.lines.iter().map(|l| l.amount).sum()
    }
}

/// Resolved references the draft is posted against.
pub struct PostingTargets<'a> {
    pub counterparty: EntityRef,
    pub customer: Option<EntityRef>,
    pub payment_account: Option<AccountId>,
    pub router: &'a CategoryRouter,
    pub today: NaiveDate,
}

pub fn line_description(line: &DraftLine) -> String {
    format!("{} - Qty: {} @{}", line.item_name, line.quantity.normalize(), line.unit_rate)
}

/// Builds the ledger payload for a validated draft. Each line lands on its
/// routed category account; tax goes on the default account. Bills leave an
/// unreadable invoice date to the ledger, purchases fall back to `today`.
pub fn build_transaction(
    kind: TransactionKind,
    draft: &DraftTransaction,
    targets: PostingTargets<'_>,
) -> NewTransaction {
    let mut lines: Vec<PostingLine> = draft
        .line_items
        .iter()
        .map(|line| PostingLine {
            amount: line.amount(),
            account: targets.router.route(line.category.as_deref()).clone(),
            description: line_description(line),
            customer: targets.customer.clone(),
        })
        .collect();

    if let Some(tax) = draft.tax.filter(|t| t.is_positive()) {
        lines.push(PostingLine {
            amount: tax,
            account: targets.router.default_account().clone(),
            description: "Tax".to_string(),
            customer: targets.customer.clone(),
        });
    }

    let txn_date = draft.invoice_date.as_deref().and_then(parse_invoice_date);
    let txn_date = match kind {
        TransactionKind::Bill => txn_date,
        TransactionKind::Purchase => Some(txn_date.unwrap_or(targets.today)),
    };

    NewTransaction {
        kind,
        counterparty: targets.counterparty,
        txn_date,
        due_date: draft.due_date.as_deref().and_then(parse_invoice_date),
        doc_number: draft.invoice_number.clone(),
        memo: draft.memo.clone(),
        payment_account: match kind {
            TransactionKind::Bill => None,
            TransactionKind::Purchase => targets.payment_account,
        },
        lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billflow_core::EntityId;
    use rust_decimal::Decimal;

    fn vendor() -> EntityRef {
        EntityRef { id: EntityId::from("V1"), name: "ABC Supply Co".into() }
    }

    fn draft() -> DraftTransaction {
        DraftTransaction {
            counterparty_display_name: "ABC Supply Co".into(),
            total_amount: Some(Money::from_cents(9325)),
            invoice_date: Some("03/15/2025".into()),
            due_date: Some("04/14/2025".into()),
            invoice_number: Some("INV-1042".into()),
            line_items: vec![
                DraftLine::new("Mulch", Money::from_cents(1250), Decimal::from(4))
                    .with_category("Materials"),
                DraftLine::new("Delivery", Money::from_cents(4000), Decimal::ONE),
            ],
            tax: Some(Money::from_cents(325)),
            ..Default::default()
        }
    }

    fn targets(router: &CategoryRouter) -> PostingTargets<'_> {
        PostingTargets {
            counterparty: vendor(),
            customer: None,
            payment_account: Some(AccountId::from("35")),
            router,
            today: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        }
    }

    #[test]
    fn bill_lines_routes_and_tax() {
        let router = CategoryRouter::default();
        let tx = build_transaction(TransactionKind::Bill, &draft(), targets(&router));

        assert_eq!(tx.lines.len(), 3);
        assert_eq!(tx.lines[0].amount, Money::from_cents(5000));
        assert_eq!(tx.lines[0].account.as_str(), "63");
        assert_eq!(tx.lines[0].description, "Mulch - Qty: 4 @$12.50");
        assert_eq!(tx.lines[1].account.as_str(), "31");
        assert_eq!(tx.lines[2].description, "Tax");
        assert_eq!(tx.lines[2].account.as_str(), "31");
        assert_eq!(tx.total(), Money::from_cents(9325));
        assert_eq!(tx.txn_date, NaiveDate::from_ymd_opt(2025, 3, 15));
        assert_eq!(tx.due_date, NaiveDate::from_ymd_opt(2025, 4, 14));
        assert_eq!(tx.payment_account, None);
    }

    #[test]
    fn customer_is_set_on_every_line() {
        let router = CategoryRouter::default();
        let customer = EntityRef { id: EntityId::from("C1"), name: "Smith Residence".into() };
        let tx = build_transaction(
            TransactionKind::Bill,
            &draft(),
            PostingTargets { customer: Some(customer.clone()), ..targets(&router) },
        );
        assert!(tx.lines.iter().all(|l| l.customer.as_ref() == Some(&customer)));
    }

    #[test]
    fn purchase_uses_payment_account_and_today_fallback() {
        let router = CategoryRouter::default();
        let mut receipt = draft();
        receipt.is_receipt = true;
        receipt.invoice_date = Some("sometime in March".into());
        receipt.tax = Some(Money::zero());

        let tx = build_transaction(TransactionKind::Purchase, &receipt, targets(&router));
        assert_eq!(tx.payment_account, Some(AccountId::from("35")));
        assert_eq!(tx.txn_date, NaiveDate::from_ymd_opt(2025, 6, 1));
        assert_eq!(tx.lines.len(), 2);
    }

    #[test]
    fn bill_with_unreadable_date_leaves_it_unset() {
        let router = CategoryRouter::default();
        let mut bill = draft();
        bill.invoice_date = Some("n/a".into());
        let transaction = build_transaction(TransactionKind::Bill, &bill, targets(&router));
        assert_eq!(transaction.txn_date, None);
    }
}
