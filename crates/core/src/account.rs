use serde::{Deserialize, Serialize};
use std::fmt;

/// An account identifier as issued by the external ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        AccountId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        AccountId(s.to_string())
    }
}

/// Uncategorized expense account used when nothing else applies.
pub const DEFAULT_EXPENSE_ACCOUNT: &str = "31";

/// Category keyword → expense account, in lookup order.
pub const DEFAULT_CATEGORY_ACCOUNTS: &[(&str, &str)] = &[
    ("materials", "63"), // Job Materials
    ("labor", "59"), // Cost of Labor
    ("equipment", "29"), // Equipment Rental
    ("fuel", "56"), // Fuel
    ("permits", "68"), // Permits
    ("supplies", "20"), // Supplies
    ("disposal", "28"), // Disposal Fees
    ("plants", "66"), // Plants and Soil
    ("soil", "66"), // Plants and Soil
    ("sprinklers", "67"), // Sprinklers and Drip Systems
    ("repairs", "75"), // Equipment Repairs
    ("telephone", "77"), // Telephone
    ("utilities", "24"), // Utilities
    ("gas", "76"), // Gas and Electric
    ("electric", "76"), // Gas and Electric
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    Bank,
    CreditCard,
    Expense,
    Other,
}

impl AccountType {
    /// Maps the ledger's account type label.
    pub fn from_ledger_label(label: &str) -> Self {
        match label {
            "Bank" => AccountType::Bank,
            "Credit Card" => AccountType::CreditCard,
            "Expense" | "Cost of Goods Sold" => AccountType::Expense,
            _ => AccountType::Other,
        }
    }

    /// Whether a purchase can be paid out of this account.
    pub fn can_pay(self) -> bool {
        matches!(self, AccountType::Bank | AccountType::CreditCard)
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountType::Bank => write!(f, "Bank"),
            AccountType::CreditCard => write!(f, "Credit Card"),
            AccountType::Expense => write!(f, "Expense"),
            AccountType::Other => write!(f, "Other"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerAccount {
    pub id: AccountId,
    pub name: String,
    pub account_type: AccountType,
}

/// First account that can fund a purchase, in registry order.
pub fn payment_account(accounts: &[LedgerAccount]) -> Option<&LedgerAccount> {
    accounts.iter().find(|a| a.account_type.can_pay())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str, label: &str) -> LedgerAccount {
        LedgerAccount {
            id: AccountId::new(id),
            name: format!("{label} account"),
            account_type: AccountType::from_ledger_label(label),
        }
    }

    #[test]
    fn ledger_labels_map_to_types() {
        assert_eq!(AccountType::from_ledger_label("Bank"), AccountType::Bank);
        assert_eq!(AccountType::from_ledger_label("Credit Card"), AccountType::CreditCard);
        assert_eq!(AccountType::from_ledger_label("Equity"), AccountType::Other);
    }

    #[test]
    fn payment_account_skips_expense_accounts() {
        let accounts = vec![
            account("7", "Expense"),
            account("35", "Credit Card"),
            account("1", "Bank"),
        ];
        assert_eq!(payment_account(&accounts).unwrap().id.as_str(), "35");
    }

    #[test]
    fn payment_account_none_without_bank() {
        assert!(payment_account(&[account("7", "Expense")]).is_none());
    }

    #[test]
    fn default_table_has_shared_accounts() {
        let lookup = |k: &str| {
            DEFAULT_CATEGORY_ACCOUNTS
                .iter()
                .find(|(key, _)| *key == k)
                .map(|(_, v)| *v)
        };
        assert_eq!(lookup("plants"), lookup("soil"));
        assert_eq!(lookup("gas"), Some("76"));
        assert_eq!(DEFAULT_CATEGORY_ACCOUNTS.len(), 15);
    }

    #[test]
    fn default_table_keywords_are_unique_and_lowercase() {
        for (i, (keyword, account)) in DEFAULT_CATEGORY_ACCOUNTS.iter().enumerate() {
            assert_eq!(*keyword, keyword.to_lowercase());
            assert!(!account.is_empty());
            let rest = &DEFAULT_CATEGORY_ACCOUNTS[i + 1..];
            assert!(rest.iter().all(|(k, _)| k != keyword), "{keyword}");
        }
    }
}
