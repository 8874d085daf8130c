use billflow_core::{AccountId, DEFAULT_CATEGORY_ACCOUNTS, DEFAULT_EXPENSE_ACCOUNT};
use serde::{Deserialize, Serialize};

use crate::MatchError;

/// One keyword → account entry of the routing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRoute {
    pub keyword: String,
    pub account: AccountId,
}

#[derive(Debug, Deserialize)]
struct RouteTable {
    #[serde(default)]
    categories: Vec<CategoryRoute>,
}

/// Maps free-text expense categories to expense accounts.
///
/// Lookup is exact first, then the first keyword (in table order) that
/// contains the input or is contained by it, then the default account.
pub struct CategoryRouter {
    routes: Vec<CategoryRoute>,
    default_account: AccountId,
}

impl CategoryRouter {
    pub fn new(routes: Vec<CategoryRoute>, default_account: AccountId) -> Self {
        let routes = routes
            .into_iter()
            .map(|r| CategoryRoute {
                keyword: r.keyword.trim().to_lowercase(),
                account: r.account,
            })
            .filter(|r| !r.keyword.is_empty())
            .collect();
        Self { routes, default_account }
    }

    /// The built-in landscaping/contracting table.
    pub fn with_default_table(default_account: AccountId) -> Self {
        let routes = DEFAULT_CATEGORY_ACCOUNTS
            .iter()
            .map(|(keyword, account)| CategoryRoute {
                keyword: keyword.to_string(),
                account: AccountId::from(*account),
            })
            .collect();
        Self::new(routes, default_account)
    }

    /// Reads `[[categories]]` entries with `keyword` and `account` keys.
    pub fn from_toml(toml_content: &str, default_account: AccountId) -> Result<Self, MatchError> {
        let table: RouteTable = toml::from_str(toml_content)?;
        Ok(Self::new(table.categories, default_account))
    }

    pub fn default_account(&self) -> &AccountId {
        &self.default_account
    }

    pub fn routes(&self) -> &[CategoryRoute] {
        &self.routes
    }

    /// Always returns an account; unknown or blank categories get the default.
    pub fn route(&self, category: Option<&str>) -> &AccountId {
        let Some(normalized) = category.map(|c| c.trim().to_lowercase()).filter(|c| !c.is_empty())
        else {
            return &self.default_account;
        };

        if let Some(route) = self.routes.iter().find(|r| r.keyword == normalized) {
            return &route.account;
        }

        if let Some(route) = self.routes.iter().find(|r| {
            normalized.contains(r.keyword.as_str()) || r.keyword.contains(normalized.as_str())
        }) {
            tracing::debug!(
                category = %normalized,
                account = %route.account,
                "category partially matched"
            );
            return &route.account;
        }

        tracing::debug!(category = %normalized, "no category match, using default account");
        &self.default_account
    }
}

impl Default for CategoryRouter {
    fn default() -> Self {
        Self::with_default_table(AccountId::from(DEFAULT_EXPENSE_ACCOUNT))
    }
}
