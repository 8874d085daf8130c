//! Identity resolution, duplicate detection and category routing.
//!
//! Every function here is a pure decision over a snapshot the caller fetched;
//! nothing in this crate talks to the ledger.

pub mod category;
pub mod customer;
pub mod duplicates;
pub mod name_matcher;
pub(crate) mod similarity;

use thiserror::Error;

pub use category::{CategoryRoute, CategoryRouter};
pub use customer::{customers_context, CustomerMatcher};
pub use duplicates::{
    find_duplicate, find_duplicate_groups, DuplicateCheck, DuplicateDetector, DuplicateGroup,
    DuplicateRule, GroupKey,
};
pub use name_matcher::{resolve_entity, NameMatch, NameMatcher, Resolution};
pub use similarity::similarity_ratio;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Invalid draft: {0}")]
    InvalidDraft(#[from] billflow_core::DraftError),
    #[error("Invalid category table: {0}")]
    InvalidRoutes(#[from] toml::de::Error),
}

