use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Vendor,
    Customer,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Vendor => write!(f, "vendor"),
            EntityKind::Customer => write!(f, "customer"),
        }
    }
}

/// A vendor or customer record owned by the external ledger.
///
/// `display_name` is the matching key; it is not guaranteed unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub display_name: String,
    #[serde(default)]
    pub company_name: Option<String>,
    /// Billing address first, then shipping, when the ledger has them.
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl Entity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Entity {
            id: EntityId(id.into()),
            display_name: display_name.into(),
            company_name: None,
            addresses: Vec::new(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(address.into());
        self
    }

    pub fn to_ref(&self) -> EntityRef {
        EntityRef {
            id: self.id.clone(),
            name: self.display_name.clone(),
        }
    }
}

/// The `(id, name)` pair a ledger transaction points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: EntityId,
    pub name: String,
}

/// The incoming name to resolve against an entity registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub display_name: String,
    pub company_name: Option<String>,
}

impl CandidateRecord {
    pub fn new(display_name: impl Into<String>) -> Self {
        CandidateRecord {
            display_name: display_name.into(),
            company_name: None,
        }
    }

    pub fn with_company(mut self, company_name: impl Into<String>) -> Self {
        self.company_name = Some(company_name.into());
        self
    }

    pub fn is_well_formed(&self) -> bool {
        !self.display_name.trim().is_empty()
    }
}

/// Fields the ledger needs to create an entity that did not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntity {
    pub display_name: String,
    pub company_name: Option<String>,
}

impl From<&CandidateRecord> for NewEntity {
    fn from(candidate: &CandidateRecord) -> Self {
        NewEntity {
            display_name: candidate.display_name.clone(),
            company_name: candidate.company_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_candidate_is_malformed() {
        assert!(!CandidateRecord::new("   ").is_well_formed());
        assert!(CandidateRecord::new("Acme").is_well_formed());
    }

    #[test]
    fn new_entity_carries_company() {
        let candidate = CandidateRecord::new("ABC Supply").with_company("ABC Supply Co LLC");
        let new = NewEntity::from(&candidate);
        assert_eq!(new.display_name, "ABC Supply");
        assert_eq!(new.company_name.as_deref(), Some("ABC Supply Co LLC"));
    }

    #[test]
    fn entity_deserializes_without_optional_fields() {
        let e: Entity = serde_json::from_str(r#"{"id":"V1","display_name":"Acme"}"#).unwrap();
        assert_eq!(e.id, EntityId::from("V1"));
        assert!(e.addresses.is_empty());
        assert_eq!(e.to_ref().name, "Acme");
    }
}
