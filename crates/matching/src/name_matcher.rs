use billflow_core::{CandidateRecord, Entity, NewEntity};

use crate::similarity::similarity_ratio;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NameMatch {
    Exact,
    Fuzzy { score: f64 },
}

/// Outcome of resolving a display name against an entity registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<'a> {
    Existing { entity: &'a Entity, via: NameMatch },
    /// Nothing matched; the caller creates the entity and uses the id the
    /// ledger assigns.
    Create(NewEntity),
}

impl<'a> Resolution<'a> {
    pub fn existing(&self) -> Option<&'a Entity> {
        match self {
            Resolution::Existing { entity, .. } => Some(entity),
            Resolution::Create(_) => None,
        }
    }
}

pub struct NameMatcher {
    /// A fuzzy score must be strictly greater than this to count.
    pub threshold: f64,
}

impl Default for NameMatcher {
    fn default() -> Self {
        Self { threshold: 0.8 }
    }
}

impl NameMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Exact (trimmed, case-insensitive) first, then the single best fuzzy
    /// score above the threshold, else a creation instruction. Ties go to the
    /// entity seen first.
    ///
    /// `candidate.display_name` must not be blank; callers validate upstream.
    pub fn resolve<'a>(
        &self,
        candidate: &CandidateRecord,
        registry: &'a [Entity],
    ) -> Resolution<'a> {
        debug_assert!(candidate.is_well_formed(), "blank candidate name");

        if let Some(entity) = find_exact(&candidate.display_name, registry) {
            tracing::debug!(name = %candidate.display_name, id = %entity.id, "exact entity match");
            return Resolution::Existing { entity, via: NameMatch::Exact };
        }

        if let Some((entity, score)) = self.best_fuzzy(&candidate.display_name, registry) {
            tracing::debug!(
                name = %candidate.display_name,
                matched = %entity.display_name,
                score,
                "fuzzy entity match"
            );
            return Resolution::Existing { entity, via: NameMatch::Fuzzy { score } };
        }

        tracing::debug!(name = %candidate.display_name, "no entity match, creating");
        Resolution::Create(NewEntity::from(candidate))
    }

    /// Highest-scoring entity strictly above the threshold.
    pub fn best_fuzzy<'a>(&self, name: &str, registry: &'a [Entity]) -> Option<(&'a Entity, f64)> {
        let name = name.to_lowercase();
        let mut best: Option<(&'a Entity, f64)> = None;
        let mut best_score = self.threshold;

        for entity in registry {
            let score = similarity_ratio(&name, &entity.display_name.to_lowercase());
            if score > best_score {
                best_score = score;
                best = Some((entity, score));
            }
        }

        best
    }
}

fn find_exact<'a>(name: &str, registry: &'a [Entity]) -> Option<&'a Entity> {
    let key = name.trim().to_lowercase();
    registry
        .iter()
        .find(|e| e.display_name.trim().to_lowercase() == key)
}

/// Resolves a vendor or customer name with the default 0.8 threshold.
pub fn resolve_entity<'a>(
    display_name: &str,
    company_name: Option<&str>,
    registry: &'a [Entity],
) -> Resolution<'a> {
    let mut candidate = CandidateRecord::new(display_name);
    candidate.company_name = company_name.map(str::to_string);
    NameMatcher::default().resolve(&candidate, registry)
}
