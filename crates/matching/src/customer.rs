use billflow_core::Entity;

use crate::similarity::similarity_ratio;

/// Finds the customer an invoice's job site belongs to.
pub struct CustomerMatcher {
    /// Address-to-name fuzzy score must be strictly greater than this.
    pub threshold: f64,
}

impl Default for CustomerMatcher {
    fn default() -> Self {
        Self { threshold: 0.7 }
    }
}

impl CustomerMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// A model-supplied customer name is trusted and looked up verbatim; only
    /// when it is absent does the job-site address drive the search.
    pub fn resolve<'a>(
        &self,
        customer_name: Option<&str>,
        job_site_address: Option<&str>,
        customers: &'a [Entity],
    ) -> Option<&'a Entity> {
        if let Some(name) = customer_name.filter(|n| !n.trim().is_empty()) {
            let found = customers.iter().find(|c| c.display_name == name);
            if found.is_none() {
                tracing::warn!(customer = name, "matched customer not found in ledger");
            }
            return found;
        }

        let address = job_site_address.map(str::trim).filter(|a| !a.is_empty())?;
        self.by_address(address, customers)
    }

    fn by_address<'a>(&self, address: &str, customers: &'a [Entity]) -> Option<&'a Entity> {
        let address = address.to_lowercase();

        for customer in customers {
            for known in &customer.addresses {
                let known = known.trim().to_lowercase();
                if known.is_empty() {
                    continue;
                }
                if known.contains(&address) || address.contains(&known) {
                    tracing::debug!(
                        customer = %customer.display_name,
                        "customer matched by address"
                    );
                    return Some(customer);
                }
            }
        }

        let mut best = None;
        let mut best_score = self.threshold;
        for customer in customers {
            let score = similarity_ratio(&address, &customer.display_name.to_lowercase());
            if score > best_score {
                best_score = score;
                best = Some(customer);
            }
        }

        match best {
            Some(c) => tracing::debug!(
                customer = %c.display_name,
                score = best_score,
                "customer fuzzy matched"
            ),
            None => tracing::debug!(address = %address, "no customer match for address"),
        }
        best
    }
}

/// Prompt context listing every customer that has at least one address, as
/// `- Name: addr1 | addr2` lines.
pub fn customers_context(customers: &[Entity]) -> Option<String> {
    let lines: Vec<String> = customers
        .iter()
        .filter_map(|c| {
            let mut addresses: Vec<&str> = Vec::new();
            for a in c.addresses.iter().map(|a| a.trim()).filter(|a| !a.is_empty()) {
                if !addresses.contains(&a) {
                    addresses.push(a);
                }
            }
            if addresses.is_empty() {
                None
            } else {
                Some(format!("- {}: {}", c.display_name, addresses.join(" | ")))
            }
        })
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}
