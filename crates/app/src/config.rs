use std::path::{Path, PathBuf};

use billflow_connectors::{
    OAuthCredentials, OpenAiSettings, DEFAULT_PROCESSED_LABEL, OPENAI_API_BASE,
};
use billflow_core::{AccountId, Money, AMOUNT_TOLERANCE, DEFAULT_EXPENSE_ACCOUNT};
use billflow_intake::{PipelineOptions, Resolvers};
use billflow_matching::{
    CategoryRoute, CategoryRouter, CustomerMatcher, DuplicateDetector, NameMatcher,
};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Missing setting {0}")]
    Missing(&'static str),
    #[error("Could not determine the platform config directory")]
    NoConfigDir,
}

// ── Sections ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GmailSection {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    /// Label marking handled messages.
    pub label: String,
    pub token_file: Option<PathBuf>,
}

impl Default for GmailSection {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            refresh_token: None,
            label: DEFAULT_PROCESSED_LABEL.to_string(),
            token_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiSection {
    pub api_key: Option<String>,
    pub base_url: String,
    pub classify_model: String,
    pub extract_model: String,
}

impl Default for OpenAiSection {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: OPENAI_API_BASE.to_string(),
            classify_model: "gpt-4o-2024-08-06".to_string(),
            extract_model: "gpt-5".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QuickBooksSection {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub realm_id: Option<String>,
    pub sandbox: bool,
    pub token_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub max_results: usize,
    pub post_receipts: bool,
    pub attachments_dir: Option<PathBuf>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        let defaults = PipelineOptions::default();
        Self {
            max_results: defaults.max_results,
            post_receipts: defaults.post_receipts,
            attachments_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingSection {
    pub vendor_threshold: f64,
    pub customer_threshold: f64,
    pub amount_tolerance: Money,
    pub case_sensitive_names: bool,
}

impl Default for MatchingSection {
    fn default() -> Self {
        Self {
            vendor_threshold: NameMatcher::default().threshold,
            customer_threshold: CustomerMatcher::default().threshold,
            amount_tolerance: AMOUNT_TOLERANCE,
            case_sensitive_names: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    pub default_account: String,
    /// Replaces the built-in table when non-empty.
    pub categories: Vec<CategoryRoute>,
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self { default_account: DEFAULT_EXPENSE_ACCOUNT.to_string(), categories: Vec::new() }
    }
}

// ── Settings ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub gmail: GmailSection,
    pub openai: OpenAiSection,
    pub quickbooks: QuickBooksSection,
    pub pipeline: PipelineSection,
    pub matching: MatchingSection,
    pub routing: RoutingSection,
}

/// `<platform config dir>/billflow/config.toml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    directories::ProjectDirs::from("", "", "billflow")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Attachment store and rotated token files live here unless configured.
pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
    directories::ProjectDirs::from("", "", "billflow")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(ConfigError::NoConfigDir)
}

fn set_from(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut Option<String>) {
    if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
        *target = Some(value);
    }
}

fn require(value: &Option<String>, name: &'static str) -> Result<String, ConfigError> {
    value.clone().filter(|v| !v.trim().is_empty()).ok_or(ConfigError::Missing(name))
}

/// Keeps the first four characters of a secret.
pub fn mask(secret: &str) -> String {
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{}****", secret.chars().take(4).collect::<String>())
    }
}

impl Settings {
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Reads the config file and applies process environment overrides. An
    /// explicit path must exist; a missing default file means defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => (default_config_path()?, false),
        };

        let mut settings = if required || path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|source| ConfigError::Io { path: path.clone(), source })?;
            tracing::debug!(path = %path.display(), "loaded config");
            Self::from_toml(&content, &path)?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Secrets and the fallback account may come from the environment.
    /// Blank values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if lookup("ENVIRONMENT").is_some_and(|e| e.trim().eq_ignore_ascii_case("sandbox")) {
            self.quickbooks.sandbox = true;
        }
        let qb = &mut self.quickbooks;
        if qb.sandbox {
            set_from(&lookup, "SAND_CLIENT_ID", &mut qb.client_id);
            set_from(&lookup, "SAND_CLIENT_SECRET", &mut qb.client_secret);
        } else {
            set_from(&lookup, "CLIENT_ID", &mut qb.client_id);
            set_from(&lookup, "CLIENT_SECRET", &mut qb.client_secret);
        }
        set_from(&lookup, "REFRESH_TOKEN", &mut qb.refresh_token);
        set_from(&lookup, "QB_REALM_ID", &mut qb.realm_id);

        let mut account = None;
        set_from(&lookup, "QB_EXPENSE_ACCOUNT_ID", &mut account);
        if let Some(account) = account {
            self.routing.default_account = account;
        }

        set_from(&lookup, "OPENAI_API_KEY", &mut self.openai.api_key);
        set_from(&lookup, "GMAIL_CLIENT_ID", &mut self.gmail.client_id);
        set_from(&lookup, "GMAIL_CLIENT_SECRET", &mut self.gmail.client_secret);
        set_from(&lookup, "GMAIL_REFRESH_TOKEN", &mut self.gmail.refresh_token);
    }

    pub fn quickbooks_credentials(&self) -> Result<OAuthCredentials, ConfigError> {
        Ok(OAuthCredentials {
            client_id: require(&self.quickbooks.client_id, "quickbooks.client_id")?,
            client_secret: require(&self.quickbooks.client_secret, "quickbooks.client_secret")?,
            refresh_token: require(&self.quickbooks.refresh_token, "quickbooks.refresh_token")?,
        })
    }

    pub fn realm_id(&self) -> Result<String, ConfigError> {
        require(&self.quickbooks.realm_id, "quickbooks.realm_id")
    }

    pub fn gmail_credentials(&self) -> Result<OAuthCredentials, ConfigError> {
        Ok(OAuthCredentials {
            client_id: require(&self.gmail.client_id, "gmail.client_id")?,
            client_secret: require(&self.gmail.client_secret, "gmail.client_secret")?,
            refresh_token: require(&self.gmail.refresh_token, "gmail.refresh_token")?,
        })
    }

    pub fn openai_settings(&self) -> Result<OpenAiSettings, ConfigError> {
        Ok(OpenAiSettings {
            api_key: require(&self.openai.api_key, "openai.api_key")?,
            base_url: self.openai.base_url.clone(),
            classify_model: self.openai.classify_model.clone(),
            extract_model: self.openai.extract_model.clone(),
        })
    }

    pub fn default_account(&self) -> AccountId {
        AccountId::new(self.routing.default_account.trim())
    }

    pub fn category_router(&self) -> CategoryRouter {
        if self.routing.categories.is_empty() {
            CategoryRouter::with_default_table(self.default_account())
        } else {
            CategoryRouter::new(self.routing.categories.clone(), self.default_account())
        }
    }

    pub fn resolvers(&self) -> Resolvers {
        Resolvers {
            vendors: NameMatcher::new(self.matching.vendor_threshold),
            customers: CustomerMatcher::new(self.matching.customer_threshold),
            duplicates: DuplicateDetector::new(
                self.matching.amount_tolerance,
                self.matching.case_sensitive_names,
            ),
            categories: self.category_router(),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            max_results: self.pipeline.max_results,
            post_receipts: self.pipeline.post_receipts,
        }
    }

    /// One row per setting `run` needs: name and masked value when present.
    pub fn required_settings(&self) -> Vec<(&'static str, Option<String>)> {
        let secret = |v: &Option<String>| v.as_deref().filter(|s| !s.trim().is_empty()).map(mask);
        let plain = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        vec![
            ("quickbooks.client_id", secret(&self.quickbooks.client_id)),
            ("quickbooks.client_secret", secret(&self.quickbooks.client_secret)),
            ("quickbooks.refresh_token", secret(&self.quickbooks.refresh_token)),
            ("quickbooks.realm_id", plain(&self.quickbooks.realm_id)),
            ("openai.api_key", secret(&self.openai.api_key)),
            ("gmail.client_id", secret(&self.gmail.client_id)),
            ("gmail.client_secret", secret(&self.gmail.client_secret)),
            ("gmail.refresh_token", secret(&self.gmail.refresh_token)),
        ]
    }
}
