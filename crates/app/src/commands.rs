use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use billflow_connectors::{
    load_refresh_token, ClientAuth, GmailClient, OAuthCredentials, OpenAiModel, PopplerPdf,
    QuickBooksClient, RefreshingToken, GOOGLE_TOKEN_URL, QBO_TOKEN_URL,
};
use billflow_core::TransactionKind;
use billflow_intake::{
    AttachmentStore, MessageOutcome, Pipeline, PipelineError, TransactionRegistry,
};
use billflow_matching::{find_duplicate_groups, DuplicateGroup, DuplicateRule, GroupKey};

use crate::config::{default_data_dir, Settings};

// ── Client construction ─────────────────────────────────────────────

fn data_dir() -> Result<PathBuf> {
    let dir = default_data_dir()?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
    Ok(dir)
}

/// A refresh token rotated by an earlier run supersedes the configured one.
fn with_stored_refresh(
    mut credentials: OAuthCredentials,
    token_file: &Path,
) -> Result<OAuthCredentials> {
    if let Some(stored) = load_refresh_token(token_file)? {
        tracing::debug!(file = %token_file.display(), "using stored refresh token");
        credentials.refresh_token = stored;
    }
    Ok(credentials)
}

/// Token files need somewhere to live even when credentials come from env.
fn token_file(configured: &Option<PathBuf>, name: &str) -> Result<PathBuf> {
    match configured {
        Some(path) => Ok(path.clone()),
        None => Ok(data_dir()?.join(name)),
    }
}

fn quickbooks(settings: &Settings) -> Result<QuickBooksClient> {
    let token_file = token_file(&settings.quickbooks.token_file, "quickbooks_token.json")?;
    let credentials = with_stored_refresh(settings.quickbooks_credentials()?, &token_file)?;
    let token = RefreshingToken::new("QuickBooks", QBO_TOKEN_URL, ClientAuth::Basic, credentials)?
        .with_token_file(token_file);
    let client = QuickBooksClient::new(token, settings.realm_id()?, settings.quickbooks.sandbox)?;
    Ok(client)
}

fn gmail(settings: &Settings) -> Result<GmailClient> {
    let token_file = token_file(&settings.gmail.token_file, "gmail_token.json")?;
    let credentials = with_stored_refresh(settings.gmail_credentials()?, &token_file)?;
    let token = RefreshingToken::new("Google", GOOGLE_TOKEN_URL, ClientAuth::Form, credentials)?
        .with_token_file(token_file);
    Ok(GmailClient::new(token, settings.gmail.label.clone())?)
}

// ── Commands ────────────────────────────────────────────────────────

pub async fn run(settings: &Settings) -> Result<()> {
    let attachments_dir = match &settings.pipeline.attachments_dir {
        Some(dir) => dir.clone(),
        None => data_dir()?.join("attachments"),
    };

    let pipeline = Pipeline::new(
        gmail(settings).context("Failed to set up Gmail")?,
        OpenAiModel::new(settings.openai_settings()?)?,
        PopplerPdf::new(),
        quickbooks(settings).context("Failed to set up QuickBooks")?,
        AttachmentStore::new(attachments_dir),
    )
    .with_resolvers(settings.resolvers())
    .with_options(settings.pipeline_options());

    let report = pipeline.run().await.context("Pipeline run failed")?;
    for message in &report.messages {
        println!(
            "{}  {}  {}",
            message.message_id,
            message.subject,
            describe_outcome(&message.outcome)
        );
    }
    println!(
        "{} messages: {} posted, {} duplicates, {} failed",
        report.messages.len(),
        report.posted(),
        report.duplicates(),
        report.failed()
    );
    Ok(())
}

pub async fn audit(settings: &Settings) -> Result<()> {
    let ledger = quickbooks(settings).context("Failed to set up QuickBooks")?;

    for kind in [TransactionKind::Bill, TransactionKind::Purchase] {
        let records = ledger
            .list_transactions(kind)
            .await
            .with_context(|| format!("Failed to list {kind} records"))?;
        println!("{kind}: {} records", records.len());

        for key in [GroupKey::Strict, GroupKey::Soft] {
            let groups = find_duplicate_groups(&records, key);
            if groups.is_empty() {
                println!("  no {} duplicates", key_label(key));
            }
            for group in &groups {
                println!("{}", format_group(key, group));
            }
        }
    }
    Ok(())
}

pub fn route(settings: &Settings, category: &str) {
    let router = settings.category_router();
    println!("{}", router.route(Some(category)));
}

pub fn check_config(settings: &Settings) -> Result<()> {
    let mut missing = 0;
    for (name, value) in settings.required_settings() {
        match value {
            Some(v) => println!("  ok       {name} = {v}"),
            None => {
                missing += 1;
                println!("  missing  {name}");
            }
        }
    }
    let env = if settings.quickbooks.sandbox { "sandbox" } else { "production" };
    println!("QuickBooks environment: {env}");
    println!("Default expense account: {}", settings.default_account());
    println!("Processed label: {}", settings.gmail.label);

    if missing > 0 {
        anyhow::bail!("{missing} required settings missing");
    }
    Ok(())
}

// ── Formatting ──────────────────────────────────────────────────────

fn rule_label(rule: DuplicateRule) -> &'static str {
    match rule {
        DuplicateRule::InvoiceNumber => "invoice number",
        DuplicateRule::Composite => "vendor, date and amount",
    }
}

fn key_label(key: GroupKey) -> &'static str {
    match key {
        GroupKey::Strict => "strict",
        GroupKey::Soft => "soft",
    }
}

pub fn describe_outcome(outcome: &std::result::Result<MessageOutcome, PipelineError>) -> String {
    match outcome {
        Ok(MessageOutcome::NotInvoice) => "not an invoice".to_string(),
        Ok(MessageOutcome::NoAttachment) => "invoice without attachment".to_string(),
        Ok(MessageOutcome::Unsupported { filename }) => {
            format!("unsupported attachment {filename}")
        }
        Ok(MessageOutcome::Rejected(e)) => format!("rejected: {e}"),
        Ok(MessageOutcome::SkippedReceipt) => "receipt skipped".to_string(),
        Ok(MessageOutcome::Duplicate { kind, id, rule }) => {
            format!("duplicate of {kind} {id} ({})", rule_label(*rule))
        }
        Ok(MessageOutcome::Posted { kind, id, counterparty, created_counterparty, total }) => {
            let created = if *created_counterparty { " (new vendor)" } else { "" };
            format!("posted {kind} {id} for {}{created}, {total}", counterparty.name)
        }
        Err(e) => format!("failed: {e}"),
    }
}

pub fn format_group(key: GroupKey, group: &DuplicateGroup<'_>) -> String {
    let date = group
        .date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "no date".into());
    let ids: Vec<String> = group.records.iter().map(|r| r.id.to_string()).collect();
    let (label, total, ids) = (key_label(key), group.total, ids.join(", "));
    match &group.counterparty {
        Some(name) => format!("  {label} {name} {total} {date}: {ids}"),
        None => format!("  {label} {total} {date}: {ids}"),
    }
}
