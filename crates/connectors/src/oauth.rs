use std::path::{Path, PathBuf};

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::ConnectorError;
use crate::http::build_http;

/// Access tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// How the client credentials travel in a refresh-token grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// HTTP basic auth header (Intuit).
    Basic,
    /// `client_id`/`client_secret` form fields (Google).
    Form,
}

#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Present when the provider rotated the refresh token.
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Reads a refresh-token grant response.
pub fn parse_token_response(
    body: &Value,
    now: DateTime<Utc>,
) -> Result<TokenGrant, ConnectorError> {
    let access_token = body["access_token"]
        .as_str()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ConnectorError::TokenRefresh("response missing access_token".into()))?;
    let expires_in = body["expires_in"].as_i64().unwrap_or(3600);

    Ok(TokenGrant {
        access_token: access_token.to_string(),
        refresh_token: body["refresh_token"].as_str().filter(|t| !t.is_empty()).map(str::to_string),
        expires_at: now + Duration::seconds(expires_in),
    })
}

fn token_error_message(body: &Value, status: u16) -> String {
    body["error_description"]
        .as_str()
        .or_else(|| body["error"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"))
}

// ── Token file ──────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct TokenFile {
    refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

/// Refresh token persisted by a previous rotation, if any.
pub fn load_refresh_token(path: &Path) -> Result<Option<String>, ConnectorError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let file: TokenFile = serde_json::from_str(&content).map_err(|e| {
        ConnectorError::TokenRefresh(format!("invalid token file {}: {e}", path.display()))
    })?;
    Ok(Some(file.refresh_token).filter(|t| !t.is_empty()))
}

fn save_refresh_token(path: &Path, refresh_token: &str) -> Result<(), ConnectorError> {
    let file = TokenFile {
        refresh_token: refresh_token.to_string(),
        updated_at: Some(Utc::now().to_rfc3339()),
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| ConnectorError::TokenRefresh(format!("failed to serialize token file: {e}")))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

// ── RefreshingToken ─────────────────────────────────────────────────

struct TokenState {
    refresh_token: String,
    access: Option<(String, DateTime<Utc>)>,
}

/// A bearer token obtained from a long-lived refresh token and renewed on
/// demand. Rotated refresh tokens are written to the token file.
pub struct RefreshingToken {
    http: Client,
    provider: &'static str,
    token_url: String,
    auth: ClientAuth,
    client_id: String,
    client_secret: String,
    token_file: Option<PathBuf>,
    state: Mutex<TokenState>,
}

impl RefreshingToken {
    pub fn new(
        provider: &'static str,
        token_url: impl Into<String>,
        auth: ClientAuth,
        credentials: OAuthCredentials,
    ) -> Result<Self, ConnectorError> {
        Ok(Self {
            http: build_http()?,
            provider,
            token_url: token_url.into(),
            auth,
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
            token_file: None,
            state: Mutex::new(TokenState {
                refresh_token: credentials.refresh_token,
                access: None,
            }),
        })
    }

    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = Some(path.into());
        self
    }

    pub async fn access_token(&self) -> Result<String, ConnectorError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        if let Some((token, expires_at)) = &state.access {
            if *expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) > now {
                return Ok(token.clone());
            }
        }

        let grant = self.refresh(&state.refresh_token).await?;
        let rotated = grant.refresh_token.as_deref().filter(|t| *t != state.refresh_token);
        if let Some(rotated) = rotated {
            tracing::info!(provider = self.provider, "refresh token rotated");
            if let Some(path) = &self.token_file {
                save_refresh_token(path, rotated)?;
            }
            state.refresh_token = rotated.to_string();
        }
        state.access = Some((grant.access_token.clone(), grant.expires_at));
        Ok(grant.access_token)
    }

    /// Drops the cached access token so the next call refreshes.
    pub async fn invalidate(&self) {
        self.state.lock().await.access = None;
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ConnectorError> {
        tracing::debug!(provider = self.provider, "refreshing access token");
        let mut form = vec![("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
        let mut request = self.http.post(&self.token_url).header("Accept", "application/json");
        match self.auth {
            ClientAuth::Basic => {
                let basic = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", self.client_id, self.client_secret));
                request = request.header("Authorization", format!("Basic {basic}"));
            }
            ClientAuth::Form => {
                form.push(("client_id", self.client_id.as_str()));
                form.push(("client_secret", self.client_secret.as_str()));
            }
        }

        let response = request
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                ConnectorError::TokenRefresh(format!("{} token request failed: {e}", self.provider))
            })?;
        let status = response.status().as_u16();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if status != 200 {
            return Err(ConnectorError::TokenRefresh(format!(
                "{} token refresh failed ({status}): {}. \
                 Re-authorize to obtain a new refresh token.",
                self.provider,
                token_error_message(&body, status)
            )));
        }
        parse_token_response(&body, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_grant_with_rotation() {
        let now = Utc::now();
        let body = json!({
            "access_token": "at-1",
            "refresh_token": "rt-2",
            "expires_in": 3600,
            "token_type": "bearer"
        });
        let grant = parse_token_response(&body, now).unwrap();
        assert_eq!(grant.access_token, "at-1");
        assert_eq!(grant.refresh_token.as_deref(), Some("rt-2"));
        assert_eq!(grant.expires_at, now + Duration::seconds(3600));
    }

    #[test]
    fn grant_without_refresh_token_or_expiry() {
        let now = Utc::now();
        let grant = parse_token_response(&json!({"access_token": "at-1"}), now).unwrap();
        assert_eq!(grant.refresh_token, None);
        assert_eq!(grant.expires_at, now + Duration::seconds(3600));
    }

    #[test]
    fn missing_access_token_is_an_error() {
        assert!(parse_token_response(&json!({"error": "invalid_grant"}), Utc::now()).is_err());
    }

    #[test]
    fn error_message_prefers_description() {
        let body = json!({"error": "invalid_grant", "error_description": "Token expired"});
        assert_eq!(token_error_message(&body, 400), "Token expired");
        assert_eq!(token_error_message(&Value::Null, 502), "HTTP 502");
    }

    #[test]
    fn token_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("quickbooks.json");
        assert_eq!(load_refresh_token(&path).unwrap(), None);

        save_refresh_token(&path, "rt-rotated").unwrap();
        assert_eq!(load_refresh_token(&path).unwrap().as_deref(), Some("rt-rotated"));
    }
}
