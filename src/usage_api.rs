//! Quota endpoint client
//!
//! Fetches five-hour and seven-day utilization from the Anthropic OAuth
//! usage endpoint. The OAuth access token comes from the OS credential
//! store through the [`TokenProvider`] capability so the HTTP path stays
//! testable and platform-free.

use crate::error::{Result, SmiError};
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration as StdDuration;

/// Anthropic OAuth usage endpoint
pub const USAGE_ENDPOINT: &str = "https://api.anthropic.com/api/oauth/usage";
/// Credential store entry written by Claude Code
const CREDENTIAL_SERVICE: &str = "Claude Code-credentials";
const ANTHROPIC_BETA: &str = "oauth-2025-04-20";
const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// Length of the rolling session window
pub const SESSION_WINDOW_HOURS: i64 = 5;

/// Utilization info for a single rolling window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowUsage {
    /// Percentage used, 0-100
    pub utilization: f64,
    /// ISO 8601 timestamp when the window resets
    pub resets_at: String,
}

impl WindowUsage {
    /// Parse `resets_at` into an instant.
    pub fn reset_time(&self) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.resets_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| SmiError::Api(format!("bad resets_at {:?}: {e}", self.resets_at)))
    }
}

/// Parsed quota endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiUsage {
    /// Five-hour rolling window
    pub five_hour: WindowUsage,
    /// Seven-day rolling window
    pub seven_day: WindowUsage,
    /// When this response was fetched
    #[serde(skip, default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,
}

impl ApiUsage {
    /// Start of the current session window.
    ///
    /// The endpoint's `resets_at` jitters within its hour, so the anchor is
    /// rounded to the nearest hour before subtracting the window length.
    pub fn session_start(&self) -> Result<DateTime<Utc>> {
        let reset = self.five_hour.reset_time()?;
        let anchored = reset
            .duration_round(Duration::hours(1))
            .map_err(|e| SmiError::Api(format!("round resets_at: {e}")))?;
        Ok(anchored - Duration::hours(SESSION_WINDOW_HOURS))
    }

    /// End of the current session window (raw `resets_at`).
    pub fn session_end(&self) -> Result<DateTime<Utc>> {
        self.five_hour.reset_time()
    }

    /// Time left until the five-hour window resets, clamped at zero.
    pub fn session_remaining(&self, now: DateTime<Utc>) -> Result<Duration> {
        let reset = self.five_hour.reset_time()?;
        Ok((reset - now).max(Duration::zero()))
    }
}

/// Capability for looking up the Claude Code OAuth access token
pub trait TokenProvider: Send + Sync {
    /// Return the bearer token, or an error when the store has no entry.
    fn get_token(&self) -> Result<String>;
}

/// Token provider backed by the OS credential store.
///
/// macOS keeps the credential blob in the login keychain, Linux in the
/// libsecret store; Windows installs write a `.credentials.json` next to the
/// data directory.
#[derive(Debug, Default, Clone)]
pub struct SystemTokenProvider;

impl TokenProvider for SystemTokenProvider {
    fn get_token(&self) -> Result<String> {
        let raw = read_system_credential()?;
        parse_credential_json(&raw)
    }
}

#[cfg(target_os = "macos")]
fn read_system_credential() -> Result<String> {
    run_credential_command(
        "security",
        &["find-generic-password", "-s", CREDENTIAL_SERVICE, "-w"],
    )
}

#[cfg(target_os = "linux")]
fn read_system_credential() -> Result<String> {
    run_credential_command("secret-tool", &["lookup", "service", CREDENTIAL_SERVICE])
}

#[cfg(target_os = "windows")]
fn read_system_credential() -> Result<String> {
    let path = dirs::home_dir()
        .ok_or_else(|| SmiError::Credential("cannot determine home directory".to_string()))?
        .join(".claude")
        .join(".credentials.json");
    std::fs::read_to_string(&path).map_err(|e| {
        SmiError::Credential(format!("read {}: {e}", path.display()))
    })
}

#[cfg(any(target_os = "macos", target_os = "linux"))]
fn run_credential_command(program: &str, args: &[&str]) -> Result<String> {
    let output = std::process::Command::new(program)
        .args(args)
        .output()
        .map_err(|e| SmiError::Credential(format!("{program}: {e}")))?;
    if !output.status.success() {
        return Err(SmiError::Credential(format!(
            "{program} exited with {}",
            output.status
        )));
    }
    let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if raw.is_empty() {
        return Err(SmiError::Credential(format!("{program} returned nothing")));
    }
    Ok(raw)
}

/// Extract the OAuth access token from the credential blob
/// `{"claudeAiOauth":{"accessToken":"..."}}`.
fn parse_credential_json(raw: &str) -> Result<String> {
    #[derive(Deserialize)]
    struct Credentials {
        #[serde(rename = "claudeAiOauth", default)]
        claude_ai_oauth: Option<OauthBlob>,
    }
    #[derive(Deserialize)]
    struct OauthBlob {
        #[serde(rename = "accessToken", default)]
        access_token: String,
    }

    let creds: Credentials = serde_json::from_str(raw)
        .map_err(|e| SmiError::Credential(format!("parse credentials: {e}")))?;
    let token = creds
        .claude_ai_oauth
        .map(|o| o.access_token)
        .unwrap_or_default();
    if token.is_empty() {
        return Err(SmiError::Credential("empty access token".to_string()));
    }
    Ok(token)
}

/// Fetch current usage from the quota endpoint.
pub async fn fetch_usage(provider: Arc<dyn TokenProvider>) -> Result<ApiUsage> {
    fetch_usage_from(provider, USAGE_ENDPOINT).await
}

/// [`fetch_usage`] against an explicit endpoint, for tests.
pub async fn fetch_usage_from(provider: Arc<dyn TokenProvider>, endpoint: &str) -> Result<ApiUsage> {
    // Credential helpers shell out, so keep them off the async threads.
    let token = tokio::task::spawn_blocking(move || provider.get_token())
        .await
        .map_err(|e| SmiError::Credential(format!("token lookup task: {e}")))??;

    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?;

    let response = client
        .get(endpoint)
        .header("Authorization", format!("Bearer {token}"))
        .header("anthropic-beta", ANTHROPIC_BETA)
        .header("Accept", "application/json")
        .header(
            "User-Agent",
            concat!("claude-smi/", env!("CARGO_PKG_VERSION")),
        )
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(SmiError::Api(format!(
            "usage endpoint returned HTTP {}",
            response.status().as_u16()
        )));
    }

    let mut usage: ApiUsage = response.json().await?;
    usage.fetched_at = Utc::now();
    Ok(usage)
}
