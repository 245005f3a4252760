use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use axum_extra::extract::cookie::Key;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Duration;
use platform_authn::{GOOGLE_ISSUER, ProviderConfig};

const DEFAULT_SESSION_TTL_HOURS: i64 = 168;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub cookie_key: Key,
    pub cors_allowed_origins: Vec<String>,
    pub providers: HashMap<String, ProviderConfig>,
    pub session_ttl: Duration,
    pub login_success_url: String,
    pub login_failure_url: String,
    /// Adds the `Secure` attribute to cookies; off only for plain-http local runs.
    pub secure_cookies: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let cookie_secret =
            lookup("COOKIE_SECRET_BASE64").context("COOKIE_SECRET_BASE64 missing")?;
        let secret_bytes = STANDARD
            .decode(cookie_secret.trim())
            .context("invalid COOKIE_SECRET_BASE64")?;
        let cookie_key = Key::try_from(secret_bytes.as_slice())
            .map_err(|_| anyhow!("COOKIE_SECRET_BASE64 must decode to at least 64 bytes"))?;

        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000".into())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();

        let session_ttl = match lookup("SESSION_TTL_HOURS") {
            Some(raw) => {
                let hours: i64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid SESSION_TTL_HOURS `{raw}`"))?;
                if hours < 1 {
                    return Err(anyhow!("SESSION_TTL_HOURS must be at least 1"));
                }
                Duration::try_hours(hours)
                    .ok_or_else(|| anyhow!("SESSION_TTL_HOURS `{hours}` is out of range"))?
            }
            None => Duration::hours(DEFAULT_SESSION_TTL_HOURS),
        };

        let first_origin = cors_allowed_origins
            .first()
            .cloned()
            .unwrap_or_else(|| "http://localhost:3000".into());
        let login_success_url =
            lookup("LOGIN_SUCCESS_URL").unwrap_or_else(|| format!("{first_origin}/dashboard"));
        let login_failure_url =
            lookup("LOGIN_FAILURE_URL").unwrap_or_else(|| format!("{first_origin}/login"));

        let secure_cookies = lookup("COOKIE_SECURE")
            .map(|val| !matches!(val.to_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        let providers_list = lookup("AUTH_PROVIDERS").unwrap_or_else(|| "google".into());
        let mut providers = HashMap::new();
        for raw in providers_list.split(',') {
            let id = raw.trim().to_ascii_lowercase();
            if id.is_empty() {
                continue;
            }
            let upper = id.to_ascii_uppercase();
            let required = |suffix: &str| {
                let key = format!("{upper}_{suffix}");
                lookup(&key).ok_or_else(|| anyhow!("missing env {key}"))
            };
            let issuer = match lookup(&format!("{upper}_ISSUER")) {
                Some(issuer) => issuer,
                None if id == "google" => GOOGLE_ISSUER.to_string(),
                None => return Err(anyhow!("missing env {upper}_ISSUER")),
            };
            let config = ProviderConfig {
                id: id.clone(),
                issuer,
                client_id: required("CLIENT_ID")?,
                client_secret: required("CLIENT_SECRET")?,
                redirect_url: required("REDIRECT_URL")?,
            };
            providers.insert(id, config);
        }

        Ok(Self {
            cookie_key,
            cors_allowed_origins,
            providers,
            session_ttl,
            login_success_url,
            login_failure_url,
            secure_cookies,
        })
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        cookie_key: Key::generate(),
        cors_allowed_origins: vec!["http://localhost:3000".into()],
        providers: HashMap::new(),
        session_ttl: Duration::hours(DEFAULT_SESSION_TTL_HOURS),
        login_success_url: "http://localhost:3000/dashboard".into(),
        login_failure_url: "http://localhost:3000/login".into(),
        secure_cookies: false,
    }
}
