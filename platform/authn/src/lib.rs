//! Platform authentication helpers.
//!
//! Each configured provider is discovered once at startup. A login runs the
//! authorization-code flow with PKCE; the transient CSRF/nonce/verifier triple
//! is serialized into [`TempLoginState`] and stored client-side in an
//! encrypted cookie until the callback arrives.

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, IssuerUrl, Nonce, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, Scope, TokenResponse,
    core::{CoreAuthenticationFlow, CoreClient, CoreProviderMetadata},
    reqwest::async_http_client,
    url::Url,
};
use platform_db::IdentityProfile;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const GOOGLE_ISSUER: &str = "https://accounts.google.com";

#[derive(Debug, Error)]
pub enum AuthnError {
    #[error("Unknown login provider: {0}")]
    MissingProvider(String),
    #[error("identity provider returned no id_token")]
    MissingIdToken,
    #[error("token exchange failed: {0}")]
    Exchange(String),
    #[error("id_token verification failed: {0}")]
    Claims(String),
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub id: String,
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
}

/// Everything the login redirect needs, plus what the callback must verify.
#[derive(Clone, Debug)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub csrf: String,
    pub nonce: String,
    pub pkce_verifier: String,
}

/// Round-tripped through the browser between `/login` and the callback.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct TempLoginState {
    pub provider: String,
    pub csrf: String,
    nonce: String,
    pkce_verifier: String,
}

impl TempLoginState {
    pub fn new(provider: &str, request: &AuthorizationRequest) -> Self {
        Self {
            provider: provider.to_string(),
            csrf: request.csrf.clone(),
            nonce: request.nonce.clone(),
            pkce_verifier: request.pkce_verifier.clone(),
        }
    }

    pub fn verifier(&self) -> PkceCodeVerifier {
        PkceCodeVerifier::new(self.pkce_verifier.clone())
    }

    pub fn nonce(&self) -> Nonce {
        Nonce::new(self.nonce.clone())
    }

    /// Checks the `state` query parameter against the stored CSRF token.
    pub fn matches(&self, provider: &str, state: &str) -> bool {
        self.provider == provider && self.csrf == state
    }
}

pub struct OidcProvider {
    pub id: String,
    client: CoreClient,
}

impl OidcProvider {
    pub async fn discover(config: &ProviderConfig) -> Result<Self> {
        let issuer = IssuerUrl::new(config.issuer.clone())
            .with_context(|| format!("invalid issuer url for {}", config.id))?;
        let metadata = CoreProviderMetadata::discover_async(issuer, async_http_client)
            .await
            .map_err(|err| anyhow!("oidc discovery for {} failed: {err}", config.id))?;
        let redirect = RedirectUrl::new(config.redirect_url.clone())
            .with_context(|| format!("invalid redirect url for {}", config.id))?;
        let client = CoreClient::from_provider_metadata(
            metadata,
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
        )
        .set_redirect_uri(redirect);
        info!(provider = %config.id, issuer = %config.issuer, "oidc provider discovered");
        Ok(Self {
            id: config.id.clone(),
            client,
        })
    }

    pub fn authorize(&self) -> AuthorizationRequest {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let (url, csrf, nonce) = self
            .client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                CsrfToken::new_random,
                Nonce::new_random,
            )
            .add_scope(Scope::new("email".into()))
            .add_scope(Scope::new("profile".into()))
            .set_pkce_challenge(challenge)
            .url();
        AuthorizationRequest {
            url,
            csrf: csrf.secret().clone(),
            nonce: nonce.secret().clone(),
            pkce_verifier: verifier.secret().clone(),
        }
    }

    /// Redeems the authorization code and returns the verified identity claims.
    pub async fn exchange(
        &self,
        code: AuthorizationCode,
        verifier: PkceCodeVerifier,
        nonce: Nonce,
    ) -> Result<IdentityProfile, AuthnError> {
        let token = self
            .client
            .exchange_code(code)
            .set_pkce_verifier(verifier)
            .request_async(async_http_client)
            .await
            .map_err(|err| AuthnError::Exchange(err.to_string()))?;
        let id_token = token.id_token().ok_or(AuthnError::MissingIdToken)?;
        let claims = id_token
            .claims(&self.client.id_token_verifier(), &nonce)
            .map_err(|err| AuthnError::Claims(err.to_string()))?;
        Ok(IdentityProfile {
            provider: self.id.clone(),
            provider_id: claims.subject().as_str().to_string(),
            email: claims.email().map(|email| email.as_str().to_string()),
            name: claims
                .name()
                .and_then(|name| name.get(None))
                .map(|name| name.as_str().to_string()),
            picture_url: claims
                .picture()
                .and_then(|picture| picture.get(None))
                .map(|picture| picture.as_str().to_string()),
        })
    }
}

/// Providers keyed by their configured id (e.g. `google`).
#[derive(Default)]
pub struct AuthRegistry {
    providers: HashMap<String, OidcProvider>,
}

impl AuthRegistry {
    pub async fn from_config(configs: &HashMap<String, ProviderConfig>) -> Result<Self> {
        let mut providers = HashMap::new();
        for (id, config) in configs {
            providers.insert(id.clone(), OidcProvider::discover(config).await?);
        }
        Ok(Self { providers })
    }

    pub fn get(&self, id: &str) -> Option<&OidcProvider> {
        self.providers.get(id)
    }

    pub fn require(&self, id: &str) -> Result<&OidcProvider, AuthnError> {
        self.get(id)
            .ok_or_else(|| AuthnError::MissingProvider(id.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AuthorizationRequest {
        AuthorizationRequest {
            url: Url::parse("https://accounts.example.test/auth").unwrap(),
            csrf: "csrf-1".into(),
            nonce: "nonce-1".into(),
            pkce_verifier: "verifier-1".into(),
        }
    }

    #[test]
    fn login_state_survives_cookie_round_trip() {
        let state = TempLoginState::new("google", &request());
        let raw = serde_json::to_string(&state).unwrap();
        let back: TempLoginState = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.nonce().secret(), "nonce-1");
        assert_eq!(back.verifier().secret(), "verifier-1");
    }

    #[test]
    fn login_state_rejects_foreign_state_or_provider() {
        let state = TempLoginState::new("google", &request());
        assert!(state.matches("google", "csrf-1"));
        assert!(!state.matches("google", "csrf-2"));
        assert!(!state.matches("github", "csrf-1"));
    }

    #[tokio::test]
    async fn empty_registry_reports_missing_provider() {
        let registry = AuthRegistry::from_config(&HashMap::new()).await.unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.require("google"),
            Err(AuthnError::MissingProvider(id)) if id == "google"
        ));
    }
}
