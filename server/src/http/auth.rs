//! Login handshake, session cookie and the request-scoped identity.

use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{ConnectInfo, FromRequestParts, OptionalFromRequestParts, Path, Query, State},
    http::{HeaderMap, header, request::Parts},
    response::Redirect,
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use entity::users;
use openidconnect::AuthorizationCode;
use platform_api::{ApiError, ApiResult};
use platform_authn::TempLoginState;
use platform_db::{DbError, SessionOrigin};
use serde::{Deserialize, Serialize};
use time::Duration as TimeDuration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::AppState;

pub(crate) const SESSION_COOKIE: &str = "hr_session";
const OIDC_STATE_COOKIE: &str = "hr_oidc";
const DEFAULT_PROVIDER: &str = "google";

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_handler))
        .route("/oidc/callback/{provider}", get(oidc_callback_handler))
        .route("/api/auth/user", get(current_user_handler))
        .route("/api/auth/status", get(status_handler))
        .route("/api/auth/logout", post(logout_handler))
}

/// The signed-in user behind the current request.
///
/// Rejects with 401 when there is no live session. Handlers that also serve
/// anonymous callers take `Option<RequestUser>`.
#[derive(Clone, Debug)]
pub struct RequestUser {
    pub session_id: Uuid,
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub picture_url: Option<String>,
}

impl RequestUser {
    fn from_parts(session_id: Uuid, user: users::Model) -> Self {
        Self {
            session_id,
            id: user.id,
            email: user.email,
            name: user.name,
            picture_url: user.picture_url,
        }
    }

    async fn load(parts: &Parts, state: &AppState) -> ApiResult<Option<Self>> {
        let jar = PrivateCookieJar::from_headers(&parts.headers, state.cookie_key.clone());
        let Some(session_id) = jar
            .get(SESSION_COOKIE)
            .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
        else {
            return Ok(None);
        };
        let found = platform_db::find_live_session(&state.pool, session_id)
            .await
            .map_err(db_failure)?;
        Ok(found.map(|(session, user)| Self::from_parts(session.id, user)))
    }
}

impl FromRequestParts<AppState> for RequestUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        Self::load(parts, state).await?.ok_or(ApiError::Unauthorized)
    }
}

impl OptionalFromRequestParts<AppState> for RequestUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Option<Self>> {
        Self::load(parts, state).await
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserPayload {
    id: Uuid,
    email: String,
    name: Option<String>,
    picture_url: Option<String>,
}

impl From<RequestUser> for UserPayload {
    fn from(user: RequestUser) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            picture_url: user.picture_url,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusPayload {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct LogoutPayload {
    message: &'static str,
    user: String,
}

#[derive(Deserialize)]
struct LoginQuery {
    provider: Option<String>,
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Reasons a callback bounces back to the login page, as `?error=` codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoginFailure {
    Denied,
    UnknownProvider,
    InvalidState,
    Exchange,
    MissingEmail,
    EmailInUse,
    Server,
}

impl LoginFailure {
    fn code(self) -> &'static str {
        match self {
            LoginFailure::Denied => "access_denied",
            LoginFailure::UnknownProvider => "unknown_provider",
            LoginFailure::InvalidState => "invalid_state",
            LoginFailure::Exchange => "exchange_failed",
            LoginFailure::MissingEmail => "missing_email",
            LoginFailure::EmailInUse => "email_in_use",
            LoginFailure::Server => "server_error",
        }
    }
}

fn failure_redirect(base: &str, failure: LoginFailure) -> Redirect {
    let separator = if base.contains('?') { '&' } else { '?' };
    Redirect::to(&format!("{base}{separator}error={}", failure.code()))
}

fn build_cookie(
    name: &'static str,
    value: String,
    max_age: TimeDuration,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .secure(secure)
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .build()
}

fn expired(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, "")).path("/").build()
}

fn db_failure(err: DbError) -> ApiError {
    ApiError::internal(err.into())
}

#[instrument(skip_all)]
async fn login_handler(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Query(query): Query<LoginQuery>,
) -> ApiResult<(PrivateCookieJar, Redirect)> {
    let provider_id = query.provider.as_deref().unwrap_or(DEFAULT_PROVIDER);
    let provider = state
        .auth
        .require(provider_id)
        .map_err(|err| ApiError::NotFound(err.to_string()))?;
    let request = provider.authorize();
    let temp_state = TempLoginState::new(&provider.id, &request);
    let encoded =
        serde_json::to_string(&temp_state).map_err(|err| ApiError::internal(err.into()))?;
    let jar = jar.add(build_cookie(
        OIDC_STATE_COOKIE,
        encoded,
        TimeDuration::minutes(10),
        state.config.secure_cookies,
    ));
    Ok((jar, Redirect::to(request.url.as_str())))
}

#[instrument(skip_all)]
async fn oidc_callback_handler(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Path(provider): Path<String>,
    Query(params): Query<CallbackQuery>,
    ClientOrigin(origin): ClientOrigin,
) -> (PrivateCookieJar, Redirect) {
    let saved = jar
        .get(OIDC_STATE_COOKIE)
        .and_then(|cookie| serde_json::from_str::<TempLoginState>(cookie.value()).ok());
    let jar = jar.remove(expired(OIDC_STATE_COOKIE));

    match complete_login(&state, &provider, saved, params, origin).await {
        Ok(session_id) => {
            let ttl = TimeDuration::seconds(state.config.session_ttl.num_seconds());
            let jar = jar.add(build_cookie(
                SESSION_COOKIE,
                session_id.to_string(),
                ttl,
                state.config.secure_cookies,
            ));
            (jar, Redirect::to(&state.config.login_success_url))
        }
        Err(failure) => {
            warn!(%provider, reason = failure.code(), "login failed");
            (
                jar,
                failure_redirect(&state.config.login_failure_url, failure),
            )
        }
    }
}

async fn complete_login(
    state: &AppState,
    provider_id: &str,
    saved: Option<TempLoginState>,
    params: CallbackQuery,
    origin: SessionOrigin,
) -> Result<Uuid, LoginFailure> {
    if params.error.is_some() {
        return Err(LoginFailure::Denied);
    }
    let provider = state
        .auth
        .require(provider_id)
        .map_err(|_| LoginFailure::UnknownProvider)?;
    let (Some(saved), Some(code), Some(csrf)) = (saved, params.code, params.state) else {
        return Err(LoginFailure::InvalidState);
    };
    if !saved.matches(&provider.id, &csrf) {
        return Err(LoginFailure::InvalidState);
    }
    let profile = provider
        .exchange(AuthorizationCode::new(code), saved.verifier(), saved.nonce())
        .await
        .map_err(|err| {
            warn!(error = %err, "authorization code exchange failed");
            LoginFailure::Exchange
        })?;
    let user = platform_db::upsert_user(&state.pool, &profile)
        .await
        .map_err(upsert_failure)?;
    let session =
        platform_db::create_session(&state.pool, user.id, state.config.session_ttl, origin)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "session creation failed");
                LoginFailure::Server
            })?;
    info!(user_id = %user.id, "login succeeded");
    Ok(session.id)
}

fn upsert_failure(err: DbError) -> LoginFailure {
    match err {
        DbError::MissingEmail { .. } => LoginFailure::MissingEmail,
        DbError::EmailInUse { email } => {
            warn!(%email, "email already linked to another login");
            LoginFailure::EmailInUse
        }
        other => {
            tracing::error!(error = %other, "user upsert failed");
            LoginFailure::Server
        }
    }
}

/// Client address and user agent recorded with a new session.
struct ClientOrigin(SessionOrigin);

impl<S: Send + Sync> FromRequestParts<S> for ClientOrigin {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self(session_origin(&parts.headers, peer)))
    }
}

fn session_origin(headers: &HeaderMap, peer: Option<SocketAddr>) -> SessionOrigin {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty());
    SessionOrigin {
        ip: forwarded.or_else(|| peer.map(|addr| addr.ip().to_string())),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    }
}

async fn current_user_handler(user: RequestUser) -> Json<UserPayload> {
    Json(user.into())
}

async fn status_handler(user: Option<RequestUser>) -> Json<StatusPayload> {
    Json(match user {
        Some(user) => StatusPayload {
            authenticated: true,
            email: Some(user.email),
            name: user.name,
        },
        None => StatusPayload {
            authenticated: false,
            email: None,
            name: None,
        },
    })
}

#[instrument(skip_all, fields(user_id = %user.id))]
async fn logout_handler(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    user: RequestUser,
) -> ApiResult<(PrivateCookieJar, Json<LogoutPayload>)> {
    platform_db::delete_session(&state.pool, user.session_id)
        .await
        .map_err(db_failure)?;
    info!("user logged out");
    let jar = jar.remove(expired(SESSION_COOKIE));
    Ok((
        jar,
        Json(LogoutPayload {
            message: "Logged out successfully",
            user: user.email,
        }),
    ))
}
