mod auth;
mod hr;

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{FromRef, State},
    http::{self, HeaderName, HeaderValue, Method},
    response::IntoResponse,
    routing::get,
};
use axum_extra::extract::cookie::Key;
use platform_authn::AuthRegistry;
use platform_db::DbPool;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::config::AppConfig;

pub use auth::RequestUser;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<AppConfig>,
    pub auth: Arc<AuthRegistry>,
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(pool: DbPool, config: Arc<AppConfig>, auth: Arc<AuthRegistry>) -> Self {
        let cookie_key = config.cookie_key.clone();
        Self {
            pool,
            config,
            auth,
            cookie_key,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    addr: SocketAddr,
}

impl ServeConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::from((host, port)),
        }
    }
}

pub async fn serve(config: ServeConfig, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    info!(%config.addr, "hr server listening");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server error")?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    CorsLayer::new()
        .allow_credentials(true)
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(AllowOrigin::list(allowed))
}

pub fn build_router(state: AppState) -> Router {
    let request_id = MakeRequestUuid;
    let header_name = HeaderName::from_static("x-request-id");
    Router::new()
        .route("/health", get(health_handler))
        .merge(auth::routes())
        .merge(hr::routes())
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(header_name.clone(), request_id))
                .layer(PropagateRequestIdLayer::new(header_name))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.cors_allowed_origins)),
        )
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.pool.ping().await.is_ok();
    Json(HealthResponse {
        ok: db_ok,
        db_ok,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    ok: bool,
    db_ok: bool,
    version: &'static str,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    ctrl_c.await;

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    };
    info!("shutdown signal received");
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode, header},
        response::IntoResponse,
    };
    use axum_extra::extract::cookie::{Cookie, PrivateCookieJar};
    use http_body_util::BodyExt;
    use migration::{Migrator, MigratorTrait};
    use platform_authn::AuthRegistry;
    use platform_db::{IdentityProfile, SessionOrigin};
    use sea_orm::Database;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::{AppState, auth::SESSION_COOKIE, build_router};
    use crate::config::test_config;

    pub(crate) struct TestApp {
        pub state: AppState,
        pub router: Router,
    }

    impl TestApp {
        pub async fn new() -> Self {
            let pool = Database::connect("sqlite::memory:").await.unwrap();
            Migrator::up(&pool, None).await.unwrap();
            let state = AppState::new(
                pool,
                Arc::new(test_config()),
                Arc::new(AuthRegistry::default()),
            );
            let router = build_router(state.clone());
            Self { state, router }
        }

        /// Signs a user in directly and returns the `Cookie` header value.
        pub async fn login(&self, email: &str) -> String {
            let user = platform_db::upsert_user(
                &self.state.pool,
                &IdentityProfile {
                    provider: "google".into(),
                    provider_id: format!("sub-{email}"),
                    email: Some(email.into()),
                    name: Some("Test User".into()),
                    picture_url: None,
                },
            )
            .await
            .unwrap();
            let session = platform_db::create_session(
                &self.state.pool,
                user.id,
                self.state.config.session_ttl,
                SessionOrigin::default(),
            )
            .await
            .unwrap();
            let jar = PrivateCookieJar::new(self.state.cookie_key.clone())
                .add(Cookie::new(SESSION_COOKIE, session.id.to_string()));
            let response = jar.into_response();
            let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
            set_cookie.split(';').next().unwrap().to_string()
        }

        pub async fn send(
            &self,
            method: &str,
            uri: &str,
            cookie: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let response = self.raw(method, uri, cookie, body).await;
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let json = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, json)
        }

        pub async fn raw(
            &self,
            method: &str,
            uri: &str,
            cookie: Option<&str>,
            body: Option<Value>,
        ) -> axum::response::Response {
            let mut request = Request::builder().method(method).uri(uri);
            if let Some(cookie) = cookie {
                request = request.header(header::COOKIE, cookie);
            }
            let request = match body {
                Some(json) => request
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json.to_string()))
                    .unwrap(),
                None => request.body(Body::empty()).unwrap(),
            };
            self.router.clone().oneshot(request).await.unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::testing::TestApp;

    #[tokio::test]
    async fn health_reports_database_status() {
        let app = TestApp::new().await;
        let (status, body) = app.send("GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["dbOk"], true);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn responses_carry_a_request_id() {
        let app = TestApp::new().await;
        let response = app.raw("GET", "/health", None, None).await;
        assert!(response.headers().contains_key("x-request-id"));
    }
}
