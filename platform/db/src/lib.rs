//! Database primitives: connection settings, the user directory that backs
//! OIDC logins, and the session store.

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use entity::{sessions, users};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectOptions, Database, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, SqlErr, sea_query::OnConflict,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Shared connection pool alias.
pub type DbPool = DatabaseConnection;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database url missing (set {0})")]
    MissingUrl(String),
    #[error("login for {provider} did not include an email address")]
    MissingEmail { provider: String },
    #[error("email {email} already belongs to another login")]
    EmailInUse { email: String },
    #[error("session lifetime out of range")]
    SessionTtl,
    #[error(transparent)]
    Db(#[from] DbErr),
}

pub type DbResult<T> = Result<T, DbError>;

/// Environment-driven connection settings.
#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_url_key")]
    env_key: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default = "default_max_connections")]
    max_connections: u32,
}

fn default_url_key() -> String {
    "DATABASE_URL".to_string()
}

fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            env_key: default_url_key(),
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseSettings {
    /// Reads `DATABASE_URL` and `DATABASE_MAX_CONNECTIONS`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.url = std::env::var(&settings.env_key).ok();
        if let Some(max) = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|raw| raw.parse().ok())
        {
            settings.max_connections = max;
        }
        settings
    }

    pub fn database_url(&self) -> DbResult<String> {
        match &self.url {
            Some(url) => Ok(url.clone()),
            None => {
                std::env::var(&self.env_key).map_err(|_| DbError::MissingUrl(self.env_key.clone()))
            }
        }
    }
}

pub async fn connect(settings: &DatabaseSettings) -> DbResult<DbPool> {
    let url = settings.database_url()?;
    let mut options = ConnectOptions::new(url);
    options
        .max_connections(settings.max_connections)
        .connect_timeout(StdDuration::from_secs(10))
        .sqlx_logging(false);
    let pool = Database::connect(options).await?;
    debug!(max_connections = settings.max_connections, "database pool ready");
    Ok(pool)
}

/// Identity claims handed over by the authentication gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityProfile {
    pub provider: String,
    pub provider_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture_url: Option<String>,
}

/// Insert-or-update keyed by `(provider, provider_id)`.
///
/// A single `INSERT .. ON CONFLICT DO UPDATE` statement, so parallel callbacks
/// for the same identity converge on one row. Only the display fields are
/// refreshed on later logins.
pub async fn upsert_user(pool: &DbPool, profile: &IdentityProfile) -> DbResult<users::Model> {
    let email = profile
        .email
        .clone()
        .ok_or_else(|| DbError::MissingEmail {
            provider: profile.provider.clone(),
        })?;
    let now = Utc::now();
    let row = users::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(email.clone()),
        name: Set(profile.name.clone()),
        picture_url: Set(profile.picture_url.clone()),
        provider: Set(profile.provider.clone()),
        provider_id: Set(profile.provider_id.clone()),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    };
    users::Entity::insert(row)
        .on_conflict(
            OnConflict::columns([users::Column::Provider, users::Column::ProviderId])
                .update_columns([
                    users::Column::Name,
                    users::Column::PictureUrl,
                    users::Column::UpdatedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(pool)
        .await
        .map_err(|err| match err.sql_err() {
            // The identity conflict is absorbed above, so this is `users.email`.
            Some(SqlErr::UniqueConstraintViolation(_)) => DbError::EmailInUse { email },
            _ => DbError::Db(err),
        })?;
    let user = find_user_by_identity(pool, &profile.provider, &profile.provider_id)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound("user vanished after upsert".into()))?;
    info!(user_id = %user.id, provider = %user.provider, "user signed in");
    Ok(user)
}

pub async fn find_user_by_identity(
    pool: &DbPool,
    provider: &str,
    provider_id: &str,
) -> DbResult<Option<users::Model>> {
    Ok(users::Entity::find()
        .filter(users::Column::Provider.eq(provider))
        .filter(users::Column::ProviderId.eq(provider_id))
        .one(pool)
        .await?)
}

pub async fn user_count(pool: &DbPool) -> DbResult<u64> {
    Ok(users::Entity::find().count(pool).await?)
}

/// Optional request metadata recorded with a new session.
#[derive(Clone, Debug, Default)]
pub struct SessionOrigin {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

pub async fn create_session(
    pool: &DbPool,
    user_id: Uuid,
    ttl: Duration,
    origin: SessionOrigin,
) -> DbResult<sessions::Model> {
    let now = Utc::now();
    let expires_at = now.checked_add_signed(ttl).ok_or(DbError::SessionTtl)?;
    let id = Uuid::new_v4();
    let row = sessions::ActiveModel {
        id: Set(id),
        user_id: Set(user_id),
        created_at: Set(now.into()),
        expires_at: Set(expires_at.into()),
        ip: Set(origin.ip),
        user_agent: Set(origin.user_agent),
    };
    sessions::Entity::insert(row)
        .exec_without_returning(pool)
        .await?;
    sessions::Entity::find_by_id(id)
        .one(pool)
        .await?
        .ok_or_else(|| DbError::from(DbErr::RecordNotFound("session vanished after insert".into())))
}

/// Loads a session and its user; expired sessions are deleted and reported absent.
pub async fn find_live_session(
    pool: &DbPool,
    session_id: Uuid,
) -> DbResult<Option<(sessions::Model, users::Model)>> {
    let Some((session, user)) = sessions::Entity::find_by_id(session_id)
        .find_also_related(users::Entity)
        .one(pool)
        .await?
    else {
        return Ok(None);
    };
    if session.expires_at.with_timezone(&Utc) < Utc::now() {
        delete_session(pool, session_id).await?;
        return Ok(None);
    }
    Ok(user.map(|user| (session, user)))
}

pub async fn delete_session(pool: &DbPool, session_id: Uuid) -> DbResult<()> {
    sessions::Entity::delete_by_id(session_id).exec(pool).await?;
    Ok(())
}
