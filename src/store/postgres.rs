//! PostgreSQL-backed [`CredentialStore`].
//!
//! One row per tenant in `auth_db`: `locationid` is the storage key (a location identifier or the
//! agency sentinel) and `raw_token` holds the credential bundle verbatim as JSONB. The `revision`
//! column backs compare-and-swap merges.

// crates.io
use sqlx::{
	PgPool, Row,
	postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode},
	types::Json,
};
// self
use crate::{
	_prelude::*,
	auth::{CredentialBundle, TenantKind},
	config::DatabaseSettings,
	store::{CompareAndSwapOutcome, CredentialStore, StoreError, StoreFuture, TenantRecord},
};

const MIGRATIONS: &[&str] = &[
	"CREATE TABLE IF NOT EXISTS auth_db (
		locationid TEXT PRIMARY KEY,
		raw_token  JSONB NOT NULL
	)",
	"ALTER TABLE auth_db ADD COLUMN IF NOT EXISTS revision BIGINT NOT NULL DEFAULT 1",
	"ALTER TABLE auth_db ADD COLUMN IF NOT EXISTS updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()",
];
const UPSERT: &str = "INSERT INTO auth_db (locationid, raw_token, revision, updated_at)
	VALUES ($1, $2, 1, NOW())
	ON CONFLICT (locationid) DO UPDATE
	SET raw_token = EXCLUDED.raw_token, revision = auth_db.revision + 1, updated_at = NOW()";
const SELECT_ONE: &str = "SELECT raw_token, revision FROM auth_db WHERE locationid = $1";
const INSERT_IF_ABSENT: &str = "INSERT INTO auth_db (locationid, raw_token, revision, updated_at)
	VALUES ($1, $2, 1, NOW())
	ON CONFLICT (locationid) DO NOTHING";
const UPDATE_IF_REVISION: &str = "UPDATE auth_db
	SET raw_token = $2, revision = revision + 1, updated_at = NOW()
	WHERE locationid = $1 AND revision = $3";
const EXISTS: &str = "SELECT EXISTS (SELECT 1 FROM auth_db WHERE locationid = $1)";

/// Credential store over a shared PostgreSQL pool.
///
/// The pool is opened once at process start ([`connect`](Self::connect)) and closed at shutdown
/// ([`close`](Self::close)); every component receives the same handle.
#[derive(Clone, Debug)]
pub struct PostgresStore {
	pool: PgPool,
}
impl PostgresStore {
	/// Opens a pool using the provided settings.
	pub async fn connect(settings: &DatabaseSettings) -> Result<Self, StoreError> {
		let options = connect_options(settings)?;
		let pool = PgPoolOptions::new()
			.max_connections(settings.max_connections)
			.connect_with(options)
			.await
			.map_err(|e| StoreError::Backend {
				message: format!("Failed to connect to PostgreSQL: {e}"),
			})?;

		Ok(Self { pool })
	}

	/// Wraps an existing pool.
	pub fn from_pool(pool: PgPool) -> Self {
		Self { pool }
	}

	/// Underlying pool handle.
	pub fn pool(&self) -> &PgPool {
		&self.pool
	}

	/// Creates the credential table, or upgrades a pre-existing one with the revision column.
	pub async fn migrate(&self) -> Result<(), StoreError> {
		for statement in MIGRATIONS {
			sqlx::query(statement).execute(&self.pool).await.map_err(backend)?;
		}

		tracing::debug!("Credential table is up to date.");

		Ok(())
	}

	/// Closes every pooled connection.
	pub async fn close(&self) {
		self.pool.close().await;
	}

	fn decode(tenant: &TenantKind, row: PgRow) -> Result<TenantRecord, StoreError> {
		let Json(raw) = row.try_get::<Json<serde_json::Value>, _>("raw_token").map_err(backend)?;
		let revision = row.try_get::<i64, _>("revision").map_err(backend)?;
		let credential = serde_path_to_error::deserialize::<_, CredentialBundle>(raw).map_err(|e| {
			StoreError::Serialization {
				message: format!("Stored credential for {tenant} is malformed at {}: {e}", e.path()),
			}
		})?;
		let revision = u64::try_from(revision).map_err(|_| StoreError::Serialization {
			message: format!("Stored revision for {tenant} is negative."),
		})?;

		Ok(TenantRecord { tenant: tenant.clone(), credential, revision })
	}
}
impl CredentialStore for PostgresStore {
	fn put<'a>(
		&'a self,
		tenant: &'a TenantKind,
		credential: CredentialBundle,
	) -> StoreFuture<'a, TenantKind> {
		Box::pin(async move {
			let payload = encode(&credential)?;

			sqlx::query(UPSERT)
				.bind(tenant.storage_key())
				.bind(payload)
				.execute(&self.pool)
				.await
				.map_err(backend)?;

			Ok(tenant.clone())
		})
	}

	fn get<'a>(&'a self, tenant: &'a TenantKind) -> StoreFuture<'a, Option<TenantRecord>> {
		Box::pin(async move {
			let row = sqlx::query(SELECT_ONE)
				.bind(tenant.storage_key())
				.fetch_optional(&self.pool)
				.await
				.map_err(backend)?;

			row.map(|row| Self::decode(tenant, row)).transpose()
		})
	}

	fn compare_and_swap<'a>(
		&'a self,
		tenant: &'a TenantKind,
		expected_revision: Option<u64>,
		credential: CredentialBundle,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		Box::pin(async move {
			let payload = encode(&credential)?;
			let affected = match expected_revision {
				None => sqlx::query(INSERT_IF_ABSENT)
					.bind(tenant.storage_key())
					.bind(payload)
					.execute(&self.pool)
					.await
					.map_err(backend)?
					.rows_affected(),
				Some(revision) => {
					let revision = i64::try_from(revision).map_err(|_| StoreError::Backend {
						message: format!("Revision {revision} exceeds the column range."),
					})?;

					sqlx::query(UPDATE_IF_REVISION)
						.bind(tenant.storage_key())
						.bind(payload)
						.bind(revision)
						.execute(&self.pool)
						.await
						.map_err(backend)?
						.rows_affected()
				},
			};

			if affected == 1 {
				return Ok(CompareAndSwapOutcome::Updated);
			}
			if expected_revision.is_none() {
				return Ok(CompareAndSwapOutcome::RevisionMismatch);
			}

			let exists = sqlx::query_scalar::<_, bool>(EXISTS)
				.bind(tenant.storage_key())
				.fetch_one(&self.pool)
				.await
				.map_err(backend)?;

			Ok(if exists {
				CompareAndSwapOutcome::RevisionMismatch
			} else {
				CompareAndSwapOutcome::Missing
			})
		})
	}

	fn now(&self) -> StoreFuture<'_, OffsetDateTime> {
		Box::pin(async move {
			sqlx::query_scalar::<_, OffsetDateTime>("SELECT NOW()")
				.fetch_one(&self.pool)
				.await
				.map_err(backend)
		})
	}
}

/// Builds connection options from a URL, or from discrete libpq-style settings.
pub fn connect_options(settings: &DatabaseSettings) -> Result<PgConnectOptions, StoreError> {
	if let Some(url) = settings.url.as_deref() {
		return PgConnectOptions::from_str(url).map_err(|e| StoreError::Backend {
			message: format!("Database URL is invalid: {e}"),
		});
	}

	let mut options = PgConnectOptions::new();

	if let Some(host) = settings.host.as_deref() {
		options = options.host(host);
	}
	if let Some(port) = settings.port {
		options = options.port(port);
	}
	if let Some(database) = settings.database.as_deref() {
		options = options.database(database);
	}
	if let Some(user) = settings.user.as_deref() {
		options = options.username(user);
	}
	if let Some(password) = settings.password.as_deref() {
		options = options.password(password);
	}
	if let Some(mode) = settings.ssl_mode.as_deref() {
		let mode = PgSslMode::from_str(mode).map_err(|e| StoreError::Backend {
			message: format!("SSL mode {mode} is invalid: {e}"),
		})?;

		options = options.ssl_mode(mode);
	}

	Ok(options)
}

fn encode(credential: &CredentialBundle) -> Result<Json<serde_json::Value>, StoreError> {
	serde_json::to_value(credential)
		.map(Json)
		.map_err(|e| StoreError::Serialization { message: e.to_string() })
}

fn backend(e: sqlx::Error) -> StoreError {
	StoreError::Backend { message: e.to_string() }
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn discrete_settings_override_defaults() {
		let settings = DatabaseSettings {
			host: Some("db.internal".into()),
			port: Some(6543),
			database: Some("broker".into()),
			user: Some("broker_app".into()),
			password: Some("pw".into()),
			ssl_mode: Some("require".into()),
			..DatabaseSettings::default()
		};
		let options = connect_options(&settings).expect("Discrete settings should be accepted.");

		assert_eq!(options.get_host(), "db.internal");
		assert_eq!(options.get_port(), 6543);
		assert_eq!(options.get_database(), Some("broker"));
		assert_eq!(options.get_username(), "broker_app");
	}

	#[test]
	fn url_takes_precedence_and_bad_ssl_mode_is_rejected() {
		let settings = DatabaseSettings {
			url: Some("postgres://app@localhost:5433/tokens".into()),
			host: Some("ignored".into()),
			..DatabaseSettings::default()
		};
		let options = connect_options(&settings).expect("URL settings should be accepted.");

		assert_eq!(options.get_host(), "localhost");
		assert_eq!(options.get_port(), 5433);

		let bad = DatabaseSettings { ssl_mode: Some("sometimes".into()), ..DatabaseSettings::default() };

		assert!(matches!(connect_options(&bad), Err(StoreError::Backend { .. })));
	}
}
