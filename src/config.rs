//! Environment-driven configuration for the broker service.
//!
//! [`Config::from_lookup`] does the parsing so tests can feed a map instead of mutating the
//! process environment. [`Config::load`] applies a `.env` file first, then reads the environment.

// std
use std::{
	net::{IpAddr, Ipv4Addr, SocketAddr},
	time::Duration as StdDuration,
};
// self
use crate::{
	_prelude::*,
	error::ConfigError,
	menu::{MenuDefinition, MenuOpenMode},
	oauth::ClientCredentials,
	provider::{DEFAULT_API_BASE, DEFAULT_API_VERSION, ProviderDescriptor},
};

/// Default outbound request timeout.
pub const DEFAULT_HTTP_TIMEOUT: StdDuration = StdDuration::from_secs(15);
/// Default listening port.
pub const DEFAULT_PORT: u16 = 3000;
/// Default database pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Database connection settings.
///
/// `url` takes precedence over the discrete libpq-style fields.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
	/// Full connection URL (`DATABASE_URL`).
	pub url: Option<String>,
	/// Server host (`PGHOST`).
	pub host: Option<String>,
	/// Server port (`PGPORT`).
	pub port: Option<u16>,
	/// Database name (`PGDATABASE`).
	pub database: Option<String>,
	/// Role name (`PGUSER`).
	pub user: Option<String>,
	/// Role password (`PGPASSWORD`).
	pub password: Option<String>,
	/// libpq SSL mode (`PGSSLMODE`).
	pub ssl_mode: Option<String>,
	/// Pool size (`DATABASE_MAX_CONNECTIONS`).
	pub max_connections: u32,
}
impl Default for DatabaseSettings {
	fn default() -> Self {
		Self {
			url: None,
			host: None,
			port: None,
			database: None,
			user: None,
			password: None,
			ssl_mode: None,
			max_connections: DEFAULT_MAX_CONNECTIONS,
		}
	}
}
impl Debug for DatabaseSettings {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DatabaseSettings")
			.field("url", &self.url.as_ref().map(|_| "<redacted>"))
			.field("host", &self.host)
			.field("port", &self.port)
			.field("database", &self.database)
			.field("user", &self.user)
			.field("password", &self.password.as_ref().map(|_| "<redacted>"))
			.field("ssl_mode", &self.ssl_mode)
			.field("max_connections", &self.max_connections)
			.finish()
	}
}

/// Fully parsed service configuration.
#[derive(Clone, Debug)]
pub struct Config {
	/// OAuth client registration.
	pub credentials: ClientCredentials,
	/// Platform endpoints and API version.
	pub descriptor: ProviderDescriptor,
	/// Outbound request timeout.
	pub http_timeout: StdDuration,
	/// Address the HTTP surface binds to.
	pub listen: SocketAddr,
	/// Database connection settings.
	pub database: DatabaseSettings,
	/// Menu provisioned after installs, when configured.
	pub menu: Option<MenuDefinition>,
}
impl Config {
	/// Applies `.env` (when present) and reads the process environment.
	pub fn load() -> Result<Self, ConfigError> {
		match dotenvy::dotenv() {
			Ok(path) => tracing::debug!(path = %path.display(), "Loaded environment file."),
			Err(e) if e.not_found() => {},
			Err(e) => {
				return Err(ConfigError::InvalidVariable { name: ".env", reason: e.to_string() });
			},
		}

		Self::from_env()
	}

	/// Reads the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Parses configuration from an arbitrary key lookup. Blank values count as unset.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let get = |name: &str| lookup(name).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
		let require = |name: &'static str| get(name).ok_or(ConfigError::MissingVariable { name });
		let mut credentials =
			ClientCredentials::new(require("GHL_CLIENT_ID")?, require("GHL_CLIENT_SECRET")?);

		if let Some(raw) = get("OAUTH_REDIRECT_URI") {
			credentials = credentials.with_redirect_uri(parse_url("OAUTH_REDIRECT_URI", &raw)?);
		}

		let base = parse_url("GHL_API_BASE", &get("GHL_API_BASE").unwrap_or(DEFAULT_API_BASE.into()))?;
		let mut descriptor = ProviderDescriptor::builder()
			.base_url(&base)?
			.api_version(get("GHL_API_VERSION").unwrap_or(DEFAULT_API_VERSION.into()));

		if let Some(app_id) = get("GHL_APP_ID") {
			descriptor = descriptor.app_id(app_id);
		}

		let http_timeout = match get("HTTP_TIMEOUT_SECS") {
			Some(raw) => match parse_number::<u64>("HTTP_TIMEOUT_SECS", &raw)? {
				0 => {
					return Err(ConfigError::InvalidVariable {
						name: "HTTP_TIMEOUT_SECS",
						reason: "must be greater than zero".into(),
					});
				},
				secs => StdDuration::from_secs(secs),
			},
			None => DEFAULT_HTTP_TIMEOUT,
		};
		let host = match get("HOST") {
			Some(raw) => raw.parse::<IpAddr>().map_err(|e| ConfigError::InvalidVariable {
				name: "HOST",
				reason: e.to_string(),
			})?,
			None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
		};
		let port = match (get("PORT"), get("PORT_DB")) {
			(Some(raw), _) => parse_number("PORT", &raw)?,
			(None, Some(raw)) => parse_number("PORT_DB", &raw)?,
			(None, None) => DEFAULT_PORT,
		};
		let database = DatabaseSettings {
			url: get("DATABASE_URL"),
			host: get("PGHOST"),
			port: get("PGPORT").map(|raw| parse_number("PGPORT", &raw)).transpose()?,
			database: get("PGDATABASE"),
			user: get("PGUSER"),
			password: get("PGPASSWORD"),
			ssl_mode: get("PGSSLMODE"),
			max_connections: get("DATABASE_MAX_CONNECTIONS")
				.map(|raw| parse_number("DATABASE_MAX_CONNECTIONS", &raw))
				.transpose()?
				.unwrap_or(DEFAULT_MAX_CONNECTIONS),
		};
		let menu = match (get("MENU_TITLE"), get("MENU_URL")) {
			(Some(title), Some(url)) => {
				let mut menu = MenuDefinition::new(title, parse_url("MENU_URL", &url)?);

				if let Some(icon) = get("MENU_ICON") {
					menu = menu.with_icon(icon);
				}
				if let Some(mode) = get("MENU_OPEN_MODE") {
					let mode = MenuOpenMode::from_str(&mode).map_err(|reason| {
						ConfigError::InvalidVariable { name: "MENU_OPEN_MODE", reason }
					})?;

					menu = menu.with_open_mode(mode);
				}

				Some(menu)
			},
			(None, None) => None,
			(Some(_), None) => return Err(ConfigError::MissingVariable { name: "MENU_URL" }),
			(None, Some(_)) => return Err(ConfigError::MissingVariable { name: "MENU_TITLE" }),
		};

		Ok(Self {
			credentials,
			descriptor: descriptor.build()?,
			http_timeout,
			listen: SocketAddr::new(host, port),
			database,
			menu,
		})
	}
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
	Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { name, source })
}

fn parse_number<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
	T: FromStr,
	T::Err: Display,
{
	raw.parse().map_err(|e: T::Err| ConfigError::InvalidVariable { name, reason: e.to_string() })
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map = pairs
			.iter()
			.map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
			.collect::<HashMap<String, String>>();

		move |key| map.get(key).cloned()
	}

	const REQUIRED: [(&str, &str); 2] = [("GHL_CLIENT_ID", "client"), ("GHL_CLIENT_SECRET", "secret")];

	#[test]
	fn defaults_apply_when_only_credentials_are_set() {
		let config = Config::from_lookup(lookup(&REQUIRED)).expect("Minimal config should parse.");

		assert_eq!(config.http_timeout, DEFAULT_HTTP_TIMEOUT);
		assert_eq!(config.listen.port(), DEFAULT_PORT);
		assert_eq!(config.descriptor.api_version, DEFAULT_API_VERSION);
		assert_eq!(
			config.descriptor.endpoints.token.as_str(),
			"https://services.leadconnectorhq.com/oauth/token"
		);
		assert_eq!(config.database.max_connections, DEFAULT_MAX_CONNECTIONS);
		assert!(config.menu.is_none());
		assert!(config.credentials.redirect_uri.is_none());
	}

	#[test]
	fn missing_secret_is_reported_by_name() {
		let err = Config::from_lookup(lookup(&[("GHL_CLIENT_ID", "client"), ("GHL_CLIENT_SECRET", " ")]))
			.expect_err("Blank secret must be rejected.");

		assert!(matches!(err, ConfigError::MissingVariable { name: "GHL_CLIENT_SECRET" }));
	}

	#[test]
	fn port_falls_back_to_port_db_and_menu_needs_both_halves() {
		let mut pairs = REQUIRED.to_vec();

		pairs.extend([
			("PORT_DB", "8080"),
			("PGPORT", "6543"),
			("MENU_TITLE", "Dashboard"),
			("MENU_URL", "https://app.example.com"),
			("MENU_OPEN_MODE", "new_tab"),
		]);

		let config = Config::from_lookup(lookup(&pairs)).expect("Config should parse.");
		let menu = config.menu.expect("Menu should be configured.");

		assert_eq!(config.listen.port(), 8080);
		assert_eq!(config.database.port, Some(6543));
		assert_eq!(menu.open_mode, MenuOpenMode::NewTab);

		let mut pairs = REQUIRED.to_vec();

		pairs.push(("MENU_TITLE", "Dashboard"));

		assert!(matches!(
			Config::from_lookup(lookup(&pairs)),
			Err(ConfigError::MissingVariable { name: "MENU_URL" })
		));
	}

	#[test]
	fn invalid_values_are_rejected() {
		let mut pairs = REQUIRED.to_vec();

		pairs.push(("HTTP_TIMEOUT_SECS", "0"));

		assert!(matches!(
			Config::from_lookup(lookup(&pairs)),
			Err(ConfigError::InvalidVariable { name: "HTTP_TIMEOUT_SECS", .. })
		));

		let mut pairs = REQUIRED.to_vec();

		pairs.push(("GHL_API_BASE", "not a url"));

		assert!(matches!(
			Config::from_lookup(lookup(&pairs)),
			Err(ConfigError::InvalidUrl { name: "GHL_API_BASE", .. })
		));
	}

	#[test]
	fn database_settings_debug_redacts_secrets() {
		let settings = DatabaseSettings {
			url: Some("postgres://user:hunter2@db/app".into()),
			password: Some("hunter2".into()),
			..DatabaseSettings::default()
		};

		assert!(!format!("{settings:?}").contains("hunter2"));
	}
}
