// std
use std::net::IpAddr;
// crates.io
use url::Host;
// self
use crate::{
	_prelude::*,
	provider::{DEFAULT_API_VERSION, ProviderDescriptor, ProviderEndpoints},
};

/// Errors raised while constructing or validating descriptors.
#[derive(Debug, PartialEq, Eq, ThisError)]
pub enum ProviderDescriptorError {
	/// A required endpoint was never configured.
	#[error("Missing {endpoint} endpoint.")]
	MissingEndpoint {
		/// Which endpoint is missing.
		endpoint: &'static str,
	},
	/// An endpoint could not be derived from the base URL.
	#[error("The {endpoint} endpoint could not be derived.")]
	InvalidEndpoint {
		/// Which endpoint failed.
		endpoint: &'static str,
		/// Underlying parse failure.
		#[source]
		source: url::ParseError,
	},
	/// Endpoints must use HTTPS unless they point at the loopback interface.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// The API version header value cannot be empty.
	#[error("API version cannot be empty.")]
	EmptyApiVersion,
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug, Default)]
pub struct ProviderDescriptorBuilder {
	/// Token endpoint.
	pub token_endpoint: Option<Url>,
	/// Location-token endpoint.
	pub location_token_endpoint: Option<Url>,
	/// Installed-locations endpoint.
	pub installed_locations_endpoint: Option<Url>,
	/// Custom-menu endpoint.
	pub custom_menus_endpoint: Option<Url>,
	/// `Version` header value; defaults to [`DEFAULT_API_VERSION`].
	pub api_version: Option<String>,
	/// Marketplace application identifier.
	pub app_id: Option<String>,
}
impl ProviderDescriptorBuilder {
	/// Derives every endpoint from an API base URL.
	pub fn base_url(mut self, base: &Url) -> Result<Self, ProviderDescriptorError> {
		let mut base = base.clone();

		if !base.path().ends_with('/') {
			let path = format!("{}/", base.path());

			base.set_path(&path);
		}

		let join = |endpoint: &'static str, path: &str| {
			base.join(path).map_err(|source| ProviderDescriptorError::InvalidEndpoint { endpoint, source })
		};

		self.token_endpoint = Some(join("token", "oauth/token")?);
		self.location_token_endpoint = Some(join("location_token", "oauth/locationToken")?);
		self.installed_locations_endpoint =
			Some(join("installed_locations", "oauth/installedLocations")?);
		self.custom_menus_endpoint = Some(join("custom_menus", "custom-menus/")?);

		Ok(self)
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Sets the location-token endpoint.
	pub fn location_token_endpoint(mut self, url: Url) -> Self {
		self.location_token_endpoint = Some(url);

		self
	}

	/// Sets the installed-locations endpoint.
	pub fn installed_locations_endpoint(mut self, url: Url) -> Self {
		self.installed_locations_endpoint = Some(url);

		self
	}

	/// Sets the custom-menu endpoint.
	pub fn custom_menus_endpoint(mut self, url: Url) -> Self {
		self.custom_menus_endpoint = Some(url);

		self
	}

	/// Overrides the API version header value.
	pub fn api_version(mut self, version: impl Into<String>) -> Self {
		self.api_version = Some(version.into());

		self
	}

	/// Sets the marketplace application identifier.
	pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
		self.app_id = Some(app_id.into());

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		let endpoints = ProviderEndpoints {
			token: require("token", self.token_endpoint)?,
			location_token: require("location_token", self.location_token_endpoint)?,
			installed_locations: require(
				"installed_locations",
				self.installed_locations_endpoint,
			)?,
			custom_menus: require("custom_menus", self.custom_menus_endpoint)?,
		};
		let api_version = self.api_version.unwrap_or_else(|| DEFAULT_API_VERSION.to_owned());
		let descriptor = ProviderDescriptor {
			endpoints,
			api_version,
			app_id: self.app_id.filter(|id| !id.trim().is_empty()),
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

impl ProviderDescriptor {
	/// Validates invariants for the descriptor.
	fn validate(&self) -> Result<(), ProviderDescriptorError> {
		if self.api_version.trim().is_empty() {
			return Err(ProviderDescriptorError::EmptyApiVersion);
		}

		validate_endpoint("token", &self.endpoints.token)?;
		validate_endpoint("location_token", &self.endpoints.location_token)?;
		validate_endpoint("installed_locations", &self.endpoints.installed_locations)?;
		validate_endpoint("custom_menus", &self.endpoints.custom_menus)?;

		Ok(())
	}
}

fn require(endpoint: &'static str, url: Option<Url>) -> Result<Url, ProviderDescriptorError> {
	url.ok_or(ProviderDescriptorError::MissingEndpoint { endpoint })
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ProviderDescriptorError> {
	match url.scheme() {
		"https" => Ok(()),
		"http" if is_loopback(url) => Ok(()),
		_ => Err(ProviderDescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() }),
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host() {
		Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
		Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
		Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		None => false,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(raw: &str) -> Url {
		Url::parse(raw).expect("URL fixture should parse.")
	}

	#[test]
	fn base_url_with_path_keeps_prefix() {
		let descriptor = ProviderDescriptor::builder()
			.base_url(&url("https://gateway.example.com/ghl"))
			.expect("Base URL should derive endpoints.")
			.api_version("2021-04-15")
			.app_id("app-1")
			.build()
			.expect("Descriptor should build.");

		assert_eq!(descriptor.endpoints.token.as_str(), "https://gateway.example.com/ghl/oauth/token");
		assert_eq!(descriptor.api_version, "2021-04-15");
		assert_eq!(descriptor.app_id.as_deref(), Some("app-1"));
	}

	#[test]
	fn plain_http_is_only_allowed_on_loopback() {
		ProviderDescriptor::builder()
			.base_url(&url("http://127.0.0.1:8080"))
			.expect("Loopback base should derive endpoints.")
			.build()
			.expect("Loopback HTTP should be accepted for local development.");

		let err = ProviderDescriptor::builder()
			.base_url(&url("http://auth.example.com"))
			.expect("Base URL should derive endpoints.")
			.build()
			.expect_err("Remote plain HTTP must be rejected.");

		assert!(matches!(err, ProviderDescriptorError::InsecureEndpoint { endpoint: "token", .. }));
	}

	#[test]
	fn missing_endpoints_and_blank_version_are_rejected() {
		let err = ProviderDescriptor::builder()
			.token_endpoint(url("https://example.com/token"))
			.build()
			.expect_err("Descriptor without all endpoints must fail.");

		assert_eq!(err, ProviderDescriptorError::MissingEndpoint { endpoint: "location_token" });

		let err = ProviderDescriptor::builder()
			.base_url(&url("https://example.com"))
			.expect("Base URL should derive endpoints.")
			.api_version("  ")
			.build()
			.expect_err("Blank API version must fail.");

		assert_eq!(err, ProviderDescriptorError::EmptyApiVersion);
	}
}
