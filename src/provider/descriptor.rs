//! Provider descriptor data structures shared by every outbound call.

/// Builder API for assembling provider descriptors.
pub mod builder;

pub use builder::*;

// self
use crate::_prelude::*;

/// Production API host of the platform.
pub const DEFAULT_API_BASE: &str = "https://services.leadconnectorhq.com";
/// API version sent in the `Version` header when none is configured.
pub const DEFAULT_API_VERSION: &str = "2021-07-28";

/// Endpoint set used by the broker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
	/// Token endpoint used for the authorization-code exchange.
	pub token: Url,
	/// Endpoint deriving a location token from an agency token.
	pub location_token: Url,
	/// Endpoint listing the locations where the app is installed.
	pub installed_locations: Url,
	/// Custom-menu provisioning endpoint.
	pub custom_menus: Url,
}

/// Immutable platform descriptor consumed by [`PlatformClient`](crate::oauth::PlatformClient).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Endpoint definitions.
	pub endpoints: ProviderEndpoints,
	/// Value of the `Version` header.
	pub api_version: String,
	/// Marketplace application identifier, forwarded to the installed-locations listing.
	pub app_id: Option<String>,
}
impl ProviderDescriptor {
	/// Creates a new, empty builder.
	pub fn builder() -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::default()
	}

	/// Descriptor for the production platform host.
	pub fn leadconnector() -> Result<Self, ProviderDescriptorError> {
		let base = Url::parse(DEFAULT_API_BASE)
			.map_err(|source| ProviderDescriptorError::InvalidEndpoint { endpoint: "base", source })?;

		Self::builder().base_url(&base)?.build()
	}
}
