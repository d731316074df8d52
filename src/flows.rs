//! Flow orchestrators: the OAuth callback resolver and the install webhook handler.

pub mod callback;
pub mod common;
pub mod install;

pub use callback::*;
pub use common::*;
pub use install::*;

// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	auth::LocationId,
	error::ConfigError,
	http::{ReqwestHttpClient, TokenHttpClient},
	menu::MenuDefinition,
	oauth::{ClientCredentials, PlatformClient, ReqwestTransportErrorMapper, TransportErrorMapper},
	provider::ProviderDescriptor,
	store::CredentialStore,
};

/// Attempts a compare-and-swap merge makes before giving up.
pub const DEFAULT_MERGE_ATTEMPTS: u32 = 5;

/// Broker specialized for the crate's default reqwest transport stack.
pub type ReqwestBroker = Broker<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Coordinates credential acquisition, derivation, and persistence for one platform app.
///
/// The broker owns the platform client, the injected credential store, and the optional menu
/// definition so the individual flows only describe their step ordering.
pub struct Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Client used for every outbound platform call.
	pub client: Arc<PlatformClient<C, M>>,
	/// Store that persists tenant credentials.
	pub store: Arc<dyn CredentialStore>,
	/// Menu provisioned after installs; `None` disables provisioning.
	pub menu: Option<MenuDefinition>,
	/// Compare-and-swap attempts per merge.
	pub merge_attempts: u32,
	flow_guards: Arc<Mutex<HashMap<LocationId, Arc<AsyncMutex<()>>>>>,
}
impl<C, M> Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a broker around an existing platform client.
	pub fn with_client(
		store: Arc<dyn CredentialStore>,
		client: impl Into<Arc<PlatformClient<C, M>>>,
	) -> Self {
		Self {
			client: client.into(),
			store,
			menu: None,
			merge_attempts: DEFAULT_MERGE_ATTEMPTS,
			flow_guards: Default::default(),
		}
	}

	/// Enables custom-menu provisioning after installs.
	pub fn with_menu(mut self, menu: MenuDefinition) -> Self {
		self.menu = Some(menu);

		self
	}

	/// Overrides the number of compare-and-swap attempts (minimum 1).
	pub fn with_merge_attempts(mut self, attempts: u32) -> Self {
		self.merge_attempts = attempts.max(1);

		self
	}

	/// Returns the store clock, failing when the store is unreachable.
	pub async fn health(&self) -> Result<OffsetDateTime> {
		Ok(self.store.now().await?)
	}
}
impl Broker<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a broker with its own reqwest transport bounded by `timeout`.
	pub fn new(
		store: Arc<dyn CredentialStore>,
		descriptor: ProviderDescriptor,
		credentials: &ClientCredentials,
		timeout: StdDuration,
	) -> Result<Self, ConfigError> {
		let http_client = ReqwestHttpClient::with_timeout(timeout, &descriptor.api_version)?;
		let client = <PlatformClient<ReqwestHttpClient, ReqwestTransportErrorMapper>>::new(
			descriptor,
			credentials,
			http_client,
			ReqwestTransportErrorMapper,
		);

		Ok(Self::with_client(store, client))
	}
}
impl<C, M> Clone for Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self {
			client: Arc::clone(&self.client),
			store: Arc::clone(&self.store),
			menu: self.menu.clone(),
			merge_attempts: self.merge_attempts,
			flow_guards: Arc::clone(&self.flow_guards),
		}
	}
}
impl<C, M> Debug for Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Broker")
			.field("client", &self.client)
			.field("menu", &self.menu)
			.field("merge_attempts", &self.merge_attempts)
			.finish()
	}
}
