//! Broker service entry point.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
// self
use agency_token_broker::{
	api,
	config::Config,
	flows::ReqwestBroker,
	store::{CredentialStore, PostgresStore},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	api::init_tracing();

	let config = Config::load()?;

	tracing::info!(
		version = env!("CARGO_PKG_VERSION"),
		listen = %config.listen,
		api_version = %config.descriptor.api_version,
		menu = config.menu.is_some(),
		"Starting agency token broker."
	);

	let store = PostgresStore::connect(&config.database).await?;

	store.migrate().await?;

	let shared: Arc<dyn CredentialStore> = Arc::new(store.clone());
	let mut broker =
		ReqwestBroker::new(shared, config.descriptor, &config.credentials, config.http_timeout)?;

	if let Some(menu) = config.menu {
		broker = broker.with_menu(menu);
	}

	let served = api::serve(config.listen, broker).await;

	store.close().await;
	tracing::info!("Store closed.");

	Ok(served?)
}
