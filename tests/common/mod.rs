#![allow(dead_code)]

// std
use std::{sync::Arc, time::Duration};
// crates.io
use httpmock::prelude::*;
use serde_json::{Value, json};
// self
use agency_token_broker::{
	auth::{CompanyId, CredentialBundle, GrantLevel, LocationId, ScopeSet},
	flows::ReqwestBroker,
	oauth::ClientCredentials,
	provider::ProviderDescriptor,
	store::{CredentialStore, MemoryStore},
	url::Url,
};

pub const CLIENT_ID: &str = "client-it";
pub const CLIENT_SECRET: &str = "secret-it";
pub const API_VERSION: &str = "2021-07-28";

pub fn descriptor(server: &MockServer) -> ProviderDescriptor {
	let base = Url::parse(&server.base_url()).expect("Mock server base URL should parse.");

	ProviderDescriptor::builder()
		.base_url(&base)
		.expect("Endpoints should derive from the mock base URL.")
		.api_version(API_VERSION)
		.app_id("app-it")
		.build()
		.expect("Mock descriptor should build.")
}

/// Builds a broker whose platform calls hit `server` and whose records land in `store`.
pub fn build_test_broker(server: &MockServer, store: &MemoryStore) -> ReqwestBroker {
	let shared: Arc<dyn CredentialStore> = Arc::new(store.clone());

	ReqwestBroker::new(
		shared,
		descriptor(server),
		&ClientCredentials::new(CLIENT_ID, CLIENT_SECRET),
		Duration::from_secs(5),
	)
	.expect("Test broker should build.")
}

pub fn company(value: &str) -> CompanyId {
	CompanyId::new(value).expect("Company fixture should be valid.")
}

pub fn location(value: &str) -> LocationId {
	LocationId::new(value).expect("Location fixture should be valid.")
}

/// Agency bundle issued now with the scopes every derivation needs.
pub fn agency_bundle(token: &str, company_id: &str) -> CredentialBundle {
	CredentialBundle::builder(GrantLevel::Agency, company(company_id))
		.access_token(token)
		.refresh_token(format!("{token}-refresh"))
		.expires_in(86_399)
		.scope(
			ScopeSet::new(["oauth.readonly", "oauth.write"]).expect("Scope fixture should be valid."),
		)
		.issued_now()
		.build()
		.expect("Agency bundle fixture should build.")
}

/// Token endpoint payload in the platform's wire shape.
pub fn token_payload(user_type: &str, token: &str, extra: Value) -> String {
	let mut payload = json!({
		"access_token": token,
		"token_type": "Bearer",
		"expires_in": 86399,
		"refresh_token": format!("{token}-refresh"),
		"scope": "oauth.readonly oauth.write",
		"userType": user_type,
		"companyId": "C1",
	});

	if let (Some(target), Value::Object(extra)) = (payload.as_object_mut(), extra) {
		target.extend(extra);
	}

	payload.to_string()
}

pub async fn mock_code_exchange(server: &MockServer, body: String) -> httpmock::Mock<'_> {
	server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/oauth/token")
				.header("content-type", "application/x-www-form-urlencoded")
				.body_includes("grant_type=authorization_code")
				.body_includes("user_type=Company");
			then.status(200).header("content-type", "application/json").body(&body);
		})
		.await
}

pub async fn mock_location_token<'a>(
	server: &'a MockServer,
	location_id: &str,
	token: &str,
) -> httpmock::Mock<'a> {
	let body = token_payload("Location", token, json!({ "locationId": location_id }));
	let form = format!("locationId={location_id}");

	server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/oauth/locationToken")
				.header("version", API_VERSION)
				.body_includes(form.as_str());
			then.status(200).header("content-type", "application/json").body(&body);
		})
		.await
}

pub async fn mock_installed_locations(server: &MockServer, listing: Value) -> httpmock::Mock<'_> {
	server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/oauth/installedLocations")
				.query_param("companyId", "C1")
				.query_param("isInstalled", "true");
			then.status(200).header("content-type", "application/json").body(listing.to_string());
		})
		.await
}
