//! Platform client: authorization-code exchange, location-token derivation, installed-location
//! listing, and custom-menu provisioning.
//!
//! Every call is a plain HTTP request dispatched through one [`TokenHttpClient`] handle so
//! timeouts, the version header, and error mapping stay uniform. Token responses are read as raw
//! JSON objects since the platform omits `token_type` and `expires_in` on some grants.

pub use oauth2;

// crates.io
use oauth2::{
	AsyncHttpClient, HttpClientError, HttpRequest,
	http::{
		Method, StatusCode,
		header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
	},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::{CompanyId, CredentialBundle, GrantLevel, LocationId, TokenSecret},
	error::{ExchangeError, ExchangeOperation},
	http::{API_VERSION_HEADER, ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	menu::{MenuDefinition, MenuTarget},
	provider::ProviderDescriptor,
};

/// Raw token endpoint payload, kept verbatim apart from normalization.
type TokenFields = BTreeMap<String, Value>;
type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ExchangeError>> + 'a + Send>>;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Maps HTTP transport failures into [`ExchangeError`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into an exchange error.
	fn map_transport_error(
		&self,
		operation: ExchangeOperation,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> ExchangeError;
}

/// Default mapper for reqwest-backed transports.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		operation: ExchangeOperation,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<ReqwestError>,
	) -> ExchangeError {
		tracing::debug!(
			operation = operation.as_str(),
			status = ?metadata.and_then(|meta| meta.status),
			"Transport failure while calling the platform."
		);

		match error {
			HttpClientError::Reqwest(inner) if inner.is_timeout() => ExchangeError::Timeout { operation },
			HttpClientError::Reqwest(inner) => ExchangeError::transport(operation, *inner),
			HttpClientError::Http(inner) => ExchangeError::transport(operation, inner),
			HttpClientError::Io(inner) if inner.kind() == std::io::ErrorKind::TimedOut =>
				ExchangeError::Timeout { operation },
			HttpClientError::Io(inner) => ExchangeError::transport(operation, inner),
			HttpClientError::Other(message) =>
				ExchangeError::Transport { operation, source: message.into() },
			_ => ExchangeError::Transport {
				operation,
				source: "Unknown HTTP client failure.".into(),
			},
		}
	}
}

/// Application credentials registered with the platform.
#[derive(Clone)]
pub struct ClientCredentials {
	/// OAuth client identifier.
	pub client_id: String,
	/// OAuth client secret.
	pub client_secret: TokenSecret,
	/// Redirect URI registered for the app, sent with the code exchange.
	pub redirect_uri: Option<Url>,
}
impl ClientCredentials {
	/// Creates credentials without a redirect URI.
	pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret: TokenSecret::new(client_secret),
			redirect_uri: None,
		}
	}

	/// Sets the redirect URI forwarded during the code exchange.
	pub fn with_redirect_uri(mut self, redirect_uri: Url) -> Self {
		self.redirect_uri = Some(redirect_uri);

		self
	}
}
impl Debug for ClientCredentials {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientCredentials")
			.field("client_id", &self.client_id)
			.field("client_secret", &"<redacted>")
			.field("redirect_uri", &self.redirect_uri.as_ref().map(Url::as_str))
			.finish()
	}
}

/// Credential obtained from the authorization-code exchange.
#[derive(Clone, Debug)]
pub struct ExchangedGrant {
	/// Normalized credential, stamped with the local issue instant.
	pub credential: CredentialBundle,
	/// Raw `locationId` from the response that failed identifier validation and was dropped.
	pub rejected_location_id: Option<String>,
}

/// Locations returned by the installed-locations listing, in listed order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstalledLocations {
	/// Entries whose identifier passed validation.
	pub accepted: Vec<LocationId>,
	/// Raw identifiers that failed validation (including the reserved agency key).
	pub rejected: Vec<String>,
}
impl InstalledLocations {
	/// First valid listed location.
	pub fn first(&self) -> Option<&LocationId> {
		self.accepted.first()
	}
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LocationListing {
	Bare(Vec<ListedLocation>),
	Envelope { locations: Vec<ListedLocation> },
}
impl LocationListing {
	fn into_entries(self) -> Vec<ListedLocation> {
		match self {
			LocationListing::Bare(entries) | LocationListing::Envelope { locations: entries } =>
				entries,
		}
	}
}

#[derive(Deserialize)]
struct ListedLocation {
	#[serde(default)]
	id: Option<String>,
	#[serde(default, rename = "_id")]
	underscore_id: Option<String>,
}

/// Client for every call the broker makes against the platform.
pub struct PlatformClient<C = ReqwestHttpClient, M = ReqwestTransportErrorMapper>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	credentials: ClientCredentials,
	descriptor: ProviderDescriptor,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> PlatformClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client for the descriptor using the provided transport and mapper.
	pub fn new(
		descriptor: ProviderDescriptor,
		credentials: &ClientCredentials,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			credentials: credentials.clone(),
			descriptor,
			http_client: http_client.into(),
			error_mapper: error_mapper.into(),
		}
	}

	/// Descriptor backing this client.
	pub fn descriptor(&self) -> &ProviderDescriptor {
		&self.descriptor
	}

	/// Exchanges a one-time authorization code, requesting the provided grant level.
	///
	/// The server decides the level it actually grants; callers compare
	/// [`CredentialBundle::grant_level`] with what they requested.
	pub fn exchange_authorization_code<'a>(
		&'a self,
		code: &'a str,
		requested: GrantLevel,
	) -> ClientFuture<'a, ExchangedGrant> {
		let operation = ExchangeOperation::AuthorizationCode;

		Box::pin(async move {
			let body = {
				let mut form = url::form_urlencoded::Serializer::new(String::new());

				form.append_pair("client_id", &self.credentials.client_id)
					.append_pair("client_secret", self.credentials.client_secret.expose())
					.append_pair("grant_type", "authorization_code")
					.append_pair("code", code)
					.append_pair("user_type", requested.as_user_type());

				if let Some(redirect) = self.credentials.redirect_uri.as_ref() {
					form.append_pair("redirect_uri", redirect.as_str());
				}

				form.finish().into_bytes()
			};
			let request = self.request(
				operation,
				Method::POST,
				self.descriptor.endpoints.token.clone(),
				None,
				Some((FORM_CONTENT_TYPE, body)),
			)?;
			let (status, bytes) = self.dispatch(operation, request).await?;
			let fields = parse_json::<TokenFields>(operation, status, &bytes)?;

			grant_from_response(operation, status, fields, OffsetDateTime::now_utc())
		})
	}

	/// Derives a location-scoped credential from an agency credential.
	pub fn derive_location_token<'a>(
		&'a self,
		agency: &'a CredentialBundle,
		company_id: &'a CompanyId,
		location_id: &'a LocationId,
	) -> ClientFuture<'a, CredentialBundle> {
		let operation = ExchangeOperation::LocationToken;

		Box::pin(async move {
			ensure_agency(operation, agency)?;

			let body = url::form_urlencoded::Serializer::new(String::new())
				.append_pair("companyId", company_id)
				.append_pair("locationId", location_id)
				.finish();
			let request = self.request(
				operation,
				Method::POST,
				self.descriptor.endpoints.location_token.clone(),
				Some(agency.access_token.expose()),
				Some((FORM_CONTENT_TYPE, body.into_bytes())),
			)?;
			let (status, bytes) = self.dispatch(operation, request).await?;
			let fields = parse_json::<TokenFields>(operation, status, &bytes)?;
			let grant = grant_from_response(operation, status, fields, OffsetDateTime::now_utc())?;
			let mut credential = grant.credential;

			if credential.grant_level != GrantLevel::Location {
				tracing::warn!(
					granted = %credential.grant_level,
					location = %location_id,
					"Location token request returned a non-location grant."
				);
			}
			if credential.location_id.as_ref() != Some(location_id) {
				credential.location_id = Some(location_id.clone());
			}

			Ok(credential)
		})
	}

	/// Lists the locations of the agency's company where the app is installed.
	pub fn installed_locations<'a>(
		&'a self,
		agency: &'a CredentialBundle,
	) -> ClientFuture<'a, InstalledLocations> {
		let operation = ExchangeOperation::InstalledLocations;

		Box::pin(async move {
			ensure_agency(operation, agency)?;

			let mut url = self.descriptor.endpoints.installed_locations.clone();

			{
				let mut query = url.query_pairs_mut();

				query.append_pair("companyId", &agency.company_id);
				query.append_pair("isInstalled", "true");

				if let Some(app_id) = self.descriptor.app_id.as_deref() {
					query.append_pair("appId", app_id);
				}
			}

			let request =
				self.request(operation, Method::GET, url, Some(agency.access_token.expose()), None)?;
			let (status, bytes) = self.dispatch(operation, request).await?;
			let listing = parse_json::<LocationListing>(operation, status, &bytes)?;
			let mut locations = InstalledLocations::default();

			for entry in listing.into_entries() {
				let Some(raw) = entry.id.or(entry.underscore_id) else {
					continue;
				};

				match LocationId::new(&raw) {
					Ok(id) => locations.accepted.push(id),
					Err(_) => locations.rejected.push(raw),
				}
			}

			Ok(locations)
		})
	}

	/// Provisions a custom menu using `bearer` as the credential.
	pub fn create_custom_menu<'a>(
		&'a self,
		bearer: &'a CredentialBundle,
		menu: &'a MenuDefinition,
		target: &'a MenuTarget,
	) -> ClientFuture<'a, Value> {
		let operation = ExchangeOperation::CustomMenu;

		Box::pin(async move {
			let body = serde_json::to_vec(&menu.payload(target))
				.map_err(|e| ExchangeError::transport(operation, e))?;
			let request = self.request(
				operation,
				Method::POST,
				self.descriptor.endpoints.custom_menus.clone(),
				Some(bearer.access_token.expose()),
				Some((JSON_CONTENT_TYPE, body)),
			)?;
			let (_, bytes) = self.dispatch(operation, request).await?;

			Ok(body_value(&bytes))
		})
	}

	fn request(
		&self,
		operation: ExchangeOperation,
		method: Method,
		url: Url,
		bearer: Option<&str>,
		body: Option<(&'static str, Vec<u8>)>,
	) -> Result<HttpRequest, ExchangeError> {
		let mut builder = oauth2::http::Request::builder()
			.method(method)
			.uri(url.as_str())
			.header(ACCEPT, JSON_CONTENT_TYPE)
			.header(API_VERSION_HEADER, self.descriptor.api_version.as_str());

		if let Some(bearer) = bearer {
			builder = builder.header(AUTHORIZATION, format!("Bearer {bearer}"));
		}

		let payload = match body {
			Some((content_type, bytes)) => {
				builder = builder.header(CONTENT_TYPE, content_type);

				bytes
			},
			None => Vec::new(),
		};

		builder.body(payload).map_err(|e| ExchangeError::transport(operation, e))
	}

	async fn dispatch(
		&self,
		operation: ExchangeOperation,
		request: HttpRequest,
	) -> Result<(StatusCode, Vec<u8>), ExchangeError> {
		let meta = ResponseMetadataSlot::default();
		let handle = self.http_client.with_metadata(meta.clone());
		let response = handle.call(request).await.map_err(|err| {
			self.error_mapper.map_transport_error(operation, meta.take().as_ref(), err)
		})?;
		let status = response.status();

		if !status.is_success() {
			return Err(ExchangeError::Rejected {
				operation,
				status: status.as_u16(),
				body: body_value(response.body()),
			});
		}

		Ok((status, response.into_body()))
	}
}
impl<C, M> Debug for PlatformClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PlatformClient").field("descriptor", &self.descriptor).finish()
	}
}

fn ensure_agency(
	operation: ExchangeOperation,
	credential: &CredentialBundle,
) -> Result<(), ExchangeError> {
	if credential.is_agency() { Ok(()) } else { Err(ExchangeError::NotAgencyGrant { operation }) }
}

fn grant_from_response(
	operation: ExchangeOperation,
	status: StatusCode,
	mut fields: TokenFields,
	issued_at: OffsetDateTime,
) -> Result<ExchangedGrant, ExchangeError> {
	for field in ["access_token", "userType", "companyId"] {
		if fields.get(field).is_none_or(Value::is_null) {
			return Err(ExchangeError::MissingField { operation, field });
		}
	}

	// A missing lifetime is stored as zero, which reads as an unknown expiry.
	if fields.get("expires_in").is_none_or(Value::is_null) {
		fields.insert("expires_in".into(), Value::from(0));
	}

	let rejected_location_id = match fields.remove("locationId") {
		None | Some(Value::Null) => None,
		Some(Value::String(raw)) if LocationId::new(&raw).is_ok() => {
			fields.insert("locationId".into(), Value::String(raw));

			None
		},
		Some(Value::String(raw)) => Some(raw),
		Some(other) => Some(other.to_string()),
	};
	let mut credential: CredentialBundle =
		serde_path_to_error::deserialize(Value::Object(fields.into_iter().collect())).map_err(
			|source| ExchangeError::Parse { operation, status: Some(status.as_u16()), source },
		)?;

	credential.issued_at = Some(issued_at);

	Ok(ExchangedGrant { credential, rejected_location_id })
}

fn parse_json<T>(
	operation: ExchangeOperation,
	status: StatusCode,
	bytes: &[u8],
) -> Result<T, ExchangeError>
where
	T: DeserializeOwned,
{
	let mut deserializer = serde_json::Deserializer::from_slice(bytes);

	serde_path_to_error::deserialize(&mut deserializer).map_err(|source| ExchangeError::Parse {
		operation,
		status: Some(status.as_u16()),
		source,
	})
}

/// Response body as JSON when parseable, otherwise as a string.
fn body_value(bytes: &[u8]) -> Value {
	if bytes.is_empty() {
		return Value::Null;
	}

	serde_json::from_slice(bytes)
		.unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn token_fields(payload: Value) -> TokenFields {
		serde_json::from_value(payload).expect("Token response fixture should deserialize.")
	}

	fn normalize(payload: Value) -> Result<ExchangedGrant, ExchangeError> {
		grant_from_response(
			ExchangeOperation::AuthorizationCode,
			StatusCode::OK,
			token_fields(payload),
			OffsetDateTime::now_utc(),
		)
	}

	#[test]
	fn grant_keeps_platform_fields_and_stamps_issue_time() {
		let issued_at = OffsetDateTime::now_utc();
		let fields = token_fields(serde_json::json!({
			"access_token": "tok1",
			"token_type": "Bearer",
			"expires_in": 86399,
			"refresh_token": "ref1",
			"scope": "oauth.write oauth.readonly",
			"userType": "Company",
			"companyId": "C1",
			"userId": "U1"
		}));
		let grant = grant_from_response(
			ExchangeOperation::AuthorizationCode,
			StatusCode::OK,
			fields,
			issued_at,
		)
		.expect("Grant should normalize.");

		assert_eq!(grant.credential.access_token.expose(), "tok1");
		assert_eq!(grant.credential.grant_level, GrantLevel::Agency);
		assert_eq!(grant.credential.expires_in, 86399);
		assert_eq!(grant.credential.issued_at, Some(issued_at));
		assert!(grant.credential.scope.contains("oauth.readonly"));
		assert_eq!(grant.credential.extra.get("userId"), Some(&serde_json::json!("U1")));
		assert!(grant.rejected_location_id.is_none());
	}

	#[test]
	fn reserved_location_in_response_is_dropped() {
		let grant = normalize(serde_json::json!({
			"access_token": "tok1",
			"token_type": "Bearer",
			"expires_in": 60,
			"userType": "Location",
			"companyId": "C1",
			"locationId": "__AGENCY__"
		}))
		.expect("Grant should normalize.");

		assert!(grant.credential.location_id.is_none());
		assert_eq!(grant.rejected_location_id.as_deref(), Some("__AGENCY__"));
	}

	#[test]
	fn missing_company_is_reported_by_name() {
		let err = normalize(serde_json::json!({
			"access_token": "tok1",
			"token_type": "Bearer",
			"expires_in": 60,
			"userType": "Company"
		}))
		.expect_err("Missing companyId must fail.");

		assert!(matches!(err, ExchangeError::MissingField { field: "companyId", .. }));
	}

	#[test]
	fn minimal_grant_without_token_type_or_lifetime_is_accepted() {
		let grant = normalize(serde_json::json!({
			"userType": "Company",
			"companyId": "C1",
			"access_token": "tok1"
		}))
		.expect("Minimal grant should normalize.");

		assert_eq!(grant.credential.access_token.expose(), "tok1");
		assert_eq!(grant.credential.expires_in, 0);
		assert!(grant.credential.refresh_token.is_none());
		assert!(!grant.credential.extra.contains_key("token_type"));
	}

	#[test]
	fn listing_accepts_both_shapes() {
		let bare: LocationListing = serde_json::from_value(serde_json::json!([{ "id": "L1" }]))
			.expect("Bare listing should parse.");
		let envelope: LocationListing = serde_json::from_value(serde_json::json!({
			"locations": [{ "_id": "L2", "name": "Downtown" }],
			"count": 1
		}))
		.expect("Envelope listing should parse.");

		assert_eq!(bare.into_entries()[0].id.as_deref(), Some("L1"));
		assert_eq!(envelope.into_entries()[0].underscore_id.as_deref(), Some("L2"));
	}

	#[test]
	fn body_value_falls_back_to_text() {
		assert_eq!(body_value(b"{\"error\":\"x\"}"), serde_json::json!({ "error": "x" }));
		assert_eq!(body_value(b"Bad Gateway"), serde_json::json!("Bad Gateway"));
		assert_eq!(body_value(b""), Value::Null);
	}
}
