//! Credential bundles: one OAuth grant response, optionally carrying a nested location grant.

// self
use crate::{
	_prelude::*,
	auth::{CompanyId, LocationId, ScopeSet, token::secret::TokenSecret},
};

/// Level at which a grant was issued (`userType` on the wire).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantLevel {
	/// Company-wide grant.
	#[serde(rename = "Company")]
	Agency,
	/// Grant scoped to a single location.
	Location,
}
impl GrantLevel {
	/// Returns the `user_type` value expected by the token endpoint.
	pub const fn as_user_type(self) -> &'static str {
		match self {
			GrantLevel::Agency => "Company",
			GrantLevel::Location => "Location",
		}
	}
}
impl Display for GrantLevel {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_user_type())
	}
}

/// Lifecycle status computed from the locally stamped issue instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// The bundle carries no issue instant or no usable lifetime, so expiry cannot be computed.
	Unknown,
	/// Token is not yet valid because the issued-at instant is in the future.
	Pending,
	/// Token is currently valid.
	Active,
	/// Token exceeded its expiry instant.
	Expired,
}

/// Errors produced by [`CredentialBundleBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum CredentialBundleBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when the expiry is negative.
	#[error("The expires_in value must not be negative.")]
	NegativeExpiresIn,
}

/// One grant response as persisted by the broker.
///
/// The JSON shape mirrors the token endpoint response (`access_token`, `userType`, `companyId`,
/// ...). Fields the broker does not model are kept in [`extra`](Self::extra) so the stored
/// payload stays verbatim.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialBundle {
	/// Bearer secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh secret, if the server issued one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<TokenSecret>,
	/// Lifetime in seconds, relative to the issue instant; zero when the server sent none.
	#[serde(default)]
	pub expires_in: i64,
	/// Granted capability set.
	#[serde(default)]
	pub scope: ScopeSet,
	/// Level the server actually granted.
	#[serde(rename = "userType")]
	pub grant_level: GrantLevel,
	/// Company the grant belongs to.
	#[serde(rename = "companyId")]
	pub company_id: CompanyId,
	/// Location the grant belongs to, when known.
	#[serde(rename = "locationId", default, skip_serializing_if = "Option::is_none")]
	pub location_id: Option<LocationId>,
	/// Instant the broker received the grant.
	#[serde(
		rename = "issuedAt",
		default,
		skip_serializing_if = "Option::is_none",
		with = "time::serde::rfc3339::option"
	)]
	pub issued_at: Option<OffsetDateTime>,
	/// Location grant derived from this agency grant (composite bundle).
	#[serde(rename = "locationAccess", default, skip_serializing_if = "Option::is_none")]
	pub location_access: Option<Box<CredentialBundle>>,
	/// Unmodelled response fields, preserved verbatim.
	#[serde(flatten)]
	pub extra: BTreeMap<String, serde_json::Value>,
}
impl CredentialBundle {
	/// Returns a builder for the provided grant level and company.
	pub fn builder(grant_level: GrantLevel, company_id: CompanyId) -> CredentialBundleBuilder {
		CredentialBundleBuilder::new(grant_level, company_id)
	}

	/// Returns `true` for company-wide grants.
	pub fn is_agency(&self) -> bool {
		matches!(self.grant_level, GrantLevel::Agency)
	}

	/// Expiry instant, when the issue instant and a positive lifetime are known and the sum stays
	/// in range.
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		if self.expires_in <= 0 {
			return None;
		}

		self.issued_at.and_then(|issued| issued.checked_add(Duration::seconds(self.expires_in)))
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> TokenStatus {
		let (Some(issued_at), Some(expires_at)) = (self.issued_at, self.expires_at()) else {
			return TokenStatus::Unknown;
		};

		if instant < issued_at {
			return TokenStatus::Pending;
		}
		if instant >= expires_at {
			return TokenStatus::Expired;
		}

		TokenStatus::Active
	}

	/// Returns `true` if the bundle is known to be expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), TokenStatus::Expired)
	}

	/// Returns a composite bundle carrying `location` under `locationAccess`.
	pub fn with_location_access(mut self, location: CredentialBundle) -> Self {
		self.location_access = Some(Box::new(location));

		self
	}

	/// Copies `previous.location_access` onto `self` when `self` has none and both bundles
	/// belong to the same company.
	///
	/// Returns `true` when a nested grant was carried over.
	pub fn inherit_location_access(&mut self, previous: &CredentialBundle) -> bool {
		if self.location_access.is_some() || previous.company_id != self.company_id {
			return false;
		}

		match previous.location_access.as_ref() {
			Some(nested) => {
				self.location_access = Some(nested.clone());

				true
			},
			None => false,
		}
	}
}
impl Debug for CredentialBundle {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialBundle")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_in", &self.expires_in)
			.field("scope", &self.scope)
			.field("grant_level", &self.grant_level)
			.field("company_id", &self.company_id)
			.field("location_id", &self.location_id)
			.field("issued_at", &self.issued_at)
			.field("location_access", &self.location_access)
			.field("extra_keys", &self.extra.keys().collect::<Vec<_>>())
			.finish()
	}
}

/// Builder for [`CredentialBundle`].
#[derive(Clone, Debug)]
pub struct CredentialBundleBuilder {
	grant_level: GrantLevel,
	company_id: CompanyId,
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	expires_in: i64,
	scope: ScopeSet,
	location_id: Option<LocationId>,
	issued_at: Option<OffsetDateTime>,
	extra: BTreeMap<String, serde_json::Value>,
}
impl CredentialBundleBuilder {
	fn new(grant_level: GrantLevel, company_id: CompanyId) -> Self {
		Self {
			grant_level,
			company_id,
			access_token: None,
			refresh_token: None,
			expires_in: 0,
			scope: ScopeSet::default(),
			location_id: None,
			issued_at: None,
			extra: BTreeMap::new(),
		}
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Sets the relative lifetime in seconds.
	pub fn expires_in(mut self, seconds: i64) -> Self {
		self.expires_in = seconds;

		self
	}

	/// Sets the granted scopes.
	pub fn scope(mut self, scope: ScopeSet) -> Self {
		self.scope = scope;

		self
	}

	/// Sets the location the grant belongs to.
	pub fn location_id(mut self, location: LocationId) -> Self {
		self.location_id = Some(location);

		self
	}

	/// Sets the issue instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Convenience helper that stamps `issued_at` with the current clock.
	pub fn issued_now(self) -> Self {
		self.issued_at(OffsetDateTime::now_utc())
	}

	/// Preserves an unmodelled response field.
	pub fn extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
		self.extra.insert(key.into(), value);

		self
	}

	/// Consumes the builder and produces a [`CredentialBundle`].
	pub fn build(self) -> Result<CredentialBundle, CredentialBundleBuilderError> {
		let access_token =
			self.access_token.ok_or(CredentialBundleBuilderError::MissingAccessToken)?;

		if self.expires_in < 0 {
			return Err(CredentialBundleBuilderError::NegativeExpiresIn);
		}

		Ok(CredentialBundle {
			access_token,
			refresh_token: self.refresh_token,
			expires_in: self.expires_in,
			scope: self.scope,
			grant_level: self.grant_level,
			company_id: self.company_id,
			location_id: self.location_id,
			issued_at: self.issued_at,
			location_access: None,
			extra: self.extra,
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn company() -> CompanyId {
		CompanyId::new("C1").expect("Company fixture should be valid.")
	}

	#[test]
	fn deserializes_token_endpoint_payload_and_keeps_unknown_fields() {
		let payload = serde_json::json!({
			"access_token": "tok1",
			"token_type": "Bearer",
			"expires_in": 86399,
			"refresh_token": "ref1",
			"scope": "oauth.write oauth.readonly",
			"userType": "Company",
			"companyId": "C1",
			"userId": "U1",
			"isBulkInstallation": true
		});
		let bundle: CredentialBundle =
			serde_json::from_value(payload).expect("Token payload should deserialize.");

		assert_eq!(bundle.access_token.expose(), "tok1");
		assert_eq!(bundle.grant_level, GrantLevel::Agency);
		assert_eq!(bundle.company_id, company());
		assert!(bundle.location_id.is_none());
		assert!(bundle.scope.contains("oauth.write"));
		assert_eq!(bundle.extra.get("userId"), Some(&serde_json::json!("U1")));
		assert_eq!(bundle.extra.get("token_type"), Some(&serde_json::json!("Bearer")));

		let round_trip = serde_json::to_value(&bundle).expect("Bundle should serialize.");

		assert_eq!(round_trip["userType"], "Company");
		assert_eq!(round_trip["isBulkInstallation"], true);
		assert!(round_trip.get("locationAccess").is_none());
	}

	#[test]
	fn composite_bundle_nests_location_access() {
		let agency = CredentialBundle::builder(GrantLevel::Agency, company())
			.access_token("tok1")
			.expires_in(3600)
			.build()
			.expect("Agency bundle should build.");
		let location = CredentialBundle::builder(GrantLevel::Location, company())
			.access_token("loc-tok")
			.expires_in(3600)
			.location_id(LocationId::new("L1").expect("Location fixture should be valid."))
			.build()
			.expect("Location bundle should build.");
		let composite = agency.with_location_access(location);
		let json = serde_json::to_value(&composite).expect("Composite bundle should serialize.");

		assert_eq!(json["locationAccess"]["access_token"], "loc-tok");
		assert_eq!(json["locationAccess"]["userType"], "Location");
		assert_eq!(json["locationAccess"]["locationId"], "L1");

		let parsed: CredentialBundle =
			serde_json::from_value(json).expect("Composite bundle should deserialize.");

		assert_eq!(parsed, composite);
	}

	#[test]
	fn inherit_location_access_respects_company() {
		let nested = CredentialBundle::builder(GrantLevel::Location, company())
			.access_token("loc-tok")
			.build()
			.expect("Nested bundle should build.");
		let previous = CredentialBundle::builder(GrantLevel::Agency, company())
			.access_token("old")
			.build()
			.expect("Previous bundle should build.")
			.with_location_access(nested);
		let mut fresh = CredentialBundle::builder(GrantLevel::Agency, company())
			.access_token("new")
			.build()
			.expect("Fresh bundle should build.");

		assert!(fresh.inherit_location_access(&previous));
		assert!(fresh.location_access.is_some());

		let mut other_company = CredentialBundle::builder(
			GrantLevel::Agency,
			CompanyId::new("C2").expect("Company fixture should be valid."),
		)
		.access_token("other")
		.build()
		.expect("Other bundle should build.");

		assert!(!other_company.inherit_location_access(&previous));
		assert!(other_company.location_access.is_none());
	}

	#[test]
	fn status_transitions_follow_issue_instant() {
		let bundle = CredentialBundle::builder(GrantLevel::Agency, company())
			.access_token("tok")
			.expires_in(3600)
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.build()
			.expect("Bundle should build.");

		assert_eq!(bundle.expires_at(), Some(macros::datetime!(2025-01-01 01:00 UTC)));
		assert_eq!(bundle.status_at(macros::datetime!(2024-12-31 23:59 UTC)), TokenStatus::Pending);
		assert_eq!(bundle.status_at(macros::datetime!(2025-01-01 00:30 UTC)), TokenStatus::Active);
		assert!(bundle.is_expired_at(macros::datetime!(2025-01-01 01:00 UTC)));

		let unstamped = CredentialBundle::builder(GrantLevel::Agency, company())
			.access_token("tok")
			.build()
			.expect("Bundle should build.");

		assert_eq!(unstamped.status_at(OffsetDateTime::now_utc()), TokenStatus::Unknown);

		let no_lifetime = CredentialBundle::builder(GrantLevel::Agency, company())
			.access_token("tok")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.build()
			.expect("Bundle should build.");

		assert_eq!(no_lifetime.status_at(macros::datetime!(2030-01-01 00:00 UTC)), TokenStatus::Unknown);
	}

	#[test]
	fn out_of_range_lifetime_reads_as_unknown() {
		let bundle = CredentialBundle::builder(GrantLevel::Agency, company())
			.access_token("tok")
			.expires_in(1_000_000_000_000)
			.issued_now()
			.build()
			.expect("Bundle should build.");

		assert!(bundle.expires_at().is_none());
		assert_eq!(bundle.status_at(OffsetDateTime::now_utc()), TokenStatus::Unknown);
		assert!(!bundle.is_expired_at(OffsetDateTime::now_utc()));
	}

	#[test]
	fn builder_rejects_missing_secret_and_negative_expiry() {
		assert_eq!(
			CredentialBundle::builder(GrantLevel::Agency, company()).build(),
			Err(CredentialBundleBuilderError::MissingAccessToken)
		);
		assert_eq!(
			CredentialBundle::builder(GrantLevel::Agency, company())
				.access_token("tok")
				.expires_in(-1)
				.build(),
			Err(CredentialBundleBuilderError::NegativeExpiresIn)
		);
	}

	#[test]
	fn debug_output_redacts_secrets() {
		let bundle = CredentialBundle::builder(GrantLevel::Agency, company())
			.access_token("very-secret")
			.refresh_token("also-secret")
			.build()
			.expect("Bundle should build.");
		let rendered = format!("{bundle:?}");

		assert!(!rendered.contains("very-secret"));
		assert!(!rendered.contains("also-secret"));
	}
}
