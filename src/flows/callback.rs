//! OAuth callback handling: exchange the authorization code, resolve the tenant, persist, derive.

// self
use crate::{
	_prelude::*,
	auth::{
		CompanyId, CredentialBundle, GrantLevel, INSTALLED_LOCATIONS_SCOPE, LocationId, TenantKind,
	},
	error::ValidationError,
	flows::{Advisory, Broker, common},
	http::TokenHttpClient,
	menu::MenuTarget,
	oauth::TransportErrorMapper,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::StoreError,
};

/// Query parameters delivered to the OAuth redirect endpoint.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CallbackRequest {
	/// One-time authorization code.
	#[serde(default)]
	pub code: Option<String>,
	/// Location the install was started from, when the platform supplies one.
	#[serde(default, rename = "locationId")]
	pub location_id: Option<String>,
}
impl CallbackRequest {
	/// Creates a request carrying only a code.
	pub fn with_code(code: impl Into<String>) -> Self {
		Self { code: Some(code.into()), location_id: None }
	}

	/// Attaches an explicit location identifier.
	pub fn with_location_id(mut self, location_id: impl Into<String>) -> Self {
		self.location_id = Some(location_id.into());

		self
	}
}

/// Result of a completed callback.
#[derive(Clone, Debug, Serialize)]
pub struct CallbackOutcome {
	/// Level the authorization server actually granted.
	pub grant_level: GrantLevel,
	/// Company the grant belongs to.
	pub company_id: CompanyId,
	/// Location the credential was filed under, when one could be resolved.
	pub location_id: Option<LocationId>,
	/// Tenants written during the flow, in write order.
	pub stored: Vec<TenantKind>,
	/// Whether a derived location credential was attached.
	pub location_access: bool,
	/// Best-effort steps that did not complete.
	pub advisories: Vec<Advisory>,
}
impl CallbackOutcome {
	/// Plain-text acknowledgment for the browser that completed the install.
	pub fn message(&self) -> &'static str {
		match self.grant_level {
			GrantLevel::Agency =>
				"App installed at the agency level. Location installs are now handled via webhook.",
			GrantLevel::Location => "App installed for the location.",
		}
	}
}

impl<C, M> Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Resolves the credential behind an OAuth callback.
	///
	/// The exchange always requests an agency grant. Exchange and storage failures are returned as
	/// errors with nothing persisted by the failing step; derivation, listing, and menu failures are
	/// reported through [`CallbackOutcome::advisories`].
	pub async fn handle_callback(&self, request: CallbackRequest) -> Result<CallbackOutcome> {
		const KIND: FlowKind = FlowKind::Callback;

		let span = FlowSpan::new(KIND, "handle_callback");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.resolve_callback(request)).await;

		match &result {
			Ok(outcome) if outcome.advisories.is_empty() =>
				obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Degraded),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	async fn resolve_callback(&self, request: CallbackRequest) -> Result<CallbackOutcome> {
		let code = request
			.code
			.as_deref()
			.map(str::trim)
			.filter(|code| !code.is_empty())
			.ok_or(ValidationError::MissingCode)?;
		let explicit = request
			.location_id
			.as_deref()
			.map(str::trim)
			.filter(|id| !id.is_empty())
			.map(LocationId::new)
			.transpose()
			.map_err(ValidationError::from)?;
		let mut advisories = Vec::new();
		let grant = self.client.exchange_authorization_code(code, GrantLevel::Agency).await?;
		let credential = grant.credential;

		tracing::info!(
			grant_level = %credential.grant_level,
			company = %credential.company_id,
			scope = %credential.scope,
			fingerprint = %credential.access_token.fingerprint(),
			"Authorization code exchanged."
		);

		if credential.grant_level != GrantLevel::Agency {
			tracing::warn!(
				requested = %GrantLevel::Agency,
				granted = %credential.grant_level,
				"Authorization server granted a different level than requested."
			);
			advisories.push(Advisory::GrantLevelMismatch {
				requested: GrantLevel::Agency,
				granted: credential.grant_level,
			});
		}
		if let Some(value) = grant.rejected_location_id {
			tracing::warn!(%value, "Ignoring invalid locationId from the token response.");
			advisories.push(Advisory::LocationIdentifierRejected { value });
		}

		let location = match explicit.or_else(|| credential.location_id.clone()) {
			Some(location) => Some(location),
			None if credential.is_agency() =>
				self.first_installed_location(&credential, &mut advisories).await,
			None => None,
		};
		let mut stored = Vec::new();

		if let Some(location) = location.as_ref() {
			let tenant = TenantKind::Location(location.clone());

			common::merge_into(self.store.as_ref(), &tenant, self.merge_attempts, |existing| {
				let mut next = credential.clone();

				if let Some(previous) = existing {
					next.inherit_location_access(previous);
				}

				next
			})
			.await?;
			tracing::info!(%tenant, "Stored credential.");
			stored.push(tenant);
		} else {
			tracing::info!("No location could be resolved; skipping location persistence.");
		}
		if credential.is_agency() {
			let tenant = self.store.put(&TenantKind::Agency, credential.clone()).await?;

			tracing::info!(%tenant, "Stored agency credential.");
			stored.push(tenant);
		}

		let mut location_access = false;

		if let (true, Some(location)) = (credential.is_agency(), location.as_ref()) {
			match self
				.attach_location_access(&credential, &credential.company_id, location, &mut advisories)
				.await
			{
				Ok(attached) => location_access = attached.is_some(),
				Err(Error::Storage(StoreError::Contention { attempts, .. })) => {
					tracing::warn!(%location, attempts, "Location credential merge kept losing races.");
					advisories
						.push(Advisory::MergeContention { location: location.clone(), attempts });
				},
				Err(e) => return Err(e),
			}
		}

		self.provision_menu(&credential, MenuTarget::for_location(location.as_ref()), &mut advisories)
			.await;

		Ok(CallbackOutcome {
			grant_level: credential.grant_level,
			company_id: credential.company_id.clone(),
			location_id: location,
			stored,
			location_access,
			advisories,
		})
	}

	async fn first_installed_location(
		&self,
		agency: &CredentialBundle,
		advisories: &mut Vec<Advisory>,
	) -> Option<LocationId> {
		if !agency.scope.permits(INSTALLED_LOCATIONS_SCOPE) {
			tracing::warn!(
				scope = %agency.scope,
				"Agency credential lacks the {INSTALLED_LOCATIONS_SCOPE} scope."
			);
		}

		match self.client.installed_locations(agency).await {
			Ok(listing) => {
				for value in listing.rejected.iter() {
					tracing::warn!(%value, "Skipping invalid location identifier from the listing.");
					advisories.push(Advisory::LocationIdentifierRejected { value: value.clone() });
				}

				let first = listing.first().cloned();

				tracing::debug!(
					listed = listing.accepted.len(),
					chosen = ?first,
					"Resolved location from the installed-locations listing."
				);

				first
			},
			Err(err) => {
				tracing::warn!(status = ?err.status(), error = %err, "Installed-locations lookup failed.");
				advisories.push(Advisory::LocationLookupFailed {
					status: err.status(),
					message: err.to_string(),
				});

				None
			},
		}
	}
}
