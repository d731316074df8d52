//! Install webhook handling: derive and file a location credential from the stored agency grant.

// crates.io
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::{CompanyId, LocationId, TenantKind},
	flows::{Advisory, Broker},
	http::TokenHttpClient,
	menu::MenuTarget,
	oauth::TransportErrorMapper,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::StoreError,
};

const INSTALL_EVENT: &str = "INSTALL";
const LOCATION_INSTALL: &str = "Location";

/// Install notification posted by the platform.
///
/// Every field is optional so malformed events can be acknowledged instead of rejected.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct InstallEvent {
	/// Event type; only `INSTALL` is processed.
	#[serde(default, rename = "type", alias = "eventType")]
	pub event_type: Option<String>,
	/// Install scope; only `Location` is processed.
	#[serde(default, rename = "installType")]
	pub install_type: Option<String>,
	/// Location the app was installed on.
	#[serde(default, rename = "locationId")]
	pub location_id: Option<String>,
	/// Company owning the location.
	#[serde(default, rename = "companyId")]
	pub company_id: Option<String>,
	/// Installed app identifier.
	#[serde(default, rename = "appId")]
	pub app_id: Option<String>,
}
impl InstallEvent {
	/// Builds a location install event.
	pub fn location_install(location_id: impl Into<String>, company_id: impl Into<String>) -> Self {
		Self {
			event_type: Some(INSTALL_EVENT.into()),
			install_type: Some(LOCATION_INSTALL.into()),
			location_id: Some(location_id.into()),
			company_id: Some(company_id.into()),
			app_id: None,
		}
	}

	/// Parses a raw webhook body, treating anything that is not a JSON object as an empty event.
	pub fn from_slice(body: &[u8]) -> Self {
		match serde_json::from_slice::<Value>(body) {
			Ok(value @ Value::Object(_)) => serde_json::from_value(value).unwrap_or_default(),
			_ => Self::default(),
		}
	}

	fn classify(&self) -> Result<(LocationId, CompanyId), IgnoreReason> {
		if self.event_type.as_deref() != Some(INSTALL_EVENT) {
			return Err(IgnoreReason::NotInstallEvent);
		}
		if self.install_type.as_deref() != Some(LOCATION_INSTALL) {
			return Err(IgnoreReason::NotLocationInstall);
		}

		let (Some(location), Some(company)) = (
			self.location_id.as_deref().filter(|id| !id.is_empty()),
			self.company_id.as_deref().filter(|id| !id.is_empty()),
		) else {
			return Err(IgnoreReason::MissingIdentifiers);
		};

		LocationId::new(location)
			.and_then(|location| Ok((location, CompanyId::new(company)?)))
			.map_err(|_| IgnoreReason::InvalidIdentifier)
	}
}

/// Why an install event was acknowledged without action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
	/// `type` is not `INSTALL`.
	NotInstallEvent,
	/// `installType` is not `Location`.
	NotLocationInstall,
	/// `locationId` or `companyId` is missing.
	MissingIdentifiers,
	/// An identifier failed validation (including the reserved agency key).
	InvalidIdentifier,
}

/// Result of handling an install event. Every variant is acknowledged with HTTP 200.
#[derive(Clone, Debug, PartialEq)]
pub enum InstallOutcome {
	/// The event did not qualify for processing.
	Ignored {
		/// Filter that rejected it.
		reason: IgnoreReason,
	},
	/// No agency credential is on file, so nothing could be derived.
	NoAgencyToken {
		/// Location named by the event.
		location: LocationId,
	},
	/// Derivation failed; no location credential was stored.
	LocationTokenFailed {
		/// Location named by the event.
		location: LocationId,
		/// Failure details.
		advisories: Vec<Advisory>,
	},
	/// The composite credential was stored under the location key.
	Installed {
		/// Location named by the event.
		location: LocationId,
		/// Best-effort steps that did not complete.
		advisories: Vec<Advisory>,
	},
}
impl InstallOutcome {
	/// JSON acknowledgment returned to the webhook sender.
	pub fn ack_body(&self) -> Value {
		let (mut body, advisories) = match self {
			InstallOutcome::Ignored { .. } => (serde_json::json!({ "ignored": true }), None),
			InstallOutcome::NoAgencyToken { .. } =>
				(serde_json::json!({ "ok": false, "reason": "no_agency_token" }), None),
			InstallOutcome::LocationTokenFailed { advisories, .. } =>
				(serde_json::json!({ "ok": false, "error": "location_token_failed" }), Some(advisories)),
			InstallOutcome::Installed { advisories, .. } =>
				(serde_json::json!({ "ok": true }), Some(advisories)),
		};

		if let Some(advisories) = advisories.filter(|advisories| !advisories.is_empty()) {
			body["advisories"] = serde_json::to_value(advisories).unwrap_or(Value::Null);
		}

		body
	}

	fn flow_outcome(&self) -> FlowOutcome {
		match self {
			InstallOutcome::Ignored { .. } => FlowOutcome::Ignored,
			InstallOutcome::Installed { advisories, .. } if advisories.is_empty() =>
				FlowOutcome::Success,
			_ => FlowOutcome::Degraded,
		}
	}
}

impl<C, M> Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Handles a platform install notification.
	///
	/// Only storage faults are returned as errors; every other condition is an [`InstallOutcome`]
	/// the sender acknowledges without redelivering.
	pub async fn handle_install(&self, event: InstallEvent) -> Result<InstallOutcome> {
		const KIND: FlowKind = FlowKind::Install;

		let span = FlowSpan::new(KIND, "handle_install");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.process_install(event)).await;

		match &result {
			Ok(outcome) => obs::record_flow_outcome(KIND, outcome.flow_outcome()),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	async fn process_install(&self, event: InstallEvent) -> Result<InstallOutcome> {
		let (location, company) = match event.classify() {
			Ok(ids) => ids,
			Err(reason) => {
				tracing::debug!(
					?reason,
					event_type = ?event.event_type,
					install_type = ?event.install_type,
					"Ignoring webhook event."
				);

				return Ok(InstallOutcome::Ignored { reason });
			},
		};
		let Some(agency) = self.store.get_credential(&TenantKind::Agency).await? else {
			tracing::error!(
				%location,
				%company,
				"No agency credential on file; complete the agency OAuth install first."
			);

			return Ok(InstallOutcome::NoAgencyToken { location });
		};

		if agency.company_id != company {
			tracing::warn!(
				%location,
				event_company = %company,
				agency_company = %agency.company_id,
				"Install event names a different company than the stored agency credential."
			);
		}

		let mut advisories = Vec::new();
		let attached = match self
			.attach_location_access(&agency, &company, &location, &mut advisories)
			.await
		{
			Ok(attached) => attached,
			Err(Error::Storage(StoreError::Contention { tenant, attempts })) => {
				tracing::error!(%tenant, attempts, "Location credential merge kept losing races.");

				return Err(StoreError::Contention { tenant, attempts }.into());
			},
			Err(e) => return Err(e),
		};
		if attached.is_none() {
			return Ok(InstallOutcome::LocationTokenFailed { location, advisories });
		}

		self.provision_menu(&agency, MenuTarget::Location(location.clone()), &mut advisories).await;
		tracing::info!(%location, "Location install handled.");

		Ok(InstallOutcome::Installed { location, advisories })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn classify_applies_exact_filters() {
		let mut event = InstallEvent::location_install("L1", "C1");

		assert!(event.classify().is_ok());

		event.install_type = Some("Company".into());

		assert_eq!(event.classify(), Err(IgnoreReason::NotLocationInstall));

		event.event_type = Some("install".into());

		assert_eq!(event.classify(), Err(IgnoreReason::NotInstallEvent));
	}

	#[test]
	fn classify_tolerates_missing_and_reserved_identifiers() {
		let mut event = InstallEvent::location_install("L1", "C1");

		event.company_id = None;

		assert_eq!(event.classify(), Err(IgnoreReason::MissingIdentifiers));

		let event = InstallEvent::location_install("__AGENCY__", "C1");

		assert_eq!(event.classify(), Err(IgnoreReason::InvalidIdentifier));
	}

	#[test]
	fn webhook_bodies_parse_leniently() {
		let event = InstallEvent::from_slice(
			br#"{"type":"INSTALL","installType":"Location","locationId":"L1","companyId":"C1","extra":1}"#,
		);

		assert_eq!(event.location_id.as_deref(), Some("L1"));

		let aliased = InstallEvent::from_slice(br#"{"eventType":"INSTALL"}"#);

		assert_eq!(aliased.event_type.as_deref(), Some("INSTALL"));
		assert!(InstallEvent::from_slice(b"not json").event_type.is_none());
		assert!(InstallEvent::from_slice(b"[1,2]").event_type.is_none());
		assert!(InstallEvent::from_slice(br#"{"type":42}"#).event_type.is_none());
	}

	#[test]
	fn ack_bodies_match_the_webhook_contract() {
		let location = LocationId::new("L1").expect("Location fixture should be valid.");

		assert_eq!(
			InstallOutcome::Ignored { reason: IgnoreReason::NotInstallEvent }.ack_body(),
			serde_json::json!({ "ignored": true })
		);
		assert_eq!(
			InstallOutcome::NoAgencyToken { location: location.clone() }.ack_body(),
			serde_json::json!({ "ok": false, "reason": "no_agency_token" })
		);
		assert_eq!(
			InstallOutcome::Installed { location: location.clone(), advisories: Vec::new() }
				.ack_body(),
			serde_json::json!({ "ok": true })
		);

		let failed = InstallOutcome::LocationTokenFailed {
			location: location.clone(),
			advisories: vec![Advisory::LocationTokenFailed {
				location,
				status: Some(401),
				message: "rejected".into(),
			}],
		}
		.ack_body();

		assert_eq!(failed["error"], "location_token_failed");
		assert_eq!(failed["advisories"][0]["kind"], "location_token_failed");
	}
}
