//! Shared helpers for flow implementations (advisories, compare-and-swap merges, guards).

// self
use crate::{
	_prelude::*,
	auth::{
		CompanyId, CredentialBundle, GrantLevel, LOCATION_TOKEN_SCOPE, LocationId, TenantKind,
	},
	error::ExchangeError,
	flows::Broker,
	http::TokenHttpClient,
	menu::MenuTarget,
	oauth::TransportErrorMapper,
	store::{CompareAndSwapOutcome, CredentialStore, StoreError},
};

/// Non-fatal condition reported alongside a successful flow.
///
/// Advisories never change the transport-level outcome of a request; they record which
/// best-effort steps did not complete.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
	/// The server granted a different level than the one requested.
	GrantLevelMismatch {
		/// Level the broker asked for.
		requested: GrantLevel,
		/// Level the server returned.
		granted: GrantLevel,
	},
	/// The installed-locations listing failed.
	LocationLookupFailed {
		/// Upstream status, when one was received.
		status: Option<u16>,
		/// Failure summary.
		message: String,
	},
	/// A platform-supplied location identifier failed validation and was ignored.
	LocationIdentifierRejected {
		/// Offending raw value.
		value: String,
	},
	/// Location token derivation failed; the location has no derived credential.
	LocationTokenFailed {
		/// Location the derivation targeted.
		location: LocationId,
		/// Upstream status, when one was received.
		status: Option<u16>,
		/// Failure summary.
		message: String,
	},
	/// The derived credential could not be merged because of concurrent writers.
	MergeContention {
		/// Location whose record was contended.
		location: LocationId,
		/// Attempts made.
		attempts: u32,
	},
	/// Custom-menu provisioning failed.
	MenuProvisioningFailed {
		/// `global` or the location identifier.
		target: String,
		/// Upstream status, when one was received.
		status: Option<u16>,
		/// Failure summary.
		message: String,
	},
}
impl Advisory {
	/// Builds a [`Advisory::LocationTokenFailed`] from an exchange error.
	pub fn location_token_failed(location: &LocationId, err: &ExchangeError) -> Self {
		Self::LocationTokenFailed {
			location: location.clone(),
			status: err.status(),
			message: err.to_string(),
		}
	}
}

/// Reads, merges, and conditionally writes the record for `tenant`, retrying on revision
/// conflicts.
///
/// `merge` receives the currently stored credential (if any) and returns the value to write. It
/// may run several times. Fails with [`StoreError::Contention`] after `attempts` conflicts.
pub async fn merge_into<F>(
	store: &dyn CredentialStore,
	tenant: &TenantKind,
	attempts: u32,
	mut merge: F,
) -> Result<CredentialBundle, StoreError>
where
	F: Send + FnMut(Option<&CredentialBundle>) -> CredentialBundle,
{
	let attempts = attempts.max(1);

	for attempt in 1..=attempts {
		let current = store.get(tenant).await?;
		let expected = current.as_ref().map(|record| record.revision);
		let merged = merge(current.as_ref().map(|record| &record.credential));

		match store.compare_and_swap(tenant, expected, merged.clone()).await? {
			CompareAndSwapOutcome::Updated => return Ok(merged),
			outcome => tracing::debug!(%tenant, attempt, ?outcome, "Merge lost a revision race."),
		}
	}

	Err(StoreError::Contention { tenant: tenant.to_string(), attempts })
}

/// Returns (and creates on demand) the singleflight guard for a location.
pub(crate) fn flow_guard<C, M>(broker: &Broker<C, M>, location: &LocationId) -> Arc<AsyncMutex<()>>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let mut guards = broker.flow_guards.lock();

	guards.entry(location.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
}

/// Drops the guard for `location` from the broker map once no other caller holds it.
pub(crate) fn release_flow_guard<C, M>(
	broker: &Broker<C, M>,
	location: &LocationId,
	guard: Arc<AsyncMutex<()>>,
) where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let mut guards = broker.flow_guards.lock();

	// Clones are only handed out under the map lock; a count of two means the map and `guard`
	// are the last holders.
	if guards.get(location).is_some_and(|held| Arc::ptr_eq(held, &guard))
		&& Arc::strong_count(&guard) == 2
	{
		guards.remove(location);
	}
}

/// Nested grant on `current` that can stand in for a fresh derivation from `agency`: same company,
/// unexpired, and derived no earlier than `agency` was issued.
fn reusable_location_access<'a>(
	current: &'a CredentialBundle,
	agency: &CredentialBundle,
	now: OffsetDateTime,
) -> Option<&'a CredentialBundle> {
	let nested = current.location_access.as_deref()?;

	if nested.company_id != agency.company_id || nested.is_expired_at(now) {
		return None;
	}

	matches!(
		(nested.issued_at, agency.issued_at),
		(Some(derived), Some(issued)) if derived >= issued
	)
	.then_some(nested)
}

/// Agency snapshot a location composite should carry: the stored one when it is a newer grant
/// for the same company, otherwise `agency`.
fn newest_agency_snapshot(
	current: Option<&CredentialBundle>,
	agency: &CredentialBundle,
) -> CredentialBundle {
	match current {
		Some(current)
			if current.is_agency()
				&& current.company_id == agency.company_id
				&& matches!(
					(current.issued_at, agency.issued_at),
					(Some(stored), Some(ours)) if stored > ours
				) =>
		{
			let mut snapshot = current.clone();

			snapshot.location_access = None;

			snapshot
		},
		_ => agency.clone(),
	}
}

impl<C, M> Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Derives a location credential from `agency` and stores the composite bundle under the
	/// location key.
	///
	/// Runs under the per-location guard. A stored composite whose nested grant was derived no
	/// earlier than `agency` was issued is returned as-is without another derivation call.
	///
	/// Returns `Ok(None)` when the derivation call failed (an advisory is pushed). Storage
	/// failures, including exhausted merges, are returned as errors.
	pub(crate) async fn attach_location_access(
		&self,
		agency: &CredentialBundle,
		company: &CompanyId,
		location: &LocationId,
		advisories: &mut Vec<Advisory>,
	) -> Result<Option<CredentialBundle>> {
		let guard = flow_guard(self, location);
		let result = {
			let _singleflight = guard.lock().await;

			self.derive_and_merge(agency, company, location, advisories).await
		};

		release_flow_guard(self, location, guard);

		result
	}

	async fn derive_and_merge(
		&self,
		agency: &CredentialBundle,
		company: &CompanyId,
		location: &LocationId,
		advisories: &mut Vec<Advisory>,
	) -> Result<Option<CredentialBundle>> {
		let tenant = TenantKind::Location(location.clone());
		let now = OffsetDateTime::now_utc();

		let current = self.store.get(&tenant).await?.map(|record| record.credential);
		let reusable = current
			.as_ref()
			.and_then(|current| reusable_location_access(current, agency, now))
			.map(|nested| nested.access_token.fingerprint());

		if let Some(fingerprint) = reusable {
			tracing::debug!(
				%location,
				%fingerprint,
				"Reusing the location credential derived by a concurrent flow."
			);

			return Ok(current);
		}
		if agency.is_expired_at(now) {
			tracing::warn!(%location, "Agency credential looks expired; deriving anyway.");
		}
		if !agency.scope.permits(LOCATION_TOKEN_SCOPE) {
			tracing::warn!(
				%location,
				scope = %agency.scope,
				"Agency credential lacks the {LOCATION_TOKEN_SCOPE} scope."
			);
		}

		let derived = match self.client.derive_location_token(agency, company, location).await {
			Ok(derived) => derived,
			Err(err) => {
				tracing::warn!(%location, status = ?err.status(), error = %err, "Location token derivation failed.");
				advisories.push(Advisory::location_token_failed(location, &err));

				return Ok(None);
			},
		};

		tracing::info!(
			%location,
			fingerprint = %derived.access_token.fingerprint(),
			"Derived location credential."
		);

		let stored = merge_into(self.store.as_ref(), &tenant, self.merge_attempts, |current| {
			newest_agency_snapshot(current, agency).with_location_access(derived.clone())
		})
		.await?;

		Ok(Some(stored))
	}

	/// Provisions the configured menu, recording failures as advisories.
	pub(crate) async fn provision_menu(
		&self,
		bearer: &CredentialBundle,
		target: MenuTarget,
		advisories: &mut Vec<Advisory>,
	) {
		let Some(menu) = self.menu.as_ref() else {
			return;
		};
		let label = match &target {
			MenuTarget::Global => "global".to_owned(),
			MenuTarget::Location(id) => id.to_string(),
		};

		match self.client.create_custom_menu(bearer, menu, &target).await {
			Ok(_) => tracing::info!(target = %label, "Custom menu provisioned."),
			Err(err) => {
				tracing::warn!(target = %label, status = ?err.status(), error = %err, "Custom menu provisioning failed.");
				advisories.push(Advisory::MenuProvisioningFailed {
					target: label,
					status: err.status(),
					message: err.to_string(),
				});
			},
		}
	}
}
