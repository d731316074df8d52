//! Thread-safe in-memory [`CredentialStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::{CredentialBundle, TenantKind},
	store::{CompareAndSwapOutcome, CredentialStore, StoreFuture, TenantRecord},
};

type StoreMap = Arc<RwLock<HashMap<TenantKind, TenantRecord>>>;

/// Thread-safe storage backend that keeps records in-process for tests and demos.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Number of stored records.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when no record has been written.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	/// Snapshot of every stored record, ordered by storage key.
	pub fn records(&self) -> Vec<TenantRecord> {
		let mut records = self.0.read().values().cloned().collect::<Vec<_>>();

		records.sort_by(|a, b| a.tenant.cmp(&b.tenant));

		records
	}

	fn put_now(map: StoreMap, tenant: TenantKind, credential: CredentialBundle) -> TenantKind {
		let mut guard = map.write();
		let revision = guard.get(&tenant).map_or(1, |existing| existing.revision + 1);

		guard.insert(tenant.clone(), TenantRecord { tenant: tenant.clone(), credential, revision });

		tenant
	}

	fn cas_now(
		map: StoreMap,
		tenant: TenantKind,
		expected_revision: Option<u64>,
		credential: CredentialBundle,
	) -> CompareAndSwapOutcome {
		let mut guard = map.write();
		let current = guard.get(&tenant).map(|existing| existing.revision);
		let outcome = CompareAndSwapOutcome::evaluate(current, expected_revision);

		if matches!(outcome, CompareAndSwapOutcome::Updated) {
			let revision = current.map_or(1, |revision| revision + 1);

			guard.insert(tenant.clone(), TenantRecord { tenant, credential, revision });
		}

		outcome
	}
}
impl CredentialStore for MemoryStore {
	fn put<'a>(
		&'a self,
		tenant: &'a TenantKind,
		credential: CredentialBundle,
	) -> StoreFuture<'a, TenantKind> {
		let map = self.0.clone();
		let tenant = tenant.to_owned();

		Box::pin(async move { Ok(Self::put_now(map, tenant, credential)) })
	}

	fn get<'a>(&'a self, tenant: &'a TenantKind) -> StoreFuture<'a, Option<TenantRecord>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.read().get(tenant).cloned()) })
	}

	fn compare_and_swap<'a>(
		&'a self,
		tenant: &'a TenantKind,
		expected_revision: Option<u64>,
		credential: CredentialBundle,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		let map = self.0.clone();
		let tenant = tenant.to_owned();

		Box::pin(async move { Ok(Self::cas_now(map, tenant, expected_revision, credential)) })
	}

	fn now(&self) -> StoreFuture<'_, OffsetDateTime> {
		Box::pin(async move { Ok(OffsetDateTime::now_utc()) })
	}
}
