//! Storage contracts and built-in store implementations for tenant credential records.

pub mod file;
pub mod memory;
#[cfg(feature = "postgres")] pub mod postgres;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")] pub use postgres::PostgresStore;

// self
use crate::{
	_prelude::*,
	auth::{CredentialBundle, TenantKind},
};

/// Boxed future returned by every [`CredentialStore`] operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract implemented by tenant credential stores.
///
/// `put` is an unconditional upsert (last write wins). Callers that merge into an existing
/// record read it with `get` and write back through `compare_and_swap` keyed on the record
/// revision.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Inserts or replaces the credential stored for `tenant`.
	///
	/// Never fails because a record already exists; only storage faults surface as errors.
	fn put<'a>(
		&'a self,
		tenant: &'a TenantKind,
		credential: CredentialBundle,
	) -> StoreFuture<'a, TenantKind>;

	/// Fetches the record stored for `tenant`, returning `None` when absent.
	fn get<'a>(&'a self, tenant: &'a TenantKind) -> StoreFuture<'a, Option<TenantRecord>>;

	/// Replaces the credential only if the stored revision still equals `expected_revision`.
	///
	/// `None` means "insert only if no record exists yet".
	fn compare_and_swap<'a>(
		&'a self,
		tenant: &'a TenantKind,
		expected_revision: Option<u64>,
		credential: CredentialBundle,
	) -> StoreFuture<'a, CompareAndSwapOutcome>;

	/// Returns the store clock; doubles as a liveness probe.
	fn now(&self) -> StoreFuture<'_, OffsetDateTime>;

	/// Fetches only the credential stored for `tenant`.
	fn get_credential<'a>(
		&'a self,
		tenant: &'a TenantKind,
	) -> StoreFuture<'a, Option<CredentialBundle>> {
		Box::pin(async move { Ok(self.get(tenant).await?.map(|record| record.credential)) })
	}
}
impl<S> CredentialStore for Arc<S>
where
	S: ?Sized + CredentialStore,
{
	fn put<'a>(
		&'a self,
		tenant: &'a TenantKind,
		credential: CredentialBundle,
	) -> StoreFuture<'a, TenantKind> {
		(**self).put(tenant, credential)
	}

	fn get<'a>(&'a self, tenant: &'a TenantKind) -> StoreFuture<'a, Option<TenantRecord>> {
		(**self).get(tenant)
	}

	fn compare_and_swap<'a>(
		&'a self,
		tenant: &'a TenantKind,
		expected_revision: Option<u64>,
		credential: CredentialBundle,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		(**self).compare_and_swap(tenant, expected_revision, credential)
	}

	fn now(&self) -> StoreFuture<'_, OffsetDateTime> {
		(**self).now()
	}
}

/// Persisted row: one credential per tenant key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TenantRecord {
	/// Primary identity of the record.
	pub tenant: TenantKind,
	/// Stored credential, kept verbatim.
	pub credential: CredentialBundle,
	/// Monotonic write counter, starting at 1 for the first write.
	pub revision: u64,
}

/// Result of a revision compare-and-swap attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareAndSwapOutcome {
	/// The revision matched and the record was written.
	Updated,
	/// A record exists but its revision differs from the expected one.
	RevisionMismatch,
	/// An existing revision was expected but no record exists.
	Missing,
}
impl CompareAndSwapOutcome {
	/// Decides the outcome for the currently stored revision.
	pub fn evaluate(current: Option<u64>, expected: Option<u64>) -> Self {
		match (current, expected) {
			(None, None) => Self::Updated,
			(None, Some(_)) => Self::Missing,
			(Some(_), None) => Self::RevisionMismatch,
			(Some(current), Some(expected)) if current == expected => Self::Updated,
			(Some(_), Some(_)) => Self::RevisionMismatch,
		}
	}
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// The stored payload could not be encoded or decoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// A compare-and-swap merge kept losing to concurrent writers.
	#[error("Gave up merging into {tenant} after {attempts} attempts.")]
	Contention {
		/// Storage key of the contended record.
		tenant: String,
		/// Number of attempts made.
		attempts: u32,
	},
}
