//! Simple file-backed [`CredentialStore`] for single-node deployments without a database.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{CredentialBundle, TenantKind},
	store::{CompareAndSwapOutcome, CredentialStore, StoreError, StoreFuture, TenantRecord},
};

/// Persists tenant records to a JSON file after each mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<HashMap<TenantKind, TenantRecord>>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the backing snapshot.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<HashMap<TenantKind, TenantRecord>, StoreError> {
		if !path.exists() {
			return Ok(HashMap::new());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(HashMap::new());
		}

		let records: Vec<TenantRecord> =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;

		Ok(records.into_iter().map(|record| (record.tenant.clone(), record)).collect())
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	/// Writes `contents` plus `record` to disk, then swaps the result in. A failed write leaves
	/// `contents` untouched.
	fn commit_locked(
		&self,
		contents: &mut HashMap<TenantKind, TenantRecord>,
		record: TenantRecord,
	) -> Result<(), StoreError> {
		let mut next = contents.clone();

		next.insert(record.tenant.clone(), record);
		self.persist_locked(&next)?;
		*contents = next;

		Ok(())
	}

	fn persist_locked(&self, contents: &HashMap<TenantKind, TenantRecord>) -> Result<(), StoreError> {
		let mut snapshot = contents.values().collect::<Vec<_>>();

		snapshot.sort_by(|a, b| a.tenant.cmp(&b.tenant));

		let serialized =
			serde_json::to_vec_pretty(&snapshot).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl CredentialStore for FileStore {
	fn put<'a>(
		&'a self,
		tenant: &'a TenantKind,
		credential: CredentialBundle,
	) -> StoreFuture<'a, TenantKind> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let revision = guard.get(tenant).map_or(1, |existing| existing.revision + 1);

			self.commit_locked(
				&mut guard,
				TenantRecord { tenant: tenant.clone(), credential, revision },
			)?;

			Ok(tenant.clone())
		})
	}

	fn get<'a>(&'a self, tenant: &'a TenantKind) -> StoreFuture<'a, Option<TenantRecord>> {
		Box::pin(async move { Ok(self.inner.read().get(tenant).cloned()) })
	}

	fn compare_and_swap<'a>(
		&'a self,
		tenant: &'a TenantKind,
		expected_revision: Option<u64>,
		credential: CredentialBundle,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let current = guard.get(tenant).map(|existing| existing.revision);
			let outcome = CompareAndSwapOutcome::evaluate(current, expected_revision);

			if matches!(outcome, CompareAndSwapOutcome::Updated) {
				let revision = current.map_or(1, |revision| revision + 1);

				self.commit_locked(
					&mut guard,
					TenantRecord { tenant: tenant.clone(), credential, revision },
				)?;
			}

			Ok(outcome)
		})
	}

	fn now(&self) -> StoreFuture<'_, OffsetDateTime> {
		Box::pin(async move {
			let probe = if self.path.exists() {
				self.path.as_path()
			} else {
				self.path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."))
			};

			fs::metadata(probe).map_err(|e| StoreError::Backend {
				message: format!("Store path {} is unreachable: {e}", probe.display()),
			})?;

			Ok(OffsetDateTime::now_utc())
		})
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// crates.io
	use tokio::runtime::Runtime;
	// self
	use super::*;
	use crate::auth::{CompanyId, GrantLevel, LocationId};

	fn temp_path() -> PathBuf {
		let unique = format!(
			"agency_token_broker_file_store_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	fn build_bundle() -> CredentialBundle {
		CredentialBundle::builder(
			GrantLevel::Location,
			CompanyId::new("C1").expect("Failed to build company fixture."),
		)
		.access_token("access-token")
		.expires_in(3600)
		.location_id(LocationId::new("L1").expect("Failed to build location fixture."))
		.build()
		.expect("Failed to build file-store test bundle.")
	}

	#[test]
	fn save_and_reload_round_trip() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let tenant =
			TenantKind::from(LocationId::new("L1").expect("Failed to build location fixture."));
		let bundle = build_bundle();
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");

		rt.block_on(store.put(&tenant, bundle.clone()))
			.expect("Failed to save fixture bundle to file store.");
		rt.block_on(store.put(&TenantKind::Agency, bundle.clone()))
			.expect("Failed to save agency fixture to file store.");
		drop(store);

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");
		let fetched = rt
			.block_on(reopened.get(&tenant))
			.expect("Failed to fetch fixture record from file store.")
			.expect("File store lost record after reopen.");

		assert_eq!(fetched.credential, bundle);
		assert_eq!(fetched.revision, 1);
		assert!(
			rt.block_on(reopened.get(&TenantKind::Agency))
				.expect("Failed to fetch agency record from file store.")
				.is_some()
		);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}

	#[test]
	fn stale_revision_is_not_persisted() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");

		rt.block_on(store.put(&TenantKind::Agency, build_bundle()))
			.expect("Failed to save fixture bundle to file store.");

		let outcome = rt
			.block_on(store.compare_and_swap(&TenantKind::Agency, Some(7), build_bundle()))
			.expect("Compare-and-swap should run.");

		assert_eq!(outcome, CompareAndSwapOutcome::RevisionMismatch);

		let record = rt
			.block_on(store.get(&TenantKind::Agency))
			.expect("Failed to fetch agency record.")
			.expect("Agency record should exist.");

		assert_eq!(record.revision, 1);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}

	#[test]
	fn failed_write_leaves_memory_unchanged() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");

		rt.block_on(store.put(&TenantKind::Agency, build_bundle()))
			.expect("Failed to save fixture bundle to file store.");

		let mut tmp_path = path.clone();

		tmp_path.set_extension("tmp");
		fs::create_dir(&tmp_path).expect("Failed to block the temporary snapshot path.");

		let tenant =
			TenantKind::from(LocationId::new("L2").expect("Failed to build location fixture."));

		assert!(rt.block_on(store.put(&tenant, build_bundle())).is_err());
		assert!(
			rt.block_on(store.compare_and_swap(&TenantKind::Agency, Some(1), build_bundle()))
				.is_err()
		);
		assert!(rt.block_on(store.get(&tenant)).expect("Failed to read from file store.").is_none());
		assert_eq!(
			rt.block_on(store.get(&TenantKind::Agency))
				.expect("Failed to read from file store.")
				.map(|record| record.revision),
			Some(1)
		);

		fs::remove_dir(&tmp_path).unwrap_or_else(|e| {
			panic!("Failed to remove blocking directory {}: {e}", tmp_path.display())
		});
		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}
}
