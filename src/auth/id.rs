//! Strongly typed identifiers and tenant keys enforced across the broker domain.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;

/// Prefix reserved for broker-internal keys; platform-issued identifiers never start with it.
pub const RESERVED_PREFIX: &str = "__";
/// Storage key of the agency-level record.
pub const AGENCY_TENANT_KEY: &str = "__AGENCY__";

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty or whitespace.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (company, location).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (company, location).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (company, location).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
	/// The identifier collides with the reserved broker namespace.
	#[error("{kind} identifier uses the reserved `__` prefix.")]
	Reserved {
		/// Kind of identifier (company, location).
		kind: &'static str,
	},
}

def_id! { CompanyId, "Identifier of an agency (company) on the platform.", "Company" }
def_id! { LocationId, "Identifier of a location (subaccount) on the platform.", "Location" }

/// Identity of a stored credential: the agency itself or one of its locations.
///
/// Agency records live under [`AGENCY_TENANT_KEY`]. Because [`LocationId`] rejects the reserved
/// prefix, no location can ever map onto the agency row.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TenantKind {
	/// Company-wide credential.
	Agency,
	/// Credential scoped to one location.
	Location(LocationId),
}
impl TenantKind {
	/// Key under which the record is persisted.
	pub fn storage_key(&self) -> &str {
		match self {
			TenantKind::Agency => AGENCY_TENANT_KEY,
			TenantKind::Location(id) => id,
		}
	}

	/// Parses a persisted key back into a tenant.
	pub fn from_storage_key(key: &str) -> Result<Self, IdentifierError> {
		if key == AGENCY_TENANT_KEY {
			Ok(TenantKind::Agency)
		} else {
			LocationId::new(key).map(TenantKind::Location)
		}
	}

	/// Returns the location identifier for location tenants.
	pub fn location(&self) -> Option<&LocationId> {
		match self {
			TenantKind::Agency => None,
			TenantKind::Location(id) => Some(id),
		}
	}

	/// Returns `true` for the agency tenant.
	pub fn is_agency(&self) -> bool {
		matches!(self, TenantKind::Agency)
	}
}
impl From<LocationId> for TenantKind {
	fn from(value: LocationId) -> Self {
		TenantKind::Location(value)
	}
}
impl From<TenantKind> for String {
	fn from(value: TenantKind) -> Self {
		value.storage_key().to_owned()
	}
}
impl TryFrom<String> for TenantKind {
	type Error = IdentifierError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::from_storage_key(&value)
	}
}
impl Debug for TenantKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			TenantKind::Agency => f.write_str("Agency"),
			TenantKind::Location(id) => write!(f, "Location({id})"),
		}
	}
}
impl Display for TenantKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.storage_key())
	}
}

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}
	if view.starts_with(RESERVED_PREFIX) {
		return Err(IdentifierError::Reserved { kind });
	}

	Ok(())
}
