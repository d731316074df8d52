//! Broker-level error types shared across flows, the platform client, and stores.

// self
use crate::{_prelude::*, auth::IdentifierError};

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical broker error exposed by public APIs.
///
/// Only the fatal taxonomy lives here. Derivation and provisioning failures are reported as
/// [`Advisory`](crate::flows::Advisory) values because they must never fail the triggering request.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Required input was missing or malformed; no side effects were performed.
	#[error(transparent)]
	Validation(#[from] ValidationError),
	/// The authorization server rejected a request or could not be reached.
	#[error(transparent)]
	Exchange(#[from] ExchangeError),
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
}

/// Client-side input failures.
#[derive(Debug, ThisError)]
pub enum ValidationError {
	/// The authorization callback did not carry a `code` parameter.
	#[error("The callback is missing the 'code' parameter.")]
	MissingCode,
	/// A caller-supplied identifier failed validation (including the reserved agency key).
	#[error(transparent)]
	InvalidIdentifier(#[from] IdentifierError),
}

/// Outbound operations performed against the authorization server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeOperation {
	/// `grant_type=authorization_code` exchange.
	AuthorizationCode,
	/// Company-to-location token derivation.
	LocationToken,
	/// Installed-locations listing for a company.
	InstalledLocations,
	/// Custom-menu provisioning call.
	CustomMenu,
}
impl ExchangeOperation {
	/// Returns a stable label suitable for logs and span fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			ExchangeOperation::AuthorizationCode => "authorization_code",
			ExchangeOperation::LocationToken => "location_token",
			ExchangeOperation::InstalledLocations => "installed_locations",
			ExchangeOperation::CustomMenu => "custom_menu",
		}
	}
}
impl Display for ExchangeOperation {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Failures raised while talking to the authorization server.
///
/// None of these are retried by the broker; redelivery is left to the event source.
#[derive(Debug, ThisError)]
pub enum ExchangeError {
	/// Upstream answered with a non-success status.
	#[error("The {operation} request was rejected with HTTP {status}.")]
	Rejected {
		/// Operation that failed.
		operation: ExchangeOperation,
		/// Upstream HTTP status code.
		status: u16,
		/// Upstream response body (JSON when parseable, otherwise a string).
		body: serde_json::Value,
	},
	/// The request exceeded the configured timeout.
	#[error("The {operation} request timed out.")]
	Timeout {
		/// Operation that failed.
		operation: ExchangeOperation,
	},
	/// Network, TLS, or request-construction failure.
	#[error("The {operation} request failed before a response was received.")]
	Transport {
		/// Operation that failed.
		operation: ExchangeOperation,
		/// Transport-specific failure.
		#[source]
		source: BoxError,
	},
	/// Upstream answered successfully but the payload could not be parsed.
	#[error("The {operation} response could not be parsed.")]
	Parse {
		/// Operation that failed.
		operation: ExchangeOperation,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Upstream answered successfully but omitted a required field.
	#[error("The {operation} response is missing the {field} field.")]
	MissingField {
		/// Operation that failed.
		operation: ExchangeOperation,
		/// Wire name of the missing field.
		field: &'static str,
	},
	/// The supplied credential is not an agency-level grant.
	#[error("The {operation} request requires an agency-level credential.")]
	NotAgencyGrant {
		/// Operation that was refused.
		operation: ExchangeOperation,
	},
}
impl ExchangeError {
	/// Wraps a transport-specific failure.
	pub fn transport(
		operation: ExchangeOperation,
		src: impl 'static + Send + Sync + std::error::Error,
	) -> Self {
		Self::Transport { operation, source: Box::new(src) }
	}

	/// Operation that produced the error.
	pub fn operation(&self) -> ExchangeOperation {
		match self {
			Self::Rejected { operation, .. }
			| Self::Timeout { operation }
			| Self::Transport { operation, .. }
			| Self::Parse { operation, .. }
			| Self::MissingField { operation, .. }
			| Self::NotAgencyGrant { operation } => *operation,
		}
	}

	/// Upstream HTTP status, when one was received.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Rejected { status, .. } => Some(*status),
			Self::Parse { status, .. } => *status,
			_ => None,
		}
	}

	/// Payload suitable for propagating to the caller: the upstream body when available,
	/// otherwise the error message.
	pub fn body(&self) -> serde_json::Value {
		match self {
			Self::Rejected { body, .. } => body.clone(),
			other => serde_json::Value::String(other.to_string()),
		}
	}
}

/// Configuration and validation failures raised while assembling the broker.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Provider descriptor is invalid.
	#[error(transparent)]
	InvalidDescriptor(#[from] crate::provider::ProviderDescriptorError),
	/// A configured URL cannot be parsed.
	#[error("The {name} URL is invalid.")]
	InvalidUrl {
		/// Setting that carried the URL.
		name: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// A required environment variable is absent.
	#[error("The {name} variable is required.")]
	MissingVariable {
		/// Variable name.
		name: &'static str,
	},
	/// An environment variable holds an unusable value.
	#[error("The {name} variable is invalid: {reason}.")]
	InvalidVariable {
		/// Variable name.
		name: &'static str,
		/// Human-readable reason.
		reason: String,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn rejected_errors_expose_upstream_status_and_body() {
		let err = ExchangeError::Rejected {
			operation: ExchangeOperation::AuthorizationCode,
			status: 401,
			body: serde_json::json!({ "error": "invalid_grant" }),
		};

		assert_eq!(err.status(), Some(401));
		assert_eq!(err.body(), serde_json::json!({ "error": "invalid_grant" }));
		assert_eq!(err.operation(), ExchangeOperation::AuthorizationCode);
	}

	#[test]
	fn timeouts_fall_back_to_message_body() {
		let err = ExchangeError::Timeout { operation: ExchangeOperation::LocationToken };

		assert_eq!(err.status(), None);
		assert_eq!(err.body(), serde_json::json!("The location_token request timed out."));
	}

	#[test]
	fn validation_errors_convert_into_broker_errors() {
		let err: Error = ValidationError::MissingCode.into();

		assert!(matches!(err, Error::Validation(ValidationError::MissingCode)));
	}
}
