//! HTTP surface: OAuth callback, install webhook, and health probe.

// std
use std::{io, net::SocketAddr};
// crates.io
use axum::{
	Json, Router,
	body::Bytes,
	extract::{Query, State},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
// self
use crate::{
	_prelude::*,
	flows::{CallbackRequest, InstallEvent, ReqwestBroker},
};

/// Filter applied when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "agency_token_broker=info,tower_http=info";

#[derive(Serialize)]
struct HealthBody {
	ok: bool,
	#[serde(rename = "dbTime", with = "time::serde::rfc3339")]
	db_time: OffsetDateTime,
}

/// Builds the router serving every inbound route.
pub fn router(broker: ReqwestBroker) -> Router {
	Router::new()
		.route("/oauth/callback", get(oauth_callback))
		.route("/app-webhook", post(app_webhook))
		.route("/health", get(health))
		.layer(TraceLayer::new_for_http())
		.with_state(broker)
}

/// Serves the router on `listen` until Ctrl-C is received.
pub async fn serve(listen: SocketAddr, broker: ReqwestBroker) -> io::Result<()> {
	let listener = tokio::net::TcpListener::bind(listen).await?;

	tracing::info!(addr = %listener.local_addr()?, "Broker listening.");

	axum::serve(listener, router(broker)).with_graceful_shutdown(shutdown_signal()).await
}

/// Installs the global `tracing` subscriber, honoring `RUST_LOG` when set.
pub fn init_tracing() {
	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

	if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
		tracing::debug!("Global tracing subscriber already installed.");
	}
}

async fn shutdown_signal() {
	match tokio::signal::ctrl_c().await {
		Ok(()) => tracing::info!("Shutdown signal received."),
		Err(e) => tracing::error!(error = %e, "Failed to listen for the shutdown signal."),
	}
}

async fn oauth_callback(
	State(broker): State<ReqwestBroker>,
	Query(request): Query<CallbackRequest>,
) -> Response {
	match broker.handle_callback(request).await {
		Ok(outcome) => outcome.message().into_response(),
		Err(e) => error_response(e),
	}
}

async fn app_webhook(State(broker): State<ReqwestBroker>, body: Bytes) -> Response {
	match broker.handle_install(InstallEvent::from_slice(&body)).await {
		Ok(outcome) => Json(outcome.ack_body()).into_response(),
		Err(e) => {
			tracing::error!(error = %e, "Install webhook failed.");

			(StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() })))
				.into_response()
		},
	}
}

async fn health(State(broker): State<ReqwestBroker>) -> Response {
	match broker.health().await {
		Ok(db_time) => Json(HealthBody { ok: true, db_time }).into_response(),
		Err(e) => {
			tracing::error!(error = %e, "Health check failed.");

			(StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "ok": false, "error": e.to_string() })))
				.into_response()
		},
	}
}

fn error_response(err: Error) -> Response {
	match err {
		Error::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
		Error::Exchange(e) => {
			tracing::error!(operation = %e.operation(), status = ?e.status(), error = %e, "Callback exchange failed.");

			let status = e
				.status()
				.and_then(|status| StatusCode::from_u16(status).ok())
				.filter(|status| status.is_client_error() || status.is_server_error())
				.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

			(status, Json(json!({ "ok": false, "error": e.body() }))).into_response()
		},
		other => {
			tracing::error!(error = %other, "Callback failed.");

			(StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "ok": false, "error": other.to_string() })))
				.into_response()
		},
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::error::{ExchangeError, ExchangeOperation, ValidationError};

	#[test]
	fn exchange_errors_keep_upstream_error_status() {
		let response = error_response(
			ExchangeError::Rejected {
				operation: ExchangeOperation::AuthorizationCode,
				status: 401,
				body: json!({ "error": "invalid_grant" }),
			}
			.into(),
		);

		assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
	}

	#[test]
	fn non_error_statuses_fall_back_to_internal_error() {
		let response = error_response(
			ExchangeError::MissingField {
				operation: ExchangeOperation::AuthorizationCode,
				field: "companyId",
			}
			.into(),
		);

		assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
		assert_eq!(
			error_response(ValidationError::MissingCode.into()).status(),
			StatusCode::BAD_REQUEST
		);
	}
}
