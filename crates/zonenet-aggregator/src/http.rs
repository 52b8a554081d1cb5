//! External interfaces (spec §6): the sample-frame ingestion endpoint and
//! the metrics scrape endpoint, plus an `http_requests_total` wrapper
//! around both (SPEC_FULL.md §B).

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use tracing::error;
use zonenet_core::prelude::*;

use crate::index::{Index, log_flows};
use crate::metrics::{Metrics, RequestLabels};

#[derive(Clone)]
pub struct App {
	pub index: Arc<Index>,
	pub registry: Arc<Registry>,
	pub metrics: Metrics,
}

pub fn router(app: App) -> Router {
	Router::new()
		.route("/write-network-statistics", post(ingest_handler))
		.route("/metrics", get(metrics_handler))
		.layer(middleware::from_fn_with_state(app.clone(), count_requests))
		.with_state(app)
}

/// Records `http_requests_total{handler,method,code}` for every request,
/// regardless of how the handler resolved (spec §6).
async fn count_requests(
	State(app): State<App>,
	req: axum::extract::Request,
	next: Next,
) -> Response {
	let method = req.method().clone();
	let path = req.uri().path().to_string();
	let response = next.run(req).await;
	app.metrics.http_requests.get_or_create(&RequestLabels {
		handler: path,
		method: method.to_string(),
		code: response.status().as_u16(),
	}).inc();
	response
}

/// Decodes a sample frame and folds it into the index. Any method other
/// than POST is rejected by the router itself with 405; a body the
/// runtime can't read back is a 500, a decode error is a 400.
async fn ingest_handler(State(app): State<App>, request: axum::extract::Request) -> Response {
	let body = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
		Ok(body) => body,
		Err(err) => {
			error!(error = %err, "failed to read request body");
			return StatusCode::INTERNAL_SERVER_ERROR.into_response();
		}
	};
	let entries = match zonenet_wire::decode(&body) {
		Ok(entries) => entries,
		Err(err) => {
			return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
		}
	};
	let flows = app.index.ingest(&entries);
	log_flows(&flows);
	StatusCode::OK.into_response()
}

/// Encodes the registry in the Prometheus text exposition format. Reads
/// the index lock only indirectly, via the `Family` counters it owns
/// (spec §4.6).
async fn metrics_handler(State(app): State<App>) -> Response {
	let mut buffer = String::new();
	match encode(&mut buffer, &app.registry) {
		Ok(()) => (
			StatusCode::OK,
			[("content-type", "application/openmetrics-text; version=1.0.0; charset=utf-8")],
			buffer,
		)
			.into_response(),
		Err(err) => {
			error!(error = %err, "failed to encode metrics");
			StatusCode::INTERNAL_SERVER_ERROR.into_response()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use http_body_util::BodyExt;
	use tower::ServiceExt;

	fn test_app() -> App {
		let mut registry = Registry::default();
		let metrics = Metrics::new(&mut registry);
		App {
			index: Arc::new(Index::new(metrics.clone())),
			registry: Arc::new(registry),
			metrics,
		}
	}

	#[tokio::test]
	async fn rejects_non_post_on_ingest() {
		let app = router(test_app());
		let req = axum::http::Request::builder()
			.method(Method::GET)
			.uri("/write-network-statistics")
			.body(axum::body::Body::empty())
			.unwrap();
		let resp = app.oneshot(req).await.unwrap();
		assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
	}

	#[tokio::test]
	async fn rejects_malformed_frame() {
		let app = router(test_app());
		let req = axum::http::Request::builder()
			.method(Method::POST)
			.uri("/write-network-statistics")
			.body(axum::body::Body::from(vec![0u8, 0, 0]))
			.unwrap();
		let resp = app.oneshot(req).await.unwrap();
		assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn accepts_empty_frame() {
		let app = router(test_app());
		let req = axum::http::Request::builder()
			.method(Method::POST)
			.uri("/write-network-statistics")
			.body(axum::body::Body::from(vec![0u8, 0, 0, 0]))
			.unwrap();
		let resp = app.oneshot(req).await.unwrap();
		assert_eq!(resp.status(), StatusCode::OK);
	}

	#[tokio::test]
	async fn metrics_endpoint_exposes_registered_families() {
		let app = router(test_app());
		let req = axum::http::Request::builder()
			.method(Method::GET)
			.uri("/metrics")
			.body(axum::body::Body::empty())
			.unwrap();
		let resp = app.oneshot(req).await.unwrap();
		assert_eq!(resp.status(), StatusCode::OK);
		let body = resp.into_body().collect().await.unwrap().to_bytes();
		let text = String::from_utf8(body.to_vec()).unwrap();
		assert!(text.contains("http_requests_total"));
	}
}
