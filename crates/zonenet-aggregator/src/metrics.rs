//! `pod_cross_zone_network_traffic_bytes_total{namespace,pod}` and the
//! `http_requests_total{handler,method,code}` wrapper around every
//! handler (spec §6, SPEC_FULL.md §B).

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PodLabels {
	pub namespace: String,
	pub pod: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
	pub handler: String,
	pub method: String,
	pub code: u16,
}

#[derive(Clone)]
pub struct Metrics {
	pub cross_zone_bytes: Family<PodLabels, Counter>,
	pub http_requests: Family<RequestLabels, Counter>,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Self {
		// prometheus-client appends `_total` to Counter family names at
		// encode time, so the registered name omits the suffix that the
		// exposed metric (`pod_cross_zone_network_traffic_bytes_total`)
		// carries on the wire.
		let cross_zone_bytes = Family::default();
		registry.register(
			"pod_cross_zone_network_traffic_bytes",
			"The amount of cross-zone traffic the pod caused",
			cross_zone_bytes.clone(),
		);

		let http_requests = Family::default();
		registry.register(
			"http_requests",
			"Tracks the number of HTTP requests",
			http_requests.clone(),
		);

		Self {
			cross_zone_bytes,
			http_requests,
		}
	}
}
