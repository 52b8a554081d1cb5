//! The periodic drain and filter pipeline (spec §4.2 "Periodic drain").

use std::borrow::{Borrow, BorrowMut};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;

use aya::maps::{HashMap as AyaHashMap, MapData};
use tracing::{debug, warn};
use zonenet_common::byteorder::ntohl;
use zonenet_common::{DEFAULT_MAP_CAPACITY, FlowKey, FlowValue};
use zonenet_core::prelude::*;

use crate::watch::LocalWorkloads;

pub struct DrainConfig {
	pub flush_interval: Duration,
	pub aggregator_url: String,
	pub send_enabled: bool,
	pub debug: bool,
}

/// Runs the periodic drain loop until `shutdown` fires. `map` is the
/// kernel-shared flow map; `dropped_inserts` is the kernel-local
/// insertion-failure counter (SPEC_FULL.md §B) surfaced as a log line.
pub async fn run<M, D>(
	mut map: AyaHashMap<M, FlowKey, FlowValue>,
	dropped_inserts: Option<aya::maps::PerCpuArray<D, u32>>,
	local: Arc<LocalWorkloads>,
	http: reqwest::Client,
	config: DrainConfig,
	shutdown: tokio_util::sync::CancellationToken,
) where
	M: Borrow<MapData> + BorrowMut<MapData>,
	D: Borrow<MapData>,
{
	let mut ticker = tokio::time::interval(config.flush_interval);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	let mut key_buf: Vec<FlowKey> = Vec::with_capacity(DEFAULT_MAP_CAPACITY as usize);
	let mut value_buf: Vec<FlowValue> = Vec::with_capacity(DEFAULT_MAP_CAPACITY as usize);

	loop {
		tokio::select! {
			_ = ticker.tick() => {
				tick(&mut map, &mut key_buf, &mut value_buf, &local, &http, &config).await;
				if let Some(dropped) = &dropped_inserts {
					log_dropped_inserts(dropped);
				}
			}
			() = shutdown.cancelled() => {
				debug!("drain loop shutting down");
				break;
			}
		}
	}
}

async fn tick<M: Borrow<MapData> + BorrowMut<MapData>>(
	map: &mut AyaHashMap<M, FlowKey, FlowValue>,
	key_buf: &mut Vec<FlowKey>,
	value_buf: &mut Vec<FlowValue>,
	local: &LocalWorkloads,
	http: &reqwest::Client,
	config: &DrainConfig,
) {
	key_buf.clear();
	value_buf.clear();
	if let Err(err) = drain_into(map, key_buf, value_buf) {
		warn!(error = %err, "batch lookup-and-delete failed, skipping this cycle");
		return;
	}
	if key_buf.is_empty() {
		debug!("no data, skipping");
		return;
	}

	let owned = local.snapshot();
	let (keys, values) = filter_local_sources(key_buf, value_buf, &owned);

	if config.debug {
		for (key, value) in keys.iter().zip(&values) {
			debug!(
				src = %Ipv4Addr::from(ntohl(key.src_ip)),
				dst = %Ipv4Addr::from(ntohl(key.dst_ip)),
				bytes = value.bytes,
				"drained flow"
			);
		}
	}

	if !config.send_enabled {
		debug!("sending data disabled, skipping");
		return;
	}
	if keys.is_empty() {
		return;
	}

	deliver(http, &config.aggregator_url, &keys, &values).await;
}

/// Encodes one filtered batch and POSTs it to the aggregator (spec §4.2
/// step 5, §4.3). Delivery failures and non-2xx responses are logged
/// and the batch is discarded — at-most-once, no in-process retry
/// (spec §7).
async fn deliver(http: &reqwest::Client, url: &str, keys: &[FlowKey], values: &[FlowValue]) {
	let frame = zonenet_wire::encode(keys, values);
	match http.post(url).body(frame).send().await {
		Ok(resp) if resp.status().is_success() => {
			debug!(count = keys.len(), "sent sample frame");
		}
		Ok(resp) => {
			warn!(status = %resp.status(), "aggregator rejected sample frame");
		}
		Err(err) => {
			warn!(error = %err, "failed to deliver sample frame");
		}
	}
}

/// Atomic-per-entry batch lookup-and-delete (spec §4.2 step 1): every
/// key returned to user space is removed from the map before this
/// function returns, so a given flow is counted at most once per drain
/// (spec §8). `aya`'s safe `HashMap` exposes per-key primitives rather
/// than a single batch syscall, so this walks the map collecting each
/// entry and deleting it immediately after reading it.
fn drain_into<M: Borrow<MapData> + BorrowMut<MapData>>(
	map: &mut AyaHashMap<M, FlowKey, FlowValue>,
	keys: &mut Vec<FlowKey>,
	values: &mut Vec<FlowValue>,
) -> Result<(), aya::maps::MapError> {
	let snapshot: Vec<FlowKey> = map.keys().collect::<Result<_, _>>()?;
	for key in snapshot {
		match map.get(&key, 0) {
			Ok(value) => {
				keys.push(key);
				values.push(value);
				let _ = map.remove(&key);
			}
			Err(aya::maps::MapError::KeyNotFound) => {
				// raced with another drain or the entry expired; fine to skip.
			}
			Err(err) => return Err(err),
		}
	}
	Ok(())
}

/// Keeps only entries whose (host-order) source IP belongs to a
/// workload this node currently owns (spec §4.2 step 4). Guards against
/// stale kernel entries from a departed workload and against
/// misattribution when a pod IP is recycled onto another node.
fn filter_local_sources(
	keys: &[FlowKey],
	values: &[FlowValue],
	owned: &HashSet<Ipv4Addr>,
) -> (Vec<FlowKey>, Vec<FlowValue>) {
	let mut out_keys = Vec::new();
	let mut out_values = Vec::new();
	for (key, value) in keys.iter().zip(values) {
		// The kernel writes src_ip in network byte order; convert to
		// host order before comparing against the host-order local set
		// built from the workload watch (SPEC_FULL.md §D.2).
		let src = Ipv4Addr::from(ntohl(key.src_ip));
		if owned.contains(&src) {
			out_keys.push(*key);
			out_values.push(*value);
		}
	}
	(out_keys, out_values)
}

fn log_dropped_inserts<D: Borrow<MapData>>(dropped: &aya::maps::PerCpuArray<D, u32>) {
	match dropped.get(&0, 0) {
		Ok(values) => {
			let total: u32 = values.iter().sum();
			if total > 0 {
				warn!(total, "classifier dropped inserts since last observed (map at capacity)");
			}
		}
		Err(err) => debug!(error = %err, "could not read dropped-insert counter"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn key(src: u32, dst: u32) -> FlowKey {
		FlowKey {
			src_ip: src,
			dst_ip: dst,
			src_port: 0,
			dst_port: 0,
		}
	}

	#[test]
	fn filter_keeps_only_owned_sources() {
		// 10.0.0.1 in network byte order.
		let owned_src = Ipv4Addr::new(10, 0, 0, 1);
		let owned_src_wire = zonenet_common::byteorder::htonl(u32::from(owned_src));
		let other_src_wire = zonenet_common::byteorder::htonl(u32::from(Ipv4Addr::new(10, 0, 0, 9)));

		let keys = [key(owned_src_wire, 1), key(other_src_wire, 1)];
		let values = [FlowValue { bytes: 10 }, FlowValue { bytes: 20 }];

		let mut owned = HashSet::new();
		owned.insert(owned_src);

		let (filtered_keys, filtered_values) = filter_local_sources(&keys, &values, &owned);
		assert_eq!(filtered_keys.len(), 1);
		assert_eq!(filtered_keys[0].src_ip, owned_src_wire);
		assert_eq!(filtered_values[0].bytes, 10);
	}

	#[test]
	fn filter_drops_everything_when_set_is_empty() {
		let keys = [key(1, 2)];
		let values = [FlowValue { bytes: 5 }];
		let (filtered_keys, _) = filter_local_sources(&keys, &values, &HashSet::new());
		assert!(filtered_keys.is_empty());
	}

	#[tokio::test]
	async fn deliver_posts_encoded_frame() {
		use wiremock::matchers::{body_bytes, method, path};
		use wiremock::{Mock, MockServer, ResponseTemplate};

		let server = MockServer::start().await;
		let keys = [key(1, 2)];
		let values = [FlowValue { bytes: 42 }];
		let expected = zonenet_wire::encode(&keys, &values).to_vec();

		Mock::given(method("POST"))
			.and(path("/write-network-statistics"))
			.and(body_bytes(expected))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&server)
			.await;

		let http = reqwest::Client::new();
		let url = format!("{}/write-network-statistics", server.uri());
		deliver(&http, &url, &keys, &values).await;
	}

	#[tokio::test]
	async fn deliver_logs_and_discards_on_failure() {
		// No mock registered: the connection itself fails (nothing is
		// listening), exercising the at-most-once discard path without
		// panicking.
		let http = reqwest::Client::new();
		deliver(&http, "http://127.0.0.1:0/write-network-statistics", &[key(1, 2)], &[FlowValue { bytes: 1 }]).await;
	}
}
