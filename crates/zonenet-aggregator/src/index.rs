//! The cluster-state index: PodIpIndex/NodeIpIndex, workload/node
//! records, and the cross-zone counters, all behind one write lock
//! (spec §5, §4.5).

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::RwLock;

use tracing::{debug, info};
use zonenet_wire::SampleEntry;

use crate::metrics::{Metrics, PodLabels};

pub const UNKNOWN_ZONE: &str = "unknown";
/// Reserved namespace used for the synthetic identity that host-network
/// traffic is attributed to: `(_node_, <node name>)`.
pub const HOST_NETWORK_NAMESPACE: &str = "_node_";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadIdentity {
	pub namespace: String,
	pub name: String,
}

impl WorkloadIdentity {
	pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			namespace: namespace.into(),
			name: name.into(),
		}
	}

	/// The synthetic identity a host-networked workload's traffic is
	/// attributed to.
	pub fn host_network(node: &str) -> Self {
		Self::new(HOST_NETWORK_NAMESPACE, node)
	}
}

#[derive(Debug, Clone)]
pub struct WorkloadRecord {
	pub identity: WorkloadIdentity,
	pub node: String,
	pub addresses: Vec<Ipv4Addr>,
}

#[derive(Debug, Clone)]
pub struct NodeRecord {
	pub name: String,
	pub zone: String,
}

/// Where an IPv4 address resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Owner {
	Workload(WorkloadIdentity),
	Node(String),
}

#[derive(Default)]
struct IndexInner {
	pod_ip_index: HashMap<Ipv4Addr, WorkloadIdentity>,
	node_ip_index: HashMap<Ipv4Addr, String>,
	workloads: HashMap<WorkloadIdentity, WorkloadRecord>,
	nodes: HashMap<String, NodeRecord>,
}

/// One flow that crossed a zone boundary, logged for operator visibility
/// (SPEC_FULL.md §B, restoring the original's per-flow log line).
#[derive(Debug, Clone)]
pub struct FlowLogRecord {
	pub src: WorkloadIdentity,
	pub dst: WorkloadIdentity,
	pub bytes: u64,
}

/// The concurrently-maintained cluster-state index plus the cumulative
/// cross-zone counters. A single [`RwLock`] guards all of it: writers are
/// the two cluster watches and the ingestion handler; the metrics
/// collector is the only reader (spec §5).
pub struct Index {
	inner: RwLock<IndexInner>,
	metrics: Metrics,
}

impl Index {
	pub fn new(metrics: Metrics) -> Self {
		Self {
			inner: RwLock::new(IndexInner::default()),
			metrics,
		}
	}

	/// Inserts or replaces the record for `identity`. Each address is
	/// classified host-network (if it equals `host_ip`) or pod-owned, and
	/// routed into the matching index; any previous record for this
	/// identity is fully replaced.
	pub fn upsert_workload(
		&self,
		identity: WorkloadIdentity,
		node: String,
		host_ip: Option<Ipv4Addr>,
		addresses: Vec<Ipv4Addr>,
	) {
		let mut inner = self.inner.write().unwrap();
		if let Some(old) = inner.workloads.remove(&identity) {
			for addr in &old.addresses {
				if inner.pod_ip_index.get(addr) == Some(&identity) {
					inner.pod_ip_index.remove(addr);
				}
			}
		}
		for addr in &addresses {
			if Some(*addr) == host_ip {
				inner.node_ip_index.insert(*addr, node.clone());
			} else {
				inner.pod_ip_index.insert(*addr, identity.clone());
			}
		}
		inner.workloads.insert(
			identity.clone(),
			WorkloadRecord {
				identity,
				node,
				addresses,
			},
		);
	}

	/// Removes the workload's pod-IP entries and its counter. Addresses it
	/// shares with the node (host-network) are left in NodeIpIndex, owned
	/// by the node's lifecycle instead (spec §4.5).
	pub fn remove_workload(&self, identity: &WorkloadIdentity) {
		let mut inner = self.inner.write().unwrap();
		if let Some(record) = inner.workloads.remove(identity) {
			for addr in &record.addresses {
				if inner.pod_ip_index.get(addr) == Some(identity) {
					inner.pod_ip_index.remove(addr);
				}
			}
		}
		self.metrics.cross_zone_bytes.remove(&PodLabels {
			namespace: identity.namespace.clone(),
			pod: identity.name.clone(),
		});
	}

	pub fn upsert_node(&self, name: String, zone: String) {
		let mut inner = self.inner.write().unwrap();
		inner.nodes.insert(name.clone(), NodeRecord { name, zone });
	}

	/// Purges every NodeIpIndex entry pointing at `name`, then the node
	/// record itself (spec §4.5).
	pub fn remove_node(&self, name: &str) {
		let mut inner = self.inner.write().unwrap();
		inner.node_ip_index.retain(|_, owner| owner != name);
		inner.nodes.remove(name);
	}

	/// Resolves `src`/`dst` for every entry in one drain batch under a
	/// single write-lock acquisition, so the whole batch sees a
	/// consistent snapshot of the indexes (spec §4.4, §5). Returns the
	/// cross-zone flows for logging; same-zone and unresolvable entries
	/// are silently dropped.
	pub fn ingest(&self, entries: &[SampleEntry]) -> Vec<FlowLogRecord> {
		let inner = self.inner.write().unwrap();
		let mut flows = Vec::new();
		for entry in entries {
			let Some((src_owner, src_zone)) = Self::resolve(&inner, entry.src_ip) else {
				continue;
			};
			let Some((dst_owner, dst_zone)) = Self::resolve(&inner, entry.dst_ip) else {
				continue;
			};
			if src_zone == dst_zone {
				continue;
			}
			let src_identity = match &src_owner {
				Owner::Workload(id) => id.clone(),
				Owner::Node(node) => WorkloadIdentity::host_network(node),
			};
			let dst_identity = match &dst_owner {
				Owner::Workload(id) => id.clone(),
				Owner::Node(node) => WorkloadIdentity::host_network(node),
			};
			self
				.metrics
				.cross_zone_bytes
				.get_or_create(&PodLabels {
					namespace: src_identity.namespace.clone(),
					pod: src_identity.name.clone(),
				})
				.inc_by(entry.bytes);
			flows.push(FlowLogRecord {
				src: src_identity,
				dst: dst_identity,
				bytes: entry.bytes,
			});
		}
		flows
	}

	fn resolve(inner: &IndexInner, addr: Ipv4Addr) -> Option<(Owner, String)> {
		if let Some(identity) = inner.pod_ip_index.get(&addr) {
			let record = inner.workloads.get(identity)?;
			let node = inner.nodes.get(&record.node)?;
			return Some((Owner::Workload(identity.clone()), node.zone.clone()));
		}
		if let Some(node_name) = inner.node_ip_index.get(&addr) {
			let node = inner.nodes.get(node_name)?;
			return Some((Owner::Node(node_name.clone()), node.zone.clone()));
		}
		None
	}
}

/// Logs each cross-zone flow at info level, outside the index lock
/// (SPEC_FULL.md §B — restores the original's per-flow log line).
pub fn log_flows(flows: &[FlowLogRecord]) {
	if flows.is_empty() {
		debug!("no cross-zone flows in this batch");
		return;
	}
	for flow in flows {
		info!(
			src.namespace = %flow.src.namespace,
			src.name = %flow.src.name,
			dst.namespace = %flow.dst.namespace,
			dst.name = %flow.dst.name,
			bytes = flow.bytes,
			"cross-zone flow"
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn metrics() -> Metrics {
		let mut registry = prometheus_client::registry::Registry::default();
		Metrics::new(&mut registry)
	}

	fn addr(s: &str) -> Ipv4Addr {
		s.parse().unwrap()
	}

	#[test]
	fn same_zone_suppressed() {
		let index = Index::new(metrics());
		index.upsert_node("n1".into(), "z1".into());
		index.upsert_node("n2".into(), "z1".into());
		let a = WorkloadIdentity::new("ns", "a");
		let b = WorkloadIdentity::new("ns", "b");
		index.upsert_workload(a.clone(), "n1".into(), None, vec![addr("10.0.0.1")]);
		index.upsert_workload(b, "n2".into(), None, vec![addr("10.0.0.2")]);

		let entries = [SampleEntry {
			src_ip: addr("10.0.0.1"),
			dst_ip: addr("10.0.0.2"),
			src_port: 0,
			dst_port: 0,
			bytes: 100,
		}];
		let flows = index.ingest(&entries);
		assert!(flows.is_empty());
		assert_eq!(
			index
				.metrics
				.cross_zone_bytes
				.get_or_create(&PodLabels {
					namespace: "ns".into(),
					pod: "a".into()
				})
				.get(),
			0
		);
	}

	#[test]
	fn cross_zone_attributed_to_source() {
		let index = Index::new(metrics());
		index.upsert_node("n1".into(), "z1".into());
		index.upsert_node("n2".into(), "z2".into());
		let a = WorkloadIdentity::new("ns", "a");
		let b = WorkloadIdentity::new("ns", "b");
		index.upsert_workload(a, "n1".into(), None, vec![addr("10.0.0.1")]);
		index.upsert_workload(b, "n2".into(), None, vec![addr("10.0.0.2")]);

		let entries = [SampleEntry {
			src_ip: addr("10.0.0.1"),
			dst_ip: addr("10.0.0.2"),
			src_port: 0,
			dst_port: 0,
			bytes: 100,
		}];
		let flows = index.ingest(&entries);
		assert_eq!(flows.len(), 1);
		assert_eq!(
			index
				.metrics
				.cross_zone_bytes
				.get_or_create(&PodLabels {
					namespace: "ns".into(),
					pod: "a".into()
				})
				.get(),
			100
		);
	}

	#[test]
	fn host_network_source_attributed_to_synthetic_identity() {
		let index = Index::new(metrics());
		index.upsert_node("n1".into(), "z1".into());
		index.upsert_node("n2".into(), "z2".into());
		let h = WorkloadIdentity::new("ns", "h");
		let x = WorkloadIdentity::new("ns", "x");
		// h's pod IP equals the node's IP: host-networked.
		index.upsert_workload(
			h,
			"n1".into(),
			Some(addr("10.0.0.50")),
			vec![addr("10.0.0.50")],
		);
		index.upsert_workload(x, "n2".into(), None, vec![addr("10.0.0.99")]);

		let entries = [SampleEntry {
			src_ip: addr("10.0.0.50"),
			dst_ip: addr("10.0.0.99"),
			src_port: 0,
			dst_port: 0,
			bytes: 50,
		}];
		index.ingest(&entries);
		assert_eq!(
			index
				.metrics
				.cross_zone_bytes
				.get_or_create(&PodLabels {
					namespace: HOST_NETWORK_NAMESPACE.into(),
					pod: "n1".into()
				})
				.get(),
			50
		);
	}

	#[test]
	fn unknown_destination_dropped() {
		let index = Index::new(metrics());
		index.upsert_node("n1".into(), "z1".into());
		let a = WorkloadIdentity::new("ns", "a");
		index.upsert_workload(a, "n1".into(), None, vec![addr("10.0.0.1")]);

		let entries = [SampleEntry {
			src_ip: addr("10.0.0.1"),
			dst_ip: addr("10.0.0.99"),
			src_port: 0,
			dst_port: 0,
			bytes: 7,
		}];
		let flows = index.ingest(&entries);
		assert!(flows.is_empty());
	}

	#[test]
	fn delete_removes_pod_ip_but_not_shared_node_ip() {
		let index = Index::new(metrics());
		index.upsert_node("n1".into(), "z1".into());
		let h = WorkloadIdentity::new("ns", "h");
		index.upsert_workload(
			h.clone(),
			"n1".into(),
			Some(addr("10.0.0.50")),
			vec![addr("10.0.0.50")],
		);
		index.remove_workload(&h);

		// the address was host-network, so it must still resolve via NodeIpIndex
		let inner = index.inner.read().unwrap();
		assert_eq!(
			inner.node_ip_index.get(&addr("10.0.0.50")),
			Some(&"n1".to_string())
		);
	}

	#[test]
	fn node_delete_purges_its_node_ip_entries() {
		let index = Index::new(metrics());
		index.upsert_node("n1".into(), "z1".into());
		let h = WorkloadIdentity::new("ns", "h");
		index.upsert_workload(
			h,
			"n1".into(),
			Some(addr("10.0.0.50")),
			vec![addr("10.0.0.50")],
		);
		index.remove_node("n1");
		let inner = index.inner.read().unwrap();
		assert!(!inner.node_ip_index.contains_key(&addr("10.0.0.50")));
		assert!(!inner.nodes.contains_key("n1"));
	}
}
