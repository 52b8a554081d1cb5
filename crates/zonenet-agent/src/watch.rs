//! Watches workloads local to this node (spec §4.2 step 2) and keeps a
//! point-in-time snapshot of their pod IPs for the drain filter (spec
//! §4.2 step 4). Mirrors the aggregator's cluster-state watch in shape
//! (a `kube::runtime::watcher` stream folded into shared state) but
//! only ever needs one side of it: this node's own pods.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::RwLock;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use kube::{Api, Client};
use zonenet_core::prelude::*;
use zonenet_core::readiness::Ready;

/// Concurrently-read snapshot of the pod IPs owned by workloads
/// currently scheduled on this node. Keyed by pod UID so a replace
/// (delete immediately followed by recreate with a recycled name) never
/// straddles two entries.
#[derive(Default)]
pub struct LocalWorkloads {
	inner: RwLock<HashMap<String, Vec<Ipv4Addr>>>,
}

impl LocalWorkloads {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// A point-in-time set of host-order IPv4 addresses owned by local
	/// workloads, for the drain filter to test kernel-reported source
	/// IPs against (spec §4.2 step 3-4).
	pub fn snapshot(&self) -> std::collections::HashSet<Ipv4Addr> {
		self
			.inner
			.read()
			.unwrap()
			.values()
			.flatten()
			.copied()
			.collect()
	}

	fn upsert(&self, uid: String, ips: Vec<Ipv4Addr>) {
		self.inner.write().unwrap().insert(uid, ips);
	}

	fn remove(&self, uid: &str) {
		self.inner.write().unwrap().remove(uid);
	}
}

/// Runs the local-pod watch until `shutdown` fires. `node` is the local
/// node name; the watch is field-selected to `spec.nodeName=<node>` so
/// the informer never receives pods scheduled elsewhere (matches the
/// original agent's `FieldSelector` tweak).
pub async fn run(client: Client, node: &str, store: Arc<LocalWorkloads>, ready: Ready, shutdown: tokio_util::sync::CancellationToken) {
	let mut block = Some(ready.register_task("watch-local-pods"));
	let api: Api<Pod> = Api::all(client);
	let config = watcher::Config::default().fields(&format!("spec.nodeName={node}"));
	let mut stream = Box::pin(watcher::watcher(api, config).default_backoff());
	loop {
		tokio::select! {
			event = stream.next() => {
				let Some(event) = event else { break };
				match event {
					Ok(watcher::Event::Apply(pod)) | Ok(watcher::Event::InitApply(pod)) => apply(&store, pod),
					Ok(watcher::Event::Delete(pod)) => delete(&store, pod),
					Ok(watcher::Event::Init) => {}
					Ok(watcher::Event::InitDone) => {
						block.take();
					}
					Err(err) => warn!(error = %err, "local workload watch error, retrying"),
				}
			}
			() = shutdown.cancelled() => break,
		}
	}
}

fn apply(store: &LocalWorkloads, pod: Pod) {
	let Some(uid) = pod.metadata.uid.clone() else {
		return;
	};
	let Some(status) = &pod.status else { return };
	let mut ips = Vec::new();
	if let Some(ip) = status.pod_ip.as_deref().and_then(|ip| ip.parse().ok()) {
		ips.push(ip);
	}
	if let Some(pod_ips) = &status.pod_ips {
		for entry in pod_ips {
			if let Ok(addr) = entry.ip.parse::<Ipv4Addr>() {
				if !ips.contains(&addr) {
					ips.push(addr);
				}
			}
		}
	}
	if ips.is_empty() {
		return;
	}
	store.upsert(uid, ips);
}

fn delete(store: &LocalWorkloads, pod: Pod) {
	let Some(uid) = pod.metadata.uid else { return };
	store.remove(&uid);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn snapshot_reflects_upsert_and_remove() {
		let store = LocalWorkloads::default();
		store.upsert("a".into(), vec!["10.0.0.1".parse().unwrap()]);
		store.upsert("b".into(), vec!["10.0.0.2".parse().unwrap()]);
		let snap = store.snapshot();
		assert!(snap.contains(&"10.0.0.1".parse().unwrap()));
		assert!(snap.contains(&"10.0.0.2".parse().unwrap()));

		store.remove("a");
		let snap = store.snapshot();
		assert!(!snap.contains(&"10.0.0.1".parse().unwrap()));
		assert!(snap.contains(&"10.0.0.2".parse().unwrap()));
	}
}
