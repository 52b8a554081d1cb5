//! Cluster-state indexer (spec §4.5): two independent `kube` watches feed
//! [`Index`] with workload and node add/modify/delete events.

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::runtime::watcher;
use kube::{Api, Client};
use tracing::{info, warn};
use zonenet_core::prelude::*;

use crate::index::{Index, WorkloadIdentity};

const ZONE_LABEL: &str = "topology.kubernetes.io/zone";

/// Runs both cluster watches until `shutdown` is signalled. Each watch
/// retries indefinitely on transient API errors (the default behavior of
/// `kube::runtime::watcher`); a sample referring to a not-yet-known
/// workload or node is dropped silently at ingestion time (spec §4.5).
pub async fn run(
	client: Client,
	index: Arc<Index>,
	ready: zonenet_core::readiness::Ready,
	shutdown: tokio_util::sync::CancellationToken,
) {
	let pods = watch_pods(client.clone(), index.clone(), ready.clone());
	let nodes = watch_nodes(client, index, ready);
	tokio::select! {
		_ = pods => {},
		_ = nodes => {},
		_ = shutdown.cancelled() => {
			info!("cluster watches shutting down");
		}
	}
}

async fn watch_pods(client: Client, index: Arc<Index>, ready: zonenet_core::readiness::Ready) {
	let mut block = Some(ready.register_task("watch-pods"));
	let api: Api<Pod> = Api::all(client);
	let mut stream = Box::pin(watcher::watcher(api, watcher::Config::default()).default_backoff());
	while let Some(event) = stream.next().await {
		match event {
			Ok(watcher::Event::Apply(pod)) | Ok(watcher::Event::InitApply(pod)) => {
				apply_pod(&index, pod);
			}
			Ok(watcher::Event::Delete(pod)) => {
				delete_pod(&index, pod);
			}
			Ok(watcher::Event::Init) => {}
			Ok(watcher::Event::InitDone) => {
				block.take();
			}
			Err(err) => {
				warn!(error = %err, "pod watch error, retrying");
			}
		}
	}
}

async fn watch_nodes(client: Client, index: Arc<Index>, ready: zonenet_core::readiness::Ready) {
	let mut block = Some(ready.register_task("watch-nodes"));
	let api: Api<Node> = Api::all(client);
	let mut stream = Box::pin(watcher::watcher(api, watcher::Config::default()).default_backoff());
	while let Some(event) = stream.next().await {
		match event {
			Ok(watcher::Event::Apply(node)) | Ok(watcher::Event::InitApply(node)) => {
				apply_node(&index, node);
			}
			Ok(watcher::Event::Delete(node)) => {
				if let Some(name) = node.metadata.name {
					index.remove_node(&name);
				}
			}
			Ok(watcher::Event::Init) => {}
			Ok(watcher::Event::InitDone) => {
				block.take();
			}
			Err(err) => {
				warn!(error = %err, "node watch error, retrying");
			}
		}
	}
}

fn apply_node(index: &Index, node: Node) {
	let Some(name) = node.metadata.name else {
		return;
	};
	let zone = node
		.metadata
		.labels
		.as_ref()
		.and_then(|labels| labels.get(ZONE_LABEL))
		.cloned()
		.unwrap_or_else(|| "unknown".to_string());
	index.upsert_node(name, zone);
}

fn apply_pod(index: &Index, pod: Pod) {
	let Some(namespace) = pod.metadata.namespace.clone() else {
		return;
	};
	let Some(name) = pod.metadata.name.clone() else {
		return;
	};
	let Some(spec) = &pod.spec else { return };
	let Some(node) = spec.node_name.clone() else {
		return;
	};
	let Some(status) = &pod.status else { return };

	let host_ip: Option<Ipv4Addr> = status
		.host_ip
		.as_deref()
		.and_then(|ip| ip.parse().ok());

	let mut addresses = Vec::new();
	if let Some(ip) = status.pod_ip.as_deref().and_then(|ip| ip.parse().ok()) {
		addresses.push(ip);
	}
	if let Some(pod_ips) = &status.pod_ips {
		for entry in pod_ips {
			if let Ok(addr) = entry.ip.parse::<Ipv4Addr>() {
				if !addresses.contains(&addr) {
					addresses.push(addr);
				}
			}
		}
	}
	if addresses.is_empty() {
		// not yet scheduled an address; nothing to index yet.
		return;
	}

	let identity = WorkloadIdentity::new(namespace, name);
	index.upsert_workload(identity, node, host_ip, addresses);
}

fn delete_pod(index: &Index, pod: Pod) {
	let Some(namespace) = pod.metadata.namespace else {
		return;
	};
	let Some(name) = pod.metadata.name else {
		return;
	};
	index.remove_workload(&WorkloadIdentity::new(namespace, name));
}
