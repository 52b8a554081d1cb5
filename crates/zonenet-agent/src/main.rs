mod classifier;
mod drain;
mod error;
mod subnet;
mod watch;

use std::path::PathBuf;
use std::time::Duration;

use aya::maps::{HashMap as AyaHashMap, PerCpuArray};
use clap::Parser;
use kube::Client;
use tokio::task::JoinSet;
use zonenet_core::prelude::*;
use zonenet_core::readiness::Ready;
use zonenet_core::signal::Shutdown;

use crate::drain::DrainConfig;
use crate::error::AgentError;
use crate::subnet::PodSubnet;
use crate::watch::LocalWorkloads;

/// Observes cross-zone egress from this node's workloads and ships
/// periodic samples to the aggregator (spec §4.2).
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
	/// This node's name, used to scope the local workload watch.
	#[arg(long)]
	node: String,

	/// IPv4 CIDR of the cluster's pod subnet.
	#[arg(long)]
	pod_subnet_cidr: String,

	/// Base URL of the aggregator, e.g. http://aggregator:8080.
	#[arg(long)]
	aggregator_url: String,

	/// Seconds between drain cycles. Must be greater than zero.
	#[arg(long, default_value_t = 10)]
	flush_interval_secs: u64,

	/// Whether to deliver drained samples to the aggregator.
	#[arg(long, default_value_t = true)]
	send: bool,

	/// Log every drained flow entry at debug level.
	#[arg(long, default_value_t = false)]
	debug: bool,

	/// Path to the compiled classifier object. Produced by the (out of
	/// scope, spec §1) kernel-program build toolchain.
	#[arg(long, default_value = "/var/lib/zonenet/zonenet.o")]
	classifier_object: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	zonenet_core::telemetry::init();
	let args = Args::parse();

	// Configuration errors fail fast before anything is loaded (spec §7).
	let subnet = PodSubnet::parse(&args.pod_subnet_cidr)?;
	if args.flush_interval_secs == 0 {
		return Err(AgentError::ZeroFlushInterval.into());
	}
	let flush_interval = Duration::from_secs(args.flush_interval_secs);

	let client = Client::try_default()
		.await
		.context("building kube client (in-cluster config, falling back to local kubeconfig)")?;

	let local = LocalWorkloads::new();
	let shutdown = Shutdown::new();
	let ready = Ready::new();

	let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();
	tasks.spawn({
		let client = client.clone();
		let node = args.node.clone();
		let local = local.clone();
		let ready = ready.clone();
		let token = shutdown.token();
		async move {
			watch::run(client, &node, local, ready, token).await;
			Ok(())
		}
	});

	// Environment setup: raise the memlock limit, then load and attach
	// the classifier (spec §4.2 steps 4-5). Attach failure is logged
	// and non-fatal; everything else here is fatal.
	classifier::raise_memlock_rlimit().context("raising RLIMIT_MEMLOCK for older kernels")?;
	let block_attach = ready.register_task("load-classifier");
	// Kept alive for the remainder of `main` so the attached link isn't
	// dropped early; the maps below are taken out by value and don't
	// borrow from it, so this binding only needs to outlive the task loop.
	let mut ebpf = classifier::load_and_attach(&args.classifier_object, subnet)
		.context("loading and attaching classifier")?;
	drop(block_attach);

	let (flow_map, dropped_inserts) = open_maps(&mut ebpf)?;

	let http = reqwest::Client::new();
	let drain_config = DrainConfig {
		flush_interval,
		aggregator_url: format!("{}/write-network-statistics", args.aggregator_url.trim_end_matches('/')),
		send_enabled: args.send,
		debug: args.debug,
	};

	tasks.spawn({
		let token = shutdown.token();
		async move {
			drain::run(flow_map, dropped_inserts, local, http, drain_config, token).await;
			Ok(())
		}
	});

	tasks.spawn(async move {
		shutdown.wait().await;
		Ok(())
	});

	while let Some(result) = tasks.join_next().await {
		result??;
	}
	Ok(())
}

/// Takes the flow map and the dropped-insert counter out of the loaded
/// [`aya::Ebpf`] by value. Both are independent kernel objects once
/// taken: they stay valid even though `ebpf` (holding the loaded
/// program and its attached link) is not consulted again afterward.
fn open_maps(
	ebpf: &mut aya::Ebpf,
) -> anyhow::Result<(
	AyaHashMap<aya::maps::MapData, zonenet_common::FlowKey, zonenet_common::FlowValue>,
	Option<PerCpuArray<aya::maps::MapData, u32>>,
)> {
	let flows_map = ebpf
		.take_map("FLOWS")
		.context("classifier object has no FLOWS map")?;
	let flows = AyaHashMap::try_from(flows_map).context("opening FLOWS as a hash map")?;

	let dropped = match ebpf.take_map("DROPPED_INSERTS") {
		Some(map) => match PerCpuArray::try_from(map) {
			Ok(array) => Some(array),
			Err(err) => {
				warn!(error = %err, "DROPPED_INSERTS present but not a per-CPU array, ignoring");
				None
			}
		},
		None => None,
	};

	Ok((flows, dropped))
}
