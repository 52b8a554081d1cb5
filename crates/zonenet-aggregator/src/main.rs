mod http;
mod index;
mod metrics;
mod watch;

use clap::Parser;
use kube::Client;
use prometheus_client::registry::Registry;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use zonenet_core::prelude::*;
use zonenet_core::signal::Shutdown;

use crate::index::Index;
use crate::metrics::Metrics;

/// Resolves agent-reported flow samples to workloads and exposes the
/// cross-zone byte counter (spec §4.4-§4.6).
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
	/// Address to bind the HTTP surface to.
	#[arg(long, default_value = "0.0.0.0:8080")]
	listen_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	zonenet_core::telemetry::init();
	let args = Args::parse();

	let client = Client::try_default()
		.await
		.context("building kube client (in-cluster config, falling back to local kubeconfig)")?;

	let mut registry = Registry::default();
	let metrics = Metrics::new(&mut registry);
	let index = Arc::new(Index::new(metrics.clone()));

	let shutdown = Shutdown::new();
	let ready = zonenet_core::readiness::Ready::new();

	let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();

	tasks.spawn({
		let client = client.clone();
		let index = index.clone();
		let ready = ready.clone();
		let token = shutdown.token();
		async move {
			watch::run(client, index, ready, token).await;
			Ok(())
		}
	});

	tasks.spawn({
		let app = http::App {
			index,
			registry: Arc::new(registry),
			metrics,
		};
		let token = shutdown.token();
		async move { serve(args.listen_addr, app, token).await }
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

async fn serve(addr: SocketAddr, app: http::App, shutdown: CancellationToken) -> anyhow::Result<()> {
	let listener = tokio::net::TcpListener::bind(addr)
		.await
		.with_context(|| format!("binding HTTP listener on {addr}"))?;
	info!(%addr, "aggregator listening");
	axum::serve(listener, http::router(app))
		.with_graceful_shutdown(async move { shutdown.cancelled().await })
		.await
		.context("serving HTTP surface")
}
