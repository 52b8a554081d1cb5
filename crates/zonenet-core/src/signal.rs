//! Process-scoped cancellation.
//!
//! Every long-running task (the agent's drain loop, the cluster watches,
//! the HTTP listeners) is handed a clone of the same [`tokio_util::sync::CancellationToken`]
//! and is expected to observe it at its suspension points. [`Shutdown::wait`]
//! resolves the token from the process's own signal handling (SIGINT/SIGTERM
//! on unix) so callers never touch `tokio::signal` directly.

use tokio_util::sync::CancellationToken;

/// Owns the cancellation token for a process and drives it from OS signals.
pub struct Shutdown {
	token: CancellationToken,
}

impl Shutdown {
	pub fn new() -> Self {
		Shutdown {
			token: CancellationToken::new(),
		}
	}

	/// Returns a token clone for a task to observe; cancellation is
	/// broadcast to every clone at once.
	pub fn token(&self) -> CancellationToken {
		self.token.clone()
	}

	/// Waits for a termination signal (or an explicit cancel via
	/// [`Shutdown::token`]) and cancels the token.
	pub async fn wait(self) {
		imp::wait_for_signal(&self.token).await;
		self.token.cancel();
	}
}

impl Default for Shutdown {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(unix)]
mod imp {
	use tokio::signal::unix::{SignalKind, signal};
	use tokio_util::sync::CancellationToken;
	use tracing::info;

	pub(super) async fn wait_for_signal(token: &CancellationToken) {
		let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
		let mut sigterm =
			signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
		tokio::select! {
			_ = sigint.recv() => info!("received SIGINT, shutting down"),
			_ = sigterm.recv() => info!("received SIGTERM, shutting down"),
			() = token.cancelled() => {}
		}
	}
}

#[cfg(not(unix))]
mod imp {
	use tokio_util::sync::CancellationToken;
	use tracing::info;

	pub(super) async fn wait_for_signal(token: &CancellationToken) {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
			() = token.cancelled() => {}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn token_cancels_explicitly() {
		let shutdown = Shutdown::new();
		let token = shutdown.token();
		assert!(!token.is_cancelled());
		token.cancel();
		assert!(token.is_cancelled());
	}
}
