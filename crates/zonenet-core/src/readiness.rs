//! Tracks whether the process has finished its startup dependencies
//! (cluster watch primed, classifier attached) — useful for a liveness/
//! readiness probe even though spec §6 doesn't mandate one.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::info;

/// Shared handle; clone freely.
#[derive(Clone, Debug, Default)]
pub struct Ready(Arc<Mutex<HashSet<String>>>);

impl Ready {
	pub fn new() -> Ready {
		Ready::default()
	}

	/// Registers a pending dependency. The process is not ready until
	/// every returned [`BlockReady`] guard has been dropped.
	pub fn register_task(&self, name: &str) -> BlockReady {
		self.0.lock().unwrap().insert(name.to_string());
		BlockReady {
			parent: self.clone(),
			name: name.to_string(),
		}
	}

	pub fn is_ready(&self) -> bool {
		self.0.lock().unwrap().is_empty()
	}

	pub fn pending(&self) -> Vec<String> {
		self.0.lock().unwrap().iter().cloned().collect()
	}
}

#[must_use]
pub struct BlockReady {
	parent: Ready,
	name: String,
}

impl Drop for BlockReady {
	fn drop(&mut self) {
		let mut pending = self.parent.0.lock().unwrap();
		pending.remove(&self.name);
		let left = pending.len();
		if left == 0 {
			info!(task = %self.name, "all startup tasks complete, marking ready");
		} else {
			info!(task = %self.name, remaining = left, "startup task complete");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ready_after_all_guards_dropped() {
		let ready = Ready::new();
		let a = ready.register_task("watch-pods");
		let b = ready.register_task("watch-nodes");
		assert!(!ready.is_ready());
		drop(a);
		assert!(!ready.is_ready());
		drop(b);
		assert!(ready.is_ready());
	}
}
