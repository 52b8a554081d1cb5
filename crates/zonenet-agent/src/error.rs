//! Agent-local error taxonomy (spec §7): configuration errors are
//! refused at startup, environment errors are fatal except for hook
//! attachment, and transient runtime errors only ever skip a cycle.
//! Those last two are represented as plain `anyhow::Error` at the call
//! site since they carry no state this crate branches on; this enum
//! covers the one kind callers need to match on: malformed input that
//! should fail the process before anything is loaded.

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
	#[error("invalid pod subnet CIDR {cidr:?}: {reason}")]
	InvalidCidr { cidr: String, reason: String },

	#[error("flush interval must be greater than zero")]
	ZeroFlushInterval,
}
