pub mod readiness;
pub mod signal;
pub mod telemetry;

pub mod prelude {
	pub use std::net::{IpAddr, Ipv4Addr, SocketAddr};
	pub use std::sync::Arc;
	pub use std::time::Duration;

	pub use anyhow::Context as _;
	pub use tracing::{Instrument, debug, error, info, trace, warn};
}
