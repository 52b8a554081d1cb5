//! Types shared by the kernel classifier and the host-side agent.
//!
//! This crate stays `no_std` so it can be built for the eBPF target; the
//! `user` feature (enabled by host-side crates) adds the `aya::Pod` impls
//! needed to use [`FlowKey`]/[`FlowValue`] directly as eBPF map types from
//! user space.
#![no_std]

pub mod byteorder;

/// Key for the kernel's flow-accounting map.
///
/// Addresses are stored exactly as the packet carries them: network byte
/// order. Ports are stored as the kernel parsed them off the TCP/UDP
/// header (also network byte order); the wire codec (`zonenet-wire`) is
/// the only place that imposes a byte-order contract on ports.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
	pub src_ip: u32,
	pub dst_ip: u32,
	pub src_port: u16,
	pub dst_port: u16,
}

/// Cumulative byte count for a [`FlowKey`] since the last drain.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlowValue {
	pub bytes: u64,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for FlowKey {}
#[cfg(feature = "user")]
unsafe impl aya::Pod for FlowValue {}

/// Number of entries the kernel map is sized for by default.
///
/// Chosen per spec §4.1: the expected number of unique flows observed in
/// a single drain interval. Flows beyond this working set fail to insert
/// (no eviction) rather than evicting older entries.
pub const DEFAULT_MAP_CAPACITY: u32 = 65_536;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flow_key_is_plain_data() {
		let a = FlowKey {
			src_ip: 1,
			dst_ip: 2,
			src_port: 3,
			dst_port: 4,
		};
		let b = a;
		assert_eq!(a, b);
	}
}
