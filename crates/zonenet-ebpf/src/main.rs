#![no_std]
#![no_main]

use aya_ebpf::macros::{map, netfilter};
use aya_ebpf::maps::{HashMap, PerCpuArray};
use aya_ebpf::programs::NetfilterContext;
use aya_log_ebpf::{debug, warn};
use network_types::ip::{IpProto, Ipv4Hdr};
use network_types::tcp::TcpHdr;
use network_types::udp::UdpHdr;
use zonenet_common::{FlowKey, FlowValue, DEFAULT_MAP_CAPACITY};

/// netfilter verdict meaning "continue processing" — this program only
/// ever observes traffic, it never drops or alters a packet (spec §4.1).
const NF_ACCEPT: i32 = 1;

/// Subnet prefix and mask (network byte order), patched in at load time
/// via `EbpfLoader::set_global` before the program is loaded (spec §4.1).
#[no_mangle]
static SUBNET_PREFIX: u32 = 0;
#[no_mangle]
static SUBNET_MASK: u32 = 0;

#[map]
static FLOWS: HashMap<FlowKey, FlowValue> =
	HashMap::<FlowKey, FlowValue>::with_max_entries(DEFAULT_MAP_CAPACITY, 0);

/// Counts failed insertions into `FLOWS` when the map is at capacity.
/// Kernel-local only; never crosses the wire (SPEC_FULL.md §B).
#[map]
static DROPPED_INSERTS: PerCpuArray<u32> = PerCpuArray::with_max_entries(1, 0);

#[netfilter]
pub fn zonenet(ctx: NetfilterContext) -> i32 {
	match try_classify(&ctx) {
		Ok(()) | Err(()) => {}
	}
	NF_ACCEPT
}

fn try_classify(ctx: &NetfilterContext) -> Result<(), ()> {
	let ip_hdr: *const Ipv4Hdr = ptr_at(ctx, 0)?;
	let ip_hdr = unsafe { &*ip_hdr };

	let prefix = unsafe { core::ptr::read_volatile(&SUBNET_PREFIX) };
	let mask = unsafe { core::ptr::read_volatile(&SUBNET_MASK) };

	// `src_addr`/`dst_addr` are raw network-order fields (unlike `ihl()`,
	// which is a genuine bitfield accessor), and `FlowKey` is contracted
	// to carry IPs in that same network order end-to-end: the load-time
	// constants below are `htonl`'d and `drain::filter_local_sources`
	// undoes this with `ntohl` before comparing. No conversion here.
	let src_ip = ip_hdr.src_addr;
	let dst_ip = ip_hdr.dst_addr;

	// Rule 1: only account traffic whose source belongs to the local
	// pod subnet.
	if src_ip & mask != prefix {
		return Ok(());
	}
	// Rule 2: same-subnet destinations never cross a zone, so drop
	// them from accounting up front.
	if dst_ip & mask == prefix {
		return Ok(());
	}

	let ihl = (ip_hdr.ihl() as usize) * 4;
	let total_len = u16::from_be(ip_hdr.tot_len) as u32;

	let (src_port, dst_port) = match ip_hdr.proto {
		IpProto::Tcp => {
			let tcp_hdr: *const TcpHdr = ptr_at(ctx, ihl)?;
			let tcp_hdr = unsafe { &*tcp_hdr };
			(u16::from(tcp_hdr.source), u16::from(tcp_hdr.dest))
		}
		IpProto::Udp => {
			let udp_hdr: *const UdpHdr = ptr_at(ctx, ihl)?;
			let udp_hdr = unsafe { &*udp_hdr };
			(u16::from(udp_hdr.source), u16::from(udp_hdr.dest))
		}
		_ => (0, 0),
	};

	let key = FlowKey {
		src_ip,
		dst_ip,
		src_port,
		dst_port,
	};

	match unsafe { FLOWS.get_ptr_mut(&key) } {
		Some(value) => {
			let value = unsafe { &mut *value };
			value.bytes += total_len as u64;
		}
		None => {
			let initial = FlowValue {
				bytes: total_len as u64,
			};
			if FLOWS.insert(&key, &initial, 0).is_err() {
				if let Some(counter) = DROPPED_INSERTS.get_ptr_mut(0) {
					unsafe { *counter += 1 };
				}
				warn!(ctx, "flow map at capacity, dropping new flow");
			}
		}
	}

	debug!(ctx, "classified packet, bytes = {}", total_len);
	Ok(())
}

/// Bounds-checked access to a header at `offset` bytes into the packet,
/// the standard aya pattern for reading past a fixed-size struct without
/// tripping the verifier.
#[inline(always)]
fn ptr_at<T>(ctx: &NetfilterContext, offset: usize) -> Result<*const T, ()> {
	let start = ctx.data();
	let end = ctx.data_end();
	let len = core::mem::size_of::<T>();
	if start + offset + len > end {
		return Err(());
	}
	Ok((start + offset) as *const T)
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
	unsafe { core::hint::unreachable_unchecked() }
}
