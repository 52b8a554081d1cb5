//! Loads and attaches the kernel classifier (spec §4.1, §4.2 step 5).
//!
//! Building the `.o` this module loads is the kernel program's compile
//! toolchain — explicitly out of scope (spec §1); this module only
//! takes the path to an already-built object file and deals with
//! loading it into the kernel, patching the subnet constants, and
//! attaching the post-routing hook.

use std::path::Path;

use anyhow::Context;
use aya::Ebpf;
use aya::programs::Netfilter;
use tracing::{error, info};

use crate::subnet::PodSubnet;

/// Netfilter post-routing hook number (`NF_INET_POST_ROUTING` in
/// `<linux/netfilter_ipv4.h>`) — the same hook the original agent's
/// `AttachNetfilter(HookNumber: 4)` call uses.
const NF_INET_POST_ROUTING: u32 = 4;

/// Raises `RLIMIT_MEMLOCK` to infinite for kernels older than 5.11 that
/// still account eBPF map memory against it (spec §4.2 step 4).
pub fn raise_memlock_rlimit() -> anyhow::Result<()> {
	let limit = libc::rlimit {
		rlim_cur: libc::RLIM_INFINITY,
		rlim_max: libc::RLIM_INFINITY,
	};
	// SAFETY: setrlimit with a pointer to a valid, fully-initialized
	// rlimit on the stack; failure is reported via errno through the
	// return value, not through undefined behavior.
	let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &limit) };
	if ret != 0 {
		return Err(std::io::Error::last_os_error()).context("raising RLIMIT_MEMLOCK");
	}
	Ok(())
}

/// Loads the classifier object at `object_path`, patches in the subnet
/// constants (network byte order, spec §4.1), and attaches it at the
/// IPv4 post-routing hook. Attach failure is logged and treated as
/// non-fatal (spec §4.2, §7): the returned [`Ebpf`] handle is still
/// valid and its map can still be drained, it will simply never
/// receive traffic.
pub fn load_and_attach(object_path: &Path, subnet: PodSubnet) -> anyhow::Result<Ebpf> {
	let bytes = std::fs::read(object_path)
		.with_context(|| format!("reading classifier object at {}", object_path.display()))?;

	let (prefix, mask) = subnet.wire_constants();
	let mut ebpf = aya::EbpfLoader::new()
		.set_global("SUBNET_PREFIX", &prefix, true)
		.set_global("SUBNET_MASK", &mask, true)
		.load(&bytes)
		.context("loading classifier eBPF object")?;

	if let Err(err) = aya_log::EbpfLogger::init(&mut ebpf) {
		// aya-log is best-effort; its absence never stops accounting.
		info!(error = %err, "no eBPF logger installed for the classifier");
	}

	let program: &mut Netfilter = ebpf
		.program_mut("zonenet")
		.context("classifier object has no `zonenet` program")?
		.try_into()
		.context("`zonenet` program is not a netfilter program")?;
	program.load().context("loading classifier program into the kernel")?;

	match program.attach(aya::programs::netfilter::NetfilterFamily::Ipv4, NF_INET_POST_ROUTING) {
		Ok(_link) => info!("classifier attached at IPv4 post-routing hook"),
		Err(err) => error!(error = %err, "failed to attach classifier; no samples will be produced"),
	}

	Ok(ebpf)
}
