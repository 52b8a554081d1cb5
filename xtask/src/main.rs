//! Developer convenience for building the kernel classifier object that
//! `zonenet-agent` loads at runtime. The actual cross-compile toolchain
//! for the kernel program is out of scope for this workspace (spec §1);
//! this just shells out to the right `cargo build` invocation so
//! `cargo xtask build-ebpf` stays a one-liner for contributors.

mod build_ebpf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
struct Options {
	#[command(subcommand)]
	command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Cross-compiles `zonenet-ebpf` for the `bpfel-unknown-none` target.
	BuildEbpf(build_ebpf::Options),
}

fn main() -> Result<()> {
	let opts = Options::parse();
	match opts.command {
		Command::BuildEbpf(opts) => build_ebpf::build(opts),
	}
}
