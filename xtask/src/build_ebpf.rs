use std::process::Command;

use anyhow::{Context, bail};
use clap::Parser;

#[derive(Debug, Parser)]
pub struct Options {
	/// Build the release profile of the kernel program.
	#[arg(long)]
	pub release: bool,
}

/// Shells out to `cargo build` for the `zonenet-ebpf` package on the
/// `bpfel-unknown-none` target. The resulting object is what
/// `zonenet-agent --classifier-object` points at; none of the
/// verifier/linker details here are part of this workspace's subject
/// matter (spec §1).
pub fn build(opts: Options) -> anyhow::Result<()> {
	let mut cmd = Command::new("cargo");
	cmd.args([
		"build",
		"--package",
		"zonenet-ebpf",
		"--target",
		"bpfel-unknown-none",
		"-Z",
		"build-std=core",
	]);
	if opts.release {
		cmd.arg("--release");
	}
	let status = cmd.status().context("spawning cargo build for zonenet-ebpf")?;
	if !status.success() {
		bail!("cargo build for zonenet-ebpf failed: {status}");
	}
	Ok(())
}
