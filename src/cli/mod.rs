//! Command-line interface definitions for the `buildvm` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, ValueEnum};

/// Top-level CLI for the `buildvm` binary.
#[derive(Debug, Parser)]
#[command(
    name = "buildvm",
    about = "Provision and manage disposable build VMs on Google Compute Engine",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Check that the Compute Engine API is reachable.
    #[command(name = "ping", about = "Check that the Compute Engine API is reachable")]
    Ping,
    /// Create a build VM and print its record.
    #[command(name = "create", about = "Create a build VM and print its record")]
    Create(CreateCommand),
    /// Delete one or more build VMs by ID.
    #[command(name = "destroy", about = "Delete one or more build VMs by ID")]
    Destroy(DestroyCommand),
    /// Merge key=value pairs into a VM's metadata.
    #[command(name = "tag", about = "Merge key=value pairs into a VM's metadata")]
    Tag(TagCommand),
    /// Wait for a VM's SSH daemon and open a session.
    #[command(name = "connect", about = "Wait for a VM's SSH daemon and open a session")]
    Connect(ConnectCommand),
}

/// Guest operating system accepted on the command line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum OsArg {
    /// Linux guest bootstrapped with cloud-config.
    Linux,
    /// Windows guest bootstrapped with PowerShell.
    Windows,
}

/// Arguments for the `buildvm create` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CreateCommand {
    /// Name of the runner requesting the VM.
    #[arg(long, value_name = "NAME")]
    pub(crate) runner: String,
    /// Pool the VM belongs to.
    #[arg(long, value_name = "POOL")]
    pub(crate) pool: String,
    /// Guest operating system.
    #[arg(long, value_enum, default_value = "linux")]
    pub(crate) os: OsArg,
    /// CPU architecture.
    #[arg(long, default_value = "amd64")]
    pub(crate) arch: String,
}

/// Arguments for the `buildvm destroy` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DestroyCommand {
    /// Provider-assigned instance IDs.
    #[arg(required = true, value_name = "ID")]
    pub(crate) ids: Vec<String>,
}

/// Arguments for the `buildvm tag` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct TagCommand {
    /// Provider-assigned instance ID.
    #[arg(long, value_name = "ID")]
    pub(crate) id: String,
    /// Zone the instance runs in.
    #[arg(long, value_name = "ZONE")]
    pub(crate) zone: String,
    /// Metadata entries as key=value.
    #[arg(required = true, value_name = "KEY=VALUE")]
    pub(crate) tags: Vec<String>,
}

/// Arguments for the `buildvm connect` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ConnectCommand {
    /// Address of the VM, optionally with a port.
    #[arg(value_name = "ADDRESS")]
    pub(crate) address: String,
    /// Login user.
    #[arg(long, default_value = "root")]
    pub(crate) user: String,
    /// Path to the private key.
    #[arg(long, value_name = "PATH")]
    pub(crate) key: String,
}
