//! Command-line interface definitions for the `linvol` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `linvol` binary.
#[derive(Debug, Parser)]
#[command(
    name = "linvol",
    version,
    about = "Attach, format and mount Linode Block Storage volumes by name",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create a volume in this node's region.
    #[command(name = "create")]
    Create(CreateCommand),
    /// Detach a volume and delete it when tagged for deletion.
    #[command(name = "remove")]
    Remove(NameArg),
    /// Attach, format if blank, and mount a volume on this node.
    #[command(name = "mount")]
    Mount(NameArg),
    /// Unmount a volume and detach it from this node.
    #[command(name = "unmount")]
    Unmount(NameArg),
    /// Describe a volume.
    #[command(name = "get")]
    Get(NameArg),
    /// Describe every volume in this node's region.
    #[command(name = "list")]
    List,
    /// Print the mount path of a volume without contacting the provider.
    #[command(name = "path")]
    Path(NameArg),
    /// Print the driver capabilities.
    #[command(name = "capabilities")]
    Capabilities,
    /// Print the provider identity resolved for this node.
    #[command(name = "whoami")]
    Whoami,
}

/// A single volume name.
#[derive(Debug, Args)]
pub(crate) struct NameArg {
    /// Volume name (the provider-side label).
    #[arg(value_name = "NAME")]
    pub(crate) name: String,
}

/// Arguments for `linvol create`.
#[derive(Debug, Args)]
pub(crate) struct CreateCommand {
    /// Volume name (the provider-side label).
    #[arg(value_name = "NAME")]
    pub(crate) name: String,
    /// Creation option such as `size=20`, `filesystem=xfs` or
    /// `delete-on-remove=true`. May be repeated.
    #[arg(short = 'o', long = "opt", value_name = "KEY=VALUE", value_parser = parse_option)]
    pub(crate) options: Vec<(String, String)>,
}

fn parse_option(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(format!("option {raw:?} has an empty key"));
    }
    Ok((trimmed.to_owned(), value.to_owned()))
}
