//! zrootstrap - provisions block devices into a redundant ZFS root pool.
//!
//! Destructive by design: wipes the target devices, partitions them
//! (EFI + optional swap + ZFS), creates the pool and its dataset hierarchy,
//! and hands the resulting plan to whatever installs the bootloader next.
//! The one invariant that no flag can override: the device backing the
//! running root filesystem is never touched.

mod commands;
mod config;
mod device;
mod error;
mod exec;
mod pipeline;
mod plan;
mod pool;

use std::path::PathBuf;

use anyhow::Result;
use bytesize::ByteSize;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::{Compression, ProvisioningConfig, RedundancyClass};

#[derive(Parser)]
#[command(name = "zrootstrap")]
#[command(about = "Provision block devices into a redundant ZFS root pool")]
#[command(
    after_help = "QUICK START:\n  zrootstrap inspect                          List candidate devices\n  zrootstrap plan /dev/sda /dev/sdb -r mirror Preview the topology\n  zrootstrap provision ... --dry-run          Rehearse without touching anything\n  zrootstrap provision /dev/sda /dev/sdb -r mirror"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by plan and provision.
#[derive(Args)]
struct PoolArgs {
    /// Target devices, in order (e.g. /dev/sda /dev/nvme0n1)
    #[arg(required = true)]
    devices: Vec<PathBuf>,

    /// Pool name
    #[arg(long, default_value = "zroot")]
    pool_name: String,

    /// Redundancy class
    #[arg(short, long, value_enum, default_value_t = RedundancyClass::None)]
    redundancy: RedundancyClass,

    /// EFI system partition size (e.g. 1GiB, 512MiB)
    #[arg(long, default_value = "1GiB", value_parser = parse_size)]
    efi_size: ByteSize,

    /// Swap partition size; 0 disables swap
    #[arg(long, default_value = "8GiB", value_parser = parse_size)]
    swap_size: ByteSize,

    /// Override the pool ashift (9-13) instead of auto-detecting
    #[arg(long)]
    ashift: Option<u8>,

    /// Pool compression algorithm
    #[arg(long, value_enum, default_value_t = Compression::Zstd)]
    compression: Compression,

    /// Override overridable fatal fitness findings and skip confirmation
    #[arg(long)]
    force: bool,
}

impl PoolArgs {
    fn into_config(self, dry_run: bool) -> ProvisioningConfig {
        ProvisioningConfig {
            pool_name: self.pool_name,
            devices: self.devices,
            redundancy: self.redundancy,
            efi_size: self.efi_size,
            swap_size: self.swap_size,
            ashift: self.ashift,
            compression: self.compression,
            dry_run,
            force: self.force,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List candidate block devices with fitness findings
    Inspect,

    /// Validate devices and print the partition/pool plan (touches nothing)
    Plan {
        #[command(flatten)]
        args: PoolArgs,

        /// Emit the plan as JSON for downstream tooling
        #[arg(long)]
        json: bool,
    },

    /// DESTROY the target devices and provision the pool
    Provision {
        #[command(flatten)]
        args: PoolArgs,

        /// Log every operation but execute nothing destructive
        #[arg(long)]
        dry_run: bool,

        /// Answer the destruction confirmation with yes
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Reformat an NVMe namespace to 4096-byte sectors (DESTROYS all data)
    Reformat4k {
        /// NVMe device (e.g. /dev/nvme0n1)
        device: PathBuf,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,

        /// Log the format command without executing it
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_size(s: &str) -> Result<ByteSize, String> {
    s.parse::<ByteSize>()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Inspect => commands::cmd_inspect(),
        Commands::Plan { args, json } => commands::cmd_plan(&args.into_config(false), json),
        Commands::Provision { args, dry_run, yes } => {
            commands::cmd_provision(args.into_config(dry_run), yes)
        }
        Commands::Reformat4k {
            device,
            force,
            dry_run,
        } => commands::cmd_reformat(device, force, dry_run),
    }
}
