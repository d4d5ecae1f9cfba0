#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::Parser;
use slowfs_config::{
    DeviceConfig, FsyncStrategy, HDD_7200_RPM, WriteStrategy, built_in_configs,
    load_device_configs,
};
use slowfs_fuse::MountOptions;
use slowfs_scheduler::Scheduler;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── CLI definition ──────────────────────────────────────────────────────────

/// Mount a pass-through filesystem that simulates slow storage.
///
/// Every file operation on the mount is forwarded to the backing directory
/// and delayed as if it ran on the selected device.
#[derive(Debug, Parser)]
#[command(name = "slowfs", version)]
struct Cli {
    /// Directory to use as storage.
    #[arg(long)]
    backing_dir: PathBuf,

    /// Directory to mount at.
    #[arg(long)]
    mount_dir: PathBuf,

    /// Path to a JSON file listing device configurations.
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Which device configuration to use (built-ins: hdd7200rpm).
    #[arg(long, default_value = HDD_7200_RPM)]
    config_name: String,

    /// Allow other users to access the mount.
    #[arg(long)]
    allow_other: bool,

    // Per-parameter overrides. All strings so that "not specified" is
    // distinguishable from "set to the default value".
    /// Byte count, e.g. "4KiB".
    #[arg(long)]
    seek_window: Option<String>,
    /// Duration, e.g. "10ms".
    #[arg(long)]
    seek_time: Option<String>,
    /// Rate, e.g. "100MB/s".
    #[arg(long)]
    read_bytes_per_second: Option<String>,
    /// Rate, e.g. "100MB/s".
    #[arg(long)]
    write_bytes_per_second: Option<String>,
    /// Rate, e.g. "1GB/s".
    #[arg(long)]
    allocate_bytes_per_second: Option<String>,
    /// Duration, e.g. "175us".
    #[arg(long)]
    request_reorder_max_delay: Option<String>,
    /// Duration, e.g. "10ms".
    #[arg(long)]
    metadata_op_time: Option<String>,
    /// Choice of none/no, dumb, writeback/writebackcache/wbc.
    #[arg(long)]
    fsync_strategy: Option<String>,
    /// Choice of fast, simulate.
    #[arg(long)]
    write_strategy: Option<String>,
}

/// Apply every given override, collecting all parse failures so the user
/// sees them in one pass.
fn apply_overrides(config: &mut DeviceConfig, cli: &Cli) -> Result<()> {
    let mut errors = Vec::new();

    if let Some(value) = &cli.seek_window {
        match value.parse() {
            Ok(v) => config.seek_window = v,
            Err(e) => errors.push(format!("--seek-window: {e}")),
        }
    }
    if let Some(value) = &cli.seek_time {
        match humantime::parse_duration(value) {
            Ok(v) => config.seek_time = v,
            Err(e) => errors.push(format!("--seek-time: {e}")),
        }
    }
    if let Some(value) = &cli.read_bytes_per_second {
        match value.parse() {
            Ok(v) => config.read_bytes_per_second = v,
            Err(e) => errors.push(format!("--read-bytes-per-second: {e}")),
        }
    }
    if let Some(value) = &cli.write_bytes_per_second {
        match value.parse() {
            Ok(v) => config.write_bytes_per_second = v,
            Err(e) => errors.push(format!("--write-bytes-per-second: {e}")),
        }
    }
    if let Some(value) = &cli.allocate_bytes_per_second {
        match value.parse() {
            Ok(v) => config.allocate_bytes_per_second = v,
            Err(e) => errors.push(format!("--allocate-bytes-per-second: {e}")),
        }
    }
    if let Some(value) = &cli.request_reorder_max_delay {
        match humantime::parse_duration(value) {
            Ok(v) => config.request_reorder_max_delay = v,
            Err(e) => errors.push(format!("--request-reorder-max-delay: {e}")),
        }
    }
    if let Some(value) = &cli.metadata_op_time {
        match humantime::parse_duration(value) {
            Ok(v) => config.metadata_op_time = v,
            Err(e) => errors.push(format!("--metadata-op-time: {e}")),
        }
    }
    if let Some(value) = &cli.fsync_strategy {
        match value.parse::<FsyncStrategy>() {
            Ok(v) => config.fsync_strategy = v,
            Err(e) => errors.push(format!("--fsync-strategy: {e}")),
        }
    }
    if let Some(value) = &cli.write_strategy {
        match value.parse::<WriteStrategy>() {
            Ok(v) => config.write_strategy = v,
            Err(e) => errors.push(format!("--write-strategy: {e}")),
        }
    }

    if !errors.is_empty() {
        bail!("invalid flag(s):\n  {}", errors.join("\n  "));
    }
    Ok(())
}

fn select_config(cli: &Cli) -> Result<DeviceConfig> {
    let configs = match &cli.config_file {
        Some(path) => {
            let document = fs::read_to_string(path)
                .with_context(|| format!("couldn't read config file {}", path.display()))?;
            load_device_configs(&document)
                .with_context(|| format!("couldn't parse config file {}", path.display()))?
        }
        None => built_in_configs(),
    };

    let mut config = configs
        .get(&cli.config_name)
        .cloned()
        .with_context(|| format!("unknown config {:?}", cli.config_name))?;

    apply_overrides(&mut config, cli)?;
    config.validate()?;
    Ok(config)
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let backing_dir = fs::canonicalize(&cli.backing_dir)
        .with_context(|| format!("invalid backing-dir {}", cli.backing_dir.display()))?;
    let mount_dir = fs::canonicalize(&cli.mount_dir)
        .with_context(|| format!("invalid mount-dir {}", cli.mount_dir.display()))?;
    if backing_dir == mount_dir {
        bail!("backing directory may not be the same as mount directory");
    }

    let config = select_config(&cli)?;
    println!("using config: {config}");

    let scheduler = Arc::new(Scheduler::new(config));
    let options = MountOptions {
        allow_other: cli.allow_other,
        ..MountOptions::default()
    };

    info!(
        backing = %backing_dir.display(),
        mount = %mount_dir.display(),
        config = %cli.config_name,
        "mounting slowfs"
    );

    slowfs_fuse::mount(backing_dir, scheduler, &mount_dir, &options)
        .with_context(|| format!("couldn't mount at {}", mount_dir.display()))?;

    info!("unmounted, shutting down");
    Ok(())
}
