//! Subcommand handlers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use vdev_config::Config;
use vdev_core::{
    ChannelBoard, ControllerAddress, FieldStore, FieldValues, FilePersistence, GarageCommand,
    GarageDeps, GarageDevice, Notices, Persistence, Report,
};

use crate::error::CliError;

// ── Shared setup ─────────────────────────────────────────────────────

/// Load the config, requiring the file to exist.
fn load(path: Option<&Path>) -> Result<Config, CliError> {
    let path = config_file(path);
    if !path.exists() {
        return Err(CliError::NoConfig {
            path: path.display().to_string(),
        });
    }
    Ok(vdev_config::load_config(Some(&path))?)
}

fn config_file(path: Option<&Path>) -> PathBuf {
    path.map_or_else(vdev_config::config_path, Path::to_path_buf)
}

fn configured_names(cfg: &Config) -> String {
    cfg.garage
        .iter()
        .map(|g| g.name.trim())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Everything the configured garages share, plus the garages themselves.
struct Runtime {
    devices: Vec<GarageDevice>,
    channels: Arc<ChannelBoard>,
    notices: Arc<Notices>,
}

impl Runtime {
    fn build(cfg: &Config) -> Result<Self, CliError> {
        let gateway = Arc::new(vdev_config::gateway_config(cfg)?.client()?);
        let timing = vdev_config::timing_config(cfg)?;

        let data_file = cfg.storage.data_file();
        debug!(path = %data_file.display(), "opening field store");
        let mut store = FieldStore::new(Arc::new(FilePersistence::open(data_file)?));
        if let Some(ref dir) = cfg.storage.legacy_dir {
            store = store.with_legacy_dir(dir.clone());
        }

        let channels = Arc::new(ChannelBoard::new());
        let notices = Arc::new(Notices::new());
        let deps = GarageDeps {
            gateway,
            store: Arc::new(store),
            channels: Arc::clone(&channels),
            notices: Arc::clone(&notices),
            timing,
        };

        let devices = vdev_config::garage_configs(cfg)?
            .into_iter()
            .map(|garage| GarageDevice::new(garage, deps.clone()))
            .collect();

        Ok(Self {
            devices,
            channels,
            notices,
        })
    }

    fn log_notices(&self) {
        for (device, topic, message) in self.notices.all() {
            warn!(%device, topic, "{message}");
        }
    }
}

async fn log_reports(mut reports: broadcast::Receiver<Report>) {
    loop {
        match reports.recv().await {
            Ok(Report::Channel {
                device,
                channel,
                value,
            }) => info!(%device, %channel, value, "report"),
            Ok(Report::Heartbeat { device, on }) => debug!(%device, on, "heartbeat"),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "report log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ── run ──────────────────────────────────────────────────────────────

pub async fn run(path: Option<&Path>) -> Result<(), CliError> {
    let cfg = load(path)?;
    let runtime = Runtime::build(&cfg)?;
    if runtime.devices.is_empty() {
        warn!("no garages configured");
    }

    let reports = tokio::spawn(log_reports(runtime.channels.subscribe()));

    for device in &runtime.devices {
        if let Err(e) = device.start().await {
            error!(device = device.name(), error = %e, "failed to start");
        }
    }
    runtime.log_notices();
    info!(garages = runtime.devices.len(), "running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    for device in &runtime.devices {
        device.shutdown().await;
    }
    reports.abort();
    Ok(())
}

// ── check ────────────────────────────────────────────────────────────

pub fn check(path: Option<&Path>) -> Result<(), CliError> {
    let cfg = load(path)?;
    let gateway = vdev_config::gateway_config(&cfg)?;
    let timing = vdev_config::timing_config(&cfg)?;
    let garages = vdev_config::garage_configs(&cfg)?;

    println!("gateway:   {} (user {})", gateway.url, gateway.username);
    println!(
        "ticks:     fast {}s, slow {}s",
        timing.fast_tick.as_secs(),
        timing.slow_tick.as_secs()
    );
    println!("store:     {}", cfg.storage.data_file().display());
    if let Some(ref dir) = cfg.storage.legacy_dir {
        println!("legacy:    {}", dir.display());
    }

    for garage in &garages {
        let mode = match ControllerAddress::parse(&garage.controller) {
            Ok(ControllerAddress::Disabled) => "variable mode".to_owned(),
            Ok(ControllerAddress::Host(host)) => format!("controller {host}"),
            Err(e) => format!("variable mode ({e})"),
        };
        let bindings = garage.variables.iter().filter(|(k, _)| k.ends_with("Id")).count();
        println!(
            "garage:    {} [{}] {mode}, {bindings} variable binding(s)",
            garage.name, garage.address
        );
    }
    Ok(())
}

// ── init ─────────────────────────────────────────────────────────────

pub fn init(path: Option<&Path>, force: bool) -> Result<(), CliError> {
    let path = config_file(path);
    if path.exists() && !force {
        return Err(CliError::ConfigExists {
            path: path.display().to_string(),
        });
    }
    vdev_config::save_config(&vdev_config::template(), &path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

// ── send ─────────────────────────────────────────────────────────────

pub async fn send(path: Option<&Path>, name: &str, command: GarageCommand) -> Result<(), CliError> {
    let cfg = load(path)?;
    let runtime = Runtime::build(&cfg)?;
    let device = runtime
        .devices
        .iter()
        .find(|d| d.name() == name)
        .ok_or_else(|| CliError::UnknownDevice {
            name: name.to_owned(),
            available: configured_names(&cfg),
        })?;

    device.initialize().await?;
    runtime.log_notices();
    device.command(command).await;
    device.shutdown().await;

    println!("Sent {command} to {name}");
    for (channel, value) in runtime.channels.snapshot(name) {
        println!("  {channel} = {value}");
    }
    Ok(())
}

// ── status ───────────────────────────────────────────────────────────

pub fn status(path: Option<&Path>, name: Option<&str>) -> Result<(), CliError> {
    let cfg = load(path)?;
    let records = stored_records(&cfg, name)?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

fn stored_records(cfg: &Config, name: Option<&str>) -> Result<BTreeMap<String, FieldValues>, CliError> {
    if let Some(name) = name {
        if !cfg.garage.iter().any(|g| g.name.trim() == name) {
            return Err(CliError::UnknownDevice {
                name: name.to_owned(),
                available: configured_names(cfg),
            });
        }
    }

    let persistence = FilePersistence::open(cfg.storage.data_file())?;
    let mut records = BTreeMap::new();
    for garage in &cfg.garage {
        let garage_name = garage.name.trim();
        if name.is_some_and(|n| n != garage_name) {
            continue;
        }
        if let Some(values) = persistence.get(garage_name)? {
            records.insert(garage_name.to_owned(), values);
        }
    }
    Ok(records)
}
