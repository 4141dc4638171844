//! Hot tub controller entry point.
//!
//! Hexagonal architecture on a single-threaded async executor.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SysfsPins / MemoryPins      SerialTransport / SimulatedProbes │
//! │  (PinBackend)                (LineTransport)                   │
//! │  CsvJournal  CommandHook     JsonConfigFile   console          │
//! │  (EventSink) (Heater+Notify) (ConfigPort)     (stdin commands) │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  Controller: main dosing FSM · circulation FSM         │    │
//! │  │  sensor channel · safety bounds · dosing policy        │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  edge_executor::LocalExecutor driven by futures_lite block_on  │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use edge_executor::LocalExecutor;
use futures_lite::future::block_on;
use log::{error, info, warn};

use hottub::adapters::config_file::JsonConfigFile;
use hottub::adapters::console::{self, CONSOLE_COMMANDS};
use hottub::adapters::hooks::CommandHook;
use hottub::adapters::journal::CsvJournal;
use hottub::adapters::serial::SerialTransport;
use hottub::adapters::simulation::{MemoryPins, SimulatedProbes, WaterModel};
use hottub::adapters::sysfs_gpio::{self, SysfsPins};
use hottub::app::ports::{ConfigPort, LineTransport, PinBackend};
use hottub::app::service::{Controller, Ports};
use hottub::config::SystemConfig;

#[derive(Parser, Debug)]
#[command(version, about = "Unattended spa water-chemistry controller")]
struct Args {
    /// JSON config file; defaults are used when it does not exist
    #[arg(long, default_value = "hottub.json")]
    config: PathBuf,

    /// sysfs GPIO root
    #[arg(long, default_value = sysfs_gpio::DEFAULT_ROOT)]
    gpio_root: PathBuf,

    /// Serial device, overriding `serial.device`
    #[arg(long)]
    serial: Option<String>,

    /// Run against in-memory pins and simulated water
    #[arg(long)]
    simulate: bool,

    /// Write the effective config to `--config` and exit
    #[arg(long)]
    write_config: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    info!("hottub v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Config ─────────────────────────────────────────────
    let store = JsonConfigFile::new(&args.config);
    let mut config = store
        .load()
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(device) = args.serial {
        config.serial.device = device;
    }
    if args.write_config {
        store.save(&config)?;
        info!("Config written to {}", args.config.display());
        return Ok(());
    }

    // ── 2. Operator console ───────────────────────────────────
    console::spawn_stdin_reader(&CONSOLE_COMMANDS).context("starting console")?;

    // ── 3. Hardware and run ───────────────────────────────────
    if args.simulate {
        warn!("Simulation mode: no real pins or probes");
        let pins = MemoryPins::new();
        // Simulated plumbing: flow follows the circulation pump.
        pins.link(config.pins.circulation_pump, config.pins.flow_switch);
        let probes = SimulatedProbes::new(pins.clone(), &config.pins, WaterModel::default());
        run(config, Box::new(pins), probes)
    } else {
        let transport = SerialTransport::open(&config.serial).map_err(hottub::Error::from)?;
        run(config, Box::new(SysfsPins::new(&args.gpio_root)), transport)
    }
}

fn run(config: SystemConfig, pins: Box<dyn PinBackend>, transport: impl LineTransport) -> Result<()> {
    let ports = Ports {
        pins,
        sink: Box::new(CsvJournal::new(&config.journal)),
        notifier: Box::new(CommandHook::new("notify", config.hooks.notify.clone())),
        heater: Box::new(CommandHook::new("heater_off", config.hooks.heater_off.clone())),
    };
    let controller = Controller::new(config, ports)?;

    let executor: LocalExecutor<'_, 8> = LocalExecutor::new();
    executor
        .spawn(async {
            if let Err(e) = console::serve(&controller, &CONSOLE_COMMANDS).await {
                error!("console stopped: {}", e);
            }
        })
        .detach();

    let result = block_on(executor.run(controller.run(transport)));
    if let Err(e) = &result {
        error!("Controller halted: {}", e);
    }
    Ok(result?)
}
