//! Meternode - panel power meter node
//!
//! Polls the meter over Modbus RTU, drives the cooling fan and publishes one
//! JSON payload per cycle until interrupted.

use anyhow::Context;
use clap::Parser;
use meternode_core::config::{NodeConfig, OutputKind, SinkKind};
use meternode_core::core::acquisition::{AcquisitionLoop, SystemClock};
use meternode_core::core::actuator::{ActuatorController, ActuatorState, DigitalOutput, LogOutput, SysfsOutput};
use meternode_core::core::connectivity::{
    event_channel, AlwaysUp, ConnectivityMonitor, ConnectivityNotifier, InterfaceMonitor, NodeStatus,
};
use meternode_core::core::health::HealthTracker;
use meternode_core::core::master::ModbusMaster;
use meternode_core::core::telemetry::{JsonLinesSink, TelemetrySink};
use meternode_core::core::transport::{RegisterTransport, SerialTransport, SimulatedMeter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Meternode
#[derive(Parser, Debug)]
#[command(name = "meternode", author = "Meternode Team", version, about = "Modbus RTU power meter node")]
struct Args {
    /// Config file (defaults to the per-user config location)
    #[arg(short, long, env = "METERNODE_CONFIG")]
    config: Option<PathBuf>,

    /// Use the simulated meter instead of the serial port
    #[arg(long)]
    simulate: bool,

    /// Stop after this many cycles
    #[arg(long)]
    cycles: Option<u64>,

    /// Log level when RUST_LOG is unset (overrides the config)
    #[arg(long)]
    log_level: Option<String>,
}

fn open_transport(config: &NodeConfig, simulate: bool) -> anyhow::Result<Box<dyn RegisterTransport>> {
    if simulate {
        let sim = &config.simulator;
        let mut meter = SimulatedMeter::new(config.modbus.slave_id, sim.values).with_faults(sim.faults);
        if let Some(seed) = sim.seed {
            meter = meter.with_seed(seed);
        }
        info!("Using simulated meter (slave {})", config.modbus.slave_id);
        return Ok(Box::new(meter));
    }

    let transport = SerialTransport::open(config.serial.clone())
        .with_context(|| format!("failed to open {}", config.serial.port))?;
    info!("Opened {}", config.serial.connection_info());
    Ok(Box::new(transport))
}

fn open_output(config: &NodeConfig) -> anyhow::Result<Box<dyn DigitalOutput>> {
    let control = &config.control;
    let mut output: Box<dyn DigitalOutput> = match (control.output, &control.gpio_path) {
        (OutputKind::Sysfs, Some(path)) => Box::new(SysfsOutput::new(path, control.active_high)),
        (OutputKind::Sysfs, None) => anyhow::bail!("control.gpio_path is required for the sysfs output"),
        (OutputKind::Log, _) => Box::new(LogOutput),
    };

    // The controller starts Off; make the line agree
    output
        .set(ActuatorState::Off)
        .context("failed to initialise the fan output")?;
    Ok(output)
}

fn open_sink(config: &NodeConfig, notifier: &ConnectivityNotifier) -> anyhow::Result<Box<dyn TelemetrySink>> {
    let telemetry = &config.telemetry;
    Ok(match (telemetry.sink, &telemetry.path) {
        (SinkKind::File, Some(path)) => Box::new(
            JsonLinesSink::file(path, notifier)
                .with_context(|| format!("failed to open telemetry file {}", path.display()))?,
        ),
        (SinkKind::File, None) => anyhow::bail!("telemetry.path is required for the file sink"),
        (SinkKind::Stdout, _) => Box::new(JsonLinesSink::stdout(notifier)),
    })
}

fn open_monitor(config: &NodeConfig) -> Box<dyn ConnectivityMonitor> {
    match &config.connectivity.interface {
        Some(interface) => {
            let mut monitor = InterfaceMonitor::new(interface);
            if let Some(argv) = &config.connectivity.reconnect_command {
                monitor = monitor.with_reconnect_command(argv.clone());
            }
            Box::new(monitor)
        }
        None => Box::new(AlwaysUp),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NodeConfig::load_from(path).with_context(|| format!("failed to load {}", path.display()))?,
        None => NodeConfig::load().context("failed to load configuration")?,
    };
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    // Initialize logging; the guard flushes the log file on exit
    let _log_guard = meternode_core::utils::logging::init(&config.logging)?;
    info!("Starting Meternode v{}", meternode_core::VERSION);

    let transport = open_transport(&config, args.simulate)?;
    let output = open_output(&config)?;
    let (notifier, events) = event_channel();
    let sink = open_sink(&config, &notifier)?;
    let monitor = open_monitor(&config);

    let status = Arc::new(NodeStatus::new());
    let handler_status = Arc::clone(&status);
    ctrlc::set_handler(move || {
        info!("Shutdown requested");
        handler_status.request_stop();
    })
    .context("failed to install the shutdown handler")?;

    let controller = ActuatorController::with_hysteresis(config.control.threshold(), config.control.hysteresis);
    info!(
        "Fan threshold {:.2} °C (baseline {:.2} x {:.2}, hysteresis {:.2})",
        controller.threshold(),
        config.control.baseline_temperature,
        config.control.threshold_factor,
        config.control.hysteresis
    );

    let mut node = AcquisitionLoop::new(
        ModbusMaster::new(transport, config.master_config()),
        controller,
        output,
        sink,
        monitor,
        events,
        SystemClock,
    )
    .with_status(status)
    .with_schedule(config.loop_schedule())
    .with_publish_settings(config.publish_settings())
    .with_health(HealthTracker::new(config.health));

    let summary = node.run(args.cycles);
    info!(
        "Meternode stopped: {} published, {} failed",
        summary.published, summary.failed
    );
    Ok(())
}
