//! Meternode CLI - diagnostics for the meter link
//!
//! One-shot reads, frame and CRC helpers, float decoding and health analysis
//! of telemetry captures. Exit codes follow `meternode_core::cli::ExitCodes`.

use clap::{Parser, Subcommand};
use meternode_core::cli::{hex_bytes, parse_hex, parse_u16, render, CliResult, ExitCodes, OutputFormat};
use meternode_core::config::{self, LoggingConfig, NodeConfig};
use meternode_core::core::health::HealthTracker;
use meternode_core::core::master::{MetricKind, ModbusMaster};
use meternode_core::core::protocol::checksum::crc16;
use meternode_core::core::protocol::modbus::{build_read_request, format_frame};
use meternode_core::core::protocol::registers_to_f32;
use meternode_core::core::telemetry::read_json_lines;
use meternode_core::core::transport::{list_ports, RegisterTransport, SerialTransport, SimulatedMeter};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Meternode CLI
#[derive(Parser, Debug)]
#[command(
    name = "meternode-cli",
    author = "Meternode Team",
    version,
    about = "Diagnostics for the Modbus RTU power meter node",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Config file (defaults to the per-user config location)
    #[arg(short, long, env = "METERNODE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },

    /// Read meter values, one exchange per metric
    Read {
        /// Serial port (overrides the config)
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate (overrides the config)
        #[arg(short, long)]
        baud: Option<u32>,

        /// Slave address (overrides the config)
        #[arg(short, long)]
        slave: Option<u8>,

        /// Only this metric (voltage, current, power, temperature)
        #[arg(short, long)]
        metric: Option<MetricKind>,

        /// Talk to the simulated meter instead of a port
        #[arg(long)]
        simulate: bool,

        /// Accept responses with a bad CRC
        #[arg(long)]
        no_crc: bool,
    },

    /// Show the read request frame for a register address
    Frame {
        /// Start address (decimal or 0x hex)
        #[arg(value_parser = parse_u16)]
        address: u16,

        /// Slave address
        #[arg(short, long, default_value = "1")]
        slave: u8,
    },

    /// Compute CRC-16/MODBUS over hex bytes
    Crc {
        /// Hex input, e.g. "01 03 00 00 00 02"
        data: String,
    },

    /// Decode a register pair into a float
    Decode {
        /// High register (decimal or 0x hex)
        #[arg(value_parser = parse_u16)]
        high: u16,

        /// Low register (decimal or 0x hex)
        #[arg(value_parser = parse_u16)]
        low: u16,
    },

    /// Health report over a JSON-lines telemetry capture
    Analyze {
        /// Capture file written by the node
        file: PathBuf,
    },

    /// Print the effective configuration
    Config {
        /// Print the default config file location instead
        #[arg(long)]
        path: bool,
    },

    /// Print the exit code table
    ExitCodes,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    let logging = LoggingConfig {
        level: level.to_string(),
        ..LoggingConfig::default()
    };
    if let Err(e) = meternode_core::utils::logging::init(&logging) {
        eprintln!("Logging disabled: {}", e);
    }

    let result = match run(&cli) {
        Ok(()) => CliResult::success(),
        Err(err) => err,
    };

    if let CliResult::Error(_, msg) = &result {
        eprintln!("Error: {}", msg);
    }
    result.to_exit_code()
}

fn run(cli: &Cli) -> Result<(), CliResult> {
    match &cli.command {
        Commands::ListPorts { detailed } => list_serial_ports(cli, *detailed),
        Commands::Read {
            port,
            baud,
            slave,
            metric,
            simulate,
            no_crc,
        } => {
            let mut config = load_config(cli)?;
            if let Some(port) = port {
                config.serial.port = port.clone();
            }
            if let Some(baud) = baud {
                config.serial.baud_rate = *baud;
            }
            if let Some(slave) = slave {
                config.modbus.slave_id = *slave;
            }
            if *no_crc {
                config.modbus.verify_crc = false;
            }
            config.validate()?;
            read_meter(cli, &config, *metric, *simulate)
        }
        Commands::Frame { address, slave } => show_frame(cli, *slave, *address),
        Commands::Crc { data } => show_crc(cli, data),
        Commands::Decode { high, low } => decode(cli, *high, *low),
        Commands::Analyze { file } => {
            let config = load_config(cli)?;
            analyze(cli, &config, file)
        }
        Commands::Config { path } => show_config(cli, *path),
        Commands::ExitCodes => {
            meternode_core::cli::print_exit_codes();
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<NodeConfig, CliResult> {
    let config = match &cli.config {
        Some(path) => NodeConfig::load_from(path)?,
        None => NodeConfig::load()?,
    };
    Ok(config)
}

fn list_serial_ports(cli: &Cli, detailed: bool) -> Result<(), CliResult> {
    let ports = list_ports()?;

    if ports.is_empty() {
        if !cli.quiet {
            println!("No serial ports found.");
        }
        return Ok(());
    }

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if detailed {
                println!("Available Serial Ports:");
                println!("{:-<60}", "");
                for port in &ports {
                    println!("  {} [{:?}]", port.port_name, port.port_type);
                }
            } else {
                for port in &ports {
                    println!("{}", port.port_name);
                }
            }
        }
    }

    Ok(())
}

fn read_meter(cli: &Cli, config: &NodeConfig, only: Option<MetricKind>, simulate: bool) -> Result<(), CliResult> {
    let transport: Box<dyn RegisterTransport> = if simulate {
        let sim = &config.simulator;
        let mut meter = SimulatedMeter::new(config.modbus.slave_id, sim.values).with_faults(sim.faults);
        if let Some(seed) = sim.seed {
            meter = meter.with_seed(seed);
        }
        Box::new(meter)
    } else {
        if !cli.quiet {
            eprintln!("Reading {}", config.serial.connection_info());
        }
        Box::new(SerialTransport::open(config.serial.clone())?)
    };

    let mut master = ModbusMaster::new(transport, config.master_config());
    let kinds: Vec<MetricKind> = match only {
        Some(kind) => vec![kind],
        None => MetricKind::ALL.to_vec(),
    };

    let mut values = serde_json::Map::new();
    let mut lines = Vec::new();
    let mut first_error = None;

    for kind in kinds {
        match master.read_float(kind.address()) {
            Ok(value) => {
                values.insert(kind.name().to_string(), json!(value));
                lines.push(format!("{:<12} {:>10.3}", kind.name(), value));
            }
            Err(e) => {
                values.insert(kind.name().to_string(), serde_json::Value::Null);
                lines.push(format!("{:<12} {:>10}  ({})", kind.name(), "-", e));
                first_error.get_or_insert(e);
            }
        }
    }

    let output = render(&values, cli.format, |_| lines.join("\n"))?;
    println!("{}", output);

    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn show_frame(cli: &Cli, slave: u8, address: u16) -> Result<(), CliResult> {
    let frame = build_read_request(slave, address);
    let info = json!({
        "slave": slave,
        "address": address,
        "hex": hex_bytes(&frame),
        "decoded": format_frame(&frame),
    });
    println!(
        "{}",
        render(&info, cli.format, |_| format!("{}\n{}", hex_bytes(&frame), format_frame(&frame)))?
    );
    Ok(())
}

fn show_crc(cli: &Cli, data: &str) -> Result<(), CliResult> {
    let bytes = parse_hex(data).map_err(|e| CliResult::invalid_args(format!("bad hex input: {e}")))?;
    let crc = crc16(&bytes);
    let wire = crc.to_le_bytes();
    let info = json!({
        "length": bytes.len(),
        "crc": format!("0x{:04X}", crc),
        "wire": hex_bytes(&wire),
    });
    println!(
        "{}",
        render(&info, cli.format, |_| format!("CRC-16/MODBUS 0x{:04X} (wire: {})", crc, hex_bytes(&wire)))?
    );
    Ok(())
}

fn decode(cli: &Cli, high: u16, low: u16) -> Result<(), CliResult> {
    let value = registers_to_f32(high, low);
    let info = json!({
        "high": format!("0x{:04X}", high),
        "low": format!("0x{:04X}", low),
        "value": value,
    });
    println!("{}", render(&info, cli.format, |_| format!("{}", value))?);
    Ok(())
}

fn analyze(cli: &Cli, config: &NodeConfig, file: &Path) -> Result<(), CliResult> {
    let content = std::fs::read_to_string(file)?;
    let payloads = read_json_lines(&content)?;

    let mut tracker = HealthTracker::new(config.health);
    for payload in &payloads {
        tracker.record(&payload.reading());
    }

    let report = tracker.report();
    println!("{}", render(&report, cli.format, ToString::to_string)?);
    Ok(())
}

fn show_config(cli: &Cli, path_only: bool) -> Result<(), CliResult> {
    if path_only {
        let path = cli.config.clone().or_else(config::config_file).ok_or_else(|| {
            CliResult::error(ExitCodes::CONFIG_ERROR, "could not determine config directory")
        })?;
        println!("{}", path.display());
        return Ok(());
    }

    let config = load_config(cli)?;
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Text => print!("{}", config.to_toml()?),
    }
    Ok(())
}
