//! elsterctl - Elster/Kromschröder CAN bus tool
//!
//! Dumps bus traffic, scans the known registers of a heating controller and
//! reads single registers.

mod cli;
mod logging;
mod shutdown;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use elster_link::display::{format_frame, format_register_error, format_register_value};
use elster_link::{
    Bus, ElsterConfig, RegisterTable, ScanEntry, SimulatedDevice, TypedValue, VirtualTransport,
};
use tracing::{error, info, warn};

use crate::cli::{Action, Cli};
use crate::logging::LogOptions;

/// Interface name selecting the built-in simulated controller
const VIRTUAL_INTERFACE: &str = "virtual";

/// Simulated controller id when no receiver is given
const DEFAULT_SIMULATED_ID: u16 = 0x180;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let log_options = LogOptions {
        filter: cli.log_level.clone(),
        verbose: cli.verbose,
        ansi: !cli.no_color,
    };
    if let Err(e) = logging::init(&log_options) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let action = cli.action(config.sender_id)?;
    let table = RegisterTable::elster();

    // Failing to open the interface is fatal before any command runs
    let bus = Arc::new(open_bus(&config, action)?);

    tokio::select! {
        result = execute(&bus, action, &table, &config) => result,
        signal = shutdown::wait_for_shutdown() => {
            warn!("{} received, disconnecting from {}", signal, config.interface);
            bus.disconnect();
            anyhow::bail!("interrupted")
        }
    }
}

/// Config file and environment, overridden by command line flags
fn load_config(cli: &Cli) -> Result<ElsterConfig> {
    let mut config = ElsterConfig::load(cli.config.as_deref())?;

    if let Some(interface) = &cli.interface {
        config.interface = interface.clone();
    }
    if let Some(sender) = cli.sender()? {
        config.sender_id = sender;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.request_timeout_ms = timeout_ms;
    }
    if cli.verbose {
        config.raw_log = true;
    }

    config.validate()?;
    Ok(config)
}

fn open_bus(config: &ElsterConfig, action: Action) -> Result<Bus> {
    if config.interface != VIRTUAL_INTERFACE {
        return open_interface(&config.interface);
    }

    let device_id = match action {
        Action::Dump => DEFAULT_SIMULATED_ID,
        Action::Scan { receiver, .. }
        | Action::Read { receiver, .. }
        | Action::Write { receiver, .. } => receiver,
    };
    info!("Using simulated controller {:03X}", device_id);

    let (transport, peer) = VirtualTransport::pair(VIRTUAL_INTERFACE);
    simulated_controller(device_id).spawn(peer);
    Ok(Bus::new(Arc::new(transport)))
}

#[cfg(all(target_os = "linux", feature = "socketcan"))]
fn open_interface(interface: &str) -> Result<Bus> {
    let transport = elster_link::SocketCanTransport::open(interface)?;
    Ok(Bus::new(Arc::new(transport)))
}

#[cfg(not(all(target_os = "linux", feature = "socketcan")))]
fn open_interface(interface: &str) -> Result<Bus> {
    Err(elster_link::ElsterError::connection_failed(
        interface,
        "built without SocketCAN support (enable the `socketcan` feature)",
    )
    .into())
}

/// Controller with a plausible set of register values
fn simulated_controller(device_id: u16) -> SimulatedDevice {
    SimulatedDevice::new(device_id)
        .with_payload(0x0002, [0x01, 0xC2]) // KESSELSOLLTEMP 45.0
        .with_payload(0x0003, [0x01, 0xE0]) // SPEICHERSOLLTEMP 48.0
        .with_payload(0x0009, [0x1E, 0x0E]) // UHRZEIT 14:30
        .with_payload(0x000A, [0x18, 0x0C]) // DATUM 24.12.
        .with_payload(0x000C, [0x00, 0x55]) // AUSSENTEMP 8.5
        .with_payload(0x000D, [0x80, 0x00]) // SAMMLERISTTEMP n/a
        .with_payload(0x000E, [0x01, 0xD9]) // SPEICHERISTTEMP 47.3
        .with_payload(0x0019, [0xD2, 0x04]) // BRENNERSTARTS 1234
        .with_payload(0x0022, [0x00, 0x2D]) // HEIZKURVE 0.45
        .with_payload(0x00F7, [0x00, 0x00])
        .with_payload(0x0105, [0x01, 0x00])
        .with_payload(0x010C, [0x01, 0x41]) // WW_ECO_TEMP 32.1
        .with_payload(0x0930, [0x27, 0x00])
        .with_payload(0x1410, [0x18, 0x58]) // 06:00-22:00
        .with_payload(0x1420, [0x80, 0x80])
}

async fn execute(
    bus: &Arc<Bus>,
    action: Action,
    table: &RegisterTable,
    config: &ElsterConfig,
) -> Result<()> {
    match action {
        Action::Dump => {
            info!("Dumping traffic on {}", config.interface);
            elster_link::dump(bus, table).await?;
        },
        Action::Scan { sender, receiver } => {
            let raw = config.raw_log;
            elster_link::scan(bus, sender, receiver, table, config, |entry| {
                print_scan_entry(entry, table, raw)
            })
            .await?;
        },
        Action::Read {
            sender,
            receiver,
            register,
        } => {
            let reading =
                elster_link::read(bus, sender, receiver, register, table, config).await?;
            if config.raw_log {
                println!("{}", format_frame(&reading.frame, table));
            } else {
                println!("{}", reading.value.to_string().trim());
            }
        },
        Action::Write {
            sender,
            receiver,
            register,
            value,
        } => {
            let value = TypedValue::Raw(value.to_be_bytes());
            elster_link::write(bus, sender, receiver, register, &value, table).await?;
        },
    }
    Ok(())
}

fn print_scan_entry(entry: &ScanEntry, table: &RegisterTable, raw: bool) {
    if raw {
        println!("{}", format_frame(&entry.frame, table));
        return;
    }

    match &entry.value {
        Ok(value) if value.is_absent() => {
            println!("{}", format_register_value(&entry.register, value).dimmed());
        },
        Ok(value) => println!("{}", format_register_value(&entry.register, value)),
        Err(e) => println!("{}", format_register_error(&entry.register, e).red()),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_precedence() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(
            b"interface = \"virtual\"\nsender_id = 0x700\nrequest_timeout_ms = 250\nraw_log = true\n",
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        std::env::set_var("ELSTER_SENDER_ID", "0x6A0");
        std::env::set_var("ELSTER_REQUEST_TIMEOUT_MS", "300");

        // File, then environment
        let cli = Cli::try_parse_from(["elsterctl", "-c", path.as_str()]).unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.interface, "virtual");
        assert_eq!(config.sender_id, 0x6A0);
        assert_eq!(config.request_timeout_ms, 300);
        assert!(config.raw_log);
        assert_eq!(cli.action(config.sender_id).unwrap(), Action::Dump);

        // Command line last
        let cli = Cli::try_parse_from([
            "elsterctl",
            "-c",
            path.as_str(),
            "-t",
            "400",
            "slcan0",
            "681",
            "180.000c",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.interface, "slcan0");
        assert_eq!(config.sender_id, 0x681);
        assert_eq!(config.request_timeout_ms, 400);

        // Without a sender argument the configured one is used
        let cli =
            Cli::try_parse_from(["elsterctl", "-c", path.as_str(), "virtual", "180.000c"]).unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(
            cli.action(config.sender_id).unwrap(),
            Action::Read {
                sender: 0x6A0,
                receiver: 0x180,
                register: 0x000C
            }
        );

        std::env::remove_var("ELSTER_SENDER_ID");
        std::env::remove_var("ELSTER_REQUEST_TIMEOUT_MS");
    }
}
