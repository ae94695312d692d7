//! Command line parsing

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use elster_link::config::parse_hex_u16;
use elster_link::{ElsterError, Result};

#[derive(Parser, Debug)]
#[command(name = "elsterctl")]
#[command(about = "Elster/Kromschröder CAN bus tool")]
#[command(long_about = "Elster/Kromschröder CAN bus tool

Usage patterns (ids, registers and values in hex):
  elsterctl can0                          Dump all bus traffic
  elsterctl can0 680 180                  Scan all known registers of device 180
  elsterctl can0 180                      Same, sending as the configured sender_id
  elsterctl can0 680 180.000c             Read register 000C of device 180
  elsterctl can0 680 180.000c.00e6        Write register 000C (not supported)
  elsterctl -c elster.toml                Dump on the configured interface

Use interface `virtual` to talk to a built-in simulated controller.")]
#[command(version)]
pub struct Cli {
    /// CAN interface (can0, slcan0, ...) or `virtual`; defaults to the configured one
    pub interface: Option<String>,

    /// [<sender>] <receiver>[.<register>[.<value>]] (hex)
    #[arg(value_name = "ADDRESS", num_args = 1..=2)]
    pub addressing: Vec<String>,

    /// Print raw frames and enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log filter, e.g. `debug` or `elster_link=trace` (overrides RUST_LOG)
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Configuration file (toml, yaml or json)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Reply deadline per register request in milliseconds
    #[arg(short = 't', long)]
    pub timeout_ms: Option<u64>,
}

/// What to do on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Dump,
    Scan {
        sender: u16,
        receiver: u16,
    },
    Read {
        sender: u16,
        receiver: u16,
        register: u16,
    },
    Write {
        sender: u16,
        receiver: u16,
        register: u16,
        value: u16,
    },
}

impl Cli {
    /// Sender id given on the command line
    pub fn sender(&self) -> Result<Option<u16>> {
        match self.addressing.as_slice() {
            [sender, _] => parse_hex_u16(sender).map(Some),
            _ => Ok(None),
        }
    }

    /// Action selected by the positional arguments, sending as `sender`
    /// when no sender was given
    pub fn action(&self, sender: u16) -> Result<Action> {
        match self.addressing.as_slice() {
            [] => Ok(Action::Dump),
            [target] | [_, target] => Ok(target.parse::<Target>()?.action(sender)),
            more => Err(ElsterError::invalid_value(format!(
                "expected [<sender>] <receiver>[.<register>[.<value>]], got {} arguments",
                more.len()
            ))),
        }
    }
}

/// Dotted target argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub receiver: u16,
    pub register: Option<u16>,
    pub value: Option<u16>,
}

impl Target {
    fn action(&self, sender: u16) -> Action {
        let receiver = self.receiver;
        match (self.register, self.value) {
            (Some(register), Some(value)) => Action::Write {
                sender,
                receiver,
                register,
                value,
            },
            (Some(register), None) => Action::Read {
                sender,
                receiver,
                register,
            },
            _ => Action::Scan { sender, receiver },
        }
    }
}

impl FromStr for Target {
    type Err = ElsterError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() > 3 {
            return Err(ElsterError::invalid_value(format!(
                "expected <receiver>[.<register>[.<value>]], got '{s}'"
            )));
        }

        let receiver = parse_hex_u16(parts[0])?;
        let register = parts.get(1).map(|p| parse_hex_u16(p)).transpose()?;
        let value = parts.get(2).map(|p| parse_hex_u16(p)).transpose()?;

        Ok(Self {
            receiver,
            register,
            value,
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("elsterctl").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!(
            "180".parse::<Target>().unwrap(),
            Target {
                receiver: 0x180,
                register: None,
                value: None
            }
        );
        assert_eq!(
            "180.0013.01a4".parse::<Target>().unwrap(),
            Target {
                receiver: 0x180,
                register: Some(0x0013),
                value: Some(0x01A4)
            }
        );
        assert!("180.1.2.3".parse::<Target>().is_err());
        assert!("180.".parse::<Target>().is_err());
    }

    #[test]
    fn test_actions() {
        assert_eq!(parse(&["can0"]).action(0x680).unwrap(), Action::Dump);
        assert_eq!(
            parse(&["can0", "680", "180"]).action(0x680).unwrap(),
            Action::Scan {
                sender: 0x680,
                receiver: 0x180
            }
        );
        assert_eq!(
            parse(&["can0", "680", "180.000c"]).action(0x680).unwrap(),
            Action::Read {
                sender: 0x680,
                receiver: 0x180,
                register: 0x000C
            }
        );
        assert_eq!(
            parse(&["slcan0", "680", "180.000c.00e6"]).action(0x680).unwrap(),
            Action::Write {
                sender: 0x680,
                receiver: 0x180,
                register: 0x000C,
                value: 0x00E6
            }
        );
    }

    #[test]
    fn test_sender_falls_back_to_given_default() {
        let cli = parse(&["can0", "180.000c"]);
        assert_eq!(cli.sender().unwrap(), None);
        assert_eq!(
            cli.action(0x6A0).unwrap(),
            Action::Read {
                sender: 0x6A0,
                receiver: 0x180,
                register: 0x000C
            }
        );

        let cli = parse(&["can0", "700", "180"]);
        assert_eq!(cli.sender().unwrap(), Some(0x700));

        let cli = parse(&["can0", "zz", "180"]);
        assert!(cli.sender().is_err());
    }

    #[test]
    fn test_options() {
        let cli = parse(&["-v", "--no-color", "--timeout-ms", "250", "virtual", "680", "180"]);
        assert!(cli.verbose);
        assert!(cli.no_color);
        assert_eq!(cli.timeout_ms, Some(250));
        assert_eq!(cli.interface.as_deref(), Some("virtual"));

        // Interface may come from the config file
        let cli = parse(&["-c", "elster.toml"]);
        assert_eq!(cli.interface, None);
        assert_eq!(cli.action(0x680).unwrap(), Action::Dump);

        // At most a sender and a target
        assert!(Cli::try_parse_from(["elsterctl", "can0", "680", "180", "181"]).is_err());
    }
}
