//! Bus commands: dump, scan, read and write
//!
//! `scan` and `read` own the dispatch loop for their duration: it is started
//! before the first request and the bus is disconnected on every exit path.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::config::ElsterConfig;
use crate::display::format_frame;
use crate::error::{ElsterError, Result};
use crate::frame::CanFrame;
use crate::matcher::{request_register, MatchOutcome};
use crate::registers::{RegisterDescriptor, RegisterTable};
use crate::value::{self, TypedValue};

/// Register answered during a scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEntry {
    pub register: RegisterDescriptor,
    /// Reply frame as received
    pub frame: CanFrame,
    /// Decoded value, or why the payload could not be decoded
    pub value: Result<TypedValue>,
}

/// Result of a single register read
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterReading {
    pub register: RegisterDescriptor,
    pub frame: CanFrame,
    pub value: TypedValue,
}

/// Log every frame on the bus until it closes or is disconnected
pub async fn dump(bus: &Bus, table: &RegisterTable) -> Result<()> {
    let table = table.clone();
    let _observer = bus.subscribe(move |frame| info!("{}", format_frame(frame, &table)));
    bus.connect_and_publish().await
}

/// Request every register of `table` from `target_id`, one at a time
///
/// Registers that stay silent are skipped. `report` sees each answered
/// register as soon as its reply arrives; decode failures are reported in
/// the entry and never end the scan.
pub async fn scan<F>(
    bus: &Arc<Bus>,
    sender_id: u16,
    target_id: u16,
    table: &RegisterTable,
    config: &ElsterConfig,
    mut report: F,
) -> Result<Vec<ScanEntry>>
where
    F: FnMut(&ScanEntry),
{
    let dispatch = bus.spawn_dispatch();
    let timeout = config.request_timeout();
    let mut entries = Vec::new();

    info!(
        "Scanning {} registers of {:03X} as {:03X}",
        table.len(),
        target_id,
        sender_id
    );

    for register in table.iter() {
        match request_register(bus, sender_id, target_id, register, timeout).await? {
            MatchOutcome::Matched(frame) => {
                let value = value::decode(frame.register_field().value, register.kind);
                if let Err(e) = &value {
                    warn!("Register 0x{:04X} ({}): {}", register.address, register.name, e);
                }
                let entry = ScanEntry {
                    register: *register,
                    frame,
                    value,
                };
                report(&entry);
                entries.push(entry);
            },
            MatchOutcome::TimedOut => {
                debug!("Register 0x{:04X} ({}) not answered", register.address, register.name);
            },
        }
    }

    dispatch.shutdown().await?;
    info!("Scan finished: {}/{} registers answered", entries.len(), table.len());
    Ok(entries)
}

/// Read one register from `target_id`
///
/// Fails with [`ElsterError::UnknownRegister`] before touching the bus if
/// `address` is not in `table`, and with [`ElsterError::RequestTimeout`] if
/// the device does not answer.
pub async fn read(
    bus: &Arc<Bus>,
    sender_id: u16,
    target_id: u16,
    address: u16,
    table: &RegisterTable,
    config: &ElsterConfig,
) -> Result<RegisterReading> {
    let register = *table
        .lookup(address)
        .ok_or(ElsterError::UnknownRegister(address))?;
    let timeout = config.request_timeout();

    let dispatch = bus.spawn_dispatch();
    let outcome = request_register(bus, sender_id, target_id, &register, timeout).await;
    dispatch.shutdown().await?;

    match outcome? {
        MatchOutcome::Matched(frame) => {
            let value = value::decode(frame.register_field().value, register.kind)?;
            Ok(RegisterReading {
                register,
                frame,
                value,
            })
        },
        MatchOutcome::TimedOut => Err(ElsterError::RequestTimeout {
            register: address,
            timeout,
        }),
    }
}

/// Write one register on `target_id`
///
/// Devices expect writes without a reply and the acknowledgement convention
/// is unknown, so nothing is sent: the call always fails with
/// [`ElsterError::UnsupportedOperation`] (or `UnknownRegister`).
pub async fn write(
    _bus: &Bus,
    _sender_id: u16,
    target_id: u16,
    address: u16,
    value: &TypedValue,
    table: &RegisterTable,
) -> Result<()> {
    let register = table
        .lookup(address)
        .ok_or(ElsterError::UnknownRegister(address))?;

    warn!(
        "Refusing to write {} to register 0x{:04X} ({}) of {:03X}",
        value, register.address, register.name, target_id
    );
    Err(ElsterError::unsupported("register write is not implemented"))
}
