//! Scan, read and write against a simulated controller

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::disallowed_methods)]

use std::sync::Arc;
use std::time::Duration;

use elster_link::{
    commands, Bus, ElsterConfig, ElsterError, RegisterDescriptor, RegisterTable,
    SimulatedDevice, TypedValue, ValueKind, VirtualPeer, VirtualTransport,
};

const SENDER: u16 = 0x680;
const TARGET: u16 = 0x180;

fn virtual_bus() -> (Arc<Bus>, VirtualPeer) {
    let (transport, peer) = VirtualTransport::pair("vcan-test");
    (Arc::new(Bus::new(Arc::new(transport))), peer)
}

fn config() -> ElsterConfig {
    ElsterConfig {
        interface: "virtual".to_string(),
        ..Default::default()
    }
}

fn registers(addresses: &[u16]) -> RegisterTable {
    let elster = RegisterTable::elster();
    RegisterTable::new(
        addresses
            .iter()
            .map(|a| *elster.lookup(*a).unwrap())
            .collect(),
    )
}

// ============================================================================
// Scan
// ============================================================================

#[tokio::test]
async fn test_scan_reports_answered_registers_in_order() {
    let (bus, peer) = virtual_bus();
    let _device = SimulatedDevice::new(TARGET)
        .with_payload(0x000C, [0x00, 0x64])
        .with_payload(0x0009, [0x1E, 0x07])
        .with_payload(0x010C, [0x01, 0x41])
        .spawn(peer);
    // 0x000D is not known to the device and stays silent
    let table = registers(&[0x010C, 0x000D, 0x000C, 0x0009]);

    let mut reported = Vec::new();
    let entries = commands::scan(&bus, SENDER, TARGET, &table, &config(), |entry| {
        reported.push(entry.register.address)
    })
    .await
    .unwrap();

    assert_eq!(reported, vec![0x010C, 0x000C, 0x0009]);
    let values: Vec<TypedValue> = entries.into_iter().map(|e| e.value.unwrap()).collect();
    assert_eq!(
        values,
        vec![
            TypedValue::Decimal(32.1),
            TypedValue::Decimal(10.0),
            TypedValue::TimeOfDay("07:30".to_string()),
        ]
    );
    assert!(bus.is_disconnected());
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn test_scan_keeps_going_after_decode_failure() {
    let (bus, peer) = virtual_bus();
    let _device = SimulatedDevice::new(TARGET)
        .with_payload(0x00F7, [0x00, 0x05])
        .with_payload(0x000C, [0x80, 0x00])
        .spawn(peer);
    let table = registers(&[0x00F7, 0x000C]);

    let entries = commands::scan(&bus, SENDER, TARGET, &table, &config(), |_| {})
        .await
        .unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(
        entries[0].value,
        Err(ElsterError::InvalidEncodedValue {
            kind: ValueKind::Bool,
            bytes: [0x00, 0x05],
        })
    );
    assert_eq!(entries[1].value, Ok(TypedValue::Absent));
}

#[tokio::test]
async fn test_scan_of_empty_table_sends_nothing() {
    let (bus, mut peer) = virtual_bus();
    let table = RegisterTable::new(Vec::new());

    let entries = commands::scan(&bus, SENDER, TARGET, &table, &config(), |_| {})
        .await
        .unwrap();

    assert!(entries.is_empty());
    assert!(peer.try_published().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_scan_is_sequential() {
    let (bus, mut peer) = virtual_bus();
    let table = registers(&[0x0002, 0x0003, 0x0004]);

    let started = tokio::time::Instant::now();
    let entries = commands::scan(&bus, SENDER, TARGET, &table, &config(), |_| {})
        .await
        .unwrap();

    assert!(entries.is_empty());
    // One full timeout per silent register
    assert!(started.elapsed() >= Duration::from_millis(300));

    let sent: Vec<u8> = std::iter::from_fn(|| peer.try_published())
        .map(|f| f.data[2])
        .collect();
    assert_eq!(sent, vec![0x02, 0x03, 0x04]);
}

// ============================================================================
// Read
// ============================================================================

#[tokio::test]
async fn test_read_extended_register() {
    let (bus, peer) = virtual_bus();
    let table = RegisterTable::elster();
    let _device = SimulatedDevice::new(TARGET)
        .with_value(table.lookup(0x010C).unwrap(), &TypedValue::Decimal(32.1))
        .unwrap()
        .spawn(peer);

    let reading = commands::read(&bus, SENDER, TARGET, 0x010C, &table, &config())
        .await
        .unwrap();

    assert_eq!(reading.register.name, "WW_ECO_TEMP");
    assert_eq!(reading.value, TypedValue::Decimal(32.1));
    assert_eq!(reading.value.to_string(), "32.1");
    assert_eq!(reading.frame.data, [0xD2, 0x00, 0xFA, 0x01, 0x0C, 0x01, 0x41, 0x00]);
    assert!(bus.is_disconnected());
}

#[tokio::test]
async fn test_read_unknown_register_touches_nothing() {
    let (bus, mut peer) = virtual_bus();
    let table = RegisterTable::elster();

    let result = commands::read(&bus, SENDER, TARGET, 0xBEEF, &table, &config()).await;

    assert_eq!(result, Err(ElsterError::UnknownRegister(0xBEEF)));
    assert!(peer.try_published().is_none());
    assert!(!bus.is_disconnected());
}

#[tokio::test(start_paused = true)]
async fn test_read_timeout() {
    let (bus, _peer) = virtual_bus();
    let table = RegisterTable::elster();
    let config = ElsterConfig {
        request_timeout_ms: 250,
        ..config()
    };

    let result = commands::read(&bus, SENDER, TARGET, 0x000C, &table, &config).await;

    assert_eq!(
        result,
        Err(ElsterError::RequestTimeout {
            register: 0x000C,
            timeout: Duration::from_millis(250),
        })
    );
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn test_read_custom_table() {
    let (bus, peer) = virtual_bus();
    let table = RegisterTable::new(vec![RegisterDescriptor::new(
        0x0200,
        "CUSTOM",
        ValueKind::Unsigned16Le,
    )]);
    let _device = SimulatedDevice::new(TARGET)
        .with_payload(0x0200, [0x34, 0x12])
        .spawn(peer);

    let reading = commands::read(&bus, SENDER, TARGET, 0x0200, &table, &config())
        .await
        .unwrap();
    assert_eq!(reading.value, TypedValue::Unsigned16(0x1234));
}

// ============================================================================
// Write
// ============================================================================

#[tokio::test]
async fn test_write_is_unsupported() {
    let (bus, mut peer) = virtual_bus();
    let table = RegisterTable::elster();

    let result = commands::write(
        &bus,
        SENDER,
        TARGET,
        0x0002,
        &TypedValue::Decimal(45.0),
        &table,
    )
    .await;
    assert!(matches!(result, Err(ElsterError::UnsupportedOperation(_))));

    let result = commands::write(
        &bus,
        SENDER,
        TARGET,
        0xBEEF,
        &TypedValue::Raw([0, 1]),
        &table,
    )
    .await;
    assert_eq!(result, Err(ElsterError::UnknownRegister(0xBEEF)));

    assert!(peer.try_published().is_none());
    assert!(!bus.is_disconnected());
}
