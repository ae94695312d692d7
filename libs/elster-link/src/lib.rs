//! Elster Communication Link Library
//!
//! Talks to Elster/Kromschröder heating controllers over a shared CAN bus.
//!
//! # Architecture
//!
//! This library provides:
//! - **Value codec**: 2-byte register payloads to/from [`TypedValue`]
//! - **Frame codec**: device header packing, short/extended register addressing
//! - **Request matcher**: publishes a request and correlates the asynchronous reply
//! - **Commands**: `dump`, `scan`, `read` and `write` on top of the above
//! - **Bus**: subscriber registry over a pluggable [`FrameTransport`]
//! - **Simulator**: in-memory device answering requests on a virtual bus
//!
//! # Features
//!
//! - `socketcan` - Linux SocketCAN transport (otherwise only the virtual bus is available)

pub mod bus;
pub mod commands;
pub mod config;
pub mod display;
pub mod error;
pub mod frame;
pub mod matcher;
pub mod registers;
pub mod simulator;
pub mod value;

// Re-export core types
pub use bus::{Bus, DispatchGuard, FrameTransport, Subscription, VirtualPeer, VirtualTransport};
#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use bus::SocketCanTransport;
pub use commands::{dump, read, scan, write, RegisterReading, ScanEntry};
pub use config::ElsterConfig;
pub use error::{ElsterError, Result};
pub use frame::{CanFrame, FrameHeader, RegisterField};
pub use matcher::{request_register, MatchOutcome, MatchState, PendingRequest, ResponseFilter};
pub use registers::{RegisterDescriptor, RegisterTable};
pub use simulator::SimulatedDevice;
pub use value::{DecimalScale, TypedValue, ValueKind};
