//! Simulated Elster device
//!
//! Answers register requests arriving over a [`VirtualPeer`], the way a
//! controller on a real bus does. Used by `--interface virtual` and tests.

use std::collections::HashMap;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::bus::VirtualPeer;
use crate::error::Result;
use crate::frame::{
    decode_device_id, encode_device_header, encode_register_address, CanFrame, DATA, FRAME_LEN,
};
use crate::registers::RegisterDescriptor;
use crate::value::{self, TypedValue};

/// In-memory register store replying to requests addressed to `device_id`
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    device_id: u16,
    registers: HashMap<u16, [u8; 2]>,
}

impl SimulatedDevice {
    pub fn new(device_id: u16) -> Self {
        Self {
            device_id,
            registers: HashMap::new(),
        }
    }

    /// Store a raw register payload
    pub fn with_payload(mut self, address: u16, payload: [u8; 2]) -> Self {
        self.registers.insert(address, payload);
        self
    }

    /// Store a typed register value
    pub fn with_value(self, register: &RegisterDescriptor, value: &TypedValue) -> Result<Self> {
        let payload = value::encode(value, register.kind)?;
        Ok(self.with_payload(register.address, payload))
    }

    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    /// Reply for a request frame, `None` if the frame is not a request to
    /// this device or the register is unknown here
    pub fn reply_to(&self, request: &CanFrame) -> Option<CanFrame> {
        let header = request.header();
        // Compare through the same lossy packing the request went through
        let addressed_to = encode_device_header(self.device_id, 0);
        if !header.is_request || header.device_id != decode_device_id(addressed_to) {
            return None;
        }

        let field = request.register_field();
        let payload = self.registers.get(&field.address)?;

        let mut data = [0u8; FRAME_LEN];
        data[..2].copy_from_slice(&encode_device_header(request.id, DATA));
        let offset = encode_register_address(&mut data, field.address);
        data[offset..offset + 2].copy_from_slice(payload);

        CanFrame::new(self.device_id, data).ok()
    }

    /// Answer requests until the bus side of `peer` goes away
    pub async fn serve(self, mut peer: VirtualPeer) {
        debug!("Simulated device {:03X} online", self.device_id);
        while let Some(frame) = peer.next_published().await {
            match self.reply_to(&frame) {
                Some(reply) => {
                    if peer.inject(reply).is_err() {
                        break;
                    }
                },
                None => trace!("Simulated device {:03X} ignores {:03X}", self.device_id, frame.id),
            }
        }
        debug!("Simulated device {:03X} offline", self.device_id);
    }

    pub fn spawn(self, peer: VirtualPeer) -> JoinHandle<()> {
        tokio::spawn(self.serve(peer))
    }
}
