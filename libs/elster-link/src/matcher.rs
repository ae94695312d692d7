//! Request/response correlation
//!
//! A register request is answered asynchronously, interleaved with unrelated
//! bus traffic. [`PendingRequest`] is a one-shot state machine:
//!
//! ```text
//! Idle --publish--> AwaitingResponse --reply--> Matched
//!                                    --deadline--> TimedOut
//! ```
//!
//! The inbound filter is registered before the request leaves, and the
//! subscription lives exactly as long as the pending request.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::bus::{Bus, Subscription};
use crate::error::{ElsterError, Result};
use crate::frame::{build_request_frame, decode_device_id, CanFrame};
use crate::registers::RegisterDescriptor;

/// Default reply deadline
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(100);

/// Correlation state of a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    Idle,
    AwaitingResponse,
    Matched,
    TimedOut,
}

/// Terminal outcome of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched(CanFrame),
    TimedOut,
}

/// Recognises the reply to one register request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFilter {
    pub sender_id: u16,
    pub target_id: u16,
    pub register: u16,
}

impl ResponseFilter {
    pub fn new(sender_id: u16, target_id: u16, register: u16) -> Self {
        Self {
            sender_id,
            target_id,
            register,
        }
    }

    /// True for a data frame from the target, addressed back to the sender,
    /// carrying the requested register
    pub fn accepts(&self, frame: &CanFrame) -> bool {
        if frame.id != self.target_id
            || decode_device_id([frame.data[0], frame.data[1]]) != self.sender_id
        {
            return false;
        }
        if frame.register_field().address != self.register {
            return false;
        }
        // Echoed requests and broadcasts carry no data flag
        frame.is_data()
    }
}

/// One outstanding register request
#[derive(Debug)]
pub struct PendingRequest {
    filter: ResponseFilter,
    state: MatchState,
    replies: mpsc::Receiver<CanFrame>,
    /// Unsubscribes the reply filter when dropped
    _subscription: Subscription,
}

impl PendingRequest {
    /// Register the reply filter on the bus
    pub fn subscribe(bus: &Bus, filter: ResponseFilter) -> Self {
        // Single slot: the first accepted frame wins, later ones are dropped
        let (tx, replies) = mpsc::channel(1);
        let subscription = bus.subscribe(move |frame| {
            if filter.accepts(frame) {
                let _ = tx.try_send(*frame);
            } else {
                trace!("Frame {:03X} {:02X?} ignored", frame.id, frame.data);
            }
        });

        Self {
            filter,
            state: MatchState::Idle,
            replies,
            _subscription: subscription,
        }
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    /// Send the request frame
    pub async fn publish(&mut self, bus: &Bus, request: &CanFrame) -> Result<()> {
        if self.state != MatchState::Idle {
            return Err(ElsterError::unsupported(
                "request already published for this correlation",
            ));
        }
        bus.publish(request).await?;
        self.state = MatchState::AwaitingResponse;
        Ok(())
    }

    /// Wait for the reply or the deadline, whichever comes first
    ///
    /// Consumes the request; the reply filter is unsubscribed on return.
    /// Fails with [`ElsterError::Disconnected`] if the bus goes away first.
    pub async fn wait(mut self, bus: &Bus, timeout: Duration) -> Result<MatchOutcome> {
        if self.state != MatchState::AwaitingResponse {
            return Err(ElsterError::unsupported("request was never published"));
        }

        let outcome = tokio::select! {
            biased;
            _ = bus.closed() => return Err(ElsterError::Disconnected),
            received = tokio::time::timeout(timeout, self.replies.recv()) => match received {
                Ok(Some(frame)) => MatchOutcome::Matched(frame),
                Ok(None) | Err(_) => MatchOutcome::TimedOut,
            },
        };

        self.state = match outcome {
            MatchOutcome::Matched(_) => MatchState::Matched,
            MatchOutcome::TimedOut => MatchState::TimedOut,
        };
        debug!(
            "Register 0x{:04X} from {:03X}: {:?}",
            self.filter.register, self.filter.target_id, self.state
        );
        Ok(outcome)
    }
}

/// Request one register from `target_id` and wait for its reply
pub async fn request_register(
    bus: &Bus,
    sender_id: u16,
    target_id: u16,
    register: &RegisterDescriptor,
    timeout: Duration,
) -> Result<MatchOutcome> {
    let request = build_request_frame(sender_id, target_id, register)?;

    // Subscribe before publishing so a fast reply cannot slip past
    let filter = ResponseFilter::new(sender_id, target_id, register.address);
    let mut pending = PendingRequest::subscribe(bus, filter);

    debug!(
        "Requesting register 0x{:04X} ({}) from {:03X}",
        register.address, register.name, target_id
    );
    pending.publish(bus, &request).await?;
    pending.wait(bus, timeout).await
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::frame::{encode_device_header, DATA, REQUEST};

    fn reply(id: u16, addressed_to: u16, register: u8, flag: u8) -> CanFrame {
        let [b0, b1] = encode_device_header(addressed_to, flag);
        CanFrame::new(id, [b0, b1, register, 0x00, 0x64, 0, 0, 0]).unwrap()
    }

    #[test]
    fn test_filter_accepts_reply() {
        let filter = ResponseFilter::new(0x680, 0x180, 0x0C);
        assert!(filter.accepts(&reply(0x180, 0x680, 0x0C, DATA)));
    }

    #[test]
    fn test_filter_rejects_other_traffic() {
        let filter = ResponseFilter::new(0x680, 0x180, 0x0C);
        // Wrong source device
        assert!(!filter.accepts(&reply(0x301, 0x680, 0x0C, DATA)));
        // Addressed to another participant
        assert!(!filter.accepts(&reply(0x180, 0x700, 0x0C, DATA)));
        // Different register
        assert!(!filter.accepts(&reply(0x180, 0x680, 0x0D, DATA)));
        // Request rather than data
        assert!(!filter.accepts(&reply(0x180, 0x680, 0x0C, REQUEST)));
    }

    #[test]
    fn test_filter_extended_register() {
        let filter = ResponseFilter::new(0x680, 0x180, 0x0930);
        let frame = CanFrame::new(0x180, [0xD2, 0x00, 0xFA, 0x09, 0x30, 0x00, 0x27, 0]).unwrap();
        assert!(filter.accepts(&frame));

        let filter = ResponseFilter::new(0x680, 0x180, 0x0931);
        assert!(!filter.accepts(&frame));
    }
}
