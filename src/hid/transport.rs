use async_trait::async_trait;

use super::command::{CommandType, InvalidCommandType};
use crate::transport::{TransportError, Version};

/// A whole CTAP-HID message, re-assembled from one or more HID reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Result<CommandType, InvalidCommandType>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(command: CommandType, payload: Vec<u8>) -> Self {
        Frame {
            command: Ok(command),
            payload,
        }
    }

    /// Builds a frame from the command identifier of an initialization packet.
    pub fn from_packet(command_identifier: u8, payload: Vec<u8>) -> Self {
        Frame {
            command: CommandType::from_packet_command_identifier(command_identifier | 0x80),
            payload,
        }
    }
}

/// A CTAP-HID connection that already handles channel allocation and packet
/// chunking, exchanging complete messages on an allocated channel.
///
/// `receive_frame` must be cancel safe: dropping its future before completion must
/// not lose a frame, since the backend races it against cancellation requests.
#[async_trait]
pub trait HidConnection: Send {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    async fn receive_frame(&mut self) -> Result<Frame, TransportError>;

    /// Device version learned from CTAPHID_INIT, if any.
    fn device_version(&self) -> Option<Version> {
        None
    }
}
