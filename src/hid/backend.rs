use tracing::{debug, instrument, trace, warn};

use super::{
    command::{CommandType, InvalidCommandType, KeepaliveStatus},
    transport::{Frame, HidConnection},
};
use crate::{
    ctap::state::CommandState,
    transport::{TransportError, Version},
};

enum Event {
    Cancelled,
    Received(Result<Frame, TransportError>),
}

/// Sends CTAP2 requests as CTAPHID_CBOR messages and CTAP1 APDUs as CTAPHID_MSG
/// messages, handling keepalive and cancellation while the authenticator works on a
/// request.
pub struct HidBackend {
    connection: Box<dyn HidConnection>,
}

impl HidBackend {
    pub fn new(connection: Box<dyn HidConnection>) -> Self {
        HidBackend { connection }
    }

    pub fn version(&self) -> Version {
        self.connection.device_version().unwrap_or_default()
    }

    async fn next_event(&mut self, state: Option<&CommandState>, cancel_sent: bool) -> Event {
        match state {
            Some(state) if !cancel_sent => tokio::select! {
                biased;
                _ = state.cancelled() => Event::Cancelled,
                frame = self.connection.receive_frame() => Event::Received(frame),
            },
            _ => Event::Received(self.connection.receive_frame().await),
        }
    }

    /// Sends `data` (command byte followed by CBOR arguments) and returns the raw CTAP
    /// response, starting with its status byte.
    pub async fn send_cbor(
        &mut self,
        data: Vec<u8>,
        state: Option<&CommandState>,
    ) -> Result<Vec<u8>, TransportError> {
        self.send_message(CommandType::Cbor, data, state).await
    }

    /// Sends one message and waits for the response carrying the same command.
    #[instrument(skip(self, data, state), level = "debug")]
    pub async fn send_message(
        &mut self,
        command: CommandType,
        data: Vec<u8>,
        state: Option<&CommandState>,
    ) -> Result<Vec<u8>, TransportError> {
        trace!(request = %hex::encode(&data), "Sending message");
        self.connection.send_frame(Frame::new(command, data)).await?;

        let mut cancel_sent = false;
        loop {
            let frame = match self.next_event(state, cancel_sent).await {
                Event::Cancelled => {
                    debug!("Sending CTAPHID_CANCEL");
                    self.connection
                        .send_frame(Frame::new(CommandType::Cancel, Vec::new()))
                        .await?;
                    cancel_sent = true;
                    continue;
                }
                Event::Received(frame) => frame?,
            };

            match frame.command {
                Ok(received) if received == command => {
                    trace!(response = %hex::encode(&frame.payload), "Received response");
                    return Ok(frame.payload);
                }
                Ok(CommandType::Keepalive) => {
                    match frame.payload.first().copied().map(KeepaliveStatus::try_from) {
                        Some(Ok(status)) => {
                            trace!(?status, "Keepalive");
                            if let Some(state) = state {
                                state.notify_keepalive(status);
                            }
                        }
                        _ => warn!(payload = ?frame.payload, "Ignoring malformed keepalive"),
                    }
                }
                Ok(CommandType::Error) => {
                    let code = frame.payload.first().copied().unwrap_or(0x7F);
                    warn!(code, "CTAPHID error frame");
                    return Err(TransportError::HidError(code));
                }
                Ok(other) => return Err(TransportError::UnexpectedFrame(other.into())),
                Err(invalid) => {
                    warn!(%invalid, "Received a frame with an invalid command");
                    let raw = match invalid {
                        InvalidCommandType::UnsupportedVendor(c) => c,
                        InvalidCommandType::InvalidCommand(c) => c,
                    };
                    return Err(TransportError::UnexpectedFrame(raw));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedHid;

    #[tokio::test]
    async fn test_returns_cbor_payload_after_keepalives() {
        let (hid, sent) = ScriptedHid::new(vec![
            Frame::new(CommandType::Keepalive, vec![1]),
            Frame::new(CommandType::Keepalive, vec![2]),
            Frame::new(CommandType::Cbor, vec![0x00, 0xa0]),
        ]);
        let mut backend = HidBackend::new(Box::new(hid));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let state = CommandState::with_keepalive(tx);

        let response = backend.send_cbor(vec![0x04], Some(&state)).await.unwrap();
        assert_eq!(response, vec![0x00, 0xa0]);
        assert_eq!(rx.recv().await, Some(KeepaliveStatus::Processing));
        assert_eq!(rx.recv().await, Some(KeepaliveStatus::Upneeded));
        assert_eq!(
            sent.lock().unwrap().as_slice(),
            &[Frame::new(CommandType::Cbor, vec![0x04])]
        );
    }

    #[tokio::test]
    async fn test_error_frame_is_transport_error() {
        let (hid, _sent) = ScriptedHid::new(vec![Frame::new(CommandType::Error, vec![0x06])]);
        let mut backend = HidBackend::new(Box::new(hid));
        let err = backend.send_cbor(vec![0x04], None).await.unwrap_err();
        assert!(matches!(err, TransportError::HidError(0x06)));
        assert_eq!(
            err.hid_error_code(),
            Some(crate::hid::command::ErrorCode::ChannelBusy)
        );
    }

    #[tokio::test]
    async fn test_unexpected_frame() {
        let (hid, _sent) = ScriptedHid::new(vec![Frame::new(CommandType::Wink, vec![])]);
        let mut backend = HidBackend::new(Box::new(hid));
        let err = backend.send_cbor(vec![0x04], None).await.unwrap_err();
        assert!(matches!(err, TransportError::UnexpectedFrame(0x08)));
    }

    #[tokio::test]
    async fn test_msg_response_must_match_request() {
        let (hid, sent) = ScriptedHid::new(vec![
            Frame::new(CommandType::Msg, vec![0x90, 0x00]),
            Frame::new(CommandType::Cbor, vec![0x00]),
        ]);
        let mut backend = HidBackend::new(Box::new(hid));
        let response = backend
            .send_message(CommandType::Msg, vec![0x00, 0x03, 0x00, 0x00], None)
            .await
            .unwrap();
        assert_eq!(response, vec![0x90, 0x00]);
        assert_eq!(sent.lock().unwrap()[0].command, Ok(CommandType::Msg));

        let err = backend
            .send_message(CommandType::Msg, vec![], None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::UnexpectedFrame(0x10)));
    }

    #[tokio::test]
    async fn test_cancel_sends_single_cancel_frame() {
        let (hid, sent) = ScriptedHid::new(vec![
            Frame::new(CommandType::Keepalive, vec![2]),
            Frame::new(CommandType::Cbor, vec![0x2d]),
        ]);
        let mut backend = HidBackend::new(Box::new(hid));
        let state = CommandState::new();
        state.cancel();

        let response = backend.send_cbor(vec![0x07], Some(&state)).await.unwrap();
        assert_eq!(response, vec![0x2d]);
        let sent = sent.lock().unwrap();
        assert_eq!(
            sent.as_slice(),
            &[
                Frame::new(CommandType::Cbor, vec![0x07]),
                Frame::new(CommandType::Cancel, vec![]),
            ]
        );
    }
}
