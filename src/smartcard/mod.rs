pub mod apdu;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, instrument, trace, warn};

use self::apdu::{split_status, Apdu, SW1_MORE_DATA, SW_SUCCESS};
use crate::{
    ctap::state::CommandState,
    transport::{TransportError, Version},
};

/// Application identifier of the FIDO applet.
pub const FIDO_AID: [u8; 8] = [0xA0, 0x00, 0x00, 0x06, 0x47, 0x2F, 0x00, 0x01];

/// NFCCTAP_MSG, wrapping a CTAP2 request.
const INS_NFCCTAP_MSG: u8 = 0x10;
const CLA_PROPRIETARY: u8 = 0x80;

/// An ISO 7816 smartcard link (PC/SC reader, NFC), exchanging raw APDUs.
#[async_trait]
pub trait SmartCardConnection: Send {
    /// Sends one command APDU and returns the full response, status word included.
    async fn transmit(&mut self, apdu: Bytes) -> Result<Vec<u8>, TransportError>;
}

/// Carries CTAP2 requests in NFCCTAP_MSG APDUs.
///
/// The smartcard link has no way of aborting a request in flight, so a cancelled
/// [CommandState] is only logged.
pub struct ApduBackend {
    connection: Box<dyn SmartCardConnection>,
    extended_length: bool,
}

impl ApduBackend {
    /// Selects the FIDO applet on the card, failing when it is absent.
    #[instrument(skip_all, level = "debug")]
    pub async fn open(
        connection: Box<dyn SmartCardConnection>,
        extended_length: bool,
    ) -> Result<Self, TransportError> {
        let mut backend = ApduBackend {
            connection,
            extended_length,
        };
        let selected = backend.send_apdu(Apdu::select(&FIDO_AID)).await?;
        debug!(version = %String::from_utf8_lossy(&selected), "Selected FIDO applet");
        Ok(backend)
    }

    /// The smartcard link reports no firmware version.
    pub fn version(&self) -> Version {
        Version::default()
    }

    /// Sends a command, following command chaining and `61XX` response chaining, and
    /// returns the concatenated response body.
    pub async fn send_apdu(&mut self, apdu: Apdu) -> Result<Vec<u8>, TransportError> {
        let mut wire = apdu.encode(self.extended_length);
        let last = wire.pop().ok_or(TransportError::EmptyResponse)?;
        for chunk in wire {
            let response = self.connection.transmit(chunk).await?;
            let (_, sw) = split_status(&response).ok_or(TransportError::EmptyResponse)?;
            if sw != SW_SUCCESS {
                return Err(TransportError::ApduStatus(sw));
            }
        }

        let mut body = Vec::new();
        let mut response = self.connection.transmit(last).await?;
        loop {
            let (data, sw) = split_status(&response).ok_or(TransportError::EmptyResponse)?;
            body.extend_from_slice(data);
            match sw {
                SW_SUCCESS => return Ok(body),
                sw if (sw >> 8) as u8 == SW1_MORE_DATA => {
                    trace!(remaining = sw & 0xff, "Fetching more response data");
                    response = self
                        .connection
                        .transmit(Apdu::get_response(sw as u8))
                        .await?;
                }
                sw => return Err(TransportError::ApduStatus(sw)),
            }
        }
    }

    /// Sends `data` (command byte followed by CBOR arguments) and returns the raw CTAP
    /// response, starting with its status byte.
    #[instrument(skip_all, level = "debug")]
    pub async fn send_cbor(
        &mut self,
        data: Vec<u8>,
        state: Option<&CommandState>,
    ) -> Result<Vec<u8>, TransportError> {
        if state.map(CommandState::is_cancelled).unwrap_or(false) {
            warn!("Cancellation is not supported over the smartcard link, sending anyway");
        }
        trace!(request = %hex::encode(&data), "Sending NFCCTAP_MSG");
        let response = self
            .send_apdu(Apdu::new(CLA_PROPRIETARY, INS_NFCCTAP_MSG, 0x00, 0x00, data))
            .await?;
        trace!(response = %hex::encode(&response), "Received NFCCTAP_MSG response");
        Ok(response)
    }
}
