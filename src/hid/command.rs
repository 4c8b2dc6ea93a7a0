use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;
use zerocopy::{AsBytes, BigEndian, FromBytes, LayoutVerified, Unaligned, U32};

use crate::transport::Version;

/// A CTAP-HID command (note that the MSB isn't set, unlike in the wire protocol)
/// See https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html#usb-commands
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum CommandType {
    Msg = 0x03,
    Cbor = 0x10,
    Init = 0x06,
    Ping = 0x01,
    Cancel = 0x11,
    Error = 0x3F,
    Keepalive = 0x3B,
    // optional:
    Wink = 0x08,
    Lock = 0x04,
}

const CTAPHID_VENDOR_FIRST: u8 = 0x40;
const CTAPHID_VENDOR_LAST: u8 = 0x7F;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum InvalidCommandType {
    #[error("'{0}' is a vendor command identifier, and thus unsupported")]
    UnsupportedVendor(u8),

    #[error("'{0}' is not a valid CTAP-HID command identifier")]
    InvalidCommand(u8),
}

impl CommandType {
    /// Parses a command identifier as found in a CTAP-HID initialization packet,
    /// where the MSB is set.
    pub fn from_packet_command_identifier(
        command_identifier: u8,
    ) -> Result<CommandType, InvalidCommandType> {
        let command_identifier = command_identifier & 0x7F;
        if (CTAPHID_VENDOR_FIRST..=CTAPHID_VENDOR_LAST).contains(&command_identifier) {
            return Err(InvalidCommandType::UnsupportedVendor(command_identifier));
        }
        CommandType::try_from(command_identifier)
            .map_err(|_| InvalidCommandType::InvalidCommand(command_identifier))
    }

    /// The identifier as it appears on the wire, with the MSB set.
    pub fn packet_command_identifier(self) -> u8 {
        u8::from(self) | 0x80
    }
}

/// Error codes that may be sent as part of a response message, see
/// https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html#usb-hid-error
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum ErrorCode {
    InvalidCmd = 0x01,     // The command in the request is invalid
    InvalidPar = 0x02,     // The parameter(s) in the request is invalid
    InvalidLen = 0x03,     // The length field (BCNT) is invalid for the request
    InvalidSeq = 0x04,     // The sequence does not match expected value
    MsgTimeout = 0x05,     // The message has timed out
    ChannelBusy = 0x06,    // The device is busy for the requesting channel
    LockRequired = 0x0A,   // Command requires channel lock
    InvalidChannel = 0x0B, // CID is not valid.
    Other = 0x7F,          // Unspecified error
}

/// Payload of a CTAPHID_KEEPALIVE frame.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum KeepaliveStatus {
    Processing = 1,
    Upneeded = 2,
}

pub const CAPABILITY_WINK: u8 = 0x01;
pub const CAPABILITY_CBOR: u8 = 0x04;
pub const CAPABILITY_NMSG: u8 = 0x08;

/// Response to CTAPHID_INIT, used by connection implementations to learn the
/// allocated channel and the device version.
#[repr(C)]
#[derive(FromBytes, AsBytes, Unaligned, Debug)]
pub struct InitResponse {
    pub nonce: [u8; 8],
    pub channel_id: U32<BigEndian>,
    pub ctaphid_version: u8,
    pub major_device_version: u8,
    pub minor_device_version: u8,
    pub build_device_version: u8,
    pub capabilities_flag: u8,
}

impl InitResponse {
    /// Reads the response out of a CTAPHID_INIT payload. Trailing bytes are ignored.
    pub fn parse(payload: &[u8]) -> Option<LayoutVerified<&[u8], InitResponse>> {
        LayoutVerified::<_, InitResponse>::new_unaligned_from_prefix(payload)
            .map(|(response, _rest)| response)
    }

    pub fn device_version(&self) -> Version {
        Version::new(
            self.major_device_version,
            self.minor_device_version,
            self.build_device_version,
        )
    }

    pub fn supports_cbor(&self) -> bool {
        self.capabilities_flag & CAPABILITY_CBOR != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_identifier_msb() {
        assert_eq!(CommandType::Cbor.packet_command_identifier(), 0x90);
        assert_eq!(
            CommandType::from_packet_command_identifier(0xbb),
            Ok(CommandType::Keepalive)
        );
        assert_eq!(
            CommandType::from_packet_command_identifier(0xc1),
            Err(InvalidCommandType::UnsupportedVendor(0x41))
        );
        assert_eq!(
            CommandType::from_packet_command_identifier(0x82),
            Err(InvalidCommandType::InvalidCommand(0x02))
        );
    }

    #[test]
    fn test_parse_init_response() {
        let payload =
            hex::decode("0102030405060708aabbccdd0205040305ff").unwrap();
        let response = InitResponse::parse(&payload).unwrap();
        assert_eq!(response.nonce, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(response.channel_id.get(), 0xaabbccdd);
        assert_eq!(response.device_version(), Version::new(5, 4, 3));
        assert!(response.supports_cbor());
        assert!(InitResponse::parse(&payload[..10]).is_none());
    }
}
