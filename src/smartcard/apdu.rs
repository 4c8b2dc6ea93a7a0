use bytes::{BufMut, Bytes, BytesMut};
use zerocopy::{AsBytes, FromBytes, Unaligned};

/// Largest body a short APDU can carry.
pub const SHORT_APDU_MAX_DATA: usize = 255;

/// Largest body an extended length APDU can carry.
pub const EXTENDED_APDU_MAX_DATA: usize = 65535;

pub const SW_SUCCESS: u16 = 0x9000;
pub const SW1_MORE_DATA: u8 = 0x61;

const CLA_CHAINING: u8 = 0x10;
pub const INS_SELECT: u8 = 0xA4;
pub const INS_GET_RESPONSE: u8 = 0xC0;

#[repr(C)]
#[derive(FromBytes, AsBytes, Unaligned, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApduHeader {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
}

/// An ISO 7816-4 command APDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    pub header: ApduHeader,
    pub data: Vec<u8>,
}

impl Apdu {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Apdu {
            header: ApduHeader { cla, ins, p1, p2 },
            data,
        }
    }

    pub fn select(aid: &[u8]) -> Self {
        Apdu::new(0x00, INS_SELECT, 0x04, 0x00, aid.to_vec())
    }

    pub fn get_response(le: u8) -> Bytes {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_slice(ApduHeader { cla: 0x00, ins: INS_GET_RESPONSE, p1: 0, p2: 0 }.as_bytes());
        buf.put_u8(le);
        buf.freeze()
    }

    /// Short encoding, always asking for up to 256 response bytes. The body must fit
    /// in [SHORT_APDU_MAX_DATA] bytes.
    pub fn encode_short(header: ApduHeader, data: &[u8]) -> Bytes {
        debug_assert!(data.len() <= SHORT_APDU_MAX_DATA);
        let mut buf = BytesMut::with_capacity(4 + 1 + data.len() + 1);
        buf.put_slice(header.as_bytes());
        if !data.is_empty() {
            buf.put_u8(data.len() as u8);
            buf.put_slice(data);
        }
        buf.put_u8(0x00);
        buf.freeze()
    }

    /// Extended length encoding, asking for up to 65536 response bytes.
    pub fn encode_extended(header: ApduHeader, data: &[u8]) -> Bytes {
        debug_assert!(data.len() <= EXTENDED_APDU_MAX_DATA);
        let mut buf = BytesMut::with_capacity(4 + 3 + data.len() + 2);
        buf.put_slice(header.as_bytes());
        buf.put_u8(0x00);
        if !data.is_empty() {
            buf.put_u16(data.len() as u16);
            buf.put_slice(data);
        }
        buf.put_u16(0x0000);
        buf.freeze()
    }

    /// Encodes this command as one or more wire APDUs. Bodies too large for a short
    /// APDU use extended length when allowed, command chaining otherwise.
    pub fn encode(&self, extended_length: bool) -> Vec<Bytes> {
        if self.data.len() <= SHORT_APDU_MAX_DATA {
            return vec![Apdu::encode_short(self.header, &self.data)];
        }
        if extended_length && self.data.len() <= EXTENDED_APDU_MAX_DATA {
            return vec![Apdu::encode_extended(self.header, &self.data)];
        }
        let chunks: Vec<&[u8]> = self.data.chunks(SHORT_APDU_MAX_DATA).collect();
        let last = chunks.len() - 1;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let mut header = self.header;
                if i != last {
                    header.cla |= CLA_CHAINING;
                }
                Apdu::encode_short(header, chunk)
            })
            .collect()
    }
}

/// Splits a response APDU into its body and status word.
pub fn split_status(response: &[u8]) -> Option<(&[u8], u16)> {
    if response.len() < 2 {
        return None;
    }
    let (data, sw) = response.split_at(response.len() - 2);
    Some((data, u16::from_be_bytes([sw[0], sw[1]])))
}
