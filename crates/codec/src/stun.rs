//! STUN Binding request/response, RFC8489 subset.
//!
//! Only the fields the handshake engine's STUN phase needs are implemented:
//! a bare Binding request (no attributes) and a Binding response carrying a
//! single XOR-MAPPED-ADDRESS attribute.

use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::{BufMut, BytesMut};

use crate::Error;

pub const MAGIC_COOKIE: u32 = 0x2112_A442;

const BINDING_REQUEST: u16 = 0x0001;
const BINDING_RESPONSE: u16 = 0x0101;
const XOR_MAPPED_ADDRESS: u16 = 0x0020;
const FAMILY_IPV4: u8 = 0x01;

/// Header size shared by every STUN message: type, length, cookie, transaction id.
const HEADER_SIZE: usize = 20;

/// Encode a Binding request carrying no attributes.
///
/// # Test
///
/// ```
/// use hifi_bridge_codec::stun::encode_binding_request;
///
/// let token = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
/// let bytes = encode_binding_request(&token);
///
/// assert_eq!(bytes.len(), 20);
/// assert_eq!(&bytes[0..2], &[0x00, 0x01]);
/// assert_eq!(&bytes[2..4], &[0x00, 0x00]);
/// assert_eq!(&bytes[4..8], &[0x21, 0x12, 0xa4, 0x42]);
/// assert_eq!(&bytes[8..20], &token);
/// ```
pub fn encode_binding_request(transaction_id: &[u8; 12]) -> BytesMut {
    let mut bytes = BytesMut::with_capacity(HEADER_SIZE);
    bytes.put_u16(BINDING_REQUEST);
    bytes.put_u16(0);
    bytes.put_u32(MAGIC_COOKIE);
    bytes.put_slice(transaction_id);
    bytes
}

/// A decoded Binding response. `xor_mapped_address` is `None` when the
/// response carried no XOR-MAPPED-ADDRESS attribute, in which case the
/// handshake engine treats the datagram as opaque rather than advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingResponse {
    pub transaction_id: [u8; 12],
    pub xor_mapped_address: Option<SocketAddrV4>,
}

/// Decode a Binding response, walking attributes from offset 20 and
/// extracting XOR-MAPPED-ADDRESS if present. Unknown attributes are skipped
/// using their own length field.
///
/// # Test
///
/// ```
/// use hifi_bridge_codec::stun::decode_binding_response;
///
/// let buffer = [
///     0x01, 0x01, 0x00, 0x0c, 0x21, 0x12, 0xa4, 0x42,
///     0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c,
///     0x00, 0x20, 0x00, 0x08,
///     0x00, 0x01, 0x8e, 0xdb, 0xea, 0x12, 0xd5, 0x4b,
/// ];
///
/// let response = decode_binding_response(&buffer).unwrap();
/// let addr = response.xor_mapped_address.unwrap();
///
/// assert_eq!(addr.port(), 45001);
/// assert_eq!(addr.ip().octets(), [203, 0, 113, 9]);
/// ```
pub fn decode_binding_response(bytes: &[u8]) -> Result<BindingResponse, Error> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::UnexpectedEof);
    }

    let message_type = u16::from_be_bytes(bytes[0..2].try_into()?);
    if message_type != BINDING_RESPONSE {
        return Err(Error::InvalidInput);
    }

    let length = u16::from_be_bytes(bytes[2..4].try_into()?) as usize;
    if bytes.len() < HEADER_SIZE + length {
        return Err(Error::UnexpectedEof);
    }

    let cookie = u32::from_be_bytes(bytes[4..8].try_into()?);
    if cookie != MAGIC_COOKIE {
        return Err(Error::MagicCookieMismatch);
    }

    let mut transaction_id = [0u8; 12];
    transaction_id.copy_from_slice(&bytes[8..20]);

    let mut xor_mapped_address = None;
    let mut offset = HEADER_SIZE;
    let end = HEADER_SIZE + length;

    while offset + 4 <= end {
        let attr_type = u16::from_be_bytes(bytes[offset..offset + 2].try_into()?);
        let attr_len = u16::from_be_bytes(bytes[offset + 2..offset + 4].try_into()?) as usize;
        let value_start = offset + 4;
        let value_end = value_start + attr_len;

        if value_end > end {
            break;
        }

        if attr_type == XOR_MAPPED_ADDRESS && attr_len >= 8 {
            let family = bytes[value_start + 1];

            if family == FAMILY_IPV4 {
                let port_xor = u16::from_be_bytes(bytes[value_start + 2..value_start + 4].try_into()?);
                let addr_xor = u32::from_be_bytes(bytes[value_start + 4..value_start + 8].try_into()?);

                let port = port_xor ^ ((cookie >> 16) as u16);
                let addr = addr_xor ^ cookie;

                xor_mapped_address = Some(SocketAddrV4::new(Ipv4Addr::from(addr), port));
            }
        }

        offset = value_end;
    }

    Ok(BindingResponse {
        transaction_id,
        xor_mapped_address,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_buffer() {
        assert!(matches!(decode_binding_response(&[0u8; 4]), Err(Error::UnexpectedEof)));
    }

    #[test]
    fn rejects_bad_cookie() {
        let mut buffer = [0u8; 20];
        buffer[0] = 0x01;
        buffer[1] = 0x01;
        assert!(matches!(
            decode_binding_response(&buffer),
            Err(Error::MagicCookieMismatch)
        ));
    }

    #[test]
    fn missing_attribute_yields_none() {
        let mut buffer = [0u8; 20];
        buffer[0] = 0x01;
        buffer[1] = 0x01;
        buffer[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());

        let response = decode_binding_response(&buffer).unwrap();
        assert!(response.xor_mapped_address.is_none());
    }

    #[test]
    fn skips_unknown_attribute_before_xor_mapped_address() {
        let mut bytes = BytesMut::new();
        bytes.put_u16(BINDING_RESPONSE);
        bytes.put_u16(0); // patched below
        bytes.put_u32(MAGIC_COOKIE);
        bytes.put_slice(&[0u8; 12]);

        // unknown attribute, 4 bytes of padding-free value
        bytes.put_u16(0x8022);
        bytes.put_u16(4);
        bytes.put_slice(b"node");

        bytes.put_u16(XOR_MAPPED_ADDRESS);
        bytes.put_u16(8);
        bytes.put_u8(0);
        bytes.put_u8(FAMILY_IPV4);
        bytes.put_u16(0x8e_db);
        bytes.put_u32(0xea12d54b);

        let total_len = (bytes.len() - HEADER_SIZE) as u16;
        bytes[2..4].copy_from_slice(&total_len.to_be_bytes());

        let response = decode_binding_response(&bytes).unwrap();
        let addr = response.xor_mapped_address.unwrap();
        assert_eq!(addr.port(), 45001);
    }
}
