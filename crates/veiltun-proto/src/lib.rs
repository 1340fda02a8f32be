//! Tunnel handshake parsing and serialization.
//!
//! The handshake rides at the front of the first binary frame of an inbound
//! connection:
//!
//! ```text
//! +---------+------------------+----------+-----------+---------+--------+--------+---------+
//! | version |    client id     | addonLen |  addons   | command |  port  |  atyp  | address |
//! +---------+------------------+----------+-----------+---------+--------+--------+---------+
//! |    1    |        16        |    1     | addonLen  |    1    | 2 (BE) |    1   |   var   |
//! +---------+------------------+----------+-----------+---------+--------+--------+---------+
//! ```
//!
//! The addon region is skipped, not interpreted. Everything after the address
//! in the same frame is tunnel payload and must reach the upstream socket
//! untouched; `ConnectionRequest::payload_offset` marks where it starts.

use std::fmt;

use thiserror::Error;

/// Minimum number of bytes a viable handshake frame can have.
pub const MIN_HANDSHAKE_LEN: usize = 24;
/// Length of the client identifier field.
pub const CLIENT_ID_LEN: usize = 16;
/// Offset of the addon-region length byte.
pub const ADDON_LEN_OFFSET: usize = 17;

/// Stream command, the only traffic class this protocol carries.
pub const CMD_STREAM: u8 = 0x01;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x02;
pub const ATYP_IPV6: u8 = 0x03;

/// Maximum domain name length (single length-prefix byte).
pub const MAX_DOMAIN_LEN: usize = 255;

/// Length of the acknowledgment frame.
pub const ACK_LEN: usize = 2;

/// Decode failure. Every variant is terminal for the session that owns the
/// frame; nothing is retried and no error is signalled back on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame ends before the handshake does.
    #[error("handshake header too short")]
    HeaderTooShort,
    /// The command byte names a traffic class this server does not carry.
    #[error("unsupported command {0:#04x}")]
    UnsupportedCommand(u8),
    /// The address-type tag is outside the known set.
    #[error("unknown address type {0:#04x}")]
    UnknownAddressType(u8),
}

/// Errors from the encode side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Domain name exceeds the single length-prefix byte.
    #[error("domain name too long")]
    DomainTooLong,
    /// Addon region exceeds the single length byte.
    #[error("addon region too long")]
    AddonTooLong,
}

/// Decoded destination address. Exactly one variant per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSpec {
    Ipv4([u8; 4]),
    Domain(String),
    Ipv6([u16; 8]),
}

impl fmt::Display for AddressSpec {
    /// Renders the connect form: dotted decimal, the domain text, or eight
    /// colon-separated lowercase hex groups without zero compression.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressSpec::Ipv4(o) => write!(f, "{}.{}.{}.{}", o[0], o[1], o[2], o[3]),
            AddressSpec::Domain(name) => f.write_str(name),
            AddressSpec::Ipv6(groups) => {
                for (i, group) in groups.iter().enumerate() {
                    if i > 0 {
                        f.write_str(":")?;
                    }
                    write!(f, "{group:x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Parsed handshake, created once per session from the first inbound frame
/// and consumed by the upstream connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    /// Protocol version byte, opaque, echoed verbatim in the ack frame.
    pub version: u8,
    /// Client identifier from the handshake head. Carried for logging only;
    /// nothing rejects a connection based on it.
    pub client_id: [u8; CLIENT_ID_LEN],
    pub address: AddressSpec,
    pub port: u16,
    /// Index of the first tunnel payload byte within the same frame.
    pub payload_offset: usize,
}

/// Decode the handshake at the start of `buf`.
///
/// Pure function: no I/O, no state, no partial results. A truncated header
/// is reported as [`DecodeError::HeaderTooShort`] wherever the truncation
/// falls.
pub fn decode(buf: &[u8]) -> Result<ConnectionRequest, DecodeError> {
    if buf.len() < MIN_HANDSHAKE_LEN {
        return Err(DecodeError::HeaderTooShort);
    }

    let version = buf[0];
    let mut client_id = [0u8; CLIENT_ID_LEN];
    client_id.copy_from_slice(&buf[1..1 + CLIENT_ID_LEN]);

    let addon_len = buf[ADDON_LEN_OFFSET] as usize;
    let cmd_idx = ADDON_LEN_OFFSET + 1 + addon_len;

    let command = *buf.get(cmd_idx).ok_or(DecodeError::HeaderTooShort)?;
    if command != CMD_STREAM {
        // Nothing past the command byte is parsed for a rejected class.
        return Err(DecodeError::UnsupportedCommand(command));
    }

    let port = read_u16(buf, cmd_idx + 1)?;
    let atyp_idx = cmd_idx + 3;
    let atyp = *buf.get(atyp_idx).ok_or(DecodeError::HeaderTooShort)?;
    let addr_idx = atyp_idx + 1;

    let (address, addr_len) = match atyp {
        ATYP_IPV4 => {
            let raw = get_slice(buf, addr_idx, 4)?;
            (AddressSpec::Ipv4([raw[0], raw[1], raw[2], raw[3]]), 4)
        }
        ATYP_DOMAIN => {
            let name_len = *buf.get(addr_idx).ok_or(DecodeError::HeaderTooShort)? as usize;
            let raw = get_slice(buf, addr_idx + 1, name_len)?;
            // Lossy on purpose: a garbage name fails at resolution, not here.
            let name = String::from_utf8_lossy(raw).into_owned();
            (AddressSpec::Domain(name), 1 + name_len)
        }
        ATYP_IPV6 => {
            let raw = get_slice(buf, addr_idx, 16)?;
            let mut groups = [0u16; 8];
            for (i, chunk) in raw.chunks_exact(2).enumerate() {
                groups[i] = u16::from_be_bytes([chunk[0], chunk[1]]);
            }
            (AddressSpec::Ipv6(groups), 16)
        }
        other => return Err(DecodeError::UnknownAddressType(other)),
    };

    Ok(ConnectionRequest {
        version,
        client_id,
        address,
        port,
        payload_offset: addr_idx + addr_len,
    })
}

/// Build the two-byte acknowledgment frame for a decoded version byte.
///
/// Byte 0 echoes the version; byte 1 is a reserved extension flag, always
/// zero. Sent once the upstream connection is established and before any
/// relayed payload.
#[inline]
pub fn encode_ack(version: u8) -> [u8; ACK_LEN] {
    [version, 0x00]
}

/// Encode a handshake frame (the client side of the protocol). Used by
/// tests and by anything speaking the protocol outbound.
pub fn encode_request(
    version: u8,
    client_id: &[u8; CLIENT_ID_LEN],
    addons: &[u8],
    address: &AddressSpec,
    port: u16,
    payload: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    if addons.len() > u8::MAX as usize {
        return Err(EncodeError::AddonTooLong);
    }
    if let AddressSpec::Domain(name) = address {
        if name.len() > MAX_DOMAIN_LEN {
            return Err(EncodeError::DomainTooLong);
        }
    }

    let mut buf = Vec::with_capacity(MIN_HANDSHAKE_LEN + addons.len() + payload.len() + 16);
    buf.push(version);
    buf.extend_from_slice(client_id);
    buf.push(addons.len() as u8);
    buf.extend_from_slice(addons);
    buf.push(CMD_STREAM);
    buf.extend_from_slice(&port.to_be_bytes());
    match address {
        AddressSpec::Ipv4(octets) => {
            buf.push(ATYP_IPV4);
            buf.extend_from_slice(octets);
        }
        AddressSpec::Domain(name) => {
            buf.push(ATYP_DOMAIN);
            buf.push(name.len() as u8);
            buf.extend_from_slice(name.as_bytes());
        }
        AddressSpec::Ipv6(groups) => {
            buf.push(ATYP_IPV6);
            for group in groups {
                buf.extend_from_slice(&group.to_be_bytes());
            }
        }
    }
    buf.extend_from_slice(payload);
    Ok(buf)
}

#[inline]
fn read_u16(buf: &[u8], idx: usize) -> Result<u16, DecodeError> {
    let raw = get_slice(buf, idx, 2)?;
    Ok(u16::from_be_bytes([raw[0], raw[1]]))
}

#[inline]
fn get_slice(buf: &[u8], idx: usize, len: usize) -> Result<&[u8], DecodeError> {
    let end = idx.checked_add(len).ok_or(DecodeError::HeaderTooShort)?;
    buf.get(idx..end).ok_or(DecodeError::HeaderTooShort)
}
