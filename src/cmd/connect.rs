//! Connect / ConnectAck / ExtendedConnectAck packet construction.

use crate::error::MediatorError;
use crate::packet::{Packet, PacketType};

/// The handshake packet the mediator sends to the HVAC unit to open the session.
///
/// The payload `[0xCA, 0x01]` is a fixed, observed-constant handshake value; it carries
/// no settings data.
pub fn connect() -> Result<Packet, MediatorError> {
    Packet::build(PacketType::Connect, &[0xCA, 0x01])
}

/// The reply the mediator sends when acting as the HVAC unit's stand-in for a connecting
/// thermostat (passthru-off path).
pub fn connect_ack() -> Result<Packet, MediatorError> {
    Packet::build(PacketType::ConnectAck, &[0x00])
}

/// Reply to an ExtendedConnect request. `echo_byte` is byte 0 of the request payload,
/// copied back verbatim; the rest of the payload is a fixed, observed-constant value
/// whose fields are otherwise unidentified.
pub fn extended_connect_ack(echo_byte: u8) -> Result<Packet, MediatorError> {
    let mut data = [
        0x00, 0x03, 0x00, 0x20, 0x00, 0x14, 0x07, 0x75, 0x0c, 0x05, 0xa0, 0xbe, 0x94, 0xbe, 0xa0,
        0xbe,
    ];
    data[0] = echo_byte;
    Packet::build(PacketType::ExtendedConnectAck, &data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_matches_known_wire_bytes() {
        let packet = connect().unwrap();
        assert_eq!(&[0xFC, 0x5A, 0x01, 0x30, 0x02, 0xCA, 0x01, 0xA8], packet.raw_bytes());
    }

    #[test]
    fn connect_ack_matches_known_wire_bytes() {
        let packet = connect_ack().unwrap();
        assert_eq!(&[0xFC, 0x7A, 0x01, 0x30, 0x01, 0x00, 0x54], packet.raw_bytes());
    }

    #[test]
    fn extended_connect_ack_echoes_request_byte() {
        let packet = extended_connect_ack(0xC9).unwrap();
        assert_eq!(0xC9, packet.data()[0]);
        assert_eq!(PacketType::ExtendedConnectAck, packet.r#type());
        assert!(packet.is_checksum_valid());
    }
}
