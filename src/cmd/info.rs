//! Info / InfoAck packet construction.

use crate::error::MediatorError;
use crate::packet::{InfoType, Packet, PacketType};
use crate::settings::{ExtendedSettings, Settings};

/// Builds an Info request asking the HVAC unit (or, when answering locally, the cached
/// state) for the given sub-table.
pub fn info_request(info_type: InfoType) -> Result<Packet, MediatorError> {
    let mut data = [0u8; 16];
    data[0] = info_type.as_byte();
    Packet::build(PacketType::Info, &data)
}

/// Builds an InfoAck reply carrying the current [`Settings`].
pub fn info_ack_settings(settings: &Settings) -> Result<Packet, MediatorError> {
    Packet::build(PacketType::InfoAck, &settings.encode(InfoType::Settings.as_byte()))
}

/// Builds an InfoAck reply carrying the current [`ExtendedSettings`].
pub fn info_ack_extended_settings(
    extended_settings: &ExtendedSettings,
) -> Result<Packet, MediatorError> {
    Packet::build(
        PacketType::InfoAck,
        &extended_settings.encode(InfoType::ExtendedSettings.as_byte()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_request_carries_sub_command() {
        let packet = info_request(InfoType::Settings).unwrap();
        assert_eq!(InfoType::Settings.as_byte(), packet.data()[0]);
    }

    #[test]
    fn info_ack_settings_round_trips_through_decode() {
        let settings = Settings::default();
        let packet = info_ack_settings(&settings).unwrap();
        assert_eq!(PacketType::InfoAck, packet.r#type());
        let payload: [u8; 16] = packet.data().try_into().unwrap();
        assert_eq!(settings, Settings::decode(&payload));
    }
}
