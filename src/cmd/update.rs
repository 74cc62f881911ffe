//! Update / UpdateAck packet construction.
//!
//! Update packets share the same 16-byte payload shape as Info/InfoAck but key their
//! sub-command byte from a distinct namespace: `0x01` to push [`Settings`], `0x07` to
//! push [`ExtendedSettings`] (room temperature).

use crate::error::MediatorError;
use crate::packet::{Packet, PacketType};
use crate::settings::{ExtendedSettings, Settings};

const SET_SETTINGS: u8 = 0x01;
const SET_EXTENDED_SETTINGS: u8 = 0x07;

/// Builds an Update packet pushing `settings` to the HVAC unit.
pub fn update_settings(settings: &Settings) -> Result<Packet, MediatorError> {
    Packet::build(PacketType::Update, &settings.encode(SET_SETTINGS))
}

/// Builds an Update packet pushing `extended_settings` (room temperature) to the HVAC
/// unit.
pub fn update_extended_settings(
    extended_settings: &ExtendedSettings,
) -> Result<Packet, MediatorError> {
    Packet::build(PacketType::Update, &extended_settings.encode(SET_EXTENDED_SETTINGS))
}

/// The HVAC unit's reply to any Update packet: always 16 bytes of zero.
pub fn update_ack() -> Result<Packet, MediatorError> {
    Packet::build(PacketType::UpdateAck, &[0u8; 16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{HalfDegree, Power};

    #[test]
    fn update_settings_carries_set_settings_sub_command() {
        let settings = Settings {
            power: Some(Power::On),
            ..Settings::default()
        };
        let packet = update_settings(&settings).unwrap();
        assert_eq!(PacketType::Update, packet.r#type());
        assert_eq!(SET_SETTINGS, packet.data()[0]);
    }

    #[test]
    fn update_extended_settings_carries_room_temp_sub_command() {
        let ext = ExtendedSettings {
            room_temp: Some(HalfDegree::from_whole(22)),
        };
        let packet = update_extended_settings(&ext).unwrap();
        assert_eq!(SET_EXTENDED_SETTINGS, packet.data()[0]);
    }

    #[test]
    fn update_ack_is_sixteen_zero_bytes() {
        let packet = update_ack().unwrap();
        assert_eq!([0u8; 16], packet.data());
    }
}
