//! # HVAC settings model
//!
//! Pure encode/decode/merge logic over the 16-byte Update/InfoAck payloads. Nothing in
//! this module touches a UART or a clock, which is what makes it host-testable even
//! though the rest of the crate is `no_std` firmware code.
//!
//! ## Presence bitfields
//!
//! Byte 1 of the payload: Power=bit0, Mode=bit1, TargetTemp=bit2, Fan=bit3, Vane=bit4,
//! Direction=bit7. Byte 2 of the payload: WideVane=bit0. A field is only written to (on
//! decode) or read from (on merge) the cache if its presence bit is set.

/// Size of an Update/InfoAck settings payload.
pub const PAYLOAD_LEN: usize = 16;

/// A half-degree-resolution temperature, stored as the number of half-degree steps.
///
/// Backs both [`Settings::target_temp`] (16.0..31.0 C) and
/// [`ExtendedSettings::room_temp`] (10.0..41.0 C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HalfDegree(i16);

impl HalfDegree {
    /// Constructs from a whole-degree value with no fractional half-degree.
    pub const fn from_whole(degrees: i16) -> Self {
        HalfDegree(degrees * 2)
    }

    /// Constructs from a whole-degree value plus an extra half-degree.
    pub const fn from_whole_and_half(degrees: i16) -> Self {
        HalfDegree(degrees * 2 + 1)
    }

    pub const fn whole_degree(self) -> i16 {
        self.0 / 2
    }

    pub const fn is_half_degree(self) -> bool {
        self.0 % 2 != 0
    }

    pub fn clamp(self, min: HalfDegree, max: HalfDegree) -> HalfDegree {
        if self < min {
            min
        } else if self > max {
            max
        } else {
            self
        }
    }

    /// Modern single-byte encoding: `(whole_degree * 2 + half_flag)`, i.e. the raw count
    /// of half-degree steps, clamped to a byte. `0x00` is reserved to mean "not present"
    /// by callers, so this is never emitted for a temperature of exactly 0.0 C (outside
    /// the valid ranges used by this crate anyway).
    pub fn encoded_temp(self) -> u8 {
        self.0 as u8
    }

    /// Inverse of [`HalfDegree::encoded_temp`].
    pub fn parse_encoded(byte: u8) -> HalfDegree {
        HalfDegree(byte as i16)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Power {
    Off,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Heat,
    Dry,
    Cool,
    Fan,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fan {
    Auto,
    Quiet,
    P1,
    P2,
    P3,
    P4,
    P5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Vane {
    Auto,
    P1,
    P2,
    P3,
    P4,
    P5,
    Swing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WideVane {
    FarLeft,
    Left,
    Center,
    Right,
    FarRight,
    LeftAndRight,
    Swing,
}

macro_rules! byte_enum {
    ($ty:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        impl $ty {
            fn as_byte(self) -> u8 {
                match self {
                    $(Self::$variant => $value,)+
                }
            }

            fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

byte_enum!(Power { Off = 0x00, On = 0x01 });
byte_enum!(Mode {
    Heat = 0x01,
    Dry = 0x02,
    Cool = 0x03,
    Fan = 0x07,
    Auto = 0x08,
});
byte_enum!(Fan {
    Auto = 0x00,
    Quiet = 0x01,
    P1 = 0x02,
    P2 = 0x03,
    P3 = 0x04,
    P4 = 0x05,
    P5 = 0x06,
});
byte_enum!(Vane {
    Auto = 0x00,
    P1 = 0x01,
    P2 = 0x02,
    P3 = 0x03,
    P4 = 0x04,
    P5 = 0x05,
    Swing = 0x07,
});
byte_enum!(WideVane {
    FarLeft = 0x01,
    Left = 0x02,
    Center = 0x03,
    Right = 0x04,
    FarRight = 0x05,
    LeftAndRight = 0x08,
    Swing = 0x0C,
});

mod presence {
    pub const POWER: u8 = 0x01;
    pub const MODE: u8 = 0x02;
    pub const TARGET_TEMP: u8 = 0x04;
    pub const FAN: u8 = 0x08;
    pub const VANE: u8 = 0x10;
    pub const DIRECTION: u8 = 0x80;
    pub const WIDE_VANE: u8 = 0x01;
}

/// Byte offsets within a 16-byte settings payload.
mod offset {
    pub const SUB_COMMAND: usize = 0;
    pub const PRESENCE_LO: usize = 1;
    pub const PRESENCE_HI: usize = 2;
    pub const POWER: usize = 3;
    pub const MODE: usize = 4;
    pub const TARGET_TEMP_LEGACY: usize = 5;
    pub const FAN: usize = 6;
    pub const VANE: usize = 7;
    pub const WIDE_VANE: usize = 10;
    pub const TARGET_TEMP_MODERN: usize = 11;
}

const MAX_TARGET_TEMP: HalfDegree = HalfDegree::from_whole(31);
const MIN_TARGET_TEMP: HalfDegree = HalfDegree::from_whole(16);

/// The standard HVAC settings table: power, mode, target temperature, fan, vane, wide
/// vane. Each field is optional, matching the wire payload's per-field presence bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Settings {
    pub power: Option<Power>,
    pub mode: Option<Mode>,
    pub target_temp: Option<HalfDegree>,
    pub fan: Option<Fan>,
    pub vane: Option<Vane>,
    pub wide_vane: Option<WideVane>,
}

impl Default for Settings {
    /// The cache's power-on defaults, per the controller's construction-time record.
    fn default() -> Self {
        Settings {
            power: Some(Power::Off),
            mode: Some(Mode::Auto),
            target_temp: Some(HalfDegree::from_whole(20)),
            fan: Some(Fan::Auto),
            vane: Some(Vane::Auto),
            wide_vane: Some(WideVane::Center),
        }
    }
}

impl Settings {
    /// Decodes a settings payload, honoring only the fields flagged present by the
    /// bitfields in bytes 1 and 2.
    pub fn decode(payload: &[u8; PAYLOAD_LEN]) -> Settings {
        let presence_lo = payload[offset::PRESENCE_LO];
        let presence_hi = payload[offset::PRESENCE_HI];

        Settings {
            power: (presence_lo & presence::POWER != 0)
                .then(|| Power::from_byte(payload[offset::POWER]))
                .flatten(),
            mode: (presence_lo & presence::MODE != 0)
                .then(|| Mode::from_byte(payload[offset::MODE]))
                .flatten(),
            target_temp: (presence_lo & presence::TARGET_TEMP != 0)
                .then(|| decode_target_temp(payload)),
            fan: (presence_lo & presence::FAN != 0)
                .then(|| Fan::from_byte(payload[offset::FAN]))
                .flatten(),
            vane: (presence_lo & presence::VANE != 0)
                .then(|| Vane::from_byte(payload[offset::VANE]))
                .flatten(),
            wide_vane: (presence_hi & presence::WIDE_VANE != 0)
                .then(|| WideVane::from_byte(payload[offset::WIDE_VANE]))
                .flatten(),
        }
    }

    /// Encodes only the present fields, setting the matching presence bits. Fields left
    /// as `None` leave their payload bytes at zero and their presence bit unset.
    pub fn encode(&self, sub_command: u8) -> [u8; PAYLOAD_LEN] {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[offset::SUB_COMMAND] = sub_command;

        if let Some(power) = self.power {
            payload[offset::PRESENCE_LO] |= presence::POWER;
            payload[offset::POWER] = power.as_byte();
        }
        if let Some(mode) = self.mode {
            payload[offset::PRESENCE_LO] |= presence::MODE;
            payload[offset::MODE] = mode.as_byte();
        }
        if let Some(target_temp) = self.target_temp {
            payload[offset::PRESENCE_LO] |= presence::TARGET_TEMP;
            encode_target_temp(&mut payload, target_temp.clamp(MIN_TARGET_TEMP, MAX_TARGET_TEMP));
        }
        if let Some(fan) = self.fan {
            payload[offset::PRESENCE_LO] |= presence::FAN;
            payload[offset::FAN] = fan.as_byte();
        }
        if let Some(vane) = self.vane {
            payload[offset::PRESENCE_LO] |= presence::VANE;
            payload[offset::VANE] = vane.as_byte();
        }
        if let Some(wide_vane) = self.wide_vane {
            payload[offset::PRESENCE_LO] |= presence::DIRECTION;
            payload[offset::PRESENCE_HI] |= presence::WIDE_VANE;
            payload[offset::WIDE_VANE] = wide_vane.as_byte();
        }

        payload
    }

    /// Merges `update` into `self`: fields present in `update` overwrite, others are
    /// retained. This is the single mutation rule for the settings cache.
    pub fn merge(&self, update: &Settings) -> Settings {
        Settings {
            power: update.power.or(self.power),
            mode: update.mode.or(self.mode),
            target_temp: update.target_temp.or(self.target_temp),
            fan: update.fan.or(self.fan),
            vane: update.vane.or(self.vane),
            wide_vane: update.wide_vane.or(self.wide_vane),
        }
    }
}

fn decode_target_temp(payload: &[u8; PAYLOAD_LEN]) -> HalfDegree {
    let modern = payload[offset::TARGET_TEMP_MODERN];
    if modern != 0 {
        HalfDegree::parse_encoded(modern)
    } else {
        HalfDegree::from_whole(MAX_TARGET_TEMP.whole_degree() - payload[offset::TARGET_TEMP_LEGACY] as i16)
    }
}

fn encode_target_temp(payload: &mut [u8; PAYLOAD_LEN], clamped: HalfDegree) {
    payload[offset::TARGET_TEMP_LEGACY] =
        (MAX_TARGET_TEMP.whole_degree() - clamped.whole_degree()) as u8;
    payload[offset::TARGET_TEMP_MODERN] = if clamped.is_half_degree() {
        clamped.encoded_temp()
    } else {
        0x00
    };
}

const MAX_ROOM_TEMP: HalfDegree = HalfDegree::from_whole(41);
const MIN_ROOM_TEMP: HalfDegree = HalfDegree::from_whole(10);

mod ext_offset {
    pub const SUB_COMMAND: usize = 0;
    pub const PRESENCE: usize = 1;
    pub const ROOM_TEMP_LEGACY: usize = 3;
    pub const ROOM_TEMP_MODERN: usize = 6;
}

mod ext_presence {
    pub const ROOM_TEMP: u8 = 0x01;
}

/// The extended settings table. Currently just room temperature, mirroring
/// [`Settings::target_temp`]'s dual wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExtendedSettings {
    pub room_temp: Option<HalfDegree>,
}

impl Default for ExtendedSettings {
    fn default() -> Self {
        ExtendedSettings {
            room_temp: Some(HalfDegree::from_whole(20)),
        }
    }
}

impl ExtendedSettings {
    pub fn decode(payload: &[u8; PAYLOAD_LEN]) -> ExtendedSettings {
        let present = payload[ext_offset::PRESENCE] & ext_presence::ROOM_TEMP != 0;
        ExtendedSettings {
            room_temp: present.then(|| decode_room_temp(payload)),
        }
    }

    pub fn encode(&self, sub_command: u8) -> [u8; PAYLOAD_LEN] {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[ext_offset::SUB_COMMAND] = sub_command;
        if let Some(room_temp) = self.room_temp {
            payload[ext_offset::PRESENCE] |= ext_presence::ROOM_TEMP;
            // RoomTemp is stored as reported; no clamping on decode, but encode (driven
            // by this crate pushing a value out) clamps to the documented wire range.
            let clamped = room_temp.clamp(MIN_ROOM_TEMP, MAX_ROOM_TEMP);
            payload[ext_offset::ROOM_TEMP_LEGACY] = (clamped.whole_degree() - MIN_ROOM_TEMP.whole_degree()) as u8;
            payload[ext_offset::ROOM_TEMP_MODERN] = clamped.encoded_temp();
        }
        payload
    }

    pub fn merge(&self, update: &ExtendedSettings) -> ExtendedSettings {
        ExtendedSettings {
            room_temp: update.room_temp.or(self.room_temp),
        }
    }
}

fn decode_room_temp(payload: &[u8; PAYLOAD_LEN]) -> HalfDegree {
    let modern = payload[ext_offset::ROOM_TEMP_MODERN];
    if modern != 0 {
        HalfDegree::parse_encoded(modern)
    } else {
        HalfDegree::from_whole(MIN_ROOM_TEMP.whole_degree() + payload[ext_offset::ROOM_TEMP_LEGACY] as i16)
    }
}
