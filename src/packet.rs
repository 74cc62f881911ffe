//! # CN105 packet framing
//!
//! This module provides the wire-level representation of one CN105 frame: framing,
//! byte-by-byte accumulation, checksum, and typed field access. It holds no knowledge of
//! what a Connect or Update packet *means* — see [`crate::cmd`] for packet construction
//! helpers and [`crate::settings`] for payload decoding.
//!
//! ## Wire format
//!
//! ```text
//! | 0xFC | type | 0x01 | 0x30 | data_len | ...data... | checksum |
//!    0      1      2      3       4        5..5+L-1    5+L
//! ```
//!
//! `checksum = (0xFC - sum(bytes[0..packet_size-1])) & 0xFF`.

use crate::error::MediatorError;

/// Start-of-frame marker. Any packet not beginning with this byte is junk.
pub const START_MARKER: u8 = 0xFC;

/// The two constant bytes following the type byte. Unknown purpose, observed-constant.
pub const PROTOCOL_TAG: [u8; 2] = [0x01, 0x30];

/// Number of bytes before the data payload: start, type, the two tag bytes, and length.
pub const HEADER_LEN: usize = 5;

/// Checksum trailer length.
pub const CHECKSUM_LEN: usize = 1;

/// Practical maximum total packet size (start..checksum inclusive).
pub const MAX_PACKET_LEN: usize = 30;

/// One CN105 frame, accumulated byte-by-byte as it arrives off the wire.
///
/// `Packet` owns a fixed-size byte array; there is no heap allocation. A packet is
/// constructed empty via [`Packet::new`], grown with [`Packet::append_byte`], and
/// recycled with [`Packet::reset`] once consumed.
#[derive(Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Packet {
    bytes: [u8; MAX_PACKET_LEN],
    bytes_read: usize,
    /// Set once if the very first byte accepted was not [`START_MARKER`].
    is_junk: bool,
}

/// One CN105 packet type byte. ACKs are always `request ^ 0x20`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketType {
    Connect,
    ConnectAck,
    ExtendedConnect,
    ExtendedConnectAck,
    Update,
    UpdateAck,
    Info,
    InfoAck,
    /// Any byte value not recognized above. Carried so a junk/garbled type byte doesn't
    /// prevent the rest of the framing state machine from operating.
    Unknown(u8),
}

impl PacketType {
    const CONNECT: u8 = 0x5A;
    const CONNECT_ACK: u8 = 0x7A;
    const EXTENDED_CONNECT: u8 = 0x5B;
    const EXTENDED_CONNECT_ACK: u8 = 0x7B;
    const UPDATE: u8 = 0x41;
    const UPDATE_ACK: u8 = 0x61;
    const INFO: u8 = 0x42;
    const INFO_ACK: u8 = 0x62;

    pub fn as_byte(self) -> u8 {
        match self {
            PacketType::Connect => Self::CONNECT,
            PacketType::ConnectAck => Self::CONNECT_ACK,
            PacketType::ExtendedConnect => Self::EXTENDED_CONNECT,
            PacketType::ExtendedConnectAck => Self::EXTENDED_CONNECT_ACK,
            PacketType::Update => Self::UPDATE,
            PacketType::UpdateAck => Self::UPDATE_ACK,
            PacketType::Info => Self::INFO,
            PacketType::InfoAck => Self::INFO_ACK,
            PacketType::Unknown(b) => b,
        }
    }
}

impl From<u8> for PacketType {
    fn from(value: u8) -> Self {
        match value {
            Self::CONNECT => PacketType::Connect,
            Self::CONNECT_ACK => PacketType::ConnectAck,
            Self::EXTENDED_CONNECT => PacketType::ExtendedConnect,
            Self::EXTENDED_CONNECT_ACK => PacketType::ExtendedConnectAck,
            Self::UPDATE => PacketType::Update,
            Self::UPDATE_ACK => PacketType::UpdateAck,
            Self::INFO => PacketType::Info,
            Self::INFO_ACK => PacketType::InfoAck,
            other => PacketType::Unknown(other),
        }
    }
}

/// Sub-command byte carried as `data[0]` of Update/Info/InfoAck payloads, identifying
/// which logical table the packet addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InfoType {
    Settings,
    ExtendedSettings,
    Timers,
    Status,
    EnterStandby,
    Unknown(u8),
}

impl InfoType {
    const SETTINGS: u8 = 0x02;
    const EXTENDED_SETTINGS: u8 = 0x03;
    const TIMERS: u8 = 0x05;
    const STATUS: u8 = 0x06;
    const ENTER_STANDBY: u8 = 0x09;

    pub fn as_byte(self) -> u8 {
        match self {
            InfoType::Settings => Self::SETTINGS,
            InfoType::ExtendedSettings => Self::EXTENDED_SETTINGS,
            InfoType::Timers => Self::TIMERS,
            InfoType::Status => Self::STATUS,
            InfoType::EnterStandby => Self::ENTER_STANDBY,
            InfoType::Unknown(b) => b,
        }
    }
}

impl From<u8> for InfoType {
    fn from(value: u8) -> Self {
        match value {
            Self::SETTINGS => InfoType::Settings,
            Self::EXTENDED_SETTINGS => InfoType::ExtendedSettings,
            Self::TIMERS => InfoType::Timers,
            Self::STATUS => InfoType::Status,
            Self::ENTER_STANDBY => InfoType::EnterStandby,
            other => InfoType::Unknown(other),
        }
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

impl Packet {
    /// An empty packet, ready to accumulate bytes from the wire.
    pub fn new() -> Self {
        Packet {
            bytes: [0u8; MAX_PACKET_LEN],
            bytes_read: 0,
            is_junk: false,
        }
    }

    /// Builds a complete, well-formed packet from a type and payload, computing the
    /// checksum. Used by [`crate::cmd`] to synthesize outgoing packets.
    pub fn build(r#type: PacketType, data: &[u8]) -> Result<Self, MediatorError> {
        if HEADER_LEN + data.len() + CHECKSUM_LEN > MAX_PACKET_LEN {
            return Err(MediatorError::PayloadTooLarge);
        }
        let mut packet = Self::new();
        packet.bytes[0] = START_MARKER;
        packet.bytes[1] = r#type.as_byte();
        packet.bytes[2] = PROTOCOL_TAG[0];
        packet.bytes[3] = PROTOCOL_TAG[1];
        packet.bytes[4] = data.len() as u8;
        packet.bytes[HEADER_LEN..HEADER_LEN + data.len()].copy_from_slice(data);
        packet.bytes_read = HEADER_LEN + data.len();
        let checksum = Self::calculate_checksum(&packet.bytes[..packet.bytes_read]);
        packet.bytes[packet.bytes_read] = checksum;
        packet.bytes_read += 1;
        Ok(packet)
    }

    /// Resets the packet to its empty state so the same storage can be reused for the
    /// next frame off the wire.
    pub fn reset(&mut self) {
        self.bytes_read = 0;
        self.is_junk = false;
    }

    /// Appends one byte read off the wire. Returns `false` if the packet is already
    /// complete or the backing storage is exhausted (protects against a runaway length
    /// byte on a junk stream).
    pub fn append_byte(&mut self, byte: u8) -> bool {
        if self.is_complete() || self.bytes_read >= self.bytes.len() {
            return false;
        }
        if self.bytes_read == 0 && byte != START_MARKER {
            self.is_junk = true;
        }
        self.bytes[self.bytes_read] = byte;
        self.bytes_read += 1;
        true
    }

    pub fn is_junk(&self) -> bool {
        self.is_junk
    }

    pub fn is_header_complete(&self) -> bool {
        self.bytes_read >= HEADER_LEN
    }

    /// Number of bytes still expected before the packet is complete. While junk, this is
    /// the remaining resync window rather than a header-derived size, since a corrupted
    /// length byte cannot be trusted.
    pub fn next_chunk_size(&self) -> usize {
        if self.is_junk {
            return MAX_PACKET_LEN - self.bytes_read;
        }
        if !self.is_header_complete() {
            return HEADER_LEN - self.bytes_read;
        }
        (HEADER_LEN + self.data_size() + CHECKSUM_LEN).saturating_sub(self.bytes_read)
    }

    /// Valid once [`Packet::is_header_complete`] holds.
    pub fn data_size(&self) -> usize {
        self.bytes[4] as usize
    }

    /// Valid once [`Packet::is_header_complete`] holds.
    pub fn r#type(&self) -> PacketType {
        PacketType::from(self.bytes[1])
    }

    /// Valid once [`Packet::is_header_complete`] holds.
    pub fn packet_size(&self) -> usize {
        HEADER_LEN + self.data_size() + CHECKSUM_LEN
    }

    /// True once no further bytes are expected: for a well-formed packet, once
    /// `packet_size` bytes have been accumulated; for a junk packet, once the resync
    /// window (bounded by [`MAX_PACKET_LEN`]) has been exhausted. Defers to
    /// [`Packet::next_chunk_size`] so the two can never disagree.
    pub fn is_complete(&self) -> bool {
        self.next_chunk_size() == 0
    }

    /// The data payload. Only meaningful once [`Packet::is_header_complete`] holds; bytes
    /// not yet received read back as zero.
    pub fn data(&self) -> &[u8] {
        let end = (HEADER_LEN + self.data_size()).min(self.bytes.len());
        &self.bytes[HEADER_LEN..end]
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.bytes[..self.bytes_read]
    }

    pub fn is_checksum_valid(&self) -> bool {
        if !self.is_complete() {
            return false;
        }
        let checksum_pos = self.packet_size() - 1;
        Self::calculate_checksum(&self.bytes[..checksum_pos]) == self.bytes[checksum_pos]
    }

    fn calculate_checksum(bytes: &[u8]) -> u8 {
        let mut checksum: u8 = START_MARKER;
        for &b in bytes {
            checksum = checksum.wrapping_sub(b);
        }
        checksum
    }
}
