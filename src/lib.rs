//! # CN105 mediator
//!
//! A bidirectional protocol mediator for the Mitsubishi CN105 heat-pump control bus: it
//! sits between a Mitsubishi HVAC unit and an optional companion thermostat, speaking
//! CN105 to both, so a firmware binary can observe, impersonate, and drive the unit.
//!
//! ## Module map
//!
//! - [`packet`] — CN105 frame: accumulation, checksum, typed field access.
//! - [`channel`] — half-duplex turn-taking over one UART; RX bytes in, [`packet::Packet`]s out.
//! - [`event_manager`] — cooperative deadline-ordered scheduler the controller runs on.
//! - [`settings`] — typed HVAC settings/extended settings, wire encode/decode/merge.
//! - [`cmd`] — packet construction for each request/reply this crate sends.
//! - [`controller`] — the command state machine and thermostat-serving logic tying it together.
//! - [`logger`] — lossy observability ring buffer for packets seen on either channel.
//! - [`error`] — the crate's single error enum.
//!
//! ## `no_std`
//!
//! Like the driver crate this one grew from, the real firmware build is `no_std` with no
//! allocator: every fixed-capacity structure (`Packet`'s byte buffer, the channel's TX
//! queue, the controller's command FIFO, the packet logger's ring buffer) is backed by
//! `heapless`. `std` is only pulled in for `cargo test`, so the exact same modules that
//! ship to firmware are what host tests exercise.
#![cfg_attr(not(test), no_std)]

pub mod channel;
pub mod cmd;
pub mod controller;
pub mod error;
pub mod event_manager;
pub mod logger;
pub mod packet;
pub mod settings;

pub use controller::Controller;
pub use error::MediatorError;
pub use packet::Packet;
pub use settings::{ExtendedSettings, Settings};
