//! # Packet construction
//!
//! Thin factory functions over [`crate::packet::Packet`] for each packet the mediator
//! needs to build, either to send to the HVAC unit or to answer the thermostat locally.
//! Parsing the other direction (interpreting a received packet's payload) lives with the
//! type that owns the meaning of that payload: [`crate::settings`] for settings payloads.

mod connect;
mod info;
mod update;

pub use connect::{connect, connect_ack, extended_connect_ack};
pub use info::{info_request, info_ack_settings, info_ack_extended_settings};
pub use update::{update_ack, update_settings, update_extended_settings};
