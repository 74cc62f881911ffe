//! # Error type
//!
//! A single flat error enum shared by every fallible operation in the crate. There is no
//! allocator here, so this is a hand-rolled `enum` rather than a `thiserror`-derived one.

/// Errors that can surface across a module boundary in the mediator.
///
/// Framing errors, checksum mismatches, and logger drops are all counted rather than
/// returned as an error here — see the module docs on `controller` and `logger` for why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MediatorError {
    /// The half-duplex channel's TX queue is full; the packet was dropped.
    TxQueueFull,
    /// The `EventManager`'s bounded action queue is full (more than its fixed capacity
    /// pending at once). Treated as fatal per the design: surfaced, never panicked.
    SchedulerOverflow,
    /// A packet was requested to be built from data that doesn't fit the wire format
    /// (e.g. a payload longer than the max packet length).
    PayloadTooLarge,
}
