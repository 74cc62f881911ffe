//! # Half-duplex channel
//!
//! The CN105 bus is physically half-duplex even though the UARTs on either end are
//! full-duplex silicon: the HVAC unit and the thermostat take turns, waiting at least
//! [`BUSY_MS`] after one packet before the next is allowed. This module fakes that
//! turn-taking over a real full-duplex UART.
//!
//! State machine:
//!
//! | From | Event | To |
//! |------|-------|----|
//! | Ready | RX byte arrives | Receiving |
//! | Ready | send requested | Sending |
//! | Receiving | packet complete or junk | Busy |
//! | Sending | last byte written | Busy |
//! | Busy | RX byte arrives | Receiving (RX always preempts quiet-time) |
//! | Busy | quiet-time elapsed, queue non-empty | Sending |
//! | Busy | quiet-time elapsed, queue empty | Ready |
//!
//! The transition logic ([`HalfDuplexChannel::on_rx_byte`], [`HalfDuplexChannel::tick`]) is
//! plain synchronous code taking an explicit [`Instant`], so it can be driven from tests
//! without a real timer or UART. [`HalfDuplexChannel::pump`] is the async loop a firmware
//! binary spawns as a task, wiring that logic to a real [`UartPort`].

use embassy_time::{Duration, Instant};
use heapless::Deque;

use crate::error::MediatorError;
use crate::packet::Packet;

/// Mandatory quiet-time between the end of one packet and the start of the next.
pub const BUSY_MS: u64 = 20;

/// If a packet under construction receives no new byte for this long, it is aborted.
const MID_PACKET_TIMEOUT_MS: u64 = 40;

/// Outgoing packets queued per channel. Small: the controller only ever has one command
/// outstanding, so a deep queue would only mask bugs.
const TX_QUEUE_CAPACITY: usize = 4;

type TxQueue = Deque<Packet, TX_QUEUE_CAPACITY>;

/// A UART capable of async byte-oriented read/write, the way the channel needs it.
///
/// Blanket-implemented over any type that already implements `embedded-io-async`'s
/// `Read`/`Write`, so a firmware binary just hands over its HAL's UART type directly —
/// no adapter needed, matching the style `Lr1120<O, SPI, M>` uses for its SPI bus.
pub trait UartPort: embedded_io_async::Read + embedded_io_async::Write {}

impl<T: embedded_io_async::Read + embedded_io_async::Write> UartPort for T {}

/// Receives packets as they complete off the wire, both well-formed and junk.
pub trait PacketSink {
    fn on_packet(&mut self, packet: &Packet);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelState {
    Ready,
    Receiving,
    Sending,
    Busy,
}

/// A UART event as reported by a typical embedded UART driver's interrupt/event queue.
/// Only [`UartEvent::Data`] carries a byte count to read; the others are error/control
/// conditions a `pump` implementation counts and recovers from rather than propagating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UartEvent {
    Data(usize),
    FrameError,
    ParityError,
    Break,
    BufferFull,
    FifoOverflow,
    PatternDetected,
}

/// One half-duplex endpoint: a UART, an RX packet accumulator, and a TX queue.
pub struct HalfDuplexChannel<U, P> {
    uart: U,
    on_packet: P,
    state: ChannelState,
    not_busy_at: Instant,
    last_rx_at: Instant,
    rx_packet: Packet,
    tx_queue: TxQueue,
    tx_packet: Option<Packet>,
}

impl<U, P> HalfDuplexChannel<U, P> {
    pub fn new(uart: U, on_packet: P) -> Self {
        HalfDuplexChannel {
            uart,
            on_packet,
            state: ChannelState::Ready,
            not_busy_at: Instant::from_millis(0),
            last_rx_at: Instant::from_millis(0),
            rx_packet: Packet::new(),
            tx_queue: Deque::new(),
            tx_packet: None,
        }
    }

    /// Resets the channel to its starting state. A firmware binary calls this once after
    /// the UART peripheral itself has been configured, before spawning [`Self::pump`].
    pub fn start(&mut self) {
        self.state = ChannelState::Ready;
        self.rx_packet.reset();
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Queues `packet` for transmission. Non-blocking; fails if the queue is full rather
    /// than blocking the caller (the controller task must never stall here).
    pub fn enqueue_packet(&mut self, packet: Packet) -> Result<(), MediatorError> {
        self.tx_queue
            .push_back(packet)
            .map_err(|_| MediatorError::TxQueueFull)
    }
}

impl<U, P: PacketSink> HalfDuplexChannel<U, P> {
    /// Feeds one byte read off the wire into the accumulator. RX always takes priority:
    /// arriving in any state other than `Receiving` itself starts (or restarts) a packet.
    pub fn on_rx_byte(&mut self, byte: u8, now: Instant) {
        if self.state != ChannelState::Receiving {
            self.rx_packet.reset();
            self.state = ChannelState::Receiving;
        }
        self.rx_packet.append_byte(byte);
        self.last_rx_at = now;

        // `is_complete` already accounts for a junk packet's resync window (bounded by
        // `MAX_PACKET_LEN`), so a junk packet keeps growing here rather than being
        // published on its first stray byte.
        if self.rx_packet.is_complete() {
            self.on_packet.on_packet(&self.rx_packet);
            self.rx_packet.reset();
            self.enter_busy(now);
        }
    }

    /// Advances time-driven transitions: quiet-time expiry and the mid-packet timeout.
    /// Call on every pump loop iteration (or directly from tests with a synthetic clock).
    pub fn tick(&mut self, now: Instant) {
        match self.state {
            ChannelState::Ready => {
                if !self.tx_queue.is_empty() {
                    self.begin_sending();
                }
            }
            ChannelState::Busy => {
                if now >= self.not_busy_at {
                    if !self.tx_queue.is_empty() {
                        self.begin_sending();
                    } else {
                        self.state = ChannelState::Ready;
                    }
                }
            }
            ChannelState::Receiving => {
                if now >= self.last_rx_at
                    && now - self.last_rx_at >= Duration::from_millis(MID_PACKET_TIMEOUT_MS)
                {
                    // Published even though incomplete: the controller needs to see this
                    // as a malformed/aborted packet (`is_complete() == false`) to trigger
                    // its own reconnect logic, rather than silently losing the partial
                    // frame.
                    self.on_packet.on_packet(&self.rx_packet);
                    self.rx_packet.reset();
                    self.enter_busy(now);
                }
            }
            ChannelState::Sending => {}
        }
    }

    fn enter_busy(&mut self, now: Instant) {
        self.not_busy_at = now + Duration::from_millis(BUSY_MS);
        self.state = ChannelState::Busy;
    }

    fn begin_sending(&mut self) {
        if let Some(packet) = self.tx_queue.pop_front() {
            self.tx_packet = Some(packet);
            self.state = ChannelState::Sending;
        }
    }

    fn finish_sending(&mut self, now: Instant) {
        self.tx_packet = None;
        self.enter_busy(now);
    }
}

impl<U: UartPort, P: PacketSink> HalfDuplexChannel<U, P> {
    /// The channel's task body: alternates between writing a queued packet and polling
    /// the UART for incoming bytes, driving [`Self::tick`] and [`Self::on_rx_byte`] with
    /// real time. Never returns; a firmware binary spawns one of these per channel.
    pub async fn pump(&mut self) -> ! {
        loop {
            self.service_once(Duration::from_millis(5)).await;
        }
    }

    /// One iteration of the pump loop: advance time-driven transitions, write a queued
    /// packet if one is ready to send, otherwise wait up to `read_timeout` for an
    /// incoming byte. Factored out of [`Self::pump`] so [`crate::controller::Controller`]
    /// can interleave this with its own channel and its scheduler inside a single task,
    /// rather than requiring one spawned task per channel.
    pub async fn service_once(&mut self, read_timeout: Duration) {
        self.tick(Instant::now());

        if self.state == ChannelState::Sending {
            if let Some(packet) = self.tx_packet.as_ref() {
                let _ = self.uart.write_all(packet.raw_bytes()).await;
            }
            self.finish_sending(Instant::now());
            return;
        }

        let mut byte = [0u8; 1];
        if let Ok(Ok(n)) =
            embassy_time::with_timeout(read_timeout, self.uart.read(&mut byte)).await
        {
            if n > 0 {
                self.on_rx_byte(byte[0], Instant::now());
            }
        }
    }
}

/// A [`PacketSink`] that just buffers completed packets for a consumer to poll, rather
/// than calling back into arbitrary owner state. This is what lets [`HalfDuplexChannel`]
/// be owned directly by [`crate::controller::Controller`] without a cyclic
/// callback-to-owner reference: the channel only ever writes into its own `Inbox`, and
/// the owner drains it on its own schedule.
pub struct Inbox<const N: usize> {
    queue: Deque<Packet, N>,
}

impl<const N: usize> Default for Inbox<N> {
    fn default() -> Self {
        Inbox { queue: Deque::new() }
    }
}

impl<const N: usize> Inbox<N> {
    pub fn take(&mut self) -> Option<Packet> {
        self.queue.pop_front()
    }
}

impl<const N: usize> PacketSink for Inbox<N> {
    fn on_packet(&mut self, packet: &Packet) {
        if self.queue.is_full() {
            self.queue.pop_front();
        }
        let _ = self.queue.push_back(*packet);
    }
}

impl<U, const N: usize> HalfDuplexChannel<U, Inbox<N>> {
    /// Pops the oldest packet delivered to this channel's [`Inbox`], if any.
    pub fn take_received(&mut self) -> Option<Packet> {
        self.on_packet.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketType;
    use std::vec::Vec;

    #[derive(Default)]
    struct RecordingSink {
        packets: Vec<Packet>,
    }

    impl PacketSink for RecordingSink {
        fn on_packet(&mut self, packet: &Packet) {
            self.packets.push(*packet);
        }
    }

    fn channel() -> HalfDuplexChannel<(), RecordingSink> {
        HalfDuplexChannel::new((), RecordingSink::default())
    }

    fn feed(channel: &mut HalfDuplexChannel<(), RecordingSink>, bytes: &[u8], now: Instant) {
        for &b in bytes {
            channel.on_rx_byte(b, now);
        }
    }

    #[test]
    fn starts_ready() {
        let channel = channel();
        assert_eq!(ChannelState::Ready, channel.state());
    }

    #[test]
    fn receiving_a_complete_packet_enters_busy_and_publishes_it() {
        let mut channel = channel();
        let connect = Packet::build(PacketType::Connect, &[0xCA, 0x01]).unwrap();
        feed(&mut channel, connect.raw_bytes(), Instant::from_millis(0));

        assert_eq!(ChannelState::Busy, channel.state());
        assert_eq!(1, channel.on_packet.packets.len());
        assert!(channel.on_packet.packets[0].is_complete());
    }

    #[test]
    fn does_not_begin_tx_before_quiet_time_elapses() {
        let mut channel = channel();
        let connect = Packet::build(PacketType::Connect, &[0xCA, 0x01]).unwrap();
        feed(&mut channel, connect.raw_bytes(), Instant::from_millis(0));
        channel.enqueue_packet(connect).unwrap();

        channel.tick(Instant::from_millis(BUSY_MS - 1));
        assert_eq!(ChannelState::Busy, channel.state());

        channel.tick(Instant::from_millis(BUSY_MS));
        assert_eq!(ChannelState::Sending, channel.state());
    }

    #[test]
    fn rx_preempts_busy_quiet_time() {
        let mut channel = channel();
        let connect = Packet::build(PacketType::Connect, &[0xCA, 0x01]).unwrap();
        feed(&mut channel, connect.raw_bytes(), Instant::from_millis(0));
        assert_eq!(ChannelState::Busy, channel.state());

        channel.on_rx_byte(0xFC, Instant::from_millis(1));
        assert_eq!(ChannelState::Receiving, channel.state());
    }

    #[test]
    fn junk_byte_keeps_receiving_until_resync_window_or_timeout_and_does_not_block_the_next_valid_packet() {
        let mut channel = channel();
        channel.on_rx_byte(0xAA, Instant::from_millis(0));
        // A single stray byte must not publish immediately: it stays in the resync
        // window, grown like any other packet under construction.
        assert_eq!(ChannelState::Receiving, channel.state());
        assert!(channel.on_packet.packets.is_empty());

        channel.tick(Instant::from_millis(MID_PACKET_TIMEOUT_MS));
        assert_eq!(1, channel.on_packet.packets.len());
        assert!(channel.on_packet.packets[0].is_junk());
        assert_eq!(ChannelState::Busy, channel.state());

        let connect = Packet::build(PacketType::Connect, &[0xCA, 0x01]).unwrap();
        feed(&mut channel, connect.raw_bytes(), Instant::from_millis(MID_PACKET_TIMEOUT_MS + 1));

        assert_eq!(2, channel.on_packet.packets.len());
        assert!(channel.on_packet.packets[1].is_complete());
        assert!(!channel.on_packet.packets[1].is_junk());
        assert_eq!(connect.data(), channel.on_packet.packets[1].data());
    }

    #[test]
    fn junk_packet_is_published_once_the_resync_window_is_exhausted() {
        let mut channel = channel();
        for i in 0..crate::packet::MAX_PACKET_LEN {
            channel.on_rx_byte(0xAA, Instant::from_millis(i as u64));
            if i + 1 < crate::packet::MAX_PACKET_LEN {
                assert!(channel.on_packet.packets.is_empty());
            }
        }
        assert_eq!(1, channel.on_packet.packets.len());
        assert!(channel.on_packet.packets[0].is_junk());
        assert_eq!(ChannelState::Busy, channel.state());
    }

    #[test]
    fn stalled_receive_is_aborted_after_mid_packet_timeout() {
        let mut channel = channel();
        channel.on_rx_byte(0xFC, Instant::from_millis(0));
        assert_eq!(ChannelState::Receiving, channel.state());

        channel.tick(Instant::from_millis(MID_PACKET_TIMEOUT_MS));
        assert_eq!(ChannelState::Busy, channel.state());
    }

    #[test]
    fn stalled_receive_publishes_the_incomplete_packet() {
        let mut channel = channel();
        channel.on_rx_byte(0xFC, Instant::from_millis(0));
        channel.tick(Instant::from_millis(MID_PACKET_TIMEOUT_MS));

        assert_eq!(1, channel.on_packet.packets.len());
        assert!(!channel.on_packet.packets[0].is_complete());
    }

    #[test]
    fn enqueue_fails_once_queue_is_full() {
        let mut channel = channel();
        let packet = Packet::build(PacketType::Connect, &[0xCA, 0x01]).unwrap();
        for _ in 0..TX_QUEUE_CAPACITY {
            channel.enqueue_packet(packet).unwrap();
        }
        assert_eq!(Err(MediatorError::TxQueueFull), channel.enqueue_packet(packet));
    }
}
