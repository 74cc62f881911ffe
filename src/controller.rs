//! # Protocol mediator controller
//!
//! Owns both [`HalfDuplexChannel`]s, the cached [`Settings`]/[`ExtendedSettings`], the
//! command FIFO, and the [`EventManager`] that schedules protocol timeouts. This is the
//! only module that understands what a packet *means* — everything below it (`packet`,
//! `channel`, `settings`) is protocol-agnostic plumbing.
//!
//! ## Command sequencing
//!
//! `outstanding` doubles as the FIFO's dequeue gate: it is `true` whenever the mediator
//! is idle (the last sent command has been acknowledged, or none has been sent yet) and
//! `false` while a command is in flight awaiting its ack. [`Controller::execute_next_command`]
//! only dequeues when `outstanding` is `true`; dispatching a valid ack sets it back to
//! `true` before calling `execute_next_command` again, so a queued command is sent the
//! moment the current one completes. A protocol timeout that finds `outstanding` still
//! `false` treats the command as lost, forces `outstanding` back to `true`, and pushes a
//! fresh `Connect` so the same dequeue path sends it immediately.

use embassy_time::{Duration, Instant};
use heapless::Deque;

use crate::channel::{HalfDuplexChannel, Inbox, UartPort};
use crate::cmd;
use crate::event_manager::EventManager;
use crate::logger::{PacketLogger, Tag};
use crate::packet::{InfoType, Packet, PacketType};
use crate::settings::{ExtendedSettings, HalfDegree, Settings, PAYLOAD_LEN};

/// Delay after sending a command before it is considered lost.
pub const PROTOCOL_TIMEOUT_MS: u64 = 20;

/// Depth of the command FIFO. Five command kinds exist; this leaves headroom for a
/// burst of administrative pushes without needing to size it exactly.
const COMMAND_QUEUE_CAPACITY: usize = 8;

/// Packets buffered per channel between a controller tick and the previous one.
const INBOX_CAPACITY: usize = 4;

/// One entry in the controller's command FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Connect,
    QuerySettings,
    QueryExtendedSettings,
    PushSettings,
    PushExtendedSettings,
}

/// Actions the controller posts to its own [`EventManager`]. Enum-dispatched rather than
/// boxed closures, matching [`crate::event_manager`]'s allocator-free design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControllerAction {
    /// A command timed out without a structurally valid reply; `u32` is the
    /// `command_number` captured when the command was sent.
    ProtocolTimeout(u32),
}

/// A `critical_section`-guarded cell, used for the settings cache so a read from outside
/// the controller task (e.g. an administrative status poll) only ever takes a short
/// critical section to copy the value out.
struct Shared<T>(critical_section::Mutex<core::cell::Cell<T>>);

impl<T: Copy> Shared<T> {
    fn new(value: T) -> Self {
        Shared(critical_section::Mutex::new(core::cell::Cell::new(value)))
    }

    fn get(&self) -> T {
        critical_section::with(|cs| self.0.borrow(cs).get())
    }

    fn set(&self, value: T) {
        critical_section::with(|cs| self.0.borrow(cs).set(value));
    }

    fn update(&self, f: impl FnOnce(T) -> T) {
        critical_section::with(|cs| {
            let cell = self.0.borrow(cs);
            cell.set(f(cell.get()));
        });
    }
}

fn to_payload(data: &[u8]) -> [u8; PAYLOAD_LEN] {
    let mut payload = [0u8; PAYLOAD_LEN];
    let n = data.len().min(PAYLOAD_LEN);
    payload[..n].copy_from_slice(&data[..n]);
    payload
}

/// The bidirectional protocol mediator: drives the HVAC command sequence and answers the
/// thermostat from the cached settings. Generic over the two channels' concrete UART
/// types so a firmware binary can wire in its own HAL without this crate naming it.
pub struct Controller<Uh, Ut> {
    hvac: HalfDuplexChannel<Uh, Inbox<INBOX_CAPACITY>>,
    thermostat: HalfDuplexChannel<Ut, Inbox<INBOX_CAPACITY>>,
    event_manager: EventManager<ControllerAction>,
    settings: Shared<Settings>,
    extended_settings: Shared<ExtendedSettings>,
    command_queue: Deque<Command, COMMAND_QUEUE_CAPACITY>,
    command_number: u32,
    /// See the module docs: doubles as "is the mediator idle" while also matching the
    /// spec's literal `outstanding` bookkeeping.
    outstanding: bool,
    passthru: bool,
    logger: PacketLogger,
    error_count: u32,
    reconnect_count: u32,
}

impl<Uh, Ut> Controller<Uh, Ut> {
    /// Builds a controller over the two already-constructed channels. Call
    /// [`Controller::start`] before driving it to open the HVAC session.
    pub fn new(hvac: HalfDuplexChannel<Uh, Inbox<INBOX_CAPACITY>>, thermostat: HalfDuplexChannel<Ut, Inbox<INBOX_CAPACITY>>) -> Self {
        Controller {
            hvac,
            thermostat,
            event_manager: EventManager::new(),
            settings: Shared::new(Settings::default()),
            extended_settings: Shared::new(ExtendedSettings::default()),
            command_queue: Deque::new(),
            command_number: 0,
            // Idle until the first command is pushed by `start`.
            outstanding: true,
            passthru: false,
            logger: PacketLogger::new(),
            error_count: 0,
            reconnect_count: 0,
        }
    }

    /// Starts both channels and schedules the initial `Connect` handshake.
    pub fn start(&mut self, now: Instant) {
        self.hvac.start();
        self.thermostat.start();
        self.enqueue_command(Command::Connect, now);
    }

    pub fn is_passthru(&self) -> bool {
        self.passthru
    }

    pub fn set_passthru(&mut self, passthru: bool) {
        self.passthru = passthru;
    }

    pub fn settings(&self) -> Settings {
        self.settings.get()
    }

    pub fn extended_settings(&self) -> ExtendedSettings {
        self.extended_settings.get()
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count
    }

    pub fn command_number(&self) -> u32 {
        self.command_number
    }

    /// `true` while a command has been sent to the HVAC unit and no ack (valid or
    /// otherwise) has yet been dispatched for it.
    pub fn has_outstanding_command(&self) -> bool {
        !self.outstanding
    }

    /// Replaces only the target temperature and schedules a push. Clamping is handled by
    /// [`Settings::encode`] when the push is eventually sent.
    pub fn set_temperature(&mut self, target_temp: HalfDegree, now: Instant) {
        self.settings.update(|s| Settings {
            target_temp: Some(target_temp),
            ..s
        });
        self.enqueue_command(Command::PushSettings, now);
    }

    /// Replaces the cached settings wholesale and schedules a push of the new value.
    pub fn push_settings(&mut self, settings: Settings, now: Instant) {
        self.settings.set(settings);
        self.enqueue_command(Command::PushSettings, now);
    }

    /// Replaces the cached extended settings wholesale and schedules a push.
    pub fn push_extended_settings(&mut self, extended_settings: ExtendedSettings, now: Instant) {
        self.extended_settings.set(extended_settings);
        self.enqueue_command(Command::PushExtendedSettings, now);
    }

    /// Pushes `command` onto the FIFO, then attempts to execute immediately: if the
    /// mediator is mid-command this just queues, and the queued command runs as soon as
    /// the in-flight one's ack is dispatched (or its timeout gives up on it).
    fn enqueue_command(&mut self, command: Command, now: Instant) {
        let _ = self.command_queue.push_back(command);
        self.execute_next_command(now);
    }

    /// Dequeues and sends the next command, if the mediator is idle and the FIFO is
    /// non-empty. No-op otherwise, per the module docs' dequeue gate.
    fn execute_next_command(&mut self, now: Instant) {
        if !self.outstanding {
            return;
        }
        let Some(command) = self.command_queue.pop_front() else {
            return;
        };

        let packet = match command {
            Command::Connect => cmd::connect(),
            Command::QuerySettings => cmd::info_request(InfoType::Settings),
            Command::QueryExtendedSettings => cmd::info_request(InfoType::ExtendedSettings),
            Command::PushSettings => cmd::update_settings(&self.settings.get()),
            Command::PushExtendedSettings => cmd::update_extended_settings(&self.extended_settings.get()),
        };
        if let Ok(packet) = packet {
            if self.hvac.enqueue_packet(packet).is_ok() {
                self.logger.log(Tag::HvacTx, &packet);
            }
        }

        self.command_number = self.command_number.wrapping_add(1);
        self.outstanding = false;
        let captured = self.command_number;
        let _ = self
            .event_manager
            .run_delayed(ControllerAction::ProtocolTimeout(captured), Duration::from_millis(PROTOCOL_TIMEOUT_MS));
    }

    fn handle_action(&mut self, action: ControllerAction, now: Instant) {
        match action {
            ControllerAction::ProtocolTimeout(captured) => {
                if captured == self.command_number && !self.outstanding {
                    self.reconnect_count += 1;
                    self.outstanding = true;
                    self.enqueue_command(Command::Connect, now);
                }
            }
        }
    }

    /// Runs every [`ControllerAction`] whose deadline has passed. Collected into a local
    /// buffer first so the dispatch closure can't conflict with `self` being mutably
    /// borrowed again inside [`Controller::handle_action`].
    fn run_due_actions(&mut self, now: Instant) {
        let mut due: heapless::Vec<ControllerAction, { crate::event_manager::QUEUE_CAPACITY }> = heapless::Vec::new();
        self.event_manager.run_ready(now, |action| {
            let _ = due.push(action);
        });
        for action in due {
            self.handle_action(action, now);
        }
    }

    fn on_hvac_packet(&mut self, packet: Packet, now: Instant) {
        self.logger.log(Tag::HvacRx, &packet);

        if self.passthru {
            let _ = self.thermostat.enqueue_packet(packet);
            return;
        }
        if packet.is_junk() {
            self.error_count += 1;
            return;
        }
        if !packet.is_complete() {
            // Timed out mid-packet: treat like a lost command and reconnect.
            self.outstanding = true;
            self.enqueue_command(Command::Connect, now);
            return;
        }

        self.outstanding = true;
        if !packet.is_checksum_valid() {
            self.error_count += 1;
            return;
        }

        match packet.r#type() {
            PacketType::ConnectAck | PacketType::ExtendedConnectAck | PacketType::UpdateAck => {}
            PacketType::InfoAck => {
                let payload = to_payload(packet.data());
                match InfoType::from(payload[0]) {
                    InfoType::Settings => {
                        let update = Settings::decode(&payload);
                        self.settings.update(|s| s.merge(&update));
                    }
                    InfoType::ExtendedSettings => {
                        let update = ExtendedSettings::decode(&payload);
                        self.extended_settings.update(|s| s.merge(&update));
                    }
                    _ => {}
                }
            }
            _ => {}
        }

        self.execute_next_command(now);
    }

    fn on_thermostat_packet(&mut self, packet: Packet, now: Instant) {
        self.logger.log(Tag::ThermostatRx, &packet);

        if self.passthru {
            let _ = self.hvac.enqueue_packet(packet);
            return;
        }
        if packet.is_junk() || !packet.is_complete() {
            self.error_count += 1;
            return;
        }

        let reply = match packet.r#type() {
            PacketType::Connect => cmd::connect_ack(),
            PacketType::ExtendedConnect => {
                let echo = packet.data().first().copied().unwrap_or(0);
                cmd::extended_connect_ack(echo)
            }
            PacketType::Update => {
                let payload = to_payload(packet.data());
                let settings_update = Settings::decode(&payload);
                let extended_update = ExtendedSettings::decode(&payload);
                self.settings.update(|s| s.merge(&settings_update));
                self.extended_settings.update(|s| s.merge(&extended_update));
                cmd::update_ack()
            }
            PacketType::Info => {
                let payload = to_payload(packet.data());
                match InfoType::from(payload[0]) {
                    InfoType::ExtendedSettings => cmd::info_ack_extended_settings(&self.extended_settings.get()),
                    // Settings, plus the defensive default for any other sub-command
                    // (Open Question (c), kept as specified).
                    _ => cmd::info_ack_settings(&self.settings.get()),
                }
            }
            _ => return,
        };

        if let Ok(reply) = reply {
            if self.thermostat.enqueue_packet(reply).is_ok() {
                self.logger.log(Tag::ThermostatTx, &reply);
            }
        }
    }

    /// Drains every packet buffered on the HVAC channel's inbox since the last call.
    fn drain_hvac(&mut self, now: Instant) {
        while let Some(packet) = self.hvac.take_received() {
            self.on_hvac_packet(packet, now);
        }
    }

    /// Drains every packet buffered on the thermostat channel's inbox since the last call.
    fn drain_thermostat(&mut self, now: Instant) {
        while let Some(packet) = self.thermostat.take_received() {
            self.on_thermostat_packet(packet, now);
        }
    }

    /// Advances everything that depends only on the passage of time: channel quiet-time
    /// transitions and any due scheduler actions. Call once per loop iteration, then feed
    /// bytes in via [`Controller::on_hvac_byte`]/[`Controller::on_thermostat_byte`].
    pub fn tick(&mut self, now: Instant) {
        self.hvac.tick(now);
        self.thermostat.tick(now);
        self.run_due_actions(now);
    }

    /// Feeds one byte read off the HVAC UART. Drains any packet(s) it completes before
    /// returning, mirroring the callback semantics described for [`crate::channel`].
    pub fn on_hvac_byte(&mut self, byte: u8, now: Instant) {
        self.hvac.on_rx_byte(byte, now);
        self.drain_hvac(now);
    }

    /// Feeds one byte read off the thermostat UART.
    pub fn on_thermostat_byte(&mut self, byte: u8, now: Instant) {
        self.thermostat.on_rx_byte(byte, now);
        self.drain_thermostat(now);
    }
}

impl<Uh: UartPort, Ut: UartPort> Controller<Uh, Ut> {
    /// The controller task body: services both channels and the scheduler in one loop,
    /// never returning. A firmware binary spawns exactly one of these.
    ///
    /// Both channels are polled with a short read timeout so the scheduler still gets a
    /// chance to run its due actions (in particular protocol timeouts) with low latency,
    /// without needing a separate wake signal from the UART driver.
    pub async fn run(&mut self) -> ! {
        loop {
            self.hvac.service_once(Duration::from_millis(5)).await;
            self.drain_hvac(Instant::now());
            self.thermostat.service_once(Duration::from_millis(5)).await;
            self.drain_thermostat(Instant::now());
            self.tick(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{Fan, Mode, Power, Vane};

    type TestController = Controller<(), ()>;

    fn controller() -> TestController {
        let hvac = HalfDuplexChannel::new((), Inbox::default());
        let thermostat = HalfDuplexChannel::new((), Inbox::default());
        Controller::new(hvac, thermostat)
    }

    fn feed_hvac(controller: &mut TestController, bytes: &[u8], now: Instant) {
        for &b in bytes {
            controller.on_hvac_byte(b, now);
        }
    }

    fn feed_thermostat(controller: &mut TestController, bytes: &[u8], now: Instant) {
        for &b in bytes {
            controller.on_thermostat_byte(b, now);
        }
    }

    #[test]
    fn connect_handshake_sends_connect_and_clears_reconnects() {
        let mut controller = controller();
        let t0 = Instant::from_millis(0);
        controller.start(t0);

        assert_eq!(1, controller.command_number());
        assert!(controller.has_outstanding_command());

        let connect_ack = Packet::build(PacketType::ConnectAck, &[0x00]).unwrap();
        feed_hvac(&mut controller, connect_ack.raw_bytes(), t0);

        assert!(!controller.has_outstanding_command());
        assert_eq!(0, controller.reconnect_count());
    }

    #[test]
    fn info_settings_round_trip_merges_cache() {
        let mut controller = controller();
        let t0 = Instant::from_millis(0);
        controller.start(t0);

        let settings = Settings {
            power: Some(Power::On),
            mode: Some(Mode::Cool),
            target_temp: Some(HalfDegree::from_whole(25)),
            fan: Some(Fan::P2),
            vane: Some(Vane::P2),
            wide_vane: None,
        };
        let encoded = settings.encode(InfoType::Settings.as_byte());
        let info_ack = Packet::build(PacketType::InfoAck, &encoded).unwrap();

        feed_hvac(&mut controller, info_ack.raw_bytes(), t0);

        let cached = controller.settings();
        assert_eq!(Some(Power::On), cached.power);
        assert_eq!(Some(Mode::Cool), cached.mode);
        assert_eq!(Some(HalfDegree::from_whole(25)), cached.target_temp);
        assert_eq!(Some(Fan::P2), cached.fan);
        assert_eq!(Some(Vane::P2), cached.vane);
    }

    #[test]
    fn thermostat_update_is_served_locally_and_acked() {
        let mut controller = controller();
        let t0 = Instant::from_millis(0);
        controller.start(t0);
        // Drain the initial Connect so it doesn't interfere with assertions below.
        let connect_ack = Packet::build(PacketType::ConnectAck, &[0x00]).unwrap();
        feed_hvac(&mut controller, connect_ack.raw_bytes(), t0);

        let update = Settings {
            power: Some(Power::On),
            mode: None,
            target_temp: None,
            fan: None,
            vane: None,
            wide_vane: None,
        };
        let payload = update.encode(0x01);
        let packet = Packet::build(PacketType::Update, &payload).unwrap();
        feed_thermostat(&mut controller, packet.raw_bytes(), t0);

        assert_eq!(Some(Power::On), controller.settings().power);
        assert_eq!(Settings::default().mode, controller.settings().mode);
    }

    #[test]
    fn protocol_timeout_triggers_reconnect_and_advances_command_number() {
        let mut controller = controller();
        let t0 = Instant::from_millis(0);
        controller.start(t0);
        let connect_ack = Packet::build(PacketType::ConnectAck, &[0x00]).unwrap();
        feed_hvac(&mut controller, connect_ack.raw_bytes(), t0);
        assert_eq!(1, controller.command_number());

        controller.enqueue_command(Command::QuerySettings, t0);
        assert_eq!(2, controller.command_number());
        assert!(controller.has_outstanding_command());

        controller.tick(Instant::from_millis(PROTOCOL_TIMEOUT_MS));
        assert_eq!(3, controller.command_number());
        assert_eq!(1, controller.reconnect_count());
        assert!(controller.has_outstanding_command());
    }

    #[test]
    fn junk_is_dropped_once_the_resync_window_elapses_and_does_not_disturb_command_state() {
        let mut controller = controller();
        let t0 = Instant::from_millis(0);
        controller.start(t0);

        // A junk run has to exhaust the resync window (bounded by `MAX_PACKET_LEN`)
        // before it is reported; it isn't dropped on the first stray byte.
        feed_hvac(&mut controller, &[0xAA; crate::packet::MAX_PACKET_LEN], t0);
        assert_eq!(1, controller.error_count());
        assert_eq!(1, controller.command_number());
    }

    #[test]
    fn passthru_forwards_bytes_without_mutating_settings() {
        let mut controller = controller();
        let t0 = Instant::from_millis(0);
        controller.set_passthru(true);
        controller.start(t0);

        let before = controller.settings();
        let connect = Packet::build(PacketType::Connect, &[0xCA, 0x01]).unwrap();
        feed_thermostat(&mut controller, connect.raw_bytes(), t0);

        assert_eq!(before, controller.settings());
    }

    #[test]
    fn set_temperature_schedules_a_push_when_idle() {
        let mut controller = controller();
        let t0 = Instant::from_millis(0);
        controller.start(t0);
        let connect_ack = Packet::build(PacketType::ConnectAck, &[0x00]).unwrap();
        feed_hvac(&mut controller, connect_ack.raw_bytes(), t0);

        controller.set_temperature(HalfDegree::from_whole(23), t0);
        assert_eq!(2, controller.command_number());
        assert_eq!(Some(HalfDegree::from_whole(23)), controller.settings().target_temp);
    }
}
