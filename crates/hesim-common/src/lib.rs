//! # hesim-common
//!
//! Common types and traits for the HESim simulation framework.
//!
//! This crate provides core simulation primitives including:
//! - Time representation ([`SimTime`])
//! - Node placement ([`Position`])
//! - Entity identification ([`EntityId`])
//! - Event system ([`Event`], [`EventPayload`], [`EventQueue`])
//! - Simulation context ([`SimContext`])
//! - Entity traits ([`Entity`])
//! - Transmission descriptors ([`tx_vector`])

pub mod tx_vector;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BinaryHeap, HashMap, HashSet};
use thiserror::Error;

pub use tx_vector::{
    AmpduTag, CodeRate, ModulationClass, MpduType, ResourceUnit, RuSize, TxVector, WifiMode, WifiPacket,
    WifiPreamble,
};

// ============================================================================
// Error Types
// ============================================================================

/// Simulation errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// Entity not found.
    #[error("Entity not found: {0:?}")]
    EntityNotFound(EntityId),
}

// ============================================================================
// Time Types
// ============================================================================

/// Simulation time in nanoseconds since simulation start.
///
/// Also used for durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    /// Zero time.
    pub const ZERO: SimTime = SimTime(0);

    /// Create from nanoseconds.
    pub const fn from_nanos(ns: u64) -> Self {
        SimTime(ns)
    }

    /// Create from microseconds.
    pub const fn from_micros(us: u64) -> Self {
        SimTime(us * 1_000)
    }

    /// Create from milliseconds.
    pub const fn from_millis(ms: u64) -> Self {
        SimTime(ms * 1_000_000)
    }

    /// Create from seconds (float).
    pub fn from_secs(s: f64) -> Self {
        SimTime((s * 1_000_000_000.0).round() as u64)
    }

    /// Get as nanoseconds.
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Get as microseconds.
    pub fn as_micros(&self) -> u64 {
        self.0 / 1_000
    }

    /// Get as milliseconds.
    pub fn as_millis(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// Get as seconds (float).
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Whether this is the zero time/duration.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Self) -> Self::Output {
        SimTime(self.0 + rhs.0)
    }
}

impl std::ops::Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: Self) -> Self::Output {
        SimTime(self.0.saturating_sub(rhs.0))
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}us", self.0 as f64 / 1_000.0)
    }
}

// ============================================================================
// Placement
// ============================================================================

/// Cartesian position in meters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate in meters.
    pub x: f64,
    /// Y coordinate in meters.
    pub y: f64,
    /// Z coordinate in meters.
    #[serde(default)]
    pub z: f64,
}

impl Position {
    /// Create a new position.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Position { x, y, z }
    }

    /// Euclidean distance to another position in meters.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

// ============================================================================
// Entity Types
// ============================================================================

/// Unique identifier for an entity in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Create a new entity ID.
    pub fn new(id: u64) -> Self {
        EntityId(id)
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Unique identifier for an event. Also serves as the cancellation handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

/// A simulation event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unique event ID.
    pub id: EventId,
    /// Time when the event occurs.
    pub time: SimTime,
    /// Entity that created the event.
    pub source: EntityId,
    /// Target entities for the event.
    pub targets: Vec<EntityId>,
    /// Event payload.
    pub payload: EventPayload,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (earliest time first, then FIFO)
        other.time.cmp(&self.time).then_with(|| other.id.0.cmp(&self.id.0))
    }
}

/// Operating state of a PHY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhyState {
    /// Medium idle, ready to transmit or receive.
    Idle,
    /// Medium sensed busy.
    CcaBusy,
    /// Transmitting.
    Transmitting,
    /// Receiving a PPDU.
    Receiving,
    /// Retuning to another channel.
    Switching,
    /// Radio asleep.
    Sleeping,
}

impl PhyState {
    /// Short label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PhyState::Idle => "idle",
            PhyState::CcaBusy => "cca_busy",
            PhyState::Transmitting => "tx",
            PhyState::Receiving => "rx",
            PhyState::Switching => "switching",
            PhyState::Sleeping => "sleep",
        }
    }
}

/// Why an arriving signal or a transmit request was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// BSS color differs from the station's own color.
    ForeignBss,
    /// Signal is on a resource unit the station does not listen on.
    UnexpectedResourceUnit,
    /// Station is retuning.
    Switching,
    /// Station is already receiving another PPDU.
    AlreadyReceiving,
    /// Station is transmitting.
    AlreadyTransmitting,
    /// Continuation subframe with no aggregate in progress.
    NoPreambleContext,
    /// Received power below the energy detection threshold.
    LowPower,
    /// Station is asleep.
    Sleeping,
    /// Payload mode not supported by the station.
    UnsupportedMode,
    /// PLCP header could not be decoded.
    HeaderFailed,
    /// Payload decode failed.
    DecodeFailed,
    /// Transmission duration evaluated to zero.
    InvalidDuration,
}

impl DropReason {
    /// Short label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DropReason::ForeignBss => "foreign_bss",
            DropReason::UnexpectedResourceUnit => "unexpected_ru",
            DropReason::Switching => "switching",
            DropReason::AlreadyReceiving => "already_rx",
            DropReason::AlreadyTransmitting => "already_tx",
            DropReason::NoPreambleContext => "no_preamble_context",
            DropReason::LowPower => "low_power",
            DropReason::Sleeping => "sleeping",
            DropReason::UnsupportedMode => "unsupported_mode",
            DropReason::HeaderFailed => "header_failed",
            DropReason::DecodeFailed => "decode_failed",
            DropReason::InvalidDuration => "invalid_duration",
        }
    }
}

/// Upper layer asks the PHY to transmit a frame.
/// Upper layer → PHY event.
#[derive(Debug, Clone)]
pub struct PhyTxRequestEvent {
    /// The frame to send.
    pub packet: WifiPacket,
    /// Transmission parameters.
    pub tx_vector: TxVector,
    /// Preamble to send, `WifiPreamble::None` for aggregate continuations.
    pub preamble: WifiPreamble,
    /// Aggregation position.
    pub mpdu_type: MpduType,
}

/// Control requests accepted by a PHY.
/// Upper layer → PHY, or PHY → itself for deferred requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyControlEvent {
    /// Retune to a channel number.
    SetChannelNumber(u16),
    /// Retune to a center frequency in MHz.
    SetFrequency(u16),
    /// Enter sleep mode.
    SetSleepMode,
    /// Leave sleep mode.
    ResumeFromSleep,
    /// Listen on a resource unit index.
    ListenOnResourceUnit(u8),
    /// Allocate a resource unit index for transmission.
    AllocateTxResourceUnit(u8),
}

/// A PHY puts a signal on the medium.
/// PHY → Channel event.
#[derive(Debug, Clone)]
pub struct ChannelTransmitEvent {
    /// Transmitting PHY.
    pub sender: EntityId,
    /// The frame.
    pub packet: WifiPacket,
    /// Radiated power in dBm (power level plus antenna gain).
    pub tx_power_dbm: f64,
    /// Transmission parameters.
    pub tx_vector: TxVector,
    /// Preamble type.
    pub preamble: WifiPreamble,
    /// Aggregation position.
    pub mpdu_type: MpduType,
    /// Time on air.
    pub duration: SimTime,
    /// Channel the sender is tuned to.
    pub channel_number: u16,
}

/// A signal reaches a PHY.
/// Channel → PHY event.
#[derive(Debug, Clone)]
pub struct SignalArrivalEvent {
    /// Transmitting PHY.
    pub sender: EntityId,
    /// The frame.
    pub packet: WifiPacket,
    /// Power at the receiver antenna in dBm, before receive gain.
    pub rx_power_dbm: f64,
    /// Transmission parameters.
    pub tx_vector: TxVector,
    /// Preamble type.
    pub preamble: WifiPreamble,
    /// Aggregation position.
    pub mpdu_type: MpduType,
    /// Time on air.
    pub duration: SimTime,
}

/// A PHY changed channel.
/// PHY → Channel event.
#[derive(Debug, Clone, Copy)]
pub struct PhyRetunedEvent {
    /// The retuned PHY.
    pub phy: EntityId,
    /// New channel number.
    pub channel_number: u16,
}

/// Monitor-mode record of a frame seen by a PHY.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorRecord {
    /// The frame.
    pub packet: WifiPacket,
    /// Center frequency in MHz.
    pub frequency_mhz: u16,
    /// Channel number.
    pub channel_number: u16,
    /// Data rate in units of 500 kb/s (128 + MCS for HT and later).
    pub data_rate_500kbps: u32,
    /// Transmission parameters.
    pub tx_vector: TxVector,
    /// A-MPDU reference number.
    pub ampdu_reference: u32,
    /// Signal level in dBm (receive side only).
    pub signal_dbm: Option<f64>,
    /// Noise level in dBm (receive side only).
    pub noise_dbm: Option<f64>,
}

/// Notifications raised by a PHY to its observer.
#[derive(Debug, Clone)]
pub enum PhyNotification {
    /// A transmission started.
    TxBegin {
        /// The frame.
        packet: WifiPacket,
        /// Time on air.
        duration: SimTime,
    },
    /// A transmit request was refused.
    TxDrop {
        /// The frame.
        packet: WifiPacket,
        /// Reason.
        reason: DropReason,
    },
    /// A reception started.
    RxBegin {
        /// The frame.
        packet: WifiPacket,
    },
    /// A reception completed successfully.
    RxEndOk {
        /// The frame.
        packet: WifiPacket,
        /// Payload SNR (linear).
        snr: f64,
        /// Payload error probability used for the decision.
        per: f64,
        /// Transmission parameters.
        tx_vector: TxVector,
    },
    /// A reception completed with errors.
    RxEndError {
        /// The frame.
        packet: WifiPacket,
        /// Payload SNR (linear).
        snr: f64,
    },
    /// An arriving signal was not received.
    RxDrop {
        /// The frame.
        packet: WifiPacket,
        /// Reason.
        reason: DropReason,
    },
    /// Monitor record of a transmitted frame.
    MonitorSniffTx(MonitorRecord),
    /// Monitor record of a received frame.
    MonitorSniffRx(MonitorRecord),
    /// Operating state changed.
    StateChanged {
        /// New state.
        state: PhyState,
    },
}

impl PhyNotification {
    /// Short label for logs and traces.
    pub fn as_label(&self) -> &'static str {
        match self {
            PhyNotification::TxBegin { .. } => "tx_begin",
            PhyNotification::TxDrop { .. } => "tx_drop",
            PhyNotification::RxBegin { .. } => "rx_begin",
            PhyNotification::RxEndOk { .. } => "rx_ok",
            PhyNotification::RxEndError { .. } => "rx_error",
            PhyNotification::RxDrop { .. } => "rx_drop",
            PhyNotification::MonitorSniffTx(_) => "sniff_tx",
            PhyNotification::MonitorSniffRx(_) => "sniff_rx",
            PhyNotification::StateChanged { .. } => "state",
        }
    }
}

/// Notification forwarded to an upper-layer entity.
/// PHY → upper layer event.
#[derive(Debug, Clone)]
pub struct PhyIndicationEvent {
    /// The PHY raising the notification.
    pub phy: EntityId,
    /// The notification.
    pub notification: PhyNotification,
}

/// Event payload variants.
#[derive(Debug, Clone)]
pub enum EventPayload {
    // =========== Upper Layer → PHY Events ===========
    /// Request to transmit a frame.
    PhyTxRequest(PhyTxRequestEvent),
    /// Sleep, resume, retune and RU configuration requests.
    PhyControl(PhyControlEvent),

    // =========== PHY ↔ Channel Events ===========
    /// A PHY started transmitting (directed to the channel entity).
    ChannelTransmit(ChannelTransmitEvent),
    /// A signal arrives at a PHY (from the channel entity).
    SignalArrival(SignalArrivalEvent),
    /// A PHY moved to another channel.
    PhyRetuned(PhyRetunedEvent),

    // =========== PHY → Upper Layer Events ===========
    /// A PHY notification.
    PhyIndication(PhyIndicationEvent),

    // =========== Scheduling ===========
    /// A delayed callback.
    Timer {
        /// User-defined timer ID.
        timer_id: u64,
    },

    // =========== Simulation Control ===========
    /// End the simulation.
    SimulationEnd,
}

// ============================================================================
// Event Queue
// ============================================================================

/// Time-ordered event queue with cancellation.
///
/// Events with equal timestamps pop in the order their IDs were allocated.
/// Cancelled events are discarded on pop and never returned.
#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<Event>,
    queued: HashSet<EventId>,
    cancelled: HashSet<EventId>,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event.
    pub fn push(&mut self, event: Event) {
        self.queued.insert(event.id);
        self.heap.push(event);
    }

    /// Cancel a queued event. Cancelling an unknown, fired or already
    /// cancelled event is a no-op.
    pub fn cancel(&mut self, id: EventId) {
        if self.queued.contains(&id) {
            self.cancelled.insert(id);
        }
    }

    /// Pop the next live event.
    pub fn pop(&mut self) -> Option<Event> {
        while let Some(event) = self.heap.pop() {
            self.queued.remove(&event.id);
            if self.cancelled.remove(&event.id) {
                continue;
            }
            return Some(event);
        }
        None
    }

    /// Time of the next live event.
    pub fn peek_time(&mut self) -> Option<SimTime> {
        while let Some(event) = self.heap.peek() {
            if self.cancelled.contains(&event.id) {
                let id = event.id;
                self.heap.pop();
                self.queued.remove(&id);
                self.cancelled.remove(&id);
                continue;
            }
            return Some(event.time);
        }
        None
    }

    /// Number of live events.
    pub fn len(&self) -> usize {
        self.queued.len() - self.cancelled.len()
    }

    /// Whether no live events remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move the events and cancellations produced by a handler into the queue.
    pub fn absorb(&mut self, ctx: &mut SimContext) {
        for event in ctx.take_pending_events() {
            self.push(event);
        }
        for id in ctx.take_cancellations() {
            self.cancel(id);
        }
    }
}

// ============================================================================
// Simulation Context
// ============================================================================

/// Context passed to entities during event handling.
pub struct SimContext {
    time: SimTime,
    rng: ChaCha8Rng,
    pending_events: Vec<Event>,
    cancellations: Vec<EventId>,
    next_event_id: u64,
    source_entity: EntityId,
}

impl SimContext {
    /// Create a new simulation context.
    pub fn new(seed: u64) -> Self {
        SimContext {
            time: SimTime::ZERO,
            rng: ChaCha8Rng::seed_from_u64(seed),
            pending_events: Vec::new(),
            cancellations: Vec::new(),
            next_event_id: 0,
            source_entity: EntityId(0),
        }
    }

    /// Get the current simulation time.
    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Get mutable access to the random number generator.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Set the current time (used by event loop).
    pub fn set_time(&mut self, time: SimTime) {
        self.time = time;
    }

    /// Set the source entity (used by event loop).
    pub fn set_source(&mut self, entity: EntityId) {
        self.source_entity = entity;
    }

    /// Post an event to occur after a delay. The returned ID can be passed
    /// to [`SimContext::cancel`].
    pub fn post_event(&mut self, delay: SimTime, targets: Vec<EntityId>, payload: EventPayload) -> EventId {
        let id = EventId(self.next_event_id);
        let event = Event {
            id,
            time: self.time + delay,
            source: self.source_entity,
            targets,
            payload,
        };
        self.next_event_id += 1;
        self.pending_events.push(event);
        id
    }

    /// Post an event to occur immediately (at current time).
    pub fn post_immediate(&mut self, targets: Vec<EntityId>, payload: EventPayload) -> EventId {
        self.post_event(SimTime::ZERO, targets, payload)
    }

    /// Cancel a previously posted event. Idempotent.
    pub fn cancel(&mut self, id: EventId) {
        if let Some(pos) = self.pending_events.iter().position(|e| e.id == id) {
            self.pending_events.remove(pos);
        } else if !self.cancellations.contains(&id) {
            self.cancellations.push(id);
        }
    }

    /// Take all pending events (used by event loop).
    pub fn take_pending_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending_events)
    }

    /// Take all pending cancellations (used by event loop).
    pub fn take_cancellations(&mut self) -> Vec<EventId> {
        std::mem::take(&mut self.cancellations)
    }

    /// Get the next event ID (used by event loop for external event creation).
    pub fn next_event_id(&mut self) -> u64 {
        let id = self.next_event_id;
        self.next_event_id += 1;
        id
    }
}

// ============================================================================
// Entity Trait
// ============================================================================

/// Base trait for all simulation entities.
pub trait Entity: Send {
    /// Get the entity's unique ID.
    fn entity_id(&self) -> EntityId;

    /// Handle an event.
    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError>;
}

// ============================================================================
// Entity Registry
// ============================================================================

/// Registry for managing simulation entities.
pub struct EntityRegistry {
    entities: HashMap<EntityId, Box<dyn Entity>>,
}

impl EntityRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        EntityRegistry {
            entities: HashMap::new(),
        }
    }

    /// Register an entity.
    pub fn register(&mut self, entity: Box<dyn Entity>) {
        let id = entity.entity_id();
        self.entities.insert(id, entity);
    }

    /// Get a mutable reference to an entity by ID.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Box<dyn Entity>> {
        self.entities.get_mut(&id)
    }

    /// Get all entity IDs.
    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }

    /// Get the number of registered entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
