//! The `WifiPhy` interface and its HE variant.
//!
//! An [`HePhy`] is a simulation entity. It receives signal arrivals from the
//! channel entity, transmit and control requests from an upper layer, and its
//! own timers. Every outcome is reported through the [`PhyObserver`] given at
//! construction.

use crate::config::{channel_to_frequency_mhz, frequency_to_channel, AggregateDecodePolicy, HeaderFailurePolicy, HePhyConfig};
use crate::error_rate::{ErrorRateModel, NistErrorRateModel};
use crate::interference::{dbm_to_w, w_to_dbm, InterferenceEventId, InterferenceHelper};
use crate::observer::PhyObserver;
use crate::state::{AggregationContext, AggregationVerdict, PhyStateMachine, ResourceUnitTable};
use crate::timing::{calculate_tx_duration, preamble_and_header_duration};
use hesim_common::{
    ChannelTransmitEvent, DropReason, Entity, EntityId, Event, EventId, EventPayload, MonitorRecord, MpduType,
    PhyControlEvent, PhyNotification, PhyRetunedEvent, PhyState, PhyTxRequestEvent, SignalArrivalEvent, SimContext,
    SimError, SimTime, TxVector, WifiPacket, WifiPreamble,
};
use hesim_metrics::{metric_defs, metrics, MetricLabels};
use rand::Rng;
use std::collections::BTreeMap;

// Timer IDs carry a kind in the upper 16 bits and a value in the rest.
const TIMER_KIND_SHIFT: u32 = 48;
const TIMER_VALUE_MASK: u64 = (1 << TIMER_KIND_SHIFT) - 1;
const TIMER_STATE_DEADLINE: u64 = 1;
const TIMER_HEADER_END: u64 = 2;
const TIMER_PAYLOAD_END: u64 = 3;
const TIMER_RU_TX_END: u64 = 4;

fn timer_id(kind: u64, value: u64) -> u64 {
    (kind << TIMER_KIND_SHIFT) | (value & TIMER_VALUE_MASK)
}

/// Capability set shared by every PHY flavor.
pub trait WifiPhy: Entity {
    /// Current operating state.
    fn state(&self) -> PhyState;

    /// Channel number the PHY is tuned to.
    fn channel_number(&self) -> u16;

    /// Center frequency in MHz the PHY is tuned to.
    fn frequency_mhz(&self) -> u16;

    /// Transmit a frame.
    fn send_packet(&mut self, ctx: &mut SimContext, request: PhyTxRequestEvent);

    /// A signal reached the antenna.
    fn start_receive_preamble_and_header(&mut self, ctx: &mut SimContext, arrival: &SignalArrivalEvent);

    /// Retune to a channel number.
    fn set_channel_number(&mut self, ctx: &mut SimContext, channel_number: u16);

    /// Retune to a center frequency in MHz.
    fn set_frequency(&mut self, ctx: &mut SimContext, frequency_mhz: u16);

    /// Enter sleep mode, possibly after the current activity.
    fn set_sleep_mode(&mut self, ctx: &mut SimContext);

    /// Leave sleep mode.
    fn resume_from_sleep(&mut self, ctx: &mut SimContext);
}

/// A reception between signal arrival and payload end.
#[derive(Debug, Clone)]
struct PendingReception {
    event: InterferenceEventId,
    packet: WifiPacket,
    tx_vector: TxVector,
    preamble: WifiPreamble,
    mpdu_type: MpduType,
    rx_power_w: f64,
    header_timer: Option<EventId>,
    payload_timer: EventId,
    /// Uplink RU reception accepted regardless of the literal state.
    multi_user: bool,
    /// The header stage already reported a drop.
    dropped: bool,
    /// Header context of this reception alone: its own header decode, or
    /// the burst flag when a continuation subframe arrived.
    header_ok: bool,
}

/// Slot of a request postponed until the current activity ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeferredSlot {
    Switch,
    Sleep,
}

/// HE (802.11ax) PHY.
pub struct HePhy {
    id: EntityId,
    name: String,
    config: HePhyConfig,
    interference: InterferenceHelper,
    state: PhyStateMachine,
    aggregation: AggregationContext,
    rus: ResourceUnitTable,
    observer: Box<dyn PhyObserver>,

    // Receptions by ID, plus the next ID
    receptions: BTreeMap<u64, PendingReception>,
    next_reception_id: u64,

    // Scheduled self events
    state_timer: Option<(EventId, SimTime)>,
    deferred_switch: Option<EventId>,
    deferred_sleep: Option<EventId>,

    tx_ampdu_reference: u32,
    metric_labels: MetricLabels,
}

impl HePhy {
    /// Create a PHY with the default error-rate model.
    pub fn new(id: EntityId, name: impl Into<String>, config: HePhyConfig, observer: Box<dyn PhyObserver>) -> Self {
        Self::with_error_rate_model(id, name, config, observer, Box::new(NistErrorRateModel))
    }

    /// Create a PHY with a custom error-rate model.
    pub fn with_error_rate_model(
        id: EntityId,
        name: impl Into<String>,
        config: HePhyConfig,
        observer: Box<dyn PhyObserver>,
        error_rate_model: Box<dyn ErrorRateModel>,
    ) -> Self {
        let name = name.into();
        let metric_labels = MetricLabels::new(name.clone(), config.role.as_label());
        HePhy {
            id,
            name,
            interference: InterferenceHelper::new(config.rx_noise_figure_db, error_rate_model),
            config,
            state: PhyStateMachine::new(),
            aggregation: AggregationContext::default(),
            rus: ResourceUnitTable::default(),
            observer,
            receptions: BTreeMap::new(),
            next_reception_id: 0,
            state_timer: None,
            deferred_switch: None,
            deferred_sleep: None,
            tx_ampdu_reference: 0,
            metric_labels,
        }
    }

    /// Replace the metric labels, e.g. to add groups.
    pub fn with_metric_labels(mut self, metric_labels: MetricLabels) -> Self {
        self.metric_labels = metric_labels;
        self
    }

    /// Station name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current configuration.
    pub fn config(&self) -> &HePhyConfig {
        &self.config
    }

    /// Receive-side aggregation context.
    pub fn aggregation(&self) -> &AggregationContext {
        &self.aggregation
    }

    /// Resource-unit participation.
    pub fn resource_units(&self) -> &ResourceUnitTable {
        &self.rus
    }

    /// Interference tracker.
    pub fn interference(&self) -> &InterferenceHelper {
        &self.interference
    }

    /// Time spent in each state, closed at `now`.
    pub fn state_residency(&mut self, now: SimTime) -> BTreeMap<&'static str, SimTime> {
        self.state.flush_residency(now);
        self.state.residency().clone()
    }

    /// Number of receptions awaiting their payload end.
    pub fn pending_receptions(&self) -> usize {
        self.receptions.len()
    }

    /// Time from `now` until the current activity ends.
    pub fn delay_until_idle(&self, now: SimTime) -> SimTime {
        self.state.delay_until_idle(now)
    }

    /// Start listening on a resource unit.
    pub fn listen_on_resource_unit(&mut self, ru: u8) {
        self.rus.listen_on(ru);
    }

    /// Allocate a resource unit for transmission.
    pub fn allocate_tx_resource_unit(&mut self, ru: u8) {
        self.rus.allocate_tx(ru);
    }

    // ========================================================================
    // Notification plumbing
    // ========================================================================

    fn notify(&mut self, ctx: &mut SimContext, notification: PhyNotification) {
        self.observer.notify(ctx, self.id, &notification);
    }

    fn drop_rx(&mut self, ctx: &mut SimContext, packet: &WifiPacket, reason: DropReason) {
        tracing::debug!("{}: drop rx packet {} ({})", self.name, packet.uid, reason.as_label());
        let mut labels = self.metric_labels.to_labels();
        labels.push(("reason", reason.as_label().to_string()));
        metrics::counter!(metric_defs::PHY_RX_DROPPED.name, &labels).increment(1);
        self.notify(
            ctx,
            PhyNotification::RxDrop {
                packet: packet.clone(),
                reason,
            },
        );
    }

    fn drop_tx(&mut self, ctx: &mut SimContext, packet: WifiPacket, reason: DropReason) {
        tracing::debug!("{}: drop tx packet {} ({})", self.name, packet.uid, reason.as_label());
        let mut labels = self.metric_labels.to_labels();
        labels.push(("reason", reason.as_label().to_string()));
        metrics::counter!(metric_defs::PHY_TX_DROPPED.name, &labels).increment(1);
        self.notify(ctx, PhyNotification::TxDrop { packet, reason });
    }

    /// Report a state change since `previous` and keep the state timer in
    /// line with the current deadline.
    fn after_state_change(&mut self, ctx: &mut SimContext, previous: PhyState) {
        let current = self.state.state();
        if current != previous {
            tracing::trace!("{}: {} -> {} at {}", self.name, previous.as_label(), current.as_label(), ctx.time());
            let mut labels = self.metric_labels.to_labels();
            labels.push(("state", current.as_label().to_string()));
            metrics::counter!(metric_defs::PHY_STATE_TRANSITIONS.name, &labels).increment(1);
            self.notify(ctx, PhyNotification::StateChanged { state: current });
        }

        let deadline = self.state.state_deadline();
        if self.state_timer.map(|(_, at)| at) == deadline {
            return;
        }
        if let Some((id, _)) = self.state_timer.take() {
            ctx.cancel(id);
        }
        if let Some(at) = deadline {
            let now = ctx.time();
            let delay = if at > now { at - now } else { SimTime::ZERO };
            let id = ctx.post_event(
                delay,
                vec![self.id],
                EventPayload::Timer {
                    timer_id: timer_id(TIMER_STATE_DEADLINE, 0),
                },
            );
            self.state_timer = Some((id, at));
        }
    }

    /// Close timed states whose end has been reached, so requests arriving
    /// at that same instant see the settled state.
    fn settle_expired_state(&mut self, ctx: &mut SimContext) {
        let previous = self.state.state();
        // Pending receptions close the window at their own payload end
        if !(self.state.is(PhyState::Receiving) && !self.receptions.is_empty()) {
            self.state.on_state_deadline(ctx.time());
        }
        self.after_state_change(ctx, previous);
    }

    // ========================================================================
    // Receive pipeline
    // ========================================================================

    fn is_foreign_bss(&self, tx_vector: &TxVector) -> bool {
        self.config.color != 0 && tx_vector.color != 0 && tx_vector.color != self.config.color
    }

    /// Credit CCA-busy time for the energy on the medium, judged against the
    /// threshold that applies to the signal's BSS.
    fn maybe_cca_busy(&mut self, ctx: &mut SimContext, tx_vector: &TxVector) {
        let threshold_dbm = if self.is_foreign_bss(tx_vector) {
            self.config.obss_cca_threshold_dbm
        } else {
            self.config.cca_mode1_threshold_dbm
        };
        let now = ctx.time();
        let duration = self.interference.energy_duration(now, dbm_to_w(threshold_dbm));
        if duration.is_zero() {
            return;
        }
        let previous = self.state.state();
        if self.state.switch_maybe_to_cca_busy(now, duration) {
            tracing::trace!("{}: medium busy for {}", self.name, duration);
        }
        self.after_state_change(ctx, previous);
    }

    /// Drop a signal that arrived while the PHY is occupied, crediting
    /// busy time if the signal outlasts the current activity.
    fn drop_while_busy(
        &mut self,
        ctx: &mut SimContext,
        arrival: &SignalArrivalEvent,
        reason: DropReason,
        clear_decode_flag: bool,
    ) {
        let now = ctx.time();
        self.drop_rx(ctx, &arrival.packet, reason);
        if clear_decode_flag {
            self.aggregation.plcp_success = false;
        }
        if now + arrival.duration > now + self.state.delay_until_idle(now) {
            self.maybe_cca_busy(ctx, &arrival.tx_vector);
        }
    }

    fn begin_reception(
        &mut self,
        ctx: &mut SimContext,
        arrival: &SignalArrivalEvent,
        event: InterferenceEventId,
        rx_power_w: f64,
        multi_user: bool,
    ) {
        let now = ctx.time();
        let previous = self.state.state();
        debug_assert!(
            multi_user || self.receptions.is_empty(),
            "reception started with another one pending"
        );

        self.state.switch_to_rx(now, arrival.duration);
        metrics::counter!(metric_defs::PHY_RX_BEGIN.name, &self.metric_labels.to_labels()).increment(1);
        self.notify(
            ctx,
            PhyNotification::RxBegin {
                packet: arrival.packet.clone(),
            },
        );
        self.interference.notify_rx_start();

        let rx_id = self.next_reception_id;
        self.next_reception_id += 1;
        let header_timer = if arrival.preamble.is_present() {
            Some(ctx.post_event(
                preamble_and_header_duration(&arrival.tx_vector, arrival.preamble),
                vec![self.id],
                EventPayload::Timer {
                    timer_id: timer_id(TIMER_HEADER_END, rx_id),
                },
            ))
        } else {
            None
        };
        let payload_timer = ctx.post_event(
            arrival.duration,
            vec![self.id],
            EventPayload::Timer {
                timer_id: timer_id(TIMER_PAYLOAD_END, rx_id),
            },
        );
        self.receptions.insert(
            rx_id,
            PendingReception {
                event,
                packet: arrival.packet.clone(),
                tx_vector: arrival.tx_vector,
                preamble: arrival.preamble,
                mpdu_type: arrival.mpdu_type,
                rx_power_w,
                header_timer,
                payload_timer,
                multi_user,
                dropped: false,
                header_ok: !arrival.preamble.is_present() && self.aggregation.plcp_success,
            },
        );
        tracing::debug!(
            "{}: receiving packet {} ({} bytes, {:.1} dBm) until {}",
            self.name,
            arrival.packet.uid,
            arrival.packet.size,
            w_to_dbm(rx_power_w),
            now + arrival.duration
        );
        self.after_state_change(ctx, previous);
    }

    /// End of the preamble and PLCP header of a reception.
    fn end_of_header(&mut self, ctx: &mut SimContext, rx_id: u64) {
        let Some(reception) = self.receptions.get_mut(&rx_id) else {
            return;
        };
        reception.header_timer = None;
        let reception = reception.clone();
        debug_assert!(
            reception.multi_user || self.state.is(PhyState::Receiving),
            "header decoded outside of a reception"
        );

        if let Some(header) = self.interference.calculate_plcp_header_snr_per(reception.event) {
            tracing::trace!(
                "{}: header of packet {} snr={:.2} per={:.3e}",
                self.name,
                reception.packet.uid,
                header.snr,
                header.per
            );
        }

        if !self.config.is_mode_supported(&reception.tx_vector.mode) {
            self.drop_rx(ctx, &reception.packet, DropReason::UnsupportedMode);
            self.aggregation.plcp_success = false;
            self.mark_dropped(rx_id);
            return;
        }

        let probability = self.config.header_success_probability;
        let decoded = probability >= 1.0 || ctx.rng().gen::<f64>() < probability;
        if let Some(reception) = self.receptions.get_mut(&rx_id) {
            reception.header_ok = decoded;
        }
        if decoded {
            self.aggregation.plcp_success = true;
            return;
        }

        self.drop_rx(ctx, &reception.packet, DropReason::HeaderFailed);
        match self.config.header_failure_policy {
            HeaderFailurePolicy::MarkSuccess => self.aggregation.plcp_success = true,
            HeaderFailurePolicy::MarkFailure => {
                self.aggregation.plcp_success = false;
                self.mark_dropped(rx_id);
            }
        }
    }

    fn mark_dropped(&mut self, rx_id: u64) {
        if let Some(reception) = self.receptions.get_mut(&rx_id) {
            reception.dropped = true;
        }
    }

    /// End of a reception: resolve the payload and close the window.
    fn end_receive(&mut self, ctx: &mut SimContext, rx_id: u64) {
        let Some(reception) = self.receptions.remove(&rx_id) else {
            return;
        };
        let now = ctx.time();
        let previous = self.state.state();
        debug_assert!(
            reception.multi_user || self.state.is(PhyState::Receiving),
            "payload resolved outside of a reception"
        );
        debug_assert_eq!(
            self.interference.event(reception.event).map(|e| e.end),
            Some(now),
            "payload end drifted from the tracked signal"
        );

        let snr_per = self.interference.calculate_plcp_payload_snr_per(reception.event);
        let closes_window = self.receptions.is_empty();
        if closes_window {
            self.interference.notify_rx_end(now);
        }

        match snr_per {
            _ if reception.dropped => {}
            None => {
                tracing::warn!("{}: signal of packet {} no longer tracked", self.name, reception.packet.uid);
                self.fail_reception(ctx, &reception, 0.0);
            }
            Some(snr_per) => {
                let per = if reception.packet.size < self.config.small_packet_threshold_bytes {
                    0.0
                } else {
                    snr_per.per
                };
                metrics::histogram!(metric_defs::PHY_RX_SNR.name, &self.metric_labels.to_labels())
                    .record(10.0 * snr_per.snr.log10());
                let gated = self.config.aggregate_decode_policy == AggregateDecodePolicy::PerSubframe
                    && !reception.header_ok;
                if !gated && ctx.rng().gen::<f64>() >= per {
                    self.complete_reception(ctx, &reception, snr_per.snr, per);
                } else {
                    self.fail_reception(ctx, &reception, snr_per.snr);
                }
            }
        }

        if !reception.preamble.is_present() && reception.mpdu_type == MpduType::LastInAggregate {
            self.aggregation.plcp_success = false;
        }

        if closes_window {
            self.state.switch_from_rx_end(now);
        }
        self.after_state_change(ctx, previous);
    }

    fn complete_reception(&mut self, ctx: &mut SimContext, reception: &PendingReception, snr: f64, per: f64) {
        tracing::debug!("{}: received packet {} (snr {:.1} dB)", self.name, reception.packet.uid, 10.0 * snr.log10());
        metrics::counter!(metric_defs::PHY_RX_OK.name, &self.metric_labels.to_labels()).increment(1);
        let signal_dbm = w_to_dbm(reception.rx_power_w);
        let noise_dbm = w_to_dbm(reception.rx_power_w / snr) - self.interference.noise_figure_db();
        let record = self.monitor_record(
            &reception.packet,
            &reception.tx_vector,
            self.aggregation.reference_number,
            Some(signal_dbm),
            Some(noise_dbm),
        );
        self.notify(ctx, PhyNotification::MonitorSniffRx(record));
        self.notify(
            ctx,
            PhyNotification::RxEndOk {
                packet: reception.packet.clone(),
                snr,
                per,
                tx_vector: reception.tx_vector,
            },
        );
    }

    fn fail_reception(&mut self, ctx: &mut SimContext, reception: &PendingReception, snr: f64) {
        metrics::counter!(metric_defs::PHY_RX_ERROR.name, &self.metric_labels.to_labels()).increment(1);
        self.drop_rx(ctx, &reception.packet, DropReason::DecodeFailed);
        self.notify(
            ctx,
            PhyNotification::RxEndError {
                packet: reception.packet.clone(),
                snr,
            },
        );
    }

    /// Cancel every in-flight reception and close the reception window.
    fn abort_receptions(&mut self, ctx: &mut SimContext) {
        let now = ctx.time();
        for (_, reception) in std::mem::take(&mut self.receptions) {
            if let Some(id) = reception.header_timer {
                ctx.cancel(id);
            }
            ctx.cancel(reception.payload_timer);
            tracing::debug!("{}: abandoning reception of packet {}", self.name, reception.packet.uid);
        }
        self.interference.notify_rx_end(now);
        self.state.abort_rx(now);
        self.state.switch_from_rx_end(now);
    }

    // ========================================================================
    // Transmit pipeline
    // ========================================================================

    /// Data rate in 500 kb/s units, or 128 + MCS for HT and later.
    fn data_rate_500kbps(tx_vector: &TxVector) -> u32 {
        if tx_vector.mode.class.uses_mcs() {
            128 + tx_vector.mode.mcs as u32
        } else {
            (tx_vector.data_rate_bps() / 500_000) as u32
        }
    }

    fn monitor_record(
        &self,
        packet: &WifiPacket,
        tx_vector: &TxVector,
        ampdu_reference: u32,
        signal_dbm: Option<f64>,
        noise_dbm: Option<f64>,
    ) -> MonitorRecord {
        MonitorRecord {
            packet: packet.clone(),
            frequency_mhz: self.config.frequency_mhz,
            channel_number: self.config.channel_number,
            data_rate_500kbps: Self::data_rate_500kbps(tx_vector),
            tx_vector: *tx_vector,
            ampdu_reference,
            signal_dbm,
            noise_dbm,
        }
    }

    fn end_ru_transmission(&mut self, ru: u8) {
        self.rus.set_txing(ru, false);
        tracing::trace!("{}: RU {} free, {} still busy", self.name, ru, self.rus.busy_tx_count());
    }

    // ========================================================================
    // Retuning and sleep
    // ========================================================================

    /// Post `request` to this PHY once the current activity ends, replacing
    /// any earlier request in the same slot.
    fn defer(&mut self, ctx: &mut SimContext, slot: DeferredSlot, request: PhyControlEvent) {
        let delay = self.state.delay_until_idle(ctx.time());
        let id = ctx.post_event(delay, vec![self.id], EventPayload::PhyControl(request));
        let previous = match slot {
            DeferredSlot::Switch => self.deferred_switch.replace(id),
            DeferredSlot::Sleep => self.deferred_sleep.replace(id),
        };
        if let Some(previous) = previous {
            ctx.cancel(previous);
        }
        tracing::debug!("{}: {:?} deferred by {}", self.name, request, delay);
    }

    fn retune(&mut self, ctx: &mut SimContext, request: PhyControlEvent, channel_number: u16, frequency_mhz: u16) {
        if channel_number == self.config.channel_number && frequency_mhz == self.config.frequency_mhz {
            tracing::debug!("{}: already on channel {}", self.name, channel_number);
            return;
        }
        match self.state.state() {
            PhyState::Transmitting | PhyState::Switching => {
                self.defer(ctx, DeferredSlot::Switch, request);
                return;
            }
            PhyState::Sleeping => {
                tracing::debug!("{}: channel switch ignored in sleep mode", self.name);
                return;
            }
            PhyState::Receiving | PhyState::Idle | PhyState::CcaBusy => {
                if !self.receptions.is_empty() {
                    self.abort_receptions(ctx);
                }
            }
        }

        let previous = self.state.state();
        let now = ctx.time();
        self.state.switch_to_channel_switching(now, self.config.channel_switch_delay);
        self.interference.erase_events();
        self.aggregation.reset();
        self.config.channel_number = channel_number;
        self.config.frequency_mhz = frequency_mhz;
        tracing::debug!("{}: switching to channel {} ({} MHz)", self.name, channel_number, frequency_mhz);
        ctx.post_immediate(
            vec![self.config.channel_entity],
            EventPayload::PhyRetuned(PhyRetunedEvent {
                phy: self.id,
                channel_number,
            }),
        );
        self.after_state_change(ctx, previous);
    }

    fn handle_control(&mut self, ctx: &mut SimContext, event_id: EventId, request: PhyControlEvent) {
        if self.deferred_switch == Some(event_id) {
            self.deferred_switch = None;
        }
        if self.deferred_sleep == Some(event_id) {
            self.deferred_sleep = None;
        }
        match request {
            PhyControlEvent::SetChannelNumber(channel_number) => self.set_channel_number(ctx, channel_number),
            PhyControlEvent::SetFrequency(frequency_mhz) => self.set_frequency(ctx, frequency_mhz),
            PhyControlEvent::SetSleepMode => self.set_sleep_mode(ctx),
            PhyControlEvent::ResumeFromSleep => self.resume_from_sleep(ctx),
            PhyControlEvent::ListenOnResourceUnit(ru) => self.listen_on_resource_unit(ru),
            PhyControlEvent::AllocateTxResourceUnit(ru) => self.allocate_tx_resource_unit(ru),
        }
    }

    fn handle_timer(&mut self, ctx: &mut SimContext, event_id: EventId, id: u64) {
        let value = id & TIMER_VALUE_MASK;
        match id >> TIMER_KIND_SHIFT {
            TIMER_STATE_DEADLINE => {
                if self.state_timer.map(|(timer, _)| timer) != Some(event_id) {
                    return;
                }
                self.state_timer = None;
                self.settle_expired_state(ctx);
            }
            TIMER_HEADER_END => self.end_of_header(ctx, value),
            TIMER_PAYLOAD_END => self.end_receive(ctx, value),
            TIMER_RU_TX_END => self.end_ru_transmission(value as u8),
            kind => tracing::warn!("{}: unknown timer kind {}", self.name, kind),
        }
    }
}

impl WifiPhy for HePhy {
    fn state(&self) -> PhyState {
        self.state.state()
    }

    fn channel_number(&self) -> u16 {
        self.config.channel_number
    }

    fn frequency_mhz(&self) -> u16 {
        self.config.frequency_mhz
    }

    fn send_packet(&mut self, ctx: &mut SimContext, request: PhyTxRequestEvent) {
        let now = ctx.time();
        let previous = self.state.state();
        let PhyTxRequestEvent {
            packet,
            mut tx_vector,
            preamble,
            mpdu_type,
        } = request;
        tx_vector.color = self.config.color;

        if self.state.is(PhyState::Sleeping) {
            self.drop_tx(ctx, packet, DropReason::Sleeping);
            return;
        }

        let mut marked_ru = None;
        if let Some(ru) = tx_vector.ru {
            if !self.state.is(PhyState::Receiving) && !self.rus.is_txing_on(ru.index) {
                self.rus.set_txing(ru.index, true);
                marked_ru = Some(ru.index);
            }
        }
        let completes_set =
            tx_vector.is_full_channel() || (self.rus.is_last_ru_tx() && !self.state.is(PhyState::Transmitting));

        if completes_set {
            debug_assert!(!self.state.is(PhyState::Transmitting), "transmit while already transmitting");
            debug_assert!(!self.state.is(PhyState::Switching), "transmit while switching channel");
            let refused = match self.state.state() {
                PhyState::Transmitting => Some(DropReason::AlreadyTransmitting),
                PhyState::Switching => Some(DropReason::Switching),
                _ => None,
            };
            if let Some(reason) = refused {
                if let Some(ru) = marked_ru {
                    self.rus.set_txing(ru, false);
                }
                self.drop_tx(ctx, packet, reason);
                return;
            }
        }

        let duration = calculate_tx_duration(packet.size, &tx_vector, preamble, self.config.frequency_mhz, mpdu_type);
        debug_assert!(!duration.is_zero(), "zero transmission duration");
        if duration.is_zero() {
            if let Some(ru) = marked_ru {
                self.rus.set_txing(ru, false);
            }
            self.drop_tx(ctx, packet, DropReason::InvalidDuration);
            return;
        }

        if !self.receptions.is_empty() {
            self.abort_receptions(ctx);
        }

        let labels = self.metric_labels.to_labels();
        metrics::counter!(metric_defs::PHY_TX_PACKETS.name, &labels).increment(1);
        metrics::counter!(metric_defs::PHY_TX_AIRTIME.name, &labels).increment(duration.as_micros());
        self.notify(
            ctx,
            PhyNotification::TxBegin {
                packet: packet.clone(),
                duration,
            },
        );

        if mpdu_type.is_aggregated() && preamble.is_present() {
            self.tx_ampdu_reference = self.tx_ampdu_reference.wrapping_add(1);
        }
        let record = self.monitor_record(&packet, &tx_vector, self.tx_ampdu_reference, None, None);
        self.notify(ctx, PhyNotification::MonitorSniffTx(record));

        if completes_set {
            self.state.switch_to_tx(now, duration);
        }

        let tx_power_dbm = self.config.power_dbm(tx_vector.tx_power_level) + self.config.tx_gain_db;
        tracing::debug!(
            "{}: sending packet {} ({} bytes, {}) for {} at {:.1} dBm",
            self.name,
            packet.uid,
            packet.size,
            tx_vector.mode,
            duration,
            tx_power_dbm
        );
        ctx.post_immediate(
            vec![self.config.channel_entity],
            EventPayload::ChannelTransmit(ChannelTransmitEvent {
                sender: self.id,
                packet,
                tx_power_dbm,
                tx_vector,
                preamble,
                mpdu_type,
                duration,
                channel_number: self.config.channel_number,
            }),
        );

        if let Some(ru) = tx_vector.ru {
            ctx.post_event(
                duration,
                vec![self.id],
                EventPayload::Timer {
                    timer_id: timer_id(TIMER_RU_TX_END, ru.index as u64),
                },
            );
        }
        self.after_state_change(ctx, previous);
    }

    fn start_receive_preamble_and_header(&mut self, ctx: &mut SimContext, arrival: &SignalArrivalEvent) {
        let now = ctx.time();
        let rx_power_w = dbm_to_w(arrival.rx_power_dbm + self.config.rx_gain_db);
        let event = self.interference.add(
            now,
            arrival.packet.size,
            arrival.tx_vector,
            arrival.preamble,
            arrival.duration,
            rx_power_w,
        );

        if self.is_foreign_bss(&arrival.tx_vector) {
            self.drop_rx(ctx, &arrival.packet, DropReason::ForeignBss);
            self.maybe_cca_busy(ctx, &arrival.tx_vector);
            return;
        }

        let mut effective = self.state.state();
        let mut multi_user = false;
        if let Some(ru) = arrival.tx_vector.ru {
            if !self.rus.is_rxing_on(ru.index) {
                self.drop_rx(ctx, &arrival.packet, DropReason::UnexpectedResourceUnit);
                return;
            }
            if self.config.role.is_access_point() {
                effective = PhyState::Idle;
                multi_user = true;
            }
        }

        match effective {
            PhyState::Switching => self.drop_while_busy(ctx, arrival, DropReason::Switching, true),
            PhyState::Receiving => self.drop_while_busy(ctx, arrival, DropReason::AlreadyReceiving, false),
            PhyState::Transmitting => self.drop_while_busy(ctx, arrival, DropReason::AlreadyTransmitting, false),
            PhyState::Sleeping => {
                self.drop_rx(ctx, &arrival.packet, DropReason::Sleeping);
                self.aggregation.plcp_success = false;
            }
            PhyState::Idle | PhyState::CcaBusy => {
                if rx_power_w <= dbm_to_w(self.config.ed_threshold_dbm) {
                    self.drop_rx(ctx, &arrival.packet, DropReason::LowPower);
                    self.aggregation.plcp_success = false;
                    self.maybe_cca_busy(ctx, &arrival.tx_vector);
                    return;
                }
                let remaining = arrival.packet.ampdu.map(|tag| tag.remaining_mpdus);
                if self.aggregation.on_arrival(arrival.preamble.is_present(), remaining) == AggregationVerdict::Drop {
                    self.drop_rx(ctx, &arrival.packet, DropReason::NoPreambleContext);
                    self.maybe_cca_busy(ctx, &arrival.tx_vector);
                    return;
                }
                self.begin_reception(ctx, arrival, event, rx_power_w, multi_user);
            }
        }
    }

    fn set_channel_number(&mut self, ctx: &mut SimContext, channel_number: u16) {
        let frequency_mhz = channel_to_frequency_mhz(channel_number);
        self.retune(ctx, PhyControlEvent::SetChannelNumber(channel_number), channel_number, frequency_mhz);
    }

    fn set_frequency(&mut self, ctx: &mut SimContext, frequency_mhz: u16) {
        let channel_number = frequency_to_channel(frequency_mhz);
        self.retune(ctx, PhyControlEvent::SetFrequency(frequency_mhz), channel_number, frequency_mhz);
    }

    fn set_sleep_mode(&mut self, ctx: &mut SimContext) {
        match self.state.state() {
            PhyState::Transmitting | PhyState::Receiving | PhyState::Switching => {
                self.defer(ctx, DeferredSlot::Sleep, PhyControlEvent::SetSleepMode);
            }
            PhyState::Idle | PhyState::CcaBusy => {
                let previous = self.state.state();
                self.state.switch_to_sleep(ctx.time());
                tracing::debug!("{}: sleeping", self.name);
                self.after_state_change(ctx, previous);
            }
            PhyState::Sleeping => tracing::debug!("{}: already sleeping", self.name),
        }
    }

    fn resume_from_sleep(&mut self, ctx: &mut SimContext) {
        if !self.state.is(PhyState::Sleeping) {
            tracing::debug!("{}: resume ignored in state {}", self.name, self.state.state().as_label());
            return;
        }
        let now = ctx.time();
        let previous = self.state.state();
        let busy = self.interference.energy_duration(now, dbm_to_w(self.config.cca_mode1_threshold_dbm));
        self.state.switch_from_sleep(now, busy);
        tracing::debug!("{}: resuming, medium busy for {}", self.name, busy);
        self.after_state_change(ctx, previous);
    }
}

impl Entity for HePhy {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        match &event.payload {
            EventPayload::SignalArrival(arrival) => {
                self.settle_expired_state(ctx);
                self.start_receive_preamble_and_header(ctx, arrival);
            }
            EventPayload::PhyTxRequest(request) => {
                self.settle_expired_state(ctx);
                self.send_packet(ctx, request.clone());
            }
            EventPayload::PhyControl(request) => {
                self.settle_expired_state(ctx);
                self.handle_control(ctx, event.id, *request);
            }
            EventPayload::Timer { timer_id } => self.handle_timer(ctx, event.id, *timer_id),
            EventPayload::SimulationEnd => {
                self.state.flush_residency(ctx.time());
            }
            _ => {}
        }
        Ok(())
    }
}
