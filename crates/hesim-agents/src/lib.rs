//! # hesim-agents
//!
//! Upper-layer drivers for HESim PHYs.
//!
//! This crate provides:
//!
//! - [`TrafficAgent`] - A periodic traffic source that hands frames to its PHY.
//!   Frames are sent as single MPDUs, as A-MPDU bursts, or on a resource unit.
//!
//! - [`ControlAgent`] - A scripted agent that issues PHY control requests
//!   (sleep, resume, channel and frequency switches, RU setup) at fixed times.
//!
//! Neither agent models a MAC: there is no contention, no acknowledgement and
//! no retransmission. They exist to exercise the PHY in whole simulations.

pub mod control_agent;

pub use control_agent::{ControlAction, ControlAgent, ControlAgentConfig, ScheduledAction};

use hesim_common::{
    Entity, EntityId, Event, EventPayload, MpduType, PhyControlEvent, PhyIndicationEvent, PhyNotification, PhyState,
    PhyTxRequestEvent, ResourceUnit, RuSize, SimContext, SimError, SimTime, TxVector, WifiMode, WifiPacket,
    WifiPreamble,
};
use hesim_metrics::{metric_defs, metrics, MetricLabels};
use hesim_phy::calculate_tx_duration;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

// ============================================================================
// Configuration Types
// ============================================================================

/// How a traffic agent shapes its frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum TrafficPattern {
    /// One standalone MPDU per interval.
    #[default]
    Single,
    /// An A-MPDU burst of `subframes` MPDUs per interval.
    Ampdu {
        /// Number of subframes in each burst.
        subframes: u16,
    },
    /// One frame per interval on an uplink resource unit.
    ResourceUnit {
        /// RU index.
        index: u8,
        /// RU size.
        size: RuSize,
    },
}

/// Configuration for a periodic traffic source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrafficConfig {
    /// Whether the agent sends anything.
    pub enabled: bool,
    /// Wait time before the first frame.
    pub startup_s: f64,
    /// Standard deviation of the startup wait.
    pub startup_jitter_s: f64,
    /// Interval between frames (or bursts).
    pub interval_s: f64,
    /// Standard deviation of the interval.
    pub interval_jitter_s: f64,
    /// Frame size in bytes (per subframe for bursts).
    pub packet_size: u32,
    /// HE MCS index.
    pub mcs: u8,
    /// Number of spatial streams.
    pub nss: u8,
    /// Channel width in MHz.
    pub channel_width_mhz: u16,
    /// Use the short guard interval.
    pub short_guard_interval: bool,
    /// Transmit power level.
    pub tx_power_level: u8,
    /// Frame shape.
    pub pattern: TrafficPattern,
    /// Stop after this many frames (or bursts). `None` sends until shutdown.
    pub packet_count: Option<u32>,
    /// Stop sending at this simulation time.
    pub shutdown_s: Option<f64>,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        TrafficConfig {
            enabled: true,
            startup_s: 0.001,
            startup_jitter_s: 0.0,
            interval_s: 0.01,
            interval_jitter_s: 0.0,
            packet_size: 1000,
            mcs: 7,
            nss: 1,
            channel_width_mhz: 20,
            short_guard_interval: false,
            tx_power_level: 0,
            pattern: TrafficPattern::Single,
            packet_count: None,
            shutdown_s: None,
        }
    }
}

impl TrafficConfig {
    /// Transmission descriptor for this agent's frames.
    pub fn tx_vector(&self) -> TxVector {
        let tx_vector = TxVector::new(WifiMode::he(self.mcs))
            .with_channel_width(self.channel_width_mhz)
            .with_nss(self.nss)
            .with_short_guard_interval(self.short_guard_interval)
            .with_power_level(self.tx_power_level);
        match self.pattern {
            TrafficPattern::ResourceUnit { index, size } => tx_vector.with_ru(ResourceUnit::new(index, size)),
            _ => tx_vector,
        }
    }
}

// ============================================================================
// Agent Entity
// ============================================================================

/// Timer IDs.
const TIMER_STARTUP: u64 = 1;
const TIMER_INTERVAL: u64 = 2;
const TIMER_SHUTDOWN: u64 = 3;

/// Counters kept by a traffic agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficStats {
    /// Frames handed to the PHY, counting each subframe.
    pub frames_sent: u64,
    /// Transmissions the PHY started.
    pub tx_begun: u64,
    /// Transmit requests the PHY refused.
    pub tx_dropped: u64,
    /// Frames received without error.
    pub rx_ok: u64,
    /// Frames received with errors.
    pub rx_error: u64,
}

/// A periodic traffic source driving one PHY.
pub struct TrafficAgent {
    id: EntityId,
    name: String,
    phy: EntityId,
    frequency_mhz: u16,
    config: TrafficConfig,
    metric_labels: MetricLabels,

    /// Last PHY state reported through notifications.
    phy_state: PhyState,
    /// A send came due while the PHY could not accept it.
    send_pending: bool,
    bursts_sent: u32,
    next_sequence: u32,
    stopped: bool,
    stats: TrafficStats,
}

impl TrafficAgent {
    /// Create a traffic agent for `phy`, tuned to `frequency_mhz`.
    pub fn new(id: EntityId, name: String, phy: EntityId, frequency_mhz: u16, config: TrafficConfig) -> Self {
        let metric_labels = MetricLabels::new(name.clone(), "agent");
        TrafficAgent {
            id,
            name,
            phy,
            frequency_mhz,
            config,
            metric_labels,
            phy_state: PhyState::Idle,
            send_pending: false,
            bursts_sent: 0,
            next_sequence: 0,
            stopped: false,
            stats: TrafficStats::default(),
        }
    }

    /// Replace the metric labels.
    pub fn with_metric_labels(mut self, labels: MetricLabels) -> Self {
        self.metric_labels = labels;
        self
    }

    /// Agent name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The PHY this agent drives.
    pub fn phy(&self) -> EntityId {
        self.phy
    }

    /// Counters so far.
    pub fn stats(&self) -> TrafficStats {
        self.stats
    }

    /// Events that start the agent: the startup timer, the shutdown timer
    /// and, for RU traffic, the RU allocation on the PHY.
    pub fn initial_events(&self, rng: &mut ChaCha8Rng) -> Vec<(SimTime, EntityId, EventPayload)> {
        let mut events = Vec::new();
        if !self.config.enabled {
            return events;
        }
        if let TrafficPattern::ResourceUnit { index, .. } = self.config.pattern {
            events.push((
                SimTime::ZERO,
                self.phy,
                EventPayload::PhyControl(PhyControlEvent::AllocateTxResourceUnit(index)),
            ));
        }
        let startup = jittered_delay(rng, self.config.startup_s, self.config.startup_jitter_s);
        events.push((startup, self.id, EventPayload::Timer { timer_id: TIMER_STARTUP }));
        if let Some(shutdown_s) = self.config.shutdown_s {
            events.push((
                SimTime::from_secs(shutdown_s),
                self.id,
                EventPayload::Timer {
                    timer_id: TIMER_SHUTDOWN,
                },
            ));
        }
        events
    }

    /// Whether the PHY can accept a transmit request right now.
    fn phy_accepts_tx(&self) -> bool {
        !matches!(self.phy_state, PhyState::Transmitting | PhyState::Switching)
    }

    fn schedule_next(&mut self, ctx: &mut SimContext) {
        if self.stopped {
            return;
        }
        if let Some(count) = self.config.packet_count {
            if self.bursts_sent >= count {
                debug!("Agent[{}]: sent all {} frames", self.name, count);
                self.stopped = true;
                return;
            }
        }
        let delay = jittered_delay(ctx.rng(), self.config.interval_s, self.config.interval_jitter_s);
        ctx.post_event(delay, vec![self.id], EventPayload::Timer { timer_id: TIMER_INTERVAL });
    }

    /// Send the next frame or burst, or wait for the PHY to free up.
    fn send_due(&mut self, ctx: &mut SimContext) {
        if self.stopped {
            return;
        }
        if !self.phy_accepts_tx() {
            trace!("Agent[{}]: PHY is {:?}, holding the next frame", self.name, self.phy_state);
            self.send_pending = true;
            return;
        }
        self.send_pending = false;
        self.send_burst(ctx);
        self.bursts_sent += 1;
        self.schedule_next(ctx);
    }

    /// Hand one frame or one whole A-MPDU burst to the PHY. Each subframe is
    /// posted to start exactly when the previous one ends.
    fn send_burst(&mut self, ctx: &mut SimContext) {
        let tx_vector = self.config.tx_vector();
        let subframes = match self.config.pattern {
            TrafficPattern::Ampdu { subframes } => subframes.max(1),
            _ => 1,
        };

        let mut offset = SimTime::ZERO;
        for index in 0..subframes {
            let (preamble, mpdu_type) = subframe_shape(index, subframes);
            let mut packet = WifiPacket::new(self.next_uid(), self.config.packet_size);
            if subframes > 1 {
                packet = packet.with_ampdu(subframes - 1 - index);
            }
            let duration =
                calculate_tx_duration(packet.size, &tx_vector, preamble, self.frequency_mhz, mpdu_type);
            trace!(
                "Agent[{}]: frame {} ({:?}) at +{}, {} on air",
                self.name,
                packet.uid,
                mpdu_type,
                offset,
                duration
            );
            ctx.post_event(
                offset,
                vec![self.phy],
                EventPayload::PhyTxRequest(PhyTxRequestEvent {
                    packet,
                    tx_vector,
                    preamble,
                    mpdu_type,
                }),
            );
            offset = offset + duration;
        }

        self.stats.frames_sent += subframes as u64;
        metrics::counter!(metric_defs::AGENT_TX_REQUESTS.name, &self.metric_labels.to_labels())
            .increment(subframes as u64);
        debug!(
            "Agent[{}]: sent {} frame(s), burst #{}",
            self.name,
            subframes,
            self.bursts_sent + 1
        );
    }

    /// Packet UIDs are unique across agents: the agent ID in the high bits.
    fn next_uid(&mut self) -> u64 {
        let uid = (self.id.0 << 32) | self.next_sequence as u64;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        uid
    }

    fn handle_indication(&mut self, ctx: &mut SimContext, indication: &PhyIndicationEvent) {
        if indication.phy != self.phy {
            warn!("Agent[{}]: indication from foreign PHY {:?}", self.name, indication.phy);
            return;
        }
        match &indication.notification {
            PhyNotification::StateChanged { state } => {
                self.phy_state = *state;
                if self.send_pending && self.phy_accepts_tx() {
                    self.send_due(ctx);
                }
            }
            PhyNotification::TxBegin { .. } => self.stats.tx_begun += 1,
            PhyNotification::TxDrop { packet, reason } => {
                self.stats.tx_dropped += 1;
                debug!("Agent[{}]: frame {} refused: {}", self.name, packet.uid, reason.as_label());
            }
            PhyNotification::RxEndOk { .. } => self.stats.rx_ok += 1,
            PhyNotification::RxEndError { .. } => self.stats.rx_error += 1,
            _ => {}
        }
    }
}

/// Preamble and aggregation position of subframe `index` in a burst of `count`.
fn subframe_shape(index: u16, count: u16) -> (WifiPreamble, MpduType) {
    if count <= 1 {
        return (WifiPreamble::HeSu, MpduType::Normal);
    }
    if index == 0 {
        (WifiPreamble::HeSu, MpduType::FirstInAggregate)
    } else if index + 1 == count {
        (WifiPreamble::None, MpduType::LastInAggregate)
    } else {
        (WifiPreamble::None, MpduType::MiddleInAggregate)
    }
}

/// Delay drawn from a normal distribution around `base_s`, never negative.
pub(crate) fn jittered_delay(rng: &mut ChaCha8Rng, base_s: f64, jitter_s: f64) -> SimTime {
    let delay = match Normal::new(base_s, jitter_s) {
        Ok(normal) if jitter_s > 0.0 => normal.sample(rng).max(0.0),
        _ => base_s.max(0.0),
    };
    SimTime::from_secs(delay)
}

impl Entity for TrafficAgent {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        match &event.payload {
            EventPayload::Timer { timer_id } => match *timer_id {
                TIMER_STARTUP | TIMER_INTERVAL => self.send_due(ctx),
                TIMER_SHUTDOWN => {
                    debug!("Agent[{}]: shutting down", self.name);
                    self.stopped = true;
                }
                other => warn!("Agent[{}]: unknown timer {}", self.name, other),
            },
            EventPayload::PhyIndication(indication) => self.handle_indication(ctx, indication),
            EventPayload::SimulationEnd => {
                debug!("Agent[{}]: finished with {:?}", self.name, self.stats);
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn agent(config: TrafficConfig) -> TrafficAgent {
        TrafficAgent::new(EntityId(10), "sta1-traffic".to_string(), EntityId(1), 5180, config)
    }

    fn timer(timer_id: u64) -> Event {
        Event {
            id: hesim_common::EventId(0),
            time: SimTime::ZERO,
            source: EntityId(10),
            targets: vec![EntityId(10)],
            payload: EventPayload::Timer { timer_id },
        }
    }

    fn indication(notification: PhyNotification) -> Event {
        Event {
            id: hesim_common::EventId(0),
            time: SimTime::ZERO,
            source: EntityId(1),
            targets: vec![EntityId(10)],
            payload: EventPayload::PhyIndication(PhyIndicationEvent {
                phy: EntityId(1),
                notification,
            }),
        }
    }

    fn tx_requests(events: &[Event]) -> Vec<(SimTime, &PhyTxRequestEvent)> {
        events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::PhyTxRequest(request) => Some((e.time, request)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_frame_and_next_timer() {
        let mut agent = agent(TrafficConfig::default());
        let mut ctx = SimContext::new(1);
        agent.handle_event(&timer(TIMER_STARTUP), &mut ctx).unwrap();

        let events = ctx.take_pending_events();
        let requests = tx_requests(&events);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1.mpdu_type, MpduType::Normal);
        assert_eq!(requests[0].1.preamble, WifiPreamble::HeSu);
        assert_eq!(requests[0].1.packet.uid, 10 << 32);
        assert!(events
            .iter()
            .any(|e| e.time == SimTime::from_millis(10) && matches!(e.payload, EventPayload::Timer { timer_id: TIMER_INTERVAL })));
    }

    #[test]
    fn test_ampdu_subframes_start_back_to_back() {
        let config = TrafficConfig {
            pattern: TrafficPattern::Ampdu { subframes: 3 },
            ..Default::default()
        };
        let tx_vector = config.tx_vector();
        let mut agent = agent(config);
        let mut ctx = SimContext::new(1);
        agent.handle_event(&timer(TIMER_STARTUP), &mut ctx).unwrap();

        let events = ctx.take_pending_events();
        let requests = tx_requests(&events);
        let shapes: Vec<(MpduType, WifiPreamble, Option<u16>)> = requests
            .iter()
            .map(|(_, r)| (r.mpdu_type, r.preamble, r.packet.ampdu.map(|t| t.remaining_mpdus)))
            .collect();
        assert_eq!(
            shapes,
            vec![
                (MpduType::FirstInAggregate, WifiPreamble::HeSu, Some(2)),
                (MpduType::MiddleInAggregate, WifiPreamble::None, Some(1)),
                (MpduType::LastInAggregate, WifiPreamble::None, Some(0)),
            ]
        );
        let first = calculate_tx_duration(1000, &tx_vector, WifiPreamble::HeSu, 5180, MpduType::FirstInAggregate);
        let middle = calculate_tx_duration(1000, &tx_vector, WifiPreamble::None, 5180, MpduType::MiddleInAggregate);
        assert_eq!(requests[0].0, SimTime::ZERO);
        assert_eq!(requests[1].0, first);
        assert_eq!(requests[2].0, first + middle);
        assert_eq!(agent.stats().frames_sent, 3);
    }

    #[test]
    fn test_holds_frame_while_phy_transmits() {
        let mut agent = agent(TrafficConfig::default());
        let mut ctx = SimContext::new(1);
        agent
            .handle_event(&indication(PhyNotification::StateChanged { state: PhyState::Switching }), &mut ctx)
            .unwrap();
        agent.handle_event(&timer(TIMER_INTERVAL), &mut ctx).unwrap();
        assert!(tx_requests(&ctx.take_pending_events()).is_empty());

        agent
            .handle_event(&indication(PhyNotification::StateChanged { state: PhyState::Idle }), &mut ctx)
            .unwrap();
        assert_eq!(tx_requests(&ctx.take_pending_events()).len(), 1);
    }

    #[test]
    fn test_packet_count_and_shutdown_stop_sending() {
        let mut limited = agent(TrafficConfig {
            packet_count: Some(1),
            ..Default::default()
        });
        let mut ctx = SimContext::new(1);
        limited.handle_event(&timer(TIMER_STARTUP), &mut ctx).unwrap();
        let events = ctx.take_pending_events();
        assert_eq!(tx_requests(&events).len(), 1);
        assert!(!events.iter().any(|e| matches!(e.payload, EventPayload::Timer { .. })));

        let mut stopped = agent(TrafficConfig::default());
        stopped.handle_event(&timer(TIMER_SHUTDOWN), &mut ctx).unwrap();
        stopped.handle_event(&timer(TIMER_INTERVAL), &mut ctx).unwrap();
        assert!(ctx.take_pending_events().is_empty());
    }

    #[test]
    fn test_initial_events_allocate_resource_unit() {
        let agent = agent(TrafficConfig {
            pattern: TrafficPattern::ResourceUnit {
                index: 3,
                size: RuSize::Tones52,
            },
            shutdown_s: Some(1.0),
            ..Default::default()
        });
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let events = agent.initial_events(&mut rng);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[0].2,
            EventPayload::PhyControl(PhyControlEvent::AllocateTxResourceUnit(3))
        ));
        assert_eq!(events[1].0, SimTime::from_millis(1));
        assert_eq!(events[2].0, SimTime::from_secs(1.0));
        assert_eq!(agent.config.tx_vector().ru, Some(ResourceUnit::new(3, RuSize::Tones52)));
    }

    #[test]
    fn test_counts_indications() {
        let mut agent = agent(TrafficConfig::default());
        let mut ctx = SimContext::new(1);
        let packet = WifiPacket::new(5, 100);
        agent
            .handle_event(
                &indication(PhyNotification::TxDrop {
                    packet: packet.clone(),
                    reason: hesim_common::DropReason::Sleeping,
                }),
                &mut ctx,
            )
            .unwrap();
        agent
            .handle_event(&indication(PhyNotification::RxEndError { packet, snr: 0.5 }), &mut ctx)
            .unwrap();
        assert_eq!(agent.stats().tx_dropped, 1);
        assert_eq!(agent.stats().rx_error, 1);
    }

    #[test]
    fn test_config_from_yaml() {
        let config: TrafficConfig = serde_yaml::from_str(
            "interval_s: 0.002\npacket_size: 300\npattern:\n  type: resource_unit\n  index: 1\n  size: \"106\"\n",
        )
        .unwrap();
        assert_eq!(config.packet_size, 300);
        assert_eq!(config.mcs, 7);
        assert_eq!(
            config.pattern,
            TrafficPattern::ResourceUnit {
                index: 1,
                size: RuSize::Tones106
            }
        );
        assert!(serde_yaml::from_str::<TrafficConfig>("interval: 1.0\n").is_err());
    }

    #[test]
    fn test_jittered_delay_never_negative() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let draws: Vec<SimTime> = (0..100).map(|_| jittered_delay(&mut rng, 0.0001, 0.01)).collect();
        assert!(draws.iter().any(|d| d.is_zero()));
        assert!(draws.iter().any(|d| !d.is_zero()));
        assert_eq!(jittered_delay(&mut rng, 0.5, 0.0), SimTime::from_millis(500));
        assert_eq!(jittered_delay(&mut rng, -1.0, 0.0), SimTime::ZERO);
    }
}
