//! End-to-end PHY scenarios driven through the event queue.

use hesim_common::{
    DropReason, Entity, EntityId, Event, EventId, EventPayload, EventQueue, MpduType, PhyControlEvent,
    PhyNotification, PhyState, PhyTxRequestEvent, Position, ResourceUnit, RuSize, SignalArrivalEvent, SimContext,
    SimTime, TxVector, WifiMode, WifiPacket, WifiPreamble,
};
use hesim_phy::{
    calculate_tx_duration, AggregateDecodePolicy, ConstantSpeedPropagationDelayModel, ErrorRateModel,
    HeaderFailurePolicy, HePhy, HePhyConfig, LogDistancePropagationLossModel, NistErrorRateModel, NotificationLog,
    RecordingObserver, StationRole, WifiChannel, WifiPhy,
};

const CHANNEL_ID: EntityId = EntityId(100);

fn us(v: u64) -> SimTime {
    SimTime::from_micros(v)
}

/// Small event loop owning concrete PHYs so tests can inspect them.
struct Harness {
    queue: EventQueue,
    ctx: SimContext,
    channel: WifiChannel,
    phys: Vec<HePhy>,
    logs: Vec<NotificationLog>,
}

impl Harness {
    fn new() -> Self {
        Harness {
            queue: EventQueue::new(),
            ctx: SimContext::new(42),
            channel: WifiChannel::new(
                CHANNEL_ID,
                Box::new(LogDistancePropagationLossModel::default()),
                Box::new(ConstantSpeedPropagationDelayModel::default()),
            ),
            phys: Vec::new(),
            logs: Vec::new(),
        }
    }

    /// Add a PHY at `x` meters and return its index.
    fn add_phy(&mut self, x: f64, config: HePhyConfig) -> usize {
        self.add_phy_with_error_rate_model(x, config, Box::new(NistErrorRateModel))
    }

    fn add_phy_with_error_rate_model(&mut self, x: f64, config: HePhyConfig, model: Box<dyn ErrorRateModel>) -> usize {
        let index = self.phys.len();
        let id = EntityId(index as u64 + 1);
        let observer = RecordingObserver::new();
        self.logs.push(observer.log());
        let config = HePhyConfig {
            channel_entity: CHANNEL_ID,
            ..config
        };
        self.channel.add(id, Position::new(x, 0.0, 0.0), config.channel_number);
        self.phys.push(HePhy::with_error_rate_model(
            id,
            format!("sta{}", index),
            config,
            Box::new(observer),
            model,
        ));
        index
    }

    fn id(&self, index: usize) -> EntityId {
        self.phys[index].entity_id()
    }

    fn schedule(&mut self, at: SimTime, target: EntityId, payload: EventPayload) {
        let id = EventId(self.ctx.next_event_id());
        self.queue.push(Event {
            id,
            time: at,
            source: EntityId(0),
            targets: vec![target],
            payload,
        });
    }

    fn transmit(&mut self, at: SimTime, index: usize, uid: u64, size: u32, tx_vector: TxVector) {
        let target = self.id(index);
        self.schedule(
            at,
            target,
            EventPayload::PhyTxRequest(PhyTxRequestEvent {
                packet: WifiPacket::new(uid, size),
                tx_vector,
                preamble: WifiPreamble::HeSu,
                mpdu_type: MpduType::Normal,
            }),
        );
    }

    fn control(&mut self, at: SimTime, index: usize, request: PhyControlEvent) {
        let target = self.id(index);
        self.schedule(at, target, EventPayload::PhyControl(request));
    }

    fn inject(&mut self, at: SimTime, index: usize, arrival: SignalArrivalEvent) {
        let target = self.id(index);
        self.schedule(at, target, EventPayload::SignalArrival(arrival));
    }

    fn run_until(&mut self, end: SimTime) {
        while let Some(time) = self.queue.peek_time() {
            if time > end {
                break;
            }
            let Some(event) = self.queue.pop() else { break };
            self.ctx.set_time(event.time);
            for target in &event.targets {
                self.ctx.set_source(*target);
                if *target == CHANNEL_ID {
                    self.channel.handle_event(&event, &mut self.ctx).unwrap();
                } else if let Some(phy) = self.phys.iter_mut().find(|p| p.entity_id() == *target) {
                    phy.handle_event(&event, &mut self.ctx).unwrap();
                }
            }
            self.queue.absorb(&mut self.ctx);
        }
        self.ctx.set_time(end);
    }

    fn states(&self, index: usize) -> Vec<(SimTime, PhyState)> {
        self.logs[index]
            .lock()
            .iter()
            .filter_map(|(t, n)| match n {
                PhyNotification::StateChanged { state } => Some((*t, *state)),
                _ => None,
            })
            .collect()
    }

    fn labels(&self, index: usize) -> Vec<(SimTime, &'static str)> {
        self.logs[index].lock().iter().map(|(t, n)| (*t, n.as_label())).collect()
    }

    fn drop_reasons(&self, index: usize) -> Vec<(SimTime, DropReason)> {
        self.logs[index]
            .lock()
            .iter()
            .filter_map(|(t, n)| match n {
                PhyNotification::RxDrop { reason, .. } => Some((*t, *reason)),
                _ => None,
            })
            .collect()
    }

    fn count(&self, index: usize, label: &str) -> usize {
        self.labels(index).iter().filter(|(_, l)| *l == label).count()
    }
}

/// Error-rate model with a fixed chunk success rate.
struct FixedSuccessRate(f64);

impl ErrorRateModel for FixedSuccessRate {
    fn chunk_success_rate(&self, _mode: WifiMode, _tx_vector: &TxVector, _snr: f64, _nbits: u64) -> f64 {
        self.0
    }
}

fn arrival(uid: u64, size: u32, dbm: f64, duration: SimTime) -> SignalArrivalEvent {
    SignalArrivalEvent {
        sender: EntityId(99),
        packet: WifiPacket::new(uid, size),
        rx_power_dbm: dbm,
        tx_vector: TxVector::new(WifiMode::he(0)),
        preamble: WifiPreamble::HeSu,
        mpdu_type: MpduType::Normal,
        duration,
    }
}

#[test]
fn test_unicast_reception_completes_at_signal_end() {
    let mut h = Harness::new();
    let sta = h.add_phy(
        0.0,
        HePhyConfig {
            ed_threshold_dbm: -82.0,
            ..Default::default()
        },
    );
    h.inject(SimTime::ZERO, sta, arrival(1, 1000, -70.0, us(200)));
    h.run_until(us(1000));

    assert_eq!(
        h.states(sta),
        vec![(SimTime::ZERO, PhyState::Receiving), (us(200), PhyState::Idle)]
    );
    let labels = h.labels(sta);
    assert!(labels.contains(&(SimTime::ZERO, "rx_begin")));
    assert!(labels.contains(&(us(200), "rx_ok")));
    assert!(labels.contains(&(us(200), "sniff_rx")));

    let residency = h.phys[sta].state_residency(us(1000));
    assert_eq!(residency["rx"], us(200));
    assert_eq!(residency["idle"], us(800));
}

#[test]
fn test_transmission_reaches_neighbor_through_channel() {
    let mut h = Harness::new();
    let a = h.add_phy(0.0, HePhyConfig::default());
    let b = h.add_phy(10.0, HePhyConfig::default());
    let tx_vector = TxVector::new(WifiMode::he(4));
    let duration = calculate_tx_duration(1500, &tx_vector, WifiPreamble::HeSu, 5180, MpduType::Normal);
    h.transmit(SimTime::ZERO, a, 7, 1500, tx_vector);
    h.run_until(us(10_000));

    assert_eq!(h.states(a), vec![(SimTime::ZERO, PhyState::Transmitting), (duration, PhyState::Idle)]);
    let ok: Vec<SimTime> = h
        .labels(b)
        .into_iter()
        .filter(|(_, l)| *l == "rx_ok")
        .map(|(t, _)| t)
        .collect();
    // 10 m of propagation delay, rounded to whole nanoseconds
    assert_eq!(ok, vec![duration + SimTime::from_nanos(33)]);
    assert!(h.labels(a).iter().any(|(_, l)| *l == "sniff_tx"));
}

#[test]
fn test_foreign_colors_only_busy_while_overlapping() {
    let mut h = Harness::new();
    let sta = h.add_phy(
        0.0,
        HePhyConfig {
            color: 1,
            ..Default::default()
        },
    );
    let mut first = arrival(1, 1000, -64.0, us(300));
    first.tx_vector.color = 2;
    let mut second = arrival(2, 1000, -64.0, us(100));
    second.tx_vector.color = 3;
    h.inject(SimTime::ZERO, sta, first);
    h.inject(us(100), sta, second);
    h.run_until(us(1000));

    assert_eq!(h.states(sta), vec![(us(100), PhyState::CcaBusy), (us(200), PhyState::Idle)]);
    let drops = h.labels(sta).iter().filter(|(_, l)| *l == "rx_drop").count();
    assert_eq!(drops, 2);
}

#[test]
fn test_transmit_preempts_reception() {
    let mut h = Harness::new();
    let sta = h.add_phy(0.0, HePhyConfig::default());
    h.add_phy(10.0, HePhyConfig::default());
    h.inject(SimTime::ZERO, sta, arrival(1, 1000, -60.0, us(400)));
    h.transmit(us(50), sta, 2, 200, TxVector::new(WifiMode::he(7)));
    h.run_until(us(2000));

    let states = h.states(sta);
    assert_eq!(states[0], (SimTime::ZERO, PhyState::Receiving));
    assert_eq!(states[1], (us(50), PhyState::Transmitting));
    let labels = h.labels(sta);
    assert!(!labels.iter().any(|(_, l)| *l == "rx_ok" || *l == "rx_error"));
    assert_eq!(h.phys[sta].pending_receptions(), 0);
}

#[test]
fn test_switch_deferred_until_transmission_ends() {
    let mut h = Harness::new();
    let sta = h.add_phy(0.0, HePhyConfig::default());
    let tx_vector = TxVector::new(WifiMode::he(0));
    let duration = calculate_tx_duration(1500, &tx_vector, WifiPreamble::HeSu, 5180, MpduType::Normal);
    h.transmit(SimTime::ZERO, sta, 1, 1500, tx_vector);
    h.control(us(10), sta, PhyControlEvent::SetChannelNumber(40));
    h.run_until(duration + us(1000));

    let switch_delay = HePhyConfig::DEFAULT_CHANNEL_SWITCH_DELAY;
    assert_eq!(
        h.states(sta),
        vec![
            (SimTime::ZERO, PhyState::Transmitting),
            (duration, PhyState::Idle),
            (duration, PhyState::Switching),
            (duration + switch_delay, PhyState::Idle),
        ]
    );
    assert_eq!(h.phys[sta].channel_number(), 40);
    assert_eq!(h.phys[sta].frequency_mhz(), 5200);
    assert_eq!(h.channel.channel_of(h.id(sta)), Some(40));
}

#[test]
fn test_switch_during_reception_is_immediate_and_clears_energy() {
    let mut h = Harness::new();
    let sta = h.add_phy(0.0, HePhyConfig::default());
    h.inject(SimTime::ZERO, sta, arrival(1, 4000, -60.0, us(1000)));
    h.control(us(50), sta, PhyControlEvent::SetChannelNumber(44));
    h.run_until(us(2000));

    // The abandoned signal lasts until 1000 us but no longer counts after retuning
    assert_eq!(
        h.states(sta),
        vec![
            (SimTime::ZERO, PhyState::Receiving),
            (us(50), PhyState::Switching),
            (us(300), PhyState::Idle),
        ]
    );
    assert!(h.phys[sta].interference().is_empty());
    assert!(!h.labels(sta).iter().any(|(_, l)| *l == "rx_ok"));
}

#[test]
fn test_sleep_deferred_during_transmission() {
    let mut h = Harness::new();
    let sta = h.add_phy(0.0, HePhyConfig::default());
    let tx_vector = TxVector::new(WifiMode::he(3));
    let duration = calculate_tx_duration(800, &tx_vector, WifiPreamble::HeSu, 5180, MpduType::Normal);
    h.transmit(SimTime::ZERO, sta, 1, 800, tx_vector);
    h.control(us(5), sta, PhyControlEvent::SetSleepMode);
    h.transmit(duration + us(100), sta, 2, 800, tx_vector);
    h.control(duration + us(200), sta, PhyControlEvent::ResumeFromSleep);
    h.run_until(duration + us(1000));

    let states = h.states(sta);
    assert_eq!(states[1], (duration, PhyState::Idle));
    assert_eq!(states[2], (duration, PhyState::Sleeping));
    assert_eq!(states[3], (duration + us(200), PhyState::Idle));
    assert!(h.labels(sta).contains(&(duration + us(100), "tx_drop")));
}

#[test]
fn test_resource_unit_flag_clears_at_transmission_end() {
    let mut h = Harness::new();
    let sta = h.add_phy(
        0.0,
        HePhyConfig {
            role: StationRole::Station { aid: 3 },
            ..Default::default()
        },
    );
    h.control(SimTime::ZERO, sta, PhyControlEvent::AllocateTxResourceUnit(5));
    let tx_vector = TxVector::new(WifiMode::he(5)).with_ru(ResourceUnit::new(5, RuSize::Tones106));
    let duration = calculate_tx_duration(600, &tx_vector, WifiPreamble::HeSu, 5180, MpduType::Normal);
    h.transmit(us(1), sta, 1, 600, tx_vector);

    h.run_until(us(1) + duration - SimTime::from_nanos(1));
    assert!(h.phys[sta].resource_units().is_txing_on(5));
    assert_eq!(WifiPhy::state(&h.phys[sta]), PhyState::Transmitting);

    h.run_until(us(1) + duration);
    assert!(!h.phys[sta].resource_units().is_txing_on(5));
    assert_eq!(WifiPhy::state(&h.phys[sta]), PhyState::Idle);
}

#[test]
fn test_access_point_receives_concurrent_resource_units() {
    let mut h = Harness::new();
    let ap = h.add_phy(
        0.0,
        HePhyConfig {
            role: StationRole::AccessPoint,
            ..Default::default()
        },
    );
    h.control(SimTime::ZERO, ap, PhyControlEvent::ListenOnResourceUnit(1));
    h.control(SimTime::ZERO, ap, PhyControlEvent::ListenOnResourceUnit(2));
    for (uid, ru) in [(1, 1), (2, 2)] {
        let mut signal = arrival(uid, 300, -55.0, us(150));
        signal.tx_vector = signal.tx_vector.with_ru(ResourceUnit::new(ru, RuSize::Tones106));
        signal.preamble = WifiPreamble::HeTb;
        h.inject(us(10), ap, signal);
    }
    h.run_until(us(500));

    let ok = h.labels(ap).iter().filter(|(t, l)| *l == "rx_ok" && *t == us(160)).count();
    assert_eq!(ok, 2);
    assert_eq!(h.states(ap), vec![(us(10), PhyState::Receiving), (us(160), PhyState::Idle)]);
}

#[test]
fn test_aggregate_reference_increases_per_burst() {
    let mut h = Harness::new();
    let sta = h.add_phy(0.0, HePhyConfig::default());
    let mut start = SimTime::ZERO;
    for burst in 0..3u64 {
        let mut first = arrival(burst * 2, 400, -60.0, us(100));
        first.packet = first.packet.with_ampdu(1);
        first.mpdu_type = MpduType::FirstInAggregate;
        let mut last = arrival(burst * 2 + 1, 400, -60.0, us(50));
        last.packet = last.packet.with_ampdu(0);
        last.mpdu_type = MpduType::LastInAggregate;
        last.preamble = WifiPreamble::None;
        h.inject(start, sta, first);
        h.inject(start + us(110), sta, last);
        start = start + us(500);
    }
    h.run_until(start);

    let references: Vec<u32> = h.logs[sta]
        .lock()
        .iter()
        .filter_map(|(_, n)| match n {
            PhyNotification::MonitorSniffRx(record) => Some(record.ampdu_reference),
            _ => None,
        })
        .collect();
    assert_eq!(references, vec![1, 1, 2, 2, 3, 3]);
    assert!(!h.phys[sta].aggregation().plcp_success);
}

/// Access point listening on RU 1 that starts a 200 byte transmission at
/// 1 us, with an uplink RU signal arriving at 5 us for 576 us.
fn access_point_receiving_during_own_transmission() -> (Harness, usize, SimTime) {
    let mut h = Harness::new();
    let ap = h.add_phy(
        0.0,
        HePhyConfig {
            role: StationRole::AccessPoint,
            ..Default::default()
        },
    );
    h.control(SimTime::ZERO, ap, PhyControlEvent::ListenOnResourceUnit(1));
    let tx_vector = TxVector::new(WifiMode::he(7));
    let tx_duration = calculate_tx_duration(200, &tx_vector, WifiPreamble::HeSu, 5180, MpduType::Normal);
    h.transmit(us(1), ap, 1, 200, tx_vector);
    let mut uplink = arrival(2, 600, -55.0, us(576));
    uplink.tx_vector = uplink.tx_vector.with_ru(ResourceUnit::new(1, RuSize::Tones106));
    uplink.preamble = WifiPreamble::HeTb;
    h.inject(us(5), ap, uplink);
    (h, ap, us(1) + tx_duration)
}

#[test]
fn test_resource_unit_reception_outlives_own_transmission() {
    let (mut h, ap, tx_end) = access_point_receiving_during_own_transmission();
    assert!(tx_end < us(97));
    h.inject(us(97), ap, arrival(3, 500, -90.0, us(100)));
    h.run_until(us(2000));

    assert_eq!(
        h.states(ap),
        vec![
            (us(1), PhyState::Transmitting),
            (tx_end, PhyState::Receiving),
            (us(581), PhyState::Idle),
        ]
    );
    // The whole-channel signal ends before the reception, so no busy credit
    assert_eq!(h.drop_reasons(ap), vec![(us(97), DropReason::AlreadyReceiving)]);
    assert!(h.labels(ap).contains(&(us(581), "rx_ok")));
    assert_eq!(h.phys[ap].pending_receptions(), 0);
}

#[test]
fn test_switch_aborts_resource_unit_reception_after_own_transmission() {
    let (mut h, ap, tx_end) = access_point_receiving_during_own_transmission();
    h.control(us(97), ap, PhyControlEvent::SetChannelNumber(40));
    h.run_until(us(2000));

    assert_eq!(
        h.states(ap),
        vec![
            (us(1), PhyState::Transmitting),
            (tx_end, PhyState::Receiving),
            (us(97), PhyState::Switching),
            (us(347), PhyState::Idle),
        ]
    );
    assert_eq!(h.count(ap, "rx_ok") + h.count(ap, "rx_error"), 0);
    assert_eq!(h.phys[ap].pending_receptions(), 0);
    assert_eq!(h.phys[ap].channel_number(), 40);
}

#[test]
fn test_transmit_aborts_resource_unit_reception() {
    let mut h = Harness::new();
    let ap = h.add_phy(
        0.0,
        HePhyConfig {
            role: StationRole::AccessPoint,
            ..Default::default()
        },
    );
    h.control(SimTime::ZERO, ap, PhyControlEvent::ListenOnResourceUnit(2));
    let mut uplink = arrival(1, 600, -55.0, us(400));
    uplink.tx_vector = uplink.tx_vector.with_ru(ResourceUnit::new(2, RuSize::Tones106));
    uplink.preamble = WifiPreamble::HeTb;
    h.inject(us(5), ap, uplink);
    let tx_vector = TxVector::new(WifiMode::he(7));
    let tx_duration = calculate_tx_duration(200, &tx_vector, WifiPreamble::HeSu, 5180, MpduType::Normal);
    h.transmit(us(50), ap, 2, 200, tx_vector);
    h.run_until(us(2000));

    assert_eq!(
        h.states(ap),
        vec![
            (us(5), PhyState::Receiving),
            (us(50), PhyState::Transmitting),
            (us(50) + tx_duration, PhyState::Idle),
        ]
    );
    assert_eq!(h.count(ap, "rx_ok") + h.count(ap, "rx_error"), 0);
    assert_eq!(h.phys[ap].pending_receptions(), 0);
}

#[test]
fn test_busy_credit_only_when_dropped_signal_outlasts_reception() {
    let mut h = Harness::new();
    let short = h.add_phy(0.0, HePhyConfig::default());
    let long = h.add_phy(0.0, HePhyConfig::default());
    for sta in [short, long] {
        h.inject(SimTime::ZERO, sta, arrival(1, 1000, -60.0, us(200)));
    }
    h.inject(us(50), short, arrival(2, 1000, -85.0, us(100)));
    h.inject(us(50), long, arrival(2, 1000, -85.0, us(250)));
    h.run_until(us(1000));

    assert_eq!(h.drop_reasons(short), vec![(us(50), DropReason::AlreadyReceiving)]);
    assert_eq!(h.states(short), vec![(SimTime::ZERO, PhyState::Receiving), (us(200), PhyState::Idle)]);

    assert_eq!(h.drop_reasons(long), vec![(us(50), DropReason::AlreadyReceiving)]);
    assert_eq!(
        h.states(long),
        vec![
            (SimTime::ZERO, PhyState::Receiving),
            (us(200), PhyState::CcaBusy),
            (us(300), PhyState::Idle),
        ]
    );
}

#[test]
fn test_unsupported_mode_dropped_at_header() {
    let mut h = Harness::new();
    let sta = h.add_phy(
        0.0,
        HePhyConfig {
            max_mcs: 5,
            ..Default::default()
        },
    );
    let mut signal = arrival(1, 1000, -60.0, us(200));
    signal.tx_vector = TxVector::new(WifiMode::he(7));
    h.inject(SimTime::ZERO, sta, signal);
    h.run_until(us(1000));

    let drops = h.drop_reasons(sta);
    assert_eq!(drops.len(), 1);
    assert_eq!(drops[0].1, DropReason::UnsupportedMode);
    assert!(drops[0].0 > SimTime::ZERO && drops[0].0 < us(200));
    assert_eq!(h.count(sta, "rx_ok") + h.count(sta, "rx_error"), 0);
    assert_eq!(h.states(sta), vec![(SimTime::ZERO, PhyState::Receiving), (us(200), PhyState::Idle)]);
    assert!(!h.phys[sta].aggregation().plcp_success);
}

fn header_always_fails(policy: HeaderFailurePolicy, aggregate: AggregateDecodePolicy) -> HePhyConfig {
    HePhyConfig {
        header_success_probability: 0.0,
        header_failure_policy: policy,
        aggregate_decode_policy: aggregate,
        ..Default::default()
    }
}

#[test]
fn test_failed_header_marked_success_still_resolves_payload() {
    let mut h = Harness::new();
    let sta = h.add_phy(
        0.0,
        header_always_fails(HeaderFailurePolicy::MarkSuccess, AggregateDecodePolicy::SharedAcrossBurst),
    );
    h.inject(SimTime::ZERO, sta, arrival(1, 1000, -60.0, us(200)));
    h.run_until(us(1000));

    let reasons: Vec<DropReason> = h.drop_reasons(sta).into_iter().map(|(_, r)| r).collect();
    assert_eq!(reasons, vec![DropReason::HeaderFailed]);
    assert!(h.labels(sta).contains(&(us(200), "rx_ok")));
}

#[test]
fn test_failed_header_marked_failure_ends_silently() {
    let mut h = Harness::new();
    let sta = h.add_phy(
        0.0,
        header_always_fails(HeaderFailurePolicy::MarkFailure, AggregateDecodePolicy::SharedAcrossBurst),
    );
    h.inject(SimTime::ZERO, sta, arrival(1, 1000, -60.0, us(200)));
    h.run_until(us(1000));

    let reasons: Vec<DropReason> = h.drop_reasons(sta).into_iter().map(|(_, r)| r).collect();
    assert_eq!(reasons, vec![DropReason::HeaderFailed]);
    assert_eq!(h.count(sta, "rx_ok") + h.count(sta, "rx_error"), 0);
    assert_eq!(h.states(sta), vec![(SimTime::ZERO, PhyState::Receiving), (us(200), PhyState::Idle)]);
    assert!(!h.phys[sta].aggregation().plcp_success);
}

#[test]
fn test_per_subframe_policy_fails_payload_of_undecoded_header() {
    let mut h = Harness::new();
    let sta = h.add_phy(
        0.0,
        header_always_fails(HeaderFailurePolicy::MarkSuccess, AggregateDecodePolicy::PerSubframe),
    );
    h.inject(SimTime::ZERO, sta, arrival(1, 1000, -60.0, us(200)));
    h.run_until(us(1000));

    let reasons: Vec<DropReason> = h.drop_reasons(sta).into_iter().map(|(_, r)| r).collect();
    assert_eq!(reasons, vec![DropReason::HeaderFailed, DropReason::DecodeFailed]);
    assert_eq!(h.count(sta, "rx_ok"), 0);
    assert!(h.labels(sta).contains(&(us(200), "rx_error")));
}

#[test]
fn test_per_subframe_policy_continuation_inherits_decoded_header() {
    let mut h = Harness::new();
    let sta = h.add_phy(
        0.0,
        HePhyConfig {
            aggregate_decode_policy: AggregateDecodePolicy::PerSubframe,
            ..Default::default()
        },
    );
    let mut first = arrival(1, 400, -60.0, us(100));
    first.packet = first.packet.with_ampdu(1);
    first.mpdu_type = MpduType::FirstInAggregate;
    let mut last = arrival(2, 400, -60.0, us(50));
    last.packet = last.packet.with_ampdu(0);
    last.mpdu_type = MpduType::LastInAggregate;
    last.preamble = WifiPreamble::None;
    h.inject(SimTime::ZERO, sta, first);
    h.inject(us(110), sta, last);
    h.run_until(us(500));

    assert_eq!(h.count(sta, "rx_ok"), 2);
    assert!(h.drop_reasons(sta).is_empty());
}

#[test]
fn test_small_frame_survives_heavy_interference() {
    let mut h = Harness::new();
    let small = h.add_phy(0.0, HePhyConfig::default());
    let large = h.add_phy(0.0, HePhyConfig::default());
    h.inject(SimTime::ZERO, small, arrival(1, 100, -80.0, us(200)));
    h.inject(SimTime::ZERO, large, arrival(1, 1000, -80.0, us(200)));
    for sta in [small, large] {
        h.inject(us(1), sta, arrival(2, 1500, -50.0, us(300)));
    }
    h.run_until(us(1000));

    assert!(h.labels(small).contains(&(us(200), "rx_ok")));
    assert_eq!(h.count(small, "rx_error"), 0);
    assert!(h.labels(large).contains(&(us(200), "rx_error")));
    assert_eq!(h.count(large, "rx_ok"), 0);
}

#[test]
fn test_payload_outcome_drawn_from_error_probability() {
    let mut h = Harness::new();
    let sta = h.add_phy_with_error_rate_model(0.0, HePhyConfig::default(), Box::new(FixedSuccessRate(0.5)));
    for uid in 0..64u64 {
        h.inject(us(uid * 300), sta, arrival(uid, 1000, -60.0, us(200)));
    }
    h.run_until(us(64 * 300));

    let ok = h.count(sta, "rx_ok");
    let error = h.count(sta, "rx_error");
    assert_eq!(ok + error, 64);
    assert!(ok > 0 && error > 0, "ok={} error={}", ok, error);
    for (_, n) in h.logs[sta].lock().iter() {
        if let PhyNotification::RxEndOk { per, .. } = n {
            assert!((per - 0.5).abs() < 1e-12);
        }
    }
}
