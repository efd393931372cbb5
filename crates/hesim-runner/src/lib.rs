//! # hesim-runner library
//!
//! Library interface for the HESim simulation runner.
//!
//! The [`EventLoop`] pops events from a time-ordered [`EventQueue`], dispatches
//! them to their target entities and feeds back whatever the handlers
//! schedule or cancel. Every PHY is built with a [`NotificationTap`] so the
//! loop sees each notification the moment it is raised, which drives the
//! per-station statistics and the JSON trace.

pub mod metrics_export;

use hesim_common::{
    EntityId, Event, EventId, EventPayload, EventQueue, PhyNotification, PhyState, SimContext, SimError,
};
use hesim_model::{build_simulation_with_observers, BuiltSimulation, Model, StationInfo};
use hesim_phy::PhyObserver;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

pub use hesim_common::SimTime;
pub use hesim_model::{load_model, load_model_from_str, load_models, load_models_from_str};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during simulation.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Model error.
    #[error("Model error: {0}")]
    Model(#[from] hesim_model::ModelError),

    /// Simulation error.
    #[error("Simulation error: {0}")]
    Simulation(#[from] SimError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

// ============================================================================
// Simulation Statistics
// ============================================================================

/// Per-station statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeStats {
    /// Transmissions started.
    pub tx: u64,
    /// Transmit requests refused.
    pub tx_dropped: u64,
    /// Time on air in microseconds.
    pub tx_airtime_us: u64,
    /// Receptions started.
    pub rx_begin: u64,
    /// Frames received without error.
    pub rx_ok: u64,
    /// Frames received with errors.
    pub rx_error: u64,
    /// Arriving signals not received.
    pub rx_dropped: u64,
    /// `rx_dropped` by reason.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub rx_drop_reasons: BTreeMap<&'static str, u64>,
    /// Microseconds spent in each PHY state.
    pub state_residency_us: BTreeMap<&'static str, u64>,
}

/// Statistics collected during simulation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationStats {
    /// Total events processed.
    pub total_events: u64,
    /// Transmissions started by any station.
    pub frames_transmitted: u64,
    /// Frames received without error, summed over receivers.
    pub frames_received: u64,
    /// Frames received with errors.
    pub rx_errors: u64,
    /// Arriving signals not received.
    pub rx_drops: u64,
    /// Transmit requests refused.
    pub tx_drops: u64,
    /// Final simulation time.
    pub simulation_time_us: u64,
    /// Wall clock time in milliseconds.
    pub wall_time_ms: u64,
    /// Per-station breakdown, by station name.
    pub nodes: BTreeMap<String, NodeStats>,
}

// ============================================================================
// Progress Reporting
// ============================================================================

/// Progress information passed to the progress callback during simulation.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Current simulation time.
    pub sim_time: SimTime,
    /// Target simulation time (end time).
    pub target_time: SimTime,
    /// Elapsed wall clock time since start.
    pub wall_elapsed: Duration,
    /// Total events processed so far.
    pub events_processed: u64,
    /// How many times faster than real time the run is progressing.
    pub time_multiplier: f64,
    /// Progress as a percentage (0.0 to 100.0).
    pub progress_percent: f64,
}

// ============================================================================
// Notification Tap
// ============================================================================

/// A notification as seen by the tap.
#[derive(Debug, Clone)]
pub struct TappedNotification {
    /// Simulation time it was raised.
    pub time: SimTime,
    /// PHY that raised it.
    pub phy: EntityId,
    /// The notification.
    pub notification: PhyNotification,
}

/// Shared buffer filled by every [`NotificationTap`] of a simulation.
pub type TapLog = Arc<Mutex<Vec<TappedNotification>>>;

/// PHY observer that copies notifications into a shared [`TapLog`].
#[derive(Debug, Clone)]
pub struct NotificationTap {
    log: TapLog,
}

impl NotificationTap {
    /// Tap writing into `log`.
    pub fn new(log: TapLog) -> Self {
        NotificationTap { log }
    }
}

impl PhyObserver for NotificationTap {
    fn notify(&mut self, ctx: &mut SimContext, phy: EntityId, notification: &PhyNotification) {
        // Monitor records duplicate tx_begin/rx_ok and are not traced.
        if matches!(
            notification,
            PhyNotification::MonitorSniffTx(_) | PhyNotification::MonitorSniffRx(_)
        ) {
            return;
        }
        self.log.lock().push(TappedNotification {
            time: ctx.time(),
            phy,
            notification: notification.clone(),
        });
    }
}

// ============================================================================
// Trace Recording
// ============================================================================

/// Resource unit as shown in the trace.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRu {
    /// RU index.
    pub index: u8,
    /// RU size in tones.
    pub tones: u16,
}

/// Payload types for different trace events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TracePayload {
    /// Transmission started.
    TxBegin {
        /// Frame UID.
        uid: u64,
        /// Frame size in bytes.
        size: u32,
        /// Remaining subframes after this one, for A-MPDU subframes.
        #[serde(skip_serializing_if = "Option::is_none")]
        ampdu_remaining: Option<u16>,
        /// Time on air in microseconds.
        duration_us: f64,
    },
    /// Transmit request refused.
    TxDrop {
        /// Frame UID.
        uid: u64,
        /// Drop reason.
        reason: &'static str,
    },
    /// Reception started.
    RxBegin {
        /// Frame UID.
        uid: u64,
    },
    /// Frame received without error.
    RxOk {
        /// Frame UID.
        uid: u64,
        /// Frame size in bytes.
        size: u32,
        /// Payload SNR in dB.
        snr_db: f64,
        /// Payload error probability.
        per: f64,
        /// MCS of the frame.
        mcs: u8,
        /// Channel width in MHz.
        channel_width_mhz: u16,
        /// Resource unit, if the frame used one.
        #[serde(skip_serializing_if = "Option::is_none")]
        ru: Option<TraceRu>,
    },
    /// Frame received with errors.
    RxError {
        /// Frame UID.
        uid: u64,
        /// Payload SNR in dB.
        snr_db: f64,
    },
    /// Arriving signal not received.
    RxDrop {
        /// Frame UID.
        uid: u64,
        /// Drop reason.
        reason: &'static str,
    },
    /// PHY state change.
    State {
        /// New state.
        state: &'static str,
    },
}

/// A trace entry for output.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    /// Origin station name.
    pub origin: String,
    /// Origin entity ID.
    pub origin_id: String,
    /// Timestamp (ISO 8601, simulation start at midnight).
    pub timestamp: String,
    /// Simulation time in seconds.
    pub time_s: f64,
    /// Event-specific payload (flattened into this object).
    #[serde(flatten)]
    pub payload: TracePayload,
}

/// Trace recorder for outputting simulation events.
pub struct TraceRecorder {
    output: Option<Box<dyn Write>>,
    entries: Vec<TraceEntry>,
}

impl TraceRecorder {
    /// Create a new trace recorder. Without an output nothing is recorded.
    pub fn new(output: Option<Box<dyn Write>>) -> Self {
        TraceRecorder {
            output,
            entries: Vec::new(),
        }
    }

    /// Whether entries are being kept.
    pub fn is_enabled(&self) -> bool {
        self.output.is_some()
    }

    /// Record an entry.
    pub fn record(&mut self, entry: TraceEntry) {
        if self.is_enabled() {
            self.entries.push(entry);
        }
    }

    /// Entries recorded so far.
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Write all entries to the output as one JSON array.
    pub fn flush(&mut self) -> Result<(), RunnerError> {
        if let Some(ref mut output) = self.output {
            let json = serde_json::to_string_pretty(&self.entries)?;
            writeln!(output, "{}", json)?;
            output.flush()?;
        }
        Ok(())
    }
}

fn trace_timestamp(time: SimTime) -> String {
    let sim_secs = time.as_secs_f64();
    format!(
        "2025-01-01T{:02}:{:02}:{:09.6}Z",
        (sim_secs / 3600.0) as u32 % 24,
        (sim_secs / 60.0) as u32 % 60,
        sim_secs % 60.0
    )
}

fn snr_db(snr_linear: f64) -> f64 {
    10.0 * snr_linear.max(f64::MIN_POSITIVE).log10()
}

fn trace_payload(notification: &PhyNotification) -> Option<TracePayload> {
    let payload = match notification {
        PhyNotification::TxBegin { packet, duration } => TracePayload::TxBegin {
            uid: packet.uid,
            size: packet.size,
            ampdu_remaining: packet.ampdu.map(|tag| tag.remaining_mpdus),
            duration_us: duration.as_nanos() as f64 / 1_000.0,
        },
        PhyNotification::TxDrop { packet, reason } => TracePayload::TxDrop {
            uid: packet.uid,
            reason: reason.as_label(),
        },
        PhyNotification::RxBegin { packet } => TracePayload::RxBegin { uid: packet.uid },
        PhyNotification::RxEndOk {
            packet,
            snr,
            per,
            tx_vector,
        } => TracePayload::RxOk {
            uid: packet.uid,
            size: packet.size,
            snr_db: snr_db(*snr),
            per: *per,
            mcs: tx_vector.mode.mcs,
            channel_width_mhz: tx_vector.channel_width_mhz,
            ru: tx_vector.ru.map(|ru| TraceRu {
                index: ru.index,
                tones: ru.size.tones(),
            }),
        },
        PhyNotification::RxEndError { packet, snr } => TracePayload::RxError {
            uid: packet.uid,
            snr_db: snr_db(*snr),
        },
        PhyNotification::RxDrop { packet, reason } => TracePayload::RxDrop {
            uid: packet.uid,
            reason: reason.as_label(),
        },
        PhyNotification::StateChanged { state } => TracePayload::State {
            state: state.as_label(),
        },
        PhyNotification::MonitorSniffTx(_) | PhyNotification::MonitorSniffRx(_) => return None,
    };
    Some(payload)
}

// ============================================================================
// Event Loop
// ============================================================================

/// Operating state of a PHY as last reported, for residency accounting.
#[derive(Debug, Clone, Copy)]
struct StateMark {
    state: PhyState,
    since: SimTime,
}

/// The main simulation event loop.
pub struct EventLoop {
    event_queue: EventQueue,
    simulation: BuiltSimulation,
    context: SimContext,
    trace: TraceRecorder,
    tap: TapLog,
    stats: SimulationStats,
    /// Per-station statistics, keyed by PHY entity ID.
    node_stats: HashMap<u64, NodeStats>,
    /// Last reported state per PHY entity ID.
    phy_states: HashMap<u64, StateMark>,
    /// Mapping from any station entity ID to (station name, role) for labels.
    entity_to_labels: HashMap<u64, (String, &'static str)>,
}

impl EventLoop {
    /// Create a new event loop over a built simulation.
    ///
    /// `tap` must be the log the simulation's PHYs were built to write into;
    /// an unrelated log simply leaves the statistics empty.
    pub fn new(simulation: BuiltSimulation, seed: u64, tap: TapLog, trace_output: Option<Box<dyn Write>>) -> Self {
        let mut context = SimContext::new(seed);
        let mut event_queue = EventQueue::new();

        // Builder IDs start at zero; reissue them so they never collide with
        // IDs handed out by the context.
        for mut event in simulation.initial_events.iter().cloned() {
            event.id = EventId(context.next_event_id());
            event_queue.push(event);
        }

        let mut node_stats = HashMap::new();
        let mut phy_states = HashMap::new();
        let mut entity_to_labels = HashMap::new();
        for info in &simulation.station_infos {
            node_stats.insert(info.phy_entity_id.0, NodeStats::default());
            phy_states.insert(
                info.phy_entity_id.0,
                StateMark {
                    state: PhyState::Idle,
                    since: SimTime::ZERO,
                },
            );
            let labels = (info.name.clone(), info.role);
            entity_to_labels.insert(info.phy_entity_id.0, labels.clone());
            if let Some(agent_id) = info.traffic_agent_entity_id {
                entity_to_labels.insert(agent_id.0, labels.clone());
            }
            if let Some(agent_id) = info.control_agent_entity_id {
                entity_to_labels.insert(agent_id.0, labels);
            }
        }

        EventLoop {
            event_queue,
            simulation,
            context,
            trace: TraceRecorder::new(trace_output),
            tap,
            stats: SimulationStats::default(),
            node_stats,
            phy_states,
            entity_to_labels,
        }
    }

    /// Dispatch an event to its target entities, recording per-entity step time metrics.
    fn dispatch_event_with_metrics(&mut self, event: &Event) -> Result<(), SimError> {
        for target in &event.targets {
            let Some(entity) = self.simulation.entities.get_mut(*target) else {
                tracing::error!("EntityNotFound {:?} when dispatching {:?}", target, event.payload);
                return Err(SimError::EntityNotFound(*target));
            };
            self.context.set_source(*target);

            let step_start = Instant::now();
            entity.handle_event(event, &mut self.context)?;
            let step_elapsed = step_start.elapsed();

            if let Some((name, node_type)) = self.entity_to_labels.get(&target.0) {
                let labels = [("node", name.clone()), ("node_type", node_type.to_string())];
                metrics::histogram!(hesim_metrics::metric_defs::SIMULATION_STEP_TIME.name, &labels)
                    .record(step_elapsed.as_micros() as f64);
            }
        }
        Ok(())
    }

    /// Run the simulation for the specified duration.
    pub fn run(&mut self, duration: SimTime) -> Result<SimulationStats, RunnerError> {
        self.run_with_progress(duration, |_, _, _| {})
    }

    /// Run the simulation, invoking `on_progress` about every five seconds of
    /// wall time and once more at the end (with `is_final` set).
    ///
    /// Events scheduled exactly at `duration` are still processed. Afterwards
    /// every entity receives [`EventPayload::SimulationEnd`].
    pub fn run_with_progress<F>(&mut self, duration: SimTime, mut on_progress: F) -> Result<SimulationStats, RunnerError>
    where
        F: FnMut(&Self, ProgressInfo, bool), // bool = is_final
    {
        let start_time = Instant::now();
        let end_time = duration;
        let progress_interval = Duration::from_secs(5);
        let mut last_progress = Instant::now();
        let mut last_progress_sim_time = SimTime::ZERO;

        while let Some(next_time) = self.event_queue.peek_time() {
            if next_time > end_time {
                break;
            }
            let Some(event) = self.event_queue.pop() else {
                break;
            };

            self.context.set_time(event.time);
            self.dispatch_event_with_metrics(&event)?;
            self.event_queue.absorb(&mut self.context);

            self.stats.total_events += 1;
            self.drain_tap();

            if last_progress.elapsed() >= progress_interval {
                let sim_time = self.context.time();
                let sim_delta = sim_time.as_secs_f64() - last_progress_sim_time.as_secs_f64();
                let wall_delta = last_progress.elapsed().as_secs_f64();
                let progress = ProgressInfo {
                    sim_time,
                    target_time: end_time,
                    wall_elapsed: start_time.elapsed(),
                    events_processed: self.stats.total_events,
                    time_multiplier: if wall_delta > 0.0 { sim_delta / wall_delta } else { 0.0 },
                    progress_percent: (sim_time.as_secs_f64() / end_time.as_secs_f64()) * 100.0,
                };
                on_progress(self, progress, false);

                last_progress = Instant::now();
                last_progress_sim_time = sim_time;
            }
        }

        self.finish(end_time)?;

        self.stats.simulation_time_us = end_time.as_micros();
        self.stats.wall_time_ms = start_time.elapsed().as_millis() as u64;
        self.stats.nodes = self.named_node_stats();

        let wall_elapsed = start_time.elapsed();
        let progress = ProgressInfo {
            sim_time: end_time,
            target_time: end_time,
            wall_elapsed,
            events_processed: self.stats.total_events,
            time_multiplier: end_time.as_secs_f64() / wall_elapsed.as_secs_f64().max(f64::EPSILON),
            progress_percent: 100.0,
        };
        on_progress(self, progress, true);

        self.trace.flush()?;

        Ok(self.stats.clone())
    }

    /// Deliver `SimulationEnd` to every entity and close the state accounting.
    fn finish(&mut self, end_time: SimTime) -> Result<(), RunnerError> {
        self.context.set_time(end_time);
        let mut targets: Vec<EntityId> = self.simulation.entities.entity_ids().collect();
        targets.sort();
        let end_event = Event {
            id: EventId(self.context.next_event_id()),
            time: end_time,
            source: self.simulation.channel_entity_id,
            targets,
            payload: EventPayload::SimulationEnd,
        };
        self.dispatch_event_with_metrics(&end_event)?;
        // Nothing runs past the end.
        self.context.take_pending_events();
        self.context.take_cancellations();
        self.drain_tap();

        for (phy, mark) in &self.phy_states {
            if let Some(stats) = self.node_stats.get_mut(phy) {
                *stats.state_residency_us.entry(mark.state.as_label()).or_insert(0) +=
                    (end_time - mark.since).as_micros();
            }
        }
        Ok(())
    }

    fn drain_tap(&mut self) {
        let tapped = std::mem::take(&mut *self.tap.lock());
        for item in tapped {
            self.update_stats(&item);
            self.record_trace(&item);
        }
    }

    /// Update statistics from a notification.
    fn update_stats(&mut self, item: &TappedNotification) {
        let Some(node) = self.node_stats.get_mut(&item.phy.0) else {
            return;
        };
        match &item.notification {
            PhyNotification::TxBegin { duration, .. } => {
                node.tx += 1;
                node.tx_airtime_us += duration.as_micros();
                self.stats.frames_transmitted += 1;
            }
            PhyNotification::TxDrop { .. } => {
                node.tx_dropped += 1;
                self.stats.tx_drops += 1;
            }
            PhyNotification::RxBegin { .. } => node.rx_begin += 1,
            PhyNotification::RxEndOk { .. } => {
                node.rx_ok += 1;
                self.stats.frames_received += 1;
            }
            PhyNotification::RxEndError { .. } => {
                node.rx_error += 1;
                self.stats.rx_errors += 1;
            }
            PhyNotification::RxDrop { reason, .. } => {
                node.rx_dropped += 1;
                *node.rx_drop_reasons.entry(reason.as_label()).or_insert(0) += 1;
                self.stats.rx_drops += 1;
            }
            PhyNotification::StateChanged { state } => {
                if let Some(mark) = self.phy_states.get_mut(&item.phy.0) {
                    *node.state_residency_us.entry(mark.state.as_label()).or_insert(0) +=
                        (item.time - mark.since).as_micros();
                    *mark = StateMark {
                        state: *state,
                        since: item.time,
                    };
                }
            }
            PhyNotification::MonitorSniffTx(_) | PhyNotification::MonitorSniffRx(_) => {}
        }
    }

    /// Record a trace entry for a notification.
    fn record_trace(&mut self, item: &TappedNotification) {
        if !self.trace.is_enabled() {
            return;
        }
        let Some(payload) = trace_payload(&item.notification) else {
            return;
        };
        let origin = self
            .entity_to_labels
            .get(&item.phy.0)
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| format!("Entity_{}", item.phy.0));

        self.trace.record(TraceEntry {
            origin,
            origin_id: item.phy.0.to_string(),
            timestamp: trace_timestamp(item.time),
            time_s: item.time.as_secs_f64(),
            payload,
        });
    }

    fn named_node_stats(&self) -> BTreeMap<String, NodeStats> {
        self.simulation
            .station_infos
            .iter()
            .map(|info| {
                let stats = self.node_stats.get(&info.phy_entity_id.0).cloned().unwrap_or_default();
                (info.name.clone(), stats)
            })
            .collect()
    }

    /// Per-station statistics, keyed by PHY entity ID.
    pub fn node_stats(&self) -> &HashMap<u64, NodeStats> {
        &self.node_stats
    }

    /// Stations of the simulation, in build order.
    pub fn station_infos(&self) -> &[StationInfo] {
        &self.simulation.station_infos
    }

    /// Statistics so far.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Trace entries recorded so far.
    pub fn trace_entries(&self) -> &[TraceEntry] {
        self.trace.entries()
    }
}

/// Build `model` with a notification tap on every PHY and wrap it in an
/// event loop.
pub fn create_event_loop(
    model: &Model,
    seed: u64,
    trace_output: Option<Box<dyn Write>>,
) -> Result<EventLoop, RunnerError> {
    let tap: TapLog = Arc::new(Mutex::new(Vec::new()));
    let simulation = build_simulation_with_observers(model, seed, |_| {
        Some(Box::new(NotificationTap::new(Arc::clone(&tap))) as Box<dyn PhyObserver>)
    })?;
    Ok(EventLoop::new(simulation, seed, tap, trace_output))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_STATIONS: &str = r#"
defaults:
  traffic:
    startup_s: 0.001
    interval_s: 0.002
    packet_size: 500
    mcs: 3
stations:
  - name: ap
    role: access_point
    position: { x: 0, y: 0 }
  - name: sta1
    role: { station: { aid: 1 } }
    position: { x: 5, y: 0 }
    traffic: {}
"#;

    const AP_NAPS: &str = r#"
stations:
  - name: ap
    control:
      actions:
        - at_s: 0.0
          action: sleep
        - at_s: 0.006
          action: resume
"#;

    fn run(yaml: &str, seed: u64, duration: SimTime, traced: bool) -> (SimulationStats, Vec<TraceEntry>) {
        let model = load_model_from_str(yaml).unwrap();
        let output: Option<Box<dyn Write>> = if traced { Some(Box::new(std::io::sink())) } else { None };
        let mut event_loop = create_event_loop(&model, seed, output).unwrap();
        let stats = event_loop.run(duration).unwrap();
        (stats, event_loop.trace_entries().to_vec())
    }

    #[test]
    fn test_two_stations_exchange_frames() {
        let (stats, _) = run(TWO_STATIONS, 1, SimTime::from_millis(10), false);
        let sta1 = &stats.nodes["sta1"];
        let ap = &stats.nodes["ap"];
        // Frames at 1, 3, 5, 7 and 9 ms.
        assert_eq!(sta1.tx, 5);
        assert_eq!(ap.rx_ok, 5);
        assert_eq!(ap.rx_begin, 5);
        assert_eq!(ap.tx, 0);
        assert_eq!(stats.frames_transmitted, 5);
        assert_eq!(stats.frames_received, 5);
        assert!(sta1.tx_airtime_us > 0);
        assert_eq!(stats.simulation_time_us, 10_000);
    }

    #[test]
    fn test_state_residency_covers_run() {
        let (stats, _) = run(TWO_STATIONS, 1, SimTime::from_millis(10), false);
        for node in stats.nodes.values() {
            let total: u64 = node.state_residency_us.values().sum();
            assert_eq!(total, 10_000);
        }
        assert!(stats.nodes["sta1"].state_residency_us["tx"] > 0);
        assert!(stats.nodes["ap"].state_residency_us["rx"] > 0);
    }

    #[test]
    fn test_trace_records_notifications() {
        let (_, entries) = run(TWO_STATIONS, 1, SimTime::from_millis(4), true);
        let kinds: Vec<(&str, String)> = entries
            .iter()
            .map(|e| {
                let value = serde_json::to_value(&e.payload).unwrap();
                (e.origin.as_str(), value["type"].as_str().unwrap_or_default().to_string())
            })
            .collect();
        assert!(kinds.contains(&("sta1", "tx_begin".to_string())));
        assert!(kinds.contains(&("ap", "rx_begin".to_string())));
        assert!(kinds.contains(&("ap", "rx_ok".to_string())));
        assert!(entries.windows(2).all(|w| w[0].time_s <= w[1].time_s));
    }

    #[test]
    fn test_untraced_run_keeps_no_entries() {
        let (_, entries) = run(TWO_STATIONS, 1, SimTime::from_millis(4), false);
        assert!(entries.is_empty());
    }

    #[test]
    fn test_same_seed_same_result() {
        let (a, trace_a) = run(TWO_STATIONS, 7, SimTime::from_millis(20), true);
        let (b, trace_b) = run(TWO_STATIONS, 7, SimTime::from_millis(20), true);
        assert_eq!(a.total_events, b.total_events);
        assert_eq!(
            serde_json::to_string(&trace_a).unwrap(),
            serde_json::to_string(&trace_b).unwrap()
        );
    }

    #[test]
    fn test_sleeping_receiver_drops_until_resumed() {
        let model = load_models_from_str(&[TWO_STATIONS, AP_NAPS]).unwrap();
        let mut event_loop = create_event_loop(&model, 1, None).unwrap();
        let stats = event_loop.run(SimTime::from_millis(10)).unwrap();
        let ap = &stats.nodes["ap"];
        // Frames at 1, 3 and 5 ms arrive while asleep.
        assert_eq!(ap.rx_dropped, 3);
        assert_eq!(ap.rx_drop_reasons.get("sleeping"), Some(&3));
        assert_eq!(ap.rx_ok, 2);
        assert!(ap.state_residency_us["sleep"] >= 5_000);
    }

    #[test]
    fn test_trace_timestamp_format() {
        assert_eq!(trace_timestamp(SimTime::from_micros(61_500_250)), "2025-01-01T00:01:01.500250Z");
        assert_eq!(trace_timestamp(SimTime::ZERO), "2025-01-01T00:00:00.000000Z");
    }

    #[test]
    fn test_snr_db_conversion() {
        assert!((snr_db(100.0) - 20.0).abs() < 1e-9);
        assert!(snr_db(0.0).is_finite());
    }
}
