//! Interference tracking.
//!
//! Every signal arriving at a PHY is registered here, whether or not the PHY
//! decodes it. The tracker answers two questions: how long the aggregate
//! energy stays above a threshold (for CCA), and what SNR and error
//! probability a given signal sees against everything else on the air.

use crate::error_rate::ErrorRateModel;
use crate::timing::{header_mode, preamble_and_header_duration};
use hesim_common::{SimTime, TxVector, WifiMode, WifiPreamble};
use std::collections::BTreeMap;

/// Boltzmann constant in J/K.
const BOLTZMANN: f64 = 1.3803e-23;
/// Reference temperature for thermal noise in Kelvin.
const NOISE_TEMPERATURE_K: f64 = 290.0;

/// Handle to a tracked signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterferenceEventId(u64);

/// One signal on the medium as seen by a receiver.
#[derive(Debug, Clone)]
pub struct InterferenceEvent {
    /// Payload size in bytes.
    pub size: u32,
    /// Transmission parameters of the signal.
    pub tx_vector: TxVector,
    /// Preamble format.
    pub preamble: WifiPreamble,
    /// Arrival time.
    pub start: SimTime,
    /// End of the signal.
    pub end: SimTime,
    /// Received power in watts.
    pub rx_power_w: f64,
}

impl InterferenceEvent {
    /// Duration of the signal.
    pub fn duration(&self) -> SimTime {
        self.end - self.start
    }

    fn is_active_at(&self, t: SimTime) -> bool {
        self.start <= t && t < self.end
    }
}

/// SNR and packet error probability of a signal section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnrPer {
    /// Linear SNR at the start of the signal.
    pub snr: f64,
    /// Packet error probability.
    pub per: f64,
}

/// Convert dBm to watts.
pub fn dbm_to_w(dbm: f64) -> f64 {
    10f64.powf((dbm - 30.0) / 10.0)
}

/// Convert watts to dBm.
pub fn w_to_dbm(w: f64) -> f64 {
    10.0 * w.log10() + 30.0
}

/// Convert dB to a linear ratio.
pub fn db_to_ratio(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Convert a linear ratio to dB.
pub fn ratio_to_db(ratio: f64) -> f64 {
    10.0 * ratio.log10()
}

/// Whether two signals overlap in frequency. Whole-channel signals overlap
/// with everything.
fn shares_subcarriers(a: &TxVector, b: &TxVector) -> bool {
    match (a.ru, b.ru) {
        (Some(x), Some(y)) => x.index == y.index,
        _ => true,
    }
}

/// Tracks concurrent signals and derives SNR/PER and energy durations.
pub struct InterferenceHelper {
    events: BTreeMap<u64, InterferenceEvent>,
    next_id: u64,
    noise_figure_db: f64,
    error_rate_model: Box<dyn ErrorRateModel>,
    rxing: bool,
}

impl InterferenceHelper {
    /// Create a tracker with the receiver noise figure and error-rate model.
    pub fn new(noise_figure_db: f64, error_rate_model: Box<dyn ErrorRateModel>) -> Self {
        InterferenceHelper {
            events: BTreeMap::new(),
            next_id: 0,
            noise_figure_db,
            error_rate_model,
            rxing: false,
        }
    }

    /// Register a signal arriving now.
    pub fn add(
        &mut self,
        now: SimTime,
        size: u32,
        tx_vector: TxVector,
        preamble: WifiPreamble,
        duration: SimTime,
        rx_power_w: f64,
    ) -> InterferenceEventId {
        if !self.rxing {
            self.prune(now);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.events.insert(
            id,
            InterferenceEvent {
                size,
                tx_vector,
                preamble,
                start: now,
                end: now + duration,
                rx_power_w,
            },
        );
        InterferenceEventId(id)
    }

    /// Look up a tracked signal.
    pub fn event(&self, id: InterferenceEventId) -> Option<&InterferenceEvent> {
        self.events.get(&id.0)
    }

    /// Number of tracked signals.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no signal is tracked.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Aggregate power of all tracked signals at `t`, in watts.
    pub fn energy_w(&self, t: SimTime) -> f64 {
        self.power_at(t, None)
    }

    /// How long from `now` the aggregate energy stays at or above
    /// `threshold_w`. Zero if it is already below.
    pub fn energy_duration(&self, now: SimTime, threshold_w: f64) -> SimTime {
        let mut change_points: Vec<SimTime> = self
            .events
            .values()
            .flat_map(|e| [e.start, e.end])
            .filter(|t| *t > now)
            .collect();
        change_points.sort_unstable();
        change_points.dedup();

        let mut t = now;
        if self.power_at(t, None) < threshold_w {
            return SimTime::ZERO;
        }
        for point in change_points {
            t = point;
            if self.power_at(t, None) < threshold_w {
                break;
            }
        }
        t - now
    }

    /// SNR and error probability of the preamble and PLCP header of a signal.
    pub fn calculate_plcp_header_snr_per(&self, id: InterferenceEventId) -> Option<SnrPer> {
        let event = self.events.get(&id.0)?;
        let header_end = event.start + preamble_and_header_duration(&event.tx_vector, event.preamble);
        let mode = header_mode(&event.tx_vector);
        Some(self.calculate_snr_per(id.0, event, event.start, header_end.min(event.end), mode))
    }

    /// SNR and error probability of the payload of a signal.
    pub fn calculate_plcp_payload_snr_per(&self, id: InterferenceEventId) -> Option<SnrPer> {
        let event = self.events.get(&id.0)?;
        let payload_start = event.start + preamble_and_header_duration(&event.tx_vector, event.preamble);
        Some(self.calculate_snr_per(id.0, event, payload_start.min(event.end), event.end, event.tx_vector.mode))
    }

    /// A reception window opens; tracked history is retained until it closes.
    pub fn notify_rx_start(&mut self) {
        self.rxing = true;
    }

    /// The reception window closes.
    pub fn notify_rx_end(&mut self, now: SimTime) {
        self.rxing = false;
        self.prune(now);
    }

    /// Forget every tracked signal.
    pub fn erase_events(&mut self) {
        self.events.clear();
        self.rxing = false;
    }

    /// Thermal noise power in watts over a descriptor's bandwidth.
    pub fn noise_floor_w(&self, tx_vector: &TxVector) -> f64 {
        BOLTZMANN * NOISE_TEMPERATURE_K * tx_vector.bandwidth_hz() as f64 * db_to_ratio(self.noise_figure_db)
    }

    /// Receiver noise figure in dB.
    pub fn noise_figure_db(&self) -> f64 {
        self.noise_figure_db
    }

    fn prune(&mut self, now: SimTime) {
        self.events.retain(|_, e| e.end >= now);
    }

    fn power_at(&self, t: SimTime, exclude: Option<u64>) -> f64 {
        self.events
            .iter()
            .filter(|(id, e)| Some(**id) != exclude && e.is_active_at(t))
            .map(|(_, e)| e.rx_power_w)
            .sum()
    }

    /// Power at `t` that interferes with `event`. Signals on a different
    /// resource unit occupy other subcarriers and are left out.
    fn interference_at(&self, t: SimTime, id: u64, event: &InterferenceEvent) -> f64 {
        self.events
            .iter()
            .filter(|(other, e)| **other != id && e.is_active_at(t) && shares_subcarriers(&event.tx_vector, &e.tx_vector))
            .map(|(_, e)| e.rx_power_w)
            .sum()
    }

    fn calculate_snr_per(
        &self,
        id: u64,
        event: &InterferenceEvent,
        window_start: SimTime,
        window_end: SimTime,
        mode: WifiMode,
    ) -> SnrPer {
        let noise_w = self.noise_floor_w(&event.tx_vector);
        let snr = event.rx_power_w / (noise_w + self.interference_at(event.start, id, event));

        let mut boundaries: Vec<SimTime> = self
            .events
            .iter()
            .filter(|(other, _)| **other != id)
            .flat_map(|(_, e)| [e.start, e.end])
            .filter(|t| *t > window_start && *t < window_end)
            .collect();
        boundaries.push(window_start);
        boundaries.push(window_end);
        boundaries.sort_unstable();
        boundaries.dedup();

        let mut chunk_tx = event.tx_vector;
        chunk_tx.mode = mode;
        let rate = chunk_tx.data_rate_bps() as f64;

        let mut psr = 1.0;
        for chunk in boundaries.windows(2) {
            let (from, to) = (chunk[0], chunk[1]);
            let interference_w = self.interference_at(from, id, event);
            let chunk_snr = event.rx_power_w / (noise_w + interference_w);
            let nbits = (rate * (to - from).as_secs_f64()).round() as u64;
            psr *= self.error_rate_model.chunk_success_rate(mode, &chunk_tx, chunk_snr, nbits);
        }
        SnrPer { snr, per: 1.0 - psr }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_rate::NistErrorRateModel;

    fn helper() -> InterferenceHelper {
        InterferenceHelper::new(7.0, Box::new(NistErrorRateModel))
    }

    fn tx() -> TxVector {
        TxVector::new(WifiMode::he(0))
    }

    #[test]
    fn test_energy_duration_below_threshold_is_zero() {
        let mut ih = helper();
        ih.add(SimTime::ZERO, 100, tx(), WifiPreamble::HeSu, SimTime::from_micros(100), dbm_to_w(-90.0));
        assert_eq!(ih.energy_duration(SimTime::ZERO, dbm_to_w(-82.0)), SimTime::ZERO);
    }

    #[test]
    fn test_energy_duration_tracks_sum_of_overlapping_events() {
        let mut ih = helper();
        // Two -85 dBm signals together exceed -82 dBm while both are present.
        ih.add(SimTime::ZERO, 100, tx(), WifiPreamble::HeSu, SimTime::from_micros(100), dbm_to_w(-85.0));
        ih.add(SimTime::ZERO, 100, tx(), WifiPreamble::HeSu, SimTime::from_micros(60), dbm_to_w(-85.0));
        assert_eq!(ih.energy_duration(SimTime::ZERO, dbm_to_w(-82.0)), SimTime::from_micros(60));
        assert_eq!(ih.energy_duration(SimTime::ZERO, dbm_to_w(-90.0)), SimTime::from_micros(100));
    }

    #[test]
    fn test_payload_snr_excludes_own_power() {
        let mut ih = helper();
        let id = ih.add(SimTime::ZERO, 1000, tx(), WifiPreamble::HeSu, SimTime::from_micros(500), dbm_to_w(-60.0));
        let clean = ih.calculate_plcp_payload_snr_per(id).unwrap();
        assert!(clean.per < 1e-6);
        let noise = ih.noise_floor_w(&tx());
        assert!((clean.snr - dbm_to_w(-60.0) / noise).abs() / clean.snr < 1e-9);
    }

    #[test]
    fn test_interference_raises_per() {
        let mut clean = helper();
        let a = clean.add(SimTime::ZERO, 1500, tx(), WifiPreamble::HeSu, SimTime::from_micros(800), dbm_to_w(-80.0));
        let clean_per = clean.calculate_plcp_payload_snr_per(a).unwrap().per;

        let mut noisy = helper();
        let a = noisy.add(SimTime::ZERO, 1500, tx(), WifiPreamble::HeSu, SimTime::from_micros(800), dbm_to_w(-80.0));
        noisy.add(SimTime::ZERO, 1500, tx(), WifiPreamble::HeSu, SimTime::from_micros(800), dbm_to_w(-81.0));
        let noisy = noisy.calculate_plcp_payload_snr_per(a).unwrap();
        assert!(noisy.per > clean_per);
        assert!(noisy.snr < 2.0);
    }

    #[test]
    fn test_other_resource_units_do_not_interfere() {
        use hesim_common::{ResourceUnit, RuSize};
        let on_ru = |index| tx().with_ru(ResourceUnit::new(index, RuSize::Tones106));
        let mut ih = helper();
        let a = ih.add(SimTime::ZERO, 1500, on_ru(1), WifiPreamble::HeTb, SimTime::from_micros(300), dbm_to_w(-70.0));
        ih.add(SimTime::ZERO, 1500, on_ru(2), WifiPreamble::HeTb, SimTime::from_micros(300), dbm_to_w(-60.0));
        let separate = ih.calculate_plcp_payload_snr_per(a).unwrap();
        ih.add(SimTime::ZERO, 1500, on_ru(1), WifiPreamble::HeTb, SimTime::from_micros(300), dbm_to_w(-60.0));
        let shared = ih.calculate_plcp_payload_snr_per(a).unwrap();
        assert!(separate.snr > 1000.0);
        assert!(shared.snr < 1.0);
    }

    #[test]
    fn test_prune_only_when_not_receiving() {
        let mut ih = helper();
        ih.add(SimTime::ZERO, 100, tx(), WifiPreamble::HeSu, SimTime::from_micros(10), dbm_to_w(-70.0));
        ih.notify_rx_start();
        ih.add(SimTime::from_micros(20), 100, tx(), WifiPreamble::HeSu, SimTime::from_micros(10), dbm_to_w(-70.0));
        assert_eq!(ih.len(), 2);
        ih.notify_rx_end(SimTime::from_micros(40));
        assert!(ih.is_empty());
    }

    #[test]
    fn test_erase_events() {
        let mut ih = helper();
        let id = ih.add(SimTime::ZERO, 100, tx(), WifiPreamble::HeSu, SimTime::from_micros(10), dbm_to_w(-70.0));
        ih.erase_events();
        assert!(ih.event(id).is_none());
        assert_eq!(ih.energy_w(SimTime::ZERO), 0.0);
    }

    #[test]
    fn test_dbm_conversions() {
        assert!((dbm_to_w(30.0) - 1.0).abs() < 1e-12);
        assert!((w_to_dbm(0.001) - 0.0).abs() < 1e-9);
        assert!((ratio_to_db(db_to_ratio(7.0)) - 7.0).abs() < 1e-9);
    }
}
