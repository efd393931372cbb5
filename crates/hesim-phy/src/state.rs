//! Per-station PHY bookkeeping: operating state, A-MPDU reception context
//! and resource-unit participation.
//!
//! These types only track time and flags. Scheduling of the timers that
//! drive them is done by the owning PHY.

use hesim_common::{PhyState, SimTime};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// Operating State
// ============================================================================

/// Operating state with the end times of the timed states.
#[derive(Debug, Clone)]
pub struct PhyStateMachine {
    state: PhyState,
    state_start: SimTime,
    end_tx: SimTime,
    end_rx: SimTime,
    end_switching: SimTime,
    end_cca_busy: SimTime,
    residency: BTreeMap<&'static str, SimTime>,
}

impl Default for PhyStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhyStateMachine {
    /// A state machine starting idle at time zero.
    pub fn new() -> Self {
        PhyStateMachine {
            state: PhyState::Idle,
            state_start: SimTime::ZERO,
            end_tx: SimTime::ZERO,
            end_rx: SimTime::ZERO,
            end_switching: SimTime::ZERO,
            end_cca_busy: SimTime::ZERO,
            residency: BTreeMap::new(),
        }
    }

    /// Current operating state.
    pub fn state(&self) -> PhyState {
        self.state
    }

    /// Whether the station is in `state`.
    pub fn is(&self, state: PhyState) -> bool {
        self.state == state
    }

    /// End of the ongoing or last reception.
    pub fn end_rx(&self) -> SimTime {
        self.end_rx
    }

    /// End of the medium-busy indication.
    pub fn end_cca_busy(&self) -> SimTime {
        self.end_cca_busy
    }

    /// Time from `now` until the station leaves its current activity.
    /// Zero for idle, CCA-busy and sleeping stations.
    pub fn delay_until_idle(&self, now: SimTime) -> SimTime {
        match self.state {
            PhyState::Transmitting => self.end_tx - now,
            PhyState::Receiving => self.end_rx - now,
            PhyState::Switching => self.end_switching - now,
            PhyState::Idle | PhyState::CcaBusy | PhyState::Sleeping => SimTime::ZERO,
        }
    }

    /// When the state timer for the current state should fire, if the
    /// current state ends on its own.
    pub fn state_deadline(&self) -> Option<SimTime> {
        match self.state {
            PhyState::Transmitting => Some(self.end_tx),
            PhyState::Receiving => Some(self.end_rx),
            PhyState::Switching => Some(self.end_switching),
            PhyState::CcaBusy => Some(self.end_cca_busy),
            PhyState::Idle | PhyState::Sleeping => None,
        }
    }

    /// Accumulated time spent in each state, by label.
    pub fn residency(&self) -> &BTreeMap<&'static str, SimTime> {
        &self.residency
    }

    /// Close the accounting of the current state at `now`.
    pub fn flush_residency(&mut self, now: SimTime) {
        let spent = now - self.state_start;
        let total = self.residency.entry(self.state.as_label()).or_insert(SimTime::ZERO);
        *total = *total + spent;
        self.state_start = now;
    }

    fn enter(&mut self, now: SimTime, state: PhyState) {
        if self.state != state {
            self.flush_residency(now);
            self.state = state;
        }
    }

    /// State to fall back to once an activity ends. A reception accepted
    /// during the activity takes precedence over the busy indication.
    fn settle(&mut self, now: SimTime) {
        if self.end_rx > now {
            self.enter(now, PhyState::Receiving);
        } else if self.end_cca_busy > now {
            self.enter(now, PhyState::CcaBusy);
        } else {
            self.enter(now, PhyState::Idle);
        }
    }

    /// Start transmitting for `duration`. An ongoing reception is abandoned.
    pub fn switch_to_tx(&mut self, now: SimTime, duration: SimTime) {
        self.abort_rx(now);
        self.end_tx = now + duration;
        self.enter(now, PhyState::Transmitting);
    }

    /// Start or extend a reception lasting `duration`.
    ///
    /// A transmitting station only records the reception end; the
    /// observable state stays `Transmitting` and turns to `Receiving` when
    /// the transmission ends before the reception does.
    pub fn switch_to_rx(&mut self, now: SimTime, duration: SimTime) {
        self.end_rx = self.end_rx.max(now + duration);
        if matches!(self.state, PhyState::Idle | PhyState::CcaBusy) {
            self.enter(now, PhyState::Receiving);
        }
    }

    /// The reception ended. Returns to CCA-busy or idle.
    pub fn switch_from_rx_end(&mut self, now: SimTime) {
        if self.state == PhyState::Receiving {
            self.end_rx = now;
            self.settle(now);
        }
    }

    /// Abandon an ongoing reception without leaving the state.
    pub fn abort_rx(&mut self, now: SimTime) {
        if self.end_rx > now {
            self.end_rx = now;
        }
    }

    /// Extend the busy indication by `duration` from `now`. Only an idle or
    /// CCA-busy station changes state; other states keep the extended end
    /// for when they finish. Returns whether the state deadline moved.
    pub fn switch_maybe_to_cca_busy(&mut self, now: SimTime, duration: SimTime) -> bool {
        let end = now + duration;
        if end <= self.end_cca_busy {
            return false;
        }
        self.end_cca_busy = end;
        match self.state {
            PhyState::Idle | PhyState::CcaBusy => {
                self.enter(now, PhyState::CcaBusy);
                true
            }
            _ => false,
        }
    }

    /// Start retuning for `duration`. Any reception is abandoned and the
    /// busy indication is reset since energy history no longer applies.
    pub fn switch_to_channel_switching(&mut self, now: SimTime, duration: SimTime) {
        self.abort_rx(now);
        self.end_cca_busy = now;
        self.end_switching = now + duration;
        self.enter(now, PhyState::Switching);
    }

    /// Enter sleep mode.
    pub fn switch_to_sleep(&mut self, now: SimTime) {
        self.enter(now, PhyState::Sleeping);
    }

    /// Leave sleep mode, busy for `cca_duration` if energy is still present.
    pub fn switch_from_sleep(&mut self, now: SimTime, cca_duration: SimTime) {
        if self.state != PhyState::Sleeping {
            return;
        }
        self.end_cca_busy = now + cca_duration;
        self.settle(now);
    }

    /// The state timer fired at `now`. Timed states whose end has been
    /// reached fall back to the next applicable state.
    pub fn on_state_deadline(&mut self, now: SimTime) {
        match self.state {
            PhyState::Transmitting if now >= self.end_tx => self.settle(now),
            PhyState::Receiving if now >= self.end_rx => self.settle(now),
            PhyState::Switching if now >= self.end_switching => self.settle(now),
            PhyState::CcaBusy if now >= self.end_cca_busy => self.settle(now),
            _ => {}
        }
    }
}

// ============================================================================
// Aggregation Context
// ============================================================================

/// What the receive pipeline should do with a signal, from the A-MPDU point
/// of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationVerdict {
    /// Go on with synchronization.
    Accept,
    /// Continuation subframe without a decodable context.
    Drop,
}

/// Receive-side A-MPDU bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct AggregationContext {
    /// Subframes still expected.
    pub mpdus_remaining: u16,
    /// Reference number of the current aggregate.
    pub reference_number: u32,
    /// Whether the header of the current burst was decoded.
    pub plcp_success: bool,
}

impl AggregationContext {
    /// Update the context for an arriving subframe.
    ///
    /// `remaining` is the A-MPDU tag of the subframe, `None` for frames
    /// that are not aggregated.
    pub fn on_arrival(&mut self, preamble_present: bool, remaining: Option<u16>) -> AggregationVerdict {
        if !preamble_present && (self.mpdus_remaining == 0 || !self.plcp_success) {
            self.plcp_success = false;
            self.mpdus_remaining = 0;
            return AggregationVerdict::Drop;
        }
        match (preamble_present, remaining) {
            (true, Some(remaining)) if self.mpdus_remaining == 0 => {
                self.mpdus_remaining = remaining;
                self.reference_number = self.reference_number.wrapping_add(1);
            }
            (false, Some(remaining)) if remaining < self.mpdus_remaining => {
                self.mpdus_remaining -= 1;
            }
            (true, Some(remaining)) => {
                tracing::debug!(
                    "new A-MPDU while {} subframes still expected, accumulating",
                    self.mpdus_remaining
                );
                self.mpdus_remaining = self.mpdus_remaining.saturating_add(remaining);
            }
            (true, None) if self.mpdus_remaining > 0 => {
                tracing::debug!(
                    "preamble received while {} A-MPDU subframes still expected",
                    self.mpdus_remaining
                );
            }
            _ => {}
        }
        AggregationVerdict::Accept
    }

    /// Forget the aggregate in progress.
    pub fn reset(&mut self) {
        self.mpdus_remaining = 0;
    }
}

// ============================================================================
// Resource Units
// ============================================================================

/// Resource-unit participation of a station.
#[derive(Debug, Clone, Default)]
pub struct ResourceUnitTable {
    listening: BTreeSet<u8>,
    tx_busy: BTreeMap<u8, bool>,
}

impl ResourceUnitTable {
    /// Listen on an RU index.
    pub fn listen_on(&mut self, ru: u8) {
        self.listening.insert(ru);
    }

    /// Whether the station listens on an RU index.
    pub fn is_rxing_on(&self, ru: u8) -> bool {
        self.listening.contains(&ru)
    }

    /// Allocate an RU index for transmission, initially idle.
    pub fn allocate_tx(&mut self, ru: u8) {
        self.tx_busy.entry(ru).or_insert(false);
    }

    /// Set the transmission busy flag of an RU.
    pub fn set_txing(&mut self, ru: u8, busy: bool) {
        self.tx_busy.insert(ru, busy);
    }

    /// Whether a transmission is ongoing on an RU.
    pub fn is_txing_on(&self, ru: u8) -> bool {
        self.tx_busy.get(&ru).copied().unwrap_or(false)
    }

    /// Whether every allocated transmit RU is busy, i.e. the transmission
    /// just issued completes the multi-user set.
    pub fn is_last_ru_tx(&self) -> bool {
        !self.tx_busy.is_empty() && self.tx_busy.values().all(|busy| *busy)
    }

    /// Number of RUs currently transmitting.
    pub fn busy_tx_count(&self) -> usize {
        self.tx_busy.values().filter(|busy| **busy).count()
    }
}
