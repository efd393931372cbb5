//! Propagation loss and delay models used by the channel.

use hesim_common::{Position, SimTime};
use rand::RngCore;
use rand_distr::{Distribution, Normal, NormalError};

/// Speed of light in m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Maps a transmit power and the two endpoints to a received power.
pub trait PropagationLossModel: Send {
    /// Received power in dBm.
    fn calc_rx_power(&self, tx_power_dbm: f64, tx: &Position, rx: &Position, rng: &mut dyn RngCore) -> f64;

    /// Model name for logs.
    fn name(&self) -> &'static str;
}

/// Maps the two endpoints to a propagation delay.
pub trait PropagationDelayModel: Send {
    /// Delay from `tx` to `rx`.
    fn delay(&self, tx: &Position, rx: &Position) -> SimTime;
}

// ============================================================================
// Log-distance
// ============================================================================

/// Log-distance path loss with optional log-normal shadowing.
///
/// `L(d) = L0 + 10 * n * log10(d / d0)` for `d > d0`, `L0` below.
#[derive(Debug, Clone)]
pub struct LogDistancePropagationLossModel {
    /// Path loss exponent.
    pub exponent: f64,
    /// Reference distance in meters.
    pub reference_distance_m: f64,
    /// Loss at the reference distance in dB.
    pub reference_loss_db: f64,
    shadowing: Option<Normal<f64>>,
}

impl LogDistancePropagationLossModel {
    /// Default exponent.
    pub const DEFAULT_EXPONENT: f64 = 3.0;
    /// Default reference loss, free space at 1 m and 5.15 GHz.
    pub const DEFAULT_REFERENCE_LOSS_DB: f64 = 46.6777;

    /// Model with the given exponent and reference loss at 1 m.
    pub fn new(exponent: f64, reference_loss_db: f64) -> Self {
        LogDistancePropagationLossModel {
            exponent,
            reference_distance_m: 1.0,
            reference_loss_db,
            shadowing: None,
        }
    }

    /// Add zero-mean shadowing with standard deviation `sigma_db`.
    pub fn with_shadowing(mut self, sigma_db: f64) -> Result<Self, NormalError> {
        self.shadowing = if sigma_db > 0.0 {
            Some(Normal::new(0.0, sigma_db)?)
        } else {
            None
        };
        Ok(self)
    }

    /// Deterministic part of the loss at a distance.
    pub fn path_loss_db(&self, distance_m: f64) -> f64 {
        if distance_m <= self.reference_distance_m {
            return self.reference_loss_db;
        }
        self.reference_loss_db + 10.0 * self.exponent * (distance_m / self.reference_distance_m).log10()
    }
}

impl Default for LogDistancePropagationLossModel {
    fn default() -> Self {
        Self::new(Self::DEFAULT_EXPONENT, Self::DEFAULT_REFERENCE_LOSS_DB)
    }
}

impl PropagationLossModel for LogDistancePropagationLossModel {
    fn calc_rx_power(&self, tx_power_dbm: f64, tx: &Position, rx: &Position, rng: &mut dyn RngCore) -> f64 {
        let shadowing = self.shadowing.map(|normal| normal.sample(rng)).unwrap_or(0.0);
        tx_power_dbm - self.path_loss_db(tx.distance_to(rx)) - shadowing
    }

    fn name(&self) -> &'static str {
        "log_distance"
    }
}

// ============================================================================
// Friis
// ============================================================================

/// Free-space loss at a fixed frequency.
#[derive(Debug, Clone, Copy)]
pub struct FriisPropagationLossModel {
    frequency_hz: f64,
    system_loss_db: f64,
}

impl FriisPropagationLossModel {
    /// Model for a carrier frequency in MHz.
    pub fn new(frequency_mhz: u16) -> Self {
        FriisPropagationLossModel {
            frequency_hz: frequency_mhz as f64 * 1e6,
            system_loss_db: 0.0,
        }
    }

    /// Add a fixed system loss.
    pub fn with_system_loss(mut self, system_loss_db: f64) -> Self {
        self.system_loss_db = system_loss_db;
        self
    }

    /// Loss at a distance in dB. Never negative.
    pub fn path_loss_db(&self, distance_m: f64) -> f64 {
        if distance_m <= 0.0 {
            return 0.0;
        }
        let wavelength = SPEED_OF_LIGHT / self.frequency_hz;
        let loss = 20.0 * (4.0 * std::f64::consts::PI * distance_m / wavelength).log10() + self.system_loss_db;
        loss.max(0.0)
    }
}

impl PropagationLossModel for FriisPropagationLossModel {
    fn calc_rx_power(&self, tx_power_dbm: f64, tx: &Position, rx: &Position, _rng: &mut dyn RngCore) -> f64 {
        tx_power_dbm - self.path_loss_db(tx.distance_to(rx))
    }

    fn name(&self) -> &'static str {
        "friis"
    }
}

/// Every receiver sees the same power regardless of distance.
#[derive(Debug, Clone, Copy)]
pub struct FixedRssLossModel {
    /// Received power in dBm.
    pub rss_dbm: f64,
}

impl PropagationLossModel for FixedRssLossModel {
    fn calc_rx_power(&self, _tx_power_dbm: f64, _tx: &Position, _rx: &Position, _rng: &mut dyn RngCore) -> f64 {
        self.rss_dbm
    }

    fn name(&self) -> &'static str {
        "fixed_rss"
    }
}

// ============================================================================
// Delay
// ============================================================================

/// Delay at a constant propagation speed.
#[derive(Debug, Clone, Copy)]
pub struct ConstantSpeedPropagationDelayModel {
    /// Speed in m/s.
    pub speed_m_per_s: f64,
}

impl Default for ConstantSpeedPropagationDelayModel {
    fn default() -> Self {
        ConstantSpeedPropagationDelayModel {
            speed_m_per_s: SPEED_OF_LIGHT,
        }
    }
}

impl PropagationDelayModel for ConstantSpeedPropagationDelayModel {
    fn delay(&self, tx: &Position, rx: &Position) -> SimTime {
        SimTime::from_nanos((tx.distance_to(rx) / self.speed_m_per_s * 1e9).round() as u64)
    }
}
