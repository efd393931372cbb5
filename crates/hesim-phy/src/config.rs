//! PHY configuration.

use hesim_common::{EntityId, ModulationClass, SimTime, WifiMode};
use serde::{Deserialize, Serialize};

/// Role of the station owning a PHY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationRole {
    /// Access point. Receives uplink resource-unit transmissions from
    /// several stations at once.
    AccessPoint,
    /// Associated station.
    Station {
        /// Association identifier.
        aid: u16,
    },
}

impl StationRole {
    /// Whether this is an access point.
    pub fn is_access_point(&self) -> bool {
        matches!(self, StationRole::AccessPoint)
    }

    /// Short label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StationRole::AccessPoint => "ap",
            StationRole::Station { .. } => "sta",
        }
    }
}

/// What a failed PLCP header decode does to the burst decode flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderFailurePolicy {
    /// The drop is reported but the flag is still set, as the legacy model
    /// does. The payload is resolved on its own SNR.
    #[default]
    MarkSuccess,
    /// The flag is cleared.
    MarkFailure,
}

/// Whether the burst decode flag gates payload resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateDecodePolicy {
    /// One flag is shared by all subframes of a burst and payload
    /// resolution ignores it.
    #[default]
    SharedAcrossBurst,
    /// A subframe whose header context was not decoded fails.
    PerSubframe,
}

/// Configuration of an HE PHY.
///
/// Defaults follow common 802.11 simulator settings.
#[derive(Debug, Clone)]
pub struct HePhyConfig {
    /// Energy detection threshold in dBm. Weaker signals are never decoded.
    pub ed_threshold_dbm: f64,
    /// CCA mode-1 threshold in dBm, for own-BSS and uncolored energy.
    pub cca_mode1_threshold_dbm: f64,
    /// CCA threshold in dBm for energy from other BSS colors.
    pub obss_cca_threshold_dbm: f64,
    /// Transmit antenna gain in dB.
    pub tx_gain_db: f64,
    /// Receive antenna gain in dB.
    pub rx_gain_db: f64,
    /// Receiver noise figure in dB.
    pub rx_noise_figure_db: f64,
    /// Power of the lowest transmit power level in dBm.
    pub tx_power_start_dbm: f64,
    /// Power of the highest transmit power level in dBm.
    pub tx_power_end_dbm: f64,
    /// Number of transmit power levels.
    pub n_tx_power_levels: u8,
    /// Channel number.
    pub channel_number: u16,
    /// Center frequency in MHz.
    pub frequency_mhz: u16,
    /// Channel width in MHz.
    pub channel_width_mhz: u16,
    /// Time to retune.
    pub channel_switch_delay: SimTime,
    /// Own BSS color, 0 for none.
    pub color: u8,
    /// Station role.
    pub role: StationRole,
    /// Highest modulation class the receiver supports.
    pub max_modulation_class: ModulationClass,
    /// Highest MCS supported for HT and later classes.
    pub max_mcs: u8,
    /// Frames smaller than this many bytes are never corrupted.
    pub small_packet_threshold_bytes: u32,
    /// Probability that a PLCP header decodes.
    pub header_success_probability: f64,
    /// Effect of a header decode failure.
    pub header_failure_policy: HeaderFailurePolicy,
    /// Effect of the burst decode flag on payload resolution.
    pub aggregate_decode_policy: AggregateDecodePolicy,
    /// Entity ID of the channel entity (for routing transmissions).
    pub channel_entity: EntityId,
}

impl HePhyConfig {
    /// Default energy detection threshold.
    pub const DEFAULT_ED_THRESHOLD_DBM: f64 = -96.0;
    /// Default CCA mode-1 threshold.
    pub const DEFAULT_CCA_MODE1_THRESHOLD_DBM: f64 = -99.0;
    /// Default OBSS CCA threshold.
    pub const DEFAULT_OBSS_CCA_THRESHOLD_DBM: f64 = -62.0;
    /// Default receiver noise figure.
    pub const DEFAULT_RX_NOISE_FIGURE_DB: f64 = 7.0;
    /// Default transmit power.
    pub const DEFAULT_TX_POWER_DBM: f64 = 16.0206;
    /// Default channel switch delay.
    pub const DEFAULT_CHANNEL_SWITCH_DELAY: SimTime = SimTime::from_micros(250);
    /// Default small-frame threshold.
    pub const DEFAULT_SMALL_PACKET_THRESHOLD_BYTES: u32 = 150;

    /// Transmit power of a power level in dBm.
    pub fn power_dbm(&self, level: u8) -> f64 {
        if self.n_tx_power_levels > 1 {
            let step = (self.tx_power_end_dbm - self.tx_power_start_dbm) / (self.n_tx_power_levels - 1) as f64;
            self.tx_power_start_dbm + level.min(self.n_tx_power_levels - 1) as f64 * step
        } else {
            self.tx_power_start_dbm
        }
    }

    /// Whether the receiver can decode a mode.
    pub fn is_mode_supported(&self, mode: &WifiMode) -> bool {
        if mode.class > self.max_modulation_class {
            return false;
        }
        !mode.class.uses_mcs() || mode.mcs <= self.max_mcs
    }
}

impl Default for HePhyConfig {
    fn default() -> Self {
        HePhyConfig {
            ed_threshold_dbm: Self::DEFAULT_ED_THRESHOLD_DBM,
            cca_mode1_threshold_dbm: Self::DEFAULT_CCA_MODE1_THRESHOLD_DBM,
            obss_cca_threshold_dbm: Self::DEFAULT_OBSS_CCA_THRESHOLD_DBM,
            tx_gain_db: 0.0,
            rx_gain_db: 0.0,
            rx_noise_figure_db: Self::DEFAULT_RX_NOISE_FIGURE_DB,
            tx_power_start_dbm: Self::DEFAULT_TX_POWER_DBM,
            tx_power_end_dbm: Self::DEFAULT_TX_POWER_DBM,
            n_tx_power_levels: 1,
            channel_number: 36,
            frequency_mhz: 5180,
            channel_width_mhz: 20,
            channel_switch_delay: Self::DEFAULT_CHANNEL_SWITCH_DELAY,
            color: 0,
            role: StationRole::Station { aid: 1 },
            max_modulation_class: ModulationClass::He,
            max_mcs: 11,
            small_packet_threshold_bytes: Self::DEFAULT_SMALL_PACKET_THRESHOLD_BYTES,
            header_success_probability: 1.0,
            header_failure_policy: HeaderFailurePolicy::default(),
            aggregate_decode_policy: AggregateDecodePolicy::default(),
            channel_entity: EntityId::new(0),
        }
    }
}

/// Center frequency in MHz of a channel number. Channels 1-14 map to the
/// 2.4 GHz band, everything else to 5 GHz.
pub fn channel_to_frequency_mhz(channel: u16) -> u16 {
    match channel {
        14 => 2484,
        1..=13 => 2407 + 5 * channel,
        _ => 5000 + 5 * channel,
    }
}

/// Channel number of a center frequency in MHz.
pub fn frequency_to_channel(frequency_mhz: u16) -> u16 {
    match frequency_mhz {
        2484 => 14,
        2412..=2472 => (frequency_mhz - 2407) / 5,
        f if f >= 5000 => (f - 5000) / 5,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_levels() {
        let config = HePhyConfig {
            tx_power_start_dbm: 10.0,
            tx_power_end_dbm: 20.0,
            n_tx_power_levels: 3,
            ..Default::default()
        };
        assert_eq!(config.power_dbm(0), 10.0);
        assert_eq!(config.power_dbm(1), 15.0);
        assert_eq!(config.power_dbm(2), 20.0);
        assert_eq!(config.power_dbm(9), 20.0);
    }

    #[test]
    fn test_supported_modes() {
        let config = HePhyConfig {
            max_modulation_class: ModulationClass::Vht,
            max_mcs: 7,
            ..Default::default()
        };
        assert!(config.is_mode_supported(&WifiMode::ofdm_6mbps()));
        assert!(config.is_mode_supported(&WifiMode::new(ModulationClass::Vht, 7)));
        assert!(!config.is_mode_supported(&WifiMode::new(ModulationClass::Vht, 8)));
        assert!(!config.is_mode_supported(&WifiMode::he(0)));
    }

    #[test]
    fn test_channel_frequency_mapping() {
        assert_eq!(channel_to_frequency_mhz(1), 2412);
        assert_eq!(channel_to_frequency_mhz(14), 2484);
        assert_eq!(channel_to_frequency_mhz(36), 5180);
        for ch in [1, 6, 11, 14, 36, 40, 149] {
            assert_eq!(frequency_to_channel(channel_to_frequency_mhz(ch)), ch);
        }
    }
}
