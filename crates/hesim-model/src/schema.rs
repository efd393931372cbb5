//! YAML schema types.
//!
//! Every section is an overlay: fields left out keep the value from the
//! layer below (built-in defaults, then file `defaults`, then the station).

use hesim_common::{ModulationClass, Position, SimTime};
use hesim_phy::{
    channel_to_frequency_mhz, frequency_to_channel, AggregateDecodePolicy, HeaderFailurePolicy, HePhyConfig,
    StationRole,
};
use hesim_agents::ControlAgentConfig;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

// ============================================================================
// PHY Overrides
// ============================================================================

/// Partial PHY configuration.
///
/// ```yaml
/// phy:
///   ed_threshold_dbm: -90
///   channel_number: 40
///   header_failure_policy: mark_failure
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhyOverrides {
    pub ed_threshold_dbm: Option<f64>,
    pub cca_mode1_threshold_dbm: Option<f64>,
    pub obss_cca_threshold_dbm: Option<f64>,
    pub tx_gain_db: Option<f64>,
    pub rx_gain_db: Option<f64>,
    pub rx_noise_figure_db: Option<f64>,
    pub tx_power_start_dbm: Option<f64>,
    pub tx_power_end_dbm: Option<f64>,
    pub n_tx_power_levels: Option<u8>,
    pub channel_number: Option<u16>,
    pub frequency_mhz: Option<u16>,
    pub channel_width_mhz: Option<u16>,
    pub channel_switch_delay_us: Option<u64>,
    pub color: Option<u8>,
    pub role: Option<StationRole>,
    pub max_modulation_class: Option<ModulationClass>,
    pub max_mcs: Option<u8>,
    pub small_packet_threshold_bytes: Option<u32>,
    pub header_success_probability: Option<f64>,
    pub header_failure_policy: Option<HeaderFailurePolicy>,
    pub aggregate_decode_policy: Option<AggregateDecodePolicy>,
}

macro_rules! overlay_fields {
    ($dst:expr, $src:expr, $($field:ident),+ $(,)?) => {
        $( if $src.$field.is_some() { $dst.$field = $src.$field; } )+
    };
}

impl PhyOverrides {
    /// Layer `other` on top of `self`.
    pub fn overlay(&mut self, other: &PhyOverrides) {
        overlay_fields!(
            self,
            other,
            ed_threshold_dbm,
            cca_mode1_threshold_dbm,
            obss_cca_threshold_dbm,
            tx_gain_db,
            rx_gain_db,
            rx_noise_figure_db,
            tx_power_start_dbm,
            tx_power_end_dbm,
            n_tx_power_levels,
            channel_number,
            frequency_mhz,
            channel_width_mhz,
            channel_switch_delay_us,
            color,
            role,
            max_modulation_class,
            max_mcs,
            small_packet_threshold_bytes,
            header_success_probability,
            header_failure_policy,
            aggregate_decode_policy,
        );
    }

    /// Write the set fields into a configuration. A channel number without
    /// a frequency (or the reverse) derives the missing one.
    pub fn apply_to(&self, config: &mut HePhyConfig) {
        macro_rules! set {
            ($($field:ident),+) => { $( if let Some(v) = self.$field { config.$field = v; } )+ };
        }
        set!(
            ed_threshold_dbm,
            cca_mode1_threshold_dbm,
            obss_cca_threshold_dbm,
            tx_gain_db,
            rx_gain_db,
            rx_noise_figure_db,
            tx_power_start_dbm,
            tx_power_end_dbm,
            n_tx_power_levels,
            channel_width_mhz,
            color,
            role,
            max_modulation_class,
            max_mcs,
            small_packet_threshold_bytes,
            header_success_probability,
            header_failure_policy,
            aggregate_decode_policy
        );
        if let Some(us) = self.channel_switch_delay_us {
            config.channel_switch_delay = SimTime::from_micros(us);
        }
        match (self.channel_number, self.frequency_mhz) {
            (Some(channel), Some(frequency)) => {
                config.channel_number = channel;
                config.frequency_mhz = frequency;
            }
            (Some(channel), None) => {
                config.channel_number = channel;
                config.frequency_mhz = channel_to_frequency_mhz(channel);
            }
            (None, Some(frequency)) => {
                config.channel_number = frequency_to_channel(frequency);
                config.frequency_mhz = frequency;
            }
            (None, None) => {}
        }
    }
}

// ============================================================================
// Channel
// ============================================================================

fn default_exponent() -> f64 {
    3.0
}

fn default_reference_loss_db() -> f64 {
    46.6777
}

fn default_speed() -> f64 {
    hesim_phy::propagation::SPEED_OF_LIGHT
}

/// Propagation loss model of the medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum LossModelConfig {
    /// Log-distance path loss.
    LogDistance {
        #[serde(default = "default_exponent")]
        exponent: f64,
        #[serde(default = "default_reference_loss_db")]
        reference_loss_db: f64,
        /// Log-normal shadowing standard deviation in dB.
        #[serde(default)]
        shadowing_db: f64,
    },
    /// Free-space loss at a fixed frequency.
    Friis {
        frequency_mhz: u16,
        #[serde(default)]
        system_loss_db: f64,
    },
    /// Same received power everywhere.
    FixedRss { rss_dbm: f64 },
}

impl Default for LossModelConfig {
    fn default() -> Self {
        LossModelConfig::LogDistance {
            exponent: default_exponent(),
            reference_loss_db: default_reference_loss_db(),
            shadowing_db: 0.0,
        }
    }
}

/// Propagation delay model of the medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum DelayModelConfig {
    /// Constant propagation speed.
    ConstantSpeed {
        #[serde(default = "default_speed")]
        speed_m_per_s: f64,
    },
}

impl Default for DelayModelConfig {
    fn default() -> Self {
        DelayModelConfig::ConstantSpeed {
            speed_m_per_s: default_speed(),
        }
    }
}

/// The shared medium.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    pub loss: LossModelConfig,
    pub delay: DelayModelConfig,
}

// ============================================================================
// Simulation and Model Files
// ============================================================================

/// Simulation-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationSettings {
    /// Run length in seconds when the command line gives none.
    pub duration_s: Option<f64>,
    /// Seed when the command line gives none.
    pub seed: Option<u64>,
}

impl SimulationSettings {
    pub(crate) fn overlay(&mut self, other: &SimulationSettings) {
        overlay_fields!(self, other, duration_s, seed);
    }
}

/// `defaults` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct DefaultsYaml {
    pub phy: PhyOverrides,
    /// Traffic fields applied under every station's `traffic` block.
    pub traffic: Mapping,
}

/// One station.
///
/// ```yaml
/// stations:
///   - name: sta1
///     position: { x: 10, y: 0 }
///     role: { station: { aid: 1 } }
///     color: 1
///     channel: 36
///     traffic: { interval_s: 0.005 }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct StationYaml {
    pub name: String,
    /// Drop a station defined by an earlier file.
    #[serde(default)]
    pub remove: bool,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub role: Option<StationRole>,
    #[serde(default)]
    pub color: Option<u8>,
    #[serde(default)]
    pub channel: Option<u16>,
    #[serde(default)]
    pub phy: PhyOverrides,
    #[serde(default)]
    pub listen_resource_units: Option<Vec<u8>>,
    #[serde(default)]
    pub traffic: Option<Mapping>,
    #[serde(default)]
    pub control: Option<ControlAgentConfig>,
    #[serde(default)]
    pub groups: Option<Vec<String>>,
}

impl StationYaml {
    /// Layer a later definition of the same station on top of this one.
    pub fn overlay(&mut self, other: StationYaml) {
        if other.position.is_some() {
            self.position = other.position;
        }
        if other.role.is_some() {
            self.role = other.role;
        }
        if other.color.is_some() {
            self.color = other.color;
        }
        if other.channel.is_some() {
            self.channel = other.channel;
        }
        self.phy.overlay(&other.phy);
        if other.listen_resource_units.is_some() {
            self.listen_resource_units = other.listen_resource_units;
        }
        match (&mut self.traffic, other.traffic) {
            (Some(base), Some(overlay)) => merge_mapping(base, overlay),
            (base, overlay @ Some(_)) => *base = overlay,
            (_, None) => {}
        }
        if other.control.is_some() {
            self.control = other.control;
        }
        if other.groups.is_some() {
            self.groups = other.groups;
        }
    }

    /// Shortcut fields, as PHY overrides applied after `phy`.
    pub fn shortcuts(&self) -> PhyOverrides {
        PhyOverrides {
            role: self.role,
            color: self.color,
            channel_number: self.channel,
            ..Default::default()
        }
    }
}

/// One model file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ModelYaml {
    #[serde(default)]
    pub defaults: DefaultsYaml,
    #[serde(default)]
    pub channel: Option<ChannelConfig>,
    #[serde(default)]
    pub simulation: Option<SimulationSettings>,
    #[serde(default)]
    pub stations: Vec<StationYaml>,
}

/// Deep-merge `overlay` into `base`. Nested mappings merge key by key,
/// anything else is replaced.
pub(crate) fn merge_mapping(base: &mut Mapping, overlay: Mapping) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Mapping(existing)), Value::Mapping(nested)) => merge_mapping(existing, nested),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_number_derives_frequency() {
        let mut config = HePhyConfig::default();
        PhyOverrides {
            channel_number: Some(6),
            ..Default::default()
        }
        .apply_to(&mut config);
        assert_eq!(config.frequency_mhz, 2437);

        PhyOverrides {
            frequency_mhz: Some(5200),
            channel_switch_delay_us: Some(100),
            ..Default::default()
        }
        .apply_to(&mut config);
        assert_eq!(config.channel_number, 40);
        assert_eq!(config.channel_switch_delay, SimTime::from_micros(100));
    }

    #[test]
    fn test_overlay_keeps_unset_fields() {
        let mut base: PhyOverrides = serde_yaml::from_str("ed_threshold_dbm: -90\ncolor: 3\n").unwrap();
        let top: PhyOverrides = serde_yaml::from_str("color: 5\n").unwrap();
        base.overlay(&top);
        assert_eq!(base.ed_threshold_dbm, Some(-90.0));
        assert_eq!(base.color, Some(5));
        assert!(serde_yaml::from_str::<PhyOverrides>("ed_threshold: -90\n").is_err());
    }

    #[test]
    fn test_merge_mapping_is_deep() {
        let mut base: Mapping = serde_yaml::from_str("interval_s: 0.01\npattern:\n  type: ampdu\n  subframes: 4\n").unwrap();
        let overlay: Mapping = serde_yaml::from_str("pattern:\n  subframes: 8\nmcs: 3\n").unwrap();
        merge_mapping(&mut base, overlay);
        let expected: Mapping =
            serde_yaml::from_str("interval_s: 0.01\npattern:\n  type: ampdu\n  subframes: 8\nmcs: 3\n").unwrap();
        assert_eq!(base, expected);
    }

    #[test]
    fn test_loss_model_defaults() {
        let channel: ChannelConfig = serde_yaml::from_str("loss:\n  type: log_distance\n  shadowing_db: 2\n").unwrap();
        assert_eq!(
            channel.loss,
            LossModelConfig::LogDistance {
                exponent: 3.0,
                reference_loss_db: 46.6777,
                shadowing_db: 2.0
            }
        );
        assert_eq!(channel.delay, DelayModelConfig::default());
    }
}
