//! # hesim-model
//!
//! YAML model loading and simulation building for HESim.
//!
//! This crate provides:
//! - YAML schema types for scenario files ([`schema`])
//! - Model loading from files and strings, with layered overrides
//! - Simulation building from loaded models
//!
//! ## Layering
//!
//! Settings are resolved in order: built-in defaults → the `defaults` section
//! of every file, in file order → the station's own fields. When several files
//! define the same station, later definitions override earlier ones field by
//! field, and `remove: true` drops the station.

pub mod schema;

pub use schema::{ChannelConfig, DelayModelConfig, LossModelConfig, PhyOverrides, SimulationSettings};

use hesim_agents::{ControlAgent, ControlAgentConfig, TrafficAgent, TrafficConfig};
use hesim_common::{EntityId, EntityRegistry, Event, EventId, EventPayload, Position, SimTime};
use hesim_metrics::MetricLabels;
use hesim_phy::{
    ConstantSpeedPropagationDelayModel, FixedRssLossModel, ForwardingObserver, FriisPropagationLossModel, HePhy,
    HePhyConfig, LogDistancePropagationLossModel, NullObserver, ObserverChain, PhyObserver, PropagationDelayModel,
    PropagationLossModel, WifiChannel,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use schema::{merge_mapping, ModelYaml, StationYaml};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during model operations.
#[derive(Debug, Error)]
pub enum ModelError {
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Station not found.
    #[error("Station not found: {0}")]
    StationNotFound(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid station configuration.
    #[error("Invalid configuration for station '{station}': {reason}")]
    InvalidStation {
        /// Station name.
        station: String,
        /// What is wrong.
        reason: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

// ============================================================================
// Public Model API
// ============================================================================

/// A loaded simulation model with every layer resolved.
#[derive(Debug, Clone)]
pub struct Model {
    stations: BTreeMap<String, Station>,
    channel: ChannelConfig,
    simulation: SimulationSettings,
}

impl Model {
    /// Stations by name.
    pub fn stations(&self) -> &BTreeMap<String, Station> {
        &self.stations
    }

    /// The shared medium.
    pub fn channel(&self) -> &ChannelConfig {
        &self.channel
    }

    /// Simulation-wide settings.
    pub fn simulation(&self) -> &SimulationSettings {
        &self.simulation
    }

    /// Find a station by name.
    pub fn find_station(&self, name: &str) -> Option<&Station> {
        self.stations.get(name)
    }
}

/// A station with its resolved configuration.
#[derive(Debug, Clone)]
pub struct Station {
    /// Station name (unique identifier).
    pub name: String,
    /// Position in meters.
    pub position: Position,
    /// PHY configuration. `channel_entity` is filled in by the builder.
    pub phy: HePhyConfig,
    /// RU indices the PHY listens on from the start.
    pub listen_resource_units: Vec<u8>,
    /// Traffic source, if any.
    pub traffic: Option<TrafficConfig>,
    /// Scripted control actions, if any.
    pub control: Option<ControlAgentConfig>,
    /// Metric groups.
    pub groups: Vec<String>,
}

// ============================================================================
// Model Loading
// ============================================================================

/// Load a simulation model from a file.
pub fn load_model(path: &Path) -> Result<Model, ModelError> {
    load_models(&[path])
}

/// Parse a simulation model from a YAML string.
pub fn load_model_from_str(yaml_str: &str) -> Result<Model, ModelError> {
    load_models_from_str(&[yaml_str])
}

/// Load and merge multiple simulation models from files.
///
/// Later files override earlier ones. See [`load_models_from_str`].
pub fn load_models(paths: &[&Path]) -> Result<Model, ModelError> {
    if paths.is_empty() {
        return Err(ModelError::InvalidConfig("No model files provided".to_string()));
    }

    let yaml_strings = paths
        .iter()
        .map(|path| std::fs::read_to_string(path))
        .collect::<Result<Vec<String>, std::io::Error>>()?;
    let yaml_strs: Vec<&str> = yaml_strings.iter().map(|s| s.as_str()).collect();

    load_models_from_str(&yaml_strs)
}

/// Load and merge multiple simulation models from YAML strings.
///
/// Later strings override earlier ones:
/// - `defaults` from later strings layer over earlier defaults
/// - stations with the same name merge field by field
/// - `channel` is replaced as a whole, `simulation` field by field
///
/// Validation runs only on the final merged model.
pub fn load_models_from_str(yaml_strs: &[&str]) -> Result<Model, ModelError> {
    if yaml_strs.is_empty() {
        return Err(ModelError::InvalidConfig("No model strings provided".to_string()));
    }

    let mut phy_defaults = PhyOverrides::default();
    let mut traffic_defaults = Mapping::new();
    let mut channel = ChannelConfig::default();
    let mut simulation = SimulationSettings::default();
    let mut stations: BTreeMap<String, StationYaml> = BTreeMap::new();

    for yaml_str in yaml_strs {
        let yaml: ModelYaml = serde_yaml::from_str(yaml_str)?;

        phy_defaults.overlay(&yaml.defaults.phy);
        merge_mapping(&mut traffic_defaults, yaml.defaults.traffic);
        if let Some(c) = yaml.channel {
            channel = c;
        }
        if let Some(s) = yaml.simulation {
            simulation.overlay(&s);
        }

        for station in yaml.stations {
            if station.remove {
                if stations.remove(&station.name).is_none() {
                    return Err(ModelError::StationNotFound(station.name));
                }
            } else if let Some(existing) = stations.get_mut(&station.name) {
                existing.overlay(station);
            } else {
                stations.insert(station.name.clone(), station);
            }
        }
    }

    let stations = stations
        .into_values()
        .map(|station| {
            let resolved = resolve_station(station, &phy_defaults, &traffic_defaults)?;
            Ok((resolved.name.clone(), resolved))
        })
        .collect::<Result<BTreeMap<_, _>, ModelError>>()?;

    if let Some(duration_s) = simulation.duration_s {
        if !(duration_s > 0.0) {
            return Err(ModelError::InvalidConfig(format!(
                "simulation duration must be positive, got {}",
                duration_s
            )));
        }
    }

    Ok(Model {
        stations,
        channel,
        simulation,
    })
}

/// Apply every layer to a merged station definition.
fn resolve_station(
    station: StationYaml,
    phy_defaults: &PhyOverrides,
    traffic_defaults: &Mapping,
) -> Result<Station, ModelError> {
    let invalid = |reason: String| ModelError::InvalidStation {
        station: station.name.clone(),
        reason,
    };

    let position = station
        .position
        .ok_or_else(|| invalid("missing position".to_string()))?;

    let mut phy = HePhyConfig::default();
    phy_defaults.apply_to(&mut phy);
    station.phy.apply_to(&mut phy);
    station.shortcuts().apply_to(&mut phy);

    if !(0.0..=1.0).contains(&phy.header_success_probability) {
        return Err(invalid(format!(
            "header_success_probability {} is outside [0, 1]",
            phy.header_success_probability
        )));
    }
    if phy.n_tx_power_levels == 0 {
        return Err(invalid("n_tx_power_levels must be at least 1".to_string()));
    }

    let traffic = match &station.traffic {
        Some(overlay) => {
            let mut merged = traffic_defaults.clone();
            merge_mapping(&mut merged, overlay.clone());
            let config: TrafficConfig = serde_yaml::from_value(Value::Mapping(merged))?;
            if config.interval_s <= 0.0 {
                return Err(invalid("traffic interval_s must be positive".to_string()));
            }
            Some(config)
        }
        None => None,
    };

    Ok(Station {
        name: station.name.clone(),
        position,
        phy,
        listen_resource_units: station.listen_resource_units.clone().unwrap_or_default(),
        traffic,
        control: station.control.clone(),
        groups: station.groups.clone().unwrap_or_default(),
    })
}

// ============================================================================
// Model Building
// ============================================================================

/// Entity IDs and settings of a built station, for display and statistics.
#[derive(Debug, Clone)]
pub struct StationInfo {
    /// Station name from the model.
    pub name: String,
    /// Entity ID of the PHY.
    pub phy_entity_id: EntityId,
    /// Entity ID of the traffic agent.
    pub traffic_agent_entity_id: Option<EntityId>,
    /// Entity ID of the control agent.
    pub control_agent_entity_id: Option<EntityId>,
    /// Position in meters.
    pub position: Position,
    /// Role label ("ap" or "sta").
    pub role: &'static str,
    /// BSS color.
    pub color: u8,
    /// Initial channel number.
    pub channel_number: u16,
}

/// Result of building a simulation from a model.
pub struct BuiltSimulation {
    /// Entity registry with all entities.
    pub entities: EntityRegistry,
    /// Entity ID of the shared medium.
    pub channel_entity_id: EntityId,
    /// Initial events to seed the simulation, in scheduling order.
    pub initial_events: Vec<Event>,
    /// Information about each station.
    pub station_infos: Vec<StationInfo>,
}

/// Build a simulation from a model.
pub fn build_simulation(model: &Model, seed: u64) -> Result<BuiltSimulation, ModelError> {
    build_simulation_with_observers(model, seed, |_| None)
}

/// Build a simulation, attaching an extra observer to each PHY.
///
/// `extra_observer` is called once per station before its PHY is created.
/// The returned observer receives every notification after the station's
/// traffic agent.
pub fn build_simulation_with_observers<F>(
    model: &Model,
    seed: u64,
    mut extra_observer: F,
) -> Result<BuiltSimulation, ModelError>
where
    F: FnMut(&StationInfo) -> Option<Box<dyn PhyObserver>>,
{
    let mut entities = EntityRegistry::new();
    let mut initial_events = Vec::new();
    let mut next_event_id: u64 = 0;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut push_event = |time: SimTime, target: EntityId, payload: EventPayload| {
        initial_events.push(Event {
            id: EventId(next_event_id),
            time,
            source: target,
            targets: vec![target],
            payload,
        });
        next_event_id += 1;
    };

    // Channel entity first (entity ID 0)
    let channel_entity_id = EntityId::new(0);
    let mut channel = WifiChannel::new(
        channel_entity_id,
        build_loss_model(&model.channel.loss)?,
        build_delay_model(&model.channel.delay),
    );
    let mut next_entity_id: u64 = 1;
    let mut station_infos = Vec::new();

    for station in model.stations.values() {
        let phy_id = EntityId::new(next_entity_id);
        next_entity_id += 1;
        let traffic_agent_id = station.traffic.as_ref().map(|_| {
            let id = EntityId::new(next_entity_id);
            next_entity_id += 1;
            id
        });
        let control_agent_id = station.control.as_ref().map(|_| {
            let id = EntityId::new(next_entity_id);
            next_entity_id += 1;
            id
        });

        let info = StationInfo {
            name: station.name.clone(),
            phy_entity_id: phy_id,
            traffic_agent_entity_id: traffic_agent_id,
            control_agent_entity_id: control_agent_id,
            position: station.position,
            role: station.phy.role.as_label(),
            color: station.phy.color,
            channel_number: station.phy.channel_number,
        };

        let mut chain = ObserverChain::new();
        if let Some(agent_id) = traffic_agent_id {
            chain = chain.with(Box::new(ForwardingObserver::new(agent_id)));
        }
        if let Some(extra) = extra_observer(&info) {
            chain = chain.with(extra);
        }
        let observer: Box<dyn PhyObserver> = if chain.is_empty() {
            Box::new(NullObserver)
        } else {
            Box::new(chain)
        };

        let mut phy_config = station.phy.clone();
        phy_config.channel_entity = channel_entity_id;
        let labels =
            MetricLabels::new(station.name.clone(), phy_config.role.as_label()).with_groups(station.groups.clone());
        let mut phy = HePhy::new(phy_id, station.name.clone(), phy_config, observer).with_metric_labels(labels);
        for ru in &station.listen_resource_units {
            phy.listen_on_resource_unit(*ru);
        }
        channel.add(phy_id, station.position, station.phy.channel_number);
        entities.register(Box::new(phy));

        if let (Some(agent_id), Some(traffic)) = (traffic_agent_id, &station.traffic) {
            let agent = TrafficAgent::new(
                agent_id,
                format!("{}-traffic", station.name),
                phy_id,
                station.phy.frequency_mhz,
                traffic.clone(),
            )
            .with_metric_labels(MetricLabels::new(station.name.clone(), "agent").with_groups(station.groups.clone()));
            for (time, target, payload) in agent.initial_events(&mut rng) {
                push_event(time, target, payload);
            }
            entities.register(Box::new(agent));
        }

        if let (Some(agent_id), Some(control)) = (control_agent_id, &station.control) {
            let agent = ControlAgent::new(agent_id, format!("{}-control", station.name), phy_id, control.clone());
            for (time, target, payload) in agent.initial_events(&mut rng) {
                push_event(time, target, payload);
            }
            entities.register(Box::new(agent));
        }

        log::debug!(
            "Built station '{}': phy={:?} traffic={:?} control={:?} channel={}",
            info.name,
            info.phy_entity_id,
            info.traffic_agent_entity_id,
            info.control_agent_entity_id,
            info.channel_number
        );
        station_infos.push(info);
    }

    entities.register(Box::new(channel));

    Ok(BuiltSimulation {
        entities,
        channel_entity_id,
        initial_events,
        station_infos,
    })
}

fn build_loss_model(config: &LossModelConfig) -> Result<Box<dyn PropagationLossModel>, ModelError> {
    Ok(match *config {
        LossModelConfig::LogDistance {
            exponent,
            reference_loss_db,
            shadowing_db,
        } => Box::new(
            LogDistancePropagationLossModel::new(exponent, reference_loss_db)
                .with_shadowing(shadowing_db)
                .map_err(|e| ModelError::InvalidConfig(format!("shadowing_db {}: {}", shadowing_db, e)))?,
        ),
        LossModelConfig::Friis {
            frequency_mhz,
            system_loss_db,
        } => Box::new(FriisPropagationLossModel::new(frequency_mhz).with_system_loss(system_loss_db)),
        LossModelConfig::FixedRss { rss_dbm } => Box::new(FixedRssLossModel { rss_dbm }),
    })
}

fn build_delay_model(config: &DelayModelConfig) -> Box<dyn PropagationDelayModel> {
    match *config {
        DelayModelConfig::ConstantSpeed { speed_m_per_s } => {
            Box::new(ConstantSpeedPropagationDelayModel { speed_m_per_s })
        }
    }
}
