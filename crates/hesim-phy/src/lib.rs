//! # hesim-phy
//!
//! HE (802.11ax) Wi-Fi PHY model for HESim.
//!
//! This crate provides:
//! - PPDU duration calculations ([`timing`])
//! - Chunk error-rate model ([`ErrorRateModel`], [`NistErrorRateModel`])
//! - Interference tracking ([`InterferenceHelper`])
//! - State bookkeeping ([`PhyStateMachine`], [`AggregationContext`], [`ResourceUnitTable`])
//! - The PHY entity ([`WifiPhy`], [`HePhy`]) and its configuration ([`HePhyConfig`])
//! - Notification sinks ([`PhyObserver`])
//! - Propagation models and the shared medium ([`WifiChannel`])

pub mod channel;
pub mod config;
pub mod error_rate;
pub mod interference;
pub mod observer;
pub mod phy;
pub mod propagation;
pub mod state;
pub mod timing;

pub use channel::WifiChannel;
pub use config::{
    channel_to_frequency_mhz, frequency_to_channel, AggregateDecodePolicy, HeaderFailurePolicy, HePhyConfig,
    StationRole,
};
pub use error_rate::{ErrorRateModel, NistErrorRateModel};
pub use interference::{dbm_to_w, w_to_dbm, InterferenceEventId, InterferenceHelper, SnrPer};
pub use observer::{ForwardingObserver, NotificationLog, NullObserver, ObserverChain, PhyObserver, RecordingObserver};
pub use phy::{HePhy, WifiPhy};
pub use propagation::{
    ConstantSpeedPropagationDelayModel, FixedRssLossModel, FriisPropagationLossModel, LogDistancePropagationLossModel,
    PropagationDelayModel, PropagationLossModel,
};
pub use state::{AggregationContext, AggregationVerdict, PhyStateMachine, ResourceUnitTable};
pub use timing::calculate_tx_duration;
