//! # hesim-metrics
//!
//! Metric definitions shared by the HESim crates.
//!
//! Every metric emitted through the [`metrics`] facade is declared once in
//! [`metric_defs`] so the runner can describe and list them. Per-node label
//! sets are built with [`MetricLabels`].

pub use metrics;

/// Kind of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonic counter.
    Counter,
    /// Histogram.
    Histogram,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MetricKind::Counter => "counter",
            MetricKind::Histogram => "histogram",
        };
        f.write_str(s)
    }
}

/// Static description of a metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    /// Metric name.
    pub name: &'static str,
    /// Metric kind.
    pub kind: MetricKind,
    /// Unit of the recorded values.
    pub unit: Option<metrics::Unit>,
    /// Human readable description.
    pub description: &'static str,
    /// Labels attached in addition to the node labels.
    pub labels: &'static [&'static str],
}

impl MetricDef {
    /// Unit as a display string, empty if unitless.
    pub fn unit_str(&self) -> &'static str {
        self.unit.map(|u| u.as_str()).unwrap_or("")
    }
}

/// All metrics emitted by the simulator.
pub mod metric_defs {
    use super::{MetricDef, MetricKind};
    use metrics::Unit;

    /// Frames put on the air.
    pub const PHY_TX_PACKETS: MetricDef = MetricDef {
        name: "hesim.phy.tx_packets",
        kind: MetricKind::Counter,
        unit: Some(Unit::Count),
        description: "Frames transmitted by the PHY",
        labels: &["preamble"],
    };

    /// Airtime spent transmitting.
    pub const PHY_TX_AIRTIME: MetricDef = MetricDef {
        name: "hesim.phy.tx_airtime",
        kind: MetricKind::Counter,
        unit: Some(Unit::Microseconds),
        description: "Cumulative time on air of transmitted frames",
        labels: &[],
    };

    /// Refused transmit requests.
    pub const PHY_TX_DROPPED: MetricDef = MetricDef {
        name: "hesim.phy.tx_dropped",
        kind: MetricKind::Counter,
        unit: Some(Unit::Count),
        description: "Transmit requests refused by the PHY",
        labels: &["reason"],
    };

    /// Receptions started.
    pub const PHY_RX_BEGIN: MetricDef = MetricDef {
        name: "hesim.phy.rx_begin",
        kind: MetricKind::Counter,
        unit: Some(Unit::Count),
        description: "Receptions the PHY synchronized on",
        labels: &[],
    };

    /// Receptions completed successfully.
    pub const PHY_RX_OK: MetricDef = MetricDef {
        name: "hesim.phy.rx_ok",
        kind: MetricKind::Counter,
        unit: Some(Unit::Count),
        description: "Frames received without error",
        labels: &[],
    };

    /// Receptions completed with errors.
    pub const PHY_RX_ERROR: MetricDef = MetricDef {
        name: "hesim.phy.rx_error",
        kind: MetricKind::Counter,
        unit: Some(Unit::Count),
        description: "Frames received with payload errors",
        labels: &[],
    };

    /// Signals not received.
    pub const PHY_RX_DROPPED: MetricDef = MetricDef {
        name: "hesim.phy.rx_dropped",
        kind: MetricKind::Counter,
        unit: Some(Unit::Count),
        description: "Arriving signals dropped before payload resolution",
        labels: &["reason"],
    };

    /// Payload SNR of resolved receptions.
    pub const PHY_RX_SNR: MetricDef = MetricDef {
        name: "hesim.phy.rx_snr",
        kind: MetricKind::Histogram,
        unit: None,
        description: "Payload SNR in dB at payload resolution",
        labels: &[],
    };

    /// State transitions.
    pub const PHY_STATE_TRANSITIONS: MetricDef = MetricDef {
        name: "hesim.phy.state_transitions",
        kind: MetricKind::Counter,
        unit: Some(Unit::Count),
        description: "PHY operating state transitions",
        labels: &["state"],
    };

    /// Signals fanned out by the channel.
    pub const CHANNEL_DELIVERIES: MetricDef = MetricDef {
        name: "hesim.channel.deliveries",
        kind: MetricKind::Counter,
        unit: Some(Unit::Count),
        description: "Signal copies scheduled to receivers by the channel",
        labels: &[],
    };

    /// Frames requested by traffic agents.
    pub const AGENT_TX_REQUESTS: MetricDef = MetricDef {
        name: "hesim.agent.tx_requests",
        kind: MetricKind::Counter,
        unit: Some(Unit::Count),
        description: "Frames handed to the PHY by traffic agents",
        labels: &[],
    };

    /// Wall-clock time spent handling one event.
    pub const SIMULATION_STEP_TIME: MetricDef = MetricDef {
        name: "hesim.timing.step_time",
        kind: MetricKind::Histogram,
        unit: Some(Unit::Microseconds),
        description: "Wall-clock time to handle a single event",
        labels: &[],
    };

    /// Every metric definition.
    pub const ALL: &[MetricDef] = &[
        PHY_TX_PACKETS,
        PHY_TX_AIRTIME,
        PHY_TX_DROPPED,
        PHY_RX_BEGIN,
        PHY_RX_OK,
        PHY_RX_ERROR,
        PHY_RX_DROPPED,
        PHY_RX_SNR,
        PHY_STATE_TRANSITIONS,
        CHANNEL_DELIVERIES,
        AGENT_TX_REQUESTS,
        SIMULATION_STEP_TIME,
    ];
}

/// Register descriptions for every metric with the installed recorder.
pub fn describe_metrics() {
    for def in metric_defs::ALL {
        let name = def.name;
        let description = def.description;
        match (def.kind, def.unit) {
            (MetricKind::Counter, Some(unit)) => metrics::describe_counter!(name, unit, description),
            (MetricKind::Counter, None) => metrics::describe_counter!(name, description),
            (MetricKind::Histogram, Some(unit)) => metrics::describe_histogram!(name, unit, description),
            (MetricKind::Histogram, None) => metrics::describe_histogram!(name, description),
        }
    }
}

/// Labels identifying the node an entity belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricLabels {
    /// Node name.
    pub node: String,
    /// Node role, e.g. `ap` or `sta`.
    pub node_type: String,
    /// Free-form grouping tags.
    pub groups: Vec<String>,
}

impl MetricLabels {
    /// Create labels for a node.
    pub fn new(node: impl Into<String>, node_type: &str) -> Self {
        MetricLabels {
            node: node.into(),
            node_type: node_type.to_string(),
            groups: Vec::new(),
        }
    }

    /// Attach grouping tags.
    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    /// Label pairs for the `metrics` macros.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        let mut labels = vec![("node", self.node.clone()), ("node_type", self.node_type.clone())];
        if !self.groups.is_empty() {
            labels.push(("groups", self.groups.join(",")));
        }
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_unique() {
        let mut names: Vec<&str> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
    }

    #[test]
    fn test_labels_include_groups_only_when_set() {
        let labels = MetricLabels::new("ap0", "ap");
        assert_eq!(labels.to_labels().len(), 2);
        let labels = labels.with_groups(vec!["bss1".into(), "edge".into()]);
        assert_eq!(labels.to_labels()[2], ("groups", "bss1,edge".to_string()));
    }
}
