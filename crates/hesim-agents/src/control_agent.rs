//! Scripted PHY control.
//!
//! A [`ControlAgent`] issues a fixed list of control requests to one PHY at
//! configured simulation times: sleep and resume, channel or frequency
//! switches, and resource-unit setup.

use crate::jittered_delay;
use hesim_common::{Entity, EntityId, Event, EventPayload, PhyControlEvent, SimContext, SimError, SimTime};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A control request, as written in scenario files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    /// Put the radio to sleep.
    Sleep,
    /// Wake the radio up.
    Resume,
    /// Retune to a channel number.
    SwitchChannel(u16),
    /// Retune to a center frequency in MHz.
    SwitchFrequency(u16),
    /// Start listening on an RU index.
    ListenOnResourceUnit(u8),
    /// Allocate an RU index for transmission.
    AllocateTxResourceUnit(u8),
}

impl ControlAction {
    /// The PHY request this action maps to.
    pub fn to_control_event(self) -> PhyControlEvent {
        match self {
            ControlAction::Sleep => PhyControlEvent::SetSleepMode,
            ControlAction::Resume => PhyControlEvent::ResumeFromSleep,
            ControlAction::SwitchChannel(channel) => PhyControlEvent::SetChannelNumber(channel),
            ControlAction::SwitchFrequency(mhz) => PhyControlEvent::SetFrequency(mhz),
            ControlAction::ListenOnResourceUnit(ru) => PhyControlEvent::ListenOnResourceUnit(ru),
            ControlAction::AllocateTxResourceUnit(ru) => PhyControlEvent::AllocateTxResourceUnit(ru),
        }
    }
}

/// An action and the time it fires.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduledAction {
    /// Simulation time in seconds.
    pub at_s: f64,
    /// Standard deviation of the firing time.
    #[serde(default)]
    pub jitter_s: f64,
    /// What to do.
    pub action: ControlAction,
}

/// Configuration for a control agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlAgentConfig {
    /// Actions, in any order.
    pub actions: Vec<ScheduledAction>,
}

/// Issues scheduled control requests to one PHY.
pub struct ControlAgent {
    id: EntityId,
    name: String,
    phy: EntityId,
    config: ControlAgentConfig,
    fired: usize,
}

impl ControlAgent {
    /// Create a control agent for `phy`.
    pub fn new(id: EntityId, name: String, phy: EntityId, config: ControlAgentConfig) -> Self {
        ControlAgent {
            id,
            name,
            phy,
            config,
            fired: 0,
        }
    }

    /// Agent name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of actions issued so far.
    pub fn fired(&self) -> usize {
        self.fired
    }

    /// One timer per action. The timer ID is the action's index.
    pub fn initial_events(&self, rng: &mut ChaCha8Rng) -> Vec<(SimTime, EntityId, EventPayload)> {
        self.config
            .actions
            .iter()
            .enumerate()
            .map(|(index, scheduled)| {
                (
                    jittered_delay(rng, scheduled.at_s, scheduled.jitter_s),
                    self.id,
                    EventPayload::Timer {
                        timer_id: index as u64,
                    },
                )
            })
            .collect()
    }

    fn fire(&mut self, ctx: &mut SimContext, index: usize) {
        let Some(scheduled) = self.config.actions.get(index) else {
            warn!("ControlAgent[{}]: no action #{}", self.name, index);
            return;
        };
        let request = scheduled.action.to_control_event();
        info!("ControlAgent[{}]: {:?} at {}", self.name, request, ctx.time());
        ctx.post_immediate(vec![self.phy], EventPayload::PhyControl(request));
        self.fired += 1;
    }
}

impl Entity for ControlAgent {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        match &event.payload {
            EventPayload::Timer { timer_id } => self.fire(ctx, *timer_id as usize),
            EventPayload::SimulationEnd => {
                debug!(
                    "ControlAgent[{}]: issued {} of {} actions",
                    self.name,
                    self.fired,
                    self.config.actions.len()
                );
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const SCRIPT: &str = r#"
actions:
  - at_s: 0.002
    action: sleep
  - at_s: 0.001
    action:
      switch_channel: 40
  - at_s: 0.003
    action: resume
"#;

    #[test]
    fn test_parse_script() {
        let config: ControlAgentConfig = serde_yaml::from_str(SCRIPT).unwrap();
        assert_eq!(config.actions.len(), 3);
        assert_eq!(config.actions[1].action, ControlAction::SwitchChannel(40));
        assert_eq!(config.actions[0].jitter_s, 0.0);
        assert!(serde_yaml::from_str::<ControlAgentConfig>("actions:\n  - at: 1.0\n    action: sleep\n").is_err());
    }

    #[test]
    fn test_timers_and_requests() {
        let config: ControlAgentConfig = serde_yaml::from_str(SCRIPT).unwrap();
        let mut agent = ControlAgent::new(EntityId(20), "sta1-control".to_string(), EntityId(1), config);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let timers = agent.initial_events(&mut rng);
        let times: Vec<SimTime> = timers.iter().map(|(t, _, _)| *t).collect();
        assert_eq!(
            times,
            vec![SimTime::from_millis(2), SimTime::from_millis(1), SimTime::from_millis(3)]
        );

        let mut ctx = SimContext::new(1);
        let (_, target, payload) = timers[1].clone();
        let event = Event {
            id: hesim_common::EventId(0),
            time: SimTime::from_millis(1),
            source: target,
            targets: vec![target],
            payload,
        };
        agent.handle_event(&event, &mut ctx).unwrap();
        let posted = ctx.take_pending_events();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].targets, vec![EntityId(1)]);
        assert!(matches!(
            posted[0].payload,
            EventPayload::PhyControl(PhyControlEvent::SetChannelNumber(40))
        ));
        assert_eq!(agent.fired(), 1);
    }

    #[test]
    fn test_action_mapping() {
        assert_eq!(ControlAction::Sleep.to_control_event(), PhyControlEvent::SetSleepMode);
        assert_eq!(
            ControlAction::SwitchFrequency(5200).to_control_event(),
            PhyControlEvent::SetFrequency(5200)
        );
        assert_eq!(
            ControlAction::ListenOnResourceUnit(2).to_control_event(),
            PhyControlEvent::ListenOnResourceUnit(2)
        );
    }
}
