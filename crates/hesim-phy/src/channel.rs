//! The shared medium.

use crate::propagation::{
    ConstantSpeedPropagationDelayModel, LogDistancePropagationLossModel, PropagationDelayModel, PropagationLossModel,
};
use hesim_common::{
    ChannelTransmitEvent, Entity, EntityId, Event, EventPayload, Position, SignalArrivalEvent, SimContext, SimError,
};
use hesim_metrics::{metric_defs, metrics, MetricLabels};

/// A PHY attached to the medium.
#[derive(Debug, Clone, Copy)]
struct Attachment {
    phy: EntityId,
    position: Position,
    channel_number: u16,
}

/// The WifiChannel entity delivers transmissions to attached PHYs.
///
/// It receives ChannelTransmit events from PHYs and posts a SignalArrival
/// to every other PHY tuned to the same channel, after the propagation
/// delay and with the power given by the loss model. PHYs announce
/// retuning with PhyRetuned events.
pub struct WifiChannel {
    id: EntityId,
    attachments: Vec<Attachment>,
    loss: Box<dyn PropagationLossModel>,
    delay: Box<dyn PropagationDelayModel>,
    metric_labels: MetricLabels,
}

impl WifiChannel {
    /// Channel with the given propagation models.
    pub fn new(id: EntityId, loss: Box<dyn PropagationLossModel>, delay: Box<dyn PropagationDelayModel>) -> Self {
        WifiChannel {
            id,
            attachments: Vec::new(),
            loss,
            delay,
            metric_labels: MetricLabels::new("channel", "channel"),
        }
    }

    /// Attach a PHY. Must happen before the simulation starts.
    pub fn add(&mut self, phy: EntityId, position: Position, channel_number: u16) {
        self.attachments.push(Attachment {
            phy,
            position,
            channel_number,
        });
    }

    /// Number of attached PHYs.
    pub fn n_devices(&self) -> usize {
        self.attachments.len()
    }

    /// Channel a PHY is currently tuned to.
    pub fn channel_of(&self, phy: EntityId) -> Option<u16> {
        self.attachments.iter().find(|a| a.phy == phy).map(|a| a.channel_number)
    }

    fn send(&mut self, tx: &ChannelTransmitEvent, ctx: &mut SimContext) {
        let Some(sender) = self.attachments.iter().find(|a| a.phy == tx.sender).copied() else {
            tracing::warn!("transmission from unattached PHY {:?}", tx.sender);
            return;
        };

        for receiver in &self.attachments {
            if receiver.phy == tx.sender || receiver.channel_number != tx.channel_number {
                continue;
            }
            let rx_power_dbm = self
                .loss
                .calc_rx_power(tx.tx_power_dbm, &sender.position, &receiver.position, ctx.rng());
            let delay = self.delay.delay(&sender.position, &receiver.position);
            tracing::trace!(
                "packet {} from {:?} to {:?}: {:.1} dBm after {}",
                tx.packet.uid,
                tx.sender,
                receiver.phy,
                rx_power_dbm,
                delay
            );
            ctx.post_event(
                delay,
                vec![receiver.phy],
                EventPayload::SignalArrival(SignalArrivalEvent {
                    sender: tx.sender,
                    packet: tx.packet.clone(),
                    rx_power_dbm,
                    tx_vector: tx.tx_vector,
                    preamble: tx.preamble,
                    mpdu_type: tx.mpdu_type,
                    duration: tx.duration,
                }),
            );
            metrics::counter!(metric_defs::CHANNEL_DELIVERIES.name, &self.metric_labels.to_labels()).increment(1);
        }
    }
}

impl Default for WifiChannel {
    fn default() -> Self {
        WifiChannel::new(
            EntityId::new(0),
            Box::new(LogDistancePropagationLossModel::default()),
            Box::new(ConstantSpeedPropagationDelayModel::default()),
        )
    }
}

impl Entity for WifiChannel {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        match &event.payload {
            EventPayload::ChannelTransmit(tx) => self.send(tx, ctx),
            EventPayload::PhyRetuned(retuned) => {
                match self.attachments.iter_mut().find(|a| a.phy == retuned.phy) {
                    Some(attachment) => attachment.channel_number = retuned.channel_number,
                    None => tracing::warn!("retune of unattached PHY {:?}", retuned.phy),
                }
            }
            _ => {}
        }
        Ok(())
    }
}
