//! The orchestrator's event queue.
//!
//! Peer callbacks, relay messages and channel state all funnel into one
//! unbounded queue that the [`CallClient`](crate::CallClient) consumes one
//! event at a time.

use cheenhub_contracts::signaling::ServerMessage;
use tokio::sync::mpsc;

use crate::peer::PeerEvent;
use crate::types::{ConnectionId, ConsumerId};

/// Which component a connection belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerOwner {
    Publisher,
    Consumer(ConsumerId),
}

#[derive(Debug, Clone)]
pub enum CallEvent {
    Peer {
        owner: PeerOwner,
        connection: ConnectionId,
        event: PeerEvent,
    },
    Signal(ServerMessage),
    SignalingConnected,
    SignalingDisconnected,
    /// A screen-share track was stopped by the device or the user
    ScreenShareEnded { track_id: String },
}

#[derive(Debug, Clone)]
pub struct EventSender(mpsc::UnboundedSender<CallEvent>);

impl EventSender {
    /// Queue an event. Returns `false` once the receiver is gone.
    pub fn send(&self, event: CallEvent) -> bool {
        self.0.send(event).is_ok()
    }

    pub fn peer_sink(&self, owner: PeerOwner, connection: ConnectionId) -> PeerEventSink {
        PeerEventSink {
            owner,
            connection,
            events: self.clone(),
        }
    }
}

#[derive(Debug)]
pub struct EventReceiver(mpsc::UnboundedReceiver<CallEvent>);

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<CallEvent> {
        self.0.recv().await
    }

    /// Next already-queued event, without waiting
    pub fn try_next(&mut self) -> Option<CallEvent> {
        self.0.try_recv().ok()
    }
}

pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender(tx), EventReceiver(rx))
}

/// Handed to a connection so its callbacks reach the orchestrator stamped
/// with their owner and connection instance
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    owner: PeerOwner,
    connection: ConnectionId,
    events: EventSender,
}

impl PeerEventSink {
    pub fn owner(&self) -> &PeerOwner {
        &self.owner
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn emit(&self, event: PeerEvent) {
        let delivered = self.events.send(CallEvent::Peer {
            owner: self.owner.clone(),
            connection: self.connection,
            event,
        });
        if !delivered {
            tracing::debug!("Dropping event from {}: event loop is gone", self.connection);
        }
    }
}
