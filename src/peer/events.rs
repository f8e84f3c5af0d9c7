use crate::media::RemoteTrack;
use crate::peer::types::{IceCandidate, PeerState};
use tokio::sync::mpsc;

/// Событие от peer connection или от фоновой задачи negotiation
#[derive(Debug, Clone)]
pub struct PeerEvent {
    /// Поколение сессии, породившей событие
    pub epoch: u64,
    pub kind: PeerEventKind,
}

#[derive(Debug, Clone)]
pub enum PeerEventKind {
    LocalCandidate(IceCandidate),
    GatheringComplete,
    RemoteTrack(RemoteTrack),
    StateChanged(PeerState),
    ChatReceived(String),
    OfferCreated(String),
    AnswerCreated(String),
    NegotiationFailed(String),
}

/// Отправитель событий, привязанный к одной сессии
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEventSink {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Получатель может уже исчезнуть; тогда событие просто теряется
    pub fn emit(&self, kind: PeerEventKind) {
        let _ = self.tx.send(PeerEvent {
            epoch: self.epoch,
            kind,
        });
    }
}
