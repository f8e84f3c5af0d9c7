use crate::logger::log;
use crate::media::{LocalMediaStream, RemoteMediaStream};
use crate::peer::ice::CandidateBuffer;
use crate::peer::types::IceCandidate;
use crate::peer::PeerConnection;
use crate::utils::random_nonce;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationPhase {
    /// `ready` отправлен, ждём собеседника
    AwaitingPeer,
    LocalOfferSent,
    RemoteOfferReceived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "phase", rename_all = "lowercase")]
pub enum ConnectionStatus {
    Idle,
    Negotiating(NegotiationPhase),
    Connected,
    Disconnected,
    Failed,
}

impl ConnectionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionStatus::Disconnected | ConnectionStatus::Failed)
    }

    pub fn is_live(self) -> bool {
        matches!(
            self,
            ConnectionStatus::Negotiating(_) | ConnectionStatus::Connected
        )
    }
}

/// Флаги offer/answer обмена в рамках одной сессии
#[derive(Debug, Default, Clone, Copy)]
pub struct NegotiationFlags {
    pub offer_pending: bool,
    pub offer_sent: bool,
    pub answer_pending: bool,
    pub answer_applied: bool,
    pub remote_description_set: bool,
    pub ready_echoed: bool,
}

/// Одна попытка звонка. Владеет соединением и медиа до teardown.
pub struct Session {
    pub(crate) id: String,
    pub(crate) epoch: u64,
    pub(crate) role: Role,
    pub(crate) status: ConnectionStatus,
    pub(crate) skipping: bool,
    /// Наш nonce из `ready` и последний nonce собеседника
    pub(crate) nonce: u32,
    pub(crate) remote_nonce: Option<u32>,
    pub(crate) peer: Option<Arc<dyn PeerConnection>>,
    pub(crate) local: Option<LocalMediaStream>,
    pub(crate) remote: RemoteMediaStream,
    pub(crate) pending_candidates: CandidateBuffer,
    pub(crate) local_candidates: Vec<IceCandidate>,
    pub(crate) flags: NegotiationFlags,
}

impl Session {
    pub(crate) fn new(
        id: String,
        epoch: u64,
        role: Role,
        peer: Arc<dyn PeerConnection>,
        local: LocalMediaStream,
        candidate_limit: usize,
    ) -> Self {
        Self {
            id,
            epoch,
            role,
            status: ConnectionStatus::Negotiating(NegotiationPhase::AwaitingPeer),
            skipping: false,
            nonce: random_nonce(),
            remote_nonce: None,
            peer: Some(peer),
            local: Some(local),
            remote: RemoteMediaStream::default(),
            pending_candidates: CandidateBuffer::new(candidate_limit),
            local_candidates: Vec::new(),
            flags: NegotiationFlags::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_skipping(&self) -> bool {
        self.skipping
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    /// При glare уступает сторона с меньшим nonce.
    /// Пока nonce собеседника неизвестен, своё offer не отзываем.
    pub fn is_polite(&self) -> bool {
        self.remote_nonce.is_some_and(|remote| self.nonce < remote)
    }

    pub fn local_stream(&self) -> Option<&LocalMediaStream> {
        self.local.as_ref()
    }

    pub fn remote_stream(&self) -> &RemoteMediaStream {
        &self.remote
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn flags(&self) -> NegotiationFlags {
        self.flags
    }

    /// Живое ли ещё peer connection
    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    pub(crate) fn set_phase(&mut self, phase: NegotiationPhase) {
        if matches!(self.status, ConnectionStatus::Negotiating(_)) {
            self.status = ConnectionStatus::Negotiating(phase);
        }
    }

    /// Единственный путь освобождения ресурсов: закрыть соединение,
    /// остановить треки, очистить удалённый поток и кандидаты.
    /// Повторный вызов ничего не делает.
    pub(crate) async fn teardown(&mut self) {
        let peer = self.peer.take();
        let local = self.local.take();
        if peer.is_none() && local.is_none() {
            return;
        }
        log(&format!(
            "Tearing down session {} (epoch {})",
            self.id, self.epoch
        ));

        if let Some(local) = local {
            local.stop_all();
        }
        if let Some(peer) = peer {
            if let Err(e) = peer.close().await {
                log(&format!("Failed to close peer connection: {}", e));
            }
        }
        self.remote.clear();
        self.pending_candidates.clear();
        self.skipping = false;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Синхронная часть teardown; закрытие соединения уходит в фон
        if let Some(local) = self.local.take() {
            local.stop_all();
        }
        if let Some(peer) = self.peer.take() {
            log(&format!(
                "Session {} dropped with a live connection, closing in background",
                self.id
            ));
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = peer.close().await;
                });
            }
        }
    }
}
