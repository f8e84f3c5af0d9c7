//! Peer connection negotiator
//!
//! Drives one [`Session`] at a time through
//! `idle -> negotiating -> connected -> {disconnected, failed}`.
//!
//! Slow steps (creating an offer or an answer) run as detached tasks and
//! report back through the event channel, tagged with the session epoch.
//! Anything carrying an old epoch is discarded, so a late completion can
//! never touch the session that replaced it.

use crate::config::CallConfig;
use crate::error::{Error, PeerError, Result};
use crate::logger::{dump_candidate, log};
use crate::media::{MediaDevices, TrackKind};
use crate::notify::{ChatMessage, Notifier, StatusKind};
use crate::peer::events::{PeerEvent, PeerEventKind, PeerEventSink};
use crate::peer::ice::summarize_candidates;
use crate::peer::types::{IceCandidate, PeerState, SdpKind};
use crate::peer::{PeerConnection, PeerConnector};
use crate::session::{ConnectionStatus, NegotiationFlags, NegotiationPhase, Role, Session};
use crate::signaling::{SignalMessage, SignalingTransport};
use crate::utils::random_id;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Negotiator {
    config: CallConfig,
    devices: Arc<dyn MediaDevices>,
    connector: Arc<dyn PeerConnector>,
    signaling: Arc<dyn SignalingTransport>,
    notifier: Notifier,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: mpsc::UnboundedReceiver<PeerEvent>,
    next_epoch: u64,
    session: Option<Session>,
}

impl Negotiator {
    pub fn new(
        config: CallConfig,
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn PeerConnector>,
        signaling: Arc<dyn SignalingTransport>,
        notifier: Notifier,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            devices,
            connector,
            signaling,
            notifier,
            events_tx,
            events_rx,
            next_epoch: 1,
            session: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.session
            .as_ref()
            .map_or(ConnectionStatus::Idle, Session::status)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_skipping(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_skipping)
    }

    /// Следующее событие от peer connection или фоновой задачи
    pub async fn next_event(&mut self) -> Option<PeerEvent> {
        self.events_rx.recv().await
    }

    /// Захватывает медиа, создаёт peer connection и отправляет `ready`
    pub async fn start_session(&mut self, role: Role) -> Result<()> {
        if self.status().is_live() {
            log("start_session called while a session is live");
            return Err(Error::SessionActive);
        }
        // терминальная сессия уже освобождена, просто заменяем
        if let Some(mut old) = self.session.take() {
            old.teardown().await;
        }
        self.open_session(role).await
    }

    async fn open_session(&mut self, role: Role) -> Result<()> {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        let id = random_id();
        log(&format!(
            "start_session called: role={:?} session={} epoch={}",
            role, id, epoch
        ));
        self.notifier.emit_state(StatusKind::Searching);

        let local = match self.devices.get_user_media(&self.config.media).await {
            Ok(stream) => stream,
            Err(e) => {
                log(&format!("Media access failed: {}", e));
                self.notifier.emit_state(StatusKind::MediaBlocked);
                return Err(Error::MediaAccess(e));
            }
        };

        let sink = PeerEventSink::new(epoch, self.events_tx.clone());
        let peer = match self
            .connector
            .connect(role, &self.config.ice_servers, sink)
            .await
        {
            Ok(peer) => peer,
            Err(e) => {
                log(&format!("Failed to create peer connection: {}", e));
                local.stop_all();
                self.notifier.emit_state(StatusKind::ConnectionFailed);
                return Err(Error::Negotiation(e));
            }
        };

        let mut session = Session::new(
            id,
            epoch,
            role,
            peer.clone(),
            local.clone(),
            self.config.max_pending_candidates,
        );

        for track in local.tracks() {
            if let Err(e) = peer.add_local_track(track).await {
                log(&format!("Failed to attach local {} track: {}", track.kind(), e));
                session.teardown().await;
                self.notifier.emit_state(StatusKind::ConnectionFailed);
                return Err(Error::Negotiation(e));
            }
        }

        // `ready` шлют обе роли: собеседник, стартовавший позже, всё равно запустит обмен
        let ready = SignalMessage::Ready {
            nonce: Some(session.nonce),
        };
        if let Err(e) = self.signaling.send(ready).await {
            log(&format!("Failed to send ready: {}", e));
            session.teardown().await;
            self.notifier.emit_state(StatusKind::ConnectionFailed);
            return Err(Error::Signaling(e));
        }

        self.session = Some(session);
        Ok(())
    }

    /// Обрабатывает входящее signaling-сообщение
    pub async fn handle_signal(&mut self, msg: SignalMessage) -> Result<()> {
        let Some(session) = self.session.as_ref() else {
            log(&format!("Signal '{}' with no session, ignoring", msg.type_name()));
            return Ok(());
        };
        if !session.status.is_live() {
            log(&format!(
                "Signal '{}' for ended session {}, ignoring",
                msg.type_name(),
                session.id
            ));
            return Ok(());
        }

        match msg {
            SignalMessage::Ready { nonce } => self.on_ready(nonce).await,
            SignalMessage::Offer { sdp } => self.on_remote_offer(sdp).await,
            SignalMessage::Answer { sdp } => self.on_remote_answer(sdp).await,
            SignalMessage::Candidate { candidate } => {
                self.on_remote_candidate(candidate).await;
                Ok(())
            }
        }
    }

    async fn on_ready(&mut self, nonce: Option<u32>) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if nonce.is_some() {
            session.remote_nonce = nonce;
        }

        match session.role {
            Role::Initiator => {
                let awaiting =
                    session.status == ConnectionStatus::Negotiating(NegotiationPhase::AwaitingPeer);
                if !awaiting || session.flags.offer_pending || session.flags.offer_sent {
                    log("Ready received, offer already under way");
                    return Ok(());
                }
                let Some(peer) = session.peer.clone() else {
                    return Ok(());
                };
                session.flags.offer_pending = true;
                let sink = PeerEventSink::new(session.epoch, self.events_tx.clone());
                spawn_description(peer, SdpKind::Offer, sink);
                Ok(())
            }
            Role::Responder => {
                if session.flags.ready_echoed {
                    return Ok(());
                }
                session.flags.ready_echoed = true;
                let nonce = Some(session.nonce);
                log("Echoing ready to initiator");
                self.send_or_fail(SignalMessage::Ready { nonce }).await
            }
        }
    }

    async fn on_remote_offer(&mut self, sdp: String) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if session.flags.offer_pending || session.flags.offer_sent {
            // glare: своё offer уже в пути, уступает сторона с меньшим nonce
            if !session.is_polite() {
                log("Remote offer while local offer outstanding, keeping ours");
                return Ok(());
            }
            log("Remote offer collided with ours, yielding");
            self.yield_to_remote_offer().await?;
        }

        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if session.flags.answer_pending {
            log("Remote offer while answer is being created, ignoring");
            return Ok(());
        }
        if session.flags.remote_description_set && session.status != ConnectionStatus::Connected {
            log("Duplicate remote offer during negotiation, ignoring");
            return Ok(());
        }
        let Some(peer) = session.peer.clone() else {
            return Ok(());
        };

        log("Setting remote description (offer)...");
        if let Err(e) = peer.set_remote_description(SdpKind::Offer, sdp).await {
            return self.fail_negotiation(e).await;
        }

        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        session.flags.remote_description_set = true;
        session.set_phase(NegotiationPhase::RemoteOfferReceived);
        let epoch = session.epoch;
        self.apply_pending_candidates().await;

        if let Some(session) = self.session.as_mut() {
            session.flags.answer_pending = true;
        }
        let sink = PeerEventSink::new(epoch, self.events_tx.clone());
        spawn_description(peer, SdpKind::Answer, sink);
        Ok(())
    }

    /// Отказ от своего offer при glare: соединение пересоздаётся как responder
    /// с новым epoch, локальные треки и отложенные кандидаты остаются.
    async fn yield_to_remote_offer(&mut self) -> Result<()> {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let Some(local) = session.local.clone() else {
            return Ok(());
        };

        // старое соединение закрыто до создания нового
        if let Some(old) = session.peer.take() {
            if let Err(e) = old.close().await {
                log(&format!("Failed to close yielded peer connection: {}", e));
            }
        }
        log(&format!(
            "Session {} continues as responder (epoch {} -> {})",
            session.id, session.epoch, epoch
        ));
        session.epoch = epoch;
        session.role = Role::Responder;
        session.flags = NegotiationFlags {
            ready_echoed: true,
            ..NegotiationFlags::default()
        };
        session.local_candidates.clear();
        session.remote.clear();

        let sink = PeerEventSink::new(epoch, self.events_tx.clone());
        let peer = match self
            .connector
            .connect(Role::Responder, &self.config.ice_servers, sink)
            .await
        {
            Ok(peer) => peer,
            Err(e) => return self.fail_negotiation(e).await,
        };
        session.peer = Some(peer.clone());

        for track in local.tracks() {
            if let Err(e) = peer.add_local_track(track).await {
                return self.fail_negotiation(e).await;
            }
        }
        Ok(())
    }

    async fn on_remote_answer(&mut self, sdp: String) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if !session.flags.offer_sent {
            log("Answer received before any offer was sent, ignoring");
            return Ok(());
        }
        if session.flags.answer_applied {
            log("Duplicate answer, ignoring");
            return Ok(());
        }
        let Some(peer) = session.peer.clone() else {
            return Ok(());
        };

        log("Setting remote description (answer)...");
        if let Err(e) = peer.set_remote_description(SdpKind::Answer, sdp).await {
            return self.fail_negotiation(e).await;
        }
        if let Some(session) = self.session.as_mut() {
            session.flags.answer_applied = true;
            session.flags.remote_description_set = true;
        }
        self.apply_pending_candidates().await;
        Ok(())
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        dump_candidate("REMOTE", &candidate);

        if !session.flags.remote_description_set {
            log("Remote description not set yet, queuing candidate");
            session.pending_candidates.push(candidate);
            return;
        }
        let Some(peer) = session.peer.clone() else {
            return;
        };
        if let Err(e) = peer.add_ice_candidate(candidate).await {
            log(&format!("{}", Error::Candidate(e)));
        }
    }

    /// Применяет все отложенные кандидаты после установки remote description
    async fn apply_pending_candidates(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(peer) = session.peer.clone() else {
            return;
        };
        let candidates = session.pending_candidates.drain();
        if candidates.is_empty() {
            return;
        }

        log(&format!("Applying {} pending candidates", candidates.len()));
        for candidate in candidates {
            if let Err(e) = peer.add_ice_candidate(candidate).await {
                log(&format!("Failed to apply pending candidate: {}", e));
            }
        }
    }

    /// Обрабатывает событие; события чужого поколения отбрасываются
    pub async fn handle_event(&mut self, event: PeerEvent) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            log(&format!("Event {:?} with no session, discarding", event.kind));
            return Ok(());
        };
        if event.epoch != session.epoch {
            log(&format!(
                "Stale event from epoch {} (current {}), discarding",
                event.epoch, session.epoch
            ));
            return Ok(());
        }
        if !session.status.is_live() {
            log(&format!("Event {:?} after session ended, discarding", event.kind));
            return Ok(());
        }

        match event.kind {
            PeerEventKind::OfferCreated(sdp) => {
                session.flags.offer_pending = false;
                self.send_or_fail(SignalMessage::Offer { sdp }).await?;
                if let Some(session) = self.session.as_mut() {
                    session.flags.offer_sent = true;
                    session.set_phase(NegotiationPhase::LocalOfferSent);
                }
                Ok(())
            }
            PeerEventKind::AnswerCreated(sdp) => {
                session.flags.answer_pending = false;
                self.send_or_fail(SignalMessage::Answer { sdp }).await
            }
            PeerEventKind::NegotiationFailed(reason) => {
                self.fail_negotiation(PeerError::Negotiation(reason)).await
            }
            PeerEventKind::LocalCandidate(candidate) => {
                session.local_candidates.push(candidate.clone());
                // ошибка trickle не фатальна: у собеседника есть другие кандидаты
                if let Err(e) = self
                    .signaling
                    .send(SignalMessage::Candidate { candidate })
                    .await
                {
                    log(&format!("Failed to send local candidate: {}", e));
                }
                Ok(())
            }
            PeerEventKind::GatheringComplete => {
                log("ICE candidate gathering completed");
                summarize_candidates(&session.local_candidates);
                Ok(())
            }
            PeerEventKind::RemoteTrack(track) => {
                log(&format!(
                    "Remote {} track {} (stream {})",
                    track.kind, track.id, track.stream_id
                ));
                session.remote.add(track);
                Ok(())
            }
            PeerEventKind::ChatReceived(text) => {
                self.notifier.emit_chat(ChatMessage::new(text, false));
                Ok(())
            }
            PeerEventKind::StateChanged(state) => self.on_peer_state(state).await,
        }
    }

    async fn on_peer_state(&mut self, state: PeerState) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        log(&format!(
            "Peer state {:?} for session {} ({:?})",
            state, session.id, session.status
        ));

        match state {
            PeerState::Connected => {
                session.status = ConnectionStatus::Connected;
                session.skipping = false;
                self.notifier.emit_state(StatusKind::Connected);
            }
            PeerState::Disconnected | PeerState::Closed => {
                session.status = ConnectionStatus::Disconnected;
                session.teardown().await;
                self.notifier.emit_state(StatusKind::ConnectionLost);
            }
            PeerState::Failed => {
                session.status = ConnectionStatus::Failed;
                session.teardown().await;
                self.notifier.emit_state(StatusKind::ConnectionFailed);
            }
            PeerState::New | PeerState::Connecting => {}
        }
        Ok(())
    }

    /// Включает/выключает локальные треки без renegotiation
    pub fn toggle_track(&mut self, kind: TrackKind, enabled: bool) -> Result<usize> {
        let local = self
            .session
            .as_ref()
            .and_then(Session::local_stream)
            .ok_or(Error::NoActiveSession)?;

        let count = local.set_enabled(kind, enabled);
        log(&format!(
            "toggle_track: {} -> {} ({} tracks)",
            kind, enabled, count
        ));
        let notice = match (kind, enabled) {
            (TrackKind::Audio, true) => StatusKind::MicrophoneOn,
            (TrackKind::Audio, false) => StatusKind::MicrophoneOff,
            (TrackKind::Video, true) => StatusKind::CameraOn,
            (TrackKind::Video, false) => StatusKind::CameraOff,
        };
        self.notifier.emit_state(notice);
        Ok(count)
    }

    /// Звук собеседника; на соединение не влияет
    pub fn set_speaker_enabled(&mut self, enabled: bool) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::NoActiveSession)?;
        session.remote.set_audio_enabled(enabled);
        self.notifier.emit_state(if enabled {
            StatusKind::SpeakerOn
        } else {
            StatusKind::SpeakerOff
        });
        Ok(())
    }

    /// текст по каналу
    pub async fn send_chat(&mut self, text: &str) -> Result<ChatMessage> {
        let session = self.session.as_ref().ok_or(Error::NoActiveSession)?;
        match session.status {
            ConnectionStatus::Connected => {}
            status if status.is_terminal() => return Err(Error::ConnectionLost),
            _ => return Err(Error::NotConnected),
        }
        let peer = session.peer.clone().ok_or(Error::NotConnected)?;
        peer.send_text(text).await.map_err(Error::Negotiation)?;

        let msg = ChatMessage::new(text, true);
        self.notifier.emit_chat(msg.clone());
        Ok(msg)
    }

    /// Завершает звонок; на уже завершённой сессии ничего не делает
    pub async fn end_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let was_live = session.status.is_live();
        log(&format!("end_session called for session {}", session.id));
        session.teardown().await;
        if was_live {
            self.notifier.emit_state(StatusKind::ChatEnded);
        }
    }

    /// Полностью закрывает текущую сессию и открывает новую как initiator.
    /// Зависший поиск после прошлого skip тоже можно пропустить.
    pub async fn skip_session(&mut self) -> Result<()> {
        log(&format!("skip_session called (skipping={})", self.is_skipping()));
        self.notifier.emit_state(StatusKind::Skipping);

        // старое соединение закрыто до создания нового
        if let Some(mut old) = self.session.take() {
            old.teardown().await;
        }
        self.open_session(Role::Initiator).await?;
        if let Some(session) = self.session.as_mut() {
            session.skipping = true;
        }
        Ok(())
    }

    async fn send_or_fail(&mut self, msg: SignalMessage) -> Result<()> {
        if let Err(e) = self.signaling.send(msg).await {
            log(&format!("Signaling send failed: {}", e));
            if let Some(session) = self.session.as_mut() {
                session.status = ConnectionStatus::Failed;
                session.teardown().await;
            }
            self.notifier.emit_state(StatusKind::ConnectionFailed);
            return Err(Error::Signaling(e));
        }
        Ok(())
    }

    async fn fail_negotiation(&mut self, err: PeerError) -> Result<()> {
        log(&format!("Negotiation error: {}", err));
        if let Some(session) = self.session.as_mut() {
            session.status = ConnectionStatus::Failed;
            session.teardown().await;
        }
        self.notifier.emit_state(StatusKind::ConnectionFailed);
        Err(Error::Negotiation(err))
    }
}

/// Создание offer/answer в фоне; результат приходит событием с epoch сессии
fn spawn_description(peer: Arc<dyn PeerConnection>, kind: SdpKind, sink: PeerEventSink) {
    tokio::spawn(async move {
        let result = match kind {
            SdpKind::Offer => peer.create_offer().await,
            SdpKind::Answer => peer.create_answer().await,
        };
        let event = match (kind, result) {
            (SdpKind::Offer, Ok(sdp)) => PeerEventKind::OfferCreated(sdp),
            (SdpKind::Answer, Ok(sdp)) => PeerEventKind::AnswerCreated(sdp),
            (_, Err(e)) => PeerEventKind::NegotiationFailed(e.to_string()),
        };
        sink.emit(event);
    });
}
