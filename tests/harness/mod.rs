//! Scripted fakes for negotiator tests.
#![allow(dead_code)]

use async_trait::async_trait;
use goldenchat_lib::config::CallConfig;
use goldenchat_lib::error::{PeerError, SignalingError};
use goldenchat_lib::media::{DeviceRegistry, LocalTrack, MediaDevices};
use goldenchat_lib::notify::{Notice, Notifier, StatusKind};
use goldenchat_lib::peer::{
    IceCandidate, PeerConnection, PeerConnector, PeerEventKind, PeerEventSink, PeerState, SdpKind,
    ServerConfig,
};
use goldenchat_lib::session::Role;
use goldenchat_lib::signaling::{SignalMessage, SignalingTransport};
use goldenchat_lib::Negotiator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// Что успели сделать все fake peers одного connector'а
#[derive(Debug, Default, Clone)]
pub struct Record {
    pub created: usize,
    pub live: usize,
    pub max_live: usize,
    pub closes: usize,
    pub tracks_added: usize,
    pub offers: usize,
    pub answers: usize,
    pub remote_descriptions: Vec<SdpKind>,
    pub candidates: Vec<IceCandidate>,
    pub sent_text: Vec<String>,
}

#[derive(Default)]
struct FakeState {
    record: Mutex<Record>,
    sinks: Mutex<Vec<PeerEventSink>>,
    offer_gate: Mutex<Option<Arc<Semaphore>>>,
    fail_set_remote: AtomicBool,
    fail_candidates: AtomicBool,
    manual_connect: AtomicBool,
}

/// Connector, выдающий [`FakePeer`]; клоны делят один [`Record`]
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<FakeState>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) -> Record {
        self.state.record.lock().unwrap().clone()
    }

    /// Sink последнего созданного соединения, чтобы эмулировать события транспорта
    pub fn last_sink(&self) -> PeerEventSink {
        self.state
            .sinks
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no peer connection created yet")
    }

    /// Offer остаются "в пути" до [`FakeConnector::release_offers`]
    pub fn hold_offers(&self) {
        *self.state.offer_gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_offers(&self) {
        if let Some(gate) = self.state.offer_gate.lock().unwrap().take() {
            gate.add_permits(1024);
        }
    }

    pub fn fail_set_remote(&self) {
        self.state.fail_set_remote.store(true, Ordering::SeqCst);
    }

    pub fn fail_candidates(&self) {
        self.state.fail_candidates.store(true, Ordering::SeqCst);
    }

    /// Не сообщать `Connected` после обмена offer/answer
    pub fn manual_connect(&self) {
        self.state.manual_connect.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        role: Role,
        _ice_servers: &[ServerConfig],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        {
            let mut record = self.state.record.lock().unwrap();
            record.created += 1;
            record.live += 1;
            record.max_live = record.max_live.max(record.live);
        }
        self.state.sinks.lock().unwrap().push(events.clone());
        Ok(Arc::new(FakePeer {
            state: self.state.clone(),
            role,
            events,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct FakePeer {
    state: Arc<FakeState>,
    role: Role,
    events: PeerEventSink,
    closed: AtomicBool,
}

impl FakePeer {
    fn host_candidate(&self) -> IceCandidate {
        IceCandidate {
            candidate: format!(
                "candidate:1 1 udp 2130706431 192.168.1.{} 5000 typ host",
                self.events.epoch()
            ),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    fn report_connected(&self) {
        if !self.state.manual_connect.load(Ordering::SeqCst) {
            self.events
                .emit(PeerEventKind::StateChanged(PeerState::Connected));
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_local_track(&self, _track: &LocalTrack) -> Result<(), PeerError> {
        self.state.record.lock().unwrap().tracks_added += 1;
        Ok(())
    }

    async fn create_offer(&self) -> Result<String, PeerError> {
        let gate = self.state.offer_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(PeerError::Negotiation("peer connection closed".into()));
        }
        let n = {
            let mut record = self.state.record.lock().unwrap();
            record.offers += 1;
            record.offers
        };
        // trickle: кандидат уходит раньше самого offer
        self.events
            .emit(PeerEventKind::LocalCandidate(self.host_candidate()));
        self.events.emit(PeerEventKind::GatheringComplete);
        Ok(format!("v=0 fake-offer-{n} epoch={}", self.events.epoch()))
    }

    async fn create_answer(&self) -> Result<String, PeerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PeerError::Negotiation("peer connection closed".into()));
        }
        let n = {
            let mut record = self.state.record.lock().unwrap();
            record.answers += 1;
            record.answers
        };
        self.events
            .emit(PeerEventKind::LocalCandidate(self.host_candidate()));
        if self.role == Role::Responder {
            self.report_connected();
        }
        Ok(format!("v=0 fake-answer-{n} epoch={}", self.events.epoch()))
    }

    async fn set_remote_description(&self, kind: SdpKind, _sdp: String) -> Result<(), PeerError> {
        if self.state.fail_set_remote.load(Ordering::SeqCst) {
            return Err(PeerError::Negotiation("malformed remote description".into()));
        }
        self.state
            .record
            .lock()
            .unwrap()
            .remote_descriptions
            .push(kind);
        if kind == SdpKind::Answer {
            self.report_connected();
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        if self.state.fail_candidates.load(Ordering::SeqCst) {
            return Err(PeerError::Candidate("unparseable candidate".into()));
        }
        self.state.record.lock().unwrap().candidates.push(candidate);
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), PeerError> {
        self.state
            .record
            .lock()
            .unwrap()
            .sent_text
            .push(text.to_owned());
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let mut record = self.state.record.lock().unwrap();
            record.closes += 1;
            record.live -= 1;
        }
        Ok(())
    }
}

/// Transport, который только запоминает исходящие сообщения
#[derive(Clone, Default)]
pub struct RecordingSignaling {
    sent: Arc<Mutex<Vec<SignalMessage>>>,
}

impl RecordingSignaling {
    pub fn sent(&self) -> Vec<SignalMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, type_name: &str) -> usize {
        self.sent()
            .iter()
            .filter(|m| m.type_name() == type_name)
            .count()
    }
}

#[async_trait]
impl SignalingTransport for RecordingSignaling {
    async fn send(&self, msg: SignalMessage) -> Result<(), SignalingError> {
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }
}

pub struct Fixture {
    pub negotiator: Negotiator,
    pub connector: FakeConnector,
    pub signaling: RecordingSignaling,
    pub notices: mpsc::UnboundedReceiver<Notice>,
}

pub fn fixture() -> Fixture {
    fixture_with_devices(DeviceRegistry::new())
}

pub fn fixture_with_devices(devices: impl MediaDevices + 'static) -> Fixture {
    let connector = FakeConnector::new();
    let signaling = RecordingSignaling::default();
    let (notifier, notices) = Notifier::channel();
    let negotiator = Negotiator::new(
        CallConfig::default(),
        Arc::new(devices),
        Arc::new(connector.clone()),
        Arc::new(signaling.clone()),
        notifier,
    );
    Fixture {
        negotiator,
        connector,
        signaling,
        notices,
    }
}

/// Обрабатывает события, пока они приходят
pub async fn pump(negotiator: &mut Negotiator) {
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(50), negotiator.next_event()).await
    {
        let _ = negotiator.handle_event(event).await;
    }
}

pub fn status_notices(rx: &mut mpsc::UnboundedReceiver<Notice>) -> Vec<StatusKind> {
    let mut kinds = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        if let Notice::Status(status) = notice {
            kinds.push(status.kind);
        }
    }
    kinds
}

pub fn candidate(n: u8) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2130706431 10.0.0.{n} 6000 typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: Some("ufrag".into()),
    }
}
