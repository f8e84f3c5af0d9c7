use crate::error::PeerError;
use crate::logger::{dump_candidate, log};
use crate::media::{LocalTrack, RemoteTrack, TrackKind};
use crate::peer::data_channel::{attach_chat, CHAT_LABEL};
use crate::peer::events::{PeerEventKind, PeerEventSink};
use crate::peer::ice::rtc_ice_servers;
use crate::peer::types::{IceCandidate, PeerState, SdpKind, ServerConfig};
use crate::session::Role;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Одно peer connection, принадлежащее сессии
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_local_track(&self, track: &LocalTrack) -> Result<(), PeerError>;

    /// Создаёт offer и ставит его как local description
    async fn create_offer(&self) -> Result<String, PeerError>;

    /// Создаёт answer и ставит его как local description
    async fn create_answer(&self) -> Result<String, PeerError>;

    async fn set_remote_description(&self, kind: SdpKind, sdp: String) -> Result<(), PeerError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    async fn send_text(&self, text: &str) -> Result<(), PeerError>;

    async fn close(&self) -> Result<(), PeerError>;
}

/// Фабрика peer connection
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        role: Role,
        ice_servers: &[ServerConfig],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>, PeerError>;
}

/// Создает конфигурацию для peer connection
fn rtc_config(ice_servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: rtc_ice_servers(ice_servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// Connector на базе крейта `webrtc`
pub struct RtcConnector {
    api: API,
}

impl RtcConnector {
    pub fn new() -> Result<Self, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| PeerError::Create(e.to_string()))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| PeerError::Create(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api })
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    /// создаём Peer; если `initiator`, то сами делаем data-channel
    async fn connect(
        &self,
        role: Role,
        ice_servers: &[ServerConfig],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(rtc_config(ice_servers))
                .await
                .map_err(|e| PeerError::Create(e.to_string()))?,
        );
        log(&format!(
            "Created peer connection as {:?} (epoch {})",
            role,
            events.epoch()
        ));

        // Обработчик для сбора локальных кандидатов
        let sink = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        let candidate = IceCandidate::from(init);
                        dump_candidate("LOCAL", &candidate);
                        sink.emit(PeerEventKind::LocalCandidate(candidate));
                    }
                    Err(e) => log(&format!("Failed to serialize local candidate: {}", e)),
                },
                // cand == None означает конец сбора
                None => sink.emit(PeerEventKind::GatheringComplete),
            }
            Box::pin(async {})
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            log(&format!("ICE gathering state changed to: {:?}", state));
            Box::pin(async {})
        }));

        let sink = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            log(&format!("Peer connection state changed to: {:?}", st));
            sink.emit(PeerEventKind::StateChanged(PeerState::from(st)));
            Box::pin(async {})
        }));

        let sink = events.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let kind = match track.kind() {
                RTPCodecType::Audio => Some(TrackKind::Audio),
                RTPCodecType::Video => Some(TrackKind::Video),
                _ => None,
            };
            match kind {
                Some(kind) => sink.emit(PeerEventKind::RemoteTrack(RemoteTrack {
                    id: track.id(),
                    kind,
                    stream_id: track.stream_id(),
                })),
                None => log(&format!("Ignoring remote track of kind {:?}", track.kind())),
            }
            Box::pin(async {})
        }));

        let chat: Arc<Mutex<Option<Arc<RTCDataChannel>>>> = Arc::new(Mutex::new(None));
        match role {
            Role::Initiator => {
                let dc = match pc
                    .create_data_channel(CHAT_LABEL, Some(RTCDataChannelInit::default()))
                    .await
                {
                    Ok(dc) => dc,
                    Err(e) => {
                        let _ = pc.close().await;
                        return Err(PeerError::DataChannel(e.to_string()));
                    }
                };
                attach_chat(&dc, events.clone());
                *chat.lock().await = Some(dc);
            }
            Role::Responder => {
                let sink = events.clone();
                let slot = chat.clone();
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let sink = sink.clone();
                    let slot = slot.clone();
                    Box::pin(async move {
                        if dc.label() != CHAT_LABEL {
                            log(&format!("Ignoring unexpected data channel '{}'", dc.label()));
                            return;
                        }
                        attach_chat(&dc, sink);
                        *slot.lock().await = Some(dc);
                    })
                }));
            }
        }

        Ok(Arc::new(RtcPeer { pc, chat }))
    }
}

struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    chat: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
}

impl RtcPeer {
    async fn local_sdp(&self) -> Result<String, PeerError> {
        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| PeerError::Negotiation("local description missing".into()))
    }
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn add_local_track(&self, track: &LocalTrack) -> Result<(), PeerError> {
        let sender = self
            .pc
            .add_track(track.rtc_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| PeerError::AddTrack(e.to_string()))?;

        // RTCP нужно вычитывать, иначе interceptors не работают
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = sender.read(&mut rtcp_buf).await {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<String, PeerError> {
        log("Creating offer...");
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| PeerError::Negotiation(e.to_string()))?;
        log("Setting local description (offer)...");
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| PeerError::Negotiation(e.to_string()))?;
        self.local_sdp().await
    }

    async fn create_answer(&self) -> Result<String, PeerError> {
        log("Creating answer...");
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| PeerError::Negotiation(e.to_string()))?;
        log("Setting local description (answer)...");
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| PeerError::Negotiation(e.to_string()))?;
        self.local_sdp().await
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: String) -> Result<(), PeerError> {
        let desc = match kind {
            SdpKind::Offer => RTCSessionDescription::offer(sdp),
            SdpKind::Answer => RTCSessionDescription::answer(sdp),
        }
        .map_err(|e| PeerError::Negotiation(e.to_string()))?;

        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| PeerError::Negotiation(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| PeerError::Candidate(e.to_string()))
    }

    async fn send_text(&self, text: &str) -> Result<(), PeerError> {
        let dc = { self.chat.lock().await.as_ref().cloned() };
        match dc {
            Some(dc) => dc
                .send_text(text.to_owned())
                .await
                .map(|_| ())
                .map_err(|e| PeerError::DataChannel(e.to_string())),
            None => Err(PeerError::DataChannel("chat channel is not open".into())),
        }
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.chat.lock().await.take();
        self.pc
            .close()
            .await
            .map_err(|e| PeerError::Close(e.to_string()))
    }
}
