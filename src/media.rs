//! Локальные и удалённые медиа-потоки
//!
//! `LocalTrack` is a handle shared between the capture side and the peer
//! connection. Its `enabled` flag gates outgoing samples, so muting never
//! needs renegotiation.

use crate::error::{MediaAccessError, PeerError};
use crate::logger::log;
use crate::utils::random_id;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// Какие устройства запрашивать
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

impl MediaConstraints {
    pub fn kinds(&self) -> Vec<TrackKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.audio {
            kinds.push(TrackKind::Audio);
        }
        if self.video {
            kinds.push(TrackKind::Video);
        }
        kinds
    }
}

fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
            rtcp_feedback: vec![],
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
    }
}

/// Один захваченный трек
#[derive(Clone)]
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    rtc: Arc<TrackLocalStaticSample>,
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl LocalTrack {
    pub fn new(kind: TrackKind, stream_id: &str) -> Self {
        let id = format!("{}-{}", kind, random_id());
        let rtc = Arc::new(TrackLocalStaticSample::new(
            codec_for(kind),
            id.clone(),
            stream_id.to_owned(),
        ));
        Self {
            id,
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
            rtc,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Останавливает трек навсегда; повторный вызов ничего не делает
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            log(&format!("Stopped local {} track {}", self.kind, self.id));
        }
    }

    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        self.rtc.clone()
    }

    /// Отправляет сэмпл; `Ok(false)` если трек выключен или остановлен
    pub async fn write_sample(&self, sample: &Sample) -> Result<bool, PeerError> {
        if self.is_stopped() || !self.is_enabled() {
            return Ok(false);
        }
        self.rtc
            .write_sample(sample)
            .await
            .map_err(|e| PeerError::WriteSample(e.to_string()))?;
        Ok(true)
    }
}

/// Набор локальных треков одной сессии
#[derive(Debug, Clone)]
pub struct LocalMediaStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalMediaStream {
    pub fn new(id: String, tracks: Vec<LocalTrack>) -> Self {
        Self { id, tracks }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &LocalTrack> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }

    /// Возвращает число затронутых треков
    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) -> usize {
        let mut count = 0;
        for track in self.tracks_of(kind) {
            track.set_enabled(enabled);
            count += 1;
        }
        count
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn all_stopped(&self) -> bool {
        self.tracks.iter().all(LocalTrack::is_stopped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    pub stream_id: String,
}

/// Треки, полученные от собеседника
#[derive(Debug, Clone)]
pub struct RemoteMediaStream {
    tracks: Vec<RemoteTrack>,
    audio_enabled: bool,
}

impl Default for RemoteMediaStream {
    fn default() -> Self {
        Self {
            tracks: Vec::new(),
            audio_enabled: true,
        }
    }
}

impl RemoteMediaStream {
    /// `false`, если трек с таким id уже есть
    pub fn add(&mut self, track: RemoteTrack) -> bool {
        if self.tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    pub fn tracks(&self) -> &[RemoteTrack] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_enabled = enabled;
    }
}

/// Источник локального медиа (аналог getUserMedia)
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalMediaStream, MediaAccessError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// Набор устройств в процессе: разрешение и наличие по типу
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    permission: Permission,
    audio_available: bool,
    video_available: bool,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            permission: Permission::Granted,
            audio_available: true,
            video_available: true,
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permission = permission;
        self
    }

    pub fn without(mut self, kind: TrackKind) -> Self {
        match kind {
            TrackKind::Audio => self.audio_available = false,
            TrackKind::Video => self.video_available = false,
        }
        self
    }

    fn available(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.audio_available,
            TrackKind::Video => self.video_available,
        }
    }
}

#[async_trait]
impl MediaDevices for DeviceRegistry {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalMediaStream, MediaAccessError> {
        let kinds = constraints.kinds();

        // Без fallback на только-аудио: нужен весь запрошенный набор
        for &kind in &kinds {
            if self.permission == Permission::Denied {
                return Err(MediaAccessError::PermissionDenied(kind));
            }
            if !self.available(kind) {
                return Err(MediaAccessError::NotFound(kind));
            }
        }

        let stream_id = format!("local-{}", random_id());
        let tracks = kinds
            .into_iter()
            .map(|kind| LocalTrack::new(kind, &stream_id))
            .collect();
        log(&format!("Acquired local media stream {}", stream_id));
        Ok(LocalMediaStream::new(stream_id, tracks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    #[tokio::test]
    async fn registry_builds_audio_and_video() {
        let stream = DeviceRegistry::new()
            .get_user_media(&MediaConstraints::default())
            .await
            .unwrap();
        assert_eq!(stream.tracks().len(), 2);
        assert_eq!(stream.tracks_of(TrackKind::Audio).count(), 1);
        assert_eq!(stream.tracks_of(TrackKind::Video).count(), 1);
        assert!(stream.tracks().iter().all(LocalTrack::is_enabled));
    }

    #[tokio::test]
    async fn denied_permission_is_reported() {
        let err = DeviceRegistry::new()
            .with_permission(Permission::Denied)
            .get_user_media(&MediaConstraints::default())
            .await
            .unwrap_err();
        assert_eq!(err, MediaAccessError::PermissionDenied(TrackKind::Audio));
    }

    #[tokio::test]
    async fn missing_camera_has_no_audio_only_fallback() {
        let err = DeviceRegistry::new()
            .without(TrackKind::Video)
            .get_user_media(&MediaConstraints::default())
            .await
            .unwrap_err();
        assert_eq!(err, MediaAccessError::NotFound(TrackKind::Video));
    }

    #[tokio::test]
    async fn disabled_track_drops_samples() {
        let track = LocalTrack::new(TrackKind::Audio, "s");
        let sample = Sample {
            data: Bytes::from_static(&[0xf8, 0xff, 0xfe]),
            duration: Duration::from_millis(20),
            ..Default::default()
        };

        assert!(track.write_sample(&sample).await.unwrap());
        track.set_enabled(false);
        assert!(!track.write_sample(&sample).await.unwrap());
        track.set_enabled(true);
        track.stop();
        assert!(!track.write_sample(&sample).await.unwrap());
    }

    #[test]
    fn sample_write_failure_has_own_error() {
        let err = PeerError::WriteSample("track closed".into());
        assert_eq!(err.to_string(), "failed to write media sample: track closed");
        assert!(!matches!(err, PeerError::AddTrack(_)));
    }

    #[test]
    fn stream_toggles_only_requested_kind() {
        let stream = LocalMediaStream::new(
            "s".into(),
            vec![LocalTrack::new(TrackKind::Audio, "s"), LocalTrack::new(TrackKind::Video, "s")],
        );
        assert_eq!(stream.set_enabled(TrackKind::Audio, false), 1);
        assert!(!stream.tracks_of(TrackKind::Audio).all(LocalTrack::is_enabled));
        assert!(stream.tracks_of(TrackKind::Video).all(LocalTrack::is_enabled));

        stream.stop_all();
        assert!(stream.all_stopped());
    }

    #[test]
    fn remote_stream_dedupes_and_clears() {
        let mut remote = RemoteMediaStream::default();
        let track = RemoteTrack {
            id: "a".into(),
            kind: TrackKind::Audio,
            stream_id: "r".into(),
        };
        assert!(remote.add(track.clone()));
        assert!(!remote.add(track));
        remote.clear();
        assert!(remote.is_empty());
    }
}
