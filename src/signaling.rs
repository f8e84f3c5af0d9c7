//! Обмен signaling-сообщениями между двумя пирами
//!
//! The negotiator only sees [`SignalingTransport::send`] and an inbound
//! `mpsc` receiver. [`LoopbackSignaling`] links two negotiators in one
//! process; a hosted relay would implement the same trait.

pub mod codec;

use crate::error::SignalingError;
use crate::logger::log;
use crate::peer::types::IceCandidate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub use codec::{decode_token, encode_token};

/// Сообщение signaling-канала, JSON с дискриминатором `type`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: IceCandidate },
    /// `nonce` решает, кто уступает при встречных offer (glare)
    Ready {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nonce: Option<u32>,
    },
}

impl SignalMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::Candidate { .. } => "candidate",
            SignalMessage::Ready { .. } => "ready",
        }
    }
}

/// Формат сообщений на проводе
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Json,
    /// gzip + base64, для текстовых каналов (copy/paste, QR)
    Token,
}

#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn send(&self, msg: SignalMessage) -> Result<(), SignalingError>;
}

/// Один конец in-process канала с искусственной задержкой
pub struct LoopbackSignaling {
    wire: mpsc::UnboundedSender<(Instant, String)>,
    // для проверки, жив ли получатель на той стороне
    remote_inbox: mpsc::UnboundedSender<SignalMessage>,
    format: WireFormat,
}

pub type SignalInbox = mpsc::UnboundedReceiver<SignalMessage>;

impl LoopbackSignaling {
    /// Два связанных конца; вызывать только внутри tokio runtime
    pub fn pair(
        delay: Duration,
        format: WireFormat,
    ) -> ((LoopbackSignaling, SignalInbox), (LoopbackSignaling, SignalInbox)) {
        let (a_to_b, b_inbox, b_inbox_tx) = spawn_link(delay, format);
        let (b_to_a, a_inbox, a_inbox_tx) = spawn_link(delay, format);

        let a = LoopbackSignaling {
            wire: a_to_b,
            remote_inbox: b_inbox_tx,
            format,
        };
        let b = LoopbackSignaling {
            wire: b_to_a,
            remote_inbox: a_inbox_tx,
            format,
        };
        ((a, a_inbox), (b, b_inbox))
    }
}

/// Одно направление: задача держит порядок и задерживает каждое сообщение на `delay`
fn spawn_link(
    delay: Duration,
    format: WireFormat,
) -> (
    mpsc::UnboundedSender<(Instant, String)>,
    SignalInbox,
    mpsc::UnboundedSender<SignalMessage>,
) {
    let (wire_tx, mut wire_rx) = mpsc::unbounded_channel::<(Instant, String)>();
    let (deliver_tx, deliver_rx) = mpsc::unbounded_channel();
    let inbox_tx = deliver_tx.clone();

    tokio::spawn(async move {
        while let Some((sent_at, raw)) = wire_rx.recv().await {
            tokio::time::sleep_until(sent_at + delay).await;
            match codec::decode(format, &raw) {
                Ok(msg) => {
                    if deliver_tx.send(msg).is_err() {
                        log("Loopback receiver dropped, stopping link");
                        break;
                    }
                }
                Err(e) => log(&format!("Dropping undecodable signal: {}", e)),
            }
        }
    });

    (wire_tx, deliver_rx, inbox_tx)
}

#[async_trait]
impl SignalingTransport for LoopbackSignaling {
    async fn send(&self, msg: SignalMessage) -> Result<(), SignalingError> {
        if self.remote_inbox.is_closed() {
            return Err(SignalingError::Closed);
        }
        let raw = codec::encode(self.format, &msg)?;
        log(&format!("Signal out: {} ({} bytes)", msg.type_name(), raw.len()));
        self.wire
            .send((Instant::now(), raw))
            .map_err(|_| SignalingError::Closed)
    }
}
