pub mod config;
pub mod controller;
pub mod error;
pub mod logger;
pub mod media;
pub mod negotiator;
pub mod notify;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::CallConfig;
pub use controller::{CallController, CallHandle};
pub use error::{Error, Result};
pub use media::{DeviceRegistry, MediaConstraints, MediaDevices, TrackKind};
pub use negotiator::Negotiator;
pub use notify::{ChatMessage, Notice, Notifier, StatusKind};
pub use peer::{PeerConnection, PeerConnector, RtcConnector};
pub use session::{ConnectionStatus, NegotiationPhase, Role};
pub use signaling::{LoopbackSignaling, SignalMessage, SignalingTransport, WireFormat};

use logger::log;
use std::sync::Arc;
use std::time::Duration;

/// Звонок между двумя negotiator'ами в одном процессе.
///
/// B стартует как responder, A как initiator; после `Connected` у A
/// отправляется одно сообщение в чат, через `duration` обе сессии закрываются.
pub async fn run_loopback_call(config: CallConfig, duration: Duration) -> Result<()> {
    config.validate()?;
    let ((signal_a, inbox_a), (signal_b, inbox_b)) =
        LoopbackSignaling::pair(config.signaling_delay(), config.wire_format);

    let connector: Arc<dyn PeerConnector> =
        Arc::new(RtcConnector::new().map_err(Error::Negotiation)?);
    let devices: Arc<dyn MediaDevices> = Arc::new(DeviceRegistry::new());

    let (notifier_a, mut notices_a) = Notifier::channel();
    let (notifier_b, mut notices_b) = Notifier::channel();
    let a = Negotiator::new(
        config.clone(),
        devices.clone(),
        connector.clone(),
        Arc::new(signal_a),
        notifier_a,
    );
    let b = Negotiator::new(config, devices, connector, Arc::new(signal_b), notifier_b);

    let (handle_a, task_a) = CallController::spawn(a, inbox_a);
    let (handle_b, task_b) = CallController::spawn(b, inbox_b);

    handle_b.start(Role::Responder).await?;
    handle_a.start(Role::Initiator).await?;

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    let mut greeted = false;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            Some(notice) = notices_a.recv() => {
                print_notice("A", &notice);
                let connected = matches!(&notice, Notice::Status(n) if n.kind == StatusKind::Connected);
                if connected && !greeted {
                    greeted = true;
                    if let Err(e) = handle_a.send_chat("Hello from A!").await {
                        log(&format!("Chat send failed: {}", e));
                    }
                }
            }
            Some(notice) = notices_b.recv() => print_notice("B", &notice),
        }
    }

    handle_a.end().await?;
    handle_b.end().await?;
    println!("A: {:?}, B: {:?}", handle_a.status().await?, handle_b.status().await?);

    drop(handle_a);
    drop(handle_b);
    for task in [task_a, task_b] {
        if let Err(e) = task.await {
            log(&format!("Controller task failed: {}", e));
        }
    }
    Ok(())
}

fn print_notice(side: &str, notice: &Notice) {
    match serde_json::to_string(notice) {
        Ok(json) => println!("[{}] {}", side, json),
        Err(e) => log(&format!("Failed to serialize notice: {}", e)),
    }
}
