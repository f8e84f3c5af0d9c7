use crate::logger::log;
use crate::peer::events::{PeerEventKind, PeerEventSink};
use std::sync::Arc;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

/// Метка data-channel для текстового чата во время звонка
pub const CHAT_LABEL: &str = "chat";

/// общий обработчик data-channel
pub fn attach_chat(dc: &Arc<RTCDataChannel>, sink: PeerEventSink) {
    log(&format!(
        "attach_chat called for channel '{}' (epoch {})",
        dc.label(),
        sink.epoch()
    ));

    let label = dc.label().to_owned();
    dc.on_open(Box::new(move || {
        log(&format!("Data channel '{}' opened", label));
        Box::pin(async {})
    }));

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        if msg.is_string {
            let text = String::from_utf8_lossy(&msg.data).to_string();
            log(&format!("Received chat message, length: {}", text.len()));
            sink.emit(PeerEventKind::ChatReceived(text));
        } else {
            log(&format!(
                "Ignoring binary data channel message, length: {}",
                msg.data.len()
            ));
        }
        Box::pin(async {})
    }));

    dc.on_close(Box::new(|| {
        log("Data channel closed");
        Box::pin(async {})
    }));
}
