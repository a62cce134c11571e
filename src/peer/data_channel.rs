use std::sync::Arc;

use crate::logger::log;
use crate::peer::engine::DataChannel;
use crate::peer::types::ChannelMessage;

/// Канал, открытый удалённой стороной: каждое сообщение отправляется обратно
/// без изменений, по нему удалённая сторона меряет задержку канала
pub async fn echo(channel: &Arc<dyn DataChannel>, message: ChannelMessage) {
    let len = match &message {
        ChannelMessage::Text(text) => text.len(),
        ChannelMessage::Binary(bytes) => bytes.len(),
    };
    log(&format!(
        "Echoing data channel message on '{}', length: {}",
        channel.label(),
        len
    ));

    if let Err(e) = channel.send(message).await {
        log(&format!("Failed to echo data channel message: {}", e));
    }
}

/// Логирует открытие канала удалённой стороной
pub fn attach_dc(channel: &Arc<dyn DataChannel>) {
    log(&format!("Remote peer opened data channel '{}'", channel.label()));
}
