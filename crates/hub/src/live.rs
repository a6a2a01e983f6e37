//! Live feed: one WebSocket connection to the field device per live
//! plantation. Decodes status frames into readings and writes dispatched
//! commands back. Never reconnects; once the connection ends the plantation
//! keeps its last reading.

use futures_util::{SinkExt, StreamExt};
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::{oneshot, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::dispatch::LinkEnd;
use crate::feeds::{FeedContext, FeedEventKind};
use crate::light::LdrPolicy;
use crate::reading::Actuators;
use crate::wire::decode_frame;

pub async fn run(
    ctx: FeedContext,
    url: String,
    policy: LdrPolicy,
    device_offset: UtcOffset,
    mut link: LinkEnd,
    actuators: watch::Receiver<Actuators>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let plantation = ctx.plantation_id.clone();

    let connected = tokio::select! {
        _ = &mut shutdown => {
            debug!(%plantation, "live feed cancelled before connecting");
            return;
        }
        res = connect_async(url.as_str()) => res,
    };

    let ws = match connected {
        Ok((ws, _response)) => ws,
        Err(e) => {
            warn!(%plantation, %url, "device connection failed: {e}");
            ctx.emit(FeedEventKind::Disconnected(format!("connect failed: {e}")))
                .await;
            return;
        }
    };

    info!(%plantation, %url, "device connected");
    link.set_open(true);
    if !ctx.emit(FeedEventKind::Connected).await {
        return;
    }

    let (mut sink, mut stream) = ws.split();

    let reason = loop {
        tokio::select! {
            _ = &mut shutdown => {
                if let Err(e) = sink.close().await {
                    debug!(%plantation, "close on teardown failed: {e}");
                }
                break "shut down".to_string();
            }
            cmd = link.rx.recv() => {
                let Some(cmd) = cmd else {
                    break "command link dropped".to_string();
                };
                if let Err(e) = sink.send(Message::Text(cmd.encode().into())).await {
                    warn!(%plantation, ?cmd, "command write failed: {e}");
                    break format!("write error: {e}");
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&ctx, text.as_bytes(), policy, device_offset, &actuators).await;
                }
                Some(Ok(Message::Binary(bytes))) => {
                    handle_frame(&ctx, &bytes, policy, device_offset, &actuators).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    break format!("closed by device: {frame:?}");
                }
                // ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(%plantation, "device connection error: {e}");
                    break format!("read error: {e}");
                }
                None => break "stream ended".to_string(),
            }
        }
    };

    link.set_open(false);
    info!(%plantation, %reason, "device disconnected");
    ctx.emit(FeedEventKind::Disconnected(reason)).await;
}

/// Decode and forward one frame; malformed frames are logged and dropped.
async fn handle_frame(
    ctx: &FeedContext,
    payload: &[u8],
    policy: LdrPolicy,
    device_offset: UtcOffset,
    actuators: &watch::Receiver<Actuators>,
) {
    let illumination = actuators.borrow().illumination;
    let now = OffsetDateTime::now_utc().to_offset(device_offset);
    match decode_frame(payload, policy, illumination, now) {
        Ok(reading) => {
            ctx.emit(FeedEventKind::Reading(reading)).await;
        }
        Err(e) => {
            warn!(
                plantation = %ctx.plantation_id,
                frame = %String::from_utf8_lossy(payload),
                "dropping malformed frame: {e}"
            );
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
