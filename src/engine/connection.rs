use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::scheduler::Trigger;
use super::Engine;
use crate::backend::push::{parse_frame, PushEvent, PushFrame, NAMESPACE_CONNECT, PONG};
use crate::error::Result;
use crate::snapshot::ConnectionState;

/// Keeps the push subscription alive and turns update events into refresh
/// triggers.
///
/// While disconnected the scheduler's interval is the only source of
/// refreshes; reconnection waits a fixed delay with no backoff.
pub struct ConnectionManager {
    push_url: Url,
    reconnect_delay: Duration,
}

impl ConnectionManager {
    pub fn new(push_url: Url, reconnect_delay: Duration) -> Self {
        Self {
            push_url,
            reconnect_delay,
        }
    }

    /// Runs until the task is aborted.
    pub async fn run(&self, engine: Arc<Engine>) {
        loop {
            match self.session(&engine).await {
                Ok(()) => info!("Push channel closed by server"),
                Err(e) => warn!("Push channel error: {e}"),
            }

            engine.set_connection(ConnectionState::Disconnected);
            tokio::time::sleep(self.reconnect_delay).await;
            debug!("Reconnecting push channel to {}", self.push_url);
        }
    }

    /// One connection lifetime, from handshake to close.
    async fn session(&self, engine: &Engine) -> Result<()> {
        let (stream, _) = connect_async(self.push_url.as_str()).await?;
        info!("Push channel connected to {}", self.push_url);
        engine.set_connection(ConnectionState::Connected);

        let (mut write, mut read) = stream.split();
        while let Some(message) = read.next().await {
            let text = match message? {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            match parse_frame(&text) {
                PushFrame::Open => write.send(Message::Text(NAMESPACE_CONNECT.to_string())).await?,
                PushFrame::Ping => write.send(Message::Text(PONG.to_string())).await?,
                PushFrame::Close | PushFrame::Event(PushEvent::Disconnect) => break,
                PushFrame::Event(event) => handle_event(engine, &event),
                PushFrame::Ignored => debug!("Ignoring push frame: {text}"),
            }
        }

        Ok(())
    }
}

/// Each update event queues exactly one full refresh.
fn handle_event(engine: &Engine, event: &PushEvent) {
    match event {
        PushEvent::Connect => engine.set_connection(ConnectionState::Connected),
        event if event.triggers_refresh() => {
            debug!("Push event {event:?} requested a refresh");
            engine.request_refresh(Trigger::Push);
        }
        other => debug!("Ignoring push event {other:?}"),
    }
}
