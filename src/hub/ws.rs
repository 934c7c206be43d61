use super::broadcast::HubHandle;

use actix::prelude::*;
use actix_web_actors::ws;
use log::{debug, info};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::Receiver;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

/// How often heartbeat pings are sent
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long before lack of client response causes a timeout
pub const WS_CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest inbound frame accepted from an observer
pub const MAX_FRAME_SIZE: usize = 512;

/// Websocket actor relaying hub messages to a single observer
pub struct ObserverWs {
    id: Uuid,

    /// Refreshed by any ping or pong from the peer
    hb: Instant,

    hub: HubHandle,

    outbound: Option<Receiver<Arc<str>>>,
}

impl ObserverWs {
    pub fn new(id: Uuid, hub: HubHandle, outbound: Receiver<Arc<str>>) -> Self {
        Self {
            id,
            hb: Instant::now(),
            hub,
            outbound: Some(outbound),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > WS_CLIENT_TIMEOUT {
                info!("observer {} heartbeat failed, disconnecting", act.id);
                ctx.stop();
                return;
            }

            ctx.ping(b"");
        });
    }
}

impl Actor for ObserverWs {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("observer {} connected", self.id);
        self.hb(ctx);

        if let Some(outbound) = self.outbound.take() {
            ctx.add_stream(ReceiverStream::new(outbound));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("observer {} disconnected", self.id);
        self.hub.unregister(self.id);
    }
}

/// Outbound messages queued by the hub
impl StreamHandler<Arc<str>> for ObserverWs {
    fn handle(&mut self, msg: Arc<str>, ctx: &mut Self::Context) {
        ctx.text(msg.to_string());
    }

    /// The hub dropped this observer.
    fn finished(&mut self, ctx: &mut Self::Context) {
        debug!("outbound queue of observer {} closed", self.id);
        ctx.close(Some(ws::CloseCode::Away.into()));
        ctx.stop();
    }
}

/// Inbound frames, only liveness matters
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ObserverWs {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg)
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(_)) | Ok(ws::Message::Binary(_)) => {
                debug!("discarding message from observer {}", self.id);
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                info!("observer {} protocol error: {}", self.id, e);
                ctx.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::hub::{routes, Broadcast, Hub, HubHandle, HubSettings};
    use actix_web::{web, App};
    use awc::ws::{CloseCode, Frame, Message};
    use futures_util::{SinkExt as _, StreamExt as _};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::watch;

    const WAIT: Duration = Duration::from_secs(2);

    fn serve(handle: &HubHandle) -> actix_test::TestServer {
        let handle = handle.clone();
        actix_test::start(move || {
            App::new()
                .app_data(web::Data::new(handle.clone()))
                .configure(routes)
        })
    }

    fn spawn_hub() -> (HubHandle, watch::Sender<bool>) {
        let (hub, handle) = Hub::new(&HubSettings::default());
        let (shutdown_tx, shutdown) = watch::channel(false);
        tokio::spawn(hub.run(shutdown));
        (handle, shutdown_tx)
    }

    async fn wait_for_observers(handle: &HubHandle, expected: usize) {
        tokio::time::timeout(WAIT, async {
            while handle.observer_count() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("observer count never reached {}", expected));
    }

    #[actix_web::test]
    async fn test_client_close_unregisters_observer() {
        let (handle, _shutdown_tx) = spawn_hub();
        let mut srv = serve(&handle);

        let mut client = srv.ws_at("/ws").await.expect("handshake should succeed");
        wait_for_observers(&handle, 1).await;

        client
            .send(Message::Close(Some(CloseCode::Normal.into())))
            .await
            .expect("close frame should be sent");

        wait_for_observers(&handle, 0).await;
    }

    #[actix_web::test]
    async fn test_events_arrive_as_text_frames_in_order() {
        let (handle, _shutdown_tx) = spawn_hub();
        let mut srv = serve(&handle);

        let mut client = srv.ws_at("/ws").await.expect("handshake should succeed");
        wait_for_observers(&handle, 1).await;

        for seq in 0..3 {
            assert!(handle.broadcast("alert", json!({ "seq": seq })));
        }

        let mut received = Vec::new();
        while received.len() < 3 {
            let frame = tokio::time::timeout(WAIT, client.next())
                .await
                .expect("frame should arrive")
                .expect("stream should stay open")
                .expect("frame should decode");

            if let Frame::Text(text) = frame {
                let event: Value = serde_json::from_slice(&text).expect("frame should be json");
                assert_eq!(event["type"], "alert");
                received.push(event["data"]["seq"].clone());
            }
        }

        assert_eq!(received, vec![json!(0), json!(1), json!(2)]);
    }

    #[actix_web::test]
    async fn test_hub_shutdown_closes_session_with_going_away() {
        let (handle, shutdown_tx) = spawn_hub();
        let mut srv = serve(&handle);

        let mut client = srv.ws_at("/ws").await.expect("handshake should succeed");
        wait_for_observers(&handle, 1).await;

        shutdown_tx.send(true).expect("hub holds the receiver");

        let reason = loop {
            let frame = tokio::time::timeout(WAIT, client.next())
                .await
                .expect("close frame should arrive")
                .expect("stream should deliver the close frame")
                .expect("frame should decode");

            if let Frame::Close(reason) = frame {
                break reason;
            }
        };

        assert_eq!(reason.map(|r| r.code), Some(CloseCode::Away));
        assert_eq!(handle.observer_count(), 0);
    }

    #[actix_web::test]
    async fn test_oversized_inbound_frame_ends_session() {
        let (handle, _shutdown_tx) = spawn_hub();
        let mut srv = serve(&handle);

        let mut client = srv.ws_at("/ws").await.expect("handshake should succeed");
        wait_for_observers(&handle, 1).await;

        let oversized = "x".repeat(super::MAX_FRAME_SIZE + 100);
        client
            .send(Message::Text(oversized.into()))
            .await
            .expect("frame should be sent");

        let ended = tokio::time::timeout(WAIT, async {
            loop {
                match client.next().await {
                    None | Some(Err(_)) | Some(Ok(Frame::Close(_))) => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;

        assert!(ended.is_ok(), "session should end after an oversized frame");
        wait_for_observers(&handle, 0).await;
    }
}
