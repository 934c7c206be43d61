use super::broadcast::HubHandle;
use super::ws::{ObserverWs, MAX_FRAME_SIZE};

use actix_web::{get, web, Error, HttpRequest, HttpResponse, Responder};
use actix_web_actors::ws;
use log::debug;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Upgrades the request and attaches a new observer to the hub
#[get("/ws")]
pub async fn observe(
    req: HttpRequest,
    stream: web::Payload,
    hub: web::Data<HubHandle>,
) -> Result<HttpResponse, Error> {
    let (observer, outbound) = hub.observer();
    let id = observer.id();
    hub.register(observer);

    let session = ObserverWs::new(id, hub.get_ref().clone(), outbound);
    let response = ws::WsResponseBuilder::new(session, &req, stream)
        .frame_size(MAX_FRAME_SIZE)
        .start();

    if let Err(e) = &response {
        debug!("websocket handshake for observer {} failed: {}", id, e);
        hub.unregister(id);
    }
    response
}

#[get("/healthz")]
pub async fn healthz(hub: web::Data<HubHandle>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "observers": hub.observer_count(),
    }))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(observe).service(healthz);
}
