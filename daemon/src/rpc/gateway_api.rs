use actix_web::{web, HttpResponse};
use serde_json::json;

use super::{call_error, success};
use crate::gateway::Gateway;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/gateway", web::get().to(gateway_info))
        .route("/gateway/connect/{addr}", web::post().to(connect))
        .route("/gateway/disconnect/{addr}", web::post().to(disconnect));
}

async fn gateway_info(gateway: web::Data<Gateway>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "netaddress": gateway.address(),
        "peers": gateway.peers_info().await,
    }))
}

async fn connect(gateway: web::Data<Gateway>, path: web::Path<String>) -> HttpResponse {
    let gateway = gateway.into_inner();
    match gateway.connect(&path).await {
        Ok(()) => success(),
        Err(e) => call_error("/gateway/connect", e),
    }
}

async fn disconnect(gateway: web::Data<Gateway>, path: web::Path<String>) -> HttpResponse {
    match gateway.disconnect(&path).await {
        Ok(()) => success(),
        Err(e) => call_error("/gateway/disconnect", e),
    }
}
