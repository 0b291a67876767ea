use actix_web::{web, HttpResponse};
use serde_json::json;
use std::sync::Arc;

use super::{bad_request, call_error, success};
use crate::miner::Miner;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/miner", web::get().to(miner_info))
        .route("/miner/header", web::get().to(header_for_work))
        .route("/miner/header", web::post().to(submit_header))
        .route("/miner/start", web::get().to(start))
        .route("/miner/stop", web::get().to(stop));
}

async fn miner_info(miner: web::Data<Miner>) -> HttpResponse {
    let (mined, stale) = miner.blocks_mined();
    HttpResponse::Ok().json(json!({
        "blocksmined": mined,
        "staleblocksmined": stale,
        "cpuhashrate": miner.cpu_hashrate(),
        "cpumining": miner.is_mining(),
    }))
}

// 112 raw bytes: 32-byte target followed by the 80-byte header
async fn header_for_work(miner: web::Data<Miner>) -> HttpResponse {
    match miner.header_for_work().await {
        Ok(bytes) => HttpResponse::Ok()
            .content_type("application/octet-stream")
            .body(bytes),
        Err(e) => call_error("/miner/header", e),
    }
}

// 80 raw header bytes from an external worker
async fn submit_header(miner: web::Data<Miner>, body: web::Bytes) -> HttpResponse {
    if body.len() != sia_common::config::BLOCK_HEADER_SIZE {
        return bad_request("submitted header must be exactly 80 bytes");
    }
    match miner.submit_header(&body).await {
        Ok(()) => success(),
        Err(e) => call_error("/miner/header", e),
    }
}

async fn start(miner: web::Data<Miner>) -> HttpResponse {
    let miner: Arc<Miner> = miner.into_inner();
    miner.start_cpu_mining().await;
    success()
}

async fn stop(miner: web::Data<Miner>) -> HttpResponse {
    miner.stop_cpu_mining().await;
    success()
}
