use actix_web::{web, HttpResponse};
use serde_json::json;

use sia_common::config;

use super::success;
use crate::node::Node;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/daemon/version", web::get().to(version))
        .route("/daemon/constants", web::get().to(constants))
        .route("/daemon/stop", web::get().to(stop));
}

async fn version() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "version": config::VERSION }))
}

// every consensus constant a client might need to reproduce our numbers
async fn constants() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "blockfrequency": config::BLOCK_FREQUENCY,
        "blocksizelimit": config::MAX_BLOCK_SIZE,
        "maturitydelay": config::MATURITY_DELAY,
        "mediantimestampwindow": config::MEDIAN_TIMESTAMP_WINDOW,
        "futurethreshold": config::FUTURE_THRESHOLD,
        "initialcoinbase": config::INITIAL_COINBASE,
        "minimumcoinbase": config::MINIMUM_COINBASE,
        "coinprecision": config::COIN_PRECISION.to_string(),
        "siafundcount": config::SIAFUND_COUNT,
        "sectorsize": config::SECTOR_SIZE,
        "targetwindow": config::TARGET_WINDOW,
        "maxtargetadjustmentup": config::MAX_TARGET_ADJUSTMENT_UP,
        "maxtargetadjustmentdown": config::MAX_TARGET_ADJUSTMENT_DOWN,
    }))
}

// respond success, then let the node wind down
async fn stop(node: web::Data<Node>) -> HttpResponse {
    info!("Shutdown requested via /daemon/stop");
    node.signal_shutdown();
    success()
}
