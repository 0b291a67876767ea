use actix_web::{web, HttpResponse};
use serde_json::json;
use std::str::FromStr;

use sia_common::crypto::Hash;
use sia_common::transaction::Transaction;

use super::{bad_request, call_error};
use crate::consensus::ConsensusSet;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/consensus", web::get().to(consensus_info))
        .route(
            "/consensus/validate/transactionset",
            web::post().to(validate_transaction_set),
        )
        .route("/consensus/change/{id}", web::get().to(consensus_change));
}

async fn consensus_info(consensus: web::Data<ConsensusSet>) -> HttpResponse {
    let tip = consensus.current_tip().await;
    let target = consensus.child_target(&tip).await;
    HttpResponse::Ok().json(json!({
        "synced": consensus.is_synced(),
        "height": consensus.height().await,
        "currentblock": tip,
        "target": target,
    }))
}

async fn validate_transaction_set(
    consensus: web::Data<ConsensusSet>,
    set: web::Json<Vec<Transaction>>,
) -> HttpResponse {
    match consensus.validate_transaction_set(&set).await {
        Ok(()) => super::success(),
        Err(e) => call_error("/consensus/validate/transactionset", e),
    }
}

async fn consensus_change(
    consensus: web::Data<ConsensusSet>,
    path: web::Path<String>,
) -> HttpResponse {
    let id = match Hash::from_str(&path) {
        Ok(id) => id,
        Err(_) => return bad_request("invalid consensus change ID"),
    };

    match consensus.get_consensus_change(&id) {
        Ok((change, next)) => HttpResponse::Ok().json(json!({
            "id": change.id,
            "next": next,
            "reverted": change.reverted_blocks,
            "applied": change.applied_blocks,
            "synced": change.synced,
        })),
        Err(e) => call_error("/consensus/change", e),
    }
}
