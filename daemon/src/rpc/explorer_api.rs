use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;

use sia_common::api::explorer::HashType;
use sia_common::config::MAX_BLOCKS_REQUEST;
use sia_common::crypto::Hash;

use super::{bad_request, call_error};
use crate::explorer::Explorer;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/explorer", web::get().to(explorer_info))
        .route("/explorer/blocks/{height}", web::get().to(blocks))
        .route("/explorer/hash/{hash}", web::get().to(hash_lookup));
}

async fn explorer_info(explorer: web::Data<Explorer>) -> HttpResponse {
    HttpResponse::Ok().json(explorer.latest_facts().await)
}

#[derive(Deserialize)]
struct RangeQuery {
    from: Option<u64>,
    to: Option<u64>,
}

// One block by height, or a bounded range via ?from&to
async fn blocks(
    explorer: web::Data<Explorer>,
    path: web::Path<u64>,
    query: web::Query<RangeQuery>,
) -> HttpResponse {
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return bad_request("from must not exceed to");
        }
        let current = explorer.height().await;
        if to > current {
            return bad_request("to exceeds the current height");
        }
        if to - from + 1 > MAX_BLOCKS_REQUEST {
            return bad_request(format!(
                "a maximum of {} blocks can be requested",
                MAX_BLOCKS_REQUEST
            ));
        }

        let mut out = Vec::new();
        for height in from..=to {
            match explorer.block_at(height) {
                Ok(block) => out.push(json!({ "height": height, "block": block })),
                Err(e) => return call_error("/explorer/blocks", e),
            }
        }
        return HttpResponse::Ok().json(json!({ "blocks": out }));
    }

    match explorer.block_at(*path) {
        Ok(block) => HttpResponse::Ok().json(json!({ "block": block })),
        Err(e) => call_error("/explorer/blocks", e),
    }
}

// Dispatch by ID space; the response carries whatever the hash resolves to
async fn hash_lookup(explorer: web::Data<Explorer>, path: web::Path<String>) -> HttpResponse {
    let hash = match Hash::from_str(&path) {
        Ok(hash) => hash,
        Err(_) => return bad_request("invalid hash"),
    };

    let hash_type = match explorer.hash_type(&hash) {
        Ok(hash_type) => hash_type,
        Err(e) => return call_error("/explorer/hash", e),
    };

    let result = match hash_type {
        HashType::BlockId => explorer.block(&hash).map(|(block, height)| {
            json!({ "hashtype": hash_type, "block": block, "height": height })
        }),
        HashType::TransactionId => explorer.transaction_block(&hash).map(|block_id| {
            json!({ "hashtype": hash_type, "blockid": block_id })
        }),
        HashType::SiacoinOutputId => explorer.coin_output_transactions(&hash).map(|ids| {
            json!({ "hashtype": hash_type, "transactionids": ids })
        }),
        HashType::FileContractId => explorer.contract_history(&hash).map(|ids| {
            json!({ "hashtype": hash_type, "transactionids": ids })
        }),
        HashType::SiafundOutputId => explorer.fund_output_transactions(&hash).map(|ids| {
            json!({ "hashtype": hash_type, "transactionids": ids })
        }),
        HashType::UnlockHash => explorer.unlock_hash_transactions(&hash).map(|ids| {
            json!({ "hashtype": hash_type, "transactionids": ids })
        }),
    };

    match result {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => call_error("/explorer/hash", e),
    }
}
