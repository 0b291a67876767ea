use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;

use sia_common::crypto::Hash;
use sia_common::serializer::Serializer;
use sia_common::transaction::Transaction;

use super::{bad_request, call_error, success};
use crate::tpool::TransactionPool;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/tpool/raw/{id}", web::get().to(raw_get))
        .route("/tpool/raw/{id}", web::post().to(raw_post));
}

// the transaction and its pooled parents, in both JSON and wire form
async fn raw_get(tpool: web::Data<TransactionPool>, path: web::Path<String>) -> HttpResponse {
    let id = match Hash::from_str(&path) {
        Ok(id) => id,
        Err(_) => return bad_request("invalid transaction ID"),
    };

    match tpool.transaction(&id).await {
        Some((transaction, parents)) => {
            let mut parents_hex = String::new();
            for parent in &parents {
                parents_hex.push_str(&parent.to_hex());
            }
            HttpResponse::Ok().json(json!({
                "id": id,
                "transaction": transaction,
                "rawtransaction": transaction.to_hex(),
                "parents": parents,
                "rawparents": parents.iter().map(|p| p.to_hex()).collect::<Vec<_>>(),
            }))
        }
        None => call_error("/tpool/raw", "transaction not found in transaction pool"),
    }
}

#[derive(Deserialize)]
struct RawPostForm {
    // wire-encoded transaction; when present the set is (re)submitted
    transaction: Option<String>,
    #[serde(default)]
    parents: Vec<String>,
}

// Submit a shipped transaction into the pool, or re-relay a pooled one
async fn raw_post(
    tpool: web::Data<TransactionPool>,
    path: web::Path<String>,
    form: Option<web::Json<RawPostForm>>,
) -> HttpResponse {
    if let Some(form) = form {
        if let Some(raw) = &form.transaction {
            let transaction = match Transaction::from_hex(raw) {
                Ok(transaction) => transaction,
                Err(e) => return bad_request(format!("malformed transaction: {}", e)),
            };
            let mut set = Vec::with_capacity(form.parents.len() + 1);
            for raw_parent in &form.parents {
                match Transaction::from_hex(raw_parent) {
                    Ok(parent) => set.push(parent),
                    Err(e) => return bad_request(format!("malformed parent: {}", e)),
                }
            }
            set.push(transaction);
            return match tpool.accept_transaction_set(set).await {
                Ok(()) => success(),
                Err(e) => call_error("/tpool/raw", e),
            };
        }
    }

    let id = match Hash::from_str(&path) {
        Ok(id) => id,
        Err(_) => return bad_request("invalid transaction ID"),
    };
    match tpool.broadcast(&id).await {
        Ok(()) => success(),
        Err(e) => call_error("/tpool/raw", e),
    }
}
