use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;

use sia_common::crypto::Hash;
use sia_common::currency::Currency;
use sia_common::mnemonics::Dictionary;
use sia_common::unlock::UnlockHash;

use super::{bad_request, call_error, success};
use crate::wallet::Wallet;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/wallet", web::get().to(wallet_info))
        .route("/wallet/init", web::post().to(init))
        // historical alias for init
        .route("/wallet/encrypt", web::post().to(init))
        .route("/wallet/unlock", web::post().to(unlock))
        .route("/wallet/lock", web::post().to(lock))
        .route("/wallet/address", web::get().to(address))
        .route("/wallet/addresses", web::get().to(addresses))
        .route("/wallet/seeds", web::get().to(seeds))
        .route("/wallet/seed", web::post().to(load_seed))
        .route("/wallet/backup", web::get().to(backup))
        .route("/wallet/backup", web::post().to(backup))
        .route("/wallet/033x", web::post().to(load_033x))
        .route("/wallet/siagkey", web::post().to(load_siag_key))
        .route("/wallet/siacoins", web::post().to(send_siacoins))
        .route("/wallet/siafunds", web::post().to(send_siafunds))
        .route("/wallet/transaction/{id}", web::get().to(transaction))
        .route("/wallet/transactions", web::get().to(transactions))
        .route(
            "/wallet/transactions/{addr}",
            web::get().to(address_transactions),
        );
}

async fn wallet_info(wallet: web::Data<Wallet>) -> HttpResponse {
    let encrypted = wallet.is_encrypted().unwrap_or(false);
    let unlocked = wallet.is_unlocked().await;
    let (coins, funds) = wallet.confirmed_balance().await;
    let (incoming, outgoing) = wallet.unconfirmed_balance().await;
    HttpResponse::Ok().json(json!({
        "encrypted": encrypted,
        "unlocked": unlocked,
        "confirmedsiacoinbalance": coins,
        "unconfirmedincomingsiacoins": incoming,
        "unconfirmedoutgoingsiacoins": outgoing,
        "siafundbalance": funds,
        "height": wallet.height().await,
    }))
}

#[derive(Deserialize)]
struct InitForm {
    #[serde(rename = "encryptionpassword", default)]
    encryption_password: String,
    #[serde(default)]
    dictionary: String,
}

async fn init(wallet: web::Data<Wallet>, form: web::Form<InitForm>) -> HttpResponse {
    let dictionary = match form.dictionary.parse::<Dictionary>() {
        Ok(dictionary) => dictionary,
        Err(e) => return call_error("/wallet/init", e),
    };
    match wallet.encrypt(&form.encryption_password, dictionary).await {
        Ok(primary_seed) => HttpResponse::Ok().json(json!({ "primaryseed": primary_seed })),
        Err(e) => call_error("/wallet/init", e),
    }
}

#[derive(Deserialize)]
struct UnlockForm {
    #[serde(rename = "encryptionpassword", default)]
    encryption_password: String,
}

async fn unlock(wallet: web::Data<Wallet>, form: web::Form<UnlockForm>) -> HttpResponse {
    let wallet: Arc<Wallet> = wallet.into_inner();
    match wallet.unlock(&form.encryption_password).await {
        Ok(()) => success(),
        Err(e) => call_error("/wallet/unlock", e),
    }
}

async fn lock(wallet: web::Data<Wallet>) -> HttpResponse {
    match wallet.lock().await {
        Ok(()) => success(),
        Err(e) => call_error("/wallet/lock", e),
    }
}

async fn address(wallet: web::Data<Wallet>) -> HttpResponse {
    match wallet.next_address().await {
        Ok(conditions) => {
            HttpResponse::Ok().json(json!({ "address": conditions.unlock_hash() }))
        }
        Err(e) => call_error("/wallet/address", e),
    }
}

async fn addresses(wallet: web::Data<Wallet>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "addresses": wallet.all_addresses().await }))
}

async fn seeds(wallet: web::Data<Wallet>) -> HttpResponse {
    match wallet.all_seeds().await {
        Ok(all) => match wallet.primary_seed().await {
            Ok((primary, progress)) => HttpResponse::Ok().json(json!({
                "primaryseed": primary,
                "addressesremaining": u64::MAX - progress,
                "allseeds": all,
            })),
            Err(e) => call_error("/wallet/seeds", e),
        },
        Err(e) => call_error("/wallet/seeds", e),
    }
}

#[derive(Deserialize)]
struct LoadSeedForm {
    #[serde(rename = "encryptionpassword", default)]
    encryption_password: String,
    #[serde(default)]
    seed: String,
}

async fn load_seed(wallet: web::Data<Wallet>, form: web::Form<LoadSeedForm>) -> HttpResponse {
    let wallet: Arc<Wallet> = wallet.into_inner();
    match wallet.load_seed(&form.encryption_password, &form.seed).await {
        Ok(()) => success(),
        Err(e) => call_error("/wallet/seed", e),
    }
}

#[derive(Deserialize)]
struct BackupQuery {
    #[serde(default)]
    destination: String,
}

async fn backup(wallet: web::Data<Wallet>, query: web::Query<BackupQuery>) -> HttpResponse {
    match wallet.create_backup(&query.destination).await {
        Ok(()) => success(),
        Err(e) => call_error("/wallet/backup", e),
    }
}

#[derive(Deserialize)]
struct Load033xForm {
    #[serde(default)]
    source: String,
}

async fn load_033x(wallet: web::Data<Wallet>, form: web::Form<Load033xForm>) -> HttpResponse {
    match wallet.load_033x(&form.source).await {
        Ok(()) => success(),
        Err(e) => call_error("/wallet/033x", e),
    }
}

#[derive(Deserialize)]
struct SiagKeyForm {
    // comma-separated list of keyfile paths
    #[serde(default)]
    keyfiles: String,
}

async fn load_siag_key(wallet: web::Data<Wallet>, form: web::Form<SiagKeyForm>) -> HttpResponse {
    let keyfiles: Vec<String> = form
        .keyfiles
        .split(',')
        .filter(|path| !path.is_empty())
        .map(|path| path.to_string())
        .collect();
    match wallet.load_siag_keys(&keyfiles).await {
        Ok(()) => success(),
        Err(e) => call_error("/wallet/siagkey", e),
    }
}

#[derive(Deserialize)]
struct SendForm {
    #[serde(default)]
    amount: String,
    #[serde(default)]
    destination: String,
}

async fn send_siacoins(wallet: web::Data<Wallet>, form: web::Form<SendForm>) -> HttpResponse {
    let amount = match Currency::from_str(&form.amount) {
        Ok(amount) => amount,
        Err(e) => return bad_request(e),
    };
    let destination = match UnlockHash::from_str(&form.destination) {
        Ok(destination) => destination,
        Err(e) => return bad_request(e),
    };
    match wallet.send_siacoins(amount, destination).await {
        Ok(set) => HttpResponse::Ok().json(json!({
            "transactionids": set.iter().map(|txn| txn.id()).collect::<Vec<_>>(),
        })),
        Err(e) => call_error("/wallet/siacoins", e),
    }
}

async fn send_siafunds(wallet: web::Data<Wallet>, form: web::Form<SendForm>) -> HttpResponse {
    let amount = match Currency::from_str(&form.amount) {
        Ok(amount) => amount,
        Err(e) => return bad_request(e),
    };
    let destination = match UnlockHash::from_str(&form.destination) {
        Ok(destination) => destination,
        Err(e) => return bad_request(e),
    };
    match wallet.send_siafunds(amount, destination).await {
        Ok(set) => HttpResponse::Ok().json(json!({
            "transactionids": set.iter().map(|txn| txn.id()).collect::<Vec<_>>(),
        })),
        Err(e) => call_error("/wallet/siafunds", e),
    }
}

async fn transaction(wallet: web::Data<Wallet>, path: web::Path<String>) -> HttpResponse {
    let id = match Hash::from_str(&path) {
        Ok(id) => id,
        Err(_) => return bad_request("invalid transaction ID"),
    };
    match wallet.transaction(&id).await {
        Some(txn) => HttpResponse::Ok().json(json!({ "transaction": txn })),
        None => call_error("/wallet/transaction", "transaction not found in wallet"),
    }
}

#[derive(Deserialize)]
struct TransactionsQuery {
    #[serde(rename = "startheight", default)]
    start_height: u64,
    #[serde(rename = "endheight", default = "default_end_height")]
    end_height: u64,
}

fn default_end_height() -> u64 {
    u64::MAX
}

async fn transactions(
    wallet: web::Data<Wallet>,
    query: web::Query<TransactionsQuery>,
) -> HttpResponse {
    match wallet
        .transactions(query.start_height, query.end_height)
        .await
    {
        Ok(confirmed) => HttpResponse::Ok().json(json!({
            "confirmedtransactions": confirmed,
            "unconfirmedtransactions": wallet.unconfirmed_transactions().await,
        })),
        Err(e) => call_error("/wallet/transactions", e),
    }
}

async fn address_transactions(
    wallet: web::Data<Wallet>,
    path: web::Path<String>,
) -> HttpResponse {
    let address = match UnlockHash::from_str(&path) {
        Ok(address) => address,
        Err(e) => return bad_request(e),
    };
    HttpResponse::Ok().json(json!({
        "transactions": wallet.address_transactions(&address).await,
    }))
}
