use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;

use sia_common::api::renter::Allowance;
use sia_common::crypto::PublicKey;
use sia_common::currency::Currency;

use super::{bad_request, call_error, success};
use crate::renter::Renter;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/renter", web::get().to(renter_info))
        .route("/renter", web::post().to(set_allowance))
        .route("/renter/contracts", web::get().to(contracts))
        .route("/renter/files", web::get().to(files))
        .route("/renter/downloads", web::get().to(downloads))
        .route("/renter/upload/{siapath:.*}", web::post().to(upload))
        .route("/renter/delete/{siapath:.*}", web::post().to(delete))
        .route("/renter/rename/{siapath:.*}", web::post().to(rename))
        .route("/renter/download/{siapath:.*}", web::get().to(download))
        .route("/hostdb/active", web::get().to(hostdb_active))
        .route("/hostdb/all", web::get().to(hostdb_all))
        .route("/hostdb/hosts/{pubkey}", web::get().to(hostdb_host));
}

async fn renter_info(renter: web::Data<Renter>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "settings": { "allowance": renter.allowance().await },
        "files": renter.files().await.len(),
        "contracts": renter.contracts().await.len(),
    }))
}

#[derive(Deserialize)]
struct AllowanceForm {
    #[serde(default)]
    funds: String,
    #[serde(default)]
    hosts: u64,
    #[serde(default)]
    period: u64,
    #[serde(rename = "renewwindow", default)]
    renew_window: u64,
}

async fn set_allowance(renter: web::Data<Renter>, form: web::Form<AllowanceForm>) -> HttpResponse {
    let funds = if form.funds.is_empty() {
        Currency::ZERO
    } else {
        match Currency::from_str(&form.funds) {
            Ok(funds) => funds,
            Err(e) => return bad_request(e),
        }
    };

    let allowance = Allowance {
        funds,
        hosts: form.hosts,
        period: form.period,
        renew_window: form.renew_window,
    };
    match renter.set_allowance(allowance).await {
        Ok(()) => success(),
        Err(e) => call_error("/renter", e),
    }
}

async fn contracts(renter: web::Data<Renter>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "contracts": renter.contracts().await }))
}

async fn files(renter: web::Data<Renter>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "files": renter.files().await }))
}

async fn downloads(renter: web::Data<Renter>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "downloads": renter.downloads().await }))
}

#[derive(Deserialize)]
struct UploadForm {
    source: String,
    #[serde(default)]
    datapieces: u64,
    #[serde(default)]
    paritypieces: u64,
}

async fn upload(
    renter: web::Data<Renter>,
    path: web::Path<String>,
    form: web::Form<UploadForm>,
) -> HttpResponse {
    let renter: Arc<Renter> = renter.into_inner();
    let data_pieces = if form.datapieces == 0 { 1 } else { form.datapieces };
    match renter
        .upload(&form.source, &path, data_pieces, form.paritypieces)
        .await
    {
        Ok(()) => success(),
        Err(e) => call_error("/renter/upload", e),
    }
}

async fn delete(renter: web::Data<Renter>, path: web::Path<String>) -> HttpResponse {
    match renter.delete_file(&path).await {
        Ok(()) => success(),
        Err(e) => call_error("/renter/delete", e),
    }
}

#[derive(Deserialize)]
struct RenameForm {
    newsiapath: String,
}

async fn rename(
    renter: web::Data<Renter>,
    path: web::Path<String>,
    form: web::Form<RenameForm>,
) -> HttpResponse {
    match renter.rename_file(&path, &form.newsiapath).await {
        Ok(()) => success(),
        Err(e) => call_error("/renter/rename", e),
    }
}

#[derive(Deserialize)]
struct DownloadQuery {
    #[serde(default)]
    destination: String,
}

async fn download(
    renter: web::Data<Renter>,
    path: web::Path<String>,
    query: web::Query<DownloadQuery>,
) -> HttpResponse {
    match renter.download(&path, &query.destination).await {
        Ok(()) => success(),
        Err(e) => call_error("/renter/download", e),
    }
}

async fn hostdb_active(renter: web::Data<Renter>) -> HttpResponse {
    let mut hosts = Vec::new();
    for entry in renter.hostdb.active_hosts().await {
        hosts.push(renter.hostdb.entry_info(&entry).await);
    }
    HttpResponse::Ok().json(json!({ "hosts": hosts }))
}

async fn hostdb_all(renter: web::Data<Renter>) -> HttpResponse {
    let mut hosts = Vec::new();
    for entry in renter.hostdb.all_hosts().await {
        hosts.push(renter.hostdb.entry_info(&entry).await);
    }
    HttpResponse::Ok().json(json!({ "hosts": hosts }))
}

async fn hostdb_host(renter: web::Data<Renter>, path: web::Path<String>) -> HttpResponse {
    // accept both the raw hex form and the ed25519: prefixed form
    let raw = path.strip_prefix("ed25519:").unwrap_or(&path);
    let bytes = match hex::decode(raw) {
        Ok(bytes) => bytes,
        Err(_) => return bad_request("invalid public key"),
    };
    let bytes: [u8; 32] = match bytes.try_into() {
        Ok(bytes) => bytes,
        Err(_) => return bad_request("invalid public key length"),
    };
    let public_key = match PublicKey::from_bytes(&bytes) {
        Ok(public_key) => public_key,
        Err(_) => return bad_request("invalid public key"),
    };

    match renter.hostdb.host(&public_key).await {
        Some(entry) => {
            let info = renter.hostdb.entry_info(&entry).await;
            HttpResponse::Ok().json(json!({ "entry": info }))
        }
        None => call_error("/hostdb/hosts", "no host known with that public key"),
    }
}
