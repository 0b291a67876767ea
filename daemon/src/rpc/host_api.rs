use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;

use sia_common::crypto::Hash;
use sia_common::currency::Currency;

use super::{bad_request, call_error, success};
use crate::host::Host;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/host", web::get().to(host_info))
        .route("/host", web::post().to(set_settings))
        .route("/host/announce", web::post().to(announce))
        .route("/host/storage", web::get().to(storage))
        .route("/host/storage/folders/add", web::post().to(add_folder))
        .route("/host/storage/folders/resize", web::post().to(resize_folder))
        .route("/host/storage/folders/remove", web::post().to(remove_folder))
        .route(
            "/host/storage/sectors/delete/{merkleroot}",
            web::post().to(delete_sector),
        );
}

async fn host_info(host: web::Data<Host>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "internalsettings": host.internal_settings().await,
        "externalsettings": host.external_settings().await,
        "financialmetrics": host.financial_metrics().await,
        "publickey": host.public_key(),
    }))
}

// Every settings field arrives optionally; omitted fields keep their
// current value. Field names are the HTTP contract.
#[derive(Deserialize, Default)]
struct SettingsForm {
    acceptingcontracts: Option<bool>,
    maxduration: Option<u64>,
    maxdownloadbatchsize: Option<u64>,
    maxrevisebatchsize: Option<u64>,
    netaddress: Option<String>,
    windowsize: Option<u64>,
    collateral: Option<String>,
    collateralbudget: Option<String>,
    maxcollateralfraction: Option<u64>,
    maxcollateral: Option<String>,
    downloadlimitgrowth: Option<u64>,
    downloadlimitcap: Option<u64>,
    downloadspeedlimit: Option<u64>,
    uploadlimitgrowth: Option<u64>,
    uploadlimitcap: Option<u64>,
    uploadspeedlimit: Option<u64>,
    minimumcontractprice: Option<String>,
    minimumdownloadbandwidthprice: Option<String>,
    minimumstorageprice: Option<String>,
    minimumuploadbandwidthprice: Option<String>,
}

fn parse_currency(value: &Option<String>) -> Result<Option<Currency>, &'static str> {
    match value {
        Some(raw) => Currency::from_str(raw).map(Some),
        None => Ok(None),
    }
}

async fn set_settings(host: web::Data<Host>, form: web::Form<SettingsForm>) -> HttpResponse {
    let mut settings = host.internal_settings().await;

    macro_rules! apply {
        ($field:ident, $target:ident) => {
            if let Some(value) = &form.$field {
                settings.$target = value.clone();
            }
        };
    }
    apply!(acceptingcontracts, accepting_contracts);
    apply!(maxduration, max_duration);
    apply!(maxdownloadbatchsize, max_download_batch_size);
    apply!(maxrevisebatchsize, max_revise_batch_size);
    apply!(netaddress, net_address);
    apply!(windowsize, window_size);
    apply!(maxcollateralfraction, max_collateral_fraction);
    apply!(downloadlimitgrowth, download_limit_growth);
    apply!(downloadlimitcap, download_limit_cap);
    apply!(downloadspeedlimit, download_speed_limit);
    apply!(uploadlimitgrowth, upload_limit_growth);
    apply!(uploadlimitcap, upload_limit_cap);
    apply!(uploadspeedlimit, upload_speed_limit);

    for (value, target) in [
        (&form.collateral, &mut settings.collateral),
        (&form.collateralbudget, &mut settings.collateral_budget),
        (&form.maxcollateral, &mut settings.max_collateral),
        (
            &form.minimumcontractprice,
            &mut settings.minimum_contract_price,
        ),
        (
            &form.minimumdownloadbandwidthprice,
            &mut settings.minimum_download_bandwidth_price,
        ),
        (
            &form.minimumstorageprice,
            &mut settings.minimum_storage_price,
        ),
        (
            &form.minimumuploadbandwidthprice,
            &mut settings.minimum_upload_bandwidth_price,
        ),
    ] {
        match parse_currency(value) {
            Ok(Some(parsed)) => *target = parsed,
            Ok(None) => {}
            Err(e) => return bad_request(e),
        }
    }

    match host.set_internal_settings(settings).await {
        Ok(()) => success(),
        Err(e) => call_error("/host", e),
    }
}

#[derive(Deserialize)]
struct AnnounceForm {
    netaddress: Option<String>,
}

async fn announce(host: web::Data<Host>, form: web::Form<AnnounceForm>) -> HttpResponse {
    match host.announce(form.netaddress.clone()).await {
        Ok(()) => success(),
        Err(e) => call_error("/host/announce", e),
    }
}

async fn storage(host: web::Data<Host>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "folders": host.storage_folders().await }))
}

#[derive(Deserialize)]
struct AddFolderForm {
    path: String,
    size: u64,
}

async fn add_folder(host: web::Data<Host>, form: web::Form<AddFolderForm>) -> HttpResponse {
    match host.add_storage_folder(&form.path, form.size).await {
        Ok(()) => success(),
        Err(e) => call_error("/host/storage/folders/add", e),
    }
}

#[derive(Deserialize)]
struct ResizeFolderForm {
    path: String,
    newsize: u64,
}

async fn resize_folder(host: web::Data<Host>, form: web::Form<ResizeFolderForm>) -> HttpResponse {
    match host.resize_storage_folder(&form.path, form.newsize).await {
        Ok(()) => success(),
        Err(e) => call_error("/host/storage/folders/resize", e),
    }
}

#[derive(Deserialize)]
struct RemoveFolderForm {
    path: String,
    #[serde(default)]
    force: bool,
}

async fn remove_folder(host: web::Data<Host>, form: web::Form<RemoveFolderForm>) -> HttpResponse {
    match host.remove_storage_folder(&form.path, form.force).await {
        Ok(()) => success(),
        Err(e) => call_error("/host/storage/folders/remove", e),
    }
}

async fn delete_sector(host: web::Data<Host>, path: web::Path<String>) -> HttpResponse {
    let root = match Hash::from_str(&path) {
        Ok(root) => root,
        Err(_) => return bad_request("invalid merkle root"),
    };
    match host.delete_sector(&root).await {
        Ok(()) => success(),
        Err(e) => call_error("/host/storage/sectors/delete", e),
    }
}
