mod consensus_api;
mod daemon_api;
mod explorer_api;
mod gateway_api;
mod host_api;
mod miner_api;
mod renter_api;
mod tpool_api;
mod wallet_api;

use std::sync::Arc;

use actix_web::body::BoxBody;
use actix_web::dev::{ServerHandle, ServiceRequest, ServiceResponse};
use actix_web::http::{header, StatusCode};
use actix_web::middleware::{from_fn, Next};
use actix_web::{web, App, HttpResponse, HttpServer};
use base64::Engine;
use serde_json::json;
use tokio::sync::Mutex;

use crate::node::Node;

// literal bodies that are part of the HTTP contract
const BROWSER_BLOCKED: &str = "Browser access disabled due to security vulnerability.";
const NOT_FOUND_BODY: &str = "404 - Refer to API.md";

// shared per-request configuration for the middlewares
#[derive(Clone)]
struct ApiGuard {
    required_agent: String,
    password: String,
}

// Uniform error shape: {"message": "..."} with the mapped status code
pub fn error_response(status: StatusCode, message: impl std::fmt::Display) -> HttpResponse {
    HttpResponse::build(status).json(json!({ "message": message.to_string() }))
}

pub fn bad_request(message: impl std::fmt::Display) -> HttpResponse {
    error_response(StatusCode::BAD_REQUEST, message)
}

pub fn internal_error(message: impl std::fmt::Display) -> HttpResponse {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, message)
}

// Module errors surface as "error when calling <route>: <error>"; clients
// match on these strings.
pub fn call_error(route: &str, err: impl std::fmt::Display) -> HttpResponse {
    bad_request(format!("error when calling {}: {}", route, err))
}

// success sentinel for endpoints with nothing else to report
pub fn success() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "Success": true }))
}

// Every request must present a User-Agent containing the configured
// substring; browsers are locked out wholesale.
async fn agent_filter(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, actix_web::Error> {
    let guard = req
        .app_data::<web::Data<ApiGuard>>()
        .map(|g| g.get_ref().clone());
    if let Some(guard) = guard {
        if !guard.required_agent.is_empty() {
            let allowed = req
                .headers()
                .get(header::USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .map(|agent| agent.contains(&guard.required_agent))
                .unwrap_or(false);
            if !allowed {
                return Ok(req.into_response(
                    HttpResponse::BadRequest().body(BROWSER_BLOCKED),
                ));
            }
        }
    }
    next.call(req).await
}

// Optional shared-secret authentication: HTTP Basic with any username and
// the configured password
async fn password_auth(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, actix_web::Error> {
    let guard = req
        .app_data::<web::Data<ApiGuard>>()
        .map(|g| g.get_ref().clone());
    if let Some(guard) = guard {
        if !guard.password.is_empty() && !check_basic_auth(&req, &guard.password) {
            return Ok(req.into_response(
                error_response(StatusCode::UNAUTHORIZED, "API authentication failed."),
            ));
        }
    }
    next.call(req).await
}

fn check_basic_auth(req: &ServiceRequest, password: &str) -> bool {
    let Some(value) = req.headers().get(header::AUTHORIZATION) else {
        return false;
    };
    let Ok(value) = value.to_str() else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(credentials) = String::from_utf8(decoded) else {
        return false;
    };
    // any username is accepted; only the password is checked
    credentials
        .split_once(':')
        .map(|(_, pass)| pass == password)
        .unwrap_or(false)
}

async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().body(NOT_FOUND_BODY)
}

pub struct ApiServer {
    handle: Mutex<Option<ServerHandle>>,
}

impl ApiServer {
    // Bind the HTTP API. Route groups register only for modules the node
    // actually loaded; everything else falls through to the 404 body.
    pub async fn start(node: Arc<Node>) -> anyhow::Result<Arc<ApiServer>> {
        let guard = ApiGuard {
            required_agent: node.config.agent.clone(),
            password: node.config.api_password.clone(),
        };
        let bind_address = node.config.api_addr.clone();

        let app_node = Arc::clone(&node);
        let server = HttpServer::new(move || {
            let node = Arc::clone(&app_node);
            let mut app = App::new()
                .app_data(web::Data::new(guard.clone()))
                .app_data(web::Data::from(Arc::clone(&node)))
                .configure(daemon_api::routes);

            if let Some(gateway) = &node.gateway {
                app = app
                    .app_data(web::Data::from(Arc::clone(gateway)))
                    .configure(gateway_api::routes);
            }
            if let Some(consensus) = &node.consensus {
                app = app
                    .app_data(web::Data::from(Arc::clone(consensus)))
                    .configure(consensus_api::routes);
            }
            if let Some(tpool) = &node.tpool {
                app = app
                    .app_data(web::Data::from(Arc::clone(tpool)))
                    .configure(tpool_api::routes);
            }
            if let Some(wallet) = &node.wallet {
                app = app
                    .app_data(web::Data::from(Arc::clone(wallet)))
                    .configure(wallet_api::routes);
            }
            if let Some(host) = &node.host {
                app = app
                    .app_data(web::Data::from(Arc::clone(host)))
                    .configure(host_api::routes);
            }
            if let Some(renter) = &node.renter {
                app = app
                    .app_data(web::Data::from(Arc::clone(renter)))
                    .configure(renter_api::routes);
            }
            if let Some(miner) = &node.miner {
                app = app
                    .app_data(web::Data::from(Arc::clone(miner)))
                    .configure(miner_api::routes);
            }
            if let Some(explorer) = &node.explorer {
                app = app
                    .app_data(web::Data::from(Arc::clone(explorer)))
                    .configure(explorer_api::routes);
            }

            // auth runs after the agent filter; wraps apply inside-out
            app.default_service(web::route().to(not_found))
                .wrap(from_fn(password_auth))
                .wrap(from_fn(agent_filter))
        })
        .disable_signals()
        .bind(&bind_address)?;

        info!("API server listening on {}", bind_address);
        let http_server = server.run();
        let handle = http_server.handle();
        tokio::spawn(http_server);

        Ok(Arc::new(ApiServer {
            handle: Mutex::new(Some(handle)),
        }))
    }

    // Stop accepting, then drain in-flight requests briefly
    pub async fn stop(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            let graceful = handle.stop(true);
            let _ = tokio::time::timeout(
                std::time::Duration::from_secs(crate::config::SHUTDOWN_API_GRACE_SECS),
                graceful,
            )
            .await;
            info!("API server stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    async fn ping() -> HttpResponse {
        HttpResponse::Ok().json(json!({ "pong": true }))
    }

    fn guard(agent: &str, password: &str) -> web::Data<ApiGuard> {
        web::Data::new(ApiGuard {
            required_agent: agent.to_string(),
            password: password.to_string(),
        })
    }

    #[actix_web::test]
    async fn test_user_agent_is_enforced() {
        let app = test::init_service(
            App::new()
                .app_data(guard("Sia-Agent", ""))
                .route("/ping", web::get().to(ping))
                .default_service(web::route().to(not_found))
                .wrap(from_fn(password_auth))
                .wrap(from_fn(agent_filter)),
        )
        .await;

        // no agent: hard refusal with the canonical body
        let resp = test::call_service(&app, test::TestRequest::get().uri("/ping").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = test::read_body(resp).await;
        assert_eq!(body, BROWSER_BLOCKED.as_bytes());

        // a matching substring is enough
        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/ping")
                .insert_header((header::USER_AGENT, "Sia-Agent/1.0 custom"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_unknown_route_body() {
        let app = test::init_service(
            App::new()
                .app_data(guard("", ""))
                .route("/ping", web::get().to(ping))
                .default_service(web::route().to(not_found))
                .wrap(from_fn(password_auth))
                .wrap(from_fn(agent_filter)),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/definitely/not/there").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(test::read_body(resp).await, NOT_FOUND_BODY.as_bytes());
    }

    #[actix_web::test]
    async fn test_password_auth() {
        let app = test::init_service(
            App::new()
                .app_data(guard("", "hunter2"))
                .route("/ping", web::get().to(ping))
                .default_service(web::route().to(not_found))
                .wrap(from_fn(password_auth))
                .wrap(from_fn(agent_filter)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/ping").to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        // any username works; only the password is compared
        let credentials =
            base64::engine::general_purpose::STANDARD.encode("whoever:hunter2");
        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/ping")
                .insert_header((header::AUTHORIZATION, format!("Basic {}", credentials)))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let credentials = base64::engine::general_purpose::STANDARD.encode("whoever:wrong");
        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/ping")
                .insert_header((header::AUTHORIZATION, format!("Basic {}", credentials)))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
