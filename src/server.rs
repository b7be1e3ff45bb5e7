//! HTTP delivery endpoint.
//!
//! | Route                           | Response                                                   |
//! |---------------------------------|------------------------------------------------------------|
//! | `GET /v1/delivery`              | 200 with matching campaigns, 204 if none, 400 on bad input |
//! | `GET /health`                   | 200 `OK`                                                   |
//! | `POST /admin/cache/invalidate`  | 204 (admin routes only)                                    |
//! | `POST /admin/cache/refresh`     | 204, or 500 if the backing store fails (admin routes only) |
use std::{convert::Infallible, future::Future, sync::Arc, time::Instant};

use http_body_util::Full;
use hyper::{
    body::{Bytes, Incoming},
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;

use crate::{
    models::{CampaignResponse, DeliveryRequest, ErrorResponse},
    targeting_cache::TargetingCache,
    DeliveryEvaluator,
};

/// Campaign delivery endpoint.
pub const DELIVERY_PATH: &str = "/v1/delivery";
/// Liveness endpoint.
pub const HEALTH_PATH: &str = "/health";
/// Admin endpoint dropping the cached snapshot.
pub const INVALIDATE_PATH: &str = "/admin/cache/invalidate";
/// Admin endpoint reloading targeting data.
pub const REFRESH_PATH: &str = "/admin/cache/refresh";

const INTERNAL_SERVER_ERROR: &str = "Internal server error";

/// Request router shared by all connections.
#[derive(Clone)]
pub struct Routes {
    evaluator: DeliveryEvaluator,
    cache: Arc<TargetingCache>,
    enable_admin: bool,
}

impl Routes {
    /// Create routes with admin endpoints disabled.
    pub fn new(evaluator: DeliveryEvaluator, cache: Arc<TargetingCache>) -> Routes {
        Routes {
            evaluator,
            cache,
            enable_admin: false,
        }
    }

    /// Expose the cache administration routes. They are unauthenticated, so only enable them on a
    /// trusted network.
    pub fn with_admin(mut self, enable_admin: bool) -> Routes {
        self.enable_admin = enable_admin;
        self
    }

    /// Dispatch a request. Runs synchronously and may block on the backing store after the cache
    /// was invalidated, so call it off the async executor.
    pub fn route(&self, method: &Method, path: &str, query: Option<&str>) -> Response<Full<Bytes>> {
        match (method, path) {
            (&Method::GET, DELIVERY_PATH) => self.handle_delivery(query),
            (&Method::GET, HEALTH_PATH) => handle_health(),
            (&Method::POST, INVALIDATE_PATH) if self.enable_admin => self.handle_invalidate(),
            (&Method::POST, REFRESH_PATH) if self.enable_admin => self.handle_refresh(),
            (_, DELIVERY_PATH | HEALTH_PATH) => {
                error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
            }
            (_, INVALIDATE_PATH | REFRESH_PATH) if self.enable_admin => {
                error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
            }
            _ => error_response(StatusCode::NOT_FOUND, "Not found"),
        }
    }

    fn handle_delivery(&self, query: Option<&str>) -> Response<Full<Bytes>> {
        let request = match parse_delivery_request(query.unwrap_or_default()) {
            Ok(request) => request,
            Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
        };

        let campaigns = match self.evaluator.evaluate(&request) {
            Ok(campaigns) => campaigns,
            Err(err) => {
                log::error!(target: "targeting", "failed to evaluate delivery request: {}", err);
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_SERVER_ERROR);
            }
        };

        if campaigns.is_empty() {
            return empty_response(StatusCode::NO_CONTENT);
        }

        let body: Vec<CampaignResponse> = campaigns.iter().map(CampaignResponse::from).collect();
        json_response(StatusCode::OK, &body)
    }

    fn handle_invalidate(&self) -> Response<Full<Bytes>> {
        self.cache.invalidate();
        empty_response(StatusCode::NO_CONTENT)
    }

    fn handle_refresh(&self) -> Response<Full<Bytes>> {
        match self.cache.refresh() {
            Ok(()) => empty_response(StatusCode::NO_CONTENT),
            Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
        }
    }

    async fn handle(self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let query = req.uri().query().map(str::to_owned);

        let response = {
            let method = method.clone();
            let path = path.clone();
            tokio::task::spawn_blocking(move || self.route(&method, &path, query.as_deref())).await
        };
        let response = response.unwrap_or_else(|err| {
            log::error!(target: "targeting", "request handler panicked: {}", err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_SERVER_ERROR)
        });

        log::info!(target: "targeting",
                   method:display = method,
                   path = path.as_str(),
                   status = response.status().as_u16(),
                   duration_us = started.elapsed().as_micros() as u64;
                   "handled request");
        Ok(response)
    }
}

/// Parse `app`, `country` and `os` from a URL query string. The first occurrence of each parameter
/// wins.
pub fn parse_delivery_request(query: &str) -> Result<DeliveryRequest, crate::ValidationError> {
    let (mut app, mut country, mut os) = (None, None, None);
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let slot = match key.as_ref() {
            "app" => &mut app,
            "country" => &mut country,
            "os" => &mut os,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.into_owned());
        }
    }
    DeliveryRequest::from_params(app, country, os)
}

fn handle_health() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(b"OK")));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            let mut response = Response::new(Full::new(Bytes::from(bytes)));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(err) => {
            log::error!(target: "targeting", "failed to encode response: {}", err);
            let mut response = Response::new(Full::new(Bytes::from_static(
                br#"{"error":"Internal server error"}"#,
            )));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &ErrorResponse::new(message))
}

/// Accept connections on `listener` until `shutdown` resolves.
///
/// Connections that are open when `shutdown` resolves are dropped with the runtime.
pub async fn serve(
    listener: TcpListener,
    routes: Routes,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        log::warn!(target: "targeting", "failed to accept connection: {}", err);
                        continue;
                    }
                };

                let io = TokioIo::new(stream);
                let routes = routes.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| routes.clone().handle(req));
                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        log::debug!(target: "targeting", peer:display = peer; "connection error: {}", err);
                    }
                });
            }
            () = &mut shutdown => {
                log::info!(target: "targeting", "delivery server shutting down");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use http_body_util::BodyExt;
    use hyper::{body::Bytes, Method, Response, StatusCode};

    use super::{parse_delivery_request, Routes, DELIVERY_PATH, HEALTH_PATH, INVALIDATE_PATH};
    use crate::{
        data_loader::{StaticLoader, TargetingData},
        models::{Campaign, CampaignResponse, CampaignStatus},
        targeting_cache::TargetingCache,
        DeliveryEvaluator, ValidationError,
    };

    fn routes(loader: Arc<StaticLoader>) -> Routes {
        let cache = TargetingCache::initialize(loader, Duration::from_secs(30)).unwrap();
        Routes::new(DeliveryEvaluator::new(cache.clone()), cache)
    }

    fn loader() -> Arc<StaticLoader> {
        Arc::new(StaticLoader::new(TargetingData {
            campaigns: vec![Campaign {
                id: "spotify".into(),
                name: "Spotify - Music for everyone".into(),
                image_url: "https://somelink".into(),
                cta: "Download".into(),
                status: CampaignStatus::Active,
                created_at: None,
                updated_at: None,
            }],
            targeting_rules: vec![],
        }))
    }

    async fn body(response: Response<http_body_util::Full<Bytes>>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[test]
    fn parses_query_parameters() {
        let request =
            parse_delivery_request("app=com.abc.xyz&country=germany&os=android&extra=1").unwrap();
        assert_eq!(request.app, "com.abc.xyz");
        assert_eq!(request.country, "germany");
        assert_eq!(request.os, "android");
    }

    #[test]
    fn decodes_and_keeps_first_value() {
        let request = parse_delivery_request("app=com%2Eabc&app=other&country=new+zealand&os=ios")
            .unwrap();
        assert_eq!(request.app, "com.abc");
        assert_eq!(request.country, "new zealand");
    }

    #[test]
    fn empty_parameter_counts_as_missing() {
        assert_eq!(
            parse_delivery_request("app=&country=us&os=ios"),
            Err(ValidationError::MissingParam("app"))
        );
        assert_eq!(
            parse_delivery_request(""),
            Err(ValidationError::MissingParam("app"))
        );
    }

    #[tokio::test]
    async fn delivers_matching_campaigns() {
        let routes = routes(loader());

        let response = routes.route(
            &Method::GET,
            DELIVERY_PATH,
            Some("app=com.abc.xyz&country=us&os=ios"),
        );

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "application/json"
        );
        let campaigns: Vec<CampaignResponse> =
            serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(
            campaigns,
            vec![CampaignResponse {
                cid: "spotify".into(),
                img: "https://somelink".into(),
                cta: "Download".into(),
            }]
        );
    }

    #[tokio::test]
    async fn no_match_is_no_content() {
        let loader = loader();
        loader.update_campaign("spotify", |c| c.status = CampaignStatus::Inactive);
        let routes = routes(loader);

        let response = routes.route(
            &Method::GET,
            DELIVERY_PATH,
            Some("app=com.abc.xyz&country=us&os=ios"),
        );

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(body(response).await.is_empty());
    }

    #[tokio::test]
    async fn missing_param_is_bad_request() {
        let routes = routes(loader());

        let response = routes.route(&Method::GET, DELIVERY_PATH, Some("app=com.abc.xyz&os=ios"));

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(json, serde_json::json!({"error": "missing country param"}));
    }

    #[tokio::test]
    async fn unavailable_snapshot_is_internal_error() {
        let loader = loader();
        let routes = routes(loader.clone()).with_admin(true);
        loader.set_available(false);

        let response = routes.route(&Method::POST, INVALIDATE_PATH, None);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = routes.route(
            &Method::GET,
            DELIVERY_PATH,
            Some("app=com.abc.xyz&country=us&os=ios"),
        );
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(json, serde_json::json!({"error": "Internal server error"}));
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = routes(loader()).route(&Method::GET, HEALTH_PATH, None);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, "OK");
    }

    #[test]
    fn admin_routes_are_hidden_by_default() {
        let response = routes(loader()).route(&Method::POST, INVALIDATE_PATH, None);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn wrong_method_is_rejected() {
        let response = routes(loader()).route(&Method::POST, DELIVERY_PATH, None);
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
