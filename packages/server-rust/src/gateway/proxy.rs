//! Request dispatch: match a route, rewrite, resolve, balance, forward.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::Router;
use http::{Request, Response, Uri};
use metrics::counter;
use tracing::{debug, warn};

use super::balancer::{LoadBalancer, RandomChoice, RoundRobin};
use super::config::{BalancerKind, GatewayConfig};
use super::discovery::{DnsDiscovery, ServiceDiscovery};
use super::error::GatewayError;
use super::route::{RouteRule, RouteTable, RouteTarget};
use super::upstream::{HttpUpstream, Upstream};

/// The routing gateway. Stateless per request apart from balancer cursors.
pub struct Gateway {
    routes: RouteTable,
    discovery: Arc<dyn ServiceDiscovery>,
    balancer: Arc<dyn LoadBalancer>,
    upstream: Arc<dyn Upstream>,
}

impl Gateway {
    #[must_use]
    pub fn new(
        routes: RouteTable,
        discovery: Arc<dyn ServiceDiscovery>,
        balancer: Arc<dyn LoadBalancer>,
        upstream: Arc<dyn Upstream>,
    ) -> Self {
        Self {
            routes,
            discovery,
            balancer,
            upstream,
        }
    }

    /// Wires DNS discovery, the configured balancer and an HTTP upstream.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_config(config: GatewayConfig) -> Result<Self, reqwest::Error> {
        let balancer: Arc<dyn LoadBalancer> = match config.balancer {
            BalancerKind::RoundRobin => Arc::new(RoundRobin::new()),
            BalancerKind::Random => Arc::new(RandomChoice),
        };
        let upstream = HttpUpstream::new(config.upstream_timeout, config.max_body_bytes)?;
        Ok(Self::new(
            config.routes,
            Arc::new(DnsDiscovery::new(config.registrations)),
            balancer,
            Arc::new(upstream),
        ))
    }

    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Routes one request. The caller is expected to run inside the
    /// correlation layer so the forwarded headers already carry the id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when no rule matches, the target service has
    /// no live endpoints, or the backend call fails.
    pub async fn handle(&self, request: Request<Body>) -> Result<Response<Body>, GatewayError> {
        let path = request.uri().path().to_string();
        let Some(rule) = self.routes.find(&path) else {
            counter!("gateway_requests_total", "route" => "none", "outcome" => "route_not_found")
                .increment(1);
            return Err(GatewayError::RouteNotFound(path));
        };

        let result = self.forward(rule, &path, request).await;
        let outcome = match &result {
            Ok(_) => "forwarded",
            Err(e) => {
                warn!(route = %rule.id, error = %e, "gateway request failed");
                e.kind()
            }
        };
        counter!("gateway_requests_total", "route" => rule.id.clone(), "outcome" => outcome)
            .increment(1);
        result
    }

    async fn forward(
        &self,
        rule: &RouteRule,
        path: &str,
        mut request: Request<Body>,
    ) -> Result<Response<Body>, GatewayError> {
        let forward_path = rule.apply_filters(path, request.headers_mut());
        let base = self.resolve_base(&rule.uri).await?;
        let target = match request.uri().query() {
            Some(query) => format!("{base}{forward_path}?{query}"),
            None => format!("{base}{forward_path}"),
        };
        let uri: Uri = target
            .parse()
            .map_err(|_| GatewayError::InvalidUpstreamUri(target.clone()))?;
        debug!(route = %rule.id, target = %uri, "forwarding request");
        *request.uri_mut() = uri;

        self.upstream
            .forward(request)
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))
    }

    /// Static bases pass through; `lb://` targets are resolved afresh on
    /// every call.
    async fn resolve_base(&self, target: &RouteTarget) -> Result<String, GatewayError> {
        match target {
            RouteTarget::Static(base) => Ok(base.clone()),
            RouteTarget::LoadBalanced(service) => {
                let endpoints = self.discovery.resolve(service).await;
                let endpoint = self
                    .balancer
                    .choose(service, &endpoints)
                    .ok_or_else(|| GatewayError::ServiceUnavailable(service.clone()))?;
                debug!(service = %service, instance = %endpoint.instance_id, "endpoint chosen");
                Ok(endpoint.base_uri())
            }
        }
    }

    /// Router sending every request that no other route claims through
    /// [`Gateway::handle`].
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().fallback(proxy).with_state(self)
    }
}

async fn proxy(
    State(gateway): State<Arc<Gateway>>,
    request: Request<Body>,
) -> Result<Response<Body>, GatewayError> {
    gateway.handle(request).await
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use async_trait::async_trait;
    use cardvault_core::CORRELATION_ID_HEADER;
    use http::{HeaderMap, StatusCode};
    use parking_lot::Mutex;
    use tower::ServiceExt;

    use super::*;
    use crate::gateway::correlation::CorrelationLayer;
    use crate::gateway::discovery::StaticDiscovery;
    use crate::gateway::route::{GATEWAY_HEADER, GATEWAY_HEADER_VALUE};
    use crate::gateway::upstream::UpstreamError;

    /// Records forwarded requests and answers 200.
    #[derive(Default)]
    struct RecordingUpstream {
        seen: Mutex<Vec<(String, HeaderMap)>>,
    }

    impl RecordingUpstream {
        fn last(&self) -> (String, HeaderMap) {
            self.seen.lock().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Upstream for RecordingUpstream {
        async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, UpstreamError> {
            self.seen
                .lock()
                .push((request.uri().to_string(), request.headers().clone()));
            Ok(Response::new(Body::from("ok")))
        }
    }

    fn gateway_with(
        discovery: Arc<StaticDiscovery>,
        upstream: Arc<RecordingUpstream>,
    ) -> Arc<Gateway> {
        Arc::new(Gateway::new(
            RouteTable::default(),
            discovery,
            Arc::new(RoundRobin::new()),
            upstream,
        ))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn static_route_strips_prefix_and_marks_request() {
        let upstream = Arc::new(RecordingUpstream::default());
        let gateway = gateway_with(Arc::new(StaticDiscovery::new()), Arc::clone(&upstream));

        let response = gateway.handle(get("/api/media/images/a.png?size=2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (uri, headers) = upstream.last();
        assert_eq!(uri, "http://media-service:8084/images/a.png?size=2");
        assert_eq!(headers.get(GATEWAY_HEADER).unwrap(), GATEWAY_HEADER_VALUE);
    }

    #[tokio::test]
    async fn collection_route_keeps_its_prefix() {
        let upstream = Arc::new(RecordingUpstream::default());
        let gateway = gateway_with(Arc::new(StaticDiscovery::new()), Arc::clone(&upstream));

        gateway
            .handle(get("/api/collections/users/7/cards"))
            .await
            .unwrap();
        assert_eq!(
            upstream.last().0,
            "http://collection-service:8082/api/collections/users/7/cards"
        );
    }

    #[tokio::test]
    async fn load_balanced_route_rotates_over_replicas() {
        let discovery = Arc::new(StaticDiscovery::new());
        discovery.add_replica("catalog-service", "10.0.0.1", 8081);
        discovery.add_replica("catalog-service", "10.0.0.2", 8081);
        let upstream = Arc::new(RecordingUpstream::default());
        let gateway = gateway_with(Arc::clone(&discovery), Arc::clone(&upstream));

        gateway.handle(get("/api/catalog/cards/1")).await.unwrap();
        assert_eq!(upstream.last().0, "http://10.0.0.1:8081/cards/1");
        gateway.handle(get("/api/catalog/cards/1")).await.unwrap();
        assert_eq!(upstream.last().0, "http://10.0.0.2:8081/cards/1");

        // Membership changes apply on the next request.
        discovery.remove_replica("catalog-service", "10.0.0.1", 8081);
        gateway.handle(get("/api/catalog/sets")).await.unwrap();
        assert_eq!(upstream.last().0, "http://10.0.0.2:8081/sets");
    }

    #[tokio::test]
    async fn unmatched_path_is_not_found() {
        let gateway = gateway_with(
            Arc::new(StaticDiscovery::new()),
            Arc::new(RecordingUpstream::default()),
        );
        let err = gateway.handle(get("/nowhere")).await.unwrap_err();
        assert!(matches!(err, GatewayError::RouteNotFound(_)));

        let response = gateway.router().oneshot(get("/nowhere")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_discovery_is_service_unavailable() {
        let upstream = Arc::new(RecordingUpstream::default());
        let gateway = gateway_with(Arc::new(StaticDiscovery::new()), Arc::clone(&upstream));

        let err = gateway.handle(get("/api/catalog/cards")).await.unwrap_err();
        assert!(matches!(err, GatewayError::ServiceUnavailable(ref s) if s == "catalog-service"));
        assert!(upstream.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn forwarded_and_response_correlation_ids_match() {
        let upstream = Arc::new(RecordingUpstream::default());
        let app = gateway_with(Arc::new(StaticDiscovery::new()), Arc::clone(&upstream))
            .router()
            .layer(CorrelationLayer);

        let response = app.oneshot(get("/api/media/x")).await.unwrap();
        let on_response = response.headers()[CORRELATION_ID_HEADER].clone();
        let (_, forwarded) = upstream.last();
        assert_eq!(forwarded[CORRELATION_ID_HEADER], on_response);
    }

    // -- end to end over real sockets --

    async fn spawn_echo_upstream() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().fallback(|request: Request<Body>| async move {
            let header = |name: &str| {
                request
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            };
            format!(
                "{}|{}|{}",
                request.uri(),
                header(CORRELATION_ID_HEADER),
                header("x-gateway")
            )
        });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn real_gateway(port: u16) -> Router {
        let routes = RouteTable::new(vec![RouteRule::new(
            "catalog",
            "/api/catalog",
            RouteTarget::LoadBalanced("catalog-service".into()),
        )
        .strip_prefix(2)
        .add_request_header(GATEWAY_HEADER, GATEWAY_HEADER_VALUE)])
        .unwrap();
        let discovery = StaticDiscovery::new();
        discovery.add_replica("catalog-service", "127.0.0.1", port);
        let gateway = Gateway::new(
            routes,
            Arc::new(discovery),
            Arc::new(RoundRobin::new()),
            Arc::new(HttpUpstream::new(Duration::from_secs(5), 1 << 20).unwrap()),
        );
        Arc::new(gateway).router().layer(CorrelationLayer)
    }

    #[tokio::test]
    async fn proxies_to_a_live_backend() {
        let addr = spawn_echo_upstream().await;
        let app = real_gateway(addr.port());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/catalog/sets/sv1?page=2")
                    .header("X-Correlation-ID", "trace-77")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CORRELATION_ID_HEADER], "trace-77");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(body.to_vec()).unwrap(),
            "/sets/sv1?page=2|trace-77|API-Gateway"
        );
    }

    #[tokio::test]
    async fn dead_backend_is_bad_gateway() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let response = real_gateway(port)
            .oneshot(get("/api/catalog/sets"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response.headers().contains_key(CORRELATION_ID_HEADER));
    }
}
