//! Correlation-id propagation middleware.
//!
//! [`CorrelationLayer`] must be the outermost layer of any router it wraps.
//! For each request it reuses a non-empty inbound `X-Correlation-ID` or
//! generates one, then makes that single value visible in four places: the
//! request headers (and therefore the forwarded request), a request
//! extension, a `request` tracing span with task-local access via
//! [`current`], and the response headers.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use cardvault_core::{CorrelationId, CORRELATION_ID_HEADER};
use http::header::{HeaderName, HeaderValue};
use http::{Request, Response};
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

tokio::task_local! {
    static CURRENT: CorrelationId;
}

/// Correlation id of the request being processed on this task, if any.
#[must_use]
pub fn current() -> Option<CorrelationId> {
    CURRENT.try_with(Clone::clone).ok()
}

/// Runs `fut` with `id` as the ambient correlation id.
pub async fn scope<F: Future>(id: CorrelationId, fut: F) -> F::Output {
    CURRENT.scope(id, fut).await
}

fn header_name() -> HeaderName {
    HeaderName::from_static(CORRELATION_ID_HEADER)
}

// ---------------------------------------------------------------------------
// CorrelationLayer
// ---------------------------------------------------------------------------

/// Tower layer assigning or forwarding the request correlation id.
#[derive(Debug, Clone, Default)]
pub struct CorrelationLayer;

impl<S> Layer<S> for CorrelationLayer {
    type Service = CorrelationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationService { inner }
    }
}

// ---------------------------------------------------------------------------
// CorrelationService
// ---------------------------------------------------------------------------

/// Service wrapper produced by [`CorrelationLayer`].
#[derive(Debug, Clone)]
pub struct CorrelationService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CorrelationService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: 'static,
    ResBody: 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<ResBody>, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        // Presence is decided on the raw bytes; an inbound value is forwarded
        // and echoed exactly as received, even when it is not UTF-8.
        let inbound = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .filter(|v| !v.is_empty())
            .cloned();
        let (id, generated) = CorrelationId::resolve(inbound.as_ref().map(HeaderValue::as_bytes));

        let value = if generated {
            // Generated ids are UUID text and always valid header values.
            let fresh = HeaderValue::from_str(id.as_str()).ok();
            if let Some(v) = &fresh {
                req.headers_mut().insert(header_name(), v.clone());
            }
            fresh
        } else {
            inbound
        };
        req.extensions_mut().insert(id.clone());

        let span = info_span!(
            "request",
            correlation_id = %id,
            method = %req.method(),
            path = %req.uri().path(),
        );

        let fut = {
            let _entered = span.enter();
            self.inner.call(req)
        };

        Box::pin(CURRENT.scope(
            id,
            async move {
                let mut response = fut.await?;
                if let Some(v) = value {
                    response.headers_mut().insert(header_name(), v);
                }
                Ok(response)
            }
            .instrument(span),
        ))
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    use super::*;

    /// Echoes the request header, extension and task-local ids in the body.
    async fn echo(req: Request<Body>) -> String {
        let header = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default();
        let extension = req
            .extensions()
            .get::<CorrelationId>()
            .map(ToString::to_string)
            .unwrap_or_default();
        let ambient = current().map(|c| c.to_string()).unwrap_or_default();
        format!("{header}|{extension}|{ambient}")
    }

    fn app() -> Router {
        Router::new().route("/", get(echo)).layer(CorrelationLayer)
    }

    async fn body_string(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn generated_id_is_identical_everywhere() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let on_response = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let body = body_string(response).await;

        assert_eq!(on_response.len(), 36);
        assert_eq!(body, format!("{on_response}|{on_response}|{on_response}"));
    }

    #[tokio::test]
    async fn inbound_id_is_never_replaced() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("X-Correlation-ID", "caller-chosen-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(CORRELATION_ID_HEADER).unwrap(),
            "caller-chosen-42"
        );
        assert_eq!(
            body_string(response).await,
            "caller-chosen-42|caller-chosen-42|caller-chosen-42"
        );
    }

    #[tokio::test]
    async fn non_utf8_inbound_id_is_forwarded_and_echoed_byte_for_byte() {
        let raw = HeaderValue::from_bytes(b"caf\xe9-42").unwrap();
        let app = Router::new()
            .route(
                "/",
                get(|req: Request<Body>| async move {
                    let forwarded = req.headers()[CORRELATION_ID_HEADER].as_bytes().to_vec();
                    let ambient = current().map(|c| c.to_string()).unwrap_or_default();
                    (
                        [(HeaderName::from_static("x-ambient-id"), ambient)],
                        forwarded,
                    )
                }),
            )
            .layer(CorrelationLayer);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(CORRELATION_ID_HEADER, raw.clone())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[CORRELATION_ID_HEADER], raw);
        assert_eq!(response.headers()["x-ambient-id"], "caf\u{fffd}-42");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"caf\xe9-42");
    }

    #[tokio::test]
    async fn empty_inbound_id_is_replaced() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("X-Correlation-ID", "")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let id = response.headers().get(CORRELATION_ID_HEADER).unwrap();
        assert!(!id.is_empty());
    }

    #[tokio::test]
    async fn reentry_reuses_the_existing_id() {
        // Two stacked layers behave like one.
        let app = Router::new()
            .route("/", get(echo))
            .layer(CorrelationLayer)
            .layer(CorrelationLayer);
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let id = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(response.headers().get_all(CORRELATION_ID_HEADER).iter().count(), 1);
        assert_eq!(body_string(response).await, format!("{id}|{id}|{id}"));
    }

    #[tokio::test]
    async fn concurrent_requests_get_distinct_ids() {
        let app = app();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..20 {
            let response = app
                .clone()
                .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
                .await
                .unwrap();
            ids.insert(response.headers()[CORRELATION_ID_HEADER].clone());
        }
        assert_eq!(ids.len(), 20);
    }

    #[tokio::test]
    async fn current_is_none_outside_a_request() {
        assert!(current().is_none());
        let id = CorrelationId::generate();
        let seen = scope(id.clone(), async { current() }).await;
        assert_eq!(seen, Some(id));
    }
}
