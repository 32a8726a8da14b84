//! Exporter HTTP surface: `/metrics` for Prometheus, `/healthz` for probes.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;

use crate::metrics::PrometheusSink;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

pub fn router(sink: Arc<PrometheusSink>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(|| async { "ok" }))
        .fallback(fallback_404)
        .layer(TraceLayer::new_for_http())
        .with_state(sink)
}

async fn metrics(State(sink): State<Arc<PrometheusSink>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, TEXT_FORMAT)], sink.encode())
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ObservabilityRecord, ObservabilitySink};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_exposes_token_series() {
        let sink = Arc::new(PrometheusSink::new().unwrap());
        sink.upsert(&ObservabilityRecord {
            token_name: "svc-ci".into(),
            owner_name: "billing".into(),
            owner_url: "https://git.example.com/billing.git".into(),
            token_id: "10".into(),
            last_used: "never".into(),
            is_root: false,
            days_until_expire: 20,
        });

        let (status, content_type, body) = get(router(sink), "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some(TEXT_FORMAT));
        assert!(body.contains("gl_days_until_expire{"));
        assert!(body.contains(r#"name="svc-ci""#));
        assert!(body.contains(r#"root_token="false""#));
        assert!(body.contains("} 20"));
    }

    #[tokio::test]
    async fn test_healthz_and_unknown_route() {
        let sink = Arc::new(PrometheusSink::new().unwrap());

        let (status, _, body) = get(router(sink.clone()), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");

        let (status, _, _) = get(router(sink), "/admin").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
