//! HTTP surface for the counter: record a visit, read a count.
//!
//! Two routes, one engine. All failures map to 500 with the error text in
//! the body; the core treats `page_id` as opaque and only rejects the empty
//! string.

use crate::counter::{CounterEngine, ServedVia};
use crate::store::CounterStore;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct VisitRecorded {
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct VisitCount {
    pub count: i64,
    pub served_via: ServedVia,
}

/// Build the router serving the two visit endpoints.
pub fn build_router<S: CounterStore>(engine: Arc<CounterEngine<S>>) -> Router {
    Router::new()
        .route("/visit/{page_id}", post(record_visit::<S>))
        .route("/visits/{page_id}", get(get_visits::<S>))
        .with_state(engine)
}

async fn record_visit<S: CounterStore>(
    State(engine): State<Arc<CounterEngine<S>>>,
    Path(page_id): Path<String>,
) -> Response {
    if page_id.is_empty() {
        return failure("page id must not be empty");
    }
    engine.record_visit(&page_id).await;
    Json(VisitRecorded {
        status: "success",
        message: format!("Visit recorded for page {}", page_id),
    })
    .into_response()
}

async fn get_visits<S: CounterStore>(
    State(engine): State<Arc<CounterEngine<S>>>,
    Path(page_id): Path<String>,
) -> Response {
    if page_id.is_empty() {
        return failure("page id must not be empty");
    }
    match engine.visit_count(&page_id).await {
        Ok((count, served_via)) => Json(VisitCount { count, served_via }).into_response(),
        Err(e) => failure(&format!("failed to read visit count: {}", e)),
    }
}

fn failure(message: &str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn served_via_serializes_to_the_wire_tags() {
        let body = serde_json::to_string(&VisitCount {
            count: 12,
            served_via: ServedVia::InMemory,
        })
        .unwrap();
        assert_eq!(body, r#"{"count":12,"served_via":"in_memory"}"#);

        let body = serde_json::to_string(&VisitCount {
            count: 3,
            served_via: ServedVia::InRedis,
        })
        .unwrap();
        assert_eq!(body, r#"{"count":3,"served_via":"in_redis"}"#);
    }

    #[test]
    fn recorded_response_matches_the_contract() {
        let body = serde_json::to_string(&VisitRecorded {
            status: "success",
            message: "Visit recorded for page home".to_string(),
        })
        .unwrap();
        assert_eq!(
            body,
            r#"{"status":"success","message":"Visit recorded for page home"}"#
        );
    }
}
