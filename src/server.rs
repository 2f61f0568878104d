//! Web server module.
//!
//! HTTP access to the archive, the loop buffer, the live event feed and the
//! service log.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{ConnectInfo, Query, State},
    http::{Extensions, HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
    routing::get,
};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::events::{Broker, Event};
use crate::logging::{DEFAULT_TAP_CAPACITY, LogSinks};
use crate::loop_buffer::LoopBuffer;
use crate::station::types::LoopSample;
use crate::storage::ArchiveReader;

/// Longest range, in days, `/archive` will serve in one response.
const MAX_ARCHIVE_DAYS: i64 = 30;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub reader: ArchiveReader,
    pub loops: Arc<LoopBuffer>,
    pub broker: Broker,
    pub log_sinks: LogSinks,
    /// Samples required before `/loop` answers.
    pub min_samples: usize,
    /// Newest-sample age at which `/loop` reports stale data.
    pub stale_age: Duration,
    /// Ends open event and log streams so graceful shutdown can complete.
    pub shutdown: CancellationToken,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

/// Query parameters for the archive endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ArchiveParams {
    pub begin: Option<String>,
    pub end: Option<String>,
}

/// Query parameters for `/loop`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopParams {
    pub last_sequence: Option<String>,
}

/// Query parameters for `/log`.
#[derive(Debug, Default, Deserialize)]
pub struct LogParams {
    pub level: Option<String>,
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/archive", get(archive_handler))
        .route("/archive/stream", get(archive_stream_handler))
        .route("/loop", get(loop_handler))
        .route("/events", get(events_handler))
        .route("/log", get(log_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Bare status response carrying a `Warning` header.
fn warning(status: StatusCode, message: &'static str) -> Response {
    (status, [(header::WARNING, HeaderValue::from_static(message))]).into_response()
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Resolve `begin`/`end`, defaulting to the day ending now.
fn archive_range(params: &ArchiveParams) -> Result<(DateTime<Utc>, DateTime<Utc>), Response> {
    let end = match params.end.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => parse_timestamp(raw).ok_or_else(|| {
            warning(StatusCode::BAD_REQUEST, "Unable to parse end timestamp")
        })?,
        None => Utc::now(),
    };
    let begin = match params.begin.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => parse_timestamp(raw).ok_or_else(|| {
            warning(StatusCode::BAD_REQUEST, "Unable to parse begin timestamp")
        })?,
        None => end - chrono::TimeDelta::days(1),
    };
    if end < begin {
        return Err(warning(
            StatusCode::BAD_REQUEST,
            "End timestamp precedes begin timestamp",
        ));
    }
    Ok((begin, end))
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Archive records in a range, newest first.
async fn archive_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ArchiveParams>,
) -> Response {
    let (begin, end) = match archive_range(&params) {
        Ok(range) => range,
        Err(response) => return response,
    };
    if end - begin > chrono::TimeDelta::days(MAX_ARCHIVE_DAYS) {
        return warning(
            StatusCode::PAYLOAD_TOO_LARGE,
            "Duration exceeds maximum allowed",
        );
    }

    match state.reader.query(begin, end) {
        Ok(records) if records.is_empty() => StatusCode::NO_CONTENT.into_response(),
        Ok(records) => Json(records).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Archive query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Archive records in a range as newline-delimited JSON, newest first.
async fn archive_stream_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ArchiveParams>,
) -> Response {
    let (begin, end) = match archive_range(&params) {
        Ok(range) => range,
        Err(response) => return response,
    };

    let records = match state.reader.stream(begin, end) {
        Ok(records) => records,
        Err(e) => {
            tracing::error!(error = %e, "Archive stream failed to start");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let lines = records.map(|record| {
        serde_json::to_vec(&record).map(|mut line| {
            line.push(b'\n');
            Bytes::from(line)
        })
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response()
}

/// Newest loop sample, or every sample after `lastSequence`.
async fn loop_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LoopParams>,
) -> Response {
    let (count, newest) = state.loops.last();
    let Some(newest) = newest.filter(|_| count >= state.min_samples) else {
        return warning(StatusCode::SERVICE_UNAVAILABLE, "Not enough samples yet");
    };

    let stale = (Utc::now() - newest.timestamp)
        .to_std()
        .is_ok_and(|age| age > state.stale_age);
    if stale {
        return warning(StatusCode::SERVICE_UNAVAILABLE, "Samples are too old");
    }

    match params.last_sequence.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => {
            let last = i128::from(raw.trim().parse::<i64>().unwrap_or(0));
            // Snapshot is newest first, so everything after `last` is a prefix.
            let newer: Vec<LoopSample> = state
                .loops
                .snapshot()
                .into_iter()
                .take_while(|s| i128::from(s.sequence) > last)
                .collect();
            Json(newer).into_response()
        }
        None => Json(newest).into_response(),
    }
}

fn sse_event(event: &Event) -> Result<SseEvent, axum::Error> {
    let sse = SseEvent::default().event(event.name());
    match event {
        Event::Archive(record) => sse.json_data(record),
        Event::Loop(sample) => sse.json_data(sample),
    }
}

/// Live broker events as server-sent events.
async fn events_handler(
    State(state): State<Arc<AppState>>,
    extensions: Extensions,
) -> Sse<impl Stream<Item = Result<SseEvent, axum::Error>>> {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    tracing::debug!(peer = %peer, "Event stream opened");

    // The subscription lives in the stream state and unsubscribes when the
    // client goes away and the stream is dropped.
    let subscription = state.broker.subscribe(peer);
    let events = stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        Some((sse_event(&event), subscription))
    })
    .take_until(state.shutdown.clone().cancelled_owned());

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Service log lines as server-sent events.
async fn log_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LogParams>,
) -> Response {
    let level = match params.level.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => match Level::from_str(raw) {
            Ok(level) => level,
            Err(_) => return warning(StatusCode::BAD_REQUEST, "Unknown log level"),
        },
        None => Level::DEBUG,
    };

    let tap = state.log_sinks.attach(level, DEFAULT_TAP_CAPACITY);
    let lines = stream::unfold(tap, |mut tap| async move {
        let line = tap.recv().await?;
        Some((Ok::<_, Infallible>(SseEvent::default().event("log").data(line)), tap))
    })
    .take_until(state.shutdown.clone().cancelled_owned());

    Sse::new(lines).keep_alive(KeepAlive::default()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::types::{ArchiveRecord, Loop};
    use crate::storage::{StorageBuilder, StorageHandles};
    use axum::http::Request;
    use chrono::TimeZone;
    use http_body_util::BodyExt;
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    fn create_test_state() -> (AppState, StorageHandles, TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test_server.db");

        let handles = StorageBuilder::new(&db_path)
            .channel_capacity(100)
            .build()
            .expect("Failed to build storage");

        let state = AppState {
            reader: handles.reader.clone(),
            loops: Arc::new(LoopBuffer::new(10)),
            broker: Broker::default_sized(),
            log_sinks: LogSinks::new(),
            min_samples: 3,
            stale_age: Duration::from_secs(300),
            shutdown: CancellationToken::new(),
        };

        // Return handles AND dir to keep tempdir alive
        (state, handles, dir)
    }

    async fn get(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn warning_of(response: &Response) -> &str {
        response.headers()[header::WARNING].to_str().unwrap()
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    async fn fill_archive(handles: &StorageHandles, hours: i64) {
        for h in 0..hours {
            let mut record = ArchiveRecord::new(base() + chrono::TimeDelta::hours(h));
            record.out_temp = h as f64;
            handles.writer.add(record).await.unwrap();
        }
    }

    fn fill_loops(loops: &LoopBuffer, count: u64, timestamp: DateTime<Utc>) {
        for sequence in 0..count {
            loops.add(LoopSample {
                sequence,
                timestamp,
                current: Loop::qc_minimum(),
            });
        }
    }

    #[tokio::test]
    async fn test_healthz() {
        let (state, _handles, _dir) = create_test_state();
        let response = get(create_router(state), "/healthz").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_archive_range_newest_first() {
        let (state, handles, _dir) = create_test_state();
        fill_archive(&handles, 5).await;

        let response = get(
            create_router(state),
            "/archive?begin=2020-01-01T01:00:00Z&end=2020-01-01T03:00:00Z",
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let temps: Vec<f64> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["outTemperature"].as_f64().unwrap())
            .collect();
        assert_eq!(temps, vec![3.0, 2.0, 1.0]);
    }

    #[tokio::test]
    async fn test_archive_empty_is_no_content() {
        let (state, _handles, _dir) = create_test_state();
        let response = get(create_router(state), "/archive").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_archive_bad_requests() {
        let (state, _handles, _dir) = create_test_state();
        let app = create_router(state);

        let response = get(app.clone(), "/archive?begin=yesterday").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(warning_of(&response), "Unable to parse begin timestamp");

        let response = get(app.clone(), "/archive?end=2020-13-01T00:00:00Z").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(warning_of(&response), "Unable to parse end timestamp");

        let response = get(
            app.clone(),
            "/archive?begin=2020-01-02T00:00:00Z&end=2020-01-01T00:00:00Z",
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            warning_of(&response),
            "End timestamp precedes begin timestamp"
        );

        let response = get(
            app,
            "/archive?begin=2020-01-01T00:00:00Z&end=2020-03-01T00:00:00Z",
        )
        .await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(warning_of(&response), "Duration exceeds maximum allowed");
    }

    #[tokio::test]
    async fn test_archive_stream_ndjson() {
        let (state, handles, _dir) = create_test_state();
        fill_archive(&handles, 4).await;

        let response = get(
            create_router(state),
            "/archive/stream?begin=2020-01-01T00:00:00Z&end=2020-01-01T12:00:00Z",
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/x-ndjson"
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let keys: Vec<String> = text
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["timestamp"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(keys.len(), 4);
        assert!(keys[0].starts_with("2020-01-01T03:00:00"));
        assert!(keys[3].starts_with("2020-01-01T00:00:00"));
    }

    #[tokio::test]
    async fn test_loop_not_enough_samples() {
        let (state, _handles, _dir) = create_test_state();
        fill_loops(&state.loops, 2, Utc::now());

        let response = get(create_router(state), "/loop").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(warning_of(&response), "Not enough samples yet");
    }

    #[tokio::test]
    async fn test_loop_stale_samples() {
        let (state, _handles, _dir) = create_test_state();
        fill_loops(&state.loops, 3, Utc::now() - chrono::TimeDelta::minutes(6));

        let response = get(create_router(state), "/loop").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(warning_of(&response), "Samples are too old");
    }

    #[tokio::test]
    async fn test_loop_newest_and_since_sequence() {
        let (state, _handles, _dir) = create_test_state();
        fill_loops(&state.loops, 6, Utc::now());
        let app = create_router(state);

        let newest = body_json(get(app.clone(), "/loop").await).await;
        assert_eq!(newest["sequence"], 5);
        assert!(newest["bar"]["altimeter"].is_number());

        let since = body_json(get(app.clone(), "/loop?lastSequence=3").await).await;
        let sequences: Vec<u64> = since
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["sequence"].as_u64().unwrap())
            .collect();
        assert_eq!(sequences, vec![5, 4]);

        let ahead = body_json(get(app.clone(), "/loop?lastSequence=9").await).await;
        assert_eq!(ahead, serde_json::json!([]));

        // Far behind returns everything buffered.
        let all = body_json(get(app, "/loop?lastSequence=-100").await).await;
        assert_eq!(all.as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_loop_extreme_last_sequence() {
        let (state, _handles, _dir) = create_test_state();
        fill_loops(&state.loops, 6, Utc::now());
        let app = create_router(state);

        let response = get(app.clone(), "/loop?lastSequence=-9223372036854775808").await;
        assert_eq!(response.status(), StatusCode::OK);
        let all = body_json(response).await;
        assert_eq!(all.as_array().unwrap().len(), 6);
        assert_eq!(all[0]["sequence"], 5);

        let none = body_json(get(app, "/loop?lastSequence=9223372036854775807").await).await;
        assert_eq!(none, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_events_stream_and_disconnect() {
        let (state, _handles, _dir) = create_test_state();
        let broker = state.broker.clone();
        let response = get(create_router(state), "/events").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(broker.subscriber_count().await.unwrap(), 1);

        let sample = LoopSample {
            sequence: 42,
            timestamp: Utc::now(),
            current: Loop::qc_minimum(),
        };
        broker.publish(Event::Loop(sample)).await.unwrap();

        let mut body = response.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        assert!(text.contains("event: loop"));
        assert!(text.contains("\"sequence\":42"));

        drop(body);
        assert_eq!(broker.subscriber_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_ends_event_stream() {
        let (state, _handles, _dir) = create_test_state();
        let shutdown = state.shutdown.clone();
        let response = get(create_router(state), "/events").await;

        shutdown.cancel();
        let mut body = response.into_body();
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn test_log_level_validation() {
        let (state, _handles, _dir) = create_test_state();
        let sinks = state.log_sinks.clone();
        let app = create_router(state);

        let response = get(app.clone(), "/log?level=chatty").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = get(app, "/log?level=info").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(sinks.attached(), 1);
        drop(response);
        assert_eq!(sinks.attached(), 0);
    }
}
