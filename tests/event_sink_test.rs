// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Tests for the HTTP alarm event sink against a mocked supervision backend

use std::sync::Arc;

use belt_monitor::config::EventSinkConfig;
use belt_monitor::event_sink::http::ReportStats;
use belt_monitor::event_sink::{AlarmEvent, EventSink, HttpEventSink, ReportError};
use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENDPOINT: &str = "/api/user/addAlarmEvent";

fn sink_for(server: &MockServer, image_dir: Option<String>) -> HttpEventSink {
    let config = EventSinkConfig {
        enabled: true,
        base_url: server.uri(),
        timeout_secs: 2,
        image_dir,
        ..Default::default()
    };
    HttpEventSink::new(&config).unwrap()
}

fn smoke_event(image: Option<Vec<u8>>) -> AlarmEvent {
    AlarmEvent {
        camera_id: 3,
        alarm_rule_id: 6,
        alarm_type: "Smoke".to_string(),
        confidence: 0.8261,
        timestamp: Utc::now(),
        image: image.map(Arc::new),
    }
}

#[tokio::test]
async fn test_successful_report_returns_event_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .and(body_partial_json(json!({
            "id": 3,
            "alarmRuleId": 6,
            "alarmType": "Smoke",
            "confidence": 0.83,
            "picFilePath": "assets/images/alarm/alarm1.jpg"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "data": { "eventID": 42 } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sink = sink_for(&server, None);
    let event_id = sink.report(&smoke_event(None)).await.unwrap();

    assert_eq!(event_id, 42);
    assert_eq!(
        sink.stats(),
        ReportStats {
            successes: 1,
            failures: 0
        }
    );
}

#[tokio::test]
async fn test_created_status_is_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "success": true,
            "data": { "data": { "eventID": "77" } }
        })))
        .mount(&server)
        .await;

    let sink = sink_for(&server, None);
    assert_eq!(sink.report(&smoke_event(None)).await.unwrap(), 77);
}

#[tokio::test]
async fn test_rejected_report_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "camera unknown"
        })))
        .mount(&server)
        .await;

    let sink = sink_for(&server, None);
    let err = sink.report(&smoke_event(None)).await.unwrap_err();

    assert!(matches!(err, ReportError::Rejected(ref msg) if msg == "camera unknown"));
    assert_eq!(sink.stats().failures, 1);
}

#[tokio::test]
async fn test_missing_event_id_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {}
        })))
        .mount(&server)
        .await;

    let sink = sink_for(&server, None);
    let err = sink.report(&smoke_event(None)).await.unwrap_err();
    assert!(matches!(err, ReportError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_server_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(500).set_body_string("database down"))
        .mount(&server)
        .await;

    let sink = sink_for(&server, None);
    let err = sink.report(&smoke_event(None)).await.unwrap_err();
    match err {
        ReportError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "database down");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_backend_is_a_transport_error() {
    let config = EventSinkConfig {
        enabled: true,
        base_url: "http://127.0.0.1:1".to_string(),
        timeout_secs: 1,
        ..Default::default()
    };
    let sink = HttpEventSink::new(&config).unwrap();
    let err = sink.report(&smoke_event(None)).await.unwrap_err();
    assert!(matches!(err, ReportError::Transport(_)));
}

#[tokio::test]
async fn test_picture_path_sequence_and_image_saved() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "data": { "eventID": 9 } }
        })))
        .mount(&server)
        .await;

    let image_dir = tempfile::tempdir().unwrap();
    let sink = sink_for(
        &server,
        Some(image_dir.path().to_string_lossy().into_owned()),
    );

    sink.report(&smoke_event(None)).await.unwrap();
    sink.report(&smoke_event(Some(vec![0xFF, 0xD8, 0xFF])))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let second: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(second["picFilePath"], "assets/images/alarm/alarm2.jpg");

    let saved = std::fs::read(image_dir.path().join("alarm9.jpg")).unwrap();
    assert_eq!(saved, vec![0xFF, 0xD8, 0xFF]);
}
