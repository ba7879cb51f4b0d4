//! Integration tests for Vigil API endpoints.
//!
//! These tests verify the full request/response cycle through the HTTP API,
//! with an in-memory database and simulated channel senders.

use axum_test::TestServer;
use serde_json::{Value, json};

use vigil::api::{AppState, router};
use vigil::config::Config;
use vigil::escalation::Engine;
use vigil::notify::{ChannelSenders, Dispatcher};
use vigil::storage::Storage;

async fn create_test_server() -> TestServer {
    let storage = Storage::new("sqlite::memory:").await.unwrap();
    let engine = Engine::new(
        storage,
        Dispatcher::new(ChannelSenders::simulated()),
        &Config::default(),
    );

    TestServer::new(router(AppState { engine })).unwrap()
}

/// Register an SMS-reachable family member for `subject-1`.
async fn add_family_contact(server: &TestServer) {
    let response = server
        .post("/contacts")
        .json(&json!({
            "subject_id": "subject-1",
            "name": "Anna",
            "contact_type": "family_member",
            "phone": "+15550001111",
            "notification_preferences": {
                "sms": { "enabled": true }
            },
            "alert_types": ["fall", "inactivity"],
            "is_primary": true
        }))
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = create_test_server().await;

    let response = server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_high_confidence_fall_creates_critical_alert() {
    let server = create_test_server().await;
    add_family_contact(&server).await;

    let response = server
        .post("/events")
        .json(&json!({
            "subject_id": "subject-1",
            "raw_type": "fall",
            "confidence": 0.95,
            "location": "bathroom"
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["normalized_type"], "fall");
    assert_eq!(body["danger"], true);
    assert_eq!(body["notified"], 1);

    let alert_id = body["alert_id"].as_str().unwrap();
    let alert: Value = server.get(&format!("/alerts/{alert_id}")).await.json();
    assert_eq!(alert["severity"], "critical");
    assert_eq!(alert["priority"], 10);
    assert_eq!(alert["status"], "active");
    assert_eq!(alert["location"], "bathroom");

    // The ledger holds one SMS entry for the family member.
    let notifications = alert["notifications"].as_array().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["channel"], "sms");
}

#[tokio::test]
async fn test_duplicate_fall_within_cooldown_creates_one_alert() {
    let server = create_test_server().await;
    add_family_contact(&server).await;

    let event = json!({
        "subject_id": "subject-1",
        "raw_type": "fall",
        "confidence": 0.95
    });

    let first: Value = server.post("/events").json(&event).await.json();
    let second: Value = server.post("/events").json(&event).await.json();

    assert!(first["alert_id"].is_string());
    // Still flagged dangerous, but suppressed by the cooldown.
    assert_eq!(second["danger"], true);
    assert!(second["alert_id"].is_null());

    let alerts: Value = server.get("/alerts?subject_id=subject-1").await.json();
    assert_eq!(alerts.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_long_inactivity_creates_high_severity_alert() {
    let server = create_test_server().await;
    add_family_contact(&server).await;

    let response: Value = server
        .post("/events")
        .json(&json!({
            "subject_id": "subject-1",
            "raw_type": "inactivity",
            "confidence": 1.0,
            "duration_ms": 400000
        }))
        .await
        .json();

    let alert_id = response["alert_id"].as_str().unwrap();
    let alert: Value = server.get(&format!("/alerts/{alert_id}")).await.json();
    assert_eq!(alert["alert_type"], "inactivity");
    assert_eq!(alert["severity"], "high");
    assert_eq!(alert["priority"], 6);
}

#[tokio::test]
async fn test_short_inactivity_is_not_dangerous() {
    let server = create_test_server().await;

    let response: Value = server
        .post("/events")
        .json(&json!({
            "subject_id": "subject-1",
            "raw_type": "idle",
            "confidence": 1.0,
            "duration_ms": 60000
        }))
        .await
        .json();

    assert_eq!(response["normalized_type"], "inactivity");
    assert_eq!(response["danger"], false);
    assert!(response["alert_id"].is_null());
}

#[tokio::test]
async fn test_unknown_event_type_is_accepted() {
    let server = create_test_server().await;

    let response = server
        .post("/events")
        .json(&json!({
            "subject_id": "subject-1",
            "raw_type": "dancing",
            "confidence": 0.9
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["normalized_type"], "unknown");
    assert_eq!(body["danger"], false);
}

#[tokio::test]
async fn test_invalid_confidence_is_rejected() {
    let server = create_test_server().await;

    let response = server
        .post("/events")
        .json(&json!({
            "subject_id": "subject-1",
            "raw_type": "fall",
            "confidence": 1.5
        }))
        .await;

    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn test_acknowledge_and_resolve_lifecycle() {
    let server = create_test_server().await;

    let created: Value = server
        .post("/alerts")
        .json(&json!({
            "subject_id": "subject-1",
            "alert_type": "medical",
            "severity": "high",
            "message": "Missed medication window"
        }))
        .await
        .json();
    let id = created["id"].as_str().unwrap();

    let acked: Value = server
        .post(&format!("/alerts/{id}/acknowledge"))
        .json(&json!({ "by": "carer-1" }))
        .await
        .json();
    assert_eq!(acked["status"], "acknowledged");
    assert_eq!(acked["acknowledged_by"], "carer-1");

    let resolved: Value = server
        .post(&format!("/alerts/{id}/resolve"))
        .json(&json!({ "by": "carer-1" }))
        .await
        .json();
    assert_eq!(resolved["status"], "resolved");
}

#[tokio::test]
async fn test_acknowledging_resolved_alert_is_conflict() {
    let server = create_test_server().await;

    let created: Value = server
        .post("/alerts")
        .json(&json!({
            "subject_id": "subject-1",
            "alert_type": "wellness",
            "severity": "low"
        }))
        .await
        .json();
    let id = created["id"].as_str().unwrap();

    server
        .post(&format!("/alerts/{id}/resolve"))
        .json(&json!({ "by": "carer-1" }))
        .await
        .assert_status_ok();

    let response = server
        .post(&format!("/alerts/{id}/acknowledge"))
        .json(&json!({ "by": "carer-2" }))
        .await;

    response.assert_status(axum::http::StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["code"], "invalid_transition");
}

#[tokio::test]
async fn test_resolving_twice_is_conflict() {
    let server = create_test_server().await;

    let created: Value = server
        .post("/alerts")
        .json(&json!({
            "subject_id": "subject-1",
            "alert_type": "security",
            "severity": "medium"
        }))
        .await
        .json();
    let id = created["id"].as_str().unwrap();

    server
        .post(&format!("/alerts/{id}/resolve"))
        .json(&json!({ "by": "carer-1" }))
        .await
        .assert_status_ok();

    let response = server
        .post(&format!("/alerts/{id}/resolve"))
        .json(&json!({ "by": "carer-1" }))
        .await;

    response.assert_status(axum::http::StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["code"], "already_resolved");
}

#[tokio::test]
async fn test_escalation_ladder_caps_at_three() {
    let server = create_test_server().await;
    add_family_contact(&server).await;

    let created: Value = server
        .post("/alerts")
        .json(&json!({
            "subject_id": "subject-1",
            "alert_type": "fall",
            "severity": "high"
        }))
        .await
        .json();
    let id = created["id"].as_str().unwrap();

    for expected_level in 1..=3 {
        let alert: Value = server
            .post(&format!("/alerts/{id}/escalate"))
            .await
            .json();
        assert_eq!(alert["escalation_level"], expected_level);
    }

    // A fourth step stays at the cap but is still recorded in history.
    let alert: Value = server
        .post(&format!("/alerts/{id}/escalate"))
        .await
        .json();
    assert_eq!(alert["escalation_level"], 3);
    assert_eq!(alert["status"], "escalated");
    assert_eq!(alert["escalation_history"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_sos_reaches_opted_out_contacts() {
    let server = create_test_server().await;

    // A contact opted out of every alert category.
    server
        .post("/contacts")
        .json(&json!({
            "subject_id": "subject-1",
            "name": "Ben",
            "contact_type": "neighbor",
            "phone": "+15550002222",
            "notification_preferences": {
                "sms": { "enabled": true }
            },
            "alert_types": []
        }))
        .await
        .assert_status(axum::http::StatusCode::CREATED);

    let response = server
        .post("/sos")
        .json(&json!({
            "subject_id": "subject-1",
            "location": "garden",
            "include_emergency_call": true
        }))
        .await;

    response.assert_status(axum::http::StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["alert"]["alert_type"], "sos");
    assert_eq!(body["alert"]["severity"], "critical");
    // One SMS entry plus the emergency-services entry.
    assert_eq!(body["notified"], 2);

    let notifications = body["alert"]["notifications"].as_array().unwrap();
    assert!(
        notifications
            .iter()
            .any(|n| n["channel"] == "emergency" && n["contact_id"] == "emergency-services")
    );
}

#[tokio::test]
async fn test_notification_status_callback() {
    let server = create_test_server().await;
    add_family_contact(&server).await;

    let event: Value = server
        .post("/events")
        .json(&json!({
            "subject_id": "subject-1",
            "raw_type": "fall",
            "confidence": 0.8
        }))
        .await
        .json();
    let id = event["alert_id"].as_str().unwrap();

    // Give the spawned simulated delivery a moment to land.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let contacts: Value = server.get("/contacts?subject_id=subject-1").await.json();
    let contact_id = contacts[0]["id"].as_str().unwrap();

    let alert: Value = server
        .post(&format!("/alerts/{id}/notifications"))
        .json(&json!({
            "contact_id": contact_id,
            "channel": "sms",
            "status": "delivered",
            "response": "provider-receipt-42"
        }))
        .await
        .json();

    let entry = &alert["notifications"].as_array().unwrap()[0];
    assert_eq!(entry["status"], "delivered");
    assert_eq!(entry["response"], "provider-receipt-42");
}

#[tokio::test]
async fn test_alert_list_filters() {
    let server = create_test_server().await;

    for subject in ["subject-1", "subject-2"] {
        server
            .post("/alerts")
            .json(&json!({
                "subject_id": subject,
                "alert_type": "wellness",
                "severity": "low"
            }))
            .await
            .assert_status(axum::http::StatusCode::CREATED);
    }

    let created: Value = server
        .post("/alerts")
        .json(&json!({
            "subject_id": "subject-1",
            "alert_type": "medical",
            "severity": "medium"
        }))
        .await
        .json();
    let id = created["id"].as_str().unwrap();
    server
        .post(&format!("/alerts/{id}/resolve"))
        .json(&json!({ "by": "carer-1" }))
        .await
        .assert_status_ok();

    let all: Value = server.get("/alerts").await.json();
    assert_eq!(all.as_array().unwrap().len(), 3);

    let subject_one: Value = server.get("/alerts?subject_id=subject-1").await.json();
    assert_eq!(subject_one.as_array().unwrap().len(), 2);

    let resolved: Value = server
        .get("/alerts?subject_id=subject-1&status=resolved")
        .await
        .json();
    assert_eq!(resolved.as_array().unwrap().len(), 1);
    assert_eq!(resolved[0]["id"], id);
}

#[tokio::test]
async fn test_unknown_alert_is_not_found() {
    let server = create_test_server().await;

    let response = server.get("/alerts/no-such-alert").await;

    response.assert_status(axum::http::StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_contact_upsert_replaces_existing() {
    let server = create_test_server().await;

    let created: Value = server
        .post("/contacts")
        .json(&json!({
            "subject_id": "subject-1",
            "name": "Anna",
            "contact_type": "family_member",
            "phone": "+15550001111"
        }))
        .await
        .json();
    let id = created["id"].as_str().unwrap();

    server
        .post("/contacts")
        .json(&json!({
            "id": id,
            "subject_id": "subject-1",
            "name": "Anna Updated",
            "contact_type": "family_member",
            "phone": "+15550009999"
        }))
        .await
        .assert_status(axum::http::StatusCode::CREATED);

    let contacts: Value = server.get("/contacts?subject_id=subject-1").await.json();
    let contacts = contacts.as_array().unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0]["name"], "Anna Updated");
    assert_eq!(contacts[0]["phone"], "+15550009999");
}
