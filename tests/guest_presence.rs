//! Guest presence lifecycle against a mocked backend: registration,
//! verification and presence polling, heartbeat, and server-driven
//! invalidation with its exactly-once event guarantee.

use anyhow::{anyhow, Result};
use secrecy::ExposeSecret;
use serde_json::json;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tablo_session::storage::MemoryBackend;
use tablo_session::{
    GuestState, InvalidationReason, SessionConfig, SessionInvalidatedEvent, SessionKey,
    SessionLayer, SessionType, VerificationStatus,
};
use tokio::time::sleep;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

fn layer(server_uri: &str) -> Result<SessionLayer> {
    let mut config = SessionConfig::new(server_uri);
    config.presence.presence_interval = Duration::from_millis(25);
    config.presence.verification_interval = Duration::from_millis(25);
    SessionLayer::new(
        Arc::new(MemoryBackend::new()),
        Arc::new(MemoryBackend::new()),
        config,
    )
    .map_err(|e| anyhow!("{e}"))
}

/// Puts the layer into an active `share` session without going through a
/// full login round trip.
fn activate_share(layer: &SessionLayer, project_id: u64) -> SessionKey {
    let key = SessionKey::new(project_id, SessionType::Share);
    layer.pointer.set(key);
    key
}

fn seed_registered_guest(layer: &SessionLayer, key: SessionKey, token: &str) {
    layer
        .credentials
        .set_guest_token(key, &secrecy::SecretString::from(token.to_string()));
    layer.credentials.set_guest_name(key, "Anna");
    layer
        .credentials
        .set_verification_status(key, VerificationStatus::Verified);
    layer.guest.load_from_storage();
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

fn collect_invalidations(
    layer: &SessionLayer,
) -> (
    Arc<parking_lot::Mutex<Vec<SessionInvalidatedEvent>>>,
    tablo_session::Subscription,
) {
    let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let events_clone = Arc::clone(&events);
    let subscription = layer.guest.subscribe_invalidated(move |event| {
        events_clone.lock().push(event.clone());
    });
    (events, subscription)
}

#[tokio::test]
async fn register_persists_the_identity_and_sends_the_fingerprint() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/guest/register"))
        .and(body_partial_json(json!({ "guest_name": "Anna" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 5,
            "session_token": "g1",
            "guest_name": "Anna",
            "guest_email": "anna@example.com"
        })))
        .mount(&server)
        .await;

    let layer = layer(&server.uri())?;
    let key = activate_share(&layer, 9);

    let identity = layer
        .guest
        .register("Anna", Some("anna@example.com"))
        .await?;

    assert_eq!(identity.guest_id, Some(5));
    assert_eq!(identity.guest_name, "Anna");
    assert_eq!(
        layer.guest.state(),
        GuestState::Registered(VerificationStatus::Verified)
    );
    assert_eq!(
        layer.credentials.guest_token(key).unwrap().expose_secret(),
        "g1"
    );
    assert_eq!(layer.credentials.guest_id(key), Some(5));
    // The guest token alone makes the share session live.
    assert!(layer.token.has_token());

    // The registration request carried a non-empty device identifier.
    let requests = server
        .received_requests()
        .await
        .ok_or_else(|| anyhow!("no requests recorded"))?;
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body)?;
    let device_identifier = body["device_identifier"]
        .as_str()
        .ok_or_else(|| anyhow!("missing device_identifier"))?;
    assert!(!device_identifier.is_empty());
    Ok(())
}

#[tokio::test]
async fn register_without_a_share_session_is_refused() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;
    let layer = layer(&server.uri())?;

    let err = layer
        .guest
        .register("Anna", None)
        .await
        .err()
        .ok_or_else(|| anyhow!("expected error"))?;
    assert_eq!(err.to_string(), "no active session");
    assert_eq!(layer.guest.state(), GuestState::Unregistered);
    Ok(())
}

#[tokio::test]
async fn failed_registration_rolls_back_to_unregistered() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/guest/register"))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(json!({ "message": "Túl sok kérés" })),
        )
        .mount(&server)
        .await;

    let layer = layer(&server.uri())?;
    let key = activate_share(&layer, 9);

    let err = layer
        .guest
        .register("Anna", None)
        .await
        .err()
        .ok_or_else(|| anyhow!("expected error"))?;
    assert_eq!(err.to_string(), "Túl sok kérés");
    assert_eq!(layer.guest.state(), GuestState::Unregistered);
    assert!(layer.credentials.guest_token(key).is_none());
    Ok(())
}

#[tokio::test]
async fn pending_registration_verifies_through_polling() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/guest/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 5,
            "session_token": "g1",
            "guest_name": "Anna",
            "verification_status": "pending",
            "is_pending": true
        })))
        .mount(&server)
        .await;

    // First poll still pending, then verified.
    Mock::given(method("GET"))
        .and(path("/guest/verification-status"))
        .and(query_param("session_token", "g1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "verification_status": "pending",
            "is_pending": true
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/guest/verification-status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "verification_status": "verified",
            "is_verified": true
        })))
        .mount(&server)
        .await;

    let layer = layer(&server.uri())?;
    let key = activate_share(&layer, 9);

    layer
        .guest
        .register("Anna", None)
        .await?;
    assert!(layer.guest.is_pending());

    layer.guest.start_verification_polling();
    assert!(
        wait_until(|| layer.guest.state() == GuestState::Registered(VerificationStatus::Verified))
            .await
    );
    assert_eq!(
        layer.credentials.verification_status(key),
        Some(VerificationStatus::Verified)
    );
    Ok(())
}

#[tokio::test]
async fn rejected_verification_fires_one_invalidation() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/guest/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 5,
            "session_token": "g1",
            "guest_name": "Anna",
            "verification_status": "pending",
            "is_pending": true
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/guest/verification-status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "verification_status": "rejected",
            "is_rejected": true
        })))
        .mount(&server)
        .await;

    let layer = layer(&server.uri())?;
    let key = activate_share(&layer, 9);
    layer
        .guest
        .register("Anna", None)
        .await?;

    let (events, _subscription) = collect_invalidations(&layer);
    layer.guest.start_verification_polling();

    assert!(
        wait_until(|| {
            matches!(layer.guest.state(), GuestState::Invalidated(InvalidationReason::Rejected))
        })
        .await
    );
    // Give any racing poll time to (incorrectly) fire a second event.
    sleep(Duration::from_millis(100)).await;

    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, InvalidationReason::Rejected);
    assert!(layer.credentials.guest_token(key).is_none());
    assert!(!layer.token.has_token());
    Ok(())
}

#[tokio::test]
async fn presence_ban_clears_the_credential_and_fires_once() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/guest/session-status"))
        .and(query_param("session_token", "g1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "valid": false,
            "reason": "banned",
            "message": "Hozzáférés megtagadva."
        })))
        .mount(&server)
        .await;

    let layer = layer(&server.uri())?;
    let key = activate_share(&layer, 9);
    seed_registered_guest(&layer, key, "g1");
    assert!(layer.token.has_token());

    let (events, _subscription) = collect_invalidations(&layer);
    layer.guest.start_presence_polling();

    assert!(
        wait_until(|| {
            matches!(layer.guest.state(), GuestState::Invalidated(InvalidationReason::Banned))
        })
        .await
    );
    sleep(Duration::from_millis(100)).await;

    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, InvalidationReason::Banned);
    assert_eq!(events[0].message, "Hozzáférés megtagadva.");
    assert!(layer.credentials.guest_token(key).is_none());
    assert!(!layer.guest.has_guest_session());
    assert!(!layer.token.has_token());
    Ok(())
}

#[tokio::test]
async fn presence_polling_survives_transport_errors() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/guest/session-status"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({})))
        .mount(&server)
        .await;

    let layer = layer(&server.uri())?;
    let key = activate_share(&layer, 9);
    seed_registered_guest(&layer, key, "g1");

    let (events, _subscription) = collect_invalidations(&layer);
    layer.guest.start_presence_polling();

    // Several failed polls later nothing visible has changed.
    sleep(Duration::from_millis(150)).await;
    assert_eq!(
        layer.guest.state(),
        GuestState::Registered(VerificationStatus::Verified)
    );
    assert!(layer.token.has_token());
    assert!(events.lock().is_empty());
    Ok(())
}

#[tokio::test]
async fn starting_the_presence_loop_twice_does_not_stack_loops() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/guest/session-status"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "valid": true })),
        )
        .mount(&server)
        .await;

    let mut config = SessionConfig::new(server.uri());
    config.presence.presence_interval = Duration::from_millis(200);
    let layer = SessionLayer::new(
        Arc::new(MemoryBackend::new()),
        Arc::new(MemoryBackend::new()),
        config,
    )
    .map_err(|e| anyhow!("{e}"))?;
    let key = activate_share(&layer, 9);
    seed_registered_guest(&layer, key, "g1");

    layer.guest.start_presence_polling();
    layer.guest.start_presence_polling();

    // One loop means exactly one immediate tick within the first interval.
    sleep(Duration::from_millis(100)).await;
    let requests = server
        .received_requests()
        .await
        .ok_or_else(|| anyhow!("no requests recorded"))?;
    assert_eq!(requests.len(), 1);

    layer.guest.stop_presence_polling();
    layer.guest.stop_presence_polling();
    Ok(())
}

#[tokio::test]
async fn stale_poll_result_after_logout_is_discarded() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    // The ban verdict arrives slowly; logout happens while it is in flight.
    Mock::given(method("GET"))
        .and(path("/guest/session-status"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "valid": false,
                    "reason": "banned",
                    "message": "Hozzáférés megtagadva."
                }))
                .set_delay(Duration::from_millis(150)),
        )
        .mount(&server)
        .await;

    let layer = layer(&server.uri())?;
    let key = activate_share(&layer, 9);
    seed_registered_guest(&layer, key, "g1");

    let (events, _subscription) = collect_invalidations(&layer);
    layer.guest.start_presence_polling();

    // Let the first request take off, then log the guest out under it.
    sleep(Duration::from_millis(50)).await;
    layer.guest.clear();

    sleep(Duration::from_millis(250)).await;
    assert!(events.lock().is_empty());
    assert_eq!(layer.guest.state(), GuestState::Unregistered);
    Ok(())
}

#[tokio::test]
async fn heartbeat_swallows_failures() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/guest/heartbeat"))
        .and(body_partial_json(json!({ "session_token": "g1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/guest/heartbeat"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({})))
        .mount(&server)
        .await;

    let layer = layer(&server.uri())?;
    let key = activate_share(&layer, 9);
    seed_registered_guest(&layer, key, "g1");

    layer.guest.send_heartbeat().await;
    layer.guest.send_heartbeat().await;
    // Still registered; heartbeat outcomes never surface.
    assert_eq!(
        layer.guest.state(),
        GuestState::Registered(VerificationStatus::Verified)
    );
    Ok(())
}

#[tokio::test]
async fn validate_backfills_the_guest_id() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/guest/validate"))
        .and(body_partial_json(json!({ "session_token": "g1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "valid": true,
            "data": { "id": 77 }
        })))
        .mount(&server)
        .await;

    let layer = layer(&server.uri())?;
    let key = activate_share(&layer, 9);
    seed_registered_guest(&layer, key, "g1");

    assert!(layer.guest.validate().await);
    assert_eq!(layer.credentials.guest_id(key), Some(77));
    assert_eq!(layer.guest.current_identity().unwrap().guest_id, Some(77));
    Ok(())
}

#[tokio::test]
async fn invalid_validate_verdict_clears_the_local_guest() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/guest/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "valid": false })))
        .mount(&server)
        .await;

    let layer = layer(&server.uri())?;
    let key = activate_share(&layer, 9);
    seed_registered_guest(&layer, key, "g1");

    let (events, _subscription) = collect_invalidations(&layer);
    assert!(!layer.guest.validate().await);

    assert!(layer.credentials.guest_token(key).is_none());
    assert_eq!(layer.guest.state(), GuestState::Unregistered);
    // A quiet expiry is not a server-driven invalidation.
    assert!(events.lock().is_empty());
    Ok(())
}

#[tokio::test]
async fn update_guest_info_renames_everywhere() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/guest/update"))
        .and(body_partial_json(json!({
            "session_token": "g1",
            "guest_name": "Anna B."
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "session_token": "g1",
            "guest_name": "Anna B.",
            "guest_email": "anna@example.com"
        })))
        .mount(&server)
        .await;

    let layer = layer(&server.uri())?;
    let key = activate_share(&layer, 9);
    seed_registered_guest(&layer, key, "g1");
    layer.registry.add(tablo_session::StoredSession {
        project_id: 9,
        session_type: SessionType::Share,
        project_name: "Class of 2027".to_string(),
        user_name: Some("Anna".to_string()),
        last_used: chrono::Utc::now(),
        avatar: None,
    });

    let identity = layer
        .guest
        .update_guest_info("Anna B.", Some("anna@example.com"))
        .await?;

    assert_eq!(identity.guest_name, "Anna B.");
    assert_eq!(layer.credentials.guest_name(key).as_deref(), Some("Anna B."));
    assert_eq!(
        layer.registry.list()[0].user_name.as_deref(),
        Some("Anna B.")
    );
    Ok(())
}
