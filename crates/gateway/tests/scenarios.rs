//! End-to-end dialog scenarios against mock remote services.
//!
//! Each test seeds a clean session, the built-in flows, and programmed
//! mock RPC responses, then drives the orchestrator one message at a
//! time — no network, fully deterministic.

use std::sync::Arc;

use serde_json::json;

use pv_domain::config::Config;
use pv_domain::reply::ReplyPayload;
use pv_gateway::bootstrap::{apply_auth_event, build_state};
use pv_gateway::orchestrator::{handle_message, InboundMessage};
use pv_gateway::state::AppState;
use pv_services::mock::{mock_services, MockHandles};
use pv_services::{NluResult, PlaceHit, SearchResults, ZoneInfo};
use pv_sessions::AuthEvent;

const SESSION: &str = "s-scenario";

fn harness() -> (AppState, MockHandles) {
    let config = Arc::new(Config::default());
    let (services, mocks) = mock_services();
    let state = build_state(config, services, false).expect("state builds");
    (state, mocks)
}

async fn say(state: &AppState, text: &str) -> Option<ReplyPayload> {
    handle_message(
        state,
        InboundMessage {
            session_id: SESSION.into(),
            identifier: "web:test".into(),
            channel: "web".into(),
            text: text.into(),
        },
    )
    .await
}

async fn say_expect(state: &AppState, text: &str) -> ReplyPayload {
    say(state, text).await.expect("message not deduped")
}

fn program_intent(mocks: &MockHandles, text: &str, intent: &str, confidence: f64) {
    mocks.nlu.program(
        text,
        NluResult {
            intent: intent.into(),
            confidence,
            entities: json!({}),
        },
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario A — parcel happy path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn parcel_happy_path_places_exactly_one_order() {
    let (state, mocks) = harness();
    program_intent(&mocks, "send a parcel", "send_parcel", 0.9);

    let reply = say_expect(&state, "send a parcel").await;
    assert!(reply.text.contains("parcel pickup"), "got: {}", reply.text);

    let reply = say_expect(&state, "pickup at 19.98,73.78").await;
    assert!(reply.text.contains("deliver"), "got: {}", reply.text);

    let reply = say_expect(&state, "drop at 19.96,73.76").await;
    assert!(reply.text.contains("₹60"), "got: {}", reply.text);
    assert!(reply.text.contains("3.2"), "got: {}", reply.text);

    let reply = say_expect(&state, "yes").await;
    assert!(reply.text.contains("pay"), "got: {}", reply.text);

    let reply = say_expect(&state, "COD").await;
    assert!(reply.text.to_lowercase().contains("confirm"), "got: {}", reply.text);

    let reply = say_expect(&state, "confirm").await;
    assert!(reply.text.contains("P-1001"), "got: {}", reply.text);
    assert!(reply.text.contains("₹60"), "got: {}", reply.text);

    // Run finished; exactly one order placed.
    assert!(state.engine.get_active_flow(SESSION).is_none());
    assert_eq!(mocks.order.placed_count(), 1);
    assert_eq!(
        state
            .metrics
            .flow_completions
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );

    // Both zone checks hit the mock (pickup + drop).
    assert_eq!(mocks.zone.calls.lock().len(), 2);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario B — food search with zero results, external fallback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn food_zero_results_offers_external_vendor() {
    let (state, mocks) = harness();
    let text = "I want tushar missal from nashik";
    program_intent(&mocks, text, "order_food", 0.9);

    // Authenticated session so the food flow starts directly.
    state.sessions.resolve_or_create(SESSION, "web:test", "web");
    state.sessions.update(SESSION, |data| {
        data.authenticated = true;
        data.user_id = Some(7);
        data.auth_token = Some("T".into());
    });

    // Internal search: nothing. Places API: one hit.
    mocks.search.push_results(SearchResults {
        items: vec![],
        total: 0,
    });
    mocks.places.set_hits(vec![PlaceHit {
        name: "Hotel Tushar Misal".into(),
        address: "College Road, Nashik".into(),
        lat: 19.99,
        lng: 73.77,
        maps_link: "https://maps.example/tushar".into(),
    }]);

    let reply = say_expect(&state, text).await;
    assert!(
        reply.text.contains("No delivery partner"),
        "got: {}",
        reply.text
    );
    assert_eq!(reply.cards.len(), 1);
    assert_eq!(reply.cards[0].title, "Hotel Tushar Misal");

    // Waiting for the user to pick; nothing ordered.
    assert!(state.engine.get_active_flow(SESSION).is_some());
    assert_eq!(mocks.order.placed_count(), 0);

    // Picking the numbered option shares pickup details.
    let reply = say_expect(&state, "1").await;
    assert!(reply.text.contains("Hotel Tushar Misal"), "got: {}", reply.text);
    assert!(reply.text.contains("maps.example"), "got: {}", reply.text);
    assert!(state.engine.get_active_flow(SESSION).is_none());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario C — auth interception and resume
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn unauthenticated_food_order_runs_login_first() {
    let (state, mocks) = harness();
    program_intent(&mocks, "order pizza", "order_food", 0.9);

    mocks
        .backend
        .respond("auth.send_otp", json!({ "phone": "9923383838", "sent": true }));
    mocks.backend.respond(
        "auth.verify_otp",
        json!({
            "user_id": 7,
            "token": "T",
            "phone": "9923383838",
            "first_name": "Asha",
        }),
    );
    // The resumed food flow finds something this time.
    mocks.search.push_results(SearchResults {
        items: vec![json!({ "id": 1, "name": "Margherita", "price": 250, "store_id": 9 })],
        total: 1,
    });

    // 1. Intent intercepted, auth flow starts.
    let reply = say_expect(&state, "order pizza").await;
    assert!(reply.text.contains("mobile number"), "got: {}", reply.text);
    let session = state.sessions.get(SESSION).unwrap();
    assert_eq!(session.data.pending_intent.as_deref(), Some("order_food"));
    assert!(!session.data.authenticated);

    // 2. Phone → OTP sent.
    let reply = say_expect(&state, "9923383838").await;
    assert!(reply.text.contains("6-digit code"), "got: {}", reply.text);

    // 3. Code verifies; the stashed food order starts automatically.
    let reply = say_expect(&state, "123456").await;
    assert!(reply.text.contains("signed in"), "got: {}", reply.text);
    assert!(reply.text.contains("found"), "got: {}", reply.text);
    assert_eq!(reply.cards[0].title, "Margherita");

    let session = state.sessions.get(SESSION).unwrap();
    assert!(session.data.authenticated);
    assert_eq!(session.data.user_id, Some(7));
    assert_eq!(session.data.auth_token.as_deref(), Some("T"));
    assert!(session.data.pending_intent.is_none());

    // Central auth knows the phone now.
    assert!(state.auth.get_by_phone("9923383838").is_some());

    // The food run is waiting on a pick.
    let active = state.engine.get_active_flow(SESSION).unwrap();
    assert_eq!(active.flow_id, "food_order_v1");

    // The replayed query was the original utterance, not the OTP code.
    let requests = mocks.search.requests.lock();
    assert_eq!(requests[0].query, "order pizza");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario D — duplicate message dedup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn duplicate_frames_process_once() {
    let (state, _mocks) = harness();

    let first = say(&state, "hello").await;
    let second = say(&state, "hello").await;

    assert!(first.is_some());
    assert!(second.is_none(), "duplicate must be dropped silently");
    assert_eq!(
        state
            .metrics
            .turns_processed
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
    assert_eq!(
        state
            .metrics
            .dedup_drops
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario E — out-of-zone branch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn out_of_zone_pickup_ends_politely() {
    let (state, mocks) = harness();
    program_intent(&mocks, "send a parcel", "send_parcel", 0.9);
    mocks.zone.push_zone(ZoneInfo {
        zone_id: None,
        serviceable: false,
        zone_name: None,
    });

    say_expect(&state, "send a parcel").await;
    let reply = say_expect(&state, "pickup at 28.61,77.20").await;

    assert!(
        reply.text.contains("outside our service area"),
        "got: {}",
        reply.text
    );
    // Completed, not failed; no order placed.
    assert!(state.engine.get_active_flow(SESSION).is_none());
    assert_eq!(mocks.order.placed_count(), 0);
    assert_eq!(
        state
            .metrics
            .flow_completions
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
    let failures = state.metrics.snapshot()["flow_failures"].clone();
    assert_eq!(failures["internal"], json!(0));
    assert_eq!(failures["upstream"], json!(0));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router behaviors beyond the lettered scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn validation_error_reprompts_and_is_counted() {
    let (state, mocks) = harness();
    program_intent(&mocks, "order pizza", "order_food", 0.9);
    mocks.backend.fail(
        "auth.send_otp",
        pv_domain::ErrorKind::Validation,
        "that doesn't look like a phone number",
    );

    // Unauthenticated order → auth flow asks for a phone.
    say_expect(&state, "order pizza").await;
    // A bad phone is a re-prompt, not a failure.
    let reply = say_expect(&state, "not a phone").await;
    assert!(reply.text.contains("phone number"), "got: {}", reply.text);

    assert!(state.engine.get_active_flow(SESSION).is_some());
    assert_eq!(
        state
            .metrics
            .validation_reprompts
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
    let failures = state.metrics.snapshot()["flow_failures"].clone();
    assert_eq!(failures["transient"], json!(0));
    assert_eq!(failures["upstream"], json!(0));
    assert_eq!(failures["internal"], json!(0));
}

#[tokio::test]
async fn keyword_fallback_rescues_low_confidence() {
    let (state, mocks) = harness();
    // NLU is unsure, but the text contains a well-known keyword.
    program_intent(&mocks, "parcel pls", "unknown", 0.2);

    let reply = say_expect(&state, "parcel pls").await;
    assert!(reply.text.contains("parcel pickup"), "got: {}", reply.text);
    assert_eq!(
        state.engine.get_active_flow(SESSION).unwrap().flow_id,
        "parcel_delivery_v1"
    );
}

#[tokio::test]
async fn unmatched_text_gets_a_clarification() {
    let (state, mocks) = harness();
    mocks.llm.push_reply("Did you want food, a parcel, or order tracking?");

    let reply = say_expect(&state, "blorp").await;
    assert!(reply.text.contains("food"), "got: {}", reply.text);
    assert!(state.engine.get_active_flow(SESSION).is_none());
}

#[tokio::test]
async fn reset_command_cancels_the_active_run() {
    let (state, mocks) = harness();
    program_intent(&mocks, "send a parcel", "send_parcel", 0.9);

    say_expect(&state, "send a parcel").await;
    assert!(state.engine.get_active_flow(SESSION).is_some());

    let reply = say_expect(&state, "/reset").await;
    assert!(reply.text.contains("cleared"), "got: {}", reply.text);
    assert!(state.engine.get_active_flow(SESSION).is_none());

    // Identity survives a reset ("/clear" is the same command, and a
    // different text so the dedup window doesn't swallow it).
    state.sessions.update(SESSION, |d| d.phone = Some("9923383838".into()));
    say_expect(&state, "/clear").await;
    let session = state.sessions.get(SESSION).unwrap();
    assert_eq!(session.data.phone.as_deref(), Some("9923383838"));
}

#[tokio::test]
async fn login_on_another_channel_is_announced_next_turn() {
    let (state, mocks) = harness();
    mocks.llm.push_reply("What would you like to do?");

    // A session linked to a phone, not yet authenticated.
    state.sessions.resolve_or_create(SESSION, "web:test", "web");
    state.sessions.update(SESSION, |data| {
        data.phone = Some("9923383838".into());
    });

    // The same human logs in on WhatsApp.
    apply_auth_event(
        &state,
        &AuthEvent::Login {
            phone: "9923383838".into(),
            user_id: 7,
            token: "T2".into(),
            channel: "whatsapp".into(),
        },
    );

    let reply = say_expect(&state, "hello again").await;
    assert!(
        reply.text.contains("logged in on another device"),
        "got: {}",
        reply.text
    );
    let session = state.sessions.get(SESSION).unwrap();
    assert!(session.data.authenticated);
    assert_eq!(session.data.auth_token.as_deref(), Some("T2"));
}

#[tokio::test]
async fn second_message_waits_for_the_first_turn() {
    // Two different texts sent concurrently: the lock serializes them,
    // and both produce a reply (no dedup involved).
    let (state, mocks) = harness();
    program_intent(&mocks, "send a parcel", "send_parcel", 0.9);

    let state_a = state.clone();
    let state_b = state.clone();
    let (a, b) = tokio::join!(
        async move { say(&state_a, "send a parcel").await },
        async move { say(&state_b, "hello there").await },
    );
    assert!(a.is_some());
    assert!(b.is_some());
    assert_eq!(
        state
            .metrics
            .turns_processed
            .load(std::sync::atomic::Ordering::Relaxed),
        2
    );
}
