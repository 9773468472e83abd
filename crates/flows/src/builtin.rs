//! Built-in flow definitions.
//!
//! These ship in code so the service is useful with an empty YAML
//! directory. Operators can override any of them by dropping a YAML
//! file with the same `(id, version)`.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};

use crate::model::{
    Action, Condition, FlowDefinition, FlowModule, OnError, RetryPolicy, State, StateKind,
};

pub const AUTH_FLOW_ID: &str = "auth_login_v1";
pub const FOOD_FLOW_ID: &str = "food_order_v1";
pub const PARCEL_FLOW_ID: &str = "parcel_delivery_v1";
pub const SHOP_FLOW_ID: &str = "ecommerce_shop_v1";
pub const TRACKING_FLOW_ID: &str = "order_tracking_v1";

pub fn all() -> Vec<FlowDefinition> {
    vec![
        auth_login(),
        food_order(),
        parcel_delivery(),
        ecommerce_shop(),
        order_tracking(),
    ]
}

// ── small builders ──────────────────────────────────────────────────

fn act(executor: &str, config: Value) -> Action {
    Action {
        executor: executor.into(),
        config,
        output: None,
    }
}

fn act_out(executor: &str, config: Value, output: &str) -> Action {
    Action {
        executor: executor.into(),
        config,
        output: Some(output.into()),
    }
}

fn respond(message: &str) -> Action {
    act("response", json!({ "message": message }))
}

fn transitions(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(event, target)| (event.to_string(), target.to_string()))
        .collect()
}

fn wait_state(actions: Vec<Action>, next: &[(&str, &str)]) -> State {
    State {
        kind: StateKind::Wait,
        actions,
        transitions: transitions(next),
        conditions: vec![],
        on_error: None,
    }
}

fn action_state(actions: Vec<Action>, next: &[(&str, &str)]) -> State {
    State {
        kind: StateKind::Action,
        actions,
        transitions: transitions(next),
        conditions: vec![],
        on_error: None,
    }
}

fn decision_state(conditions: &[(&str, &str)], next: &[(&str, &str)]) -> State {
    State {
        kind: StateKind::Decision,
        actions: vec![],
        transitions: transitions(next),
        conditions: conditions
            .iter()
            .map(|(expression, event)| Condition {
                expression: expression.to_string(),
                event: event.to_string(),
            })
            .collect(),
        on_error: None,
    }
}

fn end_state(actions: Vec<Action>) -> State {
    State {
        kind: StateKind::End,
        actions,
        transitions: BTreeMap::new(),
        conditions: vec![],
        on_error: None,
    }
}

fn finals(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth login (OTP over the business backend)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn auth_login() -> FlowDefinition {
    let mut states = BTreeMap::new();

    states.insert(
        "ask_phone".into(),
        wait_state(
            vec![respond(
                "Please share your 10-digit mobile number to continue.",
            )],
            &[("user_message", "send_otp")],
        ),
    );

    states.insert(
        "send_otp".into(),
        action_state(
            vec![act_out(
                "php_api",
                json!({
                    "action": "auth.send_otp",
                    "params": { "phone": "{{_last_user_message}}" },
                }),
                "otp_send",
            )],
            &[("success", "ask_code")],
        ),
    );

    states.insert(
        "ask_code".into(),
        wait_state(
            vec![respond(
                "We've texted a 6-digit code to {{otp_send.phone}}. Enter it here.",
            )],
            &[("user_message", "verify_otp")],
        ),
    );

    let mut verify = action_state(
        vec![act_out(
            "php_api",
            json!({
                "action": "auth.verify_otp",
                "params": {
                    "phone": "{{otp_send.phone}}",
                    "code": "{{_last_user_message}}",
                },
            }),
            "auth",
        )],
        &[("success", "authed"), ("failed", "bad_code")],
    );
    verify.on_error = Some(OnError {
        retry: None,
        fallback_state: Some("bad_code".into()),
    });
    states.insert("verify_otp".into(), verify);

    states.insert(
        "bad_code".into(),
        wait_state(
            vec![respond("That code doesn't match. Try once more?")],
            &[("user_message", "verify_otp")],
        ),
    );

    states.insert(
        "authed".into(),
        end_state(vec![respond("You're signed in, {{auth.first_name}}!")]),
    );

    FlowDefinition {
        id: AUTH_FLOW_ID.into(),
        version: 1,
        name: "Phone login".into(),
        module: FlowModule::General,
        trigger: Some("login".into()),
        requires_auth: false,
        initial_state: "ask_phone".into(),
        final_states: finals(&["authed"]),
        states,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Food ordering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn food_order() -> FlowDefinition {
    let mut states = BTreeMap::new();

    states.insert(
        "search_items".into(),
        action_state(
            vec![act_out(
                "search",
                json!({
                    "query": "{{_last_user_message}}",
                    "module": "food",
                    "zone_id": "{{session.location.zone_id}}",
                    "size": 5,
                }),
                "search_results",
            )],
            &[("found", "show_results"), ("no_results", "external_lookup")],
        ),
    );

    states.insert(
        "show_results".into(),
        wait_state(
            vec![act(
                "response",
                json!({
                    "message": "Here's what I found — reply with a number to pick:",
                    "cards": "{{search_results.items}}",
                }),
            )],
            &[("user_message", "pick_item")],
        ),
    );

    states.insert(
        "pick_item".into(),
        action_state(
            vec![act_out(
                "selection",
                json!({
                    "options": "{{search_results.items}}",
                    "user_text": "{{_last_user_message}}",
                }),
                "picked",
            )],
            &[("selected", "confirm_order")],
        ),
    );

    states.insert(
        "confirm_order".into(),
        wait_state(
            vec![
                act_out(
                    "pricing",
                    json!({
                        "type": "food",
                        "items": ["{{picked.item}}"],
                    }),
                    "quote",
                ),
                respond(
                    "{{picked.item.name}} — ₹{{quote.total}} including delivery. \
                     Type 'confirm' to place the order.",
                ),
            ],
            &[("user_message", "place_check")],
        ),
    );

    states.insert(
        "place_check".into(),
        decision_state(
            &[
                ("_last_user_message.includes('confirm')", "confirmed"),
                ("true", "unclear"),
            ],
            &[("confirmed", "place_order"), ("unclear", "confirm_order")],
        ),
    );

    let mut place = action_state(
        vec![act_out(
            "order",
            json!({
                "type": "food",
                "items": ["{{picked.item}}"],
                "pricing": "{{quote}}",
                "user_id": "{{session.user_id}}",
                "token": "{{session.auth_token}}",
            }),
            "order_result",
        )],
        &[("success", "done"), ("failed", "order_failed")],
    );
    place.on_error = Some(OnError {
        retry: Some(RetryPolicy {
            attempts: 1,
            backoff_ms: 500,
        }),
        fallback_state: Some("order_failed".into()),
    });
    states.insert("place_order".into(), place);

    states.insert(
        "done".into(),
        end_state(vec![respond(
            "Order {{order_result.order_id}} placed! Total ₹{{quote.total}}. \
             We'll message you when it's on the way.",
        )]),
    );

    states.insert(
        "order_failed".into(),
        end_state(vec![respond(
            "We couldn't place that order right now. Please try again in a bit.",
        )]),
    );

    // Non-partner fallback via the places API.
    states.insert(
        "external_lookup".into(),
        action_state(
            vec![act_out(
                "external_search",
                json!({ "query": "{{_last_user_message}}" }),
                "places",
            )],
            &[
                ("found", "offer_external"),
                ("not_found", "nothing_found"),
                ("error", "nothing_found"),
            ],
        ),
    );

    states.insert(
        "offer_external".into(),
        wait_state(
            vec![act(
                "response",
                json!({
                    "message": "No delivery partner serves that yet, but I found these nearby. \
                                Reply with a number and I'll share pickup details:",
                    "cards": "{{places.results}}",
                }),
            )],
            &[("user_message", "pick_external")],
        ),
    );

    states.insert(
        "pick_external".into(),
        action_state(
            vec![act_out(
                "selection",
                json!({
                    "options": "{{places.results}}",
                    "user_text": "{{_last_user_message}}",
                }),
                "ext_pick",
            )],
            &[("selected", "external_details")],
        ),
    );

    states.insert(
        "external_details".into(),
        end_state(vec![respond(
            "{{ext_pick.item.name}}, {{ext_pick.item.address}} — {{ext_pick.item.maps_link}}. \
             They're not a partner yet, so you'd order pickup directly.",
        )]),
    );

    states.insert(
        "nothing_found".into(),
        end_state(vec![respond(
            "I couldn't find that anywhere nearby. Want to try a different dish or place?",
        )]),
    );

    FlowDefinition {
        id: FOOD_FLOW_ID.into(),
        version: 1,
        name: "Food order".into(),
        module: FlowModule::Food,
        trigger: Some("order_food".into()),
        requires_auth: true,
        initial_state: "search_items".into(),
        final_states: finals(&["done", "order_failed", "external_details", "nothing_found"]),
        states,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parcel delivery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parcel_delivery() -> FlowDefinition {
    let mut states = BTreeMap::new();

    states.insert(
        "welcome".into(),
        wait_state(
            vec![respond(
                "Let's book a parcel pickup. Where should we collect it? \
                 Share a location or type the address.",
            )],
            &[("user_message", "collect_pickup")],
        ),
    );

    states.insert(
        "collect_pickup".into(),
        action_state(
            vec![act_out(
                "address",
                json!({ "field": "pickup", "allow_saved": true, "allow_share": true }),
                "pickup",
            )],
            &[("address_valid", "pickup_zone")],
        ),
    );

    states.insert(
        "pickup_zone".into(),
        action_state(
            vec![act_out(
                "zone",
                json!({
                    "lat": "{{pickup.lat}}",
                    "lng": "{{pickup.lng}}",
                    "module": "parcel",
                }),
                "pickup_zone",
            )],
            &[("in_zone", "ask_drop"), ("out_of_zone", "out_of_zone")],
        ),
    );

    states.insert(
        "ask_drop".into(),
        wait_state(
            vec![respond("Got it. Where should we deliver it?")],
            &[("user_message", "collect_drop")],
        ),
    );

    states.insert(
        "collect_drop".into(),
        action_state(
            vec![act_out(
                "address",
                json!({ "field": "drop", "allow_saved": false, "allow_share": true }),
                "drop",
            )],
            &[("address_valid", "drop_zone")],
        ),
    );

    states.insert(
        "drop_zone".into(),
        action_state(
            vec![act_out(
                "zone",
                json!({
                    "lat": "{{drop.lat}}",
                    "lng": "{{drop.lng}}",
                    "module": "parcel",
                }),
                "drop_zone",
            )],
            &[("in_zone", "quote_distance"), ("out_of_zone", "out_of_zone")],
        ),
    );

    states.insert(
        "quote_distance".into(),
        action_state(
            vec![act_out(
                "distance",
                json!({ "from": "{{pickup}}", "to": "{{drop}}" }),
                "route",
            )],
            &[("calculated", "quote"), ("unreachable", "unreachable")],
        ),
    );

    states.insert(
        "quote".into(),
        wait_state(
            vec![
                act_out(
                    "pricing",
                    json!({
                        "type": "parcel",
                        "distance_km": "{{route.km}}",
                        "from_zone_id": "{{pickup_zone.zone_id}}",
                        "to_zone_id": "{{drop_zone.zone_id}}",
                    }),
                    "quote",
                ),
                respond(
                    "That's {{route.km}} km, about {{route.duration_min}} minutes. \
                     Delivery charge ₹{{quote.total}}. Shall I book it? (yes/no)",
                ),
            ],
            &[("user_message", "confirm_quote")],
        ),
    );

    states.insert(
        "confirm_quote".into(),
        decision_state(
            &[
                ("_last_user_message.includes('yes')", "confirmed"),
                ("_last_user_message.includes('no')", "declined"),
                ("true", "unclear"),
            ],
            &[
                ("confirmed", "ask_payment"),
                ("declined", "cancelled"),
                ("unclear", "reask_quote"),
            ],
        ),
    );

    states.insert(
        "reask_quote".into(),
        wait_state(
            vec![respond("Just a yes or no — should I book the pickup?")],
            &[("user_message", "confirm_quote")],
        ),
    );

    states.insert(
        "ask_payment".into(),
        wait_state(
            vec![respond("How would you like to pay — COD or online?")],
            &[("user_message", "parse_payment")],
        ),
    );

    states.insert(
        "parse_payment".into(),
        action_state(
            vec![act_out(
                "selection",
                json!({
                    "options": ["COD", "Online"],
                    "user_text": "{{_last_user_message}}",
                }),
                "payment",
            )],
            &[("selected", "summary")],
        ),
    );

    states.insert(
        "summary".into(),
        wait_state(
            vec![respond(
                "Pickup {{pickup.label}} → drop {{drop.label}}, {{payment.item}}, \
                 total ₹{{quote.total}}. Type 'confirm' to book.",
            )],
            &[("user_message", "place_check")],
        ),
    );

    states.insert(
        "place_check".into(),
        decision_state(
            &[
                ("_last_user_message.includes('confirm')", "confirmed"),
                ("true", "unclear"),
            ],
            &[("confirmed", "place_order"), ("unclear", "summary")],
        ),
    );

    let mut place = action_state(
        vec![act_out(
            "order",
            json!({
                "type": "parcel",
                "addresses": { "pickup": "{{pickup}}", "drop": "{{drop}}" },
                "payment": "{{payment.item}}",
                "pricing": "{{quote}}",
                "user_id": "{{session.user_id}}",
                "token": "{{session.auth_token}}",
            }),
            "order_result",
        )],
        &[("success", "done"), ("failed", "order_failed")],
    );
    place.on_error = Some(OnError {
        retry: Some(RetryPolicy {
            attempts: 1,
            backoff_ms: 500,
        }),
        fallback_state: Some("order_failed".into()),
    });
    states.insert("place_order".into(), place);

    states.insert(
        "done".into(),
        end_state(vec![respond(
            "Booked! Your parcel order {{order_result.order_id}} is confirmed — \
             ₹{{quote.total}}, rider on the way to {{pickup.label}}.",
        )]),
    );

    states.insert(
        "out_of_zone".into(),
        end_state(vec![respond(
            "Sorry — that point is outside our service area for now. \
             We'll let you know the moment we get there!",
        )]),
    );

    states.insert(
        "unreachable".into(),
        end_state(vec![respond(
            "We couldn't find a road route between those two points. \
             Mind double-checking the locations?",
        )]),
    );

    states.insert(
        "cancelled".into(),
        end_state(vec![respond("No problem, nothing was booked.")]),
    );

    states.insert(
        "order_failed".into(),
        end_state(vec![respond(
            "We couldn't place that booking right now. Please try again in a bit.",
        )]),
    );

    FlowDefinition {
        id: PARCEL_FLOW_ID.into(),
        version: 1,
        name: "Parcel delivery".into(),
        module: FlowModule::Parcel,
        trigger: Some("send_parcel".into()),
        requires_auth: false,
        initial_state: "welcome".into(),
        final_states: finals(&[
            "done",
            "out_of_zone",
            "unreachable",
            "cancelled",
            "order_failed",
        ]),
        states,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ecommerce browse
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn ecommerce_shop() -> FlowDefinition {
    let mut states = BTreeMap::new();

    states.insert(
        "search_products".into(),
        action_state(
            vec![act_out(
                "search",
                json!({
                    "query": "{{_last_user_message}}",
                    "module": "ecommerce",
                    "zone_id": "{{session.location.zone_id}}",
                    "size": 8,
                }),
                "search_results",
            )],
            &[("found", "show_products"), ("no_results", "nothing_found")],
        ),
    );

    states.insert(
        "show_products".into(),
        wait_state(
            vec![act(
                "response",
                json!({
                    "message": "A few matches — reply with a number for details:",
                    "cards": "{{search_results.items}}",
                }),
            )],
            &[("user_message", "pick_product")],
        ),
    );

    states.insert(
        "pick_product".into(),
        action_state(
            vec![act_out(
                "selection",
                json!({
                    "options": "{{search_results.items}}",
                    "user_text": "{{_last_user_message}}",
                }),
                "picked",
            )],
            &[("selected", "product_details")],
        ),
    );

    states.insert(
        "product_details".into(),
        end_state(vec![respond(
            "{{picked.item.name}} — ₹{{picked.item.price}}. \
             Say 'order food' style commands any time, or open the store to check out.",
        )]),
    );

    states.insert(
        "nothing_found".into(),
        end_state(vec![respond(
            "Nothing in the catalog matched that. Try another product name?",
        )]),
    );

    FlowDefinition {
        id: SHOP_FLOW_ID.into(),
        version: 1,
        name: "Shop browse".into(),
        module: FlowModule::Ecommerce,
        trigger: Some("browse_products".into()),
        requires_auth: false,
        initial_state: "search_products".into(),
        final_states: finals(&["product_details", "nothing_found"]),
        states,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Order tracking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn order_tracking() -> FlowDefinition {
    let mut states = BTreeMap::new();

    states.insert(
        "ask_ref".into(),
        wait_state(
            vec![respond("Sure — what's your order number?")],
            &[("user_message", "lookup")],
        ),
    );

    let mut lookup = action_state(
        vec![act_out(
            "php_api",
            json!({
                "action": "order.status",
                "params": {
                    "order_id": "{{_last_user_message}}",
                    "token": "{{session.auth_token}}",
                },
            }),
            "tracking",
        )],
        &[("success", "show_status"), ("failed", "not_found")],
    );
    lookup.on_error = Some(OnError {
        retry: Some(RetryPolicy {
            attempts: 2,
            backoff_ms: 300,
        }),
        fallback_state: Some("not_found".into()),
    });
    states.insert("lookup".into(), lookup);

    states.insert(
        "show_status".into(),
        end_state(vec![respond(
            "Order {{tracking.order_id}}: {{tracking.status}} — {{tracking.eta}}.",
        )]),
    );

    states.insert(
        "not_found".into(),
        end_state(vec![respond(
            "We couldn't find that order. Double-check the number and try again?",
        )]),
    );

    FlowDefinition {
        id: TRACKING_FLOW_ID.into(),
        version: 1,
        name: "Order tracking".into(),
        module: FlowModule::General,
        trigger: Some("track_order".into()),
        requires_auth: false,
        initial_state: "ask_ref".into(),
        final_states: finals(&["show_status", "not_found"]),
        states,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::validate_flow;
    use std::collections::HashSet;

    fn registry_names() -> HashSet<String> {
        [
            "response",
            "llm",
            "nlu",
            "search",
            "address",
            "distance",
            "zone",
            "pricing",
            "order",
            "external_search",
            "selection",
            "php_api",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    #[test]
    fn every_builtin_flow_validates() {
        for flow in all() {
            let report = validate_flow(&flow, &registry_names())
                .unwrap_or_else(|e| panic!("{} failed validation: {e}", flow.id));
            assert!(
                report.warnings.is_empty(),
                "{} produced warnings: {:?}",
                flow.id,
                report.warnings
            );
        }
    }

    #[test]
    fn triggers_are_unique() {
        let mut seen = HashSet::new();
        for flow in all() {
            if let Some(trigger) = &flow.trigger {
                assert!(seen.insert(trigger.clone()), "duplicate trigger {trigger}");
            }
        }
    }

    #[test]
    fn food_flow_requires_auth() {
        let food = all().into_iter().find(|f| f.id == FOOD_FLOW_ID).unwrap();
        assert!(food.requires_auth);
        let parcel = all().into_iter().find(|f| f.id == PARCEL_FLOW_ID).unwrap();
        assert!(!parcel.requires_auth);
    }
}
