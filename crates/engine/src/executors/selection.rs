//! Parse a selection reply ("2", "second", "the misal one") against a
//! previously shown option list. Accepts numerics, ordinal words, and
//! fuzzy substring matches; anything ambiguous or unmatched re-prompts
//! and pauses for another try.

use serde_json::{json, Value};

use pv_domain::ErrorKind;

use crate::executor::{ExecOutcome, Executor, TurnContext};

const ORDINALS: &[(&str, usize)] = &[
    ("first", 1),
    ("second", 2),
    ("third", 3),
    ("fourth", 4),
    ("fifth", 5),
    ("sixth", 6),
    ("seventh", 7),
    ("eighth", 8),
    ("ninth", 9),
    ("tenth", 10),
    ("last", usize::MAX),
];

pub struct SelectionExecutor;

/// Human-readable name of an option (string options are themselves).
fn option_label(option: &Value) -> String {
    match option {
        Value::String(s) => s.clone(),
        other => other
            .get("name")
            .or_else(|| other.get("title"))
            .or_else(|| other.get("label"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| other.to_string()),
    }
}

/// 1-based index parsed from the reply, if any.
fn numeric_choice(text: &str, count: usize) -> Option<usize> {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_ascii_digit() { c } else { ' ' })
        .collect();
    // Exactly one number in the reply, e.g. "2" or "option 2 please".
    let mut numbers = cleaned.split_whitespace().filter(|s| !s.is_empty());
    let first = numbers.next()?;
    if numbers.next().is_some() {
        return None;
    }
    let n: usize = first.parse().ok()?;
    (1..=count).contains(&n).then_some(n)
}

fn ordinal_choice(text: &str, count: usize) -> Option<usize> {
    let lower = text.to_lowercase();
    for (word, n) in ORDINALS {
        let matches_word = lower.contains(word)
            || (*n < 10 && lower.contains(&format!("{n}st")))
            || (*n < 10 && lower.contains(&format!("{n}nd")))
            || (*n < 10 && lower.contains(&format!("{n}rd")))
            || (*n < 10 && lower.contains(&format!("{n}th")));
        if matches_word {
            let idx = if *n == usize::MAX { count } else { *n };
            if (1..=count).contains(&idx) {
                return Some(idx);
            }
        }
    }
    None
}

/// All options whose label shares a word (≥3 chars) with the reply.
fn fuzzy_matches(text: &str, options: &[Value]) -> Vec<usize> {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .collect();
    options
        .iter()
        .enumerate()
        .filter(|(_, option)| {
            let label = option_label(option).to_lowercase();
            words.iter().any(|w| label.contains(w))
        })
        .map(|(i, _)| i + 1)
        .collect()
}

#[async_trait::async_trait]
impl Executor for SelectionExecutor {
    fn name(&self) -> &'static str {
        "selection"
    }

    fn awaits_input(&self) -> bool {
        true
    }

    async fn execute(&self, config: &Value, _ctx: &TurnContext) -> ExecOutcome {
        let Some(options) = config.get("options").and_then(Value::as_array) else {
            return ExecOutcome::fail(ErrorKind::Internal, "selection needs an 'options' array");
        };
        let text = config
            .get("user_text")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if options.is_empty() {
            return ExecOutcome::fail(ErrorKind::Internal, "selection got an empty option list");
        }

        let chosen = numeric_choice(text, options.len())
            .or_else(|| ordinal_choice(text, options.len()));

        if let Some(index) = chosen {
            return ExecOutcome::ok()
                .with_output(json!({ "index": index, "item": options[index - 1] }))
                .with_event("selected");
        }

        match fuzzy_matches(text, options).as_slice() {
            [index] => ExecOutcome::ok()
                .with_output(json!({ "index": index, "item": options[index - 1] }))
                .with_event("selected"),
            [] => ExecOutcome::ok()
                .with_response(format!(
                    "I didn't catch which one you meant — reply with a number between 1 \
                     and {}.",
                    options.len()
                ))
                .with_event("invalid")
                .paused(),
            several => ExecOutcome::ok()
                .with_response(format!(
                    "That matches {} options — reply with the number instead?",
                    several.len()
                ))
                .with_event("ambiguous")
                .paused(),
        }
    }
}
