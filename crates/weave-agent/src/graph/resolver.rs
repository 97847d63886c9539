//! Placeholder substitution in step parameters.
//!
//! A string that is exactly `{id}` is replaced by the stored value itself,
//! keeping its JSON type. Placeholders embedded in longer strings are
//! replaced by the value's text. Placeholders naming nothing in the store
//! stay as literal text, so any brace-wrapped text is a candidate and the
//! store decides.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use super::results::ResultStore;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^{}]+)\}").expect("placeholder pattern is valid"))
}

fn exact_placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\{([^{}]+)\}$").expect("exact placeholder pattern is valid")
    })
}

/// Substitute placeholders throughout `value`, recursing into arrays and
/// objects. Object keys are left untouched.
pub fn resolve(value: &Value, store: &ResultStore) -> Value {
    match value {
        Value::String(s) => resolve_str(s, store),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, store)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, store)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_str(s: &str, store: &ResultStore) -> Value {
    if let Some(caps) = exact_placeholder().captures(s) {
        if let Some(outcome) = store.get(&caps[1]) {
            return outcome.to_value();
        }
        return Value::String(s.to_string());
    }

    let replaced = placeholder().replace_all(s, |caps: &Captures| match store.get(&caps[1]) {
        Some(outcome) => outcome.render(),
        None => caps[0].to_string(),
    });
    Value::String(replaced.into_owned())
}

/// Every step id named by a placeholder anywhere in `value`.
pub fn referenced_ids(value: &Value) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    collect_ids(value, &mut ids);
    ids
}

fn collect_ids(value: &Value, ids: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            for caps in placeholder().captures_iter(s) {
                ids.insert(caps[1].to_string());
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_ids(v, ids)),
        Value::Object(map) => map.values().for_each(|v| collect_ids(v, ids)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weave_core::types::StepOutcome;

    fn store() -> ResultStore {
        let mut store = ResultStore::new("How much disk is free?");
        store
            .commit_batch(vec![
                ("s1".into(), StepOutcome::text("10.0.0.5")),
                ("disk".into(), StepOutcome::Success(json!({"free_gb": 120.5}))),
                ("bad".into(), StepOutcome::Failure("Tool df error: denied".into())),
            ])
            .unwrap();
        store
    }

    #[test]
    fn test_exact_placeholder_keeps_type() {
        let out = resolve(&json!({"info": "{disk}"}), &store());
        assert_eq!(out, json!({"info": {"free_gb": 120.5}}));
    }

    #[test]
    fn test_inline_placeholder_uses_text() {
        let out = resolve(&json!({"q": "ip={s1}; disk={disk}"}), &store());
        assert_eq!(out, json!({"q": "ip=10.0.0.5; disk={\"free_gb\":120.5}"}));
    }

    #[test]
    fn test_unresolved_placeholder_kept_literally() {
        let out = resolve(&json!({"a": "{missing}", "b": "see {missing} and {s1}"}), &store());
        assert_eq!(out, json!({"a": "{missing}", "b": "see {missing} and 10.0.0.5"}));
    }

    #[test]
    fn test_initial_request_is_resolvable() {
        let out = resolve(&json!({"question": "{initial_request}"}), &store());
        assert_eq!(out["question"], "How much disk is free?");
    }

    #[test]
    fn test_failure_substitutes_error_text() {
        let out = resolve(&json!(["{bad}", "got: {bad}"]), &store());
        assert_eq!(
            out,
            json!(["Tool df error: denied", "got: Tool df error: denied"])
        );
    }

    #[test]
    fn test_nested_and_non_string_values() {
        let params = json!({"outer": {"list": [1, true, null, "{s1}"]}, "n": 3});
        let out = resolve(&params, &store());
        assert_eq!(out, json!({"outer": {"list": [1, true, null, "10.0.0.5"]}, "n": 3}));
    }

    #[test]
    fn test_json_text_is_not_a_placeholder() {
        let out = resolve(&json!("{\"free_gb\": 1}"), &store());
        assert_eq!(out, json!("{\"free_gb\": 1}"));
    }

    #[test]
    fn test_ids_with_spaces_and_symbols_resolve() {
        let mut store = ResultStore::new("q");
        store
            .commit_batch(vec![
                ("get ip".into(), StepOutcome::text("10.0.0.5")),
                ("disk:root".into(), StepOutcome::Success(json!({"free_gb": 120.5}))),
            ])
            .unwrap();
        let out = resolve(
            &json!({"ip": "{get ip}", "info": "{disk:root}", "line": "ip is {get ip}"}),
            &store,
        );
        assert_eq!(
            out,
            json!({"ip": "10.0.0.5", "info": {"free_gb": 120.5}, "line": "ip is 10.0.0.5"})
        );
    }

    #[test]
    fn test_innermost_braces_form_the_placeholder() {
        let out = resolve(&json!("{{s1}}"), &store());
        assert_eq!(out, json!("{10.0.0.5}"));
        let out = resolve(&json!("{\"a\": {\"b\": 1}}"), &store());
        assert_eq!(out, json!("{\"a\": {\"b\": 1}}"));
    }

    #[test]
    fn test_referenced_ids() {
        let ids = referenced_ids(&json!({"a": "{s1}", "b": ["x {s2} {s1}"], "c": 4, "d": "{get ip}"}));
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["get ip", "s1", "s2"]);
    }
}
