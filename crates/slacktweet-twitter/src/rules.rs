//! Stream rule management: the upstream tracks one rule per filter term.

use serde_json::{json, Value};

use slacktweet_core::Result;

use crate::{json_or_error, map_err};

pub const RULES_PATH: &str = "/2/tweets/search/stream/rules";

/// Rule syntax for one term: multi-word terms are matched as a phrase.
pub fn rule_value(term: &str) -> String {
    let escaped = term.replace('"', "\\\"");
    if term.chars().any(char::is_whitespace) {
        format!("\"{escaped}\"")
    } else {
        escaped
    }
}

pub fn add_rules_body(terms: &[String]) -> Value {
    let add: Vec<Value> = terms
        .iter()
        .map(|t| json!({ "value": rule_value(t), "tag": t }))
        .collect();
    json!({ "add": add })
}

pub fn delete_rules_body(ids: &[String]) -> Value {
    json!({ "delete": { "ids": ids } })
}

/// Ids of the rules currently installed (`{"data": [{"id": ..}, ..]}`).
pub fn existing_rule_ids(v: &Value) -> Vec<String> {
    v.get("data")
        .and_then(Value::as_array)
        .map(|rules| {
            rules
                .iter()
                .filter_map(|r| r.get("id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Replace every installed rule with one rule per term.
pub async fn sync_rules(
    http: &reqwest::Client,
    api_base: &str,
    bearer: &str,
    terms: &[String],
) -> Result<()> {
    let url = format!("{api_base}{RULES_PATH}");

    let resp = http
        .get(&url)
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(map_err)?;
    let existing = existing_rule_ids(&json_or_error(resp, "list rules").await?);

    if !existing.is_empty() {
        let resp = http
            .post(&url)
            .bearer_auth(bearer)
            .json(&delete_rules_body(&existing))
            .send()
            .await
            .map_err(map_err)?;
        json_or_error(resp, "delete rules").await?;
        tracing::debug!(count = existing.len(), "removed stale stream rules");
    }

    if terms.is_empty() {
        return Ok(());
    }

    let resp = http
        .post(&url)
        .bearer_auth(bearer)
        .json(&add_rules_body(terms))
        .send()
        .await
        .map_err(map_err)?;
    json_or_error(resp, "add rules").await?;
    tracing::info!(terms = ?terms, "stream rules installed");
    Ok(())
}
