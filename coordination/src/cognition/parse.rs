//! Tolerant parsing of model responses.
//!
//! Models wrap JSON in code fences, add prose around it, mix camelCase and
//! snake_case, and leave fields out. Everything here degrades to defaults
//! instead of failing; callers only get `None` when no JSON is present at all.

use serde_json::{Map, Value};

use super::types::{AgentAnalysis, ChangeKind, Complexity, ProposedChange, SolutionOption};

/// Pull the first JSON value out of a model response.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }

    if let Some(inner) = fenced_block(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(inner.trim()) {
            return Some(v);
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(v) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                    return Some(v);
                }
            }
        }
    }
    None
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip a language tag such as ```json
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// Key normalisation: `estimatedMinutes`, `estimated_minutes` and
/// `Estimated-Minutes` all compare equal.
fn norm(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    let wanted: Vec<String> = names.iter().map(|n| norm(n)).collect();
    obj.iter()
        .find(|(k, v)| !v.is_null() && wanted.contains(&norm(k)))
        .map(|(_, v)| v)
}

fn string_field(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
    match field(obj, names)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let joined = string_list(&Value::Array(items.clone())).join("; ");
            Some(joined).filter(|s| !s.is_empty())
        }
        _ => None,
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(o) => string_field(o, &["name", "title", "description", "path"]),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => s
            .split(['\n', ';'])
            .map(|line| line.trim().trim_start_matches(['-', '*']).trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn list_field(obj: &Map<String, Value>, names: &[&str]) -> Vec<String> {
    field(obj, names).map(string_list).unwrap_or_default()
}

/// Clamp to [0, 1]; values in (1, 100] are read as percentages.
pub fn normalize_confidence(raw: f64) -> f64 {
    if !raw.is_finite() {
        return 0.0;
    }
    let v = if raw > 1.0 && raw <= 100.0 { raw / 100.0 } else { raw };
    v.clamp(0.0, 1.0)
}

fn confidence_field(obj: &Map<String, Value>) -> f64 {
    let raw = match field(obj, &["confidence", "confidence_score", "score"]) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.5),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse::<f64>().unwrap_or(0.5),
        _ => 0.5,
    };
    normalize_confidence(raw)
}

/// Minutes from a number or strings like "2 hours", "45 min", "1.5h".
fn duration_minutes(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_f64().map(|m| m.max(0.0).round() as u32),
        Value::String(s) => {
            let lower = s.to_ascii_lowercase();
            let number: String = lower
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            let n: f64 = number.parse().ok()?;
            let minutes = if lower.contains("day") {
                n * 8.0 * 60.0
            } else if lower.contains('h') {
                n * 60.0
            } else {
                n
            };
            Some(minutes.max(0.0).round() as u32)
        }
        _ => None,
    }
}

fn parse_change(value: &Value, fallback_description: &str) -> Option<ProposedChange> {
    match value {
        Value::String(path) if !path.trim().is_empty() => {
            Some(ProposedChange::new(path.trim(), fallback_description))
        }
        Value::Object(obj) => {
            let path = string_field(obj, &["path", "file", "file_path"])?;
            let description = string_field(obj, &["description", "summary", "change"])
                .unwrap_or_else(|| fallback_description.to_string());
            let lines = field(obj, &["estimated_lines", "lines", "line_count", "loc"])
                .and_then(|v| v.as_f64())
                .map(|n| n.max(0.0).round() as u32)
                .unwrap_or(0);
            let kind = match string_field(obj, &["kind", "type", "action"])
                .map(|k| k.to_ascii_lowercase())
                .as_deref()
            {
                Some("create" | "add" | "new") => ChangeKind::Create,
                Some("delete" | "remove") => ChangeKind::Delete,
                _ => ChangeKind::Modify,
            };
            Some(
                ProposedChange::new(path, description)
                    .with_lines(lines)
                    .with_kind(kind),
            )
        }
        _ => None,
    }
}

/// Parse the analyze-phase response. `None` when no usable problem
/// statement is present.
pub fn parse_analysis(text: &str) -> Option<AgentAnalysis> {
    let value = extract_json(text)?;
    let obj = match &value {
        Value::Object(o) => match field(o, &["analysis"]) {
            Some(Value::Object(inner)) => inner,
            _ => o,
        },
        _ => return None,
    };

    let problem = string_field(obj, &["problem", "problem_statement", "summary"])?;
    Some(AgentAnalysis {
        problem,
        context: string_field(obj, &["context", "background"]).unwrap_or_default(),
        constraints: list_field(obj, &["constraints", "requirements"]),
        fallback: false,
    })
}

/// Parse the option-generation response, keeping at most `max_options`.
pub fn parse_options(text: &str, max_options: usize) -> Vec<SolutionOption> {
    let Some(value) = extract_json(text) else {
        return Vec::new();
    };

    let items: Vec<Value> = match &value {
        Value::Array(items) => items.clone(),
        Value::Object(o) => match field(o, &["options", "solutions", "alternatives"]) {
            Some(Value::Array(items)) => items.clone(),
            _ => vec![value.clone()],
        },
        _ => Vec::new(),
    };

    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(parse_option)
        .take(max_options)
        .collect()
}

fn parse_option(obj: &Map<String, Value>) -> Option<SolutionOption> {
    let title = string_field(obj, &["title", "name"]);
    let description = string_field(obj, &["description", "summary"]);
    if title.is_none() && description.is_none() {
        return None;
    }
    let description = description.unwrap_or_default();
    let title = title.unwrap_or_else(|| description.chars().take(60).collect());
    let approach = string_field(obj, &["approach", "implementation", "plan", "steps"])
        .unwrap_or_else(|| description.clone());

    let files = list_field(obj, &["files", "files_to_change", "files_affected", "affected_files"]);
    let changes = match field(obj, &["changes", "proposed_changes", "file_changes"]) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| parse_change(v, &approach))
            .collect(),
        _ => Vec::new(),
    };

    Some(SolutionOption {
        id: string_field(obj, &["id"]).unwrap_or_else(SolutionOption::new_id),
        title,
        description,
        approach,
        pros: list_field(obj, &["pros", "advantages", "benefits"]),
        cons: list_field(obj, &["cons", "disadvantages", "drawbacks"]),
        estimated_minutes: field(
            obj,
            &["estimated_minutes", "estimated_duration", "duration", "estimate", "time_estimate"],
        )
        .and_then(duration_minutes)
        .unwrap_or(60),
        complexity: string_field(obj, &["complexity", "difficulty"])
            .map(|c| Complexity::parse_lenient(&c))
            .unwrap_or_default(),
        confidence: confidence_field(obj),
        files,
        risks: list_field(obj, &["risks", "risk"]),
        changes,
    })
}
