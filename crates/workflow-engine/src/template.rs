use common::types::JsonValue;
use regex::Regex;
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([a-zA-Z0-9_.\[\]]+)\s*\}\}").unwrap())
}

/// Resolves a single dot-path (e.g. `user.name` or `items[0].id`) against a
/// JSON value. `[n]` indexes arrays; any other segment indexes objects.
/// Returns `None` if any segment is missing — the caller then leaves the
/// original `{{path}}` span untouched, per §4.5.
fn resolve_path<'a>(root: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = root;
    for segment in path.split('.') {
        let (name, indices) = split_indices(segment);
        if !name.is_empty() {
            current = current.get(name)?;
        }
        for idx in indices {
            current = current.get(idx)?;
        }
    }
    Some(current)
}

fn split_indices(segment: &str) -> (&str, Vec<usize>) {
    let mut indices = Vec::new();
    let mut rest = segment;
    let name_end = rest.find('[').unwrap_or(rest.len());
    let name = &rest[..name_end];
    rest = &rest[name_end..];
    while let Some(start) = rest.find('[') {
        if let Some(end) = rest[start..].find(']') {
            if let Ok(idx) = rest[start + 1..start + end].parse::<usize>() {
                indices.push(idx);
            }
            rest = &rest[start + end + 1..];
        } else {
            break;
        }
    }
    (name, indices)
}

fn value_to_interpolated_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Interpolates every `{{path}}` span in `template` against `data`. A span
/// whose path does not resolve is left exactly as written.
pub fn interpolate(template: &str, data: &JsonValue) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures| {
            let path = &caps[1];
            match resolve_path(data, path) {
                Some(value) => value_to_interpolated_string(value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Resolves a single `{{path}}` expression to the raw JSON value it points
/// at (used by `memory-write`'s `value_template` when the whole value, not
/// a string interpolation, is wanted). Falls back to a string interpolation
/// if the template isn't a single bare placeholder.
pub fn resolve_value(template: &str, data: &JsonValue) -> JsonValue {
    let trimmed = template.trim();
    if let Some(path) = trimmed.strip_prefix("{{").and_then(|s| s.strip_suffix("}}")) {
        if let Some(value) = resolve_path(data, path.trim()) {
            return value.clone();
        }
    }
    JsonValue::String(interpolate(template, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_path() {
        let data = json!({"user": {"name": "ada"}});
        assert_eq!(interpolate("hello {{user.name}}", &data), "hello ada");
    }

    #[test]
    fn leaves_unresolved_path_literal() {
        let data = json!({"user": {"name": "ada"}});
        assert_eq!(interpolate("hello {{user.missing}}", &data), "hello {{user.missing}}");
    }

    #[test]
    fn resolves_array_index() {
        let data = json!({"items": [{"id": 1}, {"id": 2}]});
        assert_eq!(interpolate("{{items[1].id}}", &data), "2");
    }

    #[test]
    fn resolve_value_returns_typed_json_for_bare_placeholder() {
        let data = json!({"count": 5});
        assert_eq!(resolve_value("{{count}}", &data), json!(5));
    }
}
