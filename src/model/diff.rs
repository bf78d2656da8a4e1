use serde_json::{Map, Value};

/// Canonicalizes a single container definition mapping for comparison:
/// - drops keys whose value is an empty list (the control plane omits them
///   from `describe` responses even when the caller sent them empty),
/// - sorts the `environment` list by its `name` field (the control plane does
///   not preserve environment-list order),
/// - recurses into nested mappings.
///
/// Lists other than `environment` are left as-is; they are compared
/// positionally by the caller.
pub fn canonicalize(definition: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in definition {
        match value {
            Value::Array(arr) if arr.is_empty() => {
                // dropped: semantically absent
            }
            Value::Array(arr) if key == "environment" => {
                let mut sorted = arr.clone();
                sorted.sort_by(|a, b| {
                    let an = a.get("name").and_then(Value::as_str).unwrap_or("");
                    let bn = b.get("name").and_then(Value::as_str).unwrap_or("");
                    an.cmp(bn)
                });
                out.insert(key.clone(), Value::Array(sorted));
            }
            Value::Object(obj) => {
                out.insert(key.clone(), Value::Object(canonicalize(obj)));
            }
            other => {
                out.insert(key.clone(), other.clone());
            }
        }
    }
    out
}

/// Two container-definition lists are equivalent iff their lengths match and,
/// pairwise under canonicalization, every mapping is structurally equal. This
/// is the deregistration gate: a prior task-definition revision is only
/// deregistered if a genuinely different new one was registered.
pub fn is_same_container_definitions(a: &[Map<String, Value>], b: &[Map<String, Value>]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| canonicalize(x) == canonicalize(y))
}

/// Produces the human-readable check-deploy report block.
pub fn diff_report(a: &[Map<String, Value>], b: &[Map<String, Value>]) -> String {
    if is_same_container_definitions(a, b) {
        "Container Definition is not changed".to_string()
    } else {
        let canon_a: Vec<Map<String, Value>> = a.iter().map(canonicalize).collect();
        let canon_b: Vec<Map<String, Value>> = b.iter().map(canonicalize).collect();
        format!(
            "Container is changed. Diff:\n--- origin\n{}\n--- desired\n{}",
            serde_json::to_string_pretty(&canon_a).unwrap_or_default(),
            serde_json::to_string_pretty(&canon_b).unwrap_or_default(),
        )
    }
}
