//! Canonical JSON minimal: claves de objetos ordenadas, sin espacios.
//!
//! Base de la clave de idempotencia y de las comparaciones de argumentos y
//! definiciones entre re-bootstraps (dos JSON con distinto orden de claves
//! son equivalentes).

use serde_json::Value;
use std::collections::BTreeMap;

pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let tree: BTreeMap<&String, String> = map.iter().map(|(k, v)| (k, to_canonical_json(v))).collect();
            let items: Vec<String> = tree.into_iter()
                                         .map(|(k, v)| format!("{}:{}", quote(k), v))
                                         .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

/// Igualdad estructural insensible al orden de claves.
pub fn canonical_eq(a: &Value, b: &Value) -> bool {
    to_canonical_json(a) == to_canonical_json(b)
}

fn quote(s: &str) -> String {
    // serializar un &str a JSON no puede fallar
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_are_sorted_recursively() {
        let v = json!({"b": {"y": 1, "x": [true, null]}, "a": "s"});
        assert_eq!(to_canonical_json(&v), r#"{"a":"s","b":{"x":[true,null],"y":1}}"#);
    }

    #[test]
    fn canonical_eq_ignores_key_order_but_not_array_order() {
        assert!(canonical_eq(&json!({"a": 1, "b": 2}), &json!({"b": 2, "a": 1})));
        assert!(!canonical_eq(&json!([1, 2]), &json!([2, 1])));
    }
}
