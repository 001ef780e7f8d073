//! Grafo de steps serializado.
//!
//! Es lo que se persiste en `Execution::definition` y se compara en cada
//! re-bootstrap. El orden de declaración es parte de la definición, por eso
//! se serializa como lista de pares `[nombre, spec]` y no como objeto (un
//! objeto JSON / JSONB no conserva el orden de las claves).

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::constants::{AWAITS_NAMESPACE, FOR_EACH_NAMESPACE};
use crate::hashing::hash_value;

/// Campos propios de `StepSpec`; ningún plugin puede usarlos como keyword.
pub const RESERVED_OPTION_KEYS: [&str; 2] = ["does", "then"];

/// Especificación de un step: handler, siguiente step y opciones de plugins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Nombre del handler registrado en el builder.
    pub does: String,
    /// Step siguiente o `FINISHED`.
    pub then: String,
    /// Opciones reconocidas por plugins (`awaits`, `for_each`, ...).
    #[serde(flatten)]
    pub options: BTreeMap<String, Value>,
}

impl StepSpec {
    pub fn new(does: impl Into<String>, then: impl Into<String>) -> Self {
        Self { does: does.into(),
               then: then.into(),
               options: BTreeMap::new() }
    }

    pub fn option(&self, keyword: &str) -> Option<&Value> {
        self.options.get(keyword)
    }

    pub fn awaits(&self) -> Option<&Value> {
        self.option(AWAITS_NAMESPACE)
    }

    pub fn for_each(&self) -> Option<&Value> {
        self.option(FOR_EACH_NAMESPACE)
    }
}

/// Mapa ordenado nombre de step → spec.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowDefinition {
    steps: IndexMap<String, StepSpec>,
}

impl Serialize for WorkflowDefinition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.steps.iter())
    }
}

impl<'de> Deserialize<'de> for WorkflowDefinition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs = Vec::<(String, StepSpec)>::deserialize(deserializer)?;
        Ok(Self { steps: pairs.into_iter().collect() })
    }
}

impl WorkflowDefinition {
    pub fn new(steps: IndexMap<String, StepSpec>) -> Self {
        Self { steps }
    }

    pub fn first_step(&self) -> Option<&str> {
        self.steps.keys().next().map(String::as_str)
    }

    pub fn get(&self, step: &str) -> Option<&StepSpec> {
        self.steps.get(step)
    }

    pub fn contains(&self, step: &str) -> bool {
        self.steps.contains_key(step)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StepSpec)> {
        self.steps.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Hash estable que respeta el orden de los steps (el JSON canónico
    /// ordenaría las claves del mapa).
    pub fn fingerprint(&self) -> String {
        let ordered: Vec<Value> = self.steps
                                      .iter()
                                      .map(|(name, spec)| json!([name, spec]))
                                      .collect();
        hash_value(&Value::Array(ordered))
    }

    /// Dos definiciones son equivalentes si tienen el mismo fingerprint.
    pub fn matches(&self, other: &WorkflowDefinition) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FINISHED;

    fn definition(order: &[&str]) -> WorkflowDefinition {
        let mut steps = IndexMap::new();
        for (i, name) in order.iter().enumerate() {
            let then = order.get(i + 1).copied().unwrap_or(FINISHED);
            steps.insert(name.to_string(), StepSpec::new(*name, then));
        }
        WorkflowDefinition::new(steps)
    }

    #[test]
    fn serializes_as_ordered_pairs_with_flattened_options() {
        let mut def = definition(&["a", "b"]);
        def.steps
           .get_mut("a")
           .unwrap()
           .options
           .insert("for_each".into(), json!("items"));
        let v = serde_json::to_value(&def).unwrap();
        assert_eq!(v[0], json!(["a", {"does": "a", "then": "b", "for_each": "items"}]));
        let back: WorkflowDefinition = serde_json::from_value(v).unwrap();
        assert_eq!(back, def);
        assert_eq!(back.first_step(), Some("a"));
        assert_eq!(back.get("a").unwrap().for_each(), Some(&json!("items")));
    }

    #[test]
    fn declaration_order_survives_a_json_round_trip() {
        let def = definition(&["reserve", "confirm", "archive"]);
        let stored = serde_json::to_value(&def).unwrap();
        let back: WorkflowDefinition = serde_json::from_value(stored.clone()).unwrap();
        assert_eq!(back.first_step(), Some("reserve"));
        assert_eq!(back.iter().map(|(name, _)| name).collect::<Vec<_>>(),
                   vec!["reserve", "confirm", "archive"]);
        assert!(back.matches(&def));

        // también a través de texto, como lo devuelve una columna JSONB
        let text = serde_json::to_string(&stored).unwrap();
        let reparsed: WorkflowDefinition = serde_json::from_str(&text).unwrap();
        assert_eq!(reparsed.fingerprint(), def.fingerprint());
    }

    #[test]
    fn fingerprint_depends_on_step_order() {
        let ab = definition(&["a", "b"]);
        let ba = definition(&["b", "a"]);
        assert!(ab.matches(&definition(&["a", "b"])));
        assert!(!ab.matches(&ba));
    }
}
