use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;

/// Types that Claude can be forced to produce through a tool call.
///
/// Automatically implemented for any `JsonSchema + DeserializeOwned` type.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    /// JSON schema usable as a Claude tool `input_schema`.
    ///
    /// Tool schemas must be self-contained: `$ref`s are inlined and the
    /// `definitions` / `$schema` keys are dropped.
    fn tool_schema() -> serde_json::Value {
        let schema = schema_for!(Self);
        let mut value = serde_json::to_value(schema).unwrap_or_default();

        let definitions = value.get("definitions").cloned();
        if let Some(defs) = definitions {
            inline_refs(&mut value, &defs);
        }

        if let serde_json::Value::Object(map) = &mut value {
            map.remove("definitions");
            map.remove("$schema");
        }

        value
    }

    fn type_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

fn inline_refs(value: &mut serde_json::Value, definitions: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(ref_path)) = map.get("$ref").cloned() {
                let name = ref_path.trim_start_matches("#/definitions/");
                if let Some(def) = definitions.get(name) {
                    *value = def.clone();
                    inline_refs(value, definitions);
                    return;
                }
            }

            // schemars wraps documented refs as `allOf: [{$ref}]`
            if let Some(serde_json::Value::Array(all_of)) = map.get("allOf").cloned() {
                if let [single] = all_of.as_slice() {
                    *value = single.clone();
                    inline_refs(value, definitions);
                    return;
                }
            }

            for (_, v) in map.iter_mut() {
                inline_refs(v, definitions);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                inline_refs(item, definitions);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct Highlight {
        label: String,
        detail: Option<String>,
    }

    #[derive(Deserialize, JsonSchema)]
    struct Summary {
        headline: String,
        highlights: Vec<Highlight>,
    }

    #[test]
    fn schema_is_self_contained() {
        let schema = Summary::tool_schema();
        let text = serde_json::to_string(&schema).unwrap();
        assert!(!text.contains("$ref"));
        assert!(!text.contains("definitions"));
        assert!(!text.contains("$schema"));
    }

    #[test]
    fn nested_struct_is_inlined_as_object() {
        let schema = Summary::tool_schema();
        let items = &schema["properties"]["highlights"]["items"];
        assert_eq!(items["type"], "object");
        assert!(items["properties"].get("label").is_some());
    }
}
