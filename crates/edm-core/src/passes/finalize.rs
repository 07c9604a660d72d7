use serde_json::{json, Value};
use tracing::trace;

use crate::derived::Derived;
use crate::options::Options;
use crate::types::*;

const ALLOWED_VALUES: &str = "@Validation.AllowedValues";
const OPTIONAL_PARAMETER: &str = "@Core.OptionalParameter";

/// Annotations implied by the model: allowed values of range-checked enum
/// elements and optional parameters with a default (V4). Explicit
/// annotations always win.
pub fn synthesize_annotations(graph: &SchemaGraph, derived: &mut Derived, options: &Options) {
    for (name, def) in &graph.definitions {
        let compiled = derived
            .service_of(name)
            .is_some_and(|s| derived.services.iter().any(|c| c == s));
        if !compiled || derived.defective.contains(name) {
            continue;
        }
        let location = Location::definition(name);
        if let Some(elements) = def.elements() {
            allowed_values(graph, derived, elements, &location);
        }
        if options.is_v4() {
            optional_parameters(derived, &def.params, &location);
            for (action_name, action) in &def.actions {
                optional_parameters(derived, &action.params, &location.clone().action(action_name));
            }
        }
    }
}

fn allowed_values(graph: &SchemaGraph, derived: &mut Derived, elements: &Elements, location: &Location) {
    for (name, element) in elements {
        let element_location = location.clone().element(name);
        if let Some(ref nested) = element.elements {
            allowed_values(graph, derived, nested, &element_location);
            continue;
        }
        if !element.has_flag("@assert.range") || element.annotations.contains_key(ALLOWED_VALUES) {
            continue;
        }
        let Some(symbols) = graph.resolve_scalar(element).and_then(|s| s.enum_values) else {
            continue;
        };
        let values: Vec<Value> = symbols
            .iter()
            .map(|(symbol, value)| {
                json!({
                    "Value": value.val.clone().unwrap_or_else(|| Value::String(symbol.clone())),
                    "@Core.SymbolicName": symbol,
                })
            })
            .collect();
        trace!(element = %element_location, values = values.len(), "allowed values");
        derived.add_extra_annotation(element_location, ALLOWED_VALUES, Value::Array(values));
    }
}

fn optional_parameters(derived: &mut Derived, params: &Elements, location: &Location) {
    for (name, param) in params {
        if param.annotations.contains_key(OPTIONAL_PARAMETER) {
            continue;
        }
        let Some(Token::Node(ref default)) = param.default else {
            continue;
        };
        let mut value = json!({"$Type": "Core.OptionalParameterType"});
        if let Some(ref val) = default.val {
            value["DefaultValue"] = val.clone();
        } else if let Some(ref symbol) = default.symbol {
            value["DefaultValue"] = Value::String(symbol.clone());
        }
        derived.add_extra_annotation(location.clone().param(name), OPTIONAL_PARAMETER, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Messages;
    use crate::passes::services;
    use pretty_assertions::assert_eq;

    fn run(value: Value, options: &Options) -> Derived {
        let graph: SchemaGraph = serde_json::from_value(value).unwrap();
        let mut derived = Derived::default();
        services::assign_services(&graph, options, &mut derived, &mut Messages::new());
        synthesize_annotations(&graph, &mut derived, options);
        derived
    }

    fn model() -> Value {
        json!({"definitions": {
            "S": {"kind": "service"},
            "S.Status": {"kind": "type", "type": "cds.String", "enum": {
                "open": {"val": "O"},
                "closed": {}
            }},
            "S.Task": {"kind": "entity",
                "elements": {
                    "id": {"key": true, "type": "cds.Integer"},
                    "status": {"type": "S.Status", "@assert.range": true},
                    "other": {"type": "S.Status"},
                    "fixed": {"type": "S.Status", "@assert.range": true,
                        "@Validation.AllowedValues": []}
                },
                "actions": {"close": {"kind": "action", "params": {
                    "reason": {"type": "cds.String", "default": {"val": "done"}},
                    "force": {"type": "cds.Boolean"}
                }}}}
        }})
    }

    #[test]
    fn range_checked_enums_get_allowed_values() {
        let derived = run(model(), &Options::default());
        let location = Location::definition("S.Task").element("status");
        assert_eq!(
            derived.extra_annotations[&location][ALLOWED_VALUES],
            json!([
                {"Value": "O", "@Core.SymbolicName": "open"},
                {"Value": "closed", "@Core.SymbolicName": "closed"}
            ])
        );
        assert!(!derived
            .extra_annotations
            .contains_key(&Location::definition("S.Task").element("other")));
        assert!(!derived
            .extra_annotations
            .contains_key(&Location::definition("S.Task").element("fixed")));
    }

    #[test]
    fn optional_parameters_in_v4_only() {
        let location = Location::definition("S.Task").action("close").param("reason");
        let derived = run(model(), &Options::default());
        assert_eq!(
            derived.extra_annotations[&location][OPTIONAL_PARAMETER],
            json!({"$Type": "Core.OptionalParameterType", "DefaultValue": "done"})
        );
        assert_eq!(derived.extra_annotations.len(), 2);

        let derived = run(model(), &Options::v2());
        assert!(!derived.extra_annotations.contains_key(&location));
    }
}
