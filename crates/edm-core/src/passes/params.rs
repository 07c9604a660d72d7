use serde_json::Value;
use tracing::trace;

use crate::derived::{Derived, ElementId, ParamSplit, Placement};
use crate::messages::{InternalError, Messages};
use crate::options::Options;
use crate::types::*;

use super::{service_entities, service_local_name};

pub const PARAMETERS_SUFFIX: &str = "Parameters";
pub const TYPE_SUFFIX: &str = "Type";
/// Composition from the Parameters entity to the result type.
pub const SET_ELEMENT: &str = "Set";
/// Back association from the result type to the Parameters entity.
pub const PARAMETERS_ELEMENT: &str = "Parameters";

/// Split every entity with call parameters into `<E>Parameters` (one key per
/// parameter, composition `Set`) and `<E>Type` (the original elements plus
/// the association `Parameters`). Associations that targeted `E` are
/// redirected to `<E>Parameters`.
pub fn split_parameterized(graph: &mut SchemaGraph, derived: &mut Derived, messages: &mut Messages) {
    let candidates: Vec<String> = service_entities(graph, derived)
        .into_iter()
        .filter(|name| !graph.definitions[name.as_str()].params.is_empty())
        .collect();

    for name in candidates {
        let parameters = format!("{name}{PARAMETERS_SUFFIX}");
        let type_entity = format!("{name}{TYPE_SUFFIX}");
        let mut clash = false;
        for generated in [&parameters, &type_entity] {
            if graph.definitions.contains_key(generated.as_str()) {
                messages.error(
                    "odata-duplicate-name",
                    Location::definition(&name),
                    &[("name", generated.as_str()), ("kind", "definition")],
                );
                clash = true;
            }
        }
        if clash {
            derived.defective.insert(name);
            continue;
        }

        let Some(index) = graph.definitions.get_index_of(name.as_str()) else {
            continue;
        };
        let Some(mut original) = graph.definitions.shift_remove(name.as_str()) else {
            continue;
        };

        let mut param_def = Definition::new(DefinitionKind::Entity);
        let mut param_elements = Elements::new();
        for (param_name, param) in std::mem::take(&mut original.params) {
            let mut element = param;
            element.key = true;
            element.not_null = Some(true);
            param_elements.insert(param_name, element);
        }
        let mut set = Element::scalar(COMPOSITION);
        set.target = Some(type_entity.clone());
        set.keys = Some(Vec::new());
        set.cardinality = Some(Cardinality {
            max: Some(CardinalityBound::Unbounded),
            ..Cardinality::default()
        });
        set.annotations.insert("@odata.contained".into(), Value::Bool(true));
        param_elements.insert(SET_ELEMENT.to_string(), set);
        param_def.body.elements = Some(param_elements);

        let mut back = Element::scalar(ASSOCIATION);
        back.target = Some(parameters.clone());
        back.keys = Some(Vec::new());
        original
            .body
            .elements
            .get_or_insert_with(Elements::new)
            .insert(PARAMETERS_ELEMENT.to_string(), back);

        graph
            .definitions
            .shift_insert(index, type_entity.clone(), original);
        graph
            .definitions
            .shift_insert(index, parameters.clone(), param_def);

        if let Some(service) = derived.service_of(&name).map(str::to_string) {
            derived.service_of.insert(parameters.clone(), service.clone());
            derived.service_of.insert(type_entity.clone(), service);
        }
        redirect_associations(graph, derived, &name, &parameters, &type_entity);
        trace!(entity = %name, "parameterized entity split");
        derived.param_entities.insert(
            name,
            ParamSplit {
                parameters,
                type_entity,
            },
        );
    }
}

fn redirect_associations(
    graph: &mut SchemaGraph,
    derived: &mut Derived,
    original: &str,
    parameters: &str,
    type_entity: &str,
) {
    for (def_name, def) in graph.definitions.iter_mut() {
        if let Some(ref mut elements) = def.body.elements {
            redirect_in(elements, def_name, &mut Vec::new(), original, parameters, type_entity, derived);
        }
    }
}

fn redirect_in(
    elements: &mut Elements,
    def_name: &str,
    prefix: &mut Vec<String>,
    original: &str,
    parameters: &str,
    type_entity: &str,
    derived: &mut Derived,
) {
    for (name, element) in elements.iter_mut() {
        prefix.push(name.clone());
        if element.target.as_deref() == Some(original) {
            element.target = Some(parameters.to_string());
            derived
                .original_targets
                .insert(ElementId::new(def_name, prefix), type_entity.to_string());
        } else if let Some(ref mut nested) = element.elements {
            redirect_in(nested, def_name, prefix, original, parameters, type_entity, derived);
        }
        prefix.pop();
    }
}

/// Decide once per entity whether it gets an entity set, a singleton, or
/// neither.
pub fn decide_entity_sets(
    graph: &SchemaGraph,
    derived: &mut Derived,
    options: &Options,
) -> Result<(), InternalError> {
    for name in service_entities(graph, derived) {
        let Some(def) = graph.definition(&name) else {
            return Err(InternalError::MissingDefinition(name));
        };
        let service = derived.service_of(&name).unwrap_or_default().to_string();
        let split_origin = derived
            .param_entities
            .iter()
            .find(|(_, split)| split.parameters == name)
            .map(|(origin, _)| origin.clone());

        let placement = if derived.is_containee(&name) {
            Placement::None
        } else {
            let set_name = service_local_name(split_origin.as_deref().unwrap_or(&name), &service);
            let nullable = def.has_flag("@odata.singleton.nullable");
            if options.is_v4() && (def.has_flag("@odata.singleton") || nullable) {
                Placement::Singleton {
                    name: set_name,
                    nullable,
                }
            } else {
                Placement::Set { name: set_name }
            }
        };
        trace!(entity = %name, placement = ?placement, "entity set decided");
        derived.place(&name, placement)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::{containment, services};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn prepare(value: Value, options: &Options) -> (SchemaGraph, Derived, Messages) {
        let mut graph: SchemaGraph = serde_json::from_value(value).unwrap();
        let mut derived = Derived::default();
        let mut messages = Messages::new();
        services::assign_services(&graph, options, &mut derived, &mut messages);
        split_parameterized(&mut graph, &mut derived, &mut messages);
        containment::build(&graph, &mut derived, options);
        decide_entity_sets(&graph, &mut derived, options).unwrap();
        (graph, derived, messages)
    }

    fn model() -> Value {
        json!({"definitions": {
            "S": {"kind": "service"},
            "S.Sales": {"kind": "entity",
                "params": {"year": {"type": "cds.Integer"}},
                "elements": {
                    "id": {"key": true, "type": "cds.Integer"},
                    "amount": {"type": "cds.Decimal"}
                }},
            "S.Report": {"kind": "entity", "elements": {
                "id": {"key": true, "type": "cds.Integer"},
                "sales": {"type": "cds.Association", "target": "S.Sales"}
            }},
            "S.Config": {"kind": "entity", "@odata.singleton": true, "elements": {
                "id": {"key": true, "type": "cds.Integer"}
            }}
        }})
    }

    #[test]
    fn splits_parameterized_entity() {
        let (graph, derived, messages) = prepare(model(), &Options::default());
        assert!(!messages.has_errors());
        let names: Vec<&String> = graph.definitions.keys().collect();
        assert_eq!(
            names,
            vec!["S", "S.SalesParameters", "S.SalesType", "S.Report", "S.Config"]
        );

        let params = graph.definitions["S.SalesParameters"].elements().unwrap();
        assert!(params["year"].key);
        assert_eq!(params["year"].not_null, Some(true));
        assert_eq!(params["Set"].target.as_deref(), Some("S.SalesType"));
        assert!(params["Set"].is_contained());

        let result = &graph.definitions["S.SalesType"];
        assert!(result.params.is_empty());
        assert_eq!(
            result.elements().unwrap()["Parameters"].target.as_deref(),
            Some("S.SalesParameters")
        );

        let redirected = ElementId::top("S.Report", "sales");
        assert_eq!(
            graph.definitions["S.Report"].elements().unwrap()["sales"].target.as_deref(),
            Some("S.SalesParameters")
        );
        assert_eq!(derived.original_targets[&redirected], "S.SalesType");
    }

    #[test]
    fn entity_set_decisions() {
        let (_, derived, _) = prepare(model(), &Options::default());
        assert_eq!(
            derived.placement("S.SalesParameters"),
            &Placement::Set { name: "Sales".into() }
        );
        assert_eq!(derived.placement("S.SalesType"), &Placement::None);
        assert_eq!(derived.placement("S.Report"), &Placement::Set { name: "Report".into() });
        assert_eq!(
            derived.placement("S.Config"),
            &Placement::Singleton { name: "Config".into(), nullable: false }
        );

        let (_, derived, _) = prepare(model(), &Options::v2());
        assert_eq!(derived.placement("S.Config"), &Placement::Set { name: "Config".into() });
    }

    #[test]
    fn type_half_has_its_own_set_without_containment() {
        let (_, derived, _) = prepare(model(), &Options::v2());
        assert!(!derived.is_containee("S.SalesType"));
        assert_eq!(
            derived.placement("S.SalesType"),
            &Placement::Set { name: "SalesType".into() }
        );
        assert_eq!(
            derived.placement("S.SalesParameters"),
            &Placement::Set { name: "Sales".into() }
        );
    }
}
