//! Foreign key materialization for managed associations.
//!
//! Every managed association `a` with key reference `k` gets a sibling
//! element `a_k` typed like the referenced target element. Structured keys
//! and keys that are managed associations themselves are expanded to their
//! scalar leaves (`a_k_x`). Generated elements carry [`FOREIGN_KEY_MARKER`]
//! with the association name, so a second run reuses them.

use std::collections::HashSet;

use tracing::trace;

use crate::derived::{Derived, ElementId, ForeignKey};
use crate::messages::Messages;
use crate::types::*;

use super::effective_keys;

/// A scalar leaf reached from one key reference.
#[derive(Debug, Clone)]
struct Leaf {
    /// Name relative to the association (`k`, `k_x`, `k_b_id`).
    name: String,
    /// Path of the referenced element in the target.
    principal: Vec<String>,
    element: Element,
}

struct Planned {
    definition: String,
    association: Vec<String>,
    keys: Vec<(usize, Leaf)>,
}

pub fn materialize(graph: &mut SchemaGraph, derived: &mut Derived, messages: &mut Messages) {
    let plans = plan(graph, derived);
    for planned in plans {
        apply(graph, derived, planned, messages);
    }
}

fn plan(graph: &SchemaGraph, derived: &Derived) -> Vec<Planned> {
    let mut plans = Vec::new();
    for (name, def) in &graph.definitions {
        if !matches!(def.kind, DefinitionKind::Entity | DefinitionKind::Type)
            || derived.defective.contains(name)
        {
            continue;
        }
        if let Some(elements) = def.elements() {
            plan_elements(graph, name, elements, &mut Vec::new(), &mut plans);
        }
    }
    plans
}

/// Associations inside anonymous structures get their foreign keys next to
/// them. Named structured types are handled as definitions of their own.
fn plan_elements(
    graph: &SchemaGraph,
    definition: &str,
    elements: &Elements,
    prefix: &mut Vec<String>,
    plans: &mut Vec<Planned>,
) {
    for (name, element) in elements {
        prefix.push(name.clone());
        if element.is_managed() && !element.is_ignored() {
            let id = ElementId::new(definition, prefix);
            let mut visited = HashSet::new();
            visited.insert(id.clone());
            let mut keys = Vec::new();
            if let Some(target) = element.target.as_deref() {
                for (index, key) in effective_keys(graph, element).iter().enumerate() {
                    let leaves = key_leaves(graph, target, &key.path, key.name_part(), &mut visited);
                    keys.extend(leaves.into_iter().map(|leaf| (index, leaf)));
                }
            }
            plans.push(Planned {
                definition: definition.to_string(),
                association: prefix.clone(),
                keys,
            });
        } else if let Some(ref nested) = element.elements {
            plan_elements(graph, definition, nested, prefix, plans);
        }
        prefix.pop();
    }
}

fn key_leaves(
    graph: &SchemaGraph,
    target: &str,
    path: &[String],
    name: String,
    visited: &mut HashSet<ElementId>,
) -> Vec<Leaf> {
    let Some(elements) = graph.definition(target).and_then(|d| d.elements()) else {
        return Vec::new();
    };
    let Some(element) = graph.element_at(elements, path) else {
        return Vec::new();
    };

    if element.is_managed() {
        let id = ElementId::new(target, path);
        // a cycle through key associations is reported by the key path pass
        if !visited.insert(id.clone()) {
            return Vec::new();
        }
        let mut out = Vec::new();
        if let Some(next) = element.target.as_deref() {
            let own = id.name().to_string();
            for key in effective_keys(graph, element) {
                for leaf in key_leaves(graph, next, &key.path, key.name_part(), visited) {
                    out.push(Leaf {
                        name: format!("{name}_{}", leaf.name),
                        principal: id.sibling(&format!("{own}_{}", leaf.name)),
                        element: leaf.element,
                    });
                }
            }
        }
        visited.remove(&id);
        return out;
    }
    if element.is_association() {
        return Vec::new();
    }

    if let Some(nested) = graph.structure_of(element) {
        let mut out = Vec::new();
        for sub in nested.keys() {
            let mut sub_path = path.to_vec();
            sub_path.push(sub.clone());
            out.extend(key_leaves(graph, target, &sub_path, format!("{name}_{sub}"), visited));
        }
        return out;
    }

    vec![Leaf {
        name,
        principal: path.to_vec(),
        element: element.clone(),
    }]
}

fn apply(graph: &mut SchemaGraph, derived: &mut Derived, planned: Planned, messages: &mut Messages) {
    let Planned {
        definition,
        association,
        keys,
    } = planned;
    let Some((assoc_name, parent)) = association.split_last() else {
        return;
    };
    let Some(def) = graph.definitions.get_mut(&definition) else {
        return;
    };
    let Some(elements) = elements_at_mut(&mut def.body, parent) else {
        return;
    };
    let Some(mut position) = elements.get_index_of(assoc_name) else {
        return;
    };
    let Some(assoc) = elements.get(assoc_name).cloned() else {
        return;
    };

    let mut generated = Vec::new();
    let mut first_names: Vec<Option<String>> = Vec::new();
    for (index, leaf) in keys {
        let name = format!("{assoc_name}_{}", leaf.name);
        match elements.get(&name) {
            Some(existing) if existing.foreign_key_of() == Some(assoc_name.as_str()) => {
                trace!(definition = %definition, element = %name, "foreign key reused");
            }
            Some(_) => {
                messages.error(
                    "odata-duplicate-name",
                    Location::definition(&definition).elements(&association),
                    &[("name", name.as_str()), ("kind", "element")],
                );
                continue;
            }
            None => {
                position += 1;
                let fk = foreign_key_element(&assoc, assoc_name, &leaf.element);
                elements.shift_insert(position, name.clone(), fk);
                trace!(definition = %definition, element = %name, "foreign key generated");
            }
        }
        if first_names.len() <= index {
            first_names.resize(index + 1, None);
        }
        if first_names[index].is_none() {
            first_names[index] = Some(name.clone());
        }
        generated.push(ForeignKey {
            name,
            principal: leaf.principal,
        });
    }

    // Remember the generated name on the key references.
    if let Some(refs) = elements.get_mut(assoc_name).and_then(|a| a.keys.as_mut()) {
        for (index, key) in refs.iter_mut().enumerate() {
            if key.generated_field_name.is_none() {
                key.generated_field_name = first_names.get(index).cloned().flatten();
            }
        }
    }

    derived
        .foreign_keys
        .insert(ElementId::new(&definition, &association), generated);
}

fn foreign_key_element(assoc: &Element, assoc_name: &str, target: &Element) -> Element {
    let mut element = Element {
        type_name: target.type_name.clone(),
        key: assoc.key,
        not_null: assoc.not_null,
        elements: None,
        items: None,
        enum_values: target.enum_values.clone(),
        target: None,
        keys: None,
        on: None,
        cardinality: None,
        length: target.length,
        precision: target.precision,
        scale: target.scale.clone(),
        srid: target.srid,
        default: None,
        annotations: Annotations::new(),
    };
    element.annotations.insert(
        FOREIGN_KEY_MARKER.to_string(),
        serde_json::Value::String(assoc_name.to_string()),
    );
    if assoc.is_ignored() {
        element
            .annotations
            .insert("@cds.api.ignore".into(), serde_json::Value::Bool(true));
    }
    element
}

/// Elements of the anonymous structure at `path` below `body`.
pub(crate) fn elements_at_mut<'a>(body: &'a mut Element, path: &[String]) -> Option<&'a mut Elements> {
    let mut current = body.elements.as_mut()?;
    for segment in path {
        current = current.get_mut(segment)?.elements.as_mut()?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::passes::services;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn run(value: serde_json::Value) -> (SchemaGraph, Derived, Messages) {
        let mut graph: SchemaGraph = serde_json::from_value(value).unwrap();
        let mut derived = Derived::default();
        let mut messages = Messages::new();
        services::assign_services(&graph, &Options::default(), &mut derived, &mut messages);
        materialize(&mut graph, &mut derived, &mut messages);
        (graph, derived, messages)
    }

    fn element_names(graph: &SchemaGraph, def: &str) -> Vec<String> {
        graph.definitions[def].elements().unwrap().keys().cloned().collect()
    }

    #[test]
    fn generates_foreign_keys_after_association() {
        let (graph, derived, _) = run(json!({"definitions": {
            "S": {"kind": "service"},
            "S.Author": {"kind": "entity", "elements": {
                "id": {"key": true, "type": "cds.Integer"},
                "region": {"key": true, "type": "cds.String", "length": 3}
            }},
            "S.Book": {"kind": "entity", "elements": {
                "id": {"key": true, "type": "cds.Integer"},
                "author": {"type": "cds.Association", "target": "S.Author"},
                "title": {"type": "cds.String"}
            }}
        }}));
        assert_eq!(
            element_names(&graph, "S.Book"),
            vec!["id", "author", "author_id", "author_region", "title"]
        );
        let fk = &graph.definitions["S.Book"].elements().unwrap()["author_region"];
        assert_eq!(fk.type_name.as_deref(), Some("cds.String"));
        assert_eq!(fk.length, Some(3));
        assert_eq!(fk.foreign_key_of(), Some("author"));

        let fks = &derived.foreign_keys[&ElementId::top("S.Book", "author")];
        assert_eq!(fks.len(), 2);
        assert_eq!(fks[1].principal, vec!["region".to_string()]);
    }

    #[test]
    fn expands_structured_and_association_keys() {
        let (graph, derived, _) = run(json!({"definitions": {
            "S.Country": {"kind": "entity", "elements": {
                "code": {"key": true, "type": "cds.String"}
            }},
            "S.Region": {"kind": "entity", "elements": {
                "country": {"key": true, "type": "cds.Association", "target": "S.Country"},
                "nr": {"key": true, "elements": {"major": {"type": "cds.Integer"}, "minor": {"type": "cds.Integer"}}}
            }},
            "S.Shop": {"kind": "entity", "elements": {
                "region": {"type": "cds.Association", "target": "S.Region", "keys": [{"ref": ["country"]}, {"ref": ["nr"], "as": "number"}]}
            }}
        }}));
        assert_eq!(
            element_names(&graph, "S.Shop"),
            vec!["region", "region_country_code", "region_number_major", "region_number_minor"]
        );
        let fks = &derived.foreign_keys[&ElementId::top("S.Shop", "region")];
        assert_eq!(fks[0].principal, vec!["country_code".to_string()]);
        assert_eq!(fks[1].principal, vec!["nr".to_string(), "major".to_string()]);
        // the target's own key association got its foreign key as well
        assert_eq!(element_names(&graph, "S.Region"), vec!["country", "country_code", "nr"]);
        assert!(graph.definitions["S.Region"].elements().unwrap()["country_code"].key);
    }

    #[test]
    fn reuses_generated_and_rejects_foreign_names() {
        let (graph, _, messages) = run(json!({"definitions": {
            "S.T": {"kind": "entity", "elements": {"id": {"key": true, "type": "cds.UUID"}}},
            "S.A": {"kind": "entity", "elements": {
                "t": {"type": "cds.Association", "target": "S.T"},
                "t_id": {"type": "cds.UUID", "@odata.foreignKey4": "t"}
            }},
            "S.B": {"kind": "entity", "elements": {
                "t": {"type": "cds.Association", "target": "S.T"},
                "t_id": {"type": "cds.String"}
            }}
        }}));
        assert_eq!(element_names(&graph, "S.A"), vec!["t", "t_id"]);
        assert_eq!(messages.count("odata-duplicate-name"), 1);
    }

    #[test]
    fn self_referencing_key_terminates() {
        let (graph, derived, _) = run(json!({"definitions": {
            "S.Node": {"kind": "entity", "elements": {
                "parent": {"key": true, "type": "cds.Association", "target": "S.Node"}
            }}
        }}));
        assert_eq!(element_names(&graph, "S.Node"), vec!["parent"]);
        assert!(derived.foreign_keys[&ElementId::top("S.Node", "parent")].is_empty());
    }
}
