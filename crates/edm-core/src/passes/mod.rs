//! Pass orchestration.
//!
//! Passes run in a fixed order over the whole definition set; each reads
//! the side tables filled by earlier ones. A diagnostic raised for one
//! definition never stops the pass for the remaining definitions.

pub mod constraints;
pub mod containment;
pub mod finalize;
pub mod foreign_keys;
pub mod keys;
pub mod navigation;
pub mod params;
pub mod proxies;
pub mod services;

use std::collections::HashSet;

use tracing::debug;

use crate::derived::Derived;
use crate::messages::{InternalError, Messages};
use crate::options::Options;
use crate::types::{Element, Elements, ForeignKeyRef, SchemaGraph};

/// Run every pass over `graph`. User-facing problems are recorded in
/// `messages`; only invariant violations end the run early.
pub fn run(
    graph: &mut SchemaGraph,
    options: &Options,
    messages: &mut Messages,
) -> Result<Derived, InternalError> {
    let mut derived = Derived::default();

    services::assign_services(graph, options, &mut derived, messages);
    services::check_structure(graph, &mut derived, messages);
    debug!(
        services = derived.services.len(),
        defective = derived.defective.len(),
        "service membership"
    );

    foreign_keys::materialize(graph, &mut derived, messages);
    debug!(associations = derived.foreign_keys.len(), "foreign keys materialized");

    params::split_parameterized(graph, &mut derived, messages);
    debug!(split = derived.param_entities.len(), "parameterized entities split");

    constraints::initialize(graph, &mut derived, messages)?;
    debug!(associations = derived.constraints.len(), "constraints initialized");

    containment::build(graph, &mut derived, options);
    debug!(containers = derived.containees.len(), "containment graph built");

    params::decide_entity_sets(graph, &mut derived, options)?;
    debug!(placements = derived.placements.len(), "entity sets decided");

    proxies::generate(graph, &mut derived, options, messages);
    proxies::finish(&mut derived, options);
    debug!(
        proxies = derived.proxies.len(),
        muted = derived.muted.len(),
        "cross-schema references resolved"
    );

    constraints::finalize(graph, &mut derived, options, messages)?;
    debug!("constraints finalized");

    finalize::synthesize_annotations(graph, &mut derived, options);
    debug!(
        carriers = derived.extra_annotations.len(),
        "finishing annotations"
    );

    keys::compute(graph, &mut derived, options, messages);
    debug!(entities = derived.key_paths.len(), "key paths computed");

    navigation::compute(graph, &mut derived, options, messages);
    debug!(roots = derived.bindings.len(), "navigation bindings computed");

    Ok(derived)
}

// ---------------------------------------------------------------------------
// Shared walkers
// ---------------------------------------------------------------------------

/// Entities of compiled services that survived structural checks, in
/// declaration order.
pub(crate) fn service_entities(graph: &SchemaGraph, derived: &Derived) -> Vec<String> {
    graph
        .definitions
        .iter()
        .filter(|(name, def)| {
            def.is_entity()
                && !def.has_flag("@cds.api.ignore")
                && !derived.defective.contains(*name)
                && derived
                    .service_of(name)
                    .is_some_and(|s| derived.services.iter().any(|c| c == s))
        })
        .map(|(name, _)| name.clone())
        .collect()
}

/// All associations reachable from `elements` without crossing an
/// association, with their member paths. Structured members are entered
/// whether their structure is anonymous or a named type.
pub(crate) fn collect_associations<'a>(
    graph: &'a SchemaGraph,
    elements: &'a Elements,
) -> Vec<(Vec<String>, &'a Element)> {
    let mut out = Vec::new();
    let mut visited: HashSet<&'a str> = HashSet::new();
    walk_associations(graph, elements, &mut Vec::new(), &mut visited, &mut out);
    out
}

fn walk_associations<'a>(
    graph: &'a SchemaGraph,
    elements: &'a Elements,
    prefix: &mut Vec<String>,
    visited: &mut HashSet<&'a str>,
    out: &mut Vec<(Vec<String>, &'a Element)>,
) {
    for (name, element) in elements {
        prefix.push(name.clone());
        if element.is_association() {
            out.push((prefix.clone(), element));
        } else if let Some(nested) = graph.structure_of(element) {
            // guard against structured types that contain themselves
            let named = if element.elements.is_none() {
                element.type_name.as_deref()
            } else {
                None
            };
            match named {
                Some(type_name) if !visited.insert(type_name) => {}
                Some(type_name) => {
                    walk_associations(graph, nested, prefix, visited, out);
                    visited.remove(type_name);
                }
                None => walk_associations(graph, nested, prefix, visited, out),
            }
        }
        prefix.pop();
    }
}

/// Foreign key references of a managed association: its explicit `keys`, or
/// the primary key of the target.
pub(crate) fn effective_keys(graph: &SchemaGraph, association: &Element) -> Vec<ForeignKeyRef> {
    if let Some(ref keys) = association.keys {
        return keys.clone();
    }
    let Some(target) = association
        .target
        .as_deref()
        .and_then(|t| graph.definition(t))
    else {
        return Vec::new();
    };
    target
        .elements()
        .map(|elements| {
            elements
                .iter()
                .filter(|(_, e)| e.key && !e.is_ignored() && !e.is_foreign_key())
                .map(|(name, _)| ForeignKeyRef::new(&[name.as_str()]))
                .collect()
        })
        .unwrap_or_default()
}

/// Name of a definition inside its service (`S.ctx.E` → `ctx_E`).
pub fn service_local_name(definition: &str, service: &str) -> String {
    definition
        .strip_prefix(service)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(definition)
        .replace('.', "_")
}

/// Containment edge under the current options. OData V2 knows no containment.
pub(crate) fn is_containment_edge(element: &Element, options: &Options) -> bool {
    options.is_v4()
        && element.is_association()
        && !element.is_ignored()
        && (element.is_contained() || (options.odata_containment && element.is_composition()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph(value: serde_json::Value) -> SchemaGraph {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn associations_inside_structures_are_found_once() {
        let g = graph(json!({
            "definitions": {
                "S": {"kind": "service"},
                "S.Addr": {"kind": "type", "elements": {
                    "country": {"type": "cds.Association", "target": "S.Country"}
                }},
                "S.Country": {"kind": "entity", "elements": {"code": {"key": true, "type": "cds.String"}}},
                "S.E": {"kind": "entity", "elements": {
                    "id": {"key": true, "type": "cds.Integer"},
                    "home": {"type": "S.Addr"},
                    "inline": {"elements": {"work": {"type": "S.Addr"}}}
                }}
            }
        }));
        let elements = g.definition("S.E").unwrap().elements().unwrap();
        let paths: Vec<Vec<String>> = collect_associations(&g, elements)
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(
            paths,
            vec![
                vec!["home".to_string(), "country".to_string()],
                vec!["inline".to_string(), "work".to_string(), "country".to_string()],
            ]
        );
    }

    #[test]
    fn default_keys_come_from_target() {
        let g = graph(json!({
            "definitions": {
                "S.T": {"kind": "entity", "elements": {
                    "a": {"key": true, "type": "cds.Integer"},
                    "b": {"key": true, "type": "cds.String"},
                    "c": {"type": "cds.String"}
                }}
            }
        }));
        let assoc: Element =
            serde_json::from_value(json!({"type": "cds.Association", "target": "S.T"})).unwrap();
        let keys = effective_keys(&g, &assoc);
        assert_eq!(keys, vec![ForeignKeyRef::new(&["a"]), ForeignKeyRef::new(&["b"])]);
    }

    #[test]
    fn local_names() {
        assert_eq!(service_local_name("S.E", "S"), "E");
        assert_eq!(service_local_name("S.ctx.E", "S"), "ctx_E");
        assert_eq!(service_local_name("other.E", "S"), "other_E");
    }
}
