use tracing::trace;

use crate::derived::{Containee, Derived, ElementId};
use crate::options::Options;
use crate::types::SchemaGraph;

use super::{collect_associations, is_containment_edge, service_entities};

/// Record containee lists, container lists and to-container associations
/// for every entity of the compiled services.
pub fn build(graph: &SchemaGraph, derived: &mut Derived, options: &Options) {
    for container in service_entities(graph, derived) {
        let Some(elements) = graph.definition(&container).and_then(|d| d.elements()) else {
            continue;
        };
        for (path, element) in collect_associations(graph, elements) {
            if !is_containment_edge(element, options) {
                continue;
            }
            let Some(target) = element.target.as_deref() else {
                continue;
            };
            trace!(container = %container, path = %path.join("."), to = %target, "containment edge");
            derived
                .containees
                .entry(container.clone())
                .or_default()
                .push(Containee {
                    path: path.clone(),
                    target: target.to_string(),
                });
            let containers = derived.containers.entry(target.to_string()).or_default();
            if !containers.contains(&container) {
                containers.push(container.clone());
            }

            // up-links of the containee (not for hierarchies: a containment
            // edge back to the container is a down-link of its own)
            let Some(target_elements) = graph.definition(target).and_then(|d| d.elements()) else {
                continue;
            };
            for (back_path, back) in collect_associations(graph, target_elements) {
                if back.target.as_deref() == Some(container.as_str())
                    && !is_containment_edge(back, options)
                {
                    derived.to_container.insert(ElementId::new(target, &back_path));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Messages;
    use crate::passes::services;
    use serde_json::json;

    fn run(value: serde_json::Value, options: &Options) -> Derived {
        let graph: SchemaGraph = serde_json::from_value(value).unwrap();
        let mut derived = Derived::default();
        services::assign_services(&graph, options, &mut derived, &mut Messages::new());
        build(&graph, &mut derived, options);
        derived
    }

    fn model() -> serde_json::Value {
        json!({"definitions": {
            "S": {"kind": "service"},
            "S.Order": {"kind": "entity", "elements": {
                "id": {"key": true, "type": "cds.Integer"},
                "items": {"type": "cds.Composition", "target": "S.Item",
                    "cardinality": {"max": "*"}, "@odata.contained": true}
            }},
            "S.Item": {"kind": "entity", "elements": {
                "id": {"key": true, "type": "cds.Integer"},
                "up_": {"type": "cds.Association", "target": "S.Order"}
            }},
            "S.Folder": {"kind": "entity", "elements": {
                "id": {"key": true, "type": "cds.Integer"},
                "parent": {"type": "cds.Association", "target": "S.Folder"},
                "children": {"type": "cds.Composition", "target": "S.Folder",
                    "cardinality": {"max": "*"}, "@odata.contained": true}
            }}
        }})
    }

    #[test]
    fn records_containers_and_up_links() {
        let derived = run(model(), &Options::default());
        assert_eq!(derived.containers["S.Item"], vec!["S.Order".to_string()]);
        assert_eq!(
            derived.containees["S.Order"],
            vec![Containee { path: vec!["items".into()], target: "S.Item".into() }]
        );
        assert!(derived.to_container.contains(&ElementId::top("S.Item", "up_")));
    }

    #[test]
    fn recursive_hierarchy_terminates() {
        let derived = run(model(), &Options::default());
        assert_eq!(derived.containers["S.Folder"], vec!["S.Folder".to_string()]);
        // parent is the up-link, children is itself a containment edge
        assert!(derived.to_container.contains(&ElementId::top("S.Folder", "parent")));
        assert!(!derived.to_container.contains(&ElementId::top("S.Folder", "children")));
        assert!(!derived.is_transitively_contained("S.Folder"));
    }

    #[test]
    fn compositions_in_containment_mode_and_v2() {
        let mut value = model();
        value["definitions"]["S.Order"]["elements"]["notes"] = json!({
            "type": "cds.Composition", "target": "S.Note", "cardinality": {"max": "*"}
        });
        value["definitions"]["S.Note"] = json!({"kind": "entity", "elements": {"id": {"key": true, "type": "cds.Integer"}}});

        let derived = run(value.clone(), &Options::default());
        assert!(!derived.is_containee("S.Note"));

        let options = Options { odata_containment: true, ..Options::default() };
        let derived = run(value.clone(), &options);
        assert!(derived.is_containee("S.Note"));

        let derived = run(value, &Options::v2());
        assert!(derived.containers.is_empty());
    }
}
