use tracing::trace;

use crate::derived::Derived;
use crate::messages::Messages;
use crate::options::Options;
use crate::types::*;

/// Assign every definition to the service with the longest matching name
/// prefix and select the services to compile.
pub fn assign_services(
    graph: &SchemaGraph,
    options: &Options,
    derived: &mut Derived,
    messages: &mut Messages,
) {
    let all_services: Vec<&String> = graph
        .definitions
        .iter()
        .filter(|(_, def)| def.kind == DefinitionKind::Service)
        .map(|(name, _)| name)
        .collect();

    for requested in &options.service_names {
        if !all_services.iter().any(|s| *s == requested) {
            messages.error(
                "odata-unknown-service",
                Location::root(),
                &[("name", requested.as_str())],
            );
        }
    }

    derived.services = all_services
        .iter()
        .filter(|s| {
            options.service_names.is_empty()
                || options.service_names.iter().any(|n| n.as_str() == s.as_str())
        })
        .map(|s| s.to_string())
        .collect();

    for name in graph.definitions.keys() {
        let owner = all_services
            .iter()
            .filter(|s| {
                name.starts_with(s.as_str()) && name[s.len()..].starts_with('.')
            })
            .max_by_key(|s| s.len());
        if let Some(service) = owner {
            trace!(definition = %name, service = %service, "service member");
            derived.service_of.insert(name.clone(), service.to_string());
        }
    }
}

/// Structural checks for definitions of compiled services: unresolved
/// association targets, arrays of arrays and associations as array items.
/// A definition with such an error is excluded from the following passes.
pub fn check_structure(graph: &SchemaGraph, derived: &mut Derived, messages: &mut Messages) {
    for (name, def) in &graph.definitions {
        let in_scope = derived
            .service_of(name)
            .is_some_and(|s| derived.services.iter().any(|c| c == s));
        if !in_scope {
            continue;
        }

        let before = messages.errors().count();
        let location = Location::definition(name);
        if let Some(elements) = def.elements() {
            check_elements(graph, elements, &location, messages);
        }
        for (param_name, param) in &def.params {
            check_element(graph, param_name, param, &location.clone().param(param_name), messages);
        }
        for (action_name, action) in &def.actions {
            for (param_name, param) in &action.params {
                let loc = location.clone().action(action_name).param(param_name);
                check_element(graph, param_name, param, &loc, messages);
            }
        }
        if messages.errors().count() > before {
            derived.defective.insert(name.clone());
        }
    }
}

fn check_elements(graph: &SchemaGraph, elements: &Elements, location: &Location, messages: &mut Messages) {
    for (name, element) in elements {
        check_element(graph, name, element, &location.clone().element(name), messages);
    }
}

fn check_element(
    graph: &SchemaGraph,
    name: &str,
    element: &Element,
    location: &Location,
    messages: &mut Messages,
) {
    if element.is_ignored() {
        return;
    }

    // odata-unresolved-target
    if element.is_association() {
        match element.target.as_deref() {
            Some(target) if graph.definition(target).is_some() => {}
            target => messages.error(
                "odata-unresolved-target",
                location.clone(),
                &[("name", name), ("target", target.unwrap_or("<none>"))],
            ),
        }
        return;
    }

    if let Some(ref items) = element.items {
        // odata-nested-array
        if items.items.is_some() {
            messages.error("odata-nested-array", location.clone(), &[("name", name)]);
        }
        // odata-assoc-in-array
        if items.is_association() {
            messages.error("odata-assoc-in-array", location.clone(), &[("name", name)]);
        }
        if let Some(ref nested) = items.elements {
            check_elements(graph, nested, location, messages);
        }
        return;
    }

    if let Some(ref nested) = element.elements {
        check_elements(graph, nested, location, messages);
    }
}
