use std::collections::HashSet;

use tracing::trace;

use crate::derived::{Derived, ElementId, Multiplicity, NavigationBinding};
use crate::messages::Messages;
use crate::options::Options;
use crate::types::*;

use super::constraints::target_multiplicity;
use super::{collect_associations, is_containment_edge, service_entities, service_local_name};

/// Navigation property bindings of every entity set and singleton. Paths
/// run through containment edges until they reach an entity that owns a
/// set of its own.
pub fn compute(graph: &SchemaGraph, derived: &mut Derived, options: &Options, messages: &mut Messages) {
    for root in service_entities(graph, derived) {
        if derived.placement(&root).name().is_none() {
            continue;
        }
        let Some(service) = derived.service_of(&root).map(str::to_string) else {
            continue;
        };
        let mut walk = BindingWalk {
            graph,
            derived,
            options,
            service: &service,
            visited: HashSet::from([root.clone()]),
            bindings: Vec::new(),
            messages: &mut *messages,
        };
        walk.visit(&root, &[]);
        let bindings = walk.bindings;
        if !bindings.is_empty() {
            trace!(root = %root, bindings = bindings.len(), "navigation bindings");
            derived.bindings.insert(root, bindings);
        }
    }
}

struct BindingWalk<'a> {
    graph: &'a SchemaGraph,
    derived: &'a Derived,
    options: &'a Options,
    service: &'a str,
    visited: HashSet<String>,
    bindings: Vec<NavigationBinding>,
    messages: &'a mut Messages,
}

impl BindingWalk<'_> {
    fn visit(&mut self, definition: &str, prefix: &[String]) {
        let Some(elements) = self.graph.definition(definition).and_then(|d| d.elements()) else {
            return;
        };
        for (path, element) in collect_associations(self.graph, elements) {
            if element.is_ignored() || !element.is_navigable() {
                continue;
            }
            let id = ElementId::new(definition, &path);
            if self.derived.muted.contains(&id) || self.derived.proxied.contains_key(&id) {
                continue;
            }
            let Some(target) = element.target.as_deref() else {
                continue;
            };
            let mut hops = prefix.to_vec();
            hops.push(path.join(self.options.path_separator()));

            if is_containment_edge(element, self.options) {
                if self.visited.insert(target.to_string()) {
                    self.visit(target, &hops);
                    self.visited.remove(target);
                }
                continue;
            }

            let Some((set, singleton)) = self.container_child(target) else {
                continue;
            };
            let nav_path = hops.join("/");
            if singleton && target_multiplicity(self.derived, &id, element) == Multiplicity::Many {
                self.messages.error(
                    "odata-nav-binding-singleton",
                    id.location(),
                    &[("name", nav_path.as_str()), ("target", set.as_str())],
                );
                continue;
            }
            self.bindings.push(NavigationBinding {
                path: nav_path,
                target: set,
            });
        }
    }

    /// Container child representing `target`, qualified with the target's
    /// container when it lives in a referenced service.
    fn container_child(&self, target: &str) -> Option<(String, bool)> {
        let target_service = self.derived.service_of(target)?;
        let placement = self.derived.placement(target);
        if target_service == self.service {
            return placement
                .name()
                .map(|name| (name.to_string(), placement.is_singleton()));
        }
        let referenced = self
            .derived
            .cross_refs
            .get(self.service)
            .is_some_and(|refs| refs.contains(target_service));
        if !referenced {
            return None;
        }
        let name = match placement.name() {
            Some(name) => name.to_string(),
            None => service_local_name(target, target_service),
        };
        Some((
            format!("{target_service}.EntityContainer/{name}"),
            placement.is_singleton(),
        ))
    }
}
