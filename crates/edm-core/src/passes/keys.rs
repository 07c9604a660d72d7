use std::collections::HashSet;

use tracing::trace;

use crate::catalogs::is_key_type;
use crate::derived::{Derived, ElementId, KeyPath};
use crate::messages::Messages;
use crate::options::Options;
use crate::types::*;

use super::service_entities;

/// Compute the rendered key paths of every service entity and proxy.
pub fn compute(graph: &SchemaGraph, derived: &mut Derived, options: &Options, messages: &mut Messages) {
    for entity in service_entities(graph, derived) {
        let paths = key_paths(graph, derived, &entity, options, messages);
        trace!(entity = %entity, keys = paths.len(), "key paths");
        derived.key_paths.insert(entity, paths);
    }

    // Proxies share the key structure of their target; problems with it are
    // reported where the target itself is compiled.
    let requests: Vec<(String, HashSet<String>)> = derived
        .proxies
        .iter()
        .map(|p| {
            let present = p
                .definition
                .elements()
                .map(|e| e.keys().cloned().collect())
                .unwrap_or_default();
            (p.target.clone(), present)
        })
        .collect();
    let computed: Vec<Vec<KeyPath>> = requests
        .iter()
        .map(|(target, present)| {
            key_paths(graph, derived, target, options, &mut Messages::new())
                .into_iter()
                .filter(|k| k.path.first().is_some_and(|first| present.contains(first)))
                .collect()
        })
        .collect();
    for (proxy, paths) in derived.proxies.iter_mut().zip(computed) {
        proxy.key_paths = paths;
    }
}

/// Key paths of `definition` in declaration order. Generated foreign keys
/// are reached through their association, never on their own.
pub fn key_paths(
    graph: &SchemaGraph,
    derived: &Derived,
    definition: &str,
    options: &Options,
    messages: &mut Messages,
) -> Vec<KeyPath> {
    let Some(elements) = graph.definition(definition).and_then(|d| d.elements()) else {
        return Vec::new();
    };
    let mut walk = KeyWalk {
        graph,
        derived,
        definition,
        elements,
        options,
        messages,
        out: Vec::new(),
    };
    for (name, element) in elements {
        if !element.key || element.is_ignored() || element.is_foreign_key() {
            continue;
        }
        let start = ElementId::top(definition, name);
        walk.visit(&start, vec![name.clone()], element);
    }
    walk.out
}

struct KeyWalk<'a, 'm> {
    graph: &'a SchemaGraph,
    derived: &'a Derived,
    definition: &'a str,
    elements: &'a Elements,
    options: &'a Options,
    messages: &'m mut Messages,
    out: Vec<KeyPath>,
}

impl KeyWalk<'_, '_> {
    fn visit(&mut self, start: &ElementId, path: Vec<String>, element: &Element) {
        let location = Location::definition(self.definition).elements(&path);
        let name = path.join(".");

        if element.is_many() {
            self.messages
                .error("odata-key-many", location, &[("name", name.as_str())]);
            return;
        }
        if element.not_null == Some(false) {
            self.messages
                .error("odata-key-null", location, &[("name", name.as_str())]);
            return;
        }

        if element.is_association() {
            if !element.is_managed() {
                self.messages
                    .error("odata-key-unmanaged", location, &[("name", name.as_str())]);
                return;
            }
            let id = ElementId::new(self.definition, &path);
            if revisits(self.graph, start, element, &mut HashSet::new()) {
                let start_name = start.path.join(".");
                self.messages.error(
                    "odata-key-recursive",
                    location,
                    &[("name", start_name.as_str()), ("assoc", name.as_str())],
                );
                return;
            }
            let foreign_keys = self.derived.foreign_keys.get(&id).cloned().unwrap_or_default();
            for fk in foreign_keys {
                let fk_path = id.sibling(&fk.name);
                if let Some(fk_element) = self.graph.element_at(self.elements, &fk_path) {
                    self.visit(start, fk_path, fk_element);
                }
            }
            return;
        }

        if let Some(nested) = self.graph.structure_of(element) {
            for (sub, sub_element) in nested {
                if sub_element.is_association() || sub_element.is_ignored() {
                    continue;
                }
                let mut sub_path = path.clone();
                sub_path.push(sub.clone());
                self.visit(start, sub_path, sub_element);
            }
            return;
        }

        let builtin = self
            .graph
            .resolve_scalar(element)
            .map(|s| s.builtin)
            .or_else(|| element.type_name.clone())
            .unwrap_or_default();
        if !is_key_type(&builtin, self.options.odata_version) {
            self.messages.error(
                "odata-key-type",
                location,
                &[("name", name.as_str()), ("type", builtin.as_str())],
            );
            return;
        }
        self.out.push(render(path, self.options));
    }
}

/// True if following the key associations of `element` leads back to `start`.
fn revisits(
    graph: &SchemaGraph,
    start: &ElementId,
    element: &Element,
    visited: &mut HashSet<ElementId>,
) -> bool {
    let Some(target) = element.target.as_deref() else {
        return false;
    };
    let Some(elements) = graph.definition(target).and_then(|d| d.elements()) else {
        return false;
    };
    for (name, key) in elements {
        if !key.key || !key.is_managed() || key.is_ignored() {
            continue;
        }
        let id = ElementId::top(target, name);
        if id == *start {
            return true;
        }
        if visited.insert(id) && revisits(graph, start, key, visited) {
            return true;
        }
    }
    false
}

fn render(path: Vec<String>, options: &Options) -> KeyPath {
    if options.is_structured() {
        let alias = (path.len() > 1).then(|| path.last().cloned()).flatten();
        KeyPath {
            name: path.join("/"),
            path,
            alias,
        }
    } else {
        KeyPath {
            name: path.join("_"),
            path,
            alias: None,
        }
    }
}
