//! Navigation across schema boundaries.
//!
//! An association whose target is not part of the source's service is
//! either muted, kept as a reference into the target service's schema, or
//! redirected to a proxy: a minimal entity type carrying the target's keys
//! (and for backlinks the partner association), rendered into a schema of
//! the requesting service named after the target's namespace.

use std::collections::HashSet;

use serde_json::Value;
use tracing::trace;

use crate::derived::{Containee, Derived, ElementId, Proxy, ProxyId, ProxyTier};
use crate::messages::Messages;
use crate::options::Options;
use crate::types::*;

use super::{collect_associations, effective_keys, is_containment_edge, service_entities};

const NAVIGATION_RESTRICTIONS: &str = "@Capabilities.NavigationRestrictions";

pub fn generate(graph: &SchemaGraph, derived: &mut Derived, options: &Options, messages: &mut Messages) {
    for entity in service_entities(graph, derived) {
        let Some(service) = derived.service_of(&entity).map(str::to_string) else {
            continue;
        };
        let Some(elements) = graph.definition(&entity).and_then(|d| d.elements()) else {
            continue;
        };
        for (path, element) in collect_associations(graph, elements) {
            if element.is_ignored() || !element.is_navigable() {
                continue;
            }
            let Some(target) = element.target.as_deref() else {
                continue;
            };
            let target_service = derived.service_of(target).map(str::to_string);
            if target_service.as_deref() == Some(service.as_str()) {
                continue;
            }
            let id = ElementId::new(&entity, &path);

            let opted_out = graph
                .definition(target)
                .map_or(true, |t| t.has_flag("@cds.api.ignore"));
            if opted_out {
                trace!(association = %id, "target opted out, navigation muted");
                derived.muted.insert(id);
                continue;
            }

            if let Some(other) = target_service.filter(|_| options.x_service_refs_enabled()) {
                trace!(association = %id, service = %other, "schema reference");
                derived
                    .cross_refs
                    .entry(service.clone())
                    .or_default()
                    .insert(other);
                continue;
            }

            let tier = if options.proxies_enabled() {
                resolvable_tier(graph, derived, &id, element)
            } else {
                None
            };
            let Some(tier) = tier else {
                let name = id.path.join(".");
                messages.warning(
                    "odata-navigation",
                    id.location(),
                    &[
                        ("name", name.as_str()),
                        ("target", target),
                        ("service", service.as_str()),
                    ],
                );
                derived.muted.insert(id);
                continue;
            };

            let partner = match tier {
                ProxyTier::Backlink => derived.constraints.get(&id).and_then(|c| c.partner.clone()),
                ProxyTier::Keys => None,
            };
            match request_proxy(graph, derived, target, &service, tier, partner.as_ref()) {
                Some(proxy) => {
                    trace!(association = %id, to = %target, "redirected to proxy");
                    derived.proxied.insert(id, proxy);
                }
                None => {
                    let name = id.path.join(".");
                    messages.info(
                        "odata-proxy-tier",
                        id.location(),
                        &[("name", name.as_str()), ("target", target)],
                    );
                    derived.muted.insert(id);
                }
            }
        }
    }
}

/// Managed associations with keys need only the target's keys; unmanaged
/// ones need an established backlink partner.
fn resolvable_tier(
    graph: &SchemaGraph,
    derived: &Derived,
    id: &ElementId,
    element: &Element,
) -> Option<ProxyTier> {
    if element.is_managed() {
        return (!effective_keys(graph, element).is_empty()).then_some(ProxyTier::Keys);
    }
    derived
        .constraints
        .get(id)
        .and_then(|c| c.partner.as_ref())
        .map(|_| ProxyTier::Backlink)
}

/// Proxy for `target` in `service`, created on first request. The empty
/// shell is registered before its keys are cloned, so key associations that
/// lead back to `target` find it.
fn request_proxy(
    graph: &SchemaGraph,
    derived: &mut Derived,
    target: &str,
    service: &str,
    tier: ProxyTier,
    partner: Option<&ElementId>,
) -> Option<ProxyId> {
    if let Some(existing) = derived.proxies.lookup(target, service) {
        if derived.proxies.get(existing).tier != tier {
            return None;
        }
        if let Some(partner) = partner {
            expose_partner(graph, derived, existing, partner);
        }
        return Some(existing);
    }
    let original = graph.definition(target)?;

    let schema = namespace_of(target).to_string();
    let mut definition = Definition::new(DefinitionKind::Entity);
    definition.body.annotations = original
        .annotations()
        .iter()
        .filter(|(key, _)| is_annotation_key(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    definition.body.elements = Some(Elements::new());
    let (id, _) = derived.proxies.register(Proxy {
        target: target.to_string(),
        service: service.to_string(),
        schema: schema.clone(),
        tier,
        definition,
        exposed_types: Default::default(),
        containees: Vec::new(),
        key_paths: Vec::new(),
    });
    trace!(to = %target, service = %service, tier = ?tier, "proxy created");

    let mut elements = Elements::new();
    let mut exposed = Vec::new();
    if let Some(target_elements) = original.elements() {
        let proxy_name = local_name(target);
        for (name, element) in target_elements {
            if !element.key || element.is_ignored() {
                continue;
            }
            if element.is_association() {
                if keep_key_association(graph, derived, element, service) {
                    elements.insert(name.clone(), element.clone());
                }
                continue;
            }
            if let Some(nested) = graph.structure_of(element) {
                let type_name = format!("{schema}.{proxy_name}_{name}");
                clone_structure(graph, nested, &type_name, &mut exposed, &mut HashSet::new());
                let mut key = Element::scalar(&type_name);
                key.key = true;
                key.not_null = Some(true);
                key.annotations = element.annotations.clone();
                elements.insert(name.clone(), key);
                continue;
            }
            let mut key = element.clone();
            key.not_null = Some(true);
            elements.insert(name.clone(), key);
        }
    }

    let proxy = derived.proxies.get_mut(id);
    proxy.definition.body.elements = Some(elements);
    proxy.exposed_types.extend(exposed);
    if let Some(partner) = partner {
        expose_partner(graph, derived, id, partner);
    }
    Some(id)
}

/// A key association of a proxied entity stays if its own target is in the
/// requesting service or can be proxied in turn.
fn keep_key_association(graph: &SchemaGraph, derived: &mut Derived, element: &Element, service: &str) -> bool {
    if !element.is_managed() {
        return false;
    }
    let Some(next) = element.target.as_deref() else {
        return false;
    };
    if derived.service_of(next) == Some(service) {
        return true;
    }
    request_proxy(graph, derived, next, service, ProxyTier::Keys, None).is_some()
}

/// Clone a key structure into a fresh type; members become non-null and
/// nested structures get types of their own (`<type>_<member>`).
fn clone_structure(
    graph: &SchemaGraph,
    elements: &Elements,
    type_name: &str,
    exposed: &mut Vec<(String, Definition)>,
    visited: &mut HashSet<String>,
) {
    if !visited.insert(type_name.to_string()) {
        return;
    }
    let mut cloned = Elements::new();
    for (name, element) in elements {
        if element.is_ignored() || element.is_association() {
            continue;
        }
        if let Some(nested) = graph.structure_of(element) {
            let sub_type = format!("{type_name}_{name}");
            clone_structure(graph, nested, &sub_type, exposed, visited);
            let mut member = Element::scalar(&sub_type);
            member.not_null = Some(true);
            member.annotations = element.annotations.clone();
            cloned.insert(name.clone(), member);
        } else {
            let mut member = element.clone();
            member.key = false;
            member.not_null = Some(true);
            cloned.insert(name.clone(), member);
        }
    }
    let mut definition = Definition::new(DefinitionKind::Type);
    definition.body.elements = Some(cloned);
    exposed.push((type_name.to_string(), definition));
}

/// Backlink proxies carry the partner association (still pointing into the
/// requesting service) together with its foreign keys.
fn expose_partner(graph: &SchemaGraph, derived: &mut Derived, id: ProxyId, partner: &ElementId) {
    let [name] = partner.path.as_slice() else {
        return;
    };
    let Some(source) = graph.definition(&partner.definition).and_then(|d| d.elements()) else {
        return;
    };
    let Some(association) = source.get(name) else {
        return;
    };
    let foreign_keys: Vec<String> = derived
        .foreign_keys
        .get(partner)
        .map(|fks| fks.iter().map(|fk| fk.name.clone()).collect())
        .unwrap_or_default();

    let proxy = derived.proxies.get_mut(id);
    let Some(elements) = proxy.definition.body.elements.as_mut() else {
        return;
    };
    if !elements.contains_key(name) {
        elements.insert(name.clone(), association.clone());
    }
    for fk in foreign_keys {
        if let Some(element) = source.get(&fk) {
            if !elements.contains_key(&fk) {
                elements.insert(fk, element.clone());
            }
        }
    }
}

/// Runs once every proxy exists: recompute containment for proxies and
/// drop navigation restrictions on properties a proxy does not have.
pub fn finish(derived: &mut Derived, options: &Options) {
    for proxy in derived.proxies.iter_mut() {
        let Some(elements) = proxy.definition.body.elements.as_ref() else {
            continue;
        };
        proxy.containees = elements
            .iter()
            .filter(|(_, e)| is_containment_edge(e, options))
            .filter_map(|(name, e)| {
                Some(Containee {
                    path: vec![name.clone()],
                    target: e.target.clone()?,
                })
            })
            .collect();
        let navigable: HashSet<String> = elements
            .iter()
            .filter(|(_, e)| e.is_association())
            .map(|(name, _)| name.clone())
            .collect();
        prune_navigation_restrictions(&mut proxy.definition.body.annotations, &navigable);
    }
}

fn prune_navigation_restrictions(annotations: &mut Annotations, navigable: &HashSet<String>) {
    if let Some(Value::Object(restrictions)) = annotations.get_mut(NAVIGATION_RESTRICTIONS) {
        if let Some(Value::Array(entries)) = restrictions.get_mut("RestrictedProperties") {
            entries.retain(|entry| restricts_present(entry, navigable));
        }
    }
    let flat = format!("{NAVIGATION_RESTRICTIONS}.RestrictedProperties");
    if let Some(Value::Array(entries)) = annotations.get_mut(&flat) {
        entries.retain(|entry| restricts_present(entry, navigable));
    }
}

fn restricts_present(entry: &Value, navigable: &HashSet<String>) -> bool {
    let path = match entry.get("NavigationProperty") {
        Some(Value::String(path)) => Some(path.as_str()),
        Some(Value::Object(object)) => object
            .get("=")
            .or_else(|| object.get("$NavigationPropertyPath"))
            .and_then(Value::as_str),
        _ => None,
    };
    match path {
        Some(path) => path
            .split(['.', '/'])
            .next()
            .is_some_and(|first| navigable.contains(first)),
        None => true,
    }
}
