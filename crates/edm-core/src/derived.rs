//! Derived, non-persistent compilation state.
//!
//! Passes never attach hidden markers to the schema graph. Everything they
//! compute lives in the side tables of [`Derived`], keyed by definition name
//! or by [`ElementId`].

use std::collections::{HashMap, HashSet};
use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::messages::InternalError;
use crate::types::{Annotations, Definition, Location};

/// Stable address of an element: owning definition plus member path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ElementId {
    pub definition: String,
    pub path: Vec<String>,
}

impl ElementId {
    pub fn new(definition: &str, path: &[String]) -> Self {
        Self {
            definition: definition.to_string(),
            path: path.to_vec(),
        }
    }

    pub fn top(definition: &str, name: &str) -> Self {
        Self {
            definition: definition.to_string(),
            path: vec![name.to_string()],
        }
    }

    /// Own name of the element (last path segment).
    pub fn name(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// Path of the structure that holds this element.
    pub fn parent_path(&self) -> &[String] {
        &self.path[..self.path.len().saturating_sub(1)]
    }

    /// Path of a sibling element (same parent structure).
    pub fn sibling(&self, name: &str) -> Vec<String> {
        let mut path = self.parent_path().to_vec();
        path.push(name.to_string());
        path
    }

    pub fn location(&self) -> Location {
        Location::definition(&self.definition).elements(&self.path)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.definition, self.path.join("."))
    }
}

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Multiplicity {
    #[serde(rename = "0..1")]
    ZeroOrOne,
    #[serde(rename = "1")]
    One,
    #[serde(rename = "*")]
    Many,
}

impl fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Multiplicity::ZeroOrOne => "0..1",
            Multiplicity::One => "1",
            Multiplicity::Many => "*",
        })
    }
}

/// `[dependent, principal]`: dependent is a path in the association's own
/// definition, principal a path in its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstraintPair {
    pub dependent: Vec<String>,
    pub principal: Vec<String>,
}

impl ConstraintPair {
    pub fn new(dependent: Vec<String>, principal: Vec<String>) -> Self {
        Self {
            dependent,
            principal,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConstraintSet {
    pub pairs: Vec<ConstraintPair>,
    /// Target-side paths of `$self = <assoc>.<path>` comparisons.
    pub self_refs: Vec<Vec<String>>,
    pub term_count: usize,
    /// Only `=`, `and` and parentheses were used in the on-condition.
    pub eligible: bool,
    /// Backlink partner, held only by the association carrying the `$self` term.
    pub partner: Option<ElementId>,
    /// Set on the partner side: the association that claimed this one as partner.
    pub claimed_by: Option<ElementId>,
    pub source_multiplicity: Option<Multiplicity>,
    pub target_multiplicity: Option<Multiplicity>,
    pub finalized: bool,
}

// ---------------------------------------------------------------------------
// Containment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Containee {
    pub path: Vec<String>,
    pub target: String,
}

// ---------------------------------------------------------------------------
// Entity sets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Placement {
    None,
    Set { name: String },
    Singleton { name: String, nullable: bool },
}

impl Placement {
    pub fn name(&self) -> Option<&str> {
        match self {
            Placement::None => None,
            Placement::Set { name } | Placement::Singleton { name, .. } => Some(name),
        }
    }

    pub fn is_singleton(&self) -> bool {
        matches!(self, Placement::Singleton { .. })
    }
}

/// Result of splitting a parameterized entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamSplit {
    pub parameters: String,
    pub type_entity: String,
}

// ---------------------------------------------------------------------------
// Foreign keys
// ---------------------------------------------------------------------------

/// A generated foreign key of a managed association. `name` is a sibling of
/// the association, `principal` the referenced path in the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub name: String,
    pub principal: Vec<String>,
}

// ---------------------------------------------------------------------------
// Proxies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProxyTier {
    /// Managed association: the proxy exposes the target's primary key.
    Keys,
    /// Unmanaged association with one backlink: the partner is exposed as well.
    Backlink,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proxy {
    /// Fully qualified name of the proxied definition (and of the proxy itself).
    pub target: String,
    /// Requesting service.
    pub service: String,
    /// Output schema the proxy is rendered into.
    pub schema: String,
    pub tier: ProxyTier,
    pub definition: Definition,
    /// Structured types cloned for the proxy's keys, by qualified name.
    pub exposed_types: IndexMap<String, Definition>,
    pub containees: Vec<Containee>,
    pub key_paths: Vec<KeyPath>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ProxyId(pub usize);

/// Proxies keyed by `(target, requesting service)`; a key is registered once.
#[derive(Debug, Clone, Default)]
pub struct ProxyRegistry {
    proxies: Vec<Proxy>,
    index: HashMap<(String, String), ProxyId>,
}

impl ProxyRegistry {
    pub fn lookup(&self, target: &str, service: &str) -> Option<ProxyId> {
        self.index
            .get(&(target.to_string(), service.to_string()))
            .copied()
    }

    /// Register a proxy unless one already exists for its key.
    /// Returns the id and whether a new entry was created.
    pub fn register(&mut self, proxy: Proxy) -> (ProxyId, bool) {
        let key = (proxy.target.clone(), proxy.service.clone());
        if let Some(id) = self.index.get(&key) {
            return (*id, false);
        }
        let id = ProxyId(self.proxies.len());
        self.proxies.push(proxy);
        self.index.insert(key, id);
        (id, true)
    }

    pub fn get(&self, id: ProxyId) -> &Proxy {
        &self.proxies[id.0]
    }

    pub fn get_mut(&mut self, id: ProxyId) -> &mut Proxy {
        &mut self.proxies[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Proxy> {
        self.proxies.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Proxy> {
        self.proxies.iter_mut()
    }

    pub fn for_service<'a>(&'a self, service: &'a str) -> impl Iterator<Item = &'a Proxy> + 'a {
        self.proxies.iter().filter(move |p| p.service == service)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Key paths and navigation bindings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyPath {
    /// Element path in the entity (`["id", "a"]`).
    pub path: Vec<String>,
    /// Rendered reference: `id/a` (structured) or `id_a` (flat).
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigationBinding {
    pub path: String,
    pub target: String,
}

// ---------------------------------------------------------------------------
// Side tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Derived {
    /// Service names in declaration order.
    pub services: Vec<String>,
    /// Definition name → owning service.
    pub service_of: HashMap<String, String>,
    /// Definitions excluded from further passes after a structural error.
    pub defective: HashSet<String>,
    pub foreign_keys: HashMap<ElementId, Vec<ForeignKey>>,
    /// Original entity name → split halves.
    pub param_entities: IndexMap<String, ParamSplit>,
    /// Redirected association → definition holding the true element set.
    pub original_targets: HashMap<ElementId, String>,
    pub constraints: IndexMap<ElementId, ConstraintSet>,
    pub containees: IndexMap<String, Vec<Containee>>,
    pub containers: IndexMap<String, Vec<String>>,
    pub to_container: HashSet<ElementId>,
    pub placements: IndexMap<String, Placement>,
    pub proxies: ProxyRegistry,
    /// Service → referenced services (schema references).
    pub cross_refs: IndexMap<String, IndexSet<String>>,
    /// Associations whose navigation property is not rendered.
    pub muted: HashSet<ElementId>,
    /// Association → proxy its target is represented by.
    pub proxied: HashMap<ElementId, ProxyId>,
    pub key_paths: IndexMap<String, Vec<KeyPath>>,
    pub bindings: IndexMap<String, Vec<NavigationBinding>>,
    /// Annotations synthesized by finishing passes, keyed by carrier location.
    pub extra_annotations: IndexMap<Location, Annotations>,
}

impl Derived {
    pub fn service_of(&self, definition: &str) -> Option<&str> {
        self.service_of.get(definition).map(String::as_str)
    }

    /// Partner of a backlink relation, from either side.
    pub fn partner_of(&self, id: &ElementId) -> Option<&ElementId> {
        let set = self.constraints.get(id)?;
        set.partner.as_ref().or(set.claimed_by.as_ref())
    }

    /// Definition an association's constraints resolve against: the
    /// un-split entity's element carrier when the target was redirected.
    pub fn principal_definition<'a>(&'a self, id: &ElementId, target: &'a str) -> &'a str {
        self.original_targets
            .get(id)
            .map(String::as_str)
            .unwrap_or(target)
    }

    pub fn is_containee(&self, definition: &str) -> bool {
        self.containers
            .get(definition)
            .is_some_and(|c| !c.is_empty())
    }

    /// True if some container chain above `definition` exists. Containment
    /// cycles without an outside root are not considered contained.
    pub fn is_transitively_contained(&self, definition: &str) -> bool {
        !self.container_roots(definition).is_empty()
    }

    /// Containers reachable upwards from `definition` that are not contained
    /// themselves.
    pub fn container_roots(&self, definition: &str) -> Vec<String> {
        let mut roots = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(definition.to_string());
        self.collect_roots(definition, &mut visited, &mut roots);
        roots
    }

    fn collect_roots(&self, definition: &str, visited: &mut HashSet<String>, roots: &mut Vec<String>) {
        let Some(containers) = self.containers.get(definition) else {
            return;
        };
        for container in containers {
            if !visited.insert(container.clone()) {
                continue;
            }
            if self.is_containee(container) {
                self.collect_roots(container, visited, roots);
            } else if !roots.contains(container) {
                roots.push(container.clone());
            }
            visited.remove(container);
        }
    }

    /// Record the entity set decision for `definition`; decided once.
    pub fn place(&mut self, definition: &str, placement: Placement) -> Result<(), InternalError> {
        if self.placements.contains_key(definition) {
            return Err(InternalError::DuplicatePlacement(definition.to_string()));
        }
        self.placements.insert(definition.to_string(), placement);
        Ok(())
    }

    pub fn placement(&self, definition: &str) -> &Placement {
        self.placements.get(definition).unwrap_or(&Placement::None)
    }

    pub fn add_extra_annotation(&mut self, location: Location, key: &str, value: serde_json::Value) {
        self.extra_annotations
            .entry(location)
            .or_default()
            .insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DefinitionKind;

    fn proxy(target: &str, service: &str) -> Proxy {
        Proxy {
            target: target.into(),
            service: service.into(),
            schema: "S2".into(),
            tier: ProxyTier::Keys,
            definition: Definition::new(DefinitionKind::Entity),
            exposed_types: IndexMap::new(),
            containees: Vec::new(),
            key_paths: Vec::new(),
        }
    }

    #[test]
    fn proxy_registry_is_idempotent_per_key() {
        let mut registry = ProxyRegistry::default();
        let (a, created_a) = registry.register(proxy("S2.B", "S1"));
        let (b, created_b) = registry.register(proxy("S2.B", "S1"));
        let (c, created_c) = registry.register(proxy("S2.B", "S3"));
        assert!(created_a);
        assert!(!created_b);
        assert!(created_c);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup("S2.B", "S3"), Some(c));
    }

    #[test]
    fn placement_is_decided_once() {
        let mut derived = Derived::default();
        derived
            .place("S.E", Placement::Set { name: "E".into() })
            .unwrap();
        assert_eq!(
            derived.place("S.E", Placement::None),
            Err(InternalError::DuplicatePlacement("S.E".into()))
        );
        assert_eq!(derived.placement("S.Other"), &Placement::None);
    }

    #[test]
    fn container_roots_terminate_on_cycles() {
        let mut derived = Derived::default();
        derived.containers.insert("S.A".into(), vec!["S.B".into()]);
        derived.containers.insert("S.B".into(), vec!["S.A".into()]);
        derived.containers.insert("S.C".into(), vec!["S.C".into(), "S.Root".into()]);
        assert!(derived.container_roots("S.A").is_empty());
        assert_eq!(derived.container_roots("S.C"), vec!["S.Root".to_string()]);
        assert!(derived.is_transitively_contained("S.C"));
    }

    #[test]
    fn partner_is_symmetric() {
        let mut derived = Derived::default();
        let item = ElementId::top("S.Order", "item");
        let order = ElementId::top("S.OrderItem", "order");
        derived.constraints.insert(
            item.clone(),
            ConstraintSet {
                partner: Some(order.clone()),
                ..ConstraintSet::default()
            },
        );
        derived.constraints.insert(
            order.clone(),
            ConstraintSet {
                claimed_by: Some(item.clone()),
                ..ConstraintSet::default()
            },
        );
        let partner = derived.partner_of(&item).unwrap().clone();
        assert_eq!(derived.partner_of(&partner), Some(&item));
    }
}
