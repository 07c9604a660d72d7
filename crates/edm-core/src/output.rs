//! Structural EDM output model.
//!
//! One [`ServiceModel`] per compiled service: the service schema, schemas
//! holding proxies in the requesting service, the entity container and
//! references to other services' schemas. Rendering to CSDL JSON or XML is
//! left to the caller.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Serialize;

use crate::catalogs::{edm_type, TYPE_CATALOG};
use crate::derived::{Derived, ElementId, KeyPath, Multiplicity, NavigationBinding, Placement};
use crate::options::Options;
use crate::passes::constraints::{determine_multiplicity, target_multiplicity};
use crate::passes::{is_containment_edge, service_local_name};
use crate::types::*;

// ---------------------------------------------------------------------------
// Model types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EdmModel {
    pub services: IndexMap<String, ServiceModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceModel {
    pub name: String,
    pub schemas: IndexMap<String, Schema>,
    pub container: EntityContainer,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<SchemaReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaReference {
    pub namespace: String,
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub namespace: String,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub entity_types: IndexMap<String, EntityType>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub complex_types: IndexMap<String, ComplexType>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub actions: IndexMap<String, Operation>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub functions: IndexMap<String, Operation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityType {
    pub keys: Vec<KeyPath>,
    pub properties: IndexMap<String, Property>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub navigation_properties: IndexMap<String, NavigationProperty>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexType {
    pub properties: IndexMap<String, Property>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub navigation_properties: IndexMap<String, NavigationProperty>,
}

/// Structural or primitive property, parameter or return type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub collection: bool,
    pub nullable: bool,
    #[serde(flatten)]
    pub facets: TypeFacets,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationProperty {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub collection: bool,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub contains_target: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub referential_constraints: Vec<ReferentialConstraint>,
    pub source_multiplicity: Multiplicity,
    pub target_multiplicity: Multiplicity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferentialConstraint {
    pub property: String,
    pub referenced_property: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub is_bound: bool,
    pub parameters: IndexMap<String, Property>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<Property>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityContainer {
    pub name: String,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub entity_sets: IndexMap<String, EntitySet>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub singletons: IndexMap<String, Singleton>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub action_imports: IndexMap<String, OperationImport>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub function_imports: IndexMap<String, OperationImport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySet {
    pub entity_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub navigation_bindings: Vec<NavigationBinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Singleton {
    #[serde(rename = "type")]
    pub type_name: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub navigation_bindings: Vec<NavigationBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationImport {
    /// Qualified name of the imported operation.
    pub operation: String,
}

impl ServiceModel {
    pub fn schema(&self) -> Option<&Schema> {
        self.schemas.get(&self.name)
    }

    /// Entity type by qualified name, in any schema of the service.
    pub fn entity_type(&self, qualified: &str) -> Option<&EntityType> {
        let (namespace, name) = split_qualified(qualified)?;
        self.schemas.get(namespace)?.entity_types.get(name)
    }

    pub fn complex_type(&self, qualified: &str) -> Option<&ComplexType> {
        let (namespace, name) = split_qualified(qualified)?;
        self.schemas.get(namespace)?.complex_types.get(name)
    }
}

/// Elements of a structured element, including types cloned for a proxy.
fn nested_elements<'x>(
    graph: &'x SchemaGraph,
    exposed: Option<&'x IndexMap<String, Definition>>,
    element: &'x Element,
) -> Option<&'x Elements> {
    if let Some(nested) = graph.structure_of(element) {
        return Some(nested);
    }
    let type_name = element.type_name.as_deref()?;
    exposed?.get(type_name)?.elements()
}

fn split_qualified(qualified: &str) -> Option<(&str, &str)> {
    let pos = qualified.rfind('.')?;
    Some((&qualified[..pos], &qualified[pos + 1..]))
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub fn build_model(graph: &SchemaGraph, derived: &Derived, options: &Options) -> EdmModel {
    let mut model = EdmModel::default();
    for service in &derived.services {
        let builder = ServiceBuilder {
            graph,
            derived,
            options,
            service,
            schemas: IndexMap::new(),
        };
        model.services.insert(service.clone(), builder.build());
    }
    model
}

/// What member rendering needs to know about the structure it renders.
#[derive(Clone, Copy)]
struct Owner<'a> {
    /// Definition element ids are relative to.
    definition: &'a str,
    /// Schema and name prefix of synthesized types for anonymous structures.
    namespace: &'a str,
    type_prefix: &'a str,
    /// Types cloned for a proxy, not present in the graph.
    exposed: Option<&'a IndexMap<String, Definition>>,
}

struct ServiceBuilder<'a> {
    graph: &'a SchemaGraph,
    derived: &'a Derived,
    options: &'a Options,
    service: &'a str,
    schemas: IndexMap<String, Schema>,
}

impl ServiceBuilder<'_> {
    fn build(mut self) -> ServiceModel {
        let service = self.service;
        self.schema_mut(service);
        let mut container = EntityContainer {
            name: "EntityContainer".to_string(),
            ..EntityContainer::default()
        };

        for (name, def) in &self.graph.definitions {
            if self.derived.service_of(name) != Some(service)
                || def.has_flag("@cds.api.ignore")
                || self.derived.defective.contains(name)
            {
                continue;
            }
            let local = service_local_name(name, service);
            match def.kind {
                DefinitionKind::Entity => {
                    self.entity(name, def, &local, &mut container);
                }
                DefinitionKind::Type if def.elements().is_some() && self.options.is_structured() => {
                    let owner = Owner {
                        definition: name,
                        namespace: service,
                        type_prefix: &local,
                        exposed: None,
                    };
                    if let Some(elements) = def.elements() {
                        self.complex_type(owner, service, &local, elements, &[]);
                    }
                }
                DefinitionKind::Action | DefinitionKind::Function => {
                    let owner = Owner {
                        definition: name,
                        namespace: service,
                        type_prefix: &local,
                        exposed: None,
                    };
                    let operation = self.operation(owner, def, None);
                    self.add_operation(def.kind, &local, operation, &mut container, true);
                }
                _ => {}
            }
        }

        self.proxies();

        let references = self
            .derived
            .cross_refs
            .get(service)
            .map(|refs| {
                refs.iter()
                    .map(|other| SchemaReference {
                        namespace: other.clone(),
                        uri: format!("../{other}/$metadata"),
                    })
                    .collect()
            })
            .unwrap_or_default();

        ServiceModel {
            name: service.to_string(),
            schemas: self.schemas,
            container,
            references,
        }
    }

    fn schema_mut(&mut self, namespace: &str) -> &mut Schema {
        self.schemas
            .entry(namespace.to_string())
            .or_insert_with(|| Schema {
                namespace: namespace.to_string(),
                ..Schema::default()
            })
    }

    fn entity(&mut self, name: &str, def: &Definition, local: &str, container: &mut EntityContainer) {
        let service = self.service;
        let owner = Owner {
            definition: name,
            namespace: service,
            type_prefix: local,
            exposed: None,
        };
        let mut entity_type = EntityType {
            keys: self.derived.key_paths.get(name).cloned().unwrap_or_default(),
            ..EntityType::default()
        };
        if let Some(elements) = def.elements() {
            self.members(
                owner,
                elements,
                &mut Vec::new(),
                &mut entity_type.properties,
                &mut entity_type.navigation_properties,
                &mut HashSet::new(),
            );
        }
        self.schema_mut(service)
            .entity_types
            .insert(local.to_string(), entity_type);

        let qualified = format!("{service}.{local}");
        let bindings = self.derived.bindings.get(name).cloned().unwrap_or_default();
        match self.derived.placement(name) {
            Placement::Set { name: set } => {
                container.entity_sets.insert(
                    set.clone(),
                    EntitySet {
                        entity_type: qualified.clone(),
                        navigation_bindings: bindings,
                    },
                );
            }
            Placement::Singleton { name: set, nullable } => {
                container.singletons.insert(
                    set.clone(),
                    Singleton {
                        type_name: qualified.clone(),
                        nullable: *nullable,
                        navigation_bindings: bindings,
                    },
                );
            }
            Placement::None => {}
        }

        for (action_name, action) in &def.actions {
            if action.has_flag("@cds.api.ignore") {
                continue;
            }
            let operation = self.operation(owner, action, Some(&qualified));
            if self.options.is_v2() {
                // V2 knows no bound operations: import under a qualified name
                let import = format!("{local}_{action_name}");
                self.add_operation(action.kind, &import, operation, container, true);
            } else {
                self.add_operation(action.kind, action_name, operation, container, false);
            }
        }
    }

    fn add_operation(
        &mut self,
        kind: DefinitionKind,
        name: &str,
        operation: Operation,
        container: &mut EntityContainer,
        import: bool,
    ) {
        let qualified = format!("{}.{name}", self.service);
        let schema = self.schema_mut(self.service);
        let is_function = kind == DefinitionKind::Function;
        if is_function {
            schema.functions.insert(name.to_string(), operation);
        } else {
            schema.actions.insert(name.to_string(), operation);
        }
        if !import {
            return;
        }
        let entry = OperationImport { operation: qualified };
        if is_function || self.options.is_v2() {
            container.function_imports.insert(name.to_string(), entry);
        } else {
            container.action_imports.insert(name.to_string(), entry);
        }
    }

    fn operation(&mut self, owner: Owner<'_>, def: &Definition, binding: Option<&str>) -> Operation {
        let mut parameters = IndexMap::new();
        if let Some(entity) = binding.filter(|_| self.options.is_v4()) {
            parameters.insert(
                "in".to_string(),
                Property {
                    type_name: entity.to_string(),
                    collection: false,
                    nullable: true,
                    facets: TypeFacets::default(),
                    default: None,
                },
            );
        }
        for (name, param) in &def.params {
            if param.is_ignored() {
                continue;
            }
            let path = vec![name.clone()];
            parameters.insert(name.clone(), self.value_property(owner, param, &path));
        }
        let return_type = def
            .returns
            .as_deref()
            .map(|returns| self.value_property(owner, returns, &["return".to_string()]));
        Operation {
            is_bound: binding.is_some() && self.options.is_v4(),
            parameters,
            return_type,
        }
    }

    // -----------------------------------------------------------------------
    // Members
    // -----------------------------------------------------------------------

    fn members(
        &mut self,
        owner: Owner<'_>,
        elements: &Elements,
        path: &mut Vec<String>,
        properties: &mut IndexMap<String, Property>,
        navigation: &mut IndexMap<String, NavigationProperty>,
        flattening: &mut HashSet<String>,
    ) {
        let separator = self.options.path_separator();
        for (name, element) in elements {
            if element.is_ignored() {
                continue;
            }
            path.push(name.clone());
            let rendered_name = if self.options.is_flat() {
                path.join(separator)
            } else {
                name.clone()
            };
            let flattened = if self.options.is_flat() {
                nested_elements(self.graph, owner.exposed, element)
            } else {
                None
            };
            if element.is_association() {
                let id = ElementId::new(owner.definition, path);
                if let Some(nav) = self.navigation_property(&id, element, owner.exposed.is_some()) {
                    navigation.insert(rendered_name, nav);
                }
            } else if let Some(nested) = flattened {
                // named types are entered once per path to stop recursive structures
                let guard = element.type_name.clone().filter(|_| element.elements.is_none());
                let entered = guard.as_ref().map_or(true, |t| flattening.insert(t.clone()));
                if entered {
                    self.members(owner, nested, path, properties, navigation, flattening);
                    if let Some(type_name) = guard {
                        flattening.remove(&type_name);
                    }
                }
            } else {
                let mut property = self.value_property(owner, element, path);
                if element.key {
                    property.nullable = false;
                }
                properties.insert(rendered_name, property);
            }
            path.pop();
        }
    }

    /// Property for a scalar, structured or arrayed element.
    fn value_property(&mut self, owner: Owner<'_>, element: &Element, path: &[String]) -> Property {
        let nullable = !(element.key || element.not_null == Some(true));
        if let Some(ref items) = element.items {
            let mut property = self.value_property(owner, items, path);
            property.collection = true;
            property.nullable = nullable;
            return property;
        }
        if let Some(type_name) = self.structured_type_name(owner, element, path) {
            return Property {
                type_name,
                collection: false,
                nullable,
                facets: TypeFacets::default(),
                default: None,
            };
        }

        let resolved = self.graph.resolve_scalar(element);
        let builtin = resolved
            .as_ref()
            .map(|s| s.builtin.as_str())
            .unwrap_or("cds.String");
        let mut facets = resolved.as_ref().map(|s| s.facets.clone()).unwrap_or_default();
        if facets.precision.is_none() && self.options.is_v4() {
            facets.precision = TYPE_CATALOG.get(builtin).and_then(|info| info.default_precision);
        }
        let default = match element.default {
            Some(Token::Node(ref node)) => node.val.clone(),
            _ => None,
        };
        Property {
            type_name: edm_type(builtin, self.options.odata_version)
                .unwrap_or("Edm.String")
                .to_string(),
            collection: false,
            nullable,
            facets,
            default,
        }
    }

    /// Qualified complex type for a structured element, rendering it on
    /// first use. `None` for scalar elements.
    fn structured_type_name(&mut self, owner: Owner<'_>, element: &Element, path: &[String]) -> Option<String> {
        if let Some(ref nested) = element.elements {
            let local = format!("{}_{}", owner.type_prefix, path.join("_"));
            self.complex_type(owner, owner.namespace, &local, nested, path);
            return Some(format!("{}.{local}", owner.namespace));
        }
        let type_name = element.type_name.as_deref()?;

        if let Some(exposed) = owner.exposed.and_then(|e| e.get(type_name)) {
            let (namespace, local) = split_qualified(type_name)?;
            let elements = exposed.elements()?;
            let nested_owner = Owner {
                definition: type_name,
                namespace,
                type_prefix: local,
                exposed: owner.exposed,
            };
            self.complex_type(nested_owner, namespace, local, elements, &[]);
            return Some(type_name.to_string());
        }

        let named = self.graph.definition(type_name)?;
        let elements = named.elements()?;
        if self.derived.service_of(type_name) == Some(self.service) {
            // rendered with the service's own definitions
            return Some(format!("{}.{}", self.service, service_local_name(type_name, self.service)));
        }
        let local = type_name.replace('.', "_");
        let service = self.service;
        let nested_owner = Owner {
            definition: type_name,
            namespace: service,
            type_prefix: &local,
            exposed: None,
        };
        self.complex_type(nested_owner, service, &local, elements, &[]);
        Some(format!("{service}.{local}"))
    }

    /// Render a complex type once. A placeholder is stored first so that
    /// recursive structures terminate.
    fn complex_type(&mut self, owner: Owner<'_>, namespace: &str, local: &str, elements: &Elements, path: &[String]) {
        if self.schema_mut(namespace).complex_types.contains_key(local) {
            return;
        }
        self.schema_mut(namespace)
            .complex_types
            .insert(local.to_string(), ComplexType::default());

        let mut complex = ComplexType::default();
        let mut member_path = path.to_vec();
        for (name, element) in elements {
            if element.is_ignored() {
                continue;
            }
            member_path.push(name.clone());
            if element.is_association() {
                let id = ElementId::new(owner.definition, &member_path);
                if let Some(nav) = self.navigation_property(&id, element, owner.exposed.is_some()) {
                    complex.navigation_properties.insert(name.clone(), nav);
                }
            } else {
                let property = self.value_property(owner, element, &member_path);
                complex.properties.insert(name.clone(), property);
            }
            member_path.pop();
        }
        self.schema_mut(namespace)
            .complex_types
            .insert(local.to_string(), complex);
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    fn navigation_property(&self, id: &ElementId, element: &Element, in_proxy: bool) -> Option<NavigationProperty> {
        if self.derived.muted.contains(id) || !element.is_navigable() {
            return None;
        }
        let target = element.target.as_deref()?;
        let type_name = match self.derived.proxied.get(id) {
            Some(proxy) => self.derived.proxies.get(*proxy).target.clone(),
            None => self.target_type(target)?,
        };

        let target_multiplicity = target_multiplicity(self.derived, id, element);
        let source_multiplicity = self
            .derived
            .constraints
            .get(id)
            .and_then(|c| c.source_multiplicity)
            .unwrap_or_else(|| determine_multiplicity(element).0);
        let separator = self.options.path_separator();
        let partner = if in_proxy {
            None
        } else {
            self.derived
                .partner_of(id)
                .filter(|p| !self.derived.muted.contains(*p))
                .map(|p| p.path.join(separator))
        };
        let referential_constraints = self
            .derived
            .constraints
            .get(id)
            .map(|c| {
                c.pairs
                    .iter()
                    .map(|pair| ReferentialConstraint {
                        property: pair.dependent.join(separator),
                        referenced_property: pair.principal.join(separator),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(NavigationProperty {
            type_name,
            collection: target_multiplicity == Multiplicity::Many,
            nullable: target_multiplicity == Multiplicity::ZeroOrOne,
            partner,
            contains_target: is_containment_edge(element, self.options),
            referential_constraints,
            source_multiplicity,
            target_multiplicity,
        })
    }

    /// Qualified entity type an association target is rendered as.
    fn target_type(&self, target: &str) -> Option<String> {
        let target_service = self.derived.service_of(target);
        if target_service == Some(self.service) {
            return Some(format!("{}.{}", self.service, service_local_name(target, self.service)));
        }
        if self.derived.proxies.lookup(target, self.service).is_some() {
            return Some(target.to_string());
        }
        let other = target_service?;
        let referenced = self
            .derived
            .cross_refs
            .get(self.service)
            .is_some_and(|refs| refs.contains(other));
        referenced.then(|| format!("{other}.{}", service_local_name(target, other)))
    }

    // -----------------------------------------------------------------------
    // Proxies
    // -----------------------------------------------------------------------

    fn proxies(&mut self) {
        let derived = self.derived;
        for proxy in derived.proxies.for_service(self.service) {
            let local = local_name(&proxy.target);
            let owner = Owner {
                definition: &proxy.target,
                namespace: &proxy.schema,
                type_prefix: local,
                exposed: Some(&proxy.exposed_types),
            };
            let mut entity_type = EntityType {
                keys: proxy.key_paths.clone(),
                ..EntityType::default()
            };
            if let Some(elements) = proxy.definition.elements() {
                self.members(
                    owner,
                    elements,
                    &mut Vec::new(),
                    &mut entity_type.properties,
                    &mut entity_type.navigation_properties,
                    &mut HashSet::new(),
                );
            }
            self.schema_mut(&proxy.schema)
                .entity_types
                .insert(local.to_string(), entity_type);
        }
    }
}
