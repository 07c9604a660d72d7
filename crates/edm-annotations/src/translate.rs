//! Walk every annotation carrier of every compiled service and translate its
//! vocabulary annotations into targeted EDM annotation nodes.

use std::collections::HashSet;

use edm_core::derived::{ElementId, Placement, Proxy};
use edm_core::output::Operation;
use edm_core::passes::service_local_name;
use edm_core::{
    local_name, Annotations, Compilation, Definition, DefinitionKind, Element, Elements, Location, Messages,
};
use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::group::{group_annotations, Namespaces};
use crate::output::{AnnotationResult, ServiceAnnotations, VocabularyUsage};
use crate::placement::{Carrier, ContainerChild};
use crate::shortcuts::Shortcuts;
use crate::values::{Dropped, ValueTranslator};
use crate::vocabulary::Vocabulary;

/// Translate the annotations of all services of `compilation`.
pub fn translate_annotations(compilation: &Compilation, vocabulary: &Vocabulary) -> AnnotationResult {
    let shortcuts = Shortcuts::default();
    let mut usage = VocabularyUsage::default();
    let mut messages = Messages::new();
    let mut services = IndexMap::new();

    for service in &compilation.derived.services {
        let mut translator = ServiceTranslator {
            compilation,
            vocabulary,
            shortcuts: &shortcuts,
            service,
            out: ServiceAnnotations::new(compilation.options.odata_version),
            usage: &mut usage,
            messages: &mut messages,
        };
        translator.run();
        let out = translator.out;
        debug!(
            service = %service,
            targets = out.targets.len(),
            "annotations translated"
        );
        services.insert(service.clone(), out);
    }

    let references = usage.references(vocabulary);
    AnnotationResult {
        services,
        vocabularies: usage,
        references,
        messages,
    }
}

struct ServiceTranslator<'a> {
    compilation: &'a Compilation,
    vocabulary: &'a Vocabulary,
    shortcuts: &'a Shortcuts,
    service: &'a str,
    out: ServiceAnnotations,
    usage: &'a mut VocabularyUsage,
    messages: &'a mut Messages,
}

impl ServiceTranslator<'_> {
    fn run(&mut self) {
        let compilation = self.compilation;
        let service = self.service;
        let derived = &compilation.derived;

        for (name, def) in &compilation.graph.definitions {
            if name == service && def.kind == DefinitionKind::Service {
                let carrier = Carrier::Service {
                    name: service.to_string(),
                };
                self.annotate(&carrier, def.annotations(), &Location::definition(name));
                continue;
            }
            if derived.service_of(name) != Some(service)
                || def.has_flag("@cds.api.ignore")
                || derived.defective.contains(name)
            {
                continue;
            }
            let local = service_local_name(name, service);
            match def.kind {
                DefinitionKind::Entity => self.entity(name, def, &local),
                DefinitionKind::Type => self.structured_type(name, def, &local),
                DefinitionKind::Action | DefinitionKind::Function => {
                    let is_function = def.kind == DefinitionKind::Function;
                    let operation = self.operation(&local, is_function);
                    let (overload, import) = if compilation.options.is_v2() {
                        (None, Some(format!("{service}.EntityContainer/{local}")))
                    } else {
                        let function = format!("{service}.{local}");
                        let overload = overload_signature(&function, None, operation, is_function);
                        (Some(overload), Some(format!("{service}.EntityContainer/{local}")))
                    };
                    self.callable(def, Location::definition(name), overload, import, is_function);
                }
                _ => {}
            }
        }

        for proxy in derived.proxies.for_service(service) {
            self.proxy(proxy);
        }
    }

    fn entity(&mut self, name: &str, def: &Definition, local: &str) {
        let service = self.service;
        let qualified = format!("{service}.{local}");
        let container_child = match self.compilation.derived.placement(name) {
            Placement::Set { name: set } => Some(ContainerChild {
                path: format!("{service}.EntityContainer/{set}"),
                singleton: false,
            }),
            Placement::Singleton { name: set, .. } => Some(ContainerChild {
                path: format!("{service}.EntityContainer/{set}"),
                singleton: true,
            }),
            Placement::None => None,
        };
        let carrier = Carrier::Entity {
            type_name: qualified.clone(),
            container_child,
        };
        let location = Location::definition(name);
        self.annotate(&carrier, def.annotations(), &location);
        if let Some(elements) = def.elements() {
            self.elements(name, &qualified, elements, &mut Vec::new(), &mut HashSet::new());
        }

        let is_v2 = self.compilation.options.is_v2();
        for (action_name, action) in &def.actions {
            if action.has_flag("@cds.api.ignore") {
                continue;
            }
            let is_function = action.kind == DefinitionKind::Function;
            let (overload, import) = if is_v2 {
                let import = format!("{local}_{action_name}");
                (None, Some(format!("{service}.EntityContainer/{import}")))
            } else {
                let operation = self.operation(action_name, is_function);
                let function = format!("{service}.{action_name}");
                (
                    Some(overload_signature(&function, Some(&qualified), operation, is_function)),
                    None,
                )
            };
            self.callable(action, location.clone().action(action_name), overload, import, is_function);
        }
    }

    /// Named structured types are complex types in structured mode; in flat
    /// mode their elements live on the entities using them.
    fn structured_type(&mut self, name: &str, def: &Definition, local: &str) {
        let Some(elements) = def.elements() else {
            trace!(definition = %name, "scalar type has no annotation target");
            return;
        };
        if self.compilation.options.is_flat() {
            return;
        }
        let qualified = format!("{}.{local}", self.service);
        let carrier = Carrier::Type {
            type_name: qualified.clone(),
            structured: true,
        };
        self.annotate(&carrier, def.annotations(), &Location::definition(name));
        self.elements(name, &qualified, elements, &mut Vec::new(), &mut HashSet::new());
    }

    fn proxy(&mut self, proxy: &Proxy) {
        let qualified = format!("{}.{}", proxy.schema, local_name(&proxy.target));
        let carrier = Carrier::Entity {
            type_name: qualified.clone(),
            container_child: None,
        };
        let location = Location::definition(&proxy.target);
        self.annotate(&carrier, proxy.definition.annotations(), &location);
        if let Some(elements) = proxy.definition.elements() {
            self.elements(&proxy.target, &qualified, elements, &mut Vec::new(), &mut HashSet::new());
        }
    }

    /// Annotations of the (possibly nested) elements of one structure.
    fn elements(
        &mut self,
        definition: &str,
        owner: &str,
        elements: &Elements,
        path: &mut Vec<String>,
        entered: &mut HashSet<String>,
    ) {
        let compilation = self.compilation;
        let options = &compilation.options;
        let separator = options.path_separator();
        for (name, element) in elements {
            if element.is_ignored() {
                continue;
            }
            path.push(name.clone());
            let location = Location::definition(definition).elements(path);
            if element.is_association() {
                let id = ElementId::new(definition, path);
                if compilation.derived.muted.contains(&id) {
                    trace!(element = %id, "muted association skipped");
                } else {
                    let carrier = element_carrier(owner, path.join(separator), true);
                    self.annotate(&carrier, &element.annotations, &location);
                }
            } else if let Some(nested) = nested_structure(compilation, element) {
                if options.is_flat() {
                    trace!(element = %location, "annotations of flattened structure dropped");
                } else {
                    let carrier = element_carrier(owner, path.join(separator), false);
                    self.annotate(&carrier, &element.annotations, &location);
                }
                let guard = element.type_name.clone().filter(|_| element.elements.is_none());
                if guard.as_ref().map_or(true, |t| entered.insert(t.clone())) {
                    self.elements(definition, owner, nested, path, entered);
                    if let Some(type_name) = guard {
                        entered.remove(&type_name);
                    }
                }
            } else {
                let carrier = element_carrier(owner, path.join(separator), false);
                self.annotate(&carrier, &element.annotations, &location);
            }
            path.pop();
        }
    }

    fn callable(
        &mut self,
        def: &Definition,
        location: Location,
        overload: Option<String>,
        import: Option<String>,
        is_function: bool,
    ) {
        let target = overload.clone().or_else(|| import.clone());
        let carrier = Carrier::Callable {
            overload,
            import,
            is_function,
            v2: self.compilation.options.is_v2(),
        };
        self.annotate(&carrier, def.annotations(), &location);
        let Some(callable) = target else {
            return;
        };
        for (name, param) in &def.params {
            if param.is_ignored() {
                continue;
            }
            let carrier = Carrier::Parameter {
                callable: callable.clone(),
                name: name.clone(),
            };
            self.annotate(&carrier, &param.annotations, &location.clone().param(name));
        }
    }

    /// Rendered operation of this service by name.
    fn operation(&self, name: &str, is_function: bool) -> Option<&Operation> {
        let schema = self.compilation.model.services.get(self.service)?.schema()?;
        if is_function {
            schema.functions.get(name)
        } else {
            schema.actions.get(name)
        }
    }

    fn annotate(&mut self, carrier: &Carrier, annotations: &Annotations, location: &Location) {
        let compilation = self.compilation;
        let mut merged = annotations.clone();
        if let Some(extra) = compilation.derived.extra_annotations.get(location) {
            for (key, value) in extra {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        if merged.is_empty() {
            return;
        }
        let merged = self.shortcuts.expand(&merged, carrier.kind());
        let namespaces = Namespaces {
            vocabulary: self.vocabulary,
            graph: &compilation.graph,
            options: &compilation.options,
            service: self.service,
        };
        let groups = group_annotations(&merged, &namespaces, location, self.messages);

        // qualified variants of one term share a single report
        let mut inapplicable = HashSet::new();
        for group in groups {
            let term = group.qualified_term();
            let annotation_location = location.clone().annotation(&group.key);
            let Some(target) = carrier.place(self.vocabulary.term(&term)) else {
                if inapplicable.insert(term.clone()) {
                    self.messages.warning(
                        "odata-anno-applicability",
                        annotation_location,
                        &[("term", term.as_str()), ("kind", carrier.kind().describe())],
                    );
                }
                continue;
            };
            let mut values = ValueTranslator::new(
                self.vocabulary,
                &compilation.graph,
                &compilation.options,
                self.usage,
                self.messages,
            );
            match values.node(
                &group.namespace,
                &group.term,
                group.qualifier.as_deref(),
                &group.value,
                &annotation_location,
            ) {
                Ok(node) => self.out.push(&target, node),
                Err(Dropped) => trace!(term = %term, target = %target, "annotation dropped"),
            }
        }
    }
}

/// Nested elements walked as part of the owner: anonymous structures
/// always, named structured types only when they are flattened.
fn nested_structure<'c>(compilation: &'c Compilation, element: &'c Element) -> Option<&'c Elements> {
    if let Some(ref elements) = element.elements {
        return Some(elements);
    }
    if compilation.options.is_flat() {
        return compilation.graph.structure_of(element);
    }
    None
}

fn element_carrier(owner: &str, path: String, navigation: bool) -> Carrier {
    Carrier::Element {
        owner: owner.to_string(),
        path,
        navigation,
    }
}

/// `S.submit(S.Books)`; functions list every parameter type, actions only
/// the binding parameter.
fn overload_signature(
    function: &str,
    binding: Option<&str>,
    operation: Option<&Operation>,
    is_function: bool,
) -> String {
    let mut types: Vec<String> = binding.map(str::to_string).into_iter().collect();
    if is_function {
        let params = operation
            .into_iter()
            .flat_map(|op| op.parameters.iter())
            .filter(|(name, _)| binding.is_none() || name.as_str() != "in");
        for (_, param) in params {
            types.push(if param.collection {
                format!("Collection({})", param.type_name)
            } else {
                param.type_name.clone()
            });
        }
    }
    format!("{function}({})", types.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{EdmValue, PathKind};
    use edm_core::{compile, Options, SchemaGraph};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn translate(model: Value, options: &Options) -> AnnotationResult {
        let graph: SchemaGraph = serde_json::from_value(model).unwrap();
        let compilation = compile(graph, options).unwrap();
        translate_annotations(&compilation, &Vocabulary::standard().unwrap())
    }

    fn bookshop() -> Value {
        json!({"definitions": {
            "S": {"kind": "service", "@Core.Description": "Book shop"},
            "S.Books": {
                "kind": "entity",
                "@title": "Book",
                "@readonly": true,
                "@Capabilities.SearchRestrictions.Searchable": false,
                "elements": {
                    "ID": {"key": true, "type": "cds.Integer", "@Core.Computed": true},
                    "title": {"type": "cds.String", "@mandatory": true},
                    "price": {"elements": {
                        "amount": {"type": "cds.Decimal", "@Measures.ISOCurrency": {"=": "price.currency"}},
                        "currency": {"type": "cds.String"}
                    }}
                },
                "actions": {
                    "discount": {"kind": "action", "@Core.OperationAvailable": null,
                        "params": {"percent": {"type": "cds.Integer", "@Common.Label": "Percent"}}}
                }
            },
            "S.stock": {"kind": "function", "params": {"id": {"type": "cds.Integer"}},
                "returns": {"type": "cds.Integer"}, "@Common.Label": "Stock"}
        }})
    }

    #[test]
    fn carriers_are_placed_in_v4() {
        let result = translate(bookshop(), &Options::default());
        assert!(result.messages.diagnostics().is_empty(), "{:?}", result.messages.diagnostics());
        let s = result.service("S").unwrap();

        assert!(s.find("S.EntityContainer", "Core.Description").is_some());
        assert_eq!(s.find("S.Books", "Common.Label").unwrap().value, EdmValue::string("Book"));
        assert!(s.find("S.EntityContainer/Books", "Capabilities.SearchRestrictions").is_some());
        assert!(s.find("S.EntityContainer/Books", "Capabilities.InsertRestrictions").is_some());
        assert!(s.find("S.Books/ID", "Core.Computed").is_some());
        assert!(s.find("S.Books/title", "Common.FieldControl").is_some());
        assert_eq!(
            s.find("S.Books/price/amount", "Measures.ISOCurrency").unwrap().value,
            EdmValue::Path {
                kind: PathKind::Path,
                path: "price/currency".into()
            }
        );
        assert_eq!(
            s.find("S.discount(S.Books)", "Core.OperationAvailable").unwrap().value,
            EdmValue::Null
        );
        assert!(s.find("S.discount(S.Books)/percent", "Common.Label").is_some());
        assert!(s.find("S.stock(Edm.Int32)", "Common.Label").is_some());

        let aliases: Vec<&str> = result.vocabularies.iter().collect();
        assert!(aliases.contains(&"Capabilities"));
        assert!(result.references.iter().any(|r| r.alias == "Measures"));
    }

    #[test]
    fn v2_uses_function_imports_and_flat_paths() {
        let result = translate(bookshop(), &Options::v2());
        let s = result.service("S").unwrap();
        assert!(s.find("S.Books/price_amount", "Measures.ISOCurrency").is_some());
        assert!(s.find("S.EntityContainer/Books_discount/percent", "Common.Label").is_some());
        assert!(s.find("S.EntityContainer/stock", "Common.Label").is_some());
        assert!(s.find("S.EntityContainer/Books_discount", "Core.OperationAvailable").is_none());
        assert_eq!(result.messages.count("odata-anno-null"), 1);
    }

    #[test]
    fn inapplicable_terms_are_reported_once() {
        let result = translate(
            json!({"definitions": {
                "S": {"kind": "service"},
                "S.E": {"kind": "entity", "elements": {
                    "id": {"key": true, "type": "cds.Integer",
                        "@UI.LineItem": [{"Value": {"=": "id"}}],
                        "@UI.LineItem#short": [],
                        "@UI.Identification": []}
                }}
            }}),
            &Options::default(),
        );
        let terms: Vec<&str> = result
            .messages
            .diagnostics()
            .iter()
            .filter(|d| d.code == "odata-anno-applicability")
            .map(|d| d.args["term"].as_str())
            .collect();
        assert_eq!(terms, vec!["UI.LineItem", "UI.Identification"]);
        assert!(result.service("S").unwrap().targets.is_empty());
    }

    #[test]
    fn synthesized_annotations_are_translated() {
        let result = translate(
            json!({"definitions": {
                "S": {"kind": "service"},
                "S.Status": {"kind": "type", "type": "cds.String", "enum": {"open": {"val": "O"}, "closed": {}}},
                "S.E": {"kind": "entity", "elements": {
                    "id": {"key": true, "type": "cds.Integer"},
                    "status": {"type": "S.Status", "@assert.range": true}
                }}
            }}),
            &Options::default(),
        );
        let node = result
            .service("S")
            .unwrap()
            .find("S.E/status", "Validation.AllowedValues")
            .unwrap();
        let EdmValue::Collection(ref values) = node.value else {
            panic!("expected a collection");
        };
        assert_eq!(values.len(), 2);
        let EdmValue::Record(ref first) = values[0] else {
            panic!("expected a record");
        };
        assert_eq!(first.annotations[0].term, "Core.SymbolicName");
    }
}
