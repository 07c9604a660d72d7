//! Annotation values: shape dispatch and type checking against the
//! vocabulary dictionary.

use edm_core::catalogs::edm_type;
use edm_core::expr::parse_node;
use edm_core::{ExprNode, Location, Messages, Options, SchemaGraph};
use serde_json::{Map, Value};
use tracing::trace;

use crate::dynamic::DynExpr;
use crate::functions::{check_call, CallCheck};
use crate::group::parse_key;
use crate::output::{AnnotationNode, EdmValue, PathKind, Record, VocabularyUsage};
use crate::vocabulary::{collection_item, Resolved, Vocabulary};

/// The annotation was diagnosed as unusable and must not be emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dropped;

/// CSN expression members that may accompany `=`.
const EXPRESSION_MEMBERS: &[&str] = &["ref", "val", "func", "xpr", "list", "#", "cast"];

pub struct ValueTranslator<'a> {
    pub vocabulary: &'a Vocabulary,
    pub graph: &'a SchemaGraph,
    pub options: &'a Options,
    pub usage: &'a mut VocabularyUsage,
    pub messages: &'a mut Messages,
    /// Annotation being translated, for diagnostics.
    location: Location,
    term: String,
}

impl<'a> ValueTranslator<'a> {
    pub fn new(
        vocabulary: &'a Vocabulary,
        graph: &'a SchemaGraph,
        options: &'a Options,
        usage: &'a mut VocabularyUsage,
        messages: &'a mut Messages,
    ) -> Self {
        Self {
            vocabulary,
            graph,
            options,
            usage,
            messages,
            location: Location::root(),
            term: String::new(),
        }
    }

    /// Build the node for one term. A `$value` object separates the value
    /// from annotations attached to the annotation itself.
    pub fn node(
        &mut self,
        namespace: &str,
        term: &str,
        qualifier: Option<&str>,
        value: &Value,
        location: &Location,
    ) -> Result<AnnotationNode, Dropped> {
        let qualified = format!("{namespace}.{term}");
        let outer_term = std::mem::replace(&mut self.term, qualified.clone());
        let outer_location = std::mem::replace(&mut self.location, location.clone());
        let result = self.term_node(namespace, &qualified, qualifier, value);
        self.term = outer_term;
        self.location = outer_location;
        result
    }

    fn term_node(
        &mut self,
        namespace: &str,
        qualified: &str,
        qualifier: Option<&str>,
        value: &Value,
    ) -> Result<AnnotationNode, Dropped> {
        let expected = self.declared_type(namespace, qualified);
        if self.vocabulary.has_namespace(namespace) {
            self.usage.add(namespace);
        }

        let (inner, nested) = match value.as_object() {
            Some(object) if object.contains_key("$value") => (&object["$value"], Some(object)),
            _ => (value, None),
        };
        let value = self.value(inner, expected.as_deref())?;
        let mut annotations = Vec::new();
        for (key, nested_value) in nested.into_iter().flatten() {
            if key.starts_with('@') {
                if let Some(node) = self.nested(key, nested_value)? {
                    annotations.push(node);
                }
            }
        }
        Ok(AnnotationNode {
            term: qualified.to_string(),
            qualifier: qualifier.map(str::to_string),
            value,
            annotations,
        })
    }

    /// Declared type of a term; unknown terms of known vocabularies are
    /// reported and translated with inferred types.
    fn declared_type(&mut self, namespace: &str, qualified: &str) -> Option<String> {
        if let Some(term) = self.vocabulary.term(qualified) {
            return Some(term.type_name.clone());
        }
        if let Some(element) = self.graph.vocabularies.get(qualified) {
            let builtin = self.graph.resolve_scalar(element)?.builtin;
            let edm = edm_type(&builtin, self.options.odata_version)?.to_string();
            return Some(if element.is_many() {
                format!("Collection({edm})")
            } else {
                edm
            });
        }
        if self.vocabulary.has_namespace(namespace) {
            self.messages.warning(
                "odata-anno-def",
                self.location.clone(),
                &[("term", qualified), ("namespace", namespace)],
            );
        }
        None
    }

    /// Annotation written inside a value (`"@Core.SymbolicName": ...`).
    fn nested(&mut self, key: &str, value: &Value) -> Result<Option<AnnotationNode>, Dropped> {
        let vocabulary = self.vocabulary;
        let Some(parsed) = parse_key(key, |ns| vocabulary.has_namespace(ns)) else {
            trace!(key = %key, "nested annotation outside known vocabularies");
            return Ok(None);
        };
        let location = self.location.clone().annotation(key);
        let node = self.node(parsed.namespace, parsed.term, parsed.qualifier, value, &location)?;
        Ok(Some(node))
    }

    // -----------------------------------------------------------------------
    // Shape dispatch
    // -----------------------------------------------------------------------

    pub fn value(&mut self, value: &Value, expected: Option<&str>) -> Result<EdmValue, Dropped> {
        match value {
            Value::Null => Ok(EdmValue::Null),
            Value::Array(items) => self.collection(items, expected),
            Value::Object(object) => {
                if object.contains_key("=") {
                    self.expression(object, expected)
                } else if let Some(symbol) = object.get("#") {
                    Ok(self.enum_member(symbol, expected))
                } else if let Some(inline) = object.get("$edmJson") {
                    self.inline_expression(inline)
                } else if let Some(inner) = object.get("$value") {
                    self.value(inner, expected)
                } else {
                    self.record(object, expected)
                }
            }
            scalar => Ok(self.primitive(scalar, expected)),
        }
    }

    fn collection(&mut self, items: &[Value], expected: Option<&str>) -> Result<EdmValue, Dropped> {
        let vocabulary = self.vocabulary;
        let item_type = expected.map(|t| collection_item(t).unwrap_or(t));
        if let Some(Resolved::Enum { name, def }) = item_type.map(|t| vocabulary.resolve(t)) {
            if def.is_flags && items.iter().all(|i| i.get("#").is_some()) {
                let members = items
                    .iter()
                    .filter_map(|i| i.get("#"))
                    .map(|symbol| self.qualified_member(name, &def.members, symbol))
                    .collect();
                return Ok(EdmValue::EnumMember(members));
            }
        }
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(self.value(item, item_type)?);
        }
        Ok(EdmValue::Collection(out))
    }

    fn enum_member(&mut self, symbol: &Value, expected: Option<&str>) -> EdmValue {
        let vocabulary = self.vocabulary;
        match expected.map(|t| vocabulary.resolve(t)) {
            Some(Resolved::Enum { name, def }) => {
                EdmValue::EnumMember(vec![self.qualified_member(name, &def.members, symbol)])
            }
            _ => EdmValue::EnumMember(vec![symbol_text(symbol)]),
        }
    }

    fn qualified_member(&mut self, type_name: &str, members: &[String], symbol: &Value) -> String {
        let symbol = symbol_text(symbol);
        if !members.iter().any(|m| *m == symbol) {
            self.messages.warning(
                "odata-anno-enum",
                self.location.clone(),
                &[("value", symbol.as_str()), ("type", type_name)],
            );
        }
        self.usage.add_type(type_name);
        format!("{type_name}/{symbol}")
    }

    fn record(&mut self, object: &Map<String, Value>, expected: Option<&str>) -> Result<EdmValue, Dropped> {
        let vocabulary = self.vocabulary;
        let (base, fallback) = match expected.map(|t| vocabulary.resolve(t)) {
            Some(Resolved::Complex { name, def }) if def.is_abstract => {
                (Some(name), Some(concrete_type(vocabulary, name, object).unwrap_or(name)))
            }
            Some(Resolved::Complex { name, .. }) => (Some(name), Some(name)),
            _ => (None, None),
        };
        let explicit = object.get("$Type").and_then(Value::as_str);
        if let Some(type_name) = explicit {
            if vocabulary.type_def(type_name).is_none() {
                self.messages
                    .warning("odata-anno-type", self.location.clone(), &[("type", type_name)]);
            } else if let Some(base) = base {
                if !vocabulary.derives_from(type_name, base) {
                    self.messages.warning(
                        "odata-anno-value",
                        self.location.clone(),
                        &[("value", type_name), ("type", base), ("term", self.term.as_str())],
                    );
                }
            }
        }
        let type_name = explicit.or(fallback);
        if let Some(t) = type_name {
            self.usage.add_type(t);
        }
        let declared = type_name.filter(|t| vocabulary.type_def(t).is_some());

        let mut record = Record {
            type_name: type_name.map(str::to_string),
            ..Record::default()
        };
        for (key, member) in object {
            if key.starts_with('@') {
                if let Some(node) = self.nested(key, member)? {
                    record.annotations.push(node);
                }
                continue;
            }
            if key.starts_with('$') {
                continue;
            }
            let property_type = declared.and_then(|t| vocabulary.property_type(t, key));
            if let Some(t) = declared {
                if property_type.is_none() && !vocabulary.is_open(t) {
                    self.messages.warning(
                        "odata-anno-property",
                        self.location.clone(),
                        &[("prop", key.as_str()), ("type", t)],
                    );
                }
            }
            let property_type = property_type.map(str::to_string);
            let value = self.value(member, property_type.as_deref())?;
            record.properties.insert(key.clone(), value);
        }
        Ok(EdmValue::Record(record))
    }

    fn primitive(&mut self, value: &Value, expected: Option<&str>) -> EdmValue {
        let literal = literal_type(value);
        let own = EdmValue::Primitive {
            type_name: literal.to_string(),
            value: value.clone(),
        };
        let Some(expected) = expected else {
            return own;
        };
        let resolved = self.vocabulary.resolve(expected);
        let edm = match resolved {
            Resolved::Primitive(edm) => edm,
            Resolved::Unknown(_) => return own,
            Resolved::Enum { .. } | Resolved::Complex { .. } => {
                self.mismatch(value, expected);
                return own;
            }
        };
        if let (Some(kind), Some(path)) = (PathKind::for_type(edm), value.as_str()) {
            return EdmValue::Path {
                kind,
                path: path.to_string(),
            };
        }
        match compatible(edm, value) {
            Some(true) => EdmValue::Primitive {
                type_name: edm.to_string(),
                value: value.clone(),
            },
            Some(false) => {
                self.mismatch(value, expected);
                own
            }
            None => own,
        }
    }

    fn mismatch(&mut self, value: &Value, expected: &str) {
        let shown = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.messages.warning(
            "odata-anno-value",
            self.location.clone(),
            &[("value", shown.as_str()), ("type", expected), ("term", self.term.as_str())],
        );
    }

    // -----------------------------------------------------------------------
    // Paths and expressions
    // -----------------------------------------------------------------------

    fn expression(&mut self, object: &Map<String, Value>, expected: Option<&str>) -> Result<EdmValue, Dropped> {
        let kind = expected
            .map(|t| collection_item(t).unwrap_or(t))
            .and_then(|t| match self.vocabulary.resolve(t) {
                Resolved::Primitive(edm) => PathKind::for_type(edm),
                _ => None,
            })
            .unwrap_or(PathKind::Path);

        if !EXPRESSION_MEMBERS.iter().any(|m| object.contains_key(*m)) {
            let Some(path) = object["="].as_str() else {
                self.mismatch(&object["="], "Edm.Path");
                return Ok(EdmValue::Null);
            };
            return Ok(EdmValue::Path {
                kind,
                path: path_from_dotted(path),
            });
        }

        let mut members = object.clone();
        members.remove("=");
        let expr = serde_json::from_value::<ExprNode>(Value::Object(members))
            .map_err(|e| e.to_string())
            .and_then(|node| parse_node(&node).map_err(|e| e.to_string()))
            .and_then(|expr| {
                DynExpr::from_expr(&expr, self.graph, self.options.odata_version).map_err(|e| e.to_string())
            });
        match expr {
            Ok(DynExpr::Path { path, .. }) => Ok(EdmValue::Path { kind, path }),
            Ok(expr) => self.checked(expr),
            Err(reason) => {
                self.messages
                    .warning("odata-anno-xpr", self.location.clone(), &[("reason", reason.as_str())]);
                Err(Dropped)
            }
        }
    }

    fn inline_expression(&mut self, value: &Value) -> Result<EdmValue, Dropped> {
        match DynExpr::from_json(value) {
            Ok(expr) => self.checked(expr),
            Err(e) => {
                let reason = e.to_string();
                self.messages
                    .warning("odata-anno-xpr", self.location.clone(), &[("reason", reason.as_str())]);
                Err(Dropped)
            }
        }
    }

    /// Version and function checks shared by both expression notations.
    fn checked(&mut self, expr: DynExpr) -> Result<EdmValue, Dropped> {
        if self.options.is_v2() {
            self.messages
                .error("odata-anno-xpr-v2", self.location.clone(), &[("term", self.term.as_str())]);
            return Err(Dropped);
        }
        let mut dropped = false;
        for (function, count) in expr.calls() {
            match check_call(function, count) {
                CallCheck::Canonical => {}
                CallCheck::WrongArity(arity) => {
                    let expected = arity.describe();
                    let given = count.to_string();
                    self.messages.error(
                        "odata-anno-xpr-args",
                        self.location.clone(),
                        &[("func", function), ("expected", expected.as_str()), ("count", given.as_str())],
                    );
                    dropped = true;
                }
                CallCheck::Legacy { replacement } => {
                    self.messages.error(
                        "odata-anno-xpr-unsupported",
                        self.location.clone(),
                        &[("func", function), ("replacement", replacement)],
                    );
                    dropped = true;
                }
                CallCheck::Unknown => {
                    self.messages
                        .warning("odata-anno-xpr-func", self.location.clone(), &[("func", function)]);
                }
            }
        }
        if dropped {
            return Err(Dropped);
        }
        Ok(EdmValue::Expression(expr))
    }
}

/// First concrete subtype of the abstract `base` that declares every member
/// of `object`; records of abstract types are written without `$Type`.
fn concrete_type<'v>(vocabulary: &'v Vocabulary, base: &str, object: &Map<String, Value>) -> Option<&'v str> {
    vocabulary
        .types
        .iter()
        .filter(|(name, def)| !def.is_abstract && vocabulary.derives_from(name, base))
        .find(|(name, _)| {
            object
                .keys()
                .filter(|k| !k.starts_with('@') && !k.starts_with('$'))
                .all(|k| vocabulary.property_type(name, k).is_some())
        })
        .map(|(name, _)| name.as_str())
}

fn symbol_text(symbol: &Value) -> String {
    match symbol {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// EDM type a JSON literal is emitted as when nothing else is known.
fn literal_type(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "Edm.Boolean",
        Value::Number(n) if n.is_f64() => "Edm.Decimal",
        Value::Number(_) => "Edm.Int64",
        _ => "Edm.String",
    }
}

/// Whether a literal fits a primitive type; `None` for abstract types that
/// take anything.
fn compatible(edm: &str, value: &Value) -> Option<bool> {
    Some(match edm {
        "Edm.Boolean" => value.is_boolean(),
        "Edm.Byte" | "Edm.SByte" | "Edm.Int16" | "Edm.Int32" | "Edm.Int64" => value.is_i64() || value.is_u64(),
        "Edm.Decimal" | "Edm.Double" | "Edm.Single" => {
            value.is_number() || value.as_str().is_some_and(|s| s.parse::<f64>().is_ok())
        }
        "Edm.String" | "Edm.Date" | "Edm.DateTimeOffset" | "Edm.TimeOfDay" | "Edm.Duration" | "Edm.Guid"
        | "Edm.Binary" => value.is_string(),
        _ => return None,
    })
}

/// `to_author.name@UI.Hidden` → `to_author/name@UI.Hidden`
fn path_from_dotted(path: &str) -> String {
    match path.split_once('@') {
        Some((head, annotation)) => format!("{}@{annotation}", head.replace('.', "/")),
        None => path.replace('.', "/"),
    }
}
