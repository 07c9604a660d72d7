use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Annotation-carrying properties of a definition or element (`@ns.term...`).
/// Non-annotation keys that the producer attaches end up here as well and are
/// filtered out by [`is_annotation_key`].
pub type Annotations = IndexMap<String, serde_json::Value>;

pub type Elements = IndexMap<String, Element>;

pub const ASSOCIATION: &str = "cds.Association";
pub const COMPOSITION: &str = "cds.Composition";
/// Marks generated foreign key elements with the name of their association.
pub const FOREIGN_KEY_MARKER: &str = "@odata.foreignKey4";

pub fn is_annotation_key(key: &str) -> bool {
    key.starts_with('@')
}

// ---------------------------------------------------------------------------
// Schema graph (input, deserialized from the producer's JSON)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaGraph {
    #[serde(default)]
    pub definitions: IndexMap<String, Definition>,
    /// User-defined annotation terms (`annotation Foo : String;`).
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vocabularies: IndexMap<String, Element>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    Service,
    Context,
    Entity,
    Type,
    Aspect,
    Action,
    Function,
    Event,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub kind: DefinitionKind,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub params: Elements,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub actions: IndexMap<String, Definition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Box<Element>>,
    #[serde(flatten)]
    pub body: Element,
}

impl Definition {
    pub fn new(kind: DefinitionKind) -> Self {
        Self {
            kind,
            params: IndexMap::new(),
            actions: IndexMap::new(),
            returns: None,
            body: Element::default(),
        }
    }

    pub fn is_entity(&self) -> bool {
        self.kind == DefinitionKind::Entity
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.kind, DefinitionKind::Action | DefinitionKind::Function)
    }

    pub fn elements(&self) -> Option<&Elements> {
        self.body.elements.as_ref()
    }

    pub fn annotations(&self) -> &Annotations {
        &self.body.annotations
    }

    pub fn annotation(&self, key: &str) -> Option<&serde_json::Value> {
        self.body.annotations.get(key)
    }

    pub fn has_flag(&self, key: &str) -> bool {
        self.body.has_flag(key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Element {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub key: bool,
    #[serde(rename = "notNull", default, skip_serializing_if = "Option::is_none")]
    pub not_null: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<Elements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Element>>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<IndexMap<String, EnumValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<ForeignKeyRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<Vec<Token>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<Cardinality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Scale>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Token>,
    #[serde(flatten)]
    pub annotations: Annotations,
}

impl Element {
    pub fn scalar(type_name: &str) -> Self {
        Self {
            type_name: Some(type_name.to_string()),
            ..Self::default()
        }
    }

    pub fn is_association(&self) -> bool {
        self.target.is_some()
            || matches!(self.type_name.as_deref(), Some(ASSOCIATION) | Some(COMPOSITION))
    }

    pub fn is_composition(&self) -> bool {
        self.type_name.as_deref() == Some(COMPOSITION)
    }

    /// Managed associations derive their foreign keys; unmanaged ones carry an on-condition.
    pub fn is_managed(&self) -> bool {
        self.is_association() && self.on.is_none()
    }

    pub fn is_many(&self) -> bool {
        self.items.is_some()
    }

    pub fn has_flag(&self, key: &str) -> bool {
        matches!(self.annotations.get(key), Some(serde_json::Value::Bool(true)))
    }

    /// `@cds.api.ignore: true` removes the element from every rendered artifact.
    pub fn is_ignored(&self) -> bool {
        self.has_flag("@cds.api.ignore")
    }

    pub fn is_navigable(&self) -> bool {
        !matches!(
            self.annotations.get("@odata.navigable"),
            Some(serde_json::Value::Bool(false))
        )
    }

    pub fn is_contained(&self) -> bool {
        self.has_flag("@odata.contained")
    }

    /// Name of the association a generated foreign key belongs to.
    pub fn foreign_key_of(&self) -> Option<&str> {
        self.annotations
            .get(FOREIGN_KEY_MARKER)
            .and_then(serde_json::Value::as_str)
    }

    pub fn is_foreign_key(&self) -> bool {
        self.foreign_key_of().is_some()
    }

    pub fn facets(&self) -> TypeFacets {
        TypeFacets {
            max_length: self.length,
            precision: self.precision,
            scale: self.scale.clone(),
            srid: self.srid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<serde_json::Value>,
    #[serde(flatten)]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    #[serde(rename = "ref")]
    pub path: Vec<String>,
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(
        rename = "$generatedFieldName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub generated_field_name: Option<String>,
}

impl ForeignKeyRef {
    pub fn new(path: &[&str]) -> Self {
        Self {
            path: path.iter().map(|s| s.to_string()).collect(),
            alias: None,
            generated_field_name: None,
        }
    }

    /// Name segment used for the generated foreign key (`as` alias or the joined path).
    pub fn name_part(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.path.join("_"))
    }
}

/// `src`/`srcmin` describe the source side, `min`/`max` the target side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cardinality {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<CardinalityBound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srcmin: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<CardinalityBound>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardinalityBound {
    Count(u32),
    Unbounded,
}

impl CardinalityBound {
    pub fn is_many(self) -> bool {
        match self {
            CardinalityBound::Count(n) => n > 1,
            CardinalityBound::Unbounded => true,
        }
    }
}

impl Serialize for CardinalityBound {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CardinalityBound::Count(n) => serializer.serialize_u32(*n),
            CardinalityBound::Unbounded => serializer.serialize_str("*"),
        }
    }
}

impl<'de> Deserialize<'de> for CardinalityBound {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(u32),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Count(n) => Ok(CardinalityBound::Count(n)),
            Raw::Text(s) if s == "*" => Ok(CardinalityBound::Unbounded),
            Raw::Text(s) => s
                .parse::<u32>()
                .map(CardinalityBound::Count)
                .map_err(|_| serde::de::Error::custom(format!("invalid cardinality \"{s}\""))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scale {
    Fixed(u32),
    /// `"floating"` or `"variable"`
    Named(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeFacets {
    #[serde(rename = "maxLength", default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Scale>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srid: Option<u32>,
}

impl TypeFacets {
    /// Facets set here win; unset ones are taken from `base`.
    pub fn or(self, base: &TypeFacets) -> TypeFacets {
        TypeFacets {
            max_length: self.max_length.or(base.max_length),
            precision: self.precision.or(base.precision),
            scale: self.scale.or_else(|| base.scale.clone()),
            srid: self.srid.or(base.srid),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max_length.is_none()
            && self.precision.is_none()
            && self.scale.is_none()
            && self.srid.is_none()
    }
}

// ---------------------------------------------------------------------------
// Expression tokens (on-conditions, defaults, expression-valued annotations)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Token {
    /// Operators and keywords: `=`, `and`, `(`, `is`, `null`, `case`, ...
    Keyword(String),
    Node(Box<ExprNode>),
}

impl Token {
    pub fn keyword(k: &str) -> Self {
        Token::Keyword(k.to_string())
    }

    pub fn reference(path: &[&str]) -> Self {
        Token::Node(Box::new(ExprNode {
            path: Some(path.iter().map(|s| s.to_string()).collect()),
            ..ExprNode::default()
        }))
    }

    pub fn value(val: serde_json::Value) -> Self {
        Token::Node(Box::new(ExprNode {
            val: Some(val),
            ..ExprNode::default()
        }))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExprNode {
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Token>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpr: Option<Vec<Token>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<Vec<Token>>,
    #[serde(rename = "#", default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cast: Option<CastSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CastSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Scale>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srid: Option<u32>,
}

impl CastSpec {
    pub fn facets(&self) -> TypeFacets {
        TypeFacets {
            max_length: self.length,
            precision: self.precision,
            scale: self.scale.clone(),
            srid: self.srid,
        }
    }
}

// ---------------------------------------------------------------------------
// Graph lookups
// ---------------------------------------------------------------------------

/// A builtin scalar type reached by following derived type definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarType {
    pub builtin: String,
    pub facets: TypeFacets,
    pub enum_values: Option<IndexMap<String, EnumValue>>,
}

impl SchemaGraph {
    pub fn definition(&self, name: &str) -> Option<&Definition> {
        self.definitions.get(name)
    }

    /// Elements of a structured element: its own anonymous `elements` or the
    /// elements of the named structured type it refers to.
    pub fn structure_of<'a>(&'a self, element: &'a Element) -> Option<&'a Elements> {
        if let Some(ref elements) = element.elements {
            return Some(elements);
        }
        if element.is_association() {
            return None;
        }
        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = element.type_name.as_deref()?;
        loop {
            if !visited.insert(current) {
                return None;
            }
            let def = self.definitions.get(current)?;
            if let Some(ref elements) = def.body.elements {
                return Some(elements);
            }
            current = def.body.type_name.as_deref()?;
        }
    }

    pub fn is_structured(&self, element: &Element) -> bool {
        self.structure_of(element).is_some()
    }

    /// Resolve a (possibly derived) scalar type to its builtin base type,
    /// collecting facets along the way. Facets closer to `element` win.
    pub fn resolve_scalar(&self, element: &Element) -> Option<ScalarType> {
        let mut facets = element.facets();
        let mut enum_values = element.enum_values.clone();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = element.type_name.as_deref()?;
        loop {
            if current.starts_with("cds.") {
                return Some(ScalarType {
                    builtin: current.to_string(),
                    facets,
                    enum_values,
                });
            }
            if !visited.insert(current) {
                return None;
            }
            let def = self.definitions.get(current)?;
            if def.body.elements.is_some() {
                return None;
            }
            facets = facets.or(&def.body.facets());
            if enum_values.is_none() {
                enum_values = def.body.enum_values.clone();
            }
            current = def.body.type_name.as_deref()?;
        }
    }

    pub fn resolve_type_name(&self, type_name: &str) -> Option<ScalarType> {
        self.resolve_scalar(&Element::scalar(type_name))
    }

    /// Walk `path` through nested structures of `elements`.
    pub fn element_at<'a>(&'a self, elements: &'a Elements, path: &[String]) -> Option<&'a Element> {
        let (first, rest) = path.split_first()?;
        let element = elements.get(first)?;
        if rest.is_empty() {
            return Some(element);
        }
        let nested = self.structure_of(element)?;
        self.element_at(nested, rest)
    }
}

/// Namespace part of a fully-qualified name (`my.bookshop.Books` → `my.bookshop`).
pub fn namespace_of(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) => &name[..pos],
        None => "root",
    }
}

/// Local part of a fully-qualified name (`my.bookshop.Books` → `Books`).
pub fn local_name(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Structural location of a diagnostic: a path into the schema graph.
/// Also used as the key of side tables that attach data to arbitrary carriers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub path: Vec<String>,
}

impl Location {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn definition(name: &str) -> Self {
        Self {
            path: vec!["definitions".into(), name.into()],
        }
    }

    pub fn element(mut self, name: &str) -> Self {
        self.path.push("elements".into());
        self.path.push(name.into());
        self
    }

    pub fn elements(mut self, path: &[String]) -> Self {
        for segment in path {
            self = self.element(segment);
        }
        self
    }

    pub fn action(mut self, name: &str) -> Self {
        self.path.push("actions".into());
        self.path.push(name.into());
        self
    }

    pub fn param(mut self, name: &str) -> Self {
        self.path.push("params".into());
        self.path.push(name.into());
        self
    }

    pub fn annotation(mut self, key: &str) -> Self {
        self.path.push(key.into());
        self
    }
}

impl fmt::Display for Location {
    /// `S.Books:author.name` style, like the source mapping collaborator expects.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut iter = self.path.iter();
        let mut out = String::new();
        let mut members: Vec<&str> = Vec::new();
        while let Some(step) = iter.next() {
            match step.as_str() {
                "definitions" => {
                    if let Some(name) = iter.next() {
                        out.push_str(name);
                    }
                }
                "elements" | "actions" | "params" => {
                    if let Some(name) = iter.next() {
                        members.push(name);
                    }
                }
                other => members.push(other),
            }
        }
        if !members.is_empty() {
            out.push(':');
            out.push_str(&members.join("."));
        }
        if out.is_empty() {
            out.push_str("<model>");
        }
        write!(f, "{out}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: DiagnosticSeverity,
    pub location: Location,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
    Message,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            DiagnosticSeverity::Error => "Error",
            DiagnosticSeverity::Warning => "Warning",
            DiagnosticSeverity::Info => "Info",
            DiagnosticSeverity::Message => "Message",
        };
        write!(
            f,
            "{} {}: {} [{}]",
            self.location, severity, self.message, self.code
        )
    }
}
