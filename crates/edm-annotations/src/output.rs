//! Translated annotations, grouped by target.

use edm_core::{Messages, ODataVersion};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::dynamic::DynExpr;
use crate::vocabulary::Vocabulary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PathKind {
    Path,
    PropertyPath,
    NavigationPropertyPath,
    AnnotationPath,
}

impl PathKind {
    /// Path kind declared by an `Edm.*Path` type.
    pub fn for_type(type_name: &str) -> Option<Self> {
        Some(match type_name {
            "Edm.Path" => PathKind::Path,
            "Edm.PropertyPath" => PathKind::PropertyPath,
            "Edm.NavigationPropertyPath" => PathKind::NavigationPropertyPath,
            "Edm.AnnotationPath" => PathKind::AnnotationPath,
            _ => return None,
        })
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::for_type(&format!("Edm.{}", tag.strip_prefix('$')?))
    }

    /// CSDL JSON member name, e.g. `$PropertyPath`.
    pub fn tag(self) -> &'static str {
        match self {
            PathKind::Path => "$Path",
            PathKind::PropertyPath => "$PropertyPath",
            PathKind::NavigationPropertyPath => "$NavigationPropertyPath",
            PathKind::AnnotationPath => "$AnnotationPath",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EdmValue {
    /// Literal with the EDM type it is emitted as.
    Primitive {
        #[serde(rename = "type")]
        type_name: String,
        value: serde_json::Value,
    },
    Null,
    /// Qualified members (`UI.ImportanceType/High`); several for flags.
    EnumMember(Vec<String>),
    Path { kind: PathKind, path: String },
    Record(Record),
    Collection(Vec<EdmValue>),
    Expression(DynExpr),
}

impl EdmValue {
    pub fn string(value: &str) -> Self {
        EdmValue::Primitive {
            type_name: "Edm.String".into(),
            value: serde_json::Value::String(value.into()),
        }
    }

    pub fn bool(value: bool) -> Self {
        EdmValue::Primitive {
            type_name: "Edm.Boolean".into(),
            value: serde_json::Value::Bool(value),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub properties: IndexMap<String, EdmValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<AnnotationNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationNode {
    /// Alias-qualified term, e.g. `Common.Label`.
    pub term: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
    pub value: EdmValue,
    /// Annotations of this annotation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<AnnotationNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAnnotations {
    pub version: ODataVersion,
    /// Target path (`S.Books/title`, `S.EntityContainer/Books`) → nodes.
    pub targets: IndexMap<String, Vec<AnnotationNode>>,
}

impl ServiceAnnotations {
    pub fn new(version: ODataVersion) -> Self {
        Self {
            version,
            targets: IndexMap::new(),
        }
    }

    pub fn push(&mut self, target: &str, node: AnnotationNode) {
        self.targets.entry(target.to_string()).or_default().push(node);
    }

    /// Node for `term` at `target`, ignoring qualified variants.
    pub fn find(&self, target: &str, term: &str) -> Option<&AnnotationNode> {
        self.targets
            .get(target)?
            .iter()
            .find(|n| n.term == term && n.qualifier.is_none())
    }
}

/// Vocabulary aliases referenced by the translated annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VocabularyUsage {
    aliases: IndexSet<String>,
}

impl VocabularyUsage {
    pub fn add(&mut self, alias: &str) {
        if !self.aliases.contains(alias) {
            self.aliases.insert(alias.to_string());
        }
    }

    /// Record every alias mentioned by a qualified name (`UI.DataField`,
    /// `Collection(Common.ValueListParameterInOut)`).
    pub fn add_type(&mut self, type_name: &str) {
        let type_name = crate::vocabulary::collection_item(type_name).unwrap_or(type_name);
        if let Some((alias, _)) = type_name.split_once('.') {
            if alias != "Edm" {
                self.add(alias);
            }
        }
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.aliases.contains(alias)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.aliases.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// `$Reference` entries for the used vocabularies known to `vocabulary`.
    pub fn references(&self, vocabulary: &Vocabulary) -> Vec<VocabularyReference> {
        self.aliases
            .iter()
            .filter_map(|alias| {
                let info = vocabulary.namespaces.get(alias)?;
                Some(VocabularyReference {
                    alias: alias.clone(),
                    namespace: info.namespace.clone(),
                    uri: info.uri.clone(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VocabularyReference {
    pub alias: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationResult {
    pub services: IndexMap<String, ServiceAnnotations>,
    pub vocabularies: VocabularyUsage,
    pub references: Vec<VocabularyReference>,
    #[serde(skip)]
    pub messages: Messages,
}

impl AnnotationResult {
    pub fn service(&self, name: &str) -> Option<&ServiceAnnotations> {
        self.services.get(name)
    }
}
