//! Vocabulary dictionary: declared terms and types of the OData vocabularies.
//!
//! The dictionary is plain JSON, keyed by alias-qualified names
//! (`Core.Description`, `UI.DataField`), so it can be produced from the
//! published CSDL files or written by hand for custom vocabularies.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const STANDARD_VOCABULARIES: &str = include_str!("../vocabularies/standard.json");

/// Type definitions are followed through at most this many base types.
const MAX_TYPE_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum VocabularyError {
    #[error("invalid vocabulary JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vocabulary {
    /// Alias → vocabulary namespace and reference URI.
    #[serde(default)]
    pub namespaces: IndexMap<String, NamespaceInfo>,
    #[serde(default)]
    pub terms: IndexMap<String, TermDef>,
    #[serde(default)]
    pub types: IndexMap<String, TypeDef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceInfo {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermDef {
    /// Declared type, `Collection(...)` for collection-valued terms.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Constructs the term may be applied to; empty means anywhere.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applies_to: Vec<String>,
}

impl TermDef {
    pub fn is_collection(&self) -> bool {
        collection_item(&self.type_name).is_some()
    }

    pub fn applies(&self, construct: &str) -> bool {
        self.applies_to.is_empty() || self.applies_to.iter().any(|a| a == construct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeKind {
    ComplexType,
    EnumType,
    TypeDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDef {
    pub kind: TypeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_type: Option<String>,
    /// Property name → declared type (complex types).
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, String>,
    /// Member names (enum types).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
    #[serde(default)]
    pub open: bool,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default, rename = "flags")]
    pub is_flags: bool,
}

/// A declared type after following type definitions to their base.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved<'v> {
    Primitive(&'v str),
    Enum { name: &'v str, def: &'v TypeDef },
    Complex { name: &'v str, def: &'v TypeDef },
    Unknown(&'v str),
}

/// Item type of `Collection(T)`.
pub fn collection_item(type_name: &str) -> Option<&str> {
    type_name
        .strip_prefix("Collection(")
        .and_then(|rest| rest.strip_suffix(')'))
}

impl Vocabulary {
    pub fn from_json(json: &str) -> Result<Self, VocabularyError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The OData vocabularies shipped with the crate (Core, Common,
    /// Capabilities, Validation, UI, Measures).
    pub fn standard() -> Result<Self, VocabularyError> {
        Self::from_json(STANDARD_VOCABULARIES)
    }

    /// Add the terms and types of `other`; entries already present win.
    pub fn merge(&mut self, other: Vocabulary) {
        for (alias, info) in other.namespaces {
            self.namespaces.entry(alias).or_insert(info);
        }
        for (name, term) in other.terms {
            self.terms.entry(name).or_insert(term);
        }
        for (name, def) in other.types {
            self.types.entry(name).or_insert(def);
        }
    }

    pub fn has_namespace(&self, alias: &str) -> bool {
        self.namespaces.contains_key(alias)
    }

    pub fn term(&self, qualified: &str) -> Option<&TermDef> {
        self.terms.get(qualified)
    }

    pub fn type_def(&self, qualified: &str) -> Option<&TypeDef> {
        self.types.get(qualified)
    }

    pub fn resolve<'v>(&'v self, type_name: &'v str) -> Resolved<'v> {
        let mut current = type_name;
        for _ in 0..MAX_TYPE_DEPTH {
            if current.starts_with("Edm.") {
                return Resolved::Primitive(current);
            }
            let Some(def) = self.types.get(current) else {
                return Resolved::Unknown(current);
            };
            match def.kind {
                TypeKind::EnumType => return Resolved::Enum { name: current, def },
                TypeKind::ComplexType => return Resolved::Complex { name: current, def },
                TypeKind::TypeDefinition => match def.base_type.as_deref() {
                    Some(base) => current = base,
                    None => return Resolved::Unknown(current),
                },
            }
        }
        Resolved::Unknown(current)
    }

    /// Declared type of `property` on the complex type `type_name`,
    /// searching base types.
    pub fn property_type(&self, type_name: &str, property: &str) -> Option<&str> {
        let mut current = self.types.get(type_name);
        for _ in 0..MAX_TYPE_DEPTH {
            let def = current?;
            if let Some(found) = def.properties.get(property) {
                return Some(found.as_str());
            }
            current = self.types.get(def.base_type.as_deref()?);
        }
        None
    }

    /// True if `type_name` or one of its base types is open.
    pub fn is_open(&self, type_name: &str) -> bool {
        let mut current = self.types.get(type_name);
        for _ in 0..MAX_TYPE_DEPTH {
            let Some(def) = current else {
                return false;
            };
            if def.open {
                return true;
            }
            current = def.base_type.as_deref().and_then(|b| self.types.get(b));
        }
        false
    }

    /// True if `derived` is `base` or derives from it.
    pub fn derives_from(&self, derived: &str, base: &str) -> bool {
        let mut current = Some(derived);
        for _ in 0..MAX_TYPE_DEPTH {
            let Some(name) = current else {
                return false;
            };
            if name == base {
                return true;
            }
            current = self.types.get(name).and_then(|d| d.base_type.as_deref());
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn standard_vocabularies_load() {
        let vocabulary = Vocabulary::standard().unwrap();
        assert!(vocabulary.has_namespace("Core"));
        assert!(vocabulary.has_namespace("UI"));
        let label = vocabulary.term("Common.Label").unwrap();
        assert_eq!(label.type_name, "Edm.String");
        assert!(vocabulary.term("UI.LineItem").unwrap().is_collection());
    }

    #[test]
    fn type_definitions_resolve_to_their_base() {
        let vocabulary = Vocabulary::standard().unwrap();
        assert_eq!(
            vocabulary.resolve("Core.Tag"),
            Resolved::Primitive("Edm.Boolean")
        );
        assert!(matches!(
            vocabulary.resolve("UI.ImportanceType"),
            Resolved::Enum { name: "UI.ImportanceType", .. }
        ));
        assert_eq!(vocabulary.resolve("X.Y"), Resolved::Unknown("X.Y"));
    }

    #[test]
    fn properties_are_inherited() {
        let vocabulary = Vocabulary::standard().unwrap();
        assert_eq!(vocabulary.property_type("UI.DataField", "Value"), Some("Edm.Untyped"));
        assert_eq!(vocabulary.property_type("UI.DataField", "Label"), Some("Edm.String"));
        assert_eq!(vocabulary.property_type("UI.DataField", "Nope"), None);
        assert!(vocabulary.derives_from("UI.DataField", "UI.DataFieldAbstract"));
        assert!(!vocabulary.derives_from("UI.DataFieldAbstract", "UI.DataField"));
    }

    #[test]
    fn merge_keeps_existing_entries() {
        let mut vocabulary = Vocabulary::standard().unwrap();
        let custom = Vocabulary::from_json(
            r#"{"namespaces": {"My": {"namespace": "com.example.my"}},
                "terms": {"My.Flag": {"type": "Edm.Boolean"},
                          "Common.Label": {"type": "Edm.Int32"}}}"#,
        )
        .unwrap();
        vocabulary.merge(custom);
        assert!(vocabulary.has_namespace("My"));
        assert_eq!(vocabulary.term("My.Flag").unwrap().type_name, "Edm.Boolean");
        assert_eq!(vocabulary.term("Common.Label").unwrap().type_name, "Edm.String");
    }
}
