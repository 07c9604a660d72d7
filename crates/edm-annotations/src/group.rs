//! Collect the vocabulary annotations of a carrier and regroup flattened
//! keys (`@UI.LineItem#short`, `@Capabilities.InsertRestrictions.Insertable`,
//! `@Common.Text@UI.TextArrangement`) into one value tree per term.

use std::sync::LazyLock;

use edm_core::catalogs::NULL_ALLOWED_TERMS;
use edm_core::{Annotations, Location, Messages, Options, SchemaGraph};
use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::trace;

use crate::vocabulary::Vocabulary;

/// Term name, optional qualifier and whatever path follows.
static RE_TERM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)(?:#(\w+))?([.@].*)?$").unwrap());

/// Members that make an object a value of its own rather than a record.
const VALUE_MARKERS: &[&str] = &["=", "#", "$edmJson", "$value"];

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationGroup {
    pub namespace: String,
    pub term: String,
    pub qualifier: Option<String>,
    /// Key of the first annotation contributing to the group.
    pub key: String,
    pub value: Value,
}

impl AnnotationGroup {
    pub fn qualified_term(&self) -> String {
        format!("{}.{}", self.namespace, self.term)
    }
}

/// An annotation key split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermKey<'k> {
    pub namespace: &'k str,
    pub term: &'k str,
    pub qualifier: Option<&'k str>,
    /// Nested path: property names, then at most one `@`-annotation.
    pub path: Vec<String>,
}

/// Split `@ns.Term#qualifier.path`. The namespace is the longest dotted
/// prefix accepted by `is_namespace`, so namespaces may contain dots.
pub fn parse_key<'k>(key: &'k str, is_namespace: impl Fn(&str) -> bool) -> Option<TermKey<'k>> {
    let body = key.strip_prefix('@')?;
    let head_end = body.find(|c: char| c == '#' || c == '@').unwrap_or(body.len());
    let dots: Vec<usize> = body[..head_end].match_indices('.').map(|(i, _)| i).collect();
    for &pos in dots.iter().rev() {
        let namespace = &body[..pos];
        if !is_namespace(namespace) {
            continue;
        }
        let caps = RE_TERM.captures(&body[pos + 1..])?;
        let term = caps.get(1)?.as_str();
        let qualifier = caps.get(2).map(|m| m.as_str());
        let rest = caps.get(3).map_or("", |m| m.as_str());
        return Some(TermKey {
            namespace,
            term,
            qualifier,
            path: path_segments(rest),
        });
    }
    None
}

fn path_segments(rest: &str) -> Vec<String> {
    let (properties, annotation) = match rest.find('@') {
        Some(at) => (&rest[..at], Some(&rest[at..])),
        None => (rest, None),
    };
    let mut segments: Vec<String> = properties
        .split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if let Some(annotation) = annotation {
        segments.push(annotation.to_string());
    }
    segments
}

/// Which namespaces count as vocabularies for a carrier.
pub struct Namespaces<'a> {
    pub vocabulary: &'a Vocabulary,
    pub graph: &'a SchemaGraph,
    pub options: &'a Options,
    /// Service of the carrier; its own terms count with
    /// `user_defined_vocabularies`.
    pub service: &'a str,
}

impl Namespaces<'_> {
    pub fn is_known(&self, namespace: &str) -> bool {
        self.vocabulary.has_namespace(namespace) || self.is_user_defined(namespace)
    }

    fn is_user_defined(&self, namespace: &str) -> bool {
        self.options.user_defined_vocabularies
            && namespace == self.service
            && self
                .graph
                .vocabularies
                .keys()
                .any(|term| term.strip_prefix(namespace).is_some_and(|t| t.starts_with('.')))
    }
}

/// Group the vocabulary annotations of one carrier by (namespace, term,
/// qualifier), in order of first appearance.
pub fn group_annotations(
    annotations: &Annotations,
    namespaces: &Namespaces<'_>,
    location: &Location,
    messages: &mut Messages,
) -> Vec<AnnotationGroup> {
    let mut groups: IndexMap<(String, String, Option<String>), (String, Option<Value>)> = IndexMap::new();
    for (key, value) in annotations {
        let Some(parsed) = parse_key(key, |ns| namespaces.is_known(ns)) else {
            continue;
        };
        let term = format!("{}.{}", parsed.namespace, parsed.term);
        if value.is_null() && parsed.path.is_empty() {
            if !NULL_ALLOWED_TERMS.contains(&term.as_str()) {
                trace!(key = %key, "null annotation skipped");
                continue;
            }
            if namespaces.options.is_v2() {
                messages.warning(
                    "odata-anno-null",
                    location.clone().annotation(key),
                    &[("term", term.as_str())],
                );
                continue;
            }
        }
        let group_key = (
            parsed.namespace.to_string(),
            parsed.term.to_string(),
            parsed.qualifier.map(str::to_string),
        );
        let (_, slot) = groups.entry(group_key).or_insert_with(|| (key.clone(), None));
        insert(slot, &parsed.path, value.clone());
    }
    groups
        .into_iter()
        .map(|((namespace, term, qualifier), (key, value))| AnnotationGroup {
            namespace,
            term,
            qualifier,
            key,
            value: value.unwrap_or(Value::Null),
        })
        .collect()
}

fn is_record(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|o| !VALUE_MARKERS.iter().any(|m| o.contains_key(*m)))
}

/// Put `leaf` at `path` below `slot`. A value that already sits where
/// members are added moves to `$value`.
fn insert(slot: &mut Option<Value>, path: &[String], leaf: Value) {
    let Some((first, rest)) = path.split_first() else {
        match slot {
            Some(Value::Object(existing)) if !is_record(&leaf) => {
                existing.insert("$value".to_string(), leaf);
            }
            Some(Value::Object(existing)) => {
                if let Value::Object(members) = leaf {
                    for (k, v) in members {
                        existing.entry(k).or_insert(v);
                    }
                }
            }
            _ => *slot = Some(leaf),
        }
        return;
    };
    let wrap = match slot {
        Some(value) => !is_record(value) || (first.starts_with('@') && !value.is_object()),
        None => true,
    };
    if wrap && !matches!(slot, Some(Value::Object(o)) if o.contains_key("$value")) {
        let mut object = Map::new();
        if let Some(base) = slot.take() {
            object.insert("$value".to_string(), base);
        }
        *slot = Some(Value::Object(object));
    }
    if let Some(Value::Object(object)) = slot {
        let mut child = object.get(first.as_str()).cloned();
        insert(&mut child, rest, leaf);
        if let Some(child) = child {
            object.insert(first.clone(), child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn known(ns: &str) -> bool {
        matches!(ns, "UI" | "Common" | "Capabilities" | "Core" | "my.service")
    }

    fn group(annotations: Value, options: &Options) -> (Vec<AnnotationGroup>, Messages) {
        let vocabulary = Vocabulary::standard().unwrap();
        let graph = SchemaGraph::default();
        let namespaces = Namespaces {
            vocabulary: &vocabulary,
            graph: &graph,
            options,
            service: "S",
        };
        let annotations: Annotations = serde_json::from_value(annotations).unwrap();
        let mut messages = Messages::new();
        let groups = group_annotations(&annotations, &namespaces, &Location::definition("S.E"), &mut messages);
        (groups, messages)
    }

    #[test]
    fn keys_are_split() {
        let parsed = parse_key("@UI.LineItem#short", known).unwrap();
        assert_eq!(
            (parsed.namespace, parsed.term, parsed.qualifier),
            ("UI", "LineItem", Some("short"))
        );
        assert!(parsed.path.is_empty());

        let parsed = parse_key("@Capabilities.NavigationRestrictions.RestrictedProperties", known).unwrap();
        assert_eq!(parsed.namespace, "Capabilities");
        assert_eq!(parsed.path, vec!["RestrictedProperties"]);

        let parsed = parse_key("@Common.Text@UI.TextArrangement", known).unwrap();
        assert_eq!(parsed.term, "Text");
        assert_eq!(parsed.path, vec!["@UI.TextArrangement"]);

        let parsed = parse_key("@my.service.Flag", known).unwrap();
        assert_eq!((parsed.namespace, parsed.term), ("my.service", "Flag"));

        assert_eq!(parse_key("@assert.range", known), None);
        assert_eq!(parse_key("title", known), None);
    }

    #[test]
    fn flattened_paths_are_regrouped() {
        let (groups, _) = group(
            json!({
                "@Capabilities.InsertRestrictions.Insertable": false,
                "@UI.LineItem": [{"Value": {"=": "title"}}],
                "@Capabilities.InsertRestrictions.NonInsertableProperties": [{"=": "id"}],
                "@UI.LineItem#short": []
            }),
            &Options::default(),
        );
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].qualified_term(), "Capabilities.InsertRestrictions");
        assert_eq!(
            groups[0].value,
            json!({"Insertable": false, "NonInsertableProperties": [{"=": "id"}]})
        );
        assert_eq!(groups[2].qualifier.as_deref(), Some("short"));
    }

    #[test]
    fn annotations_of_annotations_use_value_wrapper() {
        let (groups, _) = group(
            json!({
                "@Common.Text": {"=": "name"},
                "@Common.Text@UI.TextArrangement": {"#": "TextOnly"}
            }),
            &Options::default(),
        );
        assert_eq!(
            groups[0].value,
            json!({"$value": {"=": "name"}, "@UI.TextArrangement": {"#": "TextOnly"}})
        );

        // nested annotation written before the value
        let (groups, _) = group(
            json!({
                "@Common.Label@Core.Description": "the label",
                "@Common.Label": "Name"
            }),
            &Options::default(),
        );
        assert_eq!(
            groups[0].value,
            json!({"@Core.Description": "the label", "$value": "Name"})
        );
    }

    #[test]
    fn nulls_are_skipped_unless_allowed() {
        let annotations = json!({
            "@Common.Label": null,
            "@Core.OperationAvailable": null,
            "@UI.Hidden": true
        });
        let (groups, messages) = group(annotations.clone(), &Options::default());
        let terms: Vec<String> = groups.iter().map(AnnotationGroup::qualified_term).collect();
        assert_eq!(terms, vec!["Core.OperationAvailable", "UI.Hidden"]);
        assert!(messages.diagnostics().is_empty());

        let (groups, messages) = group(annotations, &Options::v2());
        assert_eq!(groups.len(), 1);
        assert_eq!(messages.count("odata-anno-null"), 1);
    }

    #[test]
    fn user_defined_terms_need_the_option() {
        let vocabulary = Vocabulary::standard().unwrap();
        let graph: SchemaGraph = serde_json::from_value(json!({
            "definitions": {"S": {"kind": "service"}},
            "vocabularies": {"S.Audited": {"type": "cds.Boolean"}}
        }))
        .unwrap();
        let mut options = Options::default();
        let annotations: Annotations = serde_json::from_value(json!({"@S.Audited": true})).unwrap();
        for (enabled, expected) in [(false, 0), (true, 1)] {
            options.user_defined_vocabularies = enabled;
            let namespaces = Namespaces {
                vocabulary: &vocabulary,
                graph: &graph,
                options: &options,
                service: "S",
            };
            let groups =
                group_annotations(&annotations, &namespaces, &Location::definition("S.E"), &mut Messages::new());
            assert_eq!(groups.len(), expected);
        }
    }
}
