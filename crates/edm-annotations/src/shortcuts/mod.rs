//! Annotation shortcuts: plain `@title`, `@readonly`, ... expanded to the
//! vocabulary terms they stand for.

pub mod description;
pub mod mandatory;
pub mod readonly;
pub mod title;

pub use description::DescriptionShortcut;
pub use mandatory::MandatoryShortcut;
pub use readonly::ReadonlyShortcut;
pub use title::TitleShortcut;

use edm_core::Annotations;
use serde_json::Value;
use tracing::trace;

use crate::placement::CarrierKind;

// ---------------------------------------------------------------------------
// Shortcut trait
// ---------------------------------------------------------------------------

pub trait Shortcut: Send + Sync {
    /// Annotation key the shortcut is written as (e.g. "@title").
    fn key(&self) -> &str;

    fn description(&self) -> &str;

    /// Vocabulary annotations `value` stands for on a carrier of `kind`.
    fn expand(&self, value: &Value, kind: CarrierKind) -> Vec<(String, Value)>;
}

// ---------------------------------------------------------------------------
// Expansion engine
// ---------------------------------------------------------------------------

pub struct Shortcuts {
    shortcuts: Vec<Box<dyn Shortcut>>,
}

impl Shortcuts {
    pub fn shortcuts(&self) -> &[Box<dyn Shortcut>] {
        &self.shortcuts
    }

    /// `annotations` plus the expansion of every shortcut found in them.
    /// An expansion never overrides a term that is written explicitly.
    pub fn expand(&self, annotations: &Annotations, kind: CarrierKind) -> Annotations {
        let mut expanded = annotations.clone();
        for shortcut in &self.shortcuts {
            let Some(value) = annotations.get(shortcut.key()) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            for (key, term_value) in shortcut.expand(value, kind) {
                if is_set(&expanded, &key) {
                    trace!(shortcut = shortcut.key(), key = %key, "explicit annotation wins");
                    continue;
                }
                expanded.insert(key, term_value);
            }
        }
        expanded
    }
}

impl Default for Shortcuts {
    fn default() -> Self {
        Self {
            shortcuts: builtin_shortcuts(),
        }
    }
}

fn builtin_shortcuts() -> Vec<Box<dyn Shortcut>> {
    vec![
        Box::new(TitleShortcut),
        Box::new(DescriptionShortcut),
        Box::new(ReadonlyShortcut),
        Box::new(MandatoryShortcut),
    ]
}

/// Whether `key` is already given, either directly, through a flattened
/// member (`key.Prop`, `key@Nested`) or as a member of an enclosing record
/// (`@Capabilities.InsertRestrictions: {Insertable: ...}`).
fn is_set(annotations: &Annotations, key: &str) -> bool {
    let written = annotations.keys().any(|k| {
        k.strip_prefix(key)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.') || rest.starts_with('@'))
    });
    if written {
        return true;
    }
    key.match_indices('.').any(|(pos, _)| {
        annotations
            .get(&key[..pos])
            .and_then(Value::as_object)
            .is_some_and(|record| record.contains_key(&key[pos + 1..]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn annotations(value: Value) -> Annotations {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn shortcuts_expand_to_terms() {
        let expanded = Shortcuts::default().expand(
            &annotations(json!({"@title": "Title", "@description": "About", "@mandatory": true})),
            CarrierKind::Element,
        );
        assert_eq!(expanded["@Common.Label"], json!("Title"));
        assert_eq!(expanded["@Core.Description"], json!("About"));
        assert_eq!(expanded["@Common.FieldControl"], json!({"#": "Mandatory"}));
    }

    #[test]
    fn explicit_terms_win() {
        let expanded = Shortcuts::default().expand(
            &annotations(json!({"@title": "Title", "@Common.Label": "Label"})),
            CarrierKind::Element,
        );
        assert_eq!(expanded["@Common.Label"], json!("Label"));

        let expanded = Shortcuts::default().expand(
            &annotations(json!({"@title": "Title", "@Common.Label@Core.Description": "x"})),
            CarrierKind::Element,
        );
        assert!(!expanded.contains_key("@Common.Label"));
    }

    #[test]
    fn enclosing_records_count_as_explicit() {
        let given = annotations(json!({
            "@readonly": true,
            "@Capabilities.InsertRestrictions": {"Insertable": true}
        }));
        let expanded = Shortcuts::default().expand(&given, CarrierKind::Entity);
        assert!(!expanded.contains_key("@Capabilities.InsertRestrictions.Insertable"));
        assert_eq!(
            expanded["@Capabilities.UpdateRestrictions.Updatable"],
            json!(false)
        );
    }

    #[test]
    fn null_shortcuts_are_ignored() {
        let expanded =
            Shortcuts::default().expand(&annotations(json!({"@title": null})), CarrierKind::Element);
        assert_eq!(expanded.len(), 1);
    }
}
