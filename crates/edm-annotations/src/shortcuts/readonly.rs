//! Shortcut: @readonly
//!
//! Elements become computed; entities lose insert, update and delete
//! capabilities.

use serde_json::Value;

use super::Shortcut;
use crate::placement::CarrierKind;

const RESTRICTIONS: &[(&str, &str)] = &[
    ("InsertRestrictions", "Insertable"),
    ("UpdateRestrictions", "Updatable"),
    ("DeleteRestrictions", "Deletable"),
];

pub struct ReadonlyShortcut;

impl Shortcut for ReadonlyShortcut {
    fn key(&self) -> &str {
        "@readonly"
    }

    fn description(&self) -> &str {
        "Read-only element or entity"
    }

    fn expand(&self, value: &Value, kind: CarrierKind) -> Vec<(String, Value)> {
        if value != &Value::Bool(true) {
            return Vec::new();
        }
        match kind {
            CarrierKind::Element => vec![("@Core.Computed".to_string(), Value::Bool(true))],
            CarrierKind::Entity => RESTRICTIONS
                .iter()
                .map(|(term, property)| {
                    (format!("@Capabilities.{term}.{property}"), Value::Bool(false))
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}
