//! Shortcut: @mandatory

use serde_json::{json, Value};

use super::Shortcut;
use crate::placement::CarrierKind;

pub struct MandatoryShortcut;

impl Shortcut for MandatoryShortcut {
    fn key(&self) -> &str {
        "@mandatory"
    }

    fn description(&self) -> &str {
        "Element or parameter that must be filled"
    }

    fn expand(&self, value: &Value, kind: CarrierKind) -> Vec<(String, Value)> {
        let applies = matches!(kind, CarrierKind::Element | CarrierKind::Parameter);
        if !applies || value != &Value::Bool(true) {
            return Vec::new();
        }
        vec![("@Common.FieldControl".to_string(), json!({"#": "Mandatory"}))]
    }
}
