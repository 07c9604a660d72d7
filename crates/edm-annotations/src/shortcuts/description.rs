//! Shortcut: @description

use serde_json::Value;

use super::Shortcut;
use crate::placement::CarrierKind;

pub struct DescriptionShortcut;

impl Shortcut for DescriptionShortcut {
    fn key(&self) -> &str {
        "@description"
    }

    fn description(&self) -> &str {
        "Long description of any construct"
    }

    fn expand(&self, value: &Value, _kind: CarrierKind) -> Vec<(String, Value)> {
        vec![("@Core.Description".to_string(), value.clone())]
    }
}
