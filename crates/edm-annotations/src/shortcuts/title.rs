//! Shortcut: @title

use serde_json::Value;

use super::Shortcut;
use crate::placement::CarrierKind;

pub struct TitleShortcut;

impl Shortcut for TitleShortcut {
    fn key(&self) -> &str {
        "@title"
    }

    fn description(&self) -> &str {
        "Display label of any construct"
    }

    fn expand(&self, value: &Value, _kind: CarrierKind) -> Vec<(String, Value)> {
        vec![("@Common.Label".to_string(), value.clone())]
    }
}
