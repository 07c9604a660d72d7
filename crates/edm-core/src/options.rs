use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ODataVersion {
    #[serde(rename = "v2")]
    V2,
    #[default]
    #[serde(rename = "v4")]
    V4,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ODataFormat {
    Flat,
    #[default]
    Structured,
}

/// Compiler options. Deserialized from the caller's JSON with every field
/// optional; V2 always renders flat regardless of `odata_format`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    pub odata_version: ODataVersion,
    pub odata_format: ODataFormat,
    /// Synthesize proxy entity types for cross-schema association targets.
    pub odata_proxies: bool,
    /// Reference other services' schemas instead of muting navigations into them.
    pub odata_x_service_refs: bool,
    /// Treat every composition as a containment edge.
    pub odata_containment: bool,
    /// V2: keep constraint sets that cover only part of the principal keys.
    pub odata_v2_partial_constraints: bool,
    /// Translate annotations of user-defined terms of the same service.
    pub user_defined_vocabularies: bool,
    /// Services to compile; empty means all.
    pub service_names: Vec<String>,
}

impl Options {
    pub fn v4() -> Self {
        Self::default()
    }

    pub fn v2() -> Self {
        Self {
            odata_version: ODataVersion::V2,
            odata_format: ODataFormat::Flat,
            ..Self::default()
        }
    }

    pub fn is_v2(&self) -> bool {
        self.odata_version == ODataVersion::V2
    }

    pub fn is_v4(&self) -> bool {
        self.odata_version == ODataVersion::V4
    }

    pub fn is_structured(&self) -> bool {
        self.is_v4() && self.odata_format == ODataFormat::Structured
    }

    pub fn is_flat(&self) -> bool {
        !self.is_structured()
    }

    /// Separator used when rendering element paths (`a/b` vs. `a_b`).
    pub fn path_separator(&self) -> &'static str {
        if self.is_structured() {
            "/"
        } else {
            "_"
        }
    }

    pub fn proxies_enabled(&self) -> bool {
        self.is_v4() && self.odata_proxies
    }

    pub fn x_service_refs_enabled(&self) -> bool {
        self.is_v4() && self.odata_x_service_refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_v4_structured() {
        let options = Options::default();
        assert!(options.is_v4());
        assert!(options.is_structured());
        assert!(!options.proxies_enabled());
        assert_eq!(options.path_separator(), "/");
    }

    #[test]
    fn v2_is_always_flat() {
        let options: Options =
            serde_json::from_str(r#"{"odataVersion":"v2","odataFormat":"structured"}"#).unwrap();
        assert!(options.is_v2());
        assert!(options.is_flat());
        assert_eq!(options.path_separator(), "_");
    }

    #[test]
    fn proxies_require_v4() {
        let options: Options =
            serde_json::from_str(r#"{"odataVersion":"v2","odataProxies":true}"#).unwrap();
        assert!(!options.proxies_enabled());
    }

    #[test]
    fn camel_case_keys() {
        let options: Options = serde_json::from_str(
            r#"{"odataXServiceRefs":true,"serviceNames":["S1"],"odataContainment":true}"#,
        )
        .unwrap();
        assert!(options.x_service_refs_enabled());
        assert!(options.odata_containment);
        assert_eq!(options.service_names, vec!["S1"]);
    }
}
