use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::options::ODataVersion;

/// EDM mapping of one builtin `cds.*` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdmTypeInfo {
    pub v4: &'static str,
    pub v2: &'static str,
    /// Allowed as (part of) a primary key in V4.
    pub key_v4: bool,
    /// Allowed as (part of) a primary key in V2.
    pub key_v2: bool,
    /// Precision applied when the model does not state one (`cds.Timestamp`).
    pub default_precision: Option<u32>,
}

const fn edm(v4: &'static str, v2: &'static str, key_v4: bool, key_v2: bool) -> EdmTypeInfo {
    EdmTypeInfo {
        v4,
        v2,
        key_v4,
        key_v2,
        default_precision: None,
    }
}

/// Builtin type catalog: `cds.*` → `Edm.*` per protocol version.
pub static TYPE_CATALOG: LazyLock<HashMap<&'static str, EdmTypeInfo>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    m.insert("cds.String", edm("Edm.String", "Edm.String", true, true));
    m.insert("cds.LargeString", edm("Edm.String", "Edm.String", false, false));
    m.insert("cds.Boolean", edm("Edm.Boolean", "Edm.Boolean", true, true));
    m.insert("cds.UInt8", edm("Edm.Byte", "Edm.Byte", true, true));
    m.insert("cds.Int16", edm("Edm.Int16", "Edm.Int16", true, true));
    m.insert("cds.Int32", edm("Edm.Int32", "Edm.Int32", true, true));
    m.insert("cds.Integer", edm("Edm.Int32", "Edm.Int32", true, true));
    m.insert("cds.Int64", edm("Edm.Int64", "Edm.Int64", true, true));
    m.insert("cds.Integer64", edm("Edm.Int64", "Edm.Int64", true, true));
    m.insert("cds.Decimal", edm("Edm.Decimal", "Edm.Decimal", true, true));
    m.insert("cds.DecimalFloat", edm("Edm.Decimal", "Edm.Decimal", true, true));
    m.insert("cds.Double", edm("Edm.Double", "Edm.Double", true, true));
    m.insert("cds.Date", edm("Edm.Date", "Edm.DateTime", true, true));
    m.insert("cds.Time", edm("Edm.TimeOfDay", "Edm.Time", true, true));
    m.insert(
        "cds.DateTime",
        edm("Edm.DateTimeOffset", "Edm.DateTimeOffset", true, true),
    );
    m.insert(
        "cds.Timestamp",
        EdmTypeInfo {
            default_precision: Some(7),
            ..edm("Edm.DateTimeOffset", "Edm.DateTime", true, true)
        },
    );
    m.insert("cds.UUID", edm("Edm.Guid", "Edm.Guid", true, true));
    m.insert("cds.Binary", edm("Edm.Binary", "Edm.Binary", true, false));
    m.insert("cds.LargeBinary", edm("Edm.Binary", "Edm.Binary", false, false));
    m.insert("cds.Vector", edm("Edm.String", "Edm.String", false, false));
    m.insert("cds.Map", edm("Edm.Untyped", "Edm.String", false, false));
    m.insert(
        "cds.hana.ST_POINT",
        edm("Edm.GeometryPoint", "Edm.String", false, false),
    );
    m.insert(
        "cds.hana.ST_GEOMETRY",
        edm("Edm.Geometry", "Edm.String", false, false),
    );
    m
});

/// Map a builtin type to its EDM name for `version`.
pub fn edm_type(cds_type: &str, version: ODataVersion) -> Option<&'static str> {
    TYPE_CATALOG.get(cds_type).map(|info| match version {
        ODataVersion::V2 => info.v2,
        ODataVersion::V4 => info.v4,
    })
}

pub fn is_key_type(cds_type: &str, version: ODataVersion) -> bool {
    TYPE_CATALOG.get(cds_type).is_some_and(|info| match version {
        ODataVersion::V2 => info.key_v2,
        ODataVersion::V4 => info.key_v4,
    })
}

/// Annotations whose `null` value is still rendered (`Edm.Null` in V4).
pub static NULL_ALLOWED_TERMS: &[&str] = &["Core.OperationAvailable"];

// ---------------------------------------------------------------------------
// Message catalog
// ---------------------------------------------------------------------------

/// Message texts by diagnostic id; `$(NAME)` placeholders are filled from the
/// argument bag of the diagnostic.
pub static MESSAGE_TEXTS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    // Structural
    m.insert("odata-unresolved-target", "Target \"$(TARGET)\" of association \"$(NAME)\" can't be found");
    m.insert("odata-nested-array", "Element \"$(NAME)\" is an array of arrays, which can't be represented");
    m.insert("odata-assoc-in-array", "Association \"$(NAME)\" can't be used as array item type");
    m.insert("odata-duplicate-name", "Generated name \"$(NAME)\" conflicts with an existing $(KIND)");
    m.insert("odata-unknown-service", "Service \"$(NAME)\" is not defined in the model");
    // Associations and constraints
    m.insert("odata-partner-ambiguous", "Association \"$(NAME)\" can't be used as backlink partner of \"$(PARTNER)\" because it is already the partner of \"$(OTHER)\"");
    m.insert("odata-spec-violation-constraints", "Referential constraints of association \"$(NAME)\" don't cover all primary keys of \"$(TARGET)\"");
    m.insert("odata-cardinality-mismatch", "Explicit target cardinality \"$(DECLARED)\" of association \"$(NAME)\" differs from the cardinality \"$(COMPUTED)\" of its partner \"$(PARTNER)\"");
    m.insert("odata-navigation", "No OData navigation property generated for \"$(NAME)\": target \"$(TARGET)\" is outside of service \"$(SERVICE)\"");
    m.insert("odata-proxy-tier", "Proxy for \"$(TARGET)\" was created for a different association kind; navigation \"$(NAME)\" is not exposed");
    // Keys
    m.insert("odata-key-null", "Key element \"$(NAME)\" must not be nullable");
    m.insert("odata-key-many", "Key element \"$(NAME)\" must not be an array");
    m.insert("odata-key-type", "Type \"$(TYPE)\" of key element \"$(NAME)\" can't be used as key type");
    m.insert("odata-key-unmanaged", "Unmanaged association \"$(NAME)\" can't be used as primary key");
    m.insert("odata-key-recursive", "Primary key \"$(NAME)\" refers back to itself through association \"$(ASSOC)\"");
    m.insert("odata-nav-binding-singleton", "To-many navigation \"$(NAME)\" can't be bound to singleton \"$(TARGET)\"");
    // Annotations
    m.insert("odata-anno-def", "Term \"$(TERM)\" is not defined in vocabulary \"$(NAMESPACE)\"");
    m.insert("odata-anno-type", "Type \"$(TYPE)\" is not defined in the vocabularies");
    m.insert("odata-anno-value", "Value \"$(VALUE)\" is not compatible with expected type \"$(TYPE)\" of \"$(TERM)\"");
    m.insert("odata-anno-enum", "Enum symbol \"$(VALUE)\" is not a member of \"$(TYPE)\"");
    m.insert("odata-anno-property", "Property \"$(PROP)\" is not defined for type \"$(TYPE)\"");
    m.insert("odata-anno-applicability", "Term \"$(TERM)\" can't be applied to a $(KIND)");
    m.insert("odata-anno-xpr-args", "Function \"$(FUNC)\" expects $(EXPECTED) argument(s), but $(COUNT) were given");
    m.insert("odata-anno-xpr-unsupported", "Function \"$(FUNC)\" is not supported; use \"$(REPLACEMENT)\" instead");
    m.insert("odata-anno-xpr-func", "Function \"$(FUNC)\" is not a canonical OData function");
    m.insert("odata-anno-xpr", "Expression can't be translated: $(REASON)");
    m.insert("odata-anno-xpr-v2", "Dynamic expressions are not supported in OData V2; annotation \"$(TERM)\" is ignored");
    m.insert("odata-anno-null", "Null value of \"$(TERM)\" is not supported in OData V2");
    m
});

static RE_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\(([A-Z_]+)\)").unwrap());

/// Render the message text for `id`, substituting `$(NAME)` placeholders.
/// Unknown ids render as the id itself; unknown placeholders stay visible.
pub fn render_message(id: &str, args: &std::collections::BTreeMap<String, String>) -> String {
    let template = MESSAGE_TEXTS.get(id).copied().unwrap_or(id);
    RE_PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            let name = caps[1].to_ascii_lowercase();
            args.get(&name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Compiler version reported in the JSON API envelope.
pub const COMPILER_VERSION: &str = "0.4.1";
