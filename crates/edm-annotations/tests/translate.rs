use edm_annotations::{translate_annotations, translate_to_json, AnnotationResult, EdmValue, Vocabulary};
use edm_core::{compile, Options, SchemaGraph};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn translate(model: Value, options: &Options) -> AnnotationResult {
    let graph: SchemaGraph = serde_json::from_value(model).unwrap();
    let compilation = compile(graph, options).unwrap();
    assert!(!compilation.messages.has_errors());
    translate_annotations(&compilation, &Vocabulary::standard().unwrap())
}

fn priced() -> Value {
    json!({"definitions": {
        "S": {"kind": "service"},
        "S.E": {"kind": "entity", "elements": {
            "id": {"key": true, "type": "cds.Integer"},
            "price": {"type": "cds.Decimal", "@title": "Price",
                "@Validation.Minimum": {"=": "ceiling(a, 2)", "func": "odata.ceiling",
                    "args": [{"ref": ["a"]}, {"val": 2}]}}
        }}
    }})
}

// ---------------------------------------------------------------------------
// Dropped annotations
// ---------------------------------------------------------------------------

#[test]
fn wrong_arity_drops_only_that_annotation() {
    let result = translate(priced(), &Options::default());
    let diagnostics = result.messages.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].code, "odata-anno-xpr-args");
    assert_eq!(diagnostics[0].args["func"], "odata.ceiling");

    let s = result.service("S").unwrap();
    assert!(s.find("S.E/price", "Validation.Minimum").is_none());
    assert_eq!(s.find("S.E/price", "Common.Label").unwrap().value, EdmValue::string("Price"));
}

#[test]
fn envelope_reports_annotation_errors() {
    let out: Value = serde_json::from_str(&translate_to_json(&priced().to_string(), "", "")).unwrap();
    assert_eq!(out["success"], false);
    let codes: Vec<&str> = out["data"]["diagnostics"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["code"].as_str())
        .collect();
    assert_eq!(codes, vec!["odata-anno-xpr-args"]);
}

// ---------------------------------------------------------------------------
// Cross-service targets
// ---------------------------------------------------------------------------

#[test]
fn proxy_keys_keep_their_annotations() {
    let model = json!({"definitions": {
        "S1": {"kind": "service"},
        "S1.A": {"kind": "entity", "elements": {
            "id": {"key": true, "type": "cds.Integer"},
            "b": {"type": "cds.Association", "target": "S2.B"}
        }},
        "S2": {"kind": "service"},
        "S2.B": {"kind": "entity", "@title": "B", "elements": {
            "id": {"key": true, "type": "cds.Integer", "@title": "Identifier"},
            "name": {"type": "cds.String", "@title": "Name"}
        }}
    }});
    let options = Options {
        odata_proxies: true,
        ..Options::default()
    };
    let result = translate(model, &options);
    assert!(result.messages.diagnostics().is_empty());

    let s1 = result.service("S1").unwrap();
    assert!(s1.find("S2.B", "Common.Label").is_some());
    assert!(s1.find("S2.B/id", "Common.Label").is_some());
    // only keys are exposed on the proxy
    assert!(!s1.targets.contains_key("S2.B/name"));

    let s2 = result.service("S2").unwrap();
    assert!(s2.find("S2.B/name", "Common.Label").is_some());
    assert!(!s2.targets.contains_key("S1.A"));
}

// ---------------------------------------------------------------------------
// Flat and structured output
// ---------------------------------------------------------------------------

#[test]
fn structured_types_are_targets_only_in_structured_mode() {
    let model = json!({"definitions": {
        "S": {"kind": "service"},
        "S.Amount": {"kind": "type", "@title": "Amount", "elements": {
            "value": {"type": "cds.Decimal", "@title": "Value"}
        }},
        "S.E": {"kind": "entity", "elements": {
            "id": {"key": true, "type": "cds.Integer"},
            "total": {"type": "S.Amount"}
        }}
    }});

    let result = translate(model.clone(), &Options::default());
    let s = result.service("S").unwrap();
    assert!(s.find("S.Amount", "Common.Label").is_some());
    assert!(s.find("S.Amount/value", "Common.Label").is_some());

    let result = translate(model, &Options::v2());
    let s = result.service("S").unwrap();
    assert!(!s.targets.contains_key("S.Amount"));
    assert_eq!(
        s.find("S.E/total_value", "Common.Label").unwrap().value,
        EdmValue::string("Value")
    );
}
