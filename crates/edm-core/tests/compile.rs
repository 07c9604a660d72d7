use edm_core::derived::{ElementId, Multiplicity};
use edm_core::{compile, compile_to_json, Compilation, Options, SchemaGraph};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn run(model: Value, options: &Options) -> Compilation {
    let graph: SchemaGraph = serde_json::from_value(model).unwrap();
    compile(graph, options).unwrap()
}

fn proxies_on() -> Options {
    Options {
        odata_proxies: true,
        ..Options::default()
    }
}

fn two_services() -> Value {
    json!({"definitions": {
        "S1": {"kind": "service"},
        "S1.A": {"kind": "entity", "elements": {
            "id": {"key": true, "type": "cds.Integer"},
            "b": {"type": "cds.Association", "target": "S2.B"}
        }},
        "S2": {"kind": "service"},
        "S2.B": {"kind": "entity", "elements": {
            "id": {"key": true, "type": "cds.Integer"},
            "name": {"type": "cds.String"},
            "c": {"type": "cds.Association", "target": "S2.C"}
        }},
        "S2.C": {"kind": "entity", "elements": {"id": {"key": true, "type": "cds.Integer"}}}
    }})
}

// ===========================================================================
// Cross-service navigation
// ===========================================================================

#[test]
fn proxy_for_foreign_service_target() {
    let compilation = run(two_services(), &proxies_on());
    let s1 = &compilation.model.services["S1"];

    let schemas: Vec<&String> = s1.schemas.keys().collect();
    assert_eq!(schemas, vec!["S1", "S2"]);
    let proxy_types: Vec<&String> = s1.schemas["S2"].entity_types.keys().collect();
    assert_eq!(proxy_types, vec!["B"]);

    let proxy = s1.entity_type("S2.B").unwrap();
    let properties: Vec<&String> = proxy.properties.keys().collect();
    assert_eq!(properties, vec!["id"]);
    assert!(proxy.navigation_properties.is_empty());
    assert_eq!(proxy.keys[0].name, "id");

    let nav = &s1.entity_type("S1.A").unwrap().navigation_properties["b"];
    assert_eq!(nav.type_name, "S2.B");
    assert!(s1.references.is_empty());

    // the proxy has no entity set, so there is nothing to bind to
    assert!(s1.container.entity_sets["A"].navigation_bindings.is_empty());
    assert_eq!(compilation.messages.count("odata-navigation"), 0);
}

#[test]
fn schema_reference_instead_of_proxy() {
    let options = Options {
        odata_x_service_refs: true,
        ..Options::default()
    };
    let compilation = run(two_services(), &options);
    let s1 = &compilation.model.services["S1"];
    assert_eq!(s1.schemas.len(), 1);
    assert_eq!(s1.references[0].namespace, "S2");
    assert_eq!(s1.references[0].uri, "../S2/$metadata");
    let bindings = &s1.container.entity_sets["A"].navigation_bindings;
    assert_eq!(bindings[0].path, "b");
    assert_eq!(bindings[0].target, "S2.EntityContainer/B");
}

#[test]
fn navigation_is_muted_without_options() {
    let compilation = run(two_services(), &Options::default());
    let a = compilation.model.services["S1"].entity_type("S1.A").unwrap();
    assert!(a.navigation_properties.is_empty());
    // the foreign key of the muted association stays
    assert!(a.properties.contains_key("b_id"));
    assert!(compilation.derived.muted.contains(&ElementId::top("S1.A", "b")));
    assert_eq!(compilation.messages.count("odata-navigation"), 1);
    assert!(compilation.check().is_ok());
}

// ===========================================================================
// Backlinks
// ===========================================================================

#[test]
fn order_item_backlink_in_model() {
    let compilation = run(
        json!({"definitions": {
            "S": {"kind": "service"},
            "S.Order": {"kind": "entity", "elements": {
                "id": {"key": true, "type": "cds.Integer"},
                "item": {"type": "cds.Association", "target": "S.OrderItem",
                    "cardinality": {"src": 1, "srcmin": 1, "max": "*"},
                    "on": [{"ref": ["item", "order"]}, "=", {"ref": ["$self"]}]}
            }},
            "S.OrderItem": {"kind": "entity", "elements": {
                "id": {"key": true, "type": "cds.Integer"},
                "order": {"type": "cds.Association", "target": "S.Order"}
            }}
        }}),
        &Options::default(),
    );
    assert!(!compilation.messages.has_errors());
    let service = &compilation.model.services["S"];

    let item = &service.entity_type("S.Order").unwrap().navigation_properties["item"];
    assert_eq!(item.partner.as_deref(), Some("order"));
    assert!(item.collection);
    assert!(item.referential_constraints.is_empty());

    let order = &service.entity_type("S.OrderItem").unwrap().navigation_properties["order"];
    assert_eq!(order.partner.as_deref(), Some("item"));
    assert_eq!(order.target_multiplicity, Multiplicity::One);
    assert!(!order.nullable);
    assert_eq!(order.referential_constraints[0].property, "order_id");
}

// ===========================================================================
// Containment
// ===========================================================================

#[test]
fn contained_compositions_have_no_entity_set() {
    let model = json!({"definitions": {
        "S": {"kind": "service"},
        "S.Orders": {"kind": "entity", "elements": {
            "id": {"key": true, "type": "cds.Integer"},
            "items": {"type": "cds.Composition", "target": "S.Items", "cardinality": {"max": "*"},
                "on": [{"ref": ["items", "parent"]}, "=", {"ref": ["$self"]}]}
        }},
        "S.Items": {"kind": "entity", "elements": {
            "pos": {"key": true, "type": "cds.Integer"},
            "parent": {"type": "cds.Association", "target": "S.Orders"}
        }}
    }});
    let options = Options {
        odata_containment: true,
        ..Options::default()
    };
    let compilation = run(model.clone(), &options);
    let service = &compilation.model.services["S"];
    assert!(service.container.entity_sets.contains_key("Orders"));
    assert!(!service.container.entity_sets.contains_key("Items"));
    let items = &service.entity_type("S.Orders").unwrap().navigation_properties["items"];
    assert!(items.contains_target);
    assert_eq!(compilation.derived.containers["S.Items"], vec!["S.Orders".to_string()]);

    // without containment both are entity sets
    let compilation = run(model, &Options::default());
    assert!(compilation.model.services["S"].container.entity_sets.contains_key("Items"));
}

#[test]
fn parameterized_results_are_reachable_in_v2() {
    let compilation = run(
        json!({"definitions": {
            "S": {"kind": "service"},
            "S.Sales": {"kind": "entity",
                "params": {"year": {"type": "cds.Integer"}},
                "elements": {"id": {"key": true, "type": "cds.Integer"}}}
        }}),
        &Options::v2(),
    );
    let sets = &compilation.model.services["S"].container.entity_sets;
    let names: Vec<&String> = sets.keys().collect();
    assert_eq!(names, vec!["Sales", "SalesType"]);
    let bindings = &sets["Sales"].navigation_bindings;
    assert_eq!(bindings[0].path, "Set");
    assert_eq!(bindings[0].target, "SalesType");
}

// ===========================================================================
// JSON entry point
// ===========================================================================

#[test]
fn json_entry_point_matches_library_call() {
    let csn = two_services().to_string();
    let out: Value = serde_json::from_str(&compile_to_json(&csn, r#"{"odataProxies": true}"#)).unwrap();
    assert_eq!(out["success"], true);
    let library = run(two_services(), &proxies_on());
    assert_eq!(
        out["data"]["model"],
        serde_json::to_value(&library.model).unwrap()
    );
}
