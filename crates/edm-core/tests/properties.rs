use edm_core::{compile, Compilation, Options, SchemaGraph};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

fn run(model: Value, options: &Options) -> Compilation {
    let graph: SchemaGraph = serde_json::from_value(model).unwrap();
    compile(graph, options).unwrap()
}

// ---------------------------------------------------------------------------
// Structured keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum KeyShape {
    Leaf,
    Struct(Vec<KeyShape>),
}

fn key_shape() -> impl Strategy<Value = KeyShape> {
    let leaf = Just(KeyShape::Leaf);
    leaf.prop_recursive(3, 12, 3, |inner| {
        prop::collection::vec(inner, 1..=3).prop_map(KeyShape::Struct)
    })
}

fn element_json(shape: &KeyShape) -> Value {
    match shape {
        KeyShape::Leaf => json!({"type": "cds.Integer"}),
        KeyShape::Struct(children) => {
            let elements: Map<String, Value> = children
                .iter()
                .enumerate()
                .map(|(i, child)| (format!("f{i}"), element_json(child)))
                .collect();
            json!({"elements": elements})
        }
    }
}

fn leaf_paths(shape: &KeyShape, prefix: Vec<String>, out: &mut Vec<Vec<String>>) {
    match shape {
        KeyShape::Leaf => out.push(prefix),
        KeyShape::Struct(children) => {
            for (i, child) in children.iter().enumerate() {
                let mut path = prefix.clone();
                path.push(format!("f{i}"));
                leaf_paths(child, path, out);
            }
        }
    }
}

fn keyed_model(shape: &KeyShape) -> Value {
    let mut key = element_json(shape);
    key["key"] = json!(true);
    json!({"definitions": {
        "S": {"kind": "service"},
        "S.E": {"kind": "entity", "elements": {
            "k": key,
            "nr": {"key": true, "type": "cds.Integer"}
        }}
    }})
}

proptest! {
    #[test]
    fn key_paths_follow_declaration_order(shape in key_shape()) {
        let mut leaves = Vec::new();
        leaf_paths(&shape, vec!["k".to_string()], &mut leaves);

        for (options, separator) in [(Options::default(), "/"), (Options::v2(), "_")] {
            let compilation = run(keyed_model(&shape), &options);
            let names: Vec<String> = compilation.derived.key_paths["S.E"]
                .iter()
                .map(|k| k.name.clone())
                .collect();
            let mut expected: Vec<String> = leaves.iter().map(|p| p.join(separator)).collect();
            expected.push("nr".to_string());
            prop_assert_eq!(names, expected);
        }
    }
}

// ---------------------------------------------------------------------------
// Proxies
// ---------------------------------------------------------------------------

fn requesting_model(associations: &[usize]) -> Value {
    let mut definitions = Map::new();
    definitions.insert("T".into(), json!({"kind": "service"}));
    definitions.insert(
        "T.B".into(),
        json!({"kind": "entity", "elements": {"id": {"key": true, "type": "cds.Integer"}}}),
    );
    for (i, count) in associations.iter().enumerate() {
        let service = format!("R{i}");
        let mut elements = Map::new();
        elements.insert("id".into(), json!({"key": true, "type": "cds.Integer"}));
        for n in 0..*count {
            elements.insert(
                format!("b{n}"),
                json!({"type": "cds.Association", "target": "T.B"}),
            );
        }
        definitions.insert(service.clone(), json!({"kind": "service"}));
        definitions.insert(format!("{service}.A"), json!({"kind": "entity", "elements": elements}));
    }
    json!({"definitions": definitions})
}

proptest! {
    #[test]
    fn one_proxy_per_target_and_service(associations in prop::collection::vec(1usize..5, 1..4)) {
        let options = Options { odata_proxies: true, ..Options::default() };
        let compilation = run(requesting_model(&associations), &options);
        let proxies = &compilation.derived.proxies;

        prop_assert_eq!(proxies.len(), associations.len());
        for i in 0..associations.len() {
            let service = format!("R{i}");
            prop_assert_eq!(proxies.for_service(&service).count(), 1);
            let id = proxies.lookup("T.B", &service);
            prop_assert!(id.is_some());
            let entity = compilation.model.services[&service].entity_type("T.B");
            prop_assert!(entity.is_some());
        }
        prop_assert!(proxies.for_service("T").next().is_none());
    }
}
