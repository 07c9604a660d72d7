//! Dynamic annotation expressions.
//!
//! [`DynExpr`] is built either from a parsed CSN expression
//! ([`DynExpr::from_expr`]) or from a value already written in the CSDL JSON
//! expression shape (`{"$edmJson": {"$Eq": [...]}}`, [`DynExpr::from_json`]).
//! Both directions produce the same tree, and [`DynExpr::to_json`] renders it
//! back to CSDL JSON.

use edm_core::catalogs::{edm_type, TYPE_CATALOG};
use edm_core::expr::{BinaryOp, Expr, UnaryOp};
use edm_core::{ODataVersion, SchemaGraph, TypeFacets};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::functions::canonical_name;
use crate::output::PathKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynOp {
    And,
    Or,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Has,
    In,
    Add,
    Sub,
    Mul,
    Div,
    DivBy,
    Mod,
}

const BINARY_OPS: &[DynOp] = &[
    DynOp::And,
    DynOp::Or,
    DynOp::Eq,
    DynOp::Ne,
    DynOp::Gt,
    DynOp::Ge,
    DynOp::Lt,
    DynOp::Le,
    DynOp::Has,
    DynOp::In,
    DynOp::Add,
    DynOp::Sub,
    DynOp::Mul,
    DynOp::Div,
    DynOp::DivBy,
    DynOp::Mod,
];

impl DynOp {
    pub fn tag(self) -> &'static str {
        match self {
            DynOp::And => "$And",
            DynOp::Or => "$Or",
            DynOp::Eq => "$Eq",
            DynOp::Ne => "$Ne",
            DynOp::Gt => "$Gt",
            DynOp::Ge => "$Ge",
            DynOp::Lt => "$Lt",
            DynOp::Le => "$Le",
            DynOp::Has => "$Has",
            DynOp::In => "$In",
            DynOp::Add => "$Add",
            DynOp::Sub => "$Sub",
            DynOp::Mul => "$Mul",
            DynOp::Div => "$Div",
            DynOp::DivBy => "$DivBy",
            DynOp::Mod => "$Mod",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        BINARY_OPS.iter().copied().find(|op| op.tag() == tag)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DynExpr {
    Literal(Value),
    Null,
    Path { kind: PathKind, path: String },
    EnumMember(String),
    Not(Box<DynExpr>),
    Neg(Box<DynExpr>),
    Binary {
        op: DynOp,
        lhs: Box<DynExpr>,
        rhs: Box<DynExpr>,
    },
    If {
        condition: Box<DynExpr>,
        then: Box<DynExpr>,
        otherwise: Option<Box<DynExpr>>,
    },
    Apply {
        function: String,
        args: Vec<DynExpr>,
    },
    Cast {
        operand: Box<DynExpr>,
        type_name: String,
        facets: TypeFacets,
    },
    IsOf {
        operand: Box<DynExpr>,
        type_name: String,
        facets: TypeFacets,
    },
    LabeledElement {
        name: String,
        value: Box<DynExpr>,
    },
    LabeledElementReference(String),
    UrlRef(Box<DynExpr>),
    Record(IndexMap<String, DynExpr>),
    Collection(Vec<DynExpr>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DynError {
    #[error("\"{0}\" expects {1} operand(s)")]
    Operands(&'static str, usize),
    #[error("\"{0}\" requires \"{1}\"")]
    MissingCompanion(&'static str, &'static str),
    #[error("\"{0}\" has an invalid value")]
    InvalidValue(&'static str),
    #[error("\"case\" without any \"when\" branch")]
    EmptyCase,
}

fn binary(op: DynOp, lhs: DynExpr, rhs: DynExpr) -> DynExpr {
    DynExpr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn path(path: String) -> DynExpr {
    DynExpr::Path {
        kind: PathKind::Path,
        path,
    }
}

// ---------------------------------------------------------------------------
// CSN expression -> dynamic expression
// ---------------------------------------------------------------------------

impl DynExpr {
    /// Rewrite a parsed CSN expression. Casts are resolved through derived
    /// types of `graph` to their EDM type for `version`.
    pub fn from_expr(expr: &Expr, graph: &SchemaGraph, version: ODataVersion) -> Result<DynExpr, DynError> {
        let convert = |e: &Expr| DynExpr::from_expr(e, graph, version);
        Ok(match expr {
            Expr::Ref(segments) => {
                let segments = match segments.split_first() {
                    Some((first, rest)) if first == "$self" && !rest.is_empty() => rest,
                    _ => segments.as_slice(),
                };
                path(segments.join("/"))
            }
            Expr::Val(value) => DynExpr::Literal(value.clone()),
            Expr::Null => DynExpr::Null,
            Expr::EnumSymbol(symbol) => DynExpr::EnumMember(symbol.clone()),
            Expr::Func { name, args } => DynExpr::Apply {
                function: canonical_name(name),
                args: args.iter().map(convert).collect::<Result<_, _>>()?,
            },
            Expr::Cast { operand, spec } => {
                let (type_name, facets) = resolve_cast(graph, &spec.type_name, spec.facets(), version);
                DynExpr::Cast {
                    operand: Box::new(convert(operand)?),
                    type_name,
                    facets,
                }
            }
            Expr::List(items) => DynExpr::Collection(items.iter().map(convert).collect::<Result<_, _>>()?),
            Expr::Unary { op, operand } => {
                let operand = Box::new(convert(operand)?);
                match op {
                    UnaryOp::Not => DynExpr::Not(operand),
                    UnaryOp::Neg => DynExpr::Neg(operand),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = convert(lhs)?;
                let rhs = convert(rhs)?;
                match op {
                    BinaryOp::Concat => DynExpr::Apply {
                        function: canonical_name("concat"),
                        args: vec![lhs, rhs],
                    },
                    other => binary(binary_op(*other), lhs, rhs),
                }
            }
            Expr::IsNull { operand, negated } => {
                let op = if *negated { DynOp::Ne } else { DynOp::Eq };
                binary(op, convert(operand)?, DynExpr::Null)
            }
            Expr::Between {
                operand,
                low,
                high,
                negated,
            } => {
                let operand = convert(operand)?;
                let range = binary(
                    DynOp::And,
                    binary(DynOp::Ge, operand.clone(), convert(low)?),
                    binary(DynOp::Le, operand, convert(high)?),
                );
                negate_if(*negated, range)
            }
            Expr::In {
                operand,
                list,
                negated,
            } => negate_if(*negated, binary(DynOp::In, convert(operand)?, convert(list)?)),
            Expr::Case { branches, otherwise } => {
                let mut result = match otherwise {
                    Some(e) => Some(Box::new(convert(e)?)),
                    None => None,
                };
                if branches.is_empty() {
                    return Err(DynError::EmptyCase);
                }
                for (condition, then) in branches.iter().rev() {
                    result = Some(Box::new(DynExpr::If {
                        condition: Box::new(convert(condition)?),
                        then: Box::new(convert(then)?),
                        otherwise: result,
                    }));
                }
                match result {
                    Some(expr) => *expr,
                    None => return Err(DynError::EmptyCase),
                }
            }
        })
    }

    /// Function applications of the whole tree as `(name, argument count)`.
    pub fn calls(&self) -> Vec<(&str, usize)> {
        let mut out = Vec::new();
        self.collect_calls(&mut out);
        out
    }

    fn collect_calls<'a>(&'a self, out: &mut Vec<(&'a str, usize)>) {
        match self {
            DynExpr::Apply { function, args } => {
                out.push((function.as_str(), args.len()));
                for arg in args {
                    arg.collect_calls(out);
                }
            }
            DynExpr::Not(inner) | DynExpr::Neg(inner) | DynExpr::UrlRef(inner) => inner.collect_calls(out),
            DynExpr::Binary { lhs, rhs, .. } => {
                lhs.collect_calls(out);
                rhs.collect_calls(out);
            }
            DynExpr::If {
                condition,
                then,
                otherwise,
            } => {
                condition.collect_calls(out);
                then.collect_calls(out);
                if let Some(e) = otherwise {
                    e.collect_calls(out);
                }
            }
            DynExpr::Cast { operand, .. } | DynExpr::IsOf { operand, .. } => operand.collect_calls(out),
            DynExpr::LabeledElement { value, .. } => value.collect_calls(out),
            DynExpr::Record(properties) => {
                for value in properties.values() {
                    value.collect_calls(out);
                }
            }
            DynExpr::Collection(items) => {
                for item in items {
                    item.collect_calls(out);
                }
            }
            DynExpr::Literal(_)
            | DynExpr::Null
            | DynExpr::Path { .. }
            | DynExpr::EnumMember(_)
            | DynExpr::LabeledElementReference(_) => {}
        }
    }
}

fn binary_op(op: BinaryOp) -> DynOp {
    match op {
        BinaryOp::Or => DynOp::Or,
        BinaryOp::And => DynOp::And,
        BinaryOp::Eq => DynOp::Eq,
        BinaryOp::Ne => DynOp::Ne,
        BinaryOp::Lt => DynOp::Lt,
        BinaryOp::Le => DynOp::Le,
        BinaryOp::Gt => DynOp::Gt,
        BinaryOp::Ge => DynOp::Ge,
        BinaryOp::Add => DynOp::Add,
        BinaryOp::Sub => DynOp::Sub,
        BinaryOp::Mul => DynOp::Mul,
        BinaryOp::Div => DynOp::DivBy,
        // rewritten to odata.concat before we get here
        BinaryOp::Concat => DynOp::Add,
    }
}

fn negate_if(negated: bool, expr: DynExpr) -> DynExpr {
    if negated {
        DynExpr::Not(Box::new(expr))
    } else {
        expr
    }
}

/// EDM type and facets of a cast target, following derived scalar types.
fn resolve_cast(
    graph: &SchemaGraph,
    type_name: &str,
    facets: TypeFacets,
    version: ODataVersion,
) -> (String, TypeFacets) {
    if type_name.starts_with("Edm.") {
        return (type_name.to_string(), facets);
    }
    let Some(scalar) = graph.resolve_type_name(type_name) else {
        return (type_name.to_string(), facets);
    };
    let mut facets = facets.or(&scalar.facets);
    if version == ODataVersion::V4 && facets.precision.is_none() {
        facets.precision = TYPE_CATALOG
            .get(scalar.builtin.as_str())
            .and_then(|info| info.default_precision);
    }
    let edm = edm_type(&scalar.builtin, version).unwrap_or("Edm.String");
    (edm.to_string(), facets)
}

// ---------------------------------------------------------------------------
// CSDL JSON <-> dynamic expression
// ---------------------------------------------------------------------------

const FACET_KEYS: &[(&str, &str)] = &[
    ("$MaxLength", "maxLength"),
    ("$Precision", "precision"),
    ("$Scale", "scale"),
    ("$SRID", "srid"),
];

impl DynExpr {
    /// Instantiate a value written in CSDL JSON expression shape. An object
    /// with exactly one operator member becomes that operator; any other
    /// object is a record, arrays are collections, the rest literals.
    pub fn from_json(value: &Value) -> Result<DynExpr, DynError> {
        match value {
            Value::Null => Ok(DynExpr::Null),
            Value::Array(items) => Ok(DynExpr::Collection(
                items.iter().map(DynExpr::from_json).collect::<Result<_, _>>()?,
            )),
            Value::Object(object) => {
                let operators: Vec<&String> = object.keys().filter(|k| is_operator(k)).collect();
                match operators.as_slice() {
                    [tag] => operator(tag, object),
                    _ => Ok(DynExpr::Record(
                        object
                            .iter()
                            .map(|(k, v)| Ok((k.clone(), DynExpr::from_json(v)?)))
                            .collect::<Result<_, DynError>>()?,
                    )),
                }
            }
            other => Ok(DynExpr::Literal(other.clone())),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            DynExpr::Literal(value) => value.clone(),
            DynExpr::Null => json!({"$Null": null}),
            DynExpr::Path { kind, path } => json!({ (kind.tag()): path }),
            DynExpr::EnumMember(member) => json!({"$EnumMember": member}),
            DynExpr::Not(inner) => json!({"$Not": inner.to_json()}),
            DynExpr::Neg(inner) => json!({"$Neg": inner.to_json()}),
            DynExpr::Binary { op, lhs, rhs } => json!({ (op.tag()): [lhs.to_json(), rhs.to_json()] }),
            DynExpr::If {
                condition,
                then,
                otherwise,
            } => {
                let mut operands = vec![condition.to_json(), then.to_json()];
                if let Some(e) = otherwise {
                    operands.push(e.to_json());
                }
                json!({"$If": operands})
            }
            DynExpr::Apply { function, args } => json!({
                "$Apply": args.iter().map(DynExpr::to_json).collect::<Vec<_>>(),
                "$Function": function,
            }),
            DynExpr::Cast {
                operand,
                type_name,
                facets,
            } => typed("$Cast", operand, type_name, facets),
            DynExpr::IsOf {
                operand,
                type_name,
                facets,
            } => typed("$IsOf", operand, type_name, facets),
            DynExpr::LabeledElement { name, value } => json!({
                "$LabeledElement": value.to_json(),
                "$Name": name,
            }),
            DynExpr::LabeledElementReference(name) => json!({"$LabeledElementReference": name}),
            DynExpr::UrlRef(inner) => json!({"$UrlRef": inner.to_json()}),
            DynExpr::Record(properties) => Value::Object(
                properties
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            DynExpr::Collection(items) => Value::Array(items.iter().map(DynExpr::to_json).collect()),
        }
    }
}

impl Serialize for DynExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn is_operator(key: &str) -> bool {
    DynOp::from_tag(key).is_some()
        || PathKind::from_tag(key).is_some()
        || matches!(
            key,
            "$Null"
                | "$Not"
                | "$Neg"
                | "$If"
                | "$Apply"
                | "$Cast"
                | "$IsOf"
                | "$EnumMember"
                | "$LabeledElement"
                | "$LabeledElementReference"
                | "$UrlRef"
        )
}

fn operator(tag: &str, object: &Map<String, Value>) -> Result<DynExpr, DynError> {
    let operand = &object[tag];
    if let Some(op) = DynOp::from_tag(tag) {
        let [lhs, rhs] = operands::<2>(op.tag(), operand)?;
        return Ok(binary(op, DynExpr::from_json(lhs)?, DynExpr::from_json(rhs)?));
    }
    if let Some(kind) = PathKind::from_tag(tag) {
        let path = operand.as_str().ok_or(DynError::InvalidValue(kind.tag()))?;
        return Ok(DynExpr::Path {
            kind,
            path: path.to_string(),
        });
    }
    let single = || DynExpr::from_json(operand).map(Box::new);
    Ok(match tag {
        "$Null" => DynExpr::Null,
        "$Not" => DynExpr::Not(single()?),
        "$Neg" => DynExpr::Neg(single()?),
        "$UrlRef" => DynExpr::UrlRef(single()?),
        "$If" => {
            let items = operand.as_array().ok_or(DynError::Operands("$If", 3))?;
            if !(2..=3).contains(&items.len()) {
                return Err(DynError::Operands("$If", 3));
            }
            DynExpr::If {
                condition: Box::new(DynExpr::from_json(&items[0])?),
                then: Box::new(DynExpr::from_json(&items[1])?),
                otherwise: match items.get(2) {
                    Some(e) => Some(Box::new(DynExpr::from_json(e)?)),
                    None => None,
                },
            }
        }
        "$Apply" => {
            let function = object
                .get("$Function")
                .and_then(Value::as_str)
                .ok_or(DynError::MissingCompanion("$Apply", "$Function"))?;
            let args = operand.as_array().ok_or(DynError::InvalidValue("$Apply"))?;
            DynExpr::Apply {
                function: function.to_string(),
                args: args.iter().map(DynExpr::from_json).collect::<Result<_, _>>()?,
            }
        }
        "$Cast" | "$IsOf" => {
            let companion = if tag == "$Cast" { "$Cast" } else { "$IsOf" };
            let type_name = object
                .get("$Type")
                .and_then(Value::as_str)
                .ok_or(DynError::MissingCompanion(companion, "$Type"))?
                .to_string();
            let facets = facets_from_json(object);
            let operand = Box::new(DynExpr::from_json(operand)?);
            if tag == "$Cast" {
                DynExpr::Cast {
                    operand,
                    type_name,
                    facets,
                }
            } else {
                DynExpr::IsOf {
                    operand,
                    type_name,
                    facets,
                }
            }
        }
        "$EnumMember" => DynExpr::EnumMember(
            operand
                .as_str()
                .ok_or(DynError::InvalidValue("$EnumMember"))?
                .to_string(),
        ),
        "$LabeledElement" => DynExpr::LabeledElement {
            name: object
                .get("$Name")
                .and_then(Value::as_str)
                .ok_or(DynError::MissingCompanion("$LabeledElement", "$Name"))?
                .to_string(),
            value: single()?,
        },
        "$LabeledElementReference" => DynExpr::LabeledElementReference(
            operand
                .as_str()
                .ok_or(DynError::InvalidValue("$LabeledElementReference"))?
                .to_string(),
        ),
        _ => DynExpr::Literal(Value::Object(object.clone())),
    })
}

fn operands<'v, const N: usize>(tag: &'static str, value: &'v Value) -> Result<[&'v Value; N], DynError> {
    let items = value.as_array().ok_or(DynError::Operands(tag, N))?;
    let refs: Vec<&Value> = items.iter().collect();
    refs.try_into().map_err(|_| DynError::Operands(tag, N))
}

fn typed(tag: &str, operand: &DynExpr, type_name: &str, facets: &TypeFacets) -> Value {
    let mut object = Map::new();
    object.insert(tag.to_string(), operand.to_json());
    object.insert("$Type".to_string(), Value::String(type_name.to_string()));
    if let Ok(Value::Object(rendered)) = serde_json::to_value(facets) {
        for (json_key, facet) in FACET_KEYS {
            if let Some(v) = rendered.get(*facet) {
                object.insert(json_key.to_string(), v.clone());
            }
        }
    }
    Value::Object(object)
}

fn facets_from_json(object: &Map<String, Value>) -> TypeFacets {
    let mut rendered = Map::new();
    for (json_key, facet) in FACET_KEYS {
        if let Some(v) = object.get(*json_key) {
            rendered.insert(facet.to_string(), v.clone());
        }
    }
    serde_json::from_value(Value::Object(rendered)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use edm_core::expr::parse_tokens;
    use edm_core::Token;
    use pretty_assertions::assert_eq;

    fn translate(tokens: Value) -> Value {
        translate_with(tokens, &SchemaGraph::default())
    }

    fn translate_with(tokens: Value, graph: &SchemaGraph) -> Value {
        let tokens: Vec<Token> = serde_json::from_value(tokens).unwrap();
        let expr = parse_tokens(&tokens).unwrap();
        DynExpr::from_expr(&expr, graph, ODataVersion::V4).unwrap().to_json()
    }

    #[test]
    fn comparisons_and_connectives() {
        assert_eq!(
            translate(json!([{"ref": ["a"]}, "=", {"val": 1}, "and", "not", {"ref": ["$self", "b"]}])),
            json!({"$And": [
                {"$Eq": [{"$Path": "a"}, 1]},
                {"$Not": {"$Path": "b"}}
            ]})
        );
        assert_eq!(
            translate(json!([{"ref": ["x", "y"]}, "<>", {"val": "z"}, "or", {"ref": ["q"]}, "/", {"val": 2}, ">", {"val": 3}])),
            json!({"$Or": [
                {"$Ne": [{"$Path": "x/y"}, "z"]},
                {"$Gt": [{"$DivBy": [{"$Path": "q"}, 2]}, 3]}
            ]})
        );
    }

    #[test]
    fn predicates_are_rewritten() {
        assert_eq!(
            translate(json!([{"ref": ["a"]}, "between", {"val": 1}, "and", {"val": 5}])),
            json!({"$And": [{"$Ge": [{"$Path": "a"}, 1]}, {"$Le": [{"$Path": "a"}, 5]}]})
        );
        assert_eq!(
            translate(json!([{"ref": ["a"]}, "is", "not", "null"])),
            json!({"$Ne": [{"$Path": "a"}, {"$Null": null}]})
        );
        assert_eq!(
            translate(json!([{"ref": ["a"]}, "not", "in", {"list": [{"val": 1}, {"val": 2}]}])),
            json!({"$Not": {"$In": [{"$Path": "a"}, [1, 2]]}})
        );
        assert_eq!(
            translate(json!([{"ref": ["first"]}, "||", {"ref": ["last"]}])),
            json!({"$Apply": [{"$Path": "first"}, {"$Path": "last"}], "$Function": "odata.concat"})
        );
    }

    #[test]
    fn case_becomes_nested_if() {
        assert_eq!(
            translate(json!([
                "case", "when", {"ref": ["a"]}, "=", {"val": 1}, "then", {"val": "one"},
                "when", {"ref": ["a"]}, "=", {"val": 2}, "then", {"val": "two"},
                "else", {"val": "many"}, "end"
            ])),
            json!({"$If": [
                {"$Eq": [{"$Path": "a"}, 1]},
                "one",
                {"$If": [{"$Eq": [{"$Path": "a"}, 2]}, "two", "many"]}
            ]})
        );
    }

    #[test]
    fn casts_resolve_derived_types() {
        let graph: SchemaGraph = serde_json::from_value(json!({"definitions": {
            "S.Amount": {"kind": "type", "type": "cds.Decimal", "precision": 10, "scale": 2}
        }}))
        .unwrap();
        assert_eq!(
            translate_with(json!([{"ref": ["price"], "cast": {"type": "S.Amount"}}]), &graph),
            json!({"$Cast": {"$Path": "price"}, "$Type": "Edm.Decimal", "$Precision": 10, "$Scale": 2})
        );
        assert_eq!(
            translate_with(json!([{"ref": ["at"], "cast": {"type": "cds.Timestamp"}}]), &graph),
            json!({"$Cast": {"$Path": "at"}, "$Type": "Edm.DateTimeOffset", "$Precision": 7})
        );
    }

    #[test]
    fn functions_get_canonical_names() {
        let expr = translate(json!([{"func": "ceiling", "args": [{"ref": ["a"]}, {"val": 2}]}]));
        assert_eq!(
            expr,
            json!({"$Apply": [{"$Path": "a"}, 2], "$Function": "odata.ceiling"})
        );
        let parsed = DynExpr::from_json(&expr).unwrap();
        assert_eq!(parsed.calls(), vec![("odata.ceiling", 2)]);
    }

    #[test]
    fn csdl_json_is_instantiated() {
        let value = json!({"$If": [
            {"$And": [{"$Path": "a"}, {"$Not": {"$Path": "b"}}]},
            {"$LabeledElement": {"$Cast": {"$Path": "c"}, "$Type": "Edm.String", "$MaxLength": 10}, "$Name": "L"},
            {"$UrlRef": "https://example.com"}
        ]});
        let expr = DynExpr::from_json(&value).unwrap();
        assert!(matches!(expr, DynExpr::If { .. }));
        assert_eq!(expr.to_json(), value);
    }

    #[test]
    fn other_objects_are_records() {
        let expr = DynExpr::from_json(&json!({"Label": "x", "Value": {"$Path": "a"}})).unwrap();
        let DynExpr::Record(properties) = expr else {
            panic!("expected a record");
        };
        assert_eq!(properties["Label"], DynExpr::Literal(json!("x")));
        assert_eq!(
            properties["Value"],
            DynExpr::Path {
                kind: PathKind::Path,
                path: "a".into()
            }
        );
    }

    #[test]
    fn malformed_operators_are_errors() {
        assert_eq!(
            DynExpr::from_json(&json!({"$Eq": [1]})),
            Err(DynError::Operands("$Eq", 2))
        );
        assert_eq!(
            DynExpr::from_json(&json!({"$Apply": []})),
            Err(DynError::MissingCompanion("$Apply", "$Function"))
        );
    }
}
