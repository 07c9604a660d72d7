//! Operator trees for CSN token lists.
//!
//! On-conditions, parameter defaults and expression-valued annotations all
//! arrive as flat token lists (`[{ref}, "=", {val}, "and", ...]`). This module
//! turns them into an [`Expr`] tree with the usual precedence:
//! `or` < `and` < `not` < comparison < `||` < `+ -` < `* /` < unary `-`.

use thiserror::Error;

use crate::types::{CastSpec, ExprNode, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ref(Vec<String>),
    Val(serde_json::Value),
    Null,
    EnumSymbol(String),
    Func { name: String, args: Vec<Expr> },
    Cast { operand: Box<Expr>, spec: CastSpec },
    List(Vec<Expr>),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    IsNull { operand: Box<Expr>, negated: bool },
    Between { operand: Box<Expr>, low: Box<Expr>, high: Box<Expr>, negated: bool },
    In { operand: Box<Expr>, list: Box<Expr>, negated: bool },
    Case { branches: Vec<(Expr, Expr)>, otherwise: Option<Box<Expr>> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn from_keyword(kw: &str) -> Option<Self> {
        Some(match kw {
            "or" => BinaryOp::Or,
            "and" => BinaryOp::And,
            "=" | "==" => BinaryOp::Eq,
            "!=" | "<>" => BinaryOp::Ne,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "||" => BinaryOp::Concat,
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            _ => return None,
        })
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 4,
            BinaryOp::Concat => 5,
            BinaryOp::Add | BinaryOp::Sub => 6,
            BinaryOp::Mul | BinaryOp::Div => 7,
        }
    }
}

/// Precedence of `not`, between `and` and the comparisons.
const NOT_PRECEDENCE: u8 = 3;
/// Precedence of `is null`, `between` and `in` (same level as comparisons).
const PREDICATE_PRECEDENCE: u8 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token \"{0}\"")]
    UnexpectedToken(String),
    #[error("expected \"{expected}\" but found \"{found}\"")]
    Expected { expected: String, found: String },
    #[error("empty expression node")]
    EmptyNode,
}

/// Parse a complete token list into one expression.
pub fn parse_tokens(tokens: &[Token]) -> Result<Expr, ExprError> {
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression(0)?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(ExprError::UnexpectedToken(describe(tok))),
    }
}

/// Translate a single expression object (`{ref}`, `{val}`, `{func, args}`, `{xpr}`, ...).
pub fn parse_node(node: &ExprNode) -> Result<Expr, ExprError> {
    let base = if let Some(ref path) = node.path {
        Expr::Ref(path.clone())
    } else if let Some(ref val) = node.val {
        if val.is_null() {
            Expr::Null
        } else {
            Expr::Val(val.clone())
        }
    } else if let Some(ref symbol) = node.symbol {
        Expr::EnumSymbol(symbol.clone())
    } else if let Some(ref name) = node.func {
        let args = match node.args {
            Some(ref args) => args
                .iter()
                .map(|arg| parse_tokens(std::slice::from_ref(arg)))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        Expr::Func {
            name: name.clone(),
            args,
        }
    } else if let Some(ref xpr) = node.xpr {
        parse_tokens(xpr)?
    } else if let Some(ref list) = node.list {
        Expr::List(
            list.iter()
                .map(|item| parse_tokens(std::slice::from_ref(item)))
                .collect::<Result<Vec<_>, _>>()?,
        )
    } else {
        return Err(ExprError::EmptyNode);
    };

    Ok(match node.cast {
        Some(ref spec) => Expr::Cast {
            operand: Box::new(base),
            spec: spec.clone(),
        },
        None => base,
    })
}

fn describe(token: &Token) -> String {
    match token {
        Token::Keyword(kw) => kw.clone(),
        Token::Node(node) => match node.path {
            Some(ref path) => path.join("."),
            None => "<expression>".into(),
        },
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self) -> Option<String> {
        match self.peek() {
            Some(Token::Keyword(kw)) => Some(kw.to_ascii_lowercase()),
            _ => None,
        }
    }

    fn peek_keyword_at(&self, offset: usize) -> Option<String> {
        match self.tokens.get(self.pos + offset) {
            Some(Token::Keyword(kw)) => Some(kw.to_ascii_lowercase()),
            _ => None,
        }
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect_keyword(&mut self, expected: &str) -> Result<(), ExprError> {
        match self.advance() {
            Some(Token::Keyword(kw)) if kw.eq_ignore_ascii_case(expected) => Ok(()),
            Some(tok) => Err(ExprError::Expected {
                expected: expected.into(),
                found: describe(tok),
            }),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn expression(&mut self, min_precedence: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.prefix()?;

        loop {
            let Some(kw) = self.peek_keyword() else {
                break;
            };

            // Postfix predicates: is [not] null, [not] between, [not] in
            if PREDICATE_PRECEDENCE > min_precedence {
                if kw == "is" {
                    self.advance();
                    let negated = self.peek_keyword().as_deref() == Some("not");
                    if negated {
                        self.advance();
                    }
                    self.expect_keyword("null")?;
                    lhs = Expr::IsNull {
                        operand: Box::new(lhs),
                        negated,
                    };
                    continue;
                }
                let negated = kw == "not"
                    && matches!(self.peek_keyword_at(1).as_deref(), Some("between" | "in"));
                let predicate = if negated {
                    self.peek_keyword_at(1)
                } else {
                    Some(kw.clone())
                };
                match predicate.as_deref() {
                    Some("between") => {
                        self.pos += if negated { 2 } else { 1 };
                        let low = self.expression(PREDICATE_PRECEDENCE)?;
                        self.expect_keyword("and")?;
                        let high = self.expression(PREDICATE_PRECEDENCE)?;
                        lhs = Expr::Between {
                            operand: Box::new(lhs),
                            low: Box::new(low),
                            high: Box::new(high),
                            negated,
                        };
                        continue;
                    }
                    Some("in") => {
                        self.pos += if negated { 2 } else { 1 };
                        let list = self.expression(PREDICATE_PRECEDENCE)?;
                        lhs = Expr::In {
                            operand: Box::new(lhs),
                            list: Box::new(list),
                            negated,
                        };
                        continue;
                    }
                    _ => {}
                }
            }

            let Some(op) = BinaryOp::from_keyword(&kw) else {
                break;
            };
            let precedence = op.precedence();
            if precedence <= min_precedence {
                break;
            }
            self.advance();
            let rhs = self.expression(precedence)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, ExprError> {
        let token = self.advance().ok_or(ExprError::UnexpectedEnd)?;
        match token {
            Token::Node(node) => parse_node(node),
            Token::Keyword(kw) => match kw.to_ascii_lowercase().as_str() {
                "(" => {
                    let inner = self.expression(0)?;
                    self.expect_keyword(")")?;
                    Ok(inner)
                }
                "not" => {
                    let operand = self.expression(NOT_PRECEDENCE)?;
                    Ok(Expr::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    })
                }
                "-" => {
                    let operand = self.expression(8)?;
                    Ok(Expr::Unary {
                        op: UnaryOp::Neg,
                        operand: Box::new(operand),
                    })
                }
                "null" => Ok(Expr::Null),
                "case" => self.case(),
                _ => Err(ExprError::UnexpectedToken(kw.clone())),
            },
        }
    }

    fn case(&mut self) -> Result<Expr, ExprError> {
        let mut branches = Vec::new();
        let mut otherwise = None;
        loop {
            match self.peek_keyword().as_deref() {
                Some("when") => {
                    self.advance();
                    let condition = self.expression(0)?;
                    self.expect_keyword("then")?;
                    let result = self.expression(0)?;
                    branches.push((condition, result));
                }
                Some("else") => {
                    self.advance();
                    otherwise = Some(Box::new(self.expression(0)?));
                }
                Some("end") => {
                    self.advance();
                    break;
                }
                Some(other) => return Err(ExprError::UnexpectedToken(other.to_string())),
                None => return Err(ExprError::UnexpectedEnd),
            }
        }
        Ok(Expr::Case {
            branches,
            otherwise,
        })
    }
}

// ---------------------------------------------------------------------------
// Constraint-condition helpers
// ---------------------------------------------------------------------------

/// True if every token is a reference/value object or one of `=`, `and`, `(`, `)`.
/// Nested `xpr` groups are checked recursively. Anything else disqualifies the
/// whole on-condition from referential constraint derivation.
pub fn is_constraint_condition(tokens: &[Token]) -> bool {
    tokens.iter().all(|tok| match tok {
        Token::Keyword(kw) => matches!(kw.to_ascii_lowercase().as_str(), "=" | "and" | "(" | ")"),
        Token::Node(node) => match node.xpr {
            Some(ref xpr) => is_constraint_condition(xpr),
            None => node.func.is_none() && node.list.is_none(),
        },
    })
}

/// The `lhs = rhs` comparisons of a conjunction, in source order.
pub fn comparisons(expr: &Expr) -> Vec<(&Expr, &Expr)> {
    let mut out = Vec::new();
    collect_comparisons(expr, &mut out);
    out
}

fn collect_comparisons<'a>(expr: &'a Expr, out: &mut Vec<(&'a Expr, &'a Expr)>) {
    if let Expr::Binary { op, lhs, rhs } = expr {
        match op {
            BinaryOp::And => {
                collect_comparisons(lhs, out);
                collect_comparisons(rhs, out);
            }
            BinaryOp::Eq => out.push((lhs, rhs)),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tokens(value: serde_json::Value) -> Vec<Token> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_conjunction_of_comparisons() {
        let toks = tokens(json!([
            {"ref": ["a", "x"]}, "=", {"ref": ["x"]}, "and", {"ref": ["a", "y"]}, "=", {"val": 1}
        ]));
        let expr = parse_tokens(&toks).unwrap();
        let cmps = comparisons(&expr);
        assert_eq!(cmps.len(), 2);
        assert_eq!(*cmps[0].0, Expr::Ref(vec!["a".into(), "x".into()]));
        assert_eq!(*cmps[1].1, Expr::Val(json!(1)));
    }

    #[test]
    fn precedence_and_binds_tighter_than_or() {
        let toks = tokens(json!([{"ref": ["a"]}, "or", {"ref": ["b"]}, "and", {"ref": ["c"]}]));
        match parse_tokens(&toks).unwrap() {
            Expr::Binary { op: BinaryOp::Or, rhs, .. } => {
                assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::And, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parentheses_and_xpr_group() {
        let toks = tokens(json!([
            "(", {"ref": ["a"]}, "or", {"ref": ["b"]}, ")", "and", {"xpr": [{"ref": ["c"]}, "=", {"val": 2}]}
        ]));
        match parse_tokens(&toks).unwrap() {
            Expr::Binary { op: BinaryOp::And, lhs, rhs } => {
                assert!(matches!(*lhs, Expr::Binary { op: BinaryOp::Or, .. }));
                assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Eq, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn predicates() {
        let toks = tokens(json!([{"ref": ["a"]}, "is", "not", "null"]));
        assert!(matches!(parse_tokens(&toks).unwrap(), Expr::IsNull { negated: true, .. }));

        let toks = tokens(json!([{"ref": ["a"]}, "between", {"val": 1}, "and", {"val": 5}]));
        assert!(matches!(parse_tokens(&toks).unwrap(), Expr::Between { negated: false, .. }));

        let toks = tokens(json!([{"ref": ["a"]}, "not", "in", {"list": [{"val": 1}, {"val": 2}]}]));
        match parse_tokens(&toks).unwrap() {
            Expr::In { negated, list, .. } => {
                assert!(negated);
                assert!(matches!(*list, Expr::List(ref items) if items.len() == 2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn case_expression() {
        let toks = tokens(json!([
            "case", "when", {"ref": ["a"]}, ">", {"val": 1}, "then", {"val": "x"}, "else", {"val": "y"}, "end"
        ]));
        match parse_tokens(&toks).unwrap() {
            Expr::Case { branches, otherwise } => {
                assert_eq!(branches.len(), 1);
                assert_eq!(otherwise.as_deref(), Some(&Expr::Val(json!("y"))));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn function_and_cast() {
        let toks = tokens(json!([
            {"func": "concat", "args": [{"ref": ["a"]}, {"val": "-"}]},
            "||",
            {"ref": ["b"], "cast": {"type": "cds.String", "length": 10}}
        ]));
        match parse_tokens(&toks).unwrap() {
            Expr::Binary { op: BinaryOp::Concat, lhs, rhs } => {
                assert!(matches!(*lhs, Expr::Func { ref args, .. } if args.len() == 2));
                assert!(matches!(*rhs, Expr::Cast { ref spec, .. } if spec.length == Some(10)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn errors_on_dangling_operator() {
        let toks = tokens(json!([{"ref": ["a"]}, "="]));
        assert_eq!(parse_tokens(&toks), Err(ExprError::UnexpectedEnd));
        let toks = tokens(json!([{"ref": ["a"]}, {"ref": ["b"]}]));
        assert!(matches!(parse_tokens(&toks), Err(ExprError::UnexpectedToken(_))));
    }

    #[test]
    fn constraint_condition_filter() {
        let ok = tokens(json!([{"ref": ["a", "x"]}, "=", {"ref": ["x"]}, "and", "(", {"ref": ["a", "y"]}, "=", {"ref": ["y"]}, ")"]));
        assert!(is_constraint_condition(&ok));
        let bad = tokens(json!([{"ref": ["a", "x"]}, "=", {"ref": ["x"]}, "or", {"ref": ["a", "y"]}, "=", {"ref": ["y"]}]));
        assert!(!is_constraint_condition(&bad));
        let nested_bad = tokens(json!([{"xpr": [{"ref": ["a", "x"]}, ">", {"ref": ["x"]}]}]));
        assert!(!is_constraint_condition(&nested_bad));
    }
}
