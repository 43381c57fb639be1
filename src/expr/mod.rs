//! Predicate engine for filter expressions.
//!
//! An expression is compiled once (lex + parse) and evaluated against any
//! number of events. The single bound name is `event`, exposing the fields
//! described in the configuration documentation. `has(event.X)` tests
//! presence of an optional field.

pub mod parser;
pub mod token;

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::event::Event;

use parser::{CmpOp, Expr, Parser};

/// Runtime value produced while walking an expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    const fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

/// A predicate compiled from its source string.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    source: String,
    ast: Expr,
}

impl CompiledExpr {
    /// Compile a predicate string.
    ///
    /// # Errors
    ///
    /// Returns `BadExpression` with a diagnostic when the source does not
    /// lex or parse.
    pub fn compile(source: &str) -> Result<Self> {
        let tokens = token::tokenize(source)?;
        let ast = Parser::new(tokens).parse()?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    /// The original predicate source.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate the predicate against an event.
    ///
    /// # Errors
    ///
    /// Returns `Eval` on a type mismatch, on access to a missing field or
    /// map key, or when the expression does not produce a boolean.
    pub fn evaluate(&self, event: &Event) -> Result<bool> {
        let bindings = event_bindings(event);
        match eval(&self.ast, &bindings)? {
            Value::Bool(b) => Ok(b),
            other => Err(Error::Eval(format!(
                "expression produced {} instead of bool",
                other.type_name()
            ))),
        }
    }
}

/// Project an event into the `event` binding map.
///
/// `reason`, `message` and `status` bind to empty strings when unset so
/// inequality checks against them stay total; `replicas`, `containers` and
/// `serviceType` only appear when present, which is what `has()` inspects.
fn event_bindings(event: &Event) -> BTreeMap<String, Value> {
    let mut map = BTreeMap::new();
    map.insert("kind".into(), Value::Str(event.kind.to_string()));
    map.insert("namespace".into(), Value::Str(event.namespace.clone()));
    map.insert("name".into(), Value::Str(event.name.clone()));
    map.insert("eventType".into(), Value::Str(event.event_type.to_string()));
    map.insert(
        "reason".into(),
        Value::Str(event.reason.clone().unwrap_or_default()),
    );
    map.insert(
        "message".into(),
        Value::Str(event.message.clone().unwrap_or_default()),
    );
    map.insert(
        "status".into(),
        Value::Str(event.status.clone().unwrap_or_default()),
    );

    let labels = event
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), Value::Str(v.clone())))
        .collect();
    map.insert("labels".into(), Value::Map(labels));

    if let Some(replicas) = event.replicas {
        let mut r = BTreeMap::new();
        r.insert("desired".into(), Value::Int(i64::from(replicas.desired)));
        r.insert("ready".into(), Value::Int(i64::from(replicas.ready)));
        r.insert("current".into(), Value::Int(i64::from(replicas.current)));
        map.insert("replicas".into(), Value::Map(r));
    }

    if !event.containers.is_empty() {
        let containers = event
            .containers
            .iter()
            .map(|c| {
                let mut m = BTreeMap::new();
                m.insert("name".into(), Value::Str(c.name.clone()));
                m.insert("image".into(), Value::Str(c.image.clone()));
                Value::Map(m)
            })
            .collect();
        map.insert("containers".into(), Value::List(containers));
    }

    if let Some(service_type) = &event.service_type {
        map.insert("serviceType".into(), Value::Str(service_type.clone()));
    }

    map
}

fn eval(expr: &Expr, bindings: &BTreeMap<String, Value>) -> Result<Value> {
    match expr {
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Int(n) => Ok(Value::Int(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::List(items) => {
            let values = items
                .iter()
                .map(|item| eval(item, bindings))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::List(values))
        }
        Expr::Field(path) => resolve_path(path, bindings),
        Expr::Has(path) => Ok(Value::Bool(resolve_path(path, bindings).is_ok())),
        Expr::Not(operand) => match eval(operand, bindings)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(Error::Eval(format!(
                "'!' requires bool, found {}",
                other.type_name()
            ))),
        },
        Expr::And(left, right) => {
            if !eval_bool(left, bindings)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval_bool(right, bindings)?))
        }
        Expr::Or(left, right) => {
            if eval_bool(left, bindings)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval_bool(right, bindings)?))
        }
        Expr::Cmp(op, left, right) => {
            let lhs = eval(left, bindings)?;
            let rhs = eval(right, bindings)?;
            compare(*op, &lhs, &rhs)
        }
        Expr::In(needle, haystack) => {
            let needle = eval(needle, bindings)?;
            match eval(haystack, bindings)? {
                Value::List(items) => Ok(Value::Bool(items.contains(&needle))),
                other => Err(Error::Eval(format!(
                    "'in' requires a list on the right, found {}",
                    other.type_name()
                ))),
            }
        }
    }
}

fn eval_bool(expr: &Expr, bindings: &BTreeMap<String, Value>) -> Result<bool> {
    match eval(expr, bindings)? {
        Value::Bool(b) => Ok(b),
        other => Err(Error::Eval(format!(
            "logical operand must be bool, found {}",
            other.type_name()
        ))),
    }
}

fn resolve_path(path: &[String], bindings: &BTreeMap<String, Value>) -> Result<Value> {
    if path.is_empty() {
        return Err(Error::Eval("'event' is not a value by itself".into()));
    }
    let mut current = bindings
        .get(&path[0])
        .ok_or_else(|| Error::Eval(format!("event has no field '{}'", path[0])))?;
    for segment in &path[1..] {
        match current {
            Value::Map(map) => {
                current = map
                    .get(segment)
                    .ok_or_else(|| Error::Eval(format!("no such key '{segment}'")))?;
            }
            other => {
                return Err(Error::Eval(format!(
                    "cannot select '{segment}' from {}",
                    other.type_name()
                )))
            }
        }
    }
    Ok(current.clone())
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    match op {
        CmpOp::Eq | CmpOp::Ne => {
            let equal = match (lhs, rhs) {
                (Value::Str(a), Value::Str(b)) => a == b,
                (Value::Int(a), Value::Int(b)) => a == b,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                _ => {
                    return Err(Error::Eval(format!(
                        "cannot compare {} {} {}",
                        lhs.type_name(),
                        op.symbol(),
                        rhs.type_name()
                    )))
                }
            };
            Ok(Value::Bool(if op == CmpOp::Eq { equal } else { !equal }))
        }
        CmpOp::Lt | CmpOp::Gt | CmpOp::Le | CmpOp::Ge => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => {
                let result = match op {
                    CmpOp::Lt => a < b,
                    CmpOp::Gt => a > b,
                    CmpOp::Le => a <= b,
                    CmpOp::Ge => a >= b,
                    CmpOp::Eq | CmpOp::Ne => unreachable!(),
                };
                Ok(Value::Bool(result))
            }
            _ => Err(Error::Eval(format!(
                "'{}' requires integers, found {} and {}",
                op.symbol(),
                lhs.type_name(),
                rhs.type_name()
            ))),
        },
    }
}
