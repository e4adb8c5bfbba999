//! Tree-walking interpreter for checked CEL expressions.

use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::ast::{BinaryOp, ComprehensionKind, Expr, UnaryOp};
use super::{CelError, Value};
use crate::glob::Pattern;

type EvalResult = Result<Value, CelError>;

fn eval_error(message: impl Into<String>) -> CelError {
    CelError::Evaluation {
        message: message.into(),
    }
}

pub(crate) struct Interpreter<'a> {
    vars: &'a BTreeMap<String, Value>,
    locals: Vec<(String, Value)>,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(vars: &'a BTreeMap<String, Value>) -> Self {
        Self {
            vars,
            locals: Vec::new(),
        }
    }

    fn lookup(&self, name: &str) -> EvalResult {
        if let Some((_, v)) = self.locals.iter().rev().find(|(n, _)| n == name) {
            return Ok(v.clone());
        }
        self.vars
            .get(name)
            .cloned()
            .ok_or_else(|| eval_error(format!("no such attribute: {}", name)))
    }

    pub(crate) fn eval(&mut self, expr: &Expr) -> EvalResult {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Ident(name) => self.lookup(name),
            Expr::Select { operand, field } => {
                let target = self.eval(operand)?;
                select(&target, field)
            }
            Expr::Has { operand, field } => match self.eval(operand)? {
                Value::Map(m) => Ok(Value::Bool(m.contains_key(field))),
                other => Err(eval_error(format!(
                    "has() on non-map value of type {}",
                    other.type_name()
                ))),
            },
            Expr::Index { operand, index } => {
                let target = self.eval(operand)?;
                let index = self.eval(index)?;
                self.index(&target, &index)
            }
            Expr::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|i| self.eval(i))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Map(entries) => {
                let mut map = BTreeMap::new();
                for (k, v) in entries {
                    let key = match self.eval(k)? {
                        Value::String(s) => s,
                        other => {
                            return Err(eval_error(format!(
                                "unsupported map key type {}",
                                other.type_name()
                            )))
                        }
                    };
                    let value = self.eval(v)?;
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match (op, value) {
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Neg, Value::Int(i)) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| eval_error("integer overflow")),
                    (UnaryOp::Neg, Value::Double(d)) => Ok(Value::Double(-d)),
                    (op, v) => Err(eval_error(format!(
                        "no such overload: {:?} {}",
                        op,
                        v.type_name()
                    ))),
                }
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right),
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => match self.eval(condition)? {
                Value::Bool(true) => self.eval(then),
                Value::Bool(false) => self.eval(otherwise),
                other => Err(eval_error(format!(
                    "ternary condition must be bool, got {}",
                    other.type_name()
                ))),
            },
            Expr::Call {
                target,
                function,
                args,
            } => {
                let target = match target {
                    Some(t) => Some(self.eval(t)?),
                    None => None,
                };
                let args = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(target, function, args)
            }
            Expr::Comprehension {
                kind,
                range,
                var,
                body,
            } => self.comprehension(*kind, range, var, body),
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> EvalResult {
        // Logical operators absorb errors on one side when the other side
        // decides the result.
        if op == BinaryOp::And || op == BinaryOp::Or {
            let decisive = op == BinaryOp::Or;
            let l = self.eval(left).and_then(expect_bool);
            if let Ok(b) = l {
                if b == decisive {
                    return Ok(Value::Bool(decisive));
                }
            }
            let r = self.eval(right).and_then(expect_bool);
            return match (l, r) {
                (_, Ok(b)) if b == decisive => Ok(Value::Bool(decisive)),
                (Ok(_), Ok(b)) => Ok(Value::Bool(b)),
                (Err(e), _) | (_, Err(e)) => Err(e),
            };
        }

        let l = self.eval(left)?;
        let r = self.eval(right)?;
        match op {
            BinaryOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
            BinaryOp::Ne => Ok(Value::Bool(!values_equal(&l, &r))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = compare(&l, &r)?;
                Ok(Value::Bool(match op {
                    BinaryOp::Lt => ordering == Ordering::Less,
                    BinaryOp::Le => ordering != Ordering::Greater,
                    BinaryOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }))
            }
            BinaryOp::In => match &r {
                Value::List(items) => Ok(Value::Bool(items.iter().any(|i| values_equal(i, &l)))),
                Value::Map(map) => match &l {
                    Value::String(k) => Ok(Value::Bool(map.contains_key(k))),
                    _ => Ok(Value::Bool(false)),
                },
                other => Err(eval_error(format!(
                    "no such overload: in {}",
                    other.type_name()
                ))),
            },
            BinaryOp::Add => add(l, r),
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, l, r),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    fn index(&self, target: &Value, index: &Value) -> EvalResult {
        match (target, index) {
            (Value::Map(m), Value::String(k)) => m
                .get(k)
                .cloned()
                .ok_or_else(|| eval_error(format!("no such key: {}", k))),
            (Value::List(items), idx) => {
                let i = match idx {
                    Value::Int(i) => *i,
                    Value::Uint(u) => *u as i64,
                    Value::Double(d) if d.fract() == 0.0 => *d as i64,
                    other => {
                        return Err(eval_error(format!(
                            "list index must be an integer, got {}",
                            other.type_name()
                        )))
                    }
                };
                usize::try_from(i)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .ok_or_else(|| eval_error(format!("index out of range: {}", i)))
            }
            (t, i) => Err(eval_error(format!(
                "cannot index {} with {}",
                t.type_name(),
                i.type_name()
            ))),
        }
    }

    fn comprehension(
        &mut self,
        kind: ComprehensionKind,
        range: &Expr,
        var: &str,
        body: &Expr,
    ) -> EvalResult {
        let items: Vec<Value> = match self.eval(range)? {
            Value::List(items) => items,
            Value::Map(map) => map.into_keys().map(Value::String).collect(),
            other => {
                return Err(eval_error(format!(
                    "cannot iterate over {}",
                    other.type_name()
                )))
            }
        };

        let mut matched = 0usize;
        let mut mapped = Vec::new();
        for item in items {
            self.locals.push((var.to_string(), item.clone()));
            let result = self.eval(body);
            self.locals.pop();
            let result = result?;

            match kind {
                ComprehensionKind::Map => mapped.push(result),
                _ => {
                    let b = expect_bool(result)?;
                    match kind {
                        ComprehensionKind::All if !b => return Ok(Value::Bool(false)),
                        ComprehensionKind::Exists if b => return Ok(Value::Bool(true)),
                        ComprehensionKind::ExistsOne if b => matched += 1,
                        ComprehensionKind::Filter if b => mapped.push(item),
                        _ => {}
                    }
                }
            }
        }

        Ok(match kind {
            ComprehensionKind::All => Value::Bool(true),
            ComprehensionKind::Exists => Value::Bool(false),
            ComprehensionKind::ExistsOne => Value::Bool(matched == 1),
            ComprehensionKind::Map | ComprehensionKind::Filter => Value::List(mapped),
        })
    }

    fn call(&self, target: Option<Value>, function: &str, args: Vec<Value>) -> EvalResult {
        // Global functions are accepted in receiver style as well:
        // size(x) == x.size().
        let (receiver, args) = match target {
            Some(t) => (t, args),
            None => {
                let mut args = args.into_iter();
                let first = args
                    .next()
                    .ok_or_else(|| eval_error(format!("{}() needs an argument", function)))?;
                (first, args.collect())
            }
        };

        match (function, &receiver, args.as_slice()) {
            ("size", v, []) => match v {
                Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(l) => Ok(Value::Int(l.len() as i64)),
                Value::Map(m) => Ok(Value::Int(m.len() as i64)),
                other => Err(no_overload(function, other)),
            },
            ("contains", Value::String(s), [Value::String(sub)]) => {
                Ok(Value::Bool(s.contains(sub.as_str())))
            }
            ("startsWith", Value::String(s), [Value::String(p)]) => {
                Ok(Value::Bool(s.starts_with(p.as_str())))
            }
            ("endsWith", Value::String(s), [Value::String(p)]) => {
                Ok(Value::Bool(s.ends_with(p.as_str())))
            }
            ("matches", Value::String(s), [Value::String(re)]) => {
                let re = Regex::new(re)
                    .map_err(|e| eval_error(format!("invalid regular expression: {}", e)))?;
                Ok(Value::Bool(re.is_match(s)))
            }
            ("lowerAscii", Value::String(s), []) => Ok(Value::String(s.to_ascii_lowercase())),
            ("upperAscii", Value::String(s), []) => Ok(Value::String(s.to_ascii_uppercase())),
            ("trim", Value::String(s), []) => Ok(Value::String(s.trim().to_string())),
            ("split", Value::String(s), [Value::String(sep)]) => Ok(Value::List(
                s.split(sep.as_str())
                    .map(|p| Value::String(p.to_string()))
                    .collect(),
            )),
            ("replace", Value::String(s), [Value::String(from), Value::String(to)]) => {
                Ok(Value::String(s.replace(from.as_str(), to)))
            }
            ("join", Value::List(items), [Value::String(sep)]) => {
                let parts: Result<Vec<String>, CelError> = items
                    .iter()
                    .map(|i| match i {
                        Value::String(s) => Ok(s.clone()),
                        other => Err(no_overload("join", other)),
                    })
                    .collect();
                Ok(Value::String(parts?.join(sep.as_str())))
            }
            ("string", v, []) => Ok(Value::String(v.to_display_string())),
            ("int", v, []) => match v {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Uint(u) => Ok(Value::Int(*u as i64)),
                Value::Double(d) => Ok(Value::Int(d.trunc() as i64)),
                Value::String(s) => s
                    .parse()
                    .map(Value::Int)
                    .map_err(|_| eval_error(format!("cannot convert '{}' to int", s))),
                other => Err(no_overload(function, other)),
            },
            ("double", v, []) => match v {
                Value::Int(i) => Ok(Value::Double(*i as f64)),
                Value::Uint(u) => Ok(Value::Double(*u as f64)),
                Value::Double(d) => Ok(Value::Double(*d)),
                Value::String(s) => s
                    .parse()
                    .map(Value::Double)
                    .map_err(|_| eval_error(format!("cannot convert '{}' to double", s))),
                other => Err(no_overload(function, other)),
            },
            ("pathChanged", Value::String(pattern), []) => Ok(Value::Bool(self.path_changed(pattern))),
            (f, v, _) => Err(eval_error(format!(
                "no such overload: {}.{}()",
                v.type_name(),
                f
            ))),
        }
    }

    /// True when a changed file matches the glob `pattern`.
    fn path_changed(&self, pattern: &str) -> bool {
        let Ok(glob) = Pattern::new(pattern) else {
            return false;
        };
        match self.vars.get("files").and_then(|f| match f {
            Value::Map(m) => m.get("all"),
            _ => None,
        }) {
            Some(Value::List(all)) => all.iter().any(|f| match f {
                Value::String(path) => glob.matches(path),
                _ => false,
            }),
            _ => false,
        }
    }
}

fn no_overload(function: &str, value: &Value) -> CelError {
    eval_error(format!(
        "no such overload: {}({})",
        function,
        value.type_name()
    ))
}

fn expect_bool(value: Value) -> Result<bool, CelError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(eval_error(format!(
            "expected bool, got {}",
            other.type_name()
        ))),
    }
}

fn select(target: &Value, field: &str) -> EvalResult {
    match target {
        Value::Map(m) => m
            .get(field)
            .cloned()
            .ok_or_else(|| eval_error(format!("no such key: {}", field))),
        other => Err(eval_error(format!(
            "cannot select field '{}' on {}",
            field,
            other.type_name()
        ))),
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Uint(u) => Some(*u as f64),
        Value::Double(d) => Some(*d),
        _ => None,
    }
}

/// Equality with numeric values compared across int, uint and double.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).map(|w| values_equal(v, w)).unwrap_or(false))
        }
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
    }
}

fn compare(a: &Value, b: &Value) -> Result<Ordering, CelError> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Ok(x.cmp(y)),
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x
                .partial_cmp(&y)
                .ok_or_else(|| eval_error("cannot compare NaN")),
            _ => Err(eval_error(format!(
                "no such overload: {} < {}",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

fn add(l: Value, r: Value) -> EvalResult {
    match (l, r) {
        (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (l, r) => arithmetic(BinaryOp::Add, l, r),
    }
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> EvalResult {
    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div if b == 0 => return Err(eval_error("division by zero")),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Rem if b == 0 => return Err(eval_error("modulus by zero")),
                BinaryOp::Rem => a.checked_rem(b),
                _ => None,
            };
            result
                .map(Value::Int)
                .ok_or_else(|| eval_error("integer overflow"))
        }
        _ => match (as_f64(&l), as_f64(&r)) {
            (Some(a), Some(b)) => Ok(Value::Double(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => {
                    return Err(eval_error(format!(
                        "no such overload: double {:?} double",
                        op
                    )))
                }
            })),
            _ => Err(eval_error(format!(
                "no such overload: {} {:?} {}",
                l.type_name(),
                op,
                r.type_name()
            ))),
        },
    }
}
