//! CEL syntax tree and tree walking helpers.

use super::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    And,
    Or,
}

/// A parsed CEL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    /// `operand.field`
    Select {
        operand: Box<Expr>,
        field: String,
    },
    /// `operand[index]`
    Index {
        operand: Box<Expr>,
        index: Box<Expr>,
    },
    /// `name(args)` or `target.name(args)`
    Call {
        target: Option<Box<Expr>>,
        function: String,
        args: Vec<Expr>,
    },
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// `has(operand.field)`
    Has {
        operand: Box<Expr>,
        field: String,
    },
    /// `range.exists(var, body)` and friends
    Comprehension {
        kind: ComprehensionKind,
        range: Box<Expr>,
        var: String,
        body: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComprehensionKind {
    All,
    Exists,
    ExistsOne,
    Map,
    Filter,
}

impl Expr {
    /// Depth-first walk; returns true as soon as `matcher` accepts a node.
    pub fn any(&self, matcher: &dyn Fn(&Expr) -> bool) -> bool {
        if matcher(self) {
            return true;
        }
        match self {
            Expr::Literal(_) | Expr::Ident(_) => false,
            Expr::Select { operand, .. } | Expr::Has { operand, .. } => operand.any(matcher),
            Expr::Index { operand, index } => operand.any(matcher) || index.any(matcher),
            Expr::Call { target, args, .. } => {
                target.as_ref().map(|t| t.any(matcher)).unwrap_or(false)
                    || args.iter().any(|a| a.any(matcher))
            }
            Expr::List(items) => items.iter().any(|i| i.any(matcher)),
            Expr::Map(entries) => entries
                .iter()
                .any(|(k, v)| k.any(matcher) || v.any(matcher)),
            Expr::Unary { operand, .. } => operand.any(matcher),
            Expr::Binary { left, right, .. } => left.any(matcher) || right.any(matcher),
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => condition.any(matcher) || then.any(matcher) || otherwise.any(matcher),
            Expr::Comprehension { range, body, .. } => range.any(matcher) || body.any(matcher),
        }
    }

    /// True when the expression references the variable `name`.
    pub fn references_identifier(&self, name: &str) -> bool {
        self.any(&|e| matches!(e, Expr::Ident(n) if n == name))
    }

    /// True when the expression accesses one of `fields`, by dot notation
    /// or by bracket notation with a string literal key.
    pub fn references_field(&self, fields: &[&str]) -> bool {
        self.any(&|e| match e {
            Expr::Select { field, .. } | Expr::Has { field, .. } => fields.contains(&field.as_str()),
            Expr::Index { index, .. } => {
                matches!(index.as_ref(), Expr::Literal(Value::String(s)) if fields.contains(&s.as_str()))
            }
            _ => false,
        })
    }

    /// True when the expression calls `function`, as a global or member.
    pub fn references_function(&self, function: &str) -> bool {
        self.any(&|e| matches!(e, Expr::Call { function: f, .. } if f == function))
    }

    /// String literals compared with `==` to the variable `name`, on
    /// either side of the operator.
    pub fn literals_compared_to(&self, name: &str) -> Vec<String> {
        let found = std::cell::RefCell::new(Vec::new());
        self.any(&|e| {
            if let Expr::Binary {
                op: BinaryOp::Eq,
                left,
                right,
            } = e
            {
                match (left.as_ref(), right.as_ref()) {
                    (Expr::Ident(n), Expr::Literal(Value::String(s)))
                    | (Expr::Literal(Value::String(s)), Expr::Ident(n))
                        if n == name =>
                    {
                        found.borrow_mut().push(s.clone())
                    }
                    _ => {}
                }
            }
            false
        });
        found.into_inner()
    }

    /// True when a string literal in the expression contains `needle`.
    pub fn contains_string_literal(&self, needle: &str) -> bool {
        self.any(&|e| matches!(e, Expr::Literal(Value::String(s)) if s.contains(needle)))
    }
}
