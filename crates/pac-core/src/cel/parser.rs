//! Recursive-descent parser producing [`Expr`] trees.

use super::ast::{BinaryOp, ComprehensionKind, Expr, UnaryOp};
use super::lexer::{tokenize, Spanned, Token};
use super::{CelError, Value};

/// Nesting limit guarding against pathological inputs.
const MAX_DEPTH: usize = 128;

pub(crate) fn parse(input: &str) -> Result<Expr, CelError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(CelError::Parse {
            message: "empty expression".to_string(),
        });
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expression()?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(CelError::Parse {
            message: format!(
                "unexpected token {:?} at offset {}",
                extra.token, extra.offset
            ),
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), CelError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {:?}", expected)))
        }
    }

    fn error(&self, message: &str) -> CelError {
        let location = match self.tokens.get(self.pos) {
            Some(s) => format!("{:?} at offset {}", s.token, s.offset),
            None => "end of input".to_string(),
        };
        CelError::Parse {
            message: format!("{}, found {}", message, location),
        }
    }

    fn enter(&mut self) -> Result<(), CelError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, CelError> {
        self.enter()?;
        let condition = self.or()?;
        let result = if self.eat(&Token::Question) {
            let then = self.or()?;
            self.expect(Token::Colon)?;
            let otherwise = self.expression()?;
            Expr::Conditional {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            }
        } else {
            condition
        };
        self.depth -= 1;
        Ok(result)
    }

    fn or(&mut self) -> Result<Expr, CelError> {
        let mut left = self.and()?;
        while self.eat(&Token::OrOr) {
            let right = self.and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, CelError> {
        let mut left = self.relation()?;
        while self.eat(&Token::AndAnd) {
            let right = self.relation()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn relation(&mut self) -> Result<Expr, CelError> {
        let mut left = self.addition()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::In) => BinaryOp::In,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.addition()?;
            left = binary(op, left, right);
        }
    }

    fn addition(&mut self) -> Result<Expr, CelError> {
        let mut left = self.multiplication()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplication()?;
            left = binary(op, left, right);
        }
    }

    fn multiplication(&mut self) -> Result<Expr, CelError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = binary(op, left, right);
        }
    }

    fn unary(&mut self) -> Result<Expr, CelError> {
        if self.eat(&Token::Bang) {
            self.enter()?;
            let operand = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        if self.eat(&Token::Minus) {
            self.enter()?;
            let operand = self.unary()?;
            self.depth -= 1;
            return Ok(match operand {
                Expr::Literal(Value::Int(i)) => Expr::Literal(Value::Int(-i)),
                Expr::Literal(Value::Double(d)) => Expr::Literal(Value::Double(-d)),
                other => Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(other),
                },
            });
        }
        self.member()
    }

    fn member(&mut self) -> Result<Expr, CelError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let field = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    _ => {
                        self.pos -= 1;
                        return Err(self.error("expected field name after '.'"));
                    }
                };
                if self.eat(&Token::LParen) {
                    let args = self.arguments(Token::RParen)?;
                    expr = member_call(expr, field, args)?;
                } else {
                    expr = Expr::Select {
                        operand: Box::new(expr),
                        field,
                    };
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.expression()?;
                self.expect(Token::RBracket)?;
                expr = Expr::Index {
                    operand: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, CelError> {
        let token = self
            .advance()
            .ok_or_else(|| self.error("unexpected end of expression"))?;
        match token {
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Uint(u) => Ok(Expr::Literal(Value::Uint(u))),
            Token::Double(d) => Ok(Expr::Literal(Value::Double(d))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let args = self.arguments(Token::RParen)?;
                    global_call(name, args)
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => Ok(Expr::List(self.arguments(Token::RBracket)?)),
            Token::LBrace => {
                let mut entries = Vec::new();
                if !self.eat(&Token::RBrace) {
                    loop {
                        let key = self.expression()?;
                        self.expect(Token::Colon)?;
                        let value = self.expression()?;
                        entries.push((key, value));
                        if self.eat(&Token::RBrace) {
                            break;
                        }
                        self.expect(Token::Comma)?;
                        if self.eat(&Token::RBrace) {
                            break;
                        }
                    }
                }
                Ok(Expr::Map(entries))
            }
            _ => {
                self.pos -= 1;
                Err(self.error("unexpected token"))
            }
        }
    }

    /// Comma separated expressions up to `close`; a trailing comma is allowed.
    fn arguments(&mut self, close: Token) -> Result<Vec<Expr>, CelError> {
        let mut args = Vec::new();
        if self.eat(&close) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&close) {
                return Ok(args);
            }
            self.expect(Token::Comma)?;
            if self.eat(&close) {
                return Ok(args);
            }
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn global_call(function: String, mut args: Vec<Expr>) -> Result<Expr, CelError> {
    if function == "has" {
        if args.len() != 1 {
            return Err(CelError::Parse {
                message: "has() takes exactly one argument".to_string(),
            });
        }
        return match args.remove(0) {
            Expr::Select { operand, field } => Ok(Expr::Has { operand, field }),
            _ => Err(CelError::Parse {
                message: "has() argument must be a field selection".to_string(),
            }),
        };
    }
    Ok(Expr::Call {
        target: None,
        function,
        args,
    })
}

fn member_call(target: Expr, function: String, mut args: Vec<Expr>) -> Result<Expr, CelError> {
    let kind = match function.as_str() {
        "all" => Some(ComprehensionKind::All),
        "exists" => Some(ComprehensionKind::Exists),
        "exists_one" => Some(ComprehensionKind::ExistsOne),
        "map" => Some(ComprehensionKind::Map),
        "filter" => Some(ComprehensionKind::Filter),
        _ => None,
    };

    if let Some(kind) = kind {
        if args.len() != 2 {
            return Err(CelError::Parse {
                message: format!("{}() takes a variable and an expression", function),
            });
        }
        let body = args.remove(1);
        let var = match args.remove(0) {
            Expr::Ident(name) => name,
            _ => {
                return Err(CelError::Parse {
                    message: format!("{}() first argument must be an identifier", function),
                })
            }
        };
        return Ok(Expr::Comprehension {
            kind,
            range: Box::new(target),
            var,
            body: Box::new(body),
        });
    }

    Ok(Expr::Call {
        target: Some(Box::new(target)),
        function,
        args,
    })
}
