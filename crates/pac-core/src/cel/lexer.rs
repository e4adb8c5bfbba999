//! Tokeniser for CEL expressions.

use super::CelError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Int(i64),
    Uint(u64),
    Double(f64),
    Str(String),
    True,
    False,
    Null,
    In,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Dot,
    Comma,
    Colon,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
}

/// A token with its byte offset, used in error messages.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Spanned>, CelError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }
        // Line comments
        if c == '/' && matches!(chars.get(i + 1), Some((_, '/'))) {
            while i < chars.len() && chars[i].1 != '\n' {
                i += 1;
            }
            continue;
        }

        let single = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            '.' if !matches!(chars.get(i + 1), Some((_, d)) if d.is_ascii_digit()) => {
                Some(Token::Dot)
            }
            ',' => Some(Token::Comma),
            ':' => Some(Token::Colon),
            '?' => Some(Token::Question),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(Spanned { token, offset });
            i += 1;
            continue;
        }

        let next = chars.get(i + 1).map(|(_, c)| *c);
        let double = match (c, next) {
            ('=', Some('=')) => Some(Token::EqEq),
            ('!', Some('=')) => Some(Token::NotEq),
            ('<', Some('=')) => Some(Token::Le),
            ('>', Some('=')) => Some(Token::Ge),
            ('&', Some('&')) => Some(Token::AndAnd),
            ('|', Some('|')) => Some(Token::OrOr),
            _ => None,
        };
        if let Some(token) = double {
            tokens.push(Spanned { token, offset });
            i += 2;
            continue;
        }

        match c {
            '!' => {
                tokens.push(Spanned {
                    token: Token::Bang,
                    offset,
                });
                i += 1;
            }
            '<' => {
                tokens.push(Spanned {
                    token: Token::Lt,
                    offset,
                });
                i += 1;
            }
            '>' => {
                tokens.push(Spanned {
                    token: Token::Gt,
                    offset,
                });
                i += 1;
            }
            '"' | '\'' => {
                let (value, consumed) = lex_string(&chars[i..], false, offset)?;
                tokens.push(Spanned {
                    token: Token::Str(value),
                    offset,
                });
                i += consumed;
            }
            'r' | 'R' if matches!(next, Some('"') | Some('\'')) => {
                let (value, consumed) = lex_string(&chars[i + 1..], true, offset)?;
                tokens.push(Spanned {
                    token: Token::Str(value),
                    offset,
                });
                i += consumed + 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let (token, consumed) = lex_number(&chars[i..], offset)?;
                tokens.push(Spanned { token, offset });
                i += consumed;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().map(|(_, c)| c).collect();
                let token = match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "in" => Token::In,
                    _ => Token::Ident(word),
                };
                tokens.push(Spanned { token, offset });
            }
            other => {
                return Err(CelError::Parse {
                    message: format!("unexpected character '{}' at offset {}", other, offset),
                })
            }
        }
    }

    Ok(tokens)
}

fn lex_string(
    chars: &[(usize, char)],
    raw: bool,
    offset: usize,
) -> Result<(String, usize), CelError> {
    let quote = chars[0].1;
    let triple = chars.len() >= 3 && chars[1].1 == quote && chars[2].1 == quote;
    let mut i = if triple { 3 } else { 1 };
    let mut out = String::new();

    loop {
        let Some(&(_, c)) = chars.get(i) else {
            return Err(CelError::Parse {
                message: format!("unterminated string starting at offset {}", offset),
            });
        };

        if c == quote {
            if !triple {
                return Ok((out, i + 1));
            }
            if chars.get(i + 1).map(|x| x.1) == Some(quote)
                && chars.get(i + 2).map(|x| x.1) == Some(quote)
            {
                return Ok((out, i + 3));
            }
        }
        if c == '\n' && !triple {
            return Err(CelError::Parse {
                message: format!("newline in string starting at offset {}", offset),
            });
        }

        if c == '\\' && !raw {
            let escaped = chars.get(i + 1).map(|x| x.1).ok_or_else(|| CelError::Parse {
                message: format!("unterminated escape at offset {}", offset),
            })?;
            out.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                '\\' => '\\',
                '"' => '"',
                '\'' => '\'',
                '`' => '`',
                '?' => '?',
                other => {
                    return Err(CelError::Parse {
                        message: format!("invalid escape '\\{}' at offset {}", other, offset),
                    })
                }
            });
            i += 2;
            continue;
        }

        out.push(c);
        i += 1;
    }
}

fn lex_number(chars: &[(usize, char)], offset: usize) -> Result<(Token, usize), CelError> {
    let mut i = 0;
    let mut text = String::new();
    let mut is_float = false;

    if chars.len() > 2 && chars[0].1 == '0' && (chars[1].1 == 'x' || chars[1].1 == 'X') {
        i = 2;
        while i < chars.len() && chars[i].1.is_ascii_hexdigit() {
            text.push(chars[i].1);
            i += 1;
        }
        let value = i64::from_str_radix(&text, 16).map_err(|_| CelError::Parse {
            message: format!("invalid hex literal at offset {}", offset),
        })?;
        return Ok((Token::Int(value), i));
    }

    while i < chars.len() {
        let c = chars[i].1;
        if c.is_ascii_digit() {
            text.push(c);
        } else if c == '.' && !is_float {
            // a dot followed by an identifier is member access, not a fraction
            if !matches!(chars.get(i + 1), Some((_, d)) if d.is_ascii_digit()) {
                break;
            }
            is_float = true;
            text.push(c);
        } else if (c == 'e' || c == 'E') && !text.is_empty() {
            is_float = true;
            text.push(c);
            if let Some((_, sign)) = chars.get(i + 1) {
                if *sign == '+' || *sign == '-' {
                    text.push(*sign);
                    i += 1;
                }
            }
        } else {
            break;
        }
        i += 1;
    }

    let invalid = || CelError::Parse {
        message: format!("invalid number literal at offset {}", offset),
    };

    if is_float {
        return Ok((Token::Double(text.parse().map_err(|_| invalid())?), i));
    }
    if matches!(chars.get(i), Some((_, 'u')) | Some((_, 'U'))) {
        return Ok((Token::Uint(text.parse().map_err(|_| invalid())?), i + 1));
    }
    Ok((Token::Int(text.parse().map_err(|_| invalid())?), i))
}
