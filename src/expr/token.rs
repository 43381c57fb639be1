use crate::error::{Error, Result};

/// Lexical token of the predicate language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    Str(String),
    Int(i64),

    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    AndAnd,
    OrOr,
    Bang,

    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,

    In,
    True,
    False,
    Has,
}

/// Scan a predicate string into tokens.
///
/// Whitespace (including newlines) separates tokens and is otherwise
/// discarded, so multi-line predicates normalize for free.
///
/// # Errors
///
/// Returns `BadExpression` on an unterminated string literal, an integer
/// out of range, or a character outside the language.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '=' => {
                chars.next();
                match chars.next() {
                    Some('=') => tokens.push(Token::Eq),
                    other => {
                        return Err(Error::BadExpression(format!(
                            "expected '==', found '={}'",
                            other.map(String::from).unwrap_or_default()
                        )))
                    }
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Bang);
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '&' => {
                chars.next();
                match chars.next() {
                    Some('&') => tokens.push(Token::AndAnd),
                    _ => return Err(Error::BadExpression("expected '&&'".into())),
                }
            }
            '|' => {
                chars.next();
                match chars.next() {
                    Some('|') => tokens.push(Token::OrOr),
                    _ => return Err(Error::BadExpression("expected '||'".into())),
                }
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    if ch == quote {
                        closed = true;
                        break;
                    }
                    if ch == '\\' {
                        match chars.next() {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some(esc @ ('\\' | '\'' | '"')) => value.push(esc),
                            Some(esc) => {
                                return Err(Error::BadExpression(format!(
                                    "unknown escape '\\{esc}' in string literal"
                                )))
                            }
                            None => break,
                        }
                    } else {
                        value.push(ch);
                    }
                }
                if !closed {
                    return Err(Error::BadExpression("unterminated string literal".into()));
                }
                tokens.push(Token::Str(value));
            }
            '-' | '0'..='9' => {
                let mut digits = String::new();
                if c == '-' {
                    digits.push('-');
                    chars.next();
                    if !matches!(chars.peek(), Some('0'..='9')) {
                        return Err(Error::BadExpression("expected digits after '-'".into()));
                    }
                }
                while let Some(&d @ '0'..='9') = chars.peek() {
                    digits.push(d);
                    chars.next();
                }
                let n = digits
                    .parse::<i64>()
                    .map_err(|_| Error::BadExpression(format!("integer out of range: {digits}")))?;
                tokens.push(Token::Int(n));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match ident.as_str() {
                    "in" => Token::In,
                    "true" => Token::True,
                    "false" => Token::False,
                    "has" => Token::Has,
                    _ => Token::Ident(ident),
                });
            }
            other => {
                return Err(Error::BadExpression(format!(
                    "unexpected character '{other}'"
                )))
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_operators() {
        let tokens = tokenize("== != && || ! < > <= >= ( ) [ ] , .").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Eq,
                Token::Ne,
                Token::AndAnd,
                Token::OrOr,
                Token::Bang,
                Token::Lt,
                Token::Gt,
                Token::Le,
                Token::Ge,
                Token::LParen,
                Token::RParen,
                Token::LBracket,
                Token::RBracket,
                Token::Comma,
                Token::Dot,
            ]
        );
    }

    #[test]
    fn test_tokenize_strings_both_quotes() {
        let tokens = tokenize(r#"'single' "double""#).unwrap();
        assert_eq!(
            tokens,
            vec![Token::Str("single".into()), Token::Str("double".into())]
        );
    }

    #[test]
    fn test_tokenize_negative_int() {
        assert_eq!(tokenize("-42").unwrap(), vec![Token::Int(-42)]);
    }

    #[test]
    fn test_tokenize_keywords_and_idents() {
        let tokens = tokenize("has(event.reason) in true false").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Has,
                Token::LParen,
                Token::Ident("event".into()),
                Token::Dot,
                Token::Ident("reason".into()),
                Token::RParen,
                Token::In,
                Token::True,
                Token::False,
            ]
        );
    }

    #[test]
    fn test_tokenize_multiline_input() {
        let tokens = tokenize("event.kind == 'Pod'\n  && event.name != ''").unwrap();
        assert!(tokens.contains(&Token::AndAnd));
    }

    #[test]
    fn test_tokenize_rejects_unterminated_string() {
        assert!(tokenize("'oops").is_err());
    }

    #[test]
    fn test_tokenize_rejects_single_ampersand() {
        assert!(tokenize("a & b").is_err());
    }

    #[test]
    fn test_tokenize_rejects_single_equals() {
        assert!(tokenize("event.kind = 'Pod'").is_err());
    }
}
