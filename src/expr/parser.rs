use crate::error::{Error, Result};

use super::token::Token;

/// Comparison operators sharing one precedence level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CmpOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Gt => ">",
            CmpOp::Le => "<=",
            CmpOp::Ge => ">=",
        }
    }
}

/// Abstract syntax of a compiled predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<Expr>),
    /// Field path rooted at the `event` binding, e.g. `event.labels.app`
    /// parses to `["labels", "app"]`.
    Field(Vec<String>),
    Has(Vec<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
}

/// Recursive-descent parser over the token stream.
///
/// Grammar, loosest-binding first:
///
/// ```text
/// expr    := and ( "||" and )*
/// and     := cmp ( "&&" cmp )*
/// cmp     := unary ( ( "==" | "!=" | "<" | ">" | "<=" | ">=" | "in" ) unary )?
/// unary   := "!" unary | primary
/// primary := literal | list | path | "has" "(" path ")" | "(" expr ")"
/// ```
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    #[must_use]
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parse the whole token stream into one expression.
    ///
    /// # Errors
    ///
    /// Returns `BadExpression` on any syntax error, including trailing
    /// tokens after a complete expression.
    pub fn parse(mut self) -> Result<Expr> {
        let expr = self.or_expr()?;
        if let Some(tok) = self.peek() {
            return Err(Error::BadExpression(format!(
                "unexpected token after expression: {tok:?}"
            )));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: &Token) -> Result<()> {
        match self.advance() {
            Some(ref tok) if tok == want => Ok(()),
            Some(tok) => Err(Error::BadExpression(format!(
                "expected {want:?}, found {tok:?}"
            ))),
            None => Err(Error::BadExpression(format!(
                "expected {want:?}, found end of expression"
            ))),
        }
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::OrOr) {
            self.advance();
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.cmp_expr()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.advance();
            let right = self.cmp_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn cmp_expr(&mut self) -> Result<Expr> {
        let left = self.unary_expr()?;
        let op = match self.peek() {
            Some(Token::Eq) => CmpOp::Eq,
            Some(Token::Ne) => CmpOp::Ne,
            Some(Token::Lt) => CmpOp::Lt,
            Some(Token::Gt) => CmpOp::Gt,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::Ge) => CmpOp::Ge,
            Some(Token::In) => {
                self.advance();
                let right = self.unary_expr()?;
                return Ok(Expr::In(Box::new(left), Box::new(right)));
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.unary_expr()?;
        Ok(Expr::Cmp(op, Box::new(left), Box::new(right)))
    }

    fn unary_expr(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Bang) {
            self.advance();
            let operand = self.unary_expr()?;
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.primary_expr()
    }

    fn primary_expr(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Int(n)) => Ok(Expr::Int(n)),
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() == Some(&Token::RBracket) {
                    self.advance();
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.or_expr()?);
                    match self.advance() {
                        Some(Token::Comma) => {}
                        Some(Token::RBracket) => break,
                        Some(tok) => {
                            return Err(Error::BadExpression(format!(
                                "expected ',' or ']' in list, found {tok:?}"
                            )))
                        }
                        None => {
                            return Err(Error::BadExpression("unterminated list literal".into()))
                        }
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Token::Has) => {
                self.expect(&Token::LParen)?;
                let path = self.field_path()?;
                self.expect(&Token::RParen)?;
                Ok(Expr::Has(path))
            }
            Some(Token::Ident(name)) => {
                if name != "event" {
                    return Err(Error::BadExpression(format!(
                        "undeclared reference '{name}', only 'event' is bound"
                    )));
                }
                self.rest_of_path()
            }
            Some(tok) => Err(Error::BadExpression(format!(
                "unexpected token {tok:?}"
            ))),
            None => Err(Error::BadExpression("unexpected end of expression".into())),
        }
    }

    /// A full `event.a.b` path, for the argument of `has(...)`.
    fn field_path(&mut self) -> Result<Vec<String>> {
        match self.advance() {
            Some(Token::Ident(name)) if name == "event" => {}
            _ => {
                return Err(Error::BadExpression(
                    "has() requires a field path rooted at 'event'".into(),
                ))
            }
        }
        match self.rest_of_path()? {
            Expr::Field(path) if !path.is_empty() => Ok(path),
            _ => Err(Error::BadExpression(
                "has() requires at least one field selection".into(),
            )),
        }
    }

    /// The `.a.b` tail after the `event` root has been consumed.
    fn rest_of_path(&mut self) -> Result<Expr> {
        let mut path = Vec::new();
        while self.peek() == Some(&Token::Dot) {
            self.advance();
            match self.advance() {
                Some(Token::Ident(field)) => path.push(field),
                Some(tok) => {
                    return Err(Error::BadExpression(format!(
                        "expected field name after '.', found {tok:?}"
                    )))
                }
                None => {
                    return Err(Error::BadExpression(
                        "expected field name after '.'".into(),
                    ))
                }
            }
        }
        Ok(Expr::Field(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::token::tokenize;

    fn parse(src: &str) -> Result<Expr> {
        Parser::new(tokenize(src)?).parse()
    }

    #[test]
    fn test_parse_precedence_and_over_or() {
        let expr = parse("true || false && false").unwrap();
        assert!(matches!(expr, Expr::Or(_, _)));
    }

    #[test]
    fn test_parse_field_path() {
        let expr = parse("event.labels.app == 'web'").unwrap();
        match expr {
            Expr::Cmp(CmpOp::Eq, left, _) => {
                assert_eq!(*left, Expr::Field(vec!["labels".into(), "app".into()]));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_in_list() {
        let expr = parse("event.eventType in ['ADDED', 'DELETED']").unwrap();
        assert!(matches!(expr, Expr::In(_, _)));
    }

    #[test]
    fn test_parse_has() {
        let expr = parse("has(event.replicas)").unwrap();
        assert_eq!(expr, Expr::Has(vec!["replicas".into()]));
    }

    #[test]
    fn test_parse_rejects_bare_has() {
        assert!(parse("has(event)").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_binding() {
        assert!(parse("pod.name == 'x'").is_err());
    }

    #[test]
    fn test_parse_rejects_trailing_tokens() {
        assert!(parse("true false").is_err());
    }

    #[test]
    fn test_parse_rejects_unbalanced_parens() {
        assert!(parse("(true && false").is_err());
    }

    #[test]
    fn test_parse_empty_list() {
        let expr = parse("event.name in []").unwrap();
        match expr {
            Expr::In(_, list) => assert_eq!(*list, Expr::List(vec![])),
            other => panic!("unexpected parse: {other:?}"),
        }
    }
}
