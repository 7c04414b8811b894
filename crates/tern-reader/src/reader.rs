use tern_core::{Span, TernError, Value};

use crate::lexer::{Lexer, SpannedToken, Token};

/// Deepest list or quote nesting the reader accepts.
pub const MAX_READ_DEPTH: usize = 512;

/// Builds S-expressions from a token stream, one top-level form at a time.
pub struct Reader<I: Iterator<Item = char>> {
    lexer: Lexer<I>,
    peeked: Option<SpannedToken>,
    last_span: Span,
    depth: usize,
}

impl<'a> Reader<std::str::Chars<'a>> {
    pub fn for_str(input: &'a str) -> Self {
        Reader::new(input.chars())
    }
}

impl<I: Iterator<Item = char>> Reader<I> {
    pub fn new(chars: I) -> Self {
        Reader {
            lexer: Lexer::new(chars),
            peeked: None,
            last_span: Span::new(1, 1),
            depth: 0,
        }
    }

    fn peek(&mut self) -> Result<Option<&Token>, TernError> {
        if self.peeked.is_none() {
            self.peeked = self.lexer.next_token()?;
        }
        Ok(self.peeked.as_ref().map(|t| &t.token))
    }

    fn advance(&mut self) -> Result<Option<SpannedToken>, TernError> {
        let tok = match self.peeked.take() {
            Some(tok) => Some(tok),
            None => self.lexer.next_token()?,
        };
        if let Some(t) = &tok {
            self.last_span = t.span;
        }
        Ok(tok)
    }

    fn eof(&self) -> TernError {
        TernError::read("unexpected end of input", self.last_span)
    }

    /// Read the next top-level form. `Ok(None)` at end of input.
    pub fn read_next(&mut self) -> Result<Option<Value>, TernError> {
        if self.peek()?.is_none() {
            return Ok(None);
        }
        self.parse_expr().map(Some)
    }

    fn parse_expr(&mut self) -> Result<Value, TernError> {
        let Some(tok) = self.advance()? else {
            return Err(self.eof());
        };
        let span = tok.span;
        match tok.token {
            Token::LParen => self.nested(span, |r| r.parse_list(span)),
            Token::Quote => self.nested(span, |r| r.parse_prefixed("quote")),
            Token::Quasiquote => self.nested(span, |r| r.parse_prefixed("quasiquote")),
            Token::Unquote => self.nested(span, |r| r.parse_prefixed("unquote")),
            Token::UnquoteSplice => self.nested(span, |r| r.parse_prefixed("unquote-splicing")),
            Token::Number(n) => Ok(Value::Number(n)),
            Token::String(s) => Ok(Value::string(&s)),
            Token::Symbol(s) => Ok(Value::symbol(&s)),
            Token::Bool(b) => Ok(Value::Bool(b)),
            Token::Nil => Ok(Value::Nil),
            Token::Float(f) => Err(TernError::read(
                format!("floating-point literal {f} has no runtime representation"),
                span,
            )),
            Token::RParen => Err(TernError::read("unexpected ')'", span)),
            Token::Dot => Err(TernError::read("unexpected '.'", span)),
        }
    }

    fn nested(
        &mut self,
        span: Span,
        parse: impl FnOnce(&mut Self) -> Result<Value, TernError>,
    ) -> Result<Value, TernError> {
        if self.depth >= MAX_READ_DEPTH {
            return Err(TernError::read(
                format!("nesting deeper than {MAX_READ_DEPTH}"),
                span,
            ));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_prefixed(&mut self, name: &str) -> Result<Value, TernError> {
        let inner = self.parse_expr()?;
        Ok(Value::list(vec![Value::symbol(name), inner]))
    }

    fn parse_list(&mut self, open: Span) -> Result<Value, TernError> {
        let mut items = Vec::new();
        loop {
            match self.peek()? {
                None => return Err(TernError::read("unterminated list", open)),
                Some(Token::RParen) => {
                    self.advance()?;
                    return Ok(Value::list(items));
                }
                Some(Token::Dot) => {
                    let dot = self.advance()?.map(|t| t.span).unwrap_or(open);
                    if items.is_empty() {
                        return Err(TernError::read("'.' must follow a list element", dot));
                    }
                    let tail = self.parse_expr()?;
                    match self.advance()? {
                        Some(SpannedToken {
                            token: Token::RParen,
                            ..
                        }) => return Ok(Value::improper_list(items, tail)),
                        Some(t) => {
                            return Err(TernError::read(
                                format!("expected ')' after dotted tail, got {:?}", t.token),
                                t.span,
                            ))
                        }
                        None => return Err(TernError::read("unterminated list", open)),
                    }
                }
                Some(_) => items.push(self.parse_expr()?),
            }
        }
    }
}

impl<I: Iterator<Item = char>> Iterator for Reader<I> {
    type Item = Result<Value, TernError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

/// Read a single S-expression from a string. Empty input is an error.
pub fn read(input: &str) -> Result<Value, TernError> {
    let mut reader = Reader::for_str(input);
    match reader.read_next()? {
        Some(val) => Ok(val),
        None => Err(reader.eof()),
    }
}

/// Read every top-level S-expression in a string.
pub fn read_many(input: &str) -> Result<Vec<Value>, TernError> {
    Reader::for_str(input).collect()
}
