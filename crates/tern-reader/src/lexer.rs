use std::iter::Peekable;

use tern_core::{Span, TernError};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LParen,
    RParen,
    Dot,
    Quote,
    Quasiquote,
    Unquote,
    UnquoteSplice,
    Number(i64),
    Float(f64),
    String(String),
    Symbol(String),
    Bool(bool),
    Nil,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Pull-based tokenizer over any character source.
///
/// `next_token` returns `Ok(None)` once the source is exhausted; a source
/// that ends inside a string or `#` constant is an error.
pub struct Lexer<I: Iterator<Item = char>> {
    chars: Peekable<I>,
    line: usize,
    col: usize,
}

impl<'a> Lexer<std::str::Chars<'a>> {
    pub fn for_str(input: &'a str) -> Self {
        Lexer::new(input.chars())
    }
}

impl<I: Iterator<Item = char>> Lexer<I> {
    pub fn new(chars: I) -> Self {
        Lexer {
            chars: chars.peekable(),
            line: 1,
            col: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.col)
    }

    fn take_run(&mut self) -> String {
        let mut run = String::new();
        while let Some(&ch) = self.chars.peek() {
            if !is_symbol_char(ch) {
                break;
            }
            run.push(ch);
            self.bump();
        }
        run
    }

    pub fn next_token(&mut self) -> Result<Option<SpannedToken>, TernError> {
        loop {
            let span = self.span();
            let Some(&ch) = self.chars.peek() else {
                return Ok(None);
            };
            let token = match ch {
                ' ' | '\t' | '\r' | '\n' => {
                    self.bump();
                    continue;
                }
                ';' => {
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                    continue;
                }
                '(' => {
                    self.bump();
                    Token::LParen
                }
                ')' => {
                    self.bump();
                    Token::RParen
                }
                '\'' => {
                    self.bump();
                    Token::Quote
                }
                '`' => {
                    self.bump();
                    Token::Quasiquote
                }
                ',' => {
                    self.bump();
                    if self.chars.peek() == Some(&'@') {
                        self.bump();
                        Token::UnquoteSplice
                    } else {
                        Token::Unquote
                    }
                }
                '"' => {
                    self.bump();
                    let mut s = String::new();
                    loop {
                        match self.bump() {
                            Some('"') => break,
                            Some(c) => s.push(c),
                            None => return Err(TernError::lex("unterminated string", span)),
                        }
                    }
                    Token::String(s)
                }
                '#' => {
                    self.bump();
                    let name = self.take_run();
                    match name.as_str() {
                        "t" => Token::Bool(true),
                        "f" => Token::Bool(false),
                        "nil" => Token::Nil,
                        "" => {
                            return Err(TernError::lex("expected constant name after '#'", span))
                        }
                        other => {
                            return Err(TernError::lex(
                                format!("malformed constant: #{other}"),
                                span,
                            ))
                        }
                    }
                }
                c if is_symbol_char(c) => {
                    let run = self.take_run();
                    classify_run(run, span)?
                }
                other => {
                    return Err(TernError::lex(
                        format!("unexpected character: '{other}'"),
                        span,
                    ))
                }
            };
            return Ok(Some(SpannedToken { token, span }));
        }
    }
}

impl<I: Iterator<Item = char>> Iterator for Lexer<I> {
    type Item = Result<SpannedToken, TernError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token().transpose()
    }
}

fn classify_run(run: String, span: Span) -> Result<Token, TernError> {
    if run == "." {
        return Ok(Token::Dot);
    }
    if let Ok(n) = run.parse::<i64>() {
        return Ok(Token::Number(n));
    }
    // f64 parsing also accepts words like "inf" and "nan"; those stay symbols.
    if run.chars().any(|c| c.is_ascii_digit()) {
        if let Ok(f) = run.parse::<f64>() {
            return Ok(Token::Float(f));
        }
    }
    if run.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(TernError::lex(format!("invalid number: {run}"), span));
    }
    Ok(Token::Symbol(run))
}

/// Tokenize a whole string.
pub fn tokenize(input: &str) -> Result<Vec<SpannedToken>, TernError> {
    Lexer::for_str(input).collect()
}

pub fn is_symbol_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(
            ch,
            '!' | '$'
                | '%'
                | '&'
                | '*'
                | '+'
                | '-'
                | '.'
                | '/'
                | ':'
                | '<'
                | '='
                | '>'
                | '?'
                | '@'
                | '^'
                | '_'
                | '~'
                | '|'
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_punctuation() {
        assert_eq!(
            tokens("( ) ' ` , ,@"),
            vec![
                Token::LParen,
                Token::RParen,
                Token::Quote,
                Token::Quasiquote,
                Token::Unquote,
                Token::UnquoteSplice
            ]
        );
    }

    #[test]
    fn test_dot_is_its_own_token() {
        assert_eq!(
            tokens("(a . b)"),
            vec![
                Token::LParen,
                Token::Symbol("a".into()),
                Token::Dot,
                Token::Symbol("b".into()),
                Token::RParen
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(tokens("42"), vec![Token::Number(42)]);
        assert_eq!(tokens("-7"), vec![Token::Number(-7)]);
        assert_eq!(tokens("+3"), vec![Token::Number(3)]);
        assert_eq!(tokens("2.5"), vec![Token::Float(2.5)]);
    }

    #[test]
    fn test_operator_symbols() {
        assert_eq!(
            tokens("+ - <= != hashmap-get random-id"),
            vec![
                Token::Symbol("+".into()),
                Token::Symbol("-".into()),
                Token::Symbol("<=".into()),
                Token::Symbol("!=".into()),
                Token::Symbol("hashmap-get".into()),
                Token::Symbol("random-id".into()),
            ]
        );
    }

    #[test]
    fn test_word_floats_stay_symbols() {
        assert_eq!(
            tokens("inf nan"),
            vec![Token::Symbol("inf".into()), Token::Symbol("nan".into())]
        );
    }

    #[test]
    fn test_hash_constants() {
        assert_eq!(
            tokens("#t #f #nil"),
            vec![Token::Bool(true), Token::Bool(false), Token::Nil]
        );
    }

    #[test]
    fn test_malformed_hash_constant() {
        assert!(matches!(tokenize("#x"), Err(TernError::Lex { .. })));
        assert!(matches!(tokenize("#"), Err(TernError::Lex { .. })));
        assert!(matches!(tokenize("#true"), Err(TernError::Lex { .. })));
    }

    #[test]
    fn test_strings_have_no_escapes() {
        assert_eq!(tokens(r#""a\nb""#), vec![Token::String("a\\nb".into())]);
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("\"abc").unwrap_err();
        assert_eq!(err, TernError::lex("unterminated string", Span::new(1, 1)));
    }

    #[test]
    fn test_digit_leading_garbage() {
        assert!(matches!(tokenize("12abc"), Err(TernError::Lex { .. })));
    }

    #[test]
    fn test_spans() {
        let toks = tokenize("(a\n  b)").unwrap();
        assert_eq!(toks[0].span, Span::new(1, 1));
        assert_eq!(toks[1].span, Span::new(1, 2));
        assert_eq!(toks[2].span, Span::new(2, 3));
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(tokens("; note\n1"), vec![Token::Number(1)]);
    }

    #[test]
    fn test_unexpected_character() {
        assert!(tokenize("[").is_err());
    }

    #[test]
    fn test_end_of_input_ends_stream() {
        let mut lexer = Lexer::for_str("x");
        assert!(lexer.next_token().unwrap().is_some());
        assert_eq!(lexer.next_token().unwrap(), None);
    }
}
