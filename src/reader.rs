//! The lexical reader: a logos tokenizer plus a recursive-descent form
//! parser. Every form carries its byte span; `Diagnostic` turns spans into
//! line/column output against the owned source.

use logos::Logos;
use std::path;
use std::sync::Arc;

use crate::collections::{List, Map, Set, Vector};
use crate::error::{Error, SpannedError, SyntaxError};
use crate::interner;
use crate::value::{Metadata, Value};

pub type Span = logos::Span;

/// The span used for values that were never read from source.
pub fn synthetic_span() -> Span {
    0..0
}

//===----------------------------------------------------------------------===//
// Source
//===----------------------------------------------------------------------===//

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Source {
    File(path::PathBuf),
    /// A library name handed to the require driver.
    Lib(String),
    Repl,
}

impl Source {
    pub fn display(&self) -> String {
        match self {
            Source::File(path) => path.display().to_string(),
            Source::Lib(name) => name.clone(),
            Source::Repl => "REPL".to_string(),
        }
    }
}

//===----------------------------------------------------------------------===//
// Tokens
//===----------------------------------------------------------------------===//

#[derive(Logos, Debug, PartialEq, Clone)]
pub enum Token {
    // Whitespace and commas are both separators; line comments run to EOL.
    #[regex(r"[ \t\r\n,]+", logos::skip)]
    #[regex(r";[^\n]*", logos::skip)]
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("#{")]
    SetOpen,
    #[token("#_")]
    Discard,
    #[token("#'")]
    VarQuote,
    #[token("'")]
    Quote,
    #[token("`")]
    SyntaxQuote,
    #[token("~@")]
    UnquoteSplicing,
    #[token("~")]
    Unquote,
    #[token("@")]
    Deref,
    #[token("^")]
    Meta,
    #[regex(r"\\(newline|space|tab|[^\s])")]
    Char,
    #[regex(r#""([^"\\]|\\.)*""#)]
    Str,
    #[regex(r"[+-]?[0-9]+\.[0-9]+", priority = 4)]
    Float,
    #[regex(r"[+-]?[0-9]+", priority = 3)]
    Int,
    #[regex(r":[a-zA-Z0-9*+!\-_?<>=./&]+")]
    Keyword,
    #[regex(r"[a-zA-Z*+!\-_?<>=.&%/][a-zA-Z0-9*+!\-_?<>=.&%/#']*", priority = 2)]
    Symbol,
}

fn unescape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some('r') => result.push('\r'),
                Some('"') => result.push('"'),
                Some('\\') => result.push('\\'),
                Some('0') => result.push('\0'),
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(ch);
        }
    }
    result
}

//===----------------------------------------------------------------------===//
// Reader
//===----------------------------------------------------------------------===//

pub struct Reader<'a> {
    src: &'a str,
    tokens: Vec<(Token, Span)>,
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Tokenizes the whole input up front. Lexing failures surface as
    /// syntax errors at the offending span.
    pub fn new(src: &'a str) -> Result<Self, SpannedError> {
        let mut tokens = Vec::new();
        for (result, span) in Token::lexer(src).spanned() {
            match result {
                Ok(token) => tokens.push((token, span)),
                Err(_) => {
                    return Err(SpannedError::new(
                        Error::Syntax(SyntaxError::UnexpectedToken {
                            found: src[span.clone()].to_string(),
                            expected: "a form".to_string(),
                        }),
                        span,
                    ))
                }
            }
        }
        Ok(Self { src, tokens, pos: 0 })
    }

    /// Reads every remaining form.
    pub fn read_all(src: &'a str) -> Result<Vec<Value>, SpannedError> {
        let mut reader = Self::new(src)?;
        let mut forms = Vec::new();
        while let Some(form) = reader.next_form()? {
            forms.push(form);
        }
        Ok(forms)
    }

    fn peek(&self) -> Option<&(Token, Span)> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<(Token, Span)> {
        let item = self.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn text(&self, span: &Span) -> &str {
        &self.src[span.clone()]
    }

    fn eof_err(&self, expected: &str) -> SpannedError {
        let end = self.src.len();
        SpannedError::new(
            Error::Syntax(SyntaxError::UnexpectedEof {
                expected: Some(expected.to_string()),
            }),
            end..end,
        )
    }

    /// Yields the next form, or `None` at end of input.
    pub fn next_form(&mut self) -> Result<Option<Value>, SpannedError> {
        loop {
            let Some((token, span)) = self.bump() else {
                return Ok(None);
            };
            match token {
                Token::Discard => {
                    // read and drop the next form
                    if self.parse_form_opt()?.is_none() {
                        return Err(self.eof_err("a form after #_"));
                    }
                }
                other => return self.parse_from(other, span).map(Some),
            }
        }
    }

    fn parse_form_opt(&mut self) -> Result<Option<Value>, SpannedError> {
        self.next_form()
    }

    fn parse_form(&mut self) -> Result<Value, SpannedError> {
        match self.next_form()? {
            Some(form) => Ok(form),
            None => Err(self.eof_err("a form")),
        }
    }

    fn parse_from(&mut self, token: Token, span: Span) -> Result<Value, SpannedError> {
        match token {
            Token::LParen => self.parse_list(span),
            Token::LBracket => self.parse_vector(span),
            Token::LBrace => self.parse_map(span),
            Token::SetOpen => self.parse_set(span),
            Token::Quote => self.parse_wrapped("quote", span),
            Token::SyntaxQuote => self.parse_wrapped("syntax-quote", span),
            Token::Unquote => self.parse_wrapped("unquote", span),
            Token::UnquoteSplicing => self.parse_wrapped("unquote-splicing", span),
            Token::Deref => self.parse_wrapped("deref", span),
            Token::VarQuote => self.parse_wrapped("var", span),
            Token::Meta => self.parse_meta(span),
            Token::Int => {
                let text = self.text(&span);
                let value = text.parse::<i64>().map_err(|_| {
                    SpannedError::new(
                        Error::Syntax(SyntaxError::InvalidNumber {
                            value: text.to_string(),
                        }),
                        span.clone(),
                    )
                })?;
                Ok(Value::Int { span, value })
            }
            Token::Float => {
                let text = self.text(&span);
                let value = text.parse::<f64>().map_err(|_| {
                    SpannedError::new(
                        Error::Syntax(SyntaxError::InvalidNumber {
                            value: text.to_string(),
                        }),
                        span.clone(),
                    )
                })?;
                Ok(Value::Float { span, value })
            }
            Token::Str => {
                let text = self.text(&span);
                let inner = &text[1..text.len() - 1];
                Ok(Value::String {
                    span,
                    value: Arc::from(unescape_string(inner)),
                })
            }
            Token::Char => {
                let text = &self.text(&span)[1..];
                let value = match text {
                    "newline" => '\n',
                    "space" => ' ',
                    "tab" => '\t',
                    _ => {
                        let mut chars = text.chars();
                        match (chars.next(), chars.next()) {
                            (Some(c), None) => c,
                            _ => {
                                return Err(SpannedError::new(
                                    Error::Syntax(SyntaxError::InvalidCharacter {
                                        value: format!("\\{}", text),
                                    }),
                                    span,
                                ))
                            }
                        }
                    }
                };
                Ok(Value::Char { span, value })
            }
            Token::Keyword => {
                let text = &self.text(&span)[1..];
                let (ns, name) = interner::split_qualified(text);
                Ok(Value::Keyword {
                    span,
                    ns: ns.map(interner::intern_ns),
                    name: interner::intern_kw(name),
                })
            }
            Token::Symbol => {
                let text = self.text(&span);
                Ok(match text {
                    "nil" => Value::Nil { span },
                    "true" => Value::Bool { span, value: true },
                    "false" => Value::Bool { span, value: false },
                    _ => {
                        let (ns, name) = interner::split_qualified(text);
                        Value::Symbol {
                            span,
                            ns: ns.map(interner::intern_ns),
                            name: interner::intern_sym(name),
                            meta: None,
                        }
                    }
                })
            }
            Token::RParen | Token::RBracket | Token::RBrace => {
                Err(SpannedError::new(
                    Error::Syntax(SyntaxError::UnbalancedDelimiter {
                        delimiter: self.text(&span).chars().next().unwrap_or('?'),
                    }),
                    span,
                ))
            }
            Token::Discard => unreachable!("discard handled by next_form"),
        }
    }

    fn parse_seq(
        &mut self,
        open: &Span,
        close: Token,
        close_text: &str,
    ) -> Result<(Vec<Value>, Span), SpannedError> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.eof_err(close_text)),
                Some((token, span)) if *token == close => {
                    let full = open.start..span.end;
                    self.pos += 1;
                    return Ok((items, full));
                }
                Some(_) => match self.next_form()? {
                    Some(form) => items.push(form),
                    None => return Err(self.eof_err(close_text)),
                },
            }
        }
    }

    fn parse_list(&mut self, open: Span) -> Result<Value, SpannedError> {
        let (items, span) = self.parse_seq(&open, Token::RParen, ")")?;
        Ok(Value::List {
            span,
            value: Arc::new(items.into_iter().collect::<List<Value>>()),
            meta: None,
        })
    }

    fn parse_vector(&mut self, open: Span) -> Result<Value, SpannedError> {
        let (items, span) = self.parse_seq(&open, Token::RBracket, "]")?;
        Ok(Value::Vector {
            span,
            value: items.into_iter().collect::<Vector<Value>>(),
            meta: None,
        })
    }

    fn parse_set(&mut self, open: Span) -> Result<Value, SpannedError> {
        let (items, span) = self.parse_seq(&open, Token::RBrace, "}")?;
        Ok(Value::Set {
            span,
            value: items.into_iter().collect::<Set<Value>>(),
            meta: None,
        })
    }

    fn parse_map(&mut self, open: Span) -> Result<Value, SpannedError> {
        let (items, span) = self.parse_seq(&open, Token::RBrace, "}")?;
        if items.len() % 2 == 1 {
            return Err(SpannedError::new(
                Error::Syntax(SyntaxError::UnexpectedToken {
                    found: "}".to_string(),
                    expected: "an even number of map forms".to_string(),
                }),
                span,
            ));
        }
        let mut map = Map::new();
        let mut iter = items.into_iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            map.insert(k, v);
        }
        Ok(Value::Map { span, value: map, meta: None })
    }

    fn parse_wrapped(&mut self, name: &str, open: Span) -> Result<Value, SpannedError> {
        let form = self.parse_form()?;
        let span = open.start..form.span().end;
        let list = List::new()
            .prepend(form)
            .prepend(Value::Symbol {
                span: open,
                ns: None,
                name: interner::intern_sym(name),
                meta: None,
            });
        Ok(Value::List { span, value: Arc::new(list), meta: None })
    }

    /// `^meta form`: a keyword becomes `{kw true}`, a symbol `{:tag sym}`,
    /// a map is taken as-is. Stacked metadata merges outside-in.
    fn parse_meta(&mut self, open: Span) -> Result<Value, SpannedError> {
        let meta_form = self.parse_form()?;
        let mut meta = Metadata::new();
        match &meta_form {
            Value::Keyword { .. } => {
                meta.insert(meta_form.clone(), Value::bool(true));
            }
            Value::Symbol { .. } => {
                meta.insert(
                    Value::keyword(None, interner::intern_kw("tag")),
                    meta_form.clone(),
                );
            }
            Value::Map { value, .. } => {
                for (k, v) in value.iter() {
                    meta.insert(k.clone(), v.clone());
                }
            }
            other => {
                return Err(SpannedError::new(
                    Error::Syntax(SyntaxError::InvalidMeta {
                        reason: format!(
                            "Metadata must be a keyword, symbol or map, got {}",
                            other.kind_name()
                        ),
                    }),
                    open,
                ))
            }
        }
        let target = self.parse_form()?;
        let merged = match target.meta() {
            Some(existing) => {
                let mut out = meta;
                for (k, v) in existing.iter() {
                    out.insert(k.clone(), v.clone());
                }
                out
            }
            None => meta,
        };
        Ok(target.with_meta(Some(Arc::new(merged))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_one(src: &str) -> Value {
        Reader::read_all(src).expect("read").remove(0)
    }

    #[test]
    fn reads_atoms() {
        assert_eq!(read_one("42"), Value::int(42));
        assert_eq!(read_one("-7"), Value::int(-7));
        assert_eq!(read_one("2.5"), Value::float(2.5));
        assert_eq!(read_one("nil"), Value::nil());
        assert_eq!(read_one("true"), Value::bool(true));
        assert_eq!(read_one("\"a\\nb\""), Value::string("a\nb"));
    }

    #[test]
    fn reads_qualified_names() {
        let sym = read_one("f/g");
        match sym {
            Value::Symbol { ns, name, .. } => {
                assert_eq!(ns, Some(interner::intern_ns("f")));
                assert_eq!(name, interner::intern_sym("g"));
            }
            other => panic!("expected symbol, got {:?}", other),
        }
        let kw = read_one(":a/b");
        match kw {
            Value::Keyword { ns, name, .. } => {
                assert_eq!(ns, Some(interner::intern_ns("a")));
                assert_eq!(name, interner::intern_kw("b"));
            }
            other => panic!("expected keyword, got {:?}", other),
        }
    }

    #[test]
    fn reads_collections() {
        assert_eq!(read_one("(1 2 3)").to_string(), "(1 2 3)");
        assert_eq!(read_one("[1 [2]]").to_string(), "[1 [2]]");
        assert_eq!(read_one("#{1}").to_string(), "#{1}");
        assert_eq!(read_one("{:a 1}").to_string(), "{:a 1}");
    }

    #[test]
    fn quote_expands_to_list() {
        assert_eq!(read_one("'x").to_string(), "(quote x)");
        assert_eq!(read_one("@x").to_string(), "(deref x)");
        assert_eq!(read_one("#'x").to_string(), "(var x)");
    }

    #[test]
    fn discard_skips_next_form() {
        let forms = Reader::read_all("#_(ignored) 5").expect("read");
        assert_eq!(forms, vec![Value::int(5)]);
    }

    #[test]
    fn meta_attaches_to_form() {
        let form = read_one("^:private x");
        let meta = form.meta().expect("meta");
        let kw = Value::keyword(None, interner::intern_kw("private"));
        assert_eq!(meta.get(&kw), Some(&Value::bool(true)));
    }

    #[test]
    fn tag_shorthand() {
        let form = read_one("^String s");
        let meta = form.meta().expect("meta");
        let tag = Value::keyword(None, interner::intern_kw("tag"));
        assert!(meta.get(&tag).is_some());
    }

    #[test]
    fn unbalanced_delimiter_errors() {
        assert!(Reader::read_all("(1 2").is_err());
        assert!(Reader::read_all(")").is_err());
    }

    #[test]
    fn spans_cover_forms() {
        let form = read_one("(+ 1 2)");
        assert_eq!(form.span(), 0..7);
    }

    #[test]
    fn comments_and_commas_are_whitespace() {
        let forms = Reader::read_all("1, 2 ; three\n3").expect("read");
        assert_eq!(forms.len(), 3);
    }
}
