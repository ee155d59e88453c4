use std::fmt;
use std::str::FromStr;

use crate::ast::Term;

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ParseError {
    UnbalancedParen,
    EmptyList,
    UnexpectedEof,
    TrailingInput(String),
    HeadNotSymbol(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::UnbalancedParen => write!(f, "unbalanced parenthesis"),
            ParseError::EmptyList => write!(f, "empty list has no functor"),
            ParseError::UnexpectedEof => write!(f, "unexpected end of input"),
            ParseError::TrailingInput(rest) => write!(f, "trailing input: {}", rest),
            ParseError::HeadNotSymbol(head) => {
                write!(f, "list head must be a symbol, found: {}", head)
            }
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(PartialEq, Debug)]
enum SToken<'a> {
    Open,
    Close,
    Symbol(&'a str),
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    fn next_token(&mut self) -> Option<SToken<'a>> {
        self.skip_ws();

        let rest = self.rest();
        let mut chars = rest.char_indices();

        match chars.next() {
            None => None,
            Some((_, '(')) => {
                self.pos += 1;
                Some(SToken::Open)
            }
            Some((_, ')')) => {
                self.pos += 1;
                Some(SToken::Close)
            }
            Some(_) => {
                let end = rest
                    .char_indices()
                    .find(|&(_, c)| c == '(' || c == ')' || c.is_whitespace())
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());

                self.pos += end;
                Some(SToken::Symbol(&rest[..end]))
            }
        }
    }
}

fn symbol_to_term(sym: &str) -> Term {
    if sym.starts_with('?') {
        Term::Var(sym.to_owned())
    } else {
        Term::Atom(sym.to_owned())
    }
}

fn parse_term(lexer: &mut Lexer) -> Result<Term, ParseError> {
    match lexer.next_token() {
        None => Err(ParseError::UnexpectedEof),
        Some(SToken::Close) => Err(ParseError::UnbalancedParen),
        Some(SToken::Symbol(sym)) => Ok(symbol_to_term(sym)),
        Some(SToken::Open) => {
            let head = match lexer.next_token() {
                Some(SToken::Symbol(sym)) if !sym.starts_with('?') => sym.to_owned(),
                Some(SToken::Symbol(sym)) => {
                    return Err(ParseError::HeadNotSymbol(sym.to_owned()))
                }
                Some(SToken::Close) => return Err(ParseError::EmptyList),
                Some(SToken::Open) => return Err(ParseError::HeadNotSymbol("(".to_owned())),
                None => return Err(ParseError::UnexpectedEof),
            };

            let mut args = Vec::new();

            loop {
                let mark = lexer.pos;

                match lexer.next_token() {
                    Some(SToken::Close) => break,
                    None => return Err(ParseError::UnexpectedEof),
                    _ => {
                        lexer.pos = mark;
                        args.push(parse_term(lexer)?);
                    }
                }
            }

            if args.is_empty() {
                Ok(Term::Atom(head))
            } else {
                Ok(Term::Clause(head, args))
            }
        }
    }
}

impl FromStr for Term {
    type Err = ParseError;

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        let mut lexer = Lexer::new(src);
        let term = parse_term(&mut lexer)?;

        lexer.skip_ws();

        if lexer.rest().is_empty() {
            Ok(term)
        } else {
            Err(ParseError::TrailingInput(lexer.rest().to_owned()))
        }
    }
}
