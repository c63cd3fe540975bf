//! Tokenizer for the text filter syntax using nom combinators.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::char,
    combinator::{opt, recognize, value},
    sequence::pair,
    IResult, Parser,
};

use crate::error::{ParseError, ParseResult};

/// Kind of a lexed token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Bare word; keywords are recognised by the parser.
    Ident(String),
    /// `"..."` property path.
    QuotedIdent(String),
    /// `'...'` string literal.
    String(String),
    Integer(i64),
    Double(f64),
    LParen,
    RParen,
    Comma,
    Colon,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// Token with its source text and byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub position: usize,
}

impl Token<'_> {
    /// Whether this is an identifier equal to `keyword`, ignoring case.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(word) if word.eq_ignore_ascii_case(keyword))
    }
}

fn identifier(input: &str) -> IResult<&str, TokenKind> {
    let (input, word) = recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))
    .parse(input)?;
    Ok((input, TokenKind::Ident(word.to_string())))
}

/// Contents of a `quote`-delimited run where a doubled quote escapes itself.
fn quoted(input: &str, quote: char) -> IResult<&str, String> {
    let (input, _) = char(quote)(input)?;
    let mut content = String::new();
    let mut chars = input.char_indices();
    while let Some((index, c)) = chars.next() {
        if c == quote {
            let rest = &input[index + c.len_utf8()..];
            if rest.starts_with(quote) {
                content.push(quote);
                chars.next();
                continue;
            }
            return Ok((rest, content));
        }
        content.push(c);
    }
    Err(nom::Err::Failure(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

fn string_literal(input: &str) -> IResult<&str, TokenKind> {
    let (input, content) = quoted(input, '\'')?;
    Ok((input, TokenKind::String(content)))
}

fn quoted_identifier(input: &str) -> IResult<&str, TokenKind> {
    let (input, content) = quoted(input, '"')?;
    Ok((input, TokenKind::QuotedIdent(content)))
}

fn number(input: &str) -> IResult<&str, TokenKind> {
    let (rest, text) = recognize((
        opt(alt((char('-'), char('+')))),
        take_while1(|c: char| c.is_ascii_digit()),
        opt(pair(char('.'), take_while(|c: char| c.is_ascii_digit()))),
        opt((
            alt((char('e'), char('E'))),
            opt(alt((char('+'), char('-')))),
            take_while1(|c: char| c.is_ascii_digit()),
        )),
    ))
    .parse(input)?;

    let kind = if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>().ok().map(TokenKind::Double)
    } else {
        text.parse::<i64>().ok().map(TokenKind::Integer)
    };
    match kind {
        Some(kind) => Ok((rest, kind)),
        None => Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

fn symbol(input: &str) -> IResult<&str, TokenKind> {
    alt((
        value(TokenKind::LtEq, tag("<=")),
        value(TokenKind::GtEq, tag(">=")),
        value(TokenKind::NotEq, tag("<>")),
        value(TokenKind::NotEq, tag("!=")),
        value(TokenKind::Eq, char('=')),
        value(TokenKind::Lt, char('<')),
        value(TokenKind::Gt, char('>')),
        value(TokenKind::LParen, char('(')),
        value(TokenKind::RParen, char(')')),
        value(TokenKind::Comma, char(',')),
        value(TokenKind::Colon, char(':')),
    ))
    .parse(input)
}

fn token(input: &str) -> IResult<&str, TokenKind> {
    alt((
        string_literal,
        quoted_identifier,
        number,
        identifier,
        symbol,
    ))
    .parse(input)
}

/// Splits the filter text into tokens.
pub fn tokenize(source: &str) -> ParseResult<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut rest = source;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Ok(tokens);
        }

        let position = source.len() - rest.len();
        match token(rest) {
            Ok((remaining, kind)) => {
                let consumed = rest.len() - remaining.len();
                tokens.push(Token {
                    kind,
                    text: &rest[..consumed],
                    position,
                });
                rest = remaining;
            }
            Err(nom::Err::Failure(_)) if rest.starts_with(['\'', '"']) => {
                return Err(ParseError::UnterminatedQuote { position });
            }
            Err(nom::Err::Failure(_)) => {
                let text = rest
                    .split(|c: char| c.is_whitespace() || c == ',' || c == ')')
                    .next()
                    .unwrap_or(rest);
                return Err(ParseError::InvalidLiteral {
                    kind: "number",
                    value: text.to_string(),
                    reason: "out of range".to_string(),
                });
            }
            Err(_) => {
                let ch = rest.chars().next().unwrap_or_default();
                return Err(ParseError::UnexpectedCharacter { ch, position });
            }
        }
    }
}
