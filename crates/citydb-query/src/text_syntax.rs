//! Recursive descent parser for the text filter syntax.
//!
//! ```text
//! bldg:storeysAboveGround >= 3 AND NOT (gen:owner LIKE 'city%')
//! S_INTERSECTS(envelope, BBOX(0, 0, 100, 100)) OR objectId IN ('b1', 'b2')
//! ```
//!
//! Keywords are case-insensitive. Negated forms (`NOT LIKE`, `NOT BETWEEN`,
//! `NOT IN`, `IS NOT NULL`) produce [`Expr::Not`] around the positive
//! predicate so both syntaxes yield identical trees.

use citydb_core::GeometryType;
use serde_json::Value as JsonValue;

use crate::error::{ParseError, ParseResult};
use crate::expr::{ComparisonOp, Expr, Literal, PropertyRef, SpatialOp};
use crate::lexer::{tokenize, Token, TokenKind};
use crate::parser::{bbox_literal, date_literal, geometry_literal, timestamp_literal};

const RESERVED: &[&str] = &["and", "or", "not", "like", "between", "in", "is", "null"];

pub(crate) fn parse(input: &str, max_depth: usize) -> ParseResult<Expr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut parser = TextParser {
        tokens,
        index: 0,
        depth: 0,
        max_depth,
    };
    let expr = parser.expression()?;
    if let Some(token) = parser.peek() {
        return Err(ParseError::UnexpectedToken {
            token: token.text.to_string(),
            position: token.position,
            expected: "end of filter".to_string(),
        });
    }
    Ok(expr)
}

struct TextParser<'a> {
    tokens: Vec<Token<'a>>,
    index: usize,
    depth: usize,
    max_depth: usize,
}

impl<'a> TextParser<'a> {
    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.index)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token<'a>> {
        self.tokens.get(self.index + offset)
    }

    fn advance(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        self.peek().map_or(false, |token| token.is_keyword(keyword))
    }

    fn peek_kind(&self, kind: &TokenKind) -> bool {
        self.peek().map_or(false, |token| &token.kind == kind)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let found = self.peek_keyword(keyword);
        if found {
            self.index += 1;
        }
        found
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(token) => ParseError::UnexpectedToken {
                token: token.text.to_string(),
                position: token.position,
                expected: expected.to_string(),
            },
            None => ParseError::UnexpectedEnd {
                expected: expected.to_string(),
            },
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> ParseResult<()> {
        if self.peek_kind(&kind) {
            self.index += 1;
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> ParseResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&keyword.to_ascii_uppercase()))
        }
    }

    fn descend(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(ParseError::TooDeep {
                max: self.max_depth,
            });
        }
        Ok(())
    }

    fn ascend(&mut self) {
        self.depth -= 1;
    }

    fn position(&self) -> usize {
        self.peek().map_or_else(
            || self.tokens.last().map_or(0, |t| t.position + t.text.len()),
            |token| token.position,
        )
    }

    fn expression(&mut self) -> ParseResult<Expr> {
        self.descend()?;
        let mut operands = vec![self.conjunction()?];
        while self.eat_keyword("or") {
            operands.push(self.conjunction()?);
        }
        self.ascend();
        Ok(Expr::or(operands))
    }

    fn conjunction(&mut self) -> ParseResult<Expr> {
        let mut operands = vec![self.negation()?];
        while self.eat_keyword("and") {
            operands.push(self.negation()?);
        }
        Ok(Expr::and(operands))
    }

    fn negation(&mut self) -> ParseResult<Expr> {
        if self.eat_keyword("not") {
            self.descend()?;
            let inner = self.negation()?;
            self.ascend();
            return Ok(Expr::not(inner));
        }
        self.primary()
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        if self.peek_kind(&TokenKind::LParen) {
            self.index += 1;
            let expr = self.expression()?;
            self.expect(TokenKind::RParen, "`)`")?;
            return Ok(expr);
        }
        self.predicate()
    }

    fn predicate(&mut self) -> ParseResult<Expr> {
        let start = self.position();
        let left = self.scalar()?;

        if let Some(op) = self.comparison_op() {
            self.index += 1;
            let right = self.scalar()?;
            return Ok(Expr::compare(op, left, right));
        }

        let negated = self.peek_keyword("not")
            && self.peek_at(1).map_or(false, |next| {
                next.is_keyword("like") || next.is_keyword("between") || next.is_keyword("in")
            });
        if negated {
            self.index += 1;
        }

        let expr = if self.eat_keyword("like") {
            Expr::Like {
                expr: Box::new(left),
                pattern: Box::new(self.scalar()?),
            }
        } else if self.eat_keyword("between") {
            let low = self.scalar()?;
            self.expect_keyword("and")?;
            let high = self.scalar()?;
            Expr::Between {
                expr: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
            }
        } else if self.eat_keyword("in") {
            self.expect(TokenKind::LParen, "`(`")?;
            let list = self.scalar_list()?;
            Expr::In {
                expr: Box::new(left),
                list,
            }
        } else if self.eat_keyword("is") {
            let is_not = self.eat_keyword("not");
            self.expect_keyword("null")?;
            let expr = Expr::IsNull(Box::new(left));
            return Ok(if is_not { Expr::not(expr) } else { expr });
        } else if left.is_predicate() {
            return Ok(left);
        } else {
            return Err(ParseError::NotBoolean {
                location: format!("position {start}"),
            });
        };

        Ok(if negated { Expr::not(expr) } else { expr })
    }

    fn comparison_op(&self) -> Option<ComparisonOp> {
        let op = match self.peek()?.kind {
            TokenKind::Eq => ComparisonOp::Eq,
            TokenKind::NotEq => ComparisonOp::NotEq,
            TokenKind::Lt => ComparisonOp::Lt,
            TokenKind::LtEq => ComparisonOp::LtEq,
            TokenKind::Gt => ComparisonOp::Gt,
            TokenKind::GtEq => ComparisonOp::GtEq,
            _ => return None,
        };
        Some(op)
    }

    /// Comma separated scalars up to and including the closing parenthesis.
    fn scalar_list(&mut self) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        if self.peek_kind(&TokenKind::RParen) {
            self.index += 1;
            return Ok(items);
        }
        loop {
            items.push(self.scalar()?);
            if self.peek_kind(&TokenKind::Comma) {
                self.index += 1;
                continue;
            }
            self.expect(TokenKind::RParen, "`,` or `)`")?;
            return Ok(items);
        }
    }

    fn scalar(&mut self) -> ParseResult<Expr> {
        let Some(token) = self.advance() else {
            return Err(self.unexpected("operand"));
        };

        let word = match token.kind {
            TokenKind::String(value) => return Ok(Expr::Literal(Literal::String(value))),
            TokenKind::Integer(value) => return Ok(Expr::Literal(Literal::Integer(value))),
            TokenKind::Double(value) => return Ok(Expr::Literal(Literal::Double(value))),
            TokenKind::QuotedIdent(path) => return Ok(Expr::Property(PropertyRef::parse(&path))),
            TokenKind::Ident(word) => word,
            _ => {
                self.index -= 1;
                return Err(self.unexpected("operand"));
            }
        };

        let lower = word.to_ascii_lowercase();
        let call = self.peek_kind(&TokenKind::LParen);
        match lower.as_str() {
            "true" => return Ok(Expr::Literal(Literal::Boolean(true))),
            "false" => return Ok(Expr::Literal(Literal::Boolean(false))),
            "date" if call => {
                let value = self.string_argument()?;
                return Ok(Expr::Literal(Literal::Date(date_literal(&value)?)));
            }
            "timestamp" if call => {
                let value = self.string_argument()?;
                return Ok(Expr::Literal(Literal::Timestamp(timestamp_literal(&value)?)));
            }
            "bbox" if call => {
                self.index += 1;
                let mut values = vec![self.number()?];
                while self.peek_kind(&TokenKind::Comma) {
                    self.index += 1;
                    values.push(self.number()?);
                }
                self.expect(TokenKind::RParen, "`,` or `)`")?;
                return Ok(Expr::Literal(Literal::Geometry(bbox_literal(&values)?)));
            }
            _ => {}
        }

        if let Some(kind) = wkt_kind(&lower).filter(|_| call || self.peek_keyword("z")) {
            return self.wkt(kind);
        }

        if let Some(op) = SpatialOp::from_name(&lower).filter(|_| call) {
            self.index += 1;
            self.descend()?;
            let left = self.scalar()?;
            self.expect(TokenKind::Comma, "`,`")?;
            let right = self.scalar()?;
            self.expect(TokenKind::RParen, "`)`")?;
            self.ascend();
            return Ok(Expr::Spatial {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }

        if RESERVED.contains(&lower.as_str()) {
            self.index -= 1;
            return Err(self.unexpected("operand"));
        }

        if call {
            self.index += 1;
            self.descend()?;
            let args = self.scalar_list()?;
            self.ascend();
            return Ok(Expr::Function { name: lower, args });
        }

        if self.peek_kind(&TokenKind::Colon) {
            self.index += 1;
            return match self.advance().map(|t| t.kind) {
                Some(TokenKind::Ident(name)) => Ok(Expr::Property(PropertyRef {
                    namespace: Some(word),
                    name,
                })),
                _ => {
                    self.index -= 1;
                    Err(self.unexpected("property name after `:`"))
                }
            };
        }

        Ok(Expr::Property(PropertyRef {
            namespace: None,
            name: word,
        }))
    }

    /// `('...')` following `DATE` or `TIMESTAMP`.
    fn string_argument(&mut self) -> ParseResult<String> {
        self.expect(TokenKind::LParen, "`(`")?;
        let value = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::String(value)) => value.clone(),
            _ => return Err(self.unexpected("string literal")),
        };
        self.index += 1;
        self.expect(TokenKind::RParen, "`)`")?;
        Ok(value)
    }

    fn number(&mut self) -> ParseResult<f64> {
        let value = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Integer(value)) => *value as f64,
            Some(TokenKind::Double(value)) => *value,
            _ => return Err(self.unexpected("number")),
        };
        self.index += 1;
        Ok(value)
    }

    /// Space separated ordinates of one position.
    fn position_coordinates(&mut self) -> ParseResult<JsonValue> {
        let mut ordinates = vec![JsonValue::from(self.number()?)];
        while matches!(
            self.peek().map(|t| &t.kind),
            Some(TokenKind::Integer(_) | TokenKind::Double(_))
        ) {
            ordinates.push(JsonValue::from(self.number()?));
        }
        Ok(JsonValue::Array(ordinates))
    }

    /// `depth` levels of parenthesised lists around positions.
    fn coordinates(&mut self, depth: usize) -> ParseResult<JsonValue> {
        if depth == 0 {
            return self.position_coordinates();
        }
        self.expect(TokenKind::LParen, "`(`")?;
        let mut items = vec![self.coordinates(depth - 1)?];
        while self.peek_kind(&TokenKind::Comma) {
            self.index += 1;
            items.push(self.coordinates(depth - 1)?);
        }
        self.expect(TokenKind::RParen, "`,` or `)`")?;
        Ok(JsonValue::Array(items))
    }

    fn wkt(&mut self, kind: GeometryType) -> ParseResult<Expr> {
        // Optional dimension marker, as in `POINT Z (1 2 3)`.
        if self.peek_keyword("z") {
            self.index += 1;
        }

        let coordinates = match kind {
            GeometryType::Point => {
                self.expect(TokenKind::LParen, "`(`")?;
                let position = self.position_coordinates()?;
                self.expect(TokenKind::RParen, "`)`")?;
                position
            }
            // Points of a multipoint may or may not be parenthesised.
            GeometryType::MultiPoint => {
                self.expect(TokenKind::LParen, "`(`")?;
                let mut points = Vec::new();
                loop {
                    let point = if self.peek_kind(&TokenKind::LParen) {
                        self.index += 1;
                        let point = self.position_coordinates()?;
                        self.expect(TokenKind::RParen, "`)`")?;
                        point
                    } else {
                        self.position_coordinates()?
                    };
                    points.push(point);
                    if !self.peek_kind(&TokenKind::Comma) {
                        break;
                    }
                    self.index += 1;
                }
                self.expect(TokenKind::RParen, "`,` or `)`")?;
                JsonValue::Array(points)
            }
            kind => self.coordinates(kind.nesting())?,
        };

        Ok(Expr::Literal(Literal::Geometry(geometry_literal(
            kind,
            &coordinates,
        )?)))
    }
}

fn wkt_kind(word: &str) -> Option<GeometryType> {
    let kind = match word {
        "point" => GeometryType::Point,
        "multipoint" => GeometryType::MultiPoint,
        "linestring" => GeometryType::LineString,
        "multilinestring" => GeometryType::MultiLineString,
        "polygon" => GeometryType::Polygon,
        "multipolygon" => GeometryType::MultiPolygon,
        _ => return None,
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn parse_default(input: &str) -> ParseResult<Expr> {
        parse(input, 32)
    }

    fn integer(value: i64) -> Expr {
        Expr::Literal(Literal::Integer(value))
    }

    #[test]
    fn parses_comparison_and_precedence() {
        let expr = parse_default("a = 1 OR b = 2 AND c = 3").unwrap();
        assert_eq!(
            expr,
            Expr::Or(vec![
                Expr::compare(ComparisonOp::Eq, Expr::property("a"), integer(1)),
                Expr::And(vec![
                    Expr::compare(ComparisonOp::Eq, Expr::property("b"), integer(2)),
                    Expr::compare(ComparisonOp::Eq, Expr::property("c"), integer(3)),
                ]),
            ])
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(
            parse_default("x between 1 and 5 or Not y is null").unwrap(),
            parse_default("x BETWEEN 1 AND 5 OR NOT y IS NULL").unwrap()
        );
    }

    #[test]
    fn negated_forms_wrap_positive_predicate() {
        let expr = parse_default("gen:owner NOT LIKE 'c%' AND b IS NOT NULL").unwrap();
        assert_eq!(
            expr,
            Expr::And(vec![
                Expr::not(Expr::Like {
                    expr: Box::new(Expr::property("gen:owner")),
                    pattern: Box::new(Expr::Literal(Literal::String("c%".into()))),
                }),
                Expr::not(Expr::IsNull(Box::new(Expr::property("b")))),
            ])
        );
    }

    #[test]
    fn parses_in_list_function_and_quoted_property() {
        let expr = parse_default("lower(\"gen:name\") IN ('a', 'b')").unwrap();
        assert_eq!(
            expr,
            Expr::In {
                expr: Box::new(Expr::Function {
                    name: "lower".into(),
                    args: vec![Expr::property("gen:name")],
                }),
                list: vec![
                    Expr::Literal(Literal::String("a".into())),
                    Expr::Literal(Literal::String("b".into())),
                ],
            }
        );
    }

    #[test]
    fn parses_temporal_literals() {
        let expr = parse_default("creationDate > DATE('2020-05-01')").unwrap();
        assert_eq!(
            expr,
            Expr::compare(
                ComparisonOp::Gt,
                Expr::property("creationDate"),
                Expr::Literal(Literal::Date(NaiveDate::from_ymd_opt(2020, 5, 1).unwrap())),
            )
        );
        assert!(matches!(
            parse_default("creationDate > DATE('2020-13-01')"),
            Err(ParseError::InvalidLiteral { kind: "date", .. })
        ));
    }

    #[test]
    fn parses_spatial_predicates_with_wkt_and_bbox() {
        let expr = parse_default("S_INTERSECTS(envelope, POLYGON((0 0, 10 0, 10 10, 0 0)))").unwrap();
        let Expr::Spatial { op, right, .. } = expr else {
            panic!("expected spatial predicate");
        };
        assert_eq!(op, SpatialOp::Intersects);
        let Expr::Literal(Literal::Geometry(polygon)) = *right else {
            panic!("expected geometry literal");
        };
        assert_eq!(polygon.kind, GeometryType::Polygon);
        assert_eq!(
            polygon.coordinates,
            json!([[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 0.0]]])
        );

        let bbox = parse_default("s_within(bldg:lod2Solid, BBOX(0, 0, 1, 1))").unwrap();
        assert!(matches!(bbox, Expr::Spatial { op: SpatialOp::Within, .. }));

        let multipoint = parse_default("S_EQUALS(envelope, MULTIPOINT((1 2), (3 4)))").unwrap();
        let same = parse_default("S_EQUALS(envelope, MULTIPOINT(1 2, 3 4))").unwrap();
        assert_eq!(multipoint, same);
    }

    #[test]
    fn rejects_non_boolean_and_malformed_input() {
        assert_eq!(parse_default("   "), Err(ParseError::Empty));
        assert_eq!(
            parse_default("bldg:storeysAboveGround"),
            Err(ParseError::NotBoolean {
                location: "position 0".into()
            })
        );
        assert!(matches!(
            parse_default("a = 1 AND"),
            Err(ParseError::UnexpectedEnd { .. })
        ));
        assert_eq!(
            parse_default("a = 1 b"),
            Err(ParseError::UnexpectedToken {
                token: "b".into(),
                position: 6,
                expected: "end of filter".into(),
            })
        );
        assert!(matches!(
            parse_default("a = AND"),
            Err(ParseError::UnexpectedToken { position: 4, .. })
        ));
    }

    #[test]
    fn enforces_maximum_depth() {
        let nested = format!("{}a = 1{}", "(".repeat(40), ")".repeat(40));
        assert_eq!(parse_default(&nested), Err(ParseError::TooDeep { max: 32 }));
        assert!(parse(&nested, 64).is_ok());
    }

    #[test]
    fn display_output_parses_back_to_same_tree() {
        let source = "(bldg:storeysAboveGround >= 3 AND NOT (\"gen:and\" LIKE 'x''y')) \
                      OR S_CONTAINS(envelope, BBOX(0.5, 0, 10, 10.25)) \
                      OR creationDate < TIMESTAMP('2021-01-01T10:00:00Z')";
        let expr = parse_default(source).unwrap();
        assert_eq!(parse_default(&expr.to_string()).unwrap(), expr);
    }
}
