//! Entry points shared by the text and JSON filter syntaxes.

use chrono::{DateTime, NaiveDate, Utc};
use citydb_core::{parse_timestamp, CitydbConfig, Geometry, GeometryType, QueryConfig};
use serde_json::{json, Value as JsonValue};

use crate::error::{ParseError, ParseResult};
use crate::expr::Expr;
use crate::{json_syntax, text_syntax};

/// Maximum nesting depth accepted by default.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Parses filters in either syntax into the same [`Expr`] tree.
#[derive(Debug, Clone, Copy)]
pub struct FilterParser {
    max_depth: usize,
}

impl Default for FilterParser {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl FilterParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Parses the text syntax, e.g. `bldg:storeysAboveGround >= 3 AND NOT gen:owner IS NULL`.
    pub fn parse_text(&self, input: &str) -> ParseResult<Expr> {
        text_syntax::parse(input, self.max_depth)
    }

    /// Parses a JSON filter document, e.g. `{"op": ">=", "args": [{"property": "..."}, 3]}`.
    pub fn parse_json(&self, input: &JsonValue) -> ParseResult<Expr> {
        json_syntax::parse(input, self.max_depth)
    }

    /// Parses a JSON filter document from its serialized form.
    pub fn parse_json_str(&self, input: &str) -> ParseResult<Expr> {
        if input.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        let document: JsonValue =
            serde_json::from_str(input).map_err(|err| ParseError::json("$", err.to_string()))?;
        self.parse_json(&document)
    }
}

impl From<&QueryConfig> for FilterParser {
    fn from(config: &QueryConfig) -> Self {
        Self::default().with_max_depth(config.max_filter_depth)
    }
}

impl From<&CitydbConfig> for FilterParser {
    fn from(config: &CitydbConfig) -> Self {
        Self::from(&config.query)
    }
}

/// Parses the text syntax with the default depth limit.
pub fn parse_text(input: &str) -> ParseResult<Expr> {
    FilterParser::default().parse_text(input)
}

/// Parses a JSON filter document with the default depth limit.
pub fn parse_json(input: &JsonValue) -> ParseResult<Expr> {
    FilterParser::default().parse_json(input)
}

/// Parses a serialized JSON filter document with the default depth limit.
pub fn parse_json_str(input: &str) -> ParseResult<Expr> {
    FilterParser::default().parse_json_str(input)
}

pub(crate) fn date_literal(value: &str) -> ParseResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|err| ParseError::InvalidLiteral {
        kind: "date",
        value: value.to_string(),
        reason: err.to_string(),
    })
}

pub(crate) fn timestamp_literal(value: &str) -> ParseResult<DateTime<Utc>> {
    parse_timestamp(value).map_err(|err| ParseError::InvalidLiteral {
        kind: "timestamp",
        value: value.to_string(),
        reason: err.to_string(),
    })
}

/// Envelope geometry from `minx, miny, maxx, maxy` or
/// `minx, miny, minz, maxx, maxy, maxz`.
pub(crate) fn bbox_literal(values: &[f64]) -> ParseResult<Geometry> {
    let corners = match values {
        [min_x, min_y, max_x, max_y] => json!([[min_x, min_y], [max_x, max_y]]),
        [min_x, min_y, min_z, max_x, max_y, max_z] => {
            json!([[min_x, min_y, min_z], [max_x, max_y, max_z]])
        }
        _ => {
            return Err(ParseError::InvalidLiteral {
                kind: "bbox",
                value: format!("{values:?}"),
                reason: "expected 4 or 6 numbers".to_string(),
            })
        }
    };
    geometry_literal(GeometryType::Envelope, &corners)
}

pub(crate) fn geometry_literal(kind: GeometryType, coordinates: &JsonValue) -> ParseResult<Geometry> {
    Geometry::new(kind, coordinates).map_err(|err| ParseError::InvalidLiteral {
        kind: "geometry",
        value: coordinates.to_string(),
        reason: err.to_string(),
    })
}
