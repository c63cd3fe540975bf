//! Filter expression tree shared by the text and JSON syntaxes.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use citydb_core::{format_timestamp, Geometry, GeometryType};
use serde_json::Value as JsonValue;

/// Literal operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Geometry(Geometry),
}

/// Reference to a feature property, optionally namespace-qualified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyRef {
    pub namespace: Option<String>,
    pub name: String,
}

impl PropertyRef {
    /// Splits `prefix:name` at the first colon; a bare name stays unqualified.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        match path.split_once(':') {
            Some((namespace, name)) if !namespace.is_empty() => Self {
                namespace: Some(namespace.to_string()),
                name: name.to_string(),
            },
            _ => Self {
                namespace: None,
                name: path.to_string(),
            },
        }
    }
}

impl fmt::Display for PropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}:{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl ComparisonOp {
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }

    #[must_use]
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let op = match symbol {
            "=" => Self::Eq,
            "<>" | "!=" => Self::NotEq,
            "<" => Self::Lt,
            "<=" => Self::LtEq,
            ">" => Self::Gt,
            ">=" => Self::GtEq,
            _ => return None,
        };
        Some(op)
    }
}

/// Spatial relation evaluated on bounding boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialOp {
    Intersects,
    Within,
    Contains,
    Disjoint,
    Equals,
}

impl SpatialOp {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Intersects => "s_intersects",
            Self::Within => "s_within",
            Self::Contains => "s_contains",
            Self::Disjoint => "s_disjoint",
            Self::Equals => "s_equals",
        }
    }

    /// Case-insensitive lookup of `s_intersects`, `s_within`, ...
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let op = match name.to_ascii_lowercase().as_str() {
            "s_intersects" => Self::Intersects,
            "s_within" => Self::Within,
            "s_contains" => Self::Contains,
            "s_disjoint" => Self::Disjoint,
            "s_equals" => Self::Equals,
            _ => return None,
        };
        Some(op)
    }

    /// The relation with both operands swapped.
    #[must_use]
    pub const fn converse(&self) -> Self {
        match self {
            Self::Within => Self::Contains,
            Self::Contains => Self::Within,
            other => *other,
        }
    }
}

/// Immutable filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Property(PropertyRef),
    Function {
        name: String,
        args: Vec<Expr>,
    },
    Comparison {
        op: ComparisonOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
    },
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
    },
    IsNull(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Spatial {
        op: SpatialOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Conjunction; nested conjunctions are flattened and a single operand
    /// is returned as is.
    #[must_use]
    pub fn and(operands: Vec<Expr>) -> Expr {
        let mut flat = Vec::with_capacity(operands.len());
        for operand in operands {
            match operand {
                Expr::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            Expr::And(flat)
        }
    }

    /// Disjunction, flattened like [`Expr::and`].
    #[must_use]
    pub fn or(operands: Vec<Expr>) -> Expr {
        let mut flat = Vec::with_capacity(operands.len());
        for operand in operands {
            match operand {
                Expr::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            Expr::Or(flat)
        }
    }

    #[allow(clippy::should_implement_trait)]
    #[must_use]
    pub fn not(expr: Expr) -> Expr {
        Expr::Not(Box::new(expr))
    }

    #[must_use]
    pub fn property(path: &str) -> Expr {
        Expr::Property(PropertyRef::parse(path))
    }

    #[must_use]
    pub fn compare(op: ComparisonOp, left: Expr, right: Expr) -> Expr {
        Expr::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Whether the node can stand where a boolean is expected. Function
    /// calls qualify here; their return type is checked at compile time.
    #[must_use]
    pub fn is_predicate(&self) -> bool {
        !matches!(
            self,
            Expr::Property(_)
                | Expr::Literal(
                    Literal::String(_)
                        | Literal::Integer(_)
                        | Literal::Double(_)
                        | Literal::Date(_)
                        | Literal::Timestamp(_)
                        | Literal::Geometry(_)
                )
        )
    }
}

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "like", "between", "in", "is", "null", "true", "false", "date",
    "timestamp", "bbox", "point", "linestring", "polygon", "multipoint", "multilinestring",
    "multipolygon",
];

fn is_plain_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    let starts = chars
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_');
    starts
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !KEYWORDS.contains(&text.to_ascii_lowercase().as_str())
        && SpatialOp::from_name(text).is_none()
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr], separator: &str) -> fmt::Result {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn write_position(f: &mut fmt::Formatter<'_>, position: &JsonValue) -> fmt::Result {
    let ordinates: Vec<String> = position
        .as_array()
        .map(|items| items.iter().map(|v| format!("{:?}", v.as_f64().unwrap_or_default())).collect())
        .unwrap_or_default();
    f.write_str(&ordinates.join(" "))
}

/// Writes `depth` levels of parenthesised, comma separated lists.
fn write_coordinates(f: &mut fmt::Formatter<'_>, value: &JsonValue, depth: usize) -> fmt::Result {
    if depth == 0 {
        return write_position(f, value);
    }
    f.write_str("(")?;
    for (index, item) in value.as_array().into_iter().flatten().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write_coordinates(f, item, depth - 1)?;
    }
    f.write_str(")")
}

fn write_geometry(f: &mut fmt::Formatter<'_>, geometry: &Geometry) -> fmt::Result {
    if geometry.kind == GeometryType::Envelope {
        let ordinates: Vec<String> = [0usize, 1]
            .iter()
            .flat_map(|corner| {
                geometry.coordinates[*corner]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
            })
            .map(|v| format!("{:?}", v.as_f64().unwrap_or_default()))
            .collect();
        return write!(f, "BBOX({})", ordinates.join(", "));
    }

    let keyword = match geometry.kind {
        GeometryType::Point => "POINT",
        GeometryType::MultiPoint => "MULTIPOINT",
        GeometryType::LineString => "LINESTRING",
        GeometryType::MultiLineString => "MULTILINESTRING",
        GeometryType::Polygon => "POLYGON",
        _ => "MULTIPOLYGON",
    };
    f.write_str(keyword)?;
    match geometry.kind {
        GeometryType::Point => {
            f.write_str("(")?;
            write_position(f, &geometry.coordinates)?;
            f.write_str(")")
        }
        // Nest every point of a multipoint in its own parentheses.
        GeometryType::MultiPoint => write_coordinates(
            f,
            &JsonValue::Array(
                geometry
                    .coordinates
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|p| JsonValue::Array(vec![p.clone()]))
                    .collect(),
            ),
            2,
        ),
        kind => write_coordinates(f, &geometry.coordinates, kind.nesting().min(3)),
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(value) => write!(f, "'{}'", value.replace('\'', "''")),
            Literal::Integer(value) => write!(f, "{value}"),
            Literal::Double(value) => write!(f, "{value:?}"),
            Literal::Boolean(true) => f.write_str("TRUE"),
            Literal::Boolean(false) => f.write_str("FALSE"),
            Literal::Date(value) => write!(f, "DATE('{}')", value.format("%Y-%m-%d")),
            Literal::Timestamp(value) => write!(f, "TIMESTAMP('{}')", format_timestamp(value)),
            Literal::Geometry(geometry) => write_geometry(f, geometry),
        }
    }
}

/// Renders the expression in the text filter syntax.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(literal) => write!(f, "{literal}"),
            Expr::Property(property) => {
                let path = property.to_string();
                let plain = property.namespace.as_deref().map_or(true, is_plain_identifier)
                    && is_plain_identifier(&property.name);
                if plain {
                    f.write_str(&path)
                } else {
                    write!(f, "\"{}\"", path.replace('"', "\"\""))
                }
            }
            Expr::Function { name, args } => {
                write!(f, "{name}(")?;
                write_list(f, args, ", ")?;
                f.write_str(")")
            }
            Expr::Comparison { op, left, right } => {
                write!(f, "{left} {} {right}", op.symbol())
            }
            Expr::Like { expr, pattern } => write!(f, "{expr} LIKE {pattern}"),
            Expr::Between { expr, low, high } => write!(f, "{expr} BETWEEN {low} AND {high}"),
            Expr::In { expr, list } => {
                write!(f, "{expr} IN (")?;
                write_list(f, list, ", ")?;
                f.write_str(")")
            }
            Expr::IsNull(expr) => write!(f, "{expr} IS NULL"),
            Expr::And(operands) => {
                f.write_str("(")?;
                write_list(f, operands, " AND ")?;
                f.write_str(")")
            }
            Expr::Or(operands) => {
                f.write_str("(")?;
                write_list(f, operands, " OR ")?;
                f.write_str(")")
            }
            Expr::Not(expr) => write!(f, "NOT ({expr})"),
            Expr::Spatial { op, left, right } => {
                write!(f, "{}({left}, {right})", op.name().to_ascii_uppercase())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_or_flatten_nested_operands() {
        let a = Expr::property("a");
        let b = Expr::property("b");
        let c = Expr::property("c");
        let nested = Expr::and(vec![Expr::and(vec![a.clone(), b.clone()]), c.clone()]);
        assert_eq!(nested, Expr::And(vec![a.clone(), b, c]));
        assert_eq!(Expr::or(vec![a.clone()]), a);
    }

    #[test]
    fn property_ref_splits_on_first_colon() {
        let qualified = PropertyRef::parse("bldg:storeysAboveGround");
        assert_eq!(qualified.namespace.as_deref(), Some("bldg"));
        assert_eq!(qualified.name, "storeysAboveGround");
        assert_eq!(PropertyRef::parse("objectId").namespace, None);
        assert_eq!(qualified.to_string(), "bldg:storeysAboveGround");
    }

    #[test]
    fn predicates_exclude_bare_operands() {
        assert!(!Expr::property("a").is_predicate());
        assert!(!Expr::Literal(Literal::Integer(1)).is_predicate());
        assert!(Expr::Literal(Literal::Boolean(true)).is_predicate());
        assert!(Expr::Function {
            name: "lower".into(),
            args: vec![]
        }
        .is_predicate());
    }

    #[test]
    fn display_quotes_keywords_and_escapes_strings() {
        let expr = Expr::compare(
            ComparisonOp::Eq,
            Expr::property("gen:and"),
            Expr::Literal(Literal::String("it's".into())),
        );
        assert_eq!(expr.to_string(), "\"gen:and\" = 'it''s'");
        assert_eq!(SpatialOp::Within.converse(), SpatialOp::Contains);
    }
}
