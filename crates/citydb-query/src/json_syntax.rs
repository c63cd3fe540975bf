//! Parser for the JSON filter encoding.
//!
//! Supported boolean operators:
//! - `{"op": "and" | "or", "args": [...]}`
//! - `{"op": "not", "args": [expr]}`
//!
//! Supported predicates:
//! - comparisons `=`, `<>`, `<`, `<=`, `>`, `>=` with two operands
//! - `like` (two operands), `between` (three), `in` (operand and array), `isNull` (one)
//! - `s_intersects`, `s_within`, `s_contains`, `s_disjoint`, `s_equals`
//!
//! Operands are JSON literals, `{"property": "ns:name"}`,
//! `{"function": {"name": "...", "args": [...]}}`, `{"op": "casei" | "lower" | "upper", ...}`,
//! `{"date": "..."}`, `{"timestamp": "..."}`, `{"bbox": [...]}` or GeoJSON geometries.

use citydb_core::GeometryType;
use serde_json::{Map, Value};

use crate::error::{ParseError, ParseResult};
use crate::expr::{ComparisonOp, Expr, Literal, PropertyRef, SpatialOp};
use crate::parser::{bbox_literal, date_literal, geometry_literal, timestamp_literal};

/// Upper bound on the number of operands of one `and`/`or`.
const MAX_BOOLEAN_CLAUSES: usize = 128;

/// Operators that read like functions and produce scalar values.
const FUNCTION_OPS: &[&str] = &["casei", "lower", "upper"];

pub(crate) fn parse(document: &Value, max_depth: usize) -> ParseResult<Expr> {
    if document.is_null() {
        return Err(ParseError::Empty);
    }
    JsonParser { max_depth }.boolean(document, "$", 1)
}

struct JsonParser {
    max_depth: usize,
}

impl JsonParser {
    fn check_depth(&self, depth: usize) -> ParseResult<()> {
        if depth > self.max_depth {
            return Err(ParseError::TooDeep {
                max: self.max_depth,
            });
        }
        Ok(())
    }

    fn boolean(&self, node: &Value, path: &str, depth: usize) -> ParseResult<Expr> {
        self.check_depth(depth)?;

        let obj = match node {
            Value::Bool(value) => return Ok(Expr::Literal(Literal::Boolean(*value))),
            Value::Object(obj) => obj,
            _ => {
                return Err(ParseError::NotBoolean {
                    location: path.to_string(),
                })
            }
        };

        if obj.contains_key("function") {
            return self.scalar(node, path, depth);
        }
        let Some(op) = obj.get("op") else {
            return Err(ParseError::NotBoolean {
                location: path.to_string(),
            });
        };
        let op = op
            .as_str()
            .ok_or_else(|| ParseError::json(&format!("{path}.op"), "operator must be a string"))?
            .to_ascii_lowercase();
        let args = self.args(obj, path)?;

        match op.as_str() {
            "and" | "or" => {
                if args.is_empty() || args.len() > MAX_BOOLEAN_CLAUSES {
                    return Err(ParseError::json(
                        &format!("{path}.args"),
                        format!("{op} expects 1 to {MAX_BOOLEAN_CLAUSES} operands, found {}", args.len()),
                    ));
                }
                let operands = args
                    .iter()
                    .enumerate()
                    .map(|(index, arg)| self.boolean(arg, &arg_path(path, index), depth + 1))
                    .collect::<ParseResult<Vec<_>>>()?;
                Ok(if op == "and" {
                    Expr::and(operands)
                } else {
                    Expr::or(operands)
                })
            }
            "not" => {
                let [operand] = self.fixed::<1>(&op, args, path)?;
                Ok(Expr::not(self.boolean(operand, &arg_path(path, 0), depth + 1)?))
            }
            "like" => {
                let [expr, pattern] = self.scalars::<2>(&op, args, path, depth)?;
                Ok(Expr::Like {
                    expr: Box::new(expr),
                    pattern: Box::new(pattern),
                })
            }
            "between" => {
                let [expr, low, high] = self.scalars::<3>(&op, args, path, depth)?;
                Ok(Expr::Between {
                    expr: Box::new(expr),
                    low: Box::new(low),
                    high: Box::new(high),
                })
            }
            "in" => {
                let [expr, list] = self.fixed::<2>(&op, args, path)?;
                let list_path = arg_path(path, 1);
                let items = list.as_array().ok_or_else(|| {
                    ParseError::json(&list_path, "in expects an array of values")
                })?;
                Ok(Expr::In {
                    expr: Box::new(self.scalar(expr, &arg_path(path, 0), depth)?),
                    list: items
                        .iter()
                        .enumerate()
                        .map(|(index, item)| self.scalar(item, &arg_path(&list_path, index), depth))
                        .collect::<ParseResult<Vec<_>>>()?,
                })
            }
            "isnull" => {
                let [expr] = self.scalars::<1>(&op, args, path, depth)?;
                Ok(Expr::IsNull(Box::new(expr)))
            }
            name if FUNCTION_OPS.contains(&name) => self.scalar(node, path, depth),
            name => {
                if let Some(op) = ComparisonOp::from_symbol(name) {
                    let [left, right] = self.scalars::<2>(name, args, path, depth)?;
                    return Ok(Expr::compare(op, left, right));
                }
                if let Some(op) = SpatialOp::from_name(name) {
                    let [left, right] = self.scalars::<2>(name, args, path, depth + 1)?;
                    return Ok(Expr::Spatial {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    });
                }
                Err(ParseError::json(
                    &format!("{path}.op"),
                    format!("unsupported operator `{name}`"),
                ))
            }
        }
    }

    fn args<'v>(&self, obj: &'v Map<String, Value>, path: &str) -> ParseResult<&'v [Value]> {
        match obj.get("args") {
            Some(Value::Array(args)) => Ok(args),
            Some(other) => Err(ParseError::json(
                &format!("{path}.args"),
                format!("expected array, found {other}"),
            )),
            None => Err(ParseError::json(path, "missing `args`")),
        }
    }

    fn fixed<'v, const N: usize>(
        &self,
        op: &str,
        args: &'v [Value],
        path: &str,
    ) -> ParseResult<[&'v Value; N]> {
        let refs: Vec<&Value> = args.iter().collect();
        refs.try_into().map_err(|refs: Vec<&Value>| {
            ParseError::json(
                &format!("{path}.args"),
                format!("{op} expects {N} operand(s), found {}", refs.len()),
            )
        })
    }

    fn scalars<const N: usize>(
        &self,
        op: &str,
        args: &[Value],
        path: &str,
        depth: usize,
    ) -> ParseResult<[Expr; N]> {
        let operands = self.fixed::<N>(op, args, path)?;
        let parsed = operands
            .iter()
            .enumerate()
            .map(|(index, arg)| self.scalar(arg, &arg_path(path, index), depth))
            .collect::<ParseResult<Vec<_>>>()?;
        parsed
            .try_into()
            .map_err(|_| ParseError::json(path, "operand count changed while parsing"))
    }

    fn scalar(&self, node: &Value, path: &str, depth: usize) -> ParseResult<Expr> {
        self.check_depth(depth)?;

        let obj = match node {
            Value::String(value) => return Ok(Expr::Literal(Literal::String(value.clone()))),
            Value::Bool(value) => return Ok(Expr::Literal(Literal::Boolean(*value))),
            Value::Number(number) => {
                let literal = match number.as_i64() {
                    Some(value) => Literal::Integer(value),
                    None => Literal::Double(number.as_f64().ok_or_else(|| {
                        ParseError::InvalidLiteral {
                            kind: "number",
                            value: number.to_string(),
                            reason: "not representable".to_string(),
                        }
                    })?),
                };
                return Ok(Expr::Literal(literal));
            }
            Value::Object(obj) => obj,
            Value::Null | Value::Array(_) => {
                return Err(ParseError::json(path, format!("unexpected operand {node}")))
            }
        };

        if let Some(property) = obj.get("property") {
            let property = property
                .as_str()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| ParseError::json(path, "property must be a non-empty string"))?;
            return Ok(Expr::Property(PropertyRef::parse(property)));
        }

        if let Some(function) = obj.get("function") {
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ParseError::json(&format!("{path}.function"), "missing function name"))?;
            let args: &[Value] = match function.get("args") {
                Some(Value::Array(args)) => args.as_slice(),
                None => &[],
                Some(_) => {
                    return Err(ParseError::json(
                        &format!("{path}.function.args"),
                        "expected array",
                    ))
                }
            };
            return self.function(name, args, &format!("{path}.function"), depth);
        }

        if let Some(op) = obj.get("op").and_then(Value::as_str) {
            let name = op.to_ascii_lowercase();
            if FUNCTION_OPS.contains(&name.as_str()) {
                let args = self.args(obj, path)?;
                return self.function(&name, args, path, depth);
            }
            return self.boolean(node, path, depth);
        }

        if let Some(date) = obj.get("date") {
            let text = date
                .as_str()
                .ok_or_else(|| ParseError::json(path, "date must be a string"))?;
            return Ok(Expr::Literal(Literal::Date(date_literal(text)?)));
        }

        if let Some(timestamp) = obj.get("timestamp") {
            let text = timestamp
                .as_str()
                .ok_or_else(|| ParseError::json(path, "timestamp must be a string"))?;
            return Ok(Expr::Literal(Literal::Timestamp(timestamp_literal(text)?)));
        }

        if let Some(bbox) = obj.get("bbox") {
            let values = bbox
                .as_array()
                .and_then(|items| items.iter().map(Value::as_f64).collect::<Option<Vec<_>>>())
                .ok_or_else(|| ParseError::json(path, "bbox must be an array of numbers"))?;
            return Ok(Expr::Literal(Literal::Geometry(bbox_literal(&values)?)));
        }

        if let (Some(kind), Some(coordinates)) = (obj.get("type"), obj.get("coordinates")) {
            let kind = kind
                .as_str()
                .and_then(geojson_kind)
                .ok_or_else(|| ParseError::json(&format!("{path}.type"), format!("unsupported geometry type {kind}")))?;
            return Ok(Expr::Literal(Literal::Geometry(geometry_literal(
                kind,
                coordinates,
            )?)));
        }

        Err(ParseError::json(path, format!("unsupported operand {node}")))
    }

    fn function(&self, name: &str, args: &[Value], path: &str, depth: usize) -> ParseResult<Expr> {
        self.check_depth(depth + 1)?;
        let args = args
            .iter()
            .enumerate()
            .map(|(index, arg)| self.scalar(arg, &arg_path(path, index), depth + 1))
            .collect::<ParseResult<Vec<_>>>()?;
        Ok(Expr::Function {
            name: name.to_ascii_lowercase(),
            args,
        })
    }
}

fn arg_path(path: &str, index: usize) -> String {
    format!("{path}.args[{index}]")
}

fn geojson_kind(name: &str) -> Option<GeometryType> {
    let kind = match name {
        "Point" => GeometryType::Point,
        "MultiPoint" => GeometryType::MultiPoint,
        "LineString" => GeometryType::LineString,
        "MultiLineString" => GeometryType::MultiLineString,
        "Polygon" => GeometryType::Polygon,
        "MultiPolygon" => GeometryType::MultiPolygon,
        _ => return None,
    };
    Some(kind)
}
