//! Translation of filter expressions and LOD filters into parameterised SQL.
//!
//! Every predicate refers to the feature row under the alias `f`. Attribute
//! values are read from the `property` table by correlated subqueries, and
//! spatial predicates compare bounding boxes: the feature envelope columns of
//! `feature`, or the envelope columns of `geometry_data` for a named
//! geometry property.

use citydb_core::{
    date_timestamp, format_timestamp, DataType, Envelope, LodFilter, LodMode, PropertyTarget,
    QualifiedName, ResolveError, SchemaMapping, TypeFamily,
};

use crate::error::{CompileError, CompileResult};
use crate::expr::{Expr, Literal, PropertyRef, SpatialOp};
use crate::functions;
use crate::query::{CompiledQuery, Query};

/// Bind parameter of a compiled statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Integer(i64),
    Double(f64),
    Text(String),
}

/// SQL boolean expression with `?` placeholders and their ordered values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledPredicate {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl CompiledPredicate {
    fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    fn always(value: bool) -> Self {
        Self::new(if value { "1 = 1" } else { "1 = 0" })
    }

    /// Joins predicates with `AND` or `OR`, keeping parameter order.
    fn join(parts: Vec<CompiledPredicate>, connective: &str) -> Self {
        let mut params = Vec::new();
        let mut clauses = Vec::with_capacity(parts.len());
        for part in parts {
            clauses.push(part.sql);
            params.extend(part.params);
        }
        Self {
            sql: format!("({})", clauses.join(connective)),
            params,
        }
    }
}

/// Scalar operand with its resolved data type.
#[derive(Debug, Clone)]
struct Operand {
    sql: String,
    params: Vec<SqlParam>,
    data_type: DataType,
}

const CONTAINED_RELATION: i64 = 1;

/// Compiles expressions against the schema of one database adapter.
#[derive(Debug, Clone)]
pub struct SqlCompiler<'a> {
    schema: &'a SchemaMapping,
    scope: Vec<QualifiedName>,
}

impl<'a> SqlCompiler<'a> {
    #[must_use]
    pub fn new(schema: &'a SchemaMapping) -> Self {
        Self {
            schema,
            scope: Vec::new(),
        }
    }

    /// Restricts unqualified property resolution to the given feature types.
    #[must_use]
    pub fn with_scope(mut self, feature_types: Vec<QualifiedName>) -> Self {
        self.scope = feature_types;
        self
    }

    #[must_use]
    pub fn schema(&self) -> &SchemaMapping {
        self.schema
    }

    /// Compiles a boolean filter expression.
    pub fn compile_filter(&self, expr: &Expr) -> CompileResult<CompiledPredicate> {
        self.boolean(expr)
    }

    /// Compiles an LOD filter into an existence check per LOD combined by
    /// the filter's mode. An unrestricted filter compiles to `1 = 1`.
    #[must_use]
    pub fn compile_lod_filter(&self, filter: &LodFilter) -> CompiledPredicate {
        if filter.is_unrestricted() {
            return CompiledPredicate::always(true);
        }

        let checks = filter
            .lods()
            .iter()
            .map(|lod| lod_check(lod, filter.search_depth()))
            .collect();
        let connective = match filter.mode() {
            LodMode::And => " AND ",
            LodMode::Or => " OR ",
        };
        CompiledPredicate::join(checks, connective)
    }

    /// Compiles a full selection query against this compiler's schema.
    pub fn compile_query(&self, query: &Query) -> CompileResult<CompiledQuery> {
        query.compile(self.schema)
    }

    fn resolve(&self, property: &PropertyRef) -> CompileResult<PropertyTarget> {
        self.schema
            .resolve(property.namespace.as_deref(), &property.name, &self.scope)
            .map_err(|err| match err {
                ResolveError::Unknown => CompileError::UnresolvedProperty {
                    property: property.to_string(),
                },
                ResolveError::Ambiguous(candidates) => CompileError::AmbiguousProperty {
                    property: property.to_string(),
                    candidates: candidates.iter().map(ToString::to_string).collect(),
                },
                ResolveError::FeatureProperty(name) => CompileError::Unsupported(format!(
                    "feature property `{name}` has no value to compare"
                )),
            })
    }

    fn boolean(&self, expr: &Expr) -> CompileResult<CompiledPredicate> {
        match expr {
            Expr::And(operands) if operands.is_empty() => Ok(CompiledPredicate::always(true)),
            Expr::Or(operands) if operands.is_empty() => Ok(CompiledPredicate::always(false)),
            Expr::And(operands) => Ok(CompiledPredicate::join(
                operands
                    .iter()
                    .map(|operand| self.boolean(operand))
                    .collect::<CompileResult<_>>()?,
                " AND ",
            )),
            Expr::Or(operands) => Ok(CompiledPredicate::join(
                operands
                    .iter()
                    .map(|operand| self.boolean(operand))
                    .collect::<CompileResult<_>>()?,
                " OR ",
            )),
            Expr::Not(inner) => {
                let inner = self.boolean(inner)?;
                Ok(CompiledPredicate::with_params(
                    format!("NOT ({})", inner.sql),
                    inner.params,
                ))
            }
            Expr::Literal(Literal::Boolean(value)) => Ok(CompiledPredicate::always(*value)),
            Expr::Comparison { op, left, right } => {
                let left = self.scalar(left)?;
                let right = self.scalar(right)?;
                check_comparable(op.symbol(), &left, &right)?;
                Ok(binary(&left, op.symbol(), &right))
            }
            Expr::Like { expr, pattern } => {
                let expr = self.scalar(expr)?;
                let pattern = self.scalar(pattern)?;
                if expr.data_type.family() != TypeFamily::Text
                    || pattern.data_type.family() != TypeFamily::Text
                {
                    return Err(mismatch("LIKE", &expr, &pattern));
                }
                Ok(binary(&expr, "GLOB", &glob_pattern(pattern)))
            }
            Expr::Between { expr, low, high } => {
                let expr = self.scalar(expr)?;
                let low = self.scalar(low)?;
                let high = self.scalar(high)?;
                check_comparable("BETWEEN", &expr, &low)?;
                check_comparable("BETWEEN", &expr, &high)?;
                let mut params = expr.params;
                params.extend(low.params);
                params.extend(high.params);
                Ok(CompiledPredicate::with_params(
                    format!("{} BETWEEN {} AND {}", expr.sql, low.sql, high.sql),
                    params,
                ))
            }
            Expr::In { list, .. } if list.is_empty() => Ok(CompiledPredicate::always(false)),
            Expr::In { expr, list } => {
                let expr = self.scalar(expr)?;
                let mut params = expr.params.clone();
                let mut items = Vec::with_capacity(list.len());
                for item in list {
                    let item = self.scalar(item)?;
                    check_comparable("IN", &expr, &item)?;
                    items.push(item.sql);
                    params.extend(item.params);
                }
                Ok(CompiledPredicate::with_params(
                    format!("{} IN ({})", expr.sql, items.join(", ")),
                    params,
                ))
            }
            Expr::IsNull(inner) => {
                let operand = self.scalar(inner)?;
                Ok(CompiledPredicate::with_params(
                    format!("{} IS NULL", operand.sql),
                    operand.params,
                ))
            }
            Expr::Spatial { op, left, right } => self.spatial(*op, left, right),
            Expr::Property(_) | Expr::Function { .. } => {
                let operand = self.scalar(expr)?;
                if operand.data_type != DataType::Boolean {
                    return Err(CompileError::NotBoolean {
                        expression: expr.to_string(),
                    });
                }
                Ok(CompiledPredicate::with_params(
                    format!("{} = 1", operand.sql),
                    operand.params,
                ))
            }
            Expr::Literal(_) => Err(CompileError::NotBoolean {
                expression: expr.to_string(),
            }),
        }
    }

    fn scalar(&self, expr: &Expr) -> CompileResult<Operand> {
        match expr {
            Expr::Literal(literal) => literal_operand(literal),
            Expr::Property(property) => self.property_operand(property),
            Expr::Function { name, args } => self.function_operand(name, args),
            other => Err(CompileError::Unsupported(format!(
                "{other} cannot be used as a value"
            ))),
        }
    }

    fn property_operand(&self, property: &PropertyRef) -> CompileResult<Operand> {
        let operand = match self.resolve(property)? {
            PropertyTarget::Column(column) => Operand {
                sql: format!("f.{}", column.column()),
                params: Vec::new(),
                data_type: column.data_type(),
            },
            PropertyTarget::Attribute(mapping) => Operand {
                sql: format!(
                    "(SELECT p.{} FROM property p WHERE p.feature_id = f.id \
                     AND p.namespace = ? AND p.name = ? ORDER BY p.seq LIMIT 1)",
                    mapping.value_column()
                ),
                params: name_params(&mapping.name),
                data_type: mapping.data_type,
            },
            PropertyTarget::Geometry(name) => Operand {
                sql: "(SELECT COALESCE(p.val_geometry_id, p.val_implicitgeom_id) FROM property p \
                      WHERE p.feature_id = f.id AND p.namespace = ? AND p.name = ? \
                      ORDER BY p.seq LIMIT 1)"
                    .to_string(),
                params: name_params(&name),
                data_type: DataType::Geometry,
            },
            PropertyTarget::Envelope => Operand {
                sql: "f.min_x".to_string(),
                params: Vec::new(),
                data_type: DataType::Envelope,
            },
        };
        Ok(operand)
    }

    fn function_operand(&self, name: &str, args: &[Expr]) -> CompileResult<Operand> {
        let spec = functions::lookup(name).ok_or_else(|| CompileError::UnknownFunction {
            name: name.to_string(),
        })?;
        if args.len() != spec.arity() {
            return Err(CompileError::Arity {
                name: name.to_string(),
                expected: spec.arity(),
                found: args.len(),
            });
        }

        let mut sql_args = Vec::with_capacity(args.len());
        let mut params = Vec::new();
        let mut first_type = None;
        for (arg, family) in args.iter().zip(spec.arguments) {
            let operand = self.scalar(arg)?;
            if operand.data_type.family() != *family {
                return Err(CompileError::TypeMismatch {
                    operator: name.to_string(),
                    left: format!("{family:?}").to_ascii_lowercase(),
                    right: operand.data_type.as_str().to_string(),
                });
            }
            first_type.get_or_insert(operand.data_type);
            sql_args.push(operand.sql);
            params.extend(operand.params);
        }

        Ok(Operand {
            sql: format!("{}({})", spec.sql, sql_args.join(", ")),
            params,
            data_type: spec.return_type(first_type.unwrap_or(DataType::String)),
        })
    }

    fn spatial(&self, op: SpatialOp, left: &Expr, right: &Expr) -> CompileResult<CompiledPredicate> {
        let (target, geometry, op) = match (left, right) {
            (_, Expr::Literal(Literal::Geometry(geometry))) => (left, geometry, op),
            (Expr::Literal(Literal::Geometry(geometry)), _) => (right, geometry, op.converse()),
            _ => {
                return Err(CompileError::Unsupported(format!(
                    "{} needs a geometry literal operand",
                    op.name()
                )))
            }
        };

        let Expr::Property(property) = target else {
            return Err(CompileError::Unsupported(format!(
                "{} needs a geometry property operand",
                op.name()
            )));
        };
        let bounds = geometry.envelope().ok_or_else(|| {
            CompileError::Unsupported(format!("{} with an empty geometry", op.name()))
        })?;

        match self.resolve(property)? {
            PropertyTarget::Envelope => {
                if op == SpatialOp::Disjoint {
                    let overlap = envelope_condition(SpatialOp::Intersects, "f.", &bounds);
                    return Ok(CompiledPredicate::with_params(
                        format!("(f.min_x IS NOT NULL AND NOT ({}))", overlap.sql),
                        overlap.params,
                    ));
                }
                let condition = envelope_condition(op, "f.", &bounds);
                Ok(CompiledPredicate::with_params(
                    format!("({})", condition.sql),
                    condition.params,
                ))
            }
            PropertyTarget::Geometry(name) => {
                let exists = |condition: Option<CompiledPredicate>| {
                    let mut params = name_params(&name);
                    let mut sql = "EXISTS (SELECT 1 FROM property p \
                                   JOIN geometry_data g ON g.id = p.val_geometry_id \
                                   WHERE p.feature_id = f.id AND p.namespace = ? AND p.name = ?"
                        .to_string();
                    if let Some(condition) = condition {
                        sql.push_str(" AND ");
                        sql.push_str(&condition.sql);
                        params.extend(condition.params);
                    }
                    sql.push(')');
                    CompiledPredicate::with_params(sql, params)
                };

                if op == SpatialOp::Disjoint {
                    let present = exists(None);
                    let overlapping = exists(Some(envelope_condition(
                        SpatialOp::Intersects,
                        "g.",
                        &bounds,
                    )));
                    let mut params = present.params;
                    params.extend(overlapping.params);
                    return Ok(CompiledPredicate::with_params(
                        format!("({} AND NOT {})", present.sql, overlapping.sql),
                        params,
                    ));
                }
                Ok(exists(Some(envelope_condition(op, "g.", &bounds))))
            }
            other => Err(CompileError::TypeMismatch {
                operator: op.name().to_string(),
                left: other.data_type().as_str().to_string(),
                right: DataType::Geometry.as_str().to_string(),
            }),
        }
    }
}

fn name_params(name: &QualifiedName) -> Vec<SqlParam> {
    vec![
        SqlParam::Text(name.namespace.clone()),
        SqlParam::Text(name.name.clone()),
    ]
}

fn literal_operand(literal: &Literal) -> CompileResult<Operand> {
    let (param, data_type) = match literal {
        Literal::String(value) => (SqlParam::Text(value.clone()), DataType::String),
        Literal::Integer(value) => (SqlParam::Integer(*value), DataType::Integer),
        Literal::Double(value) => (SqlParam::Double(*value), DataType::Double),
        Literal::Boolean(value) => (SqlParam::Integer(i64::from(*value)), DataType::Boolean),
        Literal::Date(date) => (
            SqlParam::Text(format_timestamp(&date_timestamp(*date))),
            DataType::Date,
        ),
        Literal::Timestamp(timestamp) => {
            (SqlParam::Text(format_timestamp(timestamp)), DataType::Timestamp)
        }
        Literal::Geometry(_) => {
            return Err(CompileError::Unsupported(
                "geometry literals are only valid in spatial predicates".to_string(),
            ))
        }
    };
    Ok(Operand {
        sql: "?".to_string(),
        params: vec![param],
        data_type,
    })
}

fn mismatch(operator: &str, left: &Operand, right: &Operand) -> CompileError {
    CompileError::TypeMismatch {
        operator: operator.to_string(),
        left: left.data_type.as_str().to_string(),
        right: right.data_type.as_str().to_string(),
    }
}

fn check_comparable(operator: &str, left: &Operand, right: &Operand) -> CompileResult<()> {
    let family = left.data_type.family();
    if family == TypeFamily::Spatial || family != right.data_type.family() {
        return Err(mismatch(operator, left, right));
    }
    Ok(())
}

fn binary(left: &Operand, operator: &str, right: &Operand) -> CompiledPredicate {
    let mut params = left.params.clone();
    params.extend(right.params.iter().cloned());
    CompiledPredicate::with_params(format!("{} {operator} {}", left.sql, right.sql), params)
}

/// Rewrites a `LIKE` pattern operand for SQLite `GLOB`, which matches
/// case-sensitively. `%` and `_` become `*` and `?`; `*`, `?` and `[` are
/// matched literally.
fn glob_pattern(pattern: Operand) -> Operand {
    if let [SqlParam::Text(text)] = pattern.params.as_slice() {
        if pattern.sql == "?" {
            return Operand {
                params: vec![SqlParam::Text(like_to_glob(text))],
                ..pattern
            };
        }
    }
    Operand {
        sql: format!(
            "replace(replace(replace(replace(replace({}, '[', '[[]'), '*', '[*]'), \
             '?', '[?]'), '%', '*'), '_', '?')",
            pattern.sql
        ),
        ..pattern
    }
}

/// Literal pattern translation; a backslash escapes the next character.
fn like_to_glob(pattern: &str) -> String {
    fn literal(glob: &mut String, c: char) {
        if matches!(c, '*' | '?' | '[') {
            glob.push('[');
            glob.push(c);
            glob.push(']');
        } else {
            glob.push(c);
        }
    }

    let mut glob = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => glob.push('*'),
            '_' => glob.push('?'),
            '\\' => literal(&mut glob, chars.next().unwrap_or('\\')),
            other => literal(&mut glob, other),
        }
    }
    glob
}

/// Bounding box comparison of the columns under `prefix` against `bounds`
/// in the x/y plane.
fn envelope_condition(op: SpatialOp, prefix: &str, bounds: &Envelope) -> CompiledPredicate {
    let [min_x, min_y, _] = bounds.min;
    let [max_x, max_y, _] = bounds.max;
    let (operators, values) = match op {
        SpatialOp::Intersects | SpatialOp::Disjoint => {
            (["<=", ">=", "<=", ">="], [max_x, min_x, max_y, min_y])
        }
        SpatialOp::Within => ([">=", "<=", ">=", "<="], [min_x, max_x, min_y, max_y]),
        SpatialOp::Contains => (["<=", ">=", "<=", ">="], [min_x, max_x, min_y, max_y]),
        SpatialOp::Equals => (["=", "=", "=", "="], [min_x, max_x, min_y, max_y]),
    };
    let columns = ["min_x", "max_x", "min_y", "max_y"];
    let sql = columns
        .iter()
        .zip(operators)
        .map(|(column, operator)| format!("{prefix}{column} {operator} ?"))
        .collect::<Vec<_>>()
        .join(" AND ");
    CompiledPredicate::with_params(sql, values.into_iter().map(SqlParam::Double).collect())
}

/// Existence of geometry tagged with `lod` on the feature or, up to `depth`
/// levels down, on one of its contained children.
fn lod_check(lod: &str, depth: Option<u32>) -> CompiledPredicate {
    const HAS_GEOMETRY: &str =
        "(p.val_geometry_id IS NOT NULL OR p.val_implicitgeom_id IS NOT NULL)";

    match depth {
        Some(0) => CompiledPredicate::with_params(
            format!(
                "EXISTS (SELECT 1 FROM property p WHERE p.feature_id = f.id \
                 AND p.val_lod = ? AND {HAS_GEOMETRY})"
            ),
            vec![SqlParam::Text(lod.to_string())],
        ),
        Some(depth) => CompiledPredicate::with_params(
            format!(
                "f.id IN (WITH RECURSIVE lod_match(id, depth) AS (\
                 SELECT p.feature_id, 0 FROM property p WHERE p.val_lod = ? AND {HAS_GEOMETRY} \
                 UNION SELECT c.feature_id, m.depth + 1 FROM property c \
                 JOIN lod_match m ON c.val_feature_id = m.id \
                 WHERE c.val_relation_type = {CONTAINED_RELATION} AND m.depth < ?) \
                 SELECT id FROM lod_match)"
            ),
            vec![
                SqlParam::Text(lod.to_string()),
                SqlParam::Integer(i64::from(depth)),
            ],
        ),
        // UNION drops rows already produced, so cyclic containment terminates.
        None => CompiledPredicate::with_params(
            format!(
                "f.id IN (WITH RECURSIVE lod_match(id) AS (\
                 SELECT p.feature_id FROM property p WHERE p.val_lod = ? AND {HAS_GEOMETRY} \
                 UNION SELECT c.feature_id FROM property c \
                 JOIN lod_match m ON c.val_feature_id = m.id \
                 WHERE c.val_relation_type = {CONTAINED_RELATION}) \
                 SELECT id FROM lod_match)"
            ),
            vec![SqlParam::Text(lod.to_string())],
        ),
    }
}

/// Predicate excluding features contained in another feature.
pub(crate) fn top_level_predicate() -> CompiledPredicate {
    CompiledPredicate::new(format!(
        "NOT EXISTS (SELECT 1 FROM property c WHERE c.val_feature_id = f.id \
         AND c.val_relation_type = {CONTAINED_RELATION})"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_text;
    use citydb_core::FeatureTypeRegistry;

    fn schema() -> SchemaMapping {
        SchemaMapping::from_registry(&FeatureTypeRegistry::with_defaults())
    }

    fn compile(schema: &SchemaMapping, filter: &str) -> CompileResult<CompiledPredicate> {
        SqlCompiler::new(schema).compile_filter(&parse_text(filter).unwrap())
    }

    #[test]
    fn attribute_compiles_to_typed_subquery() {
        let schema = schema();
        let predicate = compile(&schema, "bldg:storeysAboveGround >= 3").unwrap();
        assert_eq!(
            predicate.sql,
            "(SELECT p.val_int FROM property p WHERE p.feature_id = f.id \
             AND p.namespace = ? AND p.name = ? ORDER BY p.seq LIMIT 1) >= ?"
        );
        assert_eq!(
            predicate.params,
            vec![
                SqlParam::Text("bldg".into()),
                SqlParam::Text("storeysAboveGround".into()),
                SqlParam::Integer(3),
            ]
        );
    }

    #[test]
    fn core_columns_and_connectives_keep_parameter_order() {
        let schema = schema();
        let predicate =
            compile(&schema, "objectId = 'b1' OR NOT (creationDate < DATE('2020-01-02'))").unwrap();
        assert_eq!(
            predicate.sql,
            "(f.objectid = ? OR NOT (f.creation_date < ?))"
        );
        assert_eq!(
            predicate.params,
            vec![
                SqlParam::Text("b1".into()),
                SqlParam::Text("2020-01-02T00:00:00.000Z".into()),
            ]
        );
    }

    #[test]
    fn unresolved_and_mistyped_references_fail() {
        let schema = schema();
        assert_eq!(
            compile(&schema, "bldg:nope = 1"),
            Err(CompileError::UnresolvedProperty {
                property: "bldg:nope".into()
            })
        );
        assert!(matches!(
            compile(&schema, "bldg:storeysAboveGround = 'three'"),
            Err(CompileError::TypeMismatch { .. })
        ));
        assert!(matches!(
            compile(&schema, "bldg:storeysAboveGround LIKE '3%'"),
            Err(CompileError::TypeMismatch { .. })
        ));
        assert!(matches!(
            compile(&schema, "function = 'x'"),
            Err(CompileError::AmbiguousProperty { .. })
        ));
    }

    #[test]
    fn functions_are_checked_against_the_registry() {
        let schema = schema();
        let predicate = compile(&schema, "casei(gen:owner) = casei('City')").unwrap();
        assert!(predicate.sql.starts_with("LOWER((SELECT p.val_string"));
        assert!(predicate.sql.ends_with("= LOWER(?)"));

        assert_eq!(
            compile(&schema, "soundex(gen:owner) = 'x'"),
            Err(CompileError::UnknownFunction {
                name: "soundex".into()
            })
        );
        assert!(matches!(
            compile(&schema, "lower(gen:owner, 'x') = 'x'"),
            Err(CompileError::Arity { expected: 1, found: 2, .. })
        ));
        assert!(matches!(
            compile(&schema, "abs(gen:owner) = 1"),
            Err(CompileError::TypeMismatch { .. })
        ));
        assert!(matches!(
            compile(&schema, "lower(gen:owner)"),
            Err(CompileError::NotBoolean { .. })
        ));
    }

    #[test]
    fn spatial_predicates_compare_envelopes() {
        let schema = schema();
        let predicate = compile(&schema, "S_INTERSECTS(envelope, BBOX(0, 1, 10, 11))").unwrap();
        assert_eq!(
            predicate.sql,
            "(f.min_x <= ? AND f.max_x >= ? AND f.min_y <= ? AND f.max_y >= ?)"
        );
        assert_eq!(
            predicate.params,
            vec![
                SqlParam::Double(10.0),
                SqlParam::Double(0.0),
                SqlParam::Double(11.0),
                SqlParam::Double(1.0),
            ]
        );

        let swapped = compile(&schema, "S_WITHIN(BBOX(0, 0, 1, 1), bldg:lod2Solid)").unwrap();
        assert!(swapped.sql.starts_with("EXISTS (SELECT 1 FROM property p JOIN geometry_data g"));
        assert!(swapped.sql.contains("g.min_x <= ? AND g.max_x >= ?"));

        assert!(matches!(
            compile(&schema, "S_INTERSECTS(bldg:storeysAboveGround, POINT(1 2))"),
            Err(CompileError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn lod_filter_combines_checks_by_mode() {
        let schema = schema();
        let compiler = SqlCompiler::new(&schema);

        assert_eq!(compiler.compile_lod_filter(&LodFilter::new()).sql, "1 = 1");

        let flat = compiler.compile_lod_filter(
            &LodFilter::new()
                .with_lods(["1", "2"])
                .with_mode(LodMode::And)
                .with_search_depth(0),
        );
        assert!(flat.sql.starts_with("(EXISTS (SELECT 1 FROM property p"));
        assert!(flat.sql.contains(") AND EXISTS ("));
        assert!(!flat.sql.contains("RECURSIVE"));
        assert_eq!(
            flat.params,
            vec![SqlParam::Text("1".into()), SqlParam::Text("2".into())]
        );

        let bounded = compiler.compile_lod_filter(&LodFilter::new().with_lods(["2"]).with_search_depth(2));
        assert!(bounded.sql.contains("m.depth < ?"));
        assert_eq!(
            bounded.params,
            vec![SqlParam::Text("2".into()), SqlParam::Integer(2)]
        );

        let unbounded = compiler.compile_lod_filter(&LodFilter::new().with_lods(["2"]));
        assert!(unbounded.sql.contains("WITH RECURSIVE lod_match(id) AS"));
    }

    #[test]
    fn compile_query_matches_query_compile() {
        let schema = schema();
        let query = Query::new()
            .with_filter(parse_text("bldg:function = '1000'").unwrap())
            .with_lod_filter(LodFilter::new().with_lods(["2"]).with_search_depth(0));
        let compiled = SqlCompiler::new(&schema).compile_query(&query).unwrap();
        assert_eq!(compiled, query.compile(&schema).unwrap());
        assert!(compiled.sql.starts_with("SELECT f.id FROM feature f WHERE "));
    }

    #[test]
    fn like_compiles_to_case_sensitive_glob() {
        let schema = schema();
        let predicate = compile(&schema, r"gen:owner LIKE 'Ab_%\%[*'").unwrap();
        assert!(predicate.sql.ends_with(" GLOB ?"));
        assert_eq!(
            predicate.params.last(),
            Some(&SqlParam::Text("Ab?*%[[][*]".into()))
        );

        let predicate = compile(&schema, "gen:owner LIKE gen:nickname").unwrap();
        assert!(predicate.sql.contains(" GLOB replace(replace("));
    }

    #[test]
    fn feature_property_cannot_be_compared() {
        let schema = schema();
        assert!(matches!(
            compile(&schema, "bldg:relatedTo = 'b-1'"),
            Err(CompileError::Unsupported(message)) if message.contains("bldg:relatedTo")
        ));
    }

    #[test]
    fn like_to_glob_escapes_glob_metacharacters() {
        assert_eq!(like_to_glob("a%b_c"), "a*b?c");
        assert_eq!(like_to_glob("?*["), "[?][*][[]");
        assert_eq!(like_to_glob(r"100\%"), "100%");
        assert_eq!(like_to_glob("x]"), "x]");
    }
}
