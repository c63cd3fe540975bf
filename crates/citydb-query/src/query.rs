//! Feature selection queries used by export and delete.

use citydb_core::{LodFilter, QualifiedName, SchemaMapping};
use tracing::debug;

use crate::compiler::{top_level_predicate, CompiledPredicate, SqlCompiler, SqlParam};
use crate::error::{CompileError, CompileResult};
use crate::expr::Expr;

/// Selection of features by type, filter expression and LOD.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Feature types to select. Empty selects every top-level type.
    pub feature_types: Vec<QualifiedName>,
    pub filter: Option<Expr>,
    pub lod_filter: LodFilter,
    pub limit: Option<u64>,
    /// Also select features contained in another feature.
    pub include_children: bool,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_feature_type(mut self, feature_type: QualifiedName) -> Self {
        self.feature_types.push(feature_type);
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn with_lod_filter(mut self, lod_filter: LodFilter) -> Self {
        self.lod_filter = lod_filter;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn including_children(mut self) -> Self {
        self.include_children = true;
        self
    }

    /// Compiles the query into a statement returning matching `feature.id`
    /// values in ascending order.
    pub fn compile(&self, schema: &SchemaMapping) -> CompileResult<CompiledQuery> {
        for feature_type in &self.feature_types {
            if schema.feature_type(feature_type).is_none() {
                return Err(CompileError::UnknownFeatureType {
                    feature_type: feature_type.to_string(),
                });
            }
        }

        let types: Vec<QualifiedName> = if self.feature_types.is_empty() {
            schema
                .feature_types()
                .filter(|mapping| self.include_children || mapping.top_level)
                .map(|mapping| mapping.name.clone())
                .collect()
        } else {
            self.feature_types.clone()
        };

        let mut clauses = Vec::new();
        if types.is_empty() {
            clauses.push(CompiledPredicate {
                sql: "1 = 0".to_string(),
                params: Vec::new(),
            });
        } else {
            let placeholders = vec!["?"; types.len()].join(", ");
            clauses.push(CompiledPredicate {
                sql: format!("f.objectclass IN ({placeholders})"),
                params: types
                    .iter()
                    .map(|name| SqlParam::Text(name.to_string()))
                    .collect(),
            });
        }

        let compiler = SqlCompiler::new(schema).with_scope(self.feature_types.clone());
        if let Some(filter) = &self.filter {
            clauses.push(compiler.compile_filter(filter)?);
        }
        if !self.lod_filter.is_unrestricted() {
            clauses.push(compiler.compile_lod_filter(&self.lod_filter));
        }
        if !self.include_children {
            clauses.push(top_level_predicate());
        }

        let mut sql = String::from("SELECT f.id FROM feature f WHERE ");
        let mut params = Vec::new();
        for (index, clause) in clauses.into_iter().enumerate() {
            if index > 0 {
                sql.push_str(" AND ");
            }
            sql.push('(');
            sql.push_str(&clause.sql);
            sql.push(')');
            params.extend(clause.params);
        }
        sql.push_str(" ORDER BY f.id");
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            params.push(SqlParam::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        debug!(sql = %sql, params = params.len(), "compiled feature query");
        Ok(CompiledQuery { sql, params })
    }
}

/// Complete `SELECT` statement with its bind parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}
