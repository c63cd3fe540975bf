//! Mapping between model values and the columns of the `property` table.

use citydb_core::{
    date_timestamp, format_timestamp, parse_timestamp, DataType, ModelError, ModelResult, Value,
};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// `val_relation_type` of a contained child feature.
pub(crate) const RELATION_CONTAINS: i64 = 1;
/// `val_relation_type` of a reference to another feature.
pub(crate) const RELATION_REFERENCES: i64 = 0;

/// `datatype` of property rows that do not hold attribute values.
pub(crate) const KIND_GEOMETRY: &str = "geometry";
pub(crate) const KIND_IMPLICIT_GEOMETRY: &str = "implicit_geometry";
pub(crate) const KIND_APPEARANCE: &str = "appearance";
pub(crate) const KIND_FEATURE: &str = "feature";

/// Attribute value spread over the typed `val_*` columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ValueColumns {
    pub string: Option<String>,
    pub int: Option<i64>,
    pub double: Option<f64>,
    pub timestamp: Option<String>,
    pub uri: Option<String>,
    pub uom: Option<String>,
    pub code_space: Option<String>,
}

impl ValueColumns {
    pub(crate) fn encode(value: &Value) -> Self {
        let mut columns = Self::default();
        match value {
            Value::String(text) => columns.string = Some(text.clone()),
            Value::Integer(number) => columns.int = Some(*number),
            Value::Double(number) => columns.double = Some(*number),
            Value::Boolean(flag) => columns.int = Some(i64::from(*flag)),
            Value::Date(date) => columns.timestamp = Some(format_timestamp(&date_timestamp(*date))),
            Value::Timestamp(timestamp) => columns.timestamp = Some(format_timestamp(timestamp)),
            Value::Uri(uri) => columns.uri = Some(uri.clone()),
            Value::Measure { value, uom } => {
                columns.double = Some(*value);
                columns.uom = Some(uom.clone());
            }
            Value::Code { value, code_space } => {
                columns.string = Some(value.clone());
                columns.code_space = code_space.clone();
            }
        }
        columns
    }

    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            string: row.try_get("val_string")?,
            int: row.try_get("val_int")?,
            double: row.try_get("val_double")?,
            timestamp: row.try_get("val_timestamp")?,
            uri: row.try_get("val_uri")?,
            uom: row.try_get("val_uom")?,
            code_space: row.try_get("val_codespace")?,
        })
    }

    pub(crate) fn decode(&self, data_type: DataType) -> ModelResult<Value> {
        let missing = || ModelError::Corrupt(format!("{} value is missing", data_type.as_str()));
        let value = match data_type {
            DataType::String => Value::String(self.string.clone().ok_or_else(missing)?),
            DataType::Integer => Value::Integer(self.int.ok_or_else(missing)?),
            DataType::Double => Value::Double(self.double.ok_or_else(missing)?),
            DataType::Boolean => Value::Boolean(self.int.ok_or_else(missing)? != 0),
            DataType::Date => Value::Date(self.parse_timestamp()?.date_naive()),
            DataType::Timestamp => Value::Timestamp(self.parse_timestamp()?),
            DataType::Uri => Value::Uri(self.uri.clone().ok_or_else(missing)?),
            DataType::Measure => Value::Measure {
                value: self.double.ok_or_else(missing)?,
                uom: self.uom.clone().ok_or_else(missing)?,
            },
            DataType::Code => Value::Code {
                value: self.string.clone().ok_or_else(missing)?,
                code_space: self.code_space.clone(),
            },
            DataType::Geometry | DataType::Envelope => {
                return Err(ModelError::Corrupt(format!(
                    "{} is not an attribute type",
                    data_type.as_str()
                )))
            }
        };
        Ok(value)
    }

    fn parse_timestamp(&self) -> ModelResult<chrono::DateTime<chrono::Utc>> {
        let text = self
            .timestamp
            .as_deref()
            .ok_or_else(|| ModelError::Corrupt("timestamp value is missing".to_string()))?;
        parse_timestamp(text)
            .map_err(|err| ModelError::Corrupt(format!("invalid timestamp `{text}`: {err}")))
    }
}

/// Placement of an implicit geometry, stored as JSON in `val_placement`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Placement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_point: Option<[f64; 3]>,
}

impl Placement {
    pub(crate) fn transformation_matrix(&self) -> ModelResult<Option<[f64; 16]>> {
        self.transformation
            .as_deref()
            .map(|values| {
                <[f64; 16]>::try_from(values).map_err(|_| {
                    ModelError::Corrupt(format!(
                        "transformation matrix has {} values, expected 16",
                        values.len()
                    ))
                })
            })
            .transpose()
    }
}
