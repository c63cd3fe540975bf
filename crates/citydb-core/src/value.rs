use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Data type of an attribute or of a resolved filter operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Integer,
    Double,
    Boolean,
    Date,
    Timestamp,
    Uri,
    Measure,
    Code,
    Geometry,
    Envelope,
}

/// Groups of data types that may be compared with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Text,
    Numeric,
    Boolean,
    Temporal,
    Spatial,
}

impl DataType {
    /// Returns the canonical lowercase string stored in the `datatype` column.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::Uri => "uri",
            Self::Measure => "measure",
            Self::Code => "code",
            Self::Geometry => "geometry",
            Self::Envelope => "envelope",
        }
    }

    #[must_use]
    pub const fn family(&self) -> TypeFamily {
        match self {
            Self::String | Self::Uri | Self::Code => TypeFamily::Text,
            Self::Integer | Self::Double | Self::Measure => TypeFamily::Numeric,
            Self::Boolean => TypeFamily::Boolean,
            Self::Date | Self::Timestamp => TypeFamily::Temporal,
            Self::Geometry | Self::Envelope => TypeFamily::Spatial,
        }
    }

    /// Column of the `property` table holding values of this type.
    #[must_use]
    pub const fn value_column(&self) -> &'static str {
        match self {
            Self::String | Self::Code => "val_string",
            Self::Integer | Self::Boolean => "val_int",
            Self::Double | Self::Measure => "val_double",
            Self::Date | Self::Timestamp => "val_timestamp",
            Self::Uri => "val_uri",
            Self::Geometry | Self::Envelope => "val_geometry_id",
        }
    }
}

impl FromStr for DataType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "integer" => Ok(Self::Integer),
            "double" => Ok(Self::Double),
            "boolean" => Ok(Self::Boolean),
            "date" => Ok(Self::Date),
            "timestamp" => Ok(Self::Timestamp),
            "uri" => Ok(Self::Uri),
            "measure" => Ok(Self::Measure),
            "code" => Ok(Self::Code),
            "geometry" => Ok(Self::Geometry),
            "envelope" => Ok(Self::Envelope),
            _ => Err(()),
        }
    }
}

/// Typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Uri(String),
    Measure { value: f64, uom: String },
    Code { value: String, code_space: Option<String> },
}

impl Value {
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::String(_) => DataType::String,
            Self::Integer(_) => DataType::Integer,
            Self::Double(_) => DataType::Double,
            Self::Boolean(_) => DataType::Boolean,
            Self::Date(_) => DataType::Date,
            Self::Timestamp(_) => DataType::Timestamp,
            Self::Uri(_) => DataType::Uri,
            Self::Measure { .. } => DataType::Measure,
            Self::Code { .. } => DataType::Code,
        }
    }

    /// Shorthand for a code value without code space.
    #[must_use]
    pub fn code(value: impl Into<String>) -> Self {
        Self::Code {
            value: value.into(),
            code_space: None,
        }
    }

    /// Shorthand for a measure.
    #[must_use]
    pub fn measure(value: f64, uom: impl Into<String>) -> Self {
        Self::Measure {
            value,
            uom: uom.into(),
        }
    }
}

/// Text form of a timestamp as stored in the database.
///
/// Fixed millisecond precision and a `Z` suffix keep the text ordering
/// chronological, so stored timestamps compare correctly as strings.
#[must_use]
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses the text produced by [`format_timestamp`] (or any RFC 3339 string).
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|parsed| parsed.with_timezone(&Utc))
}

/// Midnight UTC of the given date.
#[must_use]
pub fn date_timestamp(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
