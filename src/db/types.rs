//! Driver rows to JSON.
//!
//! Decoding happens in two steps: [`categorize_type`] maps a column's type
//! name to a [`TypeCategory`], then a per-database decoder extracts the
//! value with the Rust types that driver accepts for that category.
//!
//! Raw results skip column metadata and keep binary columns base64 encoded.
//! Processed results carry column metadata and turn binary columns holding
//! valid UTF-8 into plain strings.

use crate::models::{ColumnMetadata, DatabaseType, QueryResult};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Value as JsonValue};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Temporal,
    Binary,
    Json,
    Text,
}

pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Before floats: "numeric" would otherwise be ambiguous
    if lower.contains("decimal") || lower.contains("numeric") {
        return match db {
            DatabaseType::SQLite => TypeCategory::Float,
            _ => TypeCategory::Decimal,
        };
    }
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }
    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }
    // SQLite keeps dates as text or numbers
    if db != DatabaseType::SQLite
        && (lower.contains("timestamp")
            || lower.contains("datetime")
            || lower == "date"
            || lower.starts_with("time"))
    {
        return TypeCategory::Temporal;
    }
    TypeCategory::Text
}

/// DECIMAL/NUMERIC kept as the exact string the server sent.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        categorize_type(ty.name(), DatabaseType::MySQL) == TypeCategory::Decimal
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        categorize_type(ty.name(), DatabaseType::PostgreSQL) == TypeCategory::Decimal
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Binary column value as JSON.
///
/// With `decode_utf8`, bytes that form valid UTF-8 come back as text;
/// everything else is base64.
pub fn binary_to_json(bytes: &[u8], decode_utf8: bool) -> JsonValue {
    match std::str::from_utf8(bytes) {
        Ok(s) if decode_utf8 => JsonValue::String(s.to_string()),
        _ => JsonValue::String(STANDARD.encode(bytes)),
    }
}

pub trait RowToJson {
    fn to_json_map(&self, decode_binary: bool) -> Map<String, JsonValue>;
    fn column_metadata(&self) -> Vec<ColumnMetadata>;
}

/// Build a [`QueryResult`] from fetched rows.
pub fn rows_to_result<R: RowToJson>(rows: &[R], raw: bool, start: Instant) -> QueryResult {
    let columns = if raw {
        Vec::new()
    } else {
        rows.first().map(RowToJson::column_metadata).unwrap_or_default()
    };
    let json_rows = rows.iter().map(|row| row.to_json_map(!raw)).collect();
    QueryResult::with_rows(columns, json_rows, start.elapsed().as_millis() as u64)
}

macro_rules! impl_row_to_json {
    ($row:ty, $db:expr, $decode:path) => {
        impl RowToJson for $row {
            fn to_json_map(&self, decode_binary: bool) -> Map<String, JsonValue> {
                self.columns()
                    .iter()
                    .map(|col| {
                        let category = categorize_type(col.type_info().name(), $db);
                        let value = if is_null(self, col.ordinal()) {
                            JsonValue::Null
                        } else {
                            $decode(self, col.ordinal(), category, decode_binary)
                        };
                        (col.name().to_string(), value)
                    })
                    .collect()
            }

            fn column_metadata(&self) -> Vec<ColumnMetadata> {
                self.columns()
                    .iter()
                    .map(|col| ColumnMetadata::new(col.name(), col.type_info().name()))
                    .collect()
            }
        }
    };
}

impl_row_to_json!(MySqlRow, DatabaseType::MySQL, mysql::decode_column);
impl_row_to_json!(PgRow, DatabaseType::PostgreSQL, postgres::decode_column);
impl_row_to_json!(SqliteRow, DatabaseType::SQLite, sqlite::decode_column);

fn is_null<R>(row: &R, idx: usize) -> bool
where
    R: Row,
    usize: ColumnIndex<R>,
{
    row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true)
}

fn get<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

fn float_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn text_json(v: String, json_hint: bool) -> JsonValue {
    if json_hint {
        if let Ok(json) = serde_json::from_str::<JsonValue>(&v) {
            return json;
        }
    }
    JsonValue::String(v)
}

mod mysql {
    use super::*;

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        category: TypeCategory,
        decode_binary: bool,
    ) -> JsonValue {
        let value = match category {
            TypeCategory::Integer => get::<_, i64>(row, idx)
                .map(JsonValue::from)
                .or_else(|| get::<_, u64>(row, idx).map(JsonValue::from)),
            TypeCategory::Float => get::<_, f64>(row, idx)
                .or_else(|| get::<_, f32>(row, idx).map(f64::from))
                .map(float_json),
            TypeCategory::Decimal => get::<_, RawDecimal>(row, idx).map(|d| JsonValue::String(d.0)),
            TypeCategory::Boolean => get::<_, bool>(row, idx).map(JsonValue::Bool),
            TypeCategory::Temporal => decode_temporal(row, idx),
            TypeCategory::Binary => {
                get::<_, Vec<u8>>(row, idx).map(|v| binary_to_json(&v, decode_binary))
            }
            TypeCategory::Json => get::<_, JsonValue>(row, idx),
            TypeCategory::Text => get::<_, String>(row, idx)
                .map(JsonValue::String)
                // Binary collations surface text columns as bytes
                .or_else(|| get::<_, Vec<u8>>(row, idx).map(|v| binary_to_json(&v, true))),
        };
        value.unwrap_or_else(|| undecodable(row, idx))
    }

    fn decode_temporal(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
        get::<_, NaiveDateTime>(row, idx)
            .map(|v| v.to_string())
            .or_else(|| get::<_, DateTime<Utc>>(row, idx).map(|v| v.to_rfc3339()))
            .or_else(|| get::<_, NaiveDate>(row, idx).map(|v| v.to_string()))
            .or_else(|| get::<_, NaiveTime>(row, idx).map(|v| v.to_string()))
            .map(JsonValue::String)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        category: TypeCategory,
        decode_binary: bool,
    ) -> JsonValue {
        let value = match category {
            TypeCategory::Integer => get::<_, i64>(row, idx)
                .or_else(|| get::<_, i32>(row, idx).map(i64::from))
                .or_else(|| get::<_, i16>(row, idx).map(i64::from))
                .map(JsonValue::from),
            TypeCategory::Float => get::<_, f64>(row, idx)
                .or_else(|| get::<_, f32>(row, idx).map(f64::from))
                .map(float_json),
            TypeCategory::Decimal => get::<_, RawDecimal>(row, idx).map(|d| JsonValue::String(d.0)),
            TypeCategory::Boolean => get::<_, bool>(row, idx).map(JsonValue::Bool),
            TypeCategory::Temporal => decode_temporal(row, idx),
            TypeCategory::Binary => {
                get::<_, Vec<u8>>(row, idx).map(|v| binary_to_json(&v, decode_binary))
            }
            TypeCategory::Json => get::<_, JsonValue>(row, idx),
            TypeCategory::Text => get::<_, String>(row, idx).map(JsonValue::String),
        };
        value.unwrap_or_else(|| undecodable(row, idx))
    }

    fn decode_temporal(row: &PgRow, idx: usize) -> Option<JsonValue> {
        get::<_, DateTime<Utc>>(row, idx)
            .map(|v| v.to_rfc3339())
            .or_else(|| get::<_, NaiveDateTime>(row, idx).map(|v| v.to_string()))
            .or_else(|| get::<_, NaiveDate>(row, idx).map(|v| v.to_string()))
            .or_else(|| get::<_, NaiveTime>(row, idx).map(|v| v.to_string()))
            .map(JsonValue::String)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        category: TypeCategory,
        decode_binary: bool,
    ) -> JsonValue {
        let value = match category {
            TypeCategory::Integer => get::<_, i64>(row, idx).map(JsonValue::from),
            TypeCategory::Float | TypeCategory::Decimal => {
                get::<_, f64>(row, idx).map(float_json)
            }
            TypeCategory::Boolean => get::<_, bool>(row, idx).map(JsonValue::Bool),
            TypeCategory::Binary => {
                get::<_, Vec<u8>>(row, idx).map(|v| binary_to_json(&v, decode_binary))
            }
            TypeCategory::Json => get::<_, String>(row, idx).map(|v| text_json(v, true)),
            TypeCategory::Temporal | TypeCategory::Text => None,
        };
        // Declared types are advisory in SQLite; fall back on the stored value
        value
            .or_else(|| get::<_, String>(row, idx).map(JsonValue::String))
            .or_else(|| get::<_, i64>(row, idx).map(JsonValue::from))
            .or_else(|| get::<_, f64>(row, idx).map(float_json))
            .or_else(|| get::<_, Vec<u8>>(row, idx).map(|v| binary_to_json(&v, decode_binary)))
            .unwrap_or_else(|| undecodable(row, idx))
    }
}

fn undecodable<R>(row: &R, idx: usize) -> JsonValue
where
    R: Row,
{
    if let Some(col) = row.columns().get(idx) {
        tracing::warn!(
            column = %col.name(),
            type_name = %col.type_info().name(),
            "Could not decode column value"
        );
    }
    JsonValue::Null
}
