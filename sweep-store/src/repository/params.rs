//! Parameter Repository
//!
//! Each parameter is one row holding its value as text plus a data-type tag
//! (`int`, `float`, `bool`, `str`, `list`, `map`). Lists and maps are stored
//! as JSON.

use rust_decimal::Decimal;
use sqlx::PgConnection;
use std::collections::HashMap;
use std::str::FromStr;
use sweep_core::{ParamValue, Parameters, RunId, StoreError};

/// Insert all parameters of one run
pub async fn insert(
    conn: &mut PgConnection,
    run_id: RunId,
    params: &Parameters,
) -> Result<(), sqlx::Error> {
    for (name, value) in params.iter() {
        let (text, data_type) = encode(value);
        sqlx::query(
            r#"
            INSERT INTO run_params (run_id, param_name, param_value, data_type)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(run_id)
        .bind(name)
        .bind(text)
        .bind(data_type)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Load the parameters of the given runs, keyed by run id
///
/// Runs without parameters are absent from the map.
pub async fn find_by_run_ids(
    conn: &mut PgConnection,
    run_ids: &[RunId],
) -> Result<HashMap<RunId, Parameters>, StoreError> {
    let rows = sqlx::query_as::<_, ParamRow>(
        r#"
        SELECT run_id, param_name, param_value, data_type
        FROM run_params
        WHERE run_id = ANY($1)
        ORDER BY run_id, param_name
        "#,
    )
    .bind(run_ids)
    .fetch_all(conn)
    .await
    .map_err(StoreError::backend)?;

    let mut grouped: HashMap<RunId, Vec<(String, ParamValue)>> = HashMap::new();
    for row in rows {
        let value = decode(&row.param_value, &row.data_type).map_err(|message| {
            StoreError::corrupt(
                row.run_id,
                format!("parameter '{}': {}", row.param_name, message),
            )
        })?;
        grouped
            .entry(row.run_id)
            .or_default()
            .push((row.param_name, value));
    }

    Ok(grouped
        .into_iter()
        .map(|(id, values)| (id, Parameters::from_iter(values)))
        .collect())
}

// =============================================================================
// Value Codec
// =============================================================================

/// Text representation and data-type tag of a value
pub fn encode(value: &ParamValue) -> (String, &'static str) {
    match value {
        ParamValue::Int(i) => (i.to_string(), "int"),
        ParamValue::Float(d) => (d.to_string(), "float"),
        ParamValue::Bool(b) => (b.to_string(), "bool"),
        ParamValue::Str(s) => (s.clone(), "str"),
        ParamValue::List(_) => (value.to_json().to_string(), "list"),
        ParamValue::Map(_) => (value.to_json().to_string(), "map"),
    }
}

/// Inverse of [`encode`]
pub fn decode(text: &str, data_type: &str) -> Result<ParamValue, String> {
    match data_type {
        "int" => text
            .parse::<i64>()
            .map(ParamValue::Int)
            .map_err(|e| format!("invalid int '{}': {}", text, e)),
        "float" => Decimal::from_str(text)
            .or_else(|_| Decimal::from_scientific(text))
            .map(ParamValue::Float)
            .map_err(|e| format!("invalid float '{}': {}", text, e)),
        "bool" => text
            .parse::<bool>()
            .map(ParamValue::Bool)
            .map_err(|e| format!("invalid bool '{}': {}", text, e)),
        "str" => Ok(ParamValue::Str(text.to_string())),
        "list" | "map" => {
            let json: serde_json::Value =
                serde_json::from_str(text).map_err(|e| format!("invalid JSON: {}", e))?;
            match (data_type, ParamValue::from_json(&json)) {
                ("list", Some(value @ ParamValue::List(_)))
                | ("map", Some(value @ ParamValue::Map(_))) => Ok(value),
                _ => Err(format!("'{}' is not a valid {}", text, data_type)),
            }
        }
        other => Err(format!("unknown data type '{}'", other)),
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ParamRow {
    run_id: RunId,
    param_name: String,
    param_value: String,
    data_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_scalar_tags() {
        assert_eq!(encode(&ParamValue::Int(-3)), ("-3".to_string(), "int"));
        assert_eq!(
            encode(&ParamValue::Float(Decimal::new(15, 1))),
            ("1.5".to_string(), "float")
        );
        assert_eq!(encode(&ParamValue::Bool(true)), ("true".to_string(), "bool"));
        assert_eq!(encode(&ParamValue::from("a b")), ("a b".to_string(), "str"));
    }

    #[test]
    fn test_list_stored_as_json() {
        let value = ParamValue::List(vec![ParamValue::Int(1), ParamValue::from("two")]);

        let (text, tag) = encode(&value);

        assert_eq!(text, r#"[1,"two"]"#);
        assert_eq!(tag, "list");
        assert_eq!(decode(&text, tag), Ok(value));
    }

    #[test]
    fn test_decode_map() {
        let value = decode(r#"{"k": 1.5}"#, "map").unwrap();
        assert_eq!(
            value,
            ParamValue::Map(BTreeMap::from([(
                "k".to_string(),
                ParamValue::Float(Decimal::new(15, 1))
            )]))
        );
    }

    #[test]
    fn test_decode_scientific_float() {
        assert_eq!(
            decode("1e-3", "float"),
            Ok(ParamValue::Float(Decimal::new(1, 3)))
        );
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(decode("abc", "int").is_err());
        assert!(decode("1", "complex").is_err());
        assert!(decode("{\"a\": 1}", "list").is_err());
    }
}
