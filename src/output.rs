//! Output parsing: raw function result → typed output mapping
//!
//! Results are keyed `<nodeName>/<outputName>`. Parsing is all-or-nothing:
//! typed values are staged and only merged once every declared output
//! coerced. Keys already present (pass-through inputs) are never overwritten,
//! which also makes a second parse of the same payload a no-op.
//!
//! ## Payload shapes
//!
//! | Payload | Treated as |
//! |---------|------------|
//! | JSON object | one field per declared output |
//! | other JSON (number, array, ...) | the value of every declared output |
//! | non-JSON text | a string value of every declared output |
//! | empty / `null` | success only when nothing is declared |

use serde_json::{Map, Value};

use crate::ast::{DataOut, DataType};
use crate::error::{EnactError, Result};
use crate::node::{output_key, DataValues};

/// Prefix a plain-text error reply starts with
const ERROR_PREFIX: &str = "error:";
/// JSON key of an error reply
const ERROR_KEY: &str = "error";

/// Parse `raw` against the declared outputs of `node` into `outputs`.
///
/// On error nothing is written.
pub fn parse_outputs(
    node: &str,
    raw: Option<&str>,
    declared: &[DataOut],
    outputs: &mut DataValues,
) -> Result<()> {
    let raw = raw.map(str::trim).filter(|r| !r.is_empty() && *r != "null");
    let Some(raw) = raw else {
        if declared.is_empty() {
            return Ok(());
        }
        return Err(EnactError::EmptyResult {
            node: node.to_string(),
            expected: declared.len(),
        });
    };

    let payload = as_object(raw, declared);

    let mut staged = Vec::with_capacity(declared.len());
    for out in declared {
        let key = output_key(node, &out.name);
        if outputs.contains_key(&key) {
            continue;
        }

        let coerced = match payload.get(&out.name) {
            Some(Value::Null) => Some(Value::Null),
            Some(value) => coerce(out.data_type, value),
            None => None,
        };
        match coerced {
            Some(value) => staged.push((key, value)),
            None => {
                return Err(EnactError::OutputCoercion {
                    node: node.to_string(),
                    output: out.name.clone(),
                    expected: out.data_type.to_string(),
                })
            }
        }
    }
    outputs.extend(staged);

    match error_marker(Some(raw)) {
        Some(message) => Err(EnactError::FunctionReportedError {
            node: node.to_string(),
            message,
        }),
        None => Ok(()),
    }
}

/// The error a function reported in its payload, if any.
///
/// Recognises a leading `error:` and an `"error"` key (top level, or
/// anywhere in the text as `"error":`).
pub fn error_marker(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();

    let prefixed = raw
        .get(..ERROR_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(ERROR_PREFIX));
    if prefixed {
        return Some(raw[ERROR_PREFIX.len()..].trim().to_string());
    }

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
        if let Some(error) = map.get(ERROR_KEY) {
            return Some(match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
    }

    if raw.contains("\"error\":") {
        return Some(raw.to_string());
    }
    None
}

/// View the payload as an object keyed by output name
fn as_object(raw: &str, declared: &[DataOut]) -> Map<String, Value> {
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => return map,
        Ok(value) => value,
        Err(_) => Value::String(raw.to_string()),
    };
    declared
        .iter()
        .map(|out| (out.name.clone(), value.clone()))
        .collect()
}

/// Coerce a JSON value to a declared type; `None` if it does not fit
pub fn coerce(data_type: DataType, value: &Value) -> Option<Value> {
    match data_type {
        DataType::Number => match value {
            Value::Number(n) => n.as_f64().map(Value::from),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()).map(Value::from),
            _ => None,
        },
        DataType::String => match value {
            Value::String(s) => Some(Value::String(s.clone())),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        DataType::Bool => match value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(Value::Bool(false)),
            _ => None,
        },
        DataType::Collection => match value {
            Value::Array(_) => Some(value.clone()),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(array @ Value::Array(_)) => Some(array),
                _ => None,
            },
            _ => None,
        },
        DataType::Object => match value {
            Value::String(s) => Some(serde_json::from_str(s).unwrap_or_else(|_| value.clone())),
            _ => Some(value.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn outs(decl: &[(&str, DataType)]) -> Vec<DataOut> {
        decl.iter().map(|(n, t)| DataOut::new(*n, *t)).collect()
    }

    fn parse(raw: Option<&str>, decl: &[(&str, DataType)]) -> Result<DataValues> {
        let mut outputs = DataValues::new();
        parse_outputs("f", raw, &outs(decl), &mut outputs).map(|_| outputs)
    }

    #[test]
    fn typed_fields_from_object() {
        let outputs = parse(
            Some(r#"{"sum": 3, "label": "x", "ok": true, "items": [1,2], "meta": {"a": 1}}"#),
            &[
                ("sum", DataType::Number),
                ("label", DataType::String),
                ("ok", DataType::Bool),
                ("items", DataType::Collection),
                ("meta", DataType::Object),
            ],
        )
        .unwrap();

        assert_eq!(outputs["f/sum"], json!(3.0));
        assert_eq!(outputs["f/label"], json!("x"));
        assert_eq!(outputs["f/ok"], json!(true));
        assert_eq!(outputs["f/items"], json!([1, 2]));
        assert_eq!(outputs["f/meta"], json!({"a": 1}));
    }

    #[test]
    fn undeclared_fields_are_ignored() {
        let outputs = parse(Some(r#"{"a": 1, "b": 2}"#), &[("a", DataType::Number)]).unwrap();
        assert_eq!(outputs.len(), 1);
    }

    #[test]
    fn empty_result_without_outputs_is_success() {
        assert!(parse(None, &[]).unwrap().is_empty());
        assert!(parse(Some("null"), &[]).unwrap().is_empty());
        assert!(parse(Some("  "), &[]).unwrap().is_empty());
    }

    #[test]
    fn empty_result_with_outputs_fails() {
        let err = parse(Some("null"), &[("a", DataType::Number)]).unwrap_err();
        assert!(matches!(err, EnactError::EmptyResult { expected: 1, .. }));
    }

    #[test]
    fn explicit_null_is_stored_for_any_type() {
        let outputs = parse(Some(r#"{"a": null}"#), &[("a", DataType::Number)]).unwrap();
        assert_eq!(outputs["f/a"], Value::Null);
    }

    #[test]
    fn coercion_failure_writes_nothing() {
        let mut outputs = DataValues::new();
        let err = parse_outputs(
            "f",
            Some(r#"{"a": 1, "b": "not a number"}"#),
            &outs(&[("a", DataType::Number), ("b", DataType::Number)]),
            &mut outputs,
        )
        .unwrap_err();

        assert!(matches!(err, EnactError::OutputCoercion { ref output, .. } if output == "b"));
        assert!(outputs.is_empty());
    }

    #[test]
    fn missing_field_fails() {
        assert!(parse(Some(r#"{"a": 1}"#), &[("b", DataType::Object)]).is_err());
    }

    #[test]
    fn scalar_payload_wraps_into_declared_output() {
        let outputs = parse(Some("42"), &[("n", DataType::Number)]).unwrap();
        assert_eq!(outputs["f/n"], json!(42.0));

        let outputs = parse(Some("hello world"), &[("msg", DataType::String)]).unwrap();
        assert_eq!(outputs["f/msg"], json!("hello world"));

        let outputs = parse(Some("[1, 2, 3]"), &[("xs", DataType::Collection)]).unwrap();
        assert_eq!(outputs["f/xs"], json!([1, 2, 3]));
    }

    #[test]
    fn parse_is_idempotent_and_keeps_pass_through_keys() {
        let decl = outs(&[("a", DataType::Number)]);
        let mut outputs = DataValues::new();
        outputs.insert("f/a".into(), json!("passed through"));

        parse_outputs("f", Some(r#"{"a": 1}"#), &decl, &mut outputs).unwrap();
        let first = outputs.clone();
        parse_outputs("f", Some(r#"{"a": 1}"#), &decl, &mut outputs).unwrap();

        assert_eq!(outputs, first);
        assert_eq!(outputs["f/a"], json!("passed through"));
    }

    #[test]
    fn error_markers_fail_even_when_fields_parse() {
        let err = parse(
            Some(r#"{"a": 1, "error": "quota exceeded"}"#),
            &[("a", DataType::Number)],
        )
        .unwrap_err();
        assert!(matches!(err, EnactError::FunctionReportedError { ref message, .. } if message == "quota exceeded"));

        assert_eq!(error_marker(Some("Error: boom")).as_deref(), Some("boom"));
        assert!(error_marker(Some(r#"{"details": {"error": 1}}"#)).is_some());
        assert!(error_marker(Some(r#"{"errors": []}"#)).is_none());
        assert!(error_marker(None).is_none());
    }

    #[test]
    fn string_forms_of_numbers_and_bools() {
        assert_eq!(coerce(DataType::Number, &json!("2.5")), Some(json!(2.5)));
        assert_eq!(coerce(DataType::Bool, &json!("TRUE")), Some(json!(true)));
        assert_eq!(coerce(DataType::Bool, &json!(1)), None);
        assert_eq!(coerce(DataType::String, &json!(7)), Some(json!("7")));
        assert_eq!(coerce(DataType::String, &json!([7])), None);
        assert_eq!(coerce(DataType::Collection, &json!("[1]")), Some(json!([1])));
    }
}
