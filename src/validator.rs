//! Parameter validation
//!
//! Coerces raw request parameters against a module's declared specs.
//! Validation is total and side-effect free: the same definition and input
//! always produce the same map or the same error.
//!
//! Output order: declared keys in declaration order, then undeclared keys
//! in input order (they pass through untouched).

use serde_json::Value;

use crate::error::{AnalysisError, Result};
use crate::schema::{ModuleDefinition, ParameterKind, ParameterSpec, Parameters};

/// Validate `raw` against `definition.parameter_specs`
pub fn validate_parameters(definition: &ModuleDefinition, raw: &Parameters) -> Result<Parameters> {
    let mut validated = Parameters::new();

    for spec in &definition.parameter_specs {
        let value = match raw.get(&spec.key).filter(|v| !v.is_null()) {
            Some(value) => coerce(spec, value)?,
            None => match spec.default_value() {
                Some(default) => default.clone(),
                None if spec.required => {
                    return Err(AnalysisError::MissingParameter {
                        module_id: definition.module_id.clone(),
                        key: spec.key.clone(),
                    });
                }
                None => Value::Null,
            },
        };
        validated.insert(spec.key.clone(), value);
    }

    for (key, value) in raw {
        if !validated.contains_key(key) {
            validated.insert(key.clone(), value.clone());
        }
    }

    Ok(validated)
}

fn coerce(spec: &ParameterSpec, value: &Value) -> Result<Value> {
    match spec.kind {
        ParameterKind::Text => Ok(value.clone()),
        ParameterKind::Number => coerce_number(spec, value),
        ParameterKind::Choice => check_choice(spec, value),
        ParameterKind::Pattern => match value {
            Value::String(_) => Ok(value.clone()),
            other => Err(mismatch(spec, "a pattern string", other)),
        },
    }
}

fn coerce_number(spec: &ParameterSpec, value: &Value) -> Result<Value> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        // str::parse::<f64> is locale independent
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| mismatch(spec, "a number", value))
}

fn check_choice(spec: &ParameterSpec, value: &Value) -> Result<Value> {
    match spec.choices.as_deref() {
        Some(choices) if !choices.is_empty() && !choices.contains(value) => {
            Err(AnalysisError::InvalidChoice {
                key: spec.key.clone(),
                value: value.to_string(),
                choices: choices
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
        }
        _ => Ok(value.clone()),
    }
}

fn mismatch(spec: &ParameterSpec, expected: &'static str, actual: &Value) -> AnalysisError {
    AnalysisError::TypeMismatch {
        key: spec.key.clone(),
        expected,
        actual: actual.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Parameters {
        value.as_object().cloned().unwrap()
    }

    fn definition() -> ModuleDefinition {
        ModuleDefinition::new("demo", "Demo")
            .with_parameter(ParameterSpec::number("threshold", "Threshold"))
            .with_parameter(ParameterSpec::choice("mode", "Mode").with_choices(["a", "b"]))
            .with_parameter(ParameterSpec::pattern("filter", "Filter").optional())
            .with_parameter(ParameterSpec::text("label", "Label").optional().with_default("all"))
    }

    #[test]
    fn missing_required_without_default_fails() {
        let err = validate_parameters(&definition(), &params(json!({"mode": "a"}))).unwrap_err();
        assert_eq!(
            err,
            AnalysisError::MissingParameter {
                module_id: "demo".into(),
                key: "threshold".into()
            }
        );
    }

    #[test]
    fn null_value_counts_as_missing() {
        let err = validate_parameters(
            &definition(),
            &params(json!({"threshold": null, "mode": "a"})),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::MissingParameter { .. }));
    }

    #[test]
    fn required_with_default_uses_default() {
        let def = ModuleDefinition::new("d", "D")
            .with_parameter(ParameterSpec::number("n", "N").with_default(5.0));
        let out = validate_parameters(&def, &Parameters::new()).unwrap();
        assert_eq!(out["n"], json!(5.0));
    }

    #[test]
    fn optional_without_default_becomes_null() {
        let out = validate_parameters(
            &definition(),
            &params(json!({"threshold": 1, "mode": "a"})),
        )
        .unwrap();
        assert_eq!(out["filter"], Value::Null);
        assert_eq!(out["label"], json!("all"));
    }

    #[test]
    fn number_accepts_numeric_strings() {
        let out = validate_parameters(
            &definition(),
            &params(json!({"threshold": " 3.5 ", "mode": "a"})),
        )
        .unwrap();
        assert_eq!(out["threshold"], json!(3.5));
    }

    #[test]
    fn number_rejects_garbage_and_non_finite() {
        for bad in [json!("abc"), json!(""), json!("NaN"), json!("inf"), json!(true), json!([1])] {
            let err = validate_parameters(
                &definition(),
                &params(json!({"threshold": bad, "mode": "a"})),
            )
            .unwrap_err();
            assert!(
                matches!(err, AnalysisError::TypeMismatch { ref key, .. } if key == "threshold"),
                "unexpected {err:?}"
            );
        }
    }

    #[test]
    fn choice_outside_list_fails() {
        let err = validate_parameters(
            &definition(),
            &params(json!({"threshold": 1, "mode": "c"})),
        )
        .unwrap_err();
        match err {
            AnalysisError::InvalidChoice { key, value, choices } => {
                assert_eq!(key, "mode");
                assert_eq!(value, "\"c\"");
                assert_eq!(choices, "\"a\", \"b\"");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn choice_without_choices_accepts_anything() {
        let def = ModuleDefinition::new("d", "D").with_parameter(ParameterSpec::choice("m", "M"));
        let out = validate_parameters(&def, &params(json!({"m": 42}))).unwrap();
        assert_eq!(out["m"], json!(42));

        let def = ModuleDefinition::new("d", "D")
            .with_parameter(ParameterSpec::choice("m", "M").with_choices(Vec::<Value>::new()));
        assert!(validate_parameters(&def, &params(json!({"m": "z"}))).is_ok());
    }

    #[test]
    fn pattern_requires_string() {
        let err = validate_parameters(
            &definition(),
            &params(json!({"threshold": 1, "mode": "a", "filter": 3})),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::TypeMismatch { ref key, .. } if key == "filter"));
    }

    #[test]
    fn text_passes_through_unchanged() {
        let out = validate_parameters(
            &definition(),
            &params(json!({"threshold": 1, "mode": "a", "label": {"nested": true}})),
        )
        .unwrap();
        assert_eq!(out["label"], json!({"nested": true}));
    }

    #[test]
    fn undeclared_keys_pass_through_after_declared_ones() {
        let out = validate_parameters(
            &definition(),
            &params(json!({"extra_b": 2, "threshold": "1", "mode": "b", "extra_a": "x"})),
        )
        .unwrap();

        assert_eq!(out["extra_a"], json!("x"));
        assert_eq!(out["extra_b"], json!(2));
        let keys: Vec<_> = out.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            ["threshold", "mode", "filter", "label", "extra_b", "extra_a"]
        );
    }
}
