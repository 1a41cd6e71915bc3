//! Named scalar parameters shared between evaluators.
use eyre::eyre;
use log::debug;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

/// A registry of named scalar parameters.
///
/// A library is owned by the problem setup and passed to every field manager built from it, so
/// evaluators sharing a parameter (e.g. a homotopy parameter) observe the same value.
#[derive(Debug, Default)]
pub struct ParameterLibrary {
    values: RwLock<BTreeMap<String, f64>>,
}

impl ParameterLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter unless it already exists, and returns its current value.
    pub fn add(&self, name: &str, value: f64) -> f64 {
        *self.values.write().entry(name.to_string()).or_insert(value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.read().contains_key(name)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.read().get(name).copied()
    }

    pub fn set_value(&self, name: &str, value: f64) -> eyre::Result<()> {
        let mut values = self.values.write();
        let entry = values
            .get_mut(name)
            .ok_or_else(|| eyre!("Unknown parameter '{}'", name))?;
        *entry = value;
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

fn entry<'a>(list: &'a Value, key: &str) -> Option<&'a Value> {
    list.as_object().and_then(|obj| obj.get(key))
}

fn as_usize(value: Option<&Value>) -> Option<usize> {
    value.and_then(Value::as_u64).map(|v| v as usize)
}

fn nominal_if_named(entry: &Value, name: &str) -> Option<f64> {
    let nominal = entry.get("Nominal Value")?.as_f64()?;
    (entry.get("Name")?.as_str()? == name).then(|| nominal)
}

/// Scans a parameter list for the nominal value of a named scalar parameter.
///
/// Two list formats are recognized. The structured format has `"Number Of Parameters"` and
/// entries `"Parameter i"` with a `"Type"` (`"Scalar"` by default, `"Vector"` or
/// `"Distributed"`). Scalar entries carry `"Name"` and `"Nominal Value"`, vector entries carry
/// `"Dimension"` and sub-entries `"Scalar j"`. Scanning stops at the first distributed entry.
/// The flat format has `"Number"`, names `"Parameter j"` and an array `"Nominal Values"`.
pub fn find_nominal_value(list: &Value, name: &str) -> Option<f64> {
    if let Some(n) = as_usize(entry(list, "Number Of Parameters")) {
        for i in 0..n {
            let parameter = match entry(list, &format!("Parameter {}", i)) {
                Some(p) => p,
                None => continue,
            };
            let parameter_type = parameter.get("Type").and_then(Value::as_str).unwrap_or("Scalar");
            match parameter_type {
                "Distributed" => break,
                "Scalar" => {
                    if let Some(value) = nominal_if_named(parameter, name) {
                        return Some(value);
                    }
                }
                _ => {
                    let m = as_usize(parameter.get("Dimension")).unwrap_or(0);
                    for j in 0..m {
                        if let Some(value) = parameter
                            .get(format!("Scalar {}", j))
                            .and_then(|scalar| nominal_if_named(scalar, name))
                        {
                            return Some(value);
                        }
                    }
                }
            }
        }
    } else if let Some(m) = as_usize(entry(list, "Number")) {
        let nominal_values = entry(list, "Nominal Values").and_then(Value::as_array)?;
        for j in 0..m {
            let listed = entry(list, &format!("Parameter {}", j)).and_then(Value::as_str);
            if listed == Some(name) {
                return nominal_values.get(j).and_then(Value::as_f64);
            }
        }
    }
    None
}

/// The nominal value of a parameter from an optional parameter list, or `default`.
pub fn nominal_value_or(list: Option<&Value>, name: &str, default: f64) -> f64 {
    match list.and_then(|list| find_nominal_value(list, name)) {
        Some(value) => value,
        None => {
            debug!("No nominal value for parameter '{}', using {}", name, default);
            default
        }
    }
}
