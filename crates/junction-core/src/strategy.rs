//! Result aggregation strategies.
//!
//! A [`ResultStrategy`] folds the values handlers returned during one
//! dispatch into a single value. Every strategy is a total function over a
//! list of possibly-null values; `null` entries mean "no opinion" and are
//! skipped.
//!
//! - [`First`] - the first non-null value
//! - [`Merge`] - all non-null values as an array
//! - [`Reduce`] - a left fold with a combiner and a seed

use std::fmt;
use std::sync::Arc;

use serde_json::{Number, Value};

/// Folds handler results into one value.
pub trait ResultStrategy: Send + Sync {
    /// Aggregates `results` in dispatch order.
    fn aggregate(&self, results: &[Value]) -> Value;

    /// Whether the dispatcher may stop invoking handlers after `result`.
    fn should_stop(&self, _result: &Value) -> bool {
        false
    }
}

// ============================================================================
// First
// ============================================================================

/// Takes the first non-null result.
///
/// The only built-in strategy that short-circuits: it asks the dispatcher to
/// stop as soon as it has seen a non-null value.
#[derive(Debug, Clone, Copy, Default)]
pub struct First;

impl ResultStrategy for First {
    fn aggregate(&self, results: &[Value]) -> Value {
        results
            .iter()
            .find(|value| !value.is_null())
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn should_stop(&self, result: &Value) -> bool {
        !result.is_null()
    }
}

// ============================================================================
// Merge
// ============================================================================

/// Collects non-null results into an array.
#[derive(Debug, Clone, Copy, Default)]
pub struct Merge {
    flatten: bool,
}

impl Merge {
    /// Keeps each result as one element.
    pub fn new() -> Self {
        Self::default()
    }

    /// Splices array results into the output, one level deep.
    pub fn flatten() -> Self {
        Self { flatten: true }
    }

    /// Whether array results are spliced.
    pub fn is_flattening(&self) -> bool {
        self.flatten
    }
}

impl ResultStrategy for Merge {
    fn aggregate(&self, results: &[Value]) -> Value {
        let mut merged = Vec::with_capacity(results.len());
        for value in results.iter().filter(|value| !value.is_null()) {
            match value {
                Value::Array(items) if self.flatten => merged.extend(items.iter().cloned()),
                other => merged.push(other.clone()),
            }
        }
        Value::Array(merged)
    }
}

// ============================================================================
// Reduce
// ============================================================================

type Combiner = Arc<dyn Fn(Value, &Value) -> Value + Send + Sync>;

/// A left fold over non-null results.
///
/// # Example
///
/// ```rust,ignore
/// let total = dispatcher.dispatch_aggregate(&mut quote, &Reduce::sum())?;
///
/// let longest = Reduce::new(Value::Null, |acc, value| {
///     // keep whichever string is longer
/// });
/// ```
#[derive(Clone)]
pub struct Reduce {
    name: &'static str,
    seed: Value,
    combiner: Combiner,
}

impl Reduce {
    /// A fold with a caller-supplied combiner and seed.
    pub fn new<F>(seed: Value, combiner: F) -> Self
    where
        F: Fn(Value, &Value) -> Value + Send + Sync + 'static,
    {
        Self::preset("custom", seed, combiner)
    }

    fn preset<F>(name: &'static str, seed: Value, combiner: F) -> Self
    where
        F: Fn(Value, &Value) -> Value + Send + Sync + 'static,
    {
        Self {
            name,
            seed,
            combiner: Arc::new(combiner),
        }
    }

    /// Numeric sum. Non-numeric results are ignored.
    pub fn sum() -> Self {
        Self::preset("sum", Value::from(0), |acc, value| {
            if !value.is_number() {
                return acc;
            }
            add_numbers(&acc, value)
        })
    }

    /// String concatenation. Non-string results are appended as JSON text.
    pub fn concat() -> Self {
        Self::preset("concat", Value::String(String::new()), |acc, value| {
            let mut text = match acc {
                Value::String(text) => text,
                other => other.to_string(),
            };
            match value {
                Value::String(more) => text.push_str(more),
                other => text.push_str(&other.to_string()),
            }
            Value::String(text)
        })
    }

    /// Logical AND over the truthiness of every result.
    pub fn all() -> Self {
        Self::preset("all", Value::Bool(true), |acc, value| {
            Value::Bool(truthy(&acc) && truthy(value))
        })
    }

    /// Logical OR over the truthiness of every result.
    pub fn any() -> Self {
        Self::preset("any", Value::Bool(false), |acc, value| {
            Value::Bool(truthy(&acc) || truthy(value))
        })
    }

    /// Number of non-null results.
    pub fn count() -> Self {
        Self::preset("count", Value::from(0u64), |acc, _| {
            Value::from(acc.as_u64().unwrap_or_default() + 1)
        })
    }

    /// Smallest numeric result, or null.
    pub fn min() -> Self {
        Self::preset("min", Value::Null, |acc, value| {
            pick(acc, value, |candidate, current| candidate < current)
        })
    }

    /// Largest numeric result, or null.
    pub fn max() -> Self {
        Self::preset("max", Value::Null, |acc, value| {
            pick(acc, value, |candidate, current| candidate > current)
        })
    }

    /// The preset's name, or `"custom"`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The fold's seed.
    pub fn seed(&self) -> &Value {
        &self.seed
    }
}

impl ResultStrategy for Reduce {
    fn aggregate(&self, results: &[Value]) -> Value {
        results
            .iter()
            .filter(|value| !value.is_null())
            .fold(self.seed.clone(), |acc, value| (self.combiner)(acc, value))
    }
}

impl fmt::Debug for Reduce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reduce")
            .field("name", &self.name)
            .field("seed", &self.seed)
            .finish()
    }
}

fn add_numbers(acc: &Value, value: &Value) -> Value {
    if let (Some(a), Some(b)) = (acc.as_i64(), value.as_i64())
        && let Some(sum) = a.checked_add(b)
    {
        return Value::from(sum);
    }
    let sum = acc.as_f64().unwrap_or_default() + value.as_f64().unwrap_or_default();
    Number::from_f64(sum).map(Value::Number).unwrap_or(Value::Null)
}

fn pick(acc: Value, value: &Value, replaces: fn(f64, f64) -> bool) -> Value {
    let Some(candidate) = value.as_f64() else {
        return acc;
    };
    match acc.as_f64() {
        Some(current) if !replaces(candidate, current) => acc,
        _ => value.clone(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
