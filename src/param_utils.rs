use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Named numeric strategy parameters.
///
/// Keys are kept sorted, so two sets built in different insertion orders compare,
/// hash and print identically. Values compare by their total order, which makes the
/// type usable as a map key for search results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    values: BTreeMap<String, f64>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<S: Into<String>>(mut self, name: S, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert<S: Into<String>>(&mut self, name: S, value: f64) -> Option<f64> {
        self.values.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl PartialEq for ParameterSet {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ParameterSet {}

impl PartialOrd for ParameterSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParameterSet {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut left = self.values.iter();
        let mut right = other.values.iter();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some((lk, lv)), Some((rk, rv))) => {
                    let ordering = lk.cmp(rk).then_with(|| lv.total_cmp(rv));
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
            }
        }
    }
}

impl Hash for ParameterSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.values.len().hash(state);
        for (name, value) in &self.values {
            name.hash(state);
            value.to_bits().hash(state);
        }
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .values
            .iter()
            .map(|(k, v)| format!("{}: {}", k, format_param_value(*v)))
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, "[{}]", rendered)
    }
}

fn format_param_value(value: f64) -> String {
    let formatted_value = format!("{:.4}", value);
    let trimmed_value = formatted_value.trim_end_matches('0').trim_end_matches('.');
    if trimmed_value.is_empty() || trimmed_value == "-0" {
        "0".to_string()
    } else {
        trimmed_value.to_string()
    }
}

/// Candidate values per parameter, in the order the caller supplied them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterGrid {
    axes: Vec<(String, Vec<f64>)>,
}

impl ParameterGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<S: Into<String>>(mut self, name: S, values: Vec<f64>) -> Self {
        self.axes.push((name.into(), values));
        self
    }

    pub fn axes(&self) -> &[(String, Vec<f64>)] {
        &self.axes
    }

    /// Size of the Cartesian product.
    pub fn combination_count(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.axes.iter().map(|(_, values)| values.len()).product()
    }

    pub fn validate(&self) -> Result<()> {
        if self.axes.is_empty() {
            return Err(Error::configuration(
                "parameter grid must name at least one parameter",
            ));
        }
        let mut seen = HashSet::new();
        for (name, values) in &self.axes {
            if !seen.insert(name.as_str()) {
                return Err(Error::configuration(format!(
                    "parameter grid lists {} more than once",
                    name
                )));
            }
            if values.is_empty() {
                return Err(Error::configuration(format!(
                    "parameter grid has no values for {}",
                    name
                )));
            }
            if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
                return Err(Error::configuration(format!(
                    "parameter grid value for {} must be finite (value: {})",
                    name, bad
                )));
            }
        }
        Ok(())
    }

    /// Full Cartesian product; the last parameter varies fastest.
    pub fn combinations(&self) -> Vec<ParameterSet> {
        let total = self.combination_count();
        let mut combinations = Vec::with_capacity(total);
        if total == 0 {
            return combinations;
        }

        let mut cursor = vec![0usize; self.axes.len()];
        loop {
            combinations.push(
                self.axes
                    .iter()
                    .zip(&cursor)
                    .map(|((name, values), &i)| (name.clone(), values[i]))
                    .collect(),
            );

            let mut axis = self.axes.len();
            loop {
                if axis == 0 {
                    return combinations;
                }
                axis -= 1;
                cursor[axis] += 1;
                if cursor[axis] < self.axes[axis].1.len() {
                    break;
                }
                cursor[axis] = 0;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
}

/// Continuous search bounds for the genetic optimizer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterBounds {
    ranges: Vec<(String, ParameterRange)>,
}

impl ParameterBounds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<S: Into<String>>(mut self, name: S, min: f64, max: f64) -> Self {
        self.ranges.push((name.into(), ParameterRange { min, max }));
        self
    }

    pub fn ranges(&self) -> &[(String, ParameterRange)] {
        &self.ranges
    }

    pub fn validate(&self) -> Result<()> {
        if self.ranges.is_empty() {
            return Err(Error::configuration(
                "parameter bounds must name at least one parameter",
            ));
        }
        let mut seen = HashSet::new();
        for (name, range) in &self.ranges {
            if !seen.insert(name.as_str()) {
                return Err(Error::configuration(format!(
                    "parameter bounds list {} more than once",
                    name
                )));
            }
            if !range.min.is_finite() || !range.max.is_finite() || range.min > range.max {
                return Err(Error::configuration(format!(
                    "bounds for {} must be finite with min <= max (min: {}, max: {})",
                    name, range.min, range.max
                )));
            }
        }
        Ok(())
    }

    pub fn contains(&self, params: &ParameterSet) -> bool {
        self.ranges.iter().all(|(name, range)| {
            params
                .get(name)
                .map(|v| v >= range.min && v <= range.max)
                .unwrap_or(false)
        })
    }
}

/// Extract a parameter as usize (rounded, floored at zero) with a default value
pub fn get_param_usize(params: &ParameterSet, key: &str, default: usize) -> usize {
    params
        .get(key)
        .filter(|v| v.is_finite())
        .map(|v| v.round().max(0.0) as usize)
        .unwrap_or(default)
}

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &ParameterSet, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}
