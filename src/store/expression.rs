//! Key conditions and filter expressions.
//!
//! Paths are kept as segment lists rather than dotted strings, so a map key
//! containing a dot (`http.status_code`) addresses one nested attribute.

use super::{AttributeValue, Item};
use std::cmp::Ordering;

/// Attribute path: a top-level attribute followed by nested map keys.
pub type AttributePath = Vec<String>;

/// Boolean condition over one item.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(AttributePath, AttributeValue),
    /// Inclusive on both ends
    Between(AttributePath, AttributeValue, AttributeValue),
    Ge(AttributePath, AttributeValue),
    Le(AttributePath, AttributeValue),
    And(Vec<Condition>),
}

/// Partition equality plus an optional sort key condition.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
    pub partition_attribute: String,
    pub partition_value: AttributeValue,
    pub sort: Option<Condition>,
}

fn path(attribute: &str) -> AttributePath {
    vec![attribute.to_string()]
}

impl Condition {
    pub fn eq(attribute: &str, value: AttributeValue) -> Self {
        Condition::Eq(path(attribute), value)
    }

    /// Equality on a nested attribute such as `SearchableTags.<key>`
    pub fn nested_eq(segments: &[&str], value: AttributeValue) -> Self {
        Condition::Eq(segments.iter().map(|s| (*s).to_string()).collect(), value)
    }

    pub fn between(attribute: &str, low: AttributeValue, high: AttributeValue) -> Self {
        Condition::Between(path(attribute), low, high)
    }

    pub fn ge(attribute: &str, value: AttributeValue) -> Self {
        Condition::Ge(path(attribute), value)
    }

    pub fn le(attribute: &str, value: AttributeValue) -> Self {
        Condition::Le(path(attribute), value)
    }

    /// Conjunction of the given conditions, `None` when there are none.
    pub fn all(mut conditions: Vec<Condition>) -> Option<Self> {
        match conditions.len() {
            0 => None,
            1 => conditions.pop(),
            _ => Some(Condition::And(conditions)),
        }
    }

    /// Evaluates the condition. Missing attributes and mismatched types
    /// never match.
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            Condition::Eq(path, value) => resolve(item, path)
                .map_or(false, |actual| values_equal(actual, value)),
            Condition::Between(path, low, high) => resolve(item, path).map_or(false, |actual| {
                matches!(compare(actual, low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(compare(actual, high), Some(Ordering::Less | Ordering::Equal))
            }),
            Condition::Ge(path, value) => resolve(item, path).map_or(false, |actual| {
                matches!(compare(actual, value), Some(Ordering::Greater | Ordering::Equal))
            }),
            Condition::Le(path, value) => resolve(item, path).map_or(false, |actual| {
                matches!(compare(actual, value), Some(Ordering::Less | Ordering::Equal))
            }),
            Condition::And(conditions) => conditions.iter().all(|c| c.matches(item)),
        }
    }
}

impl KeyCondition {
    /// Selects a whole partition
    pub fn partition(attribute: &str, value: AttributeValue) -> Self {
        Self {
            partition_attribute: attribute.to_string(),
            partition_value: value,
            sort: None,
        }
    }

    /// Narrows the partition by a condition on the sort key
    pub fn sort(mut self, condition: Condition) -> Self {
        self.sort = Some(condition);
        self
    }

    pub fn matches(&self, item: &Item) -> bool {
        item.get(&self.partition_attribute)
            .map_or(false, |value| values_equal(value, &self.partition_value))
            && self.sort.as_ref().map_or(true, |sort| sort.matches(item))
    }
}

fn resolve<'a>(item: &'a Item, path: &[String]) -> Option<&'a AttributeValue> {
    let (first, rest) = path.split_first()?;
    let mut current = item.get(first)?;
    for segment in rest {
        current = current.as_m()?.get(segment)?;
    }
    Some(current)
}

/// Orders two scalar values of the same type. Numbers compare numerically.
pub fn compare(a: &AttributeValue, b: &AttributeValue) -> Option<Ordering> {
    match (a, b) {
        (AttributeValue::S(x), AttributeValue::S(y)) => Some(x.cmp(y)),
        (AttributeValue::B(x), AttributeValue::B(y)) => Some(x.cmp(y)),
        (AttributeValue::N(x), AttributeValue::N(y)) => compare_numbers(x, y),
        _ => None,
    }
}

fn compare_numbers(x: &str, y: &str) -> Option<Ordering> {
    match (x.parse::<i128>(), y.parse::<i128>()) {
        (Ok(x), Ok(y)) => Some(x.cmp(&y)),
        _ => {
            let x: f64 = x.parse().ok()?;
            let y: f64 = y.parse().ok()?;
            x.partial_cmp(&y)
        }
    }
}

fn values_equal(a: &AttributeValue, b: &AttributeValue) -> bool {
    match compare(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}
