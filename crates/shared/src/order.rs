//! Validated stage sequences submitted for a reorder.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::StageId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderValidationError {
    #[error("order must list at least one stage")]
    Empty,
    #[error("order entry {index} is not an integer stage id")]
    NotAnInteger { index: usize },
    #[error("stage {0} appears more than once in order")]
    Duplicate(StageId),
}

/// A non-empty, duplicate-free sequence of stage ids. Position `i` in the
/// sequence becomes stored position `i + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StageOrder(Vec<StageId>);

impl StageOrder {
    pub fn new(ids: Vec<StageId>) -> Result<Self, OrderValidationError> {
        if ids.is_empty() {
            return Err(OrderValidationError::Empty);
        }
        let mut seen = HashSet::with_capacity(ids.len());
        for id in &ids {
            if !seen.insert(*id) {
                return Err(OrderValidationError::Duplicate(*id));
            }
        }
        Ok(Self(ids))
    }

    /// Parses a raw JSON array. Integer-valued numbers and strings holding an
    /// integer are accepted; everything else is rejected.
    pub fn from_json(values: &[Value]) -> Result<Self, OrderValidationError> {
        let ids = values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                json_integer(value)
                    .map(StageId)
                    .ok_or(OrderValidationError::NotAnInteger { index })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(ids)
    }

    pub fn ids(&self) -> &[StageId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Each id paired with its 1-based rank.
    pub fn ranked(&self) -> impl Iterator<Item = (StageId, i64)> + '_ {
        self.0.iter().zip(1_i64..).map(|(id, rank)| (*id, rank))
    }

    pub fn into_inner(self) -> Vec<StageId> {
        self.0
    }
}

fn json_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ids(raw: &[i64]) -> Vec<StageId> {
        raw.iter().copied().map(StageId).collect()
    }

    #[test]
    fn rejects_empty_order() {
        assert_eq!(StageOrder::new(Vec::new()), Err(OrderValidationError::Empty));
        assert_eq!(StageOrder::from_json(&[]), Err(OrderValidationError::Empty));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = StageOrder::new(ids(&[4, 7, 4])).expect_err("duplicate");
        assert_eq!(err, OrderValidationError::Duplicate(StageId(4)));
    }

    #[test]
    fn duplicate_detection_sees_through_string_encoding() {
        let err = StageOrder::from_json(&[json!(3), json!("3")]).expect_err("duplicate");
        assert_eq!(err, OrderValidationError::Duplicate(StageId(3)));
    }

    #[test]
    fn accepts_integer_strings_and_whole_floats() {
        let order = StageOrder::from_json(&[json!("12"), json!(5.0), json!(9)]).expect("order");
        assert_eq!(order.ids(), ids(&[12, 5, 9]).as_slice());
    }

    #[test]
    fn reports_index_of_first_non_integer_entry() {
        for bad in [json!(1.5), json!("abc"), json!(null), json!([1]), json!(true)] {
            let err = StageOrder::from_json(&[json!(1), bad]).expect_err("non-integer");
            assert_eq!(err, OrderValidationError::NotAnInteger { index: 1 });
        }
    }

    #[test]
    fn ranks_are_one_based_in_submitted_order() {
        let order = StageOrder::new(ids(&[30, 10, 20])).expect("order");
        let ranked: Vec<_> = order.ranked().collect();
        assert_eq!(
            ranked,
            vec![(StageId(30), 1), (StageId(10), 2), (StageId(20), 3)]
        );
    }
}
