//! Query model and in-process evaluation.
//!
//! A [`Query`] is a conjunction of [`Filter`]s plus ordering, a limit and
//! optional cursors. Stores translate it to their native query language;
//! [`Query::apply`] evaluates the same query over an in-memory snapshot and
//! is shared by the in-memory store and the engine's client-side fallback.
//!
//! Values are ordered by type first (null, booleans, numbers, timestamps,
//! strings, arrays, maps) and then by value. Range filters only match
//! values of the same type as the operand, and documents lacking an
//! ordering field are left out of ordered results.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::types::{PageCursor, WireTimestamp};

use super::store::StoredDocument;

/// Comparison operator of a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `in` - the field equals one of the listed values.
    In,
    /// `not-in` - the field equals none of the listed values.
    NotIn,
    /// `array-contains` - the array field contains the value.
    ArrayContains,
    /// `array-contains-any` - the array field contains one of the listed values.
    ArrayContainsAny,
}

impl std::fmt::Display for FilterOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            FilterOp::Eq => "==",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::In => "in",
            FilterOp::NotIn => "not-in",
            FilterOp::ArrayContains => "array-contains",
            FilterOp::ArrayContainsAny => "array-contains-any",
        };
        write!(f, "{}", symbol)
    }
}

impl FromStr for FilterOp {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "==" => Ok(FilterOp::Eq),
            "!=" => Ok(FilterOp::Ne),
            "<" => Ok(FilterOp::Lt),
            "<=" => Ok(FilterOp::Lte),
            ">" => Ok(FilterOp::Gt),
            ">=" => Ok(FilterOp::Gte),
            "in" => Ok(FilterOp::In),
            "not-in" => Ok(FilterOp::NotIn),
            "array-contains" => Ok(FilterOp::ArrayContains),
            "array-contains-any" => Ok(FilterOp::ArrayContainsAny),
            other => Err(ValidationError::InvalidFilter {
                message: format!("unknown operator '{}'", other),
            }),
        }
    }
}

impl FilterOp {
    /// Returns `true` for operators whose operand must be an array.
    pub fn takes_list(&self) -> bool {
        matches!(
            self,
            FilterOp::In | FilterOp::NotIn | FilterOp::ArrayContainsAny
        )
    }
}

/// A single `field op value` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Dotted field path.
    pub field: String,
    /// Comparison operator.
    pub op: FilterOp,
    /// Operand.
    pub value: Value,
}

impl Filter {
    /// Creates a filter.
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Shorthand for an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Checks the operand shape against the operator.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.field.is_empty() {
            return Err(ValidationError::InvalidFilter {
                message: "empty field path".to_string(),
            });
        }
        if self.op.takes_list() && !self.value.is_array() {
            return Err(ValidationError::InvalidFilter {
                message: format!("operator '{}' on '{}' needs an array", self.op, self.field),
            });
        }
        Ok(())
    }

    /// Evaluates the filter against a document.
    ///
    /// A missing field never matches, whatever the operator.
    pub fn matches(&self, doc: &StoredDocument) -> bool {
        let Some(actual) = doc.get_field(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => values_equal(actual, &self.value),
            FilterOp::Ne => !values_equal(actual, &self.value),
            FilterOp::Lt => range_matches(actual, &self.value, |o| o == Ordering::Less),
            FilterOp::Lte => range_matches(actual, &self.value, |o| o != Ordering::Greater),
            FilterOp::Gt => range_matches(actual, &self.value, |o| o == Ordering::Greater),
            FilterOp::Gte => range_matches(actual, &self.value, |o| o != Ordering::Less),
            FilterOp::In => list(&self.value)
                .iter()
                .any(|candidate| values_equal(actual, candidate)),
            FilterOp::NotIn => !list(&self.value)
                .iter()
                .any(|candidate| values_equal(actual, candidate)),
            FilterOp::ArrayContains => actual
                .as_array()
                .is_some_and(|items| items.iter().any(|item| values_equal(item, &self.value))),
            FilterOp::ArrayContainsAny => actual.as_array().is_some_and(|items| {
                list(&self.value)
                    .iter()
                    .any(|candidate| items.iter().any(|item| values_equal(item, candidate)))
            }),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

/// One ordering clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Dotted field path.
    pub field: String,
    /// Sort direction.
    pub direction: SortDirection,
}

impl OrderBy {
    /// Ascending order on `field`.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    /// Descending order on `field`.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// A collection query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Predicates, all of which must match.
    pub filters: Vec<Filter>,
    /// Ordering clauses. Document ID is always the final tie-breaker.
    pub order_by: Vec<OrderBy>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Return only documents positioned after this cursor.
    pub start_after: Option<PageCursor>,
    /// Return only documents positioned before this cursor.
    pub end_before: Option<PageCursor>,
}

impl Query {
    /// Creates an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Adds an ordering clause.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Sets the limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the start-after cursor.
    pub fn start_after(mut self, cursor: PageCursor) -> Self {
        self.start_after = Some(cursor);
        self
    }

    /// Sets the end-before cursor.
    pub fn end_before(mut self, cursor: PageCursor) -> Self {
        self.end_before = Some(cursor);
        self
    }

    /// Returns `true` if every filter matches the document.
    pub fn matches(&self, doc: &StoredDocument) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Evaluates the whole query over a snapshot: filters, ordering, cursors
    /// and limit, in that order.
    pub fn apply(&self, docs: impl IntoIterator<Item = StoredDocument>) -> Vec<StoredDocument> {
        let mut selected: Vec<StoredDocument> = docs
            .into_iter()
            .filter(|doc| self.matches(doc))
            .filter(|doc| {
                self.order_by
                    .iter()
                    .all(|order| doc.get_field(&order.field).is_some())
            })
            .collect();

        selected.sort_by(|a, b| self.compare_documents(a, b));

        if let Some(cursor) = &self.start_after {
            selected.retain(|doc| self.compare_to_cursor(doc, cursor) == Ordering::Greater);
        }
        if let Some(cursor) = &self.end_before {
            selected.retain(|doc| self.compare_to_cursor(doc, cursor) == Ordering::Less);
        }
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }

    /// Builds the cursor positioned at `doc` under this query's ordering.
    pub fn cursor_for(&self, doc: &StoredDocument) -> PageCursor {
        let values = self
            .order_by
            .iter()
            .map(|order| doc.get_field(&order.field).cloned().unwrap_or(Value::Null))
            .collect();
        PageCursor::at_document(values, doc.id.clone())
    }

    fn id_direction(&self) -> SortDirection {
        self.order_by
            .last()
            .map(|order| order.direction)
            .unwrap_or_default()
    }

    fn compare_documents(&self, a: &StoredDocument, b: &StoredDocument) -> Ordering {
        for order in &self.order_by {
            let ordering = match (a.get_field(&order.field), b.get_field(&order.field)) {
                (Some(x), Some(y)) => compare_values(x, y),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let ordering = directed(ordering, order.direction);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        directed(a.id.cmp(&b.id), self.id_direction())
    }

    fn compare_to_cursor(&self, doc: &StoredDocument, cursor: &PageCursor) -> Ordering {
        for (order, expected) in self.order_by.iter().zip(cursor.values()) {
            let actual = doc.get_field(&order.field).unwrap_or(&Value::Null);
            let ordering = directed(compare_values(actual, expected), order.direction);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        match cursor.document_id() {
            Some(id) => directed(doc.id.as_str().cmp(id), self.id_direction()),
            None => Ordering::Equal,
        }
    }
}

fn directed(ordering: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

fn list(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or(&[])
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::Object(_) if native_parts(value).is_some() => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

fn native_parts(value: &Value) -> Option<(i64, u32)> {
    match WireTimestamp::from_value(value)? {
        WireTimestamp::Native {
            seconds,
            nanoseconds,
        } if value.is_object() => Some((seconds, nanoseconds)),
        _ => None,
    }
}

fn range_matches(actual: &Value, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    type_rank(actual) == type_rank(operand) && accept(compare_values(actual, operand))
}

/// Returns `true` if both values compare equal under [`compare_values`].
pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

/// Total order over JSON values: type rank first, then value.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y) {
                let ordering = compare_values(left, right);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            if let (Some(left), Some(right)) = (native_parts(a), native_parts(b)) {
                return left.cmp(&right);
            }
            for ((lk, lv), (rk, rv)) in x.iter().zip(y) {
                let ordering = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}
