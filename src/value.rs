//! Runtime values and the POINT type's ordering contract (§4.1).

use std::cmp::Ordering;

use crate::error::{StoreError, StoreResult};
use crate::schema::DataType;

const POINT_EPS: f64 = 1e-10;

/// A 2-D geometric value, compared by Euclidean distance to the origin for
/// `<`/`>` and by per-axis coordinate match (within `1e-10`) for equality.
/// This is *not* a lattice-compatible ordering for range queries — see
/// SPEC_FULL.md §13 — but the contract must be identical everywhere a POINT
/// is compared, or indexes and scans diverge.
#[derive(Debug, Clone, Copy)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    pub fn origin() -> Self {
        Point { x: 0.0, y: 0.0 }
    }

    pub fn distance_to_origin(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Rectangular containment used by AVL/B+ POINT range search and by
    /// RTreeIdx's range_search fine filter (§4.3.4).
    pub fn is_in_range(&self, lo: &Point, hi: &Point) -> bool {
        self.x >= lo.x && self.x <= hi.x && self.y >= lo.y && self.y <= hi.y
    }

    /// Parses `(x, y)` or `x,y`, trying `,`, ` `, `;` as the separator in
    /// that priority order. Mirrors the source's `Point.from_string`.
    pub fn parse(s: &str) -> StoreResult<Point> {
        let trimmed = s.trim().trim_start_matches('(').trim_end_matches(')').trim();
        for sep in [',', ' ', ';'] {
            if let Some((lhs, rhs)) = trimmed.split_once(sep) {
                let lhs = lhs.trim();
                let rhs = rhs.trim();
                if !lhs.is_empty() && !rhs.is_empty() {
                    if let (Ok(x), Ok(y)) = (lhs.parse::<f64>(), rhs.parse::<f64>()) {
                        return Ok(Point::new(x, y));
                    }
                }
            }
        }
        Err(StoreError::TypeCoercionFailed {
            column: "POINT".to_string(),
            reason: format!("cannot parse point from '{s}'"),
        })
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        (self.x - other.x).abs() < POINT_EPS && (self.y - other.y).abs() < POINT_EPS
    }
}

impl PartialOrd for Point {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        self.distance_to_origin().partial_cmp(&other.distance_to_origin())
    }
}

/// A decoded attribute value. `Int`/`Decimal`/`Bool`/`Date` map directly to
/// Rust primitives; `Text` backs both CHAR and VARCHAR (capacity is a
/// schema-level property, not carried on the value); `Point` is the 2-D
/// geometric type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Decimal(f64),
    Bool(bool),
    Date(u32),
    Text(String),
    Point(Point),
}

impl Value {
    /// Coerces a loosely-typed input (as produced by the SQL parser or CSV
    /// reader, always starting life as a string-ish token) into the
    /// column's declared type. On failure, plain INSERT/SELECT callers
    /// should fall back to `Value::Text` of the original string (§7); CSV
    /// import instead substitutes the type default (see `csv_import`).
    pub fn coerce(raw: &str, data_type: &DataType) -> StoreResult<Value> {
        match data_type {
            DataType::Int => raw
                .trim()
                .parse::<i32>()
                .map(Value::Int)
                .map_err(|e| coercion_err(raw, &e.to_string())),
            DataType::Decimal => raw
                .trim()
                .parse::<f64>()
                .map(Value::Decimal)
                .map_err(|e| coercion_err(raw, &e.to_string())),
            DataType::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Value::Bool(true)),
                "false" | "f" | "0" => Ok(Value::Bool(false)),
                _ => Err(coercion_err(raw, "not a boolean")),
            },
            DataType::Date => raw
                .trim()
                .parse::<u32>()
                .map(Value::Date)
                .map_err(|e| coercion_err(raw, &e.to_string())),
            DataType::Char(n) | DataType::Varchar(n) => {
                let s = raw.trim_matches('\'').trim_matches('"').to_string();
                if s.len() > *n || s.contains('\0') {
                    return Err(coercion_err(raw, "exceeds declared capacity or contains NUL"));
                }
                Ok(Value::Text(s))
            }
            DataType::Point => Point::parse(raw).map(Value::Point),
        }
    }

    /// Type default substituted by CSV import on coercion failure (§7, §10).
    pub fn type_default(data_type: &DataType) -> Value {
        match data_type {
            DataType::Int => Value::Int(0),
            DataType::Decimal => Value::Decimal(0.0),
            DataType::Bool => Value::Bool(false),
            DataType::Date => Value::Date(0),
            DataType::Char(_) | DataType::Varchar(_) => Value::Text(" ".to_string()),
            DataType::Point => Value::Point(Point::origin()),
        }
    }

    pub fn as_text_lossy(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::Bool(v) => v.to_string(),
            Value::Date(v) => v.to_string(),
            Value::Text(v) => v.clone(),
            Value::Point(p) => format!("({}, {})", p.x, p.y),
        }
    }
}

fn coercion_err(raw: &str, reason: &str) -> StoreError {
    StoreError::TypeCoercionFailed {
        column: raw.to_string(),
        reason: reason.to_string(),
    }
}

/// Three-way comparison between two values of (nominally) the same column.
/// Falls back to comparing the string representation when the operand
/// types don't line up — the source's documented mixed-type behavior
/// (SPEC_FULL.md §12 D7) — rather than erroring.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Decimal(x), Value::Decimal(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Point(x), Value::Point(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        _ => a.as_text_lossy().cmp(&b.as_text_lossy()),
    }
}
