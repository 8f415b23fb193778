//! WHERE-clause lowering (§4.4.1, §10).
//!
//! Two passes: first pull `RADIUS(...)`/`KNN(...)` calls out with
//! paren/quote-balanced scanning (their arguments themselves contain parens
//! and commas), then lower whatever remains — equality, `BETWEEN`,
//! comparison operators — against the attribute's declared type.

use crate::error::{StoreError, StoreResult};
use crate::schema::{DataType, Schema};
use crate::table::{EqualsPredicate, Predicates, RangePredicate, SpatialPredicate};
use crate::value::{Point, Value};

const INT_EPS: i32 = 1;
const DOUBLE_EPS: f64 = 0.01;
const POINT_EPS: f64 = 0.01;

fn type_min_max(data_type: &DataType) -> (Value, Value) {
    match data_type {
        DataType::Int => (Value::Int(i32::MIN), Value::Int(i32::MAX)),
        DataType::Decimal => (Value::Decimal(-999_999_999.99), Value::Decimal(999_999_999.99)),
        DataType::Point => (
            Value::Point(Point::new(-999_999.0, -999_999.0)),
            Value::Point(Point::new(999_999.0, 999_999.0)),
        ),
        DataType::Char(_) | DataType::Varchar(_) => {
            (Value::Text(String::new()), Value::Text("ZZZZZZZZZ".to_string()))
        }
        DataType::Bool => (Value::Bool(false), Value::Bool(true)),
        DataType::Date => (Value::Date(0), Value::Date(u32::MAX)),
    }
}

fn nudge_up(value: Value, data_type: &DataType) -> Value {
    match (value, data_type) {
        (Value::Int(v), DataType::Int) => Value::Int(v.saturating_add(INT_EPS)),
        (Value::Decimal(v), DataType::Decimal) => Value::Decimal(v + DOUBLE_EPS),
        (Value::Point(p), DataType::Point) => Value::Point(Point::new(p.x + POINT_EPS, p.y + POINT_EPS)),
        (other, _) => other,
    }
}

fn nudge_down(value: Value, data_type: &DataType) -> Value {
    match (value, data_type) {
        (Value::Int(v), DataType::Int) => Value::Int(v.saturating_sub(INT_EPS)),
        (Value::Decimal(v), DataType::Decimal) => Value::Decimal(v - DOUBLE_EPS),
        (Value::Point(p), DataType::Point) => Value::Point(Point::new(p.x - POINT_EPS, p.y - POINT_EPS)),
        (other, _) => other,
    }
}

/// Finds every top-level, quote-aware occurrence of a `NAME(...)` call and
/// returns `(name_upper, inner_args, byte_range_in_clause)` for each, along
/// with the clause text with each call replaced by a single space so the
/// remaining equality/BETWEEN/comparison lowering never sees the call's
/// internal commas and parens.
fn extract_calls(clause: &str, names: &[&str]) -> (String, Vec<(String, String)>) {
    let chars: Vec<char> = clause.chars().collect();
    let mut calls = Vec::new();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let mut matched = None;
        for name in names {
            let name_len = name.chars().count();
            if i + name_len <= chars.len() {
                let candidate: String = chars[i..i + name_len].iter().collect();
                if candidate.eq_ignore_ascii_case(name) {
                    let mut j = i + name_len;
                    while j < chars.len() && chars[j].is_whitespace() {
                        j += 1;
                    }
                    if chars.get(j) == Some(&'(') {
                        matched = Some((*name, j));
                        break;
                    }
                }
            }
        }
        if let Some((name, paren_start)) = matched {
            let mut depth = 0i32;
            let mut j = paren_start;
            let mut in_string: Option<char> = None;
            loop {
                let c = chars[j];
                if let Some(q) = in_string {
                    if c == q {
                        in_string = None;
                    }
                } else {
                    match c {
                        '\'' | '"' => in_string = Some(c),
                        '(' => depth += 1,
                        ')' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                j += 1;
                if j >= chars.len() {
                    break;
                }
            }
            let inner: String = chars[paren_start + 1..j].iter().collect();
            calls.push((name.to_ascii_uppercase(), inner));
            out.push(' ');
            i = j + 1;
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }
    (out, calls)
}

/// Splits a RADIUS/KNN call's comma-separated args, quote-aware (the point
/// literal itself contains a comma).
fn split_call_args(inner: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_string: Option<char> = None;
    for c in inner.chars() {
        match in_string {
            Some(q) => {
                current.push(c);
                if c == q {
                    in_string = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    in_string = Some(c);
                    current.push(c);
                }
                '(' => {
                    depth += 1;
                    current.push(c);
                }
                ')' => {
                    depth -= 1;
                    current.push(c);
                }
                ',' if depth == 0 => {
                    args.push(std::mem::take(&mut current));
                }
                _ => current.push(c),
            },
        }
    }
    args.push(current);
    args.into_iter().map(|a| a.trim().trim_matches('\'').trim_matches('"').trim().to_string()).collect()
}

fn parse_spatial_call(name: &str, inner: &str) -> StoreResult<SpatialPredicate> {
    let args = split_call_args(inner);
    if args.len() != 3 {
        return Err(StoreError::ParseError(format!("{name} expects 3 arguments, got {}", args.len())));
    }
    let attr = args[0].clone();
    let center = Point::parse(&args[1])?;
    match name {
        "RADIUS" => {
            let radius: f64 = args[2]
                .parse()
                .map_err(|_| StoreError::ParseError(format!("invalid RADIUS argument '{}'", args[2])))?;
            Ok(SpatialPredicate::Radius { attr, center, radius })
        }
        "KNN" => {
            let k: usize = args[2]
                .parse()
                .map_err(|_| StoreError::ParseError(format!("invalid KNN argument '{}'", args[2])))?;
            Ok(SpatialPredicate::Knn { attr, center, k })
        }
        other => Err(StoreError::ParseError(format!("unknown spatial predicate '{other}'"))),
    }
}

/// Splits the remaining (non-spatial) clause text on top-level `AND`.
fn split_on_and(clause: &str) -> Vec<String> {
    let upper_markers: Vec<(usize, usize)> = {
        let chars: Vec<char> = clause.chars().collect();
        let mut spans = Vec::new();
        let mut i = 0;
        let mut in_string: Option<char> = None;
        while i < chars.len() {
            let c = chars[i];
            if let Some(q) = in_string {
                if c == q {
                    in_string = None;
                }
                i += 1;
                continue;
            }
            if c == '\'' || c == '"' {
                in_string = Some(c);
                i += 1;
                continue;
            }
            if i + 3 <= chars.len() {
                let candidate: String = chars[i..i + 3].iter().collect();
                let boundary_before = i == 0 || chars[i - 1].is_whitespace();
                let boundary_after = i + 3 == chars.len() || chars[i + 3].is_whitespace();
                if candidate.eq_ignore_ascii_case("AND") && boundary_before && boundary_after {
                    spans.push((i, i + 3));
                }
            }
            i += 1;
        }
        spans
    };
    let chars: Vec<char> = clause.chars().collect();
    let mut parts = Vec::new();
    let mut start = 0;
    for (s, e) in upper_markers {
        parts.push(chars[start..s].iter().collect::<String>());
        start = e;
    }
    parts.push(chars[start..].iter().collect::<String>());
    parts.into_iter().map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect()
}

fn strip_quotes(s: &str) -> &str {
    s.trim().trim_matches('\'').trim_matches('"')
}

/// Lowers one non-spatial condition — equality, BETWEEN, or a comparison
/// operator — against `schema`.
fn lower_condition(schema: &Schema, condition: &str) -> StoreResult<Predicates> {
    let mut predicates = Predicates::default();
    let upper = condition.to_ascii_uppercase();

    if let Some(between_pos) = find_word_ci(&condition, "BETWEEN") {
        let attr = condition[..between_pos].trim().to_string();
        let rest = &condition[between_pos + "BETWEEN".len()..];
        let and_pos = find_word_ci(rest, "AND").ok_or_else(|| {
            StoreError::ParseError("BETWEEN without AND".to_string())
        })?;
        let lo_text = strip_quotes(&rest[..and_pos]);
        let hi_text = strip_quotes(&rest[and_pos + "AND".len()..]);
        let data_type = schema.attribute(&attr)?.data_type.clone();
        let lo = Value::coerce(lo_text, &data_type)?;
        let hi = Value::coerce(hi_text, &data_type)?;
        predicates.ranges.push(RangePredicate { attr, lo, hi });
        return Ok(predicates);
    }

    for (op, len) in [("<=", 2), (">=", 2), ("<", 1), (">", 1), ("=", 1)] {
        if let Some(pos) = upper.find(op) {
            let attr = condition[..pos].trim().to_string();
            let value_text = strip_quotes(&condition[pos + len..]);
            let data_type = schema.attribute(&attr)?.data_type.clone();
            let value = Value::coerce(value_text, &data_type)?;
            let (min, max) = type_min_max(&data_type);
            match op {
                "=" => predicates.equals.push(EqualsPredicate { attr, value }),
                "<=" => predicates.ranges.push(RangePredicate { attr, lo: min, hi: value }),
                ">=" => predicates.ranges.push(RangePredicate { attr, lo: value, hi: max }),
                "<" => predicates.ranges.push(RangePredicate { attr, lo: min, hi: nudge_down(value, &data_type) }),
                ">" => predicates.ranges.push(RangePredicate { attr, lo: nudge_up(value, &data_type), hi: max }),
                _ => unreachable!(),
            }
            return Ok(predicates);
        }
    }

    Err(StoreError::ParseError(format!("unrecognized WHERE condition '{condition}'")))
}

fn find_word_ci(haystack: &str, word: &str) -> Option<usize> {
    let upper = haystack.to_ascii_uppercase();
    let word_upper = word.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let wbytes = word_upper.as_bytes();
    if wbytes.is_empty() || bytes.len() < wbytes.len() {
        return None;
    }
    for start in 0..=bytes.len() - wbytes.len() {
        if &bytes[start..start + wbytes.len()] == wbytes {
            let before_ok = start == 0 || !(bytes[start - 1] as char).is_alphanumeric();
            let after_idx = start + wbytes.len();
            let after_ok = after_idx == bytes.len() || !(bytes[after_idx] as char).is_alphanumeric();
            if before_ok && after_ok {
                return Some(start);
            }
        }
    }
    None
}

/// Lowers a raw `WHERE` clause (everything after the `WHERE` keyword) into
/// a [`Predicates`] triple, per §4.4.1/§10.
pub fn lower_where_clause(schema: &Schema, clause: &str) -> StoreResult<Predicates> {
    let (remaining, calls) = extract_calls(clause, &["RADIUS", "KNN"]);
    let mut predicates = Predicates::default();
    for (name, inner) in calls {
        predicates.spatials.push(parse_spatial_call(&name, &inner)?);
    }
    for condition in split_on_and(&remaining) {
        let lowered = lower_condition(schema, &condition)?;
        predicates.equals.extend(lowered.equals);
        predicates.ranges.extend(lowered.ranges);
        predicates.spatials.extend(lowered.spatials);
    }
    Ok(predicates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, IndexKind};

    fn productos_schema() -> Schema {
        Schema::new(
            "productos",
            vec![
                Attribute::new("id", DataType::Int).primary_key(),
                Attribute::new("nombre", DataType::Varchar(50)).indexed(IndexKind::Avl),
                Attribute::new("precio", DataType::Decimal).indexed(IndexKind::Btree),
                Attribute::new("loc", DataType::Point).indexed(IndexKind::Rtree),
            ],
        )
    }

    #[test]
    fn lowers_equality() {
        let schema = productos_schema();
        let predicates = lower_where_clause(&schema, "nombre = 'A'").unwrap();
        assert_eq!(predicates.equals.len(), 1);
        assert_eq!(predicates.equals[0].value, Value::Text("A".to_string()));
    }

    #[test]
    fn lowers_between() {
        let schema = productos_schema();
        let predicates = lower_where_clause(&schema, "precio BETWEEN 15.0 AND 25.0").unwrap();
        assert_eq!(predicates.ranges.len(), 1);
        assert_eq!(predicates.ranges[0].lo, Value::Decimal(15.0));
        assert_eq!(predicates.ranges[0].hi, Value::Decimal(25.0));
    }

    #[test]
    fn lowers_strict_comparison_with_epsilon() {
        let schema = productos_schema();
        let predicates = lower_where_clause(&schema, "precio > 15.0").unwrap();
        assert_eq!(predicates.ranges.len(), 1);
        assert_eq!(predicates.ranges[0].lo, Value::Decimal(15.01));
    }

    #[test]
    fn lowers_radius_call_without_confusing_and_split() {
        let schema = productos_schema();
        let predicates = lower_where_clause(&schema, "RADIUS(loc, '(0, 0)', 2) AND id = 10").unwrap();
        assert_eq!(predicates.spatials.len(), 1);
        assert_eq!(predicates.equals.len(), 1);
        match &predicates.spatials[0] {
            SpatialPredicate::Radius { radius, .. } => assert_eq!(*radius, 2.0),
            _ => panic!("expected Radius"),
        }
    }

    #[test]
    fn lowers_knn_call() {
        let schema = productos_schema();
        let predicates = lower_where_clause(&schema, "KNN(loc, '(0,0)', 2)").unwrap();
        match &predicates.spatials[0] {
            SpatialPredicate::Knn { k, .. } => assert_eq!(*k, 2),
            _ => panic!("expected Knn"),
        }
    }

    #[test]
    fn multiple_and_conditions_combine() {
        let schema = productos_schema();
        let predicates = lower_where_clause(&schema, "nombre = 'A' AND precio <= 20.0").unwrap();
        assert_eq!(predicates.equals.len(), 1);
        assert_eq!(predicates.ranges.len(), 1);
    }
}
