//! Filter-tree evaluation against the attribute index.
//!
//! Produces `Option<RoaringBitmap>` where `None` means "no restriction
//! from this subtree"; only degenerate trees (an empty `and`, or an `or`
//! containing an unrestricted operand) yield it. Leaf lookups on unknown
//! keys resolve to the empty set: the index sees every `set_attrs`, so an
//! unindexed key matches no record.

use crate::attrs::AttributeIndex;
use roaring::RoaringBitmap;
use vectorlite_core::FilterExpr;

pub fn evaluate(
    expr: &FilterExpr,
    attrs: &mut AttributeIndex,
    universe: &RoaringBitmap,
) -> Option<RoaringBitmap> {
    match expr {
        FilterExpr::And(children) => {
            let mut acc: Option<RoaringBitmap> = None;
            for child in children {
                if let Some(set) = evaluate(child, attrs, universe) {
                    match &mut acc {
                        Some(current) => *current &= &set,
                        None => acc = Some(set),
                    }
                    if acc.as_ref().is_some_and(RoaringBitmap::is_empty) {
                        return acc;
                    }
                }
            }
            acc
        }
        FilterExpr::Or(children) => {
            let mut acc = RoaringBitmap::new();
            for child in children {
                match evaluate(child, attrs, universe) {
                    // An unrestricted operand makes the whole union
                    // unrestricted.
                    None => return None,
                    Some(set) => acc |= set,
                }
            }
            Some(acc)
        }
        FilterExpr::Not(child) => match evaluate(child, attrs, universe) {
            None => Some(RoaringBitmap::new()),
            Some(set) => Some(universe - &set),
        },
        FilterExpr::Eq { key, value } => {
            Some(attrs.eq_candidates(key, value).unwrap_or_default())
        }
        FilterExpr::In { key, values } => {
            Some(attrs.in_candidates(key, values).unwrap_or_default())
        }
        FilterExpr::Exists { key } => Some(attrs.exists_candidates(key).unwrap_or_default()),
        FilterExpr::Range { key, bounds } => {
            Some(attrs.range_candidates(key, bounds).unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};
    use vectorlite_core::NumericBounds;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn fixture() -> (AttributeIndex, RoaringBitmap) {
        let mut attrs = AttributeIndex::new();
        attrs.set_attrs(1, Some(&obj(json!({"color": "red", "price": 5}))));
        attrs.set_attrs(2, Some(&obj(json!({"color": "red", "price": 15}))));
        attrs.set_attrs(3, Some(&obj(json!({"color": "blue", "price": 25}))));
        attrs.set_attrs(4, Some(&obj(json!({"shape": "round"}))));
        let universe: RoaringBitmap = [1u32, 2, 3, 4].into_iter().collect();
        (attrs, universe)
    }

    fn ids(set: &RoaringBitmap) -> Vec<u32> {
        set.iter().collect()
    }

    #[test]
    fn and_intersects() {
        let (mut attrs, universe) = fixture();
        let expr = FilterExpr::and([
            FilterExpr::eq("color", "red"),
            FilterExpr::range(
                "price",
                NumericBounds {
                    gt: Some(10.0),
                    ..NumericBounds::default()
                },
            ),
        ]);
        let out = evaluate(&expr, &mut attrs, &universe).unwrap();
        assert_eq!(ids(&out), vec![2]);
    }

    #[test]
    fn or_unions() {
        let (mut attrs, universe) = fixture();
        let expr = FilterExpr::or([
            FilterExpr::eq("color", "blue"),
            FilterExpr::exists("shape"),
        ]);
        let out = evaluate(&expr, &mut attrs, &universe).unwrap();
        assert_eq!(ids(&out), vec![3, 4]);
    }

    #[test]
    fn not_complements_against_universe() {
        let (mut attrs, universe) = fixture();
        let expr = FilterExpr::not(FilterExpr::eq("color", "red"));
        let out = evaluate(&expr, &mut attrs, &universe).unwrap();
        assert_eq!(ids(&out), vec![3, 4]);
    }

    #[test]
    fn empty_and_is_unrestricted() {
        let (mut attrs, universe) = fixture();
        assert!(evaluate(&FilterExpr::And(vec![]), &mut attrs, &universe).is_none());
        // not(unrestricted) restricts to nothing.
        let out = evaluate(
            &FilterExpr::not(FilterExpr::And(vec![])),
            &mut attrs,
            &universe,
        )
        .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn unknown_key_matches_nothing() {
        let (mut attrs, universe) = fixture();
        let out = evaluate(&FilterExpr::eq("missing", 1i64), &mut attrs, &universe).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn in_matches_any_listed_value() {
        let (mut attrs, universe) = fixture();
        let expr = FilterExpr::is_in("color", ["red", "green"]);
        let out = evaluate(&expr, &mut attrs, &universe).unwrap();
        assert_eq!(ids(&out), vec![1, 2]);
    }

    #[test]
    fn empty_intersection_short_circuits() {
        let (mut attrs, universe) = fixture();
        let expr = FilterExpr::and([
            FilterExpr::eq("color", "green"),
            FilterExpr::exists("shape"),
        ]);
        let out = evaluate(&expr, &mut attrs, &universe).unwrap();
        assert!(out.is_empty());
    }
}
