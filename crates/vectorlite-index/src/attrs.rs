//! Secondary indexes over record attributes.
//!
//! Equality and existence lookups are roaring bitmaps keyed by
//! `type:canonical-value` tags; numeric keys additionally feed a lazily
//! sorted `(value, id)` array for range queries. Lookups return `None` when
//! the key has never been indexed, which is distinct from a known key with
//! no matches.

use roaring::RoaringBitmap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use vectorlite_core::{NumericBounds, ScalarValue, VectorId};

#[derive(Debug, Default, Clone)]
struct NumericEntries {
    entries: Vec<(f64, VectorId)>,
    dirty: bool,
}

impl NumericEntries {
    fn sort_if_dirty(&mut self) {
        if self.dirty {
            self.entries.sort_unstable_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.1.cmp(&b.1))
            });
            self.dirty = false;
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct AttributeIndex {
    eq: HashMap<String, HashMap<String, RoaringBitmap>>,
    exists: HashMap<String, RoaringBitmap>,
    num: HashMap<String, NumericEntries>,
    // Per-id attribute sets, so a later set_attrs can retract the old ones.
    forward: HashMap<VectorId, Map<String, Value>>,
}

/// Canonical number text: integral values print without a fraction so `3`
/// and `3.0` share one equality tag.
fn canon_num(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

fn value_tag(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(format!("string:{s}")),
        Value::Number(n) => n.as_f64().map(|v| format!("number:{}", canon_num(v))),
        Value::Bool(b) => Some(format!("bool:{b}")),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn scalar_tag(value: &ScalarValue) -> String {
    match value {
        ScalarValue::Str(s) => format!("string:{s}"),
        ScalarValue::Num(v) => format!("number:{}", canon_num(*v)),
        ScalarValue::Bool(b) => format!("bool:{b}"),
    }
}

impl AttributeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the attributes of `id`: any prior entries are retracted
    /// first, then `attrs` (if any) is installed.
    pub fn set_attrs(&mut self, id: VectorId, attrs: Option<&Map<String, Value>>) {
        self.remove_id(id);
        let Some(map) = attrs else { return };

        for (key, value) in map {
            // Every set key records existence, null-valued included.
            self.exists.entry(key.clone()).or_default().insert(id);

            match value {
                Value::Array(items) => {
                    for item in items {
                        if let Some(tag) = value_tag(item) {
                            self.insert_eq(key, tag, id);
                        }
                    }
                }
                other => {
                    if let Some(tag) = value_tag(other) {
                        self.insert_eq(key, tag, id);
                    }
                    if let Value::Number(n) = other {
                        if let Some(v) = n.as_f64() {
                            let slot = self.num.entry(key.clone()).or_default();
                            slot.entries.push((v, id));
                            slot.dirty = true;
                        }
                    }
                }
            }
        }
        self.forward.insert(id, map.clone());
    }

    fn insert_eq(&mut self, key: &str, tag: String, id: VectorId) {
        self.eq
            .entry(key.to_string())
            .or_default()
            .entry(tag)
            .or_default()
            .insert(id);
    }

    /// Retract all attributes of `id`. Idempotent.
    pub fn remove_id(&mut self, id: VectorId) {
        let Some(map) = self.forward.remove(&id) else {
            return;
        };
        for (key, value) in &map {
            if let Some(set) = self.exists.get_mut(key) {
                set.remove(id);
                if set.is_empty() {
                    self.exists.remove(key);
                }
            }
            match value {
                Value::Array(items) => {
                    for item in items {
                        if let Some(tag) = value_tag(item) {
                            self.remove_eq(key, &tag, id);
                        }
                    }
                }
                other => {
                    if let Some(tag) = value_tag(other) {
                        self.remove_eq(key, &tag, id);
                    }
                    if let Value::Number(n) = other {
                        if let (Some(v), Some(slot)) = (n.as_f64(), self.num.get_mut(key)) {
                            slot.entries.retain(|&(ev, eid)| !(eid == id && ev == v));
                            if slot.entries.is_empty() {
                                self.num.remove(key);
                            }
                        }
                    }
                }
            }
        }
    }

    fn remove_eq(&mut self, key: &str, tag: &str, id: VectorId) {
        if let Some(tags) = self.eq.get_mut(key) {
            if let Some(set) = tags.get_mut(tag) {
                set.remove(id);
                if set.is_empty() {
                    tags.remove(tag);
                }
            }
            if tags.is_empty() {
                self.eq.remove(key);
            }
        }
    }

    fn key_known(&self, key: &str) -> bool {
        self.exists.contains_key(key)
    }

    /// Ids whose `key` equals `value`. `None` when `key` is unknown.
    pub fn eq_candidates(&self, key: &str, value: &ScalarValue) -> Option<RoaringBitmap> {
        if !self.key_known(key) {
            return None;
        }
        let set = self
            .eq
            .get(key)
            .and_then(|tags| tags.get(&scalar_tag(value)))
            .cloned()
            .unwrap_or_default();
        Some(set)
    }

    /// Union of equality matches over `values`. `None` when `key` is unknown.
    pub fn in_candidates(&self, key: &str, values: &[ScalarValue]) -> Option<RoaringBitmap> {
        if !self.key_known(key) {
            return None;
        }
        let mut out = RoaringBitmap::new();
        if let Some(tags) = self.eq.get(key) {
            for value in values {
                if let Some(set) = tags.get(&scalar_tag(value)) {
                    out |= set;
                }
            }
        }
        Some(out)
    }

    /// Ids that set `key` at all (null-valued included).
    pub fn exists_candidates(&self, key: &str) -> Option<RoaringBitmap> {
        self.exists.get(key).cloned()
    }

    /// Numeric range lookup. Sorts the entry array on first use after a
    /// mutation, then binary-searches both bounds; ties at a boundary are
    /// settled by the strict flag.
    pub fn range_candidates(&mut self, key: &str, bounds: &NumericBounds) -> Option<RoaringBitmap> {
        if !self.key_known(key) {
            return None;
        }
        let Some(slot) = self.num.get_mut(key) else {
            // Key known but holds no numeric values.
            return Some(RoaringBitmap::new());
        };
        slot.sort_if_dirty();
        let entries = &slot.entries;

        let mut lo = 0usize;
        if let Some(gt) = bounds.gt {
            lo = lo.max(entries.partition_point(|&(v, _)| v <= gt));
        }
        if let Some(gte) = bounds.gte {
            lo = lo.max(entries.partition_point(|&(v, _)| v < gte));
        }
        let mut hi = entries.len();
        if let Some(lt) = bounds.lt {
            hi = hi.min(entries.partition_point(|&(v, _)| v < lt));
        }
        if let Some(lte) = bounds.lte {
            hi = hi.min(entries.partition_point(|&(v, _)| v <= lte));
        }

        let mut out = RoaringBitmap::new();
        if lo < hi {
            for &(_, id) in &entries[lo..hi] {
                out.insert(id);
            }
        }
        Some(out)
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub(crate) fn eq_map(&self) -> &HashMap<String, HashMap<String, RoaringBitmap>> {
        &self.eq
    }

    pub(crate) fn exists_map(&self) -> &HashMap<String, RoaringBitmap> {
        &self.exists
    }

    pub(crate) fn sorted_numeric(&self, key: &str) -> Option<Vec<(f64, VectorId)>> {
        self.num.get(key).map(|slot| {
            let mut entries = slot.entries.clone();
            entries.sort_unstable_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.1.cmp(&b.1))
            });
            entries
        })
    }

    pub(crate) fn numeric_keys(&self) -> impl Iterator<Item = &String> {
        self.num.keys()
    }

    pub(crate) fn restore_numeric(&mut self, key: String, entries: Vec<(f64, VectorId)>) {
        self.num.insert(
            key,
            NumericEntries {
                entries,
                dirty: false,
            },
        );
    }

    pub(crate) fn restore_eq(&mut self, key: String, tags: HashMap<String, RoaringBitmap>) {
        self.eq.insert(key, tags);
    }

    pub(crate) fn restore_exists(&mut self, key: String, set: RoaringBitmap) {
        self.exists.insert(key, set);
    }

    pub(crate) fn restore_forward(&mut self, id: VectorId, attrs: Map<String, Value>) {
        self.forward.insert(id, attrs);
    }
}
