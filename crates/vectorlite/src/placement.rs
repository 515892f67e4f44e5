//! CRUSH-like deterministic placement: `id → placement group → replica
//! set`, a pure function of the id and the map. Targets are picked by
//! walking a per-round hashed permutation with weight-proportional
//! rejection sampling; a zone constraint keeps replicas apart.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use vectorlite_core::{Result, VectorLiteError};

/// Rejection-sampling rounds before falling back to weight-blind filling.
const MAX_ROUNDS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrushTarget {
    pub key: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub zone: Option<String>,
}

fn default_weight() -> f64 {
    1.0
}

impl CrushTarget {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            weight: 1.0,
            zone: None,
        }
    }

    pub fn weighted(key: impl Into<String>, weight: f64) -> Self {
        Self {
            key: key.into(),
            weight,
            zone: None,
        }
    }

    pub fn in_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrushMap {
    pub pgs: u32,
    pub replicas: u32,
    pub targets: Vec<CrushTarget>,
}

impl CrushMap {
    pub fn validate(&self) -> Result<()> {
        if self.pgs == 0 {
            return Err(VectorLiteError::InvalidArgument(
                "crush map needs at least one placement group".to_string(),
            ));
        }
        if self.replicas == 0 {
            return Err(VectorLiteError::InvalidArgument(
                "crush map needs at least one replica".to_string(),
            ));
        }
        if self.targets.is_empty() {
            return Err(VectorLiteError::InvalidArgument(
                "crush map needs at least one target".to_string(),
            ));
        }
        for target in &self.targets {
            if !(target.weight.is_finite() && target.weight > 0.0) {
                return Err(VectorLiteError::InvalidArgument(format!(
                    "target '{}' weight must be positive and finite",
                    target.key
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub pg: u32,
    pub primaries: Vec<String>,
}

fn stable_hash(parts: &[&[u8]]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

#[allow(clippy::cast_precision_loss)]
fn unit_draw(parts: &[&[u8]]) -> f64 {
    stable_hash(parts) as f64 / u64::MAX as f64
}

/// Deterministic `(id, map) → placement`. Identical inputs always produce
/// identical outputs; the permutation reshuffles every round so heavy
/// targets cannot starve light ones forever.
pub fn locate(id: u32, map: &CrushMap) -> Result<Placement> {
    map.validate()?;

    let pg = (stable_hash(&[b"pg", &id.to_le_bytes()]) % u64::from(map.pgs)) as u32;
    let pg_bytes = pg.to_le_bytes();
    let max_weight = map
        .targets
        .iter()
        .map(|t| t.weight)
        .fold(f64::MIN, f64::max);

    let want = map.replicas as usize;
    let mut chosen: Vec<usize> = Vec::with_capacity(want);
    let mut zones: HashSet<&str> = HashSet::new();

    let permutation = |round: u32| -> Vec<usize> {
        let round_bytes = round.to_le_bytes();
        let mut order: Vec<(u64, usize)> = map
            .targets
            .iter()
            .enumerate()
            .map(|(i, t)| {
                (
                    stable_hash(&[b"perm", &pg_bytes, &round_bytes, t.key.as_bytes()]),
                    i,
                )
            })
            .collect();
        order.sort_unstable();
        order.into_iter().map(|(_, i)| i).collect()
    };

    'rounds: for round in 0..MAX_ROUNDS {
        let round_bytes = round.to_le_bytes();
        for i in permutation(round) {
            if chosen.len() >= want {
                break 'rounds;
            }
            let target = &map.targets[i];
            if chosen.contains(&i) {
                continue;
            }
            if let Some(zone) = &target.zone {
                if zones.contains(zone.as_str()) {
                    continue;
                }
            }
            let draw = unit_draw(&[b"accept", &pg_bytes, &round_bytes, target.key.as_bytes()]);
            if draw <= target.weight / max_weight {
                chosen.push(i);
                if let Some(zone) = &target.zone {
                    zones.insert(zone.as_str());
                }
            }
        }
        if chosen.len() >= want {
            break;
        }
    }

    // Weight-blind fill so enough eligible targets always complete the set.
    if chosen.len() < want {
        for i in permutation(0) {
            if chosen.len() >= want {
                break;
            }
            let target = &map.targets[i];
            if chosen.contains(&i) {
                continue;
            }
            if let Some(zone) = &target.zone {
                if zones.contains(zone.as_str()) {
                    continue;
                }
                zones.insert(zone.as_str());
            }
            chosen.push(i);
        }
    }

    Ok(Placement {
        pg,
        primaries: chosen
            .into_iter()
            .map(|i| map.targets[i].key.clone())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn flat_map(pgs: u32, replicas: u32, keys: &[&str]) -> CrushMap {
        CrushMap {
            pgs,
            replicas,
            targets: keys.iter().map(|k| CrushTarget::new(*k)).collect(),
        }
    }

    #[test]
    fn identical_inputs_identical_outputs() {
        let map = flat_map(64, 2, &["a", "b", "c", "d"]);
        for id in [0u32, 1, 999, u32::MAX] {
            assert_eq!(locate(id, &map).unwrap(), locate(id, &map).unwrap());
        }
    }

    #[test]
    fn equal_weights_balance_primaries() {
        let map = flat_map(64, 1, &["A", "B", "C", "D"]);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for id in 0..1000u32 {
            let placement = locate(id, &map).unwrap();
            assert_eq!(placement.primaries.len(), 1);
            *counts.entry(placement.primaries[0].clone()).or_default() += 1;
        }
        let max = counts.values().copied().max().unwrap();
        let min = counts.values().copied().min().unwrap();
        assert_eq!(counts.len(), 4, "every target receives primaries");
        assert!(min > 0);
        assert!(
            (max as f64) / (min as f64) < 3.0,
            "imbalanced: {counts:?}"
        );
    }

    #[test]
    fn heavier_targets_attract_more_primaries() {
        let mut map = flat_map(256, 1, &["A", "B", "C", "D"]);
        map.targets[0].weight = 2.0;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for id in 0..1000u32 {
            let placement = locate(id, &map).unwrap();
            *counts.entry(placement.primaries[0].clone()).or_default() += 1;
        }
        let a = counts["A"];
        for key in ["B", "C", "D"] {
            assert!(a > counts[key], "weight-2 target not favored: {counts:?}");
        }
        assert!(a > 350, "weight-2 target got {a} of 1000");
    }

    #[test]
    fn zone_constraint_separates_replicas() {
        let map = CrushMap {
            pgs: 64,
            replicas: 2,
            targets: vec![
                CrushTarget::new("a1").in_zone("z1"),
                CrushTarget::new("a2").in_zone("z1"),
                CrushTarget::new("b1").in_zone("z2"),
                CrushTarget::new("b2").in_zone("z2"),
            ],
        };
        let zone_of = |key: &str| if key.starts_with('a') { "z1" } else { "z2" };
        for id in 0..500u32 {
            let placement = locate(id, &map).unwrap();
            assert_eq!(placement.primaries.len(), 2);
            assert_ne!(
                zone_of(&placement.primaries[0]),
                zone_of(&placement.primaries[1])
            );
        }
    }

    #[test]
    fn replica_sets_are_distinct_targets() {
        let map = flat_map(32, 3, &["a", "b", "c"]);
        for id in 0..200u32 {
            let placement = locate(id, &map).unwrap();
            let mut keys = placement.primaries.clone();
            keys.sort();
            keys.dedup();
            assert_eq!(keys.len(), 3);
        }
    }

    #[test]
    fn invalid_maps_are_rejected() {
        assert!(locate(1, &flat_map(0, 1, &["a"])).is_err());
        assert!(locate(1, &flat_map(8, 0, &["a"])).is_err());
        assert!(locate(1, &flat_map(8, 1, &[])).is_err());
        let mut bad = flat_map(8, 1, &["a"]);
        bad.targets[0].weight = 0.0;
        assert!(locate(1, &bad).is_err());
    }
}
