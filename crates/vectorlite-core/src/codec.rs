use crate::error::{Result, VectorLiteError};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Bijective mapping between named enum variants and small integer codes.
///
/// Binary formats (snapshot header, WAL opcodes) persist the codes; the
/// labels are what configuration and logs speak. Construction rejects
/// duplicates on either side so a skewed table cannot ship silently.
#[derive(Debug)]
pub struct EnumCodec {
    name: &'static str,
    by_code: BTreeMap<u8, &'static str>,
    by_label: BTreeMap<&'static str, u8>,
}

impl EnumCodec {
    pub fn new(name: &'static str, entries: &[(u8, &'static str)]) -> Result<Self> {
        let mut by_code = BTreeMap::new();
        let mut by_label = BTreeMap::new();
        for &(code, label) in entries {
            if by_code.insert(code, label).is_some() {
                return Err(VectorLiteError::InvalidArgument(format!(
                    "{name} codec: duplicate code {code}"
                )));
            }
            if by_label.insert(label, code).is_some() {
                return Err(VectorLiteError::InvalidArgument(format!(
                    "{name} codec: duplicate label '{label}'"
                )));
            }
        }
        Ok(Self {
            name,
            by_code,
            by_label,
        })
    }

    pub fn encode(&self, label: &str) -> Result<u8> {
        self.by_label.get(label).copied().ok_or_else(|| {
            VectorLiteError::InvalidArgument(format!(
                "{} codec: unknown label '{label}'",
                self.name
            ))
        })
    }

    pub fn decode(&self, code: u8) -> Result<&'static str> {
        self.by_code.get(&code).copied().ok_or_else(|| {
            VectorLiteError::CorruptSnapshot(format!(
                "{} codec: unknown code {code}",
                self.name
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

static METRIC_CODEC: Lazy<EnumCodec> = Lazy::new(|| {
    EnumCodec::new("metric", &[(0, "cosine"), (1, "l2"), (2, "dot")])
        .expect("static metric table is well-formed")
});

static STRATEGY_CODEC: Lazy<EnumCodec> = Lazy::new(|| {
    EnumCodec::new("strategy", &[(0, "bruteforce"), (1, "hnsw"), (2, "ivf")])
        .expect("static strategy table is well-formed")
});

pub fn metric_codec() -> &'static EnumCodec {
    &METRIC_CODEC
}

pub fn strategy_codec() -> &'static EnumCodec {
    &STRATEGY_CODEC
}
