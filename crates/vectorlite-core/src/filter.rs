use crate::error::{Result, VectorLiteError};

/// Scalar operand of `eq`/`in` filter leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Str(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        ScalarValue::Str(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Num(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        ScalarValue::Num(v as f64)
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Bool(v)
    }
}

/// Bounds of a numeric `range` leaf. Each side may be strict (`gt`/`lt`)
/// or inclusive (`gte`/`lte`), independently present.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NumericBounds {
    pub gt: Option<f64>,
    pub gte: Option<f64>,
    pub lt: Option<f64>,
    pub lte: Option<f64>,
}

impl NumericBounds {
    pub fn is_unbounded(&self) -> bool {
        self.gt.is_none() && self.gte.is_none() && self.lt.is_none() && self.lte.is_none()
    }
}

/// Boolean attribute-filter tree, composed with ANN search.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
    Eq { key: String, value: ScalarValue },
    In { key: String, values: Vec<ScalarValue> },
    Exists { key: String },
    Range { key: String, bounds: NumericBounds },
}

impl FilterExpr {
    pub fn eq(key: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        FilterExpr::Eq {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn is_in<V: Into<ScalarValue>>(
        key: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        FilterExpr::In {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exists(key: impl Into<String>) -> Self {
        FilterExpr::Exists { key: key.into() }
    }

    pub fn range(key: impl Into<String>, bounds: NumericBounds) -> Self {
        FilterExpr::Range {
            key: key.into(),
            bounds,
        }
    }

    pub fn and(children: impl IntoIterator<Item = FilterExpr>) -> Self {
        FilterExpr::And(children.into_iter().collect())
    }

    pub fn or(children: impl IntoIterator<Item = FilterExpr>) -> Self {
        FilterExpr::Or(children.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: FilterExpr) -> Self {
        FilterExpr::Not(Box::new(child))
    }

    /// Rejects malformed trees before evaluation: empty keys and
    /// non-finite range bounds.
    pub fn validate(&self) -> Result<()> {
        match self {
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                for c in children {
                    c.validate()?;
                }
                Ok(())
            }
            FilterExpr::Not(child) => child.validate(),
            FilterExpr::Eq { key, .. }
            | FilterExpr::In { key, .. }
            | FilterExpr::Exists { key } => check_key(key),
            FilterExpr::Range { key, bounds } => {
                check_key(key)?;
                for bound in [bounds.gt, bounds.gte, bounds.lt, bounds.lte]
                    .into_iter()
                    .flatten()
                {
                    if !bound.is_finite() {
                        return Err(VectorLiteError::InvalidArgument(format!(
                            "range bound on '{key}' must be finite"
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(VectorLiteError::InvalidArgument(
            "filter key must be non-empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_compose() {
        let expr = FilterExpr::and([
            FilterExpr::eq("color", "red"),
            FilterExpr::not(FilterExpr::exists("archived")),
            FilterExpr::range(
                "price",
                NumericBounds {
                    gte: Some(10.0),
                    lt: Some(100.0),
                    ..NumericBounds::default()
                },
            ),
        ]);
        assert!(expr.validate().is_ok());
    }

    #[test]
    fn nan_bound_rejected() {
        let expr = FilterExpr::range(
            "price",
            NumericBounds {
                gt: Some(f64::NAN),
                ..NumericBounds::default()
            },
        );
        assert!(matches!(
            expr.validate(),
            Err(VectorLiteError::InvalidArgument(_))
        ));
    }

    #[test]
    fn empty_key_rejected() {
        assert!(FilterExpr::eq("", 1.0).validate().is_err());
    }

    #[test]
    fn nested_validation_recurses() {
        let bad = FilterExpr::or([FilterExpr::and([FilterExpr::exists("")])]);
        assert!(bad.validate().is_err());
    }
}
