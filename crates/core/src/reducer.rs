//! Named aggregation selectors shared by region and table reduction

use serde::{Deserialize, Serialize};

/// How a set of valid samples collapses to one value.
///
/// Invalid samples (masked or NaN) are excluded before reduction; a set
/// with no valid samples reduces to nothing, never to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    Mean,
    Sum,
    /// First valid sample in iteration order
    First,
    /// Count of valid samples
    Count,
}

impl Reducer {
    /// Apply the reducer to a running accumulation
    pub fn finish(&self, sum: f64, first: f64, count: usize) -> Option<f64> {
        if count == 0 {
            return None;
        }
        Some(match self {
            Reducer::Mean => sum / count as f64,
            Reducer::Sum => sum,
            Reducer::First => first,
            Reducer::Count => count as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_reduces_to_none() {
        assert_eq!(Reducer::Mean.finish(0.0, 0.0, 0), None);
        assert_eq!(Reducer::Sum.finish(0.0, 0.0, 0), None);
        assert_eq!(Reducer::Count.finish(0.0, 0.0, 0), None);
    }

    #[test]
    fn test_finish() {
        assert_eq!(Reducer::Mean.finish(6.0, 2.0, 3), Some(2.0));
        assert_eq!(Reducer::Sum.finish(6.0, 2.0, 3), Some(6.0));
        assert_eq!(Reducer::First.finish(6.0, 2.0, 3), Some(2.0));
        assert_eq!(Reducer::Count.finish(6.0, 2.0, 3), Some(3.0));
    }
}
