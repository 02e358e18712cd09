use crate::types::{Category, CategoryCounts};

const THRESHOLD: f64 = 10.0;

/// Classify a building by its percent difference from the median.
///
/// `0` is reserved for "no data" and is checked before the mid band. Boundary values
/// `±10` are mid. NaN fails every band and falls through to no data.
pub fn classify(percent_diff: f64) -> Category {
    if percent_diff > THRESHOLD {
        Category::High
    } else if percent_diff < -THRESHOLD {
        Category::Low
    } else if percent_diff != 0.0 && (-THRESHOLD..=THRESHOLD).contains(&percent_diff) {
        Category::Mid
    } else {
        Category::NoData
    }
}

impl CategoryCounts {
    /// Fold [`classify`] over a set of member values.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut counts = CategoryCounts::default();
        for v in values {
            counts.add(classify(v));
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_boundaries() {
        assert_eq!(classify(10.0), Category::Mid);
        assert_eq!(classify(10.0001), Category::High);
        assert_eq!(classify(-10.0), Category::Mid);
        assert_eq!(classify(-10.0001), Category::Low);
        assert_eq!(classify(0.0), Category::NoData);
        assert_eq!(classify(-0.0), Category::NoData);
        assert_eq!(classify(0.5), Category::Mid);
    }

    #[test]
    fn test_non_finite() {
        assert_eq!(classify(f64::NAN), Category::NoData);
        assert_eq!(classify(f64::INFINITY), Category::High);
        assert_eq!(classify(f64::NEG_INFINITY), Category::Low);
    }

    #[test]
    fn test_from_values() {
        let counts = CategoryCounts::from_values([25.0, 3.0, -3.0, 0.0, -40.0, 0.0]);
        assert_eq!(counts, CategoryCounts::new(1, 2, 1, 2));
        assert_eq!(counts.total(), 6);
    }

    proptest! {
        #[test]
        fn prop_exactly_one_category(x in proptest::num::f64::ANY) {
            let high = x > 10.0;
            let mid = x != 0.0 && (-10.0..=10.0).contains(&x);
            let low = x < -10.0;
            let no_data = x == 0.0;
            let matched = [high, mid, low, no_data].iter().filter(|b| **b).count();
            // NaN matches none of the raw predicates and is styled with the fallback
            prop_assert_eq!(matched, if x.is_nan() { 0 } else { 1 });

            let expected = if high {
                Category::High
            } else if mid {
                Category::Mid
            } else if low {
                Category::Low
            } else {
                Category::NoData
            };
            prop_assert_eq!(classify(x), expected);
        }

        #[test]
        fn prop_counts_sum_to_members(values in proptest::collection::vec(-50.0f64..50.0, 0..200)) {
            let counts = CategoryCounts::from_values(values.iter().copied());
            prop_assert_eq!(counts.total() as usize, values.len());
        }
    }
}
