//! Turning scores into a probability distribution.
//!
//! Deterministic: the same scores and temperature always produce the same
//! probabilities, so they can be logged as propensities for offline evaluation.

/// Stable softmax over `scores`, in input order.
///
/// - `temperature` controls sharpness (non-finite or `<= 0` falls back to `1.0`).
/// - Uses the max-trick for numerical stability.
/// - Non-finite scores get zero mass; if nothing finite remains the result is uniform.
/// - Returns an empty vector for empty input.
pub fn softmax(scores: &[f64], temperature: f64) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let t = if temperature.is_finite() && temperature > 0.0 {
        temperature
    } else {
        1.0
    };

    let max_score = scores
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    let mut out: Vec<f64> = scores
        .iter()
        .map(|&v| {
            if v.is_finite() {
                ((v - max_score) / t).exp()
            } else {
                0.0
            }
        })
        .collect();
    let denom: f64 = out.iter().sum();
    if denom <= 0.0 || !denom.is_finite() {
        // Degenerate fallback: uniform.
        let n = scores.len() as f64;
        return vec![1.0 / n; scores.len()];
    }

    for v in &mut out {
        *v /= denom;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn softmax_sums_to_one() {
        let p = softmax(&[0.0, 1.0, -2.0], 1.0);
        let s: f64 = p.iter().sum();
        assert!((s - 1.0).abs() < 1e-9, "sum={}", s);
        assert!(p[1] > p[0] && p[0] > p[2]);
    }

    #[test]
    fn softmax_degenerate_inputs() {
        assert!(softmax(&[], 1.0).is_empty());
        assert_eq!(softmax(&[f64::NAN, f64::NAN], 1.0), vec![0.5, 0.5]);
        assert_eq!(softmax(&[f64::NAN, 3.0], 1.0), vec![0.0, 1.0]);
    }

    proptest! {
        #[test]
        fn softmax_is_a_distribution(
            xs in proptest::collection::vec(-1.0e6f64..1.0e6f64, 0..20),
            temperature in prop_oneof![Just(f64::NAN), Just(0.0), Just(-1.0), 1.0e-6f64..1.0e6f64],
        ) {
            let p = softmax(&xs, temperature);

            // Deterministic.
            let p2 = softmax(&xs, temperature);
            prop_assert_eq!(&p, &p2);

            prop_assert_eq!(p.len(), xs.len());
            if !xs.is_empty() {
                let sum: f64 = p.iter().sum();
                prop_assert!((sum - 1.0).abs() < 1e-9, "sum={}", sum);
                for &v in &p {
                    prop_assert!(v.is_finite());
                    prop_assert!(v >= 0.0);
                    prop_assert!(v <= 1.0);
                }
            }
        }
    }
}
