//! Softmax and action sampling. Neither function panics on odd input.

use rand::Rng;

use crate::engine::geometry::Direction;

/// `exp(beta * (v - max))`, normalised. Non-finite entries get zero mass;
/// if nothing finite remains the result is uniform.
pub fn softmax(values: &[f64], beta: f64) -> Vec<f64> {
    let max = values.iter().copied().filter(|v| v.is_finite()).fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return vec![1.0 / values.len().max(1) as f64; values.len()];
    }

    let mut out: Vec<f64> = values
        .iter()
        .map(|v| if v.is_finite() { (beta * (v - max)).clamp(-700.0, 0.0).exp() } else { 0.0 })
        .collect();
    let total: f64 = out.iter().sum();
    for p in &mut out {
        *p /= total;
    }
    out
}

/// Cumulative draw over the four directions. If rounding leaves the draw
/// unmatched (or the weights are garbage) the choice falls back to uniform.
pub fn sample_action<R: Rng + ?Sized>(probs: &[f64; 4], rng: &mut R) -> Direction {
    let total: f64 = probs.iter().sum();
    if total.is_finite() && total > 0.0 {
        let draw = rng.gen::<f64>() * total;
        let mut cumulative = 0.0;
        for (i, p) in probs.iter().enumerate() {
            cumulative += p;
            if draw < cumulative {
                if let Some(d) = Direction::from_index(i) {
                    return d;
                }
            }
        }
    }
    Direction::ALL[rng.gen_range(0..Direction::ALL.len())]
}
