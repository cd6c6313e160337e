use serde::{Deserialize, Serialize};

const MAX_ITER: usize = 100;
const MIN_STEP: f64 = 1e-10;
const SIGMA: f64 = 1e-12;
const EPS: f64 = 1e-5;

/// Sigmoid fit of decision values to probabilities:
/// `p = 1 / (1 + exp(a * f + b))`.
///
/// Fit by Newton's method with backtracking line search on regularized
/// targets, following Lin, Lin & Weng's note on Platt scaling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattScaler {
    pub a: f64,
    pub b: f64,
}

impl PlattScaler {
    /// `positive[i]` says whether sample `i` belongs to the positive class.
    pub fn fit(decisions: &[f64], positive: &[bool]) -> Self {
        let prior1 = positive.iter().filter(|&&p| p).count() as f64;
        let prior0 = positive.len() as f64 - prior1;

        let hi = (prior1 + 1.0) / (prior1 + 2.0);
        let lo = 1.0 / (prior0 + 2.0);
        let targets: Vec<f64> = positive.iter().map(|&p| if p { hi } else { lo }).collect();

        let mut a = 0.0;
        let mut b = ((prior0 + 1.0) / (prior1 + 1.0)).ln();
        let mut fval = objective(decisions, &targets, a, b);

        for iteration in 0..MAX_ITER {
            let (mut h11, mut h22, mut h21) = (SIGMA, SIGMA, 0.0);
            let (mut g1, mut g2) = (0.0, 0.0);
            for (&f, &t) in decisions.iter().zip(&targets) {
                let (p, q) = split_sigmoid(f * a + b);
                let d2 = p * q;
                h11 += f * f * d2;
                h22 += d2;
                h21 += f * d2;
                let d1 = t - p;
                g1 += f * d1;
                g2 += d1;
            }
            if g1.abs() < EPS && g2.abs() < EPS {
                break;
            }

            let det = h11 * h22 - h21 * h21;
            let da = -(h22 * g1 - h21 * g2) / det;
            let db = -(-h21 * g1 + h11 * g2) / det;
            let gd = g1 * da + g2 * db;

            let mut step = 1.0;
            while step >= MIN_STEP {
                let (na, nb) = (a + step * da, b + step * db);
                let candidate = objective(decisions, &targets, na, nb);
                if candidate < fval + 1e-4 * step * gd {
                    a = na;
                    b = nb;
                    fval = candidate;
                    break;
                }
                step /= 2.0;
            }
            if step < MIN_STEP {
                tracing::debug!(iteration, "Platt line search failed");
                break;
            }
        }

        Self { a, b }
    }

    /// Probability of the positive class for one decision value.
    pub fn predict(&self, decision: f64) -> f64 {
        let z = self.a * decision + self.b;
        if z >= 0.0 {
            let e = (-z).exp();
            e / (1.0 + e)
        } else {
            1.0 / (1.0 + z.exp())
        }
    }
}

/// `(p, 1 - p)` for `p = 1 / (1 + exp(z))`, without overflow.
fn split_sigmoid(z: f64) -> (f64, f64) {
    if z >= 0.0 {
        let e = (-z).exp();
        (e / (1.0 + e), 1.0 / (1.0 + e))
    } else {
        let e = z.exp();
        (1.0 / (1.0 + e), e / (1.0 + e))
    }
}

/// Cross-entropy of the sigmoid against the targets.
fn objective(decisions: &[f64], targets: &[f64], a: f64, b: f64) -> f64 {
    decisions
        .iter()
        .zip(targets)
        .map(|(&f, &t)| {
            let z = f * a + b;
            if z >= 0.0 {
                t * z + (-z).exp().ln_1p()
            } else {
                (t - 1.0) * z + z.exp().ln_1p()
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_decisions_mean_higher_probability() {
        let decisions = [-2.0, -1.5, -1.0, -0.2, 0.3, 1.1, 1.4, 2.2];
        let positive = [false, false, false, true, false, true, true, true];
        let scaler = PlattScaler::fit(&decisions, &positive);
        assert!(scaler.a < 0.0);
        assert!(scaler.predict(2.0) > 0.5);
        assert!(scaler.predict(-2.0) < 0.5);
        assert!(scaler.predict(1.0) > scaler.predict(0.0));
    }

    #[test]
    fn no_signal_falls_back_to_prior() {
        // Constant decisions: only the intercept can move.
        let decisions = [0.0; 6];
        let positive = [true, false, false, false, true, false];
        let scaler = PlattScaler::fit(&decisions, &positive);
        // Targets: hi = 3/4 for 2 positives, lo = 1/6 for 4 negatives.
        let expected = (2.0 * 0.75 + 4.0 / 6.0) / 6.0;
        assert!((scaler.predict(0.0) - expected).abs() < 1e-4);
    }

    #[test]
    fn extreme_inputs_stay_finite() {
        let scaler = PlattScaler { a: -5.0, b: 0.0 };
        assert_eq!(scaler.predict(1e6), 1.0);
        assert_eq!(scaler.predict(-1e6), 0.0);
        assert!(scaler.predict(0.0) == 0.5);
    }
}
