//! Exact t-SNE.
//!
//! O(n²) per iteration, no tree approximation. Intended for a few hundred
//! points.
//!
//! Steps:
//! 1. Squared Euclidean distances between input rows.
//! 2. Per-row binary search on the Gaussian precision so that the entropy of
//!    the conditional distribution equals `ln(perplexity)`.
//! 3. Symmetrize and normalize into joint probabilities `P`.
//! 4. Gradient descent on KL(P || Q) with a Student-t (1 dof) kernel for `Q`,
//!    momentum, and per-coordinate adaptive gains. The first
//!    [`EXPLORATION_ITER`] iterations run with `P` exaggerated.

use rand::rngs::StdRng;
use rand::Rng;

/// Floor applied to probabilities before taking logs or dividing.
const MACHINE_EPSILON: f64 = f64::EPSILON;
/// Floor for a row's unnormalized probability mass in the binary search.
const EPSILON_DBL: f64 = 1e-8;
const PERPLEXITY_TOLERANCE: f64 = 1e-5;
const PERPLEXITY_STEPS: usize = 100;

/// Length of the early-exaggeration phase.
pub const EXPLORATION_ITER: usize = 250;
const EXPLORATION_MOMENTUM: f64 = 0.5;
const FINAL_MOMENTUM: f64 = 0.8;
const ITER_WITHOUT_PROGRESS: usize = 300;
const CHECK_EVERY: usize = 50;
const MIN_GAIN: f64 = 0.01;
const MIN_GRAD_NORM: f64 = 1e-7;
/// Standard deviation of the random initial layout.
const INIT_SCALE: f64 = 1e-4;

/// Fully resolved optimizer settings.
#[derive(Debug, Clone, Copy)]
pub struct TsneParams {
    pub perplexity: f64,
    pub max_iter: usize,
    pub early_exaggeration: f64,
    pub learning_rate: f64,
    pub dims: usize,
}

/// Embedding plus optimizer diagnostics.
#[derive(Debug, Clone)]
pub struct TsneOutput {
    /// Row-major `n * dims` coordinates.
    pub embedding: Vec<f64>,
    pub kl_divergence: f64,
    pub iterations: usize,
}

/// Embed `n` rows of `features` (each of equal length) into `params.dims`
/// dimensions.
pub fn fit(features: &[Vec<f64>], params: &TsneParams, rng: &mut StdRng) -> TsneOutput {
    let n = features.len();
    let distances = squared_distances(features);
    let mut p = joint_probabilities(&distances, n, params.perplexity);

    let mut y: Vec<f64> = (0..n * params.dims)
        .map(|_| INIT_SCALE * standard_normal(rng))
        .collect();

    let mut state = DescentState::new(n * params.dims);

    for v in p.iter_mut() {
        *v *= params.early_exaggeration;
    }
    let explore_iter = EXPLORATION_ITER.min(params.max_iter);
    let (mut kl, mut iterations) = state.run(
        &p,
        &mut y,
        n,
        params,
        0,
        explore_iter,
        EXPLORATION_MOMENTUM,
        EXPLORATION_ITER,
    );

    for v in p.iter_mut() {
        *v /= params.early_exaggeration;
    }
    if params.max_iter > explore_iter {
        let (final_kl, final_iter) = state.run(
            &p,
            &mut y,
            n,
            params,
            iterations,
            params.max_iter,
            FINAL_MOMENTUM,
            ITER_WITHOUT_PROGRESS,
        );
        kl = final_kl;
        iterations = final_iter;
    }

    TsneOutput {
        embedding: y,
        kl_divergence: kl,
        iterations,
    }
}

/// Row-major `n * n` matrix of squared Euclidean distances.
pub fn squared_distances(features: &[Vec<f64>]) -> Vec<f64> {
    let n = features.len();
    let mut d = vec![0.0; n * n];
    for i in 0..n {
        for j in (i + 1)..n {
            let dist: f64 = features[i]
                .iter()
                .zip(&features[j])
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            d[i * n + j] = dist;
            d[j * n + i] = dist;
        }
    }
    d
}

/// Conditional probabilities `p(j|i)`, one Gaussian per row, each calibrated
/// to the target perplexity.
pub fn conditional_probabilities(distances: &[f64], n: usize, perplexity: f64) -> Vec<f64> {
    let desired_entropy = perplexity.ln();
    let mut p = vec![0.0; n * n];

    for i in 0..n {
        let row = &distances[i * n..(i + 1) * n];
        let mut beta = 1.0_f64;
        let mut beta_min = f64::NEG_INFINITY;
        let mut beta_max = f64::INFINITY;

        for _ in 0..PERPLEXITY_STEPS {
            let mut sum_p = 0.0;
            for j in 0..n {
                let v = if j == i { 0.0 } else { (-row[j] * beta).exp() };
                p[i * n + j] = v;
                sum_p += v;
            }
            if sum_p == 0.0 {
                sum_p = EPSILON_DBL;
            }

            let mut sum_dist_p = 0.0;
            for j in 0..n {
                p[i * n + j] /= sum_p;
                sum_dist_p += row[j] * p[i * n + j];
            }

            let entropy = sum_p.ln() + beta * sum_dist_p;
            let diff = entropy - desired_entropy;
            if diff.abs() <= PERPLEXITY_TOLERANCE {
                break;
            }

            if diff > 0.0 {
                beta_min = beta;
                beta = if beta_max == f64::INFINITY {
                    beta * 2.0
                } else {
                    (beta + beta_max) / 2.0
                };
            } else {
                beta_max = beta;
                beta = if beta_min == f64::NEG_INFINITY {
                    beta / 2.0
                } else {
                    (beta + beta_min) / 2.0
                };
            }
        }
    }
    p
}

/// Symmetric joint probabilities; off-diagonal entries sum to 1.
pub fn joint_probabilities(distances: &[f64], n: usize, perplexity: f64) -> Vec<f64> {
    let conditional = conditional_probabilities(distances, n, perplexity);
    let mut p = vec![0.0; n * n];
    let mut total = 0.0;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                let v = conditional[i * n + j] + conditional[j * n + i];
                p[i * n + j] = v;
                total += v;
            }
        }
    }
    let total = total.max(MACHINE_EPSILON);
    for i in 0..n {
        for j in 0..n {
            if i != j {
                p[i * n + j] = (p[i * n + j] / total).max(MACHINE_EPSILON);
            }
        }
    }
    p
}

/// KL(P || Q) and its gradient with respect to the embedding.
pub fn kl_divergence_and_gradient(p: &[f64], y: &[f64], n: usize, dims: usize) -> (f64, Vec<f64>) {
    // Student-t kernel weights w_ij = 1 / (1 + |y_i - y_j|²)
    let mut w = vec![0.0; n * n];
    let mut w_sum = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            let d: f64 = (0..dims)
                .map(|k| {
                    let diff = y[i * dims + k] - y[j * dims + k];
                    diff * diff
                })
                .sum();
            let wij = 1.0 / (1.0 + d);
            w[i * n + j] = wij;
            w[j * n + i] = wij;
            w_sum += 2.0 * wij;
        }
    }
    let w_sum = w_sum.max(MACHINE_EPSILON);

    let mut kl = 0.0;
    let mut grad = vec![0.0; n * dims];
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let pij = p[i * n + j];
            let qij = (w[i * n + j] / w_sum).max(MACHINE_EPSILON);
            kl += pij * (pij.max(MACHINE_EPSILON) / qij).ln();

            let coeff = 4.0 * (pij - qij) * w[i * n + j];
            for k in 0..dims {
                grad[i * dims + k] += coeff * (y[i * dims + k] - y[j * dims + k]);
            }
        }
    }
    (kl, grad)
}

/// Momentum and gains carried across the two optimization phases.
struct DescentState {
    update: Vec<f64>,
    gains: Vec<f64>,
}

impl DescentState {
    fn new(len: usize) -> Self {
        Self {
            update: vec![0.0; len],
            gains: vec![1.0; len],
        }
    }

    /// Iterate from `start` up to (excluding) `end`. Returns the last KL
    /// divergence and the iteration count reached.
    #[allow(clippy::too_many_arguments)]
    fn run(
        &mut self,
        p: &[f64],
        y: &mut [f64],
        n: usize,
        params: &TsneParams,
        start: usize,
        end: usize,
        momentum: f64,
        max_without_progress: usize,
    ) -> (f64, usize) {
        let mut best_error = f64::INFINITY;
        let mut best_iter = start;
        let mut error = f64::INFINITY;
        let mut i = start;

        while i < end {
            let (kl, mut grad) = kl_divergence_and_gradient(p, y, n, params.dims);
            error = kl;

            for k in 0..grad.len() {
                if self.update[k] * grad[k] < 0.0 {
                    self.gains[k] += 0.2;
                } else {
                    self.gains[k] *= 0.8;
                }
                self.gains[k] = self.gains[k].max(MIN_GAIN);
                grad[k] *= self.gains[k];
                self.update[k] = momentum * self.update[k] - params.learning_rate * grad[k];
                y[k] += self.update[k];
            }

            i += 1;
            if i % CHECK_EVERY == 0 {
                if error < best_error {
                    best_error = error;
                    best_iter = i;
                } else if i - best_iter > max_without_progress {
                    break;
                }
                let grad_norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
                if grad_norm <= MIN_GRAD_NORM {
                    break;
                }
            }
        }
        (error, i)
    }
}

/// Box-Muller draw from N(0, 1).
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
