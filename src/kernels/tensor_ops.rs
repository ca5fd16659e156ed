//! Dense tensor primitives on `[tokens, d]` hidden states.
//!
//! Plain ndarray reference kernels. Matrix products go through `Array2::dot`.

use ndarray::{Array1, Array2, Axis};

/// Row-wise layer norm with a learned scale.
pub fn layer_norm(x: &Array2<f32>, weight: &Array1<f32>, eps: f32) -> Array2<f32> {
    let mut out = x.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let n = row.len();
        if n == 0 {
            continue;
        }
        let mean = row.sum() / n as f32;
        let var = row.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / n as f32;
        let inv = 1.0 / (var + eps).sqrt();
        for (v, &w) in row.iter_mut().zip(weight.iter()) {
            *v = (*v - mean) * inv * w;
        }
    }
    out
}

/// In-place softmax over each row, max-subtracted.
///
/// A row whose exponentials sum to zero (all `-inf`) becomes uniform.
pub fn softmax_rows(x: &mut Array2<f32>) {
    for mut row in x.axis_iter_mut(Axis(0)) {
        let n = row.len();
        if n == 0 {
            continue;
        }
        let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let max_val = if max_val.is_finite() { max_val } else { 0.0 };
        row.mapv_inplace(|v| (v - max_val).exp());
        let sum = row.sum();
        if sum > 0.0 && sum.is_finite() {
            row.mapv_inplace(|v| v / sum);
        } else {
            row.fill(1.0 / n as f32);
        }
    }
}

pub fn relu(x: f32) -> f32 {
    x.max(0.0)
}
