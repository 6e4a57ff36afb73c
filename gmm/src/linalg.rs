//! Small dense linear algebra on packed lower-triangular matrices.
//!
//! Symmetric matrices are stored row-major as their lower triangle:
//! element `(i, j)` with `j <= i` lives at `i * (i + 1) / 2 + j`.

/// Returns the packed length of a symmetric `fd x fd` matrix.
#[inline]
pub fn packed_len(fd: usize) -> usize {
    fd * (fd + 1) / 2
}

/// Returns the packed index of element `(i, j)`; the order of `i` and `j`
/// does not matter.
#[inline]
pub fn packed_index(i: usize, j: usize) -> usize {
    let (r, c) = if i >= j { (i, j) } else { (j, i) };
    r * (r + 1) / 2 + c
}

/// Expands a packed symmetric matrix into a full row-major matrix.
pub fn unpack(packed: &[f64], fd: usize) -> Vec<Vec<f64>> {
    let mut m = vec![vec![0.0; fd]; fd];
    for i in 0..fd {
        for j in 0..=i {
            let v = packed[packed_index(i, j)];
            m[i][j] = v;
            m[j][i] = v;
        }
    }
    m
}

/// Packs the lower triangle of a full matrix.
pub fn pack(m: &[Vec<f64>]) -> Vec<f64> {
    let fd = m.len();
    let mut packed = Vec::with_capacity(packed_len(fd));
    for (i, row) in m.iter().enumerate() {
        packed.extend_from_slice(&row[..=i]);
    }
    packed
}

/// Cholesky factorisation `K = L Lᵗ` of a packed symmetric matrix.
///
/// Returns the packed lower factor, or `None` if `K` is not symmetric
/// positive definite (a non-positive or non-finite pivot).
pub fn cholesky(packed: &[f64], fd: usize) -> Option<Vec<f64>> {
    let mut l = vec![0.0; packed_len(fd)];
    for i in 0..fd {
        for j in 0..=i {
            let mut sum = packed[packed_index(i, j)];
            for k in 0..j {
                sum -= l[packed_index(i, k)] * l[packed_index(j, k)];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[packed_index(i, i)] = sum.sqrt();
            } else {
                l[packed_index(i, j)] = sum / l[packed_index(j, j)];
            }
        }
    }
    Some(l)
}

/// Numerically stable `ln(Σ exp(v))`.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Squared Euclidean distance.
#[inline]
pub fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Largest eigenvalue and its unit eigenvector of a symmetric matrix,
/// by power iteration.
pub fn principal_component(m: &[Vec<f64>]) -> (f64, Vec<f64>) {
    let fd = m.len();
    if fd == 0 {
        return (0.0, Vec::new());
    }
    let mut v = vec![1.0 / (fd as f64).sqrt(); fd];
    let mut lambda = 0.0;
    for _ in 0..200 {
        let mut w = vec![0.0; fd];
        for i in 0..fd {
            w[i] = m[i].iter().zip(&v).map(|(a, b)| a * b).sum();
        }
        let norm = w.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm < 1e-300 {
            // Start vector orthogonal to the range; fall back to the
            // axis of largest variance.
            let mut axis = 0;
            for i in 1..fd {
                if m[i][i] > m[axis][axis] {
                    axis = i;
                }
            }
            let mut e = vec![0.0; fd];
            e[axis] = 1.0;
            return (m[axis][axis].max(0.0), e);
        }
        w.iter_mut().for_each(|x| *x /= norm);
        let delta: f64 = w.iter().zip(&v).map(|(a, b)| (a - b).abs()).sum();
        v = w;
        lambda = norm;
        if delta < 1e-12 {
            break;
        }
    }
    (lambda, v)
}
