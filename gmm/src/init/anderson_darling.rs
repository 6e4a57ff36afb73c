/// Standard normal cumulative distribution function.
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

// Abramowitz & Stegun 7.1.26, max error < 1.5e-7.
fn erfc(x: f64) -> f64 {
    if x < 0.0 {
        return 2.0 - erfc(-x);
    }
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    poly * (-x * x).exp()
}

/// Anderson-Darling normality statistic with the small-sample correction
/// `A*² = A²(1 + 0.75/n + 2.25/n²)`.
///
/// The samples are standardised with their own mean and standard
/// deviation. Returns 0 for fewer than two samples or zero spread.
pub fn anderson_darling(samples: &[f64]) -> f64 {
    let n = samples.len();
    if n < 2 {
        return 0.0;
    }
    let nf = n as f64;
    let mean = samples.iter().sum::<f64>() / nf;
    let var = samples.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / (nf - 1.0);
    let std = var.sqrt();
    if std <= 0.0 || !std.is_finite() {
        return 0.0;
    }

    let mut z: Vec<f64> = samples.iter().map(|x| (x - mean) / std).collect();
    z.sort_by(|a, b| a.total_cmp(b));

    const EPS: f64 = 1e-15;
    let mut s = 0.0;
    for i in 0..n {
        let lo = normal_cdf(z[i]).clamp(EPS, 1.0 - EPS);
        let hi = normal_cdf(z[n - 1 - i]).clamp(EPS, 1.0 - EPS);
        s += (2 * i + 1) as f64 * (lo.ln() + (1.0 - hi).ln());
    }
    let a2 = -nf - s / nf;
    a2 * (1.0 + 0.75 / nf + 2.25 / (nf * nf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_cdf() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 1e-3);
    }

    fn probit(p: f64) -> f64 {
        let (mut lo, mut hi) = (-10.0, 10.0);
        for _ in 0..100 {
            let mid = 0.5 * (lo + hi);
            if normal_cdf(mid) < p {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        0.5 * (lo + hi)
    }

    #[test]
    fn test_bimodal_scores_higher_than_normal_like() {
        // Normal quantiles versus two far-apart clumps.
        let normalish: Vec<f64> = (1..100).map(|i| probit(i as f64 / 100.0)).collect();
        let bimodal: Vec<f64> = (0..100)
            .map(|i| (if i % 2 == 0 { -5.0 } else { 5.0 }) + i as f64 * 1e-3)
            .collect();
        let a = anderson_darling(&normalish);
        let b = anderson_darling(&bimodal);
        assert!(a < 1.0, "normal-like sample scored {a}");
        assert!(b > 5.0, "bimodal sample scored {b}");
    }

    #[test]
    fn test_degenerate_input() {
        assert_eq!(anderson_darling(&[]), 0.0);
        assert_eq!(anderson_darling(&[3.0, 3.0, 3.0]), 0.0);
    }
}
