/// Intercept and slope of an ordinary-least-squares fit of `y` on `x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub alpha: f64,
    pub beta: f64,
}

impl LinearFit {
    pub fn residual(&self, x: f64, y: f64) -> f64 {
        y - self.alpha - self.beta * x
    }
}

const VAR_EPSILON: f64 = 1e-12;

/// OLS with intercept. `None` when fewer than two points or `x` has no variance.
pub fn ols(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    for i in 0..n {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
    }
    if var_x.abs() < VAR_EPSILON {
        return None;
    }
    let beta = cov / var_x;
    Some(LinearFit {
        alpha: mean_y - beta * mean_x,
        beta,
    })
}

/// OLS without intercept (regression through the origin).
pub fn ols_through_origin(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    let n = x.len().min(y.len());
    if n < 1 {
        return None;
    }
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for i in 0..n {
        sxy += x[i] * y[i];
        sxx += x[i] * x[i];
    }
    if sxx.abs() < VAR_EPSILON {
        return None;
    }
    Some(LinearFit {
        alpha: 0.0,
        beta: sxy / sxx,
    })
}

/// Mean and sample standard deviation (n - 1). `None` for fewer than two values
/// or when any value is NaN.
pub fn mean_std(window: &[f64]) -> Option<(f64, f64)> {
    if window.len() < 2 || window.iter().any(|v| v.is_nan()) {
        return None;
    }
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    let var = window
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / (window.len() - 1) as f64;
    Some((mean, var.sqrt()))
}

/// Standardised deviation of the last value in `window`, NaN when undefined.
pub fn zscore_of_last(window: &[f64]) -> f64 {
    let Some(&latest) = window.last() else {
        return f64::NAN;
    };
    match mean_std(window) {
        Some((mean, std)) if std > 0.0 => (latest - mean) / std,
        _ => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ols_recovers_exact_line() {
        let x: Vec<f64> = (0..50).map(|i| 10.0 + i as f64 * 0.7).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 5.0).collect();
        let fit = ols(&x, &y).unwrap();
        assert!((fit.beta - 2.0).abs() < 1e-9);
        assert!((fit.alpha - 5.0).abs() < 1e-9);
        assert!(fit.residual(x[3], y[3]).abs() < 1e-9);
    }

    #[test]
    fn ols_rejects_constant_regressor() {
        assert_eq!(ols(&[3.0, 3.0, 3.0], &[1.0, 2.0, 3.0]), None);
        assert_eq!(ols(&[1.0], &[1.0]), None);
    }

    #[test]
    fn origin_fit_has_no_intercept() {
        let fit = ols_through_origin(&[1.0, 2.0, 3.0], &[3.0, 6.0, 9.0]).unwrap();
        assert_eq!(fit.alpha, 0.0);
        assert!((fit.beta - 3.0).abs() < 1e-12);
    }

    #[test]
    fn mean_std_uses_sample_deviation() {
        let (mean, std) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((mean - 5.0).abs() < 1e-12);
        assert!((std - (32.0_f64 / 7.0).sqrt()).abs() < 1e-12);
        assert_eq!(mean_std(&[1.0]), None);
        assert_eq!(mean_std(&[1.0, f64::NAN]), None);
    }

    #[test]
    fn zscore_is_nan_for_flat_window() {
        assert!(zscore_of_last(&[1.0, 1.0, 1.0]).is_nan());
        assert!(zscore_of_last(&[]).is_nan());
        let z = zscore_of_last(&[1.0, 2.0, 3.0]);
        assert!((z - 1.0).abs() < 1e-12);
    }
}
