/// Recursion limit for [`adaptive_simpson`]; deeper intervals accept their estimate.
const MAX_DEPTH: u32 = 48;

/// Integrates `f` over `[a, b]` with adaptive Simpson quadrature to an
/// absolute tolerance.
pub fn adaptive_simpson<F>(f: F, a: f64, b: f64, tolerance: f64) -> f64
where
    F: Fn(f64) -> f64,
{
    if a == b {
        return 0.0;
    }
    let fa = f(a);
    let fb = f(b);
    let m = 0.5 * (a + b);
    let fm = f(m);
    let whole = simpson(a, b, fa, fm, fb);
    refine(&f, a, b, fa, fm, fb, whole, tolerance, MAX_DEPTH)
}

fn simpson(a: f64, b: f64, fa: f64, fm: f64, fb: f64) -> f64 {
    (b - a) / 6.0 * (fa + 4.0 * fm + fb)
}

#[allow(clippy::too_many_arguments)]
fn refine<F>(
    f: &F,
    a: f64,
    b: f64,
    fa: f64,
    fm: f64,
    fb: f64,
    whole: f64,
    tolerance: f64,
    depth: u32,
) -> f64
where
    F: Fn(f64) -> f64,
{
    let m = 0.5 * (a + b);
    let lm = 0.5 * (a + m);
    let rm = 0.5 * (m + b);
    let flm = f(lm);
    let frm = f(rm);
    let left = simpson(a, m, fa, flm, fm);
    let right = simpson(m, b, fm, frm, fb);
    let delta = left + right - whole;

    if depth == 0 || delta.abs() <= 15.0 * tolerance {
        return left + right + delta / 15.0;
    }
    refine(f, a, m, fa, flm, fm, left, 0.5 * tolerance, depth - 1)
        + refine(f, m, b, fm, frm, fb, right, 0.5 * tolerance, depth - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn integrates_polynomial_exactly() {
        let value = adaptive_simpson(|x| 3.0 * x * x, 0.0, 2.0, 1e-10);
        assert_abs_diff_eq!(value, 8.0, epsilon = 1e-12);
    }

    #[test]
    fn resolves_sharp_inverse_square() {
        // ∫ dx / (x² + h²) over [-L, L] = 2/h · atan(L/h)
        let h: f64 = 5.0;
        let l: f64 = 400.0;
        let value = adaptive_simpson(|x| 1.0 / (x * x + h * h), -l, l, 1e-10);
        assert_abs_diff_eq!(value, 2.0 / h * (l / h).atan(), epsilon = 1e-8);
    }

    #[test]
    fn empty_interval_is_zero() {
        assert_eq!(adaptive_simpson(|x| x, 1.0, 1.0, 1e-8), 0.0);
    }
}
