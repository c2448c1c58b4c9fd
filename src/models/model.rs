//! Model evaluation for periodic two- and three-point correlators.
//!
//! Time arguments are `f64` so the same functions evaluate fitted curves on
//! dense grids; `t_ext` is the lattice time extent `T`.

/// Periodic single exponential `e^{-Et} + e^{-E(T-t)}`.
fn cosh_pair(t: f64, t_ext: usize, e: f64) -> f64 {
    (-e * t).exp() + (-e * (t_ext as f64 - t)).exp()
}

/// `G * (e^{-Et} + e^{-E(T-t)})`.
pub fn one_state_twop(t: f64, t_ext: usize, g: f64, e: f64) -> f64 {
    g * cosh_pair(t, t_ext, e)
}

/// Ground plus first excited state of a periodic two-point function.
pub fn two_state_twop(t: f64, t_ext: usize, c0: f64, c1: f64, e0: f64, e1: f64) -> f64 {
    c0 * cosh_pair(t, t_ext, e0) + c1 * cosh_pair(t, t_ext, e1)
}

/// Symmetric effective mass of a two-state correlator with `c = c1/c0`.
///
/// Evaluates the cosh effective-mass formula on `two_state_twop(1, c, E0, E1)`
/// at `t ± 1`, referenced to the midpoint `T/2`. Returns `NaN` where the
/// square roots go negative.
pub fn two_state_meff(t: f64, t_ext: usize, c: f64, e0: f64, e1: f64) -> f64 {
    let half = two_state_twop((t_ext / 2) as f64, t_ext, 1.0, c, e0, e1);
    let prev = two_state_twop(t - 1.0, t_ext, 1.0, c, e0, e1);
    let next = two_state_twop(t + 1.0, t_ext, 1.0, c, e0, e1);
    sym_meff(prev, next, half)
}

/// `0.5 * ln[(C₋ + sqrt(C₋² - C½²)) / (C₊ + sqrt(C₊² - C½²))]`.
pub fn sym_meff(prev: f64, next: f64, half: f64) -> f64 {
    let num = prev + (prev * prev - half * half).sqrt();
    let den = next + (next * next - half * half).sqrt();
    0.5 * (num / den).ln()
}

/// Two-state three-point function at insertion time `ti` and sink `tsink`.
///
/// Insertions at or past the sink wrap around the periodic time axis.
#[allow(clippy::too_many_arguments)]
pub fn two_state_threep(
    ti: f64,
    tsink: usize,
    t_ext: usize,
    a00: f64,
    a01: f64,
    a11: f64,
    e0: f64,
    e1: f64,
) -> f64 {
    let ts = tsink as f64;
    if ti < ts {
        a00 * (-e0 * ts).exp()
            + a01 * (-e0 * (ts - ti) - e1 * ti).exp()
            + a01 * (-e1 * (ts - ti) - e0 * ti).exp()
            + a11 * (-e1 * ts).exp()
    } else {
        let big_t = t_ext as f64;
        a00 * (-e0 * (big_t - ts)).exp()
            + a01 * (-e0 * (big_t - ti) - e1 * (ti - ts)).exp()
            + a01 * (-e1 * (big_t - ti) - e0 * (ti - ts)).exp()
            + a11 * (-e1 * (big_t - ts)).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn one_state_is_symmetric_about_half_extent() {
        let t_ext = 32;
        for t in 0..=16 {
            let a = one_state_twop(t as f64, t_ext, 0.05, 0.3);
            let b = one_state_twop((t_ext - t) as f64, t_ext, 0.05, 0.3);
            assert_relative_eq!(a, b, max_relative = 1e-14);
        }
    }

    #[test]
    fn two_state_reduces_to_one_state() {
        let a = two_state_twop(5.0, 32, 0.05, 0.0, 0.3, 1.0);
        assert_relative_eq!(a, one_state_twop(5.0, 32, 0.05, 0.3));
    }

    #[test]
    fn meff_of_single_state_is_the_energy() {
        // With c = 0 the cosh effective mass is exact.
        for t in 1..15 {
            assert_relative_eq!(two_state_meff(t as f64, 32, 0.0, 0.42, 1.3), 0.42, epsilon = 1e-10);
        }
        // An excited state pulls the early-time effective mass up.
        assert!(two_state_meff(2.0, 32, 0.5, 0.42, 1.3) > 0.42);
    }

    #[test]
    fn threep_wraps_past_the_sink() {
        let t_ext = 48;
        let inside = two_state_threep(3.0, 12, t_ext, 1.0, 0.2, 0.1, 0.5, 1.0);
        let expected = (-0.5f64 * 12.0).exp()
            + 0.2 * (-0.5f64 * 9.0 - 3.0).exp()
            + 0.2 * (-9.0f64 - 0.5 * 3.0).exp()
            + 0.1 * (-12.0f64).exp();
        assert_relative_eq!(inside, expected, max_relative = 1e-14);

        let past = two_state_threep(20.0, 12, t_ext, 1.0, 0.0, 0.0, 0.5, 1.0);
        assert_relative_eq!(past, (-0.5f64 * 36.0).exp(), max_relative = 1e-14);
    }
}
