//! Weighted chi-square objective.

use num_complex::Complex64;

use crate::types::Weighting;

/// Chi-square between observed and calculated impedance sequences,
/// normalized by the number of points.
///
/// With [`Weighting::Modulus`] each squared residual is divided by the
/// squared modulus of the observed point; zero-modulus points contribute
/// unweighted.
///
/// # Panics
///
/// Panics when the sequences have different lengths; callers enforce equal
/// lengths at the job boundary.
pub fn chi_square(observed: &[Complex64], calculated: &[Complex64], weighting: Weighting) -> f64 {
    assert_eq!(
        observed.len(),
        calculated.len(),
        "chi_square: observed and calculated lengths differ"
    );

    let mut sum = 0.0;
    for (o, c) in observed.iter().zip(calculated) {
        let d2 = (o.re - c.re).powi(2) + (o.im - c.im).powi(2);
        sum += match weighting {
            Weighting::Unity => d2,
            Weighting::Modulus => {
                let w2 = o.norm_sqr();
                if w2 > 0.0 {
                    d2 / w2
                } else {
                    d2
                }
            }
        };
    }
    sum / observed.len() as f64
}
