//! Circuit-code interpreter.
//!
//! A circuit code is evaluated left to right as a stack machine over complex
//! impedances. The accumulator starts in series mode; `(` pushes it and
//! toggles the combination mode, `)` pops, toggles back and folds the inner
//! result into the outer accumulator. Characters outside the element
//! alphabet are skipped.
//!
//! Element impedances (`j` the imaginary unit, `w = 2*pi*f`):
//!
//! | Code | Element            | Params | Impedance                                |
//! |------|--------------------|--------|------------------------------------------|
//! | `r`  | Resistor           | 1      | `R`                                      |
//! | `c`  | Capacitor          | 1      | `1 / (jw C)`                             |
//! | `l`  | Inductor           | 1      | `jw L`                                   |
//! | `w`  | Infinite Warburg   | 1      | `1 / (sqrt(jw) Y)`                       |
//! | `q`  | CPE                | 2      | `1 / ((jw)^n Y)`                         |
//! | `o`  | Finite-length W.   | 2      | `tanh(sqrt(jw) B) / (sqrt(jw) Y)`        |
//! | `t`  | Finite-space W.    | 2      | `coth(sqrt(jw) B) / (sqrt(jw) Y)`        |
//! | `g`  | Gerischer          | 2      | `(k + jw)^-1/2 / Y`                      |
//! | `f`  | Fractal Gerischer  | 3      | `(k + jw)^-a / Y`                        |

use std::f64::consts::PI;

use num_complex::Complex64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Series,
    Parallel,
}

impl Mode {
    fn toggled(self) -> Mode {
        match self {
            Mode::Series => Mode::Parallel,
            Mode::Parallel => Mode::Series,
        }
    }
}

/// Evaluate the complex impedance of `code` at every frequency in `freqs`.
///
/// `params` must hold exactly [`parameter_arity`] values for `code`.
///
/// # Panics
///
/// Panics on unbalanced parentheses or a too-short parameter vector; both
/// are programmer errors, callers validate circuit code and arity up front.
pub fn circuit_impedance(code: &str, freqs: &[f64], params: &[f64]) -> Vec<Complex64> {
    freqs.iter().map(|&f| impedance_at(code, f, params)).collect()
}

fn impedance_at(code: &str, freq: f64, params: &[f64]) -> Complex64 {
    let w = 2.0 * PI * freq;
    let jw = Complex64::new(0.0, w);
    let zero = Complex64::new(0.0, 0.0);

    let mut mode = Mode::Series;
    let mut stack: Vec<Complex64> = Vec::new();
    let mut acc = zero;
    let mut i = 0usize;

    for ch in code.chars() {
        match ch {
            '(' => {
                stack.push(acc);
                acc = zero;
                mode = mode.toggled();
            }
            ')' => {
                let outer = stack.pop().expect("circuit: unbalanced ')'");
                mode = mode.toggled();
                acc = combine(outer, acc, mode);
            }
            'r' => {
                acc = combine(acc, Complex64::new(params[i], 0.0), mode);
                i += 1;
            }
            'c' => {
                acc = combine(acc, (jw * params[i]).inv(), mode);
                i += 1;
            }
            'l' => {
                acc = combine(acc, jw * params[i], mode);
                i += 1;
            }
            'w' => {
                acc = combine(acc, (jw.sqrt() * params[i]).inv(), mode);
                i += 1;
            }
            'q' => {
                acc = combine(acc, (jw.powf(params[i + 1]) * params[i]).inv(), mode);
                i += 2;
            }
            'o' => {
                let mut tanh = (jw.sqrt() * params[i + 1]).tanh();
                if tanh.is_nan() {
                    tanh = Complex64::new(1.0, 0.0);
                }
                acc = combine(acc, tanh / (jw.sqrt() * params[i]), mode);
                i += 2;
            }
            't' => {
                let coth = (jw.sqrt() * params[i + 1]).tanh().inv();
                acc = combine(acc, coth / (jw.sqrt() * params[i]), mode);
                i += 2;
            }
            'g' => {
                let z = (Complex64::new(params[i + 1], 0.0) + jw).powf(-0.5) / params[i];
                acc = combine(acc, z, mode);
                i += 2;
            }
            'f' => {
                let z = (Complex64::new(params[i + 1], 0.0) + jw).powf(-params[i + 2]) / params[i];
                acc = combine(acc, z, mode);
                i += 3;
            }
            _ => {}
        }
    }

    acc
}

/// Fold `b` into `a` under the given combination mode. In parallel mode a
/// zero impedance contributes zero admittance rather than dividing by zero.
fn combine(a: Complex64, b: Complex64, mode: Mode) -> Complex64 {
    match mode {
        Mode::Series => a + b,
        Mode::Parallel => {
            let zero = Complex64::new(0.0, 0.0);
            let ya = if a == zero { zero } else { a.inv() };
            let yb = if b == zero { zero } else { b.inv() };
            (ya + yb).inv()
        }
    }
}

/// Number of parameters `code` consumes.
pub fn parameter_arity(code: &str) -> usize {
    code.chars()
        .map(|ch| match ch {
            'r' | 'c' | 'l' | 'w' => 1,
            'q' | 'o' | 't' | 'g' => 2,
            'f' => 3,
            _ => 0,
        })
        .sum()
}

/// Flattened per-parameter tag sequence for `code`.
///
/// Single-parameter elements contribute their own letter; multi-parameter
/// elements contribute one tag per parameter (`q` -> `qy, qn`, `o` ->
/// `oy, ob`, `t` -> `ty, tb`, `g` -> `gy, gk`, `f` -> `fy, fk, fa`).
pub fn element_tags(code: &str) -> Vec<&'static str> {
    let mut tags = Vec::new();
    for ch in code.chars() {
        match ch {
            'r' => tags.push("r"),
            'c' => tags.push("c"),
            'l' => tags.push("l"),
            'w' => tags.push("w"),
            'q' => tags.extend(["qy", "qn"]),
            'o' => tags.extend(["oy", "ob"]),
            't' => tags.extend(["ty", "tb"]),
            'g' => tags.extend(["gy", "gk"]),
            'f' => tags.extend(["fy", "fk", "fa"]),
            _ => {}
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn close(a: Complex64, b: Complex64) {
        assert_relative_eq!(a.re, b.re, max_relative = 1e-12, epsilon = 1e-12);
        assert_relative_eq!(a.im, b.im, max_relative = 1e-12, epsilon = 1e-12);
    }

    #[test]
    fn resistor_is_frequency_independent() {
        let z = circuit_impedance("r", &[1.0, 10.0, 100.0], &[50.0]);
        for v in z {
            close(v, Complex64::new(50.0, 0.0));
        }
    }

    #[test]
    fn series_resistors_add() {
        let z = circuit_impedance("rr", &[1.0], &[50.0, 100.0]);
        close(z[0], Complex64::new(150.0, 0.0));
    }

    #[test]
    fn parallel_resistors_combine() {
        let z = circuit_impedance("(rr)", &[1.0], &[60.0, 30.0]);
        close(z[0], Complex64::new(20.0, 0.0));
    }

    #[test]
    fn capacitor_impedance() {
        let f = 100.0;
        let z = circuit_impedance("c", &[f], &[1e-6]);
        let w = 2.0 * PI * f;
        close(z[0], Complex64::new(0.0, -1.0 / (w * 1e-6)));
    }

    #[test]
    fn inductor_impedance() {
        let f = 100.0;
        let z = circuit_impedance("l", &[f], &[1e-3]);
        close(z[0], Complex64::new(0.0, 2.0 * PI * f * 1e-3));
    }

    #[test]
    fn cpe_with_unit_exponent_is_a_capacitor() {
        let freqs = [1.0, 10.0, 1000.0];
        let q = circuit_impedance("q", &freqs, &[1e-6, 1.0]);
        let c = circuit_impedance("c", &freqs, &[1e-6]);
        for (a, b) in q.iter().zip(&c) {
            close(*a, *b);
        }
    }

    #[test]
    fn randles_cell_matches_manual_combination() {
        let freqs = [1.0, 10.0, 100.0, 1000.0];
        let params = [50.0, 1e-6, 0.8, 100.0];
        let z = circuit_impedance("r(qr)", &freqs, &params);

        for (k, &f) in freqs.iter().enumerate() {
            let jw = Complex64::new(0.0, 2.0 * PI * f);
            let zq = (jw.powf(0.8) * 1e-6).inv();
            let zr2 = Complex64::new(100.0, 0.0);
            let expected = Complex64::new(50.0, 0.0) + (zq.inv() + zr2.inv()).inv();
            close(z[k], expected);
        }
    }

    #[test]
    fn warburg_has_equal_real_and_negative_imaginary_slope() {
        let f = 10.0;
        let z = circuit_impedance("w", &[f], &[1e-3]);
        // 1/(sqrt(jw) Y) with sqrt(jw) = sqrt(w/2)(1 + j)
        let a = (2.0 * PI * f / 2.0).sqrt();
        let expected = (Complex64::new(a, a) * 1e-3).inv();
        close(z[0], expected);
    }

    #[test]
    fn flw_tanh_overflow_falls_back_to_unity() {
        let f = 1.0;
        let z = circuit_impedance("o", &[f], &[1.0, f64::INFINITY]);
        let jw = Complex64::new(0.0, 2.0 * PI * f);
        let expected = Complex64::new(1.0, 0.0) / jw.sqrt();
        close(z[0], expected);
    }

    #[test]
    fn gerischer_at_zero_rate_matches_warburg_shape() {
        let f = 10.0;
        let z = circuit_impedance("g", &[f], &[2.0, 0.0]);
        let jw = Complex64::new(0.0, 2.0 * PI * f);
        close(z[0], jw.powf(-0.5) / 2.0);
    }

    #[test]
    fn unknown_characters_are_skipped() {
        let a = circuit_impedance("r-r", &[1.0], &[50.0, 100.0]);
        let b = circuit_impedance("rr", &[1.0], &[50.0, 100.0]);
        close(a[0], b[0]);
        assert_eq!(parameter_arity("r-x r"), 2);
    }

    #[test]
    fn arity_counts_per_element() {
        assert_eq!(parameter_arity("r"), 1);
        assert_eq!(parameter_arity("r(qr)"), 4);
        assert_eq!(parameter_arity("r(q(r(qr)))"), 7);
        assert_eq!(parameter_arity("of"), 5);
    }

    #[test]
    fn tags_flatten_multi_parameter_elements() {
        assert_eq!(element_tags("r(qr)"), vec!["r", "qy", "qn", "r"]);
        assert_eq!(element_tags("otgf"), vec!["oy", "ob", "ty", "tb", "gy", "gk", "fy", "fk", "fa"]);
    }
}
