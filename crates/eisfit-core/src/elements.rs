//! Post-fit per-element impedance rows for the webhook payload.
//!
//! Walks the flattened tag sequence of a circuit (see
//! [`element_tags`](crate::circuit::element_tags)) and evaluates each
//! element's standalone impedance at every frequency. The CPE is reported
//! as one combined `Q` row: the `qy` tag is suppressed and the `qn` tag
//! carries the full `1/(Y (jw)^n)` impedance. Diffusion-element tags have
//! no standalone report and produce zero rows. Non-finite components are
//! replaced by zero so the payload stays JSON-clean.

use std::f64::consts::PI;

use num_complex::Complex64;
use tracing::warn;

/// One circuit element's impedance at every requested frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementImpedance {
    /// Display name (`r`, `c`, `l`, `w`, `Q`, or the raw tag).
    pub name: String,
    /// `(real, imag)` pairs, one per frequency.
    pub impedances: Vec<(f64, f64)>,
}

/// Evaluate every element's standalone impedance over `freqs`.
///
/// `tags` is the flattened per-parameter tag list; tags beyond the length
/// of `params` are ignored.
pub fn element_impedances(freqs: &[f64], params: &[f64], tags: &[&str]) -> Vec<ElementImpedance> {
    let mut rows = Vec::new();

    for (i, &tag) in tags.iter().enumerate() {
        if i >= params.len() {
            break;
        }
        if tag == "qy" {
            continue;
        }

        let points = freqs
            .iter()
            .map(|&freq| {
                let w = 2.0 * PI * freq;
                sanitize(tag_impedance(tag, tags, params, i, w), tag, freq)
            })
            .collect();

        let name = if tag == "qn" { "Q".to_string() } else { tag.to_string() };
        rows.push(ElementImpedance { name, impedances: points });
    }

    rows
}

fn tag_impedance(tag: &str, tags: &[&str], params: &[f64], i: usize, w: f64) -> Complex64 {
    let zero = Complex64::new(0.0, 0.0);
    let jw = Complex64::new(0.0, w);
    let p = params[i];

    match tag {
        "r" => Complex64::new(p, 0.0),
        "c" => {
            if p != 0.0 {
                (jw * p).inv()
            } else {
                zero
            }
        }
        "l" => jw * p,
        "w" => {
            if p != 0.0 {
                (jw.sqrt() * p).inv()
            } else {
                zero
            }
        }
        "qn" => {
            // The preceding qy parameter is the CPE magnitude Y0.
            if i > 0 && tags[i - 1] == "qy" {
                let qy = params[i - 1];
                if qy != 0.0 {
                    return (jw.powf(p) * qy).inv();
                }
            }
            zero
        }
        _ => zero,
    }
}

fn sanitize(z: Complex64, tag: &str, freq: f64) -> (f64, f64) {
    let mut re = z.re;
    let mut im = z.im;
    if !re.is_finite() {
        warn!(element = tag, freq, value = re, "non-finite real element impedance, reporting 0.0");
        re = 0.0;
    }
    if !im.is_finite() {
        warn!(element = tag, freq, value = im, "non-finite imaginary element impedance, reporting 0.0");
        im = 0.0;
    }
    (re, im)
}
