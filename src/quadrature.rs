//! Composite trapezoidal rule
//!
//! The kernel every task runs: integrate `f` over `[a, b]` with `n` equal
//! panels. It is pure and does no I/O, so the same function serves the local
//! executor and remote worker nodes.

/// Evaluation failure at a specific sample point
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{source} at x = {x}")]
pub struct SampleError<E: std::error::Error + 'static> {
    pub x: f64,
    pub source: E,
}

/// Integrate `f` over `[a, b]` using `n` trapezoid panels
///
/// Returns `0.0` without evaluating `f` when `n == 0` or when the interval is
/// empty (`a == b`). The first failing evaluation aborts the panel sum.
///
/// Each panel contributes `(f(x_i) + f(x_{i+1})) / 2 * step` in index order.
/// Interior samples are shared between neighbouring panels, so `f` is
/// evaluated `n + 1` times.
pub fn trapezoid<F, E>(mut f: F, a: f64, b: f64, n: u64) -> Result<f64, SampleError<E>>
where
    F: FnMut(f64) -> Result<f64, E>,
    E: std::error::Error + 'static,
{
    if n == 0 || a == b {
        return Ok(0.0);
    }

    let step = (b - a) / n as f64;
    let mut sample = |x: f64| f(x).map_err(|source| SampleError { x, source });

    let mut total = 0.0;
    let mut left = sample(a)?;
    for i in 0..n {
        let right = sample(a + (i + 1) as f64 * step)?;
        total += (left + right) / 2.0 * step;
        left = right;
    }

    Ok(total)
}
