//! # Utils — Numeric Primitives and Formatting
//!
//! Shared math used by every online test and by the coordinator's heartbeat
//! output: the inverse normal CDF (for threshold derivation), the binomial
//! acceptance region for APT, the RCT cutoff, and small formatting helpers
//! for throughput and timestamps.

use anyhow::{bail, Result};
use chrono::Utc;

/// Inverse CDF of the standard normal distribution via Acklam's rational
/// approximation (relative error <= 1e-9 for `p` in `[1e-300, 1 - 1e-16]`).
///
/// `p == 0.0` and `p == 1.0` map to `-inf`/`+inf`; any other value outside
/// `(0, 1)` is an error.
pub fn inv_norm_cdf(p: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&p) {
        bail!("p must be in [0,1], got {p}");
    }
    if p == 0.0 {
        return Ok(f64::NEG_INFINITY);
    }
    if p == 1.0 {
        return Ok(f64::INFINITY);
    }

    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];

    const P_LOW: f64 = 0.02425;
    const P_HIGH: f64 = 1.0 - P_LOW;

    let x = if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        let num = (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q) + C[5];
        let den = (((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0;
        num / den
    } else if p > P_HIGH {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        let num = (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q) + C[5];
        let den = (((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0;
        -num / den
    } else {
        let q = p - 0.5;
        let r = q * q;
        let num = (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q;
        let den = ((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0;
        num / den
    };
    Ok(x)
}

/// Two-sided binomial(n, 0.5) acceptance region via normal approximation
/// with continuity correction. Returns inclusive `(lo, hi)` bounds on the
/// count of ones within a window of `n` bits.
pub fn apt_bounds(n: u64, alpha: f64) -> Result<(u64, u64)> {
    if n == 0 {
        bail!("n must be > 0");
    }
    if !(0.0 < alpha && alpha < 1.0) {
        bail!("alpha must be in (0,1), got {alpha}");
    }
    let n_f = n as f64;
    let mu = n_f / 2.0;
    let sigma = (n_f / 4.0).sqrt();
    let z = inv_norm_cdf(1.0 - alpha / 2.0)?;
    let lo = (mu - z * sigma - 0.5).ceil();
    let hi = (mu + z * sigma + 0.5).floor();
    let lo = lo.max(0.0) as u64;
    let hi = (hi.min(n_f) as u64).min(n);
    Ok((lo, hi))
}

/// Smallest run length `r` such that `(1/2)^r <= alpha`, i.e.
/// `ceil(log2(1/alpha))`, floored at 8.
pub fn rct_cutoff(alpha: f64) -> Result<u32> {
    if !(0.0 < alpha && alpha < 1.0) {
        bail!("alpha must be in (0,1), got {alpha}");
    }
    let r = (alpha.ln() / 0.5_f64.ln()).ceil() as i64;
    Ok(r.max(8) as u32)
}

/// Human-readable throughput: `bps`, `Kbps`, `Mbps`, `Gbps`, thousands-grouped.
pub fn human_bps(bps: f64) -> String {
    if !bps.is_finite() {
        return "n/a".to_string();
    }
    const UNITS: [&str; 4] = ["bps", "Kbps", "Mbps", "Gbps"];
    let mut value = bps;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Current wall-clock time as an ISO-8601 UTC string, for event records.
pub fn iso_now() -> String {
    Utc::now().to_rfc3339()
}
