//! Property-based tests for biasguard's statistical primitives.
//!
//! # How to run
//!
//! ```bash
//! cargo test --test property_tests
//! PROPTEST_CASES=10000 cargo test --test property_tests
//! ```

use biasguard::online_tests::{Apt, OnlineTest, Rct};
use biasguard::utils::{apt_bounds, inv_norm_cdf, rct_cutoff};
use proptest::prelude::*;

proptest! {
    /// `inv_norm_cdf` must be monotonically increasing on (0,1): a larger
    /// tail probability always yields a larger (or equal) quantile.
    #[test]
    fn prop_inv_norm_cdf_monotonic(a in 0.001f64..0.499, b in 0.5f64..0.999) {
        let qa = inv_norm_cdf(a).unwrap();
        let qb = inv_norm_cdf(b).unwrap();
        prop_assert!(qa < qb);
    }

    /// The quantile for p and 1-p must be negatives of each other (the
    /// standard normal is symmetric about 0).
    #[test]
    fn prop_inv_norm_cdf_symmetric(p in 0.001f64..0.5) {
        let q_lo = inv_norm_cdf(p).unwrap();
        let q_hi = inv_norm_cdf(1.0 - p).unwrap();
        prop_assert!((q_lo + q_hi).abs() < 1e-6);
    }

    /// `apt_bounds` must always return lo <= hi, and both within [0, n].
    #[test]
    fn prop_apt_bounds_well_formed(n in 8u64..100_000, alpha in 1e-9f64..0.4) {
        let (lo, hi) = apt_bounds(n, alpha).unwrap();
        prop_assert!(lo <= hi);
        prop_assert!(hi <= n);
    }

    /// A smaller alpha (stricter false-positive rate) must never produce a
    /// narrower acceptance region than a larger alpha.
    #[test]
    fn prop_apt_bounds_widen_as_alpha_shrinks(n in 64u64..10_000, alpha_big in 1e-3f64..0.3) {
        let alpha_small = alpha_big / 100.0;
        let (lo_big, hi_big) = apt_bounds(n, alpha_big).unwrap();
        let (lo_small, hi_small) = apt_bounds(n, alpha_small).unwrap();
        prop_assert!(lo_small <= lo_big);
        prop_assert!(hi_small >= hi_big);
    }

    /// `rct_cutoff` must never go below the floor of 8, for any valid alpha.
    #[test]
    fn prop_rct_cutoff_floored_at_8(alpha in 1e-12f64..0.999) {
        let cutoff = rct_cutoff(alpha).unwrap();
        prop_assert!(cutoff >= 8);
    }

    /// APT's running `ones` count must always equal the sum of its internal
    /// buffer, for any bit sequence.
    #[test]
    fn prop_apt_ones_matches_buffer_sum(bits in prop::collection::vec(0u8..=1, 1..500)) {
        let mut apt = Apt::new(32, 1e-3).unwrap();
        for &b in &bits {
            apt.update(b);
        }
        let expected: u64 = bits.iter().rev().take(32).map(|&b| b as u64).sum();
        prop_assert_eq!(apt.ones, expected);
    }

    /// RCT's run length must never exceed the length of the current run of
    /// identical bits at the tail of the stream.
    #[test]
    fn prop_rct_run_len_matches_tail_run(bits in prop::collection::vec(0u8..=1, 1..500)) {
        let mut rct = Rct::new(1e-3).unwrap();
        for &b in &bits {
            rct.update(b);
        }
        let last = *bits.last().unwrap();
        let expected = bits.iter().rev().take_while(|&&b| b == last).count() as u64;
        prop_assert_eq!(rct.run_len, expected);
    }
}
