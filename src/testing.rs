//! Helpers for regression tests that compare scalar diagnostics against
//! recorded values

/// Compare a computed diagnostic against a recorded value within an absolute
/// tolerance, printing a verdict line either way
///
/// Returns whether the comparison succeeded, so callers can collect several
/// checks before asserting.
pub fn test_value(actual: f64, expected: f64, name: &str, abs_tolerance: f64) -> bool {
    let delta = (actual - expected).abs();
    if delta <= abs_tolerance {
        println!("Success! {}: {} (recorded {})", name, actual, expected);
        true
    } else {
        println!(
            "Failure! {}: {} differs from recorded {} by {:.3e} (tolerance {:.3e})",
            name, actual, expected, delta, abs_tolerance
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdicts_respect_the_tolerance() {
        assert!(test_value(1.0001, 1.0, "close", 1e-3));
        assert!(!test_value(1.1, 1.0, "far", 1e-3));
    }
}
