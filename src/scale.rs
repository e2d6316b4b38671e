//! Scale calculator: given a current size and policy, decide the target size.
//!
//! Ported from `calculateBytesToScaleTo` in the original Python implementation.
//! Pure and total: never panics, never performs I/O.

use tracing::debug;

/// Per-PVC (possibly annotation-overridden) sizing policy consumed by [`compute_target`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalePolicy {
    pub scale_up_percent: i64,
    pub min_increment: i64,
    pub max_increment: i64,
    pub max_size: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleOutcome {
    Target(i64),
    NoScale,
}

/// Compute the new target size in bytes, or report that no scale is possible.
///
/// Step order matters:
/// 1. apply percentage increase
/// 2. floor at min_increment
/// 3. ceiling at max_increment
/// 4. cap at max_size
/// 5. if unchanged, report NoScale
pub fn compute_target(original: i64, policy: &ScalePolicy) -> ScaleOutcome {
    let Some(bumped) = original.checked_mul(policy.scale_up_percent).and_then(|p| {
        let scaled = p as f64 / 100.0;
        original.checked_add(scaled.floor() as i64)
    }) else {
        debug!(original, "arithmetic overflow computing scale-up percent increase");
        return ScaleOutcome::NoScale;
    };

    let mut target = bumped;

    if target - original < policy.min_increment {
        target = original + policy.min_increment;
    }

    if target - original > policy.max_increment {
        target = original + policy.max_increment;
    }

    if target > policy.max_size {
        target = policy.max_size;
    }

    if target == original {
        debug!(original, "target equals original, no scale possible");
        return ScaleOutcome::NoScale;
    }

    debug!(original, target, "computed scale target");
    ScaleOutcome::Target(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(pct: i64, min: i64, max: i64, cap: i64) -> ScalePolicy {
        ScalePolicy {
            scale_up_percent: pct,
            min_increment: min,
            max_increment: max,
            max_size: cap,
        }
    }

    #[test]
    fn default_twenty_percent_growth() {
        let p = policy(20, 1_000_000_000, 16_000_000_000_000, 16_000_000_000_000);
        let out = compute_target(10_000_000_000, &p);
        assert_eq!(out, ScaleOutcome::Target(12_000_000_000));
    }

    #[test]
    fn below_min_increment_floors_to_min() {
        let p = policy(1, 1_000_000_000, 16_000_000_000_000, 16_000_000_000_000);
        let out = compute_target(1_000_000_000, &p);
        assert_eq!(out, ScaleOutcome::Target(2_000_000_000));
    }

    #[test]
    fn clamped_by_max_size() {
        let p = policy(50, 1_000_000_000, 16_000_000_000_000, 16_000_000_000_000);
        let out = compute_target(15_900_000_000_000, &p);
        assert_eq!(out, ScaleOutcome::Target(16_000_000_000_000));
    }

    #[test]
    fn already_at_max_yields_no_scale() {
        let p = policy(50, 1_000_000_000, 16_000_000_000_000, 16_000_000_000_000);
        let out = compute_target(16_000_000_000_000, &p);
        assert_eq!(out, ScaleOutcome::NoScale);
    }

    #[test]
    fn clamped_by_max_increment() {
        let p = policy(200, 1_000_000_000, 5_000_000_000, 16_000_000_000_000);
        let out = compute_target(10_000_000_000, &p);
        assert_eq!(out, ScaleOutcome::Target(15_000_000_000));
    }

    #[test]
    fn monotonic_in_original_size() {
        let p = policy(20, 1_000_000_000, 16_000_000_000_000, 16_000_000_000_000);
        let small = compute_target(5_000_000_000, &p);
        let big = compute_target(10_000_000_000, &p);
        let small_target = match small {
            ScaleOutcome::Target(t) => t,
            ScaleOutcome::NoScale => 5_000_000_000,
        };
        let big_target = match big {
            ScaleOutcome::Target(t) => t,
            ScaleOutcome::NoScale => 10_000_000_000,
        };
        assert!(big_target >= small_target);
    }
}
