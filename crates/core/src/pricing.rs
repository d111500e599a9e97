//! Credit pricing and duration estimation: constants, types, and pure
//! logic.
//!
//! The cost computed here is, by construction, the exact amount the
//! ledger is asked to reserve at submission: the coordinator calls
//! [`cost_for`] once and threads the result through reservation and the
//! job row. There is no second pricing code path.

use crate::job::{GenerationParams, JobKind, Resolution};

// ---------------------------------------------------------------------------
// Pricing table
// ---------------------------------------------------------------------------

/// Base credit cost per duration unit, by job kind.
pub const BASE_COST_IMAGE_TO_VIDEO: i64 = 4;
pub const BASE_COST_TEXT_TO_VIDEO: i64 = 5;
pub const BASE_COST_STORYBOARD: i64 = 2;
pub const BASE_COST_SUGGESTION: i64 = 1;

/// Resolution multipliers, in tenths (Sd480 = ×1.0, Hd720 = ×1.5,
/// Hd1080 = ×2.0). Integer arithmetic keeps the table exact.
pub const RESOLUTION_MULT_TENTHS_SD480: i64 = 10;
pub const RESOLUTION_MULT_TENTHS_HD720: i64 = 15;
pub const RESOLUTION_MULT_TENTHS_HD1080: i64 = 20;

/// Seconds of output covered by one duration unit.
pub const SECS_PER_DURATION_UNIT: i64 = 5;

/// GPU seconds the fleet needs per second of Sd480 output, by kind.
/// Used only for the user-facing time estimate, never for billing.
pub const GPU_SECS_PER_OUTPUT_SEC_VIDEO: i64 = 12;
pub const GPU_SECS_PER_OUTPUT_SEC_STORYBOARD: i64 = 4;
pub const GPU_SECS_FLAT_SUGGESTION: i64 = 10;

// ---------------------------------------------------------------------------
// Cost
// ---------------------------------------------------------------------------

/// Base cost per duration unit for a job kind.
pub fn base_cost(kind: JobKind) -> i64 {
    match kind {
        JobKind::ImageToVideo => BASE_COST_IMAGE_TO_VIDEO,
        JobKind::TextToVideo => BASE_COST_TEXT_TO_VIDEO,
        JobKind::Storyboard => BASE_COST_STORYBOARD,
        JobKind::Suggestion => BASE_COST_SUGGESTION,
    }
}

/// Resolution multiplier in tenths.
pub fn resolution_mult_tenths(resolution: Resolution) -> i64 {
    match resolution {
        Resolution::Sd480 => RESOLUTION_MULT_TENTHS_SD480,
        Resolution::Hd720 => RESOLUTION_MULT_TENTHS_HD720,
        Resolution::Hd1080 => RESOLUTION_MULT_TENTHS_HD1080,
    }
}

/// Number of duration units a request spans (ceiling division, so a
/// 6-second clip is billed as two 5-second units).
pub fn duration_units(duration_secs: i64) -> i64 {
    duration_secs.div_ceil(SECS_PER_DURATION_UNIT).max(1)
}

/// Credits a request will consume.
///
/// `base × units × resolution multiplier`, rounded up so a request is
/// never billed below the table rate.
pub fn cost_for(kind: JobKind, params: &GenerationParams) -> i64 {
    let units = duration_units(params.duration_secs);
    let raw = base_cost(kind) * units * resolution_mult_tenths(params.resolution);
    raw.div_ceil(10)
}

// ---------------------------------------------------------------------------
// Duration estimate
// ---------------------------------------------------------------------------

/// Estimated wall-clock seconds until the provider finishes, derived
/// from the same inputs as the cost. Advisory only.
pub fn estimate_secs(kind: JobKind, params: &GenerationParams) -> i64 {
    let scale = resolution_mult_tenths(params.resolution);
    match kind {
        JobKind::ImageToVideo | JobKind::TextToVideo => {
            params.duration_secs * GPU_SECS_PER_OUTPUT_SEC_VIDEO * scale / 10
        }
        JobKind::Storyboard => params.duration_secs * GPU_SECS_PER_OUTPUT_SEC_STORYBOARD * scale / 10,
        JobKind::Suggestion => GPU_SECS_FLAT_SUGGESTION,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Resolution;

    fn params(duration_secs: i64, resolution: Resolution) -> GenerationParams {
        GenerationParams {
            prompt: "p".into(),
            source_image: Some("img".into()),
            duration_secs,
            resolution,
            style_flags: vec![],
        }
    }

    #[test]
    fn duration_units_rounds_up() {
        assert_eq!(duration_units(1), 1);
        assert_eq!(duration_units(5), 1);
        assert_eq!(duration_units(6), 2);
        assert_eq!(duration_units(10), 2);
        assert_eq!(duration_units(11), 3);
    }

    #[test]
    fn cost_matrix_is_exact() {
        // One unit at every (kind, resolution) pair. base × multiplier,
        // ceil to whole credits.
        let expected: &[(JobKind, Resolution, i64)] = &[
            (JobKind::ImageToVideo, Resolution::Sd480, 4),
            (JobKind::ImageToVideo, Resolution::Hd720, 6),
            (JobKind::ImageToVideo, Resolution::Hd1080, 8),
            (JobKind::TextToVideo, Resolution::Sd480, 5),
            (JobKind::TextToVideo, Resolution::Hd720, 8), // 7.5 rounds up
            (JobKind::TextToVideo, Resolution::Hd1080, 10),
            (JobKind::Storyboard, Resolution::Sd480, 2),
            (JobKind::Storyboard, Resolution::Hd720, 3),
            (JobKind::Storyboard, Resolution::Hd1080, 4),
            (JobKind::Suggestion, Resolution::Sd480, 1),
            (JobKind::Suggestion, Resolution::Hd720, 2), // 1.5 rounds up
            (JobKind::Suggestion, Resolution::Hd1080, 2),
        ];
        for &(kind, resolution, cost) in expected {
            assert_eq!(
                cost_for(kind, &params(5, resolution)),
                cost,
                "kind={kind:?} resolution={resolution:?}"
            );
        }
    }

    #[test]
    fn cost_scales_linearly_with_units() {
        let one = cost_for(JobKind::TextToVideo, &params(5, Resolution::Sd480));
        let three = cost_for(JobKind::TextToVideo, &params(15, Resolution::Sd480));
        assert_eq!(three, one * 3);
    }

    #[test]
    fn cost_is_positive_for_every_combination() {
        for kind in JobKind::ALL {
            for resolution in Resolution::ALL {
                assert!(cost_for(kind, &params(1, resolution)) >= 1);
            }
        }
    }

    #[test]
    fn estimate_scales_with_resolution() {
        let sd = estimate_secs(JobKind::TextToVideo, &params(10, Resolution::Sd480));
        let hd = estimate_secs(JobKind::TextToVideo, &params(10, Resolution::Hd1080));
        assert_eq!(sd, 120);
        assert_eq!(hd, 240);
    }

    #[test]
    fn suggestion_estimate_is_flat() {
        let short = estimate_secs(JobKind::Suggestion, &params(1, Resolution::Sd480));
        let long = estimate_secs(JobKind::Suggestion, &params(60, Resolution::Hd1080));
        assert_eq!(short, long);
    }
}
