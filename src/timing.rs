//! Tick↔second conversion, parameterized by tempo (µs per beat) and
//! resolution (ticks per beat). Callers supply both from the loaded sequence.

/// Fallback tempo when a score carries no tempo event: 120 BPM.
pub const DEFAULT_TEMPO: u32 = 500_000;

/// Fallback resolution for scores with non-metrical timing.
pub const DEFAULT_TICKS_PER_BEAT: u16 = 480;

/// Convert a tick count to wall-clock seconds.
pub fn ticks_to_seconds(ticks: u64, tempo: u32, ticks_per_beat: u16) -> f64 {
    ticks as f64 * tempo as f64 / (ticks_per_beat as f64 * 1_000_000.0)
}

/// Convert seconds to the nearest integer tick. Inverse of
/// [`ticks_to_seconds`] up to rounding; negative input clamps to 0.
pub fn seconds_to_ticks(seconds: f64, tempo: u32, ticks_per_beat: u16) -> u64 {
    (seconds * ticks_per_beat as f64 * 1_000_000.0 / tempo as f64)
        .round()
        .max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        // 480 ticks at 500_000 µs/beat, 480 ticks/beat = one beat = 0.5 s
        assert!((ticks_to_seconds(480, 500_000, 480) - 0.5).abs() < 1e-9);
        assert_eq!(seconds_to_ticks(0.5, 500_000, 480), 480);

        // 250_000 µs/beat at 120 ticks/beat: one tick ≈ 2.083 ms
        assert!((ticks_to_seconds(1, 250_000, 120) - 0.00208333).abs() < 1e-6);
    }

    #[test]
    fn test_zero() {
        assert_eq!(ticks_to_seconds(0, 500_000, 480), 0.0);
        assert_eq!(seconds_to_ticks(0.0, 500_000, 480), 0);
    }

    #[test]
    fn test_negative_seconds_clamp() {
        assert_eq!(seconds_to_ticks(-0.25, 500_000, 480), 0);
    }

    #[test]
    fn test_round_trip_within_one_tick() {
        for tempo in [250_000u32, 500_000, 1_000_000] {
            for tpb in [96u16, 120, 480, 960] {
                for ticks in [0u64, 1, 7, 120, 479, 480, 12_345, 1_000_000] {
                    let secs = ticks_to_seconds(ticks, tempo, tpb);
                    let back = seconds_to_ticks(secs, tempo, tpb);
                    let diff = back.abs_diff(ticks);
                    assert!(
                        diff <= 1,
                        "round trip drifted: {} → {} (tempo={}, tpb={})",
                        ticks,
                        back,
                        tempo,
                        tpb
                    );
                }
            }
        }
    }

    #[test]
    fn test_rounds_to_nearest() {
        // 1 tick at 500_000/480 is ~1.0417 ms; 40% of a tick rounds down,
        // 60% rounds up.
        let one_tick = ticks_to_seconds(1, 500_000, 480);
        assert_eq!(seconds_to_ticks(one_tick * 0.4, 500_000, 480), 0);
        assert_eq!(seconds_to_ticks(one_tick * 0.6, 500_000, 480), 1);
    }
}
