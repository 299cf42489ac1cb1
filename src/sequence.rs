use crate::segment::Segment;
use crate::timing;

/// Sentinel score interval assigned to the first onset, which has no
/// preceding interval to measure.
pub const FIRST_IOI_PLACEHOLDER: u64 = 1;

/// An ordered run of [`Segment`]s (non-decreasing key onset) with the tempo
/// and resolution needed for tick↔second conversion, plus the single
/// monotonically advancing cursor of a live performance.
///
/// The sequence is read-only during capture except for the cursor, which
/// moves exactly once per live note-on.
#[derive(Debug, Clone)]
pub struct Sequence {
    segments: Vec<Segment>,
    /// Tempo in µs per beat.
    pub tempo: u32,
    pub ticks_per_beat: u16,
    cursor: usize,
}

impl Sequence {
    pub fn new(segments: Vec<Segment>, ticks_per_beat: u16, tempo: u32) -> Self {
        debug_assert!(segments.windows(2).all(|w| w[0].onset <= w[1].onset));
        Self {
            segments,
            tempo,
            ticks_per_beat,
            cursor: 0,
        }
    }

    /// An empty sequence at default tempo/resolution. A conductor built over
    /// this warns on every note-on until a real score is loaded.
    pub fn empty() -> Self {
        Self::new(vec![], timing::DEFAULT_TICKS_PER_BEAT, timing::DEFAULT_TEMPO)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// True once every segment has been consumed (`cursor == len`).
    pub fn is_exhausted(&self) -> bool {
        self.cursor == self.segments.len()
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    /// Consume and return the next segment. `None` once exhausted; the
    /// cursor never moves backwards.
    pub fn advance(&mut self) -> Option<&Segment> {
        if self.cursor >= self.segments.len() {
            return None;
        }
        self.cursor += 1;
        Some(&self.segments[self.cursor - 1])
    }

    pub fn ticks_to_seconds(&self, ticks: u64) -> f64 {
        timing::ticks_to_seconds(ticks, self.tempo, self.ticks_per_beat)
    }

    pub fn seconds_to_ticks(&self, seconds: f64) -> u64 {
        timing::seconds_to_ticks(seconds, self.tempo, self.ticks_per_beat)
    }

    /// Inter-onset intervals between consecutive segment keys, in ticks.
    /// The first element is the [`FIRST_IOI_PLACEHOLDER`] sentinel.
    pub fn score_iois(&self) -> Vec<u64> {
        if self.segments.is_empty() {
            return vec![];
        }
        let mut iois = Vec::with_capacity(self.segments.len());
        iois.push(FIRST_IOI_PLACEHOLDER);
        let mut prev = self.segments[0].onset;
        for seg in &self.segments[1..] {
            iois.push(seg.onset - prev);
            prev = seg.onset;
        }
        iois
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Pitch;

    fn sequence_with_onsets(onsets: &[u64]) -> Sequence {
        let segments = onsets
            .iter()
            .map(|&on| Segment::new(Pitch::new(60, 100, on, on + 10, 0), vec![]))
            .collect();
        Sequence::new(segments, 480, 500_000)
    }

    #[test]
    fn test_cursor_advances_once_per_call_and_saturates() {
        let mut seq = sequence_with_onsets(&[0, 100, 250]);
        assert_eq!(seq.cursor(), 0);
        assert!(!seq.is_exhausted());

        assert_eq!(seq.advance().unwrap().onset, 0);
        assert_eq!(seq.cursor(), 1);
        assert_eq!(seq.advance().unwrap().onset, 100);
        assert_eq!(seq.advance().unwrap().onset, 250);
        assert_eq!(seq.cursor(), 3);
        assert!(seq.is_exhausted());

        // Saturated: no further movement
        assert!(seq.advance().is_none());
        assert_eq!(seq.cursor(), 3);
    }

    #[test]
    fn test_reset_cursor() {
        let mut seq = sequence_with_onsets(&[0, 100]);
        seq.advance();
        seq.advance();
        assert!(seq.is_exhausted());
        seq.reset_cursor();
        assert_eq!(seq.cursor(), 0);
        assert_eq!(seq.advance().unwrap().onset, 0);
    }

    #[test]
    fn test_empty_sequence_is_exhausted() {
        let mut seq = Sequence::empty();
        assert!(seq.is_empty());
        assert!(seq.is_exhausted());
        assert!(seq.advance().is_none());
    }

    #[test]
    fn test_score_iois_with_sentinel() {
        let seq = sequence_with_onsets(&[0, 100, 250, 250]);
        assert_eq!(seq.score_iois(), vec![1, 100, 150, 0]);
        assert_eq!(Sequence::empty().score_iois(), Vec::<u64>::new());
    }

    #[test]
    fn test_tick_conversion_uses_sequence_parameters() {
        let seq = Sequence::new(vec![], 120, 250_000);
        assert!((seq.ticks_to_seconds(120) - 0.25).abs() < 1e-9);
        assert_eq!(seq.seconds_to_ticks(0.25), 120);
    }
}
