//! Segmented-loop controller (C7): a decorator over a seekable decoder that
//! turns a static audio file into a multi-segment loop graph.

use std::time::Duration;

use crate::decoder::Decoder;
use crate::error::Result;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    Start,
    Middle,
    End,
}

#[derive(Copy, Clone, Debug)]
pub struct Segment {
    pub start: Duration,
    pub end: Duration,
    pub kind: SegmentKind,
}

impl Segment {
    pub fn contains(&self, t: Duration) -> bool {
        t >= self.start && t < self.end
    }
}

/// Holds the segment graph and the controller's cursor (`target_index`),
/// plus a delayed-jump target armed when `jumpTo` is requested mid-segment.
pub struct SegmentTracker {
    segments: Vec<Segment>,
    target_index: usize,
    loop_target_time: Duration,
    delayed_jump_target: Option<usize>,
    on_delayed_section_start: Option<Box<dyn FnMut() + Send>>,
    /// Set by `modify_read_seconds` when a loop boundary forces the next
    /// read to report `check_loop = true`.
    force_check_loop: bool,
}

impl SegmentTracker {
    /// `segments` in timeline order; the first is patched to `start = 0`
    /// and the last's `end` is patched to `max_duration` (lazily resolved
    /// "End" segment per §3.5 / §4.8).
    pub fn new(mut segments: Vec<Segment>, max_duration: Duration) -> Self {
        assert!(!segments.is_empty(), "segment graph must not be empty");
        if let Some(first) = segments.first_mut() {
            first.start = Duration::ZERO;
        }
        if let Some(last) = segments.last_mut() {
            if last.kind == SegmentKind::End {
                last.end = max_duration;
            }
        }
        Self {
            segments,
            target_index: 0,
            loop_target_time: Duration::ZERO,
            delayed_jump_target: None,
            on_delayed_section_start: None,
            force_check_loop: false,
        }
    }

    pub fn target_index(&self) -> usize {
        self.target_index
    }

    pub fn loop_target_time(&self) -> Duration {
        self.loop_target_time
    }

    pub fn set_on_delayed_section_start(&mut self, callback: Box<dyn FnMut() + Send>) {
        self.on_delayed_section_start = Some(callback);
    }

    fn clamp_index(&self, i: usize) -> usize {
        i.min(self.segments.len() - 1)
    }

    /// Seeks `decoder` to `segments[i].start` immediately, or (if `on_end`)
    /// records a delayed jump that's executed once the current segment ends.
    pub fn jump_to(&mut self, decoder: &mut dyn Decoder, i: usize, on_end: bool) -> Result<()> {
        let i = self.clamp_index(i);
        if on_end {
            self.delayed_jump_target = Some(i);
            return Ok(());
        }
        let target = self.segments[i];
        decoder.seek(target.start.as_secs_f64())?;
        self.target_index = i;
        self.loop_target_time = target.start;
        Ok(())
    }

    fn locate_segment(&self, read_time: Duration) -> usize {
        self.segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.start <= read_time)
            .max_by_key(|(_, s)| s.start)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// §4.8's four-step pre-read hook, invoked by [`crate::stream::StreamPackage`]
    /// before every decoder read.
    pub fn modify_read_seconds(&mut self, read_time: Duration, secs: &mut f64) {
        let current = self.segments[self.target_index];
        if !current.contains(read_time) {
            self.target_index = self.locate_segment(read_time);
        }
        let current = self.segments[self.target_index];

        if read_time == current.start {
            if let Some(mut cb) = self.on_delayed_section_start.take() {
                cb();
            }
        }

        let would_end = read_time + Duration::from_secs_f64(*secs) > current.end;
        if would_end {
            if let Some(next) = self.loop_target_for(self.target_index) {
                let remaining = current.end.saturating_sub(read_time);
                *secs = remaining.as_secs_f64();
                self.loop_target_time = next;
                self.force_check_loop = true;
            }
        }
    }

    /// Every segment flows forward into the next one's start once it ends,
    /// except the last, which has nowhere to advance to (handled by
    /// `handle_looping`'s override instead).
    fn loop_target_for(&self, index: usize) -> Option<Duration> {
        if index + 1 >= self.segments.len() {
            None
        } else {
            Some(self.segments[index + 1].start)
        }
    }

    pub fn take_force_check_loop(&mut self) -> bool {
        std::mem::take(&mut self.force_check_loop)
    }

    /// If any non-final segment is current, the package must not be allowed
    /// to close mid-song: `handleLooping` should treat the stream as looping.
    pub fn forces_looping(&self) -> bool {
        self.target_index + 1 < self.segments.len()
    }

    /// `Reset()` while the sink is stopped: rewind to segment 0 and execute
    /// any delayed jump that was pending.
    pub fn reset(&mut self, decoder: &mut dyn Decoder) -> Result<()> {
        if let Some(target) = self.delayed_jump_target.take() {
            self.jump_to(decoder, target, false)?;
        } else {
            self.jump_to(decoder, 0, false)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs() -> Vec<Segment> {
        vec![
            Segment { start: Duration::ZERO, end: Duration::from_secs(2), kind: SegmentKind::Start },
            Segment { start: Duration::from_secs(2), end: Duration::from_secs(4), kind: SegmentKind::Middle },
            Segment { start: Duration::from_secs(4), end: Duration::from_secs(999), kind: SegmentKind::End },
        ]
    }

    #[test]
    fn end_segment_end_resolves_to_max_duration() {
        let tracker = SegmentTracker::new(segs(), Duration::from_secs(10));
        assert_eq!(tracker.segments.last().unwrap().end, Duration::from_secs(10));
    }

    #[test]
    fn locate_segment_picks_highest_matching_start() {
        let tracker = SegmentTracker::new(segs(), Duration::from_secs(10));
        assert_eq!(tracker.locate_segment(Duration::from_millis(500)), 0);
        assert_eq!(tracker.locate_segment(Duration::from_secs(3)), 1);
        assert_eq!(tracker.locate_segment(Duration::from_secs(5)), 2);
    }

    #[test]
    fn forces_looping_except_on_last_segment() {
        let mut tracker = SegmentTracker::new(segs(), Duration::from_secs(10));
        tracker.target_index = 1;
        assert!(tracker.forces_looping());
        tracker.target_index = 2;
        assert!(!tracker.forces_looping());
    }

    #[test]
    fn modify_read_seconds_clamps_at_segment_boundary() {
        let mut tracker = SegmentTracker::new(segs(), Duration::from_secs(10));
        tracker.target_index = 0;
        let mut secs = 0.5;
        // 1.8s into segment 0 (ends at 2.0s), requesting 0.5s would overshoot.
        tracker.modify_read_seconds(Duration::from_millis(1800), &mut secs);
        assert!((secs - 0.2).abs() < 1e-9);
        assert!(tracker.take_force_check_loop());
        assert_eq!(tracker.loop_target_time(), Duration::from_secs(2));
    }
}
