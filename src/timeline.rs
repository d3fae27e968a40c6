//! Segmented progress timeline for one company's stories.
//!
//! One segment per story, each filling from 0.0 to 1.0 over the story's
//! duration. The timeline never spawns a timer: the host calls [`ProgressTimeline::poll`]
//! every [`ProgressTimeline::tick_interval`] and the elapsed time is read from an
//! injected [`Clock`], which keeps every transition deterministic under test.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Number of discrete steps one segment is divided into.
pub const STEPS_PER_SEGMENT: u32 = 200;

// ============================================================================
// Clock
// ============================================================================

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by `tokio::time`, so paused-time tests still work.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

// ============================================================================
// States and Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimelineState {
    Idle,
    Running { index: usize, fraction: f64 },
    Paused { index: usize, fraction: f64 },
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineEvent {
    /// The active segment moved to this index.
    IndexChanged(usize),
    /// Ran off one end of the timeline.
    Finished(Direction),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    /// `anchor` is `None` after an advance/rewind until the next `animate`.
    /// `consumed` is play time accrued before the current anchor.
    Running {
        anchor: Option<Instant>,
        consumed: Duration,
    },
    Paused {
        consumed: Duration,
    },
    Exhausted,
}

// ============================================================================
// ProgressTimeline
// ============================================================================

pub struct ProgressTimeline {
    clock: Arc<dyn Clock>,
    segments: Vec<f64>,
    index: usize,
    phase: Phase,
    duration: Duration,
}

impl std::fmt::Debug for ProgressTimeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTimeline")
            .field("segments", &self.segments)
            .field("index", &self.index)
            .field("phase", &self.phase)
            .field("duration", &self.duration)
            .finish()
    }
}

impl ProgressTimeline {
    pub fn new(bar_count: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            segments: vec![0.0; bar_count.max(1)],
            index: 0,
            phase: Phase::Idle,
            duration: Duration::ZERO,
        }
    }

    /// Rebuild with `bar_count` empty segments.
    pub fn start(&mut self, bar_count: usize) {
        self.segments = vec![0.0; bar_count.max(1)];
        self.index = 0;
        self.phase = Phase::Idle;
    }

    pub fn bar_count(&self) -> usize {
        self.segments.len()
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn segments(&self) -> &[f64] {
        &self.segments
    }

    pub fn progress(&self, index: usize) -> Option<f64> {
        self.segments.get(index).copied()
    }

    pub fn state(&self) -> TimelineState {
        match self.phase {
            Phase::Idle => TimelineState::Idle,
            Phase::Running { .. } => TimelineState::Running {
                index: self.index,
                fraction: self.segments[self.index],
            },
            Phase::Paused { .. } => TimelineState::Paused {
                index: self.index,
                fraction: self.segments[self.index],
            },
            Phase::Exhausted => TimelineState::Exhausted,
        }
    }

    /// True while the active segment is actually filling.
    pub fn is_ticking(&self) -> bool {
        matches!(self.phase, Phase::Running { anchor: Some(_), .. })
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.phase, Phase::Paused { .. })
    }

    /// How often the host should call [`poll`](Self::poll).
    pub fn tick_interval(&self) -> Duration {
        (self.duration / STEPS_PER_SEGMENT).max(Duration::from_millis(1))
    }

    /// Begin filling segment `index` from zero over `duration`.
    pub fn animate(&mut self, index: usize, duration: Duration) {
        if index >= self.segments.len() {
            return;
        }
        self.index = index;
        self.duration = duration;
        self.segments[index] = 0.0;
        self.phase = Phase::Running {
            anchor: Some(self.clock.now()),
            consumed: Duration::ZERO,
        };
    }

    /// Sample the clock. Completing the active segment advances automatically.
    pub fn poll(&mut self) -> Option<TimelineEvent> {
        let played = self.played()?;
        if played >= self.duration {
            return self.advance();
        }

        // Monotonic while active
        let fraction = quantise(played.as_secs_f64() / self.duration.as_secs_f64());
        if fraction > self.segments[self.index] {
            self.segments[self.index] = fraction;
        }
        None
    }

    /// Total play time of the active segment, if it is filling.
    fn played(&self) -> Option<Duration> {
        match self.phase {
            Phase::Running {
                anchor: Some(anchor),
                consumed,
            } => Some(consumed + self.clock.now().saturating_duration_since(anchor)),
            _ => None,
        }
    }

    /// Complete the active segment and move to the next one, or finish.
    pub fn advance(&mut self) -> Option<TimelineEvent> {
        if self.phase == Phase::Exhausted {
            return None;
        }
        self.segments[self.index] = 1.0;

        if self.index + 1 < self.segments.len() {
            self.index += 1;
            self.segments[self.index] = 0.0;
            self.phase = Phase::Running {
                anchor: None,
                consumed: Duration::ZERO,
            };
            Some(TimelineEvent::IndexChanged(self.index))
        } else {
            self.phase = Phase::Exhausted;
            Some(TimelineEvent::Finished(Direction::Forward))
        }
    }

    /// Freeze the active segment. A segment that is not filling yet stays put.
    ///
    /// A segment that ran out while unpolled is frozen one step short of full;
    /// the first poll after `resume` completes it.
    pub fn pause(&mut self) {
        let Some(played) = self.played() else {
            return;
        };
        let consumed = played.min(self.duration);
        if !self.duration.is_zero() {
            let last_step = 1.0 - 1.0 / f64::from(STEPS_PER_SEGMENT);
            let fraction =
                quantise(consumed.as_secs_f64() / self.duration.as_secs_f64()).min(last_step);
            if fraction > self.segments[self.index] {
                self.segments[self.index] = fraction;
            }
        }
        self.phase = Phase::Paused { consumed };
    }

    /// Continue from the frozen point; the remaining time is `duration - consumed`.
    pub fn resume(&mut self) {
        if let Phase::Paused { consumed } = self.phase {
            self.phase = Phase::Running {
                anchor: Some(self.clock.now()),
                consumed,
            };
        }
    }

    /// Jump to the end of the active segment. Emits exactly one event.
    pub fn skip(&mut self) -> Option<TimelineEvent> {
        self.advance()
    }

    /// Clear the active segment and step back one story.
    pub fn rewind(&mut self) -> Option<TimelineEvent> {
        if self.phase == Phase::Exhausted {
            return None;
        }
        self.segments[self.index] = 0.0;

        if self.index > 0 {
            self.index -= 1;
            self.segments[self.index] = 0.0;
            self.phase = Phase::Running {
                anchor: None,
                consumed: Duration::ZERO,
            };
            Some(TimelineEvent::IndexChanged(self.index))
        } else {
            self.reset_bars();
            Some(TimelineEvent::Finished(Direction::Backward))
        }
    }

    pub fn reset_bars(&mut self) {
        self.segments.iter_mut().for_each(|s| *s = 0.0);
        self.index = 0;
        self.phase = Phase::Idle;
    }

    /// Mark every segment before `index` complete and park on `index`.
    pub fn start_from(&mut self, index: usize) {
        if index >= self.segments.len() {
            return;
        }
        for (i, segment) in self.segments.iter_mut().enumerate() {
            *segment = if i < index { 1.0 } else { 0.0 };
        }
        self.index = index;
        self.phase = Phase::Idle;
    }
}

fn quantise(raw: f64) -> f64 {
    let steps = f64::from(STEPS_PER_SEGMENT);
    ((raw.clamp(0.0, 1.0) * steps).floor() / steps).clamp(0.0, 1.0)
}

// ============================================================================
// Tests
// ============================================================================
