//! Non-destructive segment timeline.
//!
//! A [`VirtualTimeline`] is an ordered list of source ranges taken from one
//! finished recording. Playing the segments back to back gives the edited
//! ("virtual") timeline. Edits only ever rearrange or drop ranges; the
//! recording itself is never touched.
//!
//! Times are integer nanoseconds so that splitting never loses precision.
//! Seconds are accepted and returned at the public edges.

use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Minimum distance between a split point and either segment edge.
pub const SPLIT_GUARD_NS: u64 = 200_000_000;

/// Display colors assigned to segments in rotation.
pub const SEGMENT_PALETTE: [&str; 6] = [
    "#4f8cff", "#f5a623", "#7ed321", "#e0457b", "#9b6bff", "#2ec4b6",
];

/// Convert seconds to nanoseconds, rejecting NaN, infinite and negative
/// values.
pub fn secs_to_ns(secs: f64) -> Option<u64> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let ns = (secs * NANOS_PER_SEC as f64).round();
    if ns > u64::MAX as f64 {
        return None;
    }
    Some(ns as u64)
}

pub fn ns_to_secs(ns: u64) -> f64 {
    ns as f64 / NANOS_PER_SEC as f64
}

/// One contiguous source range kept in the edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    id: u64,
    start_ns: u64,
    end_ns: u64,
    color: String,
}

impl Segment {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn start_ns(&self) -> u64 {
        self.start_ns
    }

    pub fn end_ns(&self) -> u64 {
        self.end_ns
    }

    pub fn duration_ns(&self) -> u64 {
        self.end_ns - self.start_ns
    }

    pub fn start_secs(&self) -> f64 {
        ns_to_secs(self.start_ns)
    }

    pub fn end_secs(&self) -> f64 {
        ns_to_secs(self.end_ns)
    }

    pub fn duration_secs(&self) -> f64 {
        ns_to_secs(self.duration_ns())
    }

    /// Presentation color, a `#rrggbb` string.
    pub fn color(&self) -> &str {
        &self.color
    }

    fn contains_source_ns(&self, source_ns: u64) -> bool {
        self.start_ns <= source_ns && source_ns < self.end_ns
    }
}

/// Result of mapping a virtual time onto the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    pub segment_index: usize,
    /// Offset from the start of the segment.
    pub offset_ns: u64,
    /// Absolute position in the source recording.
    pub source_ns: u64,
}

impl SourcePosition {
    pub fn offset_secs(&self) -> f64 {
        ns_to_secs(self.offset_ns)
    }

    pub fn source_secs(&self) -> f64 {
        ns_to_secs(self.source_ns)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Earlier,
    Later,
}

/// Whether an edit changed the timeline.
///
/// Invalid edits are not errors: they leave the timeline as it was and
/// report why.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Applied,
    Rejected(EditRejection),
}

impl EditOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EditRejection {
    #[error("time is outside the timeline")]
    OutOfRange,
    #[error("split point is within the guard distance of a segment edge")]
    TooCloseToEdge,
    #[error("the last remaining segment cannot be deleted")]
    LastSegment,
    #[error("no such segment")]
    UnknownSegment,
    #[error("segment is already at that end of the timeline")]
    AtBoundary,
}

/// Errors constructing or loading a timeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimelineError {
    #[error("Source duration must be positive and finite, got {secs}")]
    InvalidDuration { secs: f64 },

    #[error("Invalid timeline: {message}")]
    Corrupt { message: String },
}

/// Frame schedule for one segment during export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentFrames {
    pub segment_index: usize,
    pub segment_id: u64,
    pub source_start_ns: u64,
    pub source_end_ns: u64,
    pub fps: u32,
    /// `floor(duration * fps)`.
    pub frames: u64,
}

impl SegmentFrames {
    /// Source time of frame `index`: `start + index / fps`.
    pub fn source_time_ns(&self, index: u64) -> u64 {
        if self.fps == 0 {
            return self.source_start_ns;
        }
        let offset = index as u128 * NANOS_PER_SEC as u128 / self.fps as u128;
        self.source_start_ns + offset as u64
    }

    pub fn source_time_secs(&self, index: u64) -> f64 {
        ns_to_secs(self.source_time_ns(index))
    }
}

/// Ordered list of segments over one source recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TimelineRepr")]
pub struct VirtualTimeline {
    source_duration_ns: u64,
    segments: Vec<Segment>,
    next_id: u64,
    next_color: usize,
}

impl VirtualTimeline {
    /// Open a timeline with one segment spanning the whole source.
    pub fn new(source_duration_secs: f64) -> Result<Self, TimelineError> {
        match secs_to_ns(source_duration_secs) {
            Some(ns) if ns > 0 => Self::from_nanos(ns),
            _ => Err(TimelineError::InvalidDuration {
                secs: source_duration_secs,
            }),
        }
    }

    pub fn from_nanos(source_duration_ns: u64) -> Result<Self, TimelineError> {
        if source_duration_ns == 0 {
            return Err(TimelineError::InvalidDuration { secs: 0.0 });
        }
        let mut timeline = Self {
            source_duration_ns,
            segments: Vec::new(),
            next_id: 0,
            next_color: 0,
        };
        timeline.reset();
        Ok(timeline)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn source_duration_ns(&self) -> u64 {
        self.source_duration_ns
    }

    pub fn source_duration_secs(&self) -> f64 {
        ns_to_secs(self.source_duration_ns)
    }

    pub fn total_duration_ns(&self) -> u64 {
        self.segments.iter().map(Segment::duration_ns).sum()
    }

    pub fn total_duration_secs(&self) -> f64 {
        ns_to_secs(self.total_duration_ns())
    }

    /// True while the timeline is still the single full-range segment.
    pub fn is_unedited(&self) -> bool {
        matches!(self.segments.as_slice(),
            [only] if only.start_ns == 0 && only.end_ns == self.source_duration_ns)
    }

    /// Virtual start time of the segment at `index`.
    pub fn segment_start_virtual(&self, index: usize) -> Option<f64> {
        self.segment_start_virtual_ns(index).map(ns_to_secs)
    }

    pub fn segment_start_virtual_ns(&self, index: usize) -> Option<u64> {
        if index >= self.segments.len() {
            return None;
        }
        Some(self.segments[..index].iter().map(Segment::duration_ns).sum())
    }

    /// Locate the segment playing at virtual time `t`. `None` outside
    /// `[0, total)`.
    pub fn map_virtual_to_source(&self, t: f64) -> Option<SourcePosition> {
        self.map_virtual_ns(secs_to_ns(t)?)
    }

    pub fn map_virtual_ns(&self, t_ns: u64) -> Option<SourcePosition> {
        let mut segment_start = 0u64;
        for (segment_index, segment) in self.segments.iter().enumerate() {
            let segment_end = segment_start + segment.duration_ns();
            if t_ns < segment_end {
                let offset_ns = t_ns - segment_start;
                return Some(SourcePosition {
                    segment_index,
                    offset_ns,
                    source_ns: segment.start_ns + offset_ns,
                });
            }
            segment_start = segment_end;
        }
        None
    }

    /// Virtual time at which source time `source_secs` plays, using the
    /// first segment that contains it. `None` if it was cut.
    pub fn map_source_to_virtual(&self, source_secs: f64) -> Option<f64> {
        let source_ns = secs_to_ns(source_secs)?;
        let mut segment_start = 0u64;
        for segment in &self.segments {
            if segment.contains_source_ns(source_ns) {
                return Some(ns_to_secs(segment_start + source_ns - segment.start_ns));
            }
            segment_start += segment.duration_ns();
        }
        None
    }

    /// Split the segment playing at virtual time `at` into two.
    ///
    /// The leading piece keeps the segment's id and color. Rejected when
    /// either piece would be no longer than [`SPLIT_GUARD_NS`].
    pub fn split(&mut self, at: f64) -> EditOutcome {
        let Some(position) = secs_to_ns(at).and_then(|ns| self.map_virtual_ns(ns)) else {
            return EditOutcome::Rejected(EditRejection::OutOfRange);
        };

        let segment = &self.segments[position.segment_index];
        let trailing_len = segment.duration_ns() - position.offset_ns;
        if position.offset_ns <= SPLIT_GUARD_NS || trailing_len <= SPLIT_GUARD_NS {
            return EditOutcome::Rejected(EditRejection::TooCloseToEdge);
        }

        let end_ns = segment.end_ns;
        let leading_color = segment.color.clone();
        let trailing = Segment {
            id: self.take_id(),
            start_ns: position.source_ns,
            end_ns,
            color: self.take_color_except(&leading_color),
        };

        self.segments[position.segment_index].end_ns = position.source_ns;
        self.segments.insert(position.segment_index + 1, trailing);
        EditOutcome::Applied
    }

    /// Remove a segment by id. The last remaining segment is kept.
    pub fn delete_segment(&mut self, id: u64) -> EditOutcome {
        let Some(index) = self.segments.iter().position(|s| s.id == id) else {
            return EditOutcome::Rejected(EditRejection::UnknownSegment);
        };
        if self.segments.len() == 1 {
            return EditOutcome::Rejected(EditRejection::LastSegment);
        }
        self.segments.remove(index);
        EditOutcome::Applied
    }

    /// Swap the segment at `index` with its neighbour in `direction`.
    pub fn move_segment(&mut self, index: usize, direction: MoveDirection) -> EditOutcome {
        if index >= self.segments.len() {
            return EditOutcome::Rejected(EditRejection::UnknownSegment);
        }
        let neighbour = match direction {
            MoveDirection::Earlier => index.checked_sub(1),
            MoveDirection::Later => Some(index + 1).filter(|n| *n < self.segments.len()),
        };
        match neighbour {
            Some(other) => {
                self.segments.swap(index, other);
                EditOutcome::Applied
            }
            None => EditOutcome::Rejected(EditRejection::AtBoundary),
        }
    }

    /// Collapse back to one segment over the whole source.
    pub fn reset(&mut self) {
        self.next_color = 0;
        let full = Segment {
            id: self.take_id(),
            start_ns: 0,
            end_ns: self.source_duration_ns,
            color: self.take_color_except(""),
        };
        self.segments = vec![full];
    }

    /// Per-segment export schedule at `fps`, in timeline order.
    pub fn frame_plan(&self, fps: u32) -> Vec<SegmentFrames> {
        self.segments
            .iter()
            .enumerate()
            .map(|(segment_index, segment)| SegmentFrames {
                segment_index,
                segment_id: segment.id,
                source_start_ns: segment.start_ns,
                source_end_ns: segment.end_ns,
                fps,
                frames: (segment.duration_ns() as u128 * fps as u128 / NANOS_PER_SEC as u128)
                    as u64,
            })
            .collect()
    }

    pub fn total_frames(&self, fps: u32) -> u64 {
        self.frame_plan(fps).iter().map(|plan| plan.frames).sum()
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn take_color_except(&mut self, avoid: &str) -> String {
        let mut color = SEGMENT_PALETTE[self.next_color % SEGMENT_PALETTE.len()];
        self.next_color += 1;
        if color == avoid {
            color = SEGMENT_PALETTE[self.next_color % SEGMENT_PALETTE.len()];
            self.next_color += 1;
        }
        color.to_string()
    }
}

#[derive(Deserialize)]
struct TimelineRepr {
    source_duration_ns: u64,
    segments: Vec<Segment>,
    next_id: u64,
    next_color: usize,
}

impl TryFrom<TimelineRepr> for VirtualTimeline {
    type Error = TimelineError;

    fn try_from(repr: TimelineRepr) -> Result<Self, Self::Error> {
        if repr.segments.is_empty() {
            return Err(TimelineError::Corrupt {
                message: "timeline has no segments".to_string(),
            });
        }
        for segment in &repr.segments {
            if segment.end_ns <= segment.start_ns || segment.end_ns > repr.source_duration_ns {
                return Err(TimelineError::Corrupt {
                    message: format!(
                        "segment {} has invalid range {}..{}",
                        segment.id, segment.start_ns, segment.end_ns
                    ),
                });
            }
            if segment.id >= repr.next_id {
                return Err(TimelineError::Corrupt {
                    message: format!("segment id {} was never allocated", segment.id),
                });
            }
        }
        Ok(Self {
            source_duration_ns: repr.source_duration_ns,
            segments: repr.segments,
            next_id: repr.next_id,
            next_color: repr.next_color,
        })
    }
}
