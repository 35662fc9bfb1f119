use serde::{Deserialize, Serialize};

use crate::error::ConsistencyError;
use crate::queue::JobType;

pub type SegmentId = u64;

/// Label name carrying the speaker of a segment.
pub const SPEAKER_LABEL: &str = "Speaker";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A contiguous span of a level. The start is implied by the previous
/// segment's `end_sample` (0 for the first one).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub end_sample: u64,
    pub labels: Vec<Label>,
    pub is_blocked_by: Option<JobType>,
}

impl Segment {
    pub fn new(id: SegmentId, end_sample: u64, labels: Vec<Label>) -> Self {
        Self {
            id,
            end_sample,
            labels,
            is_blocked_by: None,
        }
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    pub fn set_label(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.labels.iter_mut().find(|l| l.name == name) {
            Some(label) => label.value = value,
            None => self.labels.push(Label::new(name, value)),
        }
    }

    /// Name of the free-text transcript label: the first label that is not
    /// the speaker label.
    pub fn transcript_label_name(&self) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name != SPEAKER_LABEL)
            .map(|l| l.name.as_str())
    }
}

/// A resolved segment together with its implied start sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    pub index: usize,
    pub start_sample: u64,
    pub segment: Segment,
}

impl SegmentRef {
    pub fn id(&self) -> SegmentId {
        self.segment.id
    }

    pub fn end_sample(&self) -> u64 {
        self.segment.end_sample
    }
}

/// One transcription tier: an ordered, sample-indexed segment sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub name: String,
    segments: Vec<Segment>,
}

impl Level {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == id)
    }

    pub fn start_of(&self, index: usize) -> u64 {
        match index {
            0 => 0,
            i => self.segments[i - 1].end_sample,
        }
    }

    /// Finds the segment whose span `(start, end]` contains `sample`, so an
    /// exact boundary resolves to the segment ending there.
    pub fn owning_segment(&self, sample: u64) -> Option<SegmentRef> {
        let index = self.segments.partition_point(|s| s.end_sample < sample);
        self.segments.get(index).map(|segment| SegmentRef {
            index,
            start_sample: self.start_of(index),
            segment: segment.clone(),
        })
    }

    fn check_boundaries(segments: &[Segment], duration: u64) -> bool {
        let increasing = segments
            .windows(2)
            .all(|w| w[0].end_sample < w[1].end_sample);
        let first_positive = segments.first().is_some_and(|s| s.end_sample > 0);
        let ends_at_duration = segments.last().is_some_and(|s| s.end_sample == duration);
        increasing && first_positive && ends_at_duration
    }
}

/// The annotation document: all levels over one audio file plus the
/// document-wide segment id counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    duration: u64,
    levels: Vec<Level>,
    last_segment_id: SegmentId,
}

impl Annotation {
    pub fn new(duration: u64) -> Self {
        Self {
            duration,
            levels: Vec::new(),
            last_segment_id: 0,
        }
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, name: &str) -> Result<&Level, ConsistencyError> {
        self.levels
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| ConsistencyError::LevelNotFound(name.to_string()))
    }

    fn level_mut(&mut self, name: &str) -> Result<&mut Level, ConsistencyError> {
        self.levels
            .iter_mut()
            .find(|l| l.name == name)
            .ok_or_else(|| ConsistencyError::LevelNotFound(name.to_string()))
    }

    /// Ids are never reused: every call returns a value greater than all
    /// previously allocated ones.
    pub fn allocate_segment_id(&mut self) -> SegmentId {
        self.last_segment_id += 1;
        self.last_segment_id
    }

    /// Adds a level holding a single empty segment that spans the whole audio.
    pub fn add_level(&mut self, name: &str) -> SegmentId {
        let id = self.allocate_segment_id();
        self.levels.push(Level {
            name: name.to_string(),
            segments: vec![Segment::new(id, self.duration, vec![Label::new(name, "")])],
        });
        id
    }

    /// Adds a level from `(end_sample, transcript)` pairs, validating that the
    /// boundaries are strictly increasing and end at the audio duration.
    pub fn add_level_with_boundaries(
        &mut self,
        name: &str,
        boundaries: &[(u64, &str)],
    ) -> Result<(), ConsistencyError> {
        let mut segments = Vec::with_capacity(boundaries.len());
        let mut next_id = self.last_segment_id;
        for (end, text) in boundaries {
            next_id += 1;
            segments.push(Segment::new(next_id, *end, vec![Label::new(name, *text)]));
        }
        if !Level::check_boundaries(&segments, self.duration) {
            return Err(ConsistencyError::InvalidBoundaries {
                duration: self.duration,
            });
        }
        self.last_segment_id = next_id;
        self.levels.push(Level {
            name: name.to_string(),
            segments,
        });
        Ok(())
    }

    pub fn owning_segment(&self, level: &str, sample: u64) -> Result<SegmentRef, ConsistencyError> {
        self.level(level)?
            .owning_segment(sample)
            .ok_or(ConsistencyError::OwnerNotFound { sample })
    }

    /// Replaces the segment `owner_id` with `segments`. The replacement must
    /// fit between the owner's start and end, ending exactly at the owner's
    /// end, otherwise the level is left untouched.
    pub fn splice_segments(
        &mut self,
        level: &str,
        owner_id: SegmentId,
        segments: Vec<Segment>,
    ) -> Result<(), ConsistencyError> {
        let duration = self.duration;
        let target = self.level_mut(level)?;
        let index = target
            .segments
            .iter()
            .position(|s| s.id == owner_id)
            .ok_or(ConsistencyError::SegmentNotFound(owner_id))?;
        let start = target.start_of(index);
        let end = target.segments[index].end_sample;

        let fits = segments.first().is_some_and(|s| s.end_sample > start)
            && segments.last().is_some_and(|s| s.end_sample == end)
            && segments.windows(2).all(|w| w[0].end_sample < w[1].end_sample);
        if !fits {
            return Err(ConsistencyError::InvalidBoundaries { duration });
        }

        target.segments.splice(index..=index, segments);
        Ok(())
    }

    pub fn set_transcript(
        &mut self,
        level: &str,
        id: SegmentId,
        text: impl Into<String>,
    ) -> Result<(), ConsistencyError> {
        let target = self.level_mut(level)?;
        let name = target.name.clone();
        let segment = target
            .segments
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(ConsistencyError::SegmentNotFound(id))?;
        let label_name = segment
            .transcript_label_name()
            .map(str::to_string)
            .unwrap_or(name);
        segment.set_label(&label_name, text);
        Ok(())
    }

    pub fn set_blocked(
        &mut self,
        level: &str,
        id: SegmentId,
        blocked_by: Option<JobType>,
    ) -> Result<(), ConsistencyError> {
        let segment = self
            .level_mut(level)?
            .segments
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(ConsistencyError::SegmentNotFound(id))?;
        segment.is_blocked_by = blocked_by;
        Ok(())
    }
}
