use crate::annotation::{Annotation, Label, SPEAKER_LABEL, Segment, SegmentId, SegmentRef};
use crate::asr::AlignedWord;
use crate::error::ConsistencyError;
use crate::queue::TimeInterval;

/// Replacement segments for one owning segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRun {
    pub owner_id: SegmentId,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Copy)]
pub struct MergeMarkers<'a> {
    pub pause_placeholder: &'a str,
    pub break_marker: &'a str,
}

/// Planned boundary: segment end and transcript text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Boundary {
    end: u64,
    text: String,
}

fn join(left: &mut String, right: &str) {
    if right.is_empty() {
        return;
    }
    if !left.is_empty() {
        left.push(' ');
    }
    left.push_str(right);
}

/// Validates the alignment against the interval and computes the boundaries
/// of the replacement run. Pure: nothing is allocated or mutated.
fn plan_boundaries(
    owner: &SegmentRef,
    interval: TimeInterval,
    words: &[AlignedWord],
    markers: MergeMarkers<'_>,
) -> Result<Vec<Boundary>, ConsistencyError> {
    if words.is_empty() {
        return Err(ConsistencyError::EmptyAlignment);
    }
    if interval.sample_start < owner.start_sample {
        return Err(ConsistencyError::CrossesSegment {
            sample_start: interval.sample_start,
            owner: owner.id(),
            owner_start: owner.start_sample,
        });
    }

    let limit = interval.end();
    let mut ends = Vec::with_capacity(words.len());
    for (index, word) in words.iter().enumerate() {
        let end = interval
            .sample_start
            .checked_add(word.relative_start)
            .and_then(|v| v.checked_add(word.relative_duration));
        match end {
            Some(end) if end <= limit => ends.push(end),
            _ => {
                return Err(ConsistencyError::WordOutOfBounds {
                    index,
                    end: end.unwrap_or(u64::MAX),
                    limit,
                });
            }
        }
    }

    let mut boundaries: Vec<Boundary> = Vec::with_capacity(words.len() + 1);
    if interval.sample_start > owner.start_sample {
        boundaries.push(Boundary {
            end: interval.sample_start,
            text: String::new(),
        });
    }
    let first_word = boundaries.len();

    let last = words.len() - 1;
    let mut previous_end = interval.sample_start;
    let mut carried = String::new();
    for (index, (word, end)) in words.iter().zip(ends).enumerate() {
        let text = if word.label == markers.pause_placeholder {
            markers.break_marker
        } else {
            word.label.as_str()
        };
        // The final segment always closes at the owner's end.
        let end = if index == last { owner.end_sample() } else { end };

        if end <= previous_end {
            // Zero-length word: its text joins the previous word, or the
            // next one when nothing precedes it.
            match boundaries.get_mut(first_word..).and_then(|b| b.last_mut()) {
                Some(boundary) => join(&mut boundary.text, text),
                None => join(&mut carried, text),
            }
            continue;
        }

        let mut segment_text = std::mem::take(&mut carried);
        join(&mut segment_text, text);
        boundaries.push(Boundary {
            end,
            text: segment_text,
        });
        previous_end = end;
    }
    if let Some(boundary) = boundaries.last_mut() {
        join(&mut boundary.text, &carried);
    }

    Ok(boundaries)
}

/// Builds the replacement run for the segment owning the interval end.
///
/// Every new segment takes the owner's transcript label name, keeps the
/// owner's speaker label and gets a fresh id from `next_id`.
pub fn build_segment_run(
    owner: &SegmentRef,
    level_name: &str,
    interval: TimeInterval,
    words: &[AlignedWord],
    markers: MergeMarkers<'_>,
    mut next_id: impl FnMut() -> SegmentId,
) -> Result<SegmentRun, ConsistencyError> {
    let boundaries = plan_boundaries(owner, interval, words, markers)?;

    let label_name = owner
        .segment
        .transcript_label_name()
        .unwrap_or(level_name)
        .to_string();
    let speaker = owner.segment.label(SPEAKER_LABEL).map(str::to_string);

    let segments = boundaries
        .into_iter()
        .map(|boundary| {
            let mut labels = vec![Label::new(&label_name, boundary.text)];
            if let Some(speaker) = &speaker {
                labels.push(Label::new(SPEAKER_LABEL, speaker));
            }
            Segment::new(next_id(), boundary.end, labels)
        })
        .collect();

    Ok(SegmentRun {
        owner_id: owner.id(),
        segments,
    })
}

/// Splices word-aligned output into `level`, replacing the segment that
/// owns `interval.end()`. On error the annotation is untouched.
pub fn merge_alignment(
    annotation: &mut Annotation,
    level: &str,
    interval: TimeInterval,
    words: &[AlignedWord],
    markers: MergeMarkers<'_>,
) -> Result<SegmentRun, ConsistencyError> {
    let owner = annotation.owning_segment(level, interval.end())?;
    // Validate before touching the id counter.
    plan_boundaries(&owner, interval, words, markers)?;

    let run = build_segment_run(&owner, level, interval, words, markers, || {
        annotation.allocate_segment_id()
    })?;
    annotation.splice_segments(level, run.owner_id, run.segments.clone())?;
    Ok(run)
}

/// Writes recognition-only output into the owning segment's transcript
/// label and clears its blocking marker.
pub fn apply_recognition(
    annotation: &mut Annotation,
    level: &str,
    interval: TimeInterval,
    text: &str,
) -> Result<SegmentId, ConsistencyError> {
    let owner = annotation.owning_segment(level, interval.end())?;
    annotation.set_transcript(level, owner.id(), text)?;
    annotation.set_blocked(level, owner.id(), None)?;
    Ok(owner.id())
}
