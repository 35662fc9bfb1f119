//! Reader for BAS Partitur alignment output.
//!
//! Only the `ORT` (orthography) and `MAU` (segmentation) tiers are read. MAU
//! rows are `MAU: <begin> <duration> <word index> <phoneme>` where the row
//! covers samples `begin..=begin + duration`; rows with word index `-1` are
//! pauses.

use std::collections::HashMap;

use thiserror::Error;

use super::AlignedWord;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PartiturError {
    #[error("line {line}: malformed {tier} row")]
    Malformed { line: usize, tier: &'static str },
    #[error("word index {0} has no ORT entry")]
    MissingWord(i64),
}

struct MauRow {
    line: usize,
    begin: u64,
    end: u64,
    word: i64,
}

/// Parses a Partitur document into words with clip-relative sample offsets.
/// Consecutive MAU rows of the same word (or consecutive pause rows) fold
/// into a single entry; pauses are labelled `pause_placeholder`.
pub fn parse(content: &str, pause_placeholder: &str) -> Result<Vec<AlignedWord>, PartiturError> {
    let mut orthography: HashMap<i64, String> = HashMap::new();
    let mut rows = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = idx + 1;
        let Some((tier, rest)) = raw.split_once(':') else {
            continue;
        };
        let mut fields = rest.split_whitespace();
        match tier.trim() {
            "ORT" => {
                let word = fields
                    .next()
                    .and_then(|f| f.parse::<i64>().ok())
                    .ok_or(PartiturError::Malformed { line, tier: "ORT" })?;
                let text = fields.collect::<Vec<_>>().join(" ");
                orthography.insert(word, text);
            }
            "MAU" => {
                let malformed = PartiturError::Malformed { line, tier: "MAU" };
                let begin = fields.next().and_then(|f| f.parse::<u64>().ok());
                let duration = fields.next().and_then(|f| f.parse::<u64>().ok());
                let word = fields.next().and_then(|f| f.parse::<i64>().ok());
                let end = begin
                    .zip(duration)
                    .and_then(|(begin, duration)| begin.checked_add(duration)?.checked_add(1));
                match (begin, end, word) {
                    (Some(begin), Some(end), Some(word)) => rows.push(MauRow {
                        line,
                        begin,
                        end,
                        word,
                    }),
                    _ => return Err(malformed),
                }
            }
            _ => {}
        }
    }

    let mut words: Vec<(i64, AlignedWord)> = Vec::new();
    for row in rows {
        if let Some((word, last)) = words.last_mut() {
            if *word == row.word {
                // Rows of one word must not start before the word does.
                last.relative_duration = row
                    .end
                    .checked_sub(last.relative_start)
                    .ok_or(PartiturError::Malformed { line: row.line, tier: "MAU" })?;
                continue;
            }
        }
        let label = if row.word < 0 {
            pause_placeholder.to_string()
        } else {
            orthography
                .get(&row.word)
                .cloned()
                .ok_or(PartiturError::MissingWord(row.word))?
        };
        words.push((
            row.word,
            AlignedWord::new(row.begin, row.end - row.begin, label),
        ));
    }

    Ok(words.into_iter().map(|(_, w)| w).collect())
}
