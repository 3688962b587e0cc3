//! Resync: find the part of the sent ledger a dropped session never confirmed.
//!
//! Both ledgers are transliterated to ASCII before comparison, since the
//! service reports confirmed characters in normalized form (accents stripped,
//! typographic quotes straightened). Alignment is a two-pointer walk: every
//! sent character must appear in the received sequence at the expected
//! position, or at most `tolerance` characters later. A character that is not
//! there at all marks the resume point; one that turns up further away means
//! the two ledgers disagree and resuming would lose or repeat speech.
//!
//! Whitespace is soft. Chunking re-spaces text at chunk seams and the service
//! drops line breaks, so sent whitespace consumes received whitespace when
//! present and is skipped otherwise, and extra received whitespace is ignored.

use crate::defaults;
use crate::error::AlignmentError;

/// Characters of context logged on each side of a mismatch.
const CONTEXT_RADIUS: usize = 10;

/// Outcome of searching the received sequence for one character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharMatch {
    /// Found at this position, within tolerance.
    Matched(usize),
    /// Not present at or after the expected position.
    NotFound,
    /// Present, but further away than the tolerance allows.
    Divergence { found: usize },
}

/// Unconfirmed suffix of the sent ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resync {
    /// Index into the sent slice where speech should resume.
    pub resume_at: usize,
    /// Original, un-normalized characters from `resume_at` onward.
    pub remaining: String,
    /// Characters accepted at a displaced position.
    pub displacements: usize,
}

impl Resync {
    /// True when nothing speakable is left: every non-whitespace sent
    /// character was confirmed.
    pub fn is_complete(&self) -> bool {
        self.remaining.chars().all(char::is_whitespace)
    }
}

/// Fuzzy aligner between the sent and received ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResyncMatcher {
    tolerance: usize,
    leading_artifact_len: usize,
}

impl Default for ResyncMatcher {
    fn default() -> Self {
        Self::new(defaults::DISPLACEMENT_TOLERANCE)
    }
}

impl ResyncMatcher {
    pub fn new(tolerance: usize) -> Self {
        Self {
            tolerance,
            leading_artifact_len: defaults::LEADING_ARTIFACT_LEN,
        }
    }

    /// Overrides how many leading received entries are discarded.
    pub fn with_leading_artifact_len(mut self, len: usize) -> Self {
        self.leading_artifact_len = len;
        self
    }

    pub fn tolerance(&self) -> usize {
        self.tolerance
    }

    /// Computes the unconfirmed suffix of `sent`.
    ///
    /// `received` is what one session attempt confirmed, including its
    /// leading artifact. The resume point backs up over any skipped
    /// characters after the last confirmed one, so nothing unconfirmed is
    /// dropped from the result.
    pub fn resync(&self, sent: &[char], received: &[String]) -> Result<Resync, AlignmentError> {
        let confirmed = received.get(self.leading_artifact_len..).unwrap_or_default();
        let received_units = normalize_received(confirmed);
        let sent_units = normalize_sent(sent);

        let mut j = 0;
        // One past the sent index of the last confirmed character.
        let mut confirmed_end = 0;
        let mut displacements = 0;
        let mut stop = None;

        for (i, unit) in sent_units.iter().enumerate() {
            if unit.ch.is_whitespace() {
                match received_units.get(j) {
                    None => {
                        stop = Some(unit.origin);
                        break;
                    }
                    Some(c) if c.is_whitespace() => {
                        j += 1;
                        confirmed_end = unit.origin + 1;
                    }
                    Some(_) => {}
                }
                continue;
            }

            while received_units.get(j).is_some_and(|c| c.is_whitespace()) {
                j += 1;
            }
            if j >= received_units.len() {
                tracing::debug!(sent_index = unit.origin, "received ledger exhausted");
                stop = Some(unit.origin);
                break;
            }

            match locate(&received_units, j, unit.ch, self.tolerance) {
                CharMatch::Matched(found) => {
                    if found != j {
                        displacements += 1;
                        tracing::warn!(
                            character = %unit.ch,
                            expected = j,
                            found,
                            sent_context = %sent_context(&sent_units, i),
                            received_context = %received_context(&received_units, j),
                            "confirmed character displaced within tolerance"
                        );
                    }
                    j = found + 1;
                    confirmed_end = unit.origin + 1;
                }
                CharMatch::NotFound => {
                    tracing::debug!(
                        character = %unit.ch,
                        sent_index = unit.origin,
                        sent_context = %sent_context(&sent_units, i),
                        received_context = %received_context(&received_units, j),
                        "character not confirmed"
                    );
                    stop = Some(unit.origin);
                    break;
                }
                CharMatch::Divergence { found } => {
                    return Err(AlignmentError {
                        character: unit.ch.to_string(),
                        sent_index: unit.origin,
                        expected: j,
                        found,
                        tolerance: self.tolerance,
                        sent_context: sent_context(&sent_units, i),
                        received_context: received_context(&received_units, j),
                    });
                }
            }
        }

        let resume_at = match stop {
            Some(origin) => origin.min(confirmed_end),
            None => sent.len(),
        };

        Ok(Resync {
            resume_at,
            remaining: sent[resume_at..].iter().collect(),
            displacements,
        })
    }
}

/// Searches `received` from `from` onward for `target`.
///
/// Displacement counts only the non-whitespace characters passed over.
pub fn locate(received: &[char], from: usize, target: char, tolerance: usize) -> CharMatch {
    let mut displacement = 0;
    for (pos, &c) in received.iter().enumerate().skip(from) {
        if c == target {
            return if displacement <= tolerance {
                CharMatch::Matched(pos)
            } else {
                CharMatch::Divergence { found: pos }
            };
        }
        if !c.is_whitespace() {
            displacement += 1;
        }
    }
    CharMatch::NotFound
}

/// Transliterates text to the form the service confirms it in.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        push_normalized(c, &mut out);
    }
    out
}

fn push_normalized(c: char, out: &mut String) {
    if c.is_ascii() {
        out.push(c);
    } else if let Some(ascii) = deunicode::deunicode_char(c) {
        out.push_str(ascii);
    }
}

/// One normalized character and the sent index it came from.
struct SentUnit {
    ch: char,
    origin: usize,
}

fn normalize_sent(sent: &[char]) -> Vec<SentUnit> {
    let mut units = Vec::with_capacity(sent.len());
    let mut buf = String::new();
    for (origin, &c) in sent.iter().enumerate() {
        buf.clear();
        push_normalized(c, &mut buf);
        units.extend(buf.chars().map(|ch| SentUnit { ch, origin }));
    }
    units
}

fn normalize_received(received: &[String]) -> Vec<char> {
    received
        .iter()
        .flat_map(|entry| normalize(entry).chars().collect::<Vec<_>>())
        .collect()
}

fn sent_context(units: &[SentUnit], center: usize) -> String {
    let start = center.saturating_sub(CONTEXT_RADIUS);
    let end = (center + CONTEXT_RADIUS).min(units.len());
    units[start..end].iter().map(|u| u.ch).collect()
}

fn received_context(units: &[char], center: usize) -> String {
    let start = center.saturating_sub(CONTEXT_RADIUS).min(units.len());
    let end = (center + CONTEXT_RADIUS).min(units.len());
    units[start..end].iter().collect()
}
