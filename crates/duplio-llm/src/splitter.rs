// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Splits the LLM token stream into sentence-sized synthesis units.
//!
//! A boundary is the first occurrence, after the minimum prefetch length, of
//! sentence-terminal punctuation (`. ? !`), a hard newline, or end of
//! stream. Unit indices are assigned monotonically within the turn.

use duplio_core::types::SynthesisUnit;

/// Accumulates token deltas and emits [`SynthesisUnit`]s at boundaries.
#[derive(Debug)]
pub struct SynthesisSplitter {
    buffer: String,
    next_index: u32,
    min_prefetch_chars: usize,
}

impl SynthesisSplitter {
    pub fn new(min_prefetch_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            next_index: 0,
            min_prefetch_chars,
        }
    }

    /// Number of units emitted so far.
    pub fn units_emitted(&self) -> u32 {
        self.next_index
    }

    /// Feeds one token delta; returns any units completed by it.
    ///
    /// A single delta can complete several units (e.g. a paragraph arriving
    /// in one chunk), so the return is a vec.
    pub fn push(&mut self, delta: &str) -> Vec<SynthesisUnit> {
        self.buffer.push_str(delta);

        let mut units = Vec::new();
        loop {
            match self.find_boundary() {
                Some(split_at) => {
                    let rest = self.buffer.split_off(split_at);
                    let text = std::mem::replace(&mut self.buffer, rest);
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        units.push(SynthesisUnit {
                            index: self.next_index,
                            text,
                        });
                        self.next_index += 1;
                    }
                }
                None => break,
            }
        }
        units
    }

    /// Flushes the remainder at end of stream as a final unit, if any.
    pub fn finish(&mut self) -> Option<SynthesisUnit> {
        let text = std::mem::take(&mut self.buffer);
        let text = text.trim().to_string();
        if text.is_empty() {
            return None;
        }
        let unit = SynthesisUnit {
            index: self.next_index,
            text,
        };
        self.next_index += 1;
        Some(unit)
    }

    /// Byte offset just past the first boundary character at or after the
    /// prefetch minimum, or None if the buffer has no boundary yet.
    fn find_boundary(&self) -> Option<usize> {
        let mut chars_seen = 0usize;
        for (offset, ch) in self.buffer.char_indices() {
            chars_seen += 1;
            if chars_seen < self.min_prefetch_chars {
                continue;
            }
            if matches!(ch, '.' | '?' | '!' | '\n') {
                return Some(offset + ch.len_utf8());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_unit_before_min_prefetch() {
        let mut splitter = SynthesisSplitter::new(60);
        assert!(splitter.push("Short. ").is_empty());
        assert!(splitter.push("Still short. ").is_empty());
    }

    #[test]
    fn unit_emitted_at_first_boundary_past_prefetch() {
        let mut splitter = SynthesisSplitter::new(10);
        let units = splitter.push("This sentence is long enough. And more follows");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].index, 0);
        assert_eq!(units[0].text, "This sentence is long enough.");
    }

    #[test]
    fn one_delta_can_complete_multiple_units() {
        let mut splitter = SynthesisSplitter::new(5);
        let units = splitter.push("First one here. Second one there. tail");
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].text, "First one here.");
        assert_eq!(units[1].text, "Second one there.");
        assert_eq!(units[1].index, 1);
    }

    #[test]
    fn newline_is_a_boundary() {
        let mut splitter = SynthesisSplitter::new(5);
        let units = splitter.push("A list follows\nitem one");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "A list follows");
    }

    #[test]
    fn question_and_exclamation_are_boundaries() {
        let mut splitter = SynthesisSplitter::new(1);
        let units = splitter.push("Really? Yes! ok");
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].text, "Really?");
        assert_eq!(units[1].text, "Yes!");
    }

    #[test]
    fn finish_flushes_remainder() {
        let mut splitter = SynthesisSplitter::new(10);
        splitter.push("And finally a trailing fragment");
        let last = splitter.finish().unwrap();
        assert_eq!(last.text, "And finally a trailing fragment");
        assert_eq!(last.index, 0);
        assert!(splitter.finish().is_none());
    }

    #[test]
    fn indices_are_dense_across_push_and_finish() {
        let mut splitter = SynthesisSplitter::new(5);
        let mut indices: Vec<u32> = splitter
            .push("One two three. Four five six. leftover")
            .iter()
            .map(|u| u.index)
            .collect();
        if let Some(last) = splitter.finish() {
            indices.push(last.index);
        }
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let mut splitter = SynthesisSplitter::new(4);
        let units = splitter.push("héllo wörld. été");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "héllo wörld.");
        let last = splitter.finish().unwrap();
        assert_eq!(last.text, "été");
    }
}
