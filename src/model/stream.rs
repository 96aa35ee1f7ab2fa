/// Incremental emission of generated text.
///
/// The generation loop decodes the full completion after every step and feeds
/// it through a `ChunkEmitter`, which yields only the new text. The emitter
/// holds back enough of the tail that a stop string can never be partially
/// emitted before it is recognised, and truncates at the earliest stop
/// occurrence. Both the synchronous and the streaming endpoint are defined as
/// the concatenation of these chunks, so their outputs agree.
///
/// Byte-level BPE decodes are not prefix-stable: a token ending mid-way
/// through a multi-byte character decodes lossily to U+FFFD, and the next
/// step's decode replaces it with the real character at a different byte
/// length. Emission therefore stops before the first U+FFFD, and the emitter
/// tracks the emitted text itself so a reshaped snapshot can never be sliced
/// at a stale offset.
pub struct ChunkEmitter {
    stops: Vec<String>,
    holdback: usize,
    emitted: String,
    halted: bool,
}

#[derive(Debug, PartialEq)]
pub struct Emission {
    pub chunk: Option<String>,
    pub halt: bool,
}

impl ChunkEmitter {
    pub fn new(stops: &[String]) -> Self {
        let holdback = stops
            .iter()
            .map(|s| s.len().saturating_sub(1))
            .max()
            .unwrap_or(0);
        Self {
            stops: stops.to_vec(),
            holdback,
            emitted: String::new(),
            halted: false,
        }
    }

    /// Feed the completion decoded so far. Returns the newly emittable chunk,
    /// if any, and whether a stop string ended the generation.
    pub fn push(&mut self, decoded: &str) -> Emission {
        if self.halted {
            return Emission {
                chunk: None,
                halt: true,
            };
        }

        if let Some(idx) = self.earliest_stop(decoded) {
            self.halted = true;
            let chunk = self.take(decoded, idx);
            return Emission { chunk, halt: true };
        }

        let safe = decoded
            .len()
            .saturating_sub(self.holdback)
            .min(stable_len(decoded));
        Emission {
            chunk: self.take(decoded, safe),
            halt: false,
        }
    }

    /// Flush the held-back tail once generation ended on its own (EOS or the
    /// token budget), still honouring a stop string in the tail.
    pub fn finish(mut self, decoded: &str) -> Option<String> {
        if self.halted {
            return None;
        }
        let end = self.earliest_stop(decoded).unwrap_or(decoded.len());
        self.take(decoded, end)
    }

    fn take(&mut self, decoded: &str, until: usize) -> Option<String> {
        let until = floor_char_boundary(decoded, until);
        if until <= self.emitted.len() {
            return None;
        }
        // A snapshot that rewrote already-emitted text cannot be sliced at
        // the old offset; emit nothing and wait for it to stabilise.
        if !decoded.is_char_boundary(self.emitted.len()) || !decoded.starts_with(&self.emitted) {
            return None;
        }
        let chunk = decoded[self.emitted.len()..until].to_string();
        self.emitted.push_str(&chunk);
        Some(chunk)
    }

    fn earliest_stop(&self, text: &str) -> Option<usize> {
        self.stops
            .iter()
            .filter(|s| !s.is_empty())
            .filter_map(|s| text.find(s.as_str()))
            .min()
    }
}

/// Length of the prefix that later decodes can no longer reshape: everything
/// before the first replacement character.
fn stable_len(text: &str) -> usize {
    text.find('\u{FFFD}').unwrap_or(text.len())
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
