//! Assembles streamed model fragments into completed turns.

use plugforge_types::protocol::Part;

/// In-flight buffer for one upstream turn.
///
/// Text fragments are kept in arrival order and joined with no separator
/// when the turn completes. Parts carrying only inline data are dropped.
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    fragments: Vec<String>,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the text of every text part; returns how many were kept.
    pub fn push_parts(&mut self, parts: &[Part]) -> usize {
        let before = self.fragments.len();
        self.fragments.extend(
            parts
                .iter()
                .filter_map(Part::text_content)
                .map(str::to_string),
        );
        self.fragments.len() - before
    }

    /// Join the buffered fragments and reset the buffer.
    pub fn complete(&mut self) -> String {
        let text = self.fragments.concat();
        self.fragments.clear();
        text
    }

    /// Apply one upstream frame. Content is appended before the
    /// turn-complete flag is honoured, so a frame carrying both yields a
    /// turn that includes its own parts.
    pub fn apply(&mut self, parts: &[Part], turn_complete: bool) -> Option<String> {
        self.push_parts(parts);
        turn_complete.then(|| self.complete())
    }

    /// Discard the in-flight turn.
    pub fn clear(&mut self) {
        self.fragments.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }
}
