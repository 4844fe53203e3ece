//! Stack positions and the ranges trackers have scanned.
//!
//! Stacks grow down: a frame with a lower stack pointer is *deeper* (a callee of) a frame
//! with a higher one. [`StackRange`] is the closed interval of frames a tracker has
//! visited, `low` being the deepest and `high` the outermost.

use std::fmt;

/// A stack pointer value identifying a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackFrame(pub u64);

impl StackFrame {
    /// The deepest possible frame.
    pub const MIN: StackFrame = StackFrame(0);
    /// The outermost possible frame.
    pub const MAX: StackFrame = StackFrame(u64::MAX);
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SP=0x{:X}", self.0)
    }
}

/// The frames a tracker has scanned so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRange {
    /// Deepest frame scanned
    pub low: StackFrame,
    /// Outermost frame scanned
    pub high: StackFrame,
}

impl Default for StackRange {
    fn default() -> Self {
        StackRange {
            low: StackFrame::MAX,
            high: StackFrame::MIN,
        }
    }
}

impl StackRange {
    /// Creates the range `[low, high]`.
    #[must_use]
    pub fn new(low: StackFrame, high: StackFrame) -> Self {
        StackRange { low, high }
    }

    /// Forgets every scanned frame.
    pub fn reset(&mut self) {
        *self = StackRange::default();
    }

    /// Returns `true` if no frame has been scanned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.low > self.high
    }

    /// Returns `true` if `frame` lies within the scanned frames.
    #[must_use]
    pub fn contains(&self, frame: StackFrame) -> bool {
        !self.is_empty() && self.low <= frame && frame <= self.high
    }

    /// Returns `true` once a walk reaching `frame` has passed the deepest scanned frame.
    ///
    /// An empty range is superseded by every frame.
    #[must_use]
    pub fn is_superseded_by(&self, frame: StackFrame) -> bool {
        frame >= self.low
    }

    /// Returns `true` if `frame` is deeper than every scanned frame.
    #[must_use]
    pub fn is_below(&self, frame: StackFrame) -> bool {
        !self.is_empty() && frame < self.low
    }

    /// Adds `frame` to the scanned frames.
    pub fn extend(&mut self, frame: StackFrame) {
        if self.is_empty() {
            self.low = frame;
            self.high = frame;
        } else {
            self.low = self.low.min(frame);
            self.high = self.high.max(frame);
        }
    }

    /// Merges the frames scanned by an enclosing tracker into this range.
    pub fn combine_with(&mut self, previous: &StackRange) {
        if previous.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = *previous;
            return;
        }

        self.low = self.low.min(previous.low);
        self.high = self.high.max(previous.high);
    }
}

impl fmt::Display for StackRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "[empty]")
        } else {
            write!(f, "[0x{:X}, 0x{:X}]", self.low.0, self.high.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_range() {
        let range = StackRange::default();
        assert!(range.is_empty());
        assert!(!range.contains(StackFrame(0x1000)));
        assert!(!range.is_below(StackFrame(0x1000)));
        assert_eq!(range.to_string(), "[empty]");
    }

    #[test]
    fn test_extend() {
        let mut range = StackRange::default();
        range.extend(StackFrame(0x9000));
        range.extend(StackFrame(0xA000));
        range.extend(StackFrame(0x9800));
        assert_eq!(range, StackRange::new(StackFrame(0x9000), StackFrame(0xA000)));
        assert!(range.contains(StackFrame(0x9800)));
        assert!(range.is_below(StackFrame(0x8000)));
        assert!(range.is_superseded_by(StackFrame(0x9000)));
        assert!(!range.is_superseded_by(StackFrame(0x8FFF)));

        range.reset();
        assert!(range.is_empty());
    }

    #[test]
    fn test_combine() {
        let mut current = StackRange::new(StackFrame(0x8800), StackFrame(0x9000));
        current.combine_with(&StackRange::new(StackFrame(0x9000), StackFrame(0xA000)));
        assert_eq!(current, StackRange::new(StackFrame(0x8800), StackFrame(0xA000)));

        let mut empty = StackRange::default();
        empty.combine_with(&current);
        assert_eq!(empty, current);

        current.combine_with(&StackRange::default());
        assert_eq!(current, StackRange::new(StackFrame(0x8800), StackFrame(0xA000)));
    }
}
