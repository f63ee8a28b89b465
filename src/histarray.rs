//! FIFO of pending branch-history fragments, folded in from
//! `ResourceFull` messages and drained by TNT consumption.

use std::collections::VecDeque;

/// One folded `ResourceFull` contribution: a HTM history pattern (with
/// its repeat count) and the timestamp delta to retire once it is
/// fully drained. A `hist == 0` element is a pure timestamp
/// placeholder (from a `ResourceFull(rcode=0)` with no accompanying
/// history).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HistElement {
    pub hist: u32,
    pub repeat: u32,
    pub timestamp: u64,
    /// Bits already drawn from `hist`'s current repeat cycle. Transient
    /// decode-side bookkeeping, not part of the wire contribution.
    pub consumed: u32,
}

/// The ordered queue of pending history elements.
#[derive(Default)]
pub struct HistArray {
    elements: VecDeque<HistElement>,
}

impl HistArray {
    pub fn new() -> Self {
        HistArray::default()
    }

    pub fn push_back(&mut self, element: HistElement) {
        self.elements.push_back(element);
    }

    pub fn front(&self) -> Option<&HistElement> {
        self.elements.front()
    }

    pub fn front_mut(&mut self) -> Option<&mut HistElement> {
        self.elements.front_mut()
    }

    pub fn pop_front(&mut self) -> Option<HistElement> {
        self.elements.pop_front()
    }

    pub fn size(&self) -> usize {
        self.elements.len()
    }

    pub fn clear(&mut self) {
        self.elements.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistElement> {
        self.elements.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let mut arr = HistArray::new();
        arr.push_back(HistElement {
            hist: 0b10,
            repeat: 0,
            timestamp: 1,
            consumed: 0,
        });
        arr.push_back(HistElement {
            hist: 0b11,
            repeat: 2,
            timestamp: 2,
            consumed: 0,
        });
        assert_eq!(arr.size(), 2);
        assert_eq!(arr.front().unwrap().hist, 0b10);
        let popped = arr.pop_front().unwrap();
        assert_eq!(popped.timestamp, 1);
        assert_eq!(arr.front().unwrap().hist, 0b11);
    }

    #[test]
    fn clear_empties_the_queue() {
        let mut arr = HistArray::new();
        arr.push_back(HistElement::default());
        arr.clear();
        assert_eq!(arr.size(), 0);
    }
}
