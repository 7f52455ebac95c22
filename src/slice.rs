use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::common::MAX_DIMS;
use crate::window::{Dimension, Window};

/// The number of window dimensions covered by one dispatched slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum SliceRank {
    One,
    Two,
    Three,
}

impl SliceRank {
    pub fn get(&self) -> usize {
        match self {
            SliceRank::One => 1,
            SliceRank::Two => 2,
            SliceRank::Three => 3,
        }
    }
}

impl Display for SliceRank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}D", self.get())
    }
}

impl Window {
    /// Returns the first slice of `rank`: dimensions below `rank` are copied,
    /// and every higher dimension is narrowed to its first step.
    pub fn first_slice(&self, rank: SliceRank) -> Window {
        let mut slice = *self;
        for d in rank.get()..MAX_DIMS {
            slice.set(d, first_step(self.dim(d)));
        }
        slice
    }

    /// Moves `slice` to the next slice of `self` in row-major order, the
    /// lowest dimension at or above `rank` varying fastest.
    ///
    /// Returns `false`, leaving `slice` back at the first slice, once every
    /// slice has been visited.
    pub fn slide_slice(&self, slice: &mut Window, rank: SliceRank) -> bool {
        for d in rank.get()..MAX_DIMS {
            let full = self.dim(d);
            let next = full.step_end(slice.dim(d).start());
            if next < full.end() {
                slice.set(d, Dimension::new(next, full.step_end(next), full.step()));
                return true;
            }
            slice.set(d, first_step(full));
        }
        false
    }

    /// The number of slices of `rank` in `self`. Zero if any dimension at or
    /// above `rank` is empty.
    pub fn num_slices(&self, rank: SliceRank) -> u64 {
        (rank.get()..MAX_DIMS)
            .map(|d| u64::from(self.num_iterations(d)))
            .product()
    }

    pub fn slices(&self, rank: SliceRank) -> Slices<'_> {
        Slices {
            window: self,
            rank,
            next: (self.num_slices(rank) > 0).then(|| self.first_slice(rank)),
        }
    }
}

fn first_step(full: &Dimension) -> Dimension {
    Dimension::new(full.start(), full.step_end(full.start()), full.step())
}

/// Iterates over the slices of a [Window] (see [Window::slices]).
#[derive(Debug, Clone)]
pub struct Slices<'a> {
    window: &'a Window,
    rank: SliceRank,
    next: Option<Window>,
}

impl Iterator for Slices<'_> {
    type Item = Window;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        let mut following = current;
        self.next = self
            .window
            .slide_slice(&mut following, self.rank)
            .then_some(following);
        Some(current)
    }
}

/// An owned, restartable position in the slices of a window.
///
/// Operands iterated in lock-step each hold their own cursor, and the
/// dispatcher advances them together.
#[derive(Debug, Clone)]
pub struct SliceCursor {
    window: Window,
    rank: SliceRank,
    current: Window,
    total: u64,
    visited: u64,
}

impl SliceCursor {
    pub fn new(window: Window, rank: SliceRank) -> Self {
        let current = window.first_slice(rank);
        let total = window.num_slices(rank);
        SliceCursor {
            window,
            rank,
            current,
            total,
            visited: 0,
        }
    }

    /// Rewinds to the first slice and returns it.
    pub fn first(&mut self) -> &Window {
        self.current = self.window.first_slice(self.rank);
        self.visited = 0;
        &self.current
    }

    pub fn current(&self) -> &Window {
        &self.current
    }

    /// Moves to the next slice. Returns `false` if there is none.
    pub fn advance(&mut self) -> bool {
        if self.window.slide_slice(&mut self.current, self.rank) {
            self.visited += 1;
            true
        } else {
            self.visited = self.total;
            false
        }
    }

    pub fn rank(&self) -> SliceRank {
        self.rank
    }

    pub fn num_slices(&self) -> u64 {
        self.total
    }

    /// Slices not yet visited, counting the current one.
    pub fn remaining(&self) -> u64 {
        self.total - self.visited
    }
}
