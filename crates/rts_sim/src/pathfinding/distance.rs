//! Exact path lengths of the form `a + b·√2`.

use std::cmp::Ordering;
use std::ops::Add;

use serde::{Deserialize, Serialize};

use crate::math::{fixed_sqrt, Fixed};
use crate::terrain::CellPos;

/// An exact distance `a + b·√2`, measured in half cells.
///
/// Straight steps cost `2`, diagonal steps `2·√2`. Comparisons are exact, so
/// every platform orders the same two path lengths the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ExactDistance {
    /// Rational part.
    pub a: i64,
    /// Coefficient of `√2`.
    pub b: i64,
}

impl ExactDistance {
    /// Zero length.
    pub const ZERO: Self = Self { a: 0, b: 0 };
    /// One orthogonal step.
    pub const STRAIGHT: Self = Self { a: 2, b: 0 };
    /// One diagonal step.
    pub const DIAGONAL: Self = Self { a: 0, b: 2 };

    /// Create a distance.
    #[must_use]
    pub const fn new(a: i64, b: i64) -> Self {
        Self { a, b }
    }

    /// Cost of a single step in the given diagonal-ness.
    #[must_use]
    pub const fn step(diagonal: bool) -> Self {
        if diagonal {
            Self::DIAGONAL
        } else {
            Self::STRAIGHT
        }
    }

    /// Length of the shortest unobstructed 8-direction path between two
    /// cells: `min(dx, dy)` diagonal steps plus the rest straight.
    #[must_use]
    pub fn octile(from: CellPos, to: CellPos) -> Self {
        let dx = 2 * i64::from(from.x.abs_diff(to.x));
        let dy = 2 * i64::from(from.y.abs_diff(to.y));
        let diagonal = dx.min(dy);
        Self::new(dx.max(dy) - diagonal, diagonal)
    }

    /// `self - rhs`, or zero if that would be negative.
    #[must_use]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self::new(self.a - rhs.a, self.b - rhs.b).max(Self::ZERO)
    }

    /// Approximate length in cells.
    #[must_use]
    pub fn to_cells(self) -> Fixed {
        let sqrt2 = fixed_sqrt(Fixed::from_num(2));
        (Fixed::from_num(self.a) + Fixed::from_num(self.b) * sqrt2) / Fixed::from_num(2)
    }
}

impl Add for ExactDistance {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.a + rhs.a, self.b + rhs.b)
    }
}

impl Ord for ExactDistance {
    fn cmp(&self, other: &Self) -> Ordering {
        // Sign of (a1 - a2) + (b1 - b2)·√2.
        let da = i128::from(self.a - other.a);
        let db = i128::from(self.b - other.b);
        match (da.cmp(&0), db.cmp(&0)) {
            (Ordering::Equal, o) | (o, Ordering::Equal) => o,
            (Ordering::Greater, Ordering::Greater) => Ordering::Greater,
            (Ordering::Less, Ordering::Less) => Ordering::Less,
            // Opposite signs: compare da² against 2·db².
            (Ordering::Greater, Ordering::Less) => (da * da).cmp(&(2 * db * db)),
            (Ordering::Less, Ordering::Greater) => (2 * db * db).cmp(&(da * da)),
        }
    }
}

impl PartialOrd for ExactDistance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
