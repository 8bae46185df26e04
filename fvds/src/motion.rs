//! Diamond-pattern motion search in half-pixel units.

use std::ops::{Add, Mul, Sub};

use log::trace;

use crate::bitstream::signed_varint_bits;
use crate::frame::Frame;
use crate::rdo::motion_rd_cost;
use crate::tile::{Tile, get_tile_half8, sad64};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MotionVector {
    pub x: i32,
    pub y: i32,
}

impl MotionVector {
    pub const ZERO: MotionVector = MotionVector { x: 0, y: 0 };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Bits to code `self` as a delta from `pred`, excluding the mode bit.
    pub fn delta_bits(self, pred: MotionVector) -> u32 {
        signed_varint_bits(self.x - pred.x) + signed_varint_bits(self.y - pred.y)
    }
}

impl Add for MotionVector {
    type Output = MotionVector;

    fn add(self, rhs: MotionVector) -> MotionVector {
        MotionVector::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for MotionVector {
    type Output = MotionVector;

    fn sub(self, rhs: MotionVector) -> MotionVector {
        MotionVector::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<i32> for MotionVector {
    type Output = MotionVector;

    fn mul(self, rhs: i32) -> MotionVector {
        MotionVector::new(self.x * rhs, self.y * rhs)
    }
}

/// Two rows of coded vectors for median prediction across a frame.
///
/// Vectors are stored relative to their block position. Intra blocks store
/// the predictor they were given.
#[derive(Debug, Clone)]
pub struct VectorPredictor {
    rows: [Vec<MotionVector>; 2],
    current: usize,
    first_row: bool,
}

impl VectorPredictor {
    pub fn new(columns: usize) -> Self {
        Self {
            rows: [vec![MotionVector::ZERO; columns], vec![MotionVector::ZERO; columns]],
            current: 0,
            first_row: true,
        }
    }

    /// Median of left, above and above-right, taken per component.
    pub fn predict(&self, column: usize) -> MotionVector {
        let row = &self.rows[self.current];
        let above = &self.rows[1 - self.current];
        let mut xs = [0i32; 3];
        let mut ys = [0i32; 3];
        let mut n = 0;
        let mut push = |v: MotionVector| {
            xs[n] = v.x;
            ys[n] = v.y;
            n += 1;
        };
        if column > 0 {
            push(row[column - 1]);
        }
        if !self.first_row {
            push(above[column]);
            if column + 1 < above.len() {
                push(above[column + 1]);
            }
        }
        if n == 0 {
            return MotionVector::ZERO;
        }
        xs[..n].sort_unstable();
        ys[..n].sort_unstable();
        MotionVector::new(xs[n / 2], ys[n / 2])
    }

    pub fn store(&mut self, column: usize, vector: MotionVector) {
        self.rows[self.current][column] = vector;
    }

    pub fn next_row(&mut self) {
        self.current = 1 - self.current;
        self.first_row = false;
    }
}

const LARGE_DIAMOND: [MotionVector; 8] = [
    MotionVector::new(-2, 0),
    MotionVector::new(-1, -1),
    MotionVector::new(0, -2),
    MotionVector::new(1, -1),
    MotionVector::new(2, 0),
    MotionVector::new(1, 1),
    MotionVector::new(0, 2),
    MotionVector::new(-1, 1),
];

const SMALL_DIAMOND: [MotionVector; 4] = [
    MotionVector::new(-1, 0),
    MotionVector::new(0, -1),
    MotionVector::new(1, 0),
    MotionVector::new(0, 1),
];

/// Evaluations allowed per diamond phase.
pub const MAX_EVALUATIONS: u32 = 128;
const REJECTED: i32 = 999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionSearch {
    /// Vector with the lowest rate-distortion score.
    pub vector: MotionVector,
    /// Lowest SAD seen during the search, not necessarily at `vector`.
    pub best_distortion: i32,
    pub large_diamond_evaluations: u32,
    pub small_diamond_evaluations: u32,
}

struct Candidate {
    vector: MotionVector,
    distortion: i32,
    bits: u32,
}

struct Search<'a> {
    target: &'a [Tile; 3],
    reference: &'a Frame,
    center: MotionVector,
    cheap: MotionVector,
    scratch: Tile,
    best: Candidate,
    best_rd: i32,
    best_rd_vector: MotionVector,
}

impl Search<'_> {
    fn distortion(&mut self, v: MotionVector) -> i32 {
        let half_height = (self.reference.height as i32 >> 1) * 2;
        let lowest = (self.reference.height as i32 - 8) * 2;
        if (self.center.y < half_height && v.y > lowest) || (self.center.y >= half_height && v.y < 0) {
            return REJECTED;
        }
        let width = self.reference.width as usize;
        let height = self.reference.height as usize;
        let planes = [&self.reference.r, &self.reference.g, &self.reference.b];
        let mut score = 0;
        for (plane, target) in planes.into_iter().zip(self.target) {
            get_tile_half8(plane, width, height, v.x, v.y, &mut self.scratch);
            score += sad64(target, &self.scratch) as i32;
        }
        score
    }

    fn bits(&self, v: MotionVector) -> u32 {
        if v == self.cheap { 1 } else { 1 + v.delta_bits(self.cheap) }
    }

    /// Scores `v`, returning whether it became the new distortion best.
    fn evaluate(&mut self, v: MotionVector) -> bool {
        let distortion = self.distortion(v);
        let bits = self.bits(v);
        let rd = motion_rd_cost(bits, distortion);

        let improved = distortion < self.best.distortion
            || (distortion == self.best.distortion && bits < self.best.bits);
        if improved {
            self.best = Candidate {
                vector: v,
                distortion,
                bits,
            };
        }
        if rd < self.best_rd || (rd == self.best_rd && distortion < self.best.distortion) {
            self.best_rd = rd;
            self.best_rd_vector = v;
        }
        improved
    }

    fn diamond(&mut self, pattern: &[MotionVector], mut center: MotionVector) -> (MotionVector, u32) {
        let mut count = 0;
        loop {
            let mut moved = false;
            for &step in pattern {
                moved |= self.evaluate(center + step);
                count += 1;
            }
            center = self.best.vector;
            if !moved || count >= MAX_EVALUATIONS {
                return (center, count);
            }
        }
    }
}

/// Searches `reference` for the 8x8 RGB `target` tiles.
///
/// `center` is the block position and `cheap` the predicted vector, both in
/// absolute half-pel coordinates. Vectors that cross into the other half of
/// the frame vertically are rejected.
pub fn find_motion_vector(
    target: &[Tile; 3],
    reference: &Frame,
    center: MotionVector,
    cheap: MotionVector,
) -> MotionSearch {
    let mut search = Search {
        target,
        reference,
        center,
        cheap,
        scratch: [0; 64],
        best: Candidate {
            vector: center,
            distortion: 0,
            bits: 0,
        },
        best_rd: 0,
        best_rd_vector: center,
    };
    let distortion = search.distortion(center);
    let bits = search.bits(center);
    search.best = Candidate {
        vector: center,
        distortion,
        bits,
    };
    search.best_rd = motion_rd_cost(bits, distortion);

    search.evaluate(cheap);

    let (search_center, large) = search.diamond(&LARGE_DIAMOND, cheap);
    let (_, small) = search.diamond(&SMALL_DIAMOND, search_center);

    trace!(
        "motion search at {:?}: vector {:?}, sad {}, {}+{} evaluations",
        center, search.best_rd_vector, search.best.distortion, large, small
    );

    MotionSearch {
        vector: search.best_rd_vector,
        best_distortion: search.best.distortion,
        large_diamond_evaluations: large,
        small_diamond_evaluations: small,
    }
}
