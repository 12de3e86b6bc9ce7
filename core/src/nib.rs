//! Interlock tab descriptors.
//!
//! A nib is two cubic Bézier segments bulging in or out of one piece side. The
//! piece across the edge stores the exact inverse of the same descriptor.

use serde::{Deserialize, Serialize};

use crate::grid::{DIR_DOWN, DIR_LEFT, DIR_RIGHT, DIR_UP};
use crate::rng::Lcg;

pub const NIB_BENDINESS: f64 = 0.5;
/// Shoulder control y offset; keeps the base of the nib flush with the edge.
pub const NIB_SHOULDER_Y: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Orientation {
    TopIn = 0,
    TopOut = 1,
    RightIn = 2,
    RightOut = 3,
    BottomIn = 4,
    BottomOut = 5,
    LeftIn = 6,
    LeftOut = 7,
}

const INVERSE_TABLE: [Orientation; 8] = [
    Orientation::BottomOut,
    Orientation::BottomIn,
    Orientation::LeftOut,
    Orientation::LeftIn,
    Orientation::TopOut,
    Orientation::TopIn,
    Orientation::RightOut,
    Orientation::RightIn,
];

const SIDE_TABLE: [usize; 8] = [
    DIR_UP, DIR_UP, DIR_RIGHT, DIR_RIGHT, DIR_DOWN, DIR_DOWN, DIR_LEFT, DIR_LEFT,
];

impl Orientation {
    pub const ALL: [Orientation; 8] = [
        Orientation::TopIn,
        Orientation::TopOut,
        Orientation::RightIn,
        Orientation::RightOut,
        Orientation::BottomIn,
        Orientation::BottomOut,
        Orientation::LeftIn,
        Orientation::LeftOut,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    /// Orientation of the same nib seen from the neighbouring piece.
    pub fn inverse(self) -> Self {
        INVERSE_TABLE[self as usize]
    }

    /// Piece side the nib sits on, as a `DIR_*` index.
    pub fn side(self) -> usize {
        SIDE_TABLE[self as usize]
    }

    pub fn is_in(self) -> bool {
        self.index() % 2 == 0
    }
}

/// Control offsets of a nib in nib-size units: `first` and `shoulder` shape
/// the leading curve, `second` the smooth continuation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NibSpec {
    pub orientation: Orientation,
    pub first: (f64, f64),
    pub shoulder: (f64, f64),
    pub second: (f64, f64),
}

fn bend(rng: &mut Lcg) -> f64 {
    (rng.next_f64() * 2.0 - 1.0) * NIB_BENDINESS
}

impl NibSpec {
    /// Draws five offsets in a fixed order; the shoulder y is not random.
    pub fn random(orientation: Orientation, rng: &mut Lcg) -> Self {
        let first_x = bend(rng);
        let first_y = bend(rng);
        let shoulder_x = bend(rng);
        let second_x = bend(rng);
        let second_y = bend(rng);
        Self {
            orientation,
            first: (first_x, first_y),
            shoulder: (shoulder_x, NIB_SHOULDER_Y),
            second: (second_x, second_y),
        }
    }

    pub fn inverse(&self) -> Self {
        Self {
            orientation: self.orientation.inverse(),
            first: (-self.second.0, self.second.1),
            shoulder: self.shoulder,
            second: (-self.first.0, self.first.1),
        }
    }

    pub fn offsets(&self) -> [f64; 6] {
        [
            self.first.0,
            self.first.1,
            self.shoulder.0,
            self.shoulder.1,
            self.second.0,
            self.second.1,
        ]
    }
}
