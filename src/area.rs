//! The 34 logical regions of the Mai2 touch surface.

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    Error,
    Result,
};

/// One Mai2 touch region. The discriminant is the 1-based wire index; region
/// `n` occupies bit `n - 1` of the Serial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Area {
    A1 = 1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
    A8,
    B1,
    B2,
    B3,
    B4,
    B5,
    B6,
    B7,
    B8,
    C1,
    C2,
    D1,
    D2,
    D3,
    D4,
    D5,
    D6,
    D7,
    D8,
    E1,
    E2,
    E3,
    E4,
    E5,
    E6,
    E7,
    E8,
}

const NAMES: [&str; 34] = [
    "A1", "A2", "A3", "A4", "A5", "A6", "A7", "A8", //
    "B1", "B2", "B3", "B4", "B5", "B6", "B7", "B8", //
    "C1", "C2", //
    "D1", "D2", "D3", "D4", "D5", "D6", "D7", "D8", //
    "E1", "E2", "E3", "E4", "E5", "E6", "E7", "E8",
];

impl Area {
    /// Arcade binding order, A1 first.
    pub const ALL: [Self; 34] = [
        Self::A1, Self::A2, Self::A3, Self::A4, Self::A5, Self::A6, Self::A7, Self::A8,
        Self::B1, Self::B2, Self::B3, Self::B4, Self::B5, Self::B6, Self::B7, Self::B8,
        Self::C1, Self::C2,
        Self::D1, Self::D2, Self::D3, Self::D4, Self::D5, Self::D6, Self::D7, Self::D8,
        Self::E1, Self::E2, Self::E3, Self::E4, Self::E5, Self::E6, Self::E7, Self::E8,
    ];

    /// Region for a 1-based wire index.
    pub const fn from_index(index: u8) -> Option<Self> {
        if index >= 1 && index <= 34 {
            Some(Self::ALL[(index - 1) as usize])
        } else {
            None
        }
    }

    /// Region for a 0-based slot (bit position).
    pub const fn from_slot(slot: usize) -> Option<Self> {
        if slot < 34 { Some(Self::ALL[slot]) } else { None }
    }

    pub const fn index(self) -> u8 {
        self as u8
    }

    pub const fn slot(self) -> usize {
        self as usize - 1
    }

    pub const fn bit(self) -> u64 {
        1 << self.slot()
    }

    pub const fn name(self) -> &'static str {
        NAMES[self.slot()]
    }
}

impl TryFrom<u8> for Area {
    type Error = Error;

    fn try_from(index: u8) -> Result<Self> {
        Self::from_index(index).ok_or(Error::InvalidArgument)
    }
}

impl From<Area> for u8 {
    fn from(area: Area) -> Self {
        area.index()
    }
}

impl core::fmt::Display for Area {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Combined bits of a set of regions.
pub fn mask_of(areas: &[Area]) -> u64 {
    areas.iter().fold(0, |acc, a| acc | a.bit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_order_matches_arcade_layout() {
        assert_eq!(Area::A1.index(), 1);
        assert_eq!(Area::B1.index(), 9);
        assert_eq!(Area::C1.index(), 17);
        assert_eq!(Area::C2.index(), 18);
        assert_eq!(Area::D1.index(), 19);
        assert_eq!(Area::E1.index(), 27);
        assert_eq!(Area::E8.index(), 34);
        for (i, area) in Area::ALL.iter().enumerate() {
            assert_eq!(area.slot(), i);
            assert_eq!(Area::from_slot(i), Some(*area));
        }
    }

    #[test]
    fn bits_and_names() {
        assert_eq!(Area::A1.bit(), 1);
        assert_eq!(Area::C1.bit(), 1 << 16);
        assert_eq!(Area::E8.bit(), 1 << 33);
        assert_eq!(Area::D5.name(), "D5");
        assert_eq!(mask_of(&[Area::A1, Area::A2]), 0b11);
    }

    #[test]
    fn rejects_out_of_range_index() {
        assert_eq!(Area::from_index(0), None);
        assert_eq!(Area::from_index(35), None);
        assert_eq!(Area::try_from(35), Err(Error::InvalidArgument));
    }
}
