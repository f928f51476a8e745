// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Temperature bands and the band partition.
//!
//! A partition is an ordered list of contiguous integer temperature ranges
//! covering 0-100 °C, each mapped to a fixed fan duty percentage. Unlike an
//! interpolated curve, every temperature resolves to exactly one band.

use crate::error::PartitionError;
use serde::{Deserialize, Serialize};

/// Lowest temperature bound of the partition domain.
pub const DOMAIN_MIN: u8 = 0;

/// Highest temperature bound of the partition domain.
pub const DOMAIN_MAX: u8 = 100;

/// Duty returned when there is no temperature to look up.
pub const FALLBACK_SPEED: u8 = 50;

/// A contiguous temperature range mapped to one duty percentage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Band {
    /// Lower bound in degrees Celsius (inclusive)
    #[serde(alias = "min")]
    pub low: u8,
    /// Upper bound in degrees Celsius (inclusive)
    #[serde(alias = "max")]
    pub high: u8,
    /// Fan duty percentage (0-100)
    pub speed: u8,
}

impl Band {
    pub const fn new(low: u8, high: u8, speed: u8) -> Self {
        Self { low, high, speed }
    }

    /// Whether a reading falls inside this band.
    ///
    /// Bounds are integers but readings are not, so the band covers the
    /// half-open interval `[low, high + 1)`.
    pub fn contains(&self, temp_c: f64) -> bool {
        temp_c >= f64::from(self.low) && temp_c < f64::from(self.high) + 1.0
    }

    /// Number of whole degrees covered.
    pub fn width(&self) -> u8 {
        self.high.saturating_sub(self.low) + 1
    }
}

/// A validated, non-empty, gap-free partition of 0-100 °C.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandPartition {
    bands: Vec<Band>,
}

impl BandPartition {
    /// Build a partition, rejecting bands that break any invariant.
    pub fn new(bands: Vec<Band>) -> Result<Self, PartitionError> {
        validate(&bands)?;
        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn into_bands(self) -> Vec<Band> {
        self.bands
    }

    /// Look up the duty percentage for a temperature reading.
    pub fn speed_for(&self, temp_c: Option<f64>) -> u8 {
        speed_for(&self.bands, temp_c)
    }
}

impl Default for BandPartition {
    fn default() -> Self {
        Self {
            bands: default_bands(),
        }
    }
}

/// Resolve the duty for `temp_c` against an ordered band list.
///
/// - No reading (or NaN): [`FALLBACK_SPEED`]
/// - Below or inside the first band: the first band's speed
/// - Inside an interior band: that band's speed
/// - At or above the last band's lower bound: the last band's speed
///
/// The open-ended extremes accept any reading without clamping.
pub fn speed_for(bands: &[Band], temp_c: Option<f64>) -> u8 {
    let Some(temp) = temp_c.filter(|t| !t.is_nan()) else {
        return FALLBACK_SPEED;
    };
    let (Some(first), Some(last)) = (bands.first(), bands.last()) else {
        return FALLBACK_SPEED;
    };

    if temp < f64::from(first.high) + 1.0 {
        return first.speed;
    }

    if bands.len() > 2 {
        if let Some(band) = bands[1..bands.len() - 1].iter().find(|b| b.contains(temp)) {
            return band.speed;
        }
    }

    if temp >= f64::from(last.low) {
        return last.speed;
    }

    // Only reachable with a gap between bands.
    FALLBACK_SPEED
}

/// Check every partition invariant, reporting the first violation.
pub fn validate(bands: &[Band]) -> Result<(), PartitionError> {
    let (Some(first), Some(last)) = (bands.first(), bands.last()) else {
        return Err(PartitionError::Empty);
    };

    for (index, band) in bands.iter().enumerate() {
        for value in [band.low, band.high, band.speed] {
            if value > DOMAIN_MAX {
                return Err(PartitionError::OutOfRange { index, value });
            }
        }
        if band.high < band.low {
            return Err(PartitionError::Inverted {
                index,
                low: band.low,
                high: band.high,
            });
        }
    }

    if first.low != DOMAIN_MIN {
        return Err(PartitionError::FirstLow { low: first.low });
    }
    if last.high != DOMAIN_MAX {
        return Err(PartitionError::LastHigh { high: last.high });
    }

    for (i, pair) in bands.windows(2).enumerate() {
        let expected = u16::from(pair[0].high) + 1;
        if u16::from(pair[1].low) != expected {
            return Err(PartitionError::NotContiguous {
                index: i + 1,
                expected,
                found: pair[1].low,
            });
        }
    }

    Ok(())
}

/// The built-in seven band partition.
pub fn default_bands() -> Vec<Band> {
    vec![
        Band::new(0, 39, 0),
        Band::new(40, 49, 20),
        Band::new(50, 59, 35),
        Band::new(60, 69, 50),
        Band::new(70, 79, 70),
        Band::new(80, 89, 85),
        Band::new(90, 100, 100),
    ]
}
