// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Band partition editing.
//!
//! Every edit is a pure function over a band slice that returns a corrected
//! copy. A boundary move anchors the edited band on its requested range and
//! pushes neighbours outward until the partition is contiguous again.
//! [`PartitionEditor`] wraps these functions in an edit session holding a
//! working copy next to the last committed partition.

use crate::band::{self, Band, BandPartition, DOMAIN_MAX, DOMAIN_MIN};
use crate::error::EditError;

/// Upper limit on the number of bands.
///
/// Propagation keeps pushed neighbours at least two degrees wide, and 50
/// such bands exactly fill the domain.
pub const MAX_BANDS: usize = 50;

/// Total number of whole degrees in the domain (0..=100).
const DOMAIN_UNITS: u32 = DOMAIN_MAX as u32 + 1;

// ---------------------------------------------------------------------------
// Pure edit functions
// ---------------------------------------------------------------------------

/// Move both boundaries of band `index` and repair the rest of the partition.
///
/// The requested range is clamped to the domain and kept as long as the
/// neighbours can make room for it. Bands pinned against a domain edge
/// push back on the anchor, and as a last resort the partition is
/// renormalized, so the result always satisfies every partition invariant
/// when the input has at most [`MAX_BANDS`] bands.
pub fn move_boundary(
    bands: &[Band],
    index: usize,
    low: u8,
    high: u8,
) -> Result<Vec<Band>, EditError> {
    check_index(bands, index)?;

    let mut out = bands.to_vec();
    let high = high.min(DOMAIN_MAX);
    out[index].low = low.min(high);
    out[index].high = high;

    settle(&mut out, index);
    Ok(out)
}

/// Rescale band widths so they cover 0-100 exactly, keeping speeds and
/// relative proportions.
///
/// Widths are measured as `high - low` (at least 1), scaled to 101 units
/// and rounded. Rounding drift is corrected one unit at a time, shrinking
/// widths above 1 when over and growing widths when under. Bands are then
/// laid out from 0 with the last one ending at 100.
pub fn renormalize(bands: &[Band]) -> Vec<Band> {
    if bands.is_empty() {
        return Vec::new();
    }

    let mut widths: Vec<u32> = bands
        .iter()
        .map(|b| u32::from(b.high.saturating_sub(b.low)).max(1))
        .collect();
    let mut total: u32 = widths.iter().sum();

    if total != DOMAIN_UNITS {
        let scale = f64::from(DOMAIN_UNITS) / f64::from(total);
        for w in &mut widths {
            *w = ((f64::from(*w) * scale).round() as u32).max(1);
        }
        total = widths.iter().sum();

        while total > DOMAIN_UNITS {
            let mut shrunk = false;
            for w in &mut widths {
                if *w > 1 && total > DOMAIN_UNITS {
                    *w -= 1;
                    total -= 1;
                    shrunk = true;
                }
            }
            if !shrunk {
                break; // more bands than degrees
            }
        }
        while total < DOMAIN_UNITS {
            for w in &mut widths {
                if total < DOMAIN_UNITS {
                    *w += 1;
                    total += 1;
                }
            }
        }
    }

    let last = bands.len() - 1;
    let mut low = u32::from(DOMAIN_MIN);
    bands
        .iter()
        .zip(widths)
        .enumerate()
        .map(|(i, (b, width))| {
            let high = if i == last {
                u32::from(DOMAIN_MAX)
            } else {
                (low + width - 1).min(u32::from(DOMAIN_MAX))
            };
            let band = Band::new(low.min(u32::from(DOMAIN_MAX)) as u8, high as u8, b.speed);
            low = high + 1;
            band
        })
        .collect()
}

/// The band appended by "add range": it starts just above the current last
/// band (but no higher than 99) and ends at 100.
pub fn appended_band(bands: &[Band], speed: u8) -> Band {
    let low = bands
        .last()
        .map(|b| b.high.saturating_add(1).min(DOMAIN_MAX - 1))
        .unwrap_or(DOMAIN_MAX - 1);
    Band::new(low, DOMAIN_MAX, speed)
}

// ---------------------------------------------------------------------------
// Propagation
// ---------------------------------------------------------------------------

fn check_index(bands: &[Band], index: usize) -> Result<(), EditError> {
    if index >= bands.len() {
        return Err(EditError::IndexOutOfRange {
            index,
            len: bands.len(),
        });
    }
    Ok(())
}

/// Restore the partition invariants around an anchor band.
fn settle(bands: &mut [Band], anchor: usize) {
    if bands.is_empty() {
        return;
    }
    let last = bands.len() - 1;

    if anchor == 0 {
        pin_first(bands);
    }
    if anchor == last {
        pin_last(bands);
    }

    push_right(bands, anchor);
    push_left(bands, anchor);
    if band::validate(bands).is_ok() {
        return;
    }

    // The anchor crowded one end of the domain. Let the saturated end
    // bands push back on it.
    push_left(bands, last);
    push_right(bands, 0);
    if band::validate(bands).is_ok() {
        return;
    }

    log::debug!("Propagation left an invalid partition, renormalizing");
    let fixed = renormalize(bands);
    bands.copy_from_slice(&fixed);
}

/// Pull every band right of `from` onto the band before it.
fn push_right(bands: &mut [Band], from: usize) {
    for j in from + 1..bands.len() {
        // Leave room for at least one more degree above.
        let new_low = bands[j - 1].high.saturating_add(1).min(DOMAIN_MAX - 1);
        let next = &mut bands[j];
        let before = *next;

        if next.high < new_low + 1 {
            next.high = (new_low + 1).min(DOMAIN_MAX);
        }
        next.low = new_low;

        if *next == before {
            break;
        }
    }
    pin_last(bands);
}

/// Pull every band left of `from` onto the band after it.
fn push_left(bands: &mut [Band], from: usize) {
    for j in (0..from).rev() {
        // Leave room for at least one more degree below.
        let new_high = bands[j + 1].low.saturating_sub(1).max(DOMAIN_MIN + 1);
        let prev = &mut bands[j];
        let before = *prev;

        if prev.low + 1 > new_high {
            prev.low = new_high.saturating_sub(1);
        }
        prev.high = new_high;

        if *prev == before {
            break;
        }
    }
    pin_first(bands);
}

fn pin_first(bands: &mut [Band]) {
    if let Some(first) = bands.first_mut() {
        first.low = DOMAIN_MIN;
        first.high = first.high.max(DOMAIN_MIN + 1);
    }
}

fn pin_last(bands: &mut [Band]) {
    if let Some(last) = bands.last_mut() {
        last.high = DOMAIN_MAX;
        last.low = last.low.min(DOMAIN_MAX - 1);
    }
}

// ---------------------------------------------------------------------------
// Edit session
// ---------------------------------------------------------------------------

/// An open edit of a band partition.
///
/// Edits apply to a working copy; [`commit`](Self::commit) validates and
/// returns it, [`cancel`](Self::cancel) hands back the partition the
/// session started from.
#[derive(Debug, Clone)]
pub struct PartitionEditor {
    committed: BandPartition,
    working: Vec<Band>,
}

impl PartitionEditor {
    pub fn new(committed: BandPartition) -> Self {
        let working = committed.bands().to_vec();
        Self { committed, working }
    }

    /// The working copy, including uncommitted edits.
    pub fn bands(&self) -> &[Band] {
        &self.working
    }

    /// The partition this session started from.
    pub fn committed(&self) -> &BandPartition {
        &self.committed
    }

    pub fn is_dirty(&self) -> bool {
        self.working.as_slice() != self.committed.bands()
    }

    pub fn move_boundary(&mut self, index: usize, low: u8, high: u8) -> Result<(), EditError> {
        self.working = move_boundary(&self.working, index, low, high)?;
        Ok(())
    }

    pub fn set_speed(&mut self, index: usize, speed: u8) -> Result<(), EditError> {
        check_index(&self.working, index)?;
        if speed > DOMAIN_MAX {
            return Err(EditError::SpeedOutOfRange(speed));
        }
        self.working[index].speed = speed;
        Ok(())
    }

    /// Append a band at the top of the domain and return its index.
    ///
    /// The new band is not propagated: it overlaps the previous last band
    /// until the next boundary edit or the commit settles the partition.
    pub fn add_band(&mut self, speed: u8) -> Result<usize, EditError> {
        if self.working.len() >= MAX_BANDS {
            return Err(EditError::TooManyBands { max: MAX_BANDS });
        }
        if speed > DOMAIN_MAX {
            return Err(EditError::SpeedOutOfRange(speed));
        }
        self.working.push(appended_band(&self.working, speed));
        Ok(self.working.len() - 1)
    }

    /// Remove a band and renormalize the remaining ones.
    pub fn remove_band(&mut self, index: usize) -> Result<(), EditError> {
        check_index(&self.working, index)?;
        if self.working.len() == 1 {
            return Err(EditError::LastBand);
        }
        self.working.remove(index);
        self.working = renormalize(&self.working);
        Ok(())
    }

    /// Settle the working copy and make it the committed partition.
    pub fn commit(&mut self) -> Result<BandPartition, EditError> {
        if band::validate(&self.working).is_err() {
            let last = self.working.len().saturating_sub(1);
            settle(&mut self.working, last);
        }
        let partition = BandPartition::new(self.working.clone())?;
        self.committed = partition.clone();
        Ok(partition)
    }

    /// Drop the working copy and return the partition the session started from.
    pub fn cancel(self) -> BandPartition {
        self.committed
    }
}
