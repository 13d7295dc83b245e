//! CRB occupancy bitmaps

use super::GrantInfo;
use common::{CrbInterval, OfdmSymbolRange, MAX_NOF_PRBS, NOF_OFDM_SYMBOLS_PER_SLOT};

const NOF_WORDS: usize = (MAX_NOF_PRBS as usize).div_ceil(64);

/// One bit per CRB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CrbBitmap {
    words: [u64; NOF_WORDS],
}

impl CrbBitmap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bitmap with every CRB of `crbs` set
    pub fn from_interval(crbs: CrbInterval) -> Self {
        let mut bitmap = Self::new();
        bitmap.set_interval(crbs);
        bitmap
    }

    pub fn test(&self, crb: u16) -> bool {
        let crb = crb as usize;
        crb < MAX_NOF_PRBS as usize && self.words[crb / 64] & (1u64 << (crb % 64)) != 0
    }

    pub fn set_interval(&mut self, crbs: CrbInterval) {
        for crb in crbs.start..crbs.stop.min(MAX_NOF_PRBS) {
            self.words[crb as usize / 64] |= 1u64 << (crb % 64);
        }
    }

    pub fn clear_interval(&mut self, crbs: CrbInterval) {
        for crb in crbs.start..crbs.stop.min(MAX_NOF_PRBS) {
            self.words[crb as usize / 64] &= !(1u64 << (crb % 64));
        }
    }

    /// Whether any CRB of `crbs` is set
    pub fn any(&self, crbs: CrbInterval) -> bool {
        (crbs.start..crbs.stop).any(|crb| self.test(crb))
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Bitwise OR with another bitmap
    pub fn merge(&mut self, other: &CrbBitmap) {
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w |= *o;
        }
    }

    /// CRBs of `limits` that are not set
    pub fn complement_within(&self, limits: CrbInterval) -> CrbBitmap {
        let mut free = CrbBitmap::from_interval(limits);
        for (w, o) in free.words.iter_mut().zip(self.words.iter()) {
            *w &= !*o;
        }
        free
    }

    /// Longest run of set CRBs inside `limits`, lowest one on ties
    pub fn longest_set_run(&self, limits: CrbInterval) -> CrbInterval {
        let mut best = CrbInterval::new(limits.start, limits.start);
        let mut run_start = None;
        for crb in limits.start..=limits.stop {
            let set = crb < limits.stop && self.test(crb);
            match (set, run_start) {
                (true, None) => run_start = Some(crb),
                (false, Some(start)) => {
                    if crb - start > best.length() {
                        best = CrbInterval::new(start, crb);
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
        best
    }
}

/// Per-symbol CRB occupancy of one slot and direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotGridBitmap {
    nof_rbs: u16,
    symbols: [CrbBitmap; NOF_OFDM_SYMBOLS_PER_SLOT as usize],
}

impl SlotGridBitmap {
    pub fn new(nof_rbs: u16) -> Self {
        Self {
            nof_rbs: nof_rbs.min(MAX_NOF_PRBS),
            symbols: [CrbBitmap::new(); NOF_OFDM_SYMBOLS_PER_SLOT as usize],
        }
    }

    pub fn nof_rbs(&self) -> u16 {
        self.nof_rbs
    }

    /// Whether `region` lies inside the slot grid
    pub fn in_bounds(&self, region: &GrantInfo) -> bool {
        region.crbs.stop <= self.nof_rbs && region.symbols.stop <= NOF_OFDM_SYMBOLS_PER_SLOT
    }

    pub fn collides(&self, region: &GrantInfo) -> bool {
        self.symbol_bitmaps(region.symbols).any(|bitmap| bitmap.any(region.crbs))
    }

    /// Mark a region busy without any check
    pub fn fill(&mut self, region: &GrantInfo) {
        for symbol in self.symbol_range(region.symbols) {
            self.symbols[symbol].set_interval(region.crbs);
        }
    }

    pub fn clear(&mut self, region: &GrantInfo) {
        for symbol in self.symbol_range(region.symbols) {
            self.symbols[symbol].clear_interval(region.crbs);
        }
    }

    /// CRBs used in any of `symbols`
    pub fn used_crbs(&self, symbols: OfdmSymbolRange) -> CrbBitmap {
        let mut used = CrbBitmap::new();
        for bitmap in self.symbol_bitmaps(symbols) {
            used.merge(bitmap);
        }
        used
    }

    /// CRBs of the cell bandwidth free in all of `symbols`
    pub fn free_crbs(&self, symbols: OfdmSymbolRange) -> CrbBitmap {
        self.used_crbs(symbols).complement_within(CrbInterval::new(0, self.nof_rbs))
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.iter().all(CrbBitmap::is_empty)
    }

    pub fn reset(&mut self) {
        self.symbols = [CrbBitmap::new(); NOF_OFDM_SYMBOLS_PER_SLOT as usize];
    }

    fn symbol_range(&self, symbols: OfdmSymbolRange) -> std::ops::Range<usize> {
        let stop = symbols.stop.min(NOF_OFDM_SYMBOLS_PER_SLOT) as usize;
        (symbols.start as usize).min(stop)..stop
    }

    fn symbol_bitmaps(&self, symbols: OfdmSymbolRange) -> impl Iterator<Item = &CrbBitmap> {
        self.symbols[self.symbol_range(symbols)].iter()
    }
}
