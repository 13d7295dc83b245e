//! PDSCH DM-RS symbol count
//!
//! Mapping type A, single-symbol DM-RS, `dmrs-AdditionalPosition = pos2`
//! (TS 38.211 Table 7.4.1.1.2-3). `ld` is the duration between the first
//! symbol of the slot and the last PDSCH symbol.

use common::OfdmSymbolRange;

/// Number of DM-RS symbols of a type A PDSCH occupying `symbols`
pub fn nof_dmrs_symbols_type_a(symbols: OfdmSymbolRange) -> u8 {
    match symbols.stop {
        0..=7 => 1,
        8..=9 => 2,
        _ => 3,
    }
}

/// DM-RS resource elements per PRB (configuration type 1, no data in CDM groups)
pub fn nof_dmrs_res_per_prb(symbols: OfdmSymbolRange) -> u16 {
    12 * nof_dmrs_symbols_type_a(symbols) as u16
}
