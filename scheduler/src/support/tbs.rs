//! Transport block size determination (TS 38.214 §5.1.3.2)

use super::dmrs::nof_dmrs_res_per_prb;
use super::mcs::McsDescriptor;
use common::OfdmSymbolRange;

/// Table 5.1.3.2-1, TBS for N_info <= 3824
const TBS_TABLE: [u32; 93] = [
    24, 32, 40, 48, 56, 64, 72, 80, 88, 96, 104, 112, 120, 128, 136, 144, 152, 160, 168, 176,
    184, 192, 208, 224, 240, 256, 272, 288, 304, 320, 336, 352, 368, 384, 408, 432, 456, 480,
    504, 528, 552, 576, 608, 640, 672, 704, 736, 768, 808, 848, 888, 928, 984, 1032, 1064,
    1128, 1160, 1192, 1224, 1256, 1288, 1320, 1352, 1416, 1480, 1544, 1608, 1672, 1736, 1800,
    1864, 1928, 2024, 2088, 2152, 2216, 2280, 2408, 2472, 2536, 2600, 2664, 2728, 2792, 2856,
    2976, 3104, 3240, 3368, 3496, 3624, 3752, 3824,
];

/// Maximum number of REs per PRB used for N_info
const MAX_NOF_RES_PER_PRB: u32 = 156;

/// Inputs of the TBS computation
#[derive(Debug, Clone, Copy)]
pub struct TbsParams {
    pub mcs: McsDescriptor,
    pub nof_prbs: u16,
    pub nof_symbols: u8,
    pub nof_dmrs_res_per_prb: u16,
    /// xOverhead (0 for SI/paging/SRB0 PDSCH)
    pub nof_oh_res_per_prb: u16,
    pub nof_layers: u8,
}

/// Transport block size in bits
pub fn compute_tbs_bits(params: &TbsParams) -> u32 {
    let nof_res_per_prb = (12 * params.nof_symbols as u32)
        .saturating_sub(params.nof_dmrs_res_per_prb as u32)
        .saturating_sub(params.nof_oh_res_per_prb as u32);
    let nof_res = nof_res_per_prb.min(MAX_NOF_RES_PER_PRB) * params.nof_prbs as u32;
    if nof_res == 0 {
        return 0;
    }

    let qm = params.mcs.modulation.bits_per_symbol() as f64;
    let rate = params.mcs.code_rate();
    let n_info = nof_res as f64 * rate * qm * params.nof_layers as f64;

    if n_info <= 3824.0 {
        let n = (n_info.log2().floor() as i32 - 6).max(3);
        let step = (1u32 << n) as f64;
        let n_info_prime = ((step * (n_info / step).floor()) as u32).max(24);
        return TBS_TABLE
            .iter()
            .copied()
            .find(|&tbs| tbs >= n_info_prime)
            .unwrap_or(TBS_TABLE[TBS_TABLE.len() - 1]);
    }

    let n = (n_info - 24.0).log2().floor() as i32 - 5;
    let step = 2f64.powi(n);
    let n_info_prime = (step * ((n_info - 24.0) / step).round()).max(3840.0) as u64;

    let tbs = if rate <= 0.25 {
        let c = (n_info_prime + 24).div_ceil(3816);
        8 * c * (n_info_prime + 24).div_ceil(8 * c) - 24
    } else if n_info_prime > 8424 {
        let c = (n_info_prime + 24).div_ceil(8424);
        8 * c * (n_info_prime + 24).div_ceil(8 * c) - 24
    } else {
        8 * (n_info_prime + 24).div_ceil(8) - 24
    };
    tbs as u32
}

/// Smallest allocation carrying a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrbTbsResult {
    pub nof_prbs: u16,
    pub tbs_bytes: u32,
}

/// Fewest PRBs (up to `max_prbs`) whose single-layer TBS at `mcs` carries
/// `payload_bytes`, for a type A PDSCH on `symbols`.
pub fn nof_prbs_for_bytes(
    payload_bytes: u32,
    mcs: McsDescriptor,
    symbols: OfdmSymbolRange,
    max_prbs: u16,
) -> Option<PrbTbsResult> {
    let tbs_bytes = |nof_prbs: u16| {
        compute_tbs_bits(&TbsParams {
            mcs,
            nof_prbs,
            nof_symbols: symbols.length(),
            nof_dmrs_res_per_prb: nof_dmrs_res_per_prb(symbols),
            nof_oh_res_per_prb: 0,
            nof_layers: 1,
        }) / 8
    };

    // TBS is non-decreasing with the PRB count.
    let (mut lo, mut hi) = (1u32, max_prbs as u32 + 1);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if tbs_bytes(mid as u16) < payload_bytes {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    if lo > max_prbs as u32 {
        return None;
    }
    let nof_prbs = lo as u16;
    Some(PrbTbsResult { nof_prbs, tbs_bytes: tbs_bytes(nof_prbs) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(mcs: u8, nof_prbs: u16) -> TbsParams {
        let symbols = OfdmSymbolRange::new(2, 14);
        TbsParams {
            mcs: McsDescriptor::from_index(mcs).unwrap(),
            nof_prbs,
            nof_symbols: symbols.length(),
            nof_dmrs_res_per_prb: nof_dmrs_res_per_prb(symbols),
            nof_oh_res_per_prb: 0,
            nof_layers: 1,
        }
    }

    #[test]
    fn test_tbs_small_n_info() {
        assert_eq!(compute_tbs_bits(&params(2, 21)), 848);
        assert_eq!(compute_tbs_bits(&params(2, 20)), 808);
        assert_eq!(compute_tbs_bits(&params(3, 48)), 2536);
    }

    #[test]
    fn test_tbs_large_n_info() {
        assert_eq!(compute_tbs_bits(&params(27, 7)), 4032);
        assert_eq!(compute_tbs_bits(&params(27, 6)), 3496);
    }

    #[test]
    fn test_tbs_zero_prbs() {
        assert_eq!(compute_tbs_bits(&params(5, 0)), 0);
    }

    #[test]
    fn test_prbs_for_bytes() {
        let symbols = OfdmSymbolRange::new(2, 14);
        let mcs2 = McsDescriptor::from_index(2).unwrap();
        let res = nof_prbs_for_bytes(103, mcs2, symbols, 48).unwrap();
        assert_eq!(res, PrbTbsResult { nof_prbs: 21, tbs_bytes: 106 });

        let mcs27 = McsDescriptor::from_index(27).unwrap();
        let res = nof_prbs_for_bytes(461, mcs27, symbols, 48).unwrap();
        assert_eq!(res.nof_prbs, 7);
        assert_eq!(res.tbs_bytes, 504);
    }

    #[test]
    fn test_prbs_for_bytes_does_not_fit() {
        let symbols = OfdmSymbolRange::new(2, 14);
        let mcs3 = McsDescriptor::from_index(3).unwrap();
        assert!(nof_prbs_for_bytes(363, mcs3, symbols, 48).is_none());
        let mcs0 = McsDescriptor::from_index(0).unwrap();
        assert!(nof_prbs_for_bytes(352, mcs0, symbols, 48).is_none());
        assert!(nof_prbs_for_bytes(1, mcs0, symbols, 0).is_none());
    }

    #[test]
    fn test_prbs_for_bytes_boundaries() {
        let symbols = OfdmSymbolRange::new(2, 14);
        let mcs2 = McsDescriptor::from_index(2).unwrap();
        // 21 PRBs carry exactly 106 bytes, 20 PRBs only 101
        assert_eq!(nof_prbs_for_bytes(106, mcs2, symbols, 48).unwrap().nof_prbs, 21);
        assert_eq!(nof_prbs_for_bytes(101, mcs2, symbols, 48).unwrap().nof_prbs, 20);
        assert_eq!(nof_prbs_for_bytes(106, mcs2, symbols, 21).unwrap().nof_prbs, 21);
        assert!(nof_prbs_for_bytes(106, mcs2, symbols, 20).is_none());
        assert_eq!(nof_prbs_for_bytes(1, mcs2, symbols, 48).unwrap().nof_prbs, 1);
    }
}
