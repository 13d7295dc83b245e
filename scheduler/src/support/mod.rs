//! Link adaptation helpers (TS 38.214)

pub mod dmrs;
pub mod mcs;
pub mod tbs;

pub use dmrs::nof_dmrs_symbols_type_a;
pub use mcs::{McsDescriptor, MAX_MCS_INDEX};
pub use tbs::{compute_tbs_bits, nof_prbs_for_bytes, PrbTbsResult, TbsParams};
