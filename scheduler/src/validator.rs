//! Consistency checks of a finalized slot result

use crate::config::CellConfiguration;
use crate::grid::{GrantInfo, SlotResourceAllocator};
use crate::harq::HarqState;
use crate::ue::UeRepository;
use crate::SchedulerError;
use common::SlotPoint;

fn inconsistent(slot: SlotPoint, reason: String) -> SchedulerError {
    SchedulerError::InconsistentResult { slot, reason }
}

/// Check the decisions of `slot_alloc` against the cell configuration and the
/// HARQ state of the UEs.
pub fn validate_slot_result(
    cfg: &CellConfiguration,
    slot_alloc: &SlotResourceAllocator,
    ues: &UeRepository,
) -> Result<(), SchedulerError> {
    let slot = slot_alloc.slot();
    let result = &slot_alloc.result;
    if result.slot != slot {
        return Err(inconsistent(slot, format!("result tagged with slot {}", result.slot)));
    }
    let bwp = cfg.bwp_crbs();
    let dl_symbols = cfg.dl_symbols(slot);
    let ul_symbols = cfg.ul_symbols(slot);

    // DL regions: PDCCH, PDSCH and CSI-RS must be in-band, in DL symbols and disjoint
    let mut dl_regions: Vec<(&'static str, GrantInfo)> = Vec::new();
    dl_regions.extend(result.dl.pdcchs.iter().map(|p| ("PDCCH", p.region)));
    dl_regions.extend(result.dl.grants.iter().map(|g| ("PDSCH", g.region)));
    dl_regions.extend(result.dl.csi_rs.iter().map(|c| ("CSI-RS", c.region)));
    check_regions(slot, &dl_regions, |region| {
        bwp.contains(&region.crbs) && dl_symbols.contains(&region.symbols)
    })?;
    if !result.dl.grants.is_empty() && cfg.is_csi_rs_slot(slot) {
        return Err(inconsistent(slot, "PDSCH in a CSI-RS slot".into()));
    }

    // UL: PUCCH resources are code multiplexed per PRB, so distinct resource
    // indices may share a region
    let mut resources: Vec<u8> = Vec::with_capacity(result.ul.pucchs.len());
    for (i, pucch) in result.ul.pucchs.iter().enumerate() {
        if !bwp.contains(&pucch.region.crbs) || !ul_symbols.contains(&pucch.region.symbols) {
            return Err(inconsistent(slot, format!("PUCCH {} outside UL resources", pucch.region)));
        }
        if resources.contains(&pucch.resource_index) {
            return Err(inconsistent(slot, format!("PUCCH resource {} used twice", pucch.resource_index)));
        }
        resources.push(pucch.resource_index);
        if result.ul.pucchs[i + 1..].iter().any(|p| p.ue_index == pucch.ue_index) {
            return Err(inconsistent(slot, format!("UE {} has more than one PUCCH", pucch.ue_index)));
        }
    }
    if !result.ul.pucchs.is_empty() && cfg.is_csi_rs_slot(slot) {
        return Err(inconsistent(slot, "PUCCH in a CSI-RS slot".into()));
    }

    // HARQ: every PDSCH must match a process waiting for its HARQ-ACK
    for grant in &result.dl.grants {
        let Some(ue) = ues.get(grant.ue_index) else {
            return Err(inconsistent(slot, format!("PDSCH for unknown UE {}", grant.ue_index)));
        };
        let harq = ue.pcell().harqs.get(grant.harq_id);
        let matches = harq.is_some_and(|h| {
            h.state() == HarqState::WaitingAck
                && h.pdsch_slot() == Some(slot)
                && h.ack_slot() == Some(grant.uci_slot)
                && h.tb().is_some_and(|tb| tb.tbs_bytes == grant.tbs_bytes)
        });
        if !matches {
            return Err(inconsistent(
                slot,
                format!("PDSCH of ue={} h_id={} does not match its HARQ process", grant.ue_index, grant.harq_id),
            ));
        }
    }
    Ok(())
}

fn check_regions(
    slot: SlotPoint,
    regions: &[(&'static str, GrantInfo)],
    allowed: impl Fn(&GrantInfo) -> bool,
) -> Result<(), SchedulerError> {
    for (i, (name, region)) in regions.iter().enumerate() {
        if !allowed(region) {
            return Err(inconsistent(slot, format!("{} {} outside allowed resources", name, region)));
        }
        if let Some((other, _)) = regions[i + 1..].iter().find(|(_, r)| r.overlaps(region)) {
            return Err(inconsistent(slot, format!("{} {} overlaps a {}", name, region, other)));
        }
    }
    Ok(())
}
