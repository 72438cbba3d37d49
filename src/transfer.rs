//! Output-to-input data transfers.
//!
//! Each connection is moved by the lowest group containing both ends. When
//! every rank holding the input also holds the source, the move is a local
//! copy. Otherwise the owner of the source contributes the selected values
//! to a sum-reduction over the group's communicator and everyone else
//! contributes zeros.

use std::time::Instant;

use crate::model::Model;
use crate::solver::comm::CommunicationBackend;
use crate::stats::Stats;

/// Communicator of system `sys`: its own split, or the nearest ancestor's.
pub fn comm_for<'a>(
    model: &Model,
    comms: &'a [Option<Box<dyn CommunicationBackend>>],
    world: &'a dyn CommunicationBackend,
    sys: usize,
) -> &'a dyn CommunicationBackend {
    let mut current = sys;
    loop {
        if model.systems[current].own_comm {
            if let Some(comm) = comms.get(current).and_then(|c| c.as_deref()) {
                return comm;
            }
        }
        match model.systems[current].parent {
            Some(parent) => current = parent,
            None => return world,
        }
    }
}

/// Values of `src` selected for input `tgt`, converted to the input's units.
fn gather(model: &Model, outputs: &[f64], tgt: usize) -> Option<Vec<f64>> {
    let conn = model.conn(tgt)?;
    let src = &model.vars[conn.src];
    let data = &outputs[src.range()];
    let mut vals: Vec<f64> = match &conn.indices {
        Some(idx) => idx.iter().map(|&i| data[i]).collect(),
        None => data.to_vec(),
    };
    conn.conv.apply_all(&mut vals);
    Some(vals)
}

/// Transfer the given inputs from their sources. Collective over `comm`,
/// which must hold every rank where any of `targets` or their sources live.
pub fn transfer(
    model: &Model,
    inputs: &mut [f64],
    outputs: &[f64],
    comm: &dyn CommunicationBackend,
    rank: usize,
    targets: &[usize],
    mut stats: Option<&mut Stats>,
) {
    let t = stats.as_ref().map(|_| Instant::now());
    for &tgt in targets {
        let Some(conn) = model.conn(tgt) else {
            continue;
        };
        let src = &model.vars[conn.src];
        let input = &model.vars[tgt];
        let local_copy = input.ranks.iter().all(|r| src.ranks.contains(r));

        let vals = if local_copy {
            if !input.is_local(rank) {
                continue;
            }
            if let Some(ref mut s) = stats {
                s.local_transfers += 1;
            }
            gather(model, outputs, tgt)
        } else {
            let mut buf = if rank == src.owner {
                gather(model, outputs, tgt).unwrap_or_else(|| vec![0.0; input.size])
            } else {
                vec![0.0; input.size]
            };
            comm.all_reduce_sum_vec(&mut buf);
            if let Some(ref mut s) = stats {
                s.collective_transfers += 1;
            }
            input.is_local(rank).then_some(buf)
        };

        if let Some(vals) = vals {
            inputs[input.range()].copy_from_slice(&vals);
        }
    }
    if let (Some(s), Some(t)) = (stats, t) {
        s.transfer += t.elapsed();
    }
}
