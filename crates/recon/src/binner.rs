use ordered_float::OrderedFloat;

use crate::arena::{Arena, ObsId};

/// Energy-contiguous run of observations from any dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bin {
    pub items: Vec<ObsId>,
}

/// Split `items` into independent bins. A new bin starts when the
/// placeholder label changes, or when the gap to the previous observation
/// exceeds `tolerance` and the two are not comparable within `n_sigma`
/// combined uncertainties. Items without a parsed energy are ignored.
pub fn coarse_bins(arena: &Arena, items: &[ObsId], tolerance: f64, n_sigma: f64) -> Vec<Bin> {
    let mut sorted: Vec<ObsId> = items
        .iter()
        .copied()
        .filter(|&id| arena.obs(id).energy.is_some())
        .collect();
    sorted.sort_by_key(|&id| {
        let o = arena.obs(id);
        let value = o.energy.as_ref().map(|q| q.value).unwrap_or(0.0);
        (o.label().map(str::to_string), OrderedFloat(value), o.dataset, id)
    });

    let mut bins: Vec<Bin> = Vec::new();
    let mut current: Vec<ObsId> = Vec::new();

    for id in sorted {
        if let Some(&prev) = current.last() {
            let (Some(a), Some(b)) = (&arena.obs(prev).energy, &arena.obs(id).energy) else {
                continue;
            };
            let split = match a.residual(b) {
                None => true,
                Some(gap) => gap > tolerance && !a.comparable(b, tolerance, n_sigma),
            };
            if split {
                bins.push(Bin {
                    items: std::mem::take(&mut current),
                });
            }
        }
        current.push(id);
    }
    if !current.is_empty() {
        bins.push(Bin { items: current });
    }
    bins
}
