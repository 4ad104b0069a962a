use std::collections::BTreeSet;

use log::{debug, warn};
use nuclink_core::{GammaRecord, LevelRecord, ObservationInput, Quantity, SpinParity};
use serde::Serialize;

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Index of an observation in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObsId(pub u32);

impl ObsId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Position of a dataset in input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DatasetIdx(pub u16);

impl DatasetIdx {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObsKind {
    Level,
    Gamma {
        parent: ObsId,
        /// Final level within the same dataset, when placed.
        final_level: Option<ObsId>,
    },
}

#[derive(Debug, Clone)]
pub struct Observation {
    pub id: ObsId,
    pub dataset: DatasetIdx,
    pub kind: ObsKind,
    /// Position among the dataset's levels, or among the parent's gammas.
    pub index: usize,
    pub energy_text: String,
    pub energy: Option<Quantity>,
    /// Why `energy` is missing.
    pub parse_error: Option<String>,
    pub spin_parity_text: String,
    pub spin_parity: Option<SpinParity>,
    pub questionable: bool,
    pub gammas: Vec<ObsId>,
    pub intensity: Option<Quantity>,
    pub half_life: Option<Quantity>,
    pub half_life_unit: String,
}

impl Observation {
    pub fn is_level(&self) -> bool {
        matches!(self.kind, ObsKind::Level)
    }

    pub fn final_level(&self) -> Option<ObsId> {
        match self.kind {
            ObsKind::Gamma { final_level, .. } => final_level,
            ObsKind::Level => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        self.energy.as_ref().and_then(|q| q.label.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct DatasetEntry {
    pub id: String,
    pub tag: String,
    pub reference: bool,
    pub levels: Vec<ObsId>,
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

/// Flat storage for every observation of every dataset; cross references
/// are `ObsId`s.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    nuclide: Option<String>,
    datasets: Vec<DatasetEntry>,
    observations: Vec<Observation>,
}

impl Arena {
    pub fn build(input: &ObservationInput) -> Result<Self, ReconError> {
        if input.datasets.len() > u16::MAX as usize {
            return Err(ReconError::InputParse(format!(
                "too many datasets: {}",
                input.datasets.len()
            )));
        }

        let mut seen = BTreeSet::new();
        let mut reference: Option<&str> = None;
        for ds in &input.datasets {
            if !seen.insert(ds.id.as_str()) {
                return Err(ReconError::DuplicateDataset(ds.id.clone()));
            }
            if ds.reference {
                if let Some(first) = reference {
                    return Err(ReconError::MultipleReference {
                        first: first.to_string(),
                        second: ds.id.clone(),
                    });
                }
                reference = Some(&ds.id);
            }
        }

        let mut arena = Arena {
            nuclide: input.nuclide.clone(),
            ..Arena::default()
        };

        for (d, ds) in input.datasets.iter().enumerate() {
            let dataset = DatasetIdx(d as u16);
            let levels: Vec<ObsId> = ds
                .levels
                .iter()
                .enumerate()
                .map(|(i, record)| arena.push_level(dataset, i, record))
                .collect();

            for (record, &level) in ds.levels.iter().zip(&levels) {
                let gammas: Vec<ObsId> = record
                    .gammas
                    .iter()
                    .enumerate()
                    .map(|(i, gamma)| arena.push_gamma(dataset, level, i, gamma, &levels, &ds.id))
                    .collect();
                arena.observations[level.index()].gammas = gammas;
            }

            debug!(
                "dataset '{}' ({}): {} levels",
                ds.id,
                ds.tag,
                levels.len()
            );
            arena.datasets.push(DatasetEntry {
                id: ds.id.clone(),
                tag: ds.tag.clone(),
                reference: ds.reference,
                levels,
            });
        }

        Ok(arena)
    }

    fn next_id(&self) -> ObsId {
        ObsId(self.observations.len() as u32)
    }

    fn push_level(&mut self, dataset: DatasetIdx, index: usize, record: &LevelRecord) -> ObsId {
        let id = self.next_id();
        let (energy, parse_error) = parse_energy(&record.energy, &record.energy_unc);
        let spin_parity = match SpinParity::parse(&record.spin_parity) {
            Ok(sp) => sp,
            Err(e) => {
                debug!("ignoring spin-parity of level {}: {e}", record.energy);
                None
            }
        };
        let (half_life, half_life_unit) = match &record.half_life {
            Some(hl) => (
                Quantity::parse(&hl.value, &hl.unc).ok(),
                hl.unit.trim().to_string(),
            ),
            None => (None, String::new()),
        };

        self.observations.push(Observation {
            id,
            dataset,
            kind: ObsKind::Level,
            index,
            energy_text: record.energy.trim().to_string(),
            energy,
            parse_error,
            spin_parity_text: record.spin_parity.trim().to_string(),
            spin_parity,
            questionable: record.questionable,
            gammas: Vec::new(),
            intensity: None,
            half_life,
            half_life_unit,
        });
        id
    }

    fn push_gamma(
        &mut self,
        dataset: DatasetIdx,
        parent: ObsId,
        index: usize,
        record: &GammaRecord,
        levels: &[ObsId],
        dataset_id: &str,
    ) -> ObsId {
        let id = self.next_id();
        let (energy, parse_error) = parse_energy(&record.energy, &record.energy_unc);
        let final_level = match record.final_level {
            Some(i) if i < levels.len() => Some(levels[i]),
            Some(i) => {
                warn!(
                    "dataset '{dataset_id}': gamma {} points at level {i}, which does not exist",
                    record.energy
                );
                None
            }
            None => None,
        };
        let intensity = record
            .intensity
            .as_deref()
            .and_then(|text| Quantity::parse(text, &record.intensity_unc).ok());

        self.observations.push(Observation {
            id,
            dataset,
            kind: ObsKind::Gamma { parent, final_level },
            index,
            energy_text: record.energy.trim().to_string(),
            energy,
            parse_error,
            spin_parity_text: String::new(),
            spin_parity: None,
            questionable: record.questionable,
            gammas: Vec::new(),
            intensity,
            half_life: None,
            half_life_unit: String::new(),
        });
        id
    }

    pub fn obs(&self, id: ObsId) -> &Observation {
        &self.observations[id.index()]
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn dataset(&self, idx: DatasetIdx) -> &DatasetEntry {
        &self.datasets[idx.index()]
    }

    pub fn datasets(&self) -> &[DatasetEntry] {
        &self.datasets
    }

    pub fn nuclide(&self) -> Option<&str> {
        self.nuclide.as_deref()
    }

    pub fn reference_dataset(&self) -> Option<DatasetIdx> {
        self.datasets
            .iter()
            .position(|d| d.reference)
            .map(|i| DatasetIdx(i as u16))
    }

    pub fn is_reference(&self, idx: DatasetIdx) -> bool {
        self.dataset(idx).reference
    }

    /// Reference dataset first, then input order.
    pub fn processing_order(&self) -> Vec<DatasetIdx> {
        let reference = self.reference_dataset();
        reference
            .into_iter()
            .chain(
                (0..self.datasets.len())
                    .map(|i| DatasetIdx(i as u16))
                    .filter(|d| Some(*d) != reference),
            )
            .collect()
    }

    /// All levels with a usable energy, in arena order.
    pub fn parsed_levels(&self) -> Vec<ObsId> {
        self.datasets
            .iter()
            .flat_map(|d| d.levels.iter().copied())
            .filter(|&id| self.obs(id).energy.is_some())
            .collect()
    }
}

fn parse_energy(value: &str, unc: &str) -> (Option<Quantity>, Option<String>) {
    match Quantity::parse(value, unc) {
        Ok(q) => (Some(q), None),
        Err(e) => (None, Some(e.to_string())),
    }
}
