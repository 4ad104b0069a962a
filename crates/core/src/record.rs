use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Input records, as handed over by the observation store
// ---------------------------------------------------------------------------

/// All datasets reported for one nuclide.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationInput {
    #[serde(default)]
    pub nuclide: Option<String>,
    pub datasets: Vec<DatasetRecord>,
}

/// One independent evaluation. `levels` are expected in ascending energy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: String,
    pub tag: String,
    #[serde(default)]
    pub reference: bool,
    #[serde(default)]
    pub levels: Vec<LevelRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelRecord {
    pub energy: String,
    #[serde(default)]
    pub energy_unc: String,
    #[serde(default)]
    pub spin_parity: String,
    /// Level reported as questionable by its source.
    #[serde(default)]
    pub questionable: bool,
    #[serde(default)]
    pub half_life: Option<HalfLifeRecord>,
    #[serde(default)]
    pub gammas: Vec<GammaRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GammaRecord {
    pub energy: String,
    #[serde(default)]
    pub energy_unc: String,
    #[serde(default)]
    pub intensity: Option<String>,
    #[serde(default)]
    pub intensity_unc: String,
    /// Index of the final level within the same dataset's `levels`.
    #[serde(default)]
    pub final_level: Option<usize>,
    /// Placement reported as uncertain by its source.
    #[serde(default)]
    pub questionable: bool,
}

/// Half-life as reported. The unit is carried through unconverted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HalfLifeRecord {
    pub value: String,
    #[serde(default)]
    pub unc: String,
    #[serde(default)]
    pub unit: String,
}

impl LevelRecord {
    pub fn new(energy: &str, energy_unc: &str) -> Self {
        Self {
            energy: energy.to_string(),
            energy_unc: energy_unc.to_string(),
            ..Self::default()
        }
    }

    pub fn with_spin_parity(mut self, spin_parity: &str) -> Self {
        self.spin_parity = spin_parity.to_string();
        self
    }

    pub fn with_gamma(mut self, gamma: GammaRecord) -> Self {
        self.gammas.push(gamma);
        self
    }
}

impl GammaRecord {
    pub fn new(energy: &str, energy_unc: &str) -> Self {
        Self {
            energy: energy.to_string(),
            energy_unc: energy_unc.to_string(),
            ..Self::default()
        }
    }

    pub fn to_level(mut self, final_level: usize) -> Self {
        self.final_level = Some(final_level);
        self
    }
}

impl DatasetRecord {
    pub fn new(id: &str, tag: &str, levels: Vec<LevelRecord>) -> Self {
        Self {
            id: id.to_string(),
            tag: tag.to_string(),
            reference: false,
            levels,
        }
    }

    pub fn as_reference(mut self) -> Self {
        self.reference = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{
            "nuclide": "60NI",
            "datasets": [
                {
                    "id": "60CO B- DECAY",
                    "tag": "A",
                    "levels": [
                        { "energy": "0.0", "spin_parity": "0+" },
                        {
                            "energy": "1332.514", "energy_unc": "4", "spin_parity": "2+",
                            "half_life": { "value": "0.77", "unc": "3", "unit": "PS" },
                            "gammas": [ { "energy": "1332.492", "energy_unc": "4", "intensity": "100", "final_level": 0 } ]
                        }
                    ]
                }
            ]
        }"#;
        let input: ObservationInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.nuclide.as_deref(), Some("60NI"));
        let ds = &input.datasets[0];
        assert!(!ds.reference);
        assert_eq!(ds.levels.len(), 2);
        assert_eq!(ds.levels[0].energy_unc, "");
        assert!(ds.levels[0].gammas.is_empty());
        let hl = ds.levels[1].half_life.as_ref().unwrap();
        assert_eq!(hl.unit, "PS");
        assert_eq!(ds.levels[1].gammas[0].final_level, Some(0));
    }

    #[test]
    fn builders_compose() {
        let level = LevelRecord::new("1000.0", "2")
            .with_spin_parity("2+")
            .with_gamma(GammaRecord::new("300.0", "1").to_level(0));
        let ds = DatasetRecord::new("ADOPTED", "R", vec![level]).as_reference();
        assert!(ds.reference);
        assert_eq!(ds.levels[0].gammas[0].final_level, Some(0));
        assert_eq!(ds.levels[0].spin_parity, "2+");
    }
}
