// Modulation planner.
//
// For a home key, produces the ordered list of tonal excursions the
// development visits before the home-key return. The sequence is fixed per
// mode: major keys go to the dominant, the relative minor and the
// subdominant; minor keys go to the relative major, the minor dominant and
// the minor subdominant. The last record is always the home key in the
// Resolve phase.
//
// The planner is pure: it never consumes randomness, so the same home key
// always yields the same plan. Episodes cycle through `develop_targets()`
// when there are more development sections than targets.

use serde::{Deserialize, Serialize};

use crate::pitch::KeySignature;

/// Phase a modulation target belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModulationPhase {
    Develop,
    Resolve,
}

/// Cadence type used to confirm arrival in a target key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CadenceType {
    /// V -> I.
    Perfect,
    /// Ends on V.
    Half,
    /// V -> vi.
    Deceptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModulationTarget {
    pub target_key: KeySignature,
    pub phase: ModulationPhase,
    pub entry_cadence: CadenceType,
}

impl ModulationTarget {
    pub fn target_is_minor(&self) -> bool {
        self.target_key.is_minor
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModulationPlan {
    pub home: KeySignature,
    pub targets: Vec<ModulationTarget>,
}

impl ModulationPlan {
    pub fn for_key(home: KeySignature) -> ModulationPlan {
        let develop = if home.is_minor {
            [
                (home.relative(), CadenceType::Perfect),
                (home.dominant(), CadenceType::Half),
                (home.subdominant(), CadenceType::Perfect),
            ]
        } else {
            [
                (home.dominant(), CadenceType::Perfect),
                (home.relative(), CadenceType::Deceptive),
                (home.subdominant(), CadenceType::Perfect),
            ]
        };
        let mut targets: Vec<ModulationTarget> = develop
            .iter()
            .map(|&(target_key, entry_cadence)| ModulationTarget {
                target_key,
                phase: ModulationPhase::Develop,
                entry_cadence,
            })
            .collect();
        targets.push(ModulationTarget {
            target_key: home,
            phase: ModulationPhase::Resolve,
            entry_cadence: CadenceType::Perfect,
        });
        ModulationPlan { home, targets }
    }

    /// Develop-phase targets in order.
    pub fn develop_targets(&self) -> Vec<KeySignature> {
        self.targets
            .iter()
            .filter(|t| t.phase == ModulationPhase::Develop)
            .map(|t| t.target_key)
            .collect()
    }

    /// The n-th development key, cycling through the Develop targets.
    pub fn develop_key(&self, n: usize) -> KeySignature {
        let develop = self.develop_targets();
        if develop.is_empty() {
            return self.home;
        }
        develop[n % develop.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::PitchClass;

    #[test]
    fn major_plan() {
        let plan = ModulationPlan::for_key(KeySignature::major(PitchClass::C));
        let keys: Vec<String> = plan.targets.iter().map(|t| t.target_key.to_string()).collect();
        assert_eq!(keys, vec!["G_major", "A_minor", "F_major", "C_major"]);
        assert_eq!(plan.targets[3].phase, ModulationPhase::Resolve);
        assert!(plan.targets[1].target_is_minor());
    }

    #[test]
    fn minor_plan() {
        let plan = ModulationPlan::for_key(KeySignature::minor(PitchClass::G));
        let keys: Vec<String> = plan.targets.iter().map(|t| t.target_key.to_string()).collect();
        assert_eq!(keys, vec!["Bb_major", "D_minor", "C_minor", "G_minor"]);
    }

    #[test]
    fn develop_key_cycles() {
        let plan = ModulationPlan::for_key(KeySignature::major(PitchClass::D));
        assert_eq!(plan.develop_targets().len(), 3);
        assert_eq!(plan.develop_key(0), plan.develop_key(3));
        assert_eq!(plan.develop_key(1), KeySignature::minor(PitchClass::B));
    }
}
