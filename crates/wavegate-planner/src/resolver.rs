//! Wave resolution
//!
//! A unit without a wave hint lands one wave after its latest dependency
//! (wave 1 for roots). A hint is honored only when it is strictly later than
//! every dependency's wave.

use crate::dag::DependencyGraph;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, instrument};
use wavegate_types::{ClusterId, ServiceUnit, UnitName, ValidationError, Wave, WavePlan};

/// Builds wave plans from unit declarations
#[derive(Debug, Clone, Default)]
pub struct WaveResolver {
    known_clusters: Option<BTreeSet<ClusterId>>,
}

impl WaveResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects units that target a cluster outside this set.
    pub fn with_known_clusters(mut self, clusters: impl IntoIterator<Item = ClusterId>) -> Self {
        self.known_clusters = Some(clusters.into_iter().collect());
        self
    }

    /// Validates the declarations and layers them into waves.
    #[instrument(skip(self, units), fields(units = units.len()))]
    pub fn resolve(&self, units: Vec<ServiceUnit>) -> Result<WavePlan, ValidationError> {
        if units.is_empty() {
            return Err(ValidationError::EmptyPlan);
        }

        self.validate_units(&units)?;

        let mut graph = DependencyGraph::new();
        for unit in &units {
            graph.add_node(unit.name.clone());
        }
        for unit in &units {
            for dependency in &unit.requires {
                graph.add_dependency(dependency, &unit.name);
            }
        }

        if let Some(cycle) = graph.cycles().into_iter().next() {
            return Err(ValidationError::CyclicDependency { units: cycle.0 });
        }
        let order = graph
            .toposort()
            .map_err(|cycle| ValidationError::CyclicDependency { units: cycle.0 })?;

        let by_name: HashMap<&UnitName, &ServiceUnit> =
            units.iter().map(|u| (&u.name, u)).collect();
        let mut assigned: HashMap<UnitName, u32> = HashMap::with_capacity(units.len());

        for name in &order {
            let Some(unit) = by_name.get(name) else {
                continue;
            };
            let latest_dependency = unit
                .requires
                .iter()
                .filter_map(|dep| assigned.get(dep).map(|&wave| (dep, wave)))
                .max_by(|(a_name, a_wave), (b_name, b_wave)| {
                    a_wave.cmp(b_wave).then_with(|| b_name.cmp(a_name))
                });

            let wave = match (unit.wave, latest_dependency) {
                (Some(hint), Some((dependency, dependency_wave))) if hint <= dependency_wave => {
                    return Err(ValidationError::WaveOrderingViolation {
                        unit: unit.name.clone(),
                        unit_wave: hint,
                        dependency: dependency.clone(),
                        dependency_wave,
                    });
                }
                (Some(hint), _) => hint,
                (None, Some((dependency, dependency_wave))) => {
                    dependency_wave.checked_add(1).ok_or_else(|| ValidationError::MalformedUnit {
                        unit: unit.name.clone(),
                        reason: format!(
                            "no wave left after dependency {dependency} in wave {dependency_wave}"
                        ),
                    })?
                }
                (None, None) => 1,
            };
            debug!(unit = %unit.name, wave, "Assigned wave");
            assigned.insert(unit.name.clone(), wave);
        }

        let mut waves: BTreeMap<u32, Vec<ServiceUnit>> = BTreeMap::new();
        for unit in units {
            if let Some(&wave) = assigned.get(&unit.name) {
                waves.entry(wave).or_default().push(unit);
            }
        }

        let plan = WavePlan::new(
            waves
                .into_iter()
                .map(|(number, units)| Wave { number, units })
                .collect(),
        );
        info!(
            waves = plan.len(),
            units = plan.total_units(),
            "Resolved wave plan"
        );
        Ok(plan)
    }

    fn validate_units(&self, units: &[ServiceUnit]) -> Result<(), ValidationError> {
        let mut seen: HashSet<&UnitName> = HashSet::with_capacity(units.len());
        for unit in units {
            if !seen.insert(&unit.name) {
                return Err(ValidationError::DuplicateUnit(unit.name.clone()));
            }
            if let Some(reason) = malformed_reason(unit) {
                return Err(ValidationError::MalformedUnit {
                    unit: unit.name.clone(),
                    reason,
                });
            }
            if let Some(known) = &self.known_clusters {
                if !known.contains(&unit.cluster) {
                    return Err(ValidationError::UnknownTarget {
                        unit: unit.name.clone(),
                        cluster: unit.cluster.clone(),
                    });
                }
            }
        }

        for unit in units {
            for dependency in &unit.requires {
                if dependency == &unit.name {
                    return Err(ValidationError::CyclicDependency {
                        units: vec![unit.name.clone()],
                    });
                }
                if !seen.contains(dependency) {
                    return Err(ValidationError::UnknownDependency {
                        unit: unit.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn malformed_reason(unit: &ServiceUnit) -> Option<String> {
    if unit.name.as_str().trim().is_empty() {
        return Some("name is empty".to_string());
    }
    if unit.cluster.as_str().trim().is_empty() {
        return Some("target cluster is empty".to_string());
    }
    if unit.manifest.is_empty() {
        return Some("manifest reference is empty".to_string());
    }
    if unit.wave == Some(0) {
        return Some("waves are numbered from 1".to_string());
    }
    if unit.health_timeout == Some(Duration::ZERO) {
        return Some("health timeout must be positive".to_string());
    }
    if let Some(policy) = &unit.retry {
        if policy.max_attempts == 0 {
            return Some("retry max_attempts must be at least 1".to_string());
        }
        if policy.base_delay > policy.max_delay {
            return Some("retry base delay exceeds max delay".to_string());
        }
    }
    None
}
