//! Plan command: the resolved wave plan, without touching any cluster

use serde::Serialize;
use tabled::Tabled;
use wavegate_types::{ServiceUnit, WavePlan};

use crate::config::WavegateConfig;
use crate::error::CliResult;
use crate::output::{self, OutputFormat};

/// Table row for plan display
#[derive(Debug, Serialize, Tabled)]
struct PlanRow {
    wave: u32,
    unit: String,
    cluster: String,
    manifest: String,
    requires: String,
    best_effort: bool,
}

impl PlanRow {
    fn new(wave: u32, unit: &ServiceUnit) -> Self {
        Self {
            wave,
            unit: unit.name.to_string(),
            cluster: unit.cluster.to_string(),
            manifest: unit.manifest.as_str().to_string(),
            requires: unit
                .requires
                .iter()
                .map(|r| r.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            best_effort: unit.best_effort,
        }
    }
}

fn rows(plan: &WavePlan) -> Vec<PlanRow> {
    plan.waves()
        .iter()
        .flat_map(|wave| wave.units.iter().map(|unit| PlanRow::new(wave.number, unit)))
        .collect()
}

pub fn execute(config: &WavegateConfig, format: OutputFormat) -> CliResult<u8> {
    let plan = config.plan()?;
    output::print_output(rows(&plan), &plan, format)?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavegate_planner::WaveResolver;

    #[test]
    fn rows_follow_wave_order() {
        let plan = WaveResolver::new()
            .resolve(vec![
                ServiceUnit::new("publish", "primary", "p.yaml").requires("transform"),
                ServiceUnit::new("transform", "primary", "t.yaml").requires("ingest"),
                ServiceUnit::new("ingest", "primary", "i.yaml"),
            ])
            .unwrap();

        let rows = rows(&plan);
        let order: Vec<(u32, &str)> = rows.iter().map(|r| (r.wave, r.unit.as_str())).collect();
        assert_eq!(order, vec![(1, "ingest"), (2, "transform"), (3, "publish")]);
        assert_eq!(rows[2].requires, "transform");
    }
}
