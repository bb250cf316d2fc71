//! Wall-clock and memory samples per stage, plus the per-table transfer
//! report. Everything lands in the log stream; `--stats-json` additionally
//! serialises the same data.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

use crate::schema::SchemaModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Stage {
    PrepareStructure,
    TruncateTables,
    FillRowCounts,
    SeedKeyTable,
    CollectFullTransferTables,
    CollectKeyColumnTables,
    CollectGenericTables,
    CollectDependencySortedTables,
    TransferData,
    UpdateSequences,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::PrepareStructure => "Prepare destination database structure",
            Stage::TruncateTables => "Truncate destination database tables",
            Stage::FillRowCounts => "Filling tables rows counts",
            Stage::SeedKeyTable => "Transfer key table",
            Stage::CollectFullTransferTables => "Collect full transfer tables records ids",
            Stage::CollectKeyColumnTables => "Collect common tables records ids",
            Stage::CollectGenericTables => "Collect generic tables records ids",
            Stage::CollectDependencySortedTables => "Collect dependency sorted tables records ids",
            Stage::TransferData => "Transferring collected data",
            Stage::UpdateSequences => "Update sequences",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Default)]
pub struct StatisticManager {
    time_samples: BTreeMap<Stage, Vec<DateTime<Local>>>,
    memory_samples: BTreeMap<Stage, Vec<Option<u64>>>,
}

impl StatisticManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one boundary sample for a stage; call once when the stage
    /// starts and once when it ends.
    pub fn mark(&mut self, stage: Stage) {
        self.time_samples.entry(stage).or_default().push(Local::now());
        self.memory_samples
            .entry(stage)
            .or_default()
            .push(resident_memory_bytes());
    }

    pub fn log_stage_samples(&self) {
        for (stage, timestamps) in &self.time_samples {
            let times = timestamps
                .iter()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .collect::<Vec<_>>()
                .join(", ");
            info!("{stage} --- {times}");
            if let Some(memory) = self.memory_samples.get(stage) {
                let rss = memory
                    .iter()
                    .map(|m| match m {
                        Some(bytes) => format!("{bytes}"),
                        None => "-".to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                info!("{stage} --- rss bytes {rss}");
            }
        }
    }

    /// Per-table transferred/needed counts, smallest first.
    pub fn log_transfer_counts(&self, model: &SchemaModel) {
        let mut counts: Vec<(&str, u64, usize)> = model
            .tables()
            .map(|t| (t.name.as_str(), t.transferred_count(), t.need_transfer_len()))
            .collect();
        counts.sort_by_key(|&(_, transferred, _)| transferred);
        for (name, transferred, needed) in counts {
            info!("{name} --- {transferred} / {needed}");
        }
    }

    pub fn report(&self, model: &SchemaModel) -> StatsReport {
        StatsReport {
            stages: self
                .time_samples
                .iter()
                .map(|(stage, timestamps)| StageReport {
                    stage: stage.to_string(),
                    timestamps: timestamps.iter().map(|t| t.to_rfc3339()).collect(),
                    rss_bytes: self.memory_samples.get(stage).cloned().unwrap_or_default(),
                })
                .collect(),
            tables: model
                .tables()
                .map(|t| TableReport {
                    name: t.name.clone(),
                    transferred: t.transferred_count(),
                    needed: t.need_transfer_len(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsReport {
    pub stages: Vec<StageReport>,
    pub tables: Vec<TableReport>,
}

#[derive(Debug, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub timestamps: Vec<String>,
    pub rss_bytes: Vec<Option<u64>>,
}

#[derive(Debug, Serialize)]
pub struct TableReport {
    pub name: String,
    pub transferred: u64,
    pub needed: usize,
}

/// Resident set size of this process, when the platform exposes it.
pub fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_records_paired_samples() {
        let mut stats = StatisticManager::new();
        stats.mark(Stage::SeedKeyTable);
        stats.mark(Stage::SeedKeyTable);
        assert_eq!(stats.time_samples[&Stage::SeedKeyTable].len(), 2);
        assert_eq!(stats.memory_samples[&Stage::SeedKeyTable].len(), 2);
    }

    #[test]
    fn test_report_serialises() {
        let mut stats = StatisticManager::new();
        stats.mark(Stage::TransferData);
        let model = SchemaModel::new();
        let report = stats.report(&model);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("Transferring collected data"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_resident_memory_is_readable_on_linux() {
        assert!(resident_memory_bytes().unwrap() > 0);
    }
}
