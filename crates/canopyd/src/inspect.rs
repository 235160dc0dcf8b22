//! Read-only inspection commands: effective config and journal summary.

use std::collections::BTreeMap;
use std::path::Path;

use canopy_state::{Journal, JournalEntry, JournalRecord};

use crate::crawl_mode::load_config;

/// Print the merged config file and the tuning parameters it resolves to.
pub fn print_config(path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let params = config.tuning_parameters()?;
    config.retry_settings()?;
    config.tuner_settings()?;

    println!("# effective configuration");
    println!("{}", config.to_toml_string()?);
    println!("# resolved tuning parameters");
    println!("{}", toml::to_string_pretty(&params)?);
    Ok(())
}

/// Per-kind counts and the latest state recorded in a journal.
#[derive(Debug, Default, PartialEq)]
pub struct JournalSummary {
    pub counts: BTreeMap<&'static str, usize>,
    pub scale_changes: usize,
    pub emergency_overrides: usize,
    pub last_target_workers: Option<u32>,
    pub tuning_changes: Vec<String>,
}

pub fn summarize(records: &[JournalRecord]) -> JournalSummary {
    let mut summary = JournalSummary::default();
    for record in records {
        let kind = match &record.entry {
            JournalEntry::ScalingDecision(d) => {
                if d.is_change() {
                    summary.scale_changes += 1;
                    summary.last_target_workers = Some(d.target_workers);
                }
                if d.safety_override {
                    summary.emergency_overrides += 1;
                }
                "scaling_decision"
            }
            JournalEntry::ResourceSnapshot(_) => "resource_snapshot",
            JournalEntry::TuningChange(c) => {
                summary.tuning_changes.push(format!(
                    "v{} {}: {} -> {} ({})",
                    c.version, c.parameter, c.old_value, c.new_value, c.reason
                ));
                "tuning_change"
            }
        };
        *summary.counts.entry(kind).or_default() += 1;
    }
    summary
}

pub async fn summarize_journal(path: &Path) -> anyhow::Result<()> {
    let records = Journal::read_all(path).await?;
    let summary = summarize(&records);

    println!("{}: {} records", path.display(), records.len());
    for (kind, count) in &summary.counts {
        println!("  {kind:<18} {count}");
    }
    println!("  scale changes      {}", summary.scale_changes);
    println!("  emergency          {}", summary.emergency_overrides);
    if let Some(target) = summary.last_target_workers {
        println!("  last target        {target}");
    }
    for change in &summary.tuning_changes {
        println!("  tuning {change}");
    }
    Ok(())
}
