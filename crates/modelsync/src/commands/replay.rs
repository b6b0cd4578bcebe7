//! Replay a JSON-lines entity feed through the assembler.
//!
//! Each line is one delivery from the store: an `upsert` of a single
//! entity, a `remove`, or a full `sync` of one scope. One immediate and one
//! queued subscriber watch the bus; the queue is drained once the feed is
//! exhausted, the way a UI context catches up on its next tick.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use modelsync_core::{
    CacheKey, ChangeFilter, IngestOutcome, Record, Scheduler, SubscriptionSet, SyncConfig,
    SyncHub, SyncReport,
};

use crate::cli::{GlobalOpts, ReplayArgs};
use crate::error::CliError;
use crate::output::{self, FieldRow};

// ── Feed format ──────────────────────────────────────────────────────

/// One line of a replay feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum FeedRecord {
    Upsert {
        #[serde(default)]
        scope: Option<Uuid>,
        entity: Record,
    },
    Remove {
        #[serde(default)]
        scope: Option<Uuid>,
        iid: Uuid,
    },
    Sync {
        #[serde(default)]
        scope: Option<Uuid>,
        entities: Vec<Record>,
    },
}

/// Parse a feed, skipping blank lines. Line numbers in errors are 1-based.
pub fn parse_feed(path: &Path, text: &str) -> Result<Vec<FeedRecord>, CliError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|err| CliError::Input {
                path: path.to_path_buf(),
                line: index + 1,
                reason: err.to_string(),
            })
        })
        .collect()
}

// ── Replay ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReplaySummary {
    pub records: usize,
    #[serde(flatten)]
    pub report: SyncReport,
    /// Deliveries to the immediate subscriber.
    pub immediate_events: u64,
    /// Jobs run when the dispatch queue was drained.
    pub queued_events: usize,
    pub faults: u64,
    /// Entities cached after the last record.
    pub cached: usize,
}

impl ReplaySummary {
    fn rows(&self) -> Vec<FieldRow> {
        vec![
            FieldRow::new("records", self.records),
            FieldRow::new("added", self.report.added),
            FieldRow::new("updated", self.report.updated),
            FieldRow::new("ignored", self.report.ignored),
            FieldRow::new("removed", self.report.removed),
            FieldRow::new("immediate events", self.immediate_events),
            FieldRow::new("queued events", self.queued_events),
            FieldRow::new("faults", self.faults),
            FieldRow::new("cached", self.cached),
        ]
    }
}

pub fn replay(config: SyncConfig, records: Vec<FeedRecord>) -> ReplaySummary {
    let hub: SyncHub<Record> = SyncHub::open(config);
    let assembler = hub.assembler();
    let mut queue = hub.dispatch_queue();
    let queued = Arc::new(AtomicUsize::new(0));

    let immediate = hub.bus().subscribe(
        ChangeFilter::all().in_cache(hub.cache_id()),
        Scheduler::Immediate,
        |change| debug!(key = %change.key, kind = %change.kind, revision = change.revision, "change"),
    );
    let mut subscriptions = SubscriptionSet::new();
    let counter = Arc::clone(&queued);
    subscriptions.add(hub.bus().subscribe(ChangeFilter::all(), queue.scheduler(), move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    }));

    let mut summary = ReplaySummary {
        records: records.len(),
        ..ReplaySummary::default()
    };
    for record in records {
        match record {
            FeedRecord::Upsert { scope, entity } => match assembler.ingest(scope, entity) {
                IngestOutcome::Added => summary.report.added += 1,
                IngestOutcome::Updated => summary.report.updated += 1,
                IngestOutcome::Ignored => summary.report.ignored += 1,
            },
            FeedRecord::Remove { scope, iid } => {
                if assembler.remove(&CacheKey::with_scope(iid, scope)) {
                    summary.report.removed += 1;
                }
            }
            FeedRecord::Sync { scope, entities } => {
                let report = assembler.synchronize(scope, entities);
                summary.report.added += report.added;
                summary.report.updated += report.updated;
                summary.report.ignored += report.ignored;
                summary.report.removed += report.removed;
            }
        }
    }

    summary.queued_events = queue.run_pending();
    summary.immediate_events = immediate.delivered();
    summary.faults = hub.bus().fault_count();
    summary.cached = hub.cache().len();

    immediate.dispose();
    subscriptions.dispose_all();
    hub.close();
    info!(
        records = summary.records,
        published = summary.report.published(),
        "feed replayed"
    );
    summary
}

pub fn handle(args: &ReplayArgs, global: &GlobalOpts, config: SyncConfig) -> Result<(), CliError> {
    let text = std::fs::read_to_string(&args.feed)?;
    let records = parse_feed(&args.feed, &text)?;
    let summary = replay(config, records);
    let out = output::render(global.output, &summary, |s| output::render_table(&s.rows()))?;
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn line(value: &serde_json::Value) -> String {
        serde_json::to_string(value).unwrap()
    }

    #[test]
    fn feed_lines_parse_by_op_tag() {
        let a = Uuid::new_v4();
        let text = [
            line(&serde_json::json!({"op": "upsert", "entity": {"iid": a, "revision": 1, "class_kind": "Category"}})),
            String::new(),
            line(&serde_json::json!({"op": "remove", "scope": null, "iid": a})),
            line(&serde_json::json!({"op": "sync", "scope": a, "entities": []})),
        ]
        .join("\n");

        let records = parse_feed(Path::new("feed.jsonl"), &text).unwrap();
        assert_eq!(records.len(), 3);
        assert!(matches!(records[0], FeedRecord::Upsert { scope: None, .. }));
        assert_eq!(records[1], FeedRecord::Remove { scope: None, iid: a });
        assert!(matches!(records[2], FeedRecord::Sync { scope: Some(s), .. } if s == a));
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let text = "{\"op\":\"remove\",\"iid\":\"00000000-0000-0000-0000-000000000000\"}\n{\"op\":\"explode\"}";
        let err = parse_feed(Path::new("feed.jsonl"), text).unwrap_err();
        assert!(matches!(err, CliError::Input { line: 2, .. }));
    }

    #[test]
    fn replay_counts_outcomes_and_deliveries() {
        let r = Record::new("Category").with_revision(1);
        let other = Record::new("Category").with_revision(1);
        let records = vec![
            FeedRecord::Upsert { scope: None, entity: r.clone() },
            FeedRecord::Upsert { scope: None, entity: r.clone().with_revision(2) },
            FeedRecord::Upsert { scope: None, entity: r.clone() },
            FeedRecord::Upsert { scope: None, entity: other.clone() },
            FeedRecord::Sync { scope: None, entities: vec![r.clone().with_revision(3)] },
        ];

        let summary = replay(SyncConfig::default(), records);
        assert_eq!(summary.records, 5);
        assert_eq!(summary.report.added, 2);
        assert_eq!(summary.report.updated, 2);
        assert_eq!(summary.report.ignored, 1);
        assert_eq!(summary.report.removed, 1);
        assert_eq!(summary.immediate_events, 5);
        assert_eq!(summary.queued_events, 5);
        assert_eq!(summary.cached, 1);
        assert_eq!(summary.faults, 0);
    }
}
