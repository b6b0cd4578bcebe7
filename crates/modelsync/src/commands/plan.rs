//! Stage a scripted set of edits and print the planned batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabled::Tabled;
use tracing::debug;
use uuid::Uuid;

use modelsync_core::{
    BatchSummary, CoreError, LoopbackWriter, MutationSession, Operation, OperationBatch, Record,
    SyncConfig, SyncHub, WriteReceipt,
};

use crate::cli::{GlobalOpts, PlanArgs};
use crate::error::CliError;
use crate::output::{self, kind_label};

// ── Script format ────────────────────────────────────────────────────

/// A plan script: records to seed the cache with, then edits to stage.
#[derive(Debug, Default, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub cache: Vec<Record>,
    #[serde(default)]
    pub edits: Vec<Edit>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Edit {
    /// Set a scalar field on an existing entity.
    Set { iid: Uuid, field: String, value: Value },
    /// Stage a new entity.
    Create { entity: Record },
    /// Mark an entity for deletion.
    Delete { iid: Uuid },
    /// Add a reference from `iid` to `target` under `name`.
    Link { iid: Uuid, name: String, target: Uuid },
}

/// Apply `edits` to `session` in order.
pub fn stage_edits(session: &mut MutationSession<Record>, edits: Vec<Edit>) -> Result<(), CoreError> {
    for edit in edits {
        match edit {
            Edit::Set { iid, field, value } => {
                session.stage(iid)?.set_field(field, value);
            }
            Edit::Create { entity } => {
                session.stage_new(entity)?;
            }
            Edit::Delete { iid } => session.delete(iid)?,
            Edit::Link { iid, name, target } => session.stage(iid)?.link(name, target),
        }
    }
    Ok(())
}

// ── Output ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PlanOutput {
    pub summary: BatchSummary,
    pub batch: OperationBatch<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<WriteReceipt>,
}

#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "#")]
    position: usize,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Entity")]
    iid: Uuid,
    #[tabled(rename = "Class")]
    class_kind: String,
    #[tabled(rename = "Token")]
    token: String,
    #[tabled(rename = "Deferred")]
    deferred: usize,
}

impl OperationRow {
    fn from_op(position: usize, op: &Operation<Record>, color: bool) -> Self {
        Self {
            position,
            kind: kind_label(op.kind, color),
            iid: op.iid,
            class_kind: op.class_kind.to_string(),
            token: op.token.map_or_else(|| "-".into(), |t| t.to_string()),
            deferred: op.deferred_references.len(),
        }
    }
}

#[derive(Tabled)]
struct CommittedRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Entity")]
    iid: Uuid,
    #[tabled(rename = "Revision")]
    revision: u64,
}

fn plan_table(plan: &PlanOutput, color: bool) -> String {
    let rows: Vec<OperationRow> = plan
        .batch
        .iter()
        .enumerate()
        .map(|(i, op)| OperationRow::from_op(i + 1, op, color))
        .collect();
    let s = plan.summary;
    let mut out = format!(
        "{}\n{}\n{} create(s), {} update(s), {} delete(s), {} deferred",
        output::heading(&format!("Batch {}", plan.batch.id()), color),
        output::render_table(&rows),
        s.creates,
        s.updates,
        s.deletes,
        s.deferred,
    );
    if let Some(receipt) = &plan.receipt {
        let committed: Vec<CommittedRow> = receipt
            .committed
            .iter()
            .map(|c| CommittedRow {
                kind: kind_label(c.kind, color),
                iid: c.iid,
                revision: c.revision,
            })
            .collect();
        out.push_str(&format!(
            "\n\n{}\n{}",
            output::heading("Committed", color),
            output::render_table(&committed)
        ));
    }
    out
}

// ── Handler ──────────────────────────────────────────────────────────

pub async fn handle(args: &PlanArgs, global: &GlobalOpts, config: SyncConfig) -> Result<(), CliError> {
    let text = std::fs::read_to_string(&args.script)?;
    let script: Script = serde_json::from_str(&text).map_err(|source| CliError::Script {
        path: args.script.clone(),
        source,
    })?;

    let hub: SyncHub<Record> = SyncHub::open(config);
    let seeded = hub.assembler().ingest_many(None, script.cache);
    debug!(added = seeded.added, ignored = seeded.ignored, "cache seeded");

    let mut session = hub.begin_session()?;
    stage_edits(&mut session, script.edits)?;
    let batch = session.finalize()?;

    let receipt = if args.apply {
        let writer = LoopbackWriter::new(hub.assembler().clone());
        Some(hub.write(batch.clone(), &writer).await?)
    } else {
        None
    };

    let plan = PlanOutput {
        summary: batch.summary(),
        batch,
        receipt,
    };
    let color = output::should_color(global.color);
    let out = output::render(global.output, &plan, |p| plan_table(p, color))?;
    output::print_output(&out, global.quiet);
    hub.close();
    Ok(())
}
