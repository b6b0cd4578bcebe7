// ── Batch ordering ──
//
// Topological order over the staged operations: a create precedes every
// operation whose payload depends on the created identity (as container or
// reference). Among ready operations the lowest staging index goes first,
// so unrelated operations keep staging order.
//
// A reference cycle among created entities stalls the sort. It is broken
// by emitting one create of the cycle with its references to still-pending
// creates cleared, then appending an update that restores the full state
// once everything exists. The candidate comes from a strongly connected
// component of the stalled graph that nothing outside it feeds, so creates
// that only wait on a cycle are never deferred. Containment cannot be
// deferred, so the candidate is preferably a create whose container is
// already resolved.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tracing::{debug, warn};
use uuid::Uuid;

use super::batch::{Operation, OperationKind};
use crate::model::{Entity, Revision};

/// An operation before ordering.
#[derive(Debug, Clone)]
pub(crate) struct Draft<T> {
    pub(crate) kind: OperationKind,
    pub(crate) payload: T,
    pub(crate) token: Option<Revision>,
}

impl<T: Entity> Draft<T> {
    fn into_operation(self, deferred_references: Vec<Uuid>) -> Operation<T> {
        Operation {
            kind: self.kind,
            iid: self.payload.iid(),
            class_kind: self.payload.class_kind(),
            payload: self.payload,
            token: self.token,
            deferred_references,
        }
    }
}

/// Order `drafts` (given in staging order) into the batch sequence.
pub(crate) fn order<T: Entity>(drafts: Vec<Draft<T>>) -> Vec<Operation<T>> {
    Planner::new(drafts).run()
}

struct Planner<T: Entity> {
    slots: Vec<Option<Draft<T>>>,
    /// Created identity -> staging index.
    creates: HashMap<Uuid, usize>,
    dependents: Vec<Vec<usize>>,
    indegree: Vec<usize>,
    emitted: Vec<bool>,
    ready: BinaryHeap<Reverse<usize>>,
    out: Vec<Operation<T>>,
    completions: Vec<Operation<T>>,
}

impl<T: Entity> Planner<T> {
    fn new(drafts: Vec<Draft<T>>) -> Self {
        let n = drafts.len();
        let creates: HashMap<Uuid, usize> = drafts
            .iter()
            .enumerate()
            .filter(|(_, d)| d.kind == OperationKind::Create)
            .map(|(i, d)| (d.payload.iid(), i))
            .collect();

        let mut dependents = vec![Vec::new(); n];
        let mut indegree = vec![0; n];
        for (j, draft) in drafts.iter().enumerate() {
            if draft.kind == OperationKind::Delete {
                continue;
            }
            for target in draft.payload.dependencies() {
                if let Some(&i) = creates.get(&target) {
                    if i != j {
                        dependents[i].push(j);
                        indegree[j] += 1;
                    }
                }
            }
        }

        let ready = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        Self {
            slots: drafts.into_iter().map(Some).collect(),
            creates,
            dependents,
            indegree,
            emitted: vec![false; n],
            ready,
            out: Vec::with_capacity(n),
            completions: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Operation<T>> {
        let n = self.slots.len();
        let mut done = 0;
        while done < n {
            let index = match self.ready.pop() {
                Some(Reverse(i)) if self.emitted[i] => continue,
                Some(Reverse(i)) => {
                    self.emit(i);
                    i
                }
                None => {
                    let i = self.break_cycle();
                    self.emit_deferred(i);
                    i
                }
            };
            self.release(index);
            done += 1;
        }
        self.out.append(&mut self.completions);
        self.out
    }

    fn emit(&mut self, i: usize) {
        if let Some(draft) = self.slots[i].take() {
            self.out.push(draft.into_operation(Vec::new()));
        }
    }

    fn release(&mut self, i: usize) {
        self.emitted[i] = true;
        for j in std::mem::take(&mut self.dependents[i]) {
            if self.emitted[j] {
                continue;
            }
            self.indegree[j] = self.indegree[j].saturating_sub(1);
            if self.indegree[j] == 0 {
                self.ready.push(Reverse(j));
            }
        }
    }

    fn is_pending_create(&self, iid: Uuid) -> bool {
        self.creates.get(&iid).is_some_and(|&i| !self.emitted[i])
    }

    fn pending_creates(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.slots.len()).filter(|&i| {
            !self.emitted[i]
                && self.slots[i]
                    .as_ref()
                    .is_some_and(|d| d.kind == OperationKind::Create)
        })
    }

    /// Choose the operation to emit while the sort is stalled.
    fn break_cycle(&self) -> usize {
        let candidates = self.cycle_candidates();
        let preferred = candidates.iter().copied().find(|&i| {
            self.slots[i]
                .as_ref()
                .and_then(|d| d.payload.container())
                .is_none_or(|c| !self.is_pending_create(c))
        });
        if let Some(i) = preferred {
            return i;
        }

        let fallback = candidates
            .first()
            .copied()
            .or_else(|| self.pending_creates().next())
            .or_else(|| (0..self.slots.len()).find(|&i| !self.emitted[i]))
            .unwrap_or(0);
        warn!(
            index = fallback,
            "containment cycle among created entities, emitting with unresolved container"
        );
        fallback
    }

    /// Pending creates, in staging order, that sit on a cycle no other
    /// pending operation feeds into.
    fn cycle_candidates(&self) -> Vec<usize> {
        let component = self.components();
        let count = component.iter().flatten().max().map_or(0, |m| m + 1);
        let mut size = vec![0usize; count];
        let mut fed = vec![false; count];
        for (u, cu) in component.iter().enumerate() {
            let Some(cu) = *cu else { continue };
            size[cu] += 1;
            for &w in &self.dependents[u] {
                if let Some(cw) = component[w] {
                    if cw != cu {
                        fed[cw] = true;
                    }
                }
            }
        }

        self.pending_creates()
            .filter(|&i| component[i].is_some_and(|c| size[c] > 1 && !fed[c]))
            .collect()
    }

    /// Strongly connected components of the not-yet-emitted operations
    /// (Tarjan, iterative). Emitted operations get `None`.
    fn components(&self) -> Vec<Option<usize>> {
        const UNVISITED: usize = usize::MAX;
        let n = self.slots.len();
        let mut index = vec![UNVISITED; n];
        let mut low = vec![0; n];
        let mut on_stack = vec![false; n];
        let mut stack = Vec::new();
        let mut component = vec![None; n];
        let mut next_index = 0;
        let mut next_component = 0;

        for root in 0..n {
            if self.emitted[root] || index[root] != UNVISITED {
                continue;
            }
            index[root] = next_index;
            low[root] = next_index;
            next_index += 1;
            stack.push(root);
            on_stack[root] = true;
            let mut frames = vec![(root, 0usize)];

            while let Some(frame) = frames.last_mut() {
                let v = frame.0;
                if let Some(&w) = self.dependents[v].get(frame.1) {
                    frame.1 += 1;
                    if self.emitted[w] {
                        continue;
                    }
                    if index[w] == UNVISITED {
                        index[w] = next_index;
                        low[w] = next_index;
                        next_index += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        frames.push((w, 0));
                    } else if on_stack[w] {
                        low[v] = low[v].min(index[w]);
                    }
                    continue;
                }

                frames.pop();
                if low[v] == index[v] {
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component[w] = Some(next_component);
                        if w == v {
                            break;
                        }
                    }
                    next_component += 1;
                }
                if let Some(&(parent, _)) = frames.last() {
                    low[parent] = low[parent].min(low[v]);
                }
            }
        }
        component
    }

    /// Emit a stalled create with its references to pending creates cleared
    /// and queue the completion update.
    fn emit_deferred(&mut self, i: usize) {
        let Some(draft) = self.slots[i].take() else {
            return;
        };
        let me = draft.payload.iid();
        let targets: Vec<Uuid> = draft
            .payload
            .references()
            .into_iter()
            .filter(|t| *t != me && self.is_pending_create(*t))
            .collect();

        let stripped = targets
            .iter()
            .fold(draft.payload.clone(), |p, t| p.without_reference(*t));

        if targets.is_empty() || stripped == draft.payload {
            warn!(iid = %me, "cannot defer references of created entity, emitting as is");
            self.out.push(draft.into_operation(Vec::new()));
            return;
        }

        debug!(iid = %me, deferred = targets.len(), "breaking reference cycle between created entities");
        self.out.push(Operation {
            kind: OperationKind::Create,
            iid: me,
            class_kind: draft.payload.class_kind(),
            payload: stripped,
            token: None,
            deferred_references: targets,
        });
        self.completions.push(Operation {
            kind: OperationKind::Update,
            iid: me,
            class_kind: draft.payload.class_kind(),
            payload: draft.payload,
            token: None,
            deferred_references: Vec::new(),
        });
    }
}
