// ── Record: the domain-neutral entity ──
//
// A class tag, named scalar fields and named identity links. Enough to
// model any repository thing the core has to move around without pulling
// a domain vocabulary into this crate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::capability::{Entity, HasContainer, HasIdentity, HasRevision};
use super::identity::{ClassKind, Revision};

/// Generic cached entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub iid: Uuid,
    #[serde(default)]
    pub revision: Revision,
    pub class_kind: ClassKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Uuid>,
    /// Scalar fields, compared and shipped as whole values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
    /// Named references to other entities, single- or multi-valued.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, Vec<Uuid>>,
}

impl Record {
    /// A fresh record with a random identity at revision 0.
    pub fn new(class_kind: impl Into<ClassKind>) -> Self {
        Self::with_iid(Uuid::new_v4(), class_kind)
    }

    pub fn with_iid(iid: Uuid, class_kind: impl Into<ClassKind>) -> Self {
        Self {
            iid,
            revision: 0,
            class_kind: class_kind.into(),
            container: None,
            fields: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    // ── Builders ─────────────────────────────────────────────────────

    #[must_use]
    pub fn with_revision(mut self, revision: Revision) -> Self {
        self.revision = revision;
        self
    }

    #[must_use]
    pub fn contained_by(mut self, container: Uuid) -> Self {
        self.container = Some(container);
        self
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_link(mut self, name: impl Into<String>, target: Uuid) -> Self {
        self.link(name, target);
        self
    }

    // ── Field access ─────────────────────────────────────────────────

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Set a scalar field, returning the previous value.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Targets of the named link, empty if the link is unset.
    pub fn linked(&self, name: &str) -> &[Uuid] {
        self.links.get(name).map_or(&[], Vec::as_slice)
    }

    /// Add `target` to the named link. Duplicate targets are ignored.
    pub fn link(&mut self, name: impl Into<String>, target: Uuid) {
        let targets = self.links.entry(name.into()).or_default();
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    /// Remove `target` from the named link. Returns whether it was present.
    pub fn unlink(&mut self, name: &str, target: Uuid) -> bool {
        let Some(targets) = self.links.get_mut(name) else {
            return false;
        };
        let before = targets.len();
        targets.retain(|t| *t != target);
        let removed = targets.len() != before;
        if targets.is_empty() {
            self.links.remove(name);
        }
        removed
    }
}

impl HasIdentity for Record {
    fn iid(&self) -> Uuid {
        self.iid
    }
}

impl HasRevision for Record {
    fn revision(&self) -> Revision {
        self.revision
    }

    fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }
}

impl HasContainer for Record {
    fn container(&self) -> Option<Uuid> {
        self.container
    }
}

impl Entity for Record {
    fn class_kind(&self) -> ClassKind {
        self.class_kind.clone()
    }

    fn references(&self) -> Vec<Uuid> {
        let mut out = Vec::new();
        for target in self.links.values().flatten() {
            if !out.contains(target) {
                out.push(*target);
            }
        }
        out
    }

    fn without_reference(&self, target: Uuid) -> Self {
        let mut copy = self.clone();
        copy.links.retain(|_, targets| {
            targets.retain(|t| *t != target);
            !targets.is_empty()
        });
        copy
    }
}
