//! Two-stage resolution of strong and weak references.
//!
//! References arrive in byte order, which means a reference can name an
//! InstanceUID that has not been parsed yet. The resolver keeps a map
//! of seen identities and an append-only queue of deferred links: the
//! queue is drained whenever a new identity registers, and once more at
//! partition finalisation. A strong reference still unmatched at
//! finalisation makes the partition structurally invalid; a weak one is
//! retained dangling with a warning.

use crate::diag::DiagnosticSink;
use crate::error::{MxfError, Result};
use crate::metadata::{MetadataObject, ObjId, RefSlot};
use std::collections::HashMap;
use uuid::Uuid;

/// A reference waiting for its target to appear.
#[derive(Debug, Clone, Copy)]
pub struct DeferredRef {
    /// Target InstanceUID.
    pub uuid: Uuid,
    /// Object holding the reference.
    pub referrer: ObjId,
    /// Slot within the referrer.
    pub slot: RefSlot,
    /// Whether the reference is strong.
    pub strong: bool,
}

/// Reference resolver for one partition.
#[derive(Debug, Default)]
pub struct Resolver {
    targets: HashMap<Uuid, ObjId>,
    deferred: Vec<DeferredRef>,
}

impl Resolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Identities seen so far.
    pub fn targets(&self) -> &HashMap<Uuid, ObjId> {
        &self.targets
    }

    /// References still waiting for a target.
    pub fn unmatched(&self) -> &[DeferredRef] {
        &self.deferred
    }

    /// Forget all state, as when metadata is cleared.
    pub fn clear(&mut self) {
        self.targets.clear();
        self.deferred.clear();
    }

    /// Record an object's InstanceUID and drain any deferred
    /// references waiting for it.
    pub fn register_target(
        &mut self,
        uuid: Uuid,
        id: ObjId,
        arena: &mut [MetadataObject],
        diag: &mut dyn DiagnosticSink,
    ) {
        if let Some(previous) = self.targets.insert(uuid, id) {
            if previous != id {
                diag.warning(format!(
                    "duplicate InstanceUID {}: keeping the later object",
                    uuid
                ));
            }
        }
        self.drain(arena);
    }

    /// Record an outgoing reference: link it now if the target is
    /// already known, else queue it.
    pub fn register_reference(
        &mut self,
        uuid: Uuid,
        referrer: ObjId,
        slot: RefSlot,
        strong: bool,
        arena: &mut [MetadataObject],
    ) {
        match self.targets.get(&uuid) {
            Some(&target) => link(arena, referrer, slot, target),
            None => self.deferred.push(DeferredRef {
                uuid,
                referrer,
                slot,
                strong,
            }),
        }
    }

    /// Resolve every queued reference whose target has appeared.
    fn drain(&mut self, arena: &mut [MetadataObject]) {
        let targets = &self.targets;
        self.deferred.retain(|deferred| {
            match targets.get(&deferred.uuid) {
                Some(&target) => {
                    link(arena, deferred.referrer, deferred.slot, target);
                    false
                }
                None => true,
            }
        });
    }

    /// Final pass after every set in the partition has been parsed.
    ///
    /// Drains once more, then classifies what is left: dangling weak
    /// references are reported and retained, the first dangling strong
    /// reference fails the partition.
    pub fn finalize(
        &mut self,
        arena: &mut [MetadataObject],
        diag: &mut dyn DiagnosticSink,
    ) -> Result<()> {
        self.drain(arena);

        let mut dangling_strong = None;
        for deferred in &self.deferred {
            if deferred.strong {
                diag.error(format!(
                    "strong reference to unknown InstanceUID {}",
                    deferred.uuid
                ));
                dangling_strong.get_or_insert(deferred.uuid);
            } else {
                diag.warning(format!(
                    "weak reference to unknown InstanceUID {} left dangling",
                    deferred.uuid
                ));
            }
        }

        match dangling_strong {
            Some(uuid) => Err(MxfError::DanglingStrongRef { uuid }),
            None => Ok(()),
        }
    }
}

fn link(arena: &mut [MetadataObject], referrer: ObjId, slot: RefSlot, target: ObjId) {
    if let Some(object) = arena.get_mut(referrer.0) {
        if let Some(reference) = object.reference_mut(slot) {
            reference.target = Some(target);
        }
    }
}
