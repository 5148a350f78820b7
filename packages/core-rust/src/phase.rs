//! Phases and the phase registry.
//!
//! A phase is a named processing stage. The registry keeps phases in
//! processing order and hands out frozen [`PhaseSnapshot`]s to chain builders;
//! registrations made after a snapshot was taken never affect it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// Conventional phase names used by the default catalogs.
pub mod names {
    pub const RECEIVE: &str = "receive";
    pub const PRE_STREAM: &str = "pre-stream";
    pub const USER_STREAM: &str = "user-stream";
    pub const POST_STREAM: &str = "post-stream";
    pub const READ: &str = "read";
    pub const PRE_PROTOCOL: &str = "pre-protocol";
    pub const USER_PROTOCOL: &str = "user-protocol";
    pub const POST_PROTOCOL: &str = "post-protocol";
    pub const UNMARSHAL: &str = "unmarshal";
    pub const PRE_LOGICAL: &str = "pre-logical";
    pub const USER_LOGICAL: &str = "user-logical";
    pub const POST_LOGICAL: &str = "post-logical";
    pub const PRE_INVOKE: &str = "pre-invoke";
    pub const INVOKE: &str = "invoke";
    pub const POST_INVOKE: &str = "post-invoke";

    pub const SETUP: &str = "setup";
    pub const PREPARE_SEND: &str = "prepare-send";
    pub const WRITE: &str = "write";
    pub const MARSHAL: &str = "marshal";
    pub const SEND: &str = "send";
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// A named processing stage with its position in processing order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub ordinal: u32,
}

impl Phase {
    #[must_use]
    pub fn new(name: impl Into<String>, ordinal: u32) -> Self {
        Self {
            name: name.into(),
            ordinal,
        }
    }
}

/// Position to ordinal. Saturates at `u32::MAX`; no realistic catalog gets
/// near it.
fn ordinal_of(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// PhaseRegistry
// ---------------------------------------------------------------------------

/// Mutable, ordered catalog of phase names.
///
/// Owned by whoever configures an engine instance; there is no process-wide
/// registry. Call [`PhaseRegistry::snapshot`] to freeze the current order.
#[derive(Debug, Clone, Default)]
pub struct PhaseRegistry {
    order: Vec<String>,
}

impl PhaseRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a fixed sequence, each phase anchored after the
    /// previous one.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::DuplicatePhase`] if a name repeats.
    pub fn from_sequence<I, S>(names: I) -> Result<Self, BuildError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::new();
        let mut anchor: Option<String> = None;
        for name in names {
            let name = name.as_ref();
            registry.register(name, anchor.as_deref())?;
            anchor = Some(name.to_string());
        }
        Ok(registry)
    }

    /// Default catalog for inbound (request-receiving) chains.
    #[must_use]
    pub fn inbound() -> Self {
        Self {
            order: [
                names::RECEIVE,
                names::PRE_STREAM,
                names::USER_STREAM,
                names::POST_STREAM,
                names::READ,
                names::PRE_PROTOCOL,
                names::USER_PROTOCOL,
                names::POST_PROTOCOL,
                names::UNMARSHAL,
                names::PRE_LOGICAL,
                names::USER_LOGICAL,
                names::POST_LOGICAL,
                names::PRE_INVOKE,
                names::INVOKE,
                names::POST_INVOKE,
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }

    /// Default catalog for outbound (request-sending) chains.
    #[must_use]
    pub fn outbound() -> Self {
        Self {
            order: [
                names::SETUP,
                names::PRE_LOGICAL,
                names::USER_LOGICAL,
                names::POST_LOGICAL,
                names::PREPARE_SEND,
                names::PRE_STREAM,
                names::PRE_PROTOCOL,
                names::WRITE,
                names::MARSHAL,
                names::USER_PROTOCOL,
                names::POST_PROTOCOL,
                names::USER_STREAM,
                names::POST_STREAM,
                names::SEND,
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }

    /// Inserts `name` immediately after `after`, or at the start when no
    /// anchor is given. Returns the phase with its current position.
    ///
    /// # Errors
    ///
    /// - [`BuildError::DuplicatePhase`] if `name` is already registered.
    /// - [`BuildError::UnknownPhase`] if the anchor phase does not exist.
    pub fn register(&mut self, name: &str, after: Option<&str>) -> Result<Phase, BuildError> {
        if self.contains(name) {
            return Err(BuildError::DuplicatePhase {
                name: name.to_string(),
            });
        }
        let index = match after {
            None => 0,
            Some(anchor) => {
                let pos = self.position(anchor).ok_or_else(|| BuildError::UnknownPhase {
                    name: anchor.to_string(),
                })?;
                pos + 1
            }
        };
        self.order.insert(index, name.to_string());
        tracing::debug!(phase = name, ordinal = index, "registered phase");
        Ok(Phase::new(name, ordinal_of(index)))
    }

    /// Returns the phases in processing order.
    #[must_use]
    pub fn ordinals(&self) -> Vec<Phase> {
        self.order
            .iter()
            .enumerate()
            .map(|(i, name)| Phase::new(name.clone(), ordinal_of(i)))
            .collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Freezes the current order. Later registrations do not affect the
    /// returned snapshot.
    #[must_use]
    pub fn snapshot(&self) -> PhaseSnapshot {
        PhaseSnapshot {
            phases: self.ordinals().into(),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|p| p == name)
    }
}

// ---------------------------------------------------------------------------
// PhaseSnapshot
// ---------------------------------------------------------------------------

/// Immutable, cheaply cloneable view of a registry's phase order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSnapshot {
    phases: Arc<[Phase]>,
}

impl PhaseSnapshot {
    /// Looks up a phase by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Phase> {
        self.phases.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
