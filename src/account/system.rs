//! The account-system seam.

use async_trait::async_trait;

use crate::atom::AtomUpdate;
use crate::error::ClientError;

/// A named, stateful fold over an account's atom-update stream.
///
/// Systems are registered on an account in a deterministic insertion order
/// and invoked sequentially per update; `process_atom_update` must leave the
/// system's state fully updated before it returns. Observation streams a
/// system exposes are consumer-side only and never feed back into the
/// pipeline.
#[async_trait]
pub trait AccountSystem: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process_atom_update(&self, update: &AtomUpdate) -> Result<(), ClientError>;
}
