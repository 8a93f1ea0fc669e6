//! Registration-time handler validation.
//!
//! Checks here run when an erased handler enters the registry, or when a
//! deferred reference is first resolved. They are kept out of the per-handler
//! dispatch loop.

use crate::error::{RegistryError, RegistryResult};
use crate::handler::ErasedHandler;
use crate::point::PointKey;

/// Ensures `handler` accepts the point type it is being registered for.
pub fn check_signature(point: &PointKey, handler: &dyn ErasedHandler) -> RegistryResult<()> {
    let accepts = handler.accepts();
    if accepts.type_id() == point.type_id() {
        return Ok(());
    }
    Err(RegistryError::SignatureMismatch {
        handler: handler.id().clone(),
        accepts: accepts.name(),
        point: point.name(),
    })
}
