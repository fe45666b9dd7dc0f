//! Pre-flight validators, run once after binding and before extraction.

use futures::future::BoxFuture;
use tracing::info;

use ragkb_shared::{RagKbError, Result, ValidationOutcome};
use ragkb_storage::VectorStore;

/// A validator attached to a vector-store registration.
pub type Validator = for<'a> fn(&'a dyn VectorStore) -> BoxFuture<'a, Result<ValidationOutcome>>;

/// Skip the run if the configured collection is already there.
pub fn collection_absent(store: &dyn VectorStore) -> BoxFuture<'_, Result<ValidationOutcome>> {
    Box::pin(async move {
        if store.collection_exists().await? {
            Ok(ValidationOutcome::AlreadyExists {
                resource: format!("collection '{}'", store.collection_name()),
            })
        } else {
            Ok(ValidationOutcome::Pass)
        }
    })
}

/// Run `validators` in order and return the first outcome that is not
/// [`ValidationOutcome::Pass`]. A `Fail` outcome becomes a validation error;
/// errors raised by a validator propagate unchanged.
pub async fn run_validators(
    validators: &[Validator],
    store: &dyn VectorStore,
) -> Result<ValidationOutcome> {
    for validate in validators {
        match validate(store).await? {
            ValidationOutcome::Pass => continue,
            ValidationOutcome::Fail { reason } => return Err(RagKbError::validation(reason)),
            outcome @ ValidationOutcome::AlreadyExists { .. } => {
                info!(collection = store.collection_name(), ?outcome, "pre-flight check stops the run");
                return Ok(outcome);
            }
        }
    }
    Ok(ValidationOutcome::Pass)
}
