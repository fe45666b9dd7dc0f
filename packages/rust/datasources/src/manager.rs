//! Datasource manager: one reader, one cleaner, one failure domain.

use std::time::Instant;

use tracing::{info, instrument};

use ragkb_shared::{Document, RagKbError, Result};

use crate::{Cleaner, DocumentReader};

/// A bound knowledge source. Reader failures surface as
/// [`RagKbError::SourceUnavailable`] naming this source.
pub struct DatasourceManager {
    name: String,
    required: bool,
    reader: Box<dyn DocumentReader>,
    cleaner: Box<dyn Cleaner>,
}

impl std::fmt::Debug for DatasourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasourceManager")
            .field("name", &self.name)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

impl DatasourceManager {
    pub fn new(
        name: impl Into<String>,
        required: bool,
        reader: Box<dyn DocumentReader>,
        cleaner: Box<dyn Cleaner>,
    ) -> Self {
        Self {
            name: name.into(),
            required,
            reader,
            cleaner,
        }
    }

    /// Datasource discriminant, e.g. `notion`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this source failing fails the whole run.
    pub fn required(&self) -> bool {
        self.required
    }

    /// Read every document from the source.
    #[instrument(skip_all, fields(source = %self.name))]
    pub async fn extract(&self) -> Result<Vec<Document>> {
        let start = Instant::now();
        let documents = self.reader.read_all().await.map_err(|e| match e {
            RagKbError::SourceUnavailable { .. } | RagKbError::Cancelled => e,
            other => RagKbError::SourceUnavailable {
                datasource: self.name.clone(),
                message: other.to_string(),
            },
        })?;
        info!(
            documents = documents.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "extraction complete"
        );
        Ok(documents)
    }

    /// Apply this source's cleaner.
    pub fn clean(&self, documents: Vec<Document>) -> Vec<Document> {
        let before = documents.len();
        let cleaned = self.cleaner.clean(documents);
        info!(source = %self.name, before, after = cleaned.len(), "cleaning complete");
        cleaned
    }
}
