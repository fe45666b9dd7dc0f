//! Local PDF files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use ragkb_shared::config::PdfDatasourceConfig;
use ragkb_shared::{Document, RagKbError, Result};

use crate::{DocumentReader, apply_limit};

const DATASOURCE: &str = "pdf";

/// Reads every `*.pdf` directly under `base_path`, in file-name order.
/// Files whose text cannot be extracted are logged and skipped.
pub struct PdfReader {
    config: PdfDatasourceConfig,
}

impl PdfReader {
    pub fn new(config: PdfDatasourceConfig) -> Self {
        Self { config }
    }
}

/// Sorted `*.pdf` paths (extension matched case-insensitively).
fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| RagKbError::io(dir, e))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| RagKbError::io(dir, e))?.path();
        let is_pdf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn read_pdf(path: &Path) -> Result<Document> {
    let bytes = std::fs::read(path).map_err(|e| RagKbError::io(path, e))?;
    let text = pdf_extract::extract_text_from_mem(&bytes)
        .map_err(|e| RagKbError::parse(format!("{}: {e}", path.display())))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let title = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut doc = Document::new(DATASOURCE, &file_name, title, text);
    doc.last_edited_time = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from);
    doc.metadata.insert("path".into(), path.display().to_string().into());
    Ok(doc)
}

#[async_trait]
impl DocumentReader for PdfReader {
    #[instrument(skip_all, fields(dir = %self.config.base_path.display()))]
    async fn read_all(&self) -> Result<Vec<Document>> {
        let paths = apply_limit(
            list_pdfs(&self.config.base_path)?,
            self.config.common.export_limit,
        );
        info!(files = paths.len(), "reading pdf files");

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let shown = path.display().to_string();
            // A panic inside the extractor counts as a failed file.
            let result = tokio::task::spawn_blocking(move || read_pdf(&path))
                .await
                .unwrap_or_else(|e| Err(RagKbError::parse(format!("pdf worker failed: {e}"))));
            match result {
                Ok(doc) => documents.push(doc),
                Err(e) => warn!(file = %shown, error = %e, "pdf extraction failed, skipping"),
            }
        }
        Ok(documents)
    }
}
