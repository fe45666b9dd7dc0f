//! End-to-end ingestion: validate → extract → clean → split → embed → load.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use ragkb_shared::{Chunk, Document, RagKbError, Result, RunState, ValidationOutcome, VectorRecord};

use crate::binder::IngestionComponents;
use crate::validators::run_validators;

/// Operator cancellation flag, checked between batches.
#[derive(Debug, Default)]
pub struct RunControl {
    cancelled: AtomicBool,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RagKbError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A knowledge source that failed during extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSource {
    pub name: String,
    pub required: bool,
    pub kind: &'static str,
    pub message: String,
}

/// Result of one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestionReport {
    /// `Completed` or `Skipped`.
    pub state: RunState,
    /// Documents extracted across all sources.
    pub documents: usize,
    /// Documents left after cleaning.
    pub cleaned_documents: usize,
    pub chunks: usize,
    pub vectors_written: usize,
    pub failed_sources: Vec<FailedSource>,
    pub elapsed: Duration,
}

impl IngestionReport {
    fn skipped(elapsed: Duration) -> Self {
        Self {
            state: RunState::Skipped,
            documents: 0,
            cleaned_documents: 0,
            chunks: 0,
            vectors_written: 0,
            failed_sources: Vec::new(),
            elapsed,
        }
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new state.
    fn phase(&self, state: RunState);
    /// Called after each source's extraction, successful or not.
    fn source_done(&self, source: &str, result: std::result::Result<usize, &RagKbError>);
    /// Called after each embedding batch.
    fn batch_embedded(&self, current: usize, total: usize);
    /// Called after each batch lands in the vector store.
    fn batch_written(&self, current: usize, total: usize);
    /// Called when the run ends without error. Failed runs get
    /// `phase(RunState::Failed)` instead.
    fn done(&self, report: &IngestionReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _state: RunState) {}
    fn source_done(&self, _source: &str, _result: std::result::Result<usize, &RagKbError>) {}
    fn batch_embedded(&self, _current: usize, _total: usize) {}
    fn batch_written(&self, _current: usize, _total: usize) {}
    fn done(&self, _report: &IngestionReport) {}
}

/// Run the ingestion pipeline over bound components.
///
/// 1. Validating: an existing collection ends the run as `Skipped`
/// 2. Extracting: sources in configuration order, failures isolated
/// 3. Cleaning, Splitting
/// 4. Embedding: every batch, before anything is written
/// 5. Loading: create the collection, then write whole batches
///
/// The run fails when a required source fails, when every source fails, or
/// on any embedding or storage error. A failed run reports `Failed` to
/// `progress` before the error is returned.
#[instrument(skip_all, fields(collection = components.vector_store.collection_name()))]
pub async fn run_ingestion(
    components: &IngestionComponents,
    control: &RunControl,
    progress: &dyn ProgressReporter,
) -> Result<IngestionReport> {
    let result = ingest(components, control, progress).await;
    if let Err(e) = &result {
        warn!(kind = e.kind(), error = %e, "ingestion failed");
        progress.phase(RunState::Failed);
    }
    result
}

async fn ingest(
    components: &IngestionComponents,
    control: &RunControl,
    progress: &dyn ProgressReporter,
) -> Result<IngestionReport> {
    let start = Instant::now();

    // --- Validating ---
    progress.phase(RunState::Validating);
    let outcome = run_validators(&components.validators, components.vector_store.as_ref()).await?;
    if let ValidationOutcome::AlreadyExists { resource } = outcome {
        info!(%resource, "already ingested, skipping run");
        progress.phase(RunState::Skipped);
        let report = IngestionReport::skipped(start.elapsed());
        progress.done(&report);
        return Ok(report);
    }

    // --- Extracting ---
    progress.phase(RunState::Extracting);
    let (extracted, failed_sources) = extract_all(components, control, progress).await?;
    let documents: usize = extracted.iter().map(|(_, docs)| docs.len()).sum();

    // --- Cleaning ---
    progress.phase(RunState::Cleaning);
    let cleaned: Vec<Document> = extracted
        .into_iter()
        .flat_map(|(index, docs)| components.datasources[index].clean(docs))
        .collect();

    // --- Splitting ---
    progress.phase(RunState::Splitting);
    let chunks = components.splitter.split_documents(&cleaned);
    info!(
        documents,
        cleaned = cleaned.len(),
        chunks = chunks.len(),
        "documents split"
    );

    // --- Embedding ---
    progress.phase(RunState::Embedding);
    let batches = embed_all(components, &chunks, control, progress).await?;

    // --- Loading ---
    progress.phase(RunState::Loading);
    let vectors_written = load_all(components, &batches, control, progress).await?;

    let report = IngestionReport {
        state: RunState::Completed,
        documents,
        cleaned_documents: cleaned.len(),
        chunks: chunks.len(),
        vectors_written,
        failed_sources,
        elapsed: start.elapsed(),
    };
    info!(
        vectors = report.vectors_written,
        failed_sources = report.failed_sources.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "ingestion complete"
    );
    progress.phase(RunState::Completed);
    progress.done(&report);
    Ok(report)
}

/// Extract every source in order. Returns `(source index, documents)` for
/// the sources that succeeded plus a record of those that failed.
async fn extract_all(
    components: &IngestionComponents,
    control: &RunControl,
    progress: &dyn ProgressReporter,
) -> Result<(Vec<(usize, Vec<Document>)>, Vec<FailedSource>)> {
    let mut extracted = Vec::new();
    let mut failures: Vec<(FailedSource, RagKbError)> = Vec::new();

    for (index, manager) in components.datasources.iter().enumerate() {
        control.check()?;
        match manager.extract().await {
            Ok(docs) => {
                progress.source_done(manager.name(), Ok(docs.len()));
                extracted.push((index, docs));
            }
            Err(RagKbError::Cancelled) => return Err(RagKbError::Cancelled),
            Err(err) => {
                warn!(source = manager.name(), required = manager.required(), error = %err, "source failed");
                progress.source_done(manager.name(), Err(&err));
                let record = FailedSource {
                    name: manager.name().to_string(),
                    required: manager.required(),
                    kind: err.kind(),
                    message: err.to_string(),
                };
                failures.push((record, err));
            }
        }
    }

    if let Some(pos) = failures.iter().position(|(f, _)| f.required) {
        return Err(failures.swap_remove(pos).1);
    }
    if extracted.is_empty() && !failures.is_empty() {
        return Err(failures.swap_remove(0).1);
    }
    Ok((extracted, failures.into_iter().map(|(f, _)| f).collect()))
}

/// Embed every chunk, batch by batch. Nothing is written here; an exhausted
/// batch fails the run with all vectors discarded.
async fn embed_all(
    components: &IngestionComponents,
    chunks: &[Chunk],
    control: &RunControl,
    progress: &dyn ProgressReporter,
) -> Result<Vec<Vec<VectorRecord>>> {
    let model = &components.embedding_model;
    let batch_size = model.batch_size().max(1);
    let total = chunks.len().div_ceil(batch_size);
    let mut batches = Vec::with_capacity(total);

    for (i, batch) in chunks.chunks(batch_size).enumerate() {
        control.check()?;
        let texts: Vec<String> = batch.iter().map(Chunk::embedding_text).collect();
        let vectors = model.embed_batch(&texts).await.map_err(|e| match e {
            RagKbError::EmbeddingRequest(_) | RagKbError::Cancelled => e,
            other => RagKbError::EmbeddingRequest(format!("{}: {other}", model.name())),
        })?;
        if vectors.len() != batch.len() {
            return Err(RagKbError::EmbeddingRequest(format!(
                "{}: {} vectors for {} inputs",
                model.name(),
                vectors.len(),
                batch.len()
            )));
        }
        batches.push(
            batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, vector)| VectorRecord { chunk, vector })
                .collect(),
        );
        progress.batch_embedded(i + 1, total);
    }
    Ok(batches)
}

/// Create the collection and write batches whole. A cancel between batches
/// leaves the written batches in place.
async fn load_all(
    components: &IngestionComponents,
    batches: &[Vec<VectorRecord>],
    control: &RunControl,
    progress: &dyn ProgressReporter,
) -> Result<usize> {
    let store = &components.vector_store;
    let Some(dimension) = batches.first().and_then(|b| b.first()).map(|r| r.vector.len()) else {
        warn!(collection = store.collection_name(), "no chunks to load, collection not created");
        return Ok(0);
    };

    control.check()?;
    store.create_collection(dimension).await?;

    let mut written = 0;
    for (i, batch) in batches.iter().enumerate() {
        control.check()?;
        store.upsert(batch).await?;
        written += batch.len();
        progress.batch_written(i + 1, batches.len());
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragkb_datasources::{BasicCleaner, DatasourceManager, DocumentReader};
    use ragkb_markdown::{MarkdownSplitter, RegexTokenizer};
    use ragkb_providers::EmbeddingModel;
    use ragkb_shared::ScoredChunk;
    use ragkb_storage::VectorStore;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    use crate::validators;

    // --- fakes ---

    struct FixedReader(Vec<Document>);

    #[async_trait]
    impl DocumentReader for FixedReader {
        async fn read_all(&self) -> Result<Vec<Document>> {
            Ok(self.0.clone())
        }
    }

    struct DownReader;

    #[async_trait]
    impl DocumentReader for DownReader {
        async fn read_all(&self) -> Result<Vec<Document>> {
            Err(RagKbError::from_status(503, "maintenance", None))
        }
    }

    struct CountingEmbedding {
        calls: AtomicUsize,
        fail: bool,
        batch_size: usize,
    }

    impl CountingEmbedding {
        fn new(batch_size: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
                batch_size,
            }
        }
    }

    #[async_trait]
    impl EmbeddingModel for CountingEmbedding {
        fn name(&self) -> &str {
            "counting"
        }
        fn batch_size(&self) -> usize {
            self.batch_size
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RagKbError::EmbeddingRequest("counting: quota exhausted".into()));
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0, 0.0]).collect())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        exists: AtomicBool,
        creates: AtomicUsize,
        writes: AtomicUsize,
        records: Mutex<Vec<VectorRecord>>,
        /// Cancel this control after the first write.
        cancel_after_write: Option<Arc<RunControl>>,
    }

    #[async_trait]
    impl VectorStore for MemoryStore {
        fn collection_name(&self) -> &str {
            "kb"
        }
        async fn collection_exists(&self) -> Result<bool> {
            Ok(self.exists.load(Ordering::SeqCst))
        }
        async fn create_collection(&self, _dimension: usize) -> Result<()> {
            if self.exists.swap(true, Ordering::SeqCst) {
                return Err(RagKbError::ResourceAlreadyExists {
                    resource: "collection 'kb'".into(),
                });
            }
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.records.lock().unwrap().extend_from_slice(records);
            if let Some(control) = &self.cancel_after_write {
                control.cancel();
            }
            Ok(())
        }
        async fn query(&self, _vector: &[f32], _top_k: usize) -> Result<Vec<ScoredChunk>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        phases: Mutex<Vec<RunState>>,
        done: AtomicBool,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, state: RunState) {
            self.phases.lock().unwrap().push(state);
        }
        fn source_done(&self, _source: &str, _result: std::result::Result<usize, &RagKbError>) {}
        fn batch_embedded(&self, _current: usize, _total: usize) {}
        fn batch_written(&self, _current: usize, _total: usize) {}
        fn done(&self, _report: &IngestionReport) {
            self.done.store(true, Ordering::SeqCst);
        }
    }

    fn docs(source: &str, n: usize) -> Vec<Document> {
        (0..n)
            .map(|i| {
                Document::new(
                    source,
                    i,
                    format!("{source} {i}"),
                    format!("# {source} page {i}\n\nSome body text for page {i}."),
                )
            })
            .collect()
    }

    fn source(name: &str, required: bool, reader: impl DocumentReader + 'static) -> DatasourceManager {
        DatasourceManager::new(name, required, Box::new(reader), Box::new(BasicCleaner))
    }

    fn components(
        datasources: Vec<DatasourceManager>,
        embedding: Arc<CountingEmbedding>,
        store: Arc<MemoryStore>,
    ) -> IngestionComponents {
        IngestionComponents {
            splitter: Arc::new(MarkdownSplitter::new(Arc::new(RegexTokenizer), 64, 8).unwrap()),
            embedding_model: embedding,
            vector_store: store,
            datasources,
            validators: vec![validators::collection_absent],
            bind_order: Vec::new(),
        }
    }

    // --- tests ---

    #[tokio::test]
    async fn completes_and_writes_every_chunk() {
        let embedding = Arc::new(CountingEmbedding::new(2));
        let store = Arc::new(MemoryStore::default());
        let c = components(
            vec![source("pdf", false, FixedReader(docs("pdf", 5)))],
            embedding.clone(),
            store.clone(),
        );

        let report = run_ingestion(&c, &RunControl::new(), &SilentProgress).await.unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.documents, 5);
        assert_eq!(report.chunks, 5);
        assert_eq!(report.vectors_written, 5);
        assert_eq!(embedding.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.creates.load(Ordering::SeqCst), 1);
        assert_eq!(store.writes.load(Ordering::SeqCst), 3);

        let records = store.records.lock().unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.chunk.document_id.as_str()).collect();
        assert_eq!(ids, vec!["pdf:0", "pdf:1", "pdf:2", "pdf:3", "pdf:4"]);
    }

    #[tokio::test]
    async fn rerun_against_existing_collection_is_skipped() {
        let embedding = Arc::new(CountingEmbedding::new(8));
        let store = Arc::new(MemoryStore::default());
        let c = components(
            vec![source("pdf", false, FixedReader(docs("pdf", 3)))],
            embedding.clone(),
            store.clone(),
        );

        run_ingestion(&c, &RunControl::new(), &SilentProgress).await.unwrap();
        let writes = store.writes.load(Ordering::SeqCst);
        let embeds = embedding.calls.load(Ordering::SeqCst);

        let report = run_ingestion(&c, &RunControl::new(), &SilentProgress).await.unwrap();
        assert_eq!(report.state, RunState::Skipped);
        assert_eq!(report.vectors_written, 0);
        assert_eq!(store.writes.load(Ordering::SeqCst), writes);
        assert_eq!(embedding.calls.load(Ordering::SeqCst), embeds);
    }

    #[tokio::test]
    async fn failing_source_is_isolated() {
        let embedding = Arc::new(CountingEmbedding::new(8));
        let store = Arc::new(MemoryStore::default());
        let c = components(
            vec![
                source("confluence", false, DownReader),
                source("hackernews", false, FixedReader(docs("hackernews", 2))),
            ],
            embedding,
            store.clone(),
        );

        let report = run_ingestion(&c, &RunControl::new(), &SilentProgress).await.unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.vectors_written, 2);
        assert_eq!(report.failed_sources.len(), 1);
        let failed = &report.failed_sources[0];
        assert_eq!(failed.name, "confluence");
        assert_eq!(failed.kind, "SourceUnavailableError");
        assert!(store
            .records
            .lock()
            .unwrap()
            .iter()
            .all(|r| r.chunk.document_id.starts_with("hackernews:")));
    }

    #[tokio::test]
    async fn required_source_failure_fails_the_run() {
        let store = Arc::new(MemoryStore::default());
        let c = components(
            vec![
                source("hackernews", false, FixedReader(docs("hackernews", 2))),
                source("notion", true, DownReader),
            ],
            Arc::new(CountingEmbedding::new(8)),
            store.clone(),
        );

        let err = run_ingestion(&c, &RunControl::new(), &SilentProgress).await.unwrap_err();
        assert_eq!(err.kind(), "SourceUnavailableError");
        assert!(err.to_string().contains("notion"));
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reports_every_phase_of_a_completed_run() {
        let c = components(
            vec![source("pdf", false, FixedReader(docs("pdf", 2)))],
            Arc::new(CountingEmbedding::new(8)),
            Arc::new(MemoryStore::default()),
        );
        let progress = RecordingProgress::default();

        run_ingestion(&c, &RunControl::new(), &progress).await.unwrap();

        assert_eq!(
            *progress.phases.lock().unwrap(),
            vec![
                RunState::Validating,
                RunState::Extracting,
                RunState::Cleaning,
                RunState::Splitting,
                RunState::Embedding,
                RunState::Loading,
                RunState::Completed,
            ]
        );
        assert!(progress.done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_run_reports_failed_state() {
        let c = components(
            vec![source("notion", true, DownReader)],
            Arc::new(CountingEmbedding::new(8)),
            Arc::new(MemoryStore::default()),
        );
        let progress = RecordingProgress::default();

        run_ingestion(&c, &RunControl::new(), &progress).await.unwrap_err();

        let phases = progress.phases.lock().unwrap();
        assert_eq!(phases.last(), Some(&RunState::Failed));
        assert!(!phases.contains(&RunState::Completed));
        assert!(!progress.done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn all_sources_failing_fails_the_run() {
        let c = components(
            vec![source("confluence", false, DownReader)],
            Arc::new(CountingEmbedding::new(8)),
            Arc::new(MemoryStore::default()),
        );
        let err = run_ingestion(&c, &RunControl::new(), &SilentProgress).await.unwrap_err();
        assert_eq!(err.kind(), "SourceUnavailableError");
    }

    #[tokio::test]
    async fn embedding_failure_writes_nothing() {
        let embedding = Arc::new(CountingEmbedding {
            fail: true,
            ..CountingEmbedding::new(2)
        });
        let store = Arc::new(MemoryStore::default());
        let c = components(
            vec![source("pdf", false, FixedReader(docs("pdf", 4)))],
            embedding,
            store.clone(),
        );

        let err = run_ingestion(&c, &RunControl::new(), &SilentProgress).await.unwrap_err();
        assert_eq!(err.kind(), "EmbeddingRequestError");
        assert_eq!(store.creates.load(Ordering::SeqCst), 0);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_stops_between_whole_batches() {
        let control = Arc::new(RunControl::new());
        let store = Arc::new(MemoryStore {
            cancel_after_write: Some(control.clone()),
            ..MemoryStore::default()
        });
        let c = components(
            vec![source("pdf", false, FixedReader(docs("pdf", 6)))],
            Arc::new(CountingEmbedding::new(2)),
            store.clone(),
        );

        let err = run_ingestion(&c, &control, &SilentProgress).await.unwrap_err();
        assert_eq!(err.kind(), "CancelledError");
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
        assert_eq!(store.records.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn nothing_to_load_leaves_collection_absent() {
        let store = Arc::new(MemoryStore::default());
        let c = components(
            vec![source("pdf", false, FixedReader(vec![Document::new("pdf", "a", "a", "   ")]))],
            Arc::new(CountingEmbedding::new(2)),
            store.clone(),
        );

        let report = run_ingestion(&c, &RunControl::new(), &SilentProgress).await.unwrap();
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.documents, 1);
        assert_eq!(report.cleaned_documents, 0);
        assert_eq!(report.vectors_written, 0);
        assert!(!store.exists.load(Ordering::SeqCst));
    }
}
