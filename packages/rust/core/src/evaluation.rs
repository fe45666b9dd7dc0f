//! Evaluation trigger: answer a dataset of questions and write the records
//! an external scorer consumes. Metrics are computed elsewhere.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use ragkb_shared::{RagKbError, Result};

use crate::binder::EvaluationComponents;
use crate::pipeline::RunControl;

/// One dataset line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EvaluationSample {
    pub question: String,
    #[serde(default)]
    pub ground_truth: Option<String>,
}

/// One output line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub question: String,
    pub answer: String,
    pub contexts: Vec<String>,
    pub ground_truth: Option<String>,
    pub judge_llm: String,
    pub judge_embedding_model: String,
}

#[derive(Debug, Clone)]
pub struct EvaluationSummary {
    pub samples: usize,
    pub written: usize,
    /// Questions whose query failed; they are logged and left out.
    pub failed: usize,
    pub output: PathBuf,
    pub elapsed: std::time::Duration,
}

/// Read a JSONL dataset. Blank lines are skipped; a malformed line fails
/// with its line number.
pub fn read_dataset(path: &Path) -> Result<Vec<EvaluationSample>> {
    let file = File::open(path).map_err(|e| RagKbError::io(path, e))?;
    let mut samples = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| RagKbError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let sample: EvaluationSample = serde_json::from_str(&line)
            .map_err(|e| RagKbError::parse(format!("{}:{}: {e}", path.display(), i + 1)))?;
        samples.push(sample);
    }
    Ok(samples)
}

/// Answer every sample with the bound query engine and write one record per
/// answered question to `output`.
#[instrument(skip_all, fields(samples = samples.len(), output = %output.display()))]
pub async fn run_evaluation(
    components: &EvaluationComponents,
    samples: &[EvaluationSample],
    output: &Path,
    control: &RunControl,
) -> Result<EvaluationSummary> {
    let start = Instant::now();
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| RagKbError::io(parent, e))?;
    }
    let file = File::create(output).map_err(|e| RagKbError::io(output, e))?;
    let mut writer = BufWriter::new(file);

    let judge_llm = components.judge_llm.name().to_string();
    let judge_embedding_model = components.judge_embedding_model.name().to_string();
    let mut written = 0;
    let mut failed = 0;

    for sample in samples {
        if control.is_cancelled() {
            return Err(RagKbError::Cancelled);
        }
        let response = match components.query_engine.query(&sample.question).await {
            Ok(response) => response,
            Err(e) => {
                warn!(question = %sample.question, error = %e, "query failed");
                failed += 1;
                continue;
            }
        };
        let record = EvaluationRecord {
            question: sample.question.clone(),
            answer: response.answer,
            contexts: response.sources.into_iter().map(|s| s.text).collect(),
            ground_truth: sample.ground_truth.clone(),
            judge_llm: judge_llm.clone(),
            judge_embedding_model: judge_embedding_model.clone(),
        };
        serde_json::to_writer(&mut writer, &record)
            .map_err(|e| RagKbError::parse(format!("encode evaluation record: {e}")))?;
        writer.write_all(b"\n").map_err(|e| RagKbError::io(output, e))?;
        written += 1;
    }
    writer.flush().map_err(|e| RagKbError::io(output, e))?;

    let summary = EvaluationSummary {
        samples: samples.len(),
        written,
        failed,
        output: output.to_path_buf(),
        elapsed: start.elapsed(),
    };
    info!(written, failed, "evaluation records written");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_engine::tests::{CannedStore, ScriptedLlm, UnitEmbedding, hit};
    use crate::query_engine::{QueryEngine, Retriever, TreeSynthesizer};
    use ragkb_shared::config::RetrieverKind;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("ragkb-eval-{}", Uuid::now_v7()))
            .join(name)
    }

    fn components() -> EvaluationComponents {
        let llm = Arc::new(ScriptedLlm::default());
        let embedding = Arc::new(UnitEmbedding {
            queries: Mutex::new(Vec::new()),
        });
        let store = Arc::new(CannedStore {
            hits: vec![hit("Deploys run nightly.", None)],
            queries: AtomicUsize::new(0),
        });
        EvaluationComponents {
            query_engine: QueryEngine::new(
                Retriever::new(RetrieverKind::Basic, 2, embedding.clone(), store, llm.clone()),
                TreeSynthesizer::new(llm.clone()),
            ),
            judge_llm: llm,
            judge_embedding_model: embedding,
            bind_order: Vec::new(),
        }
    }

    #[test]
    fn dataset_skips_blank_lines_and_reports_bad_ones() {
        let path = temp_path("dataset.jsonl");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "{\"question\": \"When do deploys run?\", \"ground_truth\": \"Nightly\"}\n\n{\"question\": \"Who owns billing?\"}\n",
        )
        .unwrap();
        let samples = read_dataset(&path).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].ground_truth.as_deref(), Some("Nightly"));
        assert_eq!(samples[1].ground_truth, None);

        std::fs::write(&path, "{\"question\": \"ok\"}\nnot json\n").unwrap();
        let err = read_dataset(&path).unwrap_err();
        assert_eq!(err.kind(), "ParseError");
        assert!(err.to_string().contains(":2:"));
    }

    #[tokio::test]
    async fn writes_one_record_per_question() {
        let output = temp_path("out/records.jsonl");
        let samples = vec![
            EvaluationSample {
                question: "When do deploys run?".into(),
                ground_truth: Some("Nightly".into()),
            },
            EvaluationSample {
                question: "Who owns billing?".into(),
                ground_truth: None,
            },
        ];

        let summary = run_evaluation(&components(), &samples, &output, &RunControl::new())
            .await
            .unwrap();
        assert_eq!(summary.written, 2);
        assert_eq!(summary.failed, 0);

        let text = std::fs::read_to_string(&output).unwrap();
        let records: Vec<EvaluationRecord> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].contexts, vec!["Deploys run nightly.".to_string()]);
        assert_eq!(records[0].ground_truth.as_deref(), Some("Nightly"));
        assert_eq!(records[0].judge_llm, "scripted");
        assert_eq!(records[0].judge_embedding_model, "unit");
        assert!(records[1].answer.starts_with("answer-"));
    }
}
