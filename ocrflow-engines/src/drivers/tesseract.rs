//! ABOUTME: Tesseract driver wrapping the tesseract executable
//! ABOUTME: Parses TSV output into text, per-word confidences, and page counts

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

use ocrflow_config::{EngineConfig, RetryPolicy};
use ocrflow_core::{
    AnalyzeFeature, EngineHealth, EngineKind, OcrEngine, OcrFlowError, OcrResult, Result,
};

use crate::preprocess::{preprocess, PreprocessedDocument};

const DEFAULT_BINARY: &str = "tesseract";
const DEFAULT_LANGUAGES: &str = "eng";

/// One word row from tesseract's TSV output.
#[derive(Debug, Clone, serde::Serialize)]
struct TsvWord {
    page: u32,
    block: u32,
    paragraph: u32,
    line: u32,
    word: u32,
    confidence: f64,
    text: String,
}

/// Tesseract OCR driver. Local engine with mutable state; the registry
/// recreates it for every invocation.
///
/// Required configuration: the `tesseract` executable on PATH (or a
/// `binary` param).
pub struct TesseractEngine {
    config: EngineConfig,
    binary: String,
    languages: String,
    psm: Option<u64>,
}

impl TesseractEngine {
    pub fn new(config: EngineConfig, _retry_policy: RetryPolicy) -> Self {
        let binary = config
            .param_str("binary")
            .unwrap_or(DEFAULT_BINARY)
            .to_string();
        let languages = config
            .param_str("languages")
            .unwrap_or(DEFAULT_LANGUAGES)
            .to_string();
        let psm = config.param_u64("psm");
        Self {
            config,
            binary,
            languages,
            psm,
        }
    }

    async fn run_tsv(&self, input: &Path) -> Result<Vec<TsvWord>> {
        let mut command = Command::new(&self.binary);
        command
            .arg(input)
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages);
        if let Some(psm) = self.psm {
            command.arg("--psm").arg(psm.to_string());
        }
        command.arg("tsv");
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        command.kill_on_drop(true);

        let output = tokio::time::timeout(self.config.timeout(), command.output())
            .await
            .map_err(|_| {
                OcrFlowError::transient(
                    format!("tesseract timed out after {:?}", self.config.timeout()),
                    "tesseract",
                )
            })?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    OcrFlowError::configuration(format!(
                        "tesseract binary '{}' not found on PATH",
                        self.binary
                    ))
                } else {
                    OcrFlowError::transient("failed to spawn tesseract", "tesseract").with_source(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let snippet: String = stderr.chars().take(300).collect();
            return Err(OcrFlowError::permanent(
                format!("tesseract exited with {}: {snippet}", output.status),
                "tesseract",
            ));
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }

    fn to_canonical(&self, words: Vec<TsvWord>, elapsed: std::time::Duration) -> OcrResult {
        let text = reconstruct_text(&words);
        let confidences: Vec<f64> = words
            .iter()
            .filter(|w| w.confidence >= 0.0)
            .map(|w| w.confidence)
            .collect();
        // TSV confidences are percentages; the mean normalizes in
        // OcrResult construction.
        let confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };
        let page_count = words.iter().map(|w| w.page).max().unwrap_or(1).max(1) as u64;

        let raw = serde_json::json!({
            "engine": "tesseract",
            "languages": self.languages,
            "words": words,
        });

        OcrResult::new(
            EngineKind::Tesseract,
            self.config.display_name.clone(),
            text,
            confidence,
            page_count,
            elapsed,
        )
        .with_raw_response(raw)
    }
}

/// Parse tesseract TSV output, keeping word-level rows (level 5).
fn parse_tsv(tsv: &str) -> Vec<TsvWord> {
    let mut words = Vec::new();
    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }
        let level: u32 = fields[0].parse().unwrap_or(0);
        if level != 5 {
            continue;
        }
        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }
        words.push(TsvWord {
            page: fields[1].parse().unwrap_or(1),
            block: fields[2].parse().unwrap_or(0),
            paragraph: fields[3].parse().unwrap_or(0),
            line: fields[4].parse().unwrap_or(0),
            word: fields[5].parse().unwrap_or(0),
            confidence: fields[10].parse().unwrap_or(-1.0),
            text: text.to_string(),
        });
    }
    words
}

/// Rebuild running text from word rows: words joined by spaces, lines by
/// newlines, pages by blank lines.
fn reconstruct_text(words: &[TsvWord]) -> String {
    let mut out = String::new();
    let mut current_line: Option<(u32, u32, u32, u32)> = None;
    let mut current_page: Option<u32> = None;

    for word in words {
        let line_key = (word.page, word.block, word.paragraph, word.line);
        match (current_page, current_line) {
            (None, _) => {}
            (Some(page), _) if page != word.page => {
                out.push_str("\n\n");
            }
            (_, Some(key)) if key != line_key => {
                out.push('\n');
            }
            _ => {
                out.push(' ');
            }
        }
        out.push_str(&word.text);
        current_line = Some(line_key);
        current_page = Some(word.page);
    }
    out
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Tesseract
    }

    fn name(&self) -> &str {
        &self.config.display_name
    }

    fn supported_features(&self) -> &[AnalyzeFeature] {
        &[]
    }

    async fn analyze(
        &self,
        document_path: &Path,
        _features: &[AnalyzeFeature],
    ) -> Result<OcrResult> {
        let started = Instant::now();

        let prepared = if self.config.preprocess_enabled {
            preprocess(document_path, &self.config.preprocess).await?
        } else {
            PreprocessedDocument::passthrough_for(document_path)
        };

        debug!(input = %prepared.path().display(), "running tesseract");
        let words = self.run_tsv(prepared.path()).await?;
        Ok(self.to_canonical(words, started.elapsed()))
    }

    async fn health_check(&self) -> EngineHealth {
        let output = Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let version = stdout.lines().next().unwrap_or("unknown").to_string();
                EngineHealth::healthy().with_detail("version", version)
            }
            Ok(output) => EngineHealth::unhealthy(format!(
                "tesseract --version exited with {}",
                output.status
            )),
            Err(_) => EngineHealth::unhealthy(format!(
                "tesseract binary '{}' not found on PATH",
                self.binary
            )),
        }
    }

    fn estimate_cost(&self, _page_count: u64) -> Option<f64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SAMPLE_TSV: &str = "\
level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t100\t100\t-1\t
5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t96.5\tHello
5\t1\t1\t1\t1\t2\t12\t0\t10\t10\t91.0\tworld
5\t1\t1\t1\t2\t1\t0\t12\t10\t10\t88.0\tsecond
5\t2\t1\t1\t1\t1\t0\t0\t10\t10\t80.0\tpage
";

    fn driver() -> TesseractEngine {
        TesseractEngine::new(
            EngineConfig::new(EngineKind::Tesseract, "Tesseract OCR"),
            RetryPolicy::default(),
        )
    }

    #[test]
    fn test_tsv_parsing_keeps_word_rows() {
        let words = parse_tsv(SAMPLE_TSV);
        assert_eq!(words.len(), 4);
        assert_eq!(words[0].text, "Hello");
        assert_eq!(words[0].confidence, 96.5);
        assert_eq!(words[3].page, 2);
    }

    #[test]
    fn test_text_reconstruction() {
        let words = parse_tsv(SAMPLE_TSV);
        assert_eq!(reconstruct_text(&words), "Hello world\nsecond\n\npage");
    }

    #[test]
    fn test_canonical_mapping_normalizes_percent() {
        let words = parse_tsv(SAMPLE_TSV);
        let result = driver().to_canonical(words, Duration::from_millis(300));
        assert_eq!(result.word_count, 4);
        assert_eq!(result.page_count, 2);
        // (96.5 + 91 + 88 + 80) / 4 = 88.875% -> 0.88875.
        assert!((result.confidence - 0.88875).abs() < 1e-9);
        assert_eq!(result.table_count, 0);
        assert!(result.raw_response["words"].as_array().unwrap().len() == 4);
    }

    #[test]
    fn test_empty_tsv() {
        let result = driver().to_canonical(Vec::new(), Duration::from_millis(5));
        assert_eq!(result.word_count, 0);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.page_count, 1);
    }
}
