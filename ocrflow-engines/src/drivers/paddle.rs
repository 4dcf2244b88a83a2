//! ABOUTME: PaddleOCR driver wrapping the paddleocr command-line interface
//! ABOUTME: Parses per-region JSON lines of [box, [text, confidence]] pairs

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

const DEFAULT_BINARY: &str = "paddleocr";
const DEFAULT_LANGUAGE: &str = "en";

/// One recognized text region.
#[derive(Debug, Clone, serde::Serialize)]
struct PaddleRegion {
    text: String,
    confidence: f64,
}

/// PaddleOCR driver. Local engine with mutable model state; the registry
/// recreates it for every invocation.
///
/// Required configuration: the `paddleocr` executable on PATH (or a
/// `binary` param). A `use_gpu` param toggles GPU inference.
pub struct PaddleOcrEngine {
    config: EngineConfig,
    binary: String,
    language: String,
    use_gpu: bool,
}

impl PaddleOcrEngine {
    pub fn new(config: EngineConfig, _retry_policy: RetryPolicy) -> Self {
        let binary = config
            .param_str("binary")
            .unwrap_or(DEFAULT_BINARY)
            .to_string();
        let language = config
            .param_str("language")
            .unwrap_or(DEFAULT_LANGUAGE)
            .to_string();
        let use_gpu = config.param_bool("use_gpu").unwrap_or(false);
        Self {
            config,
            binary,
            language,
            use_gpu,
        }
    }

    async fn run_ocr(&self, input: &Path) -> Result<Vec<PaddleRegion>> {
        let mut command = Command::new(&self.binary);
        command
            .arg("ocr")
            .arg("-i")
            .arg(input)
            .arg("--lang")
            .arg(&self.language)
            .arg("--use_gpu")
            .arg(if self.use_gpu { "true" } else { "false" });
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        command.kill_on_drop(true);

        let output = tokio::time::timeout(self.config.timeout(), command.output())
            .await
            .map_err(|_| {
                OcrFlowError::transient(
                    format!("paddleocr timed out after {:?}", self.config.timeout()),
                    "paddle",
                )
            })?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    OcrFlowError::configuration(format!(
                        "paddleocr binary '{}' not found on PATH",
                        self.binary
                    ))
                } else {
                    OcrFlowError::transient("failed to spawn paddleocr", "paddle").with_source(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let snippet: String = stderr.chars().take(300).collect();
            return Err(OcrFlowError::permanent(
                format!("paddleocr exited with {}: {snippet}", output.status),
                "paddle",
            ));
        }

        Ok(parse_regions(&String::from_utf8_lossy(&output.stdout)))
    }

    fn to_canonical(&self, regions: Vec<PaddleRegion>, elapsed: std::time::Duration) -> OcrResult {
        let text = regions
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let confidence = if regions.is_empty() {
            0.0
        } else {
            regions.iter().map(|r| r.confidence).sum::<f64>() / regions.len() as f64
        };
        let raw = serde_json::json!({
            "engine": "paddleocr",
            "language": self.language,
            "regions": regions,
        });

        OcrResult::new(
            EngineKind::Paddle,
            self.config.display_name.clone(),
            text,
            confidence,
            1,
            elapsed,
        )
        .with_raw_response(raw)
    }
}

/// Parse the CLI's per-region output: each JSON line is
/// `[[x1,y1],[x2,y2],[x3,y3],[x4,y4]], ["text", confidence]]`.
/// Non-JSON diagnostics lines are skipped.
fn parse_regions(stdout: &str) -> Vec<PaddleRegion> {
    let mut regions = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if !line.starts_with('[') {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        let Some(entry) = value.as_array() else {
            continue;
        };
        // The recognition tuple is the last element.
        let Some(recognition) = entry.last().and_then(|r| r.as_array()) else {
            continue;
        };
        let Some(text) = recognition.first().and_then(|t| t.as_str()) else {
            continue;
        };
        if text.is_empty() {
            continue;
        }
        let confidence = recognition
            .get(1)
            .and_then(|c| c.as_f64())
            .unwrap_or(0.0);
        regions.push(PaddleRegion {
            text: text.to_string(),
            confidence,
        });
    }
    regions
}

#[async_trait]
impl OcrEngine for PaddleOcrEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Paddle
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

        debug!(input = %prepared.path().display(), gpu = self.use_gpu, "running paddleocr");
        let regions = self.run_ocr(prepared.path()).await?;
        Ok(self.to_canonical(regions, started.elapsed()))
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
                EngineHealth::healthy()
                    .with_detail("version", version)
                    .with_detail("gpu", self.use_gpu.to_string())
            }
            Ok(output) => EngineHealth::unhealthy(format!(
                "paddleocr --version exited with {}",
                output.status
            )),
            Err(_) => EngineHealth::unhealthy(format!(
                "paddleocr binary '{}' not found on PATH",
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

    fn driver() -> PaddleOcrEngine {
        PaddleOcrEngine::new(
            EngineConfig::new(EngineKind::Paddle, "PaddleOCR"),
            RetryPolicy::default(),
        )
    }

    #[test]
    fn test_region_parsing_skips_noise() {
        let stdout = r#"
[2024/01/01 00:00:00] ppocr INFO: loading model
[[[10,10],[100,10],[100,30],[10,30]], ["Invoice 42", 0.97]]
[[[10,40],[100,40],[100,60],[10,60]], ["Total 10.00", 0.91]]
not json at all
"#;
        let regions = parse_regions(stdout);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].text, "Invoice 42");
        assert_eq!(regions[1].confidence, 0.91);
    }

    #[test]
    fn test_canonical_mapping() {
        let regions = vec![
            PaddleRegion {
                text: "Invoice 42".into(),
                confidence: 0.97,
            },
            PaddleRegion {
                text: "Total 10.00".into(),
                confidence: 0.91,
            },
        ];
        let result = driver().to_canonical(regions, Duration::from_millis(450));
        assert_eq!(result.word_count, 4);
        assert_eq!(result.page_count, 1);
        assert!((result.confidence - 0.94).abs() < 1e-9);
        assert!(result.text.contains("Invoice 42"));
    }

    #[test]
    fn test_empty_output() {
        let result = driver().to_canonical(Vec::new(), Duration::ZERO);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.word_count, 0);
    }
}
