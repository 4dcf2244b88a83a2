//! ABOUTME: Durable run store over SQLite plus blob persistence of raw provider responses
//! ABOUTME: Commit order is row (null pointer), then blob, then pointer update

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use ocrflow_core::{
    BlobStorage, Document, EngineKind, OcrFlowError, OcrResult, Result, Run, RunStatus,
};

/// Summary metrics written onto a run row at completion.
#[derive(Debug, Clone, Default)]
pub struct RunMetrics {
    pub latency_ms: i64,
    pub confidence_mean: Option<f64>,
    pub pages_parsed: Option<i64>,
    pub word_count: Option<i64>,
    pub table_count: Option<i64>,
    pub cost_cents: Option<f64>,
}

impl RunMetrics {
    /// Derive run metrics from a canonical OCR result.
    #[must_use]
    pub fn from_result(result: &OcrResult, cost_cents: Option<f64>) -> Self {
        Self {
            latency_ms: result.processing_time.as_millis() as i64,
            confidence_mean: Some(result.confidence),
            pages_parsed: Some(result.page_count as i64),
            word_count: Some(result.word_count as i64),
            table_count: Some(result.table_count as i64),
            cost_cents,
        }
    }
}

/// Persists runs and their metrics; writes raw provider JSON to the blob
/// store. All row mutations are transactional; a run never references a
/// missing blob because the pointer is written only after the blob.
pub struct RunStore {
    pool: SqlitePool,
    blobs: Arc<dyn BlobStorage>,
}

impl RunStore {
    /// Connect to the metadata store and initialize the schema.
    pub async fn connect(database_url: &str, blobs: Arc<dyn BlobStorage>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| {
                OcrFlowError::storage(format!("cannot open metadata store {database_url}"))
                    .with_source(e)
            })?;
        let store = Self::new(pool, blobs);
        store.init_schema().await?;
        Ok(store)
    }

    /// Wrap an existing pool (tests use a single-connection in-memory pool).
    #[must_use]
    pub fn new(pool: SqlitePool, blobs: Arc<dyn BlobStorage>) -> Self {
        Self { pool, blobs }
    }

    /// Create tables if they do not exist.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                storage_path TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                page_count INTEGER,
                extracted_text TEXT,
                selected_engine TEXT,
                selected_run_id INTEGER,
                last_ocr_at TEXT,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err("create documents table"))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS ocr_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL REFERENCES documents(id),
                engine_kind TEXT NOT NULL,
                engine_config_snapshot TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                latency_ms INTEGER,
                confidence_mean REAL,
                pages_parsed INTEGER,
                word_count INTEGER,
                table_count INTEGER,
                cost_cents REAL,
                error_message TEXT,
                raw_response_path TEXT,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err("create ocr_runs table"))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_ocr_runs_document ON ocr_runs(document_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err("create run index"))?;

        Ok(())
    }

    /// Deterministic blob key for a run's raw response.
    #[must_use]
    pub fn raw_response_key(engine: EngineKind, run_id: i64) -> String {
        format!("ocr-runs/{engine}/{run_id}/raw_response.json")
    }

    // ---- documents ----

    /// Insert a document record (used by ingestion collaborators and tests).
    pub async fn insert_document(
        &self,
        storage_path: &str,
        mime_type: &str,
        page_count: Option<i64>,
    ) -> Result<Document> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO documents (storage_path, mime_type, page_count, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(storage_path)
        .bind(mime_type)
        .bind(page_count)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(storage_err("insert document"))?
        .last_insert_rowid();

        self.get_document(id).await
    }

    pub async fn get_document(&self, document_id: i64) -> Result<Document> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err("load document"))?
            .ok_or_else(|| {
                OcrFlowError::storage(format!("document {document_id} not found"))
            })?;
        document_from_row(&row)
    }

    /// Record a page count learned during processing. Never overwrites a
    /// known count with null.
    pub async fn update_document_page_count(
        &self,
        document_id: i64,
        page_count: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE documents SET page_count = ? WHERE id = ? AND page_count IS NULL")
            .bind(page_count)
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err("update document page count"))?;
        Ok(())
    }

    /// Write the winning-run fields on the document in a single
    /// transaction: all-updated or all-unchanged.
    pub async fn update_document_selection(
        &self,
        document_id: i64,
        extracted_text: &str,
        selected_engine: EngineKind,
        selected_run_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage_err("begin document update"))?;
        let updated = sqlx::query(
            "UPDATE documents
             SET extracted_text = ?, selected_engine = ?, selected_run_id = ?, last_ocr_at = ?
             WHERE id = ?",
        )
        .bind(extracted_text)
        .bind(selected_engine.as_str())
        .bind(selected_run_id)
        .bind(at)
        .bind(document_id)
        .execute(&mut *tx)
        .await
        .map_err(storage_err("update document selection"))?
        .rows_affected();

        if updated == 0 {
            return Err(OcrFlowError::storage(format!(
                "document {document_id} not found for selection update"
            )));
        }
        tx.commit()
            .await
            .map_err(storage_err("commit document update"))?;
        info!(
            document_id,
            engine = %selected_engine,
            run_id = selected_run_id,
            "document updated with winning run"
        );
        Ok(())
    }

    // ---- runs ----

    /// Insert a pending run for a driver invocation that is about to start.
    pub async fn create_run(
        &self,
        document_id: i64,
        engine_kind: EngineKind,
        engine_config_snapshot: &serde_json::Value,
    ) -> Result<i64> {
        // Verify the document exists so orphan runs cannot be created.
        self.get_document(document_id).await?;

        let run_id = sqlx::query(
            "INSERT INTO ocr_runs (document_id, engine_kind, engine_config_snapshot, status, created_at)
             VALUES (?, ?, ?, 'pending', ?)",
        )
        .bind(document_id)
        .bind(engine_kind.as_str())
        .bind(engine_config_snapshot.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(storage_err("create run"))?
        .last_insert_rowid();

        debug!(run_id, document_id, engine = %engine_kind, "created run");
        Ok(run_id)
    }

    /// Transition a run to `running` and stamp `started_at`.
    pub async fn mark_running(&self, run_id: i64) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE ocr_runs SET status = 'running', started_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(Utc::now())
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err("mark run running"))?
        .rows_affected();

        if updated == 0 {
            return Err(OcrFlowError::storage(format!(
                "run {run_id} not found or not pending"
            )));
        }
        Ok(())
    }

    /// Finalize a successful run. The row is committed first with a null
    /// pointer, then the raw response is written to the blob store, then
    /// the pointer is added. Blob-write failure never fails the run.
    pub async fn complete_run(
        &self,
        run_id: i64,
        result: &OcrResult,
        metrics: &RunMetrics,
    ) -> Result<Run> {
        let updated = sqlx::query(
            "UPDATE ocr_runs
             SET status = 'completed', completed_at = ?, latency_ms = ?, confidence_mean = ?,
                 pages_parsed = ?, word_count = ?, table_count = ?, cost_cents = ?,
                 raw_response_path = NULL
             WHERE id = ? AND status IN ('pending', 'running')",
        )
        .bind(Utc::now())
        .bind(metrics.latency_ms)
        .bind(metrics.confidence_mean)
        .bind(metrics.pages_parsed)
        .bind(metrics.word_count)
        .bind(metrics.table_count)
        .bind(metrics.cost_cents)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err("complete run"))?
        .rows_affected();

        if updated == 0 {
            return Err(OcrFlowError::storage(format!(
                "run {run_id} not found or already terminal"
            )));
        }

        if !result.raw_response.is_null() {
            let key = Self::raw_response_key(result.engine_kind, run_id);
            let payload = serde_json::to_vec(&result.raw_response).map_err(|e| {
                OcrFlowError::storage("raw response not serializable").with_source(e)
            })?;
            match self.blobs.upload(&key, &payload, "application/json").await {
                Ok(()) => {
                    sqlx::query("UPDATE ocr_runs SET raw_response_path = ? WHERE id = ?")
                        .bind(&key)
                        .bind(run_id)
                        .execute(&self.pool)
                        .await
                        .map_err(storage_err("store raw response pointer"))?;
                }
                Err(e) => {
                    warn!(run_id, error = %e, "raw response blob write failed; run stays completed");
                }
            }
        }

        let run = self.get_run(run_id).await?;
        info!(
            run_id,
            engine = %run.engine_kind,
            confidence = ?run.confidence_mean,
            pages = ?run.pages_parsed,
            words = ?run.word_count,
            "completed run"
        );
        Ok(run)
    }

    /// Finalize a failed run with its error message.
    pub async fn fail_run(&self, run_id: i64, error_message: &str) -> Result<()> {
        self.finalize_with_status(run_id, RunStatus::Failed, error_message)
            .await
    }

    /// Finalize a cancelled run (timeout budget or task revocation).
    pub async fn cancel_run(&self, run_id: i64, error_message: &str) -> Result<()> {
        self.finalize_with_status(run_id, RunStatus::Cancelled, error_message)
            .await
    }

    async fn finalize_with_status(
        &self,
        run_id: i64,
        status: RunStatus,
        error_message: &str,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE ocr_runs SET status = ?, completed_at = ?, error_message = ?
             WHERE id = ? AND status IN ('pending', 'running')",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(error_message)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err("finalize run"))?
        .rows_affected();

        if updated == 0 {
            return Err(OcrFlowError::storage(format!(
                "run {run_id} not found or already terminal"
            )));
        }
        debug!(run_id, status = status.as_str(), "finalized run");
        Ok(())
    }

    pub async fn get_run(&self, run_id: i64) -> Result<Run> {
        let row = sqlx::query("SELECT * FROM ocr_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err("load run"))?
            .ok_or_else(|| OcrFlowError::storage(format!("run {run_id} not found")))?;
        run_from_row(&row)
    }

    /// All runs for a document, ordered by `started_at` ascending with
    /// never-started runs last.
    pub async fn runs_for_document(&self, document_id: i64) -> Result<Vec<Run>> {
        let rows = sqlx::query(
            "SELECT * FROM ocr_runs WHERE document_id = ?
             ORDER BY started_at IS NULL, started_at ASC, id ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("list document runs"))?;
        rows.iter().map(run_from_row).collect()
    }

    /// Most recent runs for a document, newest first.
    pub async fn recent_runs_for_document(&self, document_id: i64, limit: i64) -> Result<Vec<Run>> {
        let rows = sqlx::query(
            "SELECT * FROM ocr_runs WHERE document_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(document_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("list recent runs"))?;
        rows.iter().map(run_from_row).collect()
    }

    pub async fn runs_by_status(&self, status: RunStatus, limit: i64) -> Result<Vec<Run>> {
        let rows = sqlx::query(
            "SELECT * FROM ocr_runs WHERE status = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("list runs by status"))?;
        rows.iter().map(run_from_row).collect()
    }

    /// The blob store backing this run store.
    #[must_use]
    pub fn blobs(&self) -> Arc<dyn BlobStorage> {
        Arc::clone(&self.blobs)
    }
}

fn storage_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> OcrFlowError {
    move |e| OcrFlowError::storage(context).with_source(e)
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    Ok(Document {
        id: row.try_get("id").map_err(storage_err("document.id"))?,
        storage_path: row
            .try_get("storage_path")
            .map_err(storage_err("document.storage_path"))?,
        mime_type: row
            .try_get("mime_type")
            .map_err(storage_err("document.mime_type"))?,
        page_count: row
            .try_get("page_count")
            .map_err(storage_err("document.page_count"))?,
        extracted_text: row
            .try_get("extracted_text")
            .map_err(storage_err("document.extracted_text"))?,
        selected_engine: row
            .try_get("selected_engine")
            .map_err(storage_err("document.selected_engine"))?,
        selected_run_id: row
            .try_get("selected_run_id")
            .map_err(storage_err("document.selected_run_id"))?,
        last_ocr_at: row
            .try_get("last_ocr_at")
            .map_err(storage_err("document.last_ocr_at"))?,
        created_at: row
            .try_get("created_at")
            .map_err(storage_err("document.created_at"))?,
    })
}

fn run_from_row(row: &SqliteRow) -> Result<Run> {
    let engine_kind: String = row
        .try_get("engine_kind")
        .map_err(storage_err("run.engine_kind"))?;
    let status: String = row.try_get("status").map_err(storage_err("run.status"))?;
    let snapshot: String = row
        .try_get("engine_config_snapshot")
        .map_err(storage_err("run.engine_config_snapshot"))?;

    Ok(Run {
        id: row.try_get("id").map_err(storage_err("run.id"))?,
        document_id: row
            .try_get("document_id")
            .map_err(storage_err("run.document_id"))?,
        engine_kind: EngineKind::from_str(&engine_kind)?,
        engine_config_snapshot: serde_json::from_str(&snapshot)
            .unwrap_or(serde_json::Value::Null),
        status: RunStatus::from_str(&status)?,
        started_at: row
            .try_get("started_at")
            .map_err(storage_err("run.started_at"))?,
        completed_at: row
            .try_get("completed_at")
            .map_err(storage_err("run.completed_at"))?,
        latency_ms: row
            .try_get("latency_ms")
            .map_err(storage_err("run.latency_ms"))?,
        confidence_mean: row
            .try_get("confidence_mean")
            .map_err(storage_err("run.confidence_mean"))?,
        pages_parsed: row
            .try_get("pages_parsed")
            .map_err(storage_err("run.pages_parsed"))?,
        word_count: row
            .try_get("word_count")
            .map_err(storage_err("run.word_count"))?,
        table_count: row
            .try_get("table_count")
            .map_err(storage_err("run.table_count"))?,
        cost_cents: row
            .try_get("cost_cents")
            .map_err(storage_err("run.cost_cents"))?,
        error_message: row
            .try_get("error_message")
            .map_err(storage_err("run.error_message"))?,
        raw_response_path: row
            .try_get("raw_response_path")
            .map_err(storage_err("run.raw_response_path"))?,
        created_at: row
            .try_get("created_at")
            .map_err(storage_err("run.created_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{sha256_hex, MemoryBlobStorage};
    use std::time::Duration;

    async fn store_with_blobs() -> (RunStore, Arc<MemoryBlobStorage>) {
        let blobs = Arc::new(MemoryBlobStorage::new());
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = RunStore::new(pool, blobs.clone());
        store.init_schema().await.unwrap();
        (store, blobs)
    }

    fn sample_result() -> OcrResult {
        OcrResult::new(
            EngineKind::Azure,
            "Azure Document Intelligence",
            "hello world from azure".to_string(),
            0.92,
            3,
            Duration::from_millis(1500),
        )
        .with_raw_response(serde_json::json!({"analyzeResult": {"pages": [1, 2, 3]}}))
    }

    #[tokio::test]
    async fn test_run_lifecycle_and_blob_ordering() {
        let (store, blobs) = store_with_blobs().await;
        let document = store
            .insert_document("documents/1.png", "image/png", Some(3))
            .await
            .unwrap();

        let run_id = store
            .create_run(document.id, EngineKind::Azure, &serde_json::json!({"timeout": 300}))
            .await
            .unwrap();
        store.mark_running(run_id).await.unwrap();

        let result = sample_result();
        let metrics = RunMetrics::from_result(&result, Some(3.0));
        let run = store.complete_run(run_id, &result, &metrics).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.confidence_mean, Some(0.92));
        assert_eq!(run.pages_parsed, Some(3));
        assert_eq!(run.cost_cents, Some(3.0));

        // Blob integrity: the pointer references an existing blob whose
        // bytes hash to what the driver produced.
        let key = run.raw_response_path.clone().unwrap();
        assert_eq!(key, "ocr-runs/azure/1/raw_response.json");
        assert!(blobs.exists(&key).await.unwrap());
        let expected = serde_json::to_vec(&result.raw_response).unwrap();
        assert_eq!(
            blobs.content_hash(&key).await.unwrap(),
            sha256_hex(&expected)
        );
        assert_eq!(blobs.download(&key).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_blob_failure_never_fails_completion() {
        let (store, blobs) = store_with_blobs().await;
        let document = store
            .insert_document("documents/2.png", "image/png", None)
            .await
            .unwrap();
        let run_id = store
            .create_run(document.id, EngineKind::Google, &serde_json::Value::Null)
            .await
            .unwrap();
        store.mark_running(run_id).await.unwrap();

        blobs.fail_uploads(true);
        let result = sample_result();
        let run = store
            .complete_run(run_id, &result, &RunMetrics::from_result(&result, None))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.raw_response_path.is_none());
    }

    #[tokio::test]
    async fn test_run_totality_single_terminal_state() {
        let (store, _) = store_with_blobs().await;
        let document = store
            .insert_document("documents/3.png", "image/png", None)
            .await
            .unwrap();
        let run_id = store
            .create_run(document.id, EngineKind::Tesseract, &serde_json::Value::Null)
            .await
            .unwrap();
        store.mark_running(run_id).await.unwrap();
        store.fail_run(run_id, "engine exploded").await.unwrap();

        // A second finalization of any flavor is rejected.
        assert!(store.fail_run(run_id, "again").await.is_err());
        assert!(store.cancel_run(run_id, "late cancel").await.is_err());
        let result = sample_result();
        assert!(store
            .complete_run(run_id, &result, &RunMetrics::default())
            .await
            .is_err());

        let run = store.get_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("engine exploded"));
    }

    #[tokio::test]
    async fn test_runs_for_document_ordering() {
        let (store, _) = store_with_blobs().await;
        let document = store
            .insert_document("documents/4.png", "image/png", None)
            .await
            .unwrap();

        let first = store
            .create_run(document.id, EngineKind::Azure, &serde_json::Value::Null)
            .await
            .unwrap();
        store.mark_running(first).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store
            .create_run(document.id, EngineKind::Google, &serde_json::Value::Null)
            .await
            .unwrap();
        store.mark_running(second).await.unwrap();
        // Never-started run sorts last.
        let third = store
            .create_run(document.id, EngineKind::Tesseract, &serde_json::Value::Null)
            .await
            .unwrap();

        let runs = store.runs_for_document(document.id).await.unwrap();
        assert_eq!(
            runs.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![first, second, third]
        );
    }

    #[tokio::test]
    async fn test_document_selection_update() {
        let (store, _) = store_with_blobs().await;
        let document = store
            .insert_document("documents/5.png", "image/png", Some(2))
            .await
            .unwrap();
        let run_id = store
            .create_run(document.id, EngineKind::Azure, &serde_json::Value::Null)
            .await
            .unwrap();

        let now = Utc::now();
        store
            .update_document_selection(document.id, "text", EngineKind::Azure, run_id, now)
            .await
            .unwrap();

        let updated = store.get_document(document.id).await.unwrap();
        assert_eq!(updated.extracted_text.as_deref(), Some("text"));
        assert_eq!(updated.selected_engine.as_deref(), Some("azure"));
        assert_eq!(updated.selected_run_id, Some(run_id));
        assert!(updated.last_ocr_at.is_some());

        // Missing documents roll back untouched.
        assert!(store
            .update_document_selection(999, "x", EngineKind::Azure, run_id, now)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_create_run_requires_document() {
        let (store, _) = store_with_blobs().await;
        assert!(store
            .create_run(42, EngineKind::Azure, &serde_json::Value::Null)
            .await
            .is_err());
    }
}
