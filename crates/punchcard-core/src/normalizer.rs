//! Converts uploaded files into one canonical JSON document.
//!
//! The canonical document is written back to blob storage and its key is
//! recorded on the job, so a job is converted at most once no matter how
//! many times it runs.

use serde_json::{Map, Value};

use crate::error::AppError;
use crate::job::BulkJob;
use crate::traits::{BlobStore, JobStore, SheetConverter};

const NORMALIZED_PREFIX: &str = "normalized";

/// Canonical JSON for a job plus the blob key it lives under.
#[derive(Debug, Clone)]
pub struct NormalizedFile {
    pub key: String,
    pub document: Value,
}

/// Built-in converter for delimited text exports.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedConverter;

impl DelimitedConverter {
    fn delimiter(extension: &str) -> Option<u8> {
        match extension {
            "csv" => Some(b','),
            "tsv" => Some(b'\t'),
            _ => None,
        }
    }

    /// Header row becomes the keys; blank rows are skipped.
    pub fn convert(&self, bytes: &[u8], delimiter: u8) -> Result<Value, AppError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);

        let headers = reader
            .headers()
            .map_err(|e| AppError::UnsupportedFormat(format!("Unreadable header row: {e}")))?
            .clone();
        if headers.iter().all(str::is_empty) {
            return Err(AppError::UnsupportedFormat("Missing header row".into()));
        }

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                AppError::UnsupportedFormat(format!("Malformed row {}: {e}", line + 2))
            })?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            let row: Map<String, Value> = headers
                .iter()
                .zip(record.iter())
                .filter(|(header, _)| !header.is_empty())
                .map(|(header, cell)| (header.to_string(), Value::String(cell.to_string())))
                .collect();
            rows.push(Value::Object(row));
        }
        Ok(Value::Array(rows))
    }
}

/// Spreadsheet converter for deployments without one; refuses every workbook.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSheetConverter;

impl SheetConverter for NoSheetConverter {
    fn supports(&self, _extension: &str) -> bool {
        false
    }

    fn convert(&self, _bytes: &[u8], extension: &str) -> Result<Value, AppError> {
        Err(AppError::UnsupportedFormat(format!(
            "No spreadsheet converter configured for .{extension}"
        )))
    }
}

pub struct FileNormalizer<B, J, S>
where
    B: BlobStore,
    J: JobStore,
    S: SheetConverter,
{
    blobs: B,
    jobs: J,
    sheets: S,
}

impl<B, J, S> FileNormalizer<B, J, S>
where
    B: BlobStore,
    J: JobStore,
    S: SheetConverter,
{
    pub fn new(blobs: B, jobs: J, sheets: S) -> Self {
        Self {
            blobs,
            jobs,
            sheets,
        }
    }

    /// Return the canonical document for `job`, converting the upload on
    /// first use.
    ///
    /// Fails with [`AppError::SourceNotFound`] when the bytes are missing and
    /// [`AppError::UnsupportedFormat`] when they cannot be converted.
    pub async fn normalize(&self, job: &BulkJob) -> Result<NormalizedFile, AppError> {
        if let Some(key) = &job.normalized_file {
            tracing::debug!(job_id = %job.id, %key, "Reusing normalized file");
            let bytes = self.fetch(key).await?;
            let document = serde_json::from_slice(&bytes).map_err(|e| {
                AppError::UnsupportedFormat(format!("Corrupt normalized file {key}: {e}"))
            })?;
            return Ok(NormalizedFile {
                key: key.clone(),
                document,
            });
        }

        let bytes = self.fetch(&job.source_file).await?;
        let extension = extension_of(&job.source_file);
        let document = self.convert(&bytes, &extension)?;

        let key = format!("{NORMALIZED_PREFIX}/{}.json", job.id);
        let key = self.blobs.put(&key, serde_json::to_vec(&document)?).await?;
        self.jobs.set_normalized_file(job.id, &key).await?;

        tracing::info!(
            job_id = %job.id,
            source = %job.source_file,
            %key,
            bytes = bytes.len(),
            "Normalized upload"
        );
        Ok(NormalizedFile { key, document })
    }

    fn convert(&self, bytes: &[u8], extension: &str) -> Result<Value, AppError> {
        if extension == "json" {
            return serde_json::from_slice(bytes)
                .map_err(|e| AppError::UnsupportedFormat(format!("Invalid JSON: {e}")));
        }
        if let Some(delimiter) = DelimitedConverter::delimiter(extension) {
            return DelimitedConverter.convert(bytes, delimiter);
        }
        if matches!(extension, "xlsx" | "xls" | "xlsm" | "ods") || self.sheets.supports(extension)
        {
            return self.sheets.convert(bytes, extension);
        }
        Err(AppError::UnsupportedFormat(format!(
            "Unsupported file extension '.{extension}'"
        )))
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, AppError> {
        self.blobs.get(key).await.map_err(|e| match e {
            AppError::SourceNotFound(_) => e,
            other => AppError::SourceNotFound(format!("{key}: {other}")),
        })
    }
}

fn extension_of(key: &str) -> String {
    std::path::Path::new(key)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}
