// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! drift-export
#![deny(unsafe_code)]
#![warn(missing_docs)]

use drift_core::{ExportError, SpanExporter, SpanRecord};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// InMemoryExporter
// ---------------------------------------------------------------------------

/// Collects ended spans in memory, in end order.
///
/// Cheap to clone; clones share the buffer.
#[derive(Clone, Default)]
pub struct InMemoryExporter {
    spans: Arc<Mutex<Vec<SpanRecord>>>,
}

impl InMemoryExporter {
    /// An empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every exported span.
    #[must_use]
    pub fn spans(&self) -> Vec<SpanRecord> {
        self.spans.lock().expect("exporter lock").clone()
    }

    /// Number of exported spans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spans.lock().expect("exporter lock").len()
    }

    /// Whether nothing has been exported yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything collected so far.
    pub fn clear(&self) {
        self.spans.lock().expect("exporter lock").clear();
    }
}

impl SpanExporter for InMemoryExporter {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn export(&self, span: &SpanRecord) -> Result<(), ExportError> {
        self.spans.lock().expect("exporter lock").push(span.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonlExporter
// ---------------------------------------------------------------------------

/// Appends one JSON span record per line to a file.
pub struct JsonlExporter {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlExporter {
    /// Create or append to the file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl SpanExporter for JsonlExporter {
    fn name(&self) -> &str {
        "jsonl-file"
    }

    fn export(&self, span: &SpanRecord) -> Result<(), ExportError> {
        let line = serde_json::to_string(span)?;
        let mut writer = self.writer.lock().expect("writer lock");
        writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush())
            .map_err(|e| ExportError::Io(e.to_string()))
    }
}

/// Read every span record from a JSONL file written by [`JsonlExporter`].
pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<SpanRecord>, ExportError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ExportError::Io(e.to_string()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(ExportError::from))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
