//! Detection sources feed frames into a session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::detections::{Detection, FrameDetections};
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Error)]
pub enum SourceError {
    /// Normal termination, no more frames
    #[error("detection stream ended")]
    StreamEnd,

    #[error("malformed frame on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("detection source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait DetectionSource: Send {
    async fn next_frame(&mut self) -> Result<FrameDetections, SourceError>;
}

/// In-memory frames, yielded in order
#[derive(Debug, Default)]
pub struct VecSource {
    frames: VecDeque<FrameDetections>,
}

impl VecSource {
    pub fn new(frames: impl IntoIterator<Item = FrameDetections>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait]
impl DetectionSource for VecSource {
    async fn next_frame(&mut self) -> Result<FrameDetections, SourceError> {
        self.frames.pop_front().ok_or(SourceError::StreamEnd)
    }
}

/// Line format; a missing timestamp means "now"
#[derive(Debug, Deserialize)]
struct FrameLine {
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    width: u32,
    height: u32,
    #[serde(default)]
    detections: Vec<Detection>,
}

/// One JSON frame per line. Blank lines are ignored; lines that are not
/// valid UTF-8 surface as [`SourceError::Malformed`] like any other bad line.
pub struct JsonLinesSource {
    path: PathBuf,
    reader: BufReader<File>,
    buf: Vec<u8>,
    line_no: usize,
}

impl JsonLinesSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        tracing::debug!(path = %path.display(), "opened detection file");
        Ok(Self {
            path,
            reader: BufReader::new(file),
            buf: Vec::new(),
            line_no: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DetectionSource for JsonLinesSource {
    async fn next_frame(&mut self) -> Result<FrameDetections, SourceError> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
                return Err(SourceError::StreamEnd);
            }
            self.line_no += 1;

            if self.buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let parsed: FrameLine =
                serde_json::from_slice(&self.buf).map_err(|source| SourceError::Malformed {
                    line: self.line_no,
                    source,
                })?;

            return Ok(FrameDetections {
                timestamp: parsed.timestamp.unwrap_or_else(Utc::now),
                width: parsed.width,
                height: parsed.height,
                detections: parsed.detections,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_vec_source_ends() {
        let mut source = VecSource::new(vec![FrameDetections::new(Utc::now(), 10, 10)]);
        assert!(source.next_frame().await.is_ok());
        assert!(matches!(source.next_frame().await, Err(SourceError::StreamEnd)));
    }

    #[tokio::test]
    async fn test_json_lines_source_reads_frames() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"timestamp":"2025-03-01T12:00:00Z","width":640,"height":480,"detections":[{{"track_id":"4","class_id":0,"confidence":0.9,"bbox":[1,2,30,40]}}]}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, r#"{{"width":640,"height":480}}"#).unwrap();

        let mut source = JsonLinesSource::open(file.path()).await.unwrap();

        let first = source.next_frame().await.unwrap();
        assert_eq!(first.width, 640);
        assert_eq!(first.detections.len(), 1);
        assert_eq!(first.detections[0].track_id.as_deref(), Some("4"));
        assert_eq!(first.timestamp.to_rfc3339(), "2025-03-01T12:00:00+00:00");

        match source.next_frame().await {
            Err(SourceError::Malformed { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected malformed line, got {:?}", other),
        }

        let last = source.next_frame().await.unwrap();
        assert!(last.detections.is_empty());

        assert!(matches!(source.next_frame().await, Err(SourceError::StreamEnd)));
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_malformed() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"width":224,"height":224}}"#).unwrap();
        file.write_all(b"{\"width\":\xff\xfe}\n").unwrap();
        writeln!(file, r#"{{"width":320,"height":240}}"#).unwrap();

        let mut source = JsonLinesSource::open(file.path()).await.unwrap();

        assert_eq!(source.next_frame().await.unwrap().width, 224);
        match source.next_frame().await {
            Err(SourceError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed line, got {:?}", other),
        }
        assert_eq!(source.next_frame().await.unwrap().width, 320);
        assert!(matches!(source.next_frame().await, Err(SourceError::StreamEnd)));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let result = JsonLinesSource::open("/nonexistent/frames.jsonl").await;
        assert!(matches!(result, Err(SourceError::Io(_))));
    }
}
