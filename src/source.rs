// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Frame sources and sinks
//!
//! A [`DetectionSource`] yields detection frames one at a time; `None` means the
//! stream ended. [`JsonLinesSource`] replays frames recorded one JSON object per line,
//! [`MemorySource`] serves frames from memory.
//!
//! A [`FrameSink`] receives every processed frame for the outbound video stream. A
//! failed write ends the frame loop.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};

use crate::detection::DetectionFrame;

#[async_trait]
pub trait DetectionSource: Send {
    async fn next_frame(&mut self) -> Result<Option<DetectionFrame>>;

    fn describe(&self) -> String;
}

/// Replays frames from a JSON lines file.
///
/// Blank lines and lines starting with `#` are skipped. Frames without a
/// `frame_index` are numbered in file order.
pub struct JsonLinesSource {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_number: usize,
    frames_read: u64,
}

impl JsonLinesSource {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open replay file {:?}", path))?;
        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line_number: 0,
            frames_read: 0,
        })
    }
}

#[async_trait]
impl DetectionSource for JsonLinesSource {
    async fn next_frame(&mut self) -> Result<Option<DetectionFrame>> {
        while let Some(line) = self
            .lines
            .next_line()
            .await
            .with_context(|| format!("Failed to read {:?}", self.path))?
        {
            self.line_number += 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut frame: DetectionFrame = serde_json::from_str(line).with_context(|| {
                format!("Invalid frame at {:?} line {}", self.path, self.line_number)
            })?;
            self.frames_read += 1;
            if frame.frame_index == 0 {
                frame.frame_index = self.frames_read;
            }
            return Ok(Some(frame));
        }
        debug!(
            "Replay file {:?} exhausted after {} frames",
            self.path, self.frames_read
        );
        Ok(None)
    }

    fn describe(&self) -> String {
        format!("replay of {}", self.path.display())
    }
}

/// Serves a fixed list of frames.
#[derive(Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<DetectionFrame>,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = DetectionFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }
}

#[async_trait]
impl DetectionSource for MemorySource {
    async fn next_frame(&mut self) -> Result<Option<DetectionFrame>> {
        Ok(self.frames.pop_front())
    }

    fn describe(&self) -> String {
        format!("{} in-memory frames", self.frames.len())
    }
}

/// Outbound stream of processed frames.
#[async_trait]
pub trait FrameSink: Send {
    async fn write_frame(&mut self, frame: &DetectionFrame) -> Result<()>;
}

/// Writes the encoded image of each frame to an async writer, such as an encoder pipe.
pub struct WriterFrameSink<W> {
    writer: W,
}

impl<W> WriterFrameSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl WriterFrameSink<File> {
    pub async fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())
            .await
            .with_context(|| format!("Failed to open output stream {:?}", path.as_ref()))?;
        Ok(Self::new(file))
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSink for WriterFrameSink<W> {
    async fn write_frame(&mut self, frame: &DetectionFrame) -> Result<()> {
        if let Some(image) = &frame.image {
            self.writer
                .write_all(image)
                .await
                .context("Output stream write failed")?;
            self.writer.flush().await.context("Output stream flush failed")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::DetectionClass;
    use std::io::Write;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_json_lines_replay() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# recorded on belt 3").unwrap();
        writeln!(
            file,
            r#"{{"width":800,"height":450,"detections":[{{"class_id":7,"confidence":0.8,"bbox":[0,0,10,10]}}]}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"camera_id":2,"frame_index":40,"width":800,"height":450}}"#).unwrap();

        let mut source = JsonLinesSource::open(file.path()).await.unwrap();
        let first = source.next_frame().await.unwrap().unwrap();
        assert_eq!(first.frame_index, 1);
        assert_eq!(first.detections[0].class, DetectionClass::Smoke);

        let second = source.next_frame().await.unwrap().unwrap();
        assert_eq!(second.camera_id, Some(2));
        assert_eq!(second.frame_index, 40);

        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_lines_rejects_unknown_class() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"width":800,"height":450,"detections":[{{"class_id":12,"confidence":0.8,"bbox":[0,0,1,1]}}]}}"#
        )
        .unwrap();
        let mut source = JsonLinesSource::open(file.path()).await.unwrap();
        let err = source.next_frame().await.unwrap_err();
        assert!(format!("{err:#}").contains("unknown detection class id 12"));
    }

    #[tokio::test]
    async fn test_memory_source_drains() {
        let mut source = MemorySource::new(vec![
            DetectionFrame::new(1, 1, 800, 450),
            DetectionFrame::new(1, 2, 800, 450),
        ]);
        assert_eq!(source.next_frame().await.unwrap().unwrap().frame_index, 1);
        assert_eq!(source.next_frame().await.unwrap().unwrap().frame_index, 2);
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writer_sink_writes_images() {
        let mut sink = WriterFrameSink::new(Vec::new());
        let mut frame = DetectionFrame::new(1, 1, 800, 450);
        sink.write_frame(&frame).await.unwrap();
        frame.image = Some(Arc::new(vec![0xFF, 0xD8]));
        sink.write_frame(&frame).await.unwrap();
        assert_eq!(sink.writer, vec![0xFF, 0xD8]);
    }
}
