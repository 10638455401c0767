//! File-backed sink.

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{AudioSink, SinkError, WriteOutcome};
use crate::format::{OutputFormat, WAV_HEADER_LEN};

struct OpenFile {
    writer: BufWriter<File>,
    data_len: u64,
}

/// Sink writing audio to a file.
///
/// The file is created when the sink is built. For RIFF formats a header is
/// written up front and its length fields are patched when the sink is
/// closed, so a sink closed without audio leaves a 46-byte wav file.
/// Several requests writing to one sink append in order.
///
/// Dropping an unclosed sink finalizes the file.
///
/// Writes go through a buffered `std::fs::File` on the session worker and
/// block it briefly. Chunks are small (a backend frame each), so this stays
/// within what a tokio worker tolerates; a sink for slow storage should wrap
/// its writes in `tokio::task::spawn_blocking` behind its own
/// [`AudioSink`] impl.
pub struct FileSink {
    path: PathBuf,
    format: OutputFormat,
    file: Mutex<Option<OpenFile>>,
}

impl FileSink {
    /// Creates (truncating) the file at `path`.
    pub fn create(path: impl AsRef<Path>, format: OutputFormat) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut writer = BufWriter::new(File::create(&path)?);
        if format.is_riff() {
            writer.write_all(&format.wav_header(0))?;
        }
        debug!(path = %path.display(), format = %format, "file sink: created");
        Ok(Self {
            path,
            format,
            file: Mutex::new(Some(OpenFile { writer, data_len: 0 })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Payload bytes written so far, excluding the header.
    pub fn data_len(&self) -> u64 {
        self.file.lock().as_ref().map_or(0, |f| f.data_len)
    }

    fn finalize(&self, open: OpenFile) -> io::Result<()> {
        let mut file = open.writer.into_inner().map_err(|e| e.into_error())?;
        if self.format.is_riff() {
            let data_len = u32::try_from(open.data_len).unwrap_or(u32::MAX);
            let header = self.format.wav_header(data_len);
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header[..WAV_HEADER_LEN])?;
            file.seek(SeekFrom::End(0))?;
        }
        file.flush()?;
        debug!(path = %self.path.display(), bytes = open.data_len, "file sink: closed");
        Ok(())
    }
}

#[async_trait]
impl AudioSink for FileSink {
    async fn accept(&self, data: &[u8]) -> WriteOutcome {
        let mut guard = self.file.lock();
        let open = guard.as_mut().ok_or(SinkError::Closed)?;
        open.writer.write_all(data)?;
        open.data_len += data.len() as u64;
        Ok(data.len())
    }

    async fn close(&self) -> Result<(), SinkError> {
        let open = self.file.lock().take();
        match open {
            Some(open) => Ok(self.finalize(open)?),
            None => Ok(()),
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Some(open) = self.file.get_mut().take() {
            if let Err(e) = self.finalize(open) {
                warn!(path = %self.path.display(), "file sink: finalize on drop failed: {}", e);
            }
        }
    }
}
