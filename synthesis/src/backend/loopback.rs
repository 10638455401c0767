//! In-process backend producing deterministic tones.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::{Backend, BackendFrame, Connection, FrameStream};
use crate::config::{Credential, SessionConfig};
use crate::error::BackendError;
use crate::format::OutputFormat;
use crate::request::{SynthesisInput, WordBoundary};

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_BYTES: usize = 3200;

const LEADING_SILENCE_MS: u64 = 50;
const WORD_GAP_MS: u64 = 30;
const DEFAULT_MS_PER_CHAR: u64 = 60;
const TONE_HZ: f32 = 440.0;

/// A backend that renders each word as a short sine tone.
///
/// It accepts PCM output formats only. Words are runs of alphanumeric
/// characters, and every CJK character is a word of its own. Each word
/// yields one [`WordBoundary`] before its audio.
///
/// Failure injection (`fail_connects`, `fail_streams`, `reject_secret`)
/// makes it usable for exercising session error paths.
#[derive(Clone)]
pub struct LoopbackBackend {
    chunk_bytes: usize,
    ms_per_char: u64,
    fail_connects: Arc<AtomicUsize>,
    fail_streams: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
    reject_secret: Option<String>,
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBackend {
    pub fn new() -> Self {
        Self {
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            ms_per_char: DEFAULT_MS_PER_CHAR,
            fail_connects: Arc::new(AtomicUsize::new(0)),
            fail_streams: Arc::new(AtomicUsize::new(0)),
            connects: Arc::new(AtomicUsize::new(0)),
            reject_secret: None,
        }
    }

    /// Sets the audio chunk size in bytes.
    pub fn with_chunk_bytes(mut self, n: usize) -> Self {
        self.chunk_bytes = n.max(2);
        self
    }

    /// Sets the tone length per character.
    pub fn with_ms_per_char(mut self, ms: u64) -> Self {
        self.ms_per_char = ms;
        self
    }

    /// Rejects connections whose credential secret equals `secret`.
    pub fn reject_secret(mut self, secret: impl Into<String>) -> Self {
        self.reject_secret = Some(secret.into());
        self
    }

    /// Makes the next `n` connection attempts fail.
    pub fn fail_connects(&self, n: usize) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` streams fail after their first audio chunk.
    pub fn fail_streams(&self, n: usize) {
        self.fail_streams.store(n, Ordering::SeqCst);
    }

    /// Number of connection attempts so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Backend for LoopbackBackend {
    async fn connect(
        &self,
        config: &SessionConfig,
        credential: &Credential,
    ) -> Result<Box<dyn Connection>, BackendError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.fail_connects) {
            return Err(BackendError::connection("loopback: injected connect failure"));
        }
        if self.reject_secret.as_deref() == Some(credential.secret()) {
            return Err(BackendError::auth("loopback: credential rejected"));
        }
        debug!(region = %config.region, voice = %config.voice_name, "loopback: connected");
        Ok(Box::new(LoopbackConnection {
            chunk_bytes: self.chunk_bytes,
            ms_per_char: self.ms_per_char,
            fail_streams: self.fail_streams.clone(),
        }))
    }
}

struct LoopbackConnection {
    chunk_bytes: usize,
    ms_per_char: u64,
    fail_streams: Arc<AtomicUsize>,
}

#[async_trait]
impl Connection for LoopbackConnection {
    async fn synthesize(
        &mut self,
        input: &SynthesisInput,
        format: OutputFormat,
    ) -> Result<FrameStream, BackendError> {
        if !format.is_pcm() {
            return Err(BackendError::bad_request(format!(
                "loopback: unsupported output format {format}"
            )));
        }

        let (pcm, boundaries) = render(input, format, self.ms_per_char);
        let chunk_bytes = self.chunk_bytes - self.chunk_bytes % usize::from(format.block_align());
        let fail = take_one(&self.fail_streams);

        Ok(Box::pin(try_stream! {
            let pcm = Bytes::from(pcm);
            let mut pending = boundaries.into_iter().peekable();
            let mut start = 0;
            while start < pcm.len() {
                let end = (start + chunk_bytes).min(pcm.len());
                while let Some((_, b)) = pending.next_if(|(offset, _)| *offset < end) {
                    yield BackendFrame::WordBoundary(b);
                }
                yield BackendFrame::Audio(pcm.slice(start..end));
                if fail {
                    Err(BackendError::connection("loopback: injected stream reset"))?;
                }
                start = end;
                tokio::task::yield_now().await;
            }
        }))
    }
}

struct Word {
    text_offset: u32,
    source_offset: u32,
    len: u32,
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF | 0xF900..=0xFAFF)
}

/// Splits the spoken text of `input` into words, tracking character
/// offsets into both the spoken text and the raw input.
fn split_words(input: &SynthesisInput) -> Vec<Word> {
    let mut words = Vec::new();
    let mut current: Option<Word> = None;
    let mut in_tag = false;
    let mut text_pos = 0u32;

    for (source_pos, c) in input.as_str().chars().enumerate() {
        let source_pos = source_pos as u32;
        if input.is_ssml() {
            if in_tag {
                in_tag = c != '>';
                continue;
            }
            if c == '<' {
                in_tag = true;
                words.extend(current.take());
                continue;
            }
        }

        if is_cjk(c) {
            words.extend(current.take());
            words.push(Word {
                text_offset: text_pos,
                source_offset: source_pos,
                len: 1,
            });
        } else if c.is_alphanumeric() {
            match current.as_mut() {
                Some(w) => w.len += 1,
                None => {
                    current = Some(Word {
                        text_offset: text_pos,
                        source_offset: source_pos,
                        len: 1,
                    })
                }
            }
        } else {
            words.extend(current.take());
        }
        text_pos += 1;
    }
    words.extend(current);
    words
}

fn push_silence(pcm: &mut Vec<u8>, bytes: usize) {
    pcm.resize(pcm.len() + bytes, 0);
}

fn push_tone(pcm: &mut Vec<u8>, format: OutputFormat, bytes: usize) {
    let rate = format.sample_rate() as f32;
    for i in 0..bytes / 2 {
        let t = i as f32 / rate;
        let sample = ((t * TONE_HZ * std::f32::consts::TAU).sin() * 0.3 * f32::from(i16::MAX)) as i16;
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
}

/// Renders PCM plus (byte offset, boundary) pairs.
fn render(
    input: &SynthesisInput,
    format: OutputFormat,
    ms_per_char: u64,
) -> (Vec<u8>, Vec<(usize, WordBoundary)>) {
    let ms = |ms: u64| format.ticks_to_bytes(ms * crate::format::TICKS_PER_MILLISECOND) as usize;

    let mut pcm = Vec::new();
    let mut boundaries = Vec::new();
    push_silence(&mut pcm, ms(LEADING_SILENCE_MS));

    for word in split_words(input) {
        let offset = pcm.len();
        boundaries.push((
            offset,
            WordBoundary {
                audio_offset_ticks: format.bytes_to_ticks(offset as u64),
                text_offset: word.text_offset,
                word_length: word.len,
                source_offset: word.source_offset,
            },
        ));
        push_tone(&mut pcm, format, ms(ms_per_char * u64::from(word.len)));
        push_silence(&mut pcm, ms(WORD_GAP_MS));
    }
    (pcm, boundaries)
}
