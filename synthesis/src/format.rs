//! Output format identifiers and RIFF/WAVE framing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Ticks are 100-nanosecond units.
pub const TICKS_PER_MILLISECOND: u64 = 10_000;

/// Ticks in one second.
pub const TICKS_PER_SECOND: u64 = 1_000 * TICKS_PER_MILLISECOND;

/// Size of the RIFF/WAVE header written in front of PCM data.
///
/// The `fmt ` chunk carries the 18-byte WAVEFORMATEX layout, so an empty
/// wav file is exactly this long.
pub const WAV_HEADER_LEN: usize = 46;

/// Identifier of the default output format.
pub const DEFAULT_OUTPUT_FORMAT: &str = "riff-16khz-16bit-mono-pcm";

/// How audio payload is framed on output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// PCM preceded by a RIFF/WAVE header.
    Riff,
    /// Headerless PCM.
    Raw,
    /// Self-framed MP3 stream.
    Mp3,
}

/// Audio output format, parsed from an identifier string such as
/// `audio-16khz-32kbitrate-mono-mp3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    id: &'static str,
    container: Container,
    sample_rate: u32,
    bits_per_sample: u16,
    channels: u16,
    bitrate_kbps: u32,
}

const fn pcm(id: &'static str, container: Container, sample_rate: u32) -> OutputFormat {
    OutputFormat {
        id,
        container,
        sample_rate,
        bits_per_sample: 16,
        channels: 1,
        bitrate_kbps: sample_rate * 16 / 1000,
    }
}

const fn mp3(id: &'static str, sample_rate: u32, bitrate_kbps: u32) -> OutputFormat {
    OutputFormat {
        id,
        container: Container::Mp3,
        sample_rate,
        bits_per_sample: 16,
        channels: 1,
        bitrate_kbps,
    }
}

static KNOWN_FORMATS: &[OutputFormat] = &[
    pcm("riff-8khz-16bit-mono-pcm", Container::Riff, 8_000),
    pcm("riff-16khz-16bit-mono-pcm", Container::Riff, 16_000),
    pcm("riff-24khz-16bit-mono-pcm", Container::Riff, 24_000),
    pcm("riff-48khz-16bit-mono-pcm", Container::Riff, 48_000),
    pcm("raw-8khz-16bit-mono-pcm", Container::Raw, 8_000),
    pcm("raw-16khz-16bit-mono-pcm", Container::Raw, 16_000),
    pcm("raw-24khz-16bit-mono-pcm", Container::Raw, 24_000),
    pcm("raw-48khz-16bit-mono-pcm", Container::Raw, 48_000),
    mp3("audio-16khz-32kbitrate-mono-mp3", 16_000, 32),
    mp3("audio-16khz-64kbitrate-mono-mp3", 16_000, 64),
    mp3("audio-16khz-128kbitrate-mono-mp3", 16_000, 128),
    mp3("audio-24khz-48kbitrate-mono-mp3", 24_000, 48),
    mp3("audio-24khz-96kbitrate-mono-mp3", 24_000, 96),
    mp3("audio-24khz-160kbitrate-mono-mp3", 24_000, 160),
];

impl OutputFormat {
    /// Looks up a format by identifier (case-insensitive).
    pub fn parse(id: &str) -> Result<Self> {
        let needle = id.trim();
        KNOWN_FORMATS
            .iter()
            .find(|f| f.id.eq_ignore_ascii_case(needle))
            .copied()
            .ok_or_else(|| Error::Config(format!("unknown output format: {needle:?}")))
    }

    /// Returns all supported formats.
    pub fn known() -> &'static [OutputFormat] {
        KNOWN_FORMATS
    }

    /// Returns the identifier string.
    pub fn as_str(&self) -> &'static str {
        self.id
    }

    pub fn container(&self) -> Container {
        self.container
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Returns true when the payload is uncompressed PCM.
    pub fn is_pcm(&self) -> bool {
        matches!(self.container, Container::Riff | Container::Raw)
    }

    /// Returns true when files in this format carry a RIFF header.
    pub fn is_riff(&self) -> bool {
        self.container == Container::Riff
    }

    /// Average payload bytes per second of audio.
    pub fn bytes_per_second(&self) -> u64 {
        u64::from(self.bitrate_kbps) * 1000 / 8
    }

    /// PCM block alignment (bytes per sample frame).
    pub fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }

    /// Converts a payload byte count into an audio duration in ticks.
    pub fn bytes_to_ticks(&self, bytes: u64) -> u64 {
        let bps = self.bytes_per_second();
        if bps == 0 {
            return 0;
        }
        // Split to keep the intermediate product in range for long streams.
        (bytes / bps) * TICKS_PER_SECOND + (bytes % bps) * TICKS_PER_SECOND / bps
    }

    /// Converts a duration in ticks into a payload byte count.
    pub fn ticks_to_bytes(&self, ticks: u64) -> u64 {
        let bytes = ticks * self.bytes_per_second() / TICKS_PER_SECOND;
        if self.is_pcm() {
            let align = u64::from(self.block_align());
            bytes - bytes % align
        } else {
            bytes
        }
    }

    /// Builds the 46-byte RIFF/WAVE header for `data_len` bytes of PCM.
    pub fn wav_header(&self, data_len: u32) -> [u8; WAV_HEADER_LEN] {
        let mut h = [0u8; WAV_HEADER_LEN];
        let riff_len = data_len.saturating_add((WAV_HEADER_LEN - 8) as u32);
        let byte_rate = self.sample_rate * u32::from(self.block_align());

        h[0..4].copy_from_slice(b"RIFF");
        h[4..8].copy_from_slice(&riff_len.to_le_bytes());
        h[8..12].copy_from_slice(b"WAVE");
        h[12..16].copy_from_slice(b"fmt ");
        h[16..20].copy_from_slice(&18u32.to_le_bytes());
        h[20..22].copy_from_slice(&1u16.to_le_bytes()); // WAVE_FORMAT_PCM
        h[22..24].copy_from_slice(&self.channels.to_le_bytes());
        h[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        h[28..32].copy_from_slice(&byte_rate.to_le_bytes());
        h[32..34].copy_from_slice(&self.block_align().to_le_bytes());
        h[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        h[36..38].copy_from_slice(&0u16.to_le_bytes()); // cbSize
        h[38..42].copy_from_slice(b"data");
        h[42..46].copy_from_slice(&data_len.to_le_bytes());
        h
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        KNOWN_FORMATS[1]
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id)
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        OutputFormat::parse(s)
    }
}

impl Serialize for OutputFormat {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id)
    }
}

impl<'de> Deserialize<'de> for OutputFormat {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        OutputFormat::parse(&s).map_err(serde::de::Error::custom)
    }
}
