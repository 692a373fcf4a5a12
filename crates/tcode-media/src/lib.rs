//! FFmpeg CLI wrapper for transcoding.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - A runner with timeout enforcement and stderr capture
//! - The `Transcoder` seam used by both the inline path and the workers

pub mod command;
pub mod error;
pub mod transcoder;

pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use transcoder::{FfmpegTranscoder, Transcoder, TranscoderConfig};
