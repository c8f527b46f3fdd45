//! Conversion controller: one input book → one UTF-8 text file.
//!
//! # Usage
//! ```no_run
//! use std::path::Path;
//! use ebook2txt::convert::{Converter, ConvertOptions, Capabilities};
//!
//! let converter = Converter::new(Capabilities::detect(), ConvertOptions::default());
//! let job = converter.job();
//! let handle = job.handle();          // stop/pause/resume from another thread
//!
//! let mut progress = |pct: f64, status: &str| println!("{pct:5.1}%  {status}");
//! let summary = job.run(Path::new("book.mobi"), Path::new("book.txt"), Some(&mut progress))?;
//! println!("{} units, {} bytes", summary.units, summary.bytes_written);
//! # let _ = handle;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Work units
//!
//! | Format | Units | Progress status |
//! |--------|-------|-----------------|
//! | PDB (`.mobi`, `.prc`, `.azw`) | one per text record, then one decode + write unit | `record i/n`, `writing text` |
//! | EPUB (`.epub`) | one per spine document | `chapter i/n` |
//!
//! Stop and pause take effect only between units.  Output written before a
//! stop or a failure stays on disk.

mod epub;
mod mobi;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::container::ContainerError;
use crate::encoding::DecodeAttempt;
use crate::job::{Interrupted, JobControl, JobHandle, JobState, ProgressTracker};
use crate::markup::MarkupBackend;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error("no text could be extracted (encrypted or garbled payload?)")]
    EmptyExtraction,
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("stopped by caller")]
    StoppedByCaller,
    #[error("processing failed: {0}")]
    ProcessingFailure(String),
    #[error("input not found: {}", .0.display())]
    InputNotFound(PathBuf),
    #[error("book is encrypted (DRM scheme {0}); decryption is not supported")]
    Encrypted(u16),
    #[error("{0} support is not compiled in")]
    MissingCapability(&'static str),
    /// Reading the input or writing the output failed.  Reported as a
    /// processing failure.
    #[error("processing failed: {0}")]
    Io(#[from] io::Error),
}

impl From<Interrupted> for ConvertError {
    fn from(_: Interrupted) -> Self {
        ConvertError::StoppedByCaller
    }
}

// ── Capabilities ─────────────────────────────────────────────────────────────

/// Optional parts of the pipeline, resolved once and handed to the
/// controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// `.epub` inputs can be read.
    pub epub:   bool,
    pub markup: MarkupBackend,
}

impl Capabilities {
    /// What this build was compiled with.
    pub fn detect() -> Self {
        Self {
            epub:   cfg!(feature = "epub"),
            markup: MarkupBackend::preferred(),
        }
    }

    pub fn with_markup(mut self, markup: MarkupBackend) -> Self {
        self.markup = markup;
        self
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::detect()
    }
}

// ── ConvertOptions ───────────────────────────────────────────────────────────

/// Configuration for [`Converter`].
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// How long a paused worker sleeps between looks at its flags.
    pub poll_interval:          Duration,
    /// Remove MOBI trailing entries from text records before decompressing.
    pub strip_trailing_entries: bool,
    /// Written after every EPUB chapter.
    pub chapter_separator:      String,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            poll_interval:          DEFAULT_POLL_INTERVAL,
            strip_trailing_entries: true,
            chapter_separator:      format!("\n\n{}\n\n", "-".repeat(20)),
        }
    }
}

// ── BookFormat ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BookFormat {
    /// PalmDOC / MOBI database.
    Pdb,
    Epub,
}

impl BookFormat {
    /// Pick the reader from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, ConvertError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "mobi" | "prc" | "azw" => Ok(BookFormat::Pdb),
            "epub"                 => Ok(BookFormat::Epub),
            ""                     => Err(ConvertError::UnsupportedFormat("(no extension)".into())),
            other                  => Err(ConvertError::UnsupportedFormat(format!(".{other}"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BookFormat::Pdb  => "pdb",
            BookFormat::Epub => "epub",
        }
    }
}

/// `book.mobi` → `book.txt`.
pub fn default_output_path(input: &Path) -> PathBuf {
    input.with_extension("txt")
}

// ── Results ──────────────────────────────────────────────────────────────────

/// What a successful run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionSummary {
    pub format:        BookFormat,
    /// Work units processed.
    pub units:         usize,
    pub bytes_written: u64,
    /// Text encoding the PDB payload resolved to; `None` for EPUB.
    pub encoding:      Option<DecodeAttempt>,
    /// Bytes emitted as 0x00 by out-of-range back-references.
    pub zero_filled:   usize,
    pub output:        PathBuf,
}

/// Flat `(success, message)` view of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionOutcome {
    pub success: bool,
    pub message: String,
}

impl From<&Result<ConversionSummary, ConvertError>> for ConversionOutcome {
    fn from(result: &Result<ConversionSummary, ConvertError>) -> Self {
        match result {
            Ok(_)  => Self { success: true,  message: "success".into() },
            Err(e) => Self { success: false, message: e.to_string() },
        }
    }
}

// ── Converter ────────────────────────────────────────────────────────────────

/// Factory for conversion jobs sharing one configuration.
#[derive(Debug, Clone, Default)]
pub struct Converter {
    pub capabilities: Capabilities,
    pub options:      ConvertOptions,
}

impl Converter {
    pub fn new(capabilities: Capabilities, options: ConvertOptions) -> Self {
        Self { capabilities, options }
    }

    /// A fresh job.  Each job runs once.
    pub fn job(&self) -> ConversionJob {
        ConversionJob {
            control:      JobControl::new(),
            capabilities: self.capabilities,
            options:      self.options.clone(),
        }
    }

    /// Run a job to completion without progress reporting or remote control.
    pub fn convert_file(&self, input: &Path, output: &Path) -> Result<ConversionSummary, ConvertError> {
        self.job().run::<fn(f64, &str)>(input, output, None)
    }
}

// ── ConversionJob ────────────────────────────────────────────────────────────

/// One conversion.  [`run`](Self::run) consumes the job; control it from
/// elsewhere through [`handle`](Self::handle).
#[derive(Debug)]
pub struct ConversionJob {
    control:      Arc<JobControl>,
    capabilities: Capabilities,
    options:      ConvertOptions,
}

impl ConversionJob {
    pub fn handle(&self) -> JobHandle {
        JobHandle::new(self.control.clone())
    }

    pub fn state(&self) -> JobState {
        self.control.state()
    }

    /// Convert `input` into UTF-8 text at `output`, creating parent
    /// directories as needed.
    ///
    /// * `progress`: optional callback; receives the percentage complete
    ///   and a status line after every unit.  Percentages never decrease.
    pub fn run<F>(
        self,
        input:        &Path,
        output:       &Path,
        progress:     Option<&mut F>,
    ) -> Result<ConversionSummary, ConvertError>
    where
        F: FnMut(f64, &str),
    {
        if !self.control.begin() {
            return Err(ConvertError::ProcessingFailure("job was already started".into()));
        }
        info!("converting {} -> {}", input.display(), output.display());

        let mut ctx = Context {
            control:      &self.control,
            options:      &self.options,
            capabilities: self.capabilities,
            tracker:      ProgressTracker::default(),
            progress:     progress.map(|f| f as &mut dyn FnMut(f64, &str)),
        };
        let result = dispatch(&mut ctx, input, output);

        let state = match &result {
            Ok(summary) => {
                info!(
                    "converted {} ({} units, {} bytes written)",
                    input.display(),
                    summary.units,
                    summary.bytes_written
                );
                JobState::Completed
            }
            Err(ConvertError::StoppedByCaller) => {
                info!("conversion of {} stopped by caller", input.display());
                JobState::Stopped
            }
            Err(e) => {
                warn!("conversion of {} failed: {e}", input.display());
                JobState::Failed
            }
        };
        self.control.finish(state);
        result
    }

    /// [`run`](Self::run), flattened to a `(success, message)` outcome.
    pub fn convert<F>(self, input: &Path, output: &Path, progress: Option<&mut F>) -> ConversionOutcome
    where
        F: FnMut(f64, &str),
    {
        ConversionOutcome::from(&self.run(input, output, progress))
    }
}

fn dispatch(ctx: &mut Context<'_>, input: &Path, output: &Path) -> Result<ConversionSummary, ConvertError> {
    if !input.is_file() {
        return Err(ConvertError::InputNotFound(input.to_path_buf()));
    }
    let format = BookFormat::from_path(input)?;
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    match format {
        BookFormat::Pdb => mobi::convert(ctx, input, output),
        BookFormat::Epub => {
            if !ctx.capabilities.epub {
                return Err(ConvertError::MissingCapability("epub"));
            }
            epub::convert(ctx, input, output)
        }
    }
}

// ── Worker context ───────────────────────────────────────────────────────────

/// Everything a format reader needs while it works through its units.
pub(crate) struct Context<'a> {
    control:      &'a JobControl,
    options:      &'a ConvertOptions,
    capabilities: Capabilities,
    tracker:      ProgressTracker,
    progress:     Option<&'a mut dyn FnMut(f64, &str)>,
}

impl Context<'_> {
    /// Honour stop/pause before the next unit.
    fn checkpoint(&self) -> Result<(), ConvertError> {
        Ok(self.control.checkpoint(self.options.poll_interval)?)
    }

    /// Report `completed` of `total` units done.
    fn unit_done(&mut self, completed: usize, total: usize, status: &str) {
        let pct = self.tracker.advance(completed, total);
        if let Some(cb) = self.progress.as_mut() {
            cb(pct, status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_from_extension() {
        assert_eq!(BookFormat::from_path(Path::new("a/b.MOBI")).unwrap(), BookFormat::Pdb);
        assert_eq!(BookFormat::from_path(Path::new("b.prc")).unwrap(), BookFormat::Pdb);
        assert_eq!(BookFormat::from_path(Path::new("b.azw")).unwrap(), BookFormat::Pdb);
        assert_eq!(BookFormat::from_path(Path::new("b.Epub")).unwrap(), BookFormat::Epub);
        assert!(matches!(
            BookFormat::from_path(Path::new("b.pdf")),
            Err(ConvertError::UnsupportedFormat(ext)) if ext == ".pdf"
        ));
        assert!(matches!(
            BookFormat::from_path(Path::new("README")),
            Err(ConvertError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn default_output_swaps_extension() {
        assert_eq!(default_output_path(Path::new("x/book.mobi")), PathBuf::from("x/book.txt"));
    }

    #[test]
    fn default_options() {
        let o = ConvertOptions::default();
        assert_eq!(o.poll_interval, Duration::from_millis(100));
        assert!(o.strip_trailing_entries);
        assert_eq!(o.chapter_separator, "\n\n--------------------\n\n");
    }

    #[test]
    fn capabilities_follow_features() {
        let caps = Capabilities::detect();
        assert_eq!(caps.epub, cfg!(feature = "epub"));
        assert_eq!(caps.with_markup(MarkupBackend::Regex).markup, MarkupBackend::Regex);
    }

    #[test]
    fn outcome_messages() {
        let stopped: Result<ConversionSummary, ConvertError> = Err(ConvertError::StoppedByCaller);
        assert_eq!(
            ConversionOutcome::from(&stopped),
            ConversionOutcome { success: false, message: "stopped by caller".into() }
        );
        let rejected: Result<ConversionSummary, ConvertError> =
            Err(ContainerError::UnsupportedCompression(17480).into());
        let outcome = ConversionOutcome::from(&rejected);
        assert!(!outcome.success);
        assert!(outcome.message.contains("17480"));

        let io: Result<ConversionSummary, ConvertError> =
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only").into());
        assert_eq!(ConversionOutcome::from(&io).message, "processing failed: read-only");
    }

    #[test]
    fn missing_input_is_reported() {
        let err = Converter::default()
            .convert_file(Path::new("/definitely/not/here.mobi"), Path::new("/tmp/out.txt"))
            .unwrap_err();
        assert!(matches!(err, ConvertError::InputNotFound(_)));
    }
}
