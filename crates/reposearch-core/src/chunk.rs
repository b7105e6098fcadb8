//! Line-oriented source chunker.
//!
//! Splits repository files into [`Chunk`]s of roughly `chunk_size`
//! characters. Windows are built from whole lines so every chunk carries
//! exact 0-based, inclusive `start_line`/`end_line` metadata, and
//! consecutive windows share up to `chunk_overlap` characters of trailing
//! lines.
//!
//! # Algorithm
//!
//! 1. Read at most `max_file_size` bytes; decode as UTF-8, falling back to
//!    Latin-1 for anything else.
//! 2. Grow a window line by line until adding the next line would exceed
//!    `chunk_size` (a window always holds at least one line).
//! 3. If the window stops before end of file, pull its end back to the last
//!    *boundary* line in its second half: a blank line, a top-level
//!    definition in code, or a heading in Markdown.
//! 4. Emit the window unless it is blank, then start the next one far
//!    enough back to overlap by at most `chunk_overlap` characters.
//! 5. Cap each chunk at `max_tokens` (4 chars ≈ 1 token).
//!
//! # Example
//!
//! ```rust
//! use reposearch_core::chunk::{ChunkingOptions, TextChunker};
//!
//! let chunker = TextChunker::new(ChunkingOptions::default()).unwrap();
//! let spans = chunker.split("fn main() {}\n", reposearch_core::models::ChunkType::Code);
//! assert_eq!(spans.len(), 1);
//! assert_eq!((spans[0].start_line, spans[0].end_line), (0, 0));
//! ```

use std::fs::File;
use std::io::Read;
use std::path::{Component, Path};

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::models::{Chunk, ChunkType};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Bytes inspected when guessing whether an unknown file is text.
const SNIFF_BYTES: usize = 1024;

/// Directory names never descended into.
pub const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "__pycache__", ".idea", ".vscode"];

const BINARY_EXTENSIONS: &[&str] = &[
    ".pyc", ".pyo", ".so", ".o", ".a", ".lib", ".dll", ".exe", ".bin", ".png", ".jpg", ".jpeg",
    ".gif", ".bmp", ".ico", ".webp", ".mp3", ".mp4", ".avi", ".mov", ".mkv", ".wav", ".flac",
    ".zip", ".tar", ".gz", ".bz2", ".xz", ".7z", ".jar", ".war", ".pdf", ".doc", ".docx", ".xls",
    ".xlsx", ".ppt", ".pptx", ".woff", ".woff2", ".ttf", ".eot", ".class", ".wasm",
];

const TEXT_EXTENSIONS: &[&str] = &[
    ".txt", ".md", ".rst", ".html", ".htm", ".css", ".scss", ".sass", ".js", ".jsx", ".ts",
    ".tsx", ".vue", ".json", ".xml", ".yaml", ".yml", ".toml", ".ini", ".cfg", ".conf",
    ".properties", ".py", ".java", ".c", ".cpp", ".h", ".hpp", ".cs", ".rb", ".php", ".go",
    ".rs", ".swift", ".kt", ".scala", ".sh", ".bash", ".zsh", ".fish", ".sql", ".graphql",
    ".proto", ".cmake", ".mk", ".mak",
];

const CODE_EXTENSIONS: &[&str] = &[
    ".py", ".java", ".c", ".cpp", ".h", ".hpp", ".cs", ".js", ".jsx", ".ts", ".tsx", ".php",
    ".rb", ".go", ".rs", ".swift", ".kt", ".scala", ".sh", ".bash", ".zsh", ".sql",
];

/// Line prefixes that open a new top-level unit in source code.
const CODE_BOUNDARIES: &[&str] = &[
    "class ", "def ", "async def ", "function ", "fn ", "pub fn ", "pub(crate) fn ", "async fn ",
    "pub async fn ", "impl ", "impl<", "struct ", "pub struct ", "enum ", "pub enum ", "trait ",
    "pub trait ", "mod ", "pub mod ", "func ", "type ", "interface ", "export ", "public ",
    "private ", "protected ", "const ", "let ", "var ", "#[",
];

/// Chunker settings.
#[derive(Debug, Clone)]
pub struct ChunkingOptions {
    /// Target characters per chunk.
    pub chunk_size: usize,
    /// Maximum characters shared by consecutive chunks of a file.
    pub chunk_overlap: usize,
    /// Hard cap per chunk, in estimated tokens.
    pub max_tokens: usize,
    /// Bytes read per file; the rest is dropped.
    pub max_file_size: u64,
    /// Glob patterns (relative to the repository root) to leave out.
    pub exclude_globs: Vec<String>,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            max_tokens: 5000,
            max_file_size: 2 * 1024 * 1024,
            exclude_globs: Vec::new(),
        }
    }
}

/// Turns files into chunks.
///
/// Only [`chunk_file`](Chunker::chunk_file) is required. The provided
/// [`chunk_directory`](Chunker::chunk_directory) walks a working directory
/// and skips (with a warning) any file whose chunking fails.
pub trait Chunker: Send + Sync {
    /// Chunk one file. `root` is the repository root, used for relative
    /// paths in chunk metadata.
    fn chunk_file(&self, root: &Path, path: &Path, repository: &str) -> Result<Vec<Chunk>>;

    /// Whether a file should be chunked at all.
    fn accepts(&self, _relative: &Path, absolute: &Path) -> bool {
        is_text_file(absolute)
    }

    /// Chunk every accepted file under `root`, in file-name order.
    fn chunk_directory(&self, root: &Path, repository: &str) -> Result<Vec<Chunk>> {
        if !root.is_dir() {
            bail!("working directory {} does not exist", root.display());
        }

        let mut chunks = Vec::new();
        let mut files = 0usize;
        let mut skipped = 0usize;

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_skipped_dir(e));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    warn!(repository, error = %err, "skipping unreadable path");
                    skipped += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            if !self.accepts(relative, path) {
                continue;
            }
            match self.chunk_file(root, path, repository) {
                Ok(mut file_chunks) => {
                    files += 1;
                    chunks.append(&mut file_chunks);
                }
                Err(err) => {
                    warn!(
                        repository,
                        file = %relative.display(),
                        error = %err,
                        "skipping file that could not be chunked"
                    );
                    skipped += 1;
                }
            }
        }

        debug!(repository, files, skipped, chunks = chunks.len(), "chunked directory");
        Ok(chunks)
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIPPED_DIRS.contains(&name))
            .unwrap_or(false)
}

fn dotted_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
}

/// Guess whether a file holds text.
///
/// Known extensions decide immediately; anything else is text when its
/// first kilobyte contains no NUL byte.
pub fn is_text_file(path: &Path) -> bool {
    if let Some(ext) = dotted_extension(path) {
        if BINARY_EXTENSIONS.contains(&ext.as_str()) {
            return false;
        }
        if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            return true;
        }
    }

    let mut buf = [0u8; SNIFF_BYTES];
    let read = File::open(path).and_then(|mut f| f.read(&mut buf));
    match read {
        Ok(n) => !buf[..n].contains(&0),
        Err(_) => false,
    }
}

/// True for a repository-relative path the chunker would never read: one
/// under a skipped directory or with a known binary extension. Lets
/// fetchers avoid materializing it at all.
pub fn is_ignored_path(path: &Path) -> bool {
    let under_skipped_dir = path.components().any(|c| match c {
        Component::Normal(name) => name
            .to_str()
            .map(|n| SKIPPED_DIRS.contains(&n))
            .unwrap_or(false),
        _ => false,
    });
    under_skipped_dir
        || dotted_extension(path)
            .map(|ext| BINARY_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
}

/// Classify a file by extension.
pub fn chunk_type_for(path: &Path) -> ChunkType {
    match dotted_extension(path).as_deref() {
        Some(".md") | Some(".markdown") => ChunkType::Markdown,
        Some(ext) if CODE_EXTENSIONS.contains(&ext) => ChunkType::Code,
        _ => ChunkType::Text,
    }
}

/// A contiguous run of lines cut from one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub start_line: usize,
    /// Inclusive.
    pub end_line: usize,
    pub text: String,
}

/// The default [`Chunker`].
pub struct TextChunker {
    options: ChunkingOptions,
    exclude: GlobSet,
}

impl TextChunker {
    pub fn new(options: ChunkingOptions) -> Result<Self> {
        if options.chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if options.chunk_overlap >= options.chunk_size {
            bail!("chunk_overlap must be smaller than chunk_size");
        }
        let exclude = build_globset(&options.exclude_globs)?;
        Ok(Self { options, exclude })
    }

    pub fn options(&self) -> &ChunkingOptions {
        &self.options
    }

    /// Split `text` into spans.
    pub fn split(&self, text: &str, kind: ChunkType) -> Vec<Span> {
        let lines: Vec<&str> = text.lines().collect();
        let chunk_size = self.options.chunk_size;
        let half = chunk_size / 2;
        let mut spans = Vec::new();
        let mut start = 0;

        while start < lines.len() {
            let mut end = start;
            let mut size = 0;
            while end < lines.len() {
                let len = lines[end].len() + 1;
                if end > start && size + len > chunk_size {
                    break;
                }
                size += len;
                end += 1;
            }

            if end < lines.len() {
                let mut acc = 0;
                let mut boundary = None;
                for (i, line) in lines.iter().enumerate().take(end).skip(start) {
                    if i > start && acc >= half && is_boundary(line, kind) {
                        boundary = Some(i);
                    }
                    acc += line.len() + 1;
                }
                if let Some(b) = boundary {
                    end = b;
                }
            }

            let body = lines[start..end].join("\n");
            if !body.trim().is_empty() {
                spans.push(self.cap(start, body));
            }

            if end >= lines.len() {
                break;
            }

            let mut next = end;
            let mut overlap = 0;
            while next > start + 1 {
                let len = lines[next - 1].len() + 1;
                if overlap + len > self.options.chunk_overlap {
                    break;
                }
                overlap += len;
                next -= 1;
            }
            start = next;
        }

        spans
    }

    fn cap(&self, start_line: usize, mut text: String) -> Span {
        let max_chars = self.options.max_tokens.saturating_mul(CHARS_PER_TOKEN);
        if max_chars > 0 && text.len() > max_chars {
            let cut = snap_to_char_boundary(&text, max_chars);
            text.truncate(cut);
        }
        let end_line = start_line + text.matches('\n').count();
        Span {
            start_line,
            end_line,
            text,
        }
    }
}

impl Chunker for TextChunker {
    fn chunk_file(&self, root: &Path, path: &Path, repository: &str) -> Result<Vec<Chunk>> {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let file_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let text = read_text(path, self.options.max_file_size)
            .with_context(|| format!("Failed to read {}", file_path))?;

        let kind = chunk_type_for(path);
        Ok(self
            .split(&text, kind)
            .into_iter()
            .map(|span| {
                Chunk::new(
                    repository,
                    &file_path,
                    span.start_line,
                    span.end_line,
                    kind,
                    span.text,
                )
            })
            .collect())
    }

    fn accepts(&self, relative: &Path, absolute: &Path) -> bool {
        !self.exclude.is_match(relative) && is_text_file(absolute)
    }
}

fn is_boundary(line: &str, kind: ChunkType) -> bool {
    if line.trim().is_empty() {
        return true;
    }
    match kind {
        ChunkType::Code => CODE_BOUNDARIES.iter().any(|p| line.starts_with(p)),
        ChunkType::Markdown => line.starts_with('#'),
        ChunkType::Text => false,
    }
}

/// Read up to `limit` bytes of a file as text.
fn read_text(path: &Path, limit: u64) -> Result<String> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    let mut bytes = Vec::new();
    file.take(limit).read_to_end(&mut bytes)?;
    let truncated = size > limit;
    if truncated {
        warn!(file = %path.display(), size, limit, "file too large, truncating");
    }

    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) if truncated && err.utf8_error().error_len().is_none() => {
            let valid = err.utf8_error().valid_up_to();
            let mut bytes = err.into_bytes();
            bytes.truncate(valid);
            Ok(String::from_utf8(bytes)?)
        }
        Err(err) => Ok(err.into_bytes().iter().map(|&b| b as char).collect()),
    }
}

fn snap_to_char_boundary(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    let mut idx = idx;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
