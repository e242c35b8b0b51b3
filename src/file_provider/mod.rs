use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{LogSource, SourceConfig};

mod error;

pub use error::{Error, Result};

/// Characters that turn a source path into a glob pattern.
const WILDCARDS: &[char] = &['*', '?', '['];

/// A file to tail, together with the source it was discovered for.
#[derive(Debug, Clone)]
pub struct File {
    pub path: PathBuf,
    pub source: Arc<LogSource>,
}

impl File {
    pub fn new(path: impl Into<PathBuf>, source: Arc<LogSource>) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

/// Resolves file sources into at most `files_limit` concrete files.
#[derive(Debug)]
pub struct FileProvider {
    sources: Vec<Arc<LogSource>>,
    files_limit: usize,
}

impl FileProvider {
    pub fn new(sources: Vec<Arc<LogSource>>, files_limit: usize) -> Self {
        Self {
            sources,
            files_limit,
        }
    }

    /// Returns the files matching the configured sources, in source order.
    ///
    /// Literal paths are returned as is, without checking they exist. Wildcard
    /// paths are expanded against the filesystem; a malformed pattern or a
    /// pattern without matches is recorded on the source status and the source
    /// is skipped. Expansion stops as soon as the limit is reached, so the last
    /// source may only contribute part of its matches.
    pub fn files_to_tail(&self) -> Vec<File> {
        let mut files = Vec::new();
        for source in &self.sources {
            if files.len() >= self.files_limit {
                break;
            }
            let SourceConfig::File { path } = source.config() else {
                continue;
            };
            if !contains_wildcards(path) {
                files.push(File::new(path, Arc::clone(source)));
                continue;
            }
            match self.expand(path) {
                Ok(paths) => {
                    let remaining = self.files_limit - files.len();
                    files.extend(
                        paths
                            .into_iter()
                            .take(remaining)
                            .map(|path| File::new(path, Arc::clone(source))),
                    );
                }
                Err(err) => {
                    log::error!("{}", err);
                    source.status().error(err);
                }
            }
        }

        if files.len() == self.files_limit {
            log::warn!(
                "Reached the limit on the maximum number of files in use: {}",
                self.files_limit
            );
        }

        files
    }

    fn expand(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let entries = glob::glob(pattern).map_err(|source| Error::MalformedPattern {
            pattern: pattern.to_owned(),
            source,
        })?;
        let paths: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(err) => {
                    log::debug!("skipping unreadable path while expanding `{}`: {}", pattern, err);
                    None
                }
            })
            .collect();
        if paths.is_empty() {
            return Err(Error::NoMatch {
                pattern: pattern.to_owned(),
            });
        }

        Ok(paths)
    }
}

fn contains_wildcards(path: &str) -> bool {
    path.contains(WILDCARDS)
}
