#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed pattern `{pattern}`, could not find any file: {source}")]
    MalformedPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("no file is matching pattern `{pattern}`, check directories permissions")]
    NoMatch { pattern: String },
}

pub type Result<T> = std::result::Result<T, Error>;
