use std::process::ExitStatus;

use thiserror::Error;

/// Failure of a single OCR engine invocation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start OCR engine `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("OCR engine exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
    #[error("malformed OCR engine output: {0}")]
    Malformed(String),
    #[error("failed to parse OCR engine output")]
    Tsv(#[from] csv::Error),
    #[error("failed to encode image for OCR engine")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Runtime(#[from] ort::Error),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// No trial of the search produced a usable OCR result. Distinct from a
    /// search that settled on 0° with a low score.
    #[error("no valid orientation found after {attempted} failed trials")]
    NoValidOrientation {
        attempted: usize,
        #[source]
        source: EngineError,
    },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
