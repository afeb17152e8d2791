use std::{
    path::{Path, PathBuf},
    process::Command,
};

use image::{DynamicImage, ImageFormat};
use serde::Deserialize;
use tracing::instrument;

use crate::{
    engine::{OcrEngine, RecognitionParams},
    EngineError, Error, OcrWord, Result,
};

/// TSV `level` of word rows; lower levels are page, block, paragraph and line.
const WORD_LEVEL: u32 = 5;

/// Runs the `tesseract` executable and reads its word-level TSV output.
#[derive(Debug, Clone)]
pub struct Tesseract {
    program: PathBuf,
    tessdata_dir: Option<PathBuf>,
}

impl Tesseract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn tessdata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tessdata_dir = Some(dir.into());
        self
    }

    /// Languages with a `.traineddata` file in the configured tessdata dir.
    pub fn available_languages(&self) -> Result<Vec<String>, EngineError> {
        let Some(dir) = &self.tessdata_dir else {
            return Ok(Vec::new());
        };
        let mut languages = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "traineddata"))
            .filter_map(|path| Some(path.file_stem()?.to_string_lossy().into_owned()))
            .collect::<Vec<_>>();
        languages.sort();
        Ok(languages)
    }

    /// Checks every `+`-joined language against the tessdata dir. Without a
    /// configured dir tesseract falls back to its own search path, which is
    /// not checked.
    pub fn validate_language(&self, language: &str) -> Result<()> {
        if self.tessdata_dir.is_none() {
            return Ok(());
        }
        let available = self.available_languages()?;
        match language
            .split('+')
            .find(|it| !available.iter().any(|known| known == it))
        {
            Some(missing) => Err(Error::InvalidInput(format!(
                "unknown OCR language `{missing}`, available: {}",
                available.join(", ")
            ))),
            None => Ok(()),
        }
    }

    fn command(&self, input: &Path, params: &RecognitionParams) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(input)
            .arg("stdout")
            .arg("--psm")
            .arg(params.page_segmentation_mode.to_string())
            .arg("-l")
            .arg(&params.language);
        if let Some(dir) = &self.tessdata_dir {
            command.arg("--tessdata-dir").arg(dir);
        }
        command.args(params.config.split_whitespace()).arg("tsv");
        command
    }
}

impl Default for Tesseract {
    fn default() -> Self {
        Self {
            program: "tesseract".into(),
            tessdata_dir: None,
        }
    }
}

impl OcrEngine for Tesseract {
    #[instrument(level = "trace", skip(self, image))]
    fn recognize(
        &self,
        image: &DynamicImage,
        params: &RecognitionParams,
    ) -> Result<Vec<OcrWord>, EngineError> {
        let input = tempfile::Builder::new()
            .prefix("scanorient-")
            .suffix(".png")
            .tempfile()?;
        image.save_with_format(input.path(), ImageFormat::Png)?;

        let mut command = self.command(input.path(), params);
        log::trace!("Running {command:?}");
        let output = command.output().map_err(|source| EngineError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        if !output.status.success() {
            return Err(EngineError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_tsv(&output.stdout)
    }

    fn validate(&self, params: &RecognitionParams) -> Result<()> {
        self.validate_language(&params.language)
    }
}

#[derive(Debug, Deserialize)]
struct TsvRow {
    level: u32,
    page_num: u32,
    block_num: u32,
    par_num: u32,
    line_num: u32,
    conf: f32,
    #[serde(default)]
    text: String,
}

/// Parses tesseract TSV output into words.
///
/// `line_num` restarts in every paragraph, so lines are numbered by the first
/// appearance of each `(page, block, paragraph, line)` tuple instead.
pub fn parse_tsv(data: &[u8]) -> Result<Vec<OcrWord>, EngineError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .from_reader(data);

    let mut lines = Vec::<(u32, u32, u32, u32)>::new();
    let mut words = Vec::new();
    for row in reader.deserialize::<TsvRow>() {
        let row = row?;
        if row.level != WORD_LEVEL {
            continue;
        }
        let key = (row.page_num, row.block_num, row.par_num, row.line_num);
        let line = match lines.iter().position(|it| *it == key) {
            Some(line) => line,
            None => {
                lines.push(key);
                lines.len() - 1
            }
        };
        words.push(OcrWord {
            text: row.text,
            confidence: row.conf,
            line,
        });
    }
    Ok(words)
}
