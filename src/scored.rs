use std::collections::BTreeMap;

use image::DynamicImage;
use tracing::instrument;

use crate::{
    engine::{OcrEngine, RecognitionParams},
    EngineError, OcrWord, Result, ScoredOcrResult,
};

/// Word filters applied when reducing engine output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WordThresholds {
    /// Words must score strictly above this to appear in the text.
    pub min_confidence: f32,
    /// Shorter words never count towards the aggregate confidence.
    pub min_len: usize,
    /// Below this many qualifying words the aggregate confidence is 0.
    pub min_count: usize,
}

impl Default for WordThresholds {
    fn default() -> Self {
        Self {
            min_confidence: 60.0,
            min_len: 3,
            min_count: 3,
        }
    }
}

/// Runs an [`OcrEngine`] once per call and reduces its words into a
/// [`ScoredOcrResult`].
#[derive(Debug, Clone)]
pub struct ScoredOcr<E> {
    engine: E,
    params: RecognitionParams,
    thresholds: WordThresholds,
}

impl<E: OcrEngine> ScoredOcr<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            params: RecognitionParams::default(),
            thresholds: WordThresholds::default(),
        }
    }

    pub fn params(mut self, params: RecognitionParams) -> Self {
        self.params = params;
        self
    }

    pub fn thresholds(mut self, thresholds: WordThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate(&self.params)
    }

    /// Engine failures are returned as-is, there are no retries.
    #[instrument(level = "trace", skip(self, image))]
    pub fn invoke(&self, image: &DynamicImage) -> Result<ScoredOcrResult, EngineError> {
        let words = self.engine.recognize(image, &self.params)?;
        Ok(reduce_words(&words, &self.thresholds))
    }
}

/// Reassembles confident words into lines and averages their confidence.
///
/// Words above `min_confidence` are joined with spaces per line and lines with
/// newlines in ascending line order. The aggregate confidence only covers
/// confident words of at least `min_len` characters and is 0 when fewer than
/// `min_count` of those exist. `word_count` counts every reported word.
pub fn reduce_words(words: &[OcrWord], thresholds: &WordThresholds) -> ScoredOcrResult {
    let mut lines = BTreeMap::<usize, Vec<&str>>::new();
    let mut confidences = Vec::new();
    for word in words
        .iter()
        .filter(|word| word.confidence > thresholds.min_confidence)
    {
        lines.entry(word.line).or_default().push(&word.text);
        if word.text.chars().count() >= thresholds.min_len {
            confidences.push(word.confidence);
        }
    }

    let text = lines
        .values()
        .map(|line| line.join(" "))
        .collect::<Vec<_>>()
        .join("\n");
    let confidence = if confidences.is_empty() || confidences.len() < thresholds.min_count {
        0.0
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32
    };

    ScoredOcrResult {
        text,
        confidence,
        word_count: words.len(),
    }
}
