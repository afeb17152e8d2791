use image::DynamicImage;

use crate::{EngineError, OcrWord, Result};

mod paddle;
mod tesseract;

pub use paddle::{ExecutionProvider, PaddleEngine, PaddleEngineBuilder};
pub use tesseract::{parse_tsv, Tesseract};

/// Engine-facing parameters of one recognition call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionParams {
    pub language: String,
    pub page_segmentation_mode: u8,
    /// Extra engine arguments, whitespace separated.
    pub config: String,
}

impl Default for RecognitionParams {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            page_segmentation_mode: 6,
            config: String::new(),
        }
    }
}

pub trait OcrEngine {
    /// Runs recognition once. Words come back in engine order, each tagged
    /// with the line it belongs to.
    fn recognize(
        &self,
        image: &DynamicImage,
        params: &RecognitionParams,
    ) -> Result<Vec<OcrWord>, EngineError>;

    /// Rejects parameters the engine can never honour, before any image is
    /// sent to it.
    fn validate(&self, _params: &RecognitionParams) -> Result<()> {
        Ok(())
    }
}

impl<T: OcrEngine + ?Sized> OcrEngine for &T {
    fn recognize(
        &self,
        image: &DynamicImage,
        params: &RecognitionParams,
    ) -> Result<Vec<OcrWord>, EngineError> {
        (**self).recognize(image, params)
    }

    fn validate(&self, params: &RecognitionParams) -> Result<()> {
        (**self).validate(params)
    }
}

impl<T: OcrEngine + ?Sized> OcrEngine for Box<T> {
    fn recognize(
        &self,
        image: &DynamicImage,
        params: &RecognitionParams,
    ) -> Result<Vec<OcrWord>, EngineError> {
        (**self).recognize(image, params)
    }

    fn validate(&self, params: &RecognitionParams) -> Result<()> {
        (**self).validate(params)
    }
}
