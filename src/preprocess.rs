use image::{imageops, DynamicImage, GrayImage};
use imageproc::{
    contrast::{otsu_level, threshold, ThresholdType},
    distance_transform::Norm,
    edges::canny,
    filter::{gaussian_blur_f32, median_filter, sharpen3x3},
    morphology::{close, dilate, erode, open},
};
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterStage {
    MedianBlur { radius: u32 },
    GaussianBlur { sigma: f32 },
    /// Pixels above `level` become foreground (255), or background if `invert`.
    Threshold { level: u8, invert: bool },
    /// Threshold at the Otsu level of the current image.
    Otsu { invert: bool },
    Dilate { radius: u8 },
    Erode { radius: u8 },
    Open { radius: u8 },
    Close { radius: u8 },
    Canny { low: f32, high: f32 },
    Sharpen,
    Invert,
}

impl FilterStage {
    pub fn name(&self) -> &'static str {
        match self {
            FilterStage::MedianBlur { .. } => "median-blur",
            FilterStage::GaussianBlur { .. } => "gaussian-blur",
            FilterStage::Threshold { .. } => "threshold",
            FilterStage::Otsu { .. } => "otsu",
            FilterStage::Dilate { .. } => "dilate",
            FilterStage::Erode { .. } => "erode",
            FilterStage::Open { .. } => "open",
            FilterStage::Close { .. } => "close",
            FilterStage::Canny { .. } => "canny",
            FilterStage::Sharpen => "sharpen",
            FilterStage::Invert => "invert",
        }
    }

    pub fn apply(&self, image: &GrayImage) -> GrayImage {
        let binary = |invert: bool| {
            if invert {
                ThresholdType::BinaryInverted
            } else {
                ThresholdType::Binary
            }
        };
        match *self {
            FilterStage::MedianBlur { radius } => median_filter(image, radius, radius),
            FilterStage::GaussianBlur { sigma } => gaussian_blur_f32(image, sigma),
            FilterStage::Threshold { level, invert } => threshold(image, level, binary(invert)),
            FilterStage::Otsu { invert } => threshold(image, otsu_level(image), binary(invert)),
            FilterStage::Dilate { radius } => dilate(image, Norm::LInf, radius),
            FilterStage::Erode { radius } => erode(image, Norm::LInf, radius),
            FilterStage::Open { radius } => open(image, Norm::LInf, radius),
            FilterStage::Close { radius } => close(image, Norm::LInf, radius),
            FilterStage::Canny { low, high } => canny(image, low, high),
            FilterStage::Sharpen => sharpen3x3(image),
            FilterStage::Invert => {
                let mut inverted = image.clone();
                imageops::invert(&mut inverted);
                inverted
            }
        }
    }
}

/// Converts a page to grayscale, then runs its stages in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Preprocessor {
    stages: Vec<FilterStage>,
}

impl Preprocessor {
    pub fn new(stages: impl IntoIterator<Item = FilterStage>) -> Self {
        Self {
            stages: stages.into_iter().collect(),
        }
    }

    /// Dark text on a light page to a mask where each text block is one
    /// bright blob.
    pub fn layout() -> Self {
        Self::new([
            FilterStage::MedianBlur { radius: 2 },
            FilterStage::Otsu { invert: true },
            FilterStage::Dilate { radius: 7 },
        ])
    }

    pub fn then(mut self, stage: FilterStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    #[instrument(level = "debug", skip(self, image))]
    pub fn apply(&self, image: &DynamicImage) -> GrayImage {
        self.stages
            .iter()
            .fold(image.to_luma8(), |image, stage| {
                log::trace!("Applying {} to {}x{} image", stage.name(), image.width(), image.height());
                stage.apply(&image)
            })
    }
}
