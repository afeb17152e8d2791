//! Layout and orientation engine for scanned document pages.
//!
//! A binarized page goes through [`RegionDetector`] for reading-ordered text
//! blocks, and each page or block goes through [`OrientationOptimizer`], which
//! picks the rotation whose OCR reading scores best. OCR itself is behind the
//! [`OcrEngine`] trait.

pub mod engine;
mod error;
pub mod orientation;
pub mod preprocess;
pub mod regions;
mod result;
mod scored;
pub mod util;

use std::path::PathBuf;

use image::DynamicImage;
use tracing::instrument;

pub use engine::{OcrEngine, RecognitionParams};
pub use error::*;
pub use orientation::{
    CoarseAngles, FineSearch, OrientationMode, OrientationOptimizer, OrientationOptions, Scoring,
};
pub use preprocess::{FilterStage, Preprocessor};
pub use regions::{RegionCandidates, RegionDetector, RegionOptions};
pub use result::*;
pub use scored::{reduce_words, ScoredOcr, WordThresholds};

use util::crop_box;

pub struct PageScannerBuilder<E> {
    engine: E,
    preprocessor: Preprocessor,
    region_options: RegionOptions,
    orientation_options: OrientationOptions,
    params: RecognitionParams,
    thresholds: WordThresholds,
    per_region: bool,
    debug_dir: Option<PathBuf>,
}

impl<E: OcrEngine> PageScannerBuilder<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            preprocessor: Preprocessor::layout(),
            region_options: RegionOptions::default(),
            orientation_options: OrientationOptions::default(),
            params: RecognitionParams::default(),
            thresholds: WordThresholds::default(),
            per_region: false,
            debug_dir: None,
        }
    }

    pub fn preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn region_options(mut self, options: RegionOptions) -> Self {
        self.region_options = options;
        self
    }

    pub fn orientation_options(mut self, options: OrientationOptions) -> Self {
        self.orientation_options = options;
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.params.language = language.into();
        self
    }

    pub fn page_segmentation_mode(mut self, psm: u8) -> Self {
        self.params.page_segmentation_mode = psm;
        self
    }

    pub fn engine_config(mut self, config: impl Into<String>) -> Self {
        self.params.config = config.into();
        self
    }

    pub fn word_thresholds(mut self, thresholds: WordThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Orient and read every detected block on its own instead of the page
    /// as a whole.
    pub fn per_region(mut self, per_region: bool) -> Self {
        self.per_region = per_region;
        self
    }

    /// Save every rotated trial image and its OCR reading into `dir`.
    pub fn debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> PageScanner<E> {
        PageScanner {
            ocr: ScoredOcr::new(self.engine)
                .params(self.params)
                .thresholds(self.thresholds),
            preprocessor: self.preprocessor,
            detector: RegionDetector::new(self.region_options),
            optimizer: OrientationOptimizer::new(self.orientation_options)
                .debug_dir(self.debug_dir),
            per_region: self.per_region,
        }
    }
}

/// One page at a time: clean up, find blocks, orient, read. Holds no
/// per-page state and does no file I/O.
pub struct PageScanner<E> {
    ocr: ScoredOcr<E>,
    preprocessor: Preprocessor,
    detector: RegionDetector,
    optimizer: OrientationOptimizer,
    per_region: bool,
}

impl<E: OcrEngine> PageScanner<E> {
    pub fn builder(engine: E) -> PageScannerBuilder<E> {
        PageScannerBuilder::new(engine)
    }

    pub fn regions(&self, page: &DynamicImage) -> RegionCandidates {
        self.detector.detect(&self.preprocessor.apply(page))
    }

    pub fn orient(&self, image: &DynamicImage) -> Result<OrientationResult> {
        self.optimizer.optimize(image, &self.ocr)
    }

    /// Blocks that no angle could read keep `orientation: None`; in whole
    /// page mode that failure is returned instead.
    #[instrument(skip(self, page))]
    pub fn scan(&self, page: &DynamicImage) -> Result<PageScan> {
        if page.width() == 0 || page.height() == 0 {
            return Err(Error::InvalidInput(format!(
                "page is {}x{}",
                page.width(),
                page.height()
            )));
        }
        let RegionCandidates {
            boxes,
            quadrilaterals,
        } = self.regions(page);
        log::debug!(
            "Page has {} text blocks and {} quadrilaterals",
            boxes.len(),
            quadrilaterals.len()
        );

        let regions = if self.per_region {
            boxes
                .into_iter()
                .map(|bounds| {
                    let part = crop_box(page, &bounds);
                    let orientation = match self.orient(&part) {
                        Ok(result) => Some(result),
                        Err(err @ Error::NoValidOrientation { .. }) => {
                            log::warn!("Block {bounds:?} could not be read: {err}");
                            None
                        }
                        Err(err) => return Err(err),
                    };
                    Ok(RegionText {
                        bounds,
                        orientation,
                    })
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![RegionText {
                bounds: BoundingBox::new(0, 0, page.width(), page.height()),
                orientation: Some(self.orient(page)?),
            }]
        };

        Ok(PageScan {
            regions,
            quadrilaterals,
        })
    }

    /// Reads a whole page into its output record. A page no angle could read
    /// becomes a `failed` record rather than an error.
    #[instrument(skip(self, page))]
    pub fn record(
        &self,
        number: usize,
        file: &str,
        page: &DynamicImage,
    ) -> Result<PageRecord> {
        match self.orient(page) {
            Ok(result) => Ok(PageRecord::recognized(number, file, &result)),
            Err(err @ Error::NoValidOrientation { .. }) => {
                log::warn!("Page {number} ({file}) could not be read: {err}");
                Ok(PageRecord::failed(number, file))
            }
            Err(err) => Err(err),
        }
    }
}
