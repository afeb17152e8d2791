use std::path::{Path, PathBuf};

use image::{DynamicImage, Rgba};
use tracing::instrument;

use crate::{
    engine::OcrEngine, util::rotate_expanded, EngineError, Error, OrientationResult, Result,
    ScoredOcr, ScoredOcrResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrientationMode {
    /// One trial at 0°.
    None,
    /// Coarse angles only.
    #[default]
    Basic,
    /// Coarse angles, then a hill-climb around the winner.
    Fine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoarseAngles {
    #[default]
    Quadrants,
    /// Quadrants followed by 45°, 135° and 315°.
    Extended,
}

impl CoarseAngles {
    pub fn angles(&self) -> &'static [i32] {
        match self {
            CoarseAngles::Quadrants => &[0, 90, 180, 270],
            CoarseAngles::Extended => &[0, 90, 180, 270, 45, 135, 315],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scoring {
    /// Aggregate OCR confidence.
    Confidence,
    /// Confidence times word count over the largest word count seen so far
    /// in the run, so near-empty readings cannot win on a few lucky words.
    #[default]
    LengthNormalized,
}

#[derive(Debug, Clone, Copy)]
pub struct OrientationOptions {
    pub mode: OrientationMode,
    pub coarse: CoarseAngles,
    pub scoring: Scoring,
    /// A coarse trial at or above this confidence ends the coarse phase.
    pub high_confidence: f32,
    /// Degrees per fine step.
    pub fine_step: u32,
    /// Trial budget of each fine direction.
    pub max_fine_steps: u32,
    /// Fill for canvas uncovered by rotation.
    pub background: Rgba<u8>,
}

impl Default for OrientationOptions {
    fn default() -> Self {
        Self {
            mode: OrientationMode::Basic,
            coarse: CoarseAngles::Quadrants,
            scoring: Scoring::LengthNormalized,
            high_confidence: 95.0,
            fine_step: 1,
            max_fine_steps: 20,
            background: Rgba([255, 255, 255, 255]),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Scorer {
    scoring: Scoring,
    max_word_count: usize,
}

impl Scorer {
    fn new(scoring: Scoring) -> Self {
        Self {
            scoring,
            max_word_count: 0,
        }
    }

    fn score(&mut self, result: &ScoredOcrResult) -> f64 {
        match self.scoring {
            Scoring::Confidence => result.confidence as f64,
            Scoring::LengthNormalized => {
                self.max_word_count = self.max_word_count.max(result.word_count);
                if self.max_word_count == 0 {
                    0.0
                } else {
                    result.confidence as f64 * result.word_count as f64
                        / self.max_word_count as f64
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn sign(self) -> i32 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

/// State of the fine-phase hill-climb.
///
/// A plain value: [`FineSearch::next_angle`] says which angle to try and
/// [`FineSearch::advance`] folds that trial's score in, returning the next
/// state. The climb walks forward from the origin while scores strictly
/// improve and stops at the first trial that does not. If the forward walk
/// never improved, it restarts backward from the origin. Each direction gets
/// `max_steps` trials.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FineSearch {
    step: i32,
    max_steps: u32,
    best_angle: i32,
    best_score: f64,
    direction: Direction,
    taken: u32,
    improved: u32,
    trials: u32,
    done: bool,
}

impl FineSearch {
    pub fn new(origin: i32, score: f64, step: u32, max_steps: u32) -> Self {
        Self {
            step: step as i32,
            max_steps,
            best_angle: origin,
            best_score: score,
            direction: Direction::Forward,
            taken: 0,
            improved: 0,
            trials: 0,
            done: step == 0 || max_steps == 0,
        }
    }

    pub fn next_angle(&self) -> Option<i32> {
        if self.done {
            None
        } else {
            Some(self.best_angle + self.direction.sign() * self.step)
        }
    }

    /// Applies the result of trying [`Self::next_angle`]. `None` marks a
    /// failed trial and counts as no improvement.
    #[must_use]
    pub fn advance(self, score: Option<f64>) -> Self {
        let Some(angle) = self.next_angle() else {
            return self;
        };
        let mut next = Self {
            taken: self.taken + 1,
            trials: self.trials + 1,
            ..self
        };
        match score {
            Some(score) if score > self.best_score => {
                next.best_angle = angle;
                next.best_score = score;
                next.improved += 1;
                if next.taken >= next.max_steps {
                    next.finish_direction()
                } else {
                    next
                }
            }
            _ => next.finish_direction(),
        }
    }

    fn finish_direction(self) -> Self {
        if self.direction == Direction::Forward && self.improved == 0 {
            Self {
                direction: Direction::Backward,
                taken: 0,
                ..self
            }
        } else {
            Self { done: true, ..self }
        }
    }

    pub fn best_angle(&self) -> i32 {
        self.best_angle
    }

    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn trials(&self) -> u32 {
        self.trials
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

struct Trial {
    angle: i32,
    score: f64,
    result: ScoredOcrResult,
}

/// Saves every rotated trial image as `angle_{angle}.png` and its reading
/// as `ocr_angle_{angle}.json`. Write failures are logged, never returned.
fn dump_trial(
    dir: &Path,
    angle: i32,
    image: &DynamicImage,
    result: &Result<ScoredOcrResult, EngineError>,
) {
    let image_path = dir.join(format!("angle_{angle}.png"));
    if let Err(err) = image.save(&image_path) {
        log::warn!("Failed to save trial image {}: {err}", image_path.display());
    }
    let Ok(result) = result else {
        return;
    };
    let json_path = dir.join(format!("ocr_angle_{angle}.json"));
    let written = serde_json::to_vec_pretty(result)
        .map_err(std::io::Error::from)
        .and_then(|json| std::fs::write(&json_path, json));
    if let Err(err) = written {
        log::warn!("Failed to save trial reading {}: {err}", json_path.display());
    }
}

/// Finds the rotation that reads best, judged only by OCR feedback.
///
/// Holds no per-page state, one instance can serve any number of pages.
#[derive(Debug, Clone, Default)]
pub struct OrientationOptimizer {
    options: OrientationOptions,
    debug_dir: Option<PathBuf>,
}

impl OrientationOptimizer {
    pub fn new(options: OrientationOptions) -> Self {
        Self {
            options,
            debug_dir: None,
        }
    }

    /// Dump each trial of [`Self::optimize`] into `dir`. Files of a later
    /// run overwrite those of an earlier one.
    pub fn debug_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_dir = dir;
        self
    }

    pub fn options(&self) -> &OrientationOptions {
        &self.options
    }

    /// Rotates `image` for every trial and reads it with `ocr`. Parameters the
    /// engine rejects fail here, before the first trial.
    #[instrument(skip(self, image, ocr))]
    pub fn optimize<E: OcrEngine>(
        &self,
        image: &DynamicImage,
        ocr: &ScoredOcr<E>,
    ) -> Result<OrientationResult> {
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::InvalidInput(format!(
                "image is {}x{}",
                image.width(),
                image.height()
            )));
        }
        ocr.validate()?;

        let background = self.options.background;
        let debug_dir = self.debug_dir.as_deref().filter(|dir| {
            std::fs::create_dir_all(dir)
                .map_err(|err| log::warn!("Failed to create {}: {err}", dir.display()))
                .is_ok()
        });
        self.search(|angle| {
            let rotated = rotate_expanded(image, angle, background);
            let result = ocr.invoke(&rotated);
            if let Some(dir) = debug_dir {
                dump_trial(dir, angle, &rotated, &result);
            }
            result
        })
    }

    /// Runs the angle search against an arbitrary trial function.
    ///
    /// Failed trials are logged and skipped. Only when no coarse trial
    /// succeeds does the search fail, with [`Error::NoValidOrientation`].
    pub fn search<F>(&self, mut trial: F) -> Result<OrientationResult>
    where
        F: FnMut(i32) -> Result<ScoredOcrResult, EngineError>,
    {
        let OrientationOptions {
            mode,
            coarse,
            scoring,
            high_confidence,
            fine_step,
            max_fine_steps,
            ..
        } = self.options;
        let mut scorer = Scorer::new(scoring);
        let angles: &[i32] = match mode {
            OrientationMode::None => &[0],
            _ => coarse.angles(),
        };

        let mut best: Option<Trial> = None;
        let mut failures = Vec::new();
        for &angle in angles {
            let result = match trial(angle) {
                Ok(result) => result,
                Err(err) => {
                    log::warn!("OCR trial at {angle}° failed: {err}");
                    failures.push(err);
                    continue;
                }
            };
            let score = scorer.score(&result);
            log::debug!(
                "Coarse trial at {angle}°: confidence={}, words={}, score={score}",
                result.confidence,
                result.word_count
            );
            let confident = result.confidence >= high_confidence;
            if best.as_ref().map_or(true, |best| score > best.score) {
                best = Some(Trial {
                    angle,
                    score,
                    result,
                });
            }
            if confident {
                log::debug!("Confidence reached {high_confidence} at {angle}°, ending coarse phase");
                break;
            }
        }

        let Some(mut best) = best else {
            let attempted = failures.len();
            return match failures.pop() {
                Some(source) => Err(Error::NoValidOrientation { attempted, source }),
                None => Err(Error::InvalidInput("no angles to try".to_string())),
            };
        };
        log::debug!(
            "Coarse orientation result: angle={}°, score={}",
            best.angle,
            best.score
        );

        if mode == OrientationMode::Fine {
            let mut search = FineSearch::new(best.angle, best.score, fine_step, max_fine_steps);
            while let Some(angle) = search.next_angle() {
                let score = match trial(angle) {
                    Ok(result) => {
                        let score = scorer.score(&result);
                        log::debug!(
                            "Fine trial at {angle}°: confidence={}, words={}, score={score}",
                            result.confidence,
                            result.word_count
                        );
                        if score > search.best_score() {
                            best = Trial {
                                angle,
                                score,
                                result,
                            };
                        }
                        Some(score)
                    }
                    Err(err) => {
                        log::warn!("OCR trial at {angle}° failed: {err}");
                        None
                    }
                };
                search = search.advance(score);
            }
            log::trace!("Fine phase finished after {} trials", search.trials());
        }

        log::info!(
            "Orientation result: angle={}°, score={}",
            best.angle,
            best.score
        );
        Ok(OrientationResult {
            angle: best.angle,
            text: best.result.text,
            score: best.score,
            confidence: best.result.confidence,
        })
    }
}
