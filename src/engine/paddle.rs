use std::path::{Path, PathBuf};

use float_ord::FloatOrd;
use geo::{
    point, Area, BoundingRect, Contains, Coord, EuclideanLength, LineString, MinimumRotatedRect,
    Polygon, Scale,
};
use geo_clipper::{Clipper, EndType, JoinType};
use image::{imageops::FilterType, DynamicImage, GrayImage};
use imageproc::{
    contours::{find_contours, BorderType},
    distance_transform::Norm,
    morphology::dilate_mut,
};
use ndarray::{Array4, ArrayView2, Axis, Ix3, Ix4};
use ort::{inputs, ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{
    engine::{OcrEngine, RecognitionParams},
    util::crop_box,
    BoundingBox, EngineError, OcrWord,
};

const DET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const DET_STD: [f32; 3] = [0.229, 0.224, 0.225];
const REC_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
const REC_STD: [f32; 3] = [0.5, 0.5, 0.5];
const REC_HEIGHT: u32 = 48;
/// Vertical quantization used to put detected lines in reading order.
const LINE_BAND: u32 = 10;
const MIN_SIDE: f32 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "tensorrt")]
    TensorRT,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "tensorrt")]
    ExecutionProvider::TensorRT,
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];

fn dispatch(
    providers: &[ExecutionProvider],
    cache_path: Option<&Path>,
) -> Vec<ExecutionProviderDispatch> {
    #[cfg(not(feature = "tensorrt"))]
    let _ = cache_path;
    providers
        .iter()
        .filter_map(|provider| -> Option<ExecutionProviderDispatch> {
            match provider {
                ExecutionProvider::Default => None,
                #[cfg(feature = "tensorrt")]
                ExecutionProvider::TensorRT => {
                    let mut tensorrt = ort::TensorRTExecutionProvider::default()
                        .with_engine_cache(true)
                        .with_timing_cache(true);
                    if let Some(path) = cache_path {
                        tensorrt = tensorrt.with_engine_cache_path(path.to_string_lossy());
                    }
                    Some(tensorrt.build())
                }
                #[cfg(feature = "coreml")]
                ExecutionProvider::CoreML => {
                    Some(ort::CoreMLExecutionProvider::default().build())
                }
                #[cfg(feature = "cuda")]
                ExecutionProvider::Cuda => Some(ort::CUDAExecutionProvider::default().build()),
                #[cfg(feature = "directml")]
                ExecutionProvider::DirectML => {
                    Some(ort::DirectMLExecutionProvider::default().build())
                }
            }
        })
        .collect()
}

#[instrument(level = "debug", skip(providers))]
fn build_session(
    path: &Path,
    threads: usize,
    providers: &[ExecutionProvider],
    cache_path: Option<&Path>,
) -> ort::Result<Session> {
    #[cfg(feature = "directml")]
    let parallel = !providers.contains(&ExecutionProvider::DirectML);
    #[cfg(not(feature = "directml"))]
    let parallel = true;

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_memory_pattern(parallel)?
        .with_parallel_execution(parallel)?
        .with_inter_threads(threads)?
        .with_intra_threads(threads)?
        .with_execution_providers(dispatch(providers, cache_path))?
        .commit_from_file(path)?;
    log::debug!("Session inputs: {:?}", session.inputs);
    log::debug!("Session outputs: {:?}", session.outputs);
    Ok(session)
}

pub struct PaddleEngineBuilder {
    threads: usize,
    det_path: Option<PathBuf>,
    rec_paths: Option<(PathBuf, PathBuf)>,
    max_side_len: u32,
    box_threshold: f32,
    box_score_threshold: f32,
    unclip_ratio: f32,
    cache_path: Option<PathBuf>,
    execution_providers: Vec<ExecutionProvider>,
}

impl PaddleEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn det_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.det_path = Some(path.into());
        self
    }

    pub fn rec_model(
        mut self,
        model_path: impl Into<PathBuf>,
        keys_path: impl Into<PathBuf>,
    ) -> Self {
        self.rec_paths = Some((model_path.into(), keys_path.into()));
        self
    }

    pub fn max_side_len(mut self, max_side_len: u32) -> Self {
        self.max_side_len = max_side_len;
        self
    }

    pub fn box_threshold(mut self, threshold: f32) -> Self {
        self.box_threshold = threshold;
        self
    }

    pub fn box_score_threshold(mut self, threshold: f32) -> Self {
        self.box_score_threshold = threshold;
        self
    }

    pub fn unclip_ratio(mut self, ratio: f32) -> Self {
        self.unclip_ratio = ratio;
        self
    }

    pub fn with_engine_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = providers.into_iter().collect();
        self
    }

    #[instrument(skip(self))]
    pub fn build(self) -> Result<PaddleEngine, EngineError> {
        let det_path = self
            .det_path
            .unwrap_or_else(|| "models/ch_PP-OCRv4_det_infer/ch_PP-OCRv4_det_infer.onnx".into());
        let (rec_path, keys_path) = self.rec_paths.unwrap_or_else(|| {
            (
                "models/ch_PP-OCRv4_rec_infer/ch_PP-OCRv4_rec_infer.onnx".into(),
                "models/ppocr_keys_v1.txt".into(),
            )
        });
        let cache_path = self.cache_path.as_deref();

        let detector = build_session(
            &det_path,
            self.threads,
            &self.execution_providers,
            cache_path,
        )?;
        let recognizer = build_session(
            &rec_path,
            self.threads,
            &self.execution_providers,
            cache_path,
        )?;

        // index 0 is the CTC blank, the trailing entry is the space character
        let keys = std::fs::read_to_string(&keys_path)?;
        let keys = std::iter::once("#".to_string())
            .chain(keys.lines().map(|line| line.to_string()))
            .chain(std::iter::once(" ".to_string()))
            .collect();

        Ok(PaddleEngine {
            detector,
            recognizer,
            keys,
            max_side_len: self.max_side_len,
            box_threshold: self.box_threshold,
            box_score_threshold: self.box_score_threshold,
            unclip_ratio: self.unclip_ratio,
        })
    }
}

impl Default for PaddleEngineBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            det_path: None,
            rec_paths: None,
            max_side_len: 1024,
            box_threshold: 0.3,
            box_score_threshold: 0.5,
            unclip_ratio: 1.6,
            cache_path: None,
            execution_providers: DEFAULT_PROVIDERS.to_vec(),
        }
    }
}

/// PP-OCR detection and recognition models run through ONNX Runtime.
///
/// Each detected text line becomes one engine line; its recognized characters
/// are split into words at spaces, with the mean character probability as the
/// word confidence. Language and segmentation mode are fixed by the models.
pub struct PaddleEngine {
    detector: Session,
    recognizer: Session,
    keys: Vec<String>,
    max_side_len: u32,
    box_threshold: f32,
    box_score_threshold: f32,
    unclip_ratio: f32,
}

impl OcrEngine for PaddleEngine {
    #[instrument(level = "debug", skip(self, image))]
    fn recognize(
        &self,
        image: &DynamicImage,
        _params: &RecognitionParams,
    ) -> Result<Vec<OcrWord>, EngineError> {
        let mut lines = self
            .text_boxes(image)?
            .iter()
            .filter_map(|rect| rect_bounds(rect))
            .collect::<Vec<_>>();
        lines.sort_by_key(|it| (it.y / LINE_BAND, it.x));

        let mut words = Vec::new();
        for (line, bounds) in lines.iter().enumerate() {
            let part = crop_box(image, bounds);
            if part.width() == 0 || part.height() == 0 {
                continue;
            }
            let characters = self.text_line(&part)?;
            words.extend(split_words(&characters, line));
        }
        Ok(words)
    }
}

impl PaddleEngine {
    #[instrument(level = "trace", skip(self, image))]
    fn text_boxes(&self, image: &DynamicImage) -> Result<Vec<Polygon<f32>>, EngineError> {
        let (width, height) = detection_size(image.width(), image.height(), self.max_side_len);
        let resized = image.resize_exact(width, height, FilterType::Nearest);
        let outputs = self
            .detector
            .run(inputs!["x" => to_tensor(&resized, &DET_MEAN, &DET_STD)]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| EngineError::Malformed("detection model has no output".into()))?;
        let probabilities = output
            .try_extract_tensor::<f32>()?
            .to_owned()
            .into_dimensionality::<Ix4>()
            .map_err(|err| EngineError::Malformed(err.to_string()))?
            .index_axis_move(Axis(0), 0)
            .index_axis_move(Axis(0), 0);

        let mut mask = binarize(probabilities.view(), self.box_threshold);
        dilate_mut(&mut mask, Norm::L1, 2);

        let factor_x = image.width() as f32 / width as f32;
        let factor_y = image.height() as f32 / height as f32;
        let boxes = find_contours::<i32>(&mask)
            .into_iter()
            .filter(|it| it.border_type == BorderType::Outer && it.points.len() > 2)
            .filter_map(|it| {
                let outline = Polygon::new(
                    LineString::new(
                        it.points
                            .iter()
                            .map(|p| Coord {
                                x: p.x as f32,
                                y: p.y as f32,
                            })
                            .collect(),
                    ),
                    vec![],
                );
                outline.minimum_rotated_rect()
            })
            .filter(|rect| longest_side(rect) >= MIN_SIDE)
            .filter(|rect| mean_probability(rect, probabilities.view()) >= self.box_score_threshold)
            .filter_map(|rect| unclip(&rect, self.unclip_ratio))
            .filter(|rect| longest_side(rect) >= MIN_SIDE + 2.0)
            .map(|rect| rect.scale_around_point(factor_x, factor_y, Coord::zero()))
            .collect::<Vec<_>>();
        log::debug!("Detected {} text lines", boxes.len());
        Ok(boxes)
    }

    /// Greedy CTC decoding of one line image into `(character, probability)`.
    #[instrument(level = "trace", skip(self, image))]
    fn text_line(&self, image: &DynamicImage) -> Result<Vec<(String, f32)>, EngineError> {
        let scale = REC_HEIGHT as f32 / image.height() as f32;
        let width = ((image.width() as f32 * scale) as u32).clamp(1, u16::MAX as u32);
        let resized = image.resize_exact(width, REC_HEIGHT, FilterType::Nearest);

        let outputs = self
            .recognizer
            .run(inputs!["x" => to_tensor(&resized, &REC_MEAN, &REC_STD)]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| EngineError::Malformed("recognition model has no output".into()))?;
        let steps = output.try_extract_tensor::<f32>()?;
        let steps = steps
            .into_dimensionality::<Ix3>()
            .map_err(|err| EngineError::Malformed(err.to_string()))?;
        log::trace!("Recognition output shape: {:?}", steps.dim());

        let mut previous = 0;
        let mut characters = Vec::new();
        for step in steps.index_axis(Axis(0), 0).outer_iter() {
            let Some((index, score)) = step
                .iter()
                .enumerate()
                .max_by_key(|(_, score)| FloatOrd(**score))
            else {
                continue;
            };
            if index != 0 && index != previous && index < self.keys.len() {
                characters.push((self.keys[index].clone(), *score));
            }
            previous = index;
        }
        Ok(characters)
    }
}

/// Model input size: longest side capped at `max_side_len`, both sides
/// floored to a multiple of 32.
fn detection_size(width: u32, height: u32, max_side_len: u32) -> (u32, u32) {
    let longest = width.max(height).max(1);
    let ratio = if max_side_len > 0 && longest > max_side_len {
        max_side_len as f32 / longest as f32
    } else {
        1.0
    };
    let round = |side: u32| (((side as f32 * ratio) as u32) / 32 * 32).max(32);
    (round(width), round(height))
}

fn to_tensor(image: &DynamicImage, mean: &[f32; 3], std: &[f32; 3]) -> Array4<f32> {
    let image = image.to_rgb32f();
    Array4::from_shape_fn(
        (1, 3, image.height() as usize, image.width() as usize),
        |(_, channel, y, x)| {
            (image.get_pixel(x as u32, y as u32).0[channel] - mean[channel]) / std[channel]
        },
    )
}

fn binarize(probabilities: ArrayView2<f32>, threshold: f32) -> GrayImage {
    let (height, width) = probabilities.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        if probabilities[[y as usize, x as usize]] > threshold {
            image::Luma([255])
        } else {
            image::Luma([0])
        }
    })
}

fn longest_side(rect: &Polygon<f32>) -> f32 {
    rect.exterior()
        .lines()
        .map(|line| line.euclidean_length())
        .fold(0.0, f32::max)
}

/// Mean probability of the pixels inside `rect`.
fn mean_probability(rect: &Polygon<f32>, probabilities: ArrayView2<f32>) -> f32 {
    let Some(bounds) = rect.bounding_rect() else {
        return 0.0;
    };
    let (height, width) = probabilities.dim();
    let clamp = |value: f32, limit: usize| (value.max(0.0) as usize).min(limit);
    let (x0, x1) = (clamp(bounds.min().x, width), clamp(bounds.max().x, width));
    let (y0, y1) = (clamp(bounds.min().y, height), clamp(bounds.max().y, height));

    let (sum, count) = (y0..y1)
        .flat_map(|y| (x0..x1).map(move |x| (x, y)))
        .filter(|(x, y)| rect.contains(&point! { x: *x as f32, y: *y as f32 }))
        .fold((0.0, 0usize), |(sum, count), (x, y)| {
            (sum + probabilities[[y, x]], count + 1)
        });
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// Grows a shrunk detection back out by `area * ratio / perimeter`.
fn unclip(rect: &Polygon<f32>, ratio: f32) -> Option<Polygon<f32>> {
    let perimeter = rect.exterior().euclidean_length();
    if perimeter <= 0.0 {
        return None;
    }
    let distance = rect.unsigned_area() * ratio / perimeter;
    let grown = rect.offset(distance, JoinType::Round(0.25), EndType::ClosedPolygon, 1.0);
    if grown.0.is_empty() {
        None
    } else {
        grown.minimum_rotated_rect()
    }
}

fn rect_bounds(rect: &Polygon<f32>) -> Option<BoundingBox> {
    let bounds = rect.bounding_rect()?;
    let x = bounds.min().x.max(0.0);
    let y = bounds.min().y.max(0.0);
    Some(BoundingBox::new(
        x as u32,
        y as u32,
        (bounds.max().x - x).max(0.0) as u32,
        (bounds.max().y - y).max(0.0) as u32,
    ))
}

fn split_words(characters: &[(String, f32)], line: usize) -> Vec<OcrWord> {
    let mut words = Vec::new();
    let mut text = String::new();
    let mut scores = Vec::new();
    let mut flush = |text: &mut String, scores: &mut Vec<f32>| {
        if !text.is_empty() {
            let confidence = scores.iter().sum::<f32>() / scores.len() as f32 * 100.0;
            words.push(OcrWord {
                text: std::mem::take(text),
                confidence,
                line,
            });
        }
        scores.clear();
    };
    for (character, score) in characters {
        if character.trim().is_empty() {
            flush(&mut text, &mut scores);
        } else {
            text.push_str(character);
            scores.push(*score);
        }
    }
    flush(&mut text, &mut scores);
    words
}
