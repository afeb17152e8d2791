use imageproc::point::Point;
use serde::Serialize;

/// Axis-aligned text region in page pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Whether `other` lies entirely inside `self`, edges included.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// Four-vertex polygon approximation of a contour, in contour order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quadrilateral {
    pub points: [Point<i32>; 4],
}

/// One word as reported by an OCR engine.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    /// 0-100.
    pub confidence: f32,
    pub line: usize,
}

/// Reduced form of a single OCR invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredOcrResult {
    pub text: String,
    pub confidence: f32,
    /// Every word the engine reported, including the ones dropped from `text`.
    pub word_count: usize,
}

/// Winning trial of an orientation search.
///
/// `score` is only meaningful for comparing angles of the same run, it is
/// not an OCR confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct OrientationResult {
    pub angle: i32,
    pub text: String,
    pub score: f64,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct RegionText {
    pub bounds: BoundingBox,
    pub orientation: Option<OrientationResult>,
}

#[derive(Debug, Clone)]
pub struct PageScan {
    pub regions: Vec<RegionText>,
    pub quadrilaterals: Vec<Quadrilateral>,
}

impl PageScan {
    pub fn text_lines(&self) -> Vec<String> {
        self.regions
            .iter()
            .filter_map(|region| region.orientation.as_ref())
            .flat_map(|result| result.text.lines())
            .map(|line| line.to_string())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    Recognized,
    Failed,
}

/// Per-page JSON record written by batch tools.
#[derive(Debug, Clone, Serialize)]
pub struct PageRecord {
    pub new_page: bool,
    pub number: usize,
    pub file: String,
    pub final_angle: i32,
    pub confidence: f64,
    pub text_lines: Vec<String>,
    pub status: PageStatus,
}

impl PageRecord {
    pub fn recognized(number: usize, file: impl Into<String>, result: &OrientationResult) -> Self {
        Self {
            new_page: true,
            number,
            file: file.into(),
            final_angle: result.angle,
            confidence: result.score,
            text_lines: result.text.lines().map(|it| it.to_string()).collect(),
            status: PageStatus::Recognized,
        }
    }

    /// Record for a page where no trial produced a usable result. Kept apart
    /// from a recognized page at 0° with low confidence.
    pub fn failed(number: usize, file: impl Into<String>) -> Self {
        Self {
            new_page: true,
            number,
            file: file.into(),
            final_angle: 0,
            confidence: 0.0,
            text_lines: Vec::new(),
            status: PageStatus::Failed,
        }
    }
}
