use image::{DynamicImage, GenericImageView, GrayImage, Luma, RgbImage, Rgba};
use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};
use scanorient::{
    util::{padded_side, rotate_expanded},
    EngineError, FilterStage, OcrEngine, OcrWord, PageScanner, PageStatus, Preprocessor,
    RecognitionParams,
};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn dark_pixels(image: &DynamicImage) -> usize {
    image.to_luma8().pixels().filter(|it| it.0[0] < 128).count()
}

#[test]
fn quarter_turns_are_exact() {
    let mut image = GrayImage::from_pixel(4, 2, Luma([255]));
    image.put_pixel(0, 0, Luma([0]));
    let image = DynamicImage::ImageLuma8(image);

    assert_eq!(rotate_expanded(&image, 0, WHITE), image);
    assert_eq!(rotate_expanded(&image, 360, WHITE), image);

    let quarter = rotate_expanded(&image, 90, WHITE).to_luma8();
    assert_eq!(quarter.dimensions(), (2, 4));
    // counter-clockwise: the top-left corner ends up bottom-left
    assert_eq!(quarter.get_pixel(0, 3).0[0], 0);
    assert_eq!(rotate_expanded(&image, -270, WHITE).to_luma8(), quarter);

    let half = rotate_expanded(&image, 180, WHITE).to_luma8();
    assert_eq!(half.dimensions(), (4, 2));
    assert_eq!(half.get_pixel(3, 1).0[0], 0);
}

#[test]
fn arbitrary_rotation_keeps_every_pixel() {
    init();
    let image = DynamicImage::ImageLuma8(GrayImage::new(40, 20));
    for angle in [1, 17, 45, 133, -30] {
        let rotated = rotate_expanded(&image, angle, WHITE);
        let side = padded_side(40, 20);
        assert_eq!(rotated.dimensions(), (side, side), "angle {angle}");
        let dark = dark_pixels(&rotated) as f64;
        assert!((dark - 800.0).abs() < 80.0, "angle {angle}: {dark} dark pixels");
    }
}

#[test]
fn rotation_round_trip_keeps_content_centered() {
    let mut image = GrayImage::from_pixel(40, 20, Luma([255]));
    draw_filled_rect_mut(&mut image, Rect::at(10, 5).of_size(20, 10), Luma([0]));
    let image = DynamicImage::ImageLuma8(image);

    let there = rotate_expanded(&image, 30, WHITE);
    let back = rotate_expanded(&there, -30, WHITE).to_luma8();
    let side = padded_side(there.width(), there.height());
    assert_eq!(back.dimensions(), (side, side));
    assert!(back.get_pixel(side / 2, side / 2).0[0] < 128);

    let dark = back.pixels().filter(|it| it.0[0] < 128).count() as f64;
    assert!((dark - 200.0).abs() < 60.0, "{dark} dark pixels");
}

#[test]
fn colour_images_rotate_on_a_filled_canvas() {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(30, 10, image::Rgb([0, 0, 255])));
    let rotated = rotate_expanded(&image, 20, WHITE).to_rgba8();
    assert_eq!(rotated.get_pixel(0, 0), &WHITE);
    let centre = rotated.get_pixel(rotated.width() / 2, rotated.height() / 2);
    assert_eq!(centre.0[2], 255);
    assert!(centre.0[0] < 16);
}

#[test]
fn filter_stages_run_in_declared_order() {
    let page = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([150])));
    let threshold = FilterStage::Threshold {
        level: 100,
        invert: false,
    };

    let threshold_first = Preprocessor::new([threshold, FilterStage::Invert]);
    let invert_first = Preprocessor::new([FilterStage::Invert, threshold]);
    assert_eq!(threshold_first.apply(&page).get_pixel(3, 3).0[0], 0);
    assert_eq!(invert_first.apply(&page).get_pixel(3, 3).0[0], 255);

    let chained = Preprocessor::default()
        .then(FilterStage::Invert)
        .then(threshold);
    assert_eq!(chained.stages(), invert_first.stages());
    assert_eq!(
        chained.stages().iter().map(|it| it.name()).collect::<Vec<_>>(),
        vec!["invert", "threshold"]
    );
}

/// White page with two rows of dark "glyphs".
fn synthetic_page() -> DynamicImage {
    let mut page = RgbImage::from_pixel(400, 300, image::Rgb([255, 255, 255]));
    for (row_y, count) in [(30, 9), (170, 6)] {
        for i in 0..count {
            draw_filled_rect_mut(
                &mut page,
                Rect::at(40 + i * 10, row_y).of_size(7, 30),
                image::Rgb([0, 0, 0]),
            );
        }
    }
    DynamicImage::ImageRgb8(page)
}

struct FixedEngine {
    fail: bool,
}

impl OcrEngine for FixedEngine {
    fn recognize(
        &self,
        _image: &DynamicImage,
        _params: &RecognitionParams,
    ) -> Result<Vec<OcrWord>, EngineError> {
        if self.fail {
            return Err(EngineError::Malformed("engine down".into()));
        }
        Ok(vec![
            OcrWord {
                text: "Hello".into(),
                confidence: 97.0,
                line: 0,
            },
            OcrWord {
                text: "there".into(),
                confidence: 96.0,
                line: 0,
            },
            OcrWord {
                text: "world".into(),
                confidence: 98.0,
                line: 1,
            },
        ])
    }
}

#[test]
fn layout_preset_finds_text_blocks() {
    init();
    let scanner = PageScanner::builder(FixedEngine { fail: false }).build();
    let regions = scanner.regions(&synthetic_page());
    assert_eq!(regions.boxes.len(), 2, "{regions:?}");
    assert!(regions.boxes[0].y < regions.boxes[1].y);
    assert!(regions.boxes[0].width > regions.boxes[1].width);
}

#[test]
fn scan_reads_each_region() {
    init();
    let scanner = PageScanner::builder(FixedEngine { fail: false })
        .per_region(true)
        .build();
    let scan = scanner.scan(&synthetic_page()).expect("scan succeeds");
    assert_eq!(scan.regions.len(), 2);
    for region in &scan.regions {
        let orientation = region.orientation.as_ref().expect("region was read");
        assert_eq!(orientation.angle, 0);
        assert_eq!(orientation.text, "Hello there\nworld");
    }
    assert_eq!(scan.text_lines().len(), 4);
}

#[test]
fn scan_keeps_unreadable_regions() {
    init();
    let scanner = PageScanner::builder(FixedEngine { fail: true })
        .per_region(true)
        .build();
    let scan = scanner.scan(&synthetic_page()).expect("failures stay per region");
    assert_eq!(scan.regions.len(), 2);
    assert!(scan.regions.iter().all(|it| it.orientation.is_none()));
    assert!(scan.text_lines().is_empty());
}

#[test]
fn whole_page_scan_fails_when_nothing_reads() {
    init();
    let scanner = PageScanner::builder(FixedEngine { fail: true }).build();
    assert!(matches!(
        scanner.scan(&synthetic_page()),
        Err(scanorient::Error::NoValidOrientation { .. })
    ));
}

#[test]
fn page_records_distinguish_failure_from_low_confidence() {
    init();
    let page = synthetic_page();

    let record = PageScanner::builder(FixedEngine { fail: false })
        .build()
        .record(3, "scan_003.png", &page)
        .expect("record");
    assert_eq!(record.status, PageStatus::Recognized);
    assert_eq!(record.final_angle, 0);
    assert_eq!(record.text_lines, vec!["Hello there", "world"]);
    let json = serde_json::to_value(&record).expect("serializable");
    assert_eq!(json["number"], 3);
    assert_eq!(json["file"], "scan_003.png");
    assert_eq!(json["new_page"], true);
    assert_eq!(json["status"], "recognized");
    assert_eq!(json["text_lines"][1], "world");

    let failed = PageScanner::builder(FixedEngine { fail: true })
        .build()
        .record(4, "scan_004.png", &page)
        .expect("failure is a record, not an error");
    assert_eq!(failed.status, PageStatus::Failed);
    assert!(failed.text_lines.is_empty());
    let json = serde_json::to_value(&failed).expect("serializable");
    assert_eq!(json["status"], "failed");
}

#[test]
fn unknown_language_is_an_error_not_a_failed_page() {
    init();
    let tessdata = tempfile::TempDir::with_prefix("tessdata").expect("temp dir");
    std::fs::write(tessdata.path().join("eng.traineddata"), b"").expect("write traineddata");
    let engine = scanorient::engine::Tesseract::new()
        .program("/nonexistent/tesseract")
        .tessdata_dir(tessdata.path());

    let result = PageScanner::builder(engine)
        .language("fra")
        .build()
        .record(1, "scan_001.png", &synthetic_page());
    assert!(matches!(result, Err(scanorient::Error::InvalidInput(_))));
}

#[test]
fn demo_binary_requires_a_page_argument() {
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_scanorient"))
        .output()
        .expect("binary runs");
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("usage: scanorient"));
}
