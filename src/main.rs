use std::time::Instant;

use scanorient::{engine::Tesseract, OrientationMode, OrientationOptions, PageScanner};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

fn main() {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: scanorient <page image> [debug dir]");
        std::process::exit(2);
    };
    let image = image::open(&path).expect("Failed to load page image");

    let mut engine = Tesseract::new();
    if let Some(dir) = std::env::var_os("TESSDATA_PREFIX") {
        engine = engine.tessdata_dir(dir);
    }
    let mut builder = PageScanner::builder(engine).orientation_options(OrientationOptions {
        mode: OrientationMode::Fine,
        ..Default::default()
    });
    if let Some(dir) = args.next() {
        builder = builder.debug_dir(dir);
    }
    let scanner = builder.build();

    let start = Instant::now();
    let regions = scanner.regions(&image);
    log::debug!("{regions:#?}");
    let record = scanner
        .record(1, &path, &image)
        .expect("Failed recognition.");
    log::debug!("{:?}", start.elapsed());

    println!(
        "{}",
        serde_json::to_string_pretty(&record).expect("Failed to serialize page record")
    );
}
