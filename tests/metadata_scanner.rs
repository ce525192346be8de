mod common;

use std::io::{Cursor, Seek, SeekFrom};

use common::sample_gcode;
use sealed_print::artifact::DecryptedArtifact;
use sealed_print::config::ScannerConfig;
use sealed_print::metadata::{
    LayerCountSource, MetadataField, MetadataScanner, MetadataSidecar, MetadataWarning,
    ThumbnailFormat,
};

fn scanner(header: usize, footer: usize) -> MetadataScanner {
    MetadataScanner::new(&ScannerConfig {
        header_window_bytes: header,
        footer_window_bytes: footer,
        ..ScannerConfig::default()
    })
}

fn filler(lines: usize) -> String {
    "G1 X10.000 Y10.000 F1800\n".repeat(lines)
}

#[test]
fn test_declared_layer_count_in_header() {
    let gcode = format!(";FLAVOR:Marlin\n;LAYER_COUNT:42\n{}", filler(10));
    let mut source = Cursor::new(gcode.into_bytes());
    let outcome = MetadataScanner::new(&ScannerConfig::default()).scan(&mut source).unwrap();
    assert_eq!(outcome.metadata.layer_count, 42);
    assert_eq!(outcome.metadata.layer_count_source, LayerCountSource::Declared);
}

#[test]
fn test_scan_reads_header_summary() {
    let mut artifact = DecryptedArtifact::from_plaintext(sample_gcode(3).into_bytes());
    let outcome = MetadataScanner::new(&ScannerConfig::default()).scan(&mut artifact).unwrap();
    assert_eq!(outcome.metadata.layer_count, 3);
    assert_eq!(outcome.metadata.filament_total_mm, 1500.0);
    assert_eq!(outcome.metadata.estimated_time_s, 3723);
    assert!(outcome.warnings.is_empty());
}

#[test]
fn test_scan_is_repeatable_and_restores_cursor() {
    let mut source = Cursor::new(sample_gcode(5).into_bytes());
    source.seek(SeekFrom::Start(10)).unwrap();
    let scanner = MetadataScanner::new(&ScannerConfig::default());
    let first = scanner.scan(&mut source).unwrap();
    assert_eq!(source.stream_position().unwrap(), 10);
    let second = scanner.scan(&mut source).unwrap();
    assert_eq!(source.stream_position().unwrap(), 10);
    assert_eq!(first, second);
}

#[test]
fn test_footer_summary_outside_header_window() {
    let gcode = format!(
        "; generated by PrusaSlicer\n{}; filament used [g] = 3.7\n; filament used [mm] = 1234.5\n; estimated printing time (normal mode) = 1h 2m 3s\n; total layers count = 7\n",
        filler(200)
    );
    let mut source = Cursor::new(gcode.into_bytes());
    let outcome = scanner(256, 256).scan(&mut source).unwrap();
    assert_eq!(outcome.metadata.layer_count, 7);
    assert_eq!(outcome.metadata.layer_count_source, LayerCountSource::Declared);
    assert_eq!(outcome.metadata.filament_total_mm, 1234.5);
    assert_eq!(outcome.metadata.estimated_time_s, 3723);
    assert!(outcome.warnings.is_empty());
}

#[test]
fn test_summary_in_the_middle_is_not_seen() {
    let gcode = format!("{};TIME:99\n{}", filler(100), filler(100));
    let mut source = Cursor::new(gcode.into_bytes());
    let outcome = scanner(256, 256).scan(&mut source).unwrap();
    assert_eq!(outcome.metadata.estimated_time_s, 0);
    assert!(
        outcome
            .warnings
            .contains(&MetadataWarning::PatternNotFound(MetadataField::EstimatedTime))
    );
}

#[test]
fn test_layer_count_falls_back_to_counting_markers() {
    let mut gcode = String::from(";TIME:60\n;Filament used: 0.5m\n");
    for layer in 0..5 {
        gcode.push_str(&format!(";LAYER_CHANGE\n;LAYER:{}\nG1 Z{}\n", layer, layer + 1));
    }
    let mut source = Cursor::new(gcode.into_bytes());
    let outcome = MetadataScanner::new(&ScannerConfig::default()).scan(&mut source).unwrap();
    assert_eq!(outcome.metadata.layer_count, 5);
    assert_eq!(outcome.metadata.layer_count_source, LayerCountSource::Counted);
    assert!(outcome.warnings.is_empty());
}

#[test]
fn test_counting_reaches_past_the_windows() {
    let mut gcode = filler(50);
    for layer in 0..4 {
        gcode.push_str(&format!(";LAYER:{}\n", layer));
    }
    gcode.push_str(&filler(50));
    let mut source = Cursor::new(gcode.into_bytes());
    let outcome = scanner(128, 128).scan(&mut source).unwrap();
    assert_eq!(outcome.metadata.layer_count, 4);
    assert_eq!(outcome.metadata.layer_count_source, LayerCountSource::Counted);
}

#[test]
fn test_missing_metadata_warns_per_field() {
    let mut source = Cursor::new(filler(20).into_bytes());
    let outcome = MetadataScanner::new(&ScannerConfig::default()).scan(&mut source).unwrap();
    assert_eq!(outcome.metadata.layer_count, 0);
    assert_eq!(outcome.metadata.layer_count_source, LayerCountSource::Missing);
    assert_eq!(outcome.metadata.filament_total_mm, 0.0);
    assert_eq!(outcome.metadata.estimated_time_s, 0);
    assert_eq!(
        outcome.warnings,
        vec![
            MetadataWarning::PatternNotFound(MetadataField::LayerCount),
            MetadataWarning::PatternNotFound(MetadataField::FilamentTotal),
            MetadataWarning::PatternNotFound(MetadataField::EstimatedTime),
        ]
    );
}

#[test]
fn test_empty_source_scans_to_defaults() {
    let mut source = Cursor::new(Vec::new());
    let outcome = MetadataScanner::new(&ScannerConfig::default()).scan(&mut source).unwrap();
    assert_eq!(outcome.metadata.layer_count, 0);
    assert_eq!(outcome.warnings.len(), 3);
}

#[test]
fn test_line_cut_by_header_window_is_ignored() {
    let mut gcode = String::from(";FLAVOR:Marlin\n;LAYER_COUNT:42\n");
    gcode.push_str(&filler(40));
    for layer in 0..3 {
        gcode.push_str(&format!(";LAYER:{}\n", layer));
    }
    gcode.push_str(&filler(40));
    // The header window ends right after ";LAYER_COUNT:4".
    let header = ";FLAVOR:Marlin\n;LAYER_COUNT:4".len();
    let mut source = Cursor::new(gcode.into_bytes());
    let outcome = scanner(header, 64).scan(&mut source).unwrap();
    assert_ne!(outcome.metadata.layer_count, 4);
    assert_eq!(outcome.metadata.layer_count, 3);
    assert_eq!(outcome.metadata.layer_count_source, LayerCountSource::Counted);
}

#[test]
fn test_thumbnails_are_collected() {
    let gcode = concat!(
        ";\n",
        "; thumbnail begin 16x16 16\n",
        "; aGVsbG8g\n",
        "; d29ybGQh\n",
        "; thumbnail end\n",
        ";\n",
        "; thumbnail_JPG begin 32x24 8\n",
        "; /9j/4AAQ\n",
        "; thumbnail_JPG end\n",
        ";LAYER_COUNT:1\n",
        "G28\n",
    );
    let mut source = Cursor::new(gcode.as_bytes().to_vec());
    let outcome = MetadataScanner::new(&ScannerConfig::default()).scan(&mut source).unwrap();
    let thumbnails = &outcome.metadata.thumbnails;
    assert_eq!(thumbnails.len(), 2);

    assert_eq!(thumbnails[0].format, ThumbnailFormat::Png);
    assert_eq!((thumbnails[0].width, thumbnails[0].height), (16, 16));
    assert_eq!(thumbnails[0].data, "aGVsbG8gd29ybGQh");
    assert_eq!(thumbnails[0].decode().unwrap(), b"hello world!");
    assert_eq!(thumbnails[0].relative_path(), "thumbs/16x16.png");

    assert_eq!(thumbnails[1].format, ThumbnailFormat::Jpg);
    assert_eq!(thumbnails[1].size, 8);
    assert_eq!(thumbnails[1].relative_path(), "thumbs/32x24.jpg");
}

#[test]
fn test_unterminated_thumbnail_is_dropped() {
    let gcode = "; thumbnail begin 8x8 4\n; AAAA\nG28\n";
    let mut source = Cursor::new(gcode.as_bytes().to_vec());
    let outcome = MetadataScanner::new(&ScannerConfig::default()).scan(&mut source).unwrap();
    assert!(outcome.metadata.thumbnails.is_empty());
}

#[test]
fn test_sidecar_overrides_scanned_values() {
    let mut source = Cursor::new(sample_gcode(3).into_bytes());
    let mut metadata = MetadataScanner::new(&ScannerConfig::default())
        .scan(&mut source)
        .unwrap()
        .metadata;
    let sidecar = MetadataSidecar::from_json(r#"{"layer_count": 12, "filament_total": 2500.0}"#).unwrap();
    metadata.apply_sidecar(&sidecar);
    assert_eq!(metadata.layer_count, 12);
    assert_eq!(metadata.layer_count_source, LayerCountSource::Sidecar);
    assert_eq!(metadata.filament_total_mm, 2500.0);
    assert_eq!(metadata.estimated_time_s, 3723);
}
