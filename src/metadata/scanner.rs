// src/metadata/scanner.rs - Header/footer scan for slicer metadata
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::sync::LazyLock;

use regex::Regex;
use zeroize::{Zeroize, Zeroizing};

use super::{
    JobMetadata, LayerCountSource, MetadataField, MetadataWarning, Thumbnail, ThumbnailFormat,
};
use crate::artifact::ArtifactError;
use crate::config::ScannerConfig;
use crate::gcode_utils::{LayerMarker, comment_text, parse_layer_marker};

static THUMBNAIL_BEGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^thumbnail(?:_(png|jpg|qoi))?\s+begin\s+(\d+)x(\d+)(?:\s+(\d+))?")
        .expect("thumbnail begin pattern compiles")
});

static THUMBNAIL_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^thumbnail(?:_(?:png|jpg|qoi))?\s+end").expect("thumbnail end pattern compiles")
});

const LAYER_COUNT_KEYS: &[&str] = &[
    "layer_count",
    "layer count",
    "total_layer_count",
    "total layer number",
    "total layers count",
    "total_layers",
    "total layers",
];

const FILAMENT_KEYS: &[&str] = &[
    "filament used",
    "filament_used",
    "total filament used",
    "total filament length",
    "filament_total",
    "filament length",
    "filament_length",
];

const TIME_KEYS: &[&str] = &[
    "time",
    "estimated printing time (normal mode)",
    "estimated printing time",
    "estimated_time",
    "estimated time",
    "total estimated time",
    "model printing time",
    "print_time",
    "print time",
    "total_time",
];

const COUNT_READ_CAPACITY: usize = 64 * 1024;

/// Metadata plus whatever the scan could not find.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    pub metadata: JobMetadata,
    pub warnings: Vec<MetadataWarning>,
}

/// Reads slicer summaries from the head and tail of an artifact.
#[derive(Debug, Clone)]
pub struct MetadataScanner {
    header_window: u64,
    footer_window: u64,
}

impl MetadataScanner {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            header_window: config.header_window_bytes as u64,
            footer_window: config.footer_window_bytes as u64,
        }
    }

    /// Scans `source` without disturbing it: the cursor is restored on
    /// success and on error.
    pub fn scan<S: Read + Seek>(&self, source: &mut S) -> Result<ScanOutcome, ArtifactError> {
        let saved = source.stream_position()?;
        let result = self.scan_from_start(source);
        source.seek(SeekFrom::Start(saved))?;
        result
    }

    fn scan_from_start<S: Read + Seek>(&self, source: &mut S) -> Result<ScanOutcome, ArtifactError> {
        let size = source.seek(SeekFrom::End(0))?;
        let mut fields = FieldScan::default();

        if size <= self.header_window + self.footer_window {
            let all = read_window(source, 0, size)?;
            fields.feed_window(&all);
        } else {
            let header = read_window(source, 0, self.header_window)?;
            fields.feed_window(through_last_newline(&header));
            // Include the byte before the footer to see where its first line starts.
            let footer_start = size - self.footer_window;
            let footer = read_window(source, footer_start - 1, self.footer_window + 1)?;
            fields.feed_window(after_first_newline(&footer));
        }

        let mut warnings = Vec::new();
        let (layer_count, layer_count_source) = match fields.layer_count {
            Some(count) => (count, LayerCountSource::Declared),
            None => match count_layer_markers(source)? {
                0 => {
                    warnings.push(MetadataWarning::PatternNotFound(MetadataField::LayerCount));
                    (0, LayerCountSource::Missing)
                }
                counted => (counted, LayerCountSource::Counted),
            },
        };
        if fields.filament_total.is_none() {
            warnings.push(MetadataWarning::PatternNotFound(MetadataField::FilamentTotal));
        }
        if fields.estimated_time.is_none() {
            warnings.push(MetadataWarning::PatternNotFound(MetadataField::EstimatedTime));
        }

        Ok(ScanOutcome {
            metadata: JobMetadata {
                layer_count,
                layer_count_source,
                filament_total_mm: fields.filament_total.unwrap_or(0.0),
                estimated_time_s: fields.estimated_time.unwrap_or(0),
                thumbnails: fields.thumbnails,
            },
            warnings,
        })
    }
}

fn read_window<S: Read + Seek>(
    source: &mut S,
    start: u64,
    len: u64,
) -> Result<Zeroizing<Vec<u8>>, ArtifactError> {
    source.seek(SeekFrom::Start(start))?;
    let mut buf = Zeroizing::new(Vec::with_capacity(len as usize));
    source.take(len).read_to_end(&mut buf)?;
    Ok(buf)
}

fn through_last_newline(buf: &[u8]) -> &[u8] {
    match buf.iter().rposition(|&b| b == b'\n') {
        Some(pos) => &buf[..=pos],
        None => &[],
    }
}

fn after_first_newline(buf: &[u8]) -> &[u8] {
    match buf.iter().position(|&b| b == b'\n') {
        Some(pos) => &buf[pos + 1..],
        None => &[],
    }
}

/// Counts layer markers over the whole source. Numbered markers and bare
/// change markers are tallied apart so files carrying both are not doubled.
fn count_layer_markers<S: Read + Seek>(source: &mut S) -> Result<u32, ArtifactError> {
    source.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::with_capacity(COUNT_READ_CAPACITY, source);
    let mut line = Vec::new();
    let mut numbered = 0u32;
    let mut changes = 0u32;
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if line.iter().find(|b| !b.is_ascii_whitespace()) != Some(&b';') {
            continue;
        }
        match parse_layer_marker(&String::from_utf8_lossy(&line)) {
            Some(LayerMarker::Number(_)) => numbered += 1,
            Some(LayerMarker::Change) => changes += 1,
            _ => {}
        }
    }
    line.zeroize();
    Ok(numbered.max(changes))
}

struct ThumbnailBlock {
    width: u32,
    height: u32,
    size: Option<usize>,
    format: ThumbnailFormat,
    data: String,
}

#[derive(Default)]
struct FieldScan {
    layer_count: Option<u32>,
    filament_total: Option<f64>,
    estimated_time: Option<u64>,
    thumbnails: Vec<Thumbnail>,
    thumbnail: Option<ThumbnailBlock>,
}

impl FieldScan {
    fn feed_window(&mut self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        for line in text.lines() {
            self.feed_line(line);
        }
        // A block cut off by the window edge is dropped.
        self.thumbnail = None;
    }

    fn feed_line(&mut self, line: &str) {
        let Some(text) = comment_text(line) else {
            return;
        };
        let body = text.to_ascii_lowercase();

        if self.thumbnail.is_some() {
            if THUMBNAIL_END.is_match(&body) {
                self.finish_thumbnail();
            } else if let Some(block) = self.thumbnail.as_mut() {
                block.data.push_str(text);
            }
            return;
        }
        if let Some(caps) = THUMBNAIL_BEGIN.captures(&body) {
            let format = match caps.get(1).map(|m| m.as_str()) {
                Some("jpg") => ThumbnailFormat::Jpg,
                Some("qoi") => ThumbnailFormat::Qoi,
                _ => ThumbnailFormat::Png,
            };
            self.thumbnail = Some(ThumbnailBlock {
                width: caps[2].parse().unwrap_or(0),
                height: caps[3].parse().unwrap_or(0),
                size: caps.get(4).and_then(|m| m.as_str().parse().ok()),
                format,
                data: String::new(),
            });
            return;
        }

        if self.layer_count.is_none() {
            self.layer_count = parse_layer_count(&body);
        }
        if self.filament_total.is_none() {
            self.filament_total = parse_filament(&body);
        }
        if self.estimated_time.is_none() {
            self.estimated_time = parse_time(&body);
        }
    }

    fn finish_thumbnail(&mut self) {
        let Some(block) = self.thumbnail.take() else {
            return;
        };
        if block.width == 0 || block.height == 0 || block.data.is_empty() {
            return;
        }
        self.thumbnails.push(Thumbnail {
            width: block.width,
            height: block.height,
            size: block.size.unwrap_or(block.data.len()),
            format: block.format,
            data: block.data,
        });
    }
}

/// `key`, optional `[unit]`, then `:` or `=`. Returns the unit and value.
fn keyed_value<'a>(body: &'a str, key: &str) -> Option<(Option<&'a str>, &'a str)> {
    let rest = body.strip_prefix(key)?.trim_start();
    let (unit, rest) = match rest.strip_prefix('[') {
        Some(after) => {
            let close = after.find(']')?;
            (Some(after[..close].trim()), after[close + 1..].trim_start())
        }
        None => (None, rest),
    };
    let value = rest.strip_prefix(':').or_else(|| rest.strip_prefix('='))?;
    Some((unit, value.trim()))
}

/// Leading decimal number of `s` and the text after it.
fn leading_number(s: &str) -> Option<(f64, &str)> {
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let value = s[..end].parse::<f64>().ok()?;
    value.is_finite().then_some((value, &s[end..]))
}

fn parse_layer_count(body: &str) -> Option<u32> {
    LAYER_COUNT_KEYS.iter().find_map(|key| {
        let (_, value) = keyed_value(body, key)?;
        let (count, _) = leading_number(value)?;
        (count >= 0.0 && count <= u32::MAX as f64).then_some(count as u32)
    })
}

fn parse_filament(body: &str) -> Option<f64> {
    FILAMENT_KEYS.iter().find_map(|key| {
        let (unit, value) = keyed_value(body, key)?;
        parse_lengths(value, unit)
    })
}

/// Sums comma-separated lengths into millimetres. Units other than
/// mm, cm and m (grams, volumes) reject the whole value.
fn parse_lengths(value: &str, unit: Option<&str>) -> Option<f64> {
    let mut total = 0.0;
    let mut any = false;
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (number, suffix) = leading_number(part)?;
        let suffix = suffix.trim();
        let unit = if suffix.is_empty() { unit.unwrap_or("mm") } else { suffix };
        let scale = match unit {
            "mm" => 1.0,
            "cm" => 10.0,
            "m" => 1000.0,
            _ => return None,
        };
        if number < 0.0 {
            return None;
        }
        total += number * scale;
        any = true;
    }
    any.then_some(total)
}

fn parse_time(body: &str) -> Option<u64> {
    TIME_KEYS.iter().find_map(|key| {
        let (_, value) = keyed_value(body, key)?;
        parse_duration(value.split(';').next().unwrap_or("").trim())
    })
}

/// Plain seconds, or a compound like `1d 2h 3m 4s` / `2m3s`.
pub(crate) fn parse_duration(value: &str) -> Option<u64> {
    if let Ok(seconds) = value.parse::<f64>() {
        return (seconds.is_finite() && seconds >= 0.0).then(|| seconds.round() as u64);
    }
    let mut total = 0.0;
    let mut any = false;
    let mut rest = value.trim();
    while !rest.is_empty() {
        let (number, after) = leading_number(rest)?;
        if number < 0.0 {
            return None;
        }
        let after = after.trim_start();
        let unit_len = after
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(after.len());
        let scale = match &after[..unit_len] {
            "d" => 86_400.0,
            "h" => 3_600.0,
            "m" => 60.0,
            "s" => 1.0,
            _ => return None,
        };
        total += number * scale;
        any = true;
        rest = after[unit_len..].trim_start();
    }
    any.then(|| total.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyed_value_requires_separator() {
        assert_eq!(keyed_value("time:3600", "time"), Some((None, "3600")));
        assert_eq!(keyed_value("time_elapsed:12.5", "time"), None);
        assert_eq!(
            keyed_value("filament used [mm] = 12.5", "filament used"),
            Some((Some("mm"), "12.5"))
        );
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("3600"), Some(3600));
        assert_eq!(parse_duration("1h 2m 3s"), Some(3723));
        assert_eq!(parse_duration("2m3s"), Some(123));
        assert_eq!(parse_duration("1d 2h 3m 4s"), Some(93_784));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("3 weeks"), None);
    }

    #[test]
    fn test_parse_lengths_units() {
        assert_eq!(parse_lengths("1.5m", None), Some(1500.0));
        assert_eq!(parse_lengths("12cm", None), Some(120.0));
        assert_eq!(parse_lengths("100.0, 50.5", Some("mm")), Some(150.5));
        assert_eq!(parse_lengths("3.7", Some("g")), None);
        assert_eq!(parse_lengths("", Some("mm")), None);
    }

    #[test]
    fn test_window_edges() {
        assert_eq!(through_last_newline(b"a\nb\npart"), b"a\nb\n");
        assert_eq!(after_first_newline(b"tail\nx\ny"), b"x\ny");
        assert_eq!(after_first_newline(b"\nx"), b"x");
        assert!(through_last_newline(b"no newline").is_empty());
    }
}
