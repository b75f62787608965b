//! Per-operation transforms: validate, apply to the raster, encode, upload.
//!
//! Operations are applied cumulatively. [`TransformPipeline::execute`] hands
//! back the raster it produced so the caller can feed it to the next
//! operation; a failed operation leaves the caller's raster untouched.
//!
//! ## Formats
//!
//! | Requested | Encoded as | Extension | Quality |
//! |---|---|---|---|
//! | `jpeg`, `jpg` | JPEG | `.jpg` | 1-100, 0 → 90 |
//! | `png` | PNG | `.png` | n/a |
//! | `webp` | JPEG (no lossy WebP encoder) | `.jpg` | 1-100, 0 → 90 |
//! | empty | JPEG | `.jpg` | 1-100, 0 → 90 |
//! | anything else | JPEG (fallback) | `.jpg` | 90 |
//!
//! WebP sources still decode; only the output side is substituted.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::job::{Operation, OperationKind, OperationResult};
use crate::services::sink::ResultSink;
use crate::services::storage::StorageError;

/// Encoder quality used when an operation leaves it at 0.
pub const DEFAULT_QUALITY: u8 = 90;

/// Length of the random token in derived output keys.
const KEY_TOKEN_LEN: usize = 8;

/// Lossy formats with no encoder here. They are written as JPEG, keeping
/// the requested quality.
const LOSSY_SUBSTITUTES: &[&str] = &["webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum OutputFormat {
    #[strum(to_string = "jpeg", serialize = "jpg")]
    Jpeg,
    #[strum(to_string = "png")]
    Png,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }

    pub fn content_type(self) -> String {
        format!("image/{}", self)
    }

    fn has_quality(self) -> bool {
        matches!(self, OutputFormat::Jpeg)
    }
}

/// The encoding an operation resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeTarget {
    pub format: OutputFormat,
    /// Effective quality; `None` for formats without one.
    pub quality: Option<u8>,
    /// The requested format was not supported and JPEG was substituted.
    pub fell_back: bool,
}

/// How a requested format name maps onto an encoder.
enum Requested {
    Supported(OutputFormat),
    LossySubstitute,
    Unsupported,
}

impl Requested {
    fn parse(name: &str) -> Self {
        if name.is_empty() {
            return Requested::Supported(OutputFormat::Jpeg);
        }
        if let Ok(format) = name.parse::<OutputFormat>() {
            return Requested::Supported(format);
        }
        if LOSSY_SUBSTITUTES
            .iter()
            .any(|lossy| name.eq_ignore_ascii_case(lossy))
        {
            Requested::LossySubstitute
        } else {
            Requested::Unsupported
        }
    }
}

impl EncodeTarget {
    /// Resolve the requested format name and quality. `quality` must already
    /// be validated to 0..=100.
    pub fn resolve(requested: &str, quality: i32) -> Self {
        let (format, fell_back, keeps_quality) = match Requested::parse(requested.trim()) {
            Requested::Supported(format) => (format, false, true),
            Requested::LossySubstitute => (OutputFormat::Jpeg, true, true),
            Requested::Unsupported => (OutputFormat::Jpeg, true, false),
        };

        let quality = if !format.has_quality() {
            None
        } else if !keeps_quality || quality <= 0 {
            Some(DEFAULT_QUALITY)
        } else {
            Some(quality.clamp(1, 100) as u8)
        };

        Self {
            format,
            quality,
            fell_back,
        }
    }

    /// File extension including the leading dot.
    pub fn extension(&self) -> String {
        format!(".{}", self.format.extension())
    }
}

/// Reject operations the pipeline cannot run.
pub fn validate(op: &Operation, max_dimension: u32) -> Result<(), OperationError> {
    if op.kind == OperationKind::Unknown {
        return Err(OperationError::BadParameters(
            "unknown operation kind".to_string(),
        ));
    }
    for (name, value) in [("width", op.width), ("height", op.height)] {
        if value < 0 {
            return Err(OperationError::BadParameters(format!(
                "{name} must not be negative, got {value}"
            )));
        }
        if value as u32 > max_dimension {
            return Err(OperationError::BadParameters(format!(
                "{name} {value} exceeds the maximum of {max_dimension}"
            )));
        }
    }
    if !(0..=100).contains(&op.quality) {
        return Err(OperationError::BadParameters(format!(
            "quality must be between 1 and 100 (0 for default), got {}",
            op.quality
        )));
    }
    Ok(())
}

/// Output size for a resize request, or `None` when nothing is constrained.
///
/// With one side given, the other follows the source aspect ratio, rounded
/// and never below one pixel.
pub fn target_dimensions(source: (u32, u32), width: u32, height: u32) -> Option<(u32, u32)> {
    let (src_w, src_h) = source;
    match (width, height) {
        (0, 0) => None,
        (w, 0) => {
            let h = (src_h as f64 * w as f64 / src_w.max(1) as f64).round() as u32;
            Some((w, h.max(1)))
        }
        (0, h) => {
            let w = (src_w as f64 * h as f64 / src_h.max(1) as f64).round() as u32;
            Some((w.max(1), h))
        }
        (w, h) => Some((w, h)),
    }
}

/// Resize target for `op` against a source of the given size, rejecting
/// any side (requested or derived) above `max_dimension`.
pub fn bounded_dimensions(
    source: (u32, u32),
    op: &Operation,
    max_dimension: u32,
) -> Result<Option<(u32, u32)>, OperationError> {
    let Some((w, h)) = target_dimensions(source, op.width.max(0) as u32, op.height.max(0) as u32)
    else {
        return Ok(None);
    };
    if w > max_dimension || h > max_dimension {
        return Err(OperationError::BadParameters(format!(
            "resizing {}x{} gives {w}x{h}, above the maximum of {max_dimension}",
            source.0, source.1
        )));
    }
    Ok(Some((w, h)))
}

/// Apply one operation's pixel transform. `Ok(None)` means the raster passes
/// through unchanged.
pub fn apply(
    raster: &DynamicImage,
    op: &Operation,
    max_dimension: u32,
) -> Result<Option<DynamicImage>, OperationError> {
    match op.kind {
        OperationKind::Resize => {
            let Some((w, h)) =
                bounded_dimensions((raster.width(), raster.height()), op, max_dimension)?
            else {
                return Ok(None);
            };
            Ok(Some(raster.resize_exact(w, h, FilterType::Lanczos3)))
        }
        OperationKind::Watermark => {
            // Stub: watermark rendering is not implemented; the raster is
            // returned untouched and still encoded/uploaded.
            tracing::warn!(
                watermark = %op.watermark,
                "Watermarking not implemented, passing image through"
            );
            Ok(None)
        }
        OperationKind::Format | OperationKind::Unknown => Ok(None),
    }
}

pub fn encode(raster: &DynamicImage, target: EncodeTarget) -> Result<Vec<u8>, OperationError> {
    let mut buf = Vec::new();
    let written = match target.format {
        OutputFormat::Jpeg => {
            let quality = target.quality.unwrap_or(DEFAULT_QUALITY);
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
            // JPEG has no alpha channel.
            DynamicImage::ImageRgb8(raster.to_rgb8()).write_with_encoder(encoder)
        }
        OutputFormat::Png => raster.write_with_encoder(PngEncoder::new(&mut buf)),
    };
    written.map_err(|e| OperationError::EncodeFailure(format!("{} encode: {e}", target.format)))?;
    Ok(buf)
}

/// Object key for an operation's output.
///
/// An explicit key is used as given. Otherwise the key is
/// `processed/<job_id>/<kind>_<token><ext>` with a fresh random token, so
/// processing the same job twice writes a second object.
// TODO: decide between deterministic keys (job id + index + params) for
// overwrite-on-redelivery and the current per-attempt versioning.
pub fn output_key(job_id: &str, op: &Operation, target: &EncodeTarget) -> String {
    if let Some(key) = op.explicit_output_key() {
        return key.to_string();
    }
    let token = Uuid::new_v4().simple().to_string();
    format!(
        "processed/{}/{}_{}{}",
        job_id,
        op.kind,
        &token[..KEY_TOKEN_LEN],
        target.extension()
    )
}

/// Output of a successful operation plus the raster the next one starts from.
pub struct Applied {
    pub result: OperationResult,
    pub raster: Arc<DynamicImage>,
}

pub struct TransformPipeline {
    sink: ResultSink,
    max_dimension: u32,
}

impl TransformPipeline {
    pub fn new(sink: ResultSink, max_dimension: u32) -> Self {
        Self {
            sink,
            max_dimension,
        }
    }

    /// Run one operation against `raster`: transform and encode on the
    /// blocking pool, then upload through the sink.
    pub async fn execute(
        &self,
        job_id: &str,
        raster: Arc<DynamicImage>,
        op: &Operation,
    ) -> Result<Applied, OperationError> {
        let started = Instant::now();
        validate(op, self.max_dimension)?;

        let target = EncodeTarget::resolve(&op.format, op.quality);
        if target.fell_back {
            tracing::warn!(
                job_id = %job_id,
                requested = %op.format,
                quality = ?target.quality,
                "No encoder for requested format, writing JPEG"
            );
        }

        let task_op = op.clone();
        let max_dimension = self.max_dimension;
        let (raster, encoded) = tokio::task::spawn_blocking(move || {
            let output = match apply(&raster, &task_op, max_dimension)? {
                Some(transformed) => Arc::new(transformed),
                None => raster,
            };
            let bytes = encode(&output, target)?;
            Ok::<_, OperationError>((output, bytes))
        })
        .await
        .map_err(|e| OperationError::EncodeFailure(format!("transform task failed: {e}")))??;

        let key = output_key(job_id, op, &target);
        let location = self
            .sink
            .store(&key, &encoded, &target.format.content_type())
            .await
            .map_err(|source| OperationError::UploadFailure {
                key: key.clone(),
                source,
            })?;

        let result = OperationResult {
            operation: op.clone(),
            output_location: location,
            output_key: key,
            size: encoded.len() as u64,
            width: raster.width(),
            height: raster.height(),
            format: target.format.to_string(),
            processing_time: started.elapsed().as_millis() as u64,
            quality: target.quality,
        };

        Ok(Applied { result, raster })
    }
}

/// Failure of a single operation. Never fatal to the job.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("Bad parameters: {0}")]
    BadParameters(String),

    #[error("Encode failed: {0}")]
    EncodeFailure(String),

    #[error("Upload of {key} failed: {source}")]
    UploadFailure {
        key: String,
        #[source]
        source: StorageError,
    },
}

impl OperationError {
    /// Metric label for the failure class.
    pub fn reason(&self) -> &'static str {
        match self {
            OperationError::BadParameters(_) => "bad_parameters",
            OperationError::EncodeFailure(_) => "encode_failure",
            OperationError::UploadFailure { .. } => "upload_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::MemoryObjectStore;
    use image::{GenericImageView, Rgb, RgbImage, Rgba, RgbaImage};

    fn op(kind: OperationKind) -> Operation {
        Operation {
            kind,
            width: 0,
            height: 0,
            format: String::new(),
            quality: 0,
            watermark: String::new(),
            output_key: String::new(),
        }
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 128])
        }))
    }

    #[test]
    fn test_jpeg_extension_is_jpg() {
        assert_eq!(EncodeTarget::resolve("jpeg", 0).extension(), ".jpg");
        assert_eq!(EncodeTarget::resolve("png", 0).extension(), ".png");
        assert_eq!(EncodeTarget::resolve("webp", 0).extension(), ".jpg");
    }

    #[test]
    fn test_content_type_uses_format_name() {
        assert_eq!(OutputFormat::Jpeg.content_type(), "image/jpeg");
        assert_eq!(OutputFormat::Png.content_type(), "image/png");
    }

    #[test]
    fn test_zero_quality_defaults_to_90() {
        assert_eq!(EncodeTarget::resolve("jpeg", 0).quality, Some(90));
        assert_eq!(EncodeTarget::resolve("webp", 0).quality, Some(90));
        assert_eq!(EncodeTarget::resolve("jpeg", 55).quality, Some(55));
        assert_eq!(EncodeTarget::resolve("png", 0).quality, None);
    }

    #[test]
    fn test_webp_is_written_as_jpeg_with_requested_quality() {
        let target = EncodeTarget::resolve("WebP", 40);
        assert_eq!(target.format, OutputFormat::Jpeg);
        assert_eq!(target.quality, Some(40));
        assert!(target.fell_back);
    }

    #[test]
    fn test_webp_quality_changes_encoded_output() {
        let img = gradient(48, 32);
        let low = encode(&img, EncodeTarget::resolve("webp", 10)).unwrap();
        let defaulted = encode(&img, EncodeTarget::resolve("webp", 0)).unwrap();
        let explicit_jpeg = encode(&img, EncodeTarget::resolve("jpeg", 90)).unwrap();

        assert_ne!(low, defaulted);
        assert_eq!(defaulted, explicit_jpeg);
        assert_eq!(image::guess_format(&low).unwrap(), image::ImageFormat::Jpeg);
    }

    #[test]
    fn test_unsupported_format_falls_back_to_jpeg() {
        let target = EncodeTarget::resolve("gif", 40);
        assert_eq!(target.format, OutputFormat::Jpeg);
        assert_eq!(target.quality, Some(DEFAULT_QUALITY));
        assert!(target.fell_back);
        assert_eq!(target.extension(), ".jpg");
    }

    #[test]
    fn test_format_names_are_case_insensitive() {
        assert_eq!(EncodeTarget::resolve("JPG", 0).format, OutputFormat::Jpeg);
        assert_eq!(EncodeTarget::resolve(" PNG ", 0).format, OutputFormat::Png);
        assert!(!EncodeTarget::resolve("", 0).fell_back);
    }

    #[test]
    fn test_default_quality_encodes_like_explicit_90() {
        let img = gradient(32, 24);
        let defaulted = encode(&img, EncodeTarget::resolve("jpeg", 0)).unwrap();
        let explicit = encode(&img, EncodeTarget::resolve("jpeg", 90)).unwrap();
        let low = encode(&img, EncodeTarget::resolve("jpeg", 10)).unwrap();
        assert_eq!(defaulted, explicit);
        assert_ne!(defaulted, low);
    }

    #[test]
    fn test_width_only_preserves_aspect_ratio() {
        assert_eq!(target_dimensions((1600, 900), 800, 0), Some((800, 450)));
        assert_eq!(target_dimensions((1600, 900), 0, 300), Some((533, 300)));
        assert_eq!(target_dimensions((1600, 900), 100, 100), Some((100, 100)));
        assert_eq!(target_dimensions((1600, 900), 0, 0), None);
        assert_eq!(target_dimensions((4000, 10), 100, 0), Some((100, 1)));
    }

    #[test]
    fn test_resize_applies_lanczos_to_exact_size() {
        let mut resize = op(OperationKind::Resize);
        resize.width = 30;
        let out = apply(&gradient(60, 40), &resize, 10_000).unwrap().unwrap();
        assert_eq!(out.dimensions(), (30, 20));
    }

    #[test]
    fn test_unconstrained_resize_and_watermark_pass_through() {
        let img = gradient(10, 10);
        assert!(apply(&img, &op(OperationKind::Resize), 10_000)
            .unwrap()
            .is_none());
        let mut watermark = op(OperationKind::Watermark);
        watermark.watermark = "(c) example".to_string();
        assert!(apply(&img, &watermark, 10_000).unwrap().is_none());
        assert!(apply(&img, &op(OperationKind::Format), 10_000)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_derived_side_is_bounded() {
        let mut widen = op(OperationKind::Resize);
        widen.width = 5000;
        assert!(validate(&widen, 10_000).is_ok());

        let err = bounded_dimensions((1, 2000), &widen, 10_000).unwrap_err();
        assert!(matches!(err, OperationError::BadParameters(_)));
        assert_eq!(
            bounded_dimensions((2000, 1000), &widen, 10_000).unwrap(),
            Some((5000, 2500))
        );

        let mut tall = op(OperationKind::Resize);
        tall.height = 9000;
        assert!(bounded_dimensions((3000, 1), &tall, 10_000).is_err());
    }

    #[test]
    fn test_apply_rejects_oversized_derived_resize() {
        let mut widen = op(OperationKind::Resize);
        widen.width = 5000;
        let narrow = gradient(1, 2000);
        assert!(matches!(
            apply(&narrow, &widen, 10_000),
            Err(OperationError::BadParameters(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_parameters() {
        let mut negative = op(OperationKind::Resize);
        negative.width = -5;
        assert!(matches!(
            validate(&negative, 10_000),
            Err(OperationError::BadParameters(_))
        ));

        let mut huge = op(OperationKind::Resize);
        huge.height = 20_000;
        assert!(validate(&huge, 10_000).is_err());

        let mut quality = op(OperationKind::Format);
        quality.quality = 101;
        assert!(validate(&quality, 10_000).is_err());

        assert!(validate(&op(OperationKind::Unknown), 10_000).is_err());
        assert!(validate(&op(OperationKind::Watermark), 10_000).is_ok());
    }

    #[test]
    fn test_explicit_output_key_is_used_unmodified() {
        let mut format = op(OperationKind::Format);
        format.output_key = "custom/thumb".to_string();
        let target = EncodeTarget::resolve("png", 0);
        assert_eq!(output_key("job-1", &format, &target), "custom/thumb");
    }

    #[test]
    fn test_derived_keys_follow_convention_and_differ() {
        let resize = op(OperationKind::Resize);
        let target = EncodeTarget::resolve("jpeg", 0);
        let first = output_key("job-1", &resize, &target);
        let second = output_key("job-1", &resize, &target);

        assert!(first.starts_with("processed/job-1/resize_"));
        assert!(first.ends_with(".jpg"));
        let token = &first["processed/job-1/resize_".len()..first.len() - ".jpg".len()];
        assert_eq!(token.len(), KEY_TOKEN_LEN);
        assert_ne!(first, second);
    }

    #[test]
    fn test_jpeg_encode_drops_alpha() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 128])));
        let bytes = encode(&rgba, EncodeTarget::resolve("jpeg", 0)).unwrap();
        assert_eq!(
            image::guess_format(&bytes).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[tokio::test]
    async fn test_execute_uploads_and_reports_result() {
        let objects = Arc::new(MemoryObjectStore::new());
        let pipeline = TransformPipeline::new(ResultSink::new(objects.clone(), None), 10_000);

        let mut resize = op(OperationKind::Resize);
        resize.width = 20;
        resize.format = "png".to_string();

        let applied = pipeline
            .execute("job-9", Arc::new(gradient(40, 30)), &resize)
            .await
            .unwrap();
        let result = &applied.result;

        assert_eq!((result.width, result.height), (20, 15));
        assert_eq!(result.format, "png");
        assert_eq!(result.quality, None);
        assert_eq!(result.output_location, result.output_key);

        let stored = objects.object(&result.output_key).await.unwrap();
        assert_eq!(stored.content_type, "image/png");
        assert_eq!(stored.data.len() as u64, result.size);
        assert_eq!(applied.raster.dimensions(), (20, 15));
    }

    #[tokio::test]
    async fn test_execute_classifies_upload_failure() {
        let objects = Arc::new(MemoryObjectStore::new());
        objects.fail_puts(true);
        let pipeline = TransformPipeline::new(ResultSink::new(objects, None), 10_000);

        let err = pipeline
            .execute("job-9", Arc::new(gradient(8, 8)), &op(OperationKind::Format))
            .await
            .err()
            .unwrap();
        assert_eq!(err.reason(), "upload_failure");
    }
}
