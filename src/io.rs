use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageEncoder, RgbaImage};
use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};

// ============================================================================
// EXPORT FORMAT
// ============================================================================

/// Encodings the editor can hand to the upload collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Png,
    Jpeg,
}

impl ExportFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "png" => Some(ExportFormat::Png),
            "jpg" | "jpeg" => Some(ExportFormat::Jpeg),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpg",
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Failure while obtaining the source image of an editing session.
#[derive(Debug)]
pub enum LoadError {
    Fetch(String),
    Decode(String),
    EmptyImage,
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Fetch(e) => write!(f, "Could not fetch source image: {}", e),
            LoadError::Decode(e) => write!(f, "Could not decode source image: {}", e),
            LoadError::EmptyImage => write!(f, "Source image has zero width or height"),
        }
    }
}

impl std::error::Error for LoadError {}

/// Failure while encoding or uploading the edited composition.
#[derive(Debug)]
pub enum SaveError {
    Encode(String),
    Upload(String),
}

impl std::fmt::Display for SaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveError::Encode(e) => write!(f, "Encoding error: {}", e),
            SaveError::Upload(e) => write!(f, "Upload failed: {}", e),
        }
    }
}

impl std::error::Error for SaveError {}

impl From<image::ImageError> for SaveError {
    fn from(e: image::ImageError) -> Self {
        SaveError::Encode(e.to_string())
    }
}

// ============================================================================
// COLLABORATORS
// ============================================================================

/// Obtains the raw bytes behind a source image URL.
pub trait SourceFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError>;
}

/// Publishes encoded image bytes and returns the public URL.
pub trait UploadService {
    fn upload(&self, bytes: &[u8], format: ExportFormat) -> Result<String, SaveError>;
}

/// Reads `file://` URLs and plain filesystem paths.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFileFetcher;

impl SourceFetcher for LocalFileFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        std::fs::read(path).map_err(|e| LoadError::Fetch(format!("{}: {}", path, e)))
    }
}

/// "Uploads" by writing the bytes to a fixed path; the URL is a `file://` URL.
#[derive(Clone, Debug)]
pub struct FileUploader {
    pub target: PathBuf,
}

impl FileUploader {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self { target: target.into() }
    }
}

impl UploadService for FileUploader {
    fn upload(&self, bytes: &[u8], _format: ExportFormat) -> Result<String, SaveError> {
        if let Some(parent) = self.target.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| SaveError::Upload(e.to_string()))?;
        }
        let file = File::create(&self.target).map_err(|e| SaveError::Upload(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(bytes)
            .and_then(|_| writer.flush())
            .map_err(|e| SaveError::Upload(e.to_string()))?;
        Ok(file_url(&self.target))
    }
}

pub fn file_url(path: &Path) -> String {
    let abs = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", abs.display())
}

// ============================================================================
// DECODE / ENCODE
// ============================================================================

/// Decode fetched bytes (any format the `image` crate understands) to RGBA.
pub fn decode_source(bytes: &[u8]) -> Result<RgbaImage, LoadError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| LoadError::Decode(e.to_string()))?
        .to_rgba8();
    if img.width() == 0 || img.height() == 0 {
        return Err(LoadError::EmptyImage);
    }
    Ok(img)
}

pub fn load_source(fetcher: &dyn SourceFetcher, url: &str) -> Result<RgbaImage, LoadError> {
    let bytes = fetcher.fetch(url)?;
    decode_source(&bytes)
}

/// Encode an image to bytes in memory.
pub fn encode_image(image: &RgbaImage, format: ExportFormat, quality: u8) -> Result<Vec<u8>, SaveError> {
    let mut out = Cursor::new(Vec::new());
    write_encoded(image, &mut out, format, quality)?;
    Ok(out.into_inner())
}

/// Encode and write an image to a file.
/// Standalone (no editor state) so it can run on a worker thread.
pub fn encode_and_write(
    image: &RgbaImage,
    path: &Path,
    format: ExportFormat,
    quality: u8,
) -> Result<(), SaveError> {
    let file = File::create(path).map_err(|e| SaveError::Encode(e.to_string()))?;
    let mut writer = BufWriter::new(file);
    write_encoded(image, &mut writer, format, quality)?;
    writer.flush().map_err(|e| SaveError::Encode(e.to_string()))
}

fn write_encoded<W: Write>(
    image: &RgbaImage,
    writer: &mut W,
    format: ExportFormat,
    quality: u8,
) -> Result<(), SaveError> {
    match format {
        ExportFormat::Png => {
            let encoder = PngEncoder::new(writer);
            encoder.write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgba8,
            )?;
        }
        ExportFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb_image = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(writer, quality.clamp(1, 100));
            encoder.encode(
                rgb_image.as_raw(),
                rgb_image.width(),
                rgb_image.height(),
                image::ColorType::Rgb8,
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn format_names_parse_back() {
        assert_eq!(ExportFormat::from_name("PNG"), Some(ExportFormat::Png));
        assert_eq!(ExportFormat::from_name("jpg"), Some(ExportFormat::Jpeg));
        assert_eq!(ExportFormat::from_name(ExportFormat::Jpeg.name()), Some(ExportFormat::Jpeg));
        assert_eq!(ExportFormat::from_name("tiff"), None);
    }

    #[test]
    fn png_encoding_is_lossless() {
        let img = RgbaImage::from_fn(7, 5, |x, y| Rgba([x as u8 * 30, y as u8 * 40, 9, 200]));
        let bytes = encode_image(&img, ExportFormat::Png, 90).unwrap();
        assert_eq!(decode_source(&bytes).unwrap(), img);
    }

    #[test]
    fn jpeg_encoding_keeps_dimensions() {
        let img = RgbaImage::from_pixel(16, 8, Rgba([10, 200, 30, 255]));
        let bytes = encode_image(&img, ExportFormat::Jpeg, 80).unwrap();
        let back = decode_source(&bytes).unwrap();
        assert_eq!(back.dimensions(), (16, 8));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(decode_source(b"not an image"), Err(LoadError::Decode(_))));
    }

    #[test]
    fn missing_file_is_a_fetch_error() {
        let err = load_source(&LocalFileFetcher, "file:///definitely/not/here.png").unwrap_err();
        assert!(matches!(err, LoadError::Fetch(_)));
    }

    #[test]
    fn file_uploader_writes_and_returns_url() {
        let dir = std::env::temp_dir().join(format!("listing-editor-io-{}", uuid::Uuid::new_v4()));
        let target = dir.join("out.png");
        let url = FileUploader::new(&target).upload(b"abc", ExportFormat::Png).unwrap();
        assert!(url.starts_with("file://"));
        assert_eq!(std::fs::read(&target).unwrap(), b"abc");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
