use super::CompressionService;
use crate::{Error, Result};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageReader, Rgb, RgbImage};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Mailchimp file manager upload limit.
pub const HARD_LIMIT_BYTES: u64 = 1024 * 1024;

/// Fraction of the hard limit at which a file is considered good enough.
pub const SAFETY_MARGIN: f64 = 0.95;

/// One rung of the compression ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub quality: u8,
    pub max_dimension: u32,
}

impl Strategy {
    pub const fn new(quality: u8, max_dimension: u32) -> Self {
        Self {
            quality,
            max_dimension,
        }
    }
}

pub const DEFAULT_LADDER: [Strategy; 7] = [
    Strategy::new(85, 1600),
    Strategy::new(75, 1400),
    Strategy::new(65, 1200),
    Strategy::new(55, 1000),
    Strategy::new(50, 800),
    Strategy::new(45, 600),
    Strategy::new(45, 400),
];

#[derive(Debug, Clone)]
pub struct ImageCompressor {
    output_dir: PathBuf,
    hard_limit: u64,
    safety_limit: u64,
    ladder: Vec<Strategy>,
}

impl ImageCompressor {
    pub fn new(output_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(output_dir)?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            hard_limit: HARD_LIMIT_BYTES,
            safety_limit: safety_limit(HARD_LIMIT_BYTES, SAFETY_MARGIN),
            ladder: DEFAULT_LADDER.to_vec(),
        })
    }

    pub fn with_limits(mut self, hard_limit: u64, safety_margin: f64) -> Self {
        self.hard_limit = hard_limit;
        self.safety_limit = safety_limit(hard_limit, safety_margin);
        self
    }

    pub fn with_ladder(mut self, ladder: Vec<Strategy>) -> Self {
        self.ladder = ladder;
        self
    }

    pub fn hard_limit(&self) -> u64 {
        self.hard_limit
    }

    pub fn safety_limit(&self) -> u64 {
        self.safety_limit
    }

    /// Blocking implementation of [`CompressionService::ensure_under_limit`].
    pub fn compress_sync(&self, path: &Path) -> Result<PathBuf> {
        let size = std::fs::metadata(path)
            .map_err(|e| Error::compression(path, format!("cannot read file: {}", e)))?
            .len();
        if size == 0 {
            return Err(Error::compression(path, "file is empty"));
        }
        if size <= self.safety_limit {
            debug!(
                "{} is {} bytes, within {} bytes; no compression needed",
                path.display(),
                size,
                self.safety_limit
            );
            return Ok(path.to_path_buf());
        }

        let image = load_oriented(path).map_err(|e| Error::compression(path, e))?;
        let (width, height) = (image.width(), image.height());
        let rgb = flatten_onto_white(image);

        let mut smallest: Option<Vec<u8>> = None;
        for (step, strategy) in self.ladder.iter().enumerate() {
            let candidate = fit_within(&rgb, strategy.max_dimension);
            let encoded = encode_jpeg(&candidate, strategy.quality)?;
            let encoded_size = encoded.len() as u64;
            debug!(
                "{} step {}/{} (q{}, {}px): {} bytes",
                path.display(),
                step + 1,
                self.ladder.len(),
                strategy.quality,
                strategy.max_dimension,
                encoded_size
            );

            if encoded_size <= self.safety_limit {
                info!(
                    "Compressed {} from {} to {} bytes ({}x{} -> {}x{}, q{})",
                    path.display(),
                    size,
                    encoded_size,
                    width,
                    height,
                    candidate.width(),
                    candidate.height(),
                    strategy.quality
                );
                return self.write_output(path, &encoded);
            }

            if smallest
                .as_ref()
                .map_or(true, |best| encoded.len() < best.len())
            {
                smallest = Some(encoded);
            }
        }

        match smallest {
            Some(best) if best.len() as u64 <= self.hard_limit => {
                info!(
                    "Compressed {} to {} bytes (over safety margin, within hard limit)",
                    path.display(),
                    best.len()
                );
                self.write_output(path, &best)
            }
            Some(best) => Err(Error::CriticalCompression {
                path: path.to_path_buf(),
                size: best.len() as u64,
                limit: self.hard_limit,
            }),
            None => Err(Error::CriticalCompression {
                path: path.to_path_buf(),
                size,
                limit: self.hard_limit,
            }),
        }
    }

    fn write_output(&self, source: &Path, encoded: &[u8]) -> Result<PathBuf> {
        let stem = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        std::fs::create_dir_all(&self.output_dir)?;
        let output = self
            .output_dir
            .join(format!("{}_{}.jpg", stem, Uuid::new_v4()));
        std::fs::write(&output, encoded)?;
        validate(&output, self.hard_limit)?;
        Ok(output)
    }
}

#[async_trait]
impl CompressionService for ImageCompressor {
    async fn ensure_under_limit(&self, path: &Path) -> Result<PathBuf> {
        tokio::task::spawn_blocking({
            let compressor = self.clone();
            let path = path.to_path_buf();
            move || compressor.compress_sync(&path)
        })
        .await
        .map_err(|e| Error::Invariant(format!("Compression task join error: {}", e)))?
    }

    fn validate_under_limit(&self, path: &Path) -> Result<u64> {
        validate(path, self.hard_limit)
    }
}

fn safety_limit(hard_limit: u64, margin: f64) -> u64 {
    (hard_limit as f64 * margin.clamp(0.0, 1.0)) as u64
}

fn validate(path: &Path, hard_limit: u64) -> Result<u64> {
    let size = std::fs::metadata(path)
        .map_err(|e| Error::compression(path, format!("cannot read file: {}", e)))?
        .len();
    if size > hard_limit {
        return Err(Error::CriticalCompression {
            path: path.to_path_buf(),
            size,
            limit: hard_limit,
        });
    }
    Ok(size)
}

fn load_oriented(path: &Path) -> image::ImageResult<DynamicImage> {
    let mut decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Composites transparent pixels onto white. Opaque images are converted
/// directly.
pub(crate) fn flatten_onto_white(image: DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.into_rgb8();
    }

    let rgba = image.into_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as u16;
        let blend = |channel: u8| ((channel as u16 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        flattened.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    flattened
}

/// Shrinks so the longest edge is at most `max_dimension`. Never upscales.
fn fit_within(image: &RgbImage, max_dimension: u32) -> Cow<'_, RgbImage> {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if longest <= max_dimension {
        return Cow::Borrowed(image);
    }

    let scale = max_dimension as f64 / longest as f64;
    let new_width = ((width as f64 * scale).round() as u32).max(1);
    let new_height = ((height as f64 * scale).round() as u32).max(1);
    Cow::Owned(image::imageops::resize(
        image,
        new_width,
        new_height,
        FilterType::Lanczos3,
    ))
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> image::ImageResult<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality).encode_image(image)?;
    Ok(bytes)
}
