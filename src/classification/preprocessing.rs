use std::io::Cursor;
use std::path::PathBuf;

use image::error::{ImageFormatHint, UnsupportedErrorKind};
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageError, ImageReader};
use tracing::{debug, warn};

use crate::config::GraderConfig;
use crate::error::{GraderError, Result};
use crate::pipeline::{Pipeline, PipelineContext, PipelineStep};

/// Where an image to classify comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
    Decoded(SourceImage),
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<SourceImage> for ImageSource {
    fn from(source: SourceImage) -> Self {
        ImageSource::Decoded(source)
    }
}

impl From<DynamicImage> for ImageSource {
    fn from(image: DynamicImage) -> Self {
        ImageSource::Decoded(SourceImage::new(image))
    }
}

/// A decoded image together with its EXIF orientation.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub image: DynamicImage,
    pub orientation: Orientation,
}

impl SourceImage {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            orientation: Orientation::NoTransforms,
        }
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Rotate/flip so the photographed subject is upright.
    pub fn upright(self) -> DynamicImage {
        let mut image = self.image;
        image.apply_orientation(self.orientation);
        image
    }
}

impl ImageSource {
    /// Decode the source, reading orientation metadata when present.
    pub fn decode(self) -> Result<SourceImage> {
        match self {
            ImageSource::Decoded(source) => Ok(source),
            ImageSource::Path(path) => {
                let reader = ImageReader::open(&path).map_err(|e| {
                    GraderError::Decode(format!("Failed to open {}: {}", path.display(), e))
                })?;
                decode_reader(reader)
            }
            ImageSource::Bytes(bytes) => decode_reader(ImageReader::new(Cursor::new(bytes))),
        }
    }
}

fn decode_reader<R: std::io::BufRead + std::io::Seek>(reader: ImageReader<R>) -> Result<SourceImage> {
    let reader = reader
        .with_guessed_format()
        .map_err(|e| GraderError::Decode(format!("Failed to read image header: {}", e)))?;
    let mut decoder = reader.into_decoder().map_err(map_image_error)?;

    // Missing or unreadable orientation means no correction.
    let orientation = decoder.orientation().unwrap_or_else(|e| {
        warn!("Could not read orientation metadata: {}", e);
        Orientation::NoTransforms
    });

    let image = DynamicImage::from_decoder(decoder).map_err(map_image_error)?;
    Ok(SourceImage { image, orientation })
}

fn map_image_error(error: ImageError) -> GraderError {
    match error {
        // Bytes that match no known container are unreadable, not unsupported.
        ImageError::Unsupported(e)
            if matches!(e.kind(), UnsupportedErrorKind::Format(ImageFormatHint::Unknown)) =>
        {
            GraderError::Decode(e.to_string())
        }
        ImageError::Unsupported(e) => GraderError::UnsupportedFormat(e.to_string()),
        other => GraderError::Decode(other.to_string()),
    }
}

/// Downscale proportionally when either side exceeds `max_dimension`.
pub struct SizeGuardStep {
    pub max_dimension: u32,
}

impl PipelineStep for SizeGuardStep {
    fn process(&self, image: DynamicImage, _context: &PipelineContext) -> Result<DynamicImage> {
        if image.width() <= self.max_dimension && image.height() <= self.max_dimension {
            return Ok(image);
        }
        Ok(image.resize(self.max_dimension, self.max_dimension, FilterType::Triangle))
    }

    fn name(&self) -> &str {
        "Size Guard"
    }
}

/// Crop the largest centered square.
pub struct CenterCropStep;

impl PipelineStep for CenterCropStep {
    fn process(&self, image: DynamicImage, _context: &PipelineContext) -> Result<DynamicImage> {
        let (width, height) = (image.width(), image.height());
        if width == height {
            return Ok(image);
        }
        let size = width.min(height);
        let x = (width - size) / 2;
        let y = (height - size) / 2;
        Ok(image.crop_imm(x, y, size, size))
    }

    fn name(&self) -> &str {
        "Center Crop"
    }
}

/// Scale to exactly `size` x `size`.
pub struct ResizeStep {
    pub size: u32,
}

impl PipelineStep for ResizeStep {
    fn process(&self, image: DynamicImage, _context: &PipelineContext) -> Result<DynamicImage> {
        if image.width() == self.size && image.height() == self.size {
            return Ok(image);
        }
        Ok(image.resize_exact(self.size, self.size, FilterType::Triangle))
    }

    fn name(&self) -> &str {
        "Resize"
    }
}

/// Model input: RGB values in `[0, 1]`, interleaved, shape `(1, S, S, 3)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    shape: [usize; 4],
    data: Vec<f32>,
}

impl ImageTensor {
    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// RGB triple at row `y`, column `x`.
    pub fn pixel(&self, y: usize, x: usize) -> Option<[f32; 3]> {
        let [_, height, width, channels] = self.shape;
        if y >= height || x >= width {
            return None;
        }
        let offset = (y * width + x) * channels;
        Some([self.data[offset], self.data[offset + 1], self.data[offset + 2]])
    }

    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }
}

/// Turns raw images into model-ready tensors.
#[derive(Clone)]
pub struct ImagePreprocessor {
    pipeline: Pipeline,
    input_size: u32,
}

impl ImagePreprocessor {
    pub fn new(config: &GraderConfig) -> Self {
        let mut pipeline = Pipeline::new().add_step_boxed(Box::new(SizeGuardStep {
            max_dimension: config.max_dimension,
        }));
        if config.square_input {
            pipeline = pipeline.add_step_boxed(Box::new(CenterCropStep));
        }
        let pipeline = pipeline.add_step_boxed(Box::new(ResizeStep {
            size: config.input_size,
        }));

        Self {
            pipeline,
            input_size: config.input_size,
        }
    }

    /// Save every intermediate image under `output_dir`.
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self> {
        self.pipeline = self.pipeline.with_debug(output_dir)?;
        Ok(self)
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Decode, orient, resize and normalize an image source.
    pub fn prepare(&self, source: impl Into<ImageSource>) -> Result<ImageTensor> {
        let source = source.into().decode()?;
        self.prepare_decoded(source)
    }

    pub fn prepare_decoded(&self, source: SourceImage) -> Result<ImageTensor> {
        check_supported(&source.image)?;
        debug!(
            "Preprocessing {}x{} image (orientation {:?})",
            source.image.width(),
            source.image.height(),
            source.orientation
        );

        let upright = source.upright();
        let resized = self.pipeline.run(upright)?;
        Ok(self.normalize(&resized))
    }

    fn normalize(&self, image: &DynamicImage) -> ImageTensor {
        let rgb = image.to_rgb8();
        let size = self.input_size as usize;
        let mut data = Vec::with_capacity(size * size * 3);
        for pixel in rgb.pixels() {
            data.extend(pixel.0.iter().map(|&channel| channel as f32 / 255.0));
        }
        ImageTensor {
            shape: [1, size, size, 3],
            data,
        }
    }
}

fn check_supported(image: &DynamicImage) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(GraderError::UnsupportedFormat(format!(
            "Image has no pixels ({}x{})",
            image.width(),
            image.height()
        )));
    }
    match image {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_)
        | DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_)
        | DynamicImage::ImageRgb16(_)
        | DynamicImage::ImageRgba16(_)
        | DynamicImage::ImageRgb32F(_)
        | DynamicImage::ImageRgba32F(_) => Ok(()),
        other => Err(GraderError::UnsupportedFormat(format!(
            "Unexpected color layout {:?}",
            other.color()
        ))),
    }
}
