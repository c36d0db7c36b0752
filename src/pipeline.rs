use image::DynamicImage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::error::{GraderError, Result};

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: PathBuf,
}

/// Context available to all pipeline steps
#[derive(Clone, Debug, Default)]
pub struct PipelineContext {
    pub debug: Option<DebugConfig>,
}

/// A single image transformation.
///
/// Steps take ownership of the incoming buffer and return a new one, so a
/// superseded buffer is released as soon as the step returns.
pub trait PipelineStep: Send + Sync {
    fn process(&self, image: DynamicImage, context: &PipelineContext) -> Result<DynamicImage>;

    /// Human-readable name for this step (used in logs and debug directories)
    fn name(&self) -> &str;
}

/// Composable pipeline builder
#[derive(Clone)]
pub struct Pipeline {
    steps: Vec<Arc<dyn PipelineStep>>,
    context: PipelineContext,
}

impl Pipeline {
    /// Create a new empty pipeline
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            context: PipelineContext::default(),
        }
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(GraderError::Io(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("Debug directory is not empty: {}", output_dir.display()),
                )));
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        self.context.debug = Some(DebugConfig { output_dir });
        Ok(self)
    }

    /// Add a processing step to the pipeline
    pub fn add_step(mut self, step: Arc<dyn PipelineStep>) -> Self {
        self.steps.push(step);
        self
    }

    /// Helper method to add a step from a Box (for convenience)
    pub fn add_step_boxed(mut self, step: Box<dyn PipelineStep>) -> Self {
        self.steps.push(Arc::from(step));
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Run every step in order on an input image
    pub fn run(&self, input: DynamicImage) -> Result<DynamicImage> {
        self.run_partial(input, self.steps.len())
    }

    /// Run the pipeline but stop after `num_steps` steps (useful for debugging)
    pub fn run_partial(&self, input: DynamicImage, num_steps: usize) -> Result<DynamicImage> {
        self.save_debug_output(&input, "00_input")?;

        let mut image = input;
        for (step_idx, step) in self.steps.iter().take(num_steps).enumerate() {
            let (width, height) = (image.width(), image.height());
            image = step.process(image, &self.context)?;
            debug!(
                step = step.name(),
                "{}x{} -> {}x{}",
                width,
                height,
                image.width(),
                image.height()
            );

            let step_dir_name = format!(
                "{:02}_{}",
                step_idx + 1,
                step.name().to_lowercase().replace(' ', "_")
            );
            self.save_debug_output(&image, &step_dir_name)?;
        }

        Ok(image)
    }

    /// Save an intermediate image if debug mode is enabled
    fn save_debug_output(&self, image: &DynamicImage, step_dir_name: &str) -> Result<()> {
        let Some(debug_config) = &self.context.debug else {
            return Ok(());
        };

        let step_dir = debug_config.output_dir.join(step_dir_name);
        std::fs::create_dir_all(&step_dir)?;
        let output_path = step_dir.join("01.png");
        image
            .to_rgb8()
            .save(&output_path)
            .map_err(|e| GraderError::Io(std::io::Error::other(format!(
                "Failed to save debug image {}: {}",
                output_path.display(),
                e
            ))))?;
        debug!("Debug: saved {}/01.png", step_dir_name);
        Ok(())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
