/// Fixed geometry and policy of the deployed classifier.
///
/// Defaults describe the 12-class mushroom model trained at 256x256.
#[derive(Debug, Clone, PartialEq)]
pub struct GraderConfig {
    /// Edge length `S` of the `(1, S, S, 3)` model input.
    pub input_size: u32,
    /// Center-crop to a square before scaling to `input_size`.
    pub square_input: bool,
    /// Larger sources are downscaled to fit this bound before any other step.
    pub max_dimension: u32,
    /// Minimum winning score for a prediction to be accepted.
    pub confidence_threshold: f32,
    /// Length of the model's score vector.
    pub num_classes: usize,
}

pub const DEFAULT_INPUT_SIZE: u32 = 256;
pub const DEFAULT_MAX_DIMENSION: u32 = 2048;
pub const CONFIDENCE_THRESHOLD: f32 = 0.20;
pub const DEFAULT_NUM_CLASSES: usize = 12;

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            square_input: true,
            max_dimension: DEFAULT_MAX_DIMENSION,
            confidence_threshold: CONFIDENCE_THRESHOLD,
            num_classes: DEFAULT_NUM_CLASSES,
        }
    }
}

impl GraderConfig {
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    /// Shape of the tensor handed to the model.
    pub fn input_shape(&self) -> [usize; 4] {
        let s = self.input_size as usize;
        [1, s, s, 3]
    }
}
