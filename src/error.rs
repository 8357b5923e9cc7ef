use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Source Error: {0}")]
    SourceError(String),

    #[error("Detection Error: {0}")]
    DetectionError(String),

    #[error("Detection Error on frame {frame_index}: {reason}")]
    FrameDetectionError { frame_index: usize, reason: String },

    #[error("Flow Error: {0}")]
    FlowError(String),

    #[error("Render Error: {0}")]
    RenderError(String),

    #[error("Config Error: {0}")]
    ConfigError(String),

    #[error("Invalid region ({x1}, {y1}, {x2}, {y2})")]
    InvalidRegion { x1: u32, y1: u32, x2: u32, y2: u32 },

    #[error("Frame index {next} does not follow {last}")]
    NonMonotonicFrame { last: usize, next: usize },

    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Image Error: {0}")]
    ImageError(#[from] image::ImageError),

    #[cfg(feature = "opencv")]
    #[error("OpenCV Error: {0}")]
    OpenCvError(#[from] opencv::Error),
}
