pub mod image_ops;
pub mod metrics;

pub use image_ops::{decode_rgba_async, encode_png, encode_png_async, grayscale, png_data_url};
pub use metrics::{Metrics, MetricsSnapshot, Stage};
