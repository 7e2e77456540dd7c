//! See [`Error`].

use thiserror::Error;

/// このクレートのエラー型
#[derive(Debug, Error)]
pub enum Error {
    #[error("expected {expected} scales, got {got} raw prediction tensors")]
    ScaleCount { expected: usize, got: usize },

    #[error("scale {scale}: expected a {expected_h}x{expected_w} grid, got {got_h}x{got_w}")]
    GridShape {
        scale: usize,
        expected_h: usize,
        expected_w: usize,
        got_h: usize,
        got_w: usize,
    },

    #[error(
        "scale {scale}: expected {expected} channels (K * (1 + C + 4)), got {got}"
    )]
    ChannelCount {
        scale: usize,
        expected: usize,
        got: usize,
    },

    #[error("scale {scale}: expected {expected} anchors, got {got}")]
    AnchorCount {
        scale: usize,
        expected: usize,
        got: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("`{name}` must be within [0, 1], got {value}")]
    InvalidThreshold { name: &'static str, value: f32 },

    #[error("failed to build output array")]
    Shape(#[from] ndarray::ShapeError),
}

/// Type alias for [`Result<T, Error>`].
pub type Result<T> = std::result::Result<T, Error>;
