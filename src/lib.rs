//! Auto Threshold - adaptive threshold video effect
//!
//! Turns each frame into a black/white, two-tone, or chroma-preserving
//! threshold rendering. The threshold can be fixed by the user or estimated
//! per frame from the image content (edge-variance, entropy, or Otsu), with
//! the estimate from one frame applied to the next.

pub mod app;
pub mod compositor;
pub mod effect;
pub mod estimator;
pub mod params;
pub mod readback;
pub mod source;

pub use app::App;
