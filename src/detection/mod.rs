// Landmark detection module

pub mod circle_fit;

pub use circle_fit::{fit_circle, CircleFitter, HyperCircleFit};
