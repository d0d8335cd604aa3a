//! # primwalk
//!
//! Vulkan rendering for the toolkit. Implements the device seams of [`primwalk_core`] on `vulkano`:
//! swapchain frames, staged uploads, sampled images, and the UI draw pipeline.
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::pedantic)]

pub mod frame;
pub mod image;
pub mod render_device;
pub mod staging;
pub mod ui_render;
pub mod vulkano_prelude;
pub mod window;

pub use primwalk_core;
