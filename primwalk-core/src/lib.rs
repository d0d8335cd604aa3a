//! # primwalk-core
//!
//! The GPU-agnostic half of the toolkit. Everything in here talks to the graphics device
//! only through the small traits at the seams ([`frame::FrameBackend`], [`frame::SlotFence`],
//! [`cache::ResourceFactory`], [`cache::TextureHandle`]), so the frame loop, the resource cache,
//! the font atlas builder, and draw batching can all be driven without a GPU.

pub mod bitmap;
pub mod cache;
pub mod color;
pub mod config;
pub mod draw;
pub mod font;
pub mod frame;
pub mod id;
pub mod util;
pub mod widget;

pub use bitmap::{Bitmap, PixelFormat};
pub use color::Color;
pub use id::{TextureID, UniqueID};
pub use util::{FiniteF32, Rect};

pub type AnyResult<T> = anyhow::Result<T>;
