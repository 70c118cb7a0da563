//! Minimal Vulkan presentation engine: selects an adapter, uploads a small
//! piece of geometry, and presents it every frame through a swapchain that is
//! rebuilt whenever the window surface changes.

pub mod backend;
pub mod config;
pub mod error;
pub mod frame_loop;
pub mod recorder;
pub mod renderer;
pub mod scene;

pub use config::Config;
pub use error::GpuError;
pub use frame_loop::{FrameBackend, FrameLoop, FrameOutcome};
pub use renderer::Renderer;
pub use scene::{Sample, SceneDesc};
