// Error taxonomy for the presentation engine
//
// Setup failures (no adapter, no memory type, shader/pipeline creation) and
// unexpected runtime failures are fatal. Stale swapchains are not errors at
// all: they surface as `AcquireOutcome::Stale` / `PresentOutcome::Stale`.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no adapter supports graphics, presentation and the swapchain extension")]
    NoSuitableAdapter,

    #[error("no memory type matches bits {type_bits:#b} with flags {required:?}")]
    NoCompatibleMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("fence was not signalled within {timeout_ns} ns, GPU appears stalled")]
    FenceTimeout { timeout_ns: u64 },

    #[error("surface format changed from {expected:?} to {found:?}, render pass is incompatible")]
    SurfaceFormatChanged {
        expected: vk::Format,
        found: vk::Format,
    },

    #[error("cannot upload an empty buffer")]
    EmptyUpload,

    #[error("{context}: {result}")]
    Vulkan {
        context: &'static str,
        #[source]
        result: vk::Result,
    },
}

impl GpuError {
    pub fn vulkan(context: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Vulkan { context, result }
    }
}
