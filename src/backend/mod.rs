// Backend module - Vulkan abstraction layer
//
// Thin RAII wrappers around ash. Ownership forms a tree rooted at the
// instance: every object holds an Arc to the object it was created from and
// destroys itself on drop, so teardown runs in reverse creation order on
// every exit path.

pub mod buffer;
pub mod commands;
pub mod device;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod selector;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use instance::VulkanInstance;
pub use surface::Surface;
pub use swapchain::Swapchain;
