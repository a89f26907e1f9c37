// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash, each object destroyed in its Drop
// (or by its owner, for plain handles like sync objects and pipelines)

pub mod buffer;
pub mod command;
pub mod device;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use buffer::Buffer;
pub use device::VulkanDevice;
pub use instance::Instance;
pub use surface::Surface;
pub use swapchain::Swapchain;
