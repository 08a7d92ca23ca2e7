/// "Core" holds the long-lived Vulkan objects the lifecycle is built from: the instance, the
/// device, the window surface, the swapchain and the per-frame synchronization pool.

pub mod check;
pub mod config;
pub mod device;
pub mod instance;
pub mod probe;
pub mod queue;
pub mod surface;
pub mod swapchain;
pub mod sync;
