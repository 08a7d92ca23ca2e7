pub mod backend;
pub mod core;
pub mod frame;
pub mod lifecycle;
pub mod upload;

pub use backend::{RenderBackend, VulkanBackend};
pub use self::core::config::RenderConfig;
pub use self::core::surface::{PresentWindow, WindowBinding};
pub use frame::{ContentContext, FrameContent, FrameOutcome};
pub use lifecycle::{LifecycleController, LifecycleState};
