//! Window and surface glue between winit and the Vulkan layers.

mod window;

pub use window::{FramebufferSource, Surface, Window, WindowExtent, required_surface_extensions};
