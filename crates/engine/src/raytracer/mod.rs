mod backend;
mod frame_buffers;
mod properties;
mod render_texture;
pub mod software;

pub use backend::*;
pub use frame_buffers::*;
pub use properties::*;
pub use render_texture::*;
