mod purchase;
mod video;

pub use purchase::*;
pub use video::*;
