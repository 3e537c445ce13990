mod constants;
pub mod error;
pub mod lit;
mod parser;
mod types;
mod utils;
mod writer;

pub use constants::*;
pub use error::BspError;
pub use parser::{parse_bsp, parse_miptex};
pub use types::*;
pub use utils::{parse_entities_text, write_entities_text};

pub use glam::Vec3;
