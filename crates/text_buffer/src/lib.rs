mod buffer;
mod buffer_builder;
mod io;

pub use crate::buffer::{Position, TextBuffer};
pub use crate::buffer_builder::{EolConfig, PhaseError, TextBufferBuilder};
pub use crate::io::{load_from_path, LoadError};
