//! Layered raster editing engine: layer stacks and compositing, brush and
//! fill tools, undo history, canvas transforms and background filters.

pub mod blend;
pub mod canvas;
pub mod components;
pub mod compositor;
pub mod config;
pub mod error;
pub mod io;
pub mod logger;
pub mod ops;
pub mod project;

pub use blend::BlendMode;
pub use canvas::{Layer, LayerProperties, LayerStack, RasterBuffer};
pub use components::history::{Command, HistoryManager};
pub use components::tools::{EditorSession, Tool};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use project::Project;
