pub mod brush;
pub mod canvas_ops;
pub mod fill;
pub mod filters;
pub mod jobs;
pub mod transform;
