use image::{GrayImage, Rgba};

use crate::config::EngineConfig;
use crate::ops::brush::{BrushParams, StrokeKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Tool {
    #[default]
    Brush,
    Eraser,
    Fill,
}

impl Tool {
    pub fn all() -> &'static [Tool] {
        &[Tool::Brush, Tool::Eraser, Tool::Fill]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tool::Brush => "Brush",
            Tool::Eraser => "Eraser",
            Tool::Fill => "Fill",
        }
    }

    /// Stroke flavour for stroke-based tools, `None` for click tools.
    pub fn stroke_kind(&self) -> Option<StrokeKind> {
        match self {
            Tool::Brush => Some(StrokeKind::Paint),
            Tool::Eraser => Some(StrokeKind::Erase),
            Tool::Fill => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FillSettings {
    /// Euclidean RGB distance from the seed color, 0..=255.
    pub tolerance: f32,
}

impl Default for FillSettings {
    fn default() -> Self {
        Self { tolerance: 32.0 }
    }
}

/// Everything the editor's tools read while handling input: the current
/// tool, colors, per-tool settings and the selection mask. One per editor
/// window, passed by reference into every tool operation.
#[derive(Clone, Debug)]
pub struct EditorSession {
    pub tool: Tool,
    pub primary_color: Rgba<u8>,
    pub secondary_color: Rgba<u8>,
    pub brush: BrushParams,
    pub eraser: BrushParams,
    pub fill: FillSettings,
    /// Canvas-sized selection; 0 = not selected. `None` selects everything.
    selection: Option<GrayImage>,
}

impl Default for EditorSession {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl EditorSession {
    pub fn from_config(config: &EngineConfig) -> Self {
        let brush = BrushParams {
            diameter: config.default_brush_size.max(1),
            hardness: config.default_hardness,
            opacity: 1.0,
            spacing: config.default_spacing,
            color: Rgba([0, 0, 0, 255]),
        };
        Self {
            tool: Tool::Brush,
            primary_color: Rgba([0, 0, 0, 255]),
            secondary_color: Rgba([255, 255, 255, 255]),
            brush,
            eraser: brush,
            fill: FillSettings { tolerance: config.default_fill_tolerance },
            selection: None,
        }
    }

    pub fn swap_colors(&mut self) {
        std::mem::swap(&mut self.primary_color, &mut self.secondary_color);
    }

    /// Brush parameters for the current tool with the primary color applied.
    pub fn stroke_params(&self) -> Option<(BrushParams, StrokeKind)> {
        let kind = self.tool.stroke_kind()?;
        let params = match kind {
            StrokeKind::Paint => BrushParams { color: self.primary_color, ..self.brush },
            StrokeKind::Erase => self.eraser,
        };
        Some((params, kind))
    }

    pub fn selection(&self) -> Option<&GrayImage> {
        self.selection.as_ref()
    }

    /// Replace the selection. Pixels outside the mask count as unselected.
    pub fn set_selection(&mut self, mask: Option<GrayImage>) {
        self.selection = mask;
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }
}
