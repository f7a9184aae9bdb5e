use std::path::{Path, PathBuf};

use image::Rgba;
use uuid::Uuid;

use crate::canvas::{LayerStack, RasterBuffer};
use crate::compositor;
use crate::components::history::{Command, HistoryManager, LayerPixelsCommand};
use crate::components::tools::{EditorSession, Tool};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::io;
use crate::ops::brush::{BrushEngine, BrushParams, StrokeKind, StrokeSummary};
use crate::ops::fill::{FillResult, flood_fill};
use crate::ops::filters::{EffectRequest, FilterService, run_filter};
use crate::ops::jobs::{FilterJob, JobKind, JobResult};

/// The stroke currently being drawn and the undo entry it will become.
struct ActiveStroke {
    command: LayerPixelsCommand,
    layer_id: Uuid,
    params: BrushParams,
    kind: StrokeKind,
}

/// Single open document: its layers, its history and in-progress input.
pub struct Project {
    pub id: Uuid,
    pub stack: LayerStack,
    pub history: HistoryManager,
    /// `None` for unsaved/untitled files.
    pub path: Option<PathBuf>,
    pub is_dirty: bool,
    /// Display name (derived from path or "Untitled-X")
    pub name: String,

    brush: BrushEngine,
    stroke: Option<ActiveStroke>,
    /// Live filter preview for one layer, shown by `render_preview`.
    preview: Option<(Uuid, RasterBuffer)>,
}

impl Project {
    pub fn new_untitled(untitled_counter: usize, width: u32, height: u32, config: &EngineConfig) -> Result<Self> {
        let stack = LayerStack::with_background(width, height, Rgba([255, 255, 255, 255]))?;
        Ok(Self::from_stack(format!("Untitled-{}", untitled_counter), stack, config))
    }

    pub fn from_stack(name: impl Into<String>, stack: LayerStack, config: &EngineConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            stack,
            history: HistoryManager::from_config(config),
            path: None,
            is_dirty: false,
            name: name.into(),
            brush: BrushEngine::new(),
            stroke: None,
            preview: None,
        }
    }

    pub fn open(path: &Path, config: &EngineConfig) -> Result<Self> {
        let stack = io::open_document(path)?;
        let mut project = Self::from_stack(String::new(), stack, config);
        project.path = Some(path.to_path_buf());
        project.update_name_from_path();
        Ok(project)
    }

    pub fn save_composite(&mut self, path: &Path) -> Result<()> {
        io::save_composite(&self.stack, path)?;
        self.path = Some(path.to_path_buf());
        self.update_name_from_path();
        self.mark_clean();
        Ok(())
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    pub fn update_name_from_path(&mut self) {
        if let Some(ref path) = self.path {
            self.name = path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "Unknown".to_string());
        }
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }

    // ------------------------------------------------------------------
    //  Pointer input
    // ------------------------------------------------------------------

    pub fn is_stroking(&self) -> bool {
        self.stroke.is_some()
    }

    /// Pointer pressed. Starts a stroke for brush/eraser, fills for the fill
    /// tool. `Ok(false)` when there is no writable active layer.
    pub fn pointer_down(&mut self, session: &EditorSession, point: (f32, f32)) -> Result<bool> {
        if self.stroke.is_some() {
            return Ok(false);
        }
        let Some(index) = self.writable_active_layer() else {
            return Ok(false);
        };
        match (session.tool, session.stroke_params()) {
            (Tool::Fill, _) | (_, None) => {
                let res = self.fill_at(session, point.0.floor() as i64, point.1.floor() as i64)?;
                Ok(res.filled > 0)
            }
            (_, Some((params, kind))) => {
                let Some(command) = LayerPixelsCommand::new(stroke_label(kind), &self.stack, index)? else {
                    return Ok(false);
                };
                let layer_id = self.stack.layers()[index].id();
                self.brush.start(point);
                self.stroke = Some(ActiveStroke { command, layer_id, params, kind });
                Ok(true)
            }
        }
    }

    /// Pointer dragged. Returns the number of stamps applied.
    pub fn pointer_move(&mut self, session: &EditorSession, point: (f32, f32)) -> usize {
        let Some(stroke) = &self.stroke else { return 0 };
        let Some(layer) = self.stack.index_of(stroke.layer_id).and_then(|i| self.stack.layer_mut(i)) else {
            return 0;
        };
        self.brush
            .move_to(layer.pixels_mut(), point, &stroke.params, stroke.kind, session.selection())
    }

    /// Pointer released. Commits the stroke as one history entry.
    pub fn pointer_up(&mut self, session: &EditorSession) -> Result<Option<StrokeSummary>> {
        let Some(stroke) = self.stroke.take() else {
            return Ok(None);
        };
        let Some(layer) = self.stack.index_of(stroke.layer_id).and_then(|i| self.stack.layer_mut(i)) else {
            self.brush.cancel();
            return Ok(None);
        };
        let summary = self
            .brush
            .end(layer.pixels_mut(), &stroke.params, stroke.kind, session.selection());
        self.record(stroke.command)?;
        log::debug!("{} committed: {} stamps", stroke_label(stroke.kind), summary.stamps);
        Ok(Some(summary))
    }

    /// Abort the stroke in progress and restore the layer.
    pub fn cancel_stroke(&mut self) {
        if let Some(stroke) = self.stroke.take() {
            self.brush.cancel();
            stroke.command.undo(&mut self.stack);
        }
    }

    /// Flood fill the active layer at `(x, y)` with the primary color.
    pub fn fill_at(&mut self, session: &EditorSession, x: i64, y: i64) -> Result<FillResult> {
        let Some(index) = self.writable_active_layer() else {
            return Ok(FillResult::default());
        };
        let Some(command) = LayerPixelsCommand::new("Fill", &self.stack, index)? else {
            return Ok(FillResult::default());
        };
        let Some(layer) = self.stack.layer_mut(index) else {
            return Ok(FillResult::default());
        };
        let result = flood_fill(
            layer.pixels_mut(),
            x,
            y,
            session.primary_color,
            session.fill.tolerance,
            session.selection(),
        )?;
        if result.filled > 0 {
            self.record(command)?;
        }
        Ok(result)
    }

    // ------------------------------------------------------------------
    //  History
    // ------------------------------------------------------------------

    pub fn undo(&mut self) -> Option<String> {
        self.cancel_stroke();
        self.preview = None;
        let description = self.history.undo(&mut self.stack)?;
        self.mark_dirty();
        Some(description)
    }

    pub fn redo(&mut self) -> Option<String> {
        self.cancel_stroke();
        self.preview = None;
        let description = self.history.redo(&mut self.stack)?;
        self.mark_dirty();
        Some(description)
    }

    // ------------------------------------------------------------------
    //  Rendering and filters
    // ------------------------------------------------------------------

    pub fn render(&self) -> Result<RasterBuffer> {
        self.stack.render()
    }

    /// Composite with the live preview substituted for its layer, if any.
    pub fn render_preview(&self) -> Result<RasterBuffer> {
        match &self.preview {
            Some((id, pixels)) => match self.stack.index_of(*id) {
                Some(index) => compositor::render_with_override(&self.stack, index, pixels),
                None => self.stack.render(),
            },
            None => self.stack.render(),
        }
    }

    pub fn has_preview(&self) -> bool {
        self.preview.is_some()
    }

    pub fn clear_preview(&mut self) {
        self.preview = None;
    }

    /// Apply a filter to the active layer right away, on the calling thread.
    pub fn apply_filter(
        &mut self,
        service: &dyn FilterService,
        request: &EffectRequest,
        session: &EditorSession,
    ) -> Result<bool> {
        let Some(index) = self.writable_active_layer() else {
            return Ok(false);
        };
        let input = self.stack.layers()[index].pixels();
        let output = run_filter(service, input, request, session.selection())?;
        self.commit_pixels(index, &request.name, output)
    }

    /// Build a background job over a private copy of the active layer.
    pub fn filter_job(
        &self,
        description: impl Into<String>,
        chain: Vec<EffectRequest>,
        session: &EditorSession,
    ) -> Result<Option<FilterJob>> {
        let Some(index) = self.writable_active_layer() else {
            return Ok(None);
        };
        let layer = &self.stack.layers()[index];
        Ok(Some(FilterJob {
            layer_id: layer.id(),
            description: description.into(),
            input: layer.pixels().try_clone()?,
            chain,
            selection: session.selection().cloned(),
        }))
    }

    /// Take a finished job from the worker. Previews are held for
    /// `render_preview`; commits replace the layer's pixels under one undo
    /// entry. Returns `Ok(false)` when the result no longer applies.
    pub fn apply_job_result(&mut self, result: JobResult) -> Result<bool> {
        let pixels = match result.outcome {
            Ok(pixels) => pixels,
            Err(e) => {
                log::warn!("filter '{}' failed: {}", result.description, e);
                return Ok(false);
            }
        };
        let Some(index) = self.stack.index_of(result.layer_id) else {
            log::warn!("filter '{}': target layer is gone", result.description);
            return Ok(false);
        };
        match result.kind {
            JobKind::Preview => {
                self.preview = Some((result.layer_id, pixels));
                Ok(true)
            }
            JobKind::Commit => {
                self.preview = None;
                if self.stack.layers()[index].locked {
                    return Ok(false);
                }
                self.commit_pixels(index, &result.description, pixels)
            }
        }
    }

    fn commit_pixels(&mut self, index: usize, description: &str, pixels: RasterBuffer) -> Result<bool> {
        let Some(command) = LayerPixelsCommand::new(description, &self.stack, index)? else {
            return Ok(false);
        };
        let Some(layer) = self.stack.layer_mut(index) else {
            return Ok(false);
        };
        *layer.pixels_mut() = pixels.conformed(layer.width(), layer.height())?;
        self.record(command)?;
        Ok(true)
    }

    /// Push a single-layer edit once its after-state is captured. If that
    /// capture fails the layer is rolled back and nothing is recorded.
    fn record(&mut self, mut command: LayerPixelsCommand) -> Result<()> {
        if let Err(e) = command.set_after(&self.stack) {
            command.undo(&mut self.stack);
            return Err(e);
        }
        self.history.push(Box::new(command));
        self.mark_dirty();
        Ok(())
    }

    fn writable_active_layer(&self) -> Option<usize> {
        let index = self.stack.active_index()?;
        let layer = self.stack.layer(index)?;
        if layer.locked {
            log::warn!("layer '{}' is locked", layer.name);
            return None;
        }
        Some(index)
    }
}

fn stroke_label(kind: StrokeKind) -> &'static str {
    match kind {
        StrokeKind::Paint => "Brush Stroke",
        StrokeKind::Erase => "Eraser Stroke",
    }
}
