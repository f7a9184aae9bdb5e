use std::collections::VecDeque;

use image::GrayImage;
use uuid::Uuid;

use crate::canvas::{Layer, LayerProperties, LayerStack, RasterBuffer, try_clone_gray};
use crate::config::EngineConfig;
use crate::error::Result;

// ============================================================================
// COMMAND TRAIT
// ============================================================================

/// A reversible mutation of a [`LayerStack`].
///
/// Commands are pushed only after the mutation they describe has completed,
/// and own copies of every buffer they restore.
pub trait Command: Send + Sync {
    fn undo(&self, stack: &mut LayerStack);
    fn redo(&self, stack: &mut LayerStack);
    fn description(&self) -> String;
    fn memory_size(&self) -> usize;
}

// ============================================================================
// LAYER PIXELS COMMAND - before/after copies of one layer's pixels and mask
// ============================================================================

#[derive(Clone)]
struct LayerContent {
    pixels: RasterBuffer,
    mask: Option<GrayImage>,
}

impl LayerContent {
    fn capture(layer: &Layer) -> Result<Self> {
        Ok(Self {
            pixels: layer.pixels().try_clone()?,
            mask: match layer.mask() {
                Some(m) => Some(try_clone_gray(m)?),
                None => None,
            },
        })
    }

    fn memory_bytes(&self) -> usize {
        self.pixels.memory_bytes() + self.mask.as_ref().map_or(0, |m| m.as_raw().len())
    }
}

/// Undo unit for strokes, fills and filters on a single layer.
pub struct LayerPixelsCommand {
    description: String,
    layer_id: Uuid,
    layer_index: usize,
    before: LayerContent,
    after: Option<LayerContent>,
}

impl LayerPixelsCommand {
    /// Capture the layer BEFORE mutating it. `Ok(None)` for an invalid index.
    pub fn new(description: impl Into<String>, stack: &LayerStack, layer_index: usize) -> Result<Option<Self>> {
        let Some(layer) = stack.layer(layer_index) else {
            return Ok(None);
        };
        Ok(Some(Self {
            description: description.into(),
            layer_id: layer.id(),
            layer_index,
            before: LayerContent::capture(layer)?,
            after: None,
        }))
    }

    /// Capture the "after" state once the mutation completes.
    pub fn set_after(&mut self, stack: &LayerStack) -> Result<()> {
        if let Some(layer) = self.target(stack).and_then(|i| stack.layer(i)) {
            self.after = Some(LayerContent::capture(layer)?);
        }
        Ok(())
    }

    /// Resolve the layer by id only. A layer that has left the stack is
    /// skipped rather than guessed at by its old index.
    fn target(&self, stack: &LayerStack) -> Option<usize> {
        let index = stack.index_of(self.layer_id);
        if index.is_none() {
            log::warn!(
                "{}: layer {} (was at index {}) no longer in stack, skipping",
                self.description,
                self.layer_id,
                self.layer_index
            );
        }
        index
    }

    fn apply(&self, stack: &mut LayerStack, content: &LayerContent) {
        let Some(index) = self.target(stack) else { return };
        if let Some(layer) = stack.layer_mut(index) {
            layer.restore_content(content.pixels.clone(), content.mask.clone());
        }
    }
}

impl Command for LayerPixelsCommand {
    fn undo(&self, stack: &mut LayerStack) {
        self.apply(stack, &self.before);
    }

    fn redo(&self, stack: &mut LayerStack) {
        if let Some(after) = &self.after {
            self.apply(stack, after);
        }
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        self.before.memory_bytes() + self.after.as_ref().map_or(0, LayerContent::memory_bytes)
    }
}

// ============================================================================
// LAYER PROPERTY COMMAND - name and display flags
// ============================================================================

pub struct LayerPropertyCommand {
    description: String,
    layer_id: Uuid,
    before: LayerProperties,
    after: LayerProperties,
}

impl LayerPropertyCommand {
    pub fn new(description: impl Into<String>, layer: &Layer, before: LayerProperties) -> Self {
        Self {
            description: description.into(),
            layer_id: layer.id(),
            before,
            after: layer.properties(),
        }
    }

    fn apply(&self, stack: &mut LayerStack, props: &LayerProperties) {
        match stack.index_of(self.layer_id).and_then(|i| stack.layer_mut(i)) {
            Some(layer) => layer.apply_properties(props),
            None => log::warn!("{}: layer {} no longer in stack", self.description, self.layer_id),
        }
    }
}

impl Command for LayerPropertyCommand {
    fn undo(&self, stack: &mut LayerStack) {
        self.apply(stack, &self.before);
    }

    fn redo(&self, stack: &mut LayerStack) {
        self.apply(stack, &self.after);
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.before.name.len() + self.after.name.len()
    }
}

// ============================================================================
// STACK SNAPSHOT COMMAND - whole-stack undo for structural operations
// ============================================================================

/// Stores complete copies of the stack for add/remove/move/merge/resize.
pub struct StackSnapshotCommand {
    description: String,
    before: LayerStack,
    after: Option<LayerStack>,
}

impl StackSnapshotCommand {
    /// Create BEFORE performing the operation, then call `set_after()`.
    pub fn new(description: impl Into<String>, stack: &LayerStack) -> Result<Self> {
        Ok(Self {
            description: description.into(),
            before: stack.try_clone()?,
            after: None,
        })
    }

    pub fn set_after(&mut self, stack: &LayerStack) -> Result<()> {
        self.after = Some(stack.try_clone()?);
        Ok(())
    }
}

impl Command for StackSnapshotCommand {
    fn undo(&self, stack: &mut LayerStack) {
        stack.restore_from(&self.before);
    }

    fn redo(&self, stack: &mut LayerStack) {
        if let Some(after) = &self.after {
            stack.restore_from(after);
        }
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        self.before.memory_bytes() + self.after.as_ref().map_or(0, LayerStack::memory_bytes)
    }
}

// ============================================================================
// CLOSURE COMMAND - caller supplied do/undo
// ============================================================================

type StackFn = Box<dyn Fn(&mut LayerStack) + Send + Sync>;

/// A command built from a pair of closures. The closures must capture owned
/// state, never references into the live stack.
pub struct ClosureCommand {
    description: String,
    do_fn: StackFn,
    undo_fn: StackFn,
    memory: usize,
}

impl ClosureCommand {
    pub fn new<D, U>(description: impl Into<String>, do_fn: D, undo_fn: U) -> Self
    where
        D: Fn(&mut LayerStack) + Send + Sync + 'static,
        U: Fn(&mut LayerStack) + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            do_fn: Box::new(do_fn),
            undo_fn: Box::new(undo_fn),
            memory: 0,
        }
    }

    /// Declare how many bytes the closures hold, for the history budget.
    pub fn with_memory_size(mut self, bytes: usize) -> Self {
        self.memory = bytes;
        self
    }
}

impl Command for ClosureCommand {
    fn undo(&self, stack: &mut LayerStack) {
        (self.undo_fn)(stack);
    }

    fn redo(&self, stack: &mut LayerStack) {
        (self.do_fn)(stack);
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        self.memory
    }
}

// ============================================================================
// HISTORY MANAGER
// ============================================================================

pub struct HistoryManager {
    undo_stack: VecDeque<Box<dyn Command>>,
    redo_stack: VecDeque<Box<dyn Command>>,
    max_history_size: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size: max_history_size.max(1),
            max_memory_bytes: Some(100 * 1024 * 1024),
            total_memory: 0,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let mut history = Self::new(config.max_undo_steps);
        history.max_memory_bytes = config.history_memory_bytes();
        history
    }

    /// `None` removes the memory cap.
    pub fn set_memory_limit(&mut self, bytes: Option<usize>) {
        self.max_memory_bytes = bytes;
        self.prune();
    }

    pub fn set_max_history_size(&mut self, size: usize) {
        self.max_history_size = size.max(1);
        self.prune();
    }

    /// Record a completed mutation. Discards the redo branch.
    pub fn push(&mut self, command: Box<dyn Command>) {
        for cmd in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(cmd.memory_size());
        }
        log::debug!("history: {}", command.description());
        self.total_memory += command.memory_size();
        self.undo_stack.push_back(command);
        self.prune();
    }

    pub fn undo(&mut self, stack: &mut LayerStack) -> Option<String> {
        let command = self.undo_stack.pop_back()?;
        let description = command.description();
        command.undo(stack);
        self.redo_stack.push_back(command);
        Some(description)
    }

    pub fn redo(&mut self, stack: &mut LayerStack) -> Option<String> {
        let command = self.redo_stack.pop_back()?;
        let description = command.description();
        command.redo(stack);
        self.undo_stack.push_back(command);
        Some(description)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|c| c.description())
    }

    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.back().map(|c| c.description())
    }

    /// All undo descriptions, most recent first.
    pub fn undo_history(&self) -> Vec<String> {
        self.undo_stack.iter().rev().map(|c| c.description()).collect()
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    /// Drop the oldest undo entries beyond the count and memory limits. The
    /// newest entry always survives.
    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_history_size {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }

        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }

    /// Undo `count` steps (0 = nothing), stopping early when history runs out.
    pub fn undo_to(&mut self, count: usize, stack: &mut LayerStack) -> usize {
        let mut done = 0;
        while done < count && self.undo(stack).is_some() {
            done += 1;
        }
        done
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }
}
