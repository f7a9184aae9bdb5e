// ============================================================================
// CANVAS-LEVEL OPERATIONS - every stack mutation paired with an undo entry
// ============================================================================
//
// Each function mutates the stack first and pushes a command only once the
// mutation has succeeded. Failed or rejected operations leave both the stack
// and the history untouched.

use image::{GrayImage, Rgba};

use crate::blend::BlendMode;
use crate::canvas::{LayerProperties, LayerStack};
use crate::components::history::{
    Command, HistoryManager, LayerPixelsCommand, LayerPropertyCommand, StackSnapshotCommand,
};
use crate::error::Result;
use crate::ops::transform::{Anchor, Interpolation};

/// Run a structural operation under a whole-stack snapshot. `keep` decides
/// from the operation's return value whether anything changed. On any error
/// the stack is restored from the snapshot and nothing is recorded.
fn snapshot_op<T>(
    stack: &mut LayerStack,
    history: &mut HistoryManager,
    description: &str,
    op: impl FnOnce(&mut LayerStack) -> Result<T>,
    keep: impl FnOnce(&T) -> bool,
) -> Result<T> {
    let mut cmd = StackSnapshotCommand::new(description, stack)?;
    let out = match op(stack) {
        Ok(out) => out,
        Err(e) => {
            cmd.undo(stack);
            return Err(e);
        }
    };
    if keep(&out) {
        if let Err(e) = cmd.set_after(stack) {
            cmd.undo(stack);
            return Err(e);
        }
        history.push(Box::new(cmd));
    }
    Ok(out)
}

pub fn add_layer(stack: &mut LayerStack, history: &mut HistoryManager) -> Result<usize> {
    let name = format!("Layer {}", stack.len());
    snapshot_op(stack, history, "New Layer", |s| s.add_new_layer(name), |_| true)
}

pub fn delete_layer(stack: &mut LayerStack, history: &mut HistoryManager, index: usize) -> Result<bool> {
    snapshot_op(stack, history, "Delete Layer", |s| Ok(s.remove(index).is_some()), |ok| *ok)
}

pub fn move_layer(stack: &mut LayerStack, history: &mut HistoryManager, from: usize, to: usize) -> Result<bool> {
    let target = to.min(stack.len().saturating_sub(1));
    if from == target {
        return Ok(from < stack.len());
    }
    snapshot_op(stack, history, "Move Layer", |s| Ok(s.move_layer(from, to)), |ok| *ok)
}

pub fn duplicate_layer(stack: &mut LayerStack, history: &mut HistoryManager, index: usize) -> Result<Option<usize>> {
    snapshot_op(stack, history, "Duplicate Layer", |s| s.duplicate(index), Option::is_some)
}

pub fn merge_layers(stack: &mut LayerStack, history: &mut HistoryManager, indices: &[usize]) -> Result<Option<usize>> {
    snapshot_op(stack, history, "Merge Layers", |s| s.merge(indices), Option::is_some)
}

/// Merge a layer into the one below it.
pub fn merge_down(stack: &mut LayerStack, history: &mut HistoryManager, index: usize) -> Result<Option<usize>> {
    if index == 0 || index >= stack.len() {
        return Ok(None);
    }
    snapshot_op(stack, history, "Merge Down", |s| s.merge(&[index - 1, index]), Option::is_some)
}

pub fn resize_canvas(
    stack: &mut LayerStack,
    history: &mut HistoryManager,
    width: u32,
    height: u32,
    anchor: Anchor,
    background: Rgba<u8>,
) -> Result<()> {
    snapshot_op(stack, history, "Resize Canvas", |s| s.resize_canvas(width, height, anchor, background), |_| true)
}

pub fn crop_canvas(
    stack: &mut LayerStack,
    history: &mut HistoryManager,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
) -> Result<bool> {
    snapshot_op(stack, history, "Crop", |s| s.crop(x, y, width, height), |ok| *ok)
}

pub fn scale_image(
    stack: &mut LayerStack,
    history: &mut HistoryManager,
    width: u32,
    height: u32,
    interp: Interpolation,
) -> Result<()> {
    snapshot_op(stack, history, "Resize Image", |s| s.scale_image(width, height, interp), |_| true)
}

pub fn flatten_image(stack: &mut LayerStack, history: &mut HistoryManager) -> Result<()> {
    snapshot_op(stack, history, "Flatten Image", LayerStack::flatten, |_| true)
}

// ---------------------------------------------------------------------------
//  Layer properties
// ---------------------------------------------------------------------------

/// Edit one layer's properties through `edit` and record the change.
/// Returns `false` for an invalid index or when nothing changed.
fn property_op(
    stack: &mut LayerStack,
    history: &mut HistoryManager,
    index: usize,
    description: &str,
    edit: impl FnOnce(&mut LayerProperties),
) -> bool {
    let Some(layer) = stack.layer_mut(index) else {
        log::warn!("{}: invalid layer index {}", description, index);
        return false;
    };
    let before = layer.properties();
    let mut after = before.clone();
    edit(&mut after);
    layer.apply_properties(&after);
    if layer.properties() == before {
        return false;
    }
    history.push(Box::new(LayerPropertyCommand::new(description, layer, before)));
    true
}

pub fn set_layer_opacity(stack: &mut LayerStack, history: &mut HistoryManager, index: usize, opacity: f32) -> bool {
    property_op(stack, history, index, "Layer Opacity", |p| p.opacity = opacity)
}

pub fn set_layer_visibility(stack: &mut LayerStack, history: &mut HistoryManager, index: usize, visible: bool) -> bool {
    property_op(stack, history, index, "Layer Visibility", |p| p.visible = visible)
}

pub fn rename_layer(stack: &mut LayerStack, history: &mut HistoryManager, index: usize, name: &str) -> bool {
    property_op(stack, history, index, "Rename Layer", |p| p.name = name.to_string())
}

pub fn set_layer_blend_mode(stack: &mut LayerStack, history: &mut HistoryManager, index: usize, mode: BlendMode) -> bool {
    property_op(stack, history, index, "Layer Blend Mode", |p| p.blend_mode = mode)
}

pub fn set_layer_locked(stack: &mut LayerStack, history: &mut HistoryManager, index: usize, locked: bool) -> bool {
    property_op(stack, history, index, if locked { "Lock Layer" } else { "Unlock Layer" }, |p| p.locked = locked)
}

/// Assign or remove a layer mask. A mask of another size is rescaled.
pub fn set_layer_mask(
    stack: &mut LayerStack,
    history: &mut HistoryManager,
    index: usize,
    mask: Option<GrayImage>,
) -> Result<bool> {
    let description = if mask.is_some() { "Set Layer Mask" } else { "Remove Layer Mask" };
    let Some(mut cmd) = LayerPixelsCommand::new(description, stack, index)? else {
        log::warn!("{}: invalid layer index {}", description, index);
        return Ok(false);
    };
    if let Some(layer) = stack.layer_mut(index) {
        layer.set_mask(mask);
    }
    if let Err(e) = cmd.set_after(stack) {
        cmd.undo(stack);
        return Err(e);
    }
    history.push(Box::new(cmd));
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    fn doc() -> (LayerStack, HistoryManager) {
        (
            LayerStack::with_background(4, 4, Rgba([255, 255, 255, 255])).unwrap(),
            HistoryManager::default(),
        )
    }

    #[test]
    fn structural_ops_are_undoable() {
        let (mut stack, mut history) = doc();
        assert_eq!(add_layer(&mut stack, &mut history).unwrap(), 1);
        assert_eq!(duplicate_layer(&mut stack, &mut history, 1).unwrap(), Some(2));
        assert_eq!(stack.layer(2).unwrap().name, "Layer 1 copy");
        assert_eq!(merge_layers(&mut stack, &mut history, &[1, 2]).unwrap(), Some(1));
        assert_eq!(stack.len(), 2);

        assert_eq!(history.undo(&mut stack).as_deref(), Some("Merge Layers"));
        assert_eq!(stack.len(), 3);
        history.undo(&mut stack);
        history.undo(&mut stack);
        assert_eq!(stack.len(), 1);
        assert_eq!(history.redo(&mut stack).as_deref(), Some("New Layer"));
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn failed_ops_leave_history_alone() {
        let (mut stack, mut history) = doc();
        assert!(!delete_layer(&mut stack, &mut history, 5).unwrap());
        assert_eq!(merge_layers(&mut stack, &mut history, &[]).unwrap(), None);
        assert_eq!(merge_down(&mut stack, &mut history, 0).unwrap(), None);
        assert!(move_layer(&mut stack, &mut history, 0, 3).unwrap());
        assert!(!set_layer_opacity(&mut stack, &mut history, 0, 1.0));
        assert!(!history.can_undo());
    }

    #[test]
    fn property_changes_round_trip() {
        let (mut stack, mut history) = doc();
        assert!(set_layer_opacity(&mut stack, &mut history, 0, 0.25));
        assert!(rename_layer(&mut stack, &mut history, 0, "Paper"));
        assert!(set_layer_locked(&mut stack, &mut history, 0, true));
        history.undo_to(3, &mut stack);
        let layer = stack.layer(0).unwrap();
        assert_eq!((layer.opacity(), layer.name.as_str(), layer.locked), (1.0, "Background", false));
        history.redo(&mut stack);
        assert_eq!(stack.layer(0).unwrap().opacity(), 0.25);
    }

    #[test]
    fn resize_is_undoable() {
        let (mut stack, mut history) = doc();
        resize_canvas(&mut stack, &mut history, 8, 2, Anchor::Center, Rgba([0, 0, 0, 0])).unwrap();
        assert_eq!((stack.width(), stack.height()), (8, 2));
        history.undo(&mut stack);
        assert_eq!((stack.width(), stack.height()), (4, 4));
        assert_eq!(stack.layer(0).unwrap().pixels().dimensions(), (4, 4));
    }

    #[test]
    fn failed_op_restores_stack() {
        let (mut stack, mut history) = doc();
        let before = stack.try_clone().unwrap();
        let res: Result<()> = snapshot_op(
            &mut stack,
            &mut history,
            "Broken",
            |s| {
                s.add_new_layer("half done")?;
                s.layer_mut(0).unwrap().pixels_mut().fill(Rgba([1, 2, 3, 4]));
                Err(EngineError::Allocation { width: 1, height: 1 })
            },
            |_| true,
        );
        assert!(matches!(res, Err(EngineError::Allocation { .. })));
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.active_index(), Some(0));
        assert_eq!(stack.layer(0).unwrap().pixels(), before.layer(0).unwrap().pixels());
        assert!(!history.can_undo());
    }

    #[test]
    fn resize_without_overlap_is_all_background() {
        let (mut stack, mut history) = doc();
        let mut mask = GrayImage::new(4, 4);
        mask.put_pixel(1, 1, image::Luma([200]));
        set_layer_mask(&mut stack, &mut history, 0, Some(mask)).unwrap();
        let original = stack.try_clone().unwrap();
        let blue = Rgba([0, 0, 255, 255]);

        resize_canvas(&mut stack, &mut history, 0, 4, Anchor::TopLeft, blue).unwrap();
        assert_eq!(stack.layer(0).unwrap().pixels().dimensions(), (0, 4));
        resize_canvas(&mut stack, &mut history, 6, 5, Anchor::TopLeft, blue).unwrap();

        let layer = stack.layer(0).unwrap();
        assert_eq!(layer.pixels().dimensions(), (6, 5));
        assert!(layer.pixels().as_image().pixels().all(|p| *p == blue));
        assert!(layer.mask().unwrap().pixels().all(|p| p.0[0] == 0));

        assert_eq!(history.undo_to(2, &mut stack), 2);
        let layer = stack.layer(0).unwrap();
        assert_eq!((stack.width(), stack.height()), (4, 4));
        assert_eq!(layer.pixels(), original.layer(0).unwrap().pixels());
        assert_eq!(layer.mask(), original.layer(0).unwrap().mask());
    }

    #[test]
    fn mask_assignment_is_undoable() {
        let (mut stack, mut history) = doc();
        assert!(set_layer_mask(&mut stack, &mut history, 0, Some(GrayImage::new(2, 2))).unwrap());
        assert_eq!(stack.layer(0).unwrap().mask().unwrap().dimensions(), (4, 4));
        history.undo(&mut stack);
        assert!(!stack.layer(0).unwrap().has_mask());
        assert!(!set_layer_mask(&mut stack, &mut history, 3, None).unwrap());
    }
}
