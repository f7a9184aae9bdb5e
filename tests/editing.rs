use image::Rgba;
use paintcore::canvas::{Layer, LayerStack, RasterBuffer};
use paintcore::components::tools::{EditorSession, Tool};
use paintcore::config::EngineConfig;
use paintcore::ops::brush::BrushParams;
use paintcore::ops::canvas_ops;
use paintcore::ops::fill::flood_fill;
use paintcore::ops::transform::Anchor;
use paintcore::{BlendMode, Project};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

fn speckled(width: u32, height: u32) -> RasterBuffer {
    let mut buf = RasterBuffer::new(width, height).unwrap();
    for y in 0..height {
        for x in 0..width {
            buf.put(x, y, Rgba([(x * 13) as u8, (y * 7) as u8, ((x + y) * 5) as u8, ((x * y) % 256) as u8]));
        }
    }
    buf
}

#[test]
fn hidden_and_transparent_layers_do_not_change_the_render() {
    let mut stack = LayerStack::with_background(12, 8, WHITE).unwrap();
    stack.add(Layer::from_buffer("Art", speckled(12, 8)), None);
    let reference = stack.render().unwrap();

    let mut hidden = Layer::filled("Hidden", 12, 8, RED).unwrap();
    hidden.visible = false;
    stack.add(hidden, None);
    let mut faint = Layer::filled("Faint", 12, 8, RED).unwrap();
    faint.set_opacity(0.0005);
    stack.add(faint, Some(1));

    assert_eq!(stack.render().unwrap(), reference);
}

#[test]
fn single_opaque_normal_layer_renders_as_itself() {
    let pixels = speckled(9, 5);
    let stack = LayerStack::from_buffer("Only", pixels.clone());
    assert_eq!(stack.render().unwrap(), pixels);
}

#[test]
fn half_green_over_red() {
    let mut stack = LayerStack::with_background(1, 1, RED).unwrap();
    let mut green = Layer::filled("Green", 1, 1, Rgba([0, 255, 0, 255])).unwrap();
    green.set_opacity(0.5);
    green.blend_mode = BlendMode::Normal;
    stack.add(green, None);
    assert_eq!(stack.render().unwrap().get(0, 0), Some(Rgba([128, 128, 0, 255])));
}

#[test]
fn strokes_and_fills_undo_byte_exact() {
    let mut project = Project::new_untitled(1, 32, 32, &EngineConfig::default()).unwrap();
    let mut session = EditorSession::default();
    let original = project.render().unwrap();

    session.primary_color = Rgba([20, 40, 60, 200]);
    project.pointer_down(&session, (3.0, 3.0)).unwrap();
    project.pointer_move(&session, (20.0, 9.5));
    project.pointer_move(&session, (25.0, 28.0));
    project.pointer_up(&session).unwrap();
    let after_stroke = project.render().unwrap();

    session.tool = Tool::Fill;
    session.fill.tolerance = 0.0;
    session.primary_color = Rgba([0, 200, 0, 255]);
    project.pointer_down(&session, (31.0, 0.0)).unwrap();
    let after_fill = project.render().unwrap();
    assert_ne!(after_fill, after_stroke);

    assert_eq!(project.undo().as_deref(), Some("Fill"));
    assert_eq!(project.render().unwrap(), after_stroke);
    assert_eq!(project.undo().as_deref(), Some("Brush Stroke"));
    assert_eq!(project.render().unwrap(), original);
    assert!(project.undo().is_none());

    project.redo();
    assert_eq!(project.render().unwrap(), after_stroke);
    project.redo();
    assert_eq!(project.render().unwrap(), after_fill);
}

#[test]
fn new_action_discards_redo() {
    let mut project = Project::new_untitled(2, 8, 8, &EngineConfig::default()).unwrap();
    let history = &mut project.history;
    let stack = &mut project.stack;
    canvas_ops::add_layer(stack, history).unwrap();
    canvas_ops::rename_layer(stack, history, 1, "B");
    history.undo(stack);
    canvas_ops::set_layer_opacity(stack, history, 1, 0.5);

    assert!(!history.can_redo());
    assert!(history.redo(stack).is_none());
    assert_eq!(stack.layer(1).unwrap().name, "Layer 1");
}

#[test]
fn hard_eraser_clears_a_disc() {
    let mut project = Project::new_untitled(3, 24, 24, &EngineConfig::default()).unwrap();
    let mut session = EditorSession::default();
    session.tool = Tool::Eraser;
    session.eraser = BrushParams { diameter: 9, hardness: 1.0, opacity: 1.0, ..BrushParams::default() };

    assert!(project.pointer_down(&session, (10.0, 10.0)).unwrap());
    let summary = project.pointer_up(&session).unwrap().unwrap();
    assert_eq!(summary.stamps, 1);

    let layer = project.stack.layer(0).unwrap().pixels();
    for y in 0..24u32 {
        for x in 0..24u32 {
            let (dx, dy) = (x as f32 - 10.0, y as f32 - 10.0);
            let px = layer.get(x, y).unwrap();
            if dx * dx + dy * dy <= 4.5 * 4.5 {
                assert_eq!(px[3], 0, "({x}, {y}) should be erased");
            }
            if !(6..=14).contains(&x) || !(6..=14).contains(&y) {
                assert_eq!(px, WHITE, "({x}, {y}) is outside the dab");
            }
        }
    }
}

#[test]
fn top_left_resize_keeps_content_at_origin() {
    let art = speckled(6, 4);
    let mut stack = LayerStack::from_buffer("Art", art.clone());
    let mut history = paintcore::HistoryManager::default();
    let blue = Rgba([0, 0, 255, 255]);
    canvas_ops::resize_canvas(&mut stack, &mut history, 16, 14, Anchor::TopLeft, blue).unwrap();

    let pixels = stack.layer(0).unwrap().pixels();
    assert_eq!(pixels.dimensions(), (16, 14));
    for y in 0..14 {
        for x in 0..16 {
            let expected = if x < 6 && y < 4 { art.get(x, y).unwrap() } else { blue };
            assert_eq!(pixels.get(x, y), Some(expected));
        }
    }
}

#[test]
fn empty_merge_changes_nothing() {
    let mut stack = LayerStack::with_background(4, 4, WHITE).unwrap();
    stack.add_new_layer("Top").unwrap();
    assert_eq!(stack.merge(&[]).unwrap(), None);
    assert_eq!(stack.merge(&[7]).unwrap(), None);
    assert_eq!(stack.len(), 2);
    assert_eq!(stack.active_index(), Some(1));
}

#[test]
fn exact_fill_stays_inside_its_region() {
    // Two-tone checker of 3x3 blocks; an exact fill must only touch the
    // seed's block.
    let mut buf = RasterBuffer::new(9, 9).unwrap();
    for y in 0..9 {
        for x in 0..9 {
            let dark = ((x / 3) + (y / 3)) % 2 == 0;
            buf.put(x, y, if dark { Rgba([10, 10, 10, 255]) } else { Rgba([11, 10, 10, 255]) });
        }
    }
    let before = buf.clone();
    let res = flood_fill(&mut buf, 4, 4, RED, 0.0, None).unwrap();
    assert_eq!(res.filled, 9);
    for y in 0..9 {
        for x in 0..9 {
            let inside = (3..6).contains(&x) && (3..6).contains(&y);
            let expected = if inside { RED } else { before.get(x, y).unwrap() };
            assert_eq!(buf.get(x, y), Some(expected));
        }
    }
}

#[test]
fn composite_survives_a_png_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.png");

    let mut stack = LayerStack::with_background(5, 3, WHITE).unwrap();
    stack.add(Layer::from_buffer("Art", speckled(5, 3)), None);
    let mut project = Project::from_stack("Doc", stack, &EngineConfig::default());
    project.mark_dirty();
    project.save_composite(&path).unwrap();
    assert_eq!(project.display_title(), "out.png");

    let reopened = Project::open(&path, &EngineConfig::default()).unwrap();
    assert_eq!(reopened.stack.len(), 1);
    assert_eq!(reopened.stack.layer(0).unwrap().name, "out");
    assert_eq!(reopened.render().unwrap(), project.render().unwrap());
}
