//! 框选状态机：按下开始拖拽，移动更新矩形，松开时提交命中的展位。

use floorplan_core::geometry::{Bounds2D, Point2};
use tracing::debug;

use crate::edit_box::{EditBoxController, EditMode};
use crate::form::FormStore;
use crate::sync::SyncEngine;

/// 指针事件命中的对象。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerTarget {
    /// 画布空白处
    Background,
    /// 底图
    BackgroundImage,
    Stand(String),
    /// 变换手柄本身
    Transformer,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarqueeState {
    Idle,
    /// 起止点为局部坐标（指针位置减去平移量，未除以缩放）。
    Dragging { start: Point2, current: Point2 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarqueeOutcome {
    Ignored,
    /// 清空了选择
    Cleared,
    Started,
    Updated(Bounds2D),
    /// 松开时没有命中任何展位
    Empty,
    Selected {
        mode: EditMode,
        handles: Vec<String>,
    },
}

/// 状态机操作需要同时修改的外部状态。
pub struct SelectionContext<'a> {
    pub engine: &'a mut SyncEngine,
    pub edit_box: &'a mut EditBoxController,
    pub form: &'a mut dyn FormStore,
}

#[derive(Debug, Clone)]
pub struct MarqueeSelector {
    state: MarqueeState,
    /// 当前选择的缓存，重新渲染后用于恢复变换手柄。
    selection: Vec<String>,
}

impl Default for MarqueeSelector {
    fn default() -> Self {
        Self {
            state: MarqueeState::Idle,
            selection: Vec::new(),
        }
    }
}

impl MarqueeSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mouse_down(
        &mut self,
        position: Point2,
        client: Point2,
        target: &PointerTarget,
        ctx: &mut SelectionContext<'_>,
    ) -> MarqueeOutcome {
        match target {
            PointerTarget::Background => {
                self.clear(ctx);
                let start = ctx.engine.viewport().to_local(position);
                self.state = MarqueeState::Dragging {
                    start,
                    current: start,
                };
                let rect = self.current_rect(ctx);
                if let Some(node) = ctx.engine.registry_mut().selection_rect_mut() {
                    node.visible = true;
                    node.rect = rect;
                }
                MarqueeOutcome::Started
            }
            PointerTarget::BackgroundImage => {
                self.clear(ctx);
                MarqueeOutcome::Cleared
            }
            PointerTarget::Stand(handle) => {
                let visible = ctx
                    .engine
                    .registry()
                    .stand(handle)
                    .is_some_and(|node| node.visible);
                if !visible {
                    return MarqueeOutcome::Ignored;
                }
                let handles = vec![handle.clone()];
                self.commit(EditMode::TransformerOne, handles, client, ctx)
            }
            PointerTarget::Transformer => MarqueeOutcome::Ignored,
        }
    }

    pub fn mouse_move(
        &mut self,
        position: Point2,
        ctx: &mut SelectionContext<'_>,
    ) -> MarqueeOutcome {
        let MarqueeState::Dragging { start, .. } = self.state else {
            return MarqueeOutcome::Ignored;
        };
        self.state = MarqueeState::Dragging {
            start,
            current: ctx.engine.viewport().to_local(position),
        };
        let Some(rect) = self.current_rect(ctx) else {
            return MarqueeOutcome::Ignored;
        };
        if let Some(node) = ctx.engine.registry_mut().selection_rect_mut() {
            node.rect = Some(rect);
        }
        MarqueeOutcome::Updated(rect)
    }

    /// 松开指针。`client` 为编辑框锚点。
    pub fn mouse_up(&mut self, client: Point2, ctx: &mut SelectionContext<'_>) -> MarqueeOutcome {
        let rect = self.current_rect(ctx);
        if !matches!(self.state, MarqueeState::Dragging { .. }) {
            return MarqueeOutcome::Ignored;
        }
        self.state = MarqueeState::Idle;
        if let Some(node) = ctx.engine.registry_mut().selection_rect_mut() {
            node.visible = false;
            node.rect = None;
        }
        let Some(rect) = rect else {
            return MarqueeOutcome::Ignored;
        };

        let registry = ctx.engine.registry();
        let hits: Vec<String> = ctx
            .engine
            .stand_handles()
            .filter(|handle| {
                registry
                    .stand(handle)
                    .filter(|node| node.visible)
                    .and_then(|node| node.bounds())
                    .is_some_and(|bounds| bounds.intersects(&rect))
            })
            .map(str::to_string)
            .collect();
        debug!(hits = hits.len(), "框选结束");

        match hits.len() {
            0 => {
                ctx.edit_box.only_close();
                MarqueeOutcome::Empty
            }
            1 => self.commit(EditMode::TransformerOne, hits, client, ctx),
            _ => self.commit(EditMode::Transformer, hits, client, ctx),
        }
    }

    /// 用缓存的选择恢复变换手柄节点。
    pub fn restore_transformer(&self, ctx: &mut SelectionContext<'_>) {
        if let Some(transformer) = ctx.engine.registry_mut().transformer_mut() {
            transformer.nodes = self.selection.clone();
        }
    }

    /// 清空选择、变换手柄与高亮，并关闭编辑框。
    pub fn clear(&mut self, ctx: &mut SelectionContext<'_>) {
        self.selection.clear();
        if let Some(transformer) = ctx.engine.registry_mut().transformer_mut() {
            transformer.nodes.clear();
        }
        ctx.engine.reset_highlight(&*ctx.form);
        ctx.edit_box.only_close();
    }

    #[inline]
    pub fn state(&self) -> MarqueeState {
        self.state
    }

    #[inline]
    pub fn selection(&self) -> &[String] {
        &self.selection
    }

    fn commit(
        &mut self,
        mode: EditMode,
        handles: Vec<String>,
        client: Point2,
        ctx: &mut SelectionContext<'_>,
    ) -> MarqueeOutcome {
        self.selection = handles.clone();
        self.restore_transformer(ctx);
        ctx.edit_box
            .open(mode, client, &handles, &*ctx.engine, &*ctx.form);
        MarqueeOutcome::Selected { mode, handles }
    }

    /// 拖拽矩形（场景坐标）：`{min, min, |dx|, |dy|}` 除以缩放。
    fn current_rect(&self, ctx: &SelectionContext<'_>) -> Option<Bounds2D> {
        let MarqueeState::Dragging { start, current } = self.state else {
            return None;
        };
        let zoom = ctx.engine.viewport().zoom;
        Some(Bounds2D::from_rect(
            start.x().min(current.x()) / zoom,
            start.y().min(current.y()) / zoom,
            (current.x() - start.x()).abs() / zoom,
            (current.y() - start.y()).abs() / zoom,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::FormValues;
    use crate::sync::tests::loaded_engine;
    use floorplan_core::geometry::Vector2;

    struct Harness {
        engine: SyncEngine,
        edit_box: EditBoxController,
        form: FormValues,
        marquee: MarqueeSelector,
    }

    impl Harness {
        fn new() -> Self {
            let (engine, form) = loaded_engine();
            Self {
                engine,
                edit_box: EditBoxController::new(),
                form,
                marquee: MarqueeSelector::new(),
            }
        }

        fn drag(&mut self, from: (f64, f64), to: (f64, f64)) -> MarqueeOutcome {
            let mut ctx = SelectionContext {
                engine: &mut self.engine,
                edit_box: &mut self.edit_box,
                form: &mut self.form,
            };
            let start = Point2::new(from.0, from.1);
            let end = Point2::new(to.0, to.1);
            assert_eq!(
                self.marquee
                    .mouse_down(start, start, &PointerTarget::Background, &mut ctx),
                MarqueeOutcome::Started
            );
            self.marquee.mouse_move(end, &mut ctx);
            self.marquee.mouse_up(end, &mut ctx)
        }

        fn press(&mut self, target: PointerTarget) -> MarqueeOutcome {
            let mut ctx = SelectionContext {
                engine: &mut self.engine,
                edit_box: &mut self.edit_box,
                form: &mut self.form,
            };
            let point = Point2::new(1.0, 1.0);
            self.marquee.mouse_down(point, point, &target, &mut ctx)
        }
    }

    fn handles(outcome: &MarqueeOutcome) -> Vec<String> {
        match outcome {
            MarqueeOutcome::Selected { handles, .. } => handles.clone(),
            other => panic!("应为选中结果: {other:?}"),
        }
    }

    // 三个展位在视口中的范围：x 10..30 / 40..60 / 70..90，y 70..90

    #[test]
    fn dragging_over_three_stands_opens_transformer_mode() {
        let mut harness = Harness::new();
        let outcome = harness.drag((95.0, 95.0), (5.0, 65.0));
        assert!(matches!(
            outcome,
            MarqueeOutcome::Selected {
                mode: EditMode::Transformer,
                ..
            }
        ));
        assert_eq!(handles(&outcome), vec!["S1", "S2", "S3"]);
        assert_eq!(harness.edit_box.mode(), Some(EditMode::Transformer));
        let transformer = harness.engine.registry().transformer().expect("变换手柄");
        assert_eq!(transformer.nodes.len(), 3);
        assert_eq!(harness.marquee.state(), MarqueeState::Idle);
    }

    #[test]
    fn single_hit_opens_transformer_one() {
        let mut harness = Harness::new();
        let outcome = harness.drag((35.0, 75.0), (45.0, 80.0));
        assert_eq!(handles(&outcome), vec!["S2"]);
        assert_eq!(harness.edit_box.mode(), Some(EditMode::TransformerOne));
    }

    #[test]
    fn empty_drag_closes_edit_box() {
        let mut harness = Harness::new();
        harness.drag((0.0, 0.0), (50.0, 50.0));
        assert_eq!(harness.drag((0.0, 0.0), (50.0, 50.0)), MarqueeOutcome::Empty);
        assert!(!harness.edit_box.is_open());
    }

    #[test]
    fn hidden_stands_are_not_hit() {
        let mut harness = Harness::new();
        harness.form.set_value("stand id/L1/visibility", false.into());
        harness.engine.reconcile(&harness.form);
        let outcome = harness.drag((0.0, 60.0), (100.0, 100.0));
        assert_eq!(handles(&outcome), vec!["S2", "S3"]);
    }

    #[test]
    fn rect_accounts_for_pan_and_zoom() {
        let mut harness = Harness::new();
        *harness.engine.viewport_mut() =
            crate::viewport::ViewportState::new(Vector2::new(100.0, 0.0), 2.0);
        // 局部 (40,140)-(60,150) 除以 2 → 场景 (20,70)-(30,75)，只命中 S1
        let outcome = harness.drag((140.0, 140.0), (160.0, 150.0));
        assert_eq!(handles(&outcome), vec!["S1"]);
    }

    #[test]
    fn clicking_a_stand_replaces_selection() {
        let mut harness = Harness::new();
        harness.drag((95.0, 95.0), (5.0, 65.0));
        let outcome = harness.press(PointerTarget::Stand("S3".to_string()));
        assert_eq!(handles(&outcome), vec!["S3"]);
        assert_eq!(harness.marquee.selection(), ["S3".to_string()]);
        assert_eq!(harness.edit_box.mode(), Some(EditMode::TransformerOne));
        assert_eq!(harness.press(PointerTarget::Transformer), MarqueeOutcome::Ignored);
        assert_eq!(harness.press(PointerTarget::BackgroundImage), MarqueeOutcome::Cleared);
        assert!(harness.marquee.selection().is_empty());
        assert!(!harness.edit_box.is_open());
        let transformer = harness.engine.registry().transformer().expect("变换手柄");
        assert!(transformer.nodes.is_empty());
    }

    #[test]
    fn new_drag_replaces_previous_selection() {
        let mut harness = Harness::new();
        harness.press(PointerTarget::Stand("S1".to_string()));
        assert_eq!(harness.marquee.selection(), ["S1".to_string()]);

        let outcome = harness.drag((35.0, 75.0), (95.0, 80.0));
        assert_eq!(handles(&outcome), vec!["S2", "S3"]);
        assert_eq!(harness.marquee.selection(), ["S2".to_string(), "S3".to_string()]);
        assert_eq!(harness.edit_box.mode(), Some(EditMode::Transformer));
    }

    #[test]
    fn release_without_drag_is_ignored() {
        let mut harness = Harness::new();
        let mut ctx = SelectionContext {
            engine: &mut harness.engine,
            edit_box: &mut harness.edit_box,
            form: &mut harness.form,
        };
        assert_eq!(
            harness.marquee.mouse_up(Point2::origin(), &mut ctx),
            MarqueeOutcome::Ignored
        );
    }
}
