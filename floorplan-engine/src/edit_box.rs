//! 编辑框控制器：打开时为每个展位拍快照，放弃编辑时整体恢复。

use std::fmt;
use std::time::Duration;

use floorplan_core::{geometry::Point2, style::Rgba};
use tracing::debug;

use crate::errors::EngineError;
use crate::form::{FieldSuffix, FormStore, FormValue};
use crate::sync::SyncEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditMode {
    /// 从列表打开的单个展位
    One,
    /// 列表中全部选中且可见的展位
    Multiple,
    /// 框选得到的多个展位
    Transformer,
    /// 点击或框选得到的单个展位
    TransformerOne,
}

impl EditMode {
    pub fn as_str(self) -> &'static str {
        match self {
            EditMode::One => "one",
            EditMode::Multiple => "multiple",
            EditMode::Transformer => "transformer",
            EditMode::TransformerOne => "transformer-one",
        }
    }

    /// 修改是否广播到多个展位。
    #[inline]
    pub fn is_multi(self) -> bool {
        matches!(self, EditMode::Multiple | EditMode::Transformer)
    }
}

impl fmt::Display for EditMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditField {
    Identifier,
    Fill,
    Stroke,
    StrokeWidth,
}

/// 打开编辑框时单个展位的状态。
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub handle: String,
    pub stand_id: String,
    pub fill: Rgba,
    pub stroke: Rgba,
    pub real_fill: Option<Rgba>,
    pub real_stroke: Option<Rgba>,
    pub stroke_width: f64,
}

#[derive(Debug, Clone, Default)]
pub struct EditBoxController {
    mode: Option<EditMode>,
    anchor: Option<Point2>,
    handles: Vec<String>,
    snapshots: Vec<Snapshot>,
}

impl EditBoxController {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为给定展位打开编辑框，未知句柄被忽略。返回实际打开的展位数量。
    pub fn open(
        &mut self,
        mode: EditMode,
        anchor: Point2,
        handles: &[String],
        engine: &SyncEngine,
        form: &dyn FormStore,
    ) -> usize {
        let snapshots: Vec<Snapshot> = handles
            .iter()
            .filter_map(|handle| {
                let node = engine.registry().stand(handle)?;
                let field = engine.field(handle)?;
                Some(Snapshot {
                    handle: handle.clone(),
                    stand_id: form.text(&field.to_string()).unwrap_or_default(),
                    fill: node.fill,
                    stroke: node.stroke,
                    real_fill: node.real_fill,
                    real_stroke: node.real_stroke,
                    stroke_width: node.stroke_width,
                })
            })
            .collect();
        if snapshots.is_empty() {
            self.close();
            return 0;
        }
        self.handles = snapshots.iter().map(|snapshot| snapshot.handle.clone()).collect();
        self.snapshots = snapshots;
        self.mode = Some(mode);
        self.anchor = Some(anchor);
        debug!(mode = %mode, shapes = self.handles.len(), "打开编辑框");
        self.handles.len()
    }

    /// 以 `multiple` 模式打开：节点与台账中都处于选中且可见状态的展位。
    pub fn open_selected(
        &mut self,
        anchor: Point2,
        engine: &SyncEngine,
        form: &dyn FormStore,
    ) -> usize {
        let handles: Vec<String> = engine
            .stand_handles()
            .filter(|handle| {
                let Some(node) = engine.registry().stand(handle) else {
                    return false;
                };
                let listed = engine
                    .field(handle)
                    .and_then(|field| engine.ledger().get(&field.handle))
                    .is_some_and(|entry| entry.selected && entry.visible);
                node.selected && node.visible && listed
            })
            .map(str::to_string)
            .collect();
        self.open(EditMode::Multiple, anchor, &handles, engine, form)
    }

    /// 把一次字段修改应用到当前编辑的全部展位。
    ///
    /// 编号为空的展位保持告警色，颜色修改只记录为真实颜色，直到重新填写编号。
    pub fn handle_changes(
        &mut self,
        field: EditField,
        value: &str,
        engine: &mut SyncEngine,
        form: &mut dyn FormStore,
    ) -> Result<(), EngineError> {
        let Some(mode) = self.mode else {
            return Ok(());
        };
        debug!(?field, broadcast = mode.is_multi(), shapes = self.handles.len(), "编辑框字段修改");
        let palette = engine.palette().clone();
        match field {
            EditField::Identifier => {
                for handle in &self.handles {
                    let Some(name) = engine.field(handle).map(|field| field.to_string()) else {
                        continue;
                    };
                    let was_missing = engine.is_missing_id(handle, &*form);
                    form.set_value(&name, FormValue::Text(value.to_string()));
                    let Some(node) = engine.registry_mut().stand_mut(handle) else {
                        continue;
                    };
                    if value.trim().is_empty() {
                        node.warn(&palette);
                    } else if was_missing {
                        node.restore();
                    }
                }
                engine.reconcile(&*form);
            }
            EditField::Fill | EditField::Stroke => {
                let color = Rgba::from_hex(value).map_err(|_| EngineError::InvalidValue {
                    field: if field == EditField::Fill { "fill" } else { "stroke" },
                    value: value.to_string(),
                })?;
                for handle in &self.handles {
                    let locked = engine.is_missing_id(handle, &*form);
                    let Some(node) = engine.registry_mut().stand_mut(handle) else {
                        continue;
                    };
                    let (current, real) = if field == EditField::Fill {
                        (&mut node.fill, &mut node.real_fill)
                    } else {
                        (&mut node.stroke, &mut node.real_stroke)
                    };
                    if locked {
                        *real = Some(color);
                    } else {
                        *current = color;
                        if real.is_some() {
                            *real = Some(color);
                        }
                    }
                }
            }
            EditField::StrokeWidth => {
                let trimmed = value.trim();
                let number = trimmed.strip_suffix("px").unwrap_or(trimmed).trim_end();
                let width = number
                    .parse::<f64>()
                    .ok()
                    .filter(|width| width.is_finite() && *width >= 0.0)
                    .ok_or_else(|| EngineError::InvalidValue {
                        field: "stroke width",
                        value: value.to_string(),
                    })?;
                for handle in &self.handles {
                    if let Some(node) = engine.registry_mut().stand_mut(handle) {
                        node.stroke_width = width;
                    }
                }
            }
        }
        Ok(())
    }

    /// 放弃编辑：恢复全部快照；只有一个展位时同时恢复表单中的编号。
    pub fn discard(&mut self, engine: &mut SyncEngine, form: &mut dyn FormStore) {
        let restore_id = self.snapshots.len() == 1;
        for snapshot in &self.snapshots {
            if restore_id {
                if let Some(field) = engine.field(&snapshot.handle) {
                    form.set_value(&field.to_string(), FormValue::Text(snapshot.stand_id.clone()));
                }
            }
            if let Some(node) = engine.registry_mut().stand_mut(&snapshot.handle) {
                node.fill = snapshot.fill;
                node.stroke = snapshot.stroke;
                node.real_fill = snapshot.real_fill;
                node.real_stroke = snapshot.real_stroke;
                node.stroke_width = snapshot.stroke_width;
            }
        }
        engine.reconcile(&*form);
        self.close();
    }

    /// 保留修改并关闭，返回被编辑的展位句柄。
    pub fn save(&mut self) -> Vec<String> {
        let handles = std::mem::take(&mut self.handles);
        self.close();
        handles
    }

    pub fn only_close(&mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.mode = None;
        self.anchor = None;
        self.handles.clear();
        self.snapshots.clear();
    }

    /// 设置当前编辑展位的可见性。
    pub fn set_targets_visible(
        &mut self,
        visible: bool,
        engine: &mut SyncEngine,
        form: &mut dyn FormStore,
    ) {
        for handle in &self.handles {
            if let Some(field) = engine.field(handle) {
                form.set_value(
                    &field.with_suffix(FieldSuffix::Visibility).to_string(),
                    FormValue::Flag(visible),
                );
            }
        }
        engine.reconcile(&*form);
    }

    /// 删除当前编辑的展位并关闭编辑框，返回删除数量。
    pub fn delete_targets(
        &mut self,
        now: Duration,
        engine: &mut SyncEngine,
        form: &mut dyn FormStore,
    ) -> usize {
        let handles = self.save();
        handles
            .iter()
            .filter(|handle| engine.delete_stand(handle, now, form))
            .count()
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.mode.is_some()
    }

    #[inline]
    pub fn mode(&self) -> Option<EditMode> {
        self.mode
    }

    #[inline]
    pub fn anchor(&self) -> Option<Point2> {
        self.anchor
    }

    #[inline]
    pub fn handles(&self) -> &[String] {
        &self.handles
    }

    pub fn snapshot(&self, handle: &str) -> Option<&Snapshot> {
        self.snapshots.iter().find(|snapshot| snapshot.handle == handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::tests::loaded_engine;

    fn handles(list: &[&str]) -> Vec<String> {
        list.iter().map(|handle| handle.to_string()).collect()
    }

    #[test]
    fn open_snapshots_known_stands() {
        let (engine, form) = loaded_engine();
        let mut edit_box = EditBoxController::new();
        let opened = edit_box.open(
            EditMode::Transformer,
            Point2::new(5.0, 5.0),
            &handles(&["S1", "missing", "S3"]),
            &engine,
            &form,
        );
        assert_eq!(opened, 2);
        assert_eq!(edit_box.mode(), Some(EditMode::Transformer));
        assert_eq!(edit_box.snapshot("S3").expect("S3").stand_id, "B1");
        assert_eq!(edit_box.anchor(), Some(Point2::new(5.0, 5.0)));
    }

    #[test]
    fn clearing_identifier_locks_palette_until_restored() {
        let (mut engine, mut form) = loaded_engine();
        let palette = engine.palette().clone();
        let mut edit_box = EditBoxController::new();
        edit_box.open(EditMode::One, Point2::origin(), &handles(&["S1"]), &engine, &form);

        edit_box
            .handle_changes(EditField::Identifier, "", &mut engine, &mut form)
            .expect("清空编号");
        let node = engine.registry().stand("S1").expect("S1");
        assert_eq!(node.fill, palette.unassigned_fill);

        edit_box
            .handle_changes(EditField::Fill, "#112233", &mut engine, &mut form)
            .expect("修改填充色");
        let node = engine.registry().stand("S1").expect("S1");
        assert_eq!(node.fill, palette.unassigned_fill);
        assert_eq!(node.real_fill, Some(Rgba::rgb(0x11, 0x22, 0x33)));

        edit_box
            .handle_changes(EditField::Identifier, "C9", &mut engine, &mut form)
            .expect("填写编号");
        let node = engine.registry().stand("S1").expect("S1");
        assert_eq!(node.fill, Rgba::rgb(0x11, 0x22, 0x33));
        assert_eq!(node.stroke, palette.stand_stroke);
        assert!(!node.is_painted_over());
        assert_eq!(form.text("stand id/L1/main").as_deref(), Some("C9"));
    }

    #[test]
    fn changes_broadcast_in_multi_modes() {
        let (mut engine, mut form) = loaded_engine();
        let mut edit_box = EditBoxController::new();
        edit_box.open_selected(Point2::origin(), &engine, &form);
        assert_eq!(edit_box.mode(), Some(EditMode::Multiple));
        assert_eq!(edit_box.handles().len(), 3);

        edit_box
            .handle_changes(EditField::StrokeWidth, "2.5px", &mut engine, &mut form)
            .expect("线宽");
        assert!(engine.registry().stands().all(|node| node.stroke_width == 2.5));
        assert!(matches!(
            edit_box.handle_changes(EditField::Stroke, "blue", &mut engine, &mut form),
            Err(EngineError::InvalidValue { field: "stroke", .. })
        ));
    }

    #[test]
    fn malformed_stroke_width_is_rejected() {
        let (mut engine, mut form) = loaded_engine();
        let palette = engine.palette().clone();
        let mut edit_box = EditBoxController::new();
        edit_box.open(EditMode::One, Point2::origin(), &handles(&["S1"]), &engine, &form);

        for value in ["-3", "1.2.3", "abc", "", "inf"] {
            let result =
                edit_box.handle_changes(EditField::StrokeWidth, value, &mut engine, &mut form);
            assert!(
                matches!(result, Err(EngineError::InvalidValue { field: "stroke width", .. })),
                "{value:?} 应被拒绝"
            );
        }
        let node = engine.registry().stand("S1").expect("S1");
        assert_eq!(node.stroke_width, palette.stroke_width);

        edit_box
            .handle_changes(EditField::StrokeWidth, " 0 ", &mut engine, &mut form)
            .expect("零线宽");
        assert_eq!(engine.registry().stand("S1").expect("S1").stroke_width, 0.0);
    }

    #[test]
    fn discard_restores_snapshots_and_single_identifier() {
        let (mut engine, mut form) = loaded_engine();
        let palette = engine.palette().clone();
        let mut edit_box = EditBoxController::new();
        let targets = handles(&["S2"]);
        edit_box.open(EditMode::TransformerOne, Point2::origin(), &targets, &engine, &form);
        edit_box
            .handle_changes(EditField::Identifier, "", &mut engine, &mut form)
            .expect("清空编号");
        edit_box
            .handle_changes(EditField::StrokeWidth, "4", &mut engine, &mut form)
            .expect("线宽");

        edit_box.discard(&mut engine, &mut form);
        assert!(!edit_box.is_open());
        let node = engine.registry().stand("S2").expect("S2");
        assert_eq!(node.fill, palette.stand_fill);
        assert_eq!(node.stroke_width, palette.stroke_width);
        assert_eq!(form.text("stand id/L2/main").as_deref(), Some("A2"));
    }

    #[test]
    fn save_keeps_changes() {
        let (mut engine, mut form) = loaded_engine();
        let mut edit_box = EditBoxController::new();
        edit_box.open(EditMode::One, Point2::origin(), &handles(&["S1"]), &engine, &form);
        edit_box
            .handle_changes(EditField::Fill, "ff000080", &mut engine, &mut form)
            .expect("填充色");
        assert_eq!(edit_box.save(), handles(&["S1"]));
        assert_eq!(engine.registry().stand("S1").expect("S1").fill.a, 0x80);
        // 关闭后的修改不再生效
        edit_box
            .handle_changes(EditField::Fill, "000000", &mut engine, &mut form)
            .expect("已关闭");
        assert_eq!(engine.registry().stand("S1").expect("S1").fill.r, 0xff);
    }

    #[test]
    fn target_actions_hide_and_delete() {
        let (mut engine, mut form) = loaded_engine();
        let mut edit_box = EditBoxController::new();
        let targets = handles(&["S1", "S2"]);
        edit_box.open(EditMode::Transformer, Point2::origin(), &targets, &engine, &form);
        edit_box.set_targets_visible(false, &mut engine, &mut form);
        assert!(!engine.registry().stand("S2").expect("S2").visible);
        assert_eq!(edit_box.delete_targets(Duration::ZERO, &mut engine, &mut form), 2);
        assert!(!edit_box.is_open());
        assert_eq!(engine.ledger().len(), 1);
    }
}
