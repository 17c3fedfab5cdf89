//! 同步引擎：保持节点注册表、台账与表单三者一致。
//!
//! 表单是持久状态的唯一来源，台账和节点的可见/选中属性都由表单投影得到，
//! 每次修改后调用 [`SyncEngine::reconcile`] 重新投影。

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use floorplan_core::{
    conventions::{LayerCategory, LayerConventions},
    geometry::Bounds2D,
    style::{Palette, Rgba},
};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::form::{FieldName, FieldSuffix, FormStore, FormValue, SEARCH_FIELD, seed_label_fields};
use crate::ledger::Ledger;
use crate::pipeline::CanonicalModel;
use crate::registry::{
    GroupNode, SELECTION_RECT_KEY, SelectionRectNode, ShapeNode, ShapeRegistry, StandNode,
    TRANSFORMER_KEY, TransformerNode, group_key,
};
use crate::scheduler::{DEFAULT_GRACE_DELAY, GraceAction, GraceScheduler};
use crate::viewport::ViewportState;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub palette: Palette,
    pub conventions: LayerConventions,
    pub grace_delay: Duration,
    /// 聚焦展位时四周保留的边距。
    pub focus_padding: f64,
    pub view_width: f64,
    pub view_height: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            palette: Palette::default(),
            conventions: LayerConventions::default(),
            grace_delay: DEFAULT_GRACE_DELAY,
            focus_padding: 20.0,
            view_width: 1280.0,
            view_height: 720.0,
        }
    }
}

/// 批量操作模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkMode {
    ShowAll,
    HideAll,
    SelectAll,
    UnselectAll,
    ToggleVisibility,
    ToggleSelection,
    DeleteSelected,
    HighlightWithoutId,
}

impl BulkMode {
    pub const ALL: [BulkMode; 8] = [
        BulkMode::ShowAll,
        BulkMode::HideAll,
        BulkMode::SelectAll,
        BulkMode::UnselectAll,
        BulkMode::ToggleVisibility,
        BulkMode::ToggleSelection,
        BulkMode::DeleteSelected,
        BulkMode::HighlightWithoutId,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BulkMode::ShowAll => "show-all",
            BulkMode::HideAll => "hide-all",
            BulkMode::SelectAll => "select-all",
            BulkMode::UnselectAll => "unselect-all",
            BulkMode::ToggleVisibility => "toggle-visibility",
            BulkMode::ToggleSelection => "toggle-selection",
            BulkMode::DeleteSelected => "delete-selected-entity",
            BulkMode::HighlightWithoutId => "highlight-stands-without-id",
        }
    }
}

impl fmt::Display for BulkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BulkMode {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        BulkMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == value)
            .ok_or_else(|| EngineError::UnknownMode(value.to_string()))
    }
}

/// 保存载荷中的填充色。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShapeColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f64,
}

impl From<Rgba> for ShapeColor {
    fn from(color: Rgba) -> Self {
        Self {
            r: color.r,
            g: color.g,
            b: color.b,
            a: color.alpha(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StandParams {
    pub stroke_color: String,
    pub shape_color: ShapeColor,
    pub stroke_width: f64,
    pub hide_stand: bool,
}

/// 单个展位的保存结果。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedStand {
    pub handle: String,
    pub coords: Vec<[f64; 2]>,
    pub params: StandParams,
    pub name: String,
}

pub struct SyncEngine {
    settings: EngineSettings,
    registry: ShapeRegistry,
    ledger: Ledger,
    search: String,
    viewport: ViewportState,
    highlighted: Option<String>,
    scheduler: GraceScheduler,
    /// 展位句柄 → 其标注的编号字段。
    fields: IndexMap<String, FieldName>,
    /// 标注句柄 → 展位句柄。
    stands_by_label: IndexMap<String, String>,
}

impl SyncEngine {
    pub fn new(settings: EngineSettings) -> Self {
        let scheduler = GraceScheduler::new(settings.grace_delay);
        Self {
            settings,
            registry: ShapeRegistry::new(),
            ledger: Ledger::new(),
            search: String::new(),
            viewport: ViewportState::default(),
            highlighted: None,
            scheduler,
            fields: IndexMap::new(),
            stands_by_label: IndexMap::new(),
        }
    }

    /// 用规范模型填充注册表并写入初始表单字段。之前的会话状态全部丢弃。
    pub fn load_model(&mut self, model: &CanonicalModel, form: &mut dyn FormStore) {
        self.teardown();
        self.registry
            .set(TRANSFORMER_KEY, ShapeNode::Transformer(TransformerNode::default()));
        self.registry.set(
            SELECTION_RECT_KEY,
            ShapeNode::SelectionRect(SelectionRectNode::default()),
        );

        for layer in model.layers.values() {
            self.registry.set(
                group_key(&layer.name),
                ShapeNode::LayerGroup(GroupNode {
                    name: layer.name.clone(),
                    display_name: layer.display_name.clone(),
                    visible: layer.visible,
                    children: layer.stands.clone(),
                }),
            );
        }

        for shape in model.stands.values() {
            let Some(label) = model.label_of(shape) else {
                continue;
            };
            let node = StandNode::from_shape(shape, &label.layer, &self.settings.palette);
            if self.registry.set(shape.handle.clone(), ShapeNode::Stand(node)) {
                self.fields.insert(
                    shape.handle.clone(),
                    FieldName::new(&label.layer, &label.handle, FieldSuffix::Main),
                );
                self.stands_by_label
                    .insert(label.handle.clone(), shape.handle.clone());
            }
        }

        seed_label_fields(model, form);
        self.search = form.text(SEARCH_FIELD).unwrap_or_default();
        self.reconcile(&*form);
        info!(
            stands = self.fields.len(),
            listed = self.ledger.len(),
            "展位已载入编辑器"
        );
    }

    /// 重建台账并把表单中的可见/选中状态投影到节点。
    pub fn reconcile(&mut self, form: &dyn FormStore) {
        self.ledger.recompute_filter(form, &self.search);
        for (handle, field) in &self.fields {
            let Some(node) = self.registry.stand_mut(handle) else {
                continue;
            };
            let flag = |suffix: FieldSuffix, default: bool| {
                form.flag(&field.with_suffix(suffix).to_string())
                    .unwrap_or(default)
            };
            node.visible = flag(FieldSuffix::Visibility, true) && !flag(FieldSuffix::Delete, false);
            node.selected = flag(FieldSuffix::Selected, true);
        }
    }

    /// 批量操作，返回受影响的展位数量。
    ///
    /// 显示/隐藏/删除要求节点与台账同时处于选中状态；选中/取消选中与切换
    /// 只要求台账中存在该条目。`force` 放宽为“台账中存在”或“无条件”。
    pub fn apply(&mut self, mode: BulkMode, force: bool, form: &mut dyn FormStore) -> usize {
        if mode == BulkMode::HighlightWithoutId {
            return self.highlight_stands_without_id(&*form);
        }

        let mut affected = 0;
        for handle in self.bulk_targets() {
            let Some(field) = self.fields.get(&handle).cloned() else {
                continue;
            };
            let Some(node) = self.registry.stand(&handle) else {
                continue;
            };
            let entry = self.ledger.get(&field.handle);
            let has_access = match entry {
                Some(entry) => force || (node.selected && entry.selected),
                None => false,
            };
            let listed = entry.is_some() || force;
            let (node_visible, node_selected) = (node.visible, node.selected);

            let update = match mode {
                BulkMode::ShowAll if has_access => Some((FieldSuffix::Visibility, true)),
                BulkMode::HideAll if has_access => Some((FieldSuffix::Visibility, false)),
                BulkMode::SelectAll if listed => Some((FieldSuffix::Selected, true)),
                BulkMode::UnselectAll if listed => Some((FieldSuffix::Selected, false)),
                BulkMode::ToggleVisibility if listed => {
                    Some((FieldSuffix::Visibility, !node_visible))
                }
                BulkMode::ToggleSelection if listed => {
                    Some((FieldSuffix::Selected, !node_selected))
                }
                BulkMode::DeleteSelected if has_access => Some((FieldSuffix::Delete, true)),
                _ => None,
            };
            let Some((suffix, value)) = update else {
                continue;
            };
            form.set_value(&field.with_suffix(suffix).to_string(), FormValue::Flag(value));
            if mode == BulkMode::DeleteSelected {
                self.destroy(&handle);
            }
            affected += 1;
        }

        self.reconcile(&*form);
        debug!(mode = %mode, force, affected, "批量操作完成");
        affected
    }

    /// 名称匹配展位约定的图层分组中的全部展位句柄。
    fn bulk_targets(&self) -> Vec<String> {
        self.registry
            .groups()
            .filter(|group| {
                self.settings
                    .conventions
                    .matches(&group.name, LayerCategory::Stands)
            })
            .flat_map(|group| group.children.iter().cloned())
            .filter(|handle| self.registry.stand(handle).is_some())
            .collect()
    }

    /// 列表中单个展位的选中切换，返回切换后的状态。
    pub fn select_entity(&mut self, handle: &str, form: &mut dyn FormStore) -> Option<bool> {
        let field = self.fields.get(handle)?.with_suffix(FieldSuffix::Selected);
        let name = field.to_string();
        let selected = !form.flag(&name).unwrap_or(true);
        form.set_value(&name, FormValue::Flag(selected));
        self.reconcile(&*form);
        Some(selected)
    }

    /// 高亮展位并把视口聚焦到它；先恢复之前高亮的展位。
    pub fn highlight(&mut self, handle: &str, form: &dyn FormStore) -> bool {
        if self.registry.stand(handle).is_none() {
            return false;
        }
        if self.highlighted.as_deref() != Some(handle) {
            self.reset_highlight(form);
        }
        let palette = self.settings.palette.clone();
        let Some(node) = self.registry.stand_mut(handle) else {
            return false;
        };
        node.activate(&palette);
        let bounds = node.bounds();
        self.highlighted = Some(handle.to_string());
        if let Some(bounds) = bounds {
            self.focus(&bounds);
        }
        true
    }

    /// 取消当前高亮。编号为空的展位恢复后重新标记为告警色。
    pub fn reset_highlight(&mut self, form: &dyn FormStore) {
        let Some(previous) = self.highlighted.take() else {
            return;
        };
        let missing_id = self.is_missing_id(&previous, form);
        let palette = self.settings.palette.clone();
        if let Some(node) = self.registry.stand_mut(&previous) {
            node.restore();
            if missing_id {
                node.warn(&palette);
            }
        }
    }

    /// 延时切换单个展位的可见性，返回任务到期时间。
    ///
    /// 没有台账条目或已在等待删除的展位不做处理。
    pub fn toggle(&mut self, handle: &str, now: Duration) -> Option<Duration> {
        let field = self.fields.get(handle)?;
        let entry = self.ledger.get(&field.handle)?;
        let current = match self.scheduler.pending(handle).map(|task| task.action) {
            Some(GraceAction::Destroy) => {
                debug!(handle, "展位等待删除，忽略可见性切换");
                return None;
            }
            Some(GraceAction::SetVisibility(pending)) => pending,
            None => entry.visible,
        };
        let due = self
            .scheduler
            .schedule(handle, GraceAction::SetVisibility(!current), now);
        self.focus_stand(handle);
        Some(due)
    }

    /// 标记删除并安排延时销毁。台账立即排除该展位。
    pub fn delete_stand(
        &mut self,
        handle: &str,
        now: Duration,
        form: &mut dyn FormStore,
    ) -> bool {
        let Some(field) = self.fields.get(handle).cloned() else {
            return false;
        };
        if self.registry.stand(handle).is_none() {
            return false;
        }
        form.set_value(
            &field.with_suffix(FieldSuffix::Delete).to_string(),
            FormValue::Flag(true),
        );
        if self.highlighted.as_deref() == Some(handle) {
            self.highlighted = None;
        }
        self.focus_stand(handle);
        self.reconcile(&*form);
        self.scheduler.schedule(handle, GraceAction::Destroy, now);
        true
    }

    /// 推进逻辑时钟，执行到期的延时任务。
    pub fn tick(
        &mut self,
        now: Duration,
        form: &mut dyn FormStore,
    ) -> Vec<(String, GraceAction)> {
        let due = self.scheduler.drain_due(now);
        if due.is_empty() {
            return due;
        }
        for (handle, action) in &due {
            match action {
                GraceAction::SetVisibility(visible) => {
                    if let Some(field) = self.fields.get(handle) {
                        form.set_value(
                            &field.with_suffix(FieldSuffix::Visibility).to_string(),
                            FormValue::Flag(*visible),
                        );
                    }
                }
                GraceAction::Destroy => self.destroy(handle),
            }
        }
        self.reconcile(&*form);
        due
    }

    pub fn set_search(&mut self, search: &str, form: &mut dyn FormStore) {
        self.search = search.to_string();
        form.set_value(SEARCH_FIELD, FormValue::Text(self.search.clone()));
        self.reconcile(&*form);
    }

    /// 可见且缺少编号的展位全部标记为告警色，返回标记数量。
    pub fn highlight_stands_without_id(&mut self, form: &dyn FormStore) -> usize {
        let palette = self.settings.palette.clone();
        let missing: Vec<String> = self
            .fields
            .keys()
            .filter(|handle| self.is_missing_id(handle, form))
            .cloned()
            .collect();
        let mut painted = 0;
        for handle in missing {
            if let Some(node) = self.registry.stand_mut(&handle).filter(|node| node.visible) {
                node.warn(&palette);
                painted += 1;
            }
        }
        painted
    }

    /// 生成保存载荷。存在编号为空的展位时拒绝保存并把它们标记为告警色。
    pub fn save_payload(&mut self, form: &dyn FormStore) -> Result<Vec<SavedStand>, EngineError> {
        let mut missing = Vec::new();
        let mut saved = Vec::new();
        for (handle, field) in &self.fields {
            if form
                .flag(&field.with_suffix(FieldSuffix::Delete).to_string())
                .unwrap_or(false)
            {
                continue;
            }
            let Some(node) = self.registry.stand(handle) else {
                continue;
            };
            let name = form.text(&field.to_string()).unwrap_or_default();
            if name.trim().is_empty() {
                missing.push(handle.clone());
                continue;
            }
            let colors = node.true_colors();
            saved.push(SavedStand {
                handle: handle.clone(),
                coords: node
                    .transformed_points()
                    .into_iter()
                    .map(|point| [point.x(), point.y()])
                    .collect(),
                params: StandParams {
                    stroke_color: colors.stroke.to_hex(),
                    shape_color: colors.fill.into(),
                    stroke_width: node.stroke_width,
                    hide_stand: !node.visible,
                },
                name,
            });
        }

        if !missing.is_empty() {
            self.highlight_stands_without_id(form);
            warn!(count = missing.len(), "存在未填写编号的展位，拒绝保存");
            return Err(EngineError::MissingIdentifiers(missing));
        }
        info!(stands = saved.len(), "生成保存载荷");
        Ok(saved)
    }

    /// 结束会话：清空注册表、台账和待执行任务。
    pub fn teardown(&mut self) {
        self.registry.clear();
        self.ledger.clear();
        self.scheduler.clear();
        self.fields.clear();
        self.stands_by_label.clear();
        self.highlighted = None;
        self.viewport = ViewportState::default();
    }

    fn destroy(&mut self, handle: &str) {
        self.scheduler.cancel(handle);
        if self.highlighted.as_deref() == Some(handle) {
            self.highlighted = None;
        }
        if self.registry.delete(handle) {
            debug!(handle, "展位节点已销毁");
        }
    }

    fn focus(&mut self, bounds: &Bounds2D) {
        self.viewport.fit_bounds(
            bounds,
            self.settings.focus_padding,
            self.settings.view_width,
            self.settings.view_height,
        );
    }

    fn focus_stand(&mut self, handle: &str) {
        if let Some(bounds) = self.registry.stand(handle).and_then(StandNode::bounds) {
            self.focus(&bounds);
        }
    }

    /// 展位的编号字段为空（或不存在）。
    pub fn is_missing_id(&self, handle: &str, form: &dyn FormStore) -> bool {
        match self.fields.get(handle) {
            Some(field) => form
                .text(&field.to_string())
                .is_none_or(|text| text.trim().is_empty()),
            None => false,
        }
    }

    #[inline]
    pub fn field(&self, handle: &str) -> Option<&FieldName> {
        self.fields.get(handle)
    }

    pub fn stand_for_label(&self, label: &str) -> Option<&str> {
        self.stands_by_label.get(label).map(String::as_str)
    }

    /// 已载入且尚未销毁的展位句柄。
    pub fn stand_handles(&self) -> impl Iterator<Item = &str> {
        self.fields
            .keys()
            .filter(|handle| self.registry.stand(handle).is_some())
            .map(String::as_str)
    }

    #[inline]
    pub fn registry(&self) -> &ShapeRegistry {
        &self.registry
    }

    #[inline]
    pub fn registry_mut(&mut self) -> &mut ShapeRegistry {
        &mut self.registry
    }

    #[inline]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    #[inline]
    pub fn viewport(&self) -> ViewportState {
        self.viewport
    }

    #[inline]
    pub fn viewport_mut(&mut self) -> &mut ViewportState {
        &mut self.viewport
    }

    #[inline]
    pub fn palette(&self) -> &Palette {
        &self.settings.palette
    }

    #[inline]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    #[inline]
    pub fn search(&self) -> &str {
        &self.search
    }

    #[inline]
    pub fn highlighted(&self) -> Option<&str> {
        self.highlighted.as_deref()
    }

    #[inline]
    pub fn scheduler(&self) -> &GraceScheduler {
        &self.scheduler
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::form::FormValues;
    use crate::pipeline::{NormalizeOptions, normalize};
    use floorplan_core::{
        document::{Document, Entity, EntityKind, Polyline, PolylineVertex, Text},
        geometry::Point2,
    };

    fn square(handle: &str, x: f64, y: f64, size: f64) -> Entity {
        let corners = [(x, y), (x + size, y), (x + size, y + size), (x, y + size)];
        let vertices = corners
            .iter()
            .map(|&(px, py)| PolylineVertex::new(Point2::new(px, py)))
            .collect();
        Entity::new(handle, "stands", EntityKind::Polyline(Polyline::new(vertices, true)))
    }

    fn label(handle: &str, x: f64, y: f64, text: &str) -> Entity {
        Entity::new(
            handle,
            "stand id",
            EntityKind::Text(Text::new(Point2::new(x, y), text, 1.0)),
        )
    }

    /// 三个并排展位 S1/S2/S3，标注 L1/L2/L3（A1/A2/B1），视口 100×100。
    pub(crate) fn three_stand_model() -> CanonicalModel {
        let mut document = Document::new();
        document.header_mut().ext_min = Some(Point2::new(0.0, 0.0));
        document.header_mut().ext_max = Some(Point2::new(100.0, 100.0));
        for (index, text) in ["A1", "A2", "B1"].iter().enumerate() {
            let x = 10.0 + 30.0 * index as f64;
            let n = index + 1;
            document.add_entity(square(&format!("S{n}"), x, 10.0, 20.0));
            document.add_entity(label(&format!("L{n}"), x + 5.0, 15.0, text));
        }
        normalize(&document, &NormalizeOptions::new(100.0, 100.0))
    }

    pub(crate) fn loaded_engine() -> (SyncEngine, FormValues) {
        let mut engine = SyncEngine::new(EngineSettings {
            view_width: 100.0,
            view_height: 100.0,
            ..EngineSettings::default()
        });
        let mut form = FormValues::new();
        engine.load_model(&three_stand_model(), &mut form);
        (engine, form)
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn visible(engine: &SyncEngine) -> Vec<bool> {
        engine.registry().stands().map(|node| node.visible).collect()
    }

    #[test]
    fn load_seeds_form_and_ledger() {
        let (engine, form) = loaded_engine();
        assert_eq!(engine.ledger().len(), 3);
        assert_eq!(form.text("stand id/L2/main").as_deref(), Some("A2"));
        assert_eq!(form.flag("stand id/L2/delete"), Some(false));
        assert_eq!(engine.stand_for_label("L3"), Some("S3"));
        let node = engine.registry().stand("S1").expect("S1");
        assert!(node.visible && node.selected);
        assert_eq!(node.label_layer, "stand id");
        assert!(engine.registry().transformer().is_some());
    }

    #[test]
    fn mode_names_parse() {
        for mode in BulkMode::ALL {
            assert_eq!(mode.as_str().parse::<BulkMode>().expect("模式"), mode);
        }
        assert!(matches!(
            "explode".parse::<BulkMode>(),
            Err(EngineError::UnknownMode(_))
        ));
    }

    #[test]
    fn hide_all_respects_selection_unless_forced() {
        let (mut engine, mut form) = loaded_engine();
        engine.select_entity("S2", &mut form);
        assert_eq!(engine.apply(BulkMode::HideAll, false, &mut form), 2);
        assert_eq!(visible(&engine), vec![false, true, false]);
        assert_eq!(form.flag("stand id/L1/visibility"), Some(false));

        assert_eq!(engine.apply(BulkMode::ShowAll, false, &mut form), 2);
        assert_eq!(engine.apply(BulkMode::HideAll, true, &mut form), 3);
        assert_eq!(visible(&engine), vec![false, false, false]);
    }

    #[test]
    fn select_unselect_round_trip() {
        let (mut engine, mut form) = loaded_engine();
        let before = form.clone();
        assert_eq!(engine.apply(BulkMode::UnselectAll, false, &mut form), 3);
        assert!(engine.registry().stands().all(|node| !node.selected));
        assert!(engine.ledger().entries().all(|entry| !entry.selected));
        assert_eq!(engine.apply(BulkMode::SelectAll, false, &mut form), 3);
        assert_eq!(form, before);
        assert!(engine.registry().stands().all(|node| node.selected));
    }

    #[test]
    fn search_limits_bulk_selection() {
        let (mut engine, mut form) = loaded_engine();
        engine.set_search("^a", &mut form);
        assert_eq!(engine.ledger().len(), 2);
        assert_eq!(engine.apply(BulkMode::UnselectAll, false, &mut form), 2);
        assert_eq!(form.flag("stand id/L3/selected"), Some(true));
        assert_eq!(engine.apply(BulkMode::UnselectAll, true, &mut form), 3);
        assert_eq!(form.flag("stand id/L3/selected"), Some(false));
    }

    #[test]
    fn toggle_modes_flip_nodes_and_form() {
        let (mut engine, mut form) = loaded_engine();
        engine.apply(BulkMode::ToggleVisibility, false, &mut form);
        assert_eq!(visible(&engine), vec![false, false, false]);
        engine.apply(BulkMode::ToggleSelection, false, &mut form);
        assert_eq!(form.flag("stand id/L1/selected"), Some(false));
        engine.apply(BulkMode::ToggleVisibility, false, &mut form);
        assert_eq!(visible(&engine), vec![true, true, true]);
    }

    #[test]
    fn toggle_applies_after_grace_delay() {
        let (mut engine, mut form) = loaded_engine();
        let due = engine.toggle("S1", ms(1_000)).expect("已安排");
        assert_eq!(due, ms(1_300));
        assert!(engine.tick(ms(1_299), &mut form).is_empty());
        assert!(engine.registry().stand("S1").expect("S1").visible);
        engine.tick(ms(1_300), &mut form);
        assert!(!engine.registry().stand("S1").expect("S1").visible);
        assert_eq!(engine.ledger().get("L1").map(|entry| entry.visible), Some(false));
    }

    #[test]
    fn double_toggle_within_grace_cancels_out() {
        let (mut engine, mut form) = loaded_engine();
        engine.toggle("S1", ms(0));
        engine.toggle("S1", ms(100));
        engine.tick(ms(1_000), &mut form);
        assert!(engine.registry().stand("S1").expect("S1").visible);
        assert!(engine.toggle("missing", ms(0)).is_none());
    }

    #[test]
    fn delete_destroys_after_grace() {
        let (mut engine, mut form) = loaded_engine();
        assert!(engine.delete_stand("S2", ms(0), &mut form));
        assert!(!engine.ledger().contains("L2"));
        let node = engine.registry().stand("S2").expect("等待销毁");
        assert!(!node.visible);
        assert!(engine.toggle("S2", ms(10)).is_none());

        let fired = engine.tick(ms(300), &mut form);
        assert_eq!(fired, vec![("S2".to_string(), GraceAction::Destroy)]);
        assert!(engine.registry().stand("S2").is_none());
        assert_eq!(engine.stand_handles().collect::<Vec<_>>(), vec!["S1", "S3"]);
        assert!(!engine.delete_stand("S2", ms(400), &mut form));
    }

    #[test]
    fn bulk_delete_destroys_selected_immediately() {
        let (mut engine, mut form) = loaded_engine();
        engine.select_entity("S1", &mut form);
        assert_eq!(engine.apply(BulkMode::DeleteSelected, false, &mut form), 2);
        assert!(engine.registry().stand("S2").is_none());
        assert!(engine.registry().stand("S1").is_some());
        assert_eq!(engine.ledger().len(), 1);
        assert_eq!(form.flag("stand id/L3/delete"), Some(true));
    }

    #[test]
    fn highlight_restores_previous_and_focuses() {
        let (mut engine, form) = loaded_engine();
        let palette = engine.palette().clone();
        assert!(engine.highlight("S1", &form));
        assert_eq!(engine.registry().stand("S1").expect("S1").fill, palette.active_fill);
        assert!(engine.viewport().zoom > 1.0);

        assert!(engine.highlight("S2", &form));
        assert_eq!(engine.registry().stand("S1").expect("S1").fill, palette.stand_fill);
        assert_eq!(engine.highlighted(), Some("S2"));
        assert!(!engine.highlight("missing", &form));
        assert_eq!(engine.highlighted(), Some("S2"));
    }

    #[test]
    fn save_payload_lists_live_stands() {
        let (mut engine, mut form) = loaded_engine();
        engine.delete_stand("S3", ms(0), &mut form);
        let saved = engine.save_payload(&form).expect("可以保存");
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].handle, "S1");
        assert_eq!(saved[0].name, "A1");
        // 源 (10,10)-(30,30) 在 100×100 视口中 Y 翻转
        assert_eq!(saved[0].coords[0], [10.0, 90.0]);
        assert_eq!(saved[0].params.stroke_color, "#2e7d32ff");

        let json = serde_json::to_value(&saved[0]).expect("序列化");
        assert_eq!(json["params"]["shapeColor"]["r"], 0xc8);
        assert_eq!(json["params"]["shapeColor"]["a"], 1.0);
        assert_eq!(json["params"]["hideStand"], false);
    }

    #[test]
    fn save_is_refused_when_an_identifier_is_empty() {
        let (mut engine, mut form) = loaded_engine();
        form.set_value("stand id/L2/main", FormValue::from("  "));
        let err = engine.save_payload(&form).expect_err("应拒绝保存");
        match err {
            EngineError::MissingIdentifiers(handles) => assert_eq!(handles, vec!["S2"]),
            other => panic!("意外错误: {other}"),
        }
        let palette = engine.palette().clone();
        let node = engine.registry().stand("S2").expect("S2");
        assert_eq!(node.fill, palette.unassigned_fill);
        assert_eq!(node.true_colors(), palette.stand());
    }

    #[test]
    fn teardown_clears_registry() {
        let (mut engine, mut form) = loaded_engine();
        engine.toggle("S1", ms(0));
        engine.teardown();
        assert!(engine.registry().is_empty());
        assert!(engine.ledger().is_empty());
        assert!(engine.scheduler().is_idle());
        assert!(engine.tick(ms(1_000), &mut form).is_empty());
    }
}
