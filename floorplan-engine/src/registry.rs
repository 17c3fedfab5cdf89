//! 场景节点注册表：句柄 → 活动节点，先写入者为准。

use floorplan_core::{
    geometry::{Bounds2D, Point2, Vector2},
    style::{Colors, Palette, Rgba},
};
use indexmap::IndexMap;
use tracing::debug;

use crate::pipeline::StandShape;

/// 变换手柄节点在注册表中的固定键。
pub const TRANSFORMER_KEY: &str = "editor:transformer";
/// 框选矩形节点在注册表中的固定键。
pub const SELECTION_RECT_KEY: &str = "editor:selection-rect";

/// 图层分组节点的键。
pub fn group_key(layer: &str) -> String {
    format!("layer:{layer}")
}

/// 可渲染的展位节点。
#[derive(Debug, Clone, PartialEq)]
pub struct StandNode {
    pub handle: String,
    pub layer: String,
    pub label_handle: String,
    pub label_layer: String,
    pub points: Vec<Point2>,
    pub closed: bool,
    pub fill: Rgba,
    pub stroke: Rgba,
    /// 高亮或告警前的真实颜色；两者同时为空表示当前颜色即真实颜色。
    pub real_fill: Option<Rgba>,
    pub real_stroke: Option<Rgba>,
    pub stroke_width: f64,
    pub visible: bool,
    pub selected: bool,
    /// 用户拖拽/缩放产生的节点变换。
    pub offset: Vector2,
    pub scale: Vector2,
}

impl StandNode {
    pub fn from_shape(shape: &StandShape, label_layer: &str, palette: &Palette) -> Self {
        let colors = palette.stand();
        Self {
            handle: shape.handle.clone(),
            layer: shape.layer.clone(),
            label_handle: shape.label.clone(),
            label_layer: label_layer.to_string(),
            points: shape.vertices.clone(),
            closed: shape.closed,
            fill: colors.fill,
            stroke: colors.stroke,
            real_fill: None,
            real_stroke: None,
            stroke_width: palette.stroke_width,
            visible: true,
            selected: true,
            offset: Vector2::zero(),
            scale: Vector2::new(1.0, 1.0),
        }
    }

    /// 叠加节点变换后的顶点。
    pub fn transformed_points(&self) -> Vec<Point2> {
        self.points
            .iter()
            .map(|point| {
                Point2::from_vec(point.as_vec2() * self.scale.as_vec2() + self.offset.as_vec2())
                    .rounded()
            })
            .collect()
    }

    pub fn bounds(&self) -> Option<Bounds2D> {
        Bounds2D::from_points(self.transformed_points())
    }

    /// 首次覆盖颜色前记住真实颜色。
    pub fn remember_palette(&mut self) {
        if self.real_fill.is_none() && self.real_stroke.is_none() {
            self.real_fill = Some(self.fill);
            self.real_stroke = Some(self.stroke);
        }
    }

    fn paint(&mut self, colors: Colors) {
        self.remember_palette();
        self.fill = colors.fill;
        self.stroke = colors.stroke;
    }

    /// 高亮配色。
    pub fn activate(&mut self, palette: &Palette) {
        self.paint(palette.active());
    }

    /// 缺少编号时的告警配色。
    pub fn warn(&mut self, palette: &Palette) {
        self.paint(palette.unassigned());
    }

    /// 恢复真实颜色，返回是否有颜色被恢复。
    pub fn restore(&mut self) -> bool {
        let restored = self.real_fill.is_some() || self.real_stroke.is_some();
        if let Some(fill) = self.real_fill.take() {
            self.fill = fill;
        }
        if let Some(stroke) = self.real_stroke.take() {
            self.stroke = stroke;
        }
        restored
    }

    /// 不受高亮/告警影响的颜色。
    pub fn true_colors(&self) -> Colors {
        Colors {
            fill: self.real_fill.unwrap_or(self.fill),
            stroke: self.real_stroke.unwrap_or(self.stroke),
        }
    }

    #[inline]
    pub fn is_painted_over(&self) -> bool {
        self.real_fill.is_some() || self.real_stroke.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupNode {
    pub name: String,
    pub display_name: String,
    pub visible: bool,
    /// 组内展位句柄，保持源顺序。
    pub children: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformerNode {
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionRectNode {
    pub rect: Option<Bounds2D>,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShapeNode {
    Stand(StandNode),
    LayerGroup(GroupNode),
    Transformer(TransformerNode),
    SelectionRect(SelectionRectNode),
}

/// 会话内唯一的节点存储，由引擎持有并按引用传递。
#[derive(Debug, Default)]
pub struct ShapeRegistry {
    nodes: IndexMap<String, ShapeNode>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册节点；句柄已存在时保持原节点并返回 `false`。
    pub fn set(&mut self, key: impl Into<String>, node: ShapeNode) -> bool {
        let key = key.into();
        if self.nodes.contains_key(&key) {
            debug!(key = %key, "节点已注册，忽略重复写入");
            return false;
        }
        self.nodes.insert(key, node);
        true
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&ShapeNode> {
        self.nodes.get(key)
    }

    #[inline]
    pub fn get_mut(&mut self, key: &str) -> Option<&mut ShapeNode> {
        self.nodes.get_mut(key)
    }

    pub fn stand(&self, handle: &str) -> Option<&StandNode> {
        match self.nodes.get(handle) {
            Some(ShapeNode::Stand(node)) => Some(node),
            _ => None,
        }
    }

    pub fn stand_mut(&mut self, handle: &str) -> Option<&mut StandNode> {
        match self.nodes.get_mut(handle) {
            Some(ShapeNode::Stand(node)) => Some(node),
            _ => None,
        }
    }

    pub fn group(&self, layer: &str) -> Option<&GroupNode> {
        match self.nodes.get(&group_key(layer)) {
            Some(ShapeNode::LayerGroup(group)) => Some(group),
            _ => None,
        }
    }

    pub fn transformer(&self) -> Option<&TransformerNode> {
        match self.nodes.get(TRANSFORMER_KEY) {
            Some(ShapeNode::Transformer(node)) => Some(node),
            _ => None,
        }
    }

    pub fn transformer_mut(&mut self) -> Option<&mut TransformerNode> {
        match self.nodes.get_mut(TRANSFORMER_KEY) {
            Some(ShapeNode::Transformer(node)) => Some(node),
            _ => None,
        }
    }

    pub fn selection_rect_mut(&mut self) -> Option<&mut SelectionRectNode> {
        match self.nodes.get_mut(SELECTION_RECT_KEY) {
            Some(ShapeNode::SelectionRect(node)) => Some(node),
            _ => None,
        }
    }

    /// 删除节点，同时从所属分组与变换手柄中移除该句柄。
    pub fn delete(&mut self, key: &str) -> bool {
        let Some(removed) = self.nodes.shift_remove(key) else {
            return false;
        };
        if let ShapeNode::Stand(stand) = &removed {
            if let Some(ShapeNode::LayerGroup(group)) = self.nodes.get_mut(&group_key(&stand.layer))
            {
                group.children.retain(|child| child != key);
            }
            if let Some(transformer) = self.transformer_mut() {
                transformer.nodes.retain(|node| node != key);
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stands(&self) -> impl Iterator<Item = &StandNode> {
        self.nodes.values().filter_map(|node| match node {
            ShapeNode::Stand(stand) => Some(stand),
            _ => None,
        })
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupNode> {
        self.nodes.values().filter_map(|node| match node {
            ShapeNode::LayerGroup(group) => Some(group),
            _ => None,
        })
    }
}
