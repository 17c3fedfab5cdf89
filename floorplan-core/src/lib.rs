pub mod geometry {
    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    /// 二维点，内部以 `glam::DVec2` 表示。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn origin() -> Self {
            Self(DVec2::ZERO)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn translate(self, offset: Vector2) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn vector_to(self, other: Point2) -> Vector2 {
            Vector2(other.0 - self.0)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        /// 两个坐标分量各自保留三位小数。
        #[inline]
        pub fn rounded(self) -> Self {
            Self::new(round3(self.0.x), round3(self.0.y))
        }

        #[inline]
        pub fn is_finite(self) -> bool {
            self.0.is_finite()
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self::from_vec(value)
        }
    }

    /// 二维向量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn zero() -> Self {
            Self(DVec2::ZERO)
        }

        #[inline]
        pub fn from_points(start: Point2, end: Point2) -> Self {
            Self(end.0 - start.0)
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.0.length_squared()
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }
    }

    impl From<DVec2> for Vector2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 保留三位小数，稳定后续的相等比较与序列化结果。
    #[inline]
    pub fn round3(value: f64) -> f64 {
        (value * 1_000.0).round() / 1_000.0
    }

    /// 轴对齐边界框，用于估算文档/实体范围以及框选相交判断。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn new(min: Point2, max: Point2) -> Self {
            Self { min, max }
        }

        /// 由任意两个角点构造，自动整理为最小/最大角。
        pub fn from_corners(a: Point2, b: Point2) -> Self {
            Self {
                min: Point2::from_vec(a.as_vec2().min(b.as_vec2())),
                max: Point2::from_vec(a.as_vec2().max(b.as_vec2())),
            }
        }

        /// 以左上角与宽高描述的矩形（框选矩形的表示方式）。
        pub fn from_rect(x: f64, y: f64, width: f64, height: f64) -> Self {
            Self::from_corners(Point2::new(x, y), Point2::new(x + width, y + height))
        }

        pub fn from_points(points: impl IntoIterator<Item = Point2>) -> Option<Self> {
            let mut bounds = Self::empty();
            for point in points {
                bounds.include_point(point);
            }
            if bounds.is_empty() { None } else { Some(bounds) }
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        #[inline]
        pub fn width(&self) -> f64 {
            self.max.x() - self.min.x()
        }

        #[inline]
        pub fn height(&self) -> f64 {
            self.max.y() - self.min.y()
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            let min_vec = self.min.as_vec2().min(point.as_vec2());
            let max_vec = self.max.as_vec2().max(point.as_vec2());
            self.min = Point2::from_vec(min_vec);
            self.max = Point2::from_vec(max_vec);
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        /// 两个边界框是否相交（接触边界也算相交）。
        pub fn intersects(&self, other: &Bounds2D) -> bool {
            if self.is_empty() || other.is_empty() {
                return false;
            }
            !(self.max.x() < other.min.x()
                || self.min.x() > other.max.x()
                || self.max.y() < other.min.y()
                || self.min.y() > other.max.y())
        }

        #[inline]
        pub fn center(&self) -> Point2 {
            debug_assert!(!self.is_empty());
            let min_vec = self.min.as_vec2();
            let max_vec = self.max.as_vec2();
            let center = (min_vec + max_vec) * 0.5;
            Point2::from_vec(center)
        }
    }

    /// 文档范围到视口的适配参数。
    ///
    /// `source_min` 为源范围左下角，`target_min`/`target_max` 为缩放后范围在视口中的
    /// 左上、右下角；Y 轴在映射时翻转（CAD 原点在左下，视口原点在左上）。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct FitScale {
        pub scale_x: f64,
        pub scale_y: f64,
        pub source_min: Point2,
        pub target_min: Point2,
        pub target_max: Point2,
    }

    impl FitScale {
        /// 比例为 1、偏移为 0 的退化映射。
        pub fn identity(source_min: Point2, source_size: Vector2) -> Self {
            Self {
                scale_x: 1.0,
                scale_y: 1.0,
                source_min,
                target_min: Point2::origin(),
                target_max: Point2::new(source_size.x().max(0.0), source_size.y().max(0.0)),
            }
        }

        /// 半径等标量使用的统一比例。
        #[inline]
        pub fn uniform(&self) -> f64 {
            self.scale_x.min(self.scale_y)
        }
    }

    /// 计算把 `extent` 等比缩放并居中放入 `width × height` 视口的参数。
    ///
    /// 源范围宽或高为 0（或非有限值）时退化为比例 1、偏移 0，避免除零。
    pub fn compute_fit_scale(extent: Bounds2D, width: f64, height: f64) -> FitScale {
        let source_min = if extent.is_empty() || !extent.min().is_finite() {
            Point2::origin()
        } else {
            extent.min()
        };
        let source_width = if extent.is_empty() { 0.0 } else { extent.width() };
        let source_height = if extent.is_empty() { 0.0 } else { extent.height() };

        let degenerate = !(source_width.is_finite() && source_width > 0.0)
            || !(source_height.is_finite() && source_height > 0.0)
            || !(width.is_finite() && width > 0.0)
            || !(height.is_finite() && height > 0.0);
        if degenerate {
            let size = Vector2::new(
                if source_width.is_finite() { source_width } else { 0.0 },
                if source_height.is_finite() { source_height } else { 0.0 },
            );
            return FitScale::identity(source_min, size);
        }

        let scale = (width / source_width).min(height / source_height);
        let scaled_width = source_width * scale;
        let scaled_height = source_height * scale;
        let target_min = Point2::new((width - scaled_width) / 2.0, (height - scaled_height) / 2.0);
        let target_max = Point2::new(target_min.x() + scaled_width, target_min.y() + scaled_height);

        FitScale {
            scale_x: scale,
            scale_y: scale,
            source_min,
            target_min,
            target_max,
        }
    }

    /// 源坐标到视口坐标的仿射映射（Y 轴翻转）。
    #[inline]
    pub fn scale_point(point: Point2, fit: &FitScale) -> Point2 {
        Point2::new(
            (point.x() - fit.source_min.x()) * fit.scale_x + fit.target_min.x(),
            fit.target_max.y() - (point.y() - fit.source_min.y()) * fit.scale_y,
        )
    }

    /// `scale_point` 的逆映射。
    #[inline]
    pub fn inverse_scale_point(point: Point2, fit: &FitScale) -> Point2 {
        Point2::new(
            (point.x() - fit.target_min.x()) / fit.scale_x + fit.source_min.x(),
            (fit.target_max.y() - point.y()) / fit.scale_y + fit.source_min.y(),
        )
    }

    /// 射线法判断点是否在多边形内，多边形隐式闭合（末点连回首点）。
    ///
    /// 边界上的点按半开规则判定：一条边只有在恰好一个端点严格位于射线上方时才计数，
    /// 交点横坐标严格大于测试点时才翻转。对轴对齐矩形而言，左边与下边上的点判为内部，
    /// 右边与上边上的点判为外部。
    pub fn point_in_polygon(point: Point2, polygon: &[Point2]) -> bool {
        if polygon.len() < 3 {
            return false;
        }
        let (px, py) = (point.x(), point.y());
        let mut inside = false;
        let mut j = polygon.len() - 1;
        for i in 0..polygon.len() {
            let (xi, yi) = (polygon[i].x(), polygon[i].y());
            let (xj, yj) = (polygon[j].x(), polygon[j].y());
            if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

}

pub mod document {
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};

    use crate::geometry::{Bounds2D, Point2, Vector2};

    /// 绘图中的单个实体：公共字段 + 具体几何。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Entity {
        pub handle: String,
        pub layer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub line_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub style: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub scale_x: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub scale_y: Option<f64>,
        /// `prepare` 阶段解析出的线型记录。
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub line_style: Option<LineType>,
        /// `prepare` 阶段解析出的文字样式记录。
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub text_style: Option<TextStyle>,
        pub kind: EntityKind,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum EntityKind {
        Line(Line),
        Circle(Circle),
        Arc(Arc),
        Ellipse(Ellipse),
        Polyline(Polyline),
        Text(Text),
        MText(Text),
        Solid(Solid),
        Hatch(Hatch),
        Insert(Insert),
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Line {
        pub start: Point2,
        pub end: Point2,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Circle {
        pub center: Point2,
        pub radius: f64,
    }

    /// 角度以弧度存储。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Arc {
        pub center: Point2,
        pub radius: f64,
        pub start_angle: f64,
        pub end_angle: f64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Ellipse {
        pub center: Point2,
        pub major_axis: Vector2,
        pub ratio: f64,
        pub start_parameter: f64,
        pub end_parameter: f64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct PolylineVertex {
        pub position: Point2,
        pub bulge: f64,
    }

    impl PolylineVertex {
        #[inline]
        pub fn new(position: Point2) -> Self {
            Self {
                position,
                bulge: 0.0,
            }
        }

        #[inline]
        pub fn with_bulge(position: Point2, bulge: f64) -> Self {
            Self { position, bulge }
        }
    }

    /// 多段线。`points` 为顶点展开后的 `[x0, y0, x1, y1, ...]` 列表，
    /// 在顶点变化后通过 [`Polyline::rebuild_points`] 重新生成。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Polyline {
        pub vertices: Vec<PolylineVertex>,
        #[serde(default)]
        pub points: Vec<f64>,
        pub is_closed: bool,
        /// 来源为 LWPOLYLINE。
        #[serde(default)]
        pub lightweight: bool,
    }

    impl Polyline {
        pub fn new(vertices: Vec<PolylineVertex>, is_closed: bool) -> Self {
            let mut polyline = Self {
                vertices,
                points: Vec::new(),
                is_closed,
                lightweight: false,
            };
            polyline.rebuild_points();
            polyline
        }

        pub fn rebuild_points(&mut self) {
            self.points = self
                .vertices
                .iter()
                .flat_map(|vertex| [vertex.position.x(), vertex.position.y()])
                .collect();
        }

        pub fn positions(&self) -> Vec<Point2> {
            self.vertices.iter().map(|vertex| vertex.position).collect()
        }
    }

    /// TEXT 与 MTEXT 共用的文字数据。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Text {
        pub insert: Point2,
        /// 对齐点（组码 11/21），存在时在 `prepare` 中替换插入点。
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub alignment: Option<Point2>,
        pub content: String,
        pub height: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub nominal_height: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub width: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub horizontal_width: Option<f64>,
        pub rotation: f64,
    }

    impl Text {
        pub fn new(insert: Point2, content: impl Into<String>, height: f64) -> Self {
            Self {
                insert,
                alignment: None,
                content: content.into(),
                height,
                nominal_height: None,
                width: None,
                horizontal_width: None,
                rotation: 0.0,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Solid {
        pub corners: Vec<Point2>,
    }

    /// 填充边界环，边界统一表示为实体列表（多段线或线/圆弧/椭圆边）。
    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    pub struct HatchLoop {
        pub entities: Vec<Entity>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Hatch {
        pub pattern_name: String,
        pub is_solid: bool,
        pub loops: Vec<HatchLoop>,
    }

    /// 块参照。`entities` 在管线解析块表后填充。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Insert {
        pub block_name: String,
        pub insert: Point2,
        pub scale: Vector2,
        pub rotation: f64,
        #[serde(default)]
        pub entities: Vec<Entity>,
    }

    impl Entity {
        pub fn new(handle: impl Into<String>, layer: impl Into<String>, kind: EntityKind) -> Self {
            Self {
                handle: handle.into(),
                layer: layer.into(),
                line_type: None,
                style: None,
                scale_x: None,
                scale_y: None,
                line_style: None,
                text_style: None,
                kind,
            }
        }

        /// DXF 中的实体类型名。
        pub fn kind_name(&self) -> &'static str {
            match &self.kind {
                EntityKind::Line(_) => "LINE",
                EntityKind::Circle(_) => "CIRCLE",
                EntityKind::Arc(_) => "ARC",
                EntityKind::Ellipse(_) => "ELLIPSE",
                EntityKind::Polyline(polyline) if polyline.lightweight => "LWPOLYLINE",
                EntityKind::Polyline(_) => "POLYLINE",
                EntityKind::Text(_) => "TEXT",
                EntityKind::MText(_) => "MTEXT",
                EntityKind::Solid(_) => "SOLID",
                EntityKind::Hatch(_) => "HATCH",
                EntityKind::Insert(_) => "INSERT",
            }
        }

        #[inline]
        pub fn is_text(&self) -> bool {
            matches!(self.kind, EntityKind::Text(_) | EntityKind::MText(_))
        }

        #[inline]
        pub fn as_text(&self) -> Option<&Text> {
            match &self.kind {
                EntityKind::Text(text) | EntityKind::MText(text) => Some(text),
                _ => None,
            }
        }

        #[inline]
        pub fn as_polyline(&self) -> Option<&Polyline> {
            match &self.kind {
                EntityKind::Polyline(polyline) => Some(polyline),
                _ => None,
            }
        }

        /// 计算实体的 2D 轴对齐范围；文字退化为插入点。
        pub fn bounds(&self) -> Option<Bounds2D> {
            let mut bounds = Bounds2D::empty();
            match &self.kind {
                EntityKind::Line(line) => {
                    bounds.include_point(line.start);
                    bounds.include_point(line.end);
                }
                EntityKind::Circle(Circle { center, radius })
                | EntityKind::Arc(Arc { center, radius, .. }) => {
                    let radius = radius.abs();
                    bounds.include_point(Point2::new(center.x() - radius, center.y() - radius));
                    bounds.include_point(Point2::new(center.x() + radius, center.y() + radius));
                }
                EntityKind::Ellipse(ellipse) => {
                    let major = ellipse.major_axis.as_vec2().length();
                    let center = ellipse.center;
                    bounds.include_point(Point2::new(center.x() - major, center.y() - major));
                    bounds.include_point(Point2::new(center.x() + major, center.y() + major));
                }
                EntityKind::Polyline(polyline) => {
                    for vertex in &polyline.vertices {
                        bounds.include_point(vertex.position);
                    }
                }
                EntityKind::Text(text) | EntityKind::MText(text) => {
                    bounds.include_point(text.insert);
                }
                EntityKind::Solid(solid) => {
                    for corner in &solid.corners {
                        bounds.include_point(*corner);
                    }
                }
                EntityKind::Hatch(hatch) => {
                    for hatch_loop in &hatch.loops {
                        for entity in &hatch_loop.entities {
                            if let Some(inner) = entity.bounds() {
                                bounds.include_bounds(&inner);
                            }
                        }
                    }
                }
                EntityKind::Insert(insert) => {
                    bounds.include_point(insert.insert);
                    for entity in &insert.entities {
                        if let Some(inner) = entity.bounds() {
                            bounds.include_bounds(&inner);
                        }
                    }
                }
            }
            if bounds.is_empty() { None } else { Some(bounds) }
        }

        /// 整体平移实体（含填充边界与块内实体）。
        pub fn translate(&mut self, offset: Vector2) {
            match &mut self.kind {
                EntityKind::Line(line) => {
                    line.start = line.start.translate(offset);
                    line.end = line.end.translate(offset);
                }
                EntityKind::Circle(circle) => circle.center = circle.center.translate(offset),
                EntityKind::Arc(arc) => arc.center = arc.center.translate(offset),
                EntityKind::Ellipse(ellipse) => {
                    ellipse.center = ellipse.center.translate(offset);
                }
                EntityKind::Polyline(polyline) => {
                    for vertex in &mut polyline.vertices {
                        vertex.position = vertex.position.translate(offset);
                    }
                    polyline.rebuild_points();
                }
                EntityKind::Text(text) | EntityKind::MText(text) => {
                    text.insert = text.insert.translate(offset);
                    if let Some(alignment) = text.alignment.as_mut() {
                        *alignment = alignment.translate(offset);
                    }
                }
                EntityKind::Solid(solid) => {
                    for corner in &mut solid.corners {
                        *corner = corner.translate(offset);
                    }
                }
                EntityKind::Hatch(hatch) => {
                    for hatch_loop in &mut hatch.loops {
                        for entity in &mut hatch_loop.entities {
                            entity.translate(offset);
                        }
                    }
                }
                EntityKind::Insert(insert) => {
                    insert.insert = insert.insert.translate(offset);
                    for entity in &mut insert.entities {
                        entity.translate(offset);
                    }
                }
            }
        }
    }

    /// 块定义：名称、基点与块内实体。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Block {
        pub name: String,
        pub base_point: Point2,
        pub entities: Vec<Entity>,
    }

    /// 图层表记录。颜色号为负表示图层关闭。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct LayerRecord {
        pub name: String,
        pub color_number: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub line_type: Option<String>,
    }

    impl LayerRecord {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                color_number: 7,
                line_type: None,
            }
        }

        #[inline]
        pub fn is_visible(&self) -> bool {
            self.color_number > 0
        }
    }

    /// 线型表记录，`pattern` 为虚线段长度（正为实线段，负为空白）。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct LineType {
        pub name: String,
        #[serde(default)]
        pub description: String,
        #[serde(default)]
        pub pattern: Vec<f64>,
        #[serde(default)]
        pub total_length: f64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct TextStyle {
        pub name: String,
        #[serde(default)]
        pub font_file: String,
        #[serde(default)]
        pub fixed_height: f64,
        #[serde(default = "TextStyle::default_width_factor")]
        pub width_factor: f64,
    }

    impl TextStyle {
        fn default_width_factor() -> f64 {
            1.0
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ViewportRecord {
        pub name: String,
        pub center: Point2,
        pub height: f64,
        pub aspect_ratio: f64,
    }

    /// 文件中的查找表（图层、文字样式、线型、视口）。
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Tables {
        pub layers: IndexMap<String, LayerRecord>,
        pub styles: IndexMap<String, TextStyle>,
        pub line_types: IndexMap<String, LineType>,
        pub viewports: Vec<ViewportRecord>,
    }

    /// HEADER 段中与范围相关的变量。
    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    pub struct Header {
        pub ext_min: Option<Point2>,
        pub ext_max: Option<Point2>,
    }

    /// 一次解析得到的完整文档。实体保持源文件顺序。
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Document {
        header: Header,
        entities: Vec<Entity>,
        blocks: IndexMap<String, Block>,
        tables: Tables,
    }

    impl Document {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_entity(&mut self, entity: Entity) {
            self.entities.push(entity);
        }

        #[inline]
        pub fn entities(&self) -> &[Entity] {
            &self.entities
        }

        #[inline]
        pub fn entity_count(&self) -> usize {
            self.entities.len()
        }

        pub fn entity(&self, handle: &str) -> Option<&Entity> {
            self.entities.iter().find(|entity| entity.handle == handle)
        }

        /// 同名块以后出现者为准。
        pub fn add_block(&mut self, block: Block) {
            self.blocks.insert(block.name.clone(), block);
        }

        #[inline]
        pub fn block(&self, name: &str) -> Option<&Block> {
            self.blocks.get(name)
        }

        pub fn blocks(&self) -> impl Iterator<Item = &Block> {
            self.blocks.values()
        }

        #[inline]
        pub fn header(&self) -> &Header {
            &self.header
        }

        #[inline]
        pub fn header_mut(&mut self) -> &mut Header {
            &mut self.header
        }

        /// 头部声明的范围；两个角点都存在时才返回。
        pub fn extents(&self) -> Option<Bounds2D> {
            match (self.header.ext_min, self.header.ext_max) {
                (Some(min), Some(max)) => Some(Bounds2D::from_corners(min, max)),
                _ => None,
            }
        }

        #[inline]
        pub fn tables(&self) -> &Tables {
            &self.tables
        }

        #[inline]
        pub fn tables_mut(&mut self) -> &mut Tables {
            &mut self.tables
        }

        /// 全部实体的几何范围。
        pub fn bounds(&self) -> Option<Bounds2D> {
            let mut bounds = Bounds2D::empty();
            let mut has = false;
            for entity in &self.entities {
                if let Some(entity_bounds) = entity.bounds() {
                    bounds.include_bounds(&entity_bounds);
                    has = true;
                }
            }
            if has { Some(bounds) } else { None }
        }
    }

}

pub mod conventions {
    use serde::{Deserialize, Serialize};

    /// 按图层名前缀识别的图层类别。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum LayerCategory {
        /// 展位轮廓
        Stands,
        /// 展位编号文字
        StandId,
        /// 展位名称文字
        StandName,
        Wall,
    }

    /// 图层命名约定。前缀比较忽略大小写。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct LayerConventions {
        pub stands_prefix: String,
        pub stand_id_prefix: String,
        pub stand_name_prefix: String,
        pub wall_prefix: String,
        /// "stand id" 图层在界面上的规范显示名。
        pub stands_display_name: String,
        pub unsupported_layer: String,
        pub unsupported_display_name: String,
    }

    impl Default for LayerConventions {
        fn default() -> Self {
            Self {
                stands_prefix: "stands".to_string(),
                stand_id_prefix: "stand id".to_string(),
                stand_name_prefix: "stand name".to_string(),
                wall_prefix: "wall".to_string(),
                stands_display_name: "stands".to_string(),
                unsupported_layer: "unsupported-elements".to_string(),
                unsupported_display_name: "Unsupported elements".to_string(),
            }
        }
    }

    impl LayerConventions {
        fn prefix(&self, category: LayerCategory) -> &str {
            match category {
                LayerCategory::Stands => &self.stands_prefix,
                LayerCategory::StandId => &self.stand_id_prefix,
                LayerCategory::StandName => &self.stand_name_prefix,
                LayerCategory::Wall => &self.wall_prefix,
            }
        }

        /// 图层名（小写后）是否以该类别前缀开头。
        pub fn matches(&self, layer: &str, category: LayerCategory) -> bool {
            let prefix = self.prefix(category).to_lowercase();
            !prefix.is_empty() && layer.to_lowercase().starts_with(&prefix)
        }

        pub fn category(&self, layer: &str) -> Option<LayerCategory> {
            [
                LayerCategory::StandId,
                LayerCategory::StandName,
                LayerCategory::Stands,
                LayerCategory::Wall,
            ]
            .into_iter()
            .find(|category| self.matches(layer, *category))
        }

        /// 图层显示名：名称中的 "stand id"（忽略大小写）替换为规范显示名。
        pub fn display_name(&self, layer: &str) -> String {
            let needle = self.stand_id_prefix.to_lowercase();
            if needle.is_empty() {
                return layer.to_string();
            }
            let lower = layer.to_lowercase();
            // 仅在小写化不改变字节长度时才能按下标切片
            if lower.len() != layer.len() {
                return layer.to_string();
            }
            let mut result = String::with_capacity(layer.len());
            let mut cursor = 0;
            while let Some(found) = lower[cursor..].find(&needle) {
                let start = cursor + found;
                result.push_str(&layer[cursor..start]);
                result.push_str(&self.stands_display_name);
                cursor = start + needle.len();
            }
            result.push_str(&layer[cursor..]);
            result
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn prefix_match_ignores_case() {
            let conventions = LayerConventions::default();
            assert!(conventions.matches("Stands Hall A", LayerCategory::Stands));
            assert!(conventions.matches("STAND ID", LayerCategory::StandId));
            assert!(!conventions.matches("stand id", LayerCategory::Stands));
            assert!(!conventions.matches("outline", LayerCategory::Stands));
            assert_eq!(conventions.category("Walls"), Some(LayerCategory::Wall));
            assert_eq!(conventions.category("furniture"), None);
        }

        #[test]
        fn stand_id_layer_is_aliased() {
            let conventions = LayerConventions::default();
            assert_eq!(conventions.display_name("Stand ID"), "stands");
            assert_eq!(conventions.display_name("hall 2 stand id"), "hall 2 stands");
            assert_eq!(conventions.display_name("wall"), "wall");
        }
    }
}

pub mod style {
    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum ColorParseError {
        #[error("颜色值 {0:?} 不是合法的 #rrggbb 或 #rrggbbaa")]
        Invalid(String),
    }

    /// 8 位 RGBA 颜色，序列化为 `#rrggbbaa` 十六进制串。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(try_from = "String", into = "String")]
    pub struct Rgba {
        pub r: u8,
        pub g: u8,
        pub b: u8,
        pub a: u8,
    }

    impl Rgba {
        #[inline]
        pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
            Self { r, g, b, a: 0xff }
        }

        /// 解析 `#rrggbb` 或 `#rrggbbaa`（`#` 可省略），缺省透明度补 `ff`。
        pub fn from_hex(raw: &str) -> Result<Self, ColorParseError> {
            let trimmed = raw.trim();
            let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
            if !(digits.len() == 6 || digits.len() == 8)
                || !digits.bytes().all(|byte| byte.is_ascii_hexdigit())
            {
                return Err(ColorParseError::Invalid(raw.to_string()));
            }
            let channel = |index: usize| {
                u8::from_str_radix(&digits[index..index + 2], 16)
                    .map_err(|_| ColorParseError::Invalid(raw.to_string()))
            };
            let a = if digits.len() == 8 { channel(6)? } else { 0xff };
            Ok(Self {
                r: channel(0)?,
                g: channel(2)?,
                b: channel(4)?,
                a,
            })
        }

        pub fn to_hex(self) -> String {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }

        /// 透明度换算为 0..=1。
        #[inline]
        pub fn alpha(self) -> f64 {
            f64::from(self.a) / 255.0
        }
    }

    impl TryFrom<String> for Rgba {
        type Error = ColorParseError;

        fn try_from(value: String) -> Result<Self, Self::Error> {
            Self::from_hex(&value)
        }
    }

    impl From<Rgba> for String {
        fn from(value: Rgba) -> Self {
            value.to_hex()
        }
    }

    /// 一组填充色 + 描边色。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Colors {
        pub fill: Rgba,
        pub stroke: Rgba,
    }

    /// 编辑器使用的调色板。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Palette {
        pub stand_fill: Rgba,
        pub stand_stroke: Rgba,
        pub active_fill: Rgba,
        pub active_stroke: Rgba,
        /// 缺少编号的展位使用的颜色。
        pub unassigned_fill: Rgba,
        pub unassigned_stroke: Rgba,
        pub unsupported: Rgba,
        pub stroke_width: f64,
    }

    impl Default for Palette {
        fn default() -> Self {
            Self {
                stand_fill: Rgba::rgb(0xc8, 0xe6, 0xc9),
                stand_stroke: Rgba::rgb(0x2e, 0x7d, 0x32),
                active_fill: Rgba::rgb(0xbb, 0xde, 0xfb),
                active_stroke: Rgba::rgb(0x15, 0x65, 0xc0),
                unassigned_fill: Rgba::rgb(0xff, 0xcd, 0xd2),
                unassigned_stroke: Rgba::rgb(0xc6, 0x28, 0x28),
                unsupported: Rgba::rgb(0x9e, 0x9e, 0x9e),
                stroke_width: 1.0,
            }
        }
    }

    impl Palette {
        #[inline]
        pub fn stand(&self) -> Colors {
            Colors {
                fill: self.stand_fill,
                stroke: self.stand_stroke,
            }
        }

        #[inline]
        pub fn active(&self) -> Colors {
            Colors {
                fill: self.active_fill,
                stroke: self.active_stroke,
            }
        }

        #[inline]
        pub fn unassigned(&self) -> Colors {
            Colors {
                fill: self.unassigned_fill,
                stroke: self.unassigned_stroke,
            }
        }
    }

}
