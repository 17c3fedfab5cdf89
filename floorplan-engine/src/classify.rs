//! 实体分类、预处理与坐标变换。

use floorplan_core::{
    conventions::{LayerCategory, LayerConventions},
    document::{Entity, EntityKind, Tables},
    geometry::{FitScale, Point2, Vector2, round3, scale_point},
};

use crate::viewport::ViewportState;

/// 分类结果：展位候选或不受支持的实体。
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Valid(Entity),
    Invalid(Entity),
}

impl Classification {
    #[inline]
    pub fn is_valid(&self) -> bool {
        matches!(self, Classification::Valid(_))
    }

    pub fn into_entity(self) -> Entity {
        match self {
            Classification::Valid(entity) | Classification::Invalid(entity) => entity,
        }
    }
}

/// 多段线且位于展位图层时为展位候选。
pub fn is_stand_candidate(entity: &Entity, conventions: &LayerConventions) -> bool {
    matches!(entity.kind, EntityKind::Polyline(_))
        && conventions.matches(&entity.layer, LayerCategory::Stands)
}

/// 位于展位编号图层上的 TEXT/MTEXT。
pub fn is_label_candidate(entity: &Entity, conventions: &LayerConventions) -> bool {
    entity.is_text() && conventions.matches(&entity.layer, LayerCategory::StandId)
}

pub fn classify(entity: Entity, conventions: &LayerConventions) -> Classification {
    if is_stand_candidate(&entity, conventions) {
        Classification::Valid(entity)
    } else {
        Classification::Invalid(entity)
    }
}

/// 按类型规范化实体：解析线型/样式、补全缩放因子、解码文字转义、
/// 以对齐点替换插入点，并把 LWPOLYLINE 统一为 POLYLINE。
pub fn prepare(mut entity: Entity, tables: &Tables) -> Entity {
    let line_type_name = entity.line_type.clone().or_else(|| {
        tables
            .layers
            .get(&entity.layer)
            .and_then(|layer| layer.line_type.clone())
    });
    entity.line_style = line_type_name.and_then(|name| tables.line_types.get(&name).cloned());
    entity.text_style = entity
        .style
        .as_ref()
        .and_then(|name| tables.styles.get(name).cloned());
    entity.scale_x = Some(entity.scale_x.unwrap_or(1.0));
    entity.scale_y = Some(entity.scale_y.unwrap_or(1.0));

    match &mut entity.kind {
        EntityKind::Text(text) | EntityKind::MText(text) => {
            text.content = decode_special_chars(&text.content);
            if let Some(alignment) = text.alignment.take() {
                text.insert = alignment;
            }
            if let Some(nominal) = text.nominal_height.filter(|value| *value > 0.0) {
                text.height = nominal;
            }
            if let Some(horizontal) = text.horizontal_width.filter(|value| *value > 0.0) {
                text.width = Some(horizontal);
            }
        }
        EntityKind::Polyline(polyline) => {
            polyline.lightweight = false;
            polyline.rebuild_points();
        }
        EntityKind::Hatch(hatch) => {
            for hatch_loop in &mut hatch.loops {
                let entities = std::mem::take(&mut hatch_loop.entities);
                hatch_loop.entities = entities
                    .into_iter()
                    .map(|inner| prepare(inner, tables))
                    .collect();
            }
        }
        EntityKind::Insert(insert) => {
            let entities = std::mem::take(&mut insert.entities);
            insert.entities = entities
                .into_iter()
                .map(|inner| prepare(inner, tables))
                .collect();
        }
        _ => {}
    }
    entity
}

/// 解码 CAD 文字中的控制码：`%%d` → °、`%%p` → ±、`%%c` → ∅、`%%%` → %、
/// `\U+XXXX` → 对应字符；`%%o`/`%%u`（上划线/下划线开关）直接移除，
/// 无法识别的序列原样保留。
pub fn decode_special_chars(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find(['%', '\\']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("%%") {
            let replacement = match after.chars().next() {
                Some('d' | 'D') => Some("°"),
                Some('p' | 'P') => Some("±"),
                Some('c' | 'C') => Some("∅"),
                Some('%') => Some("%"),
                Some('o' | 'O' | 'u' | 'U') => Some(""),
                _ => None,
            };
            match replacement {
                Some(text) => {
                    out.push_str(text);
                    rest = &after[1..];
                }
                None => {
                    out.push_str("%%");
                    rest = after;
                }
            }
            continue;
        }

        if let Some(after) = tail.strip_prefix("\\U+") {
            let decoded = after
                .get(..4)
                .filter(|digits| digits.chars().all(|ch| ch.is_ascii_hexdigit()))
                .and_then(|digits| u32::from_str_radix(digits, 16).ok())
                .and_then(char::from_u32);
            match decoded {
                Some(ch) => {
                    out.push(ch);
                    rest = &after[4..];
                }
                None => {
                    out.push_str("\\U+");
                    rest = after;
                }
            }
            continue;
        }

        // 单独的 '%' 或 '\\'
        out.push_str(&tail[..1]);
        rest = &tail[1..];
    }
    out.push_str(rest);
    out
}

/// 源坐标 → 视口适配 → 当前平移缩放，结果保留三位小数。
#[inline]
fn project(point: Point2, fit: &FitScale, viewport: &ViewportState) -> Point2 {
    viewport.to_scene(scale_point(point, fit)).rounded()
}

#[inline]
fn project_length(length: f64, fit: &FitScale, viewport: &ViewportState) -> f64 {
    round3(length * fit.uniform() / viewport.zoom)
}

/// 按实体类型把坐标变换到视口空间。所有类型共用同一组适配参数，
/// 之后再叠加视口的平移与缩放。
pub fn scale(mut entity: Entity, fit: &FitScale, viewport: &ViewportState) -> Entity {
    match &mut entity.kind {
        EntityKind::Text(text) | EntityKind::MText(text) => {
            text.insert = project(text.insert, fit, viewport);
            text.alignment = text.alignment.map(|point| project(point, fit, viewport));
        }
        EntityKind::Circle(circle) => {
            circle.center = project(circle.center, fit, viewport);
            circle.radius = project_length(circle.radius, fit, viewport);
        }
        EntityKind::Arc(arc) => {
            arc.center = project(arc.center, fit, viewport);
            arc.radius = project_length(arc.radius, fit, viewport);
        }
        EntityKind::Ellipse(ellipse) => {
            ellipse.center = project(ellipse.center, fit, viewport);
            // 轴向量只缩放不平移，Y 分量随坐标系翻转
            ellipse.major_axis = Vector2::new(
                round3(ellipse.major_axis.x() * fit.scale_x / viewport.zoom),
                round3(-ellipse.major_axis.y() * fit.scale_y / viewport.zoom),
            );
        }
        EntityKind::Line(line) => {
            line.start = project(line.start, fit, viewport);
            line.end = project(line.end, fit, viewport);
        }
        EntityKind::Polyline(polyline) => {
            for vertex in &mut polyline.vertices {
                vertex.position = project(vertex.position, fit, viewport);
            }
            polyline.rebuild_points();
        }
        EntityKind::Solid(solid) => {
            for corner in &mut solid.corners {
                *corner = project(*corner, fit, viewport);
            }
        }
        EntityKind::Hatch(hatch) => {
            for hatch_loop in &mut hatch.loops {
                let entities = std::mem::take(&mut hatch_loop.entities);
                hatch_loop.entities = entities
                    .into_iter()
                    .map(|inner| scale(inner, fit, viewport))
                    .collect();
            }
        }
        EntityKind::Insert(insert) => {
            let offset = Vector2::new(insert.insert.x(), insert.insert.y());
            let entities = std::mem::take(&mut insert.entities);
            insert.entities = entities
                .into_iter()
                .map(|mut inner| {
                    inner.translate(offset);
                    scale(inner, fit, viewport)
                })
                .collect();
            insert.insert = project(insert.insert, fit, viewport);
        }
    }
    entity
}

#[cfg(test)]
mod tests {
    use super::*;
    use floorplan_core::{
        document::{Circle, Insert, LayerRecord, LineType, Polyline, PolylineVertex, Text},
        geometry::{Bounds2D, compute_fit_scale},
    };

    fn polyline(handle: &str, layer: &str, points: &[(f64, f64)]) -> Entity {
        let vertices = points
            .iter()
            .map(|&(x, y)| PolylineVertex::new(Point2::new(x, y)))
            .collect();
        Entity::new(handle, layer, EntityKind::Polyline(Polyline::new(vertices, true)))
    }

    fn fit_10x() -> FitScale {
        // 0..10 × 0..10 映射到 100×100 视口
        compute_fit_scale(
            Bounds2D::new(Point2::new(0.0, 0.0), Point2::new(10.0, 10.0)),
            100.0,
            100.0,
        )
    }

    #[test]
    fn only_polylines_on_stand_layers_are_valid() {
        let conventions = LayerConventions::default();
        let stand = polyline("A", "Stands-Hall1", &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]);
        let wall = polyline("B", "wall", &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]);
        let circle = Entity::new(
            "C",
            "stands",
            EntityKind::Circle(Circle {
                center: Point2::new(0.0, 0.0),
                radius: 1.0,
            }),
        );
        assert!(classify(stand, &conventions).is_valid());
        assert!(!classify(wall, &conventions).is_valid());
        assert!(!classify(circle, &conventions).is_valid());
    }

    #[test]
    fn special_chars_are_decoded() {
        assert_eq!(decode_special_chars("45%%d"), "45°");
        assert_eq!(decode_special_chars("%%p0.5 %%C10"), "±0.5 ∅10");
        assert_eq!(decode_special_chars("%%uA%%u-%%o1"), "A-1");
        assert_eq!(decode_special_chars("100%%%"), "100%");
        assert_eq!(decode_special_chars("\\U+00B0C"), "°C");
        assert_eq!(decode_special_chars("%%x \\U+ZZ 5%"), "%%x \\U+ZZ 5%");
        assert_eq!(decode_special_chars("中文%%d"), "中文°");
    }

    #[test]
    fn prepare_resolves_tables_and_text_fields() {
        let mut tables = Tables::default();
        let mut layer = LayerRecord::new("stand id");
        layer.line_type = Some("DASHED".to_string());
        tables.layers.insert(layer.name.clone(), layer);
        tables.line_types.insert(
            "DASHED".to_string(),
            LineType {
                name: "DASHED".to_string(),
                description: String::new(),
                pattern: vec![0.5, -0.25],
                total_length: 0.75,
            },
        );

        let mut text = Text::new(Point2::new(1.0, 1.0), "B%%d12", 2.0);
        text.alignment = Some(Point2::new(3.0, 4.0));
        text.nominal_height = Some(5.0);
        text.horizontal_width = Some(7.0);
        let prepared = prepare(Entity::new("T", "stand id", EntityKind::MText(text)), &tables);

        assert_eq!(prepared.scale_x, Some(1.0));
        assert_eq!(prepared.scale_y, Some(1.0));
        assert_eq!(
            prepared.line_style.as_ref().map(|style| style.name.as_str()),
            Some("DASHED")
        );
        let text = prepared.as_text().expect("文字");
        assert_eq!(text.content, "B°12");
        assert_eq!(text.insert, Point2::new(3.0, 4.0));
        assert!(text.alignment.is_none());
        assert_eq!(text.height, 5.0);
        assert_eq!(text.width, Some(7.0));
    }

    #[test]
    fn prepare_normalizes_lightweight_polylines() {
        let mut entity = polyline("P", "stands", &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]);
        if let EntityKind::Polyline(polyline) = &mut entity.kind {
            polyline.lightweight = true;
        }
        let prepared = prepare(entity, &Tables::default());
        assert_eq!(prepared.kind_name(), "POLYLINE");
    }

    #[test]
    fn polyline_vertices_and_points_are_scaled() {
        let entity = polyline("P", "stands", &[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)]);
        let scaled = scale(entity, &fit_10x(), &ViewportState::default());
        let polyline = scaled.as_polyline().expect("多段线");
        assert_eq!(polyline.points, vec![0.0, 100.0, 100.0, 100.0, 100.0, 0.0]);
    }

    #[test]
    fn viewport_is_applied_after_fit() {
        let viewport = ViewportState::new(Vector2::new(10.0, 20.0), 2.0);
        let entity = Entity::new(
            "C",
            "furniture",
            EntityKind::Circle(Circle {
                center: Point2::new(5.0, 5.0),
                radius: 1.0,
            }),
        );
        let scaled = scale(entity, &fit_10x(), &viewport);
        let EntityKind::Circle(circle) = scaled.kind else {
            panic!("应为圆");
        };
        assert_eq!(circle.center, Point2::new(20.0, 15.0));
        assert_eq!(circle.radius, 5.0);
    }

    #[test]
    fn insert_translates_block_entities_before_scaling() {
        let block_square = polyline("B1", "stands", &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]);
        let insert = Entity::new(
            "I",
            "0",
            EntityKind::Insert(Insert {
                block_name: "KIOSK".to_string(),
                insert: Point2::new(2.0, 3.0),
                scale: Vector2::new(1.0, 1.0),
                rotation: 0.0,
                entities: vec![block_square],
            }),
        );
        let scaled = scale(insert, &fit_10x(), &ViewportState::default());
        let EntityKind::Insert(insert) = &scaled.kind else {
            panic!("应为块参照");
        };
        assert_eq!(insert.insert, Point2::new(20.0, 70.0));
        let inner = insert.entities[0].as_polyline().expect("块内多段线");
        assert_eq!(inner.vertices[0].position, Point2::new(20.0, 70.0));
        assert_eq!(inner.vertices[2].position, Point2::new(30.0, 60.0));
    }
}
