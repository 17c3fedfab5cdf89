use std::path::PathBuf;

use floorplan_core::{
    document::{Document, EntityKind},
    geometry::Point2,
};
use floorplan_io::{DocumentLoader, DxfFacade, IoError};

fn load_fixture(name: &str) -> Document {
    let mut fixture = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    fixture.push("tests/data");
    fixture.push(name);
    DxfFacade::new().load(&fixture).expect("读取 DXF 失败")
}

#[test]
fn header_extents_are_read() {
    let doc = load_fixture("stand_plan.dxf");
    let extents = doc.extents().expect("应包含 $EXTMIN/$EXTMAX");
    assert_eq!(extents.min(), Point2::new(0.0, 0.0));
    assert_eq!(extents.max(), Point2::new(100.0, 50.0));
}

#[test]
fn tables_are_populated() {
    let doc = load_fixture("stand_plan.dxf");
    let tables = doc.tables();

    let names: Vec<_> = tables.layers.keys().cloned().collect();
    assert_eq!(names, vec!["stands", "stand id", "wall", "furniture"]);
    assert!(tables.layers["stands"].is_visible());
    assert!(!tables.layers["furniture"].is_visible());
    assert_eq!(tables.layers["wall"].line_type.as_deref(), Some("DASHED"));

    let dashed = &tables.line_types["DASHED"];
    assert_eq!(dashed.description, "Dashed __ __");
    assert_eq!(dashed.pattern, vec![0.5, -0.25]);
    assert!((dashed.total_length - 0.75).abs() < 1e-9);

    assert!(tables.styles.contains_key("Standard"));
    assert_eq!(tables.viewports.len(), 1);
    assert!((tables.viewports[0].aspect_ratio - 2.0).abs() < 1e-9);
}

#[test]
fn entities_keep_source_order_and_handles() {
    let doc = load_fixture("stand_plan.dxf");
    let summary: Vec<_> = doc
        .entities()
        .iter()
        .map(|entity| (entity.handle.as_str(), entity.kind_name()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("1A", "LWPOLYLINE"),
            ("1B", "TEXT"),
            ("1C", "LINE"),
            ("1D", "CIRCLE"),
            ("1E", "ARC"),
            ("1F", "MTEXT"),
            ("20", "POLYLINE"),
            ("25", "SOLID"),
            ("26", "HATCH"),
            ("27", "INSERT"),
        ]
    );
}

#[test]
fn polylines_are_closed_with_flat_points() {
    let doc = load_fixture("stand_plan.dxf");
    let stand = doc.entity("1A").and_then(|e| e.as_polyline()).expect("LWPOLYLINE");
    assert!(stand.is_closed);
    assert!(stand.lightweight);
    assert_eq!(stand.points, vec![10.0, 10.0, 30.0, 10.0, 30.0, 30.0, 10.0, 30.0]);
    assert_eq!(doc.entity("1A").and_then(|e| e.line_type.as_deref()), Some("CONTINUOUS"));

    let legacy = doc.entity("20").and_then(|e| e.as_polyline()).expect("POLYLINE");
    assert!(legacy.is_closed);
    assert!(!legacy.lightweight);
    assert_eq!(legacy.vertices.len(), 3);
    assert_eq!(legacy.vertices[2].position, Point2::new(45.0, 20.0));
}

#[test]
fn text_entities_keep_raw_content() {
    let doc = load_fixture("stand_plan.dxf");
    let label = doc.entity("1B").expect("TEXT");
    assert_eq!(label.layer, "stand id");
    assert_eq!(label.style.as_deref(), Some("Standard"));
    let text = label.as_text().expect("文字数据");
    assert_eq!(text.content, "A-%%c1");
    assert!((text.height - 2.5).abs() < 1e-9);

    let mtext = doc.entity("1F").and_then(|e| e.as_text()).expect("MTEXT");
    assert_eq!(mtext.content, "Hall\nNorth");
    assert_eq!(mtext.nominal_height, Some(1.5));
}

#[test]
fn hatch_boundaries_become_entities() {
    let doc = load_fixture("stand_plan.dxf");
    let hatch = doc.entity("26").expect("HATCH");
    let EntityKind::Hatch(hatch) = &hatch.kind else {
        panic!("应为 HATCH");
    };
    assert!(hatch.is_solid);
    assert_eq!(hatch.loops.len(), 2);
    assert_eq!(hatch.loops[0].entities.len(), 1);
    assert!(hatch.loops[0].entities[0].as_polyline().is_some());
    let kinds: Vec<_> = hatch.loops[1].entities.iter().map(|e| e.kind_name()).collect();
    assert_eq!(kinds, vec!["LINE", "ARC"]);
    assert_eq!(hatch.loops[1].entities[0].layer, "furniture");
}

#[test]
fn blocks_skip_layout_spaces() {
    let doc = load_fixture("stand_plan.dxf");
    let names: Vec<_> = doc.blocks().map(|block| block.name.as_str()).collect();
    assert_eq!(names, vec!["KIOSK"]);
    let kiosk = doc.block("KIOSK").expect("KIOSK 块");
    assert_eq!(kiosk.entities.len(), 1);

    let insert = doc.entity("27").expect("INSERT");
    let EntityKind::Insert(insert) = &insert.kind else {
        panic!("应为 INSERT");
    };
    assert_eq!(insert.block_name, "KIOSK");
    assert!(insert.entities.is_empty());
}

#[test]
fn bytes_with_invalid_utf8_are_tolerated() {
    let mut bytes = b"0\nSECTION\n2\nENTITIES\n0\nTEXT\n5\nA1\n8\nstand id\n10\n1\n20\n1\n40\n1\n1\nB".to_vec();
    bytes.push(0xff);
    bytes.extend_from_slice(b"\n0\nENDSEC\n0\nEOF\n");
    let doc = DxfFacade::new().parse_bytes(&bytes).expect("容忍非 UTF-8 字节");
    let text = doc.entities()[0].as_text().expect("TEXT");
    assert!(text.content.starts_with('B'));
}

#[test]
fn empty_entities_section_is_not_an_error() {
    let doc = DxfFacade::new()
        .parse_str("0\nSECTION\n2\nENTITIES\n0\nENDSEC\n0\nEOF\n")
        .expect("空文档");
    assert_eq!(doc.entity_count(), 0);
    assert!(doc.extents().is_none());
}

#[test]
fn missing_file_reports_read_error() {
    let err = DxfFacade::new()
        .load(std::path::Path::new("tests/data/does-not-exist.dxf"))
        .expect_err("文件不存在");
    assert!(matches!(err, IoError::ReadError { .. }));
}
