use std::fs;
use std::path::Path;

use floorplan_core::{
    document::{
        Arc, Block, Circle, Document, Ellipse, Entity, EntityKind, Hatch, HatchLoop, Insert,
        LayerRecord, Line, LineType, Polyline, PolylineVertex, Solid, Text, TextStyle,
        ViewportRecord,
    },
    geometry::{Point2, Vector2},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document structure: {0}")]
    InvalidDocument(String),
    #[error("document ended unexpectedly inside {0}")]
    Truncated(String),
}

pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<Document, IoError>;
}

/// DXF 读取入口。支持 HEADER 范围、TABLES、BLOCKS 与 ENTITIES 段。
#[derive(Debug, Default, Clone, Copy)]
pub struct DxfFacade;

impl DxfFacade {
    pub fn new() -> Self {
        Self
    }

    /// 从内存中的文本解析。
    pub fn parse_str(&self, source: &str) -> Result<Document, IoError> {
        DxfParser::new(source).parse().map_err(IoError::from)
    }

    /// 从原始字节解析，非 UTF-8 字节按替换字符处理。
    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<Document, IoError> {
        let text = String::from_utf8_lossy(bytes);
        self.parse_str(&text)
    }
}

impl DocumentLoader for DxfFacade {
    fn load(&self, path: &Path) -> Result<Document, IoError> {
        let data = fs::read(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_bytes(&data)
    }
}

#[derive(Debug)]
enum DxfError {
    Invalid { message: String },
    Truncated { context: String },
}

impl DxfError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    fn truncated(context: impl Into<String>) -> Self {
        Self::Truncated {
            context: context.into(),
        }
    }
}

impl From<DxfError> for IoError {
    fn from(err: DxfError) -> Self {
        match err {
            DxfError::Invalid { message } => IoError::InvalidDocument(message),
            DxfError::Truncated { context } => IoError::Truncated(context),
        }
    }
}

/// 实体公共组码（句柄、图层、线型、样式）。
#[derive(Debug, Default)]
struct CommonFields {
    handle: Option<String>,
    layer: Option<String>,
    line_type: Option<String>,
    style: Option<String>,
}

impl CommonFields {
    /// 吸收公共组码，返回是否已处理。
    fn absorb(&mut self, code: i32, value: &str) -> bool {
        match code {
            5 => self.handle = non_empty(value),
            8 => self.layer = non_empty(value),
            6 => self.line_type = non_empty(value),
            7 => self.style = non_empty(value),
            _ => return false,
        }
        true
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

struct DxfParser<'a> {
    reader: DxfReader<'a>,
    next_auto_handle: u64,
}

impl<'a> DxfParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            reader: DxfReader::new(source),
            next_auto_handle: 0,
        }
    }

    fn parse(mut self) -> Result<Document, DxfError> {
        let mut document = Document::new();
        while let Some((code, value)) = self.reader.next_pair()? {
            if code == 999 {
                continue;
            }
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "意外的组码 {code}（期望 0 表示 SECTION/EOF）"
                )));
            }
            match value.trim() {
                "SECTION" => {
                    let (name_code, name) = self
                        .reader
                        .next_pair()?
                        .ok_or_else(|| DxfError::truncated("SECTION"))?;
                    if name_code != 2 {
                        return Err(DxfError::invalid(format!(
                            "SECTION 名称使用了组码 {name_code}（期望 2）"
                        )));
                    }
                    match name.trim() {
                        "HEADER" => self.parse_header(&mut document)?,
                        "TABLES" => self.parse_tables(&mut document)?,
                        "BLOCKS" => self.parse_blocks(&mut document)?,
                        "ENTITIES" => self.parse_entities(&mut document)?,
                        other => {
                            debug!(section = other, "跳过未处理的 DXF 段");
                            self.skip_section()?
                        }
                    }
                }
                "EOF" => break,
                unexpected => {
                    return Err(DxfError::invalid(format!(
                        "意外的标记 {unexpected}，期望 SECTION 或 EOF"
                    )));
                }
            }
        }
        Ok(document)
    }

    fn skip_section(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value.trim() == "ENDSEC" => break,
                Some(_) => continue,
                None => return Err(DxfError::truncated("SECTION")),
            }
        }
        Ok(())
    }

    fn auto_handle(&mut self) -> String {
        let handle = format!("auto-{}", self.next_auto_handle);
        self.next_auto_handle += 1;
        handle
    }

    fn finish_entity(&mut self, common: CommonFields, kind: EntityKind) -> Entity {
        let handle = match common.handle {
            Some(handle) => handle,
            None => self.auto_handle(),
        };
        let mut entity = Entity::new(handle, common.layer.unwrap_or_else(|| "0".to_string()), kind);
        entity.line_type = common.line_type;
        entity.style = common.style;
        entity
    }

    fn parse_header(&mut self, document: &mut Document) -> Result<(), DxfError> {
        let mut variable: Option<String> = None;
        let mut pending_x: Option<f64> = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value.trim() == "ENDSEC" => break,
                Some((9, value)) => {
                    variable = Some(value.trim().to_string());
                    pending_x = None;
                }
                Some((10, value)) => pending_x = Some(parse_f64(&value, "HEADER 范围 X")?),
                Some((20, value)) => {
                    let y = parse_f64(&value, "HEADER 范围 Y")?;
                    let Some(x) = pending_x.take() else {
                        continue;
                    };
                    let header = document.header_mut();
                    match variable.as_deref() {
                        Some("$EXTMIN") => header.ext_min = Some(Point2::new(x, y)),
                        Some("$EXTMAX") => header.ext_max = Some(Point2::new(x, y)),
                        _ => {}
                    }
                }
                Some(_) => {}
                None => return Err(DxfError::truncated("HEADER")),
            }
        }
        Ok(())
    }

    fn parse_tables(&mut self, document: &mut Document) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::truncated("TABLES")),
            };
            if code != 0 {
                // TABLE 头部字段（表名、句柄、条目数）
                continue;
            }
            match value.trim() {
                "ENDSEC" => break,
                "TABLE" | "ENDTAB" => {}
                "LAYER" => {
                    let layer = self.parse_layer_record()?;
                    document.tables_mut().layers.insert(layer.name.clone(), layer);
                }
                "LTYPE" => {
                    let line_type = self.parse_line_type()?;
                    document
                        .tables_mut()
                        .line_types
                        .insert(line_type.name.clone(), line_type);
                }
                "STYLE" => {
                    let style = self.parse_text_style()?;
                    document.tables_mut().styles.insert(style.name.clone(), style);
                }
                "VPORT" => {
                    let viewport = self.parse_viewport()?;
                    document.tables_mut().viewports.push(viewport);
                }
                _ => self.skip_entity_body()?,
            }
        }
        Ok(())
    }

    fn parse_layer_record(&mut self) -> Result<LayerRecord, DxfError> {
        let mut layer = LayerRecord::new("");
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((2, value)) => layer.name = value.trim().to_string(),
                Some((62, value)) => layer.color_number = parse_i32(&value, "LAYER 颜色号")?,
                Some((6, value)) => layer.line_type = non_empty(&value),
                Some(_) => {}
                None => return Err(DxfError::truncated("LAYER")),
            }
        }
        Ok(layer)
    }

    fn parse_line_type(&mut self) -> Result<LineType, DxfError> {
        let mut line_type = LineType {
            name: String::new(),
            description: String::new(),
            pattern: Vec::new(),
            total_length: 0.0,
        };
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((2, value)) => line_type.name = value.trim().to_string(),
                Some((3, value)) => line_type.description = value.trim().to_string(),
                Some((40, value)) => line_type.total_length = parse_f64(&value, "LTYPE 总长度")?,
                Some((49, value)) => line_type.pattern.push(parse_f64(&value, "LTYPE 线段")?),
                Some(_) => {}
                None => return Err(DxfError::truncated("LTYPE")),
            }
        }
        Ok(line_type)
    }

    fn parse_text_style(&mut self) -> Result<TextStyle, DxfError> {
        let mut style = TextStyle {
            name: String::new(),
            font_file: String::new(),
            fixed_height: 0.0,
            width_factor: 1.0,
        };
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((2, value)) => style.name = value.trim().to_string(),
                Some((3, value)) => style.font_file = value.trim().to_string(),
                Some((40, value)) => style.fixed_height = parse_f64(&value, "STYLE 固定高度")?,
                Some((41, value)) => style.width_factor = parse_f64(&value, "STYLE 宽度因子")?,
                Some(_) => {}
                None => return Err(DxfError::truncated("STYLE")),
            }
        }
        Ok(style)
    }

    fn parse_viewport(&mut self) -> Result<ViewportRecord, DxfError> {
        let mut name = String::new();
        let mut center_x = 0.0;
        let mut center_y = 0.0;
        let mut height = 0.0;
        let mut aspect_ratio = 1.0;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((2, value)) => name = value.trim().to_string(),
                Some((12, value)) => center_x = parse_f64(&value, "VPORT 中心 X")?,
                Some((22, value)) => center_y = parse_f64(&value, "VPORT 中心 Y")?,
                Some((40, value)) => height = parse_f64(&value, "VPORT 高度")?,
                Some((41, value)) => aspect_ratio = parse_f64(&value, "VPORT 宽高比")?,
                Some(_) => {}
                None => return Err(DxfError::truncated("VPORT")),
            }
        }
        Ok(ViewportRecord {
            name,
            center: Point2::new(center_x, center_y),
            height,
            aspect_ratio,
        })
    }

    fn parse_entities(&mut self, document: &mut Document) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::truncated("ENTITIES")),
            };
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "ENTITIES 段遇到组码 {code}（期望 0 表示实体起始）"
                )));
            }

            match value.trim() {
                "ENDSEC" => break,
                kind => {
                    if let Some(entity) = self.parse_entity(kind)? {
                        document.add_entity(entity);
                    }
                }
            }
        }
        Ok(())
    }

    fn parse_blocks(&mut self, document: &mut Document) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::truncated("BLOCKS")),
            };
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "BLOCKS 段遇到组码 {code}（期望 0 表示实体起始）"
                )));
            }

            match value.trim() {
                "ENDSEC" => break,
                "BLOCK" => {
                    if let Some(block) = self.parse_block_definition()? {
                        document.add_block(block);
                    }
                }
                _ => {
                    self.skip_entity_body()?;
                }
            }
        }
        Ok(())
    }

    fn parse_block_definition(&mut self) -> Result<Option<Block>, DxfError> {
        let mut name: Option<String> = None;
        let mut base_x: f64 = 0.0;
        let mut base_y: f64 = 0.0;
        let mut collect_entities = true;
        let mut entities: Vec<Entity> = Vec::new();

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.trim() {
                    "ENDBLK" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    kind => {
                        if collect_entities {
                            if let Some(entity) = self.parse_entity(kind)? {
                                entities.push(entity);
                            }
                        } else {
                            self.skip_entity_body()?;
                        }
                    }
                },
                Some((code, value)) => match code {
                    2 => {
                        let trimmed = value.trim().to_string();
                        // *Model_Space / *Paper_Space 等匿名布局块不参与解析
                        collect_entities = !trimmed.starts_with('*');
                        name = Some(trimmed);
                    }
                    10 => base_x = parse_f64(&value, "BLOCK 基点 X")?,
                    20 => base_y = parse_f64(&value, "BLOCK 基点 Y")?,
                    _ => {}
                },
                None => return Err(DxfError::truncated("BLOCK")),
            }
        }

        let name = match name {
            Some(name) => name,
            None => return Err(DxfError::invalid("BLOCK 缺少名称（组码 2）")),
        };

        if !collect_entities {
            return Ok(None);
        }

        Ok(Some(Block {
            name,
            base_point: Point2::new(base_x, base_y),
            entities,
        }))
    }

    /// 解析一个实体；不支持的类型跳过并返回 `None`。
    fn parse_entity(&mut self, kind: &str) -> Result<Option<Entity>, DxfError> {
        let entity = match kind {
            "LINE" => self.parse_line()?,
            "CIRCLE" => self.parse_circle()?,
            "ARC" => self.parse_arc()?,
            "ELLIPSE" => self.parse_ellipse()?,
            "LWPOLYLINE" => self.parse_lwpolyline()?,
            "POLYLINE" => self.parse_polyline_sequence()?,
            "TEXT" => self.parse_text()?,
            "MTEXT" => self.parse_mtext()?,
            "SOLID" => self.parse_solid()?,
            "HATCH" => self.parse_hatch()?,
            "INSERT" => self.parse_insert()?,
            other => {
                if !matches!(other, "ATTRIB" | "SEQEND" | "VERTEX") {
                    debug!(kind = other, "跳过暂不支持的实体类型");
                }
                self.skip_entity_body()?;
                return Ok(None);
            }
        };
        Ok(Some(entity))
    }

    fn parse_line(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonFields::default();
        let mut start_x = None;
        let mut start_y = None;
        let mut end_x = None;
        let mut end_y = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => {
                    if common.absorb(code, &value) {
                        continue;
                    }
                    match code {
                        10 => assign_coord(&mut start_x, &value, "LINE 起点 X")?,
                        20 => assign_coord(&mut start_y, &value, "LINE 起点 Y")?,
                        11 => assign_coord(&mut end_x, &value, "LINE 终点 X")?,
                        21 => assign_coord(&mut end_y, &value, "LINE 终点 Y")?,
                        _ => {}
                    }
                }
                None => return Err(DxfError::truncated("LINE")),
            }
        }

        let sx = start_x.ok_or_else(|| DxfError::invalid("LINE 缺少起点 X（组码 10）"))?;
        let sy = start_y.ok_or_else(|| DxfError::invalid("LINE 缺少起点 Y（组码 20）"))?;
        let ex = end_x.ok_or_else(|| DxfError::invalid("LINE 缺少终点 X（组码 11）"))?;
        let ey = end_y.ok_or_else(|| DxfError::invalid("LINE 缺少终点 Y（组码 21）"))?;

        Ok(self.finish_entity(
            common,
            EntityKind::Line(Line {
                start: Point2::new(sx, sy),
                end: Point2::new(ex, ey),
            }),
        ))
    }

    fn parse_circle(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonFields::default();
        let mut center_x = None;
        let mut center_y = None;
        let mut radius = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => {
                    if common.absorb(code, &value) {
                        continue;
                    }
                    match code {
                        10 => assign_coord(&mut center_x, &value, "CIRCLE 圆心 X")?,
                        20 => assign_coord(&mut center_y, &value, "CIRCLE 圆心 Y")?,
                        40 => assign_coord(&mut radius, &value, "CIRCLE 半径")?,
                        _ => {}
                    }
                }
                None => return Err(DxfError::truncated("CIRCLE")),
            }
        }

        let cx = center_x.ok_or_else(|| DxfError::invalid("CIRCLE 缺少圆心 X（组码 10）"))?;
        let cy = center_y.ok_or_else(|| DxfError::invalid("CIRCLE 缺少圆心 Y（组码 20）"))?;
        let radius = radius.ok_or_else(|| DxfError::invalid("CIRCLE 缺少半径（组码 40）"))?;

        Ok(self.finish_entity(
            common,
            EntityKind::Circle(Circle {
                center: Point2::new(cx, cy),
                radius,
            }),
        ))
    }

    fn parse_arc(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonFields::default();
        let mut center_x = None;
        let mut center_y = None;
        let mut radius = None;
        let mut start_angle = None;
        let mut end_angle = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => {
                    if common.absorb(code, &value) {
                        continue;
                    }
                    match code {
                        10 => assign_coord(&mut center_x, &value, "ARC 圆心 X")?,
                        20 => assign_coord(&mut center_y, &value, "ARC 圆心 Y")?,
                        40 => assign_coord(&mut radius, &value, "ARC 半径")?,
                        50 => assign_coord(&mut start_angle, &value, "ARC 起始角")?,
                        51 => assign_coord(&mut end_angle, &value, "ARC 终止角")?,
                        _ => {}
                    }
                }
                None => return Err(DxfError::truncated("ARC")),
            }
        }

        let cx = center_x.ok_or_else(|| DxfError::invalid("ARC 缺少圆心 X（组码 10）"))?;
        let cy = center_y.ok_or_else(|| DxfError::invalid("ARC 缺少圆心 Y（组码 20）"))?;
        let radius = radius.ok_or_else(|| DxfError::invalid("ARC 缺少半径（组码 40）"))?;

        Ok(self.finish_entity(
            common,
            EntityKind::Arc(Arc {
                center: Point2::new(cx, cy),
                radius,
                start_angle: start_angle.unwrap_or(0.0).to_radians(),
                end_angle: end_angle.unwrap_or(360.0).to_radians(),
            }),
        ))
    }

    fn parse_ellipse(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonFields::default();
        let mut center_x = None;
        let mut center_y = None;
        let mut major_x = None;
        let mut major_y = None;
        let mut ratio = None;
        let mut start_parameter = 0.0;
        let mut end_parameter = std::f64::consts::TAU;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => {
                    if common.absorb(code, &value) {
                        continue;
                    }
                    match code {
                        10 => assign_coord(&mut center_x, &value, "ELLIPSE 中心 X")?,
                        20 => assign_coord(&mut center_y, &value, "ELLIPSE 中心 Y")?,
                        11 => assign_coord(&mut major_x, &value, "ELLIPSE 长轴 X")?,
                        21 => assign_coord(&mut major_y, &value, "ELLIPSE 长轴 Y")?,
                        40 => assign_coord(&mut ratio, &value, "ELLIPSE 轴比")?,
                        41 => start_parameter = parse_f64(&value, "ELLIPSE 起始参数")?,
                        42 => end_parameter = parse_f64(&value, "ELLIPSE 终止参数")?,
                        _ => {}
                    }
                }
                None => return Err(DxfError::truncated("ELLIPSE")),
            }
        }

        let cx = center_x.ok_or_else(|| DxfError::invalid("ELLIPSE 缺少中心 X（组码 10）"))?;
        let cy = center_y.ok_or_else(|| DxfError::invalid("ELLIPSE 缺少中心 Y（组码 20）"))?;
        let mx = major_x.ok_or_else(|| DxfError::invalid("ELLIPSE 缺少长轴 X（组码 11）"))?;
        let my = major_y.ok_or_else(|| DxfError::invalid("ELLIPSE 缺少长轴 Y（组码 21）"))?;

        Ok(self.finish_entity(
            common,
            EntityKind::Ellipse(Ellipse {
                center: Point2::new(cx, cy),
                major_axis: Vector2::new(mx, my),
                ratio: ratio.unwrap_or(1.0),
                start_parameter,
                end_parameter,
            }),
        ))
    }

    fn parse_lwpolyline(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonFields::default();
        let mut is_closed = false;
        let mut vertices: Vec<PolylineVertex> = Vec::new();
        let mut pending_x: Option<f64> = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => {
                    if common.absorb(code, &value) {
                        continue;
                    }
                    match code {
                        70 => {
                            let flag = parse_i32(&value, "LWPOLYLINE 标志")?;
                            is_closed = flag & 0x01 == 0x01;
                        }
                        10 => {
                            if pending_x.replace(parse_f64(&value, "LWPOLYLINE 顶点 X")?).is_some()
                            {
                                return Err(DxfError::invalid(
                                    "LWPOLYLINE 顶点缺少对应的 Y（组码 20）",
                                ));
                            }
                        }
                        20 => {
                            let y = parse_f64(&value, "LWPOLYLINE 顶点 Y")?;
                            let x = pending_x.take().ok_or_else(|| {
                                DxfError::invalid("LWPOLYLINE 顶点缺少对应的 X（组码 10）")
                            })?;
                            vertices.push(PolylineVertex::new(Point2::new(x, y)));
                        }
                        42 => {
                            let bulge = parse_f64(&value, "LWPOLYLINE 顶点 bulge")?;
                            let vertex = vertices.last_mut().ok_or_else(|| {
                                DxfError::invalid("LWPOLYLINE 在定义首个顶点前遇到 bulge（组码 42）")
                            })?;
                            vertex.bulge = bulge;
                        }
                        _ => {}
                    }
                }
                None => return Err(DxfError::truncated("LWPOLYLINE")),
            }
        }

        if pending_x.is_some() {
            return Err(DxfError::invalid(
                "LWPOLYLINE 顶点坐标成对出现（组码 10/20），检测到不完整的顶点",
            ));
        }

        let mut polyline = Polyline::new(vertices, is_closed);
        polyline.lightweight = true;
        Ok(self.finish_entity(common, EntityKind::Polyline(polyline)))
    }

    /// 旧式 POLYLINE：头部之后跟随若干 VERTEX，以 SEQEND 结束。
    fn parse_polyline_sequence(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonFields::default();
        let mut flags = 0;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => {
                    if common.absorb(code, &value) {
                        continue;
                    }
                    if code == 70 {
                        flags = parse_i32(&value, "POLYLINE 标志（组码 70）")?;
                    }
                }
                None => return Err(DxfError::truncated("POLYLINE")),
            }
        }

        let mut vertices = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.trim() {
                    "VERTEX" => vertices.push(self.parse_vertex()?),
                    "SEQEND" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    _ => {
                        // 缺少 SEQEND，交回上层处理
                        self.reader.put_back((0, value));
                        break;
                    }
                },
                Some(_) => {}
                None => return Err(DxfError::truncated("POLYLINE")),
            }
        }

        let polyline = Polyline::new(vertices, flags & 0x01 == 0x01);
        Ok(self.finish_entity(common, EntityKind::Polyline(polyline)))
    }

    fn parse_vertex(&mut self) -> Result<PolylineVertex, DxfError> {
        let mut x = None;
        let mut y = None;
        let mut bulge = 0.0;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((10, value)) => assign_coord(&mut x, &value, "VERTEX X")?,
                Some((20, value)) => assign_coord(&mut y, &value, "VERTEX Y")?,
                Some((42, value)) => bulge = parse_f64(&value, "VERTEX bulge")?,
                Some(_) => {}
                None => return Err(DxfError::truncated("VERTEX")),
            }
        }
        let x = x.ok_or_else(|| DxfError::invalid("VERTEX 缺少 X（组码 10）"))?;
        let y = y.ok_or_else(|| DxfError::invalid("VERTEX 缺少 Y（组码 20）"))?;
        Ok(PolylineVertex::with_bulge(Point2::new(x, y), bulge))
    }

    fn parse_text(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonFields::default();
        let mut insert_x = None;
        let mut insert_y = None;
        let mut align_x = None;
        let mut align_y = None;
        let mut height = None;
        let mut rotation_deg = 0.0;
        let mut content: Option<String> = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => {
                    if common.absorb(code, &value) {
                        continue;
                    }
                    match code {
                        10 => assign_coord(&mut insert_x, &value, "TEXT 插入点 X")?,
                        20 => assign_coord(&mut insert_y, &value, "TEXT 插入点 Y")?,
                        11 => assign_coord(&mut align_x, &value, "TEXT 对齐点 X")?,
                        21 => assign_coord(&mut align_y, &value, "TEXT 对齐点 Y")?,
                        40 => assign_coord(&mut height, &value, "TEXT 高度")?,
                        50 => rotation_deg = parse_f64(&value, "TEXT 旋转角")?,
                        1 => content = Some(value),
                        _ => {}
                    }
                }
                None => return Err(DxfError::truncated("TEXT")),
            }
        }

        let ix = insert_x.ok_or_else(|| DxfError::invalid("TEXT 缺少插入点 X（组码 10）"))?;
        let iy = insert_y.ok_or_else(|| DxfError::invalid("TEXT 缺少插入点 Y（组码 20）"))?;

        let mut text = Text::new(
            Point2::new(ix, iy),
            content.unwrap_or_default(),
            height.unwrap_or(0.0),
        );
        text.rotation = rotation_deg.to_radians();
        if let (Some(x), Some(y)) = (align_x, align_y) {
            text.alignment = Some(Point2::new(x, y));
        }
        Ok(self.finish_entity(common, EntityKind::Text(text)))
    }

    fn parse_mtext(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonFields::default();
        let mut insert_x = None;
        let mut insert_y = None;
        let mut nominal_height = None;
        let mut reference_width = None;
        let mut horizontal_width = None;
        let mut direction_x: Option<f64> = None;
        let mut direction_y: Option<f64> = None;
        let mut rotation_deg: Option<f64> = None;
        let mut fragments: Vec<String> = Vec::new();
        let mut tail: Option<String> = None;

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => {
                    if common.absorb(code, &value) {
                        continue;
                    }
                    match code {
                        10 => assign_coord(&mut insert_x, &value, "MTEXT 插入点 X")?,
                        20 => assign_coord(&mut insert_y, &value, "MTEXT 插入点 Y")?,
                        40 => nominal_height = Some(parse_f64(&value, "MTEXT 高度")?),
                        41 => reference_width = Some(parse_f64(&value, "MTEXT 参考宽度")?),
                        42 => horizontal_width = Some(parse_f64(&value, "MTEXT 水平宽度")?),
                        11 => direction_x = Some(parse_f64(&value, "MTEXT 方向向量 X")?),
                        21 => direction_y = Some(parse_f64(&value, "MTEXT 方向向量 Y")?),
                        50 => rotation_deg = Some(parse_f64(&value, "MTEXT 旋转角")?),
                        3 => fragments.push(value),
                        1 => tail = Some(value),
                        _ => {}
                    }
                }
                None => return Err(DxfError::truncated("MTEXT")),
            }
        }

        let ix = insert_x.ok_or_else(|| DxfError::invalid("MTEXT 缺少插入点 X（组码 10）"))?;
        let iy = insert_y.ok_or_else(|| DxfError::invalid("MTEXT 缺少插入点 Y（组码 20）"))?;
        // 组码 3 为前置分块，组码 1 为最后一块
        fragments.extend(tail);
        let content = fragments
            .iter()
            .map(|fragment| decode_mtext_content(fragment))
            .collect::<String>();

        let rotation = match (direction_x, direction_y) {
            (Some(x), Some(y)) if x.abs() > f64::EPSILON || y.abs() > f64::EPSILON => y.atan2(x),
            _ => rotation_deg.unwrap_or(0.0).to_radians(),
        };

        let mut text = Text::new(Point2::new(ix, iy), content, nominal_height.unwrap_or(0.0));
        text.nominal_height = nominal_height;
        text.width = reference_width.filter(|width| width.abs() > f64::EPSILON);
        text.horizontal_width = horizontal_width.filter(|width| width.abs() > f64::EPSILON);
        text.rotation = rotation;
        Ok(self.finish_entity(common, EntityKind::MText(text)))
    }

    fn parse_solid(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonFields::default();
        let mut xs: [Option<f64>; 4] = [None; 4];
        let mut ys: [Option<f64>; 4] = [None; 4];
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => {
                    if common.absorb(code, &value) {
                        continue;
                    }
                    match code {
                        10..=13 => {
                            let index = (code - 10) as usize;
                            xs[index] = Some(parse_f64(&value, "SOLID 角点 X")?);
                        }
                        20..=23 => {
                            let index = (code - 20) as usize;
                            ys[index] = Some(parse_f64(&value, "SOLID 角点 Y")?);
                        }
                        _ => {}
                    }
                }
                None => return Err(DxfError::truncated("SOLID")),
            }
        }

        let corners = xs
            .iter()
            .zip(ys.iter())
            .filter_map(|(x, y)| match (x, y) {
                (Some(x), Some(y)) => Some(Point2::new(*x, *y)),
                _ => None,
            })
            .collect();
        Ok(self.finish_entity(common, EntityKind::Solid(Solid { corners })))
    }

    fn parse_hatch(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonFields::default();
        let mut pattern_name = String::new();
        let mut is_solid = false;
        let mut expected_loops: usize = 0;
        let mut loops: Vec<PartialLoop> = Vec::new();
        let mut current: Option<PartialLoop> = None;

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => {
                    let in_boundary = current.is_some();
                    if !in_boundary && common.absorb(code, &value) {
                        continue;
                    }
                    match code {
                        92 => {
                            if let Some(done) = current.take() {
                                loops.push(done);
                            }
                            if loops.len() < expected_loops {
                                let flags = parse_i32(&value, "HATCH 边界类型")?;
                                current = Some(PartialLoop::new(flags));
                            }
                        }
                        // 边界的关联对象数，标志一个环的结束
                        97 if in_boundary => {
                            if let Some(done) = current.take() {
                                loops.push(done);
                            }
                        }
                        _ => match current.as_mut() {
                            Some(partial) => partial.absorb(code, &value)?,
                            None => match code {
                                2 => pattern_name = value.trim().to_string(),
                                70 => is_solid = parse_i32(&value, "HATCH 实心标志")? == 1,
                                91 => {
                                    expected_loops =
                                        parse_i32(&value, "HATCH 边界数")?.max(0) as usize;
                                }
                                _ => {}
                            },
                        },
                    }
                }
                None => return Err(DxfError::truncated("HATCH")),
            }
        }
        if let Some(done) = current.take() {
            loops.push(done);
        }

        let mut entity = self.finish_entity(
            common,
            EntityKind::Hatch(Hatch {
                pattern_name,
                is_solid,
                loops: Vec::new(),
            }),
        );
        let handle = entity.handle.clone();
        let layer = entity.layer.clone();
        let hatch_loops = loops
            .into_iter()
            .enumerate()
            .map(|(index, partial)| partial.finish(&format!("{handle}:{index}"), &layer))
            .collect();
        if let EntityKind::Hatch(hatch) = &mut entity.kind {
            hatch.loops = hatch_loops;
        }
        Ok(entity)
    }

    fn parse_insert(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonFields::default();
        let mut name = None;
        let mut insert_x = None;
        let mut insert_y = None;
        let mut scale_x: Option<f64> = None;
        let mut scale_y: Option<f64> = None;
        let mut rotation_deg: f64 = 0.0;

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => {
                    // INSERT 的组码 2 为块名，不走公共字段
                    if code != 2 && common.absorb(code, &value) {
                        continue;
                    }
                    match code {
                        2 => name = non_empty(&value),
                        10 => assign_coord(&mut insert_x, &value, "INSERT 插入点 X")?,
                        20 => assign_coord(&mut insert_y, &value, "INSERT 插入点 Y")?,
                        41 => scale_x = Some(parse_f64(&value, "INSERT 缩放 X")?),
                        42 => scale_y = Some(parse_f64(&value, "INSERT 缩放 Y")?),
                        50 => rotation_deg = parse_f64(&value, "INSERT 旋转角")?,
                        _ => {}
                    }
                }
                None => return Err(DxfError::truncated("INSERT")),
            }
        }

        let block_name = name.ok_or_else(|| DxfError::invalid("INSERT 缺少块名（组码 2）"))?;
        let ix = insert_x.ok_or_else(|| DxfError::invalid("INSERT 缺少插入点 X（组码 10）"))?;
        let iy = insert_y.ok_or_else(|| DxfError::invalid("INSERT 缺少插入点 Y（组码 20）"))?;

        let mut entity = self.finish_entity(
            common,
            EntityKind::Insert(Insert {
                block_name,
                insert: Point2::new(ix, iy),
                scale: Vector2::new(scale_x.unwrap_or(1.0), scale_y.unwrap_or(1.0)),
                rotation: rotation_deg.to_radians(),
                entities: Vec::new(),
            }),
        );
        entity.scale_x = scale_x;
        entity.scale_y = scale_y;
        Ok(entity)
    }

    fn skip_entity_body(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        Ok(())
    }
}

/// 正在读取的填充边界环。
struct PartialLoop {
    is_polyline: bool,
    has_bulge: bool,
    closed: bool,
    vertices: Vec<PolylineVertex>,
    pending_x: Option<f64>,
    edges: Vec<EdgeBuilder>,
}

#[derive(Default)]
struct EdgeBuilder {
    edge_type: i32,
    x: Option<f64>,
    y: Option<f64>,
    x2: Option<f64>,
    y2: Option<f64>,
    radius: Option<f64>,
    start_angle: Option<f64>,
    end_angle: Option<f64>,
}

impl PartialLoop {
    fn new(flags: i32) -> Self {
        Self {
            is_polyline: flags & 0x02 != 0,
            has_bulge: false,
            closed: true,
            vertices: Vec::new(),
            pending_x: None,
            edges: Vec::new(),
        }
    }

    fn absorb(&mut self, code: i32, value: &str) -> Result<(), DxfError> {
        if self.is_polyline {
            match code {
                72 => self.has_bulge = parse_i32(value, "HATCH 多段线 bulge 标志")? != 0,
                73 => self.closed = parse_i32(value, "HATCH 多段线闭合标志")? != 0,
                10 => self.pending_x = Some(parse_f64(value, "HATCH 顶点 X")?),
                20 => {
                    let y = parse_f64(value, "HATCH 顶点 Y")?;
                    if let Some(x) = self.pending_x.take() {
                        self.vertices.push(PolylineVertex::new(Point2::new(x, y)));
                    }
                }
                42 if self.has_bulge => {
                    let bulge = parse_f64(value, "HATCH 顶点 bulge")?;
                    if let Some(vertex) = self.vertices.last_mut() {
                        vertex.bulge = bulge;
                    }
                }
                _ => {}
            }
            return Ok(());
        }

        if code == 72 {
            self.edges.push(EdgeBuilder {
                edge_type: parse_i32(value, "HATCH 边类型")?,
                ..EdgeBuilder::default()
            });
            return Ok(());
        }
        let Some(edge) = self.edges.last_mut() else {
            return Ok(());
        };
        match code {
            10 => edge.x = Some(parse_f64(value, "HATCH 边 X")?),
            20 => edge.y = Some(parse_f64(value, "HATCH 边 Y")?),
            11 => edge.x2 = Some(parse_f64(value, "HATCH 边 X2")?),
            21 => edge.y2 = Some(parse_f64(value, "HATCH 边 Y2")?),
            40 => edge.radius = Some(parse_f64(value, "HATCH 边半径")?),
            50 => edge.start_angle = Some(parse_f64(value, "HATCH 边起始角")?),
            51 => edge.end_angle = Some(parse_f64(value, "HATCH 边终止角")?),
            _ => {}
        }
        Ok(())
    }

    /// 转为实体列表。样条边与坐标不完整的边被丢弃。
    fn finish(self, handle_prefix: &str, layer: &str) -> HatchLoop {
        let make = |index: usize, kind: EntityKind| {
            Entity::new(format!("{handle_prefix}:{index}"), layer, kind)
        };
        if self.is_polyline {
            let polyline = Polyline::new(self.vertices, self.closed);
            return HatchLoop {
                entities: vec![make(0, EntityKind::Polyline(polyline))],
            };
        }

        let entities = self
            .edges
            .into_iter()
            .enumerate()
            .filter_map(|(index, edge)| {
                let center = Point2::new(edge.x?, edge.y?);
                let kind = match edge.edge_type {
                    1 => EntityKind::Line(Line {
                        start: center,
                        end: Point2::new(edge.x2?, edge.y2?),
                    }),
                    2 => EntityKind::Arc(Arc {
                        center,
                        radius: edge.radius?,
                        start_angle: edge.start_angle.unwrap_or(0.0).to_radians(),
                        end_angle: edge.end_angle.unwrap_or(360.0).to_radians(),
                    }),
                    3 => EntityKind::Ellipse(Ellipse {
                        center,
                        major_axis: Vector2::new(edge.x2?, edge.y2?),
                        ratio: edge.radius.unwrap_or(1.0),
                        start_parameter: edge.start_angle.unwrap_or(0.0).to_radians(),
                        end_parameter: edge.end_angle.unwrap_or(360.0).to_radians(),
                    }),
                    _ => return None,
                };
                Some(make(index, kind))
            })
            .collect();
        HatchLoop { entities }
    }
}

struct DxfReader<'a> {
    lines: std::str::Lines<'a>,
    buffer: Option<(i32, String)>,
    line_number: usize,
}

impl<'a> DxfReader<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lines: source.lines(),
            buffer: None,
            line_number: 0,
        }
    }

    fn next_pair(&mut self) -> Result<Option<(i32, String)>, DxfError> {
        if let Some(pair) = self.buffer.take() {
            return Ok(Some(pair));
        }

        let code_line = loop {
            match self.lines.next() {
                Some(line) => {
                    self.line_number += 1;
                    // 文件末尾的空行不算作组码
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
                None => return Ok(None),
            }
        };

        let value_line = match self.lines.next() {
            Some(line) => {
                self.line_number += 1;
                line
            }
            None => {
                return Err(DxfError::invalid(format!(
                    "文件在第 {} 行结束，缺少与组码对应的值行",
                    self.line_number
                )));
            }
        };

        let code = code_line.trim().parse::<i32>().map_err(|_| {
            DxfError::invalid(format!(
                "第 {} 行的组码 \"{}\" 无法解析为整数",
                self.line_number - 1,
                code_line.trim()
            ))
        })?;
        let value = value_line.trim_end_matches('\r').to_string();
        Ok(Some((code, value)))
    }

    fn put_back(&mut self, pair: (i32, String)) {
        debug_assert!(self.buffer.is_none(), "DXF pair 只能回退一次");
        self.buffer = Some(pair);
    }
}

fn assign_coord(slot: &mut Option<f64>, raw: &str, context: &str) -> Result<(), DxfError> {
    if slot.is_some() {
        return Err(DxfError::invalid(format!("{context} 出现重复值")));
    }
    *slot = Some(parse_f64(raw, context)?);
    Ok(())
}

fn parse_f64(raw: &str, context: &str) -> Result<f64, DxfError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i32(raw: &str, context: &str) -> Result<i32, DxfError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

/// MTEXT 内联格式：`\P` 换行、`\~` 不换行空格、`\\` 反斜杠，
/// 其余 `\X...;` 格式码与 `{}` 分组符去除。
fn decode_mtext_content(raw: &str) -> String {
    let mut result = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some('P') | Some('p') => result.push('\n'),
                Some('~') => result.push(' '),
                Some('\\') => result.push('\\'),
                Some('{') => result.push('{'),
                Some('}') => result.push('}'),
                // \U+XXXX 留给文字转义解码
                Some('U') => {
                    result.push('\\');
                    result.push('U');
                }
                Some('f') | Some('F') | Some('H') | Some('h') | Some('C') | Some('c')
                | Some('T') | Some('Q') | Some('W') | Some('A') | Some('S') => {
                    for next in chars.by_ref() {
                        if next == ';' {
                            break;
                        }
                    }
                }
                Some('L') | Some('l') | Some('O') | Some('o') | Some('K') | Some('k') => {}
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            },
            '{' | '}' => {}
            _ => result.push(ch),
        }
    }
    result
}
