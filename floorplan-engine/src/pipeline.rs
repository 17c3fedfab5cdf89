//! 规范化管线：范围与适配比例、标注挂接、图层分组，以及后台工作线程。

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use floorplan_core::{
    conventions::{LayerCategory, LayerConventions},
    document::{Document, Entity, EntityKind, Tables},
    geometry::{Bounds2D, FitScale, Point2, compute_fit_scale, point_in_polygon},
};
use floorplan_io::DxfFacade;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classify::{self, Classification};
use crate::errors::PipelineError;
use crate::viewport::ViewportState;

/// 块参照的最大嵌套深度，超过后不再展开（防止块自引用）。
const MAX_BLOCK_DEPTH: usize = 8;

/// 整份文档展开块参照时最多复制的实体数。
const MAX_BLOCK_ENTITIES: usize = 50_000;

/// 一次规范化所需的视口与图层约定。
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeOptions {
    pub view_width: f64,
    pub view_height: f64,
    pub viewport: ViewportState,
    pub conventions: LayerConventions,
}

impl NormalizeOptions {
    pub fn new(view_width: f64, view_height: f64) -> Self {
        Self {
            view_width,
            view_height,
            ..Self::default()
        }
    }
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            view_width: 1280.0,
            view_height: 720.0,
            viewport: ViewportState::default(),
            conventions: LayerConventions::default(),
        }
    }
}

/// 已挂接标注的展位轮廓（视口坐标）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandShape {
    pub handle: String,
    pub layer: String,
    pub vertices: Vec<Point2>,
    pub points: Vec<f64>,
    pub closed: bool,
    /// 挂接的标注句柄。
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub handle: String,
    pub layer: String,
    pub text: String,
    pub anchor: Point2,
    pub height: f64,
    pub rotation: f64,
    /// 反向链接到所属展位。
    pub stand: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerGroup {
    pub name: String,
    pub display_name: String,
    pub visible: bool,
    pub expanded: bool,
    pub stands: Vec<String>,
    pub labels: Vec<String>,
    /// 不受支持实体的句柄（仅保留图层使用）。
    pub entities: Vec<String>,
}

impl LayerGroup {
    fn new(name: &str, display_name: String, visible: bool, expanded: bool) -> Self {
        Self {
            name: name.to_string(),
            display_name,
            visible,
            expanded,
            stands: Vec::new(),
            labels: Vec::new(),
            entities: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtentMetadata {
    pub source: Bounds2D,
    pub fit: FitScale,
    pub view_width: f64,
    pub view_height: f64,
}

/// 管线输出。所有集合保持源文件顺序。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalModel {
    pub layers: IndexMap<String, LayerGroup>,
    pub stands: IndexMap<String, StandShape>,
    pub invalid_entities: Vec<Entity>,
    pub labels: IndexMap<String, Label>,
    pub tables: Tables,
    pub extent: ExtentMetadata,
    /// 因缺少标注而被丢弃的展位句柄。
    pub dropped_stands: Vec<String>,
}

impl CanonicalModel {
    #[inline]
    pub fn stand(&self, handle: &str) -> Option<&StandShape> {
        self.stands.get(handle)
    }

    pub fn label_of(&self, stand: &StandShape) -> Option<&Label> {
        self.labels.get(&stand.label)
    }

    /// 名称匹配展位约定的图层。
    pub fn stand_layers<'a>(
        &'a self,
        conventions: &'a LayerConventions,
    ) -> impl Iterator<Item = &'a LayerGroup> + 'a {
        self.layers
            .values()
            .filter(move |layer| conventions.matches(&layer.name, LayerCategory::Stands))
    }
}

/// 解析并规范化一份 DXF 字节流。
pub fn run_pipeline(
    bytes: &[u8],
    options: &NormalizeOptions,
) -> Result<CanonicalModel, PipelineError> {
    let document = DxfFacade::new().parse_bytes(bytes)?;
    let model = normalize(&document, options);
    info!(
        stands = model.stands.len(),
        labels = model.labels.len(),
        invalid = model.invalid_entities.len(),
        dropped = model.dropped_stands.len(),
        "规范化完成"
    );
    Ok(model)
}

/// 把文档变换为视口坐标下的规范模型。
pub fn normalize(document: &Document, options: &NormalizeOptions) -> CanonicalModel {
    let width = options.view_width;
    let height = options.view_height;
    let conventions = &options.conventions;
    let tables = document.tables();

    let source = document.extents().unwrap_or_else(|| {
        Bounds2D::from_corners(Point2::new(0.0, height), Point2::new(width, 0.0))
    });
    let fit = compute_fit_scale(source, width, height);
    debug!(
        scale = fit.scale_x,
        min_x = source.min().x(),
        min_y = source.min().y(),
        "计算视口适配比例"
    );

    let mut labels: Vec<Label> = Vec::new();
    let mut candidates: Vec<Entity> = Vec::new();
    let mut invalid_entities: Vec<Entity> = Vec::new();

    let mut block_budget = MAX_BLOCK_ENTITIES;
    for entity in document.entities() {
        let resolved = resolve_inserts(entity.clone(), document, 0, &mut block_budget);
        let prepared = classify::prepare(resolved, tables);
        if classify::is_label_candidate(&prepared, conventions) {
            let scaled = classify::scale(prepared, &fit, &options.viewport);
            if let Some(label) = to_label(&scaled) {
                labels.push(label);
            }
            continue;
        }
        match classify::classify(prepared, conventions) {
            Classification::Valid(entity) => {
                candidates.push(classify::scale(entity, &fit, &options.viewport));
            }
            Classification::Invalid(entity) => {
                invalid_entities.push(classify::scale(entity, &fit, &options.viewport));
            }
        }
    }

    if block_budget == 0 {
        warn!(limit = MAX_BLOCK_ENTITIES, "块参照展开的实体数达到上限，其余内容已截断");
    }

    let mut stands = IndexMap::new();
    let mut dropped_stands = Vec::new();
    for candidate in candidates {
        let Some(polyline) = candidate.as_polyline() else {
            continue;
        };
        let vertices = polyline.positions();
        let attached = labels
            .iter_mut()
            .find(|label| label.stand.is_none() && point_in_polygon(label.anchor, &vertices));
        match attached {
            Some(label) => {
                label.stand = Some(candidate.handle.clone());
                stands.insert(
                    candidate.handle.clone(),
                    StandShape {
                        handle: candidate.handle.clone(),
                        layer: candidate.layer.clone(),
                        points: polyline.points.clone(),
                        closed: polyline.is_closed,
                        vertices,
                        label: label.handle.clone(),
                    },
                );
            }
            None => {
                debug!(handle = %candidate.handle, "展位没有标注，已丢弃");
                dropped_stands.push(candidate.handle.clone());
            }
        }
    }

    let layers = bucket_layers(tables, conventions, &stands, &labels, &invalid_entities);
    let labels = labels
        .into_iter()
        .map(|label| (label.handle.clone(), label))
        .collect();

    CanonicalModel {
        layers,
        stands,
        invalid_entities,
        labels,
        tables: tables.clone(),
        extent: ExtentMetadata {
            source,
            fit,
            view_width: width,
            view_height: height,
        },
        dropped_stands,
    }
}

/// 用块表内容填充块参照（含嵌套参照）。`budget` 为剩余可复制的实体数。
fn resolve_inserts(
    mut entity: Entity,
    document: &Document,
    depth: usize,
    budget: &mut usize,
) -> Entity {
    if let EntityKind::Insert(insert) = &mut entity.kind {
        if depth >= MAX_BLOCK_DEPTH {
            warn!(block = %insert.block_name, "块参照嵌套过深，停止展开");
            return entity;
        }
        let Some(block) = document.block(&insert.block_name) else {
            debug!(block = %insert.block_name, "块定义缺失");
            insert.entities = Vec::new();
            return entity;
        };
        let mut entities = Vec::with_capacity(block.entities.len().min(*budget));
        for inner in &block.entities {
            if *budget == 0 {
                break;
            }
            *budget -= 1;
            entities.push(resolve_inserts(inner.clone(), document, depth + 1, budget));
        }
        insert.entities = entities;
    }
    entity
}

fn to_label(entity: &Entity) -> Option<Label> {
    let text = entity.as_text()?;
    Some(Label {
        handle: entity.handle.clone(),
        layer: entity.layer.clone(),
        text: text.content.clone(),
        anchor: text.insert,
        height: text.height,
        rotation: text.rotation,
        stand: None,
    })
}

fn bucket_layers(
    tables: &Tables,
    conventions: &LayerConventions,
    stands: &IndexMap<String, StandShape>,
    labels: &[Label],
    invalid_entities: &[Entity],
) -> IndexMap<String, LayerGroup> {
    let mut layers = IndexMap::new();

    let mut unsupported = LayerGroup::new(
        &conventions.unsupported_layer,
        conventions.unsupported_display_name.clone(),
        false,
        false,
    );
    unsupported.entities = invalid_entities
        .iter()
        .map(|entity| entity.handle.clone())
        .collect();
    layers.insert(unsupported.name.clone(), unsupported);

    for record in tables.layers.values() {
        layers.entry(record.name.clone()).or_insert_with(|| {
            LayerGroup::new(
                &record.name,
                conventions.display_name(&record.name),
                record.is_visible(),
                conventions.matches(&record.name, LayerCategory::StandId),
            )
        });
    }

    let group_for = |layers: &mut IndexMap<String, LayerGroup>, name: &str| -> usize {
        let entry = layers.entry(name.to_string());
        let index = entry.index();
        entry.or_insert_with(|| {
            LayerGroup::new(
                name,
                conventions.display_name(name),
                true,
                conventions.matches(name, LayerCategory::StandId),
            )
        });
        index
    };

    for stand in stands.values() {
        let index = group_for(&mut layers, &stand.layer);
        layers[index].stands.push(stand.handle.clone());
    }
    for label in labels {
        let index = group_for(&mut layers, &label.layer);
        layers[index].labels.push(label.handle.clone());
    }
    layers
}

/// 管线请求编号，单调递增。
pub type RequestId = u64;

struct PipelineRequest {
    id: RequestId,
    bytes: Vec<u8>,
    options: NormalizeOptions,
}

pub struct PipelineResponse {
    pub id: RequestId,
    pub result: Result<CanonicalModel, PipelineError>,
}

/// 在后台线程运行管线的一次性请求队列。接收端只接受最近一次提交的结果。
pub struct PipelineWorker {
    requests: Option<Sender<PipelineRequest>>,
    responses: Receiver<PipelineResponse>,
    handle: Option<JoinHandle<()>>,
    next_id: RequestId,
    latest: Option<RequestId>,
}

impl PipelineWorker {
    pub fn spawn() -> Self {
        let (request_tx, request_rx) = mpsc::channel::<PipelineRequest>();
        let (response_tx, response_rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            for request in request_rx {
                debug!(id = request.id, bytes = request.bytes.len(), "处理管线请求");
                let result = run_pipeline(&request.bytes, &request.options);
                let response = PipelineResponse {
                    id: request.id,
                    result,
                };
                if response_tx.send(response).is_err() {
                    break;
                }
            }
        });
        Self {
            requests: Some(request_tx),
            responses: response_rx,
            handle: Some(handle),
            next_id: 0,
            latest: None,
        }
    }

    /// 提交新请求；之前尚未取回的结果随之作废。
    pub fn submit(
        &mut self,
        bytes: Vec<u8>,
        options: NormalizeOptions,
    ) -> Result<RequestId, PipelineError> {
        self.next_id += 1;
        let id = self.next_id;
        let sender = self.requests.as_ref().ok_or(PipelineError::WorkerDisconnected)?;
        sender
            .send(PipelineRequest { id, bytes, options })
            .map_err(|_| PipelineError::WorkerDisconnected)?;
        self.latest = Some(id);
        Ok(id)
    }

    #[inline]
    pub fn latest(&self) -> Option<RequestId> {
        self.latest
    }

    /// 非阻塞地取回最新请求的结果，过期结果直接丢弃。
    pub fn try_poll(&mut self) -> Option<Result<CanonicalModel, PipelineError>> {
        loop {
            match self.responses.try_recv() {
                Ok(response) => {
                    if let Some(result) = self.accept(response) {
                        return Some(result);
                    }
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    return self.latest.take().map(|_| Err(PipelineError::WorkerDisconnected));
                }
            }
        }
    }

    /// 阻塞等待最新请求的结果。
    pub fn wait_latest(&mut self) -> Result<CanonicalModel, PipelineError> {
        if self.latest.is_none() {
            return Err(PipelineError::NothingSubmitted);
        }
        loop {
            let response = self
                .responses
                .recv()
                .map_err(|_| PipelineError::WorkerDisconnected)?;
            if let Some(result) = self.accept(response) {
                return result;
            }
        }
    }

    fn accept(
        &mut self,
        response: PipelineResponse,
    ) -> Option<Result<CanonicalModel, PipelineError>> {
        if Some(response.id) == self.latest {
            self.latest = None;
            Some(response.result)
        } else {
            debug!(id = response.id, latest = ?self.latest, "丢弃过期的管线结果");
            None
        }
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        // 关闭请求通道后线程自然退出
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("管线线程异常退出");
            }
        }
    }
}
