pub mod classify;
pub mod command;
pub mod edit_box;
pub mod form;
pub mod ledger;
pub mod marquee;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod sync;

pub mod errors {
    use floorplan_io::IoError;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("{} stand(s) have no identifier: {}", .0.len(), .0.join(", "))]
        MissingIdentifiers(Vec<String>),
        #[error("invalid value {value:?} for {field}")]
        InvalidValue { field: &'static str, value: String },
        #[error("unknown bulk mode {0}")]
        UnknownMode(String),
    }

    #[derive(Debug, Error)]
    pub enum PipelineError {
        #[error(transparent)]
        Io(#[from] IoError),
        #[error("pipeline worker is no longer running")]
        WorkerDisconnected,
        #[error("no pipeline request has been submitted")]
        NothingSubmitted,
    }
}

pub mod viewport {
    use floorplan_core::geometry::{Bounds2D, Point2, Vector2};
    use serde::{Deserialize, Serialize};

    const DEFAULT_ZOOM: f64 = 1.0;
    const MIN_ZOOM: f64 = 0.01;
    const MAX_ZOOM: f64 = 1_000.0;

    /// 视口平移与缩放：屏幕坐标 = 场景坐标 × zoom + offset。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct ViewportState {
        pub offset: Vector2,
        pub zoom: f64,
    }

    impl ViewportState {
        #[inline]
        fn clamp_zoom(value: f64) -> f64 {
            value.clamp(MIN_ZOOM, MAX_ZOOM)
        }

        pub fn new(offset: Vector2, zoom: f64) -> Self {
            let zoom = if zoom.is_finite() { zoom } else { DEFAULT_ZOOM };
            Self {
                offset,
                zoom: Self::clamp_zoom(zoom),
            }
        }

        /// 设置缩放倍数（自动限制在合法范围内）。
        pub fn set_zoom(&mut self, zoom: f64) {
            if zoom.is_finite() {
                self.zoom = Self::clamp_zoom(zoom);
            }
        }

        pub fn pan(&mut self, delta: Vector2) {
            self.offset = Vector2::from(self.offset.as_vec2() + delta.as_vec2());
        }

        /// 指针位置减去平移量（框选起点使用的局部坐标，未除以缩放）。
        #[inline]
        pub fn to_local(&self, screen: Point2) -> Point2 {
            Point2::from_vec(screen.as_vec2() - self.offset.as_vec2())
        }

        #[inline]
        pub fn to_scene(&self, screen: Point2) -> Point2 {
            Point2::from_vec((screen.as_vec2() - self.offset.as_vec2()) / self.zoom)
        }

        #[inline]
        pub fn to_screen(&self, scene: Point2) -> Point2 {
            Point2::from_vec(scene.as_vec2() * self.zoom + self.offset.as_vec2())
        }

        /// 缩放并平移视口，使 `bounds`（外扩 `padding`）居中铺满 `width × height`。
        pub fn fit_bounds(&mut self, bounds: &Bounds2D, padding: f64, width: f64, height: f64) {
            if bounds.is_empty() {
                return;
            }
            let padded_width = bounds.width() + 2.0 * padding;
            let padded_height = bounds.height() + 2.0 * padding;
            if padded_width <= 0.0 || padded_height <= 0.0 || width <= 0.0 || height <= 0.0 {
                return;
            }
            let zoom = Self::clamp_zoom((width / padded_width).min(height / padded_height));
            let left = bounds.min().x() - padding;
            let top = bounds.min().y() - padding;
            self.zoom = zoom;
            self.offset = Vector2::new(
                (width - padded_width * zoom) / 2.0 - left * zoom,
                (height - padded_height * zoom) / 2.0 - top * zoom,
            );
        }
    }

    impl Default for ViewportState {
        fn default() -> Self {
            Self {
                offset: Vector2::zero(),
                zoom: DEFAULT_ZOOM,
            }
        }
    }

}
