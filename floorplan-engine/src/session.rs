//! 编辑会话：把引擎、框选、编辑框、表单与命令总线组合在一起，
//! 并维护驱动延时任务的逻辑时钟。

use std::time::Duration;

use floorplan_core::geometry::Point2;
use tracing::info;

use crate::command::{CommandBus, CommandContext, CommandRequest, CommandResponse};
use crate::edit_box::{EditBoxController, EditField};
use crate::errors::EngineError;
use crate::form::FormValues;
use crate::marquee::{MarqueeOutcome, MarqueeSelector, PointerTarget, SelectionContext};
use crate::pipeline::CanonicalModel;
use crate::scheduler::GraceAction;
use crate::sync::{EngineSettings, SavedStand, SyncEngine};

pub struct EditorSession {
    engine: SyncEngine,
    marquee: MarqueeSelector,
    edit_box: EditBoxController,
    form: FormValues,
    bus: CommandBus,
    now: Duration,
}

impl EditorSession {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            engine: SyncEngine::new(settings),
            marquee: MarqueeSelector::new(),
            edit_box: EditBoxController::new(),
            form: FormValues::new(),
            bus: CommandBus::new(),
            now: Duration::ZERO,
        }
    }

    /// 载入规范模型，重置表单与交互状态。
    pub fn open(&mut self, model: &CanonicalModel) {
        self.form.clear();
        self.marquee = MarqueeSelector::new();
        self.edit_box = EditBoxController::new();
        self.engine.load_model(model, &mut self.form);
    }

    fn selection_context(&mut self) -> (&mut MarqueeSelector, SelectionContext<'_>) {
        (
            &mut self.marquee,
            SelectionContext {
                engine: &mut self.engine,
                edit_box: &mut self.edit_box,
                form: &mut self.form,
            },
        )
    }

    pub fn pointer_down(&mut self, position: Point2, target: &PointerTarget) -> MarqueeOutcome {
        let (marquee, mut ctx) = self.selection_context();
        marquee.mouse_down(position, position, target, &mut ctx)
    }

    pub fn pointer_move(&mut self, position: Point2) -> MarqueeOutcome {
        let (marquee, mut ctx) = self.selection_context();
        marquee.mouse_move(position, &mut ctx)
    }

    pub fn pointer_up(&mut self, position: Point2) -> MarqueeOutcome {
        let (marquee, mut ctx) = self.selection_context();
        marquee.mouse_up(position, &mut ctx)
    }

    /// 推进逻辑时钟并执行到期的延时任务。
    pub fn advance(&mut self, delta: Duration) -> Vec<(String, GraceAction)> {
        self.now += delta;
        self.engine.tick(self.now, &mut self.form)
    }

    pub fn toggle(&mut self, handle: &str) -> Option<Duration> {
        self.engine.toggle(handle, self.now)
    }

    pub fn delete(&mut self, handle: &str) -> bool {
        self.engine.delete_stand(handle, self.now, &mut self.form)
    }

    /// 对编辑框中的展位应用一次字段修改。
    pub fn edit(&mut self, field: EditField, value: &str) -> Result<(), EngineError> {
        self.edit_box
            .handle_changes(field, value, &mut self.engine, &mut self.form)
    }

    pub fn discard_edits(&mut self) {
        self.edit_box.discard(&mut self.engine, &mut self.form);
    }

    pub fn open_selected(&mut self, anchor: Point2) -> usize {
        self.edit_box.open_selected(anchor, &self.engine, &self.form)
    }

    pub fn run_command(&mut self, line: &str) -> CommandResponse {
        let Some(request) = CommandRequest::parse(line) else {
            return CommandResponse::err("空命令");
        };
        let mut context = CommandContext {
            engine: &mut self.engine,
            form: &mut self.form,
        };
        self.bus.dispatch(&request, &mut context)
    }

    pub fn save(&mut self) -> Result<Vec<SavedStand>, EngineError> {
        self.engine.save_payload(&self.form)
    }

    /// 结束会话，清空注册表与待执行任务。
    pub fn close(&mut self) {
        self.edit_box.only_close();
        self.marquee = MarqueeSelector::new();
        self.engine.teardown();
        info!("编辑会话已关闭");
    }

    #[inline]
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    #[inline]
    pub fn engine_mut(&mut self) -> &mut SyncEngine {
        &mut self.engine
    }

    #[inline]
    pub fn form(&self) -> &FormValues {
        &self.form
    }

    #[inline]
    pub fn form_mut(&mut self) -> &mut FormValues {
        &mut self.form
    }

    #[inline]
    pub fn edit_box(&self) -> &EditBoxController {
        &self.edit_box
    }

    #[inline]
    pub fn marquee(&self) -> &MarqueeSelector {
        &self.marquee
    }

    #[inline]
    pub fn now(&self) -> Duration {
        self.now
    }
}

impl Drop for EditorSession {
    fn drop(&mut self) {
        self.engine.teardown();
    }
}
