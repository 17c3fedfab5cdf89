use std::collections::HashMap;

use crate::form::FormStore;
use crate::sync::{BulkMode, SyncEngine};

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub name: String,
    pub args: Vec<String>,
}

impl CommandRequest {
    /// 解析 `name arg1 arg2` 形式的命令行。
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let name = parts.next()?.to_string();
        Some(Self {
            name,
            args: parts.map(str::to_string).collect(),
        })
    }

    fn has_flag(&self, flag: &str) -> bool {
        self.args
            .iter()
            .any(|arg| arg.trim_start_matches('-') == flag)
    }
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub success: bool,
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse;
}

pub struct CommandContext<'a> {
    pub engine: &'a mut SyncEngine,
    pub form: &'a mut dyn FormStore,
}

pub struct CommandBus {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl CommandBus {
    pub fn new() -> Self {
        let mut bus = Self {
            handlers: HashMap::new(),
        };
        for mode in BulkMode::ALL {
            bus.register(BulkCommand { mode });
        }
        bus.register(SearchCommand);
        bus.register(SelectCommand);
        bus.register(HighlightCommand);
        bus
    }

    pub fn register<H: CommandHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.name(), Box::new(handler));
    }

    pub fn dispatch(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        if let Some(handler) = self.handlers.get(request.name.as_str()) {
            handler.execute(request, context)
        } else {
            CommandResponse::err(format!("未知命令: {}", request.name))
        }
    }

    pub fn available_commands(&self) -> impl Iterator<Item = &&'static str> {
        self.handlers.keys()
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

/// 以模式名注册的批量操作，`force` 参数放宽选中要求。
struct BulkCommand {
    mode: BulkMode,
}

impl CommandHandler for BulkCommand {
    fn name(&self) -> &'static str {
        self.mode.as_str()
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let force = request.has_flag("force");
        let affected = context.engine.apply(self.mode, force, context.form);
        CommandResponse::ok(format!("{}: {affected} 个展位", self.mode))
    }
}

struct SearchCommand;

impl CommandHandler for SearchCommand {
    fn name(&self) -> &'static str {
        "search"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let term = request.args.join(" ");
        context.engine.set_search(&term, context.form);
        CommandResponse::ok(format!("匹配 {} 个标注", context.engine.ledger().len()))
    }
}

struct SelectCommand;

impl CommandHandler for SelectCommand {
    fn name(&self) -> &'static str {
        "select"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let Some(handle) = request.args.first() else {
            return CommandResponse::err("缺少展位句柄");
        };
        match context.engine.select_entity(handle, context.form) {
            Some(true) => CommandResponse::ok(format!("已选中 {handle}")),
            Some(false) => CommandResponse::ok(format!("已取消选中 {handle}")),
            None => CommandResponse::err(format!("展位 {handle} 不存在")),
        }
    }
}

struct HighlightCommand;

impl CommandHandler for HighlightCommand {
    fn name(&self) -> &'static str {
        "highlight"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let Some(handle) = request.args.first() else {
            context.engine.reset_highlight(&*context.form);
            return CommandResponse::ok("已取消高亮");
        };
        if context.engine.highlight(handle, &*context.form) {
            CommandResponse::ok(format!("已高亮 {handle}"))
        } else {
            CommandResponse::err(format!("展位 {handle} 不存在"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::tests::loaded_engine;

    fn request(line: &str) -> CommandRequest {
        CommandRequest::parse(line).expect("命令行")
    }

    #[test]
    fn bulk_commands_dispatch_by_mode_name() {
        let (mut engine, mut form) = loaded_engine();
        let bus = CommandBus::new();
        let mut context = CommandContext {
            engine: &mut engine,
            form: &mut form,
        };

        let response = bus.dispatch(&request("select select-all"), &mut context);
        assert!(!response.success);

        let response = bus.dispatch(&request("select S1"), &mut context);
        assert!(response.success);
        let response = bus.dispatch(&request("hide-all"), &mut context);
        assert_eq!(response.message.as_deref(), Some("hide-all: 2 个展位"));
        let response = bus.dispatch(&request("show-all --force"), &mut context);
        assert_eq!(response.message.as_deref(), Some("show-all: 3 个展位"));
        assert!(context.engine.registry().stands().all(|node| node.visible));
    }

    #[test]
    fn search_and_unknown_commands() {
        let (mut engine, mut form) = loaded_engine();
        let bus = CommandBus::new();
        let mut context = CommandContext {
            engine: &mut engine,
            form: &mut form,
        };
        let response = bus.dispatch(&request("search b"), &mut context);
        assert_eq!(response.message.as_deref(), Some("匹配 1 个标注"));
        assert_eq!(context.engine.search(), "b");

        let response = bus.dispatch(&request("explode"), &mut context);
        assert!(!response.success);
        assert!(CommandRequest::parse("   ").is_none());
        let mut names: Vec<_> = bus.available_commands().copied().collect();
        names.sort_unstable();
        assert!(names.contains(&"delete-selected-entity"));
        assert_eq!(names.len(), BulkMode::ALL.len() + 3);
    }

    #[test]
    fn highlight_command_marks_stand() {
        let (mut engine, mut form) = loaded_engine();
        let bus = CommandBus::new();
        let mut context = CommandContext {
            engine: &mut engine,
            form: &mut form,
        };
        assert!(bus.dispatch(&request("highlight S2"), &mut context).success);
        assert_eq!(context.engine.highlighted(), Some("S2"));
        assert!(bus.dispatch(&request("highlight"), &mut context).success);
        assert_eq!(context.engine.highlighted(), None);
    }
}
