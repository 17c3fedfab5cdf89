use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use floorplan_config::{AppConfig, ConfigError};
use floorplan_engine::{
    errors::EngineError,
    pipeline::{CanonicalModel, NormalizeOptions, PipelineWorker},
    session::EditorSession,
    sync::EngineSettings,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// 从 DXF 平面图中提取展位并生成保存载荷。
#[derive(Debug, Parser)]
#[command(name = "floorplan", version)]
struct Args {
    /// 输入的 DXF 文件
    input: PathBuf,

    /// 配置文件路径（默认读取 FLOORPLAN_CONFIG 或 ./config/default.toml）
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    width: Option<f64>,

    #[arg(long)]
    height: Option<f64>,

    /// 展位编号过滤条件（正则，忽略大小写）
    #[arg(short, long)]
    search: Option<String>,

    /// 依次执行的编辑命令，例如 `hide-all --force`
    #[arg(long = "command", value_name = "COMMAND")]
    commands: Vec<String>,

    /// 保存载荷输出路径，缺省时打印到标准输出
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    let config = load_configuration(args.config.clone());
    init_logging(&config);
    info!("启动展位提取工具");

    if let Err(err) = run(&args, &config) {
        error!(error = %format!("{err:#}"), "处理失败");
        std::process::exit(1);
    }
}

fn run(args: &Args, config: &AppConfig) -> Result<()> {
    let bytes = fs::read(&args.input)
        .with_context(|| format!("读取 {} 失败", args.input.display()))?;

    let options = NormalizeOptions {
        view_width: args.width.unwrap_or(config.editor.viewport_width),
        view_height: args.height.unwrap_or(config.editor.viewport_height),
        conventions: config.conventions.clone(),
        ..NormalizeOptions::default()
    };
    let mut worker = PipelineWorker::spawn();
    worker
        .submit(bytes, options.clone())
        .context("提交规范化任务失败")?;
    let model = worker.wait_latest().context("规范化 DXF 失败")?;
    print_summary(&model);

    let mut session = EditorSession::new(EngineSettings {
        palette: config.palette.clone(),
        conventions: config.conventions.clone(),
        grace_delay: config.editor.grace_delay(),
        focus_padding: config.editor.focus_padding,
        view_width: options.view_width,
        view_height: options.view_height,
    });
    session.open(&model);

    if let Some(search) = &args.search {
        session.run_command(&format!("search {search}"));
    }
    for command in &args.commands {
        let response = session.run_command(command);
        let message = response.message.unwrap_or_default();
        if response.success {
            info!(command = %command, "{message}");
        } else {
            warn!(command = %command, "{message}");
        }
    }
    // 等待延时删除/切换全部完成
    session.advance(config.editor.grace_delay());

    let payload = match session.save() {
        Ok(payload) => payload,
        Err(EngineError::MissingIdentifiers(handles)) => {
            anyhow::bail!("以下展位缺少编号，拒绝保存: {}", handles.join(", "));
        }
        Err(err) => return Err(err.into()),
    };
    let json = serde_json::to_string_pretty(&payload).context("序列化保存载荷失败")?;
    match &args.output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("写入 {} 失败", path.display()))?;
            info!(path = %path.display(), stands = payload.len(), "保存载荷已写入");
        }
        None => println!("{json}"),
    }
    session.close();
    Ok(())
}

fn print_summary(model: &CanonicalModel) {
    info!(
        stands = model.stands.len(),
        dropped = model.dropped_stands.len(),
        unsupported = model.invalid_entities.len(),
        "展位提取完成"
    );
    for layer in model.layers.values() {
        info!(
            layer = %layer.display_name,
            visible = layer.visible,
            stands = layer.stands.len(),
            labels = layer.labels.len(),
            entities = layer.entities.len(),
            "图层"
        );
    }
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
                    }
                    ConfigError::Context { .. } => {
                        warn!(error = %err, "加载默认配置失败，使用内建默认值");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

/// 安装全局日志订阅者；已有订阅者时保留原订阅者并返回 `false`。
fn init_logging(config: &AppConfig) -> bool {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();
    if !installed {
        debug!("日志订阅者已存在，沿用现有配置");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_can_be_initialised_twice() {
        let config = AppConfig::default();
        init_logging(&config);
        assert!(!init_logging(&config));
    }

    #[test]
    fn missing_override_falls_back_to_defaults() {
        let config = load_configuration(Some(PathBuf::from("does/not/exist.toml")));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.editor.grace_delay_ms, 300);
    }
}
