//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__TELEMETRY__HISTORY_CAPACITY=50`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::HiveError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    #[serde(default)]
    pub supervisor: SupervisorSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub tools: ToolsSection,
}

/// [queue] 段：优先级任务队列
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    /// 计划恢复后是否顺带清理该会话已完成的任务
    #[serde(default = "default_true")]
    pub purge_completed_on_resume: bool,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            purge_completed_on_resume: true,
        }
    }
}

/// [telemetry] 段：历史缓冲与订阅者队列容量
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySection {
    /// 每个会话保留的历史事件数（超出时淘汰最旧）
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// 每个订阅者的待投递队列容量（满时丢弃最旧）
    #[serde(default = "default_subscriber_queue_capacity")]
    pub subscriber_queue_capacity: usize,
    /// 全局最多保留多少个会话的历史
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,
}

fn default_history_capacity() -> usize {
    100
}

fn default_subscriber_queue_capacity() -> usize {
    64
}

fn default_max_conversations() -> usize {
    1024
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            subscriber_queue_capacity: default_subscriber_queue_capacity(),
            max_conversations: default_max_conversations(),
        }
    }
}

/// [supervisor] 段：后台任务
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSection {
    /// 关闭时等待后台任务完成的超时（秒）
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_drain_timeout_secs() -> u64 {
    5
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

/// [pipeline] 段：计划、检索与确认策略
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// 单个计划的最大步骤数
    #[serde(default = "default_max_plan_steps")]
    pub max_plan_steps: usize,
    /// 知识检索返回条数
    #[serde(default = "default_knowledge_limit")]
    pub knowledge_limit: usize,
    /// 强制搜索时使用的工具名
    #[serde(default = "default_search_tool")]
    pub search_tool: String,
    /// 关键词无法判断时，是否让模型判断用户是否在确认计划
    #[serde(default = "default_true")]
    pub confirm_with_model: bool,
    /// 回复后是否在后台做长期记忆矛盾检测
    #[serde(default = "default_true")]
    pub contradiction_check: bool,
    /// 「简短确认」的最大词数（如 "yes"、"ok go"）
    #[serde(default = "default_acknowledgement_max_words")]
    pub acknowledgement_max_words: usize,
}

fn default_max_plan_steps() -> usize {
    8
}

fn default_knowledge_limit() -> usize {
    5
}

fn default_search_tool() -> String {
    "web_search".to_string()
}

fn default_acknowledgement_max_words() -> usize {
    3
}

fn default_true() -> bool {
    true
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_plan_steps: default_max_plan_steps(),
            knowledge_limit: default_knowledge_limit(),
            search_tool: default_search_tool(),
            confirm_with_model: true,
            contradiction_check: true,
            acknowledgement_max_words: default_acknowledgement_max_words(),
        }
    }
}

/// [tools] 段：工具调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, HiveError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    Ok(c.try_deserialize()?)
}
