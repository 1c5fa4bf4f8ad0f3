//! 结构化日志
//!
//! [`LogHandler`] 是日志后端的能力集合：判断级别、处理记录、派生带属性/分组的新处理器。
//! 处理器一经构造即不可变，派生操作总是返回新实例，嵌套的作用域日志器互不干扰。
//!
//! 应用代码只使用 `tracing` 宏；[`HandlerLayer`] 把事件转换为 [`Record`] 交给处理器链：
//! `HandlerLayer` → [`CloudLogHandler`]（增强） → [`JsonHandler`]（JSON 行输出）。

mod cloud;
mod json;
mod layer;
mod record;

pub use cloud::{
    CloudLogHandler, ATTR_KEY_PROJECT_ID, LOG_INSERT_ID_KEY, LOG_MESSAGE_KEY,
    LOG_SEVERITY_KEY, LOG_SOURCE_LOCATION_KEY, LOG_SPAN_ID_KEY, LOG_TIMESTAMP_KEY,
    LOG_TRACE_KEY, LOG_TRACE_SAMPLED_KEY, REPORTED_ERROR_EVENT_TYPE, REPORTING_TYPE_KEY,
    ROOT_PLACEHOLDER,
};
pub use json::{HandlerOptions, JsonHandler, LogWriter, ReplaceAttr};
pub use layer::HandlerLayer;
pub use record::{Attr, Level, Record, Source, Value};

use crate::error::Error;
use std::io;
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

pub trait LogHandler: Send + Sync + 'static {
    /// 该级别的记录是否会被处理
    fn enabled(&self, level: Level) -> bool;

    /// 处理一条记录；底层写入失败时返回错误，不做重试
    fn handle(&self, record: Record) -> io::Result<()>;

    /// 返回附加了属性的新处理器
    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn LogHandler>;

    /// 返回打开了新分组的处理器，此后记录的属性嵌套在该分组下
    fn with_group(&self, name: &str) -> Arc<dyn LogHandler>;
}

/// 安装全局 `tracing` 订阅者，所有事件经由 `handler` 输出
///
/// `RUST_LOG` 存在时优先使用其过滤规则，否则使用 `default_filter`。该过滤只作用于日志输出，
/// `trace_layer`（通常是 [`crate::Telemetry::layer`]）始终收到 info 及以上的 span，
/// 日志级别调高后跨进程的追踪传播仍然有效。
pub fn init<L>(
    trace_layer: L,
    handler: Arc<dyn LogHandler>,
    default_filter: &str,
) -> Result<(), Error>
where
    L: Layer<Registry> + Send + Sync + 'static,
{
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(trace_layer.with_filter(LevelFilter::INFO))
        .with(HandlerLayer::new(handler).with_filter(filter))
        .try_init()?;
    Ok(())
}
