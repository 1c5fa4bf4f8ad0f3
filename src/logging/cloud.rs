//! 追踪感知的日志增强处理器
//!
//! 在委托给底层 JSON 行处理器之前，为每条记录附加：
//! - `insertId` 与纳秒精度的 `timestamp`，供日志汇聚端区分同一时刻的多条日志；
//! - 当前 span 的 `spanId`、`traceSampled`，绑定了项目ID时还有完整的 trace 资源名；
//! - error 级别记录的 `@type` 标记，使其自动转发到错误汇总。
//!
//! 内置键名改写为 Cloud Logging 约定的结构化字段名，源码路径改写为相对项目根目录的形式。

use super::json::{
    HandlerOptions, JsonHandler, LogWriter, ReplaceAttr, LEVEL_KEY, MESSAGE_KEY, SOURCE_KEY,
};
use super::{Attr, Level, LogHandler, Record, Source, Value};
use chrono::{SecondsFormat, Utc};
use std::io;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

pub const LOG_MESSAGE_KEY: &str = "message";
pub const LOG_SEVERITY_KEY: &str = "severity";
pub const LOG_SOURCE_LOCATION_KEY: &str = "logging.googleapis.com/sourceLocation";
pub const LOG_TRACE_KEY: &str = "logging.googleapis.com/trace";
pub const LOG_SPAN_ID_KEY: &str = "logging.googleapis.com/spanId";
pub const LOG_TRACE_SAMPLED_KEY: &str = "logging.googleapis.com/traceSampled";
pub const LOG_INSERT_ID_KEY: &str = "insertId";
pub const LOG_TIMESTAMP_KEY: &str = "timestamp";

pub const REPORTING_TYPE_KEY: &str = "@type";
pub const REPORTED_ERROR_EVENT_TYPE: &str =
    "type.googleapis.com/google.devtools.clouderrorreporting.v1beta1.ReportedErrorEvent";

/// 用于绑定项目ID的保留属性键，通过 `with_attrs` 传入，不会输出到日志
pub const ATTR_KEY_PROJECT_ID: &str = "project_id";

/// 源码路径改写时的根目录占位符
pub const ROOT_PLACEHOLDER: &str = "{root}";

#[derive(Clone)]
pub struct CloudLogHandler {
    base: Arc<dyn LogHandler>,
    project_id: Option<Arc<str>>,
}

impl CloudLogHandler {
    /// 创建输出到 `writer` 的增强处理器，源码路径相对于本 crate 根目录
    pub fn new(writer: LogWriter, level: Level) -> Self {
        Self::with_root_dir(writer, level, env!("CARGO_MANIFEST_DIR"))
    }

    pub fn with_root_dir(writer: LogWriter, level: Level, root_dir: impl Into<String>) -> Self {
        let options = HandlerOptions {
            level,
            add_source: true,
            replace_attr: Some(replace_attr(root_dir.into())),
        };
        Self::wrap(Arc::new(JsonHandler::new(writer, options)))
    }

    /// 包装任意底层处理器
    pub fn wrap(base: Arc<dyn LogHandler>) -> Self {
        Self {
            base,
            project_id: None,
        }
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }
}

/// 改写内置键：`msg` → `message`，`level` → `severity`，`source` → `sourceLocation`
fn replace_attr(root_dir: String) -> ReplaceAttr {
    Arc::new(move |groups: &[String], attr: Attr| {
        if !groups.is_empty() {
            return Some(attr);
        }
        let Attr { key, value } = attr;
        let attr = match value {
            Value::Source(source) if key == SOURCE_KEY => Attr::new(
                LOG_SOURCE_LOCATION_KEY,
                Value::Source(relative_source(source, &root_dir)),
            ),
            Value::Level(level) if key == LEVEL_KEY => {
                Attr::new(LOG_SEVERITY_KEY, level.severity())
            }
            value if key == MESSAGE_KEY => Attr::new(LOG_MESSAGE_KEY, value),
            value => Attr { key, value },
        };
        Some(attr)
    })
}

/// 根目录下的绝对路径与编译器给出的相对路径都改写为 `{root}/...`
fn relative_source(source: Source, root_dir: &str) -> Source {
    let file = match source.file.strip_prefix(root_dir) {
        Some(rest) if !root_dir.is_empty() => format!("{ROOT_PLACEHOLDER}{rest}"),
        _ if Path::new(&source.file).is_relative() => {
            format!("{ROOT_PLACEHOLDER}/{}", source.file)
        }
        _ => return source,
    };
    Source { file, ..source }
}

impl LogHandler for CloudLogHandler {
    fn enabled(&self, level: Level) -> bool {
        self.base.enabled(level)
    }

    fn handle(&self, mut record: Record) -> io::Result<()> {
        record.annotate(Attr::new(LOG_INSERT_ID_KEY, Uuid::new_v4().to_string()));
        record.annotate(Attr::new(
            LOG_TIMESTAMP_KEY,
            Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        ));

        if let Some(span) = record.span.clone() {
            if let Some(project_id) = &self.project_id {
                record.annotate(Attr::new(
                    LOG_TRACE_KEY,
                    format!("projects/{project_id}/traces/{}", span.trace_id()),
                ));
            }
            record.annotate(Attr::new(LOG_SPAN_ID_KEY, span.span_id().to_string()));
            record.annotate(Attr::new(LOG_TRACE_SAMPLED_KEY, span.is_sampled()));
        }

        if record.level == Level::Error {
            record.annotate(Attr::new(REPORTING_TYPE_KEY, REPORTED_ERROR_EVENT_TYPE));
        }

        // insertId + timestamp 已足以让下游去重，这里不做重试
        self.base.handle(record)
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn LogHandler> {
        let mut project_id = self.project_id.clone();
        let mut forwarded = Vec::with_capacity(attrs.len());
        for attr in attrs {
            if attr.key == ATTR_KEY_PROJECT_ID {
                project_id = Some(Arc::from(attr.value.to_string()));
            } else {
                forwarded.push(attr);
            }
        }

        let base = if forwarded.is_empty() {
            self.base.clone()
        } else {
            self.base.with_attrs(forwarded)
        };
        Arc::new(Self { base, project_id })
    }

    fn with_group(&self, name: &str) -> Arc<dyn LogHandler> {
        Arc::new(Self {
            base: self.base.with_group(name),
            project_id: self.project_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_source() {
        let source = Source {
            function: "functions_kit::http".into(),
            file: "/workspace/functions_kit/src/http.rs".into(),
            line: 12,
        };
        let relative = relative_source(source.clone(), "/workspace/functions_kit");
        assert_eq!(relative.file, "{root}/src/http.rs");
        assert_eq!(relative.line, 12);

        let untouched = relative_source(source.clone(), "/elsewhere");
        assert_eq!(untouched.file, source.file);

        let compiled = Source {
            file: "src/http.rs".into(),
            ..source
        };
        assert_eq!(relative_source(compiled, "/elsewhere").file, "{root}/src/http.rs");
    }

    #[test]
    fn test_replace_attr_ignores_grouped_keys() {
        let replace = replace_attr("/root".into());
        let attr = replace(&["request".to_string()], Attr::new(MESSAGE_KEY, "inner")).unwrap();
        assert_eq!(attr.key, MESSAGE_KEY);

        let attr = replace(&[], Attr::new(LEVEL_KEY, Value::Level(Level::Warn))).unwrap();
        assert_eq!(attr.key, LOG_SEVERITY_KEY);
        assert_eq!(attr.value, Value::from("WARNING"));
    }

    #[test]
    fn test_with_attrs_does_not_mutate_receiver() {
        let handler = CloudLogHandler::new(LogWriter::new(io::sink()), Level::Info);
        let _bound = handler.with_attrs(vec![Attr::new(ATTR_KEY_PROJECT_ID, "my-project")]);
        assert_eq!(handler.project_id(), None);
    }
}
