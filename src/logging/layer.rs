//! `tracing` 事件到 [`LogHandler`] 的桥接层

use super::{Attr, Level, LogHandler, Record, Source, Value};
use crate::context::Context;
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer;
use tracing_subscriber::Layer;

/// 将每个 `tracing` 事件转换为 [`Record`] 并交给处理器
///
/// 记录的 span 取自当前任务的 [`Context`]，源码位置取自事件元数据。
pub struct HandlerLayer {
    handler: Arc<dyn LogHandler>,
}

impl HandlerLayer {
    pub fn new(handler: Arc<dyn LogHandler>) -> Self {
        Self { handler }
    }
}

impl<S> Layer<S> for HandlerLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: layer::Context<'_, S>) {
        let metadata = event.metadata();
        let level = Level::from(metadata.level());
        if !self.handler.enabled(level) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut record = Record::new(level, visitor.message.unwrap_or_default())
            .with_span(Context::current().span());
        if let (Some(file), Some(line)) = (metadata.file(), metadata.line()) {
            record = record.with_source(Source {
                function: metadata
                    .module_path()
                    .unwrap_or_else(|| metadata.target())
                    .to_string(),
                file: file.to_string(),
                line,
            });
        }
        record.add_attrs(visitor.attrs);

        if let Err(err) = self.handler.handle(record) {
            eprintln!("functions_kit: failed to write log record: {err}");
        }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    attrs: Vec<Attr>,
}

impl FieldVisitor {
    fn push(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.attrs.push(Attr::new(field.name(), value));
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, Value::Str(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, Value::I64(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, Value::U64(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, Value::F64(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, Value::Bool(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.push(field, Value::Str(value.to_string()));
    }
}
