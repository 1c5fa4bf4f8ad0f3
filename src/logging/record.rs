//! 日志记录与属性

use opentelemetry::trace::SpanContext;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }

    /// Cloud Logging 的 severity 名称
    pub fn severity(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

impl From<&tracing::Level> for Level {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE | tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::ERROR => Self::Error,
        }
    }
}

/// 产生日志的源码位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub function: String,
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Time(DateTime<Utc>),
    Level(Level),
    Source(Source),
    /// 分组：渲染为嵌套的 JSON 对象
    Group(Vec<Attr>),
    Json(JsonValue),
}

impl Value {
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Str(s) => JsonValue::String(s.clone()),
            Self::I64(n) => json!(n),
            Self::U64(n) => json!(n),
            Self::F64(n) => json!(n),
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Time(t) => JsonValue::String(t.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            Self::Level(level) => JsonValue::String(level.as_str().to_string()),
            Self::Source(source) => json!({
                "function": source.function,
                "file": source.file,
                "line": source.line,
            }),
            Self::Group(attrs) => JsonValue::Object(
                attrs
                    .iter()
                    .map(|attr| (attr.key.clone(), attr.value.to_json()))
                    .collect(),
            ),
            Self::Json(value) => value.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Level(level) => f.write_str(level.as_str()),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::U64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::F64(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        Self::Json(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub key: String,
    pub value: Value,
}

impl Attr {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn group(key: impl Into<String>, attrs: Vec<Attr>) -> Self {
        Self {
            key: key.into(),
            value: Value::Group(attrs),
        }
    }
}

/// 一条待输出的日志记录
///
/// `attrs` 是调用方提供的属性，渲染时嵌套在处理器已打开的分组之下；
/// `annotations` 是增强阶段附加的顶层属性（insertId、trace 等），始终位于根对象。
#[derive(Debug, Clone)]
pub struct Record {
    pub time: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    pub source: Option<Source>,
    pub span: Option<SpanContext>,
    attrs: Vec<Attr>,
    annotations: Vec<Attr>,
}

impl Record {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            level,
            message: message.into(),
            source: None,
            span: None,
            attrs: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_span(mut self, span: Option<SpanContext>) -> Self {
        self.span = span;
        self
    }

    pub fn add_attrs(&mut self, attrs: impl IntoIterator<Item = Attr>) {
        self.attrs.extend(attrs);
    }

    pub fn annotate(&mut self, attr: Attr) {
        self.annotations.push(attr);
    }

    pub fn attrs(&self) -> &[Attr] {
        &self.attrs
    }

    pub fn annotations(&self) -> &[Attr] {
        &self.annotations
    }

    pub(crate) fn into_parts(self) -> (Vec<Attr>, Vec<Attr>) {
        (self.attrs, self.annotations)
    }
}
