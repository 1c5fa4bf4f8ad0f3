//! JSON 行日志处理器
//!
//! 每条记录输出为一行 JSON 对象。内置键依次为 `time`、`level`、`source`、`msg`，
//! 随后是预设属性与记录属性；所有非分组属性在写出前都会经过 `replace_attr`。

use super::{Attr, Level, LogHandler, Record, Value};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

pub const TIME_KEY: &str = "time";
pub const LEVEL_KEY: &str = "level";
pub const SOURCE_KEY: &str = "source";
pub const MESSAGE_KEY: &str = "msg";

/// 属性改写函数
///
/// 参数为属性所在的分组路径与属性本身；返回 `None` 表示丢弃该属性。
pub type ReplaceAttr = Arc<dyn Fn(&[String], Attr) -> Option<Attr> + Send + Sync>;

/// 多个处理器共享的行写入器，每次写入一整行
#[derive(Clone)]
pub struct LogWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl LogWriter {
    pub fn new<W>(writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    pub fn write_line(&self, line: &[u8]) -> io::Result<()> {
        let mut writer = self.lock()?;
        writer.write_all(line)?;
        writer.flush()
    }

    pub fn flush(&self) -> io::Result<()> {
        self.lock()?.flush()
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, Box<dyn Write + Send>>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))
    }
}

impl fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogWriter")
    }
}

#[derive(Clone)]
pub struct HandlerOptions {
    /// 最低输出级别
    pub level: Level,
    /// 是否输出 `source` 键
    pub add_source: bool,
    pub replace_attr: Option<ReplaceAttr>,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            level: Level::Info,
            add_source: false,
            replace_attr: None,
        }
    }
}

impl fmt::Debug for HandlerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerOptions")
            .field("level", &self.level)
            .field("add_source", &self.add_source)
            .field("replace_attr", &self.replace_attr.is_some())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct JsonHandler {
    writer: LogWriter,
    options: Arc<HandlerOptions>,
    groups: Vec<String>,
    preset: Vec<(Vec<String>, Attr)>,
}

impl JsonHandler {
    pub fn new(writer: LogWriter, options: HandlerOptions) -> Self {
        Self {
            writer,
            options: Arc::new(options),
            groups: Vec::new(),
            preset: Vec::new(),
        }
    }

    pub fn writer(&self) -> &LogWriter {
        &self.writer
    }

    /// 将记录渲染为 JSON 对象（不含换行）
    pub fn render(&self, record: Record) -> Map<String, JsonValue> {
        let mut object = Map::new();

        self.insert(&mut object, &[], Attr::new(TIME_KEY, Value::Time(record.time)));
        self.insert(&mut object, &[], Attr::new(LEVEL_KEY, Value::Level(record.level)));
        if self.options.add_source {
            if let Some(source) = record.source.clone() {
                self.insert(&mut object, &[], Attr::new(SOURCE_KEY, Value::Source(source)));
            }
        }
        self.insert(&mut object, &[], Attr::new(MESSAGE_KEY, record.message.clone()));

        for (groups, attr) in &self.preset {
            self.insert(&mut object, groups, attr.clone());
        }

        let (attrs, annotations) = record.into_parts();
        for attr in attrs {
            self.insert(&mut object, &self.groups, attr);
        }
        for attr in annotations {
            self.insert(&mut object, &[], attr);
        }

        object
    }

    fn insert(&self, object: &mut Map<String, JsonValue>, groups: &[String], attr: Attr) {
        if let Value::Group(members) = attr.value {
            if members.is_empty() {
                return;
            }
            let mut path = groups.to_vec();
            // 空键的分组直接内联到当前层级
            if !attr.key.is_empty() {
                path.push(attr.key);
            }
            for member in members {
                self.insert(object, &path, member);
            }
            return;
        }

        let attr = match &self.options.replace_attr {
            Some(replace) => match replace(groups, attr) {
                Some(attr) => attr,
                None => return,
            },
            None => attr,
        };
        if attr.key.is_empty() {
            return;
        }

        descend(object, groups).insert(attr.key, attr.value.to_json());
    }
}

/// 沿分组路径进入嵌套对象，缺失或类型冲突时创建新的对象
fn descend<'a>(
    object: &'a mut Map<String, JsonValue>,
    groups: &[String],
) -> &'a mut Map<String, JsonValue> {
    let mut current = object;
    for group in groups {
        let entry = current
            .entry(group.clone())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if !entry.is_object() {
            *entry = JsonValue::Object(Map::new());
        }
        current = match entry {
            JsonValue::Object(map) => map,
            _ => unreachable!("entry was just replaced with an object"),
        };
    }
    current
}

impl LogHandler for JsonHandler {
    fn enabled(&self, level: Level) -> bool {
        level >= self.options.level
    }

    fn handle(&self, record: Record) -> io::Result<()> {
        let object = self.render(record);
        let mut line = serde_json::to_vec(&object).map_err(io::Error::other)?;
        line.push(b'\n');
        self.writer.write_line(&line)
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn LogHandler> {
        let mut handler = self.clone();
        handler
            .preset
            .extend(attrs.into_iter().map(|attr| (self.groups.clone(), attr)));
        Arc::new(handler)
    }

    fn with_group(&self, name: &str) -> Arc<dyn LogHandler> {
        let mut handler = self.clone();
        if !name.is_empty() {
            handler.groups.push(name.to_string());
        }
        Arc::new(handler)
    }
}
