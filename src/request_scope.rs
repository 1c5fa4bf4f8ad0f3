//! 请求作用域值存储
//!
//! 每个入站请求恰好创建一份 [`RequestScopeValues`]，在中间件链执行前附加到 [`Context`]。
//! `Context` 按值传递，因此状态码通过共享的原子单元修改：同一请求派生出的所有上下文都能看到最新值。

use crate::context::Context;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

/// 尚未写入响应状态码时的哨兵值
pub const STATUS_UNKNOWN: u16 = 0;

#[derive(Clone, Debug)]
pub struct RequestScopeValues {
    start_time: DateTime<Utc>,
    status: Arc<AtomicU16>,
}

impl RequestScopeValues {
    /// 开始时间为当前时间，状态码为 [`STATUS_UNKNOWN`]
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
            status: Arc::new(AtomicU16::new(STATUS_UNKNOWN)),
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn status_code(&self) -> u16 {
        self.status.load(Ordering::Acquire)
    }
}

impl Default for RequestScopeValues {
    fn default() -> Self {
        Self::new()
    }
}

/// 获取上下文中的请求作用域值；未附加时返回新的默认值
pub fn get(ctx: &Context) -> RequestScopeValues {
    ctx.values().cloned().unwrap_or_default()
}

/// 当前请求的响应状态码；未附加或尚未写入时为 [`STATUS_UNKNOWN`]
pub fn status_code(ctx: &Context) -> u16 {
    ctx.values()
        .map(RequestScopeValues::status_code)
        .unwrap_or(STATUS_UNKNOWN)
}

/// 写入响应状态码
///
/// 允许多次写入，以最后一次为准。上下文未附加请求作用域值时不产生任何效果。
pub fn set_status(ctx: &Context, code: u16) {
    if let Some(values) = ctx.values() {
        values.status.store(code, Ordering::Release);
    }
}
