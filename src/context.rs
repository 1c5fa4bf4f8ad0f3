//! 请求上下文
//!
//! `Context` 是按值传递的不可变请求上下文：携带 OpenTelemetry 上下文（当前 span 与 baggage）、
//! 请求作用域值，以及取消/超时信号。派生操作（`with_span`、`with_values`、`with_timeout` …）总是返回新的实例。
//!
//! 日志等无法显式接收参数的代码通过 `tokio::task_local` 读取"当前上下文"，
//! 由 [`Context::scope`] 在异步任务范围内设置。

use crate::error::Error;
use crate::request_scope::RequestScopeValues;
use opentelemetry::trace::{SpanContext, TraceContextExt};
use opentelemetry::Context as OtelContext;
use std::future::Future;
use std::time::Duration;
use tokio::task_local;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

task_local! {
    static CURRENT_CONTEXT: Context;
}

#[derive(Clone, Debug)]
pub struct Context {
    trace: OtelContext,
    values: Option<RequestScopeValues>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// 空的根上下文：没有 span、没有请求作用域值、永不超时
    pub fn background() -> Self {
        Self {
            trace: OtelContext::new(),
            values: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// 获取当前异步任务的上下文
    ///
    /// 不在 [`Context::scope`] 范围内时返回新的 background 上下文。
    pub fn current() -> Self {
        CURRENT_CONTEXT
            .try_with(Clone::clone)
            .unwrap_or_else(|_| Self::background())
    }

    /// 在此上下文中执行异步操作，期间 [`Context::current`] 返回该上下文
    pub async fn scope<F, T>(self, future: F) -> T
    where
        F: Future<Output = T>,
    {
        CURRENT_CONTEXT.scope(self, future).await
    }

    /// 当前活跃的 span，没有有效 span 时返回 `None`
    pub fn span(&self) -> Option<SpanContext> {
        let span = self.trace.span().span_context().clone();
        span.is_valid().then_some(span)
    }

    pub fn trace(&self) -> &OtelContext {
        &self.trace
    }

    pub fn with_trace(&self, trace: OtelContext) -> Self {
        Self {
            trace,
            ..self.clone()
        }
    }

    /// 以 `span` 作为远端父 span，保留已有的 baggage
    pub fn with_span(&self, span: SpanContext) -> Self {
        self.with_trace(self.trace.with_remote_span_context(span))
    }

    pub(crate) fn values(&self) -> Option<&RequestScopeValues> {
        self.values.as_ref()
    }

    /// 附加请求作用域值
    pub fn with_values(&self, values: RequestScopeValues) -> Self {
        Self {
            values: Some(values),
            ..self.clone()
        }
    }

    /// 派生可独立取消的子上下文；父上下文取消时子上下文随之取消
    pub fn with_cancel(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    /// 派生带截止时间的子上下文，截止时间取父子中较早者
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 取消此上下文及其所有子上下文
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 上下文已取消或已超时时返回对应错误
    pub fn err(&self) -> Option<Error> {
        if self.cancel.is_cancelled() {
            return Some(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// 等待上下文结束，返回结束原因
    pub async fn done(&self) -> Error {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => Error::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Error::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                Error::Cancelled
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
