//! 追踪上下文传播
//!
//! 将当前 span 与 baggage 编码进载体（消息属性、HTTP 头部），以及反向解码。
//! 默认的组合传播器按顺序应用：
//! 1. [`CloudTraceOneWayPropagator`]：只提取 `x-cloud-trace-context`，从不注入；
//! 2. W3C `traceparent`，双向；
//! 3. W3C `baggage`，双向。
//!
//! 提取时后者覆盖前者，因此两者同时存在时以 `traceparent` 为准。

use std::sync::LazyLock;

use opentelemetry::propagation::text_map_propagator::FieldIter;
use opentelemetry::propagation::{
    Extractor, Injector, TextMapCompositePropagator, TextMapPropagator,
};
use opentelemetry::Context as OtelContext;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_stackdriver::google_trace_context_propagator::GoogleTraceContextPropagator;

/// W3C TraceContext 头部名
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// W3C Baggage 头部名
pub const BAGGAGE_HEADER: &str = "baggage";

/// Google Cloud 负载均衡器写入的追踪头部名
pub const CLOUD_TRACE_CONTEXT_HEADER: &str = "x-cloud-trace-context";

static PROPAGATOR: LazyLock<TextMapCompositePropagator> = LazyLock::new(|| {
    TextMapCompositePropagator::new(vec![
        Box::new(CloudTraceOneWayPropagator::default()),
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ])
});

/// 入站提取与出站注入共用的组合传播器
pub fn propagator() -> &'static TextMapCompositePropagator {
    &PROPAGATOR
}

/// 只提取不注入的 `x-cloud-trace-context` 传播器
///
/// 负载均衡器会改写该头部，下游只应看到 `traceparent`。
#[derive(Debug, Default)]
pub struct CloudTraceOneWayPropagator {
    inner: GoogleTraceContextPropagator,
}

impl TextMapPropagator for CloudTraceOneWayPropagator {
    fn inject_context(&self, _cx: &OtelContext, _injector: &mut dyn Injector) {}

    fn extract_with_context(&self, cx: &OtelContext, extractor: &dyn Extractor) -> OtelContext {
        self.inner.extract_with_context(cx, extractor)
    }

    fn fields(&self) -> FieldIter<'_> {
        self.inner.fields()
    }
}
