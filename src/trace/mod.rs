//! 分布式追踪
//!
//! span 以 `tracing` span 的形式开启，由 `tracing-opentelemetry` 桥接为 OpenTelemetry span，
//! 采样与导出交给 `opentelemetry_sdk`。跨进程的关联标识符存放在 [`crate::Context`] 携带的
//! OpenTelemetry 上下文中。

pub mod propagation;

use opentelemetry::trace::{TraceContextExt, TracerProvider as _};
use opentelemetry::Context as OtelContext;
use opentelemetry_sdk::trace::{
    Sampler, SdkTracer, SdkTracerProvider, SpanExporter, TracerProviderBuilder,
};
use opentelemetry_sdk::Resource;
use tracing::Subscriber;
use tracing_opentelemetry::{OpenTelemetryLayer, OpenTelemetrySpanExt};
use tracing_subscriber::registry::LookupSpan;

use crate::error::Error;
use crate::trace_id::FastRandIdGenerator;

/// 追踪器与导出管线
///
/// 克隆开销很小，所有克隆共享同一个 provider。
#[derive(Debug, Clone)]
pub struct Telemetry {
    provider: SdkTracerProvider,
    tracer: SdkTracer,
}

pub struct TelemetryBuilder {
    service_name: String,
    sample_ratio: f64,
    provider: TracerProviderBuilder,
}

impl Telemetry {
    pub fn builder(service_name: impl Into<String>) -> TelemetryBuilder {
        TelemetryBuilder {
            service_name: service_name.into(),
            sample_ratio: 0.0,
            provider: SdkTracerProvider::builder(),
        }
    }

    /// 把 `tracing` span 桥接到本追踪器的订阅层
    pub fn layer<S>(&self) -> OpenTelemetryLayer<S, SdkTracer>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
    {
        tracing_opentelemetry::layer().with_tracer(self.tracer.clone())
    }

    /// 把缓冲中的 span 全部交给导出器，阻塞直到完成
    pub fn force_flush(&self) -> Result<(), Error> {
        self.provider
            .force_flush()
            .map_err(|err| Error::Telemetry(Box::new(err)))
    }
}

impl TelemetryBuilder {
    /// 根 span 的采样比例，必须位于 `[0, 1)`
    ///
    /// 有父 span 时沿用父 span 的采样决定。默认为 0，只有上游已采样的 trace 会被导出。
    pub fn with_sample_ratio(mut self, ratio: f64) -> Self {
        self.sample_ratio = ratio;
        self
    }

    pub fn with_batch_exporter<E: SpanExporter + 'static>(mut self, exporter: E) -> Self {
        self.provider = self.provider.with_batch_exporter(exporter);
        self
    }

    pub fn build(self) -> Result<Telemetry, Error> {
        let ratio = self.sample_ratio;
        // 导出请求本身也会被追踪，全量采样会让导出链路自我放大
        if !(0.0..1.0).contains(&ratio) {
            return Err(Error::InvalidSampleRatio(ratio));
        }

        let provider = self
            .provider
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                ratio,
            ))))
            .with_id_generator(FastRandIdGenerator)
            .with_resource(
                Resource::builder()
                    .with_service_name(self.service_name.clone())
                    .build(),
            )
            .build();
        let tracer = provider.tracer(self.service_name);

        Ok(Telemetry { provider, tracer })
    }
}

/// 以 `parent` 为父开启 `span`，返回携带新 span 的上下文
///
/// `span` 需以 `parent: None` 创建，父子关系只来自传播得到的上下文。
/// 未安装追踪订阅层时 span 没有有效标识符，此时原样返回 `parent`。
pub(crate) fn start(parent: &OtelContext, span: &tracing::Span) -> OtelContext {
    span.set_parent(parent.clone());
    let started = span.context();
    if started.span().span_context().is_valid() {
        started
    } else {
        parent.clone()
    }
}
