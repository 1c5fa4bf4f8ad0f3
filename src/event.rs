//! 事件驱动调用形态

use crate::context::Context;
use crate::error::{Error, ResultExt};
use crate::middleware::{chain, Handler, Middleware};
use crate::topic::{self, Message};
use crate::trace;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// broker 投递的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    pub message: Message,
    pub publish_time: DateTime<Utc>,
}

impl Event {
    pub fn new(id: impl Into<String>, message: Message, publish_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            message,
            publish_time,
        }
    }

    /// 将消息数据按 JSON 解码
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.message.data).context("error decoding event data")
    }
}

pub type EventHandler = Handler<Event, ()>;

/// 可被调用的事件函数
///
/// 每次调用从消息属性中还原发布端的追踪上下文，以其为父开启 span，再执行中间件链。
#[derive(Clone)]
pub struct EventFunction {
    name: Arc<str>,
    handler: EventHandler,
    timeout: Option<Duration>,
}

impl EventFunction {
    /// # 参数
    /// * `name` - 函数名，同时用作每次调用的 span 名
    /// * `middlewares` - 按从外到内的顺序排列，`None` 项被跳过
    /// * `handler` - 终端处理器
    pub fn new(
        name: impl Into<Arc<str>>,
        middlewares: &[Option<Middleware<EventHandler>>],
        handler: EventHandler,
    ) -> Self {
        Self {
            name: name.into(),
            handler: chain(middlewares, handler),
            timeout: None,
        }
    }

    /// 为每次调用设置截止时间
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 处理一条事件，返回错误时 broker 会重新投递
    pub async fn call(&self, event: Event) -> Result<(), Error> {
        let mut ctx = topic::extract(&Context::background(), &event.message);
        if let Some(timeout) = self.timeout {
            ctx = ctx.with_timeout(timeout);
        }

        let span = tracing::info_span!(
            parent: None,
            "event.receive",
            otel.name = %self.name,
            otel.kind = "consumer",
            messaging.message_id = %event.id,
        );
        let ctx = ctx.with_trace(trace::start(ctx.trace(), &span));

        let handler = self.handler.clone();
        ctx.clone()
            .scope(handler(ctx, event))
            .instrument(span)
            .await
    }
}
