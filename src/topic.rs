//! 带追踪的消息发布
//!
//! [`TracedTopic`] 为每次发布开启 `topic.publish` span，并把追踪上下文写入消息属性，
//! 使订阅端能够以 [`extract`] 还原父 span，把生产者与消费者连接在同一条 trace 上。

use crate::broker::Broker;
use crate::context::Context;
use crate::error::Error;
use crate::trace;
use crate::trace::propagation::propagator;
use async_trait::async_trait;
use opentelemetry::propagation::TextMapPropagator;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// 发布到 broker 的消息信封
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub data: Vec<u8>,
    pub attributes: HashMap<String, String>,
    /// 为空时不保证顺序
    pub ordering_key: String,
}

impl Message {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait Topic: Send + Sync {
    /// 发布消息，成功时返回 broker 分配的消息ID
    async fn publish(&self, ctx: &Context, message: Message) -> Result<String, Error>;

    /// 停止接受新消息并等待已提交的发布完成
    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// 从消息属性中还原发布端的追踪上下文
pub fn extract(ctx: &Context, message: &Message) -> Context {
    ctx.with_trace(propagator().extract_with_context(ctx.trace(), &message.attributes))
}

/// 包装 [`Broker`]，为发布过程添加追踪
pub struct TracedTopic<B> {
    broker: Arc<B>,
    tracker: TaskTracker,
}

impl<B: Broker> TracedTopic<B> {
    pub fn new(broker: B) -> Self {
        Self {
            broker: Arc::new(broker),
            tracker: TaskTracker::new(),
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }
}

#[async_trait]
impl<B: Broker> Topic for TracedTopic<B> {
    async fn publish(&self, ctx: &Context, mut message: Message) -> Result<String, Error> {
        if self.tracker.is_closed() {
            return Err(Error::TopicClosed);
        }

        let span = tracing::info_span!(
            parent: None,
            "topic.publish",
            otel.kind = "producer",
            messaging.message_id = tracing::field::Empty,
        );
        let trace = trace::start(ctx.trace(), &span);
        propagator().inject_context(&trace, &mut message.attributes);

        let broker = self.broker.clone();
        let ack = self
            .tracker
            .track_future(async move { broker.publish(message).await });

        // 上下文结束时放弃等待确认；消息可能已被 broker 接收
        let message_id = async {
            tokio::select! {
                result = ack => result.map_err(Error::Publish),
                err = ctx.done() => Err(err),
            }
        }
        .instrument(span.clone())
        .await?;

        span.record("messaging.message_id", message_id.as_str());
        Ok(message_id)
    }

    async fn close(&self) -> Result<(), Error> {
        self.tracker.close();
        self.tracker.wait().await;
        self.broker.close().await.map_err(Error::Publish)
    }
}

/// 测试替身：按顺序记录收到的消息，不做任何修改
#[derive(Debug, Default)]
pub struct SpyTopic {
    messages: Mutex<Vec<Message>>,
}

impl SpyTopic {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已记录消息的快照
    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Topic for SpyTopic {
    async fn publish(&self, _ctx: &Context, message: Message) -> Result<String, Error> {
        let mut messages = self
            .messages
            .lock()
            .map_err(|_| Error::Publish("spy topic lock poisoned".into()))?;
        messages.push(message);
        Ok(messages.len().to_string())
    }
}
