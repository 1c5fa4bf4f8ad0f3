//! 示例业务处理器
//!
//! `start` 接收 HTTP 请求并把请求体包装为 [`SomeEvent`] 发布到 topic；
//! `hook` 订阅同一 topic，解码并校验事件后记录日志。

use crate::context::Context;
use crate::error::{Error, ResultExt};
use crate::event::{Event, EventHandler};
use crate::http::{no_content, HttpHandler};
use crate::middleware::handler_fn;
use crate::topic::{Message, Topic};
use axum::extract::Request;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// `start` 发布、`hook` 消费的事件负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SomeEvent {
    pub overview: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl SomeEvent {
    /// 所有字段都是必填项
    pub fn validate(&self) -> Result<(), Error> {
        if self.overview.is_empty() {
            return Err(Error::Validation("overview is required".into()));
        }
        if self.payload.is_empty() {
            return Err(Error::Validation("payload is required".into()));
        }
        Ok(())
    }
}

pub struct Handlers {
    topic: Arc<dyn Topic>,
}

impl Handlers {
    pub fn new(topic: Arc<dyn Topic>) -> Arc<Self> {
        Arc::new(Self { topic })
    }

    pub async fn start(&self, ctx: Context, req: Request) -> Result<Response, Error> {
        let method = req.method().clone();
        let body = axum::body::to_bytes(req.into_body(), usize::MAX)
            .await
            .context("error reading request body")?;

        let event = SomeEvent {
            overview: format!("received an HTTP({method}) request"),
            payload: body.to_vec(),
            created_at: Utc::now(),
        };
        let data = serde_json::to_vec(&event).context("error encoding event")?;
        let message_id = self
            .topic
            .publish(&ctx, Message::new(data))
            .await
            .context("error publishing event")?;
        tracing::debug!(message_id = %message_id, "published event");

        Ok(no_content(&ctx))
    }

    pub async fn hook(&self, _ctx: Context, event: Event) -> Result<(), Error> {
        let some_event: SomeEvent = event.data_as()?;
        some_event.validate().context("error validating event")?;

        tracing::info!(
            message_id = %event.id,
            overview = %some_event.overview,
            payload_len = some_event.payload.len(),
            created_at = %some_event.created_at,
            "received an event"
        );
        Ok(())
    }

    pub fn start_handler(self: &Arc<Self>) -> HttpHandler {
        let handlers = self.clone();
        handler_fn(move |ctx: Context, req: Request| {
            let handlers = handlers.clone();
            async move { handlers.start(ctx, req).await }
        })
    }

    pub fn hook_handler(self: &Arc<Self>) -> EventHandler {
        let handlers = self.clone();
        handler_fn(move |ctx: Context, event: Event| {
            let handlers = handlers.clone();
            async move { handlers.hook(ctx, event).await }
        })
    }
}
