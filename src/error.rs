//! 错误类型定义

use std::any::Any;
use thiserror::Error;

/// Broker 客户端返回的不透明错误
pub type BrokerError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// 处理器中未被捕获的 panic，携带 panic 负载与调用栈文本
    #[error("panic: {message}\n\n{stack}")]
    Panic { message: String, stack: String },

    /// 向 broker 发布消息失败
    #[error("failed to publish message: {0}")]
    Publish(#[source] BrokerError),

    /// Topic 已进入排空状态，不再接受新的发布
    #[error("topic is closed")]
    TopicClosed,

    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("missing env: {0}")]
    MissingEnv(String),

    #[error("invalid env {key}={value}: {reason}")]
    InvalidEnv {
        key: String,
        value: String,
        reason: String,
    },

    #[error("sample ratio must be within [0, 1), got {0}")]
    InvalidSampleRatio(f64),

    /// span 导出管线的错误
    #[error("telemetry error: {0}")]
    Telemetry(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// 入站负载校验失败
    #[error("invalid payload: {0}")]
    Validation(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("body error: {0}")]
    Body(#[from] axum::Error),

    #[error("failed to install log subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),

    /// 附加了上下文说明的错误，用于在日志中还原因果链
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// 为错误附加上下文说明
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// 由 panic 负载和调用栈文本构造错误
    pub fn from_panic(payload: Box<dyn Any + Send>, stack: String) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "Box<dyn Any>".to_string()
        };
        Self::Panic { message, stack }
    }

    /// 是否由上下文取消或超时引起
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled | Self::DeadlineExceeded => true,
            Self::Context { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }
}

/// 为 `Result` 提供 `context` 扩展
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|err| err.into().context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keeps_causal_chain() {
        let err: Result<()> = Err(Error::Validation("overview is required".into()));
        let err = err.context("error decoding event").unwrap_err();
        assert_eq!(
            err.to_string(),
            "error decoding event: invalid payload: overview is required"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_from_panic_payloads() {
        let err = Error::from_panic(Box::new("boom"), "stack".into());
        assert!(err.to_string().contains("boom"));

        let err = Error::from_panic(Box::new(String::from("owned boom")), "stack".into());
        assert!(err.to_string().contains("owned boom"));

        let err = Error::from_panic(Box::new(42_u8), "stack".into());
        assert!(err.to_string().contains("Box<dyn Any>"));
    }

    #[test]
    fn test_is_cancellation() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(Error::DeadlineExceeded.context("waiting for ack").is_cancellation());
        assert!(!Error::TopicClosed.is_cancellation());
    }
}
