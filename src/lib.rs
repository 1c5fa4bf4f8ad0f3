//! Serverless 函数的请求/事件外壳
//!
//! 接收 HTTP 请求与 broker 事件，经过可组合的中间件链交给业务处理器；
//! 每条日志都带上追踪标识与去重元数据，发布到 topic 的消息携带追踪上下文，
//! 使一次请求及其触发的异步处理落在同一条 trace 上。
//!
//! ## Usage
//!
//! ### 组合中间件
//! ```
//! use functions_kit::middleware::{chain, handler_fn, log_error};
//! use functions_kit::recover::recover;
//! use functions_kit::{Context, EventHandler};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let hook: EventHandler = handler_fn(|_ctx, _event| async { Ok(()) });
//!
//! // 第一个中间件位于最外层
//! let handler = chain(&[Some(recover()), Some(log_error())], hook);
//! # let message = functions_kit::Message::new("{}");
//! # let event = functions_kit::Event::new("1", message, chrono::Utc::now());
//! handler(Context::background(), event).await.unwrap();
//! # }
//! ```
//!
//! ### 挂载 HTTP 函数
//! ```no_run
//! use axum::Router;
//! use functions_kit::http::{no_content, HttpFunction, HttpHandler};
//! use functions_kit::logging::{self, CloudLogHandler, Level, LogWriter};
//! use functions_kit::middleware::handler_fn;
//! use functions_kit::recover::recover;
//! use functions_kit::Telemetry;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), functions_kit::Error> {
//! // span 经由日志订阅者桥接到追踪器
//! let telemetry = Telemetry::builder("app").with_sample_ratio(0.1).build()?;
//! let handler = Arc::new(CloudLogHandler::new(LogWriter::stderr(), Level::Info));
//! logging::init(telemetry.layer(), handler, "info")?;
//!
//! let start: HttpHandler = handler_fn(|ctx, _req| async move { Ok(no_content(&ctx)) });
//! let function = HttpFunction::new("start", &[Some(recover())], start);
//!
//! let app = Router::new().fallback_service(function);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod handlers;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod recover;
pub mod request_scope;
pub mod shutdown;
pub mod topic;
pub mod trace;
mod trace_id;

pub use context::Context;
pub use error::{Error, Result, ResultExt};
pub use event::{Event, EventFunction, EventHandler};
pub use http::{HttpFunction, HttpHandler};
pub use middleware::{Handler, Middleware};
pub use topic::{Message, SpyTopic, Topic, TracedTopic};
pub use trace::{Telemetry, TelemetryBuilder};
pub use trace_id::FastRandIdGenerator;
