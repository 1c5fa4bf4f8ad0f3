//! HTTP 调用形态
//!
//! [`HttpFunction`] 是中间件链外面的最外层包装，同时实现 `tower::Service`，可以直接挂到 axum 路由上：
//! 1. 从请求头提取上游的追踪上下文并开启服务端 span；
//! 2. 创建新的 [`RequestScopeValues`] 附加到上下文，再执行中间件链；
//! 3. 处理器返回错误时响应 `500 Internal Server Error`，响应体只有状态文本。

use crate::context::Context;
use crate::error::Error;
use crate::middleware::{chain, Handler, Middleware};
use crate::request_scope::{self, RequestScopeValues};
use crate::trace;
use crate::trace::propagation::propagator;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry_http::HeaderExtractor;
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;
use tower::Service;
use tracing::Instrument;

pub type HttpHandler = Handler<Request, Response>;

/// 以 JSON 响应并记录状态码
///
/// 204 时响应体为空；其余状态码输出不做 HTML 转义的 JSON，末尾带换行。
pub fn respond<T>(ctx: &Context, data: &T, status: StatusCode) -> Result<Response, Error>
where
    T: Serialize + ?Sized,
{
    request_scope::set_status(ctx, status.as_u16());

    if status == StatusCode::NO_CONTENT {
        return Ok(with_status(Response::new(Body::empty()), status));
    }

    let mut body = serde_json::to_vec(data)?;
    body.push(b'\n');
    let mut response = with_status(Response::new(Body::from(body)), status);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

/// 无响应体的 204
pub fn no_content(ctx: &Context) -> Response {
    request_scope::set_status(ctx, StatusCode::NO_CONTENT.as_u16());
    with_status(Response::new(Body::empty()), StatusCode::NO_CONTENT)
}

fn with_status(mut response: Response, status: StatusCode) -> Response {
    *response.status_mut() = status;
    response
}

/// 处理器失败时的响应，不暴露任何内部错误信息
fn internal_server_error() -> Response {
    let status = StatusCode::INTERNAL_SERVER_ERROR;
    let mut response = with_status(
        Response::new(Body::from(status.canonical_reason().unwrap_or_default())),
        status,
    );
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// 可挂载到 axum 的 HTTP 函数
#[derive(Clone)]
pub struct HttpFunction {
    name: Arc<str>,
    handler: HttpHandler,
    timeout: Option<Duration>,
}

impl HttpFunction {
    /// # 参数
    /// * `name` - 函数名，同时用作每个请求的 span 名
    /// * `middlewares` - 按从外到内的顺序排列，`None` 项被跳过
    /// * `handler` - 终端处理器
    pub fn new(
        name: impl Into<Arc<str>>,
        middlewares: &[Option<Middleware<HttpHandler>>],
        handler: HttpHandler,
    ) -> Self {
        Self {
            name: name.into(),
            handler: chain(middlewares, handler),
            timeout: None,
        }
    }

    /// 为每个请求设置截止时间
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 处理一个请求，总能得到响应
    pub async fn handle(&self, req: Request) -> Response {
        let parent = propagator()
            .extract_with_context(&opentelemetry::Context::new(), &HeaderExtractor(req.headers()));
        let mut ctx = Context::background();
        if let Some(timeout) = self.timeout {
            ctx = ctx.with_timeout(timeout);
        }

        let span = tracing::info_span!(
            parent: None,
            "http.request",
            otel.name = %self.name,
            otel.kind = "server",
            http.method = %req.method(),
            http.target = %req.uri().path(),
            http.status_code = tracing::field::Empty,
        );
        let ctx = ctx
            .with_trace(trace::start(&parent, &span))
            .with_values(RequestScopeValues::new());

        let handler = self.handler.clone();
        let result = ctx
            .clone()
            .scope(handler(ctx, req))
            .instrument(span.clone())
            .await;

        let response = result.unwrap_or_else(|_| internal_server_error());
        span.record("http.status_code", response.status().as_u16());
        response
    }
}

impl Service<Request> for HttpFunction {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let function = self.clone();
        Box::pin(async move { Ok(function.handle(req).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_respond_json_without_html_escaping() {
        let ctx = Context::background().with_values(RequestScopeValues::new());
        let response = respond(&ctx, &serde_json::json!({"html": "<b>&</b>"}), StatusCode::OK)
            .unwrap();

        assert_eq!(request_scope::status_code(&ctx), 200);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(body_text(response).await, "{\"html\":\"<b>&</b>\"}\n");
    }

    #[tokio::test]
    async fn test_respond_no_content_has_empty_body() {
        let ctx = Context::background().with_values(RequestScopeValues::new());
        let response = respond(&ctx, &(), StatusCode::NO_CONTENT).unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(request_scope::status_code(&ctx), 204);
        assert!(body_text(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_internal_server_error_body_is_status_text() {
        let response = internal_server_error();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Internal Server Error");
    }
}
