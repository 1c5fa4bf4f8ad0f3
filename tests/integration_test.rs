//! 集成测试：HTTP 请求 → 发布 → 事件处理的完整链路

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use functions_kit::broker::LocalBroker;
use functions_kit::handlers::{Handlers, SomeEvent};
use functions_kit::http::{respond, HttpFunction, HttpHandler};
use functions_kit::middleware::{handler_fn, log_error, Middleware};
use functions_kit::recover::recover;
use functions_kit::request_scope;
use functions_kit::trace::propagation::TRACEPARENT_HEADER;
use functions_kit::{
    Context, Error, Event, EventFunction, SpyTopic, Telemetry, Topic, TracedTopic,
};
use opentelemetry::trace::{SpanContext, SpanKind};
use opentelemetry_sdk::trace::InMemorySpanExporter;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;

const TRACE_ID: &str = "0af7651916cd43dd8448eb211c80319c";
const TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

/// 在当前线程安装追踪订阅层，span 导出到内存
fn install_telemetry() -> (Telemetry, InMemorySpanExporter, DefaultGuard) {
    let exporter = InMemorySpanExporter::default();
    let telemetry = Telemetry::builder("integration-test")
        .with_batch_exporter(exporter.clone())
        .build()
        .unwrap();
    let guard =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(telemetry.layer()));
    (telemetry, exporter, guard)
}

fn post(body: &'static str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/")
        .body(Body::from(body))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// 测试 start 处理器发布事件并返回 204
#[tokio::test]
async fn test_start_publishes_event() {
    let spy = Arc::new(SpyTopic::new());
    let handlers = Handlers::new(spy.clone());
    let function = HttpFunction::new(
        "start",
        &[Some(recover()), Some(log_error())],
        handlers.start_handler(),
    );
    let app = Router::new().fallback_service(function);

    let response = app.oneshot(post("hello")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(body_text(response).await.is_empty());

    let messages = spy.messages();
    assert_eq!(messages.len(), 1);
    let event: SomeEvent = serde_json::from_slice(&messages[0].data).unwrap();
    assert_eq!(event.overview, "received an HTTP(POST) request");
    assert_eq!(event.payload, b"hello");
}

/// 测试处理器错误映射为不含细节的 500
#[tokio::test]
async fn test_handler_error_maps_to_500() {
    let failing: HttpHandler = handler_fn(|_ctx, _req| async {
        Err(Error::Validation("secret detail".into()))
    });
    let function = HttpFunction::new("failing", &[Some(log_error())], failing);

    let response = function.oneshot(post("")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_text(response).await;
    assert_eq!(body, "Internal Server Error");
    assert!(!body.contains("secret"));
}

/// 测试处理器 panic 被恢复并映射为 500，服务继续可用
#[tokio::test]
async fn test_panic_is_recovered() {
    let panicking: HttpHandler = handler_fn(|_ctx, req: axum::extract::Request| async move {
        if req.uri().path() == "/panic" {
            panic!("boom");
        }
        Ok(axum::response::Response::new(Body::from("ok")))
    });
    let function = HttpFunction::new("panicking", &[Some(recover())], panicking);

    let request = Request::builder().uri("/panic").body(Body::empty()).unwrap();
    let response = function.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = function.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// 测试请求作用域值在中间件链执行前已附加
#[tokio::test]
async fn test_status_visible_to_outer_middleware() {
    let observed = Arc::new(Mutex::new(Vec::new()));
    let recorder = observed.clone();
    let observe: Middleware<HttpHandler> = Arc::new(move |next: HttpHandler| -> HttpHandler {
        let recorder = recorder.clone();
        handler_fn(move |ctx: Context, req| {
            let next = next.clone();
            let recorder = recorder.clone();
            async move {
                let before = request_scope::status_code(&ctx);
                let response = next(ctx.clone(), req).await;
                recorder
                    .lock()
                    .unwrap()
                    .push((before, request_scope::status_code(&ctx)));
                response
            }
        })
    });

    let created: HttpHandler = handler_fn(|ctx, _req| async move {
        respond(&ctx, &serde_json::json!({"id": 1}), StatusCode::CREATED)
    });
    let function = HttpFunction::new("created", &[Some(observe)], created);

    let response = function.oneshot(post("")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_text(response).await, "{\"id\":1}\n");
    assert_eq!(
        *observed.lock().unwrap(),
        vec![(request_scope::STATUS_UNKNOWN, 201)]
    );
}

/// 测试上游 traceparent 被延续到处理器上下文
#[tokio::test]
async fn test_incoming_traceparent_is_continued() {
    let (_telemetry, _exporter, _guard) = install_telemetry();
    let seen: Arc<Mutex<Option<SpanContext>>> = Arc::default();
    let recorder = seen.clone();
    let handler: HttpHandler = handler_fn(move |ctx: Context, _req| {
        let recorder = recorder.clone();
        async move {
            *recorder.lock().unwrap() = Context::current().span();
            Ok(functions_kit::http::no_content(&ctx))
        }
    });
    let function = HttpFunction::new("traced", &[], handler);

    let request = Request::builder()
        .uri("/")
        .header(TRACEPARENT_HEADER, TRACEPARENT)
        .body(Body::empty())
        .unwrap();
    function.oneshot(request).await.unwrap();

    let span = seen.lock().unwrap().clone().unwrap();
    assert_eq!(span.trace_id().to_string(), TRACE_ID);
    assert_ne!(span.span_id().to_string(), "b7ad6b7169203331");
    assert!(span.is_sampled());
}

/// 测试服务端 span 在 flush 后被导出，并带有响应状态码
#[tokio::test]
async fn test_server_span_is_exported() {
    let (telemetry, exporter, _guard) = install_telemetry();
    let handler: HttpHandler =
        handler_fn(|ctx, _req| async move { Ok(functions_kit::http::no_content(&ctx)) });
    let function = HttpFunction::new("exported", &[], handler);

    let request = Request::builder()
        .uri("/")
        .header(TRACEPARENT_HEADER, TRACEPARENT)
        .body(Body::empty())
        .unwrap();
    function.oneshot(request).await.unwrap();
    telemetry.force_flush().unwrap();

    let spans = exporter.get_finished_spans().unwrap();
    let span = spans.iter().find(|span| span.name == "exported").unwrap();
    assert_eq!(span.span_kind, SpanKind::Server);
    assert_eq!(span.span_context.trace_id().to_string(), TRACE_ID);
    assert!(span
        .attributes
        .iter()
        .any(|kv| kv.key.as_str() == "http.status_code" && kv.value.as_str() == "204"));
}

/// 未采样的上游 trace 不会被导出，但仍然被延续
#[tokio::test]
async fn test_unsampled_trace_is_not_exported() {
    let (telemetry, exporter, _guard) = install_telemetry();
    let handler: HttpHandler =
        handler_fn(|ctx, _req| async move { Ok(functions_kit::http::no_content(&ctx)) });
    let function = HttpFunction::new("quiet", &[], handler);

    let request = Request::builder()
        .uri("/")
        .header(TRACEPARENT_HEADER, TRACEPARENT.replace("-01", "-00"))
        .body(Body::empty())
        .unwrap();
    function.oneshot(request).await.unwrap();
    telemetry.force_flush().unwrap();

    assert!(exporter.get_finished_spans().unwrap().is_empty());
}

/// 测试 HTTP 请求与其触发的事件处理位于同一条 trace
#[tokio::test]
async fn test_http_to_event_round_trip() {
    let (_telemetry, _exporter, _guard) = install_telemetry();
    let (broker, mut subscription) = LocalBroker::new(8);
    let topic = Arc::new(TracedTopic::new(broker));
    let handlers = Handlers::new(topic.clone());

    let start = HttpFunction::new(
        "start",
        &[Some(recover()), Some(log_error())],
        handlers.start_handler(),
    );
    let request = Request::builder()
        .method(Method::PUT)
        .uri("/")
        .header(TRACEPARENT_HEADER, TRACEPARENT)
        .body(Body::from("payload"))
        .unwrap();
    let response = start.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let event = subscription.recv().await.unwrap();
    let publisher = functions_kit::topic::extract(&Context::background(), &event.message);
    assert_eq!(publisher.span().unwrap().trace_id().to_string(), TRACE_ID);

    let seen: Arc<Mutex<Option<SpanContext>>> = Arc::default();
    let recorder = seen.clone();
    let hook = handlers.hook_handler();
    let observed = handler_fn(move |ctx: Context, event: Event| {
        let hook = hook.clone();
        let recorder = recorder.clone();
        async move {
            *recorder.lock().unwrap() = ctx.span();
            hook(ctx, event).await
        }
    });
    let function = EventFunction::new("hook", &[Some(recover())], observed);
    function.call(event).await.unwrap();

    let span = seen.lock().unwrap().clone().unwrap();
    assert_eq!(span.trace_id().to_string(), TRACE_ID);

    topic.close().await.unwrap();
    assert!(subscription.recv().await.is_none());
}
