use axum::Router;
use functions_kit::broker::LocalBroker;
use functions_kit::config::{Config, TraceExporter};
use functions_kit::error::{Error, ResultExt};
use functions_kit::handlers::Handlers;
use functions_kit::logging::{
    self, Attr, CloudLogHandler, Level, LogHandler, LogWriter, ATTR_KEY_PROJECT_ID,
};
use functions_kit::middleware::log_error;
use functions_kit::recover::recover;
use functions_kit::{shutdown, EventFunction, HttpFunction, Telemetry, Topic, TracedTopic};
use opentelemetry_otlp::{Protocol, WithExportConfig};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const HTTP_FUNCTION: &str = "functions-samples-start";
const EVENT_FUNCTION: &str = "functions-samples-hook";
const BROKER_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() {
    let writer = LogWriter::stderr();
    let setup = Config::from_env().and_then(|config| Ok((telemetry(&config)?, config)));

    let level = setup
        .as_ref()
        .map(|(_, config)| config.log_level)
        .unwrap_or(Level::Info);
    let mut handler: Arc<dyn LogHandler> = Arc::new(CloudLogHandler::new(writer.clone(), level));
    if let Ok((_, config)) = &setup {
        handler = handler.with_attrs(vec![Attr::new(
            ATTR_KEY_PROJECT_ID,
            config.project_id.as_str(),
        )]);
    }
    let trace_layer = setup.as_ref().ok().map(|(telemetry, _)| telemetry.layer());
    if let Err(err) = logging::init(trace_layer, handler, &level.as_str().to_ascii_lowercase()) {
        eprintln!("exit with: {err}");
        std::process::exit(1);
    }

    let result = match setup {
        Ok((telemetry, config)) => run(config, telemetry).await,
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        tracing::error!("exit with: {err}");
        let _ = writer.flush();
        std::process::exit(1);
    }
    let _ = writer.flush();
}

/// 按配置构建追踪管线，OTLP 端点由 `OTEL_EXPORTER_OTLP_*` 环境变量决定
fn telemetry(config: &Config) -> Result<Telemetry, Error> {
    let builder =
        Telemetry::builder(env!("CARGO_PKG_NAME")).with_sample_ratio(config.trace_sample_ratio);
    let builder = match config.trace_exporter {
        TraceExporter::Otlp => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpBinary)
                .build()
                .map_err(|err| Error::Telemetry(Box::new(err)))?;
            builder.with_batch_exporter(exporter)
        }
        TraceExporter::None => builder,
    };
    builder.build()
}

async fn run(config: Config, telemetry: Telemetry) -> Result<(), Error> {
    config.log_detected();

    let (broker, mut subscription) = LocalBroker::new(BROKER_CAPACITY);
    let topic = Arc::new(TracedTopic::new(broker));
    tracing::info!(topic = %config.topic_id, "initialized topic");

    let handlers = Handlers::new(topic.clone());
    let start = HttpFunction::new(
        HTTP_FUNCTION,
        &[Some(recover()), Some(log_error())],
        handlers.start_handler(),
    );
    let mut hook = EventFunction::new(
        EVENT_FUNCTION,
        &[Some(recover()), Some(log_error())],
        handlers.hook_handler(),
    );
    if let Some(timeout) = config.event_timeout {
        hook = hook.with_timeout(timeout);
    }

    // 每条事件在独立任务中处理，失败已由中间件记录
    let tracker = TaskTracker::new();
    let dispatcher = tokio::spawn({
        let tracker = tracker.clone();
        async move {
            while let Some(event) = subscription.recv().await {
                let hook = hook.clone();
                tracker.spawn(async move {
                    let message_id = event.id.clone();
                    if hook.call(event).await.is_err() {
                        tracing::debug!(message_id = %message_id, "event was not acknowledged");
                    }
                });
            }
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context(format!("error binding {addr}"))?;
    tracing::info!(%addr, function = HTTP_FUNCTION, "listening");

    let stop = CancellationToken::new();
    let app = Router::new().fallback_service(start);
    let mut server = tokio::spawn({
        let stop = stop.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
        }
    });

    // 服务器提前退出时同样走排空流程，之后再返回其错误
    let stopped_early = shutdown::stopped(shutdown::signal(), &mut server)
        .await
        .map(server_result);

    tracing::info!("shutting down...");
    stop.cancel();
    let mut served = Ok(());
    let drained = shutdown::drain(config.grace_period, async {
        served = match stopped_early {
            Some(result) => result,
            None => server_result(server.await),
        };
        if let Err(err) = topic.close().await {
            tracing::error!("error closing topic: {err}");
        }
        if let Err(err) = dispatcher.await {
            tracing::error!("event dispatcher failed: {err}");
        }
        tracker.close();
        tracker.wait().await;

        // 导出器以阻塞方式发送，放到阻塞线程池执行
        match tokio::task::spawn_blocking(move || telemetry.force_flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!("error flushing traces: {err}"),
            Err(err) => tracing::error!("error flushing traces: {err}"),
        }
    })
    .await;

    if drained {
        tracing::info!("shutdown completed. bye!");
    }
    served
}

fn server_result(result: Result<io::Result<()>, JoinError>) -> Result<(), Error> {
    result
        .map_err(io::Error::other)
        .and_then(|served| served)
        .context("http server stopped")
}
