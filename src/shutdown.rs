//! 优雅停机

use std::future::Future;
use std::time::Duration;

/// 等待第一个停机信号：Unix 上为 SIGTERM 或 Ctrl-C，其他平台仅 Ctrl-C
///
/// 信号处理器安装失败时记录错误，该信号源视为永不触发。
pub async fn signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}

/// 等待停机信号或服务自行结束，以先到者为准
///
/// 服务先结束时返回其输出，否则返回 `None`，`server` 仍可继续等待。
pub async fn stopped<S, F>(signal: S, server: &mut F) -> Option<F::Output>
where
    S: Future<Output = ()>,
    F: Future + Unpin,
{
    tokio::select! {
        () = signal => None,
        output = server => Some(output),
    }
}

/// 在宽限期内等待 `future` 完成；超时返回 `false`
pub async fn drain<F>(grace_period: Duration, future: F) -> bool
where
    F: Future<Output = ()>,
{
    match tokio::time::timeout(grace_period, future).await {
        Ok(()) => true,
        Err(_) => {
            tracing::warn!(
                grace_period_ms = grace_period.as_millis() as u64,
                "grace period elapsed before draining completed"
            );
            false
        }
    }
}
