//! 中间件组合
//!
//! HTTP 与事件两种调用形态共享同一个处理器形状 [`Handler<Req, Resp>`]，
//! 因而组合算法只需实现一次。

use crate::context::Context;
use crate::error::Error;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// 终端处理器或被中间件包装后的处理器
pub type Handler<Req, Resp> =
    Arc<dyn Fn(Context, Req) -> BoxFuture<'static, Result<Resp, Error>> + Send + Sync>;

/// 将"下一个处理器"变换为新处理器的函数
pub type Middleware<H> = Arc<dyn Fn(H) -> H + Send + Sync>;

/// 将异步函数转换为 [`Handler`]
pub fn handler_fn<Req, Resp, F, Fut>(f: F) -> Handler<Req, Resp>
where
    F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Error>> + Send + 'static,
{
    Arc::new(move |ctx: Context, req: Req| -> BoxFuture<'static, Result<Resp, Error>> {
        Box::pin(f(ctx, req))
    })
}

/// 用中间件包装终端处理器
///
/// 从后往前依次应用，`middlewares[0]` 位于最外层，能观察并拦截所有内层（包括其失败）。
/// 值为 `None` 的项直接跳过。
pub fn chain<H>(middlewares: &[Option<Middleware<H>>], terminal: H) -> H {
    middlewares
        .iter()
        .rev()
        .flatten()
        .fold(terminal, |next, middleware| middleware(next))
}

/// 内层返回错误时以 error 级别记录完整的错误链，然后原样返回
///
/// 平台自身也会记录函数返回的错误，但只有经过结构化日志才能带上错误汇总标记。
pub fn log_error<Req, Resp>() -> Middleware<Handler<Req, Resp>>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    Arc::new(|next: Handler<Req, Resp>| -> Handler<Req, Resp> {
        Arc::new(move |ctx: Context, req: Req| -> BoxFuture<'static, Result<Resp, Error>> {
            let next = next.clone();
            Box::pin(async move {
                let result = next(ctx, req).await;
                if let Err(err) = &result {
                    tracing::error!("{}", error_chain(err));
                }
                result
            })
        })
    })
}

/// 展开错误的 `source` 链，去掉已包含在上层描述中的重复部分
fn error_chain(err: &Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}
