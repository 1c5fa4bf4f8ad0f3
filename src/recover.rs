//! Panic 恢复中间件
//!
//! 处理器中的 panic 不会打断运行时：它被转换为 [`Error::Panic`]，以 error 级别记录后返回给外层。

use crate::context::Context;
use crate::error::Error;
use crate::middleware::{Handler, Middleware};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
    /// 当前线程正在轮询受 [`recover`] 保护的处理器
    static RECOVERING: Cell<bool> = const { Cell::new(false) };
}

static INSTALL_HOOK: Once = Once::new();

/// 在作用域内把当前线程标记为受保护，drop 时恢复原值
struct RecoverScope {
    previous: bool,
}

impl RecoverScope {
    fn enter() -> Self {
        Self {
            previous: RECOVERING.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for RecoverScope {
    fn drop(&mut self) {
        RECOVERING.with(|flag| flag.set(self.previous));
    }
}

/// 安装 panic hook
///
/// 受 [`recover`] 保护的 panic 只记录调用栈，交给中间件以结构化日志输出；
/// 其余 panic 仍交给原有的 hook。重复调用只安装一次。
pub fn install_panic_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if RECOVERING.with(Cell::get) {
                let stack = Backtrace::force_capture().to_string();
                LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(stack));
            } else {
                previous(info);
            }
        }));
    });
}

/// 取出当前线程最近一次 panic 的调用栈；hook 未捕获时在此处现场采集
fn take_backtrace() -> String {
    LAST_BACKTRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| Backtrace::force_capture().to_string())
}

/// 捕获内层处理器的 panic 并转换为错误
///
/// 应放在中间件列表的首位，才能覆盖其余所有中间件。
pub fn recover<Req, Resp>() -> Middleware<Handler<Req, Resp>>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    install_panic_hook();
    Arc::new(|next: Handler<Req, Resp>| -> Handler<Req, Resp> {
        Arc::new(move |ctx: Context, req: Req| -> BoxFuture<'static, Result<Resp, Error>> {
            let next = next.clone();
            Box::pin(async move {
                // 处理器构造 future 时也可能 panic，因此调用与等待都在保护范围内
                let mut guarded = AssertUnwindSafe(async move { next(ctx, req).await })
                    .catch_unwind()
                    .boxed();
                let outcome = future::poll_fn(|cx| {
                    let _scope = RecoverScope::enter();
                    guarded.poll_unpin(cx)
                })
                .await;
                match outcome {
                    Ok(result) => result,
                    Err(payload) => {
                        let err = Error::from_panic(payload, take_backtrace());
                        tracing::error!("{err}");
                        Err(err)
                    }
                }
            })
        })
    })
}
