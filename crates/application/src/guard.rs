//! 后台任务的故障边界
//!
//! 泵和持久化任务都是分离运行的；任务内部的 panic 在这里被捕获并记录，
//! 只终结该任务本身，不会波及分发循环或其他连接。

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

/// 运行 `task`，若其 panic 则记录日志并返回 `false`
///
/// panic 发生处的调用栈由默认 panic hook 输出（需设置 `RUST_BACKTRACE`）。
pub(crate) async fn guarded<F>(task: &'static str, fut: F) -> bool
where
    F: Future<Output = ()>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(()) => true,
        Err(panic) => {
            tracing::error!(task, panic = %panic_message(&*panic), "background task panicked");
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
