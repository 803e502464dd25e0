//! 有界重试。
//!
//! # 教案式说明
//! - **意图 (Why)**：单个后端失败（熔断打开、连接中断）时，重新进入轮询选择器，
//!   让下一次尝试自然落到其他后端；
//! - **契约 (What)**：
//!   - 最多 `max_attempts` 次尝试，且总耗时不超过 `max_time`；两者任一耗尽即停止并返回最后一次错误；
//!   - 尝试之间不休眠，退避只体现为受时间约束的立即重试；
//!   - 调用方截止时间独立于 `max_time`：截止时间到达后不再发起新的尝试，返回 `DeadlineExceeded`；
//!   - 所有错误一律重试；
//! - **实现 (How)**：每次尝试都以 `min(调用方截止时间, 预算截止时间)` 为界，
//!   超过预算的在途尝试会被取消，因此总耗时最多超出一次在途调用的时长。

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::{
    error::RpcError,
    message::BoxMessage,
    operation::{Layer, Operation},
};

/// 重试策略。
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub max_time: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_time: Duration::from_secs(3),
        }
    }
}

impl Layer for RetryPolicy {
    fn wrap(&self, inner: Operation) -> Operation {
        let policy = *self;
        Operation::new(move |ctx, request| {
            let inner = inner.clone();
            async move {
                let budget_end = Instant::now().checked_add(policy.max_time);
                let stop_at = match (ctx.deadline(), budget_end) {
                    (Some(deadline), Some(budget_end)) => Some(deadline.min(budget_end)),
                    (deadline, budget_end) => deadline.or(budget_end),
                };
                let mut last_error: Option<RpcError> = None;

                for attempt in 1..=policy.max_attempts.max(1) {
                    if ctx.is_expired() {
                        return Err(RpcError::DeadlineExceeded);
                    }
                    if budget_end.is_some_and(|end| Instant::now() >= end) {
                        break;
                    }
                    let attempt_call = inner.call(ctx.clone(), request.clone());
                    let outcome = match stop_at {
                        Some(stop_at) => tokio::time::timeout_at(stop_at, attempt_call).await,
                        None => Ok(attempt_call.await),
                    };
                    match outcome {
                        Ok(Ok(response)) => return Ok::<BoxMessage, RpcError>(response),
                        Ok(Err(err)) => {
                            debug!(attempt, error = %err, "attempt failed");
                            last_error = Some(err);
                        }
                        Err(_) if ctx.is_expired() => return Err(RpcError::DeadlineExceeded),
                        Err(_) => break,
                    }
                }
                Err(last_error.unwrap_or(RpcError::DeadlineExceeded))
            }
        })
    }
}
