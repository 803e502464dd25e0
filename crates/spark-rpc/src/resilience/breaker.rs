//! 熔断器：连续失败后快速失败，冷却期过后放行试探调用。
//!
//! # 教案式说明
//! - **意图 (Why)**：把一个持续失败的后端隔离出去，避免每次调用都耗尽网络超时；
//! - **状态机 (What)**：
//!   - `Closed`：放行全部调用；连续失败次数 **超过** `trip_after` 时转入 `Open`；
//!   - `Open`：直接返回 [`RpcError::BreakerOpen`]；`open_for` 到期后转入 `HalfOpen`；
//!   - `HalfOpen`：最多放行 `max_half_open` 个试探调用；试探连续成功达到该数目即回到 `Closed`，
//!     任一试探失败立即回到 `Open`；
//! - **实现 (How)**：
//!   - 状态保存在 `parking_lot::Mutex` 中，临界区只做计数，不跨越 `.await`；
//!   - 每次状态切换递增代号（generation），旧代号调用的结果会被丢弃，避免过期结果污染新周期；
//!   - 许可 [`Permit`] 在被丢弃而未登记结果时按失败处理，调用被超时取消也不会泄漏试探名额。

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::{
    error::{RpcError, RpcResult},
    message::BoxMessage,
    operation::{Layer, Operation},
};

/// 熔断器配置。
#[derive(Clone, Debug)]
pub struct BreakerSettings {
    /// 名称，出现在错误与日志中，通常为方法名。
    pub name: String,
    /// 连续失败次数超过该值时熔断。
    pub trip_after: u32,
    /// 打开状态的持续时间。
    pub open_for: Duration,
    /// 半开状态允许的试探调用数。
    pub max_half_open: u32,
}

impl BreakerSettings {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_open_for(mut self, open_for: Duration) -> Self {
        self.open_for = open_for;
        self
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            trip_after: 5,
            open_for: Duration::from_secs(60),
            max_half_open: 1,
        }
    }
}

/// 熔断器状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    generation: u64,
    consecutive_failures: u32,
    consecutive_successes: u32,
    in_flight_trials: u32,
    open_until: Option<Instant>,
}

/// 熔断器。
#[derive(Debug)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                generation: 0,
                consecutive_failures: 0,
                consecutive_successes: 0,
                in_flight_trials: 0,
                open_until: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// 当前状态；打开期已过时会顺带切换到半开。
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    /// 申请一次调用许可。
    pub fn acquire(&self) -> RpcResult<Permit<'_>> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        match inner.state {
            BreakerState::Open => return Err(self.open_error()),
            BreakerState::HalfOpen => {
                if inner.in_flight_trials >= self.settings.max_half_open {
                    return Err(self.open_error());
                }
                inner.in_flight_trials += 1;
            }
            BreakerState::Closed => {}
        }
        Ok(Permit {
            breaker: self,
            generation: inner.generation,
            settled: false,
        })
    }

    /// 在熔断保护下执行一次异步调用。
    pub async fn call<T, Fut>(&self, fut: Fut) -> RpcResult<T>
    where
        Fut: std::future::Future<Output = RpcResult<T>>,
    {
        let permit = self.acquire()?;
        let result = fut.await;
        permit.settle(result.is_ok());
        result
    }

    fn open_error(&self) -> RpcError {
        RpcError::BreakerOpen {
            name: self.settings.name.clone(),
        }
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        if inner.state == BreakerState::Open
            && inner.open_until.is_some_and(|until| now >= until)
        {
            self.transition(inner, BreakerState::HalfOpen, now);
        }
    }

    fn record(&self, generation: u64, success: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.refresh(&mut inner, now);
        if inner.generation != generation {
            return;
        }
        match (inner.state, success) {
            (BreakerState::Closed, true) => inner.consecutive_failures = 0,
            (BreakerState::Closed, false) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures > self.settings.trip_after {
                    self.transition(&mut inner, BreakerState::Open, now);
                }
            }
            (BreakerState::HalfOpen, true) => {
                inner.in_flight_trials = inner.in_flight_trials.saturating_sub(1);
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.settings.max_half_open {
                    self.transition(&mut inner, BreakerState::Closed, now);
                }
            }
            (BreakerState::HalfOpen, false) => {
                self.transition(&mut inner, BreakerState::Open, now);
            }
            (BreakerState::Open, _) => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState, now: Instant) {
        if inner.state == to {
            return;
        }
        debug!(breaker = %self.settings.name, from = ?inner.state, to = ?to, "circuit breaker state changed");
        inner.state = to;
        inner.generation = inner.generation.wrapping_add(1);
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.in_flight_trials = 0;
        inner.open_until = match to {
            BreakerState::Open => Some(now + self.settings.open_for),
            _ => None,
        };
    }
}

/// 单次调用许可。
#[must_use = "许可必须通过 settle 登记调用结果"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl Permit<'_> {
    /// 登记调用结果。
    pub fn settle(mut self, success: bool) {
        self.settled = true;
        self.breaker.record(self.generation, success);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record(self.generation, false);
        }
    }
}

/// 把熔断器套在操作外层的中间件。
pub struct BreakerLayer {
    breaker: std::sync::Arc<CircuitBreaker>,
}

impl BreakerLayer {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            breaker: std::sync::Arc::new(CircuitBreaker::new(settings)),
        }
    }

    pub fn breaker(&self) -> &std::sync::Arc<CircuitBreaker> {
        &self.breaker
    }
}

impl Layer for BreakerLayer {
    fn wrap(&self, inner: Operation) -> Operation {
        let breaker = self.breaker.clone();
        Operation::new(move |ctx, request| {
            let breaker = breaker.clone();
            let inner = inner.clone();
            async move {
                breaker
                    .call::<BoxMessage, _>(inner.call(ctx, request))
                    .await
            }
        })
    }
}
