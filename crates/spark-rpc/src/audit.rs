//! # audit 模块说明
//!
//! ## 角色定位（Why）
//! - 每次调用在服务端入口、客户端出口与网关边界各留下一条自包含的审计记录，
//!   记录自带时间戳与耗时，日志被重排也不会失去单请求的连贯性；
//! - 借助流程标识，网关、客户端与服务端三处的记录可以被串联起来。
//!
//! ## 日志目标（What）
//! - `spark_rpc::request_in`：服务端入站；
//! - `spark_rpc::request_out`：客户端出站；
//! - `spark_rpc::gateway`：网关边界；
//! - 字段：`ts`、`method`、`flow_id`、`addr`、`request`、`response`、`error`、`took_us`。

use std::{sync::Arc, time::Duration};

use tracing::info;

use crate::{
    context::CallContext,
    error::{RpcError, RpcResult},
    message::BoxMessage,
    operation::{Layer, Operation},
};

/// 日志目标：服务端入站审计。
pub const TARGET_REQUEST_IN: &str = "spark_rpc::request_in";
/// 日志目标：客户端出站审计。
pub const TARGET_REQUEST_OUT: &str = "spark_rpc::request_out";
/// 日志目标：网关审计。
pub const TARGET_GATEWAY: &str = "spark_rpc::gateway";

/// 审计记录所处的边界。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
    Gateway,
}

/// 一条审计记录。
#[derive(Debug)]
pub struct AuditRecord<'a> {
    pub ts: String,
    pub method: &'a str,
    pub ctx: &'a CallContext,
    pub request: String,
    pub response: String,
    pub error: Option<&'a RpcError>,
    pub took: Duration,
}

/// 本地时间戳，精确到微秒。
pub fn timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string()
}

/// 输出审计记录。
pub fn emit(direction: Direction, record: &AuditRecord<'_>) {
    let flow_id = record.ctx.flow().map(|flow| flow.as_str()).unwrap_or("-");
    let addr = record
        .ctx
        .peer()
        .map(|peer| peer.to_string())
        .unwrap_or_else(|| "-".to_owned());
    let error = record.error.map(ToString::to_string).unwrap_or_default();
    let took_us = u64::try_from(record.took.as_micros()).unwrap_or(u64::MAX);
    match direction {
        Direction::Inbound => info!(
            target: TARGET_REQUEST_IN,
            ts = %record.ts,
            addr = %addr,
            flow_id = %flow_id,
            method = %record.method,
            request = %record.request,
            response = %record.response,
            error = %error,
            took_us,
            "request in"
        ),
        Direction::Outbound => info!(
            target: TARGET_REQUEST_OUT,
            ts = %record.ts,
            flow_id = %flow_id,
            method = %record.method,
            request = %record.request,
            response = %record.response,
            error = %error,
            took_us,
            "request out"
        ),
        Direction::Gateway => info!(
            target: TARGET_GATEWAY,
            ts = %record.ts,
            addr = %addr,
            flow_id = %flow_id,
            method = %record.method,
            request = %record.request,
            response = %record.response,
            error = %error,
            took_us,
            "gateway request"
        ),
    }
}

/// 为操作附加审计日志的中间件。
pub struct AuditLayer {
    direction: Direction,
    method: Arc<str>,
}

impl AuditLayer {
    pub fn new(direction: Direction, method: &str) -> Self {
        Self {
            direction,
            method: Arc::from(method),
        }
    }
}

impl Layer for AuditLayer {
    fn wrap(&self, inner: Operation) -> Operation {
        let direction = self.direction;
        let method = self.method.clone();
        Operation::new(move |ctx, request| {
            let inner = inner.clone();
            let method = method.clone();
            async move {
                let ts = timestamp();
                let started = std::time::Instant::now();
                let result: RpcResult<BoxMessage> = inner.call(ctx.clone(), request.clone()).await;
                let (response, error) = match &result {
                    Ok(response) => (response.to_log_string(), None),
                    Err(err) => (String::new(), Some(err)),
                };
                emit(
                    direction,
                    &AuditRecord {
                        ts,
                        method: &method,
                        ctx: &ctx,
                        request: request.to_log_string(),
                        response,
                        error,
                        took: started.elapsed(),
                    },
                );
                result
            }
        })
    }
}
