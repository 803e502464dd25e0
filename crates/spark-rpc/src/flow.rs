//! # flow 模块说明
//!
//! ## 角色定位（Why）
//! - 流程标识把一条逻辑请求链在不同进程中的日志串联起来；
//! - 它在入口处（网关请求、或没有流程的客户端调用）生成一次，之后只读传递。
//!
//! ## 传播规则（What）
//! - 进程内：随 [`CallContext`] 按值传递；
//! - 跨进程：出站调用时写入单个元数据键 [`FLOW_ID_KEY`]，入站分发时读回并恢复；
//! - 入站请求缺少该键时服务端照常处理，相关性只是尽力而为，从不影响正确性。

use std::{fmt, sync::Arc};

use uuid::Uuid;

use crate::{context::CallContext, wire::Metadata};

/// 承载流程标识的线上元数据键。
pub const FLOW_ID_KEY: &str = "flow_id";

/// 不可变的流程标识。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FlowId(Arc<str>);

impl FlowId {
    /// 生成全局唯一的流程标识（UUID v4，无连字符）。
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().simple().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FlowId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 生成新的流程标识并返回携带它的上下文。
pub fn new_flow() -> CallContext {
    CallContext::new().set_flow(FlowId::generate())
}

/// 把已有流程标识附加到上下文上（服务端延续调用方发起的流程）。
pub fn with_flow(ctx: CallContext, flow: FlowId) -> CallContext {
    ctx.set_flow(flow)
}

/// 从上下文中取出流程标识。
pub fn from_context(ctx: &CallContext) -> Option<&FlowId> {
    ctx.flow()
}

/// 若上下文缺少流程标识则补发一个。
pub fn ensure_flow(ctx: CallContext) -> CallContext {
    if ctx.flow().is_some() {
        ctx
    } else {
        ctx.set_flow(FlowId::generate())
    }
}

/// 出站：把流程标识写入线上元数据。
pub fn inject(ctx: &CallContext, metadata: &mut Metadata) {
    if let Some(flow) = ctx.flow() {
        metadata.insert(FLOW_ID_KEY.to_owned(), flow.as_str().to_owned());
    }
}

/// 入站：从线上元数据恢复流程标识；键缺失或为空时原样返回上下文。
pub fn restore(ctx: CallContext, metadata: &Metadata) -> CallContext {
    match metadata.get(FLOW_ID_KEY) {
        Some(value) if !value.is_empty() => with_flow(ctx, FlowId::from(value.as_str())),
        _ => ctx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_flows_are_unique() {
        let a = new_flow();
        let b = new_flow();
        assert_ne!(from_context(&a), from_context(&b), "独立请求链不得复用流程标识");
    }

    #[test]
    fn metadata_round_trip_keeps_identifier() {
        let ctx = with_flow(CallContext::new(), FlowId::from("abc123"));
        let mut metadata = Metadata::new();
        inject(&ctx, &mut metadata);
        assert_eq!(metadata.get(FLOW_ID_KEY).map(String::as_str), Some("abc123"));

        let restored = restore(CallContext::new(), &metadata);
        assert_eq!(restored.flow().map(FlowId::as_str), Some("abc123"));
    }

    #[test]
    fn missing_key_is_tolerated() {
        let restored = restore(CallContext::new(), &Metadata::new());
        assert!(restored.flow().is_none());

        let kept = ensure_flow(with_flow(CallContext::new(), FlowId::from("keep")));
        assert_eq!(kept.flow().map(FlowId::as_str), Some("keep"));
    }
}
