//! 内置回显服务，供冒烟测试与演示配置使用。
//!
//! 类型标识：`spark.EchoRequest`、`spark.EchoReply`、契约 `spark.EchoServer`、处理器 `spark.EchoService`，
//! 契约方法为 `Echo`。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use spark_rpc::{CallContext, Handler, Message, MethodTable, RpcResult, ServiceContract, TypeRegistry};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EchoRequest {
    pub text: String,
    #[serde(default)]
    pub repeat: u32,
}

impl Message for EchoRequest {
    const NAME: &'static str = "spark.EchoRequest";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EchoReply {
    pub text: String,
    pub flow_id: String,
}

impl Message for EchoReply {
    const NAME: &'static str = "spark.EchoReply";
}

pub struct EchoContract;

impl ServiceContract for EchoContract {
    const NAME: &'static str = "spark.EchoServer";
    const METHODS: &'static [&'static str] = &["Echo"];
}

#[derive(Default)]
pub struct EchoService;

impl EchoService {
    async fn echo(self: Arc<Self>, ctx: CallContext, req: EchoRequest) -> RpcResult<EchoReply> {
        Ok(EchoReply {
            text: req.text.repeat(req.repeat.max(1) as usize),
            flow_id: ctx.flow().map(|flow| flow.to_string()).unwrap_or_default(),
        })
    }
}

impl Handler for EchoService {
    const NAME: &'static str = "spark.EchoService";

    fn methods() -> MethodTable<Self> {
        MethodTable::new().method("Echo", Self::echo)
    }
}

/// 把回显服务的全部类型登记到注册表。
pub fn register_types(registry: &mut TypeRegistry) -> RpcResult<()> {
    registry.register_message::<EchoRequest>()?;
    registry.register_message::<EchoReply>()?;
    registry.register_contract::<EchoContract>()?;
    registry.register_handler::<EchoService>()?;
    Ok(())
}
