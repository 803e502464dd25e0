#![doc = r#"
# spark-rpc-gateway

## 设计动机（Why）
- 把任意 HTTP 请求翻译为强类型 RPC 调用：外部方法名来自请求参数（缺省为 URL 路径），
  内部方法名与请求类型来自客户端注册信息；
- 参数来源松散（查询串、表单、JSON），因此请求实例经“值袋 → JSON → 类型”两步宽松转换得到，
  数字样式的字符串可以填充数值字段。

## 核心契约（What）
- [`HttpGateway::register`] 安装外部名到内部方法的映射，重复外部名返回 `AlreadyRegistered`；
- [`HttpGateway::router`] 返回接收任意路径与动词的 `axum::Router`；
- [`HttpGateway::serve`] 只能启动一次，第二次返回 [`GatewayError::AlreadyRunning`]；
- 每个请求生成新的流程标识，并输出一条 `spark_rpc::gateway` 审计记录；
  下游 RPC 调用沿用同一流程标识。
"#]

pub mod decode;
mod error;
mod gateway;

pub use error::GatewayError;
pub use gateway::{DEFAULT_TIMEOUT, HttpGateway, MAX_BODY_BYTES};
