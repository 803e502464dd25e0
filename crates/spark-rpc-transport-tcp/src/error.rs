use std::io;

use spark_rpc::RpcError;
use thiserror::Error;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: "rpc.transport.tcp.bind_failed",
    message: "tcp bind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "rpc.transport.tcp.accept_failed",
    message: "tcp accept",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "rpc.transport.tcp.connect_failed",
    message: "tcp connect",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "rpc.transport.tcp.read_failed",
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "rpc.transport.tcp.write_failed",
    message: "tcp write",
};

const CLOSED_CODE: &str = "rpc.transport.tcp.closed";
const TIMEOUT_CODE: &str = "rpc.transport.tcp.timeout";
const FRAME_CODE: &str = "rpc.transport.tcp.bad_frame";

/// 分帧层错误：IO 失败或帧内容不合法。
#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("malformed frame header: {0}")]
    Header(#[from] serde_json::Error),
    #[error("frame of {len} bytes is shorter than its declared header of {header} bytes")]
    Truncated { len: usize, header: usize },
}

impl FrameError {
    /// 映射为框架错误；IO 失败沿用操作的错误码。
    pub(crate) fn into_rpc(self, kind: OperationKind) -> RpcError {
        match self {
            FrameError::Io(err) => map_io_error(kind, err),
            other => RpcError::Transport {
                code: FRAME_CODE,
                detail: format!("{}: {other}", kind.message),
            },
        }
    }
}

/// 将 IO 错误映射为带稳定错误码的传输错误。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> RpcError {
    RpcError::Transport {
        code: kind.code,
        detail: format!("{}: {}", kind.message, error),
    }
}

/// 对端在响应到达前关闭了连接。
pub(crate) fn closed_error(kind: OperationKind) -> RpcError {
    RpcError::Transport {
        code: CLOSED_CODE,
        detail: format!("{}: connection closed by peer", kind.message),
    }
}

/// 建连超时。
pub(crate) fn timeout_error(kind: OperationKind) -> RpcError {
    RpcError::Transport {
        code: TIMEOUT_CODE,
        detail: format!("{} timed out", kind.message),
    }
}
