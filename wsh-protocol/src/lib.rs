//! Wire types shared by every component of the wsh RPC fabric: the
//! [`RpcMessage`] envelope, the [`RpcContext`] identity bound to a link at
//! authentication time, well-known route names, and the error-kind
//! vocabulary used to format terminal error responses.

mod command;
mod context;
mod error;
mod message;
mod route;

pub use command::CommandDeclaration;
pub use command::CommandType;
pub use context::RpcContext;
pub use error::ErrorKind;
pub use error::is_timeout_error;
pub use error::no_route_error;
pub use error::timeout_error;
pub use message::FrameKind;
pub use message::MessageValidationError;
pub use message::RpcMessage;
pub use route::CONTROL_ROOT_ROUTE;
pub use route::CONTROL_ROUTE;
pub use route::DEFAULT_ROUTE;
pub use route::conn_route;
pub use route::controller_route;
pub use route::feblock_route;
pub use route::is_control_route;
pub use route::proc_route;
pub use route::tab_route;

/// Default RPC timeout per §4.2/§5: `timeoutMs <= 0` on a request is
/// normalized to this value.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 5000;
