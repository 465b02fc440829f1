//! chat-adapters: implementaciones con efectos de los contratos del core.
//!
//! - `http`: ejecutor HTTP saliente (reqwest blocking) para webhooks y
//!   api_call externas, con timeout duro por request.
//! - `internal`: registro de handlers in-process para api_call con
//!   `auth_type=internal`.
//! - `script`: sandbox de scripts por subproceso con deadline.

pub mod http;
pub mod internal;
pub mod script;

pub use http::ReqwestHttpExecutor;
pub use internal::InternalHandlerRegistry;
pub use script::SubprocessScriptExecutor;
