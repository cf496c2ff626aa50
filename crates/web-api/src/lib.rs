//! WebSocket 传输层。
//!
//! 负责连接生命周期、帧解析和事件路由；所有协调语义都在
//! application 层，这里不做业务判断。

pub mod registry;
pub mod routes;
pub mod state;
pub mod ws;

pub use registry::ConnectionRegistry;
pub use routes::router;
pub use state::AppState;
