//! 遥测：阶段进度事件、按会话的广播器与传输信封

pub mod broker;
pub mod event;
pub mod transport;

pub use broker::{SubscriberId, Subscription, TelemetryBroker};
pub use event::{AgentStatus, TelemetryEvent};
pub use transport::TelemetryEnvelope;
