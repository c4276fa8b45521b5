pub mod schema;

pub use schema::{
    AgentConfig, ChannelsConfig, Config, GatewayConfig, ObservabilityConfig, QueueConfig,
    TelegramConfig, ToolServerConfig, WorkspaceConfig,
};
