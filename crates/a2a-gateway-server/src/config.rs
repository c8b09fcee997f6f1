//! Gateway configuration from flags and environment.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use a2a_gateway_tasks::TaskManagerConfig;
use clap::Parser;

/// A2A agent gateway.
#[derive(Debug, Clone, Parser)]
#[command(name = "a2a-gateway", version, about = "A2A agent gateway")]
pub struct GatewayConfig {
    /// Address to listen on.
    #[arg(long, env = "A2A_GATEWAY_BIND", default_value = "0.0.0.0:8083")]
    pub bind: SocketAddr,

    /// Path prefix under which agents are served as `{prefix}/{namespace}/{name}`.
    #[arg(long, env = "A2A_GATEWAY_ROUTE_PREFIX", default_value = "/api/a2a")]
    pub route_prefix: String,

    /// Bound on `message/send` and on a whole `message/stream`, in seconds.
    #[arg(long, env = "A2A_GATEWAY_EXECUTION_TIMEOUT_SECS", default_value_t = 300)]
    pub execution_timeout_secs: u64,

    /// Events buffered per open stream before the backend is paused.
    #[arg(
        long,
        env = "A2A_GATEWAY_STREAM_BUFFER",
        default_value_t = 64,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub stream_buffer: u32,

    /// JSON file with agents to register at startup.
    #[arg(long, env = "A2A_GATEWAY_AGENTS_FILE")]
    pub agents_file: Option<PathBuf>,
}

impl GatewayConfig {
    #[must_use]
    pub const fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    #[must_use]
    pub const fn task_config(&self) -> TaskManagerConfig {
        TaskManagerConfig {
            execution_timeout: self.execution_timeout(),
        }
    }

    #[must_use]
    pub const fn stream_buffer(&self) -> usize {
        self.stream_buffer as usize
    }
}
