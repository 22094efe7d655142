use crate::config::toml_config::{ForwarderConfig, ProxyConfig, ServerConfig, TransportKind};
use crate::utils::error::Result;
use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    Curl,
    Native,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Curl => TransportKind::Curl,
            TransportArg::Native => TransportKind::Native,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "card-proxy")]
#[command(about = "API proxy for the character card editor")]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Override the bind host
    #[arg(long)]
    pub host: Option<String>,

    /// Override the bind port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Override the forwarding transport
    #[arg(long, value_enum)]
    pub transport: Option<TransportArg>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,
}

impl CliArgs {
    /// 載入配置檔（若有）並套用命令列覆蓋
    pub fn load_config(&self) -> Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::from_file(path)?,
            None => ProxyConfig::default(),
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut ProxyConfig) {
        if self.host.is_some() || self.port.is_some() {
            let server = config.server.get_or_insert_with(ServerConfig::default);
            if let Some(host) = &self.host {
                server.host = Some(host.clone());
            }
            if let Some(port) = self.port {
                server.port = Some(port);
            }
        }

        if let Some(transport) = self.transport {
            config
                .forwarder
                .get_or_insert_with(ForwarderConfig::default)
                .transport = Some(transport.into());
        }
    }
}
