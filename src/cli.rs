use clap::Parser;
use std::path::PathBuf;

use crate::model::Theme;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "podterm",
    version,
    about = "Interactive shell sessions into Kubernetes pods through a cluster dashboard."
)]
pub struct CliArgs {
    /// Pod to open a shell in
    pub pod: String,

    /// Namespace of the pod (defaults to the kube context namespace)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Container to attach to (defaults to the first declared container)
    #[arg(short, long)]
    pub container: Option<String>,

    /// Shell binary, for example sh, bash or /bin/zsh
    #[arg(short, long)]
    pub shell: Option<String>,

    /// Dashboard base URL (http, https, ws or wss)
    #[arg(long, env = "PODTERM_SERVER")]
    pub server: Option<String>,

    /// Cluster id as known to the dashboard (defaults to the kube context name)
    #[arg(long)]
    pub cluster: Option<String>,

    /// Kubeconfig context used to list containers
    #[arg(long)]
    pub context: Option<String>,

    /// Bearer token for the shell endpoint
    #[arg(long, env = "PODTERM_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Colour theme: dark or light
    #[arg(long, value_parser = parse_theme)]
    pub theme: Option<Theme>,

    /// tracing filter (for example: info,podterm=debug)
    #[arg(long, default_value = "info")]
    pub log_filter: String,

    /// Write logs to this file instead of discarding them
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Skip the Kubernetes API; requires --container
    #[arg(long)]
    pub no_kube: bool,
}

fn parse_theme(value: &str) -> Result<Theme, String> {
    Theme::from_token(value)
        .ok_or_else(|| format!("unknown theme '{value}', expected dark or light"))
}
