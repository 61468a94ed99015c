use clap::Parser;

#[derive(Parser)]
#[command(name = "aigw", about = "AI gateway external processor")]
pub(crate) struct Cli {
    /// Filter-configuration document (YAML or JSON).
    #[arg(long, env = "AIGW_CONFIG", default_value = "/etc/ai-gateway/config.yaml")]
    pub(crate) config: String,
    /// gRPC listen address for the ext_proc service.
    #[arg(long, env = "AIGW_LISTEN", default_value = "0.0.0.0:1063")]
    pub(crate) listen: String,
    /// GCP token-rotator config files; one scheduler is spawned per file.
    #[arg(long = "gcp-rotator-config")]
    pub(crate) gcp_rotator_configs: Vec<String>,
}
