use clap::Parser;

#[derive(Debug, Clone, Parser)]
pub struct ControllerCmd {
    #[arg(short = 'f', long, help = "Config file path for the network controller")]
    pub file: Option<String>,

    #[arg(long = "http-port", help = "HTTP server serving port")]
    pub http_port: Option<u32>,

    #[arg(long = "https-port", help = "HTTPS server serving port for webhooks")]
    pub https_port: Option<u32>,

    #[arg(long = "tls-cert", help = "path to TLS Certificate for the webhook server")]
    pub tls_cert: Option<String>,

    #[arg(long = "tls-key", help = "path to TLS Key for the webhook server")]
    pub tls_key: Option<String>,

    #[arg(long = "requeue-interval", help = "Requeue interval of ready pods in seconds")]
    pub requeue_interval: Option<u64>,
}
