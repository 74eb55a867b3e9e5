//! Configuration: CLI flags (via `clap`) layered with environment variables,
//! resolved into a single [`KubeZabbixConfig`] consumed by the rest of the
//! daemon. Mirrors the corpus's defaults-then-override-then-validate shape.

use std::time::Duration;

use clap::Parser;

use crate::errors::{ConfigError, ConfigResult};

/// How the cluster client should obtain credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMode {
    InCluster,
    Kubeconfig,
    Explicit {
        host: String,
        token: String,
        verify_ssl: bool,
    },
}

/// How pod discovery descriptors are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerCrawling {
    /// One discovery entry per pod.
    Pod,
    /// One discovery entry per container within a pod.
    Container,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "kube-zabbix-rs",
    about = "Watches a Kubernetes cluster and forwards a discovery/metrics feed to a monitoring backend"
)]
pub struct Args {
    /// Seconds between discovery enumerations per resource kind.
    #[arg(long, env = "KUBE_ZABBIX_DISCOVERY_INTERVAL", default_value_t = 3600)]
    pub discovery_interval: u64,

    /// Seconds between full resends / aggregations per resource kind.
    #[arg(long, env = "KUBE_ZABBIX_DATA_RESEND_INTERVAL", default_value_t = 300)]
    pub data_resend_interval: u64,

    /// Minimum gap between full relists of a resource kind.
    #[arg(long, env = "KUBE_ZABBIX_DATA_REFRESH_INTERVAL", default_value_t = 900)]
    pub data_refresh_interval: u64,

    /// Startup delay before the first discovery run.
    #[arg(long, env = "KUBE_ZABBIX_DISCOVERY_INTERVAL_DELAY", default_value_t = 10)]
    pub discovery_interval_delay: u64,

    /// Startup delay before the first resend run.
    #[arg(long, env = "KUBE_ZABBIX_DATA_RESEND_INTERVAL_DELAY", default_value_t = 20)]
    pub data_resend_interval_delay: u64,

    /// Minimum interval between sends of the same record to the same sink.
    #[arg(long, env = "KUBE_ZABBIX_RATE_LIMIT_SECONDS", default_value_t = 30)]
    pub rate_limit_seconds: u64,

    /// Heartbeat period.
    #[arg(long, env = "KUBE_ZABBIX_API_ZABBIX_INTERVAL", default_value_t = 60)]
    pub api_zabbix_interval: u64,

    /// Server-side timeout for watch streams.
    #[arg(long, env = "KUBE_ZABBIX_K8S_API_STREAM_TIMEOUT_SECONDS", default_value_t = 30)]
    pub k8s_api_stream_timeout_seconds: u64,

    /// Client-side timeout for list/watch requests.
    #[arg(long, env = "KUBE_ZABBIX_K8S_API_REQUEST_TIMEOUT_SECONDS", default_value_t = 10)]
    pub k8s_api_request_timeout_seconds: u64,

    /// Regex; namespaces matching it are filtered out at projection time.
    #[arg(long, env = "KUBE_ZABBIX_NAMESPACE_EXCLUDE_RE")]
    pub namespace_exclude_re: Option<String>,

    /// "pod" or "container".
    #[arg(long, env = "KUBE_ZABBIX_CONTAINER_CRAWLING", default_value = "pod")]
    pub container_crawling: String,

    /// Comma-separated resource kinds to omit from the whole pipeline.
    #[arg(long, env = "KUBE_ZABBIX_RESOURCES_EXCLUDE", default_value = "")]
    pub resources_exclude: String,

    /// Comma-separated resource kinds to omit from metric emission.
    #[arg(long, env = "KUBE_ZABBIX_ZABBIX_RESOURCES_EXCLUDE", default_value = "")]
    pub zabbix_resources_exclude: String,

    /// Comma-separated resource kinds to omit from inventory emission.
    #[arg(long, env = "KUBE_ZABBIX_WEB_API_RESOURCES_EXCLUDE", default_value = "")]
    pub web_api_resources_exclude: String,

    /// If true, metric sink calls are replaced by a no-op.
    #[arg(long, env = "KUBE_ZABBIX_ZABBIX_DRY_RUN", default_value_t = false)]
    pub zabbix_dry_run: bool,

    #[arg(long, env = "KUBE_ZABBIX_ZABBIX_DEBUG", default_value_t = false)]
    pub zabbix_debug: bool,

    #[arg(long, env = "KUBE_ZABBIX_ZABBIX_SINGLE_DEBUG", default_value_t = false)]
    pub zabbix_single_debug: bool,

    /// Enable the inventory HTTP sink.
    #[arg(long, env = "KUBE_ZABBIX_WEB_API_ENABLE", default_value_t = false)]
    pub web_api_enable: bool,

    #[arg(long, env = "KUBE_ZABBIX_METRIC_SINK_HOST", default_value = "127.0.0.1")]
    pub metric_sink_host: String,

    #[arg(long, env = "KUBE_ZABBIX_METRIC_SINK_PORT", default_value_t = 10051)]
    pub metric_sink_port: u16,

    #[arg(long, env = "KUBE_ZABBIX_INVENTORY_BASE_URL", default_value = "http://127.0.0.1:8080")]
    pub inventory_base_url: String,

    /// Logical host label attached to every metric triple.
    #[arg(long, env = "KUBE_ZABBIX_ZABBIX_HOST", default_value = "kubernetes")]
    pub zabbix_host: String,

    /// Cluster name attached to inventory payloads.
    #[arg(long, env = "KUBE_ZABBIX_CLUSTER_NAME", default_value = "default")]
    pub cluster_name: String,

    /// "in_cluster", "kubeconfig" or "explicit".
    #[arg(long, env = "KUBE_ZABBIX_K8S_CONFIG_TYPE", default_value = "kubeconfig")]
    pub k8s_config_type: String,

    #[arg(long, env = "KUBE_ZABBIX_K8S_CONTEXT")]
    pub k8s_context: Option<String>,

    #[arg(long, env = "KUBE_ZABBIX_K8S_HOST")]
    pub k8s_host: Option<String>,

    #[arg(long, env = "KUBE_ZABBIX_K8S_TOKEN")]
    pub k8s_token: Option<String>,

    #[arg(long, env = "KUBE_ZABBIX_K8S_VERIFY_SSL", default_value_t = true)]
    pub k8s_verify_ssl: bool,

    /// `tracing_subscriber::EnvFilter` directive, e.g. "info" or "kube_zabbix_rs=debug".
    #[arg(long, env = "KUBE_ZABBIX_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Fully resolved, validated configuration consumed by the scheduler.
#[derive(Debug, Clone)]
pub struct KubeZabbixConfig {
    pub discovery_interval: Duration,
    pub data_resend_interval: Duration,
    pub data_refresh_interval: Duration,
    pub discovery_interval_delay: Duration,
    pub data_resend_interval_delay: Duration,
    pub rate_limit_seconds: Duration,
    pub api_zabbix_interval: Duration,
    pub k8s_api_stream_timeout_seconds: Duration,
    pub k8s_api_request_timeout_seconds: Duration,
    pub namespace_exclude_re: Option<String>,
    pub container_crawling: ContainerCrawling,
    pub resources_exclude: Vec<String>,
    pub zabbix_resources_exclude: Vec<String>,
    pub web_api_resources_exclude: Vec<String>,
    pub zabbix_dry_run: bool,
    pub zabbix_debug: bool,
    pub zabbix_single_debug: bool,
    pub web_api_enable: bool,
    pub metric_sink_host: String,
    pub metric_sink_port: u16,
    pub inventory_base_url: String,
    pub zabbix_host: String,
    pub cluster_name: String,
    pub client_mode: ClientMode,
    pub k8s_context: Option<String>,
    pub log_level: String,
}

fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

impl KubeZabbixConfig {
    /// Resolve CLI args (already merged with environment overrides by `clap`'s
    /// `env` attribute) into a validated configuration.
    pub fn from_args(args: Args) -> ConfigResult<Self> {
        let container_crawling = match args.container_crawling.as_str() {
            "pod" => ContainerCrawling::Pod,
            "container" => ContainerCrawling::Container,
            other => {
                return Err(ConfigError::invalid(
                    "container_crawling",
                    other,
                    "pod or container",
                ))
            }
        };

        let client_mode = match args.k8s_config_type.as_str() {
            "in_cluster" => ClientMode::InCluster,
            "kubeconfig" => ClientMode::Kubeconfig,
            "explicit" => {
                let host = args
                    .k8s_host
                    .clone()
                    .ok_or_else(|| ConfigError::MissingRequired {
                        field: "k8s_host".into(),
                    })?;
                let token = args
                    .k8s_token
                    .clone()
                    .ok_or_else(|| ConfigError::MissingRequired {
                        field: "k8s_token".into(),
                    })?;
                ClientMode::Explicit {
                    host,
                    token,
                    verify_ssl: args.k8s_verify_ssl,
                }
            }
            other => return Err(ConfigError::UnknownClientMode(other.to_string())),
        };

        if let Some(re) = &args.namespace_exclude_re {
            regex::Regex::new(re).map_err(|e| {
                ConfigError::invalid("namespace_exclude_re", re.clone(), e.to_string())
            })?;
        }

        Ok(Self {
            discovery_interval: Duration::from_secs(args.discovery_interval),
            data_resend_interval: Duration::from_secs(args.data_resend_interval),
            data_refresh_interval: Duration::from_secs(args.data_refresh_interval),
            discovery_interval_delay: Duration::from_secs(args.discovery_interval_delay),
            data_resend_interval_delay: Duration::from_secs(args.data_resend_interval_delay),
            rate_limit_seconds: Duration::from_secs(args.rate_limit_seconds),
            api_zabbix_interval: Duration::from_secs(args.api_zabbix_interval),
            k8s_api_stream_timeout_seconds: Duration::from_secs(args.k8s_api_stream_timeout_seconds),
            k8s_api_request_timeout_seconds: Duration::from_secs(args.k8s_api_request_timeout_seconds),
            namespace_exclude_re: args.namespace_exclude_re,
            container_crawling,
            resources_exclude: split_csv(&args.resources_exclude),
            zabbix_resources_exclude: split_csv(&args.zabbix_resources_exclude),
            web_api_resources_exclude: split_csv(&args.web_api_resources_exclude),
            zabbix_dry_run: args.zabbix_dry_run,
            zabbix_debug: args.zabbix_debug,
            zabbix_single_debug: args.zabbix_single_debug,
            web_api_enable: args.web_api_enable,
            metric_sink_host: args.metric_sink_host,
            metric_sink_port: args.metric_sink_port,
            inventory_base_url: args.inventory_base_url,
            zabbix_host: args.zabbix_host,
            cluster_name: args.cluster_name,
            client_mode,
            k8s_context: args.k8s_context,
            log_level: args.log_level,
        })
    }

    /// A configuration with short intervals, useful for tests.
    pub fn testing() -> Self {
        Self {
            discovery_interval: Duration::from_millis(50),
            data_resend_interval: Duration::from_millis(50),
            data_refresh_interval: Duration::from_secs(3600),
            discovery_interval_delay: Duration::from_millis(0),
            data_resend_interval_delay: Duration::from_millis(0),
            rate_limit_seconds: Duration::from_secs(30),
            api_zabbix_interval: Duration::from_secs(60),
            k8s_api_stream_timeout_seconds: Duration::from_secs(30),
            k8s_api_request_timeout_seconds: Duration::from_secs(10),
            namespace_exclude_re: None,
            container_crawling: ContainerCrawling::Pod,
            resources_exclude: Vec::new(),
            zabbix_resources_exclude: Vec::new(),
            web_api_resources_exclude: Vec::new(),
            zabbix_dry_run: false,
            zabbix_debug: false,
            zabbix_single_debug: false,
            web_api_enable: false,
            metric_sink_host: "127.0.0.1".into(),
            metric_sink_port: 10051,
            inventory_base_url: "http://127.0.0.1:8080".into(),
            zabbix_host: "kubernetes".into(),
            cluster_name: "test".into(),
            client_mode: ClientMode::Kubeconfig,
            k8s_context: None,
            log_level: "info".into(),
        }
    }
}
