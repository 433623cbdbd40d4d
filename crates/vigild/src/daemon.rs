//! Daemon assembly: config → cluster client → probes → scheduler, plus the
//! metrics server, all tied to one shutdown channel.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};

use vigil_cluster::{ClusterApi, InMemoryCluster};
use vigil_core::{ClusterConfig, ProbeSpec, VigilConfig, format_duration};
use vigil_health::context::shutdown_signalled;
use vigil_health::{BuildContext, ProbeRegistry};
use vigil_metrics::MetricsCollector;
use vigil_scheduler::{ProbeSchedule, Scheduler, SchedulerError};

use crate::router::build_router;

/// Load and validate a config file.
pub fn load_config(path: &Path) -> anyhow::Result<(VigilConfig, Vec<ProbeSpec>)> {
    let config = VigilConfig::from_file(path)?;
    let specs = config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok((config, specs))
}

/// Read the bearer token, if one is configured.
pub fn read_token(cluster: &ClusterConfig) -> anyhow::Result<Option<String>> {
    let Some(path) = &cluster.token_file else {
        return Ok(None);
    };
    let token = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read token file {path}"))?;
    let token = token.trim();
    if token.is_empty() {
        anyhow::bail!("token file {path} is empty");
    }
    Ok(Some(token.to_string()))
}

/// Resolve every spec through the registry.
pub fn build_schedules(
    registry: &ProbeRegistry,
    specs: &[ProbeSpec],
    ctx: &BuildContext,
) -> anyhow::Result<Vec<ProbeSchedule>> {
    specs
        .iter()
        .map(|spec| {
            let probe = registry
                .build(spec, ctx)
                .with_context(|| format!("probe {}", spec.name))?;
            Ok(ProbeSchedule::from_spec(spec, probe))
        })
        .collect()
}

/// Check a config file without touching a cluster: parse, validate and
/// construct every probe against an in-memory backend.
pub fn validate(path: &Path) -> anyhow::Result<Vec<ProbeSchedule>> {
    let (config, specs) = load_config(path)?;
    let cluster: Arc<dyn ClusterApi> = Arc::new(InMemoryCluster::new());
    let ctx = BuildContext::new(cluster, &config.cluster.namespace);
    build_schedules(&ProbeRegistry::with_builtin_probes(), &specs, &ctx)
}

/// Run probes and serve metrics until `shutdown` fires.
pub async fn serve(
    config: VigilConfig,
    specs: Vec<ProbeSpec>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let token = read_token(&config.cluster)?;
    let cluster = vigil_cluster::connect(&config.cluster.api_server, token)
        .with_context(|| format!("cluster api server {}", config.cluster.api_server))?;
    info!(api_server = %config.cluster.api_server, namespace = %config.cluster.namespace, "cluster client ready");

    let registry = ProbeRegistry::with_builtin_probes();
    let ctx = BuildContext::new(cluster, &config.cluster.namespace);
    let schedules = build_schedules(&registry, &specs, &ctx)?;

    let collector = Arc::new(MetricsCollector::new());
    for schedule in &schedules {
        collector
            .register(schedule.probe.probe_type(), &schedule.name)
            .await;
        info!(
            probe = %schedule.name,
            probe_type = %schedule.probe.probe_type(),
            interval = %format_duration(schedule.interval),
            timeout = %format_duration(schedule.timeout),
            "probe configured"
        );
    }
    let scheduler = Scheduler::new(schedules, collector.clone())?;

    // ── Metrics server ─────────────────────────────────────────

    let addr: SocketAddr = config
        .metrics
        .listen
        .parse()
        .with_context(|| format!("invalid metrics listen address {}", config.metrics.listen))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "metrics server listening");

    let mut server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, build_router(collector))
            .with_graceful_shutdown(async move { shutdown_signalled(&mut server_shutdown).await })
            .await
    });

    // ── Probes ─────────────────────────────────────────────────

    let result = scheduler.start(shutdown).await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "metrics server stopped with error"),
        Err(e) => warn!(error = %e, "metrics server task failed"),
    }

    match result {
        Ok(()) | Err(SchedulerError::Cancelled) => {
            info!("vigil daemon stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "scheduler failed");
            Err(e.into())
        }
    }
}

/// `vigild run`: load the config, wire signals, serve.
pub async fn run(config_path: &Path) -> anyhow::Result<()> {
    let (config, specs) = load_config(config_path)?;
    info!(config = %config_path.display(), probes = specs.len(), "vigil daemon starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    serve(config, specs, shutdown_rx).await
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const CONFIG: &str = r#"
[cluster]
api_server = "memory://"
namespace = "vigil-test"

[metrics]
listen = "127.0.0.1:0"

[[probe]]
name = "configmap-crud"
type = "controlplane"
interval = "200ms"
timeout = "100ms"

[[probe]]
name = "loopback"
type = "dns"
interval = "200ms"
timeout = "100ms"
[probe.params]
hostname = "127.0.0.1"
"#;

    fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn validate_builds_every_probe() {
        let (_dir, path) = write_config(CONFIG);
        let schedules = validate(&path).unwrap();
        let names: Vec<&str> = schedules.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["configmap-crud", "loopback"]);
        assert_eq!(schedules[0].interval, Duration::from_millis(200));
    }

    #[test]
    fn validate_rejects_unknown_type() {
        let (_dir, path) = write_config(
            r#"
[[probe]]
name = "mystery"
type = "etcd-defrag"
interval = "1m"
timeout = "10s"
"#,
        );
        let err = validate(&path).unwrap_err();
        assert!(format!("{err:#}").contains("unrecognized probe type: etcd-defrag"));
    }

    #[test]
    fn validate_rejects_bad_params() {
        let (_dir, path) = write_config(
            r#"
[[probe]]
name = "no-host"
type = "dns"
interval = "1m"
timeout = "10s"
"#,
        );
        let err = validate(&path).unwrap_err();
        assert!(format!("{err:#}").contains("hostname"));
    }

    #[test]
    fn token_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "abc.def\n").unwrap();

        let cluster = ClusterConfig {
            token_file: Some(path.display().to_string()),
            ..ClusterConfig::default()
        };
        assert_eq!(read_token(&cluster).unwrap().as_deref(), Some("abc.def"));
        assert_eq!(read_token(&ClusterConfig::default()).unwrap(), None);
    }

    #[test]
    fn empty_token_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "  \n").unwrap();

        let cluster = ClusterConfig {
            token_file: Some(path.display().to_string()),
            ..ClusterConfig::default()
        };
        assert!(read_token(&cluster).is_err());
    }

    #[tokio::test]
    async fn serve_runs_until_shutdown() {
        let (_dir, path) = write_config(CONFIG);
        let (config, specs) = load_config(&path).unwrap();

        let (tx, rx) = watch::channel(false);
        let daemon = tokio::spawn(serve(config, specs, rx));
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), daemon)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
