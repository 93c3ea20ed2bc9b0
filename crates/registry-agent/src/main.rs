//! registry-agent binary

use anyhow::Context;
use clap::Parser;
use registry_agent::cli::Cli;
use registry_agent::{AdminClient, AgentSettings, Orchestrator, ReqwestTransport};
use registry_kernel::config::AgentConfig;
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("debug").init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let lookup = |key: &str| std::env::var(key).ok();
    let mut config = AgentConfig::load(&cli.config, lookup)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    config.apply_env(lookup);
    info!(
        service_version = %config.service_version,
        ttl = config.ttl,
        "configuration loaded"
    );

    let settings = AgentSettings::resolve(config, cli.overrides())?;

    if cli.print_plan {
        let plan = serde_yaml::to_string(&settings.plan()).context("failed to render plan")?;
        println!("{plan}");
        return Ok(());
    }

    let endpoint = settings.require_admin_api()?.clone();
    let transport = ReqwestTransport::new(settings.request_timeout)?;
    let client = AdminClient::new(transport, endpoint, settings.retry).with_body_logging(settings.debug);
    let orchestrator = Orchestrator::new(client, settings);

    let report = orchestrator.run(shutdown_signal()).await?;
    if report.is_clean() {
        info!("deregistration complete");
    } else {
        for failure in report.failures() {
            warn!(step = %failure.step, "left behind in gateway");
        }
    }
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
