mod config;

use clap::{Args, Parser};
use config::{CommonConfig, Config, LoggingConfig, MetricsConfig};
use media_service::config::Role;
use media_service::latency::ExtraLatency;
use media_service::metrics_defs::ALL_METRICS;
use media_service::trace::Tracer;
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
enum CliCommand {
    PageService(ServiceArgs),
    UserReviewService(ServiceArgs),
    RatingService(ServiceArgs),
    TextService(ServiceArgs),
}

#[derive(Args)]
struct ServiceArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

impl CliCommand {
    fn into_parts(self) -> (Role, ServiceArgs) {
        match self {
            CliCommand::PageService(args) => (Role::PageService, args),
            CliCommand::UserReviewService(args) => (Role::UserReviewService, args),
            CliCommand::RatingService(args) => (Role::RatingService, args),
            CliCommand::TextService(args) => (Role::TextService, args),
        }
    }
}

fn main() {
    let (role, args) = CliCommand::parse().into_parts();

    let config = match Config::from_file(&args.config_file_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    let _sentry = init_logging(&config.common);
    if let Err(e) = init_metrics(&config.common, role) {
        tracing::error!(error = %e, "Failed to install statsd recorder");
        process::exit(1);
    }

    let latency = match &config.media_service.extra_latency {
        Some(value) => ExtraLatency::parse(Some(value.as_str())),
        None => ExtraLatency::from_env(),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start runtime");
            process::exit(1);
        }
    };

    tracing::info!(%role, "Starting mediamesh");
    let result = runtime.block_on(media_service::run(
        role,
        config.media_service,
        latency,
        Tracer::logging(),
    ));

    if let Err(e) = result {
        tracing::error!(%role, error = %e, "Service failed");
        process::exit(1);
    }
}

/// Installs the fmt subscriber, plus a sentry layer when a DSN is configured.
/// The returned guard flushes sentry on drop.
fn init_logging(common: &CommonConfig) -> Option<sentry::ClientInitGuard> {
    let guard = common.logging.as_ref().map(|LoggingConfig { sentry_dsn }| {
        sentry::init((
            sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_metrics(
    common: &CommonConfig,
    role: Role,
) -> Result<(), metrics_exporter_statsd::StatsdError> {
    let Some(MetricsConfig {
        statsd_host,
        statsd_port,
    }) = &common.metrics
    else {
        return Ok(());
    };

    let recorder = StatsdBuilder::from(statsd_host.as_str(), *statsd_port)
        .with_default_tag("service", role.as_str())
        .build(Some("mediamesh"))?;
    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("A metrics recorder was already installed");
    }
    shared::metrics_defs::describe_all(ALL_METRICS);
    tracing::info!(%statsd_host, statsd_port, "Metrics enabled");
    Ok(())
}
