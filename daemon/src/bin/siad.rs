use anyhow::{Context, Result};
use clap::Parser;
use fern::colors::{Color, ColoredLevelConfig};

use sia_daemon::config::NodeConfig;
use sia_daemon::node::Node;
use sia_daemon::rpc::ApiServer;

fn setup_logging(config: &NodeConfig) -> Result<()> {
    let level = config
        .log_level
        .parse::<log::LevelFilter>()
        .context("invalid log level")?;

    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Cyan)
        .trace(Color::BrightBlack);

    let mut dispatch = fern::Dispatch::new()
        .level(level)
        // the http layer and storage engine are chatty below info
        .level_for("actix_server", log::LevelFilter::Warn)
        .level_for("actix_web", log::LevelFilter::Warn)
        .level_for("sled", log::LevelFilter::Warn)
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        humantime::format_rfc3339_seconds(std::time::SystemTime::now()),
                        colors.color(record.level()),
                        record.target(),
                        message
                    ))
                })
                .chain(std::io::stdout()),
        );

    if config.log_to_disk {
        let log_dir = format!("{}/logs", config.data_dir);
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("could not create log dir {}", log_dir))?;
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        humantime::format_rfc3339_seconds(std::time::SystemTime::now()),
                        record.level(),
                        record.target(),
                        message
                    ))
                })
                .chain(fern::log_file(format!("{}/siad.log", log_dir))?),
        );
    }

    dispatch.apply().context("could not install logger")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::parse();
    setup_logging(&config)?;

    log::info!("siad {} starting", sia_common::config::VERSION);
    log::info!("Data directory: {}", config.data_dir);

    let node = Node::start(config).await.context("node startup failed")?;
    let api = ApiServer::start(node.clone())
        .await
        .context("API startup failed")?;

    node.wait_for_shutdown().await;

    // the API drains first so no request observes a half-closed node
    api.stop().await;
    node.stop().await;
    Ok(())
}
