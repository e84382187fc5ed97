use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sofa::{ClientConfig, Server};
use sofa_tail::{ChangePrinter, TailArgs, USAGE};

/// `~/.config/sofa/config.yaml`, if it exists
fn default_config_path() -> Option<PathBuf> {
    let mut path = PathBuf::from(std::env::var_os("HOME")?);
    path.push(".config");
    path.push("sofa");
    path.push("config.yaml");
    path.exists().then_some(path)
}

fn load_config(args: &TailArgs) -> Result<ClientConfig> {
    let config = match args.config.clone().or_else(default_config_path) {
        Some(path) => ClientConfig::load_from_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ClientConfig::default(),
    };

    let mut config = config.apply_env();
    if let Some(url) = &args.url {
        config.url = url.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only changes
    // Default to INFO level, can be overridden with RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = TailArgs::parse(std::env::args().skip(1))?;
    if args.help {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = load_config(&args)?;
    let server = Server::from_config(&config)?;
    let db = server.database(args.database.clone());

    let consumer = db.consumer(args.feed_options(&config));
    consumer.subscribe(Arc::new(ChangePrinter::new(std::io::stdout(), args.json)));
    consumer
        .start()
        .await
        .with_context(|| format!("following {} on {}", args.database, config.url))?;

    tokio::select! {
        _ = consumer.wait_until_stopped() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping");
            consumer.stop();
        }
    }

    if let Some(error) = consumer.last_error() {
        anyhow::bail!("change feed on '{}' failed: {}", args.database, error);
    }
    if let Some(seq) = consumer.last_seq() {
        tracing::info!("Last sequence: {}", seq);
    }
    Ok(())
}
