use clap::Parser;
use gol::Args;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // A local .env may carry the GOL_* settings
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Logs go to stderr; the child's output is not ours to interleave with
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gol=info,gol_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let code = match gol::run(&args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            1
        }
    };
    tracing::info!("main: end");
    std::process::exit(code);
}
