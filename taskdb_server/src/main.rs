use clap::Parser;
use taskdb_server::Config;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    log::info!("Starting taskdb-server on {}", config.addr());
    taskdb_server::serve(config).await
}
