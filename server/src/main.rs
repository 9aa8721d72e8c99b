#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();
    let config = taskflow_server::config::Config::from_env()?;
    taskflow_server::web::start_web_server(config).await
}
