fn main() -> anyhow::Result<()> {
    // Structured logs to stderr; RUST_LOG overrides the default level.
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(manager::cli::run());
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result
}
