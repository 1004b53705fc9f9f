mod console;

fn main() -> anyhow::Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .with_colors(true)
        .with_threads(true)
        .with_local_timestamps()
        .env()
        .init()?;

    let channels = castline_bridge::BridgeChannels::default();
    let backend = castline_backend::run(
        channels.backend_rx,
        channels.backend_tx,
        castline_backend::Collaborators::headless(),
    );
    console::run(channels.frontend_rx, channels.frontend_tx)?;

    if backend.join().is_err() {
        log::error!("Backend thread panicked");
    }
    Ok(())
}
