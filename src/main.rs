use clap::Parser;
use anyhow::Result;
use std::sync::mpsc;
use std::sync::Arc;

use treemirror::{
    cli::Cli,
    ConsoleSink, FileLogSink, FsCopier, LogSink, Session, TeeSink,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.to_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = config.validate() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    cli.setup_logging();

    let config = config.resolve()?;
    tracing::info!("Starting treemirror: {} -> {}", config.source.display(), config.mirror.display());

    let file_log: Arc<dyn LogSink> = Arc::new(FileLogSink::create(&config.log_file)?);
    let log: Arc<dyn LogSink> = Arc::new(
        TeeSink::new()
            .with(file_log)
            .with(Arc::new(ConsoleSink::new(config.output))),
    );

    let session = Session::start(&config, Arc::new(FsCopier), log)?;

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;

    println!("Watching {}. Press Ctrl+C to quit", config.source.display());
    let _ = stop_rx.recv();

    tracing::info!("Shutting down");
    session.stop();

    Ok(())
}
