use std::path::PathBuf;

use camstream::{Config, Orchestrator};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "camstream", version, about = "Capture, encode and stream camera video")]
struct Args {
    /// JSON configuration file
    config: PathBuf,
}

fn init_logger() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("camstream", log::LevelFilter::Debug)
        .filter_module("media_bus", log::LevelFilter::Info)
        .init();
}

#[tokio::main]
async fn main() -> ! {
    let args = Args::try_parse().unwrap_or_else(|e| {
        // --help and --version exit 0; usage errors exit 1 rather than clap's 2.
        if !e.use_stderr() {
            e.exit();
        }
        eprint!("{}", e.render());
        std::process::exit(1);
    });
    init_logger();

    if let Err(e) = media_bus::init() {
        log::error!("media init failed: {:#}", e);
        std::process::exit(1);
    }

    let orchestrator = match Config::load(&args.config).and_then(Orchestrator::new) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            log::error!("{:#}", e);
            std::process::exit(1);
        }
    };
    let shutdown = orchestrator.shutdown_handle();
    let mut worker = tokio::task::spawn_blocking(move || orchestrator.run());

    let code = loop {
        tokio::select! {
            res = &mut worker => {
                break match res {
                    Ok(Ok(summary)) => {
                        if let Some(capture) = &summary.capture {
                            log::info!("capture: {}", capture);
                        }
                        for (i, stats) in summary.encode.iter().enumerate() {
                            log::info!("encode-{}: {}", i, stats);
                        }
                        for (i, stats) in summary.decode.iter().enumerate() {
                            log::info!("decode-{}: {}", i, stats);
                        }
                        0
                    }
                    Ok(Err(e)) => {
                        log::error!("run failed: {:#}", e);
                        1
                    }
                    Err(e) => {
                        log::error!("orchestrator task failed: {}", e);
                        1
                    }
                };
            },
            _ = tokio::signal::ctrl_c() => {
                if shutdown.is_requested() {
                    log::warn!("second interrupt, exiting now");
                    std::process::exit(1);
                }
                log::info!("interrupt received, shutting down (press Ctrl-C again to force)");
                shutdown.request_shutdown();
            },
        }
    };

    std::process::exit(code);
}
