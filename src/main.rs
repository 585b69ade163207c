use std::process::ExitCode;

use eframe::egui::ViewportBuilder;
use rgm::app::RgmApp;
use rgm::config::{SHUTDOWN_GRACE, WINDOW_SIZE};
use rgm::monitor::create_monitor;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("rgm-worker")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    let sampler = match create_monitor() {
        Ok(sampler) => sampler,
        Err(err) => {
            error!(%err, "failed to initialize GPU monitoring");
            eprintln!(
                "Failed to initialize GPU monitoring: {err}\nMake sure the NVIDIA driver is installed."
            );
            return ExitCode::FAILURE;
        }
    };

    let native_options = eframe::NativeOptions {
        viewport: ViewportBuilder::default().with_inner_size(WINDOW_SIZE),
        ..Default::default()
    };

    let handle = runtime.handle().clone();
    let app_sampler = sampler.clone();
    let result = eframe::run_native(
        "RGM",
        native_options,
        Box::new(move |cc| Ok(Box::new(RgmApp::new(cc, app_sampler, handle)))),
    );

    sampler.shutdown();
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(()) => {
            info!("exiting");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "window terminated with an error");
            ExitCode::FAILURE
        }
    }
}
