//! MFP home app - seat card printing for Toshiba e-BRIDGE devices.
//!
//! Architecture:
//! - `state` module: GTK-free license gate state machine (testable)
//! - `app` module: Bridges the state machine to the UI and async operations
//! - `api` module: Device/backend HTTP client and the device event stream
//! - `events` module: Device event classification and receivers
//! - `license` / `print` modules: License codes, QR payload, print flows
//! - `console` module: Headless front-end (default build)
//! - `ui` module: GTK4 widgets and screens (`gui` feature)

use std::rc::Rc;
use std::sync::Arc;

use tokio::runtime::Runtime;

mod api;
mod app;
mod config;
#[cfg(not(feature = "gui"))]
mod console;
mod events;
mod license;
mod print;
mod state;
#[cfg(feature = "gui")]
mod ui;

use api::ApiClient;
use app::AppContext;
use config::Config;

/// Start the license gate and the device event plumbing
fn bootstrap(ctx: &Rc<AppContext>, runtime: &Runtime) {
    ctx.on_authorized(|| log::info!("Application features unlocked"));

    let authorized = ctx.initialize_license(ctx.config.app_id.clone());
    runtime.spawn(async move {
        if !authorized.await {
            log::warn!("License gate closed before authorization");
        }
    });

    ctx.subscribe_device_events();
    ctx.start_event_stream();
}

#[cfg(not(feature = "gui"))]
fn run(runtime: Arc<Runtime>, config: Arc<Config>) {
    let api = ApiClient::new(config.clone());
    let (ctx, rx) = AppContext::new(config, api, runtime.handle().clone());
    bootstrap(&ctx, &runtime);

    runtime.block_on(console::run(ctx, rx, console::ConsoleView::new()));
}

#[cfg(feature = "gui")]
fn run(runtime: Arc<Runtime>, config: Arc<Config>) {
    use gtk4::prelude::*;
    use libadwaita as adw;
    use ui::MainWindow;

    let app = adw::Application::builder()
        .application_id("jp.co.toshibatec.MfpHomeApp")
        .build();

    app.connect_activate(move |app| {
        let api = ApiClient::new(config.clone());
        let (ctx, mut rx) = AppContext::new(config.clone(), api, runtime.handle().clone());

        // Create main window (GTK layer)
        let main_window = MainWindow::new(app, ctx.clone());
        bootstrap(&ctx, &runtime);

        // Poll the tokio channel from the GTK main loop
        let window = main_window.clone();
        glib::timeout_add_local(std::time::Duration::from_millis(16), move || {
            while let Ok(msg) = rx.try_recv() {
                window.handle_message(msg);
            }
            glib::ControlFlow::Continue
        });

        main_window.window.present();
    });

    app.run();
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting MFP home app");

    // Create tokio runtime for async operations
    let runtime = Arc::new(
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("Failed to create tokio runtime"),
    );

    let config = Arc::new(Config::from_env());
    log::info!(
        "Running in {:?} context against {}",
        config.execution_context,
        config.device_api_base
    );

    run(runtime, config);

    log::info!("MFP home app shutting down");
}
