//! Keystone - application launcher
//!
//! This is the binary entry point. All logic lives in the workspace crates.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use keystone::app::{HeadlessShell, ProcessRuntime};
use keystone::core::{logging, parse_plugin_test_list, FeatureFlags, LaunchArguments};

/// Keystone - editor launcher and bundle host
#[derive(Parser, Debug)]
#[command(name = "keystone")]
#[command(about = "Start the Keystone editor", long_about = None)]
#[command(disable_version_flag = true)]
struct Args {
    /// Files or directories to open
    #[arg(value_name = "FILES")]
    files: Vec<PathBuf>,

    /// Print the build number and exit
    #[arg(long)]
    version: bool,

    /// Run a script non-interactively and exit with its result
    #[arg(long, value_name = "SCRIPT")]
    run: Option<PathBuf>,

    /// Load only these bundle files (separated by the platform path separator)
    #[arg(long, value_name = "BUNDLES")]
    plugintest: Option<OsString>,

    /// UI locale
    #[arg(long, value_name = "LOCALE")]
    ulang: Option<String>,

    /// Game data locale
    #[arg(long, value_name = "LOCALE")]
    glang: Option<String>,

    /// Log filter directive (e.g. `debug`, `keystone_app=trace`)
    #[arg(long, value_name = "FILTER")]
    loglevel: Option<String>,

    #[arg(long = "x-disable-animation", hide = true)]
    disable_animation: bool,

    #[arg(long = "x-disable-background-init", hide = true)]
    disable_background_init: bool,

    #[arg(long = "x-disable-filter-threads", hide = true)]
    disable_filter_threads: bool,

    #[arg(long = "x-disable-runtime-check", alias = "x-disable-jre-check", hide = true)]
    disable_runtime_check: bool,

    /// Lock file held by the instance being replaced
    #[arg(long = "x-restart-lock", value_name = "PATH", hide = true)]
    restart_lock: Option<PathBuf>,
}

impl From<Args> for LaunchArguments {
    fn from(args: Args) -> Self {
        LaunchArguments {
            print_version: args.version,
            ui_locale: args.ulang,
            game_locale: args.glang,
            log_level: args.loglevel,
            files: args.files,
            run_script: args.run,
            plugin_test: args.plugintest.as_deref().map(parse_plugin_test_list),
            flags: FeatureFlags {
                disable_animation: args.disable_animation,
                disable_background_init: args.disable_background_init,
                disable_filter_threads: args.disable_filter_threads,
                disable_runtime_check: args.disable_runtime_check,
            },
            restart_lock: args.restart_lock,
        }
    }
}

fn main() -> ExitCode {
    let launch = LaunchArguments::from(Args::parse());

    if let Err(e) = color_eyre::install() {
        eprintln!("Failed to install error reporting: {}", e);
    }
    if !launch.print_version {
        if let Err(e) = logging::init(launch.log_level.as_deref()) {
            eprintln!("Logging disabled: {}", e);
        }
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("keystone-worker")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let status = runtime.block_on(keystone::run(
        launch,
        Arc::new(HeadlessShell::new()),
        Box::new(ProcessRuntime::new()),
    ));
    tracing::info!("Exiting with {:?}", status);
    status.into()
}
