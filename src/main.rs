use clap::Parser;
use tokio_util::sync::CancellationToken;

use vmcli::backend::vsphere::VsphereClient;
use vmcli::cli::Cli;
use vmcli::commands::{CommandRegistry, Context};
use vmcli::config::{self, Settings};
use vmcli::error::VmcliError;
use vmcli::logging;
use vmcli::progress::OutputMode;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let quiet = cli.quiet;
    if let Err(e) = run(cli).await {
        let code = e.exit_code();
        if !quiet {
            eprintln!("{:?}", miette::Report::new(e));
        }
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<(), VmcliError> {
    let cwd = std::env::current_dir().map_err(|source| VmcliError::ConfigLoad {
        path: ".".into(),
        source,
    })?;
    let settings = Settings::load(cli.config.as_deref(), &cwd, config::process_env())?;

    let level = cli.log_level.unwrap_or(settings.log_level);
    logging::init(level, cli.quiet, settings.log_path.as_deref())?;
    if let Some(path) = &settings.config_path {
        tracing::debug!(path = %path.display(), "using config file");
    }

    let registry = CommandRegistry::<VsphereClient>::standard()?;

    // Bad flavors fail here rather than after logging in.
    if let Some(flavor) = cli.command.flavor() {
        config::load_flavor(&settings.flavors_dir, flavor)?;
    }

    let connect = settings.connect_options(
        cli.username.as_deref(),
        cli.password.as_deref(),
        cli.vcenter.as_deref(),
        cli.insecure,
        |username, vcenter| {
            inquire::Password::new(&format!("Password for {username}@{vcenter}:"))
                .without_confirmation()
                .prompt()
                .map_err(|e| VmcliError::Prompt {
                    message: e.to_string(),
                })
        },
    )?;

    let client = VsphereClient::connect(&connect).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping");
            on_signal.cancel();
        }
    });

    let ctx = Context::new(
        &client,
        &settings,
        connect,
        OutputMode::detect(cli.quiet),
        cancel,
    );
    let result = registry.dispatch(&ctx, &cli.command).await;

    if let Err(e) = client.logout().await {
        tracing::warn!(error = %e, "failed to log out");
    }
    result
}
