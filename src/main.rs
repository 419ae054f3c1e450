use clap::Parser;
use scp_copy::cli::{self, Cli, Command, Profile, RemoteTarget};
use scp_engine::scp::{ScpDownloadRequest, ScpService, ScpTransferResult, ScpUploadRequest};
use std::io::IsTerminal;
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            eprintln!("scp-copy: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so `exec` output on stdout stays clean.
/// `log` records from the engine are bridged into the subscriber.
fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}

async fn run(cli: &Cli) -> Result<bool, String> {
    let profile = match cli.config {
        Some(ref path) => Profile::load(path)?,
        None => Profile::default(),
    };
    let engine = cli.engine_options(&profile);
    engine.validate()?;

    let state = ScpService::new();
    let mut svc = state.lock().await;

    let ok = match cli.command {
        Command::Send {
            ref targets,
            ref remote_dir,
            ref name,
        } => {
            if name.is_some() && targets.len() > 1 {
                return Err("--name can only be used with a single target".into());
            }
            let mut all_ok = true;
            for arg in targets {
                let target = RemoteTarget::parse(arg)?;
                let local = cli::expand_path(Path::new(&target.path))?;
                let session = svc.ensure_session(cli.connection_config(&profile, &target)?).await?;
                let result = svc
                    .upload(ScpUploadRequest {
                        session_id: session.id.clone(),
                        local_path: local.display().to_string(),
                        remote_dir: remote_dir.clone(),
                        remote_name: name.clone(),
                        engine: engine.clone(),
                    })
                    .await?;
                all_ok &= report(&session.host, &result);
            }
            all_ok
        }

        Command::Receive {
            ref source,
            ref local_dir,
            ref name,
        } => {
            let target = RemoteTarget::parse(source)?;
            let (remote_dir, remote_name) = cli::split_remote_path(&target.path)?;
            let local_dir = cli::expand_path(local_dir)?;
            let session = svc.ensure_session(cli.connection_config(&profile, &target)?).await?;
            let result = svc
                .download(ScpDownloadRequest {
                    session_id: session.id.clone(),
                    remote_dir,
                    remote_name,
                    local_dir: local_dir.display().to_string(),
                    local_name: name.clone(),
                    engine: engine.clone(),
                })
                .await?;
            report(&session.host, &result)
        }

        Command::Exec {
            ref host,
            ref command,
        } => {
            let target = RemoteTarget::parse_host(host)?;
            let session = svc.ensure_session(cli.connection_config(&profile, &target)?).await?;
            let output = svc.exec_remote(&session.id, &command.join(" "))?;
            println!("{}", output);
            true
        }
    };

    svc.disconnect_all().await;
    Ok(ok)
}

fn report(host: &str, result: &ScpTransferResult) -> bool {
    if result.success {
        info!(
            "{:?} {} <-> {}:{} ({} bytes, {} ms)",
            result.direction,
            result.local_path,
            host,
            result.remote_path,
            result.bytes_transferred,
            result.duration_ms
        );
    } else {
        error!(
            "{:?} {} <-> {}:{} failed: {}",
            result.direction,
            result.local_path,
            host,
            result.remote_path,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    result.success
}
