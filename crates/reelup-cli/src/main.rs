//! `reelup`: terminal front-end for the Reelup bridge.
//!
//! Every subcommand maps onto one bridge command; upload progress arrives as
//! `upload:progress` events and is printed to stderr so `--json` output on
//! stdout stays machine-readable.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use reelup_bridge::core::bridge::{ErrorPayload, ListResponse};
use reelup_bridge::core::logging::{default_data_dir, default_log_dir, init_logging};
use reelup_bridge::core::settings::{BridgeSettings, SettingsManager};
use reelup_bridge::ipc::{self, event_names, AuthRequiredEvent, EventEmitter, UploadProgressEvent};
use reelup_bridge::{bridge_config, AppState};

/// Upload ID used for the single upload a `reelup upload` run performs.
const UPLOAD_ID: &str = "reelup-cli";

#[derive(Parser, Debug)]
#[command(name = "reelup", version, about = "Upload and manage videos through the reelup agent CLI")]
struct Cli {
    /// Path to the reelup-agent executable (overrides settings and discovery)
    #[arg(long, global = true, value_name = "PATH")]
    cli_path: Option<PathBuf>,

    /// Timeout in seconds for non-upload commands
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// Log bridge activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show whether the agent is logged in
    Status,
    /// Store an access token pair
    Login {
        #[arg(long, env = "REELUP_TOKEN_ID")]
        token_id: String,
        #[arg(long, env = "REELUP_TOKEN_SECRET", hide_env_values = true)]
        token_secret: String,
    },
    /// Forget stored credentials
    Logout,
    /// List remote assets
    List {
        /// Print the raw response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a remote asset
    Delete {
        #[arg(value_name = "ASSET_ID")]
        asset_id: String,
    },
    /// Upload a local video file
    Upload {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Print the final response as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Prints bridge events as terminal lines.
struct ConsoleEmitter;

impl EventEmitter for ConsoleEmitter {
    fn emit_json(&self, event: &str, payload: serde_json::Value) -> Result<(), String> {
        match event {
            event_names::UPLOAD_PROGRESS => {
                let progress: UploadProgressEvent =
                    serde_json::from_value(payload).map_err(|e| e.to_string())?;
                eprintln!("{}", format_progress(&progress));
            }
            event_names::AUTH_REQUIRED => {
                let auth: AuthRequiredEvent =
                    serde_json::from_value(payload).map_err(|e| e.to_string())?;
                eprintln!("{} Run `reelup login` to sign in again.", auth.message);
            }
            _ => {}
        }
        Ok(())
    }
}

fn format_progress(event: &UploadProgressEvent) -> String {
    let mut line = format!("[{}]", event.label);
    if let Some(percent) = event.percent {
        line.push_str(&format!(" {:>3.0}%", percent));
    }
    if let (Some(current), Some(total)) = (event.current_chunk, event.total_chunks) {
        line.push_str(&format!(" chunk {}/{}", current, total));
    }
    if let Some(name) = &event.file_name {
        line.push_str(&format!(" {}", name));
    }
    if let Some(message) = &event.message {
        line.push_str(&format!(" - {}", message));
    }
    line
}

fn format_size(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    format!("{:.1} MB", bytes as f64 / MB)
}

fn bridge_error(payload: ErrorPayload) -> anyhow::Error {
    if let Some(details) = &payload.details {
        tracing::debug!("{} details: {}", payload.kind, details);
    }
    anyhow!("{}", payload)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to render JSON")?;
    println!("{}", text);
    Ok(())
}

fn print_assets(list: &ListResponse) {
    if list.assets.is_empty() {
        println!("No assets.");
        return;
    }
    for asset in &list.assets {
        let playback = asset
            .playback_ids
            .first()
            .map(|p| p.id.as_str())
            .unwrap_or("-");
        let duration = asset
            .duration
            .map(|d| format!("{:.1}s", d))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}\t{}\t{}\t{}",
            asset.id,
            asset.status.as_deref().unwrap_or("-"),
            duration,
            playback
        );
    }
}

/// Applies command-line overrides on top of the persisted settings.
fn effective_settings(cli: &Cli, mut settings: BridgeSettings) -> Result<BridgeSettings> {
    if let Some(path) = &cli.cli_path {
        let path = std::path::absolute(path)
            .with_context(|| format!("Invalid --cli-path {}", path.display()))?;
        settings.executable_path = Some(path.to_string_lossy().into_owned());
    }
    if let Some(secs) = cli.timeout {
        settings.default_timeout_secs = secs;
    }
    settings.normalize();
    Ok(settings)
}

/// `--verbose` wins over the persisted level; `RUST_LOG` wins over both.
fn log_level<'a>(cli: &Cli, settings: &'a BridgeSettings) -> &'a str {
    if cli.verbose {
        "debug"
    } else {
        &settings.log_level
    }
}

fn build_state(manager: SettingsManager, settings: &BridgeSettings) -> AppState {
    let (config, resolved) = bridge_config(settings);
    tracing::debug!(
        "Using agent CLI {} ({})",
        resolved.path.display(),
        resolved.source
    );
    AppState::with_config(config, manager, Arc::new(ConsoleEmitter))
}

async fn upload(state: &AppState, file: PathBuf, json: bool) -> Result<()> {
    let file = file.to_string_lossy().into_owned();
    let selected = ipc::select_file(Some(file.clone()))
        .await
        .map_err(bridge_error)?
        .ok_or_else(|| anyhow!("No file selected"))?;
    if !selected.is_video {
        eprintln!("Warning: {} does not look like a video file", selected.file_name);
    }
    eprintln!(
        "Uploading {} ({})",
        selected.file_name,
        format_size(selected.size_bytes)
    );

    let run = ipc::cli_upload(state, selected.path.clone(), Some(UPLOAD_ID.to_string()));
    tokio::pin!(run);
    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Cancelling upload...");
            if !ipc::cancel_upload(state, UPLOAD_ID.to_string()).await.map_err(bridge_error)? {
                eprintln!("Upload already finished");
            }
            run.await
        }
    };
    let response = result.map_err(bridge_error)?;

    if json {
        print_json(&response)?;
    } else {
        match &response.playback_id {
            Some(playback) => println!("Uploaded asset {} (playback {})", response.asset_id, playback),
            None => println!("Uploaded asset {}", response.asset_id),
        }
    }
    Ok(())
}

async fn run(cli: Cli, state: AppState) -> Result<()> {
    match cli.command {
        Command::Status => {
            let status = ipc::cli_status(&state).await.map_err(bridge_error)?;
            if status.is_authenticated {
                let env = status.environment.as_deref().unwrap_or("default");
                match &status.token_id {
                    Some(token) => println!("Logged in ({}, token {})", env, token),
                    None => println!("Logged in ({})", env),
                }
            } else {
                println!("Not logged in");
            }
        }
        Command::Login {
            token_id,
            token_secret,
        } => {
            let login = ipc::cli_login(&state, token_id, token_secret)
                .await
                .map_err(bridge_error)?;
            println!("{}", login.message.as_deref().unwrap_or("Logged in"));
        }
        Command::Logout => {
            let logout = ipc::cli_logout(&state).await.map_err(bridge_error)?;
            println!("{}", logout.message.as_deref().unwrap_or("Logged out"));
        }
        Command::List { json } => {
            let list = ipc::cli_list_assets(&state).await.map_err(bridge_error)?;
            if json {
                print_json(&list)?;
            } else {
                print_assets(&list);
            }
        }
        Command::Delete { asset_id } => {
            let deleted = ipc::cli_delete_asset(&state, asset_id)
                .await
                .map_err(bridge_error)?;
            println!("Deleted asset {}", deleted.asset_id);
        }
        Command::Upload { file, json } => upload(&state, file, json).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let manager = SettingsManager::new(default_data_dir());
    let settings = match effective_settings(&cli, manager.load()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&default_log_dir(), log_level(&cli, &settings));

    let state = build_state(manager, &settings);
    match run(cli, state).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelup_bridge::core::bridge::{BridgeErrorKind, ProgressPhase};

    fn progress(phase: ProgressPhase) -> UploadProgressEvent {
        UploadProgressEvent {
            upload_id: UPLOAD_ID.to_string(),
            phase,
            label: phase.label().to_string(),
            percent: None,
            file_name: None,
            bytes_uploaded: None,
            total_bytes: None,
            current_chunk: None,
            total_chunks: None,
            elapsed_seconds: None,
            asset_id: None,
            message: None,
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "reelup", "upload", "clip.mp4", "--json", "--timeout", "5", "--cli-path", "/opt/agent",
        ])
        .unwrap();
        assert_eq!(cli.timeout, Some(5));
        assert_eq!(cli.cli_path, Some(PathBuf::from("/opt/agent")));
        match cli.command {
            Command::Upload { file, json } => {
                assert_eq!(file, PathBuf::from("clip.mp4"));
                assert!(json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_delete_requires_asset_id() {
        assert!(Cli::try_parse_from(["reelup", "delete"]).is_err());
        let cli = Cli::try_parse_from(["reelup", "delete", "abc"]).unwrap();
        assert!(matches!(cli.command, Command::Delete { asset_id } if asset_id == "abc"));
    }

    #[test]
    fn test_format_progress_line() {
        let mut event = progress(ProgressPhase::UploadingChunk);
        event.percent = Some(50.0);
        event.current_chunk = Some(2);
        event.total_chunks = Some(4);
        event.file_name = Some("clip.mp4".to_string());
        assert_eq!(
            format_progress(&event),
            format!("[{}]  50% chunk 2/4 clip.mp4", ProgressPhase::UploadingChunk.label())
        );
    }

    #[test]
    fn test_format_progress_label_only() {
        let event = progress(ProgressPhase::WaitingForAsset);
        assert_eq!(
            format_progress(&event),
            format!("[{}]", ProgressPhase::WaitingForAsset.label())
        );
    }

    #[test]
    fn test_bridge_error_renders_kind_and_message() {
        let err = bridge_error(ErrorPayload {
            kind: BridgeErrorKind::NonZeroExit,
            message: "Upload rejected".to_string(),
            details: Some("stderr tail".to_string()),
        });
        assert_eq!(format!("{:#}", err), "non-zero-exit: Upload rejected");
    }

    #[test]
    fn test_relative_cli_path_becomes_absolute() {
        let cli = Cli::try_parse_from(["reelup", "status", "--cli-path", "./reelup-agent"]).unwrap();
        let settings = effective_settings(&cli, BridgeSettings::default()).unwrap();
        let path = PathBuf::from(settings.executable_path.unwrap());
        assert!(path.is_absolute());
        assert!(path.ends_with("reelup-agent"));
        assert!(path.starts_with(std::env::current_dir().unwrap()));
    }

    #[test]
    fn test_timeout_override_is_clamped() {
        let cli = Cli::try_parse_from(["reelup", "list", "--timeout", "0"]).unwrap();
        let settings = effective_settings(&cli, BridgeSettings::default()).unwrap();
        assert_eq!(settings.default_timeout_secs, 1);
        assert_eq!(settings.executable_path, None);
    }

    #[test]
    fn test_log_level_follows_settings_unless_verbose() {
        let settings = BridgeSettings {
            log_level: "error".to_string(),
            ..BridgeSettings::default()
        };
        let quiet = Cli::try_parse_from(["reelup", "status"]).unwrap();
        assert_eq!(log_level(&quiet, &settings), "error");
        let verbose = Cli::try_parse_from(["reelup", "status", "-v"]).unwrap();
        assert_eq!(log_level(&verbose, &settings), "debug");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 / 2), "1.5 MB");
    }
}
