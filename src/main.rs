use beads_rust::cli::commands;
use beads_rust::cli::{Cli, Commands};
use beads_rust::config;
use beads_rust::daemon;
use beads_rust::logging::init_logging;
use beads_rust::{BeadsError, StructuredError};
use clap::Parser;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

fn main() {
    // Hidden entry point used when this binary is re-spawned as the daemon
    // (see `daemon::resolve_mode`'s auto-start). Never shown in `--help`;
    // bypasses clap entirely since it isn't a user-facing subcommand.
    let mut raw_args = std::env::args_os();
    raw_args.next(); // argv[0]
    if let Some(first) = raw_args.next() {
        if first == "--internal-daemon" {
            run_internal_daemon(raw_args.collect());
            return;
        }
    }

    let cli = Cli::parse();

    // Initialize logging
    if let Err(e) = init_logging(cli.verbose, cli.quiet, None) {
        eprintln!("Failed to initialize logging: {e}");
        // Don't exit, just continue without logging or with basic stderr
    }

    let overrides = build_cli_overrides(&cli);

    if let Ok(beads_dir) = config::discover_beads_dir_with_cli(&overrides) {
        let command_name = command_name(&cli.command);
        let (mode, reason) = daemon::resolve_mode(&beads_dir, &overrides, command_name);
        if reason.is_fallback() {
            tracing::debug!(?mode, ?reason, command = command_name, "daemon fallback");
        }
    }

    let result = match cli.command {
        Commands::Init { prefix, force } => commands::init::execute(prefix, force, None, cli.quiet),
        Commands::Create(args) => commands::create::execute(&args, &overrides),
        Commands::List(args) => commands::list::execute(&args, cli.json),
        Commands::Show(args) => commands::show::execute(&args, cli.json, &overrides),
        Commands::Sync(args) => commands::sync::execute(&args, cli.json, &overrides),
        Commands::Version => commands::version::execute(cli.json),
        Commands::Config(args) => commands::config::execute(&args, cli.json, &overrides),
    };

    // Handle command result
    if let Err(e) = result {
        handle_error(&e, cli.json);
    }
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Init { .. } => "init",
        Commands::Create(_) => "create",
        Commands::List(_) => "list",
        Commands::Show(_) => "show",
        Commands::Sync(_) => "sync",
        Commands::Version => "version",
        Commands::Config(_) => "config",
    }
}

/// Run as the daemon RPC server; never returns under normal operation.
fn run_internal_daemon(args: Vec<std::ffi::OsString>) {
    if let Err(e) = init_logging(0, false, None) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let [beads_dir, db_path] = &args[..] else {
        eprintln!("--internal-daemon requires <beads_dir> <db_path>");
        std::process::exit(1);
    };

    if let Err(e) = daemon::run_blocking(PathBuf::from(beads_dir), PathBuf::from(db_path)) {
        eprintln!("daemon exited with error: {e}");
        std::process::exit(1);
    }
}

/// Handle errors with structured output support.
///
/// When --json is set or stdout is not a TTY, outputs structured JSON to stderr.
/// Otherwise, outputs human-readable error with optional color.
fn handle_error(err: &BeadsError, json_mode: bool) -> ! {
    let structured = StructuredError::from_error(err);
    let exit_code = structured.code.exit_code();

    // Determine output mode: JSON if --json flag or stdout is not a terminal
    let use_json = json_mode || !io::stdout().is_terminal();

    if use_json {
        // Output structured JSON to stderr
        let json = structured.to_json();
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
        );
    } else {
        // Human-readable output with color if stderr is a terminal
        let use_color = io::stderr().is_terminal();
        eprintln!("{}", structured.to_human(use_color));
    }

    std::process::exit(exit_code);
}

fn build_cli_overrides(cli: &Cli) -> config::CliOverrides {
    config::CliOverrides {
        db: cli.db.clone(),
        actor: cli.actor.clone(),
        identity: None,
        json: Some(cli.json),
        no_db: Some(cli.no_db),
        no_daemon: Some(cli.no_daemon),
        no_auto_flush: Some(cli.no_auto_flush),
        no_auto_import: Some(cli.no_auto_import),
        lock_timeout: cli.lock_timeout,
        quiet: Some(cli.quiet),
    }
}
