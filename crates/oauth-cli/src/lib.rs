//! # `oauth-cli`
//!
//! Administrative command-line interface for the OAuth interception and
//! feature-flag subsystem: register upstream OAuth servers, drive the
//! authorization-code flow, force refreshes or revocations, inspect
//! subsystem health, and proxy one request through the interceptor for
//! debugging.
//!
//! ## Usage
//!
//! ```bash
//! oauth-cli register my-api --provider github --client-id abc \
//!   --redirect-uri https://example.com/callback
//! oauth-cli authorize my-api
//! oauth-cli token my-api --user alice --code <code-from-redirect>
//! oauth-cli request my-api --user alice https://api.example.com/v1/me
//! ```

pub mod cli;
pub mod commands;
pub mod error;
pub mod formatter;

use clap::Parser;

use cli::{Cli, Commands};
use commands::App;
use error::{CliError, CliResult};
use formatter::Formatter;

/// Parse arguments, dispatch the requested command, and report the
/// outcome through the selected [`Formatter`]. Returns the process exit
/// code the caller should use.
pub async fn run_cli() -> i32 {
    let cli = Cli::parse();
    let fmt = Formatter::new(cli.json);

    match dispatch(&cli).await {
        Ok(()) => 0,
        Err(err) => {
            fmt.error(&err);
            err.exit_code()
        }
    }
}

async fn dispatch(cli: &Cli) -> CliResult<()> {
    let fmt = Formatter::new(cli.json);
    let app = App::load(cli.config.clone()).await?;

    match &cli.command {
        Commands::Register(args) => {
            let config = commands::register(&app, args.clone()).await?;
            fmt.display(&config);
        }
        Commands::Update(args) => {
            let config = commands::update(&app, args.clone()).await?;
            fmt.display(&config);
        }
        Commands::Remove { server } => {
            commands::remove(&app, server).await?;
            fmt.success(&format!("removed '{server}'"));
        }
        Commands::List => {
            let servers = commands::list(&app).await;
            fmt.display_servers(&servers);
        }
        Commands::Status { server } => {
            let report = commands::status(&app, server.as_deref()).await?;
            fmt.display(&report);
        }
        Commands::Authorize { server, state } => {
            let url = commands::authorize(&app, server, state.clone()).await?;
            fmt.display(&serde_json::json!({ "authorize_url": url }));
        }
        Commands::Token { server, user, code, code_verifier } => {
            let token = commands::token(&app, server, user, code, code_verifier.as_deref()).await?;
            fmt.display(&token);
        }
        Commands::Refresh { server, user } => {
            let token = commands::refresh(&app, server, user).await?;
            fmt.display(&token);
        }
        Commands::Revoke { server, user } => {
            commands::revoke(&app, server, user).await?;
            fmt.success(&format!("revoked token for '{user}' on '{server}'"));
        }
        Commands::Request { server, user, method, url, body } => {
            let response = commands::proxy_request(
                &app,
                server,
                user,
                (*method).into(),
                url,
                body.clone().map(String::into_bytes),
            )
            .await;
            if let Some(message) = response.error {
                return Err(CliError::InvalidArguments(message));
            }
            let status_code = response.status_code;
            fmt.display(&serde_json::json!({
                "status_code": status_code,
                "token_refreshed": response.token_refreshed,
                "body": String::from_utf8_lossy(&response.body),
            }));
            if !(200..300).contains(&status_code) {
                return Err(CliError::UpstreamStatus(status_code));
            }
        }
    }

    Ok(())
}
