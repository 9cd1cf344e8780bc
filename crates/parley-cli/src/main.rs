// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2025 Parley Contributors

//! Parley CLI - terminal client for the Parley relay.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use parley_core::{Handshake, Profile};
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing_subscriber::EnvFilter;

mod api;
mod session;

use api::ApiClient;

/// Parley CLI - direct messages from the terminal
#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Parley server URL
    #[arg(short, long, global = true, default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new account
    Register {
        /// Username to register
        #[arg(short, long)]
        username: String,

        /// Display name (optional)
        #[arg(short, long)]
        name: Option<String>,

        /// Device identifier reported to the server (optional)
        #[arg(short, long)]
        device_id: Option<String>,
    },
    /// Sign in and start chatting
    Chat {
        /// Your username
        #[arg(short, long)]
        username: String,

        /// Device identifier reported to the server (optional)
        #[arg(short, long)]
        device_id: Option<String>,
    },
}

/// Ask for a password on stdin.
async fn prompt_password<R>(lines: &mut Lines<R>) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    print!("Password: ");
    std::io::stdout().flush()?;
    match lines.next_line().await? {
        Some(line) => Ok(line.trim_end_matches('\r').to_string()),
        None => bail!("No password entered"),
    }
}

async fn run_register(
    api: &ApiClient,
    username: String,
    name: Option<String>,
    device_id: Option<String>,
    password: String,
) -> Result<()> {
    let profile = Profile {
        name,
        username,
        password,
        device_id,
    };

    match api.register(&profile).await {
        Ok(response) => {
            println!("{}", response.message);
            println!("  Username: {}", profile.username);
            println!("  User ID: {}", response.user_id);
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to register: {}", e);
            Err(e)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they don't interleave with the conversation
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let api = ApiClient::new(&cli.server);
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    match cli.command {
        Commands::Register {
            username,
            name,
            device_id,
        } => {
            let password = prompt_password(&mut input).await?;
            run_register(&api, username, name, device_id, password).await
        }
        Commands::Chat {
            username,
            device_id,
        } => {
            let password = prompt_password(&mut input).await?;
            if let Err(e) = api.sign_in(&username, &password).await {
                eprintln!("Sign-in failed: {}", e);
                return Err(e);
            }

            let handshake = Handshake {
                username,
                password: Some(password),
                name: None,
                device_id,
            };
            session::run_chat(&api.ws_url()?, handshake, &mut input).await
        }
    }
}
