//! Interactive mode: one unlocked session serving many commands.
//!
//! The session auto-locks after the configured idle time; `unlock` opens a
//! new one through the same throttle as every other entry point.

use anyhow::{anyhow, Context, Result};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::{print_entries, print_entry, App, PasswordSource, DEFAULT_GENERATED_LENGTH};
use credvault_common::Error;
use credvault_vault::{generate_password, NewEntry, SessionToken};

const HELP: &str = "\
Commands:
  list [query]                  list entries, optionally filtered
  match <url>                   entries applicable to a domain or URL
  show <id>                     show an entry with its password
  add <site> <domain> [user]    add an entry (prompts for its password)
  rm <id>                       remove an entry
  gen [length]                  print a random password
  status                        session state
  lock                          lock now
  unlock                        unlock again
  quit                          lock and exit";

pub async fn run(app: &App) -> Result<()> {
    let sweeper = app.guard.throttle().spawn_sweeper();
    let mut token = app.open().await?;
    println!("Vault unlocked. Type `help` for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("credvault> ");
        std::io::stdout().flush().context("Failed to write prompt")?;

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = words.split_first() else {
            continue;
        };

        let result = match command {
            "quit" | "exit" => break,
            "help" => {
                println!("{}", HELP);
                Ok(())
            }
            "unlock" => match app.open().await {
                Ok(fresh) => {
                    token = fresh;
                    println!("Vault unlocked.");
                    Ok(())
                }
                Err(e) => Err(e),
            },
            other => dispatch(app, &token, other, args).await,
        };

        if let Err(e) = result {
            println!("Error: {:#}", e);
        }
    }

    sweeper.abort();
    debug!("Shell closed");
    Ok(())
}

async fn dispatch(app: &App, token: &SessionToken, command: &str, args: &[&str]) -> Result<()> {
    let sessions = app.sessions();

    match (command, args) {
        ("list" | "ls", _) => {
            let query = (!args.is_empty()).then(|| args.join(" "));
            let entries = sessions
                .list_entries(token, query.as_deref())
                .await
                .map_err(explain)?;
            print_entries(&entries);
        }
        ("match", [url]) => {
            let entries = sessions
                .entries_for_domain(token, url)
                .await
                .map_err(explain)?;
            print_entries(&entries);
        }
        ("show", [id]) => {
            let entry = sessions.get_entry(token, id).await.map_err(explain)?;
            print_entry(&entry, true);
        }
        ("add", [site, domain, rest @ ..]) if rest.len() <= 1 => {
            let mut entry = NewEntry {
                site: site.to_string(),
                domain: domain.to_string(),
                username: rest.first().map(|u| u.to_string()).unwrap_or_default(),
                ..Default::default()
            };
            if let Some(password) = PasswordSource::Prompt.resolve()? {
                entry.password = password;
            }
            let stored = sessions.add_entry(token, entry).await.map_err(explain)?;
            println!("Entry added: {} ({})", stored.site, stored.id);
        }
        ("rm", [id]) => {
            sessions.delete_entry(token, id).await.map_err(explain)?;
            println!("Entry removed: {}", id);
        }
        ("gen", []) => println!("{}", generate_password(DEFAULT_GENERATED_LENGTH, true)?),
        ("gen", [length]) => {
            let length: usize = length.parse().context("Length must be a number")?;
            println!("{}", generate_password(length, true)?);
        }
        ("status", []) => {
            let status = sessions.status().await;
            if status.locked {
                println!("Locked.");
            } else {
                println!("Unlocked, {} entries.", status.entry_count);
                if let Some(at) = status.last_activity {
                    println!("Last activity: {}", at.format("%H:%M:%S UTC"));
                }
            }
        }
        ("lock", []) => {
            sessions.lock().await;
            println!("Locked.");
        }
        _ => println!("Unknown command or arguments: {} (try `help`)", command),
    }

    Ok(())
}

/// Render a session error for the prompt.
fn explain(err: Error) -> anyhow::Error {
    match err {
        Error::Locked | Error::InvalidSession => anyhow!("Vault is locked; type `unlock`"),
        other => anyhow!(other.public_message()),
    }
}
