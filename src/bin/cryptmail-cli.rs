#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI running one-shot sync tasks against a real mail account

use anyhow::Context;
use clap::{Parser, Subcommand};
use cryptmail_sync::{
    AccountConfig, CacheWriter, ImapAuth, ImapConnector, InMemoryStore, LocalFolder, Progress,
    SmtpSubmission, StaticTokenProvider, SyncDeps, SyncEvent, SyncManager, SyncSettings, SyncTask,
    TaskKind, TokenProvider, Uid,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const OWNER_KEY: &str = "cryptmail-cli";
const REQUEST_CODE: i32 = 1;

#[derive(Parser)]
#[command(name = "cryptmail-cli")]
#[command(about = "Run mail sync tasks and print their results")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output events as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Authenticate with LOGIN / AUTH PLAIN instead of XOAUTH2
    #[arg(long, global = true)]
    password_auth: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List available folders
    Folders,

    /// Load messages by position (1 is the oldest)
    List {
        #[arg(long, default_value = "INBOX")]
        folder: String,

        #[arg(long, default_value = "1")]
        start: u32,

        #[arg(long, default_value = "20")]
        end: u32,
    },

    /// Load the next page of older messages
    Page {
        #[arg(long, default_value = "INBOX")]
        folder: String,

        /// Number of newest messages already loaded
        #[arg(long, default_value = "0")]
        loaded: u32,
    },

    /// Show a single raw message by UID
    Show {
        uid: Uid,

        #[arg(long, default_value = "INBOX")]
        folder: String,
    },

    /// Load messages newer than a UID
    New {
        #[arg(long, default_value = "INBOX")]
        folder: String,

        #[arg(long, default_value = "0")]
        last_uid: Uid,
    },

    /// Reconcile a folder and print the insert/update/delete sets
    Sync {
        #[arg(long, default_value = "INBOX")]
        folder: String,
    },

    /// Move messages between folders
    Move {
        /// UIDs to move
        #[arg(required = true)]
        uids: Vec<Uid>,

        #[arg(long, default_value = "INBOX")]
        from: String,

        #[arg(long)]
        to: String,
    },

    /// Send a raw RFC 5322 message read from a file
    Send { path: std::path::PathBuf },
}

fn folder(name: &str) -> LocalFolder {
    let alias = name.rsplit('/').next().unwrap_or(name);
    LocalFolder::new(name, alias)
}

impl Command {
    fn task_kind(&self) -> anyhow::Result<TaskKind> {
        Ok(match self {
            Self::Folders => TaskKind::UpdateLabels,
            Self::List { folder: f, start, end } => TaskKind::LoadMessages {
                folder: folder(f),
                start: *start,
                end: *end,
            },
            Self::Page { folder: f, loaded } => TaskKind::LoadMessagesToCache {
                folder: folder(f),
                already_loaded: *loaded,
            },
            Self::Show { uid, folder: f } => TaskKind::LoadMessageDetails {
                folder: folder(f),
                uid: *uid,
            },
            Self::New { folder: f, last_uid } => TaskKind::LoadNewMessages {
                folder: folder(f),
                last_uid: *last_uid,
            },
            Self::Sync { folder: f } => TaskKind::SyncFolder { folder: folder(f) },
            Self::Move { uids, from, to } => TaskKind::MoveMessages {
                source: folder(from),
                destination: folder(to),
                uids: uids.clone(),
            },
            Self::Send { path } => TaskKind::SendMessage {
                raw: std::fs::read(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
            },
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AccountConfig::from_env()?;
    let settings = SyncSettings::from_env()?;
    let tokens = Arc::new(StaticTokenProvider::from_env()?);

    let (connector, submission) = if args.password_auth {
        (
            ImapConnector::new(config.clone()).with_auth(ImapAuth::Login),
            SmtpSubmission::new(&config).with_password_auth(),
        )
    } else {
        (ImapConnector::new(config.clone()), SmtpSubmission::new(&config))
    };

    let store = Arc::new(InMemoryStore::new());
    let writer = CacheWriter::new(tokens.email(), Arc::clone(&store));
    let (manager, mut events) = SyncManager::new(SyncDeps {
        connector: Arc::new(connector),
        tokens,
        submission: Arc::new(submission),
        store,
        settings,
    });

    manager.enqueue(SyncTask::new(
        OWNER_KEY,
        REQUEST_CODE,
        args.command.task_kind()?,
    ));
    manager.begin_sync(false);

    let outcome = loop {
        let event = events.recv().await.context("Sync worker stopped")?;
        if let SyncEvent::Progress { progress, .. } = &event {
            tracing::debug!("Progress: {:?}", progress);
            if *progress == Progress::TaskCompleted {
                break Ok(());
            }
            continue;
        }
        writer.apply(&event).await?;
        print_event(&args, &event)?;
        if let SyncEvent::Error { kind, error, .. } = &event {
            break Err(anyhow::anyhow!("{error} ({kind:?})"));
        }
    };

    manager.stop_sync().await;
    outcome
}

fn print_event(args: &Args, event: &SyncEvent) -> anyhow::Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(event)?);
        return Ok(());
    }

    match event {
        SyncEvent::FolderInfoReceived { folders, .. } => {
            for f in folders {
                println!("{} ({:?})", f.full_name, f.folder_type());
            }
        }
        SyncEvent::MsgsReceived { messages, .. } => {
            for m in messages {
                print_summary(m.uid, &m.flags.to_string(), &m.envelope.subject);
            }
            println!("\n{} message(s)", messages.len());
        }
        SyncEvent::MsgDetailsReceived { raw, .. } => {
            println!("{}", String::from_utf8_lossy(raw));
        }
        SyncEvent::NewMsgsReceived {
            messages,
            encryption_states,
            ..
        } => {
            for m in messages {
                let encrypted = m
                    .uid
                    .and_then(|uid| encryption_states.get(&uid))
                    .copied()
                    .unwrap_or(false);
                let marker = if encrypted { "[pgp] " } else { "" };
                let subject = format!("{marker}{}", m.envelope.subject);
                print_summary(m.uid, &m.flags.to_string(), &subject);
            }
            println!("\n{} new message(s)", messages.len());
        }
        SyncEvent::RefreshMsgsReceived {
            new_msgs,
            updated_msgs,
            deleted_uids,
            ..
        } => {
            println!("New:     {}", new_msgs.len());
            println!("Updated: {}", updated_msgs.len());
            println!("Deleted: {}", deleted_uids.len());
        }
        SyncEvent::MsgsMoved {
            uids, destination, ..
        } => {
            println!("Moved {} message(s) to {}", uids.len(), destination);
        }
        SyncEvent::MsgSent { .. } => println!("Message sent"),
        // Reported through the exit status.
        SyncEvent::Error { .. } | SyncEvent::Progress { .. } => {}
    }
    Ok(())
}

fn print_summary(uid: Option<Uid>, flags: &str, subject: &str) {
    let uid = uid.map_or_else(|| "-".to_string(), |u| u.to_string());
    println!("{uid:>6}  {flags:<20}  {subject}");
}
