#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for the encrypted mail account vault

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use mail_vault::{
    AccountId, AccountRecord, HeaderSummary, Mail, MailService, OutgoingMail, decode_mailbox_name,
};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mail-vault")]
#[command(about = "Encrypted mail account vault with IMAP/SMTP access")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Tenant key that seals and opens account records
    #[arg(long, env = "MAIL_VAULT_KEY", hide_env_values = true, global = true, required = false)]
    key: String,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Manage stored accounts
    #[command(subcommand)]
    Account(AccountCommand),

    /// List an account's mailboxes with message counts
    Mailboxes {
        /// Account id
        id: AccountId,
    },

    /// List one page of message headers, newest first
    Headers {
        /// Account id
        id: AccountId,

        /// Mailbox name
        mailbox: String,

        /// Page number (1-based)
        #[arg(long)]
        page: Option<u32>,

        /// The mailbox name is base64-encoded
        #[arg(long)]
        base64: bool,
    },

    /// Show a single message by UID
    Show {
        /// Account id
        id: AccountId,

        /// Mailbox name
        mailbox: String,

        /// Message UID
        uid: u32,

        /// The mailbox name is base64-encoded
        #[arg(long)]
        base64: bool,
    },

    /// Delete a single message by UID
    Delete {
        /// Account id
        id: AccountId,

        /// Mailbox name
        mailbox: String,

        /// Message UID
        uid: u32,

        /// The mailbox name is base64-encoded
        #[arg(long)]
        base64: bool,
    },

    /// Send a message through the account's SMTP server
    Send {
        /// Account id
        id: AccountId,

        /// Comma-separated recipients
        #[arg(long, default_value = "")]
        to: String,

        #[arg(long, default_value = "")]
        cc: String,

        #[arg(long, default_value = "")]
        bcc: String,

        #[arg(long, default_value = "")]
        subject: String,

        /// Message body (read from stdin if omitted)
        #[arg(long)]
        body: Option<String>,
    },
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Store a new account from a JSON payload
    Add {
        /// Payload file (stdin if omitted)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// List accounts readable with the key
    List,

    /// Show one account
    Show {
        id: AccountId,
    },

    /// Replace an account from a JSON payload
    Edit {
        id: AccountId,

        /// Payload file (stdin if omitted)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Remove an account
    Delete {
        id: AccountId,
    },
}

fn mailbox_name(mailbox: &str, base64: bool) -> anyhow::Result<String> {
    if base64 {
        Ok(decode_mailbox_name(mailbox)?)
    } else {
        Ok(mailbox.to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let service = MailService::from_env()?;
    let key = args.key.as_str();

    match &args.command {
        Command::Account(cmd) => cmd_account(&service, &args, cmd)?,
        Command::Mailboxes { id } => {
            let Some(listing) = service.mailboxes(key, *id).await? else {
                bail!("Account {id} not found");
            };
            if args.json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                println!("{} ({})", listing.name, listing.id);
                for mb in &listing.mail_boxes {
                    let note = if mb.selectable { "" } else { "  [no select]" };
                    println!(
                        "  {:<30} {:>6} {:>6}{note}",
                        mb.name, mb.message_count, mb.unseen_count
                    );
                }
            }
        }
        Command::Headers {
            id,
            mailbox,
            page,
            base64,
        } => {
            let mailbox = mailbox_name(mailbox, *base64)?;
            let Some(result) = service.mail_headers(key, *id, &mailbox, *page).await? else {
                bail!("Account {id} not found");
            };
            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_header_table(&result.headers);
                println!(
                    "\npage {} ({} per page), {} message(s) in {mailbox}",
                    result.page, result.page_size, result.total_messages
                );
            }
        }
        Command::Show {
            id,
            mailbox,
            uid,
            base64,
        } => {
            let mailbox = mailbox_name(mailbox, *base64)?;
            let Some(mail) = service.mail(key, *id, &mailbox, *uid).await? else {
                bail!("Message {uid} not found in {mailbox} for account {id}");
            };
            if args.json {
                println!("{}", serde_json::to_string_pretty(&mail)?);
            } else {
                print_mail_detail(&mail);
            }
        }
        Command::Delete {
            id,
            mailbox,
            uid,
            base64,
        } => {
            let mailbox = mailbox_name(mailbox, *base64)?;
            if !service.delete_mail(key, *id, &mailbox, *uid).await? {
                bail!("Message {uid} not found in {mailbox} for account {id}");
            }
            println!("Deleted message {uid}");
        }
        Command::Send {
            id,
            to,
            cc,
            bcc,
            subject,
            body,
        } => {
            let body = match body {
                Some(body) => body.clone(),
                None => String::from_utf8(read_input(None)?)?,
            };
            let mail = OutgoingMail {
                to: to.clone(),
                cc: cc.clone(),
                bcc: bcc.clone(),
                subject: subject.clone(),
                body,
            };
            if service.send_mail(key, *id, &mail).await?.is_none() {
                bail!("Account {id} not found");
            }
            println!("Sent");
        }
    }

    Ok(())
}

fn cmd_account(service: &MailService, args: &Args, cmd: &AccountCommand) -> anyhow::Result<()> {
    let key = args.key.as_str();
    match cmd {
        AccountCommand::Add { file } => {
            let id = service.add_account(key, &read_input(file.as_deref())?)?;
            if args.json {
                println!("{}", serde_json::json!({ "id": id }));
            } else {
                println!("{id}");
            }
        }
        AccountCommand::List => {
            let entries = service.accounts(key)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No accounts found.");
            } else {
                for entry in &entries {
                    println!("{:<6} {}", entry.id, summarize(&entry.record));
                }
            }
        }
        AccountCommand::Show { id } => {
            let Some(record) = service.account(key, *id)? else {
                bail!("Account {id} not found");
            };
            if args.json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("{id}     {}", summarize(&record));
                let smtp = &record.smtp;
                println!("SMTP:  {}:{} ({})", smtp.host, smtp.port, smtp.from_email);
            }
        }
        AccountCommand::Edit { id, file } => {
            if !service.edit_account(key, *id, &read_input(file.as_deref())?)? {
                bail!("Account {id} not found");
            }
            println!("Updated account {id}");
        }
        AccountCommand::Delete { id } => {
            if !service.delete_account(key, *id)? {
                bail!("Account {id} not found");
            }
            println!("Deleted account {id}");
        }
    }
    Ok(())
}

fn read_input(file: Option<&std::path::Path>) -> anyhow::Result<Vec<u8>> {
    match file {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("Reading {}", path.display()))
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Reading stdin")?;
            Ok(buf)
        }
    }
}

fn summarize(record: &AccountRecord) -> String {
    format!(
        "{:<20} {}@{}:{}",
        truncate(&record.name, 20),
        record.imap.username,
        record.imap.host,
        record.imap.port
    )
}

fn print_header_table(headers: &[HeaderSummary]) {
    if headers.is_empty() {
        println!("No messages found.");
        return;
    }

    println!("{:<8} {:<1} {:<17} {:<30} Subject", "UID", "", "Date", "From");
    println!("{}", "-".repeat(100));

    for h in headers {
        println!(
            "{:<8} {:<1} {:<17} {:<30} {}",
            h.uid,
            if h.seen { " " } else { "*" },
            h.date
                .map_or_else(|| "-".to_string(), |d| d.format("%Y-%m-%d %H:%M").to_string()),
            truncate(&h.from, 28),
            truncate(&h.subject, 40),
        );
    }
}

fn print_mail_detail(mail: &Mail) {
    let h = &mail.header;
    println!("UID:     {}", h.uid);
    if let Some(date) = h.date {
        println!("Date:    {}", date.format("%Y-%m-%d %H:%M:%S"));
    }
    println!("From:    {}", h.from);
    println!("To:      {}", h.to);
    if !mail.cc.is_empty() {
        println!("CC:      {}", mail.cc);
    }
    if let Some(reply_to) = &mail.reply_to {
        println!("Reply-To: {reply_to}");
    }
    println!("Subject: {}", h.subject);
    if let Some(id) = &h.message_id {
        println!("Msg-ID:  {id}");
    }

    println!("\n--- Body ---\n");
    println!(
        "{}",
        mail.text_body
            .as_deref()
            .or(mail.html_body.as_deref())
            .unwrap_or("(no text body)")
    );

    if !mail.attachments.is_empty() {
        println!("\n--- Attachments ---");
        for a in &mail.attachments {
            println!("  {} ({}, {} bytes)", a.filename, a.content_type, a.size);
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
