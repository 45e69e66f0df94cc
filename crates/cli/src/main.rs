use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use collaboration::{Backoff, ChannelEvent, DocumentId, WsTransport};
use document::FormatStyle;
use notes::{NoteId, Preferences, SqliteStorage, Theme};
use session::{DocumentSession, LaunchTarget, SessionConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "notepad")]
#[command(about = "Notepad CLI - Local notes and shared documents from the terminal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding the notes database
    #[arg(long, global = true, env = "NOTEPAD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Base URL for shareable links
    #[arg(long, global = true, env = "NOTEPAD_SHARE_URL")]
    share_url: Option<String>,

    /// Collaboration server address
    #[arg(
        long,
        global = true,
        env = "NOTEPAD_SERVER",
        default_value = "ws://127.0.0.1:8080"
    )]
    server: String,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List notes in stored order
    List,

    /// Create a note and make it current
    New {
        title: String,

        /// Initial content
        #[arg(short, long)]
        content: Option<String>,
    },

    /// Print a note
    Show {
        #[arg(short, long)]
        note: Option<String>,
    },

    /// Replace a note's content
    Edit {
        content: String,

        #[arg(short, long)]
        note: Option<String>,

        /// Append instead of replacing
        #[arg(long)]
        append: bool,
    },

    /// Change a note's title
    Rename {
        title: String,

        #[arg(short, long)]
        note: Option<String>,
    },

    /// Delete a note (the last note cannot be deleted)
    Delete { note: String },

    /// Wrap a character range in markup
    Format {
        start: usize,
        end: usize,
        #[arg(value_enum)]
        style: StyleArg,

        #[arg(short, long)]
        note: Option<String>,
    },

    /// Find a term, wrapping past the end of the note
    Find {
        query: String,

        /// Character offset to search from
        #[arg(long, default_value = "0")]
        from: usize,

        #[arg(short, long)]
        note: Option<String>,
    },

    /// Replace the first match, or every match with --all
    Replace {
        query: String,
        replacement: String,

        #[arg(long)]
        all: bool,

        #[arg(short, long)]
        note: Option<String>,
    },

    /// Character, word and line counts
    Stats {
        #[arg(short, long)]
        note: Option<String>,
    },

    /// Write a note to a .txt file named after its title
    Export {
        #[arg(short, long)]
        note: Option<String>,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Show or set the theme preference
    Theme {
        #[arg(value_parser = parse_theme)]
        theme: Option<Theme>,
    },

    /// Show the local collaborator identity
    Whoami,

    /// Change the display name used in shared documents (blank resets it)
    Name { name: String },

    /// Publish a note to the collaboration server and print its link
    Share {
        #[arg(short, long)]
        note: Option<String>,
    },

    /// Open a shared document by link or id
    Join {
        link: String,

        /// Replace the shared content
        #[arg(long)]
        set: Option<String>,

        /// Send a chat message
        #[arg(long)]
        say: Option<String>,

        /// Keep printing remote changes until interrupted
        #[arg(short, long)]
        follow: bool,

        /// Retry with backoff while the server is unreachable
        #[arg(long)]
        retry: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StyleArg {
    Bold,
    Italic,
    Underline,
}

impl From<StyleArg> for FormatStyle {
    fn from(value: StyleArg) -> Self {
        match value {
            StyleArg::Bold => FormatStyle::Bold,
            StyleArg::Italic => FormatStyle::Italic,
            StyleArg::Underline => FormatStyle::Underline,
        }
    }
}

fn parse_theme(s: &str) -> std::result::Result<Theme, String> {
    s.parse()
}

type Session = DocumentSession<SqliteStorage>;

/// Where and how to open the session, from global flags
struct Profile {
    data_dir: PathBuf,
    share_url: Option<String>,
    server: String,
}

impl Profile {
    fn open(&self) -> Result<Session> {
        let db_path = self.data_dir.join("notepad.db");
        debug!("Opening {:?}", db_path);
        let mut storage = SqliteStorage::open_or_create(&db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        let preferences = Preferences::load(&mut storage)?;

        let mut config = SessionConfig::from_preferences(preferences);
        if let Some(url) = &self.share_url {
            config = config.with_share_base_url(url)?;
        }
        Ok(DocumentSession::open(storage, config)?)
    }

    /// Open the session positioned on `note`, or on the first note.
    fn open_note(&self, note: Option<&str>) -> Result<Session> {
        let mut session = self.open()?;
        if let Some(id) = note {
            session.select_note(&NoteId::from(id))?;
        }
        Ok(session)
    }

    fn transport(&self) -> WsTransport {
        WsTransport::new(self.server.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let ctx = Profile {
        data_dir: cli.data_dir.unwrap_or_else(notes::app_data_dir),
        share_url: cli.share_url,
        server: cli.server,
    };

    match cli.command {
        Commands::List => list_command(&ctx),
        Commands::New { title, content } => new_command(&ctx, title, content),
        Commands::Show { note } => show_command(&ctx, note),
        Commands::Edit {
            content,
            note,
            append,
        } => edit_command(&ctx, content, note, append),
        Commands::Rename { title, note } => rename_command(&ctx, title, note),
        Commands::Delete { note } => delete_command(&ctx, note),
        Commands::Format {
            start,
            end,
            style,
            note,
        } => format_command(&ctx, start, end, style.into(), note),
        Commands::Find { query, from, note } => find_command(&ctx, query, from, note),
        Commands::Replace {
            query,
            replacement,
            all,
            note,
        } => replace_command(&ctx, query, replacement, all, note),
        Commands::Stats { note } => stats_command(&ctx, note),
        Commands::Export { note, output } => export_command(&ctx, note, output),
        Commands::Theme { theme } => theme_command(&ctx, theme),
        Commands::Whoami => whoami_command(&ctx),
        Commands::Name { name } => name_command(&ctx, name),
        Commands::Share { note } => share_command(&ctx, note).await,
        Commands::Join {
            link,
            set,
            say,
            follow,
            retry,
        } => join_command(&ctx, link, set, say, follow, retry).await,
    }
}

fn list_command(ctx: &Profile) -> Result<()> {
    let session = ctx.open()?;
    for note in session.notes() {
        println!(
            "{}  {}  {}",
            note.id,
            note.last_modified.format("%Y-%m-%d %H:%M"),
            note.title
        );
    }
    Ok(())
}

fn new_command(ctx: &Profile, title: String, content: Option<String>) -> Result<()> {
    let mut session = ctx.open()?;
    let id = session.create_note(title)?;
    if let Some(content) = content {
        session.edit(content)?;
    }
    session.close()?;
    println!("{}", id);
    Ok(())
}

fn show_command(ctx: &Profile, note: Option<String>) -> Result<()> {
    let session = ctx.open_note(note.as_deref())?;
    println!("# {}", session.title());
    println!();
    println!("{}", session.content());
    Ok(())
}

fn edit_command(ctx: &Profile, content: String, note: Option<String>, append: bool) -> Result<()> {
    let mut session = ctx.open_note(note.as_deref())?;
    let content = if append {
        format!("{}{}", session.content(), content)
    } else {
        content
    };
    session.edit(content)?;
    session.close()?;
    Ok(())
}

fn rename_command(ctx: &Profile, title: String, note: Option<String>) -> Result<()> {
    let mut session = ctx.open_note(note.as_deref())?;
    session.set_title(title)?;
    session.close()?;
    Ok(())
}

fn delete_command(ctx: &Profile, note: String) -> Result<()> {
    let mut session = ctx.open()?;
    session.delete_note(&NoteId::from(note.as_str()))?;
    info!("Deleted note {}", note);
    session.close()?;
    Ok(())
}

fn format_command(
    ctx: &Profile,
    start: usize,
    end: usize,
    style: FormatStyle,
    note: Option<String>,
) -> Result<()> {
    let mut session = ctx.open_note(note.as_deref())?;
    session.select(start, end)?;
    session.format(style)?;
    println!("{}", session.content());
    session.close()?;
    Ok(())
}

fn find_command(ctx: &Profile, query: String, from: usize, note: Option<String>) -> Result<()> {
    let mut session = ctx.open_note(note.as_deref())?;
    session.select(from, from)?;
    match session.find(&query) {
        Some(range) => println!("{}..{}", range.start, range.end),
        None => bail!("{:?} not found", query),
    }
    Ok(())
}

fn replace_command(
    ctx: &Profile,
    query: String,
    replacement: String,
    all: bool,
    note: Option<String>,
) -> Result<()> {
    let mut session = ctx.open_note(note.as_deref())?;
    let count = if all {
        session.replace_all(&query, &replacement)?
    } else if session.find(&query).is_some() {
        session.replace(&replacement)?;
        1
    } else {
        0
    };
    session.close()?;
    println!("{} replaced", count);
    Ok(())
}

fn stats_command(ctx: &Profile, note: Option<String>) -> Result<()> {
    let session = ctx.open_note(note.as_deref())?;
    let stats = session.stats();
    println!("characters: {}", stats.characters);
    println!("words:      {}", stats.words);
    println!("lines:      {}", stats.lines);
    Ok(())
}

fn export_command(ctx: &Profile, note: Option<String>, output: PathBuf) -> Result<()> {
    let session = ctx.open_note(note.as_deref())?;
    let file = session.export();
    std::fs::create_dir_all(&output)?;
    let path = output.join(&file.filename);
    std::fs::write(&path, &file.bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("{}", path.display());
    Ok(())
}

fn theme_command(ctx: &Profile, theme: Option<Theme>) -> Result<()> {
    let mut session = ctx.open()?;
    if let Some(theme) = theme {
        session.set_theme(theme)?;
    }
    println!("{}", session.config().theme());
    Ok(())
}

fn whoami_command(ctx: &Profile) -> Result<()> {
    let session = ctx.open()?;
    let user = session.local_user();
    println!("{} ({}) {}", user.name, user.id, user.color.to_hex());
    Ok(())
}

fn name_command(ctx: &Profile, name: String) -> Result<()> {
    let mut session = ctx.open()?;
    session.set_user_name(&name)?;
    println!("{}", session.config().identity().name);
    Ok(())
}

async fn share_command(ctx: &Profile, note: Option<String>) -> Result<()> {
    let mut session = ctx.open_note(note.as_deref())?;
    let link = session.share(&ctx.transport()).await?;
    println!("{}", link);
    session.close()?;
    Ok(())
}

async fn join_command(
    ctx: &Profile,
    link: String,
    set: Option<String>,
    say: Option<String>,
    follow: bool,
    retry: bool,
) -> Result<()> {
    let target = if link.contains("://") {
        LaunchTarget::parse(&link)?
    } else {
        LaunchTarget::Shared(DocumentId::from(link.as_str()))
    };
    let LaunchTarget::Shared(document_id) = target else {
        bail!("{} does not name a shared document", link);
    };

    let mut session = ctx.open()?;
    let backoff = if retry {
        Backoff::default()
    } else {
        Backoff::none()
    };
    let snapshot = session
        .join_shared_with_retry(&ctx.transport(), document_id, &backoff)
        .await?;

    println!("# {}", snapshot.title);
    println!();
    println!("{}", snapshot.content);
    println!();
    for user in &snapshot.collaborators {
        println!("@ {} {}", user.name, user.color.to_hex());
    }
    for message in &snapshot.chat {
        println!(
            "[{}] {}: {}",
            message.timestamp.format("%H:%M"),
            message.user_name,
            message.message
        );
    }

    if let Some(content) = set {
        session.edit(content)?;
    }
    if let Some(message) = say {
        session.send_chat(&message)?;
    }

    if follow {
        loop {
            tokio::select! {
                event = session.next_event() => match event {
                    Some(ChannelEvent::Disconnected) | None => break,
                    Some(event) => print_event(&session, &event),
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }

    if !follow {
        // Give the socket writer a moment to deliver what was queued above
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    debug!("{}", serde_json::to_string(&session.view())?);
    session.close()?;
    Ok(())
}

fn print_event(session: &Session, event: &ChannelEvent) {
    match event {
        ChannelEvent::ContentReplaced { by } => {
            println!("-- content replaced by {}", by);
            println!("{}", session.content());
        }
        ChannelEvent::RosterChanged => {
            let view = session.view();
            let names: Vec<&str> = view.collaborators.iter().map(|u| u.name.as_str()).collect();
            println!("-- present: {}", names.join(", "));
        }
        ChannelEvent::CursorMoved { .. } => {}
        ChannelEvent::ChatReceived => {
            let view = session.view();
            if let Some(message) = view.chat_messages.last() {
                println!("{}: {}", message.user_name, message.message);
            }
        }
        ChannelEvent::Disconnected => println!("-- disconnected"),
    }
}
