//! CLI interface for questline

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use clap::{Args, Parser, Subcommand};

use crate::app::admin::{BlockForm, CategoryForm, ChallengeForm, ChapterForm, SectionForm};
use crate::app::view::AdminView;
use crate::app::{App, AppSettings};
use crate::backend::{ContentKind, LearningBackend, LocalBackend, RestBackend};
use crate::config::{BackendKind, Config};
use crate::error::AppResult;
use crate::faction::all_factions;
use crate::learning::Category;
use crate::render;
use crate::types::{NoticeLevel, UserRole};

#[derive(Parser)]
#[command(name = "questline")]
#[command(about = "Gamified learning in your terminal: join a faction, unlock chapters, climb the leaderboard", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session (default when no command given)
    Interactive,
    /// Create an account
    Register {
        email: String,
        /// Full name shown to admins
        #[arg(short, long, default_value = "")]
        name: String,
        #[command(flatten)]
        password: PasswordArg,
    },
    /// Sign in and remember the session
    Login {
        email: String,
        #[command(flatten)]
        password: PasswordArg,
    },
    /// Sign out and forget the stored session
    Logout,
    /// List the factions you can join
    Factions,
    /// Join a faction (only possible once)
    Faction {
        /// Faction id, e.g. it_dept
        id: String,
    },
    /// Show all categories and your progress
    Courses,
    /// Show the chapters of a category
    Category { id: String },
    /// Open a chapter at its first unfinished block
    Chapter { id: String },
    /// Open a single block
    Block { id: String },
    /// Mark a block complete
    Complete { id: String },
    /// Answer a quiz block
    Answer {
        id: String,
        /// Option letter (A, B, ...) or number (1, 2, ...)
        option: String,
    },
    /// Resume where you left off
    Continue,
    /// Show the personal and faction leaderboards
    Leaderboard,
    /// Show your profile and achievements
    Profile,
    /// Choose your display name (only possible once)
    SetName { name: String },
    /// Reset all of your progress
    Restart {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Manage learning content and challenges (admins only)
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
    /// Load a curriculum from a JSON file into the local database
    Import { file: PathBuf },
    /// Configure questline
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Reset configuration to defaults
        #[arg(long)]
        reset: bool,
        /// Switch backend: rest or local
        #[arg(long)]
        set_backend: Option<BackendKind>,
        /// Hosted backend url (with --set-backend rest)
        #[arg(long)]
        url: Option<String>,
        /// Hosted backend anon key (with --set-backend rest)
        #[arg(long)]
        anon_key: Option<String>,
    },
}

#[derive(Args)]
struct PasswordArg {
    /// Password (prompted for when omitted)
    #[arg(long, env = "QUESTLINE_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Subcommand)]
enum AdminCommands {
    /// List content at a drill-down level
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long, requires = "category")]
        chapter: Option<String>,
        #[arg(long, requires = "chapter")]
        section: Option<String>,
    },
    /// Create or update a category
    Category {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        order: String,
    },
    /// Create or update a chapter
    Chapter {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        category: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        order: String,
    },
    /// Create or update a section
    Section {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        chapter: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        order: String,
    },
    /// Create or update a block
    Block {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        section: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        order: String,
        #[arg(long, default_value = "")]
        video: String,
        #[arg(long, default_value = "")]
        document: String,
        /// Markdown body
        #[arg(long, default_value = "")]
        content: String,
        #[arg(long, default_value = "")]
        question: String,
        /// Quiz option, repeat for each one
        #[arg(long = "option")]
        options: Vec<String>,
        /// Index of the correct option, starting at 0
        #[arg(long, default_value = "")]
        answer: String,
        /// Points for first completion (default from config)
        #[arg(long, default_value = "")]
        points: String,
    },
    /// Delete a category, chapter, section, block or challenge
    Delete {
        kind: ContentKind,
        id: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// List all challenges
    Challenges,
    /// Create or update a challenge
    Challenge {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Category learners must finish to earn the reward
        #[arg(long, default_value = "")]
        target: String,
        #[arg(long, default_value = "0")]
        reward: String,
        /// Start date (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        /// Create the challenge inactive
        #[arg(long)]
        inactive: bool,
    },
    /// Settle a challenge and distribute its reward
    Finish { id: String },
    /// Grant the admin role (local backend only)
    Promote { email: String },
}

/// Backend selected by the configuration
pub struct Connection {
    pub kind: BackendKind,
    pub backend: Arc<dyn LearningBackend>,
    /// Same backend, when it is the local one
    pub local: Option<Arc<LocalBackend>>,
    rest: Option<Arc<RestBackend>>,
}

impl Connection {
    pub async fn open(config: &Config) -> Result<Self> {
        match config.backend.kind {
            BackendKind::Local => {
                let path = config.backend.database_path()?;
                let local = Arc::new(
                    LocalBackend::open(&path)
                        .await
                        .with_context(|| format!("Failed to open local database {}", path.display()))?,
                );
                Ok(Self { kind: BackendKind::Local, backend: local.clone(), local: Some(local), rest: None })
            }
            BackendKind::Rest => {
                let url = config
                    .backend
                    .url
                    .as_deref()
                    .context("No backend url configured. Run: questline config --set-backend rest --url <url>")?;
                let key = config.backend.anon_key.as_deref().unwrap_or_default();
                let rest = Arc::new(RestBackend::new(url, key).context("Failed to create REST client")?);
                Ok(Self { kind: BackendKind::Rest, backend: rest.clone(), local: None, rest: Some(rest) })
            }
        }
    }

    /// Start the websocket score listener for hosted backends
    pub fn start_realtime(&self, config: &Config) -> Option<tokio::task::JoinHandle<()>> {
        let rest = self.rest.as_ref().filter(|_| config.realtime.enabled)?;
        match rest.spawn_realtime(Duration::from_secs(config.realtime.heartbeat_secs)) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("Realtime updates unavailable: {}", e);
                None
            }
        }
    }

    pub fn new_app(&self, config: &Config) -> App<dyn LearningBackend> {
        App::new(Arc::clone(&self.backend), AppSettings::from_config(config))
    }

    /// Store whatever session the backend currently holds
    pub fn remember_session(&self) {
        if let Some(session) = self.backend.current_session() {
            if let Err(e) = crate::security::save_session(self.kind, &session) {
                tracing::warn!("Could not store session: {}", e);
            }
        }
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Interactive) => {
            crate::interactive::run_interactive().await?;
        }
        Some(Commands::Config { show, reset, set_backend, url, anon_key }) => {
            if reset {
                crate::config::reset_config()?;
            } else if let Some(kind) = set_backend {
                crate::config::set_backend(kind, url, anon_key)?;
            } else if show {
                crate::config::show_config()?;
            } else {
                println!("Configuration options:");
                println!("  --show                         Display current configuration");
                println!("  --reset                        Restore defaults");
                println!("  --set-backend <rest|local>     Switch backend");
                println!("      --url <url>                Hosted backend url");
                println!("      --anon-key <key>           Hosted backend public key");
                println!();
                println!("Default configuration:");
                println!("{}", crate::config::default_config_toml());
            }
        }
        Some(Commands::Factions) => {
            println!("Factions");
            for faction in all_factions() {
                println!("  {:<16} {}", faction.id, faction.name);
            }
        }
        Some(command) => {
            let config = Config::load()?;
            let conn = Connection::open(&config).await?;
            run_command(command, &config, &conn).await?;
        }
    }

    Ok(())
}

async fn run_command(command: Commands, config: &Config, conn: &Connection) -> Result<()> {
    match command {
        Commands::Register { email, name, password } => {
            let password = password.resolve()?;
            let mut app = conn.new_app(config);
            let result = app.register(&email, &password, &name).await;
            settle(&mut app, result)?;
            println!("Now run: questline login {}", email);
        }
        Commands::Login { email, password } => {
            let password = password.resolve()?;
            let mut app = conn.new_app(config);
            let result = app.login(&email, &password).await;
            settle(&mut app, result)?;
            conn.remember_session();
            restore_place(&mut app);
            print!("{}", render::render_view(app.state(), config.progression.empty_predecessor));
        }
        Commands::Logout => {
            let mut app = conn.new_app(config);
            if let Ok(Some(session)) = crate::security::load_session(conn.kind) {
                let _ = app.resume(&session).await;
            }
            app.logout().await;
            crate::security::clear_session(conn.kind)?;
            print_notifications(&mut app);
        }
        Commands::Faction { id } => {
            let mut app = signed_in(config, conn).await?;
            let result = app.select_faction(&id).await;
            settle(&mut app, result)?;
        }
        Commands::Courses => {
            let mut app = signed_in(config, conn).await?;
            show(&mut app, config);
        }
        Commands::Category { id } => {
            let mut app = signed_in(config, conn).await?;
            let result = app.select_category(&id);
            settle(&mut app, result)?;
            show(&mut app, config);
        }
        Commands::Chapter { id } => {
            let mut app = signed_in(config, conn).await?;
            let result = app.select_chapter(&id);
            keep_place(&app);
            settle(&mut app, result)?;
            show(&mut app, config);
        }
        Commands::Block { id } => {
            let mut app = signed_in(config, conn).await?;
            let result = app.select_block(&id);
            keep_place(&app);
            settle(&mut app, result)?;
            show(&mut app, config);
        }
        Commands::Complete { id } => {
            let mut app = signed_in(config, conn).await?;
            let result = app.complete_block(&id).await;
            keep_place(&app);
            if settle(&mut app, result)?.is_none() {
                println!("Block {} was already completed.", id);
            }
        }
        Commands::Answer { id, option } => {
            let choice = parse_option(&option)?;
            let mut app = signed_in(config, conn).await?;
            let result = app.answer_quiz(&id, choice).await;
            keep_place(&app);
            settle(&mut app, result)?;
        }
        Commands::Continue => {
            let mut app = signed_in(config, conn).await?;
            let result = app.continue_learning().await;
            keep_place(&app);
            settle(&mut app, result)?;
            show(&mut app, config);
        }
        Commands::Leaderboard => {
            // Public data; a stored session only decides whose row is marked
            let app = conn.new_app(config);
            app.refresh_leaderboards().await;
            let panel = app.leaderboard().snapshot().await;
            let me = crate::security::load_session(conn.kind).ok().flatten().map(|s| s.user.id);
            print!("{}", render::render_leaderboard(&panel, me.as_deref()));
        }
        Commands::Profile => {
            let mut app = signed_in(config, conn).await?;
            let result = app.open_profile().await;
            settle(&mut app, result)?;
            show(&mut app, config);
        }
        Commands::SetName { name } => {
            let mut app = signed_in(config, conn).await?;
            let result = app.set_username(&name).await;
            settle(&mut app, result)?;
        }
        Commands::Restart { yes } => {
            if !yes && !confirm("Reset all of your progress?")? {
                println!("Cancelled.");
                return Ok(());
            }
            let mut app = signed_in(config, conn).await?;
            let result = app.restart().await;
            keep_place(&app);
            settle(&mut app, result)?;
        }
        Commands::Admin { command } => run_admin(command, config, conn).await?,
        Commands::Import { file } => {
            let local = conn.local.as_ref().context("import only works with the local backend")?;
            let contents =
                std::fs::read_to_string(&file).with_context(|| format!("Failed to read {}", file.display()))?;
            let tree: Vec<Category> = serde_json::from_str(&contents).context("File is not a curriculum tree")?;
            let blocks = local.import_tree(&tree).await?;
            println!("Imported {} categories ({} blocks) from {}", tree.len(), blocks, file.display());
        }
        Commands::Interactive | Commands::Factions | Commands::Config { .. } => {}
    }
    Ok(())
}

async fn run_admin(command: AdminCommands, config: &Config, conn: &Connection) -> Result<()> {
    if let AdminCommands::Promote { email } = &command {
        let local = conn.local.as_ref().context("promote only works with the local backend")?;
        local.set_role(email, UserRole::Admin).await?;
        println!("{} is now an admin.", email);
        return Ok(());
    }

    let mut app = signed_in(config, conn).await?;
    let result = app.open_admin();
    settle(&mut app, result)?;

    match command {
        AdminCommands::List { category, chapter, section } => {
            let target = match (category, chapter, section) {
                (Some(category), Some(chapter), Some(section)) => AdminView::Blocks { category, chapter, section },
                (Some(category), Some(chapter), None) => AdminView::Sections { category, chapter },
                (Some(category), None, _) => AdminView::Chapters { category },
                _ => AdminView::Categories,
            };
            if target != AdminView::Categories {
                let result = app.admin_navigate(target);
                settle(&mut app, result)?;
            }
            show(&mut app, config);
        }
        AdminCommands::Category { id, title, description, order } => {
            let result = app.save_category(&CategoryForm { id, title, description, order }).await;
            settle(&mut app, result)?;
        }
        AdminCommands::Chapter { id, category, title, description, order } => {
            let form = ChapterForm { id, category_id: category, title, description, order };
            let result = app.save_chapter(&form).await;
            settle(&mut app, result)?;
        }
        AdminCommands::Section { id, chapter, title, order } => {
            let result = app.save_section(&SectionForm { id, chapter_id: chapter, title, order }).await;
            settle(&mut app, result)?;
        }
        AdminCommands::Block {
            id,
            section,
            title,
            order,
            video,
            document,
            content,
            question,
            options,
            answer,
            points,
        } => {
            let form = BlockForm {
                id,
                section_id: section,
                title,
                order,
                video_url: video,
                document_url: document,
                content_markdown: content,
                quiz_question: question,
                quiz_options: options,
                correct_answer_index: answer,
                points,
            };
            let result = app.save_block(&form).await;
            settle(&mut app, result)?;
        }
        AdminCommands::Delete { kind, id, yes } => {
            if !yes && !confirm(&format!("Delete {} {} and everything inside it?", kind, id))? {
                println!("Cancelled.");
                return Ok(());
            }
            let result = app.delete_content(kind, &id).await;
            settle(&mut app, result)?;
        }
        AdminCommands::Challenges => {
            let result = app.admin_navigate(AdminView::Challenges);
            settle(&mut app, result)?;
            let result = app.load_challenges().await;
            settle(&mut app, result)?;
            show(&mut app, config);
        }
        AdminCommands::Challenge { id, title, description, target, reward, start, end, inactive } => {
            let form = ChallengeForm {
                id,
                title,
                description,
                target_category_id: target,
                reward_points: reward,
                start_date: start,
                end_date: end,
                is_active: !inactive,
            };
            let result = app.save_challenge(&form).await;
            settle(&mut app, result)?;
        }
        AdminCommands::Finish { id } => {
            let result = app.finish_challenge(&id).await;
            settle(&mut app, result)?;
        }
        AdminCommands::Promote { .. } => {}
    }
    Ok(())
}

/// Resume the stored session
async fn signed_in(config: &Config, conn: &Connection) -> Result<App<dyn LearningBackend>> {
    let session = crate::security::load_session(conn.kind)?
        .context("Not signed in. Run: questline login <email>")?;

    let mut app = conn.new_app(config);
    let result = app.resume(&session).await;
    if result.is_err() {
        crate::security::clear_session(conn.kind)?;
    }
    settle(&mut app, result)?;
    conn.remember_session();
    restore_place(&mut app);
    Ok(app)
}

/// Pick up the resume point stored by an earlier run
pub(crate) fn restore_place(app: &mut App<dyn LearningBackend>) {
    let Some(user_id) = app.state().user.as_ref().map(|u| u.id.clone()) else {
        return;
    };
    match crate::bookmark::load_last_viewed(&user_id) {
        Ok(block) => app.restore_last_viewed(block),
        Err(e) => tracing::warn!("Could not read resume point: {}", e),
    }
}

/// Store the resume point for the next run
pub(crate) fn keep_place(app: &App<dyn LearningBackend>) {
    let state = app.state();
    if let Some(user) = &state.user {
        if let Err(e) = crate::bookmark::save_last_viewed(&user.id, state.last_viewed_block.clone()) {
            tracing::warn!("Could not store resume point: {}", e);
        }
    }
}

/// Print pending notifications and turn a failed action into an exit
fn settle<T>(app: &mut App<dyn LearningBackend>, result: AppResult<T>) -> Result<T> {
    let printed = print_notifications(app);
    match result {
        Ok(value) => Ok(value),
        Err(_) if printed => std::process::exit(1),
        Err(e) => Err(e.into()),
    }
}

fn print_notifications(app: &mut App<dyn LearningBackend>) -> bool {
    let notes = app.take_notifications();
    for note in &notes {
        match note.level {
            NoticeLevel::Warning | NoticeLevel::Error => eprintln!("{}", note),
            NoticeLevel::Info | NoticeLevel::Success => println!("{}", note),
        }
    }
    notes.iter().any(|n| matches!(n.level, NoticeLevel::Warning | NoticeLevel::Error))
}

fn show(app: &mut App<dyn LearningBackend>, config: &Config) {
    print!("{}", render::render_view(app.state(), config.progression.empty_predecessor));
}

/// Quiz option given as a letter (A, b) or a 1-based number
pub fn parse_option(input: &str) -> Result<usize> {
    let input = input.trim();
    if let Ok(n) = input.parse::<usize>() {
        if n == 0 {
            bail!("Options are numbered from 1");
        }
        return Ok(n - 1);
    }
    let mut chars = input.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => Ok((c.to_ascii_uppercase() as u8 - b'A') as usize),
        _ => bail!("'{}' is not an option letter or number", input),
    }
}

impl PasswordArg {
    fn resolve(self) -> Result<String> {
        match self.password {
            Some(password) => Ok(password),
            None => read_password("Password: "),
        }
    }
}

/// Read a line without echoing it
pub fn read_password(prompt: &str) -> Result<String> {
    use crossterm::event::{read, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
    use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

    eprint!("{}", prompt);
    std::io::stderr().flush()?;

    enable_raw_mode().context("Failed to read password")?;
    let mut password = String::new();
    let outcome = loop {
        match read() {
            Ok(Event::Key(KeyEvent { code, modifiers, kind: KeyEventKind::Press, .. })) => match code {
                KeyCode::Enter => break Ok(()),
                KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => break Err(anyhow::anyhow!("Cancelled")),
                KeyCode::Char(c) => password.push(c),
                KeyCode::Backspace => {
                    password.pop();
                }
                _ => {}
            },
            Ok(_) => {}
            Err(e) => break Err(e.into()),
        }
    };
    disable_raw_mode()?;
    eprintln!();

    outcome.map(|_| password)
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_option() {
        assert_eq!(parse_option("A").unwrap(), 0);
        assert_eq!(parse_option("c").unwrap(), 2);
        assert_eq!(parse_option("2").unwrap(), 1);
        assert!(parse_option("0").is_err());
        assert!(parse_option("AB").is_err());
        assert!(parse_option("?").is_err());
    }

    #[test]
    fn test_admin_block_collects_options() {
        let cli = Cli::try_parse_from([
            "questline", "admin", "block", "--section", "s1", "--title", "Check", "--question", "Pick",
            "--option", "red", "--option", "blue", "--answer", "1",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Admin { command: AdminCommands::Block { options, answer, .. } }) => {
                assert_eq!(options, vec!["red", "blue"]);
                assert_eq!(answer, "1");
            }
            _ => panic!("expected admin block"),
        }
    }
}
