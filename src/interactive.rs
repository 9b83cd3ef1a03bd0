//! Interactive client
//!
//! A rustyline REPL over [`App`]. Every command maps onto one controller
//! action; after each action pending notifications and the current view are
//! printed.

use std::io::{self, IsTerminal};
use std::time::Duration;

use anyhow::Result;
use crossterm::{execute, style::{Color, Print, ResetColor, SetForegroundColor}};
use indicatif::{ProgressBar, ProgressStyle};
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::Helper;

use crate::app::view::{AdminView, CourseView, MediaKind, View};
use crate::app::App;
use crate::backend::{ContentKind, LearningBackend};
use crate::cli::{keep_place, parse_option, read_password, restore_place, Connection};
use crate::config::Config;
use crate::render;
use crate::types::NoticeLevel;

const COMMANDS: &[&str] = &[
    "/help", "/login", "/register", "/logout", "/factions", "/faction", "/courses", "/open", "/back",
    "/complete", "/answer", "/continue", "/video", "/doc", "/leaderboard", "/profile", "/name", "/restart",
    "/admin", "/challenges", "/delete", "/finish", "/exit",
];

/// Tab completion and hints for slash commands
struct QuestHelper {
    commands: Vec<&'static str>,
}

impl QuestHelper {
    fn new() -> Self {
        Self { commands: COMMANDS.to_vec() }
    }
}

impl Completer for QuestHelper {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> rustyline::Result<(usize, Vec<Pair>)> {
        let partial = &line[..pos];
        if !partial.starts_with('/') || partial.contains(' ') {
            return Ok((pos, Vec::new()));
        }
        let matches = self
            .commands
            .iter()
            .filter(|c| c.starts_with(partial))
            .map(|c| Pair { display: c.to_string(), replacement: c[partial.len()..].to_string() })
            .collect();
        Ok((pos, matches))
    }
}

impl Hinter for QuestHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<Self::Hint> {
        if !line.starts_with('/') || pos < line.len() {
            return None;
        }
        self.commands
            .iter()
            .find(|c| c.starts_with(line) && **c != line)
            .map(|c| c[line.len()..].to_string())
    }
}

impl Validator for QuestHelper {
    fn validate(&self, _ctx: &mut ValidationContext<'_>) -> rustyline::Result<ValidationResult> {
        Ok(ValidationResult::Valid(None))
    }
}

impl Highlighter for QuestHelper {}

impl Helper for QuestHelper {}

fn print_colored(text: &str, color: Color) {
    let _ = execute!(io::stdout(), SetForegroundColor(color), Print(text), ResetColor);
}

fn print_dim(text: &str) {
    print_colored(text, Color::DarkGrey);
}

fn print_error(text: &str) {
    print_colored(text, Color::Red);
}

fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("  {spinner:.dim} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn print_help() {
    println!();
    print_dim("═══ Commands ═══\n");
    println!("  /login <email>          Sign in");
    println!("  /register <email> [name] Create an account");
    println!("  /factions               List factions");
    println!("  /faction <id>           Join a faction");
    println!("  /courses                Category overview");
    println!("  /open <id>              Open a category, chapter or block");
    println!("  /back                   Go up one level");
    println!("  /complete [block]       Mark the open block complete");
    println!("  /answer <option>        Answer the open quiz (A, B, ... or 1, 2, ...)");
    println!("  /continue               Resume where you left off");
    println!("  /video, /doc            Open the block's media");
    println!("  /leaderboard            Personal and faction rankings");
    println!("  /profile                Your profile and achievements");
    println!("  /name <display name>    Choose your display name (once)");
    println!("  /restart                Reset all progress");
    println!("  /admin [id]             Admin content browser (admins only)");
    println!("  /challenges             Admin challenge list");
    println!("  /delete <kind> <id>     Delete content (admins only)");
    println!("  /finish <challenge>     Settle a challenge (admins only)");
    println!("  /logout, /exit");
    println!();
}

/// Expand a unique command prefix ("/lead" -> "/leaderboard")
fn resolve_command(input: &str) -> String {
    let mut parts = input.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("");
    let rest = parts.next();

    if COMMANDS.contains(&cmd) {
        return input.to_string();
    }
    let matches: Vec<&&str> = COMMANDS.iter().filter(|c| c.starts_with(cmd)).collect();
    match (matches.as_slice(), rest) {
        ([only], Some(rest)) => format!("{} {}", only, rest),
        ([only], None) => only.to_string(),
        _ => input.to_string(),
    }
}

type ReplApp = App<dyn LearningBackend>;

struct Repl {
    app: ReplApp,
    config: Config,
    conn: Connection,
}

impl Repl {
    fn show_notifications(&mut self) {
        for note in self.app.take_notifications() {
            let color = match note.level {
                NoticeLevel::Info => Color::Cyan,
                NoticeLevel::Success => Color::Green,
                NoticeLevel::Warning => Color::Yellow,
                NoticeLevel::Error => Color::Red,
            };
            print_colored(&format!("{}\n", note), color);
        }
    }

    async fn show_view(&mut self) {
        println!();
        if matches!(self.app.view(), View::Landing) {
            self.app.load_landing().await;
            let panel = self.app.leaderboard().snapshot().await;
            print!("{}", render::render_landing_page(&panel, &self.app.state().active_challenges));
            return;
        }
        print!("{}", render::render_view(self.app.state(), self.config.progression.empty_predecessor));
    }

    /// Handle one line; returns false to quit
    async fn handle(&mut self, input: &str) -> Result<bool> {
        let resolved = resolve_command(input);
        let mut parts = resolved.splitn(2, char::is_whitespace);
        let command = parts.next().unwrap_or("");
        let arg = parts.next().map(str::trim).unwrap_or("");

        match command {
            "/help" => {
                print_help();
                return Ok(true);
            }
            "/exit" => return Ok(false),
            "/factions" => {
                print!("{}", render_factions());
                return Ok(true);
            }
            "/login" => self.login(arg).await?,
            "/register" => self.register(arg).await?,
            "/logout" => {
                self.app.logout().await;
                crate::security::clear_session(self.conn.kind)?;
            }
            "/faction" => {
                let _ = self.app.select_faction(arg).await;
            }
            "/courses" => {
                while !matches!(
                    self.app.view(),
                    View::Main(CourseView::CategorySelection) | View::Landing | View::Auth { .. } | View::FactionSelection
                ) {
                    if self.app.back().is_err() {
                        break;
                    }
                }
            }
            "/open" => self.open(arg),
            "/back" => {
                let _ = self.app.back();
            }
            "/complete" => {
                let Some(block) = self.target_block(arg) else {
                    print_error("Open a block first or name one\n");
                    return Ok(true);
                };
                let spinner = create_spinner("Saving...");
                let _ = self.app.complete_block(&block).await;
                spinner.finish_and_clear();
            }
            "/answer" => {
                let Some(block) = self.target_block("") else {
                    print_error("Open a quiz block first\n");
                    return Ok(true);
                };
                match parse_option(arg) {
                    Ok(choice) => {
                        let _ = self.app.answer_quiz(&block, choice).await;
                    }
                    Err(e) => print_error(&format!("{}\n", e)),
                }
            }
            "/continue" => {
                let _ = self.app.continue_learning().await;
            }
            "/video" => {
                let _ = self.app.open_media(MediaKind::Video);
            }
            "/doc" => {
                let _ = self.app.open_media(MediaKind::Document);
            }
            "/leaderboard" => {
                let spinner = create_spinner("Loading leaderboards...");
                self.app.refresh_leaderboards().await;
                spinner.finish_and_clear();
                let panel = self.app.leaderboard().snapshot().await;
                let me = self.app.state().user.as_ref().map(|u| u.id.clone());
                print!("{}", render::render_leaderboard(&panel, me.as_deref()));
                return Ok(true);
            }
            "/profile" => {
                let _ = self.app.open_profile().await;
            }
            "/name" => {
                let _ = self.app.set_username(arg).await;
            }
            "/restart" => {
                if arg != "confirm" {
                    print_dim("This erases all progress. Type /restart confirm to proceed.\n");
                    return Ok(true);
                }
                let _ = self.app.restart().await;
            }
            "/admin" => self.admin(arg),
            "/challenges" => {
                if !matches!(self.app.view(), View::Admin(_)) && self.app.open_admin().is_err() {
                    self.show_notifications();
                    return Ok(true);
                }
                if self.app.admin_navigate(AdminView::Challenges).is_ok() {
                    let _ = self.app.load_challenges().await;
                }
            }
            "/delete" => {
                let mut words = arg.split_whitespace();
                match (words.next().map(str::parse::<ContentKind>), words.next()) {
                    (Some(Ok(kind)), Some(id)) => {
                        let _ = self.app.delete_content(kind, id).await;
                    }
                    _ => print_error("Usage: /delete <category|chapter|section|block|challenge> <id>\n"),
                }
            }
            "/finish" => {
                let _ = self.app.finish_challenge(arg).await;
            }
            other => {
                print_error(&format!("Unknown command {}. Type /help for a list.\n", other));
                return Ok(true);
            }
        }

        keep_place(&self.app);
        self.show_notifications();
        self.show_view().await;
        Ok(true)
    }

    async fn login(&mut self, email: &str) -> Result<()> {
        if email.is_empty() {
            print_error("Usage: /login <email>\n");
            return Ok(());
        }
        let password = read_password("Password: ")?;
        let spinner = create_spinner("Signing in...");
        let result = self.app.login(email, &password).await;
        spinner.finish_and_clear();
        if result.is_ok() {
            self.conn.remember_session();
            restore_place(&mut self.app);
        }
        Ok(())
    }

    async fn register(&mut self, arg: &str) -> Result<()> {
        let mut parts = arg.splitn(2, char::is_whitespace);
        let email = parts.next().unwrap_or("");
        let name = parts.next().unwrap_or("").trim();
        if email.is_empty() {
            print_error("Usage: /register <email> [full name]\n");
            return Ok(());
        }
        let password = read_password("Choose a password: ")?;
        let _ = self.app.register(email, &password, name).await;
        Ok(())
    }

    /// Open whatever `id` names: a category, a chapter or a block
    fn open(&mut self, id: &str) {
        let map = &self.app.state().map;
        let (is_category, is_chapter) = (map.category(id).is_some(), map.chapter(id).is_some());
        let _ = if is_category {
            self.app.select_category(id)
        } else if is_chapter {
            self.app.select_chapter(id)
        } else {
            self.app.select_block(id)
        };
    }

    fn admin(&mut self, child: &str) {
        if !matches!(self.app.view(), View::Admin(_)) {
            let _ = self.app.open_admin();
            return;
        }
        if child.is_empty() {
            let _ = self.app.admin_navigate(AdminView::Categories);
            return;
        }
        let target = match self.app.view() {
            View::Admin(current) => crate::app::admin::drill_into(current, child),
            _ => None,
        };
        match target {
            Some(target) => {
                let _ = self.app.admin_navigate(target);
            }
            None => print_error("Nothing below this level\n"),
        }
    }

    fn target_block(&self, arg: &str) -> Option<String> {
        if !arg.is_empty() {
            return Some(arg.to_string());
        }
        match self.app.view() {
            View::Main(CourseView::ChapterDetail { block: Some(block), .. }) => Some(block.clone()),
            _ => None,
        }
    }
}

fn render_factions() -> String {
    crate::faction::all_factions()
        .iter()
        .map(|f| format!("  {:<16} {}\n", f.id, f.name))
        .collect()
}

pub async fn run_interactive() -> Result<()> {
    if !io::stdin().is_terminal() {
        anyhow::bail!("The interactive client needs a terminal; use the subcommands instead (questline --help)");
    }

    let config = Config::load()?;
    let conn = Connection::open(&config).await?;
    let mut app = conn.new_app(&config);

    // Resume a stored session quietly
    if let Ok(Some(session)) = crate::security::load_session(conn.kind) {
        let spinner = create_spinner("Restoring session...");
        let resumed = app.resume(&session).await;
        spinner.finish_and_clear();
        match resumed {
            Ok(_) => {
                conn.remember_session();
                restore_place(&mut app);
            }
            Err(e) => {
                tracing::debug!("Stored session rejected: {}", e);
                let _ = crate::security::clear_session(conn.kind);
                app.take_notifications();
            }
        }
    }

    let realtime = conn.start_realtime(&config);
    let live = app.start_live_updates();

    print_colored("\nQuestline\n", Color::Cyan);
    print_dim(&format!("{} v{} · /help for commands\n", crate::NAME, crate::VERSION));

    let mut repl = Repl { app, config, conn };
    repl.show_notifications();
    repl.show_view().await;

    let rl_config = rustyline::Config::builder()
        .completion_type(rustyline::CompletionType::List)
        .edit_mode(rustyline::EditMode::Emacs)
        .auto_add_history(true)
        .build();
    let mut rl = rustyline::Editor::<QuestHelper, rustyline::history::DefaultHistory>::with_config(rl_config)?;
    rl.set_helper(Some(QuestHelper::new()));

    loop {
        match rl.readline("\x1b[32m❯\x1b[0m ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if !input.starts_with('/') {
                    print_dim("Commands start with /. Type /help for a list.\n");
                    continue;
                }
                match repl.handle(input).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => print_error(&format!("Error: {}\n", e)),
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => continue,
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                print_error(&format!("Error: {}\n", e));
                break;
            }
        }
    }

    live.abort();
    if let Some(handle) = realtime {
        handle.abort();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_command_exact_and_prefix() {
        assert_eq!(resolve_command("/help"), "/help");
        assert_eq!(resolve_command("/lead"), "/leaderboard");
        assert_eq!(resolve_command("/comp b1"), "/complete b1");
        assert_eq!(resolve_command("/pro"), "/profile");
    }

    #[test]
    fn test_resolve_command_ambiguous_or_unknown() {
        // /co matches /courses, /complete and /continue
        assert_eq!(resolve_command("/co"), "/co");
        assert_eq!(resolve_command("/fa"), "/fa");
        assert_eq!(resolve_command("/xyz"), "/xyz");
    }
}
