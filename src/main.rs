// TalkMate entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, not terminal)
// 2. Load config
// 3. Open database
// 4. Build the model client and speech services
// 5. Assemble the app and the audio sink
// 6. Sign in at the console
// 7. Run the chat loop
// 8. Cleanup on exit

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;

use english_tutor::app::{App, TurnOutcome};
use english_tutor::llm::client::{LanguageModel, LlmClient};
use english_tutor::llm::{correction, prompt};
use english_tutor::session::{Level, Role, Session};
use english_tutor::speech::{Accent, DisabledSpeech};
use english_tutor::{config, db};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing (log to file, not terminal)
    init_tracing()?;
    info!("TalkMate starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: model={}, default level={}, accent={}",
        config.model.name, config.session.default_level, config.speech.default_accent
    );

    // 3. Open database
    let db = db::Database::open(&config.database.path).context("failed to open database")?;
    info!("Database opened at {}", config.database.path);

    // 4. Build the model client and speech services
    let llm_client = LlmClient::from_config(&config);
    match &llm_client {
        LlmClient::Active(_) => info!("Model client initialized (API key configured)"),
        LlmClient::Disabled => info!("Model client disabled (no API key)"),
    }
    let model: Arc<dyn LanguageModel> = Arc::new(llm_client);
    let speech = Arc::new(DisabledSpeech);

    // 5. Assemble the app. This front-end has no audio device; synthesized
    //    audio is logged and dropped by the sink task.
    let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(16);
    let audio_sink = tokio::spawn(async move {
        while let Some(audio) = audio_rx.recv().await {
            info!(bytes = audio.len(), "reply audio ready");
        }
    });
    let app = App::new(config, db, model, speech.clone(), speech, audio_tx);

    // 6. Sign in at the console
    let Some(mut session) = sign_in(&app)? else {
        app.shutdown().await;
        return Ok(());
    };
    info!("Session opened for {}", session.username);

    // 7. Run the chat loop (blocking until the user quits)
    run_chat(&app, &mut session).await?;

    // 8. Cleanup
    session.logout();
    app.shutdown().await;
    let _ = audio_sink.await;
    info!("TalkMate shut down cleanly");
    Ok(())
}

// ---------------------------------------------------------------------------
// Console sign-in
// ---------------------------------------------------------------------------

/// Log in or sign up. Returns `None` when the user quits (or stdin closes)
/// before a session is opened.
fn sign_in(app: &App) -> anyhow::Result<Option<Session>> {
    println!("Welcome to TalkMate, your English tutor.");

    loop {
        println!("\n[1] Log in  [2] Sign up  [q] Quit");
        let Some(choice) = prompt_line("> ")? else {
            return Ok(None);
        };

        match choice.as_str() {
            "1" | "login" => {
                let Some(username) = prompt_line("Username: ")? else {
                    return Ok(None);
                };
                let Some(password) = prompt_line("Password: ")? else {
                    return Ok(None);
                };
                match Session::login(&app.db, &username, &password, app.default_settings()) {
                    Ok(session) => return Ok(Some(session)),
                    Err(e) => println!("{e}"),
                }
            }
            "2" | "signup" => {
                let Some(username) = prompt_line("Username: ")? else {
                    return Ok(None);
                };
                let Some(email) = prompt_line("Email (optional): ")? else {
                    return Ok(None);
                };
                let Some(password) = prompt_line("Password: ")? else {
                    return Ok(None);
                };
                if username.is_empty() || password.is_empty() {
                    println!("Username and password are required.");
                    continue;
                }
                let email = if email.is_empty() {
                    None
                } else {
                    Some(email.as_str())
                };
                match app.db.create_user(&username, &password, email) {
                    Ok(_) => {
                        match Session::login(&app.db, &username, &password, app.default_settings())
                        {
                            Ok(session) => return Ok(Some(session)),
                            Err(e) => println!("{e}"),
                        }
                    }
                    Err(e) => println!("{e}"),
                }
            }
            "q" | "quit" => return Ok(None),
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Chat loop
// ---------------------------------------------------------------------------

async fn run_chat(app: &App, session: &mut Session) -> anyhow::Result<()> {
    println!("\nSigned in as {}. Type /help for commands.", session.username);
    show_transcript(session);
    if session.turns.is_empty() {
        println!("\nTalkMate: {}", starter_for(session));
    }

    loop {
        let Some(line) = prompt_line("\nYou: ")? else {
            break;
        };
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            if !handle_command(app, session, command).await? {
                break;
            }
            continue;
        }

        take_turn(app, session, &line).await;
    }

    Ok(())
}

/// Submit one typed line and print the reply, plus correction feedback when
/// enabled. Errors are shown inline; the loop keeps running.
async fn take_turn(app: &App, session: &mut Session, text: &str) {
    match app.submit_text(session, text).await {
        Ok(TurnOutcome::Replied { text: reply, is_apology }) => {
            println!("TalkMate: {reply}");
            if session.settings.correction_enabled && !is_apology {
                let result = app.check_sentence(session, text).await;
                println!("\n{}", correction::format_correction(&result));
            }
        }
        Ok(_) => {}
        Err(e) => println!("{e}"),
    }
}

/// Dispatch a slash command. Returns `false` when the user asked to quit.
async fn handle_command(app: &App, session: &mut Session, command: &str) -> anyhow::Result<bool> {
    let (name, arg) = match command.split_once(' ') {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match name {
        "help" => print_help(),
        "new" => {
            let title = if arg.is_empty() { None } else { Some(arg) };
            match session.start_new_conversation(&app.db, title) {
                Ok(id) => {
                    println!("Started conversation {id}.");
                    println!("\nTalkMate: {}", starter_for(session));
                }
                Err(e) => println!("{e}"),
            }
        }
        "list" => match app.db.list_conversations(session.user_id) {
            Ok(conversations) => {
                for c in conversations {
                    let marker = if c.id == session.conversation_id { "*" } else { " " };
                    println!("{marker} {:>4}  {}  ({})", c.id, c.title, c.created_at);
                }
            }
            Err(e) => println!("{e}"),
        },
        "switch" => match arg.parse::<i64>() {
            Ok(id) => match session.switch_conversation(&app.db, id) {
                Ok(()) => {
                    println!("Switched to conversation {id}.");
                    show_transcript(session);
                }
                Err(e) => println!("{e}"),
            },
            Err(_) => println!("Usage: /switch <id>"),
        },
        "clear" => match session.clear_transcript(&app.db) {
            Ok(()) => println!("Transcript cleared."),
            Err(e) => println!("{e}"),
        },
        "delete" => match arg.parse::<i64>() {
            Ok(id) => match session.delete_conversation(&app.db, id) {
                Ok(()) => println!("Deleted conversation {id}."),
                Err(e) => println!("{e}"),
            },
            Err(_) => println!("Usage: /delete <id>"),
        },
        "phrases" => {
            for (i, (label, phrase)) in prompt::QUICK_PHRASES.iter().enumerate() {
                println!("{}. {label}: \"{phrase}\"", i + 1);
            }
            println!("Send one with /say <number>.");
        }
        "say" => {
            let picked = arg
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| prompt::QUICK_PHRASES.get(i));
            match picked {
                Some((_, phrase)) => {
                    println!("You: {phrase}");
                    take_turn(app, session, phrase).await;
                }
                None => println!("Usage: /say <1-{}>", prompt::QUICK_PHRASES.len()),
            }
        }
        "check" => {
            if arg.is_empty() {
                println!("Usage: /check <sentence>");
            } else {
                let result = app.check_sentence(session, arg).await;
                println!("{}", correction::format_correction(&result));
            }
        }
        "level" => match Level::parse(arg) {
            Some(level) => {
                session.settings.level = level;
                println!("Level set to {}.", level.as_str());
            }
            None => println!("Usage: /level Beginner|Intermediate|Advanced"),
        },
        "accent" => match Accent::parse(arg) {
            Some(accent) => {
                session.settings.accent = accent;
                println!("Accent set to {}.", accent.as_str());
            }
            None => println!("Usage: /accent US|UK|Australian"),
        },
        "speak" => match arg {
            "on" => {
                session.settings.auto_speak = true;
                println!("Auto-speak on.");
            }
            "off" => {
                session.settings.auto_speak = false;
                println!("Auto-speak off.");
            }
            _ => println!("Usage: /speak on|off"),
        },
        "quit" | "exit" => return Ok(false),
        _ => println!("Unknown command /{name}; try /help."),
    }

    Ok(true)
}

fn print_help() {
    println!("Commands:");
    println!("  /new [title]      start a new conversation");
    println!("  /list             list your conversations");
    println!("  /switch <id>      make another conversation active");
    println!("  /clear            clear the current transcript");
    println!("  /delete <id>      delete a conversation");
    println!("  /phrases          show the quick phrases");
    println!("  /say <number>     send a quick phrase");
    println!("  /check <sentence> analyze a sentence for corrections");
    println!("  /level <name>     set your level (Beginner/Intermediate/Advanced)");
    println!("  /accent <name>    set the voice accent (US/UK/Australian)");
    println!("  /speak on|off     toggle spoken replies");
    println!("  /quit             exit");
}

// ---------------------------------------------------------------------------
// Console helpers
// ---------------------------------------------------------------------------

fn show_transcript(session: &Session) {
    for turn in &session.turns {
        let speaker = match turn.role {
            Role::User => "You",
            Role::Assistant => "TalkMate",
        };
        println!("[{}] {speaker}: {}", turn.timestamp, turn.content);
    }
}

/// Pick a conversation starter for the session's level, rotated by
/// conversation id so consecutive chats open differently.
fn starter_for(session: &Session) -> &'static str {
    let starters = prompt::conversation_starters(session.settings.level);
    starters[session.conversation_id as usize % starters.len()]
}

/// Print `prompt` and read one trimmed line. Returns `None` on EOF.
fn prompt_line(prompt: &str) -> anyhow::Result<Option<String>> {
    print!("{prompt}");
    io::stdout().flush()?;

    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Initialize tracing to log to a file (not the terminal, which is used by
/// the chat console).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("talkmate.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("english_tutor=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
