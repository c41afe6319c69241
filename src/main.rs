use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time;

use eyre::{Context, Result};
use secretary::backend::{ArcBackend, new_manager};
use secretary::chat::{Chat, Conversations, GenerationStatus};
use secretary::cli::Command;
use secretary::config::verbose;
use secretary::config::{Configuration, init_logger};
use secretary::models::{ArcEventTx, Event, NoticeKind, Persona};
use secretary::prompt::Prompt;
use secretary::session::Session;
use secretary::storage::new_storage;
use secretary::transport::Transport;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const HELP: &str = r#"Commands:
    /new                      start a new conversation
    /open <id>                open a saved conversation
    /list                     list saved conversations
    /attach <path>...         stage files from disk
    /note <title> <content>   stage a note
    /detach <id>              remove a staged file
    /persona [id]             show or select the persona
    /stop                     stop the running generation
    /usage                    token usage of the last answer
    /retry                    retry loading the conversation
    /dismiss                  dismiss the last error
    /quit                     exit
Anything else is sent as a message."#;

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Command::new();
    if cmd.version() {
        cmd.print_version();
        return Ok(());
    }

    better_panic::Settings::auto().install();

    let config = cmd.get_config()?;
    init_logger(&config.log)?;
    Configuration::init(config.clone())?;
    verbose!("[+] Logger initialized");

    verbose!("[+] Initializing backend...");
    let backend: ArcBackend = new_manager(&config.backend).await?;

    let personas = config.build_personas().wrap_err("building personas")?;
    let wanted = cmd
        .persona()
        .or(config.general.default_persona.as_deref());
    let persona = match wanted {
        Some(id) => personas
            .iter()
            .find(|p| p.id() == id)
            .cloned()
            .ok_or_else(|| eyre::eyre!("persona {} is not defined", id))?,
        None => personas
            .first()
            .cloned()
            .ok_or_else(|| eyre::eyre!("no persona is defined"))?,
    };
    verbose!("[+] {} personas loaded, using {}", personas.len(), persona.id());

    verbose!("[+] Initializing storage...");
    let storage = new_storage(&config.storage)
        .await
        .wrap_err("initializing storage")?;
    verbose!("[+] Storage initialized");

    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();
    let event_tx: ArcEventTx = Arc::new(event_tx);

    let session = Arc::new(Session::new(storage.clone(), event_tx.clone()));
    let prompt = Arc::new(Prompt::new(
        session.clone(),
        storage.clone(),
        event_tx.clone(),
    ));
    prompt.select_persona(persona);
    let conversations = Arc::new(Conversations::new(storage.clone(), event_tx.clone()));
    let transport = Transport::new(
        session.clone(),
        storage,
        backend,
        conversations.clone(),
        event_tx.clone(),
    );
    let chat = Chat::new(session, prompt, transport, conversations, event_tx);

    let printer = tokio::spawn(print_events(chat.clone(), event_rx));

    chat.conversations().refresh().await;
    if let Some(id) = cmd.conversation() {
        chat.navigate_to(id).await;
        chat.load_messages().await;
        print_transcript(&chat);
    }

    if let Err(err) = run(&chat, &personas).await {
        eprintln!("Error: {}", err);
    }

    chat.stop();
    if tokio::time::timeout(time::Duration::from_secs(15), chat.wait())
        .await
        .is_err()
    {
        eprintln!("Shutdown timeout reached");
    }
    printer.abort();
    Ok(())
}

async fn run(chat: &Chat, personas: &[Arc<Persona>]) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.wrap_err("reading stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, args) = match line.strip_prefix('/') {
            Some(rest) => rest.split_once(' ').unwrap_or((rest, "")),
            None => {
                chat.prompt().change_text(line);
                // Failures are published as notices
                let _ = chat.handle_submit().await;
                continue;
            }
        };
        let args = args.trim();

        match command {
            "new" => {
                let id = chat.new_conversation().await;
                println!("new conversation {}", id);
            }
            "open" if !args.is_empty() => {
                chat.navigate_to(args).await;
                chat.load_messages().await;
                print_transcript(chat);
            }
            "list" => {
                chat.conversations().refresh().await;
                for meta in chat.conversations().list() {
                    println!("{}  {}", meta.id, meta.title);
                }
            }
            "attach" if !args.is_empty() => {
                let paths = args.split_whitespace().map(PathBuf::from).collect();
                if let Ok(ids) = chat.prompt().add_files(paths).await {
                    println!("staged {}", ids.join(", "));
                }
            }
            "note" if !args.is_empty() => {
                let (title, content) = args.split_once(' ').unwrap_or((args, ""));
                println!("staged {}", chat.prompt().add_note(title, content));
            }
            "detach" if !args.is_empty() => {
                if !chat.prompt().remove_file(args) {
                    println!("no staged file {}", args);
                }
            }
            "persona" if args.is_empty() => {
                let current = chat.prompt().persona();
                for persona in personas {
                    let marker = match &current {
                        Some(p) if p.id() == persona.id() => "*",
                        _ => " ",
                    };
                    println!("{} {}  {}/{}", marker, persona.id(), persona.provider(), persona.model());
                }
            }
            "persona" => match personas.iter().find(|p| p.id() == args) {
                Some(persona) => chat.prompt().select_persona(persona.clone()),
                None => println!("persona {} is not defined", args),
            },
            "stop" => chat.stop(),
            "usage" => match chat.usage() {
                Some(usage) => println!("{}", usage),
                None => println!("no usage reported yet"),
            },
            "retry" => {
                chat.retry_loading().await;
                print_transcript(chat);
            }
            "dismiss" => chat.clear_error().await,
            "quit" | "exit" => break,
            _ => println!("{}", HELP),
        }
    }
    Ok(())
}

fn print_transcript(chat: &Chat) {
    if let Some(err) = chat.session().load_error() {
        println!("failed to load conversation: {} (use /retry)", err);
        return;
    }
    for message in chat.messages() {
        println!("[{:?}] {}", message.role(), message.text());
    }
}

/// Render events until the channel closes. Assistant text is printed as it
/// streams in.
async fn print_events(chat: Chat, mut event_rx: mpsc::UnboundedReceiver<Event>) {
    let mut printed: Option<(String, usize)> = None;
    while let Some(event) = event_rx.recv().await {
        match event {
            Event::Notice(notice) => {
                let kind = match notice.kind() {
                    NoticeKind::Info => "info",
                    NoticeKind::Warning => "warning",
                    NoticeKind::Error => "error",
                };
                match notice.description() {
                    Some(description) => {
                        eprintln!("[{}] {}: {}", kind, notice.message(), description)
                    }
                    None => eprintln!("[{}] {}", kind, notice.message()),
                }
            }
            Event::StatusChanged(GenerationStatus::Error(msg)) => {
                printed = None;
                println!();
                eprintln!("[error] {} (send anything or /dismiss)", msg);
            }
            Event::StatusChanged(GenerationStatus::Ready) => {
                if printed.take().is_some() {
                    println!();
                }
            }
            Event::StatusChanged(status) => log::debug!("status: {}", status),
            Event::MessagesUpdated(_) => {
                let Some(last) = chat.messages().pop().filter(|m| m.is_assistant()) else {
                    continue;
                };
                let text = last.text();
                let offset = match &printed {
                    Some((id, len)) if id == last.id() => *len,
                    _ => 0,
                };
                if let Some(delta) = text.get(offset..) {
                    print!("{}", delta);
                    let _ = std::io::stdout().flush();
                }
                printed = Some((last.id().to_string(), text.len()));
            }
            Event::ConversationsUpdated(list) => {
                log::debug!("{} conversations", list.len())
            }
        }
    }
}
