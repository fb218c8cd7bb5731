//! `cortex chat`: Interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;

use cortex_agent::{AgentStreamEvent, Assistant};
use cortex_config::AppConfig;
use cortex_core::history::{ChatName, ChatStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// One line of REPL input.
#[derive(Debug, PartialEq)]
enum Input<'a> {
    Message(&'a str),
    Save(&'a str),
    Load(&'a str),
    Reset,
    Tools,
    Help,
    Exit,
    Empty,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return match line {
            "exit" | "quit" => Input::Exit,
            _ => Input::Message(line),
        };
    };

    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map(|(n, a)| (n, a.trim()))
        .unwrap_or((command, ""));
    match name {
        "save" if !arg.is_empty() => Input::Save(arg),
        "load" if !arg.is_empty() => Input::Load(arg),
        "reset" | "new" => Input::Reset,
        "tools" => Input::Tools,
        "help" => Input::Help,
        "exit" | "quit" => Input::Exit,
        _ => Input::Unknown(line),
    }
}

/// Terminal rendering of a stream event. `None` prints nothing.
fn render_event(event: &AgentStreamEvent, verbose: bool) -> Option<String> {
    match event {
        AgentStreamEvent::Chunk { content } => Some(content.clone()),
        AgentStreamEvent::ToolCall { name, query } => Some(format!("\n  [{name}] {query}\n")),
        AgentStreamEvent::ToolResult { name, success, .. } if !success => {
            Some(format!("  [{name}] failed\n"))
        }
        AgentStreamEvent::ToolResult { name, output, .. } if verbose => {
            Some(format!("  [{name}] {}\n", first_line(output)))
        }
        AgentStreamEvent::Thought { content } if verbose => {
            Some(format!("  (thinking: {})\n", first_line(content)))
        }
        AgentStreamEvent::Error { message } => Some(format!("\n  [Error] {message}\n")),
        AgentStreamEvent::Done {
            stopped, hit_cap, ..
        } => {
            let mut tail = String::from("\n");
            if *stopped {
                tail.push_str("  [stopped]\n");
            }
            if *hit_cap {
                tail.push_str("  [tool limit reached]\n");
            }
            Some(tail)
        }
        _ => None,
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

/// Stream one turn to stdout. Ctrl+C stops the turn, not the program.
async fn stream_turn(
    assistant: &Arc<Assistant>,
    message: &str,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rx = assistant.submit(message).await?;
    let mut stdout = std::io::stdout();
    let mut stop_sent = false;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                if let Some(text) = render_event(&event, verbose) {
                    write!(stdout, "{text}")?;
                    stdout.flush()?;
                }
                if event.is_done() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c(), if !stop_sent => {
                stop_sent = assistant.request_stop();
            }
        }
    }

    Ok(())
}

fn print_help() {
    println!("  /save <name>  save this conversation");
    println!("  /load <name>  continue a saved conversation");
    println!("  /reset        start a new conversation");
    println!("  /tools        list available tools");
    println!("  /exit         quit (Ctrl+C stops a running answer)");
}

pub async fn run(
    message: Option<String>,
    model: Option<String>,
    resume: Option<String>,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let state = cortex_gateway::build_state(&config);
    let assistant = state.assistant.clone();
    let chats = state.chats.clone();

    let model = model.unwrap_or_else(|| config.model.name.clone());
    if let Err(e) = assistant.load_model(&model).await {
        eprintln!();
        eprintln!("  ERROR: could not load model '{model}': {e}");
        eprintln!();
        eprintln!("  Is llama.cpp's server running at {}?", config.model.provider_url);
        eprintln!("  Run `cortex doctor` for details.");
        eprintln!();
        return Err(e.into());
    }
    info!(model = %model, "Model loaded");

    if let Some(name) = resume {
        let history = chats.load(&ChatName::parse(&name)?).await?;
        info!(chat = %history.name, messages = history.messages.len(), "Resuming saved chat");
        assistant.load_history(history).await?;
    }

    if let Some(msg) = message {
        return stream_turn(&assistant, &msg, verbose).await;
    }

    println!();
    println!("  Cortex - Interactive Mode");
    println!();
    println!("  Runtime:  {}", config.model.provider_url);
    println!("  Model:    {model}");
    println!(
        "  Tools:    {}",
        assistant
            .tools()
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();
    println!("  Type your message and press Enter. /help lists commands.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_input(&line) {
            Input::Empty => continue,
            Input::Exit => break,
            Input::Help => print_help(),
            Input::Unknown(cmd) => println!("  Unknown command: {cmd} (try /help)"),
            Input::Tools => {
                for tool in assistant.tools() {
                    println!("  {:<16} {}", tool.name, tool.description);
                }
            }
            Input::Reset => match assistant.reset().await {
                Ok(()) => println!("  New conversation."),
                Err(e) => eprintln!("  [Error] {e}"),
            },
            Input::Save(name) => {
                let saved = match ChatName::parse(name) {
                    Ok(name) => {
                        let history = assistant.to_history(name).await;
                        chats.save(&history).await.map(|_| history.name)
                    }
                    Err(e) => Err(e),
                };
                match saved {
                    Ok(name) => println!("  Saved as '{name}'."),
                    Err(e) => eprintln!("  [Error] {e}"),
                }
            }
            Input::Load(name) => {
                let loaded = match ChatName::parse(name) {
                    Ok(name) => chats.load(&name).await,
                    Err(e) => Err(e),
                };
                match loaded {
                    Ok(history) => {
                        let count = history.messages.len();
                        match assistant.load_history(history).await {
                            Ok(()) => println!("  Loaded {count} messages."),
                            Err(e) => eprintln!("  [Error] {e}"),
                        }
                    }
                    Err(e) => eprintln!("  [Error] {e}"),
                }
            }
            Input::Message(text) => {
                println!();
                print!("  Cortex > ");
                if let Err(e) = stream_turn(&assistant, text, verbose).await {
                    eprintln!("  [Error] {e}");
                }
                println!();
            }
        }
    }

    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}
