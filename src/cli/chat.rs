use std::collections::HashMap;
use std::io::{self, Write};

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::broadcast::{self, error::TryRecvError};
use uuid::Uuid;

use crate::chat::{Pumped, Session, SessionBuilder, Transcript, TranscriptEvent};
use crate::core::{AppConfig, ChatError, MODELS};
use crate::openai::Role;

/// Commands that can be typed at the prompt instead of a message.
#[derive(Debug, PartialEq, Eq)]
enum ReplCommand {
    Clear,
    Model(Option<String>),
    Models,
    History,
    Quit,
}

impl ReplCommand {
    /// Returns `None` for anything that should be sent as a message.
    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let cmd = match parts.next()? {
            "/clear" => ReplCommand::Clear,
            "/model" => ReplCommand::Model(parts.next().map(str::to_string)),
            "/models" => ReplCommand::Models,
            "/history" => ReplCommand::History,
            "/quit" | "/exit" => ReplCommand::Quit,
            _ => return None,
        };
        Some(cmd)
    }
}

/// Writes assistant replies to the terminal as the transcript changes.
/// Only the text that hasn't been printed yet is written for each
/// update. User input is already on screen from the prompt.
struct Renderer<W: Write> {
    events: broadcast::Receiver<TranscriptEvent>,
    out: W,
    printed: HashMap<Uuid, usize>,
}

impl<W: Write> Renderer<W> {
    fn new(events: broadcast::Receiver<TranscriptEvent>, out: W) -> Self {
        Self {
            events,
            out,
            printed: HashMap::new(),
        }
    }

    /// Render every event received so far.
    fn drain(&mut self) -> io::Result<()> {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.render(event)?,
                Err(TryRecvError::Lagged(n)) => {
                    // Updates carry the whole turn so a missed event
                    // only delays output
                    tracing::debug!("Renderer lagged by {} events", n);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        self.out.flush()
    }

    fn render(&mut self, event: TranscriptEvent) -> io::Result<()> {
        match event {
            TranscriptEvent::Appended(turn) if turn.role == Role::Assistant && turn.pending => {
                self.printed.insert(turn.id, 0);
            }
            TranscriptEvent::Updated(turn) if turn.role == Role::Assistant => {
                if turn.pending {
                    // The append for this turn may have been missed
                    self.printed.entry(turn.id).or_insert(0);
                }
                let Some(seen) = self.printed.get_mut(&turn.id) else {
                    return Ok(());
                };
                if let Some(new_text) = turn.content.get(*seen..) {
                    write!(self.out, "{}", new_text)?;
                    *seen = turn.content.len();
                }
                if !turn.pending {
                    self.printed.remove(&turn.id);
                    writeln!(self.out)?;
                }
            }
            TranscriptEvent::Removed(id) => {
                if let Some(seen) = self.printed.remove(&id)
                    && seen > 0
                {
                    writeln!(self.out)?;
                }
            }
            TranscriptEvent::Cleared => self.printed.clear(),
            _ => {}
        }
        Ok(())
    }
}

fn print_models(current: &str) {
    for model in MODELS {
        let marker = if model.id == current { "*" } else { " " };
        println!("{} {:<20} {}", marker, model.id, model.name);
    }
}

fn print_history(transcript: &Transcript) {
    if transcript.is_empty() {
        println!("(empty)");
        return;
    }
    for turn in transcript.turns() {
        let who = match turn.role {
            Role::User => "you",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        println!(
            "[{}] {}: {}",
            turn.created_at.format("%H:%M:%S"),
            who,
            turn.content
        );
    }
}

/// Send one message and render the reply until it completes, fails or
/// is interrupted with Ctrl-C.
async fn send<W: Write>(session: &mut Session, renderer: &mut Renderer<W>, line: &str) -> Result<()> {
    match session.submit(line) {
        Ok(Some(_)) => {}
        Ok(None) => return Ok(()),
        Err(err) => {
            eprintln!("error: {}", err);
            return Ok(());
        }
    }

    loop {
        let pumped = tokio::select! {
            pumped = session.pump() => pumped,
            _ = tokio::signal::ctrl_c() => Err(ChatError::Cancelled),
        };

        match pumped {
            Ok(Pumped::Fragment) => renderer.drain()?,
            Ok(Pumped::Completed) | Ok(Pumped::Idle) => {
                renderer.drain()?;
                break;
            }
            Err(ChatError::Cancelled) => {
                session.cancel();
                renderer.drain()?;
                eprintln!("[cancelled]");
                break;
            }
            Err(err) => {
                renderer.drain()?;
                eprintln!("error: {}", err);
                if err.is_transport() {
                    eprintln!("The reply was dropped. Send the message again to retry.");
                }
                break;
            }
        }
    }

    Ok(())
}

pub async fn run(config: AppConfig, model: Option<String>, streaming: bool) -> Result<()> {
    let mut session = SessionBuilder::from_config(&config)
        .streaming(streaming)
        .build();
    if let Some(model) = model {
        session.set_model(&model)?;
    }
    let mut renderer = Renderer::new(session.subscribe(), io::stdout());
    let mut rl = DefaultEditor::new()?;

    println!(
        "Chatting with {}. Type /models, /model <id>, /clear, /history or /quit.",
        session.model()
    );

    loop {
        let readline = rl.readline(">>> ");
        match readline {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                match ReplCommand::parse(&line) {
                    Some(ReplCommand::Quit) => break,
                    Some(ReplCommand::Clear) => {
                        session.clear();
                        renderer.drain()?;
                        println!("Chat cleared.");
                    }
                    Some(ReplCommand::Model(None)) => println!("{}", session.model()),
                    Some(ReplCommand::Model(Some(id))) => match session.set_model(&id) {
                        Ok(()) => println!("Switched to {}", session.model()),
                        Err(err) => eprintln!("error: {}", err),
                    },
                    Some(ReplCommand::Models) => print_models(session.model()),
                    Some(ReplCommand::History) => print_history(session.transcript()),
                    None => send(&mut session, &mut renderer, &line).await?,
                }
            }
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}
