//! Async host: owns the engine, executes its effects, and renders to a terminal.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::engine::{Effect, Engine, EngineSettings};
use crate::protocol::{ClientMessage, ExecutionStep, SequenceId, SyncPayload};
use crate::transport::{
    self, Backend, ConnectionState, PushChannel, TransportError, TransportEvent,
};

/// Everything the host loop reacts to, funneled through one channel.
#[derive(Debug)]
pub enum AppEvent {
    Transport(TransportEvent),
    SyncLoaded {
        generation: u64,
        result: Result<SyncPayload, TransportError>,
    },
    BackendStarted(Result<(), TransportError>),
    Command(Command),
    /// Operator input reached end of file
    InputClosed,
}

/// Operator command read from the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Continue,
    Seek(SequenceId),
    Line(u32),
    Follow,
    Scope,
    Output,
    Clear,
    Edit { line: u32, code: String },
    Restart,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("not a number: {0}")]
    InvalidNumber(String),
}

impl Command {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(input: &str) -> Result<Option<Self>, CommandError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match input.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (input, ""),
        };

        let command = match word {
            "c" | "continue" => Command::Continue,
            "seek" => Command::Seek(number(rest, "step id")?),
            "line" => Command::Line(number(rest, "line")?),
            "follow" => Command::Follow,
            "scope" => Command::Scope,
            "output" => Command::Output,
            "clear" => Command::Clear,
            "edit" => {
                let (line, code) = rest
                    .split_once(char::is_whitespace)
                    .unwrap_or((rest, ""));
                let line = number(line, "line")?;
                Command::Edit {
                    line,
                    code: code.trim_start().to_string(),
                }
            }
            "restart" => Command::Restart,
            "q" | "quit" | "exit" => Command::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn number<T: std::str::FromStr>(raw: &str, name: &'static str) -> Result<T, CommandError> {
    if raw.is_empty() {
        return Err(CommandError::MissingArgument(name));
    }
    raw.parse()
        .map_err(|_| CommandError::InvalidNumber(raw.to_string()))
}

/// Line-oriented renderer that prints only what changed since the last call.
pub struct TerminalView<W: Write> {
    out: W,
    epoch: Option<u64>,
    /// Rendered line of every printed step still in the timeline
    printed_steps: BTreeMap<SequenceId, String>,
    last_cursor: Option<SequenceId>,
    printed_entries: BTreeSet<u64>,
    connection: Option<ConnectionState>,
}

impl<W: Write> TerminalView<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            epoch: None,
            printed_steps: BTreeMap::new(),
            last_cursor: None,
            printed_entries: BTreeSet::new(),
            connection: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn render(&mut self, engine: &Engine) -> std::io::Result<()> {
        if self.connection.as_ref() != Some(engine.connection()) {
            match engine.connection() {
                ConnectionState::Connected { generation } => {
                    writeln!(self.out, "-- connected (generation {generation})")?
                }
                ConnectionState::Disconnected => writeln!(self.out, "-- disconnected, retrying")?,
                ConnectionState::Connecting => writeln!(self.out, "-- connecting")?,
                ConnectionState::Closed => writeln!(self.out, "-- closed")?,
            }
            self.connection = Some(engine.connection().clone());
        }

        if self.epoch != Some(engine.epoch()) {
            self.epoch = Some(engine.epoch());
            self.printed_steps.clear();
            self.last_cursor = None;
            writeln!(self.out, "-- timeline: {} steps", engine.timeline().len())?;
        }

        let timeline = engine.timeline();
        // Late and corrected steps are printed when they show up
        for step in timeline.iter() {
            let line = step_line(step);
            if self.printed_steps.get(&step.sequence_id) != Some(&line) {
                writeln!(self.out, "{line}")?;
                self.printed_steps.insert(step.sequence_id, line);
            }
        }
        self.printed_steps.retain(|id, _| timeline.contains(*id));

        for entry in engine.streams().entries().filter(|e| e.flushed) {
            if self.printed_entries.insert(entry.id) {
                let text = entry.text.trim_end_matches('\n');
                writeln!(self.out, "{}> {}", entry.stream, text)?;
            }
        }
        let retained: BTreeSet<u64> = engine.streams().entries().map(|e| e.id).collect();
        self.printed_entries.retain(|id| retained.contains(id));

        if engine.cursor() != self.last_cursor {
            self.last_cursor = engine.cursor();
            if let Some(cursor) = engine.cursor() {
                let mode = if timeline.is_following() { "live" } else { "pinned" };
                match engine.highlighted_line() {
                    Some(line) => writeln!(self.out, "-> step {cursor} (line {line}, {mode})")?,
                    None => writeln!(self.out, "-> step {cursor} ({mode})")?,
                }
            }
        }
        self.out.flush()
    }

    pub fn print_scope(&mut self, engine: &Engine) -> std::io::Result<()> {
        match engine.scope() {
            Some(scope) => {
                let text = serde_json::to_string_pretty(&scope).map_err(std::io::Error::other)?;
                writeln!(self.out, "{text}")?;
            }
            None => writeln!(self.out, "(no step selected)")?,
        }
        self.out.flush()
    }

    pub fn print_output(&mut self, engine: &Engine) -> std::io::Result<()> {
        for entry in engine.streams().entries() {
            let marker = if entry.flushed { ' ' } else { '…' };
            writeln!(
                self.out,
                "{}{} {}",
                entry.stream,
                marker,
                entry.text.trim_end_matches('\n')
            )?;
        }
        self.out.flush()
    }

    pub fn message(&mut self, text: impl std::fmt::Display) -> std::io::Result<()> {
        writeln!(self.out, "{text}")?;
        self.out.flush()
    }
}

fn step_line(step: &ExecutionStep) -> String {
    let location = match (&step.file, step.source_line) {
        (Some(file), Some(line)) => format!("{file}:{line}"),
        (None, Some(line)) => format!("line {line}"),
        (Some(file), None) => file.clone(),
        (None, None) => String::new(),
    };
    format!(
        "[{:>5}] {:>4} {:<9} {} {}",
        step.sequence_id,
        step.glyph(),
        step.kind,
        location,
        step.source_segment.as_deref().unwrap_or("").trim()
    )
}

/// Main application state
pub struct App<W: Write> {
    engine: Engine,
    backend: Arc<dyn Backend>,
    channel: PushChannel,
    view: TerminalView<W>,
    event_tx: mpsc::UnboundedSender<AppEvent>,
    event_rx: mpsc::UnboundedReceiver<AppEvent>,
    should_quit: bool,
}

impl<W: Write> App<W> {
    /// Connect the push channel and wire its events into the host loop.
    pub fn new(config: &Config, backend: Arc<dyn Backend>, out: W) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (channel, mut transport_rx) =
            transport::connect(config.server.ws_url.clone(), config.reconnect);

        let forward_tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = transport_rx.recv().await {
                if forward_tx.send(AppEvent::Transport(event)).is_err() {
                    break;
                }
            }
        });

        Self {
            engine: Engine::new(EngineSettings::from(config)),
            backend,
            channel,
            view: TerminalView::new(out),
            event_tx,
            event_rx,
            should_quit: false,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Sender for injecting events (operator commands, tests).
    pub fn sender(&self) -> mpsc::UnboundedSender<AppEvent> {
        self.event_tx.clone()
    }

    /// Read operator commands from `input` until it ends.
    pub fn spawn_input<R>(&self, input: R)
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let mut lines = input.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match Command::parse(&line) {
                        Ok(Some(command)) => {
                            if tx.send(AppEvent::Command(command)).is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => eprintln!("{e}"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read operator input");
                        break;
                    }
                }
            }
            let _ = tx.send(AppEvent::InputClosed);
        });
    }

    /// Run the application main loop
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.view.render(&self.engine)?;

        while !self.should_quit {
            let Some(event) = self.event_rx.recv().await else {
                break;
            };
            self.handle_app_event(event)?;
            self.view.render(&self.engine)?;
        }

        self.channel.shutdown().await;
        Ok(())
    }

    fn handle_app_event(&mut self, event: AppEvent) -> anyhow::Result<()> {
        let effects = match event {
            AppEvent::Transport(event) => self.engine.handle_transport(event),
            AppEvent::SyncLoaded { generation, result } => match result {
                Ok(payload) => self.engine.apply_sync_response(generation, payload),
                Err(e) => {
                    tracing::error!(generation, error = %e, "Resync failed");
                    Vec::new()
                }
            },
            AppEvent::BackendStarted(result) => match result {
                Ok(()) => self.engine.backend_restarted(),
                Err(e) => {
                    tracing::error!(error = %e, "Backend restart failed");
                    self.view.message(format!("restart failed: {e}"))?;
                    Vec::new()
                }
            },
            AppEvent::Command(command) => self.handle_command(command)?,
            AppEvent::InputClosed => {
                self.should_quit = true;
                Vec::new()
            }
        };

        for effect in effects {
            self.run_effect(effect);
        }
        Ok(())
    }

    fn handle_command(&mut self, command: Command) -> anyhow::Result<Vec<Effect>> {
        let effects = match command {
            Command::Continue => self.engine.request_continue(Instant::now()),
            Command::Seek(id) => self.engine.select_step(id),
            Command::Line(line) => self.engine.select_node(line),
            Command::Follow => self.engine.follow_live(),
            Command::Scope => {
                self.view.print_scope(&self.engine)?;
                Vec::new()
            }
            Command::Output => {
                self.view.print_output(&self.engine)?;
                Vec::new()
            }
            Command::Clear => {
                self.engine.clear_output();
                Vec::new()
            }
            Command::Edit { line, code } => self.engine.edit_node(line, code),
            Command::Restart => self.engine.restart_backend(),
            Command::Quit => {
                self.should_quit = true;
                Vec::new()
            }
        };
        Ok(effects)
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Send(message) => {
                // Failure is already logged by the channel
                let _ = self.channel.send(&message);
            }
            Effect::FetchSync { generation } => {
                let backend = self.backend.clone();
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let result = backend.fetch_sync().await;
                    let _ = tx.send(AppEvent::SyncLoaded { generation, result });
                });
            }
            Effect::StartBackend => {
                let backend = self.backend.clone();
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let result = backend.start_app().await;
                    let _ = tx.send(AppEvent::BackendStarted(result));
                });
            }
        }
    }
}

/// Connect, send a single message once the push channel is up, and disconnect.
pub async fn send_once(config: &Config, message: ClientMessage) -> anyhow::Result<()> {
    let (mut channel, _events) = transport::connect(config.server.ws_url.clone(), config.reconnect);
    let mut state = channel.subscribe();

    let wait = state.wait_for(|s| matches!(s, ConnectionState::Connected { .. }));
    tokio::time::timeout(config.server.request_timeout, wait)
        .await
        .with_context(|| format!("timed out connecting to {}", config.server.ws_url))?
        .context("push channel closed before connecting")?;

    let sent = channel.send(&message);
    channel.shutdown().await;
    sent.context("failed to send message")?;
    Ok(())
}
