#[cfg(test)]
#[path = "ui_test.rs"]
mod tests;

use std::env;
use std::io;
use std::io::IsTerminal;
use std::io::Write;

use anyhow::Result;
use owo_colors::OwoColorize;
use owo_colors::Style;
use tokio::sync::mpsc;

use crate::domain::models::Action;
use crate::domain::models::Event;
use crate::domain::models::GenerationError;
use crate::domain::models::SlashCommand;
use crate::domain::models::UsageSnapshot;
use crate::infrastructure::terminal::next_line;
use crate::infrastructure::terminal::STDIN_LINES;

fn stdout_colored() -> bool {
    return io::stdout().is_terminal() && env::var_os("NO_COLOR").is_none();
}

/// Writes events to a terminal as plain lines.
pub struct Renderer<W: Write> {
    out: W,
    colored: bool,
    mid_line: bool,
    pub failure: Option<GenerationError>,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, colored: bool) -> Renderer<W> {
        return Renderer {
            out,
            colored,
            mid_line: false,
            failure: None,
        };
    }

    fn styled(&self, text: &str, style: Style) -> String {
        if !self.colored {
            return text.to_string();
        }

        return text.style(style).to_string();
    }

    fn line(&mut self, text: &str) -> Result<()> {
        if self.mid_line {
            writeln!(self.out)?;
            self.mid_line = false;
        }
        writeln!(self.out, "{text}")?;
        return Ok(());
    }

    fn styled_line(&mut self, text: &str, style: Style) -> Result<()> {
        let text = self.styled(text, style);
        return self.line(&text);
    }

    /// Usage is shown where it arrives in the stream, on its own line.
    fn usage_line(&mut self, usage: &UsageSnapshot) -> Result<()> {
        return self.styled_line(&usage.describe(), Style::new().dimmed());
    }

    /// Renders one event. Returns true on `Event::Ready`.
    pub fn render(&mut self, event: Event) -> Result<bool> {
        match event {
            Event::GenerationStarted(model_id) => {
                self.failure = None;
                self.styled_line(&format!("[{model_id}]"), Style::new().dimmed())?;
            }
            Event::GenerationText(text) => {
                write!(self.out, "{text}")?;
                self.out.flush()?;
                self.mid_line = !text.ends_with('\n');
            }
            Event::UsageUpdated(usage) => {
                self.usage_line(&usage)?;
            }
            Event::GenerationCompleted(exchange) => {
                if exchange.is_none() {
                    self.line("The model returned an empty answer.")?;
                } else if self.mid_line {
                    self.line("")?;
                }
            }
            Event::GenerationFailed(err) => {
                self.styled_line(&err.call_to_action(), Style::new().red())?;
                self.failure = Some(err);
            }
            Event::Notice(text) => {
                self.styled_line(&text, Style::new().cyan())?;
            }
            Event::VerificationRequested() => {
                self.styled_line(
                    "Verification required before sending.",
                    Style::new().yellow(),
                )?;
            }
            Event::Ready() => {
                return Ok(true);
            }
        }

        return Ok(false);
    }
}

/// Renders events until the actions loop reports it is ready for more
/// input. Ctrl-C cancels the generation in progress.
async fn wait_for_ready<W: Write>(
    renderer: &mut Renderer<W>,
    tx: &mpsc::UnboundedSender<Action>,
    rx: &mut mpsc::UnboundedReceiver<Event>,
) -> Result<bool> {
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    return Ok(false);
                };
                if renderer.render(event)? {
                    return Ok(true);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tx.send(Action::Cancel())?;
            }
        }
    }
}

/// Interactive chat. Reads one prompt per line from stdin.
pub async fn start(
    tx: mpsc::UnboundedSender<Action>,
    mut rx: mpsc::UnboundedReceiver<Event>,
    draft: Option<String>,
) -> Result<bool> {
    let mut renderer = Renderer::new(io::stdout(), stdout_colored());
    let mut draft = draft;

    renderer.styled_line(
        "Type /help for commands, Ctrl-C to exit.",
        Style::new().dimmed(),
    )?;
    if let Some(text) = &draft {
        renderer.line(&format!(
            "Restored your saved prompt, press Enter to send it:\n{text}"
        ))?;
    }

    let prompt = renderer.styled(">", Style::new().green());
    loop {
        print!("{prompt} ");
        io::stdout().flush()?;

        let line = tokio::select! {
            line = next_line(&STDIN_LINES) => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let mut input = line.trim().to_string();
        if input.is_empty() {
            match draft.take() {
                Some(text) => input = text,
                None => continue,
            }
        }
        if let Some(command) = SlashCommand::parse(&input) {
            if command.is_quit() {
                break;
            }
        }

        tx.send(Action::Submit(input))?;
        if !wait_for_ready(&mut renderer, &tx, &mut rx).await? {
            break;
        }
    }

    return Ok(true);
}

/// Sends a single prompt and renders the answer. Returns false when the
/// generation failed.
pub async fn ask(
    prompt: &str,
    tx: mpsc::UnboundedSender<Action>,
    mut rx: mpsc::UnboundedReceiver<Event>,
) -> Result<bool> {
    let mut renderer = Renderer::new(io::stdout(), stdout_colored());

    tx.send(Action::Submit(prompt.to_string()))?;
    wait_for_ready(&mut renderer, &tx, &mut rx).await?;

    return Ok(renderer.failure.is_none());
}
