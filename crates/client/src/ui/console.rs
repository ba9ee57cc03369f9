//! Console output: status lines, the progress bar and yes/no prompts.
//!
//! The progress bar is redrawn in place on a terminal and printed line by
//! line otherwise (pipes, CI logs).

use std::io::{self, BufRead, IsTerminal, Write};

use crossterm::{
    cursor::MoveToColumn,
    queue,
    style::{Print, Stylize},
    terminal::{Clear, ClearType},
};

use super::Confirm;
use crate::session::{TransferEvent, TransferObserver, TransferState};

/// Width of the bar between the brackets.
const BAR_WIDTH: usize = 30;

/// Print an informational line.
pub fn info(message: &str) {
    println!("{} {}", "Info: ".green(), message);
}

/// Print a warning line.
pub fn warn(message: &str) {
    println!("{} {}", "Warn: ".yellow(), message);
}

/// Print an error line to stderr.
pub fn error(message: &str) {
    eprintln!("{} {}", "Error:".red(), message);
}

/// Print a detail line (versions, sizes).
pub fn detail(message: &str) {
    println!("{}", message.dark_grey());
}

/// Render one progress line.
pub fn render_progress(percent: u8, bytes_per_sec: u64, secs_left: u64) -> String {
    let percent = percent.min(100);
    let filled = BAR_WIDTH * usize::from(percent) / 100;
    format!(
        "[{}{}] {:>3}% {:>5} B/s {:02}:{:02} left",
        "#".repeat(filled),
        ".".repeat(BAR_WIDTH - filled),
        percent,
        bytes_per_sec,
        secs_left / 60,
        secs_left % 60
    )
}

/// Renders session events on the console.
#[derive(Debug)]
pub struct ConsoleObserver {
    verbose: bool,
    in_place: bool,
    bar_open: bool,
    last_percent: Option<u8>,
}

impl ConsoleObserver {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            in_place: io::stdout().is_terminal(),
            bar_open: false,
            last_percent: None,
        }
    }

    /// Finish an open progress bar line.
    fn close_bar(&mut self) {
        if self.bar_open {
            println!();
            self.bar_open = false;
        }
    }

    fn draw(&mut self, percent: u8, bytes_per_sec: u64, secs_left: u64) {
        let line = render_progress(percent, bytes_per_sec, secs_left);
        if self.in_place {
            let mut stdout = io::stdout();
            let drawn = queue!(stdout, MoveToColumn(0), Clear(ClearType::CurrentLine), Print(&line))
                .and_then(|_| stdout.flush());
            if drawn.is_ok() {
                self.bar_open = true;
                return;
            }
        }
        // Line mode: one line per percent step
        if self.last_percent != Some(percent) {
            println!("{line}");
        }
    }
}

impl TransferObserver for ConsoleObserver {
    fn on_event(&mut self, event: &TransferEvent) {
        match event {
            TransferEvent::Progress {
                percent,
                bytes_per_sec,
                secs_left,
            } => {
                self.draw(*percent, *bytes_per_sec, *secs_left);
                self.last_percent = Some(*percent);
            }
            TransferEvent::StateChanged(state) => {
                if *state == TransferState::Uploading {
                    self.last_percent = None;
                } else {
                    self.close_bar();
                }
                if self.verbose {
                    detail(&format!("State: {state}"));
                }
            }
            TransferEvent::PackageSizeReduced {
                requested,
                negotiated,
            } => {
                self.close_bar();
                warn(&format!(
                    "Package size reduced from {requested} to {negotiated} bytes by the device"
                ));
            }
            TransferEvent::Info(message) => {
                self.close_bar();
                info(message);
            }
            TransferEvent::Warning(message) => {
                self.close_bar();
                warn(message);
            }
            TransferEvent::Error(message) => {
                // The caller prints the error that ended the command
                self.close_bar();
                if self.verbose {
                    detail(&format!("Session failed: {message}"));
                }
            }
        }
    }
}

/// Asks questions on stdin.
#[derive(Debug, Default)]
pub struct ConsolePrompt;

impl ConsolePrompt {
    pub fn new() -> Self {
        Self
    }
}

/// Returns `true` for an affirmative answer (English or German).
fn is_yes(answer: &str) -> bool {
    matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes" | "j" | "ja"
    )
}

impl Confirm for ConsolePrompt {
    fn confirm(&mut self, question: &str) -> bool {
        print!("{} {} (y/n) ", "Ask:  ".cyan(), question);
        if io::stdout().flush().is_err() {
            return false;
        }

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_yes(&answer),
            Err(_) => false,
        }
    }
}
