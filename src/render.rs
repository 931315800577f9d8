//! Terminal rendering of transcripts.

use colored::*;
use std::collections::HashMap;
use std::io::{self, Write};

use crate::session::ChatPhase;
use crate::transcript::{Entry, EntryStatus, SenderRole};

pub fn role_label(role: SenderRole) -> &'static str {
    match role {
        SenderRole::User => "أنت",
        SenderRole::Response => "الرد",
        SenderRole::Poet1 => "الشاعر الأول",
        SenderRole::Poet2 => "الشاعر الثاني",
        SenderRole::Judge => "الحكم",
    }
}

fn header(entry: &Entry) -> ColoredString {
    let label = match entry.sender {
        SenderRole::Poet1 | SenderRole::Poet2 | SenderRole::Judge => {
            format!("[{} · {}]", role_label(entry.sender), entry.round)
        }
        SenderRole::User | SenderRole::Response => format!("[{}]", role_label(entry.sender)),
    };
    match entry.sender {
        SenderRole::User => label.bright_white().bold(),
        SenderRole::Response => label.bright_cyan().bold(),
        SenderRole::Poet1 => label.bright_blue().bold(),
        SenderRole::Poet2 => label.bright_magenta().bold(),
        SenderRole::Judge => label.bright_red().bold(),
    }
}

/// One entry as a block: header line, then its text.
pub fn render_entry(entry: &Entry) -> String {
    let mut out = format!("{}\n{}", header(entry), entry.text);
    if entry.status == EntryStatus::Error {
        let reason = entry.error.as_deref().unwrap_or("failed");
        out.push_str(&format!("\n{}", format!("! {reason}").bright_red()));
    }
    out
}

/// The failed entries of a transcript, each as a full block with its reason.
pub fn render_failures(entries: &[Entry]) -> String {
    entries
        .iter()
        .filter(|e| e.status == EntryStatus::Error)
        .map(render_entry)
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn render_phase(phase: ChatPhase, error: Option<&str>) -> String {
    match (phase, error) {
        (ChatPhase::Error, Some(e)) => format!("{} {}", "[error]".bright_red(), e),
        (ChatPhase::Error, None) => "[error]".bright_red().to_string(),
        (ChatPhase::Finalized, _) => "[done]".bright_green().to_string(),
        (ChatPhase::Sending, _) => "[sending]".dimmed().to_string(),
        (ChatPhase::Streaming, _) => "[streaming]".dimmed().to_string(),
        (ChatPhase::Idle, _) => String::new(),
    }
}

/// Prints only what changed since the previous call, so a streamed entry
/// reads as continuous text on the terminal.
#[derive(Debug, Default)]
pub struct LivePrinter {
    printed: HashMap<String, usize>,
    current: Option<String>,
}

impl LivePrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update<W: Write>(&mut self, entries: &[Entry], out: &mut W) -> io::Result<()> {
        for entry in entries {
            if entry.text.is_empty() {
                continue;
            }
            let from = match self.printed.get(&entry.id) {
                Some(&n) if n <= entry.text.len() && entry.text.is_char_boundary(n) => n,
                // Text was replaced wholesale; print it again in full.
                _ => 0,
            };
            let delta = &entry.text[from..];
            if delta.is_empty() {
                continue;
            }
            if from == 0 || self.current.as_deref() != Some(entry.id.as_str()) {
                if self.current.is_some() {
                    writeln!(out)?;
                }
                writeln!(out, "{}", header(entry))?;
            }
            write!(out, "{delta}")?;
            self.printed.insert(entry.id.clone(), entry.text.len());
            self.current = Some(entry.id.clone());
        }
        out.flush()
    }
}
