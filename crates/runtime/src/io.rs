//! Local output channels
//!
//! Console and voice sinks used by the router for local delivery and by the
//! scenario engine's `io.*` call targets.

use std::sync::{Arc, Mutex};
use tracing::info;

pub trait ConsoleSink: Send + Sync {
    fn print(&self, node_id: &str, text: &str, origin: Option<&str>);
}

pub trait VoiceSink: Send + Sync {
    fn speak(&self, text: &str, voice: Option<&str>);
}

pub type SharedConsole = Arc<dyn ConsoleSink>;
pub type SharedVoice = Arc<dyn VoiceSink>;

/// Console line format shared by every sink
pub fn format_console_line(node_id: &str, text: &str, origin: Option<&str>) -> String {
    match origin {
        Some(origin) if !origin.is_empty() => format!("[{node_id}] {text} (from {origin})"),
        _ => format!("[{node_id}] {text}"),
    }
}

/// Prints to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutConsole;

impl ConsoleSink for StdoutConsole {
    fn print(&self, node_id: &str, text: &str, origin: Option<&str>) {
        println!("{}", format_console_line(node_id, text, origin));
    }
}

/// No speech engine is bundled; utterances go to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogVoice;

impl VoiceSink for LogVoice {
    fn speak(&self, text: &str, voice: Option<&str>) {
        info!(voice = voice.unwrap_or("default"), text = %text, "tts");
    }
}

/// Keeps printed lines in memory
#[derive(Debug, Default)]
pub struct MemoryConsole {
    lines: Mutex<Vec<String>>,
}

impl MemoryConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl ConsoleSink for MemoryConsole {
    fn print(&self, node_id: &str, text: &str, origin: Option<&str>) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(format_console_line(node_id, text, origin));
        }
    }
}

/// Keeps spoken phrases in memory
#[derive(Debug, Default)]
pub struct MemoryVoice {
    phrases: Mutex<Vec<String>>,
}

impl MemoryVoice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phrases(&self) -> Vec<String> {
        self.phrases.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl VoiceSink for MemoryVoice {
    fn speak(&self, text: &str, _voice: Option<&str>) {
        if let Ok(mut phrases) = self.phrases.lock() {
            phrases.push(text.to_string());
        }
    }
}
