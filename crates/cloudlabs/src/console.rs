//! Console progress output for the labs.
//!
//! Labs are meant to be watched, so progress goes to stdout in colour.
//! Diagnostics still go through `log`.
use colored::Colorize;

pub fn heading(msg: impl core::fmt::Display) {
    println!("\n{}", msg.to_string().bold());
}

/// A numbered lab step.
pub fn step(n: usize, msg: impl core::fmt::Display) {
    println!("\n{} {msg}", format!("[{n}]").blue().bold());
}

pub fn ok(msg: impl core::fmt::Display) {
    println!("  {} {msg}", "✓".green().bold());
}

pub fn info(msg: impl core::fmt::Display) {
    println!("  {} {msg}", "·".dimmed());
}

pub fn warn(msg: impl core::fmt::Display) {
    println!("  {} {msg}", "!".yellow().bold());
}

pub fn fail(msg: impl core::fmt::Display) {
    eprintln!("  {} {msg}", "✗".red().bold());
}
