//! CLI output formatting.

use std::fmt::Display;

use owo_colors::OwoColorize;

/// Print the application header.
pub fn header(version: &str) {
    println!("{} {}", "pubsub-client".bold(), version.dimmed());
    println!();
}

/// Print a labeled value.
pub fn field(label: &str, value: impl Display) {
    println!("  {:<12} {}", label.dimmed(), value);
}

/// Print a success line.
pub fn success(message: &str) {
    println!("  {} {}", "✓".green(), message);
}

/// Print a warning line.
pub fn warning(message: &str) {
    println!("  {} {}", "⚠".yellow(), message);
}

/// Print an error line.
pub fn error(message: &str) {
    eprintln!("  {} {}", "×".red(), message);
}

/// Print a section header.
pub fn section(title: &str) {
    println!();
    println!("{}", title.bold());
}

/// Print an info line (for streaming output), e.g. one received message.
pub fn info(timestamp: &str, label: &str, message: &str) {
    println!("  {} {} {}", timestamp.dimmed(), label.cyan(), message);
}

/// Start a progress spinner.
pub fn spinner(message: &str) -> indicatif::ProgressBar {
    let pb = indicatif::ProgressBar::new_spinner();
    pb.set_style(
        indicatif::ProgressStyle::default_spinner()
            .template("  {spinner:.cyan} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Finish a spinner with success.
pub fn spinner_success(pb: &indicatif::ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✓".green(), message));
}

/// Finish a spinner with failure.
pub fn spinner_fail(pb: &indicatif::ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "×".red(), message));
}

/// Format a highlighted value in cyan.
pub fn highlight(value: impl Display) -> String {
    format!("{}", value.to_string().cyan())
}

/// Format a dimmed/muted value.
pub fn muted(value: impl Display) -> String {
    format!("{}", value.to_string().dimmed())
}

/// Print a note/hint.
pub fn note(message: &str) {
    println!("  {}", message.dimmed());
}
