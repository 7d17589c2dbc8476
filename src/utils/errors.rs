//! User-Friendly Error Formatting
//!
//! Turns a startup failure into a message with troubleshooting hints.

use std::fmt::Write;

/// Which hints to show for an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorCategory {
    Config,
    Display,
    Latency,
    Timer,
    Generic,
}

fn categorize(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    if lower.contains("config") || lower.contains("toml") {
        ErrorCategory::Config
    } else if lower.contains("scanline") || lower.contains("output") || lower.contains("adapter") {
        ErrorCategory::Display
    } else if lower.contains("reflex") || lower.contains("anti_lag") || lower.contains("xell") {
        ErrorCategory::Latency
    } else if lower.contains("timer") || lower.contains("clock") {
        ErrorCategory::Timer
    } else {
        ErrorCategory::Generic
    }
}

/// Format an error for the terminal, with causes and next steps
pub fn format_user_error(error: &anyhow::Error) -> String {
    let mut output = String::new();
    let message = error.to_string();

    writeln!(output).ok();
    writeln!(output, "╔════════════════════════════════════════════════════════════╗").ok();
    writeln!(output, "║                          ERROR                             ║").ok();
    writeln!(output, "╚════════════════════════════════════════════════════════════╝").ok();
    writeln!(output).ok();

    match categorize(&message) {
        ErrorCategory::Config => {
            writeln!(output, "Configuration Error").ok();
            writeln!(output).ok();
            writeln!(output, "  1. Check TOML syntax and field names").ok();
            writeln!(output, "     → Sections: [pacing], [sampler], [latency], [logging]").ok();
            writeln!(output, "  2. Values out of range").ok();
            writeln!(output, "     → divisor must be at least 1, target_fps must not be negative").ok();
        }
        ErrorCategory::Display => {
            writeln!(output, "Display Query Error").ok();
            writeln!(output).ok();
            writeln!(output, "  1. The window is not on a physical output").ok();
            writeln!(output, "     → Remote sessions and headless adapters report no scanline").ok();
            writeln!(output, "  2. The driver does not expose the scan position").ok();
            writeln!(output, "     → Use --mode simple to fall back to a plain fps cap").ok();
        }
        ErrorCategory::Latency => {
            writeln!(output, "Latency Backend Error").ok();
            writeln!(output).ok();
            writeln!(output, "  1. The vendor SDK is not present for this GPU").ok();
            writeln!(output, "     → Set [latency] technology = \"none\"").ok();
        }
        ErrorCategory::Timer => {
            writeln!(output, "Timer Error").ok();
            writeln!(output).ok();
            writeln!(output, "  1. High resolution timers are unavailable").ok();
            writeln!(output, "     → Pacing keeps working with coarser waits").ok();
        }
        ErrorCategory::Generic => {
            writeln!(output, "{}", message).ok();
        }
    }

    writeln!(output).ok();
    writeln!(output, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━").ok();
    writeln!(output, "Technical Details:").ok();
    writeln!(output).ok();
    writeln!(output, "{:#}", error).ok();
    writeln!(output).ok();
    writeln!(output, "  - Run with -vv for detailed logs").ok();

    output
}
