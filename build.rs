//! Build script for vblank-pacer
//!
//! Sets compile-time environment variables for build identification.

use std::process::Command;

fn command_output(program: &str, args: &[&str], fallback: &str) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_else(|| fallback.to_string())
}

fn main() {
    println!("cargo:rustc-env=BUILD_DATE={}", command_output("date", &["+%Y-%m-%d"], "unknown"));
    println!("cargo:rustc-env=BUILD_TIME={}", command_output("date", &["+%H:%M:%S"], ""));
    println!(
        "cargo:rustc-env=GIT_HASH={}",
        command_output("git", &["rev-parse", "--short", "HEAD"], "unknown")
    );

    // Re-run if git HEAD changes
    println!("cargo:rerun-if-changed=.git/HEAD");
}
