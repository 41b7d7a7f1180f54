//! Embeds the firmware revision into the binaries so the startup log can
//! identify which build is driving the gate.

use std::process::Command;

fn main() {
    let revision = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=8"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .unwrap_or_else(|| String::from("unknown"));

    println!("cargo:rustc-env=PARKING_GATE_REVISION={}", revision);
    println!("cargo:rerun-if-changed=.git/HEAD");
}
