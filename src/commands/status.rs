//! Display the probed system snapshot.

use anyhow::Result;

use crate::Context;
use crate::artifacts::ArtifactSet;
use crate::probe::{self, SecureBoot, SystemSnapshot};
use crate::ui;

pub fn run(_ctx: &Context, json: bool) -> Result<()> {
    let snapshot = probe::probe()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    ui::header("System Status");
    print_snapshot(&snapshot);

    for advisory in snapshot.advisories() {
        ui::warn(&advisory);
    }

    ui::section("Repository Components");
    match probe::check_repo_components(&ArtifactSet::new().apt_dir()) {
        Ok(()) => ui::success("contrib and non-free are enabled"),
        Err(e) => ui::warn(&format!("{e}")),
    }

    Ok(())
}

/// Key-value dump of the snapshot, shared with the apply pre-flight.
pub fn print_snapshot(snapshot: &SystemSnapshot) {
    ui::section("System");
    for gpu in &snapshot.gpus {
        let key = if gpu.vendor_match { "gpu" } else { "gpu (other)" };
        ui::kv(key, &gpu.description);
    }
    ui::kv("kernel", &snapshot.kernel_version);
    ui::kv("session", &snapshot.session_type);
    ui::kv(
        "secure boot",
        match snapshot.secure_boot {
            SecureBoot::Enabled => "enabled",
            SecureBoot::Disabled => "disabled",
            SecureBoot::Unknown => "unknown",
        },
    );
    ui::kv(
        "distribution",
        &format!("{} (debian {})", snapshot.distro.codename, snapshot.distro.major),
    );
    ui::kv("architecture", snapshot.arch.dpkg_name());
    ui::kv(
        "driver",
        snapshot.driver_version.as_deref().unwrap_or("none"),
    );
}
