//! Interactive menu shown when no subcommand is given.

use anyhow::{Result, bail};
use dialoguer::Select;

use crate::Context;
use crate::commands::{apply, status};
use crate::reconciler::DriverTarget;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    if !console::user_attended() {
        bail!("no terminal attached; pass an explicit subcommand (see --help)");
    }

    ui::banner();

    let items = [
        "Install NVIDIA driver (stable repository)",
        "Install NVIDIA driver (backports)",
        "Install NVIDIA driver (.run installer, latest)",
        "Switch to open-source nouveau driver",
        "Install CUDA toolkit",
        "Remove NVIDIA driver",
        "Show system status",
        "Quit",
    ];

    let selection = Select::new()
        .with_prompt("Select an action")
        .items(&items)
        .default(0)
        .interact()?;

    match selection {
        0 => apply::run(ctx, DriverTarget::StableRepo),
        1 => apply::run(ctx, DriverTarget::Backports),
        2 => apply::run(ctx, DriverTarget::RunInstaller { version: None }),
        3 => apply::run(ctx, DriverTarget::OpenSource),
        4 => apply::run(ctx, DriverTarget::CudaToolkit),
        5 => apply::run(ctx, DriverTarget::Removed),
        6 => status::run(ctx, false),
        _ => Ok(()),
    }
}
