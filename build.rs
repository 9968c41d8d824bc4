//! Renders the `vmtest` man pages into `OUT_DIR`.
//!
//! One page covers the top-level command and one more is written per
//! backend (`vmtest-qemu.1`, `vmtest-cloud.1`), so `man vmtest-qemu` shows
//! the emulator flags without the cloud ones.

use std::env;
use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

fn render(man: Man, path: &Path) -> Result<(), Box<dyn Error>> {
    let mut page = Vec::new();
    man.render(&mut page)?;
    fs::write(path, page)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or("OUT_DIR was not set")?;

    let top = cli::Cli::command();
    for sub in top.get_subcommands() {
        let name = format!("vmtest-{}", sub.get_name());
        let path = out_dir.join(format!("{name}.1"));
        render(Man::new(sub.clone()).title(name), &path)?;
    }
    render(Man::new(top), &out_dir.join("vmtest.1"))
}
