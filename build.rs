//! Build script that renders man pages for `buildvm` and each subcommand
//! into the build output directory.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render(page: &Man, target: &Path) -> io::Result<()> {
    let mut buffer = Vec::new();
    page.render(&mut buffer)?;
    fs::write(target, buffer)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = PathBuf::from(
        env::var_os("OUT_DIR")
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?,
    );

    let root = Cli::command();
    for sub in root.get_subcommands() {
        let title = format!("buildvm-{}", sub.get_name());
        let page = Man::new(sub.clone()).title(title.to_uppercase());
        render(&page, &out_dir.join(format!("{title}.1")))?;
    }
    render(&Man::new(root), &out_dir.join("buildvm.1"))?;

    Ok(())
}
