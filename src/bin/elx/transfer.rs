use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use dialoguer::Confirm;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use eventlog_expert::ingest::export_tag;

use crate::Workspace;

pub fn export_command() -> Command {
    Command::new("export")
        .about("Write every record of a tag to a newline-delimited JSON file")
        .arg(
            Arg::new("tag")
                .long("tag")
                .short('t')
                .required(true)
                .value_name("NAME"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .required(true)
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Export file. Parent directories are created if needed."),
        )
        .arg(
            Arg::new("overwrite")
                .long("overwrite")
                .action(ArgAction::SetTrue)
                .help("Overwrite the output file without asking."),
        )
}

pub fn import_command() -> Command {
    Command::new("import")
        .about("Import an export file. Tags that already exist are replaced")
        .arg(
            Arg::new("input")
                .long("input")
                .short('i')
                .required(true)
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf)),
        )
}

pub fn run_export(matches: &ArgMatches, workspace: &Workspace) -> Result<()> {
    let tag = matches
        .get_one::<String>("tag")
        .context("--tag is required")?;
    let output = matches
        .get_one::<PathBuf>("output")
        .context("--output is required")?;

    let file = create_output_file(output, !matches.get_flag("overwrite"))?;
    let written = export_tag(&workspace.store, tag, file)
        .with_context(|| format!("failed to export tag `{}`", tag))?;
    eprintln!("wrote {} records to {}", written, output.display());
    Ok(())
}

pub fn run_import(matches: &ArgMatches, workspace: &mut Workspace) -> Result<()> {
    let input = matches
        .get_one::<PathBuf>("input")
        .context("--input is required")?;

    let imported =
        eventlog_expert::import_file(&mut workspace.store, &mut workspace.priority, input)
            .with_context(|| format!("failed to import `{}`", input.display()))?;

    for (tag, counts) in imported {
        println!(
            "{}",
            serde_json::json!({ "tag": tag, "counts": counts })
        );
    }
    Ok(())
}

fn create_output_file(path: &Path, prompt: bool) -> Result<File> {
    if path.is_dir() {
        bail!(
            "There is a directory at {}, refusing to overwrite",
            path.display()
        );
    }

    if path.exists() && prompt {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Are you sure you want to override output file at {}",
                path.display()
            ))
            .default(false)
            .interact()
            .context("Failed to write confirmation prompt to term")?;
        if !confirmed {
            bail!("Cancelled");
        }
    }

    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .with_context(|| format!("failed to create `{}`", parent.display()))?,
        _ => {}
    }
    File::create(path).with_context(|| format!("failed to create `{}`", path.display()))
}
