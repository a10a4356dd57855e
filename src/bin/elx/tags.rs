use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use dialoguer::Confirm;

use eventlog_expert::ingest::{delete_tag, reorder_tags};

use crate::Workspace;

pub fn command() -> Command {
    Command::new("tags")
        .about("List, delete and rank ingestion tags")
        .subcommand_required(true)
        .subcommand(
            Command::new("list").about("Print tags by priority, with their record counts, as JSON lines"),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete a tag and every record stored under it")
                .arg(Arg::new("tag").required(true).value_name("TAG"))
                .arg(
                    Arg::new("no-confirm")
                        .long("no-confirm")
                        .action(ArgAction::SetTrue)
                        .help("Do not ask for confirmation, useful for automation"),
                ),
        )
        .subcommand(
            Command::new("order")
                .about("Move the given tags to the top of the priority, in the given order")
                .arg(
                    Arg::new("tags")
                        .required(true)
                        .num_args(1..)
                        .value_name("TAG"),
                ),
        )
}

pub fn run(matches: &ArgMatches, workspace: &mut Workspace) -> Result<()> {
    match matches.subcommand() {
        Some(("list", _)) => list(workspace),
        Some(("delete", sub)) => {
            let tag = sub.get_one::<String>("tag").context("tag is required")?;
            if !sub.get_flag("no-confirm") && !confirm_delete(tag)? {
                bail!("Cancelled");
            }
            delete_tag(&mut workspace.store, &mut workspace.priority, tag)
                .with_context(|| format!("failed to delete tag `{}`", tag))?;
            list(workspace)
        }
        Some(("order", sub)) => {
            let order: Vec<String> = sub
                .get_many::<String>("tags")
                .context("tags are required")?
                .cloned()
                .collect();
            reorder_tags(&workspace.store, &mut workspace.priority, &order)
                .context("failed to reorder tags")?;
            list(workspace)
        }
        _ => bail!("a tags subcommand is required"),
    }
}

fn confirm_delete(tag: &str) -> Result<bool> {
    Confirm::new()
        .with_prompt(format!(
            "Are you sure you want to delete tag `{}` and all of its records?",
            tag
        ))
        .default(false)
        .interact()
        .context("Failed to write confirmation prompt to term")
}

fn list(workspace: &Workspace) -> Result<()> {
    for tag in workspace.priority.ranked_tags() {
        let counts = workspace.store.tag_counts(&tag.name);
        println!(
            "{}",
            serde_json::json!({
                "name": tag.name,
                "rank": tag.rank,
                "counts": counts,
            })
        );
    }
    Ok(())
}
