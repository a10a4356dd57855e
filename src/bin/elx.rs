use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use std::path::{Path, PathBuf};

use eventlog_expert::ingest::sync_priority;
use eventlog_expert::priority::PRIORITY_FILE;
use eventlog_expert::{TagPriority, TemplateStore};

#[path = "elx/enrich.rs"]
mod enrich;
#[path = "elx/ingest.rs"]
mod ingest;
#[path = "elx/tags.rs"]
mod tags;
#[path = "elx/transfer.rs"]
mod transfer;

/// The store every subcommand works on, with its tag priority already merged.
pub struct Workspace {
    pub store: TemplateStore,
    pub priority: TagPriority,
}

impl Workspace {
    fn open(store_dir: &Path, priority_file: Option<&Path>) -> Result<Self> {
        let store = TemplateStore::open(store_dir)
            .with_context(|| format!("failed to open store at `{}`", store_dir.display()))?;

        let priority_path = priority_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| store_dir.join(PRIORITY_FILE));
        let mut priority = TagPriority::load(&priority_path).with_context(|| {
            format!(
                "failed to load tag priority from `{}`",
                priority_path.display()
            )
        })?;
        sync_priority(&store, &mut priority).context("failed to merge tag priority")?;

        Ok(Workspace { store, priority })
    }
}

fn verbosity(matches: &ArgMatches) -> Option<LevelFilter> {
    match matches.get_count("verbose") {
        0 => None,
        1 => Some(LevelFilter::Info),
        2 => Some(LevelFilter::Debug),
        3 => Some(LevelFilter::Trace),
        _ => {
            eprintln!("using more than -vvv does not affect verbosity level");
            Some(LevelFilter::Trace)
        }
    }
}

fn try_to_initialize_logging(level: Option<LevelFilter>) {
    if let Some(level) = level {
        match TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto) {
            Ok(_) => {}
            Err(e) => eprintln!("Failed to initialize logging: {}", e),
        }
    }
}

fn cli() -> Command {
    Command::new("elx")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Resolve Windows event descriptions from tagged provider metadata")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("store")
                .long("store")
                .short('s')
                .required(true)
                .value_name("DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Directory of the template store. Created if it does not exist."),
        )
        .arg(
            Arg::new("priority-file")
                .long("priority-file")
                .value_name("PATH")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Tag priority preference file (defaults to <store>/tag_priority.json)."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("Sets debug prints level for the application:\n\t-v   - info\n\t-vv  - debug\n\t-vvv - trace"),
        )
        .subcommand(ingest::command())
        .subcommand(tags::command())
        .subcommand(transfer::export_command())
        .subcommand(transfer::import_command())
        .subcommand(enrich::command())
}

fn run(matches: &ArgMatches) -> Result<()> {
    let store_dir = matches
        .get_one::<PathBuf>("store")
        .context("--store is required")?;
    let priority_file = matches.get_one::<PathBuf>("priority-file");
    let mut workspace = Workspace::open(store_dir, priority_file.map(PathBuf::as_path))?;

    match matches.subcommand() {
        Some(("ingest", sub)) => ingest::run(sub, &mut workspace),
        Some(("tags", sub)) => tags::run(sub, &mut workspace),
        Some(("export", sub)) => transfer::run_export(sub, &workspace),
        Some(("import", sub)) => transfer::run_import(sub, &mut workspace),
        Some(("enrich", sub)) => enrich::run(sub, &workspace),
        Some((other, _)) => bail!("unknown subcommand `{}`", other),
        None => bail!("a subcommand is required"),
    }
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    try_to_initialize_logging(verbosity(&matches));
    run(&matches)
}
