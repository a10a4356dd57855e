use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use eventlog_expert::utils::{DEFAULT_TIME_FORMAT, time_zone_from_name};
use eventlog_expert::{CollectingSink, EventEnrichmentPipeline, JsonlRecordReader, PipelineSettings};

use crate::Workspace;

pub fn command() -> Command {
    Command::new("enrich")
        .about("Resolve descriptions for raw records (one JSON object per line) and print them newest first")
        .arg(
            Arg::new("input")
                .long("input")
                .short('i')
                .required(true)
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("tz")
                .long("tz")
                .value_name("ZONE")
                .default_value("UTC")
                .help("Time zone for the displayed time: an IANA name, an offset like `+02:00`, `UTC` or `local`."),
        )
        .arg(
            Arg::new("time-format")
                .long("time-format")
                .value_name("FORMAT")
                .default_value(DEFAULT_TIME_FORMAT)
                .help("strftime-style format of the displayed time."),
        )
        .arg(
            Arg::new("oldest-first")
                .long("oldest-first")
                .action(ArgAction::SetTrue)
                .help("The input lists records oldest first; output is reversed once."),
        )
}

pub fn run(matches: &ArgMatches, workspace: &Workspace) -> Result<()> {
    let input = matches
        .get_one::<PathBuf>("input")
        .context("--input is required")?;
    let zone_name = matches.get_one::<String>("tz").context("has a default")?;
    let time_format = matches
        .get_one::<String>("time-format")
        .context("has a default")?;

    let time_zone = time_zone_from_name(zone_name)
        .with_context(|| format!("unknown time zone `{}`", zone_name))?;
    let settings = PipelineSettings::new()
        .time_zone(time_zone)
        .time_format(time_format.as_str())
        .source_is_oldest_first(matches.get_flag("oldest-first"));

    let reader = JsonlRecordReader::from_path(input)
        .with_context(|| format!("failed to open `{}`", input.display()))?;

    let mut pipeline = EventEnrichmentPipeline::new(settings);
    let mut sink = CollectingSink::default();
    pipeline
        .load(
            reader,
            &workspace.store,
            &workspace.priority.snapshot(),
            &mut sink,
        )
        .with_context(|| format!("failed to enrich `{}`", input.display()))?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for record in sink.into_ordered() {
        serde_json::to_writer(&mut out, &record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
