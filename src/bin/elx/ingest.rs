use anyhow::{Context, Result, format_err};
use clap::{Arg, ArgAction, ArgMatches, Command};
use encoding::all::encodings;
use encoding::types::EncodingRef;
use indoc::indoc;
use std::path::PathBuf;

use eventlog_expert::provider_metadata::ProviderRegistry;
use eventlog_expert::{ExtractorSettings, ProviderMetadataExtractor, RegistrySnapshot};

use crate::Workspace;

pub fn command() -> Command {
    Command::new("ingest")
        .about("Extract provider metadata described by a registry snapshot and store it under a tag")
        .long_about(indoc!(r#"
            Extract provider metadata described by a registry snapshot and store it under a tag.

            The snapshot is a JSON description of a machine's event log registrations: legacy
            event sources with their EventMessageFile values, and modern publishers with their
            resource and message files. Module paths are resolved against --module-root (a copy
            of the machine's system drive) or against the machine itself with --machine.

            Ingesting under a tag that already exists replaces it.
        "#))
        .arg(
            Arg::new("registry")
                .long("registry")
                .short('r')
                .required(true)
                .value_name("JSON")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Registry snapshot of the machine to ingest."),
        )
        .arg(
            Arg::new("tag")
                .long("tag")
                .short('t')
                .required(true)
                .value_name("NAME")
                .help("Tag to store the metadata under, e.g. the machine name."),
        )
        .arg(
            Arg::new("machine")
                .long("machine")
                .short('m')
                .value_name("HOST")
                .help("Read modules from this machine's administrative share."),
        )
        .arg(
            Arg::new("module-root")
                .long("module-root")
                .value_name("DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Directory mirroring the machine's system drive. Takes precedence over --machine."),
        )
        .arg(
            Arg::new("provider")
                .long("provider")
                .short('p')
                .action(ArgAction::Append)
                .value_name("NAME")
                .help("Only ingest this provider. Can be passed multiple times (default: every registered provider)."),
        )
        .arg(
            Arg::new("ansi-codec")
                .long("ansi-codec")
                .value_name("CODEC")
                .default_value("windows-1252")
                .help("Code page of ANSI message table entries."),
        )
        .arg(
            Arg::new("legacy-only")
                .long("legacy-only")
                .action(ArgAction::SetTrue)
                .help("Skip modern provider manifests."),
        )
}

pub fn ansi_codec(name: &str) -> Result<EncodingRef> {
    encodings()
        .iter()
        .find(|c| c.name() == name)
        .copied()
        .ok_or_else(|| format_err!("unknown ANSI codec `{}`", name))
}

pub fn run(matches: &ArgMatches, workspace: &mut Workspace) -> Result<()> {
    let registry_path = matches
        .get_one::<PathBuf>("registry")
        .context("--registry is required")?;
    let tag = matches
        .get_one::<String>("tag")
        .context("--tag is required")?;
    let machine = matches.get_one::<String>("machine").map(String::as_str);

    let mut registry = RegistrySnapshot::load(registry_path).with_context(|| {
        format!(
            "failed to load registry snapshot `{}`",
            registry_path.display()
        )
    })?;
    if let Some(root) = matches.get_one::<PathBuf>("module-root") {
        registry = registry.with_module_root(root);
    }

    let codec_name = matches
        .get_one::<String>("ansi-codec")
        .context("has a default")?;
    let settings = ExtractorSettings::new()
        .ansi_codec(ansi_codec(codec_name)?)
        .modern_providers(!matches.get_flag("legacy-only"));

    let providers: Vec<String> = match matches.get_many::<String>("provider") {
        Some(names) => names.cloned().collect(),
        None => registry.provider_names(),
    };

    let extractor = ProviderMetadataExtractor::with_settings(registry, settings);
    let summary = eventlog_expert::ingest_providers(
        &extractor,
        &mut workspace.store,
        &mut workspace.priority,
        &providers,
        machine,
        tag,
        |progress| {
            eprintln!(
                "[{}/{}] {}",
                progress.index + 1,
                progress.total,
                progress.provider
            )
        },
    )
    .with_context(|| format!("failed to ingest tag `{}`", tag))?;

    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}
