//! CLI command handler: layer config, run the pipeline, report and write the manifest.

use anyhow::{Context, Result, bail};
use clap::CommandFactory;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use crate::engine::arg_parser::{Cli, parse_define, parse_vars};
use crate::engine::progress::{counter_observer, create_counter, refresh_bar};
use crate::pipeline::Orchestrator;
use crate::template::Value;
use crate::utils::config::PackagePaths;
use crate::utils::stencil_toml::{CliFileSettings, apply_file_to_opts, load_stencil_toml};
use crate::utils::tempfiles::write_atomic;
use crate::utils::setup_logging;
use crate::{ConfigError, Opts, RunReport};

/// Build opts from defaults → `.stencil.toml` → environment → command line.
/// Returns the opts plus the CLI-only settings after layering.
fn setup_opts(cli: &Cli) -> (Opts, CliFileSettings) {
    let cwd = cli.cwd.clone().unwrap_or_else(|| PathBuf::from("."));
    let mut opts = Opts {
        cwd: cwd.clone(),
        ..Opts::default()
    };
    let file = load_stencil_toml(&cwd)
        .map(|f| apply_file_to_opts(&f, &cwd, &mut opts))
        .unwrap_or_default();
    let settings = CliFileSettings {
        verbose: cli.verbose.or(file.verbose),
        quiet: cli.quiet.or(file.quiet),
        env: cli.env.or(file.env),
        manifest: file.manifest,
    };
    setup_logging(
        settings.verbose.unwrap_or(false),
        settings.quiet.unwrap_or(false),
    );

    if settings.env.unwrap_or(false) {
        if let Err(e) = dotenvy::from_path(cwd.join(".env")) {
            debug!("No .env loaded: {e}");
        }
        opts.env_defines = std::env::vars()
            .map(|(k, v)| (k, Value::from_cli(&v)))
            .collect();
    }

    apply_cli_to_opts(cli, &mut opts);
    (opts, settings)
}

/// Command-line values win over everything loaded before them.
fn apply_cli_to_opts(cli: &Cli, opts: &mut Opts) {
    if !cli.patterns.is_empty() {
        opts.patterns = cli.patterns.clone();
    }
    if let Some(ref p) = cli.input {
        opts.input_dir = Some(p.clone());
    }
    if let Some(ref p) = cli.output {
        opts.output_dir = Some(p.clone());
    }
    if !cli.transform.is_empty() {
        opts.transform_types = cli.transform.clone();
    }
    if let Some(v) = cli.recursive {
        opts.recursive = v;
    }
    if let Some(v) = cli.overwrite {
        opts.overwrite = v;
    }
    if let Some(v) = cli.simulate {
        opts.simulate = v;
    }
    if let Some(n) = cli.max_reads {
        opts.caps.reads = n;
    }
    if let Some(n) = cli.max_writes {
        opts.caps.writes = n;
    }
    if let Some(n) = cli.max_expansions {
        opts.caps.expansions = n;
    }
    opts.defines
        .extend(cli.defines.iter().flat_map(|d| parse_define(d)));
    opts.vars.extend(parse_vars(&cli.vars));
}

/// Usage text for a configuration error.
fn usage_for(err: &ConfigError) -> String {
    let usage = Cli::command().render_usage();
    let hint = match err {
        ConfigError::EmptyPatterns => "give at least one PATTERN or --input DIR",
        ConfigError::UnsafeOutput(_) => "choose another --output or pass --overwrite",
    };
    format!("{usage}\n\n{err}\n  hint: {hint}")
}

/// Write the manifest to `dest`, or stdout for `None`.
fn write_manifest(report: &RunReport, dest: Option<&Path>) -> Result<()> {
    let mut text = report.manifest();
    if !text.is_empty() {
        text.push('\n');
    }
    match dest {
        Some(path) => {
            write_atomic(path, text.as_bytes())
                .with_context(|| format!("write manifest {}", path.display()))?;
            info!("Manifest: {}", path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}

/// Run one transformation from the command line.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let (opts, settings) = setup_opts(cli);
    debug!(
        "{} CONFIG:{:#?}",
        PackagePaths::get().pkg_name().to_uppercase(),
        opts
    );
    let verbose = settings.verbose.unwrap_or(false);
    let quiet = settings.quiet.unwrap_or(false);
    if opts.simulate {
        warn!("RUNNING IN SIMULATE MODE. NOTHING WILL BE WRITTEN.");
    }

    let mut orchestrator = Orchestrator::new();
    let cancel = orchestrator.cancel_flag();
    ctrlc::set_handler(move || {
        cancel.store(true, Ordering::SeqCst);
    })
    .context("set Ctrl+C handler")?;

    let bar = verbose.then(|| {
        let b = create_counter("Transforming");
        refresh_bar(&b);
        b
    });
    if let Some(b) = &bar {
        orchestrator.set_observer(counter_observer(b));
    }

    let report = match orchestrator.run(&opts) {
        Ok(r) => r,
        Err(e) => {
            if let Some(config_err) = e.downcast_ref::<ConfigError>() {
                eprintln!("{}", usage_for(config_err));
            }
            return Err(e);
        }
    };
    if bar.is_some() {
        eprintln!();
    }

    let output_root = opts.output_dir.as_ref().map(|_| report.manifest_root.as_path());
    let manifest = cli
        .manifest_path(output_root)
        .or_else(|| settings.manifest.clone().map(Some));
    if let Some(dest) = manifest {
        write_manifest(&report, dest.as_deref())?;
    }

    if report.cancelled {
        bail!("Run cancelled by user; open outputs were closed");
    }
    if report.errors > 0 {
        bail!(
            "{} error(s) during run; last: {}",
            report.errors,
            report.last_error.as_deref().unwrap_or("unknown")
        );
    }

    if !quiet {
        let summary = format!(
            "Completed successfully.\nfiles: {}\nelapsed(ms): {}",
            report.files,
            report.elapsed.as_millis()
        );
        // Stdout carries the transformed bytes when there is no output directory.
        match opts.output_dir {
            Some(_) => println!("{summary}"),
            None => eprintln!("{summary}"),
        }
    }
    Ok(())
}
