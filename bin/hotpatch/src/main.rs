use hotpatch::jvm::{ClassReader, Name};
use hotpatch::patch::PatchRegistry;

use clap::{crate_version, value_parser, Arg, ArgAction, Command};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::{fs, io};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use walkdir::WalkDir;

/// What happened to one class file
enum Outcome {
    Patched,
    Unchanged,
    Failed(String),
}

fn main() -> io::Result<()> {
    let matches = Command::new("JVM class hot patcher")
        .version(crate_version!())
        .about("Rewrite compiled classes to disable vulnerable code paths")
        .arg(
            Arg::new("output")
                .long("output")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Write patched classes here instead of rewriting them in place"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Report which classes would be patched without writing anything"),
        )
        .arg(
            Arg::new("list")
                .long("list")
                .action(ArgAction::SetTrue)
                .help("Print the registered patches and exit"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .help("Log every decision made while patching"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Sets the input class file or folder")
                .value_parser(value_parser!(PathBuf))
                .required_unless_present("list")
                .index(1),
        )
        .get_matches();

    let default_filter = if matches.get_flag("verbose") {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let registry = PatchRegistry::with_default_patches();
    if matches.get_flag("list") {
        for name in registry.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let dry_run = matches.get_flag("dry-run");
    let input_path: &Path = match matches.get_one::<PathBuf>("INPUT") {
        Some(input_path) => input_path,
        None => return Ok(()),
    };
    let output_path: Option<&PathBuf> = matches.get_one::<PathBuf>("output");

    // Find all of the class files
    let classes: Vec<PathBuf> = if input_path.is_file() {
        vec![input_path.to_path_buf()]
    } else {
        WalkDir::new(input_path)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|e| e.is_file() && e.extension().map_or(false, |ex| ex == "class"))
            .collect()
    };
    log::debug!("Found {} class file(s) under {:?}", classes.len(), input_path);

    let mut count_patched = 0;
    let mut count_unchanged = 0;
    let mut count_failed = 0;
    let stdout = StandardStream::stdout(ColorChoice::Auto);
    for class in classes {
        let destination = match output_path {
            None => class.clone(),
            Some(output_path) if input_path.is_file() => output_path.clone(),
            Some(output_path) => match class.strip_prefix(input_path) {
                Ok(relative) => output_path.join(relative),
                Err(_) => output_path.join(class.file_name().unwrap_or_default()),
            },
        };

        let outcome = patch_class(&registry, &class, &destination, dry_run)
            .unwrap_or_else(Outcome::Failed);
        let (color, summary) = match &outcome {
            Outcome::Patched => {
                count_patched += 1;
                (Color::Green, if dry_run { "WOULD PATCH" } else { "PATCHED" })
            }
            Outcome::Unchanged => {
                count_unchanged += 1;
                continue;
            }
            Outcome::Failed(message) => {
                count_failed += 1;
                log::error!("{}: {}", class.display(), message);
                (Color::Red, "FAILED")
            }
        };

        // Print out the class result
        let mut s = stdout.lock();
        s.write_all(b" - ")?;
        s.set_color(ColorSpec::new().set_bold(true))?;
        s.write_all(class.to_string_lossy().as_bytes())?;
        s.set_color(ColorSpec::new().set_dimmed(true))?;
        s.write_all(b" [")?;
        s.set_color(ColorSpec::new().set_fg(Some(color)))?;
        s.write_all(summary.as_bytes())?;
        s.set_color(ColorSpec::new().set_dimmed(true))?;
        s.write_all(b"]\n")?;
        s.reset()?;
    }

    // Totals
    let mut s = stdout.lock();
    for (count, label, color) in [
        (count_patched, "patched", Color::Green),
        (count_unchanged, "unchanged", Color::White),
        (count_failed, "failed", Color::Red),
    ] {
        s.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(count > 0))?;
        write!(s, "{} {}", count, label)?;
        s.reset()?;
        s.write_all(if label == "failed" { b"\n" } else { b", " })?;
    }

    // Exit code
    exit(if count_failed > 0 { 1 } else { 0 })
}

/// Run the registry over a single class file
///
/// Nothing is written unless every patch targeting the class succeeded.
fn patch_class(
    registry: &PatchRegistry,
    class: &Path,
    destination: &Path,
    dry_run: bool,
) -> Result<Outcome, String> {
    let bytes = fs::read(class).map_err(|err| format!("could not read: {}", err))?;
    let class_name = ClassReader::new(&bytes)
        .map_err(|err| err.to_string())?
        .class_name()
        .map_err(|err| err.to_string())?;

    let patched = match registry
        .transform(class_name.as_str(), &bytes)
        .map_err(|err| err.to_string())?
    {
        None => {
            log::debug!("No patch targets {}", class_name.as_str());
            return Ok(Outcome::Unchanged);
        }
        Some(patched) => patched,
    };

    if dry_run {
        return Ok(Outcome::Patched);
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|err| format!("could not create directory: {}", err))?;
    }
    fs::write(destination, patched).map_err(|err| format!("could not write: {}", err))?;
    log::info!("Wrote {:?}", destination);
    Ok(Outcome::Patched)
}
