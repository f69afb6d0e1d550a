use anyhow::{bail, Context};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};

use firmware::FirmwareImage;
use mpflash::{Config, PyLoad, Session};
use storage::{classify_source, Classification};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_count("verbose"));

    match matches.subcommand() {
        Some(("pack", sub)) => pack(sub).await,
        Some(("unpack", sub)) => unpack(sub).await,
        Some(("ls", sub)) => list(sub).await,
        Some(("classify", sub)) => classify(sub).await,
        Some(("append", sub)) => append(sub).await,
        _ => bail!("no command given, see --help"),
    }
}

fn cli() -> Command {
    let config_arg = Arg::new("config")
        .long("config")
        .short('c')
        .help("JSON configuration file with the flash layout")
        .value_parser(clap::value_parser!(PathBuf));

    Command::new("mpflash")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Pack MicroPython scripts and files into micro:bit firmware images")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Increase log output (-v info, -vv debug)")
                .action(ArgAction::Count)
                .global(true),
        )
        .subcommand(
            Command::new("pack")
                .about("Build a firmware image with a filesystem")
                .arg(firmware_arg())
                .arg(
                    Arg::new("main")
                        .long("main")
                        .short('m')
                        .help("Script to store as main.py (or a module, if it carries the marker)")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(output_arg())
                .arg(config_arg.clone())
                .arg(
                    Arg::new("files")
                        .help("Extra files to add to the filesystem")
                        .num_args(0..)
                        .action(ArgAction::Append)
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("unpack")
                .about("Extract the files stored in a firmware image")
                .arg(image_arg())
                .arg(
                    Arg::new("dir")
                        .long("dir")
                        .short('d')
                        .help("Directory to write the files to")
                        .default_value(".")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(config_arg.clone()),
        )
        .subcommand(
            Command::new("ls")
                .about("List the files stored in a firmware image")
                .arg(image_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print the listing as JSON")
                        .action(ArgAction::SetTrue),
                )
                .arg(config_arg.clone()),
        )
        .subcommand(
            Command::new("classify")
                .about("Report whether scripts are modules or entry scripts")
                .arg(
                    Arg::new("scripts")
                        .required(true)
                        .num_args(1..)
                        .action(ArgAction::Append)
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("append")
                .about("Build a legacy image with the script appended after the firmware")
                .arg(firmware_arg())
                .arg(
                    Arg::new("script")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(output_arg())
                .arg(config_arg),
        )
}

fn firmware_arg() -> Arg {
    Arg::new("firmware")
        .long("firmware")
        .short('f')
        .help("MicroPython firmware in Intel HEX format")
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
}

fn image_arg() -> Arg {
    Arg::new("image")
        .help("Firmware image in Intel HEX format")
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
}

fn output_arg() -> Arg {
    Arg::new("output")
        .long("output")
        .short('o')
        .help("Where to write the generated image")
        .default_value("micropython.hex")
        .value_parser(clap::value_parser!(PathBuf))
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<Config> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no usable file name", path.display()))
}

async fn read_text(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

async fn pack(matches: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(matches)?;
    let firmware_path = matches
        .get_one::<PathBuf>("firmware")
        .context("--firmware is required")?;
    let firmware_hex = read_text(firmware_path).await?;
    let mut session = Session::new(config, &firmware_hex)?;

    if let Some(files) = matches.get_many::<PathBuf>("files") {
        for path in files {
            let name = file_name(path)?;
            let content = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if session.exists(&name) {
                warn!("Replacing {} already in the filesystem", name);
            }
            session
                .load_file(&name, &content)
                .with_context(|| format!("Could not add {}", name))?;
        }
    }

    if let Some(path) = matches.get_one::<PathBuf>("main") {
        let code = read_text(path).await?;
        let outcome = session.load_py(&file_name(path)?, &code)?;
        match outcome {
            PyLoad::ModuleAdded(name) => info!("Added module {}", name),
            PyLoad::ModuleReplaced(name) => info!("Replaced module {}", name),
            PyLoad::EntryScriptReplaced => info!("Using {} as main.py", path.display()),
        }
    }

    let editor_code = session.main_script().unwrap_or_default();
    let image = session.generate_hex(&editor_code)?;

    let output = matches
        .get_one::<PathBuf>("output")
        .context("--output has a default")?;
    tokio::fs::write(output, &image)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    let usage = session.usage();
    info!(
        "Wrote {} ({} firmware records, sha256 {})",
        output.display(),
        session.firmware().prefix_lines().len(),
        firmware::fingerprint(&image)
    );
    println!(
        "{}: {} files, {} of {} bytes used",
        output.display(),
        session.store().len(),
        usage.total - usage.free,
        usage.total
    );
    if usage.almost_full {
        warn!(
            "The filesystem is more than {:.0}% full",
            session.config().almost_full_ratio * 100.0
        );
    }
    Ok(())
}

async fn unpack(matches: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(matches)?;
    let image_path = matches.get_one::<PathBuf>("image").context("image is required")?;
    let dir = matches.get_one::<PathBuf>("dir").context("--dir has a default")?;

    let text = read_text(image_path).await?;
    let decoded = firmware::decode(&text, &config.layout)?;
    for warning in &decoded.warnings {
        warn!("{}", warning);
    }

    tokio::fs::create_dir_all(dir).await?;
    for name in decoded.store.ls() {
        if Path::new(&name).file_name().and_then(|n| n.to_str()) != Some(name.as_str()) {
            warn!("Skipping file with unsafe name {:?}", name);
            continue;
        }
        let content = decoded.store.read(&name)?;
        let target = dir.join(&name);
        tokio::fs::write(&target, &content)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
        println!("{}", target.display());
    }
    Ok(())
}

async fn list(matches: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(matches)?;
    let image_path = matches.get_one::<PathBuf>("image").context("image is required")?;

    let text = read_text(image_path).await?;
    let decoded = firmware::decode(&text, &config.layout)?;
    let store = &decoded.store;

    if matches.get_flag("json") {
        let files = store
            .ls()
            .iter()
            .map(|name| store.entry(name).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        let listing = serde_json::json!({
            "files": files,
            "stats": store.stats(),
            "warnings": decoded.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    for warning in &decoded.warnings {
        warn!("{}", warning);
    }
    for name in store.ls() {
        println!(
            "{:<24} {:>8} bytes {:>4} chunks",
            name,
            store.size(&name)?,
            store.entry(&name)?.chunk_chain.len()
        );
    }
    let stats = store.stats();
    println!(
        "{} files, {} of {} chunks used, {} bytes free",
        stats.total_files, stats.used_chunks, stats.total_chunks, stats.remaining_capacity
    );
    Ok(())
}

async fn classify(matches: &ArgMatches) -> anyhow::Result<()> {
    let Some(scripts) = matches.get_many::<PathBuf>("scripts") else {
        bail!("no scripts given");
    };

    for path in scripts {
        let code = read_text(path).await?;
        let name = file_name(path)?;
        match classify_source(&name, &code) {
            Classification::Module(module) => println!("{}: module {}", path.display(), module),
            Classification::EntryScript => println!("{}: entry script", path.display()),
        }
    }
    Ok(())
}

async fn append(matches: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(matches)?;
    let firmware_path = matches
        .get_one::<PathBuf>("firmware")
        .context("--firmware is required")?;
    let script_path = matches.get_one::<PathBuf>("script").context("script is required")?;
    let output = matches
        .get_one::<PathBuf>("output")
        .context("--output has a default")?;

    let firmware_hex = read_text(firmware_path).await?;
    let image = FirmwareImage::new(&firmware_hex, config.layout)?;
    let script = tokio::fs::read(script_path).await?;

    let hex = firmware::append_script(&image, &script)?;
    tokio::fs::write(output, &hex)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("{}: legacy image with {} byte script", output.display(), script.len());
    Ok(())
}
