use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Context, Error};

use clap::{command, Parser, Subcommand};

use rayon::prelude::*;

use tracing_subscriber::EnvFilter;

use xcontent::account::{Account, AccountKey};
use xcontent::gpd::Gpd;
use xcontent::stfs::Package;
use xcontent::xex::XexInfo;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(color = clap::ColorChoice::Never)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Number of worker threads to use
    #[arg(long, short = 'j', global = true)]
    num_threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// STFS packages (CON, LIVE, PIRS)
    #[command(subcommand)]
    Stfs(StfsCommand),

    /// XEX executables
    #[command(subcommand)]
    Xex(XexCommand),

    /// Encrypted profile account files
    #[command(subcommand)]
    Account(AccountCommand),

    /// GPD achievement and settings databases
    #[command(subcommand)]
    Gpd(GpdCommand),
}

#[derive(Subcommand)]
enum StfsCommand {
    /// Print the package header
    Info { file: PathBuf },

    /// List every file in the package
    List { file: PathBuf },

    /// Install packages into a content folder
    Extract {
        /// Content folder to install into
        dest_dir: PathBuf,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
enum XexCommand {
    /// Print the header and execution info
    Info { file: PathBuf },
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Decrypt and print an account file
    Show { file: PathBuf },

    /// Create a new offline account file
    Create {
        out: PathBuf,

        #[arg(long)]
        gamertag: String,

        /// Sign with the devkit key instead of the retail one
        #[arg(long)]
        devkit: bool,
    },
}

#[derive(Subcommand)]
enum GpdCommand {
    /// Print the entry table summary and achievements
    Info { file: PathBuf },

    /// Mark an achievement as earned now
    Unlock {
        file: PathBuf,
        #[arg(value_parser = parse_id)]
        id: u32,
    },

    /// Clear an achievement's earned state
    Lock {
        file: PathBuf,
        #[arg(value_parser = parse_id)]
        id: u32,
    },
}

fn main() -> Result<(), Error> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    rayon::ThreadPoolBuilder::new()
        .num_threads(args.num_threads.unwrap_or(0))
        .build_global()?;

    match args.command {
        Command::Stfs(cmd) => run_stfs(cmd),
        Command::Xex(XexCommand::Info { file }) => xex_info(&file),
        Command::Account(cmd) => run_account(cmd),
        Command::Gpd(cmd) => run_gpd(cmd),
    }
}

fn parse_id(s: &str) -> Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

fn run_stfs(cmd: StfsCommand) -> Result<(), Error> {
    match cmd {
        StfsCommand::Info { file } => {
            let package = Package::open(&file).context("error reading STFS package")?;
            let m = &package.metadata;

            println!("       Kind: {:?}", package.kind());
            println!("   Title ID: {}", m.title_id_hex());
            println!("    Content: {} ({})", m.content_type_hex(), describe(m.content_type()));
            println!("       Name: {}", m.display_name);
            println!("      Title: {}", m.title_name);
            println!("  Publisher: {}", m.publisher_name);
            println!("   Media ID: {:08X}", m.media_id);
            println!("    Version: {}", m.version);
            println!("    Entries: {}", package.entries.len());
        }

        StfsCommand::List { file } => {
            let package = Package::open(&file).context("error reading STFS package")?;
            for (entry, path) in package.entries.iter().zip(package.entry_paths()) {
                if entry.is_directory() {
                    println!("{path}/");
                } else {
                    println!("{path}  {} bytes", entry.file_size);
                }
            }
        }

        StfsCommand::Extract { dest_dir, files } => {
            let total = files.len();
            let done = AtomicUsize::new(0);

            files.par_iter().try_for_each(|file| {
                let package = Package::open(file)
                    .with_context(|| format!("error reading {}", file.display()))?;
                let written = package
                    .extract_all(&dest_dir)
                    .with_context(|| format!("error installing {}", file.display()))?;

                let cur = 1 + done.fetch_add(1, Ordering::Relaxed);
                println!("[{cur}/{total}] {}: {written} files", package.install_name());
                Ok::<_, Error>(())
            })?;
        }
    }

    Ok(())
}

fn describe<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "unknown".to_owned(), |v| v.to_string())
}

fn xex_info(file: &Path) -> Result<(), Error> {
    let info = XexInfo::open(file);
    if !info.is_valid {
        bail!(
            "invalid XEX: {}",
            info.validation_error.as_deref().unwrap_or("unknown error")
        );
    }

    println!("   Title ID: {}", info.title_id_hex());
    println!("   Media ID: {}", info.media_id_hex());
    println!("    Version: {}", info.version);
    println!("       Disc: {}/{}", info.disc_number, info.disc_count);
    if let Some(flags) = info.module_flags() {
        println!("      Flags: {flags:?}");
    }
    println!("    Headers: {}", info.directory.len());

    Ok(())
}

fn run_account(cmd: AccountCommand) -> Result<(), Error> {
    match cmd {
        AccountCommand::Show { file } => {
            let (account, key) = Account::load_file(&file).context("error reading account file")?;
            let r = &account.record;

            println!("   Gamertag: {}", r.gamertag);
            println!("       XUID: {}", r.xuid);
            println!("        Key: {key:?}");
            println!("       Live: {}", r.is_live_enabled());
            println!("   Passcode: {}", r.is_passcode_enabled());
            println!("     Domain: {}", r.online_domain);
            println!("      Realm: {}", r.kerberos_realm);
        }

        AccountCommand::Create {
            out,
            gamertag,
            devkit,
        } => {
            let key = if devkit {
                AccountKey::Devkit
            } else {
                AccountKey::Retail
            };
            let account = Account::create(&gamertag);
            account
                .save_file(&out, key)
                .context("error writing account file")?;
            println!("created '{gamertag}' with XUID {}", account.record.xuid);
        }
    }

    Ok(())
}

fn run_gpd(cmd: GpdCommand) -> Result<(), Error> {
    match cmd {
        GpdCommand::Info { file } => {
            let gpd = Gpd::open(&file).context("error reading GPD file")?;

            println!("     Endian: {:?}", gpd.endian());
            println!("    Entries: {}", gpd.entries().len());
            println!("       Free: {}", gpd.free_space().len());
            println!(
                "Achievements: {}/{} ({}/{} G)",
                gpd.unlocked_count(),
                gpd.achievement_count(),
                gpd.total_gamerscore(),
                gpd.possible_gamerscore()
            );

            for a in gpd.achievements() {
                let mark = if a.is_earned() { 'x' } else { ' ' };
                println!("  [{mark}] {:08X} {:>4}G {}", a.id, a.gamerscore, a.name);
            }
            for t in gpd.titles() {
                println!(
                    "  {:08X} {} ({}/{} G)",
                    t.id, t.name, t.gamerscore_unlocked, t.gamerscore_total
                );
            }

            let invalid = gpd.invalid_entries();
            if !invalid.is_empty() {
                println!("    Invalid: {}", invalid.len());
            }
        }

        GpdCommand::Unlock { file, id } => {
            let mut gpd = Gpd::open(&file).context("error reading GPD file")?;
            if !gpd.unlock_achievement(id, None) {
                bail!("cannot unlock achievement {id:08X}");
            }
            gpd.save_file(&file).context("error writing GPD file")?;
        }

        GpdCommand::Lock { file, id } => {
            let mut gpd = Gpd::open(&file).context("error reading GPD file")?;
            if !gpd.lock_achievement(id) {
                bail!("cannot lock achievement {id:08X}");
            }
            gpd.save_file(&file).context("error writing GPD file")?;
        }
    }

    Ok(())
}
