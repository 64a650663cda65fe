// src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand};
use pkgdb::db::models::PackageId;
use pkgdb::db::{self, Database, DbOptions};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "pkgdb")]
#[command(author, version, about = "Inspect and verify an installed package database", long_about = None)]
struct Cli {
    /// Install root directory
    #[arg(short, long, global = true, default_value = "/")]
    root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty database layout under the root
    Init,
    /// Show installed packages matching the patterns (all when omitted)
    Info {
        /// Glob patterns on package names
        patterns: Vec<String>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List the files installed by a package
    Files {
        /// Package name
        package_name: String,
    },
    /// Show which package owns a path
    Owner {
        /// Path relative to the root (a leading '/' is accepted)
        path: String,
    },
    /// Compare installed files with their recorded checksums
    Audit {
        /// Package name (audits every package when omitted)
        package_name: Option<String>,
    },
    /// Show installed database statistics
    Stats {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show the world dependency list
    World,
    /// Verify the directory reference counts
    Check,
}

fn find_package(db: &Database, name: &str) -> Result<PackageId> {
    db.find_installed(name)
        .ok_or_else(|| anyhow::anyhow!("Package '{}' is not installed", name))
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let options = DbOptions::new(&cli.root);

    match cli.command {
        Some(Commands::Init) => {
            info!("Initializing database under: {}", cli.root.display());
            db::init(&options)?;
            println!("Database initialized successfully under: {}", cli.root.display());
            Ok(())
        }

        Some(Commands::Info { patterns, json }) => {
            let mut db = Database::open(options)?;
            let filter: Vec<&str> = patterns.iter().map(String::as_str).collect();

            let mut matched = Vec::new();
            db.name_foreach_matching(&filter, |db, _, name| {
                for provider in &db.name(name).providers {
                    let installed = db.package(provider.pkg).is_some_and(|p| p.is_installed());
                    if installed && db.package(provider.pkg).is_some_and(|p| p.name == name) {
                        matched.push(provider.pkg);
                    }
                }
            })?;

            let infos = matched
                .into_iter()
                .map(|pkg| db.package_info(pkg))
                .collect::<pkgdb::Result<Vec<_>>>()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&infos)?);
            } else if infos.is_empty() {
                println!("No packages found.");
            } else {
                for info in &infos {
                    println!("{}-{}", info.name, info.version);
                    if let Some(description) = &info.description {
                        println!("  Description: {}", description);
                    }
                    println!("  Architecture: {}", info.arch.as_deref().unwrap_or("none"));
                    println!("  Installed size: {} bytes", info.installed_size);
                    println!("  Files: {}", info.files);
                    if !info.depends.is_empty() {
                        println!("  Depends: {}", info.depends.join(" "));
                    }
                }
            }
            Ok(())
        }

        Some(Commands::Files { package_name }) => {
            let db = Database::open(options)?;
            let pkg = find_package(&db, &package_name)?;
            for path in db.package_files(pkg) {
                println!("/{}", path);
            }
            Ok(())
        }

        Some(Commands::Owner { path }) => {
            let db = Database::open(options)?;
            match db.get_file_owner(&path) {
                Some(pkg) => {
                    println!("/{} is owned by {}", path.trim_start_matches('/'), db.package_label(pkg));
                    Ok(())
                }
                None => Err(anyhow::anyhow!("No package owns '{}'", path)),
            }
        }

        Some(Commands::Audit { package_name }) => {
            let mut db = Database::open(options)?;
            let packages = match package_name {
                Some(name) => vec![find_package(&db, &name)?],
                None => db.installed_packages().to_vec(),
            };

            let mut findings = 0;
            for pkg in packages {
                for (path, status) in db.audit_package(pkg)? {
                    println!("{:<10} /{} ({})", status.as_str(), path, db.package_label(pkg));
                    findings += 1;
                }
            }
            if findings == 0 {
                println!("All files match their recorded checksums.");
            } else {
                println!("{} file(s) differ from the database.", findings);
            }
            Ok(())
        }

        Some(Commands::Stats { json }) => {
            let db = Database::open(options)?;
            let stats = db.stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Packages: {}", stats.packages);
                println!("Files: {}", stats.files);
                println!("Directories: {}", stats.dirs);
                println!("Installed size: {} bytes", stats.bytes);
            }
            Ok(())
        }

        Some(Commands::World) => {
            let db = Database::open(options)?;
            let world = db.world().to_vec();
            for dep in &world {
                println!("{}", db.format_dependency(dep));
            }
            let unknown = db.check_world(&world);
            if unknown > 0 {
                println!("{} world dependencies use unknown repository tags.", unknown);
            }
            Ok(())
        }

        Some(Commands::Check) => {
            let db = Database::open(options)?;
            let violations = db.check_refcounts();
            if violations.is_empty() {
                println!("Directory reference counts are consistent.");
                return Ok(());
            }
            for violation in &violations {
                println!(
                    "/{}: {} references, expected {}",
                    violation.path, violation.refs, violation.expected
                );
            }
            Err(anyhow::anyhow!(
                "{} directories have inconsistent reference counts",
                violations.len()
            ))
        }

        None => {
            println!("pkgdb v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'pkgdb --help' for usage information");
            Ok(())
        }
    }
}
