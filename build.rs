// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("pkgdb")
        .version(env!("CARGO_PKG_VERSION"))
        .author("pkgdb Contributors")
        .about("Inspect and verify an installed package database")
        .subcommand_required(false)
        .arg(
            Arg::new("root")
                .short('r')
                .long("root")
                .value_name("DIR")
                .default_value("/")
                .global(true)
                .help("Install root directory"),
        )
        .subcommand(Command::new("init").about("Create an empty database layout under the root"))
        .subcommand(
            Command::new("info")
                .about("Show installed packages matching the patterns (all when omitted)")
                .arg(
                    Arg::new("patterns")
                        .num_args(0..)
                        .help("Glob patterns on package names"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print JSON instead of text"),
                ),
        )
        .subcommand(
            Command::new("files")
                .about("List the files installed by a package")
                .arg(Arg::new("package_name").required(true).help("Package name")),
        )
        .subcommand(
            Command::new("owner")
                .about("Show which package owns a path")
                .arg(Arg::new("path").required(true).help("Path relative to the root")),
        )
        .subcommand(
            Command::new("audit")
                .about("Compare installed files with their recorded checksums")
                .arg(Arg::new("package_name").help("Package name (audits every package when omitted)")),
        )
        .subcommand(
            Command::new("stats")
                .about("Show installed database statistics")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print JSON instead of text"),
                ),
        )
        .subcommand(Command::new("world").about("Show the world dependency list"))
        .subcommand(Command::new("check").about("Verify the directory reference counts"))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("pkgdb.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
