// tests/integration_test.rs

//! Integration tests for pkgdb
//!
//! These tests verify end-to-end functionality across modules.

use pkgdb::checksum::{Checksum, DigestAlg};
use pkgdb::db::models::{Package, PackageId};
use pkgdb::db::{self, Database, DbOptions};
use pkgdb::packages::{ArchiveEntry, MemoryArchive};
use pkgdb::{Error, InstallSummary};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn open_root(root: &Path, protected: Option<&str>) -> Database {
    let mut options = DbOptions::new(root);
    options.protected_paths = protected.map(str::to_string);
    db::init(&options).unwrap();
    Database::open(options).unwrap()
}

fn add_pkg(db: &mut Database, name: &str, version: &str) -> PackageId {
    let name_id = db.get_name(name);
    let csum = Checksum::compute(DigestAlg::Sha1, format!("{name}-{version}").as_bytes());
    let mut pkg = Package::new(name_id, version, csum);
    pkg.installed_size = 1024;
    db.pkg_add(pkg)
}

fn file(path: &str, content: &str) -> ArchiveEntry {
    ArchiveEntry::file(path, content.as_bytes().to_vec(), DigestAlg::Sha1)
}

fn install(
    db: &mut Database,
    old: Option<PackageId>,
    new: PackageId,
    entries: Vec<ArchiveEntry>,
) -> InstallSummary {
    let mut archive = MemoryArchive::new(entries);
    let summary = db
        .install_package(old, Some((new, &mut archive)), &mut |_| {})
        .unwrap();
    db.update_directory_permissions();
    summary
}

#[test]
fn test_database_lifecycle() {
    let temp = tempdir().unwrap();
    let options = DbOptions::new(temp.path());

    assert!(
        matches!(Database::open(options.clone()), Err(Error::DatabaseNotFound(_))),
        "Opening before init should fail"
    );
    db::init(&options).unwrap();

    let mut db = Database::open(options.clone()).unwrap();
    let pkg = add_pkg(&mut db, "busybox", "1.36.1-r15");
    install(
        &mut db,
        None,
        pkg,
        vec![
            file("bin/busybox", "busybox binary").with_mode(0o755),
            ArchiveEntry::symlink("bin/sh", "busybox", DigestAlg::Sha1),
            ArchiveEntry::directory("etc/securetty").with_mode(0o700),
        ],
    );
    let world = db.parse_dependencies("busybox").unwrap();
    db.set_world(world);
    db.commit().unwrap();
    let stats = db.stats();
    drop(db);

    let mut reopened = Database::open(options).unwrap();
    assert_eq!(reopened.stats(), stats);
    assert_eq!(reopened.world().len(), 1);
    let pkg = reopened.find_installed("busybox").unwrap();
    assert_eq!(reopened.package_files(pkg), vec!["bin/busybox", "bin/sh"]);
    assert!(reopened.audit_package(pkg).unwrap().is_empty());
    assert!(reopened.check_refcounts().is_empty());

    // A second commit of unchanged state writes identical records
    let before = fs::read(temp.path().join(db::INSTALLED_DB_PATH)).unwrap();
    reopened.commit().unwrap();
    let after = fs::read(temp.path().join(db::INSTALLED_DB_PATH)).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_upgrade_with_protected_config_and_shared_directory() {
    let temp = tempdir().unwrap();
    let mut db = open_root(temp.path(), Some("!etc/app.conf\n"));
    let app_v1 = add_pkg(&mut db, "app", "1.0");
    let app_v2 = add_pkg(&mut db, "app", "2.0");
    let libs = add_pkg(&mut db, "libs", "1.0");

    install(
        &mut db,
        None,
        app_v1,
        vec![
            file("usr/lib/old.so", "old"),
            file("usr/lib/app.so", "app 1"),
            file("etc/app.conf", "setting=1\n"),
        ],
    );
    install(&mut db, None, libs, vec![file("usr/lib/libs.so", "libs")]);

    let summary = install(
        &mut db,
        Some(app_v1),
        app_v2,
        vec![file("usr/lib/app.so", "app 2"), file("etc/app.conf", "setting=2\n")],
    );
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.preserved, 1);

    assert!(!temp.path().join("usr/lib/old.so").exists());
    assert!(db.file_query_path("usr/lib/old.so").is_none());
    assert!(temp.path().join("usr/lib").is_dir());
    assert!(db.dir_query("usr/lib").is_some());
    assert_eq!(
        fs::read_to_string(temp.path().join("etc/app.conf")).unwrap(),
        "setting=1\n"
    );
    assert_eq!(db.get_file_owner("etc/app.conf"), Some(app_v2));
    assert!(db.check_refcounts().is_empty());
}

#[test]
fn test_changed_mode_overwrites_only_pristine_files() {
    let temp = tempdir().unwrap();
    let mut db = open_root(temp.path(), Some("+srv/*.conf\n"));
    let v1 = add_pkg(&mut db, "srv", "1");
    let v2 = add_pkg(&mut db, "srv", "2");

    install(
        &mut db,
        None,
        v1,
        vec![file("srv/a.conf", "a1"), file("srv/b.conf", "b1"), file("srv/c.txt", "c1")],
    );
    fs::write(temp.path().join("srv/a.conf"), "edited").unwrap();
    fs::write(temp.path().join("srv/c.txt"), "edited").unwrap();

    install(
        &mut db,
        Some(v1),
        v2,
        vec![file("srv/a.conf", "a2"), file("srv/b.conf", "b2"), file("srv/c.txt", "c2")],
    );
    let read = |name: &str| fs::read_to_string(temp.path().join("srv").join(name)).unwrap();
    assert_eq!(read("a.conf"), "edited");
    assert_eq!(read("a.conf.pkgnew"), "a2");
    assert_eq!(read("b.conf"), "b2");
    // Not covered by the pattern
    assert_eq!(read("c.txt"), "c2");

    // Removal keeps the edited config and drops the pristine one
    let summary = db.install_package(Some(v2), None, &mut |_| {}).unwrap();
    assert_eq!(summary.kept_modified, 1);
    assert!(temp.path().join("srv/a.conf").exists());
    assert!(!temp.path().join("srv/b.conf").exists());
    assert!(!temp.path().join("srv/c.txt").exists());
    assert!(db.installed_packages().is_empty());
}

#[test]
fn test_refcounts_stay_consistent() {
    let temp = tempdir().unwrap();
    let mut db = open_root(temp.path(), None);
    let names = ["a", "b", "c"];
    let pkgs: Vec<PackageId> = names.iter().map(|n| add_pkg(&mut db, n, "1")).collect();

    for (pkg, name) in pkgs.iter().zip(names) {
        install(
            &mut db,
            None,
            *pkg,
            vec![
                file(&format!("usr/share/{name}/data"), name),
                file(&format!("usr/share/doc/{name}/README"), name),
                ArchiveEntry::directory("var/cache/shared"),
            ],
        );
        assert!(db.check_refcounts().is_empty());
    }

    let shared = db.dir_query("var/cache/shared").unwrap();
    assert_eq!(db.directory(shared).unwrap().refs(), 3);

    for pkg in pkgs {
        db.install_package(Some(pkg), None, &mut |_| {}).unwrap();
        assert!(db.check_refcounts().is_empty());
    }
    assert_eq!(db.stats().files, 0);
    assert_eq!(db.stats().dirs, 0);
    assert_eq!(db.stats().packages, 0);
    assert!(!temp.path().join("usr/share").exists());
    assert!(!temp.path().join("var/cache").exists());
    // Created by init, so never released
    assert!(temp.path().join("etc/pkgdb").is_dir());
}

#[test]
fn test_file_conflict_between_packages() {
    let temp = tempdir().unwrap();
    let mut db = open_root(temp.path(), None);
    let a = add_pkg(&mut db, "a", "1");
    let b = add_pkg(&mut db, "b", "1");
    install(&mut db, None, a, vec![file("usr/bin/tool", "from a")]);

    let mut archive = MemoryArchive::new([file("usr/bin/tool", "from b")]);
    let err = db
        .install_package(None, Some((b, &mut archive)), &mut |_| {})
        .unwrap_err();
    match err {
        Error::FileConflict { path, owner } => {
            assert_eq!(path, "usr/bin/tool");
            assert_eq!(owner, "a-1");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        fs::read_to_string(temp.path().join("usr/bin/tool")).unwrap(),
        "from a"
    );
}

#[test]
fn test_repositories_and_index_share_packages() {
    let temp = tempdir().unwrap();
    let options = DbOptions::new(temp.path());
    db::init(&options).unwrap();
    fs::write(
        options.path(db::REPOSITORIES_PATH),
        "# main repository\nhttps://example.org/main\n@edge https://example.org/edge\n",
    )
    .unwrap();
    fs::write(
        options.path(db::INSTALLED_DB_PATH),
        "C:Q1XUFAKQgQw21jkGwXAZZ6ipO6rUs=\nP:busybox\nV:1.36.1-r15\nS:1\nI:2\n\n",
    )
    .unwrap();
    fs::write(options.path(db::WORLD_PATH), "busybox musl@edge\n").unwrap();

    let mut db = Database::open(options).unwrap();
    assert_eq!(db.repositories().len(), 3);
    assert_eq!(db.check_world(&db.world().to_vec()), 0);

    let index = "C:Q1XUFAKQgQw21jkGwXAZZ6ipO6rUs=\nP:busybox\nV:1.36.1-r15\nS:1\nI:2\n\n\
                 C:Q1pcqE0ldWqzmtjEwNuAeWaFfBuVg=\nP:musl\nV:1.2.4-r2\nS:1\nI:2\n";
    assert_eq!(db.load_index(1, index.as_bytes()).unwrap(), 2);

    let installed = db.find_installed("busybox").unwrap();
    let csum = db.package(installed).unwrap().checksum;
    assert_eq!(db.get_pkg(&csum), Some(installed));
    assert_eq!(db.select_repo(installed), Some(1));
    assert_eq!(db.installed_packages().len(), 1);
}
