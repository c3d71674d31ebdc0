//! Local repository integration tests
//!
//! Hooks are small shell scripts that append a line to a shared log so the
//! order in which they fire can be checked.

use flate2::write::GzEncoder;
use flate2::Compression;
use ftl_core::revision::content_hash_prefix;
use ftl_core::{FtlError, Hook, LocalRepository, RevisionInfo};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn revision_for(package: &str, timestamp: &str, content: &[u8]) -> RevisionInfo {
    let prefix = content_hash_prefix(&mut Cursor::new(content)).unwrap();
    RevisionInfo::new(package, format!("{}{}", timestamp, prefix))
}

fn write_executable(path: &Path, script: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// Create an installed revision whose hooks log `<hook> <revision>` lines.
fn install(repo: &LocalRepository, rev: &RevisionInfo, log: &Path) -> PathBuf {
    let dir = repo.revision_dir(rev).unwrap();
    fs::create_dir_all(&dir).unwrap();
    for hook in [Hook::PreJump, Hook::PostJump, Hook::UnJump] {
        write_executable(
            &dir.join("ftl").join(hook.as_str()),
            &format!(
                "#!/bin/sh\necho \"{} {}\" >> \"{}\"\n",
                hook,
                rev.revision,
                log.display()
            ),
        );
    }
    dir
}

fn read_log(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

struct Fixture {
    _tmp: TempDir,
    repo: LocalRepository,
    log: PathBuf,
    a: RevisionInfo,
    b: RevisionInfo,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let repo = LocalRepository::new(tmp.path().join("root"));
    let log = tmp.path().join("hooks.log");
    repo.check_package("web").unwrap();

    let a = revision_for("web", "2024030700001", b"first");
    let b = revision_for("web", "2024030700002", b"second");
    install(&repo, &a, &log);
    install(&repo, &b, &log);

    Fixture {
        _tmp: tmp,
        repo,
        log,
        a,
        b,
    }
}

#[test]
fn test_jump_sets_pointers_and_runs_hooks() {
    let f = fixture();

    f.repo.jump(&f.a).unwrap();
    assert_eq!(f.repo.get_current_revision("web").unwrap(), Some(f.a.clone()));
    assert_eq!(f.repo.get_previous_revision("web").unwrap(), None);

    f.repo.jump(&f.b).unwrap();
    assert_eq!(f.repo.get_current_revision("web").unwrap(), Some(f.b.clone()));
    assert_eq!(f.repo.get_previous_revision("web").unwrap(), Some(f.a.clone()));

    let link = fs::read_link(f.repo.root().join("web/current")).unwrap();
    assert_eq!(link, Path::new("revs").join(&f.b.revision));

    assert_eq!(
        read_log(&f.log),
        vec![
            format!("pre-jump {}", f.a.revision),
            format!("post-jump {}", f.a.revision),
            format!("pre-jump {}", f.b.revision),
            format!("un-jump {}", f.a.revision),
            format!("post-jump {}", f.b.revision),
        ]
    );
}

#[test]
fn test_jump_to_current_is_noop() {
    let f = fixture();
    f.repo.jump(&f.a).unwrap();
    let before = read_log(&f.log);

    f.repo.jump(&f.a).unwrap();
    assert_eq!(read_log(&f.log), before);
    assert_eq!(f.repo.get_previous_revision("web").unwrap(), None);
}

#[test]
fn test_jump_to_missing_revision() {
    let f = fixture();
    let missing = RevisionInfo::new("web", "2024030700099zz");
    assert!(matches!(f.repo.jump(&missing), Err(FtlError::NotFound(_))));
    assert!(read_log(&f.log).is_empty());
}

#[test]
fn test_failing_pre_jump_aborts() {
    let f = fixture();
    f.repo.jump(&f.a).unwrap();

    let dir = f.repo.revision_dir(&f.b).unwrap();
    write_executable(&dir.join("ftl/pre-jump"), "#!/bin/sh\nexit 7\n");

    match f.repo.jump(&f.b) {
        Err(FtlError::PackageScript(e)) => {
            assert_eq!(e.exit_status, 7);
            assert_eq!(e.hook_name, "pre-jump");
        }
        other => panic!("expected package script error, got {:?}", other),
    }
    assert_eq!(f.repo.get_current_revision("web").unwrap(), Some(f.a.clone()));
}

#[test]
fn test_jump_back_swaps_pointers() {
    let f = fixture();
    f.repo.jump(&f.a).unwrap();
    f.repo.jump(&f.b).unwrap();
    fs::remove_file(&f.log).unwrap();

    f.repo.jump_back("web").unwrap();
    assert_eq!(f.repo.get_current_revision("web").unwrap(), Some(f.a.clone()));
    assert_eq!(f.repo.get_previous_revision("web").unwrap(), Some(f.b.clone()));
    assert_eq!(
        read_log(&f.log),
        vec![
            format!("pre-jump {}", f.a.revision),
            format!("un-jump {}", f.b.revision),
            format!("post-jump {}", f.a.revision),
        ]
    );
}

#[test]
fn test_jump_back_needs_both_pointers() {
    let f = fixture();
    assert!(matches!(f.repo.jump_back("web"), Err(FtlError::NotFound(_))));
    f.repo.jump(&f.a).unwrap();
    assert!(matches!(f.repo.jump_back("web"), Err(FtlError::NotFound(_))));
}

#[test]
fn test_remove_protects_current() {
    let f = fixture();
    f.repo.jump(&f.b).unwrap();

    assert!(matches!(
        f.repo.remove(&f.b),
        Err(FtlError::ActiveRevisionProtected(_))
    ));
    f.repo.remove(&f.a).unwrap();
    assert_eq!(f.repo.list_revisions("web").unwrap(), vec![f.b.clone()]);
    assert!(matches!(f.repo.remove(&f.a), Err(FtlError::NotFound(_))));
}

#[test]
fn test_listing() {
    let f = fixture();
    f.repo.check_package("api").unwrap();
    assert_eq!(f.repo.list_packages().unwrap(), vec!["api", "web"]);
    assert_eq!(
        f.repo.list_revisions("web").unwrap(),
        vec![f.a.clone(), f.b.clone()]
    );
    // Pointer links are not revisions
    f.repo.jump(&f.a).unwrap();
    assert_eq!(f.repo.list_revisions("web").unwrap().len(), 2);
    assert!(f.repo.list_revisions("api").unwrap().is_empty());
}

#[test]
fn test_check_package_rejects_file() {
    let tmp = TempDir::new().unwrap();
    let repo = LocalRepository::new(tmp.path());
    fs::write(tmp.path().join("web"), b"not a directory").unwrap();
    assert!(matches!(repo.check_package("web"), Err(FtlError::Conflict(_))));

    repo.check_package("api").unwrap();
    assert!(tmp.path().join("api/revs").is_dir());
    // Idempotent
    repo.check_package("api").unwrap();
}

#[test]
fn test_add_extracts_and_runs_post_spool() {
    let tmp = TempDir::new().unwrap();
    let repo = LocalRepository::new(tmp.path());
    repo.check_package("web").unwrap();

    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in [
        ("index.html", b"<h1>hi</h1>".as_slice()),
        ("ftl/post-spool", b"#!/bin/sh\ntouch spooled\n".as_slice()),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
    }
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&builder.into_inner().unwrap()).unwrap();
    let artifact = gz.finish().unwrap();

    let rev = revision_for("web", "2024030700001", &artifact);
    let file_name = format!("{}.tar.gz", rev.name());
    repo.add(&rev, &file_name, &mut artifact.as_slice()).unwrap();

    let dir = repo.revision_dir(&rev).unwrap();
    assert!(dir.join("index.html").is_file());
    assert!(dir.join("spooled").is_file());
    assert!(!dir.join(&file_name).exists());
    assert_eq!(repo.list_revisions("web").unwrap(), vec![rev]);
}

#[test]
fn test_add_checksum_mismatch_skips_post_spool() {
    let tmp = TempDir::new().unwrap();
    let repo = LocalRepository::new(tmp.path());
    repo.check_package("web").unwrap();

    let rev = revision_for("web", "2024030700001", b"what was spooled");
    let dir = repo.revision_dir(&rev).unwrap();
    write_executable(&dir.join("ftl/post-spool"), "#!/bin/sh\ntouch spooled\n");

    let res = repo.add(&rev, "web.bin", &mut b"something else".as_slice());
    assert!(matches!(res, Err(FtlError::ChecksumMismatch { .. })));
    assert!(!dir.join("spooled").exists());
}
