//! Integration tests: archive formats and the incremental build pipeline.
//!
//! Everything runs inside temp directories. The bootstrap stub is a fake
//! file; the pipeline only concatenates it.

mod helpers;

use freezer::archive::code::{build_code_archive, CodeArchiveWriter};
use freezer::archive::container::build_container;
use freezer::archive::{CodeArchive, CodeArchiveOptions, CompressionPolicy, Container, ContainerOptions, ContainerWriter};
use freezer::build::pipeline::CODE_ARCHIVE_ENTRY;
use freezer::build::{self, BuildManifest, Outcome};
use freezer::config::Config;
use freezer::bincache::BinaryCache;
use freezer::error::{ArchiveError, BuildError};
use freezer::paths;
use freezer::platform::{HostRuntime, OsFamily, TargetPlatform};
use freezer::toc::{Entry, EntryKind, Toc};
use helpers::{touch_future, TestEnv};
use serial_test::serial;
use std::fs;

fn host() -> HostRuntime {
    HostRuntime::default()
}

// =============================================================================
// Code archive
// =============================================================================

fn module_payload(i: usize) -> Vec<u8> {
    format!("compiled module number {} ", i).repeat(i % 7 + 1).into_bytes()
}

fn roundtrip_modules(count: usize) {
    let env = TestEnv::new();
    let path = env.work.join(format!("code-{}.frz", count));
    let mut writer = CodeArchiveWriter::create(&path, CodeArchiveOptions::new(&host(), 9)).unwrap();
    for i in 0..count {
        writer.add(&format!("mod{}", i), &module_payload(i), i % 3 == 0).unwrap();
    }
    writer.finish().unwrap();

    let mut archive = CodeArchive::open(&path, Some(host().magic), None).unwrap();
    assert_eq!(archive.len(), count);
    for i in 0..count {
        let object = archive.extract(&format!("mod{}", i)).unwrap();
        assert_eq!(object.bytes, module_payload(i));
        assert_eq!(object.is_package, i % 3 == 0);
    }
}

#[test]
fn test_code_archive_roundtrip_empty() {
    roundtrip_modules(0);
}

#[test]
fn test_code_archive_roundtrip_single() {
    roundtrip_modules(1);
}

#[test]
fn test_code_archive_roundtrip_thousand() {
    roundtrip_modules(1000);
}

#[test]
fn test_code_archive_from_module_list() {
    let env = TestEnv::new();
    let payload = b"\xcb\x0d\x0d\x0a compiled bytes".to_vec();
    let module = env.write("m.src", &payload);
    let init = env.write("pkg/__init__.pyc", b"package init");

    let modules = Toc::from_entries(
        false,
        [
            Entry::new("m", &module, EntryKind::CompiledModule),
            Entry::new("pkg", &init, EntryKind::CompiledModule),
            Entry::new("notes", env.write("notes.txt", b"x"), EntryKind::Data),
        ],
    );
    let path = env.work.join("code.frz");
    build_code_archive(&path, &modules, &host(), CodeArchiveOptions::new(&host(), 9)).unwrap();

    let mut archive = CodeArchive::open(&path, Some(host().magic), None).unwrap();
    let m = archive.extract("m").unwrap();
    assert_eq!(m.bytes, payload);
    assert!(!m.is_package);
    assert_eq!(archive.is_package("pkg"), Some(true));
    assert!(!archive.contains("notes"));
}

#[test]
fn test_encrypted_archive_needs_the_right_key() {
    let env = TestEnv::new();
    let path = env.work.join("secret.frz");
    let options = CodeArchiveOptions::new(&host(), 6).with_key(Some("K".to_string()));
    let mut writer = CodeArchiveWriter::create(&path, options).unwrap();
    writer.add("secret", b"top secret bytecode", false).unwrap();
    writer.finish().unwrap();

    let mut right = CodeArchive::open(&path, Some(host().magic), Some("K")).unwrap();
    assert!(right.encrypted());
    assert_eq!(right.extract("secret").unwrap().bytes, b"top secret bytecode");

    let mut wrong = CodeArchive::open(&path, Some(host().magic), Some("not K")).unwrap();
    match wrong.extract("secret") {
        Err(ArchiveError::Decrypt { name, .. }) => assert_eq!(name, "secret"),
        other => panic!("expected decrypt error, got {:?}", other.map(|o| o.bytes)),
    }

    let mut keyless = CodeArchive::open(&path, Some(host().magic), None).unwrap();
    assert!(matches!(keyless.extract("secret"), Err(ArchiveError::Decrypt { .. })));
}

#[test]
fn test_encryption_without_compression() {
    let env = TestEnv::new();
    let path = env.work.join("raw-secret.frz");
    let options = CodeArchiveOptions::new(&host(), 0).with_key(Some("K".to_string()));
    let mut writer = CodeArchiveWriter::create(&path, options).unwrap();
    writer.add("m", b"plain", true).unwrap();
    writer.finish().unwrap();

    let mut archive = CodeArchive::open(&path, None, Some("K")).unwrap();
    assert_eq!(archive.level(), 0);
    assert_eq!(archive.extract("m").unwrap().bytes, b"plain");
}

// =============================================================================
// Container
// =============================================================================

#[test]
fn test_container_roundtrip_all_kinds() {
    let env = TestEnv::new();
    let script = env.write("app.py", b"print('hello')");
    let lib = env.write("libfoo.so", &[0x7f, b'E', b'L', b'F', 0, 1, 2, 3]);
    let asset = env.write("logo.png", &vec![42u8; 4096]);

    let toc = Toc::from_entries(
        false,
        [
            Entry::new("app", &script, EntryKind::Source),
            Entry::new("libfoo.so", &lib, EntryKind::Binary),
            Entry::new("assets/logo.png", &asset, EntryKind::Data),
            Entry::new("shared:libbar.so", "../other/libbar.so", EntryKind::Dependency),
            Entry::option("verbose"),
            Entry::option("unbuffered"),
        ],
    );
    let path = env.work.join("app.pkg");
    build_container(&path, &toc, ContainerOptions::new("libpython3.12.so.1.0"), None, TargetPlatform::host()).unwrap();

    let mut container = Container::open(&path).unwrap();
    assert_eq!(container.len(), 6);
    assert_eq!(container.runtime_lib(), "libpython3.12.so.1.0");
    assert_eq!(container.options(), vec!["verbose", "unbuffered"]);
    assert_eq!(container.package_start(), 0);

    assert_eq!(container.extract("app").unwrap(), b"print('hello')");
    assert_eq!(container.extract("assets/logo.png").unwrap(), vec![42u8; 4096]);
    assert_eq!(container.extract("shared:libbar.so").unwrap(), b"../other/libbar.so");
    assert!(container.extract("verbose").unwrap().is_empty());

    let logo = container.record("assets/logo.png").unwrap();
    assert!(logo.compressed);
    assert!(logo.stored_len < logo.full_len);
    assert_eq!(logo.kind, EntryKind::Data);
    assert!(!container.record("shared:libbar.so").unwrap().compressed);
}

#[test]
fn test_container_appended_to_stub() {
    let env = TestEnv::new();
    let pkg = env.work.join("app.pkg");
    let options = ContainerOptions {
        policy: CompressionPolicy::none(),
        ..ContainerOptions::new("python312.dll")
    };
    let mut writer = ContainerWriter::create(&pkg, options).unwrap();
    writer.add("main", EntryKind::Source, b"main body").unwrap();
    writer.finish().unwrap();

    let stub = b"MZ fake bootstrap stub with some length to it".to_vec();
    let exe = env.work.join("app.exe");
    let mut joined = stub.clone();
    joined.extend(fs::read(&pkg).unwrap());
    fs::write(&exe, joined).unwrap();

    let mut container = Container::open(&exe).unwrap();
    assert_eq!(container.package_start(), stub.len() as u64);
    assert_eq!(container.extract("main").unwrap(), b"main body");
    assert!(!container.records()[0].compressed);
}

#[test]
fn test_container_missing_entry_and_duplicate_names() {
    let env = TestEnv::new();
    let path = env.work.join("dup.pkg");
    let mut writer = ContainerWriter::create(&path, ContainerOptions::new("lib")).unwrap();
    assert!(writer.add("x", EntryKind::Data, b"first").unwrap());
    assert!(!writer.add("x", EntryKind::Data, b"second").unwrap());
    writer.finish().unwrap();

    let mut container = Container::open(&path).unwrap();
    assert_eq!(container.extract("x").unwrap(), b"first");
    assert!(matches!(container.extract("y"), Err(ArchiveError::MissingEntry { .. })));
}

#[test]
fn test_truncated_container_is_rejected() {
    let env = TestEnv::new();
    let path = env.work.join("cut.pkg");
    let mut writer = ContainerWriter::create(&path, ContainerOptions::new("lib")).unwrap();
    writer.add("x", EntryKind::Data, &vec![7u8; 1000]).unwrap();
    writer.finish().unwrap();

    // Dropping leading bytes leaves a trailer that points past the file start.
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[50..]).unwrap();
    assert!(matches!(Container::open(&path), Err(ArchiveError::Corrupt { .. })));
}

// =============================================================================
// Build pipeline
// =============================================================================

fn write_project(env: &TestEnv, mode: &str) -> BuildManifest {
    env.write("app.py", b"import util");
    env.write("util.pyc", b"util bytecode");
    env.write("pkg/__init__.pyc", b"pkg bytecode");
    env.write("data.txt", b"some data");
    env.write("stub", b"#!fake-stub\n");

    let manifest = env.manifest(&format!(
        r#"{{
            "name": "app",
            "scripts": [{{"name": "app", "path": "src/app.py"}}],
            "modules": [
                {{"name": "util", "path": "src/util.pyc"}},
                {{"name": "pkg", "path": "src/pkg/__init__.pyc"}}
            ],
            "datas": [{{"name": "assets/data.txt", "path": "src/data.txt"}}],
            "stub": "src/stub",
            "options": ["unbuffered"],
            "key": "K",
            "mode": "{}"
        }}"#,
        mode
    ));
    BuildManifest::load(&manifest).unwrap()
}

#[test]
fn test_onefile_build_and_incremental_rebuild() {
    let env = TestEnv::new();
    let manifest = write_project(&env, "onefile");
    let platform = TargetPlatform::host();

    let first = build::build(&manifest, env.config()).unwrap();
    assert_eq!(first.built(), 4);
    let exe = env.dist.join(platform.executable_name("app"));
    assert_eq!(first.artifact, exe);

    // The executable is the stub followed by a readable container.
    let bytes = fs::read(&exe).unwrap();
    assert!(bytes.starts_with(b"#!fake-stub\n"));
    let mut container = Container::open(&exe).unwrap();
    assert_eq!(container.package_start(), b"#!fake-stub\n".len() as u64);
    assert_eq!(container.options(), vec!["unbuffered"]);
    assert_eq!(container.extract("assets/data.txt").unwrap(), b"some data");

    let code_path = env.work.join("app/code.frz");
    fs::write(&code_path, container.extract(CODE_ARCHIVE_ENTRY).unwrap()).unwrap();
    let mut code = CodeArchive::open(&code_path, Some(HostRuntime::default().magic), Some("K")).unwrap();
    assert_eq!(code.extract("util").unwrap().bytes, b"util bytecode");
    assert!(code.extract("pkg").unwrap().is_package);

    // Nothing changed: every step is reused.
    let second = build::build(&manifest, env.config()).unwrap();
    assert_eq!(second.built(), 0);
    assert!(second.steps.iter().all(|(_, o)| *o == Outcome::Reused));

    // A data file newer than the last build invalidates what packages it.
    touch_future(&env.src.join("data.txt"));
    let third = build::build(&manifest, env.config()).unwrap();
    assert!(third.outcome("Analysis").unwrap().was_built());
    assert_eq!(third.outcome("CodeArchive"), Some(&Outcome::Reused));
    assert!(third.outcome("Container").unwrap().was_built());
    assert!(third.outcome("Executable").unwrap().was_built());
}

#[test]
fn test_changed_setting_rebuilds_step() {
    let env = TestEnv::new();
    let mut manifest = write_project(&env, "onefile");
    build::build(&manifest, env.config()).unwrap();

    manifest.code_level = 1;
    let report = build::build(&manifest, env.config()).unwrap();
    assert_eq!(report.outcome("Analysis"), Some(&Outcome::Reused));
    assert_eq!(
        report.outcome("CodeArchive"),
        Some(&Outcome::Built("level changed".to_string()))
    );
}

#[test]
fn test_deleted_output_is_rebuilt() {
    let env = TestEnv::new();
    let manifest = write_project(&env, "onefile");
    let first = build::build(&manifest, env.config()).unwrap();

    fs::remove_file(&first.artifact).unwrap();
    let second = build::build(&manifest, env.config()).unwrap();
    assert!(second.outcome("Executable").unwrap().was_built());
    assert_eq!(second.outcome("Container"), Some(&Outcome::Reused));
    assert!(first.artifact.exists());
}

#[test]
fn test_onedir_build_collects_files() {
    let env = TestEnv::new();
    let manifest = write_project(&env, "onedir");
    let platform = TargetPlatform::host();

    let report = build::build(&manifest, env.config()).unwrap();
    let dest = env.dist.join("app");
    assert_eq!(report.artifact, dest);
    assert!(report.outcome("Collect").unwrap().was_built());
    assert!(dest.join(platform.executable_name("app")).is_file());
    assert_eq!(fs::read(dest.join("assets/data.txt")).unwrap(), b"some data");

    // Loose files stay out of the container in one-folder mode.
    let container = Container::open(&dest.join(platform.executable_name("app"))).unwrap();
    assert!(container.record("assets/data.txt").is_none());
    assert!(container.record("app").is_some());
}

#[test]
fn test_bundle_layout() {
    let env = TestEnv::new();
    let mut manifest = write_project(&env, "onedir");
    manifest.bundle = true;
    manifest.identifier = Some("org.example.<app>".to_string());
    manifest.platform = Some(TargetPlatform::new(OsFamily::Darwin, 64));

    let report = build::build(&manifest, env.config()).unwrap();
    let app = env.dist.join("app.app");
    assert_eq!(report.artifact, app);
    assert!(app.join("Contents/MacOS/app").is_file());
    assert!(app.join("Contents/MacOS/assets/data.txt").is_file());
    assert!(app.join("Contents/Resources").is_dir());

    let plist = fs::read_to_string(app.join("Contents/Info.plist")).unwrap();
    assert!(plist.contains("<string>org.example.&lt;app&gt;</string>"));
    assert!(plist.contains("<key>CFBundleExecutable</key>\n  <string>app</string>"));
}

fn write_native_project(env: &TestEnv, mode: &str) -> BuildManifest {
    env.write("app.py", b"import native");
    env.write("libfoo.so", b"not really a shared library");
    env.write("stub", b"#!fake-stub\n");
    let manifest = env.manifest(&format!(
        r#"{{
            "name": "app",
            "scripts": [{{"name": "app", "path": "src/app.py"}}],
            "binaries": [{{"name": "libfoo.so", "path": "src/libfoo.so"}}],
            "stub": "src/stub",
            "mode": "{}"
        }}"#,
        mode
    ));
    BuildManifest::load(&manifest).unwrap()
}

fn stripping_cache_dir(env: &TestEnv, config: &Config) -> std::path::PathBuf {
    BinaryCache::open(&env.cache, &config.host.version, TargetPlatform::host(), true, false)
        .unwrap()
        .dir()
        .to_path_buf()
}

#[test]
fn test_stripped_binaries_come_from_the_cache() {
    let env = TestEnv::new();
    let manifest = write_native_project(&env, "onefile");
    let config = env.config_with(&[("FREEZER_STRIP", "1")]);
    let cache_dir = stripping_cache_dir(&env, &config);

    let first = build::build(&manifest, config.clone()).unwrap();
    let cached = cache_dir.join("libfoo.so");
    assert!(cached.is_file());
    assert!(cache_dir.join("index.json").is_file());
    let mut container = Container::open(&first.artifact).unwrap();
    assert_eq!(container.extract("libfoo.so").unwrap(), fs::read(&cached).unwrap());

    // Same content, newer mtime: the container is rebuilt but the cached
    // copy is reused rather than copied and stripped again.
    fs::write(&cached, b"cached copy").unwrap();
    touch_future(&env.src.join("libfoo.so"));
    let second = build::build(&manifest, config).unwrap();
    assert!(second.outcome("Container").unwrap().was_built());
    let mut container = Container::open(&second.artifact).unwrap();
    assert_eq!(container.extract("libfoo.so").unwrap(), b"cached copy");
}

#[test]
fn test_collect_copies_binaries_through_the_cache() {
    let env = TestEnv::new();
    let manifest = write_native_project(&env, "onedir");
    let config = env.config_with(&[("FREEZER_STRIP", "1")]);
    let cache_dir = stripping_cache_dir(&env, &config);

    let report = build::build(&manifest, config).unwrap();
    assert!(report.outcome("Collect").unwrap().was_built());
    assert_eq!(
        fs::read(report.artifact.join("libfoo.so")).unwrap(),
        fs::read(cache_dir.join("libfoo.so")).unwrap()
    );
}

#[test]
fn test_clean_guard_refuses_project_directory() {
    let env = TestEnv::new();
    let config = env.config_with(&[("FREEZER_DISTPATH", ".")]);
    let err = paths::check_removable(&config.distpath, &[&env.base_dir], false).unwrap_err();
    assert!(matches!(err, BuildError::OutputConflict { .. }));
    assert!(paths::check_removable(&config.workpath, &[&env.base_dir], false).is_ok());
}

#[test]
fn test_missing_stub_fails_with_step_context() {
    let env = TestEnv::new();
    let manifest = write_project(&env, "onefile");
    fs::remove_file(env.src.join("stub")).unwrap();

    let err = build::build(&manifest, env.config()).unwrap_err();
    assert!(format!("{:#}", err).contains("Executable"));
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
#[serial]
fn test_environment_overrides_dotenv() {
    let env = TestEnv::new();
    fs::write(env.base_dir.join(".env"), "FREEZER_STRIP=0\nFREEZER_KEY=from-file\n").unwrap();

    std::env::set_var("FREEZER_STRIP", "1");
    let config = Config::load(&env.base_dir);
    std::env::remove_var("FREEZER_STRIP");

    assert!(config.strip);
    if std::env::var_os("FREEZER_KEY").is_none() {
        assert_eq!(config.key.as_deref(), Some("from-file"));
    }
}

#[test]
fn test_config_extra_patterns_reach_policy() {
    let env = TestEnv::new();
    let config = env.config_with(&[("FREEZER_EXCLUDE", "^libfoo"), ("FREEZER_STRICT", "true")]);
    assert_eq!(config.excludes, vec!["^libfoo"]);
    assert!(config.strict);

    let broken = env.config_with(&[("FREEZER_EXCLUDE", "(")]);
    let manifest = write_project(&env, "onefile");
    let err = build::build(&manifest, broken).unwrap_err();
    assert!(format!("{:#}", err).contains("pattern"));
}
