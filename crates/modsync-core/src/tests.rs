use std::cmp::Ordering as CmpOrdering;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::*;

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_root() -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let counter = TEST_ROOT_COUNTER.fetch_add(1, Ordering::SeqCst);
    path.push(format!(
        "modsync-core-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        counter
    ));
    fs::create_dir_all(&path).expect("must create test root");
    path
}

fn push_vuint(out: &mut Vec<u8>, value: u64) {
    let mut groups = vec![(value & 0x7f) as u8];
    let mut rest = value >> 7;
    while rest > 0 {
        groups.push((rest & 0x7f) as u8 | 0x80);
        rest >>= 7;
    }
    groups.reverse();
    out.extend(groups);
}

fn mpy_v6(qstrs: &[&str], str_consts: &[&str]) -> Vec<u8> {
    let mut out = vec![b'M', 6, 0x0a, 31];
    push_vuint(&mut out, qstrs.len() as u64);
    push_vuint(&mut out, str_consts.len() as u64);
    for qstr in qstrs {
        push_vuint(&mut out, (qstr.len() as u64) << 1);
        out.extend_from_slice(qstr.as_bytes());
        out.push(0);
    }
    for value in str_consts {
        out.push(5);
        push_vuint(&mut out, value.len() as u64);
        out.extend_from_slice(value.as_bytes());
        out.push(0);
    }
    out
}

#[test]
fn versions_compare_by_numeric_tokens() {
    assert_eq!(compare_versions("1.0.1", "1.0"), CmpOrdering::Greater);
    assert_eq!(compare_versions("1.10.0", "1.9.3"), CmpOrdering::Greater);
    assert_eq!(compare_versions("1.0", "1.0.0"), CmpOrdering::Equal);
    assert_eq!(compare_versions("2.0", "1.9.9"), CmpOrdering::Greater);
}

#[test]
fn text_tokens_sort_below_numeric_tokens() {
    assert_eq!(compare_versions("1.0.0-rc1", "1.0.0"), CmpOrdering::Less);
    assert_eq!(compare_versions("1.0.0-beta", "1.0.0-alpha"), CmpOrdering::Greater);
    assert_eq!(compare_versions("v2.1", "2.1"), CmpOrdering::Equal);
}

#[test]
fn attached_prerelease_suffix_compares_after_its_release_number() {
    assert_eq!(compare_versions("1.2rc1", "1.1"), CmpOrdering::Greater);
    assert_eq!(compare_versions("1.2rc1", "1.2"), CmpOrdering::Less);
    assert_eq!(compare_versions("1.2rc2", "1.2rc1"), CmpOrdering::Greater);
    assert_eq!(
        VersionTokens::parse("1.2rc1").tokens(),
        &[
            VersionToken::Numeric(1),
            VersionToken::Numeric(2),
            VersionToken::Text("rc1".to_string()),
        ]
    );
}

#[test]
fn major_change_is_leading_segment_difference() {
    assert!(is_major_change("1.9.9", "2.0"));
    assert!(!is_major_change("1.0", "1.0.1"));
    assert!(!is_major_change("3", "3.1.4"));
}

#[test]
fn version_tokens_keep_text_segments() {
    let parsed = VersionTokens::parse("5.0.0-alpha.2");
    assert_eq!(
        parsed.tokens(),
        &[
            VersionToken::Numeric(5),
            VersionToken::Numeric(0),
            VersionToken::Numeric(0),
            VersionToken::Text("alpha".to_string()),
            VersionToken::Numeric(2),
        ]
    );
}

#[test]
fn requirements_round_trip_through_format_and_parse() {
    let requirements = vec![
        Requirement::new("adafruit_bus_device", Some("5.2.10".to_string())),
        Requirement::new("neopixel", Some("6.3.12".to_string())),
        Requirement::new("my_local_helper", None),
    ];

    let text = format_requirements(&requirements);
    assert_eq!(
        text,
        "adafruit_bus_device==5.2.10\nneopixel==6.3.12\nmy_local_helper\n"
    );
    assert_eq!(parse_requirements(&text), requirements);
}

#[test]
fn requirements_parsing_strips_specifiers_and_comments() {
    let parsed = parse_requirements(
        "# board deps\n\nAdafruit-CircuitPython-Display-Text>=3.0\nneopixel==6.3.4 # pinned\nrequests[socks]; python_version>'3'\n",
    );
    assert_eq!(
        parsed,
        vec![
            Requirement::new("adafruit-circuitpython-display-text", None),
            Requirement::new("neopixel", Some("6.3.4".to_string())),
            Requirement::new("requests", None),
        ]
    );
}

#[test]
fn source_scan_reads_dunder_assignments() {
    let meta = scan_source(
        "\"\"\"Driver.\"\"\"\n__version__ = \"1.2.3\"\n__repo__: str = 'https://github.com/adafruit/Example.git'\n",
    );
    assert_eq!(meta.version.as_deref(), Some("1.2.3"));
    assert_eq!(
        meta.repo.as_deref(),
        Some("https://github.com/adafruit/Example.git")
    );
}

#[test]
fn source_scan_first_assignment_wins_and_ignores_nested_lines() {
    let meta = scan_source(
        "def f():\n    __version__ = \"9.9.9\"\n__version__ = \"0.4.0\"\n__version__ = \"0.5.0\"\n",
    );
    assert_eq!(meta.version.as_deref(), Some("0.4.0"));
    assert_eq!(meta.repo, None);
}

#[test]
fn source_scan_without_metadata_leaves_fields_absent() {
    let meta = scan_source("import board\nprint('hello')\n");
    assert_eq!(meta, SourceMeta::default());
}

#[test]
fn boot_out_yields_runtime_version_and_board() {
    let runtime = DeviceRuntime::parse_boot_out(
        "Adafruit CircuitPython 9.2.1 on 2024-11-20; Adafruit Feather RP2040 with rp2040\nBoard ID:adafruit_feather_rp2040\nUID:E6614C311B0F\n",
    )
    .expect("must parse boot_out");
    assert_eq!(runtime.version, "9.2.1");
    assert_eq!(runtime.board_id.as_deref(), Some("adafruit_feather_rp2040"));
    assert_eq!(runtime.target_abi(), Some(TargetAbi::new(9)));
    assert_eq!(runtime.target_abi().map(TargetAbi::dir_name).as_deref(), Some("9.x-mpy"));
}

#[test]
fn boot_out_without_version_is_rejected() {
    assert!(DeviceRuntime::parse_boot_out("garbage\n").is_none());
    assert!(DeviceRuntime::parse_boot_out("").is_none());
}

#[test]
fn abi_dir_names_parse_back() {
    assert_eq!(TargetAbi::parse_dir_name("8.x-mpy"), Some(TargetAbi::new(8)));
    assert_eq!(TargetAbi::parse_dir_name("py"), None);
}

#[test]
fn format_six_pool_yields_version_and_repo() {
    let bytes = mpy_v6(
        &["adafruit_ticks", "__version__", "__repo__"],
        &["1.1.2", "https://github.com/adafruit/Adafruit_CircuitPython_Ticks.git"],
    );
    let meta = scan_precompiled(&bytes).expect("must scan");
    assert_eq!(meta.header.format_version, 6);
    assert_eq!(meta.header.small_int_bits, 31);
    assert_eq!(meta.version.as_deref(), Some("1.1.2"));
    assert_eq!(
        meta.repo.as_deref(),
        Some("https://github.com/adafruit/Adafruit_CircuitPython_Ticks.git")
    );
    assert!(!meta.pool_truncated);
}

#[test]
fn format_six_without_version_name_leaves_version_absent() {
    let bytes = mpy_v6(&["helper", "run"], &["3.0.1"]);
    let meta = scan_precompiled(&bytes).expect("must scan");
    assert_eq!(meta.version, None);
    assert_eq!(meta.repo, None);
}

#[test]
fn format_six_truncated_pool_keeps_strings_read_so_far() {
    let mut bytes = mpy_v6(&["__version__", "2.4.0"], &["https://example.test/repo"]);
    bytes.truncate(bytes.len() - 8);
    let meta = scan_precompiled(&bytes).expect("header is intact");
    assert!(meta.pool_truncated);
    assert_eq!(meta.version.as_deref(), Some("2.4.0"));
    assert_eq!(meta.repo, None);
}

#[test]
fn static_qstr_entries_carry_no_bytes() {
    let mut bytes = vec![b'M', 6, 0x0a, 31];
    push_vuint(&mut bytes, 3);
    push_vuint(&mut bytes, 0);
    push_vuint(&mut bytes, (7 << 1) | 1);
    for text in ["__version__", "0.9.1"] {
        push_vuint(&mut bytes, (text.len() as u64) << 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(0);
    }
    let meta = scan_precompiled(&bytes).expect("must scan");
    assert_eq!(meta.version.as_deref(), Some("0.9.1"));
}

#[test]
fn legacy_formats_backtrack_to_version_string() {
    let mut format_three = vec![b'M', 3, 0, 31, 5];
    format_three.extend_from_slice(b"1.2.3");
    format_three.push(11);
    format_three.extend_from_slice(b"__version__");
    let meta = scan_precompiled(&format_three).expect("must scan");
    assert_eq!(meta.version.as_deref(), Some("1.2.3"));
    assert_eq!(meta.header.compat_window().max_major, Some(6));

    let mut format_five = vec![b'C', 5, 0, 31, 10];
    format_five.extend_from_slice(b"1.2.3");
    format_five.extend_from_slice(&[22, 0]);
    format_five.extend_from_slice(b"__version__");
    let meta = scan_precompiled(&format_five).expect("must scan");
    assert_eq!(meta.version.as_deref(), Some("1.2.3"));
    assert!(meta.header.compat_window().accepts(8));
    assert!(!meta.header.compat_window().accepts(9));
}

#[test]
fn truncated_or_unknown_headers_are_rejected() {
    assert!(parse_header(b"").is_err());
    assert!(parse_header(b"M").is_err());
    assert!(parse_header(b"M\x06").is_err());
    assert!(parse_header(b"X\x06\x00\x1f").is_err());
    assert!(parse_header(b"M\x04\x00\x1f").is_err());
    let header = parse_header(b"M\x06\x0a\x1f").expect("must parse");
    assert_eq!(header.header_len, 4);
}

#[test]
fn compat_windows_follow_format_versions() {
    let six = parse_header(b"M\x06\x0a\x1f").expect("must parse");
    assert!(six.compat_window().accepts(9));
    assert!(six.compat_window().accepts(10));
    assert!(!six.compat_window().accepts(8));
}

#[test]
fn module_names_drop_artifact_suffixes() {
    assert_eq!(
        module_name_from_path(&PathBuf::from("lib/neopixel.mpy")).as_deref(),
        Some("neopixel")
    );
    assert_eq!(
        module_name_from_path(&PathBuf::from("lib/adafruit_ticks.py")).as_deref(),
        Some("adafruit_ticks")
    );
    assert_eq!(
        module_name_from_path(&PathBuf::from("lib/adafruit_display_text")).as_deref(),
        Some("adafruit_display_text")
    );
}

#[test]
fn extract_reads_single_files_and_packages() {
    let root = test_root();
    let source = root.join("adafruit_ticks.py");
    fs::write(&source, "__version__ = \"1.1.2\"\n").expect("must write source module");

    let extraction = extract(&source);
    assert!(!extraction.is_corrupt());
    assert_eq!(extraction.identity.name, "adafruit_ticks");
    assert_eq!(extraction.identity.version.as_deref(), Some("1.1.2"));
    assert_eq!(extraction.identity.artifact_kind, ArtifactKind::SingleFile);
    assert_eq!(extraction.identity.format, ArtifactFormat::Source);

    let package = root.join("adafruit_display_text");
    fs::create_dir_all(package.join(".hidden")).expect("must create package");
    fs::write(package.join(".hidden").join("x.py"), "__version__ = \"9.9.9\"\n")
        .expect("must write hidden file");
    fs::write(package.join("__init__.mpy"), mpy_v6(&["init"], &[]))
        .expect("must write init");
    fs::write(
        package.join("label.mpy"),
        mpy_v6(&["__version__"], &["3.2.2"]),
    )
    .expect("must write label");

    let extraction = extract(&package);
    assert!(!extraction.is_corrupt());
    assert_eq!(extraction.identity.name, "adafruit_display_text");
    assert_eq!(extraction.identity.version.as_deref(), Some("3.2.2"));
    assert_eq!(
        extraction.identity.artifact_kind,
        ArtifactKind::PackageDirectory
    );
    assert!(matches!(
        extraction.identity.format,
        ArtifactFormat::Precompiled(_)
    ));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn corrupt_compiled_file_reports_problem_without_failing() {
    let root = test_root();
    let broken = root.join("broken.mpy");
    fs::write(&broken, b"M").expect("must write broken module");

    let extraction = extract(&broken);
    assert!(extraction.is_corrupt());
    assert_eq!(extraction.identity.format, ArtifactFormat::Unknown);
    assert_eq!(extraction.identity.version, None);
    assert_eq!(extraction.problems[0].reason_code(), "corrupt-artifact");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn sync_errors_carry_reason_prefixes() {
    let err = SyncError::PartialWriteFailure {
        name: "neopixel".to_string(),
        reason: "disk full".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "partial-write-failure: module 'neopixel': disk full"
    );
    assert!(SyncError::DeviceNotLocated {
        volume: "CIRCUITPY".to_string()
    }
    .is_device_not_found());
}

#[test]
fn inventory_freeze_lists_modules_sorted_with_bare_unversioned_names() {
    let mut inventory = DeviceInventory::new("/media/CIRCUITPY", None);
    for (name, version) in [("neopixel", Some("6.3.12")), ("Adafruit_Ticks", Some("1.1.2")), ("helper", None)] {
        inventory.insert(DeviceModuleRecord {
            identity: ModuleIdentity {
                name: name.to_string(),
                version: version.map(str::to_string),
                origin_repo: None,
                artifact_kind: ArtifactKind::SingleFile,
                format: ArtifactFormat::Source,
            },
            on_device_path: PathBuf::from(format!("/media/CIRCUITPY/lib/{name}.py")),
            corrupt: false,
        });
    }

    assert!(inventory.contains("adafruit_ticks"));
    assert_eq!(
        format_requirements(&inventory.freeze()),
        "adafruit_ticks==1.1.2\nhelper\nneopixel==6.3.12\n"
    );
}
