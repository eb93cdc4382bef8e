use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use modsync_catalog::{Bundle, CatalogEntry, CatalogIndex};
use modsync_core::{
    ArtifactFormat, ArtifactKind, DeviceInventory, DeviceModuleRecord, DeviceRuntime,
    ModuleIdentity, PrecompiledHeader, TargetAbi,
};

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
        "modsync-resolver-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        counter
    ));
    fs::create_dir_all(&path).expect("must create test root");
    path
}

fn bundle() -> Bundle {
    Bundle::parse("adafruit/Adafruit_CircuitPython_Bundle").expect("must parse bundle")
}

fn identity(name: &str, version: Option<&str>, format: ArtifactFormat) -> ModuleIdentity {
    ModuleIdentity {
        name: name.to_string(),
        version: version.map(str::to_string),
        origin_repo: None,
        artifact_kind: ArtifactKind::SingleFile,
        format,
    }
}

fn catalog_entry(name: &str, version: Option<&str>) -> CatalogEntry {
    CatalogEntry {
        name: name.to_ascii_lowercase(),
        identity: identity(name, version, ArtifactFormat::Source),
        bundle: bundle(),
        source_path: PathBuf::from(format!("/catalog/lib/{name}.py")),
        precompiled_variants: BTreeMap::new(),
        examples_path: None,
        declared_dependencies: Vec::new(),
    }
}

fn with_variant(mut entry: CatalogEntry, major: u32) -> CatalogEntry {
    entry.precompiled_variants.insert(
        TargetAbi::new(major),
        PathBuf::from(format!("/catalog/{major}.x-mpy/lib/{}.mpy", entry.name)),
    );
    entry
}

fn compiled(format_version: u8) -> ArtifactFormat {
    ArtifactFormat::Precompiled(PrecompiledHeader {
        magic: b'C',
        format_version,
        feature_flags: 0,
        small_int_bits: 31,
        header_len: 4,
    })
}

fn device_record(name: &str, version: Option<&str>, format: ArtifactFormat) -> DeviceModuleRecord {
    let extension = if format.is_source() { "py" } else { "mpy" };
    DeviceModuleRecord {
        identity: identity(name, version, format),
        on_device_path: PathBuf::from(format!("/device/lib/{name}.{extension}")),
        corrupt: false,
    }
}

fn inventory(runtime: Option<&str>, records: Vec<DeviceModuleRecord>) -> DeviceInventory {
    let mut inventory = DeviceInventory::new("/device", runtime.map(DeviceRuntime::new));
    for record in records {
        inventory.insert(record);
    }
    inventory
}

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[derive(Default)]
struct FakeLookup {
    sources: HashMap<String, Result<Vec<String>, String>>,
    declared: HashMap<String, Vec<String>>,
}

impl FakeLookup {
    fn module(mut self, name: &str, source: &str) -> Self {
        self.sources
            .insert(name.to_string(), Ok(vec![source.to_string()]));
        self
    }

    fn unreadable(mut self, name: &str) -> Self {
        self.sources
            .insert(name.to_string(), Err("permission denied".to_string()));
        self
    }

    fn declares(mut self, name: &str, dependencies: &[&str]) -> Self {
        self.declared.insert(name.to_string(), names(dependencies));
        self
    }
}

impl ModuleLookup for FakeLookup {
    fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    fn module_sources(&self, name: &str) -> anyhow::Result<Vec<String>> {
        match self.sources.get(name) {
            Some(Ok(sources)) => Ok(sources.clone()),
            Some(Err(reason)) => Err(anyhow!("{reason}")),
            None => Ok(Vec::new()),
        }
    }

    fn declared_dependencies(&self, name: &str) -> Vec<String> {
        self.declared.get(name).cloned().unwrap_or_default()
    }
}

#[test]
fn import_scan_reads_plain_and_aliased_imports() {
    let scan = scan_imports("import board, adafruit_bus_device.i2c_device as dev\nimport time\n");
    assert_eq!(
        scan.modules,
        names(&["board", "adafruit_bus_device", "time"])
    );
    assert!(scan.unresolved.is_empty());
}

#[test]
fn import_scan_reads_from_imports_and_skips_relative_ones() {
    let scan = scan_imports(
        "from adafruit_display_text.label import Label\nfrom . import helpers\nfrom .sub import x\n",
    );
    assert_eq!(scan.modules, names(&["adafruit_display_text"]));
    assert!(scan.unresolved.is_empty());
}

#[test]
fn import_scan_joins_parenthesized_and_backslash_continuations() {
    let source = "from adafruit_bitmap_font import (\n    bitmap_font,\n    glyph_cache,\n)\nimport neopixel, \\\n    simpleio\n";
    let scan = scan_imports(source);
    assert_eq!(
        scan.modules,
        names(&["adafruit_bitmap_font", "neopixel", "simpleio"])
    );
}

#[test]
fn import_scan_splits_semicolon_statements() {
    let scan = scan_imports("import board; import digitalio; x = 1\n");
    assert_eq!(scan.modules, names(&["board", "digitalio"]));
}

#[test]
fn import_scan_ignores_comments_strings_and_docstrings() {
    let source = r#""""
import fake_in_docstring
"""
# import fake_in_comment
message = "import fake_in_string"
other = 'from fake import x'
import real_module  # import trailing_comment
"#;
    let scan = scan_imports(source);
    assert_eq!(scan.modules, names(&["real_module"]));
    assert!(scan.unresolved.is_empty());
}

#[test]
fn import_scan_reports_unparsable_statements() {
    let scan = scan_imports("import 3d_module\nfrom broken\nimport ok_module\n");
    assert_eq!(scan.modules, names(&["ok_module"]));
    assert_eq!(scan.unresolved, names(&["import 3d_module", "from broken"]));
}

#[test]
fn import_scan_does_not_match_identifiers_that_start_with_keywords() {
    let scan = scan_imports("important = 1\nfromage = 2\n");
    assert!(scan.modules.is_empty());
    assert!(scan.unresolved.is_empty());
}

#[test]
fn canonicalization_maps_requirement_names_to_modules() {
    assert_eq!(
        canonicalize_requirement_name("adafruit-circuitpython-display-text").as_deref(),
        Some("adafruit_display_text")
    );
    assert_eq!(
        canonicalize_requirement_name("Adafruit-CircuitPython-NeoPixel").as_deref(),
        Some("neopixel")
    );
    assert_eq!(
        canonicalize_requirement_name("adafruit-circuitpython-busdevice").as_deref(),
        Some("adafruit_bus_device")
    );
    assert_eq!(
        canonicalize_requirement_name("adafruit_displayio_ssd1306").as_deref(),
        Some("adafruit_displayio_ssd1306")
    );
    assert_eq!(canonicalize_requirement_name("Adafruit-Blinka"), None);
    assert_eq!(canonicalize_requirement_name("pyserial"), None);
    assert_eq!(canonicalize_requirement_name("  "), None);
}

#[test]
fn builtins_are_recognised() {
    assert!(is_platform_builtin("board"));
    assert!(is_platform_builtin("time"));
    assert!(is_platform_builtin("usb_hid"));
    assert!(!is_platform_builtin("neopixel"));
}

#[test]
fn closure_follows_catalog_modules_transitively() {
    let lookup = FakeLookup::default()
        .module("adafruit_display_text", "import displayio\nfrom adafruit_bitmap_font import bitmap_font\n")
        .module("adafruit_bitmap_font", "import struct\n");

    let result = closure(
        "import board\nfrom adafruit_display_text import label\nimport mystery_lib\n",
        &lookup,
    );
    assert_eq!(
        result.required,
        names(&["adafruit_display_text", "adafruit_bitmap_font"])
    );
    assert_eq!(result.unknown, names(&["mystery_lib"]));
    assert!(result.unresolved.is_empty());
}

#[test]
fn closure_terminates_on_cyclic_imports() {
    let lookup = FakeLookup::default()
        .module("mod_a", "import mod_b\n")
        .module("mod_b", "import mod_a\n");

    let result = closure("import mod_a\n", &lookup);
    assert_eq!(result.required, names(&["mod_a", "mod_b"]));
    assert!(result.unknown.is_empty());
}

#[test]
fn closure_includes_declared_dependencies() {
    let lookup = FakeLookup::default()
        .module("neopixel", "")
        .module("adafruit_pixelbuf", "")
        .declares(
            "neopixel",
            &["adafruit-blinka", "adafruit-circuitpython-pixelbuf"],
        );

    let result = closure("import neopixel\n", &lookup);
    assert_eq!(result.required, names(&["neopixel", "adafruit_pixelbuf"]));
    assert!(result.unknown.is_empty());
}

#[test]
fn closure_reports_unreadable_modules_without_failing() {
    let lookup = FakeLookup::default()
        .unreadable("broken_lib")
        .module("fine_lib", "import broken_lib\n");

    let result = closure("import fine_lib\n", &lookup);
    assert_eq!(result.required, names(&["fine_lib", "broken_lib"]));
    assert_eq!(result.unresolved.len(), 1);
    assert!(result.unresolved[0].starts_with("broken_lib: "));
}

#[test]
fn closure_from_names_canonicalizes_requirement_names() {
    let lookup = FakeLookup::default()
        .module("adafruit_display_text", "")
        .module("neopixel", "");

    let result = closure_from_names(
        &names(&[
            "adafruit-circuitpython-display-text",
            "adafruit-circuitpython-neopixel",
            "adafruit-blinka",
        ]),
        &lookup,
    );
    assert_eq!(
        result.required,
        names(&["adafruit_display_text", "neopixel"])
    );
}

#[test]
fn catalog_index_lookup_reads_package_sources() {
    let root = test_root();
    let package = root.join("lib").join("adafruit_display_text");
    fs::create_dir_all(&package).expect("must create package");
    fs::write(package.join("__init__.py"), "import displayio\n").expect("must write init");
    fs::write(package.join("label.py"), "import adafruit_bitmap_font\n").expect("must write label");
    fs::write(package.join("notes.txt"), "import ignored\n").expect("must write notes");
    let font = root.join("lib").join("adafruit_bitmap_font.py");
    fs::write(&font, "import struct\n").expect("must write font");

    let mut text = catalog_entry("adafruit_display_text", Some("3.2.2"));
    text.source_path = package;
    let mut bitmap = catalog_entry("adafruit_bitmap_font", Some("2.1.0"));
    bitmap.source_path = font;
    let catalog = CatalogIndex::from_entries(vec![text, bitmap]);

    let sources = catalog
        .module_sources("adafruit_display_text")
        .expect("must read package sources");
    assert_eq!(sources.len(), 2);

    let result = closure("from adafruit_display_text import label\n", &catalog);
    assert_eq!(
        result.required,
        names(&["adafruit_display_text", "adafruit_bitmap_font"])
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plan_updates_minor_and_installs_missing_in_catalog_order() {
    let catalog = CatalogIndex::from_entries(vec![
        catalog_entry("modA", Some("1.1")),
        catalog_entry("modB", Some("2.0")),
    ]);
    let inventory = inventory(
        Some("9.2.1"),
        vec![device_record("modA", Some("1.0"), ArtifactFormat::Source)],
    );

    let targets = names(&["modB", "modA"]);
    let actions = plan(&inventory, &catalog, Some(&targets), PlanOptions::default());
    assert_eq!(
        actions,
        vec![
            ResolutionAction::Update {
                name: "moda".to_string(),
                format: ChosenFormat::Source,
                from: Some("1.0".to_string()),
                to: Some("1.1".to_string()),
                major: false,
                reason: UpdateReason::Outdated,
            },
            ResolutionAction::Install {
                name: "modb".to_string(),
                format: ChosenFormat::Source,
            },
        ]
    );
    assert!(actions.iter().all(|action| !action.needs_confirmation()));
}

#[test]
fn plan_flags_major_updates_and_gates_them_when_unattended() {
    let catalog = CatalogIndex::from_entries(vec![catalog_entry("modA", Some("2.0"))]);
    let inventory = inventory(
        None,
        vec![device_record("modA", Some("1.0"), ArtifactFormat::Source)],
    );

    let interactive = plan(&inventory, &catalog, None, PlanOptions::default());
    assert_eq!(interactive.len(), 1);
    assert!(matches!(
        &interactive[0],
        ResolutionAction::Update { major: true, .. }
    ));
    assert!(interactive[0].needs_confirmation());

    let unattended = PlanOptions {
        unattended: true,
        ..PlanOptions::default()
    };
    assert_eq!(
        plan(&inventory, &catalog, None, unattended),
        vec![ResolutionAction::Skip {
            name: "moda".to_string(),
            reason: SkipReason::ConfirmationRequired,
        }]
    );

    let overridden = PlanOptions {
        unattended: true,
        allow_major: true,
        ..PlanOptions::default()
    };
    assert!(matches!(
        &plan(&inventory, &catalog, None, overridden)[0],
        ResolutionAction::Update { major: true, .. }
    ));
}

#[test]
fn plan_is_pure_and_deterministic() {
    let catalog = CatalogIndex::from_entries(vec![
        catalog_entry("alpha", Some("1.2.0")),
        catalog_entry("beta", Some("0.9")),
        catalog_entry("gamma", None),
    ]);
    let inventory = inventory(
        Some("9.0.0"),
        vec![
            device_record("alpha", Some("1.0.0"), ArtifactFormat::Source),
            device_record("beta", Some("1.0"), ArtifactFormat::Source),
            device_record("gamma", Some("1.0"), ArtifactFormat::Source),
            device_record("zeta", Some("1.0"), ArtifactFormat::Source),
        ],
    );

    let first = plan(&inventory, &catalog, None, PlanOptions::default());
    let second = plan(&inventory, &catalog, None, PlanOptions::default());
    assert_eq!(first, second);
    assert_eq!(inventory.modules.len(), 4);

    let summary = first
        .iter()
        .map(|action| match action {
            ResolutionAction::Skip { name, reason } => format!("{name}:{}", reason.as_str()),
            other => format!("{}:action", other.name()),
        })
        .collect::<Vec<_>>();
    assert_eq!(
        summary,
        names(&[
            "alpha:action",
            "beta:device-newer",
            "gamma:needs-review",
            "zeta:unknown-origin",
        ])
    );
}

#[test]
fn plan_reports_up_to_date_modules() {
    let catalog = CatalogIndex::from_entries(vec![catalog_entry("modA", Some("1.0.0"))]);
    let inventory = inventory(
        None,
        vec![device_record("modA", Some("1.0"), ArtifactFormat::Source)],
    );

    assert_eq!(
        plan(&inventory, &catalog, None, PlanOptions::default()),
        vec![ResolutionAction::Skip {
            name: "moda".to_string(),
            reason: SkipReason::UpToDate,
        }]
    );
}

#[test]
fn frozen_requirements_replan_without_installs() {
    let catalog = CatalogIndex::from_entries(vec![
        catalog_entry("neopixel", Some("6.3.12")),
        catalog_entry("simpleio", Some("3.0.10")),
    ]);
    let inventory = inventory(
        Some("9.2.1"),
        vec![
            device_record("neopixel", Some("6.3.12"), ArtifactFormat::Source),
            device_record("simpleio", Some("3.0.10"), ArtifactFormat::Source),
        ],
    );

    let text = modsync_core::format_requirements(&inventory.freeze());
    let targets = modsync_core::parse_requirements(&text)
        .into_iter()
        .map(|requirement| requirement.name)
        .collect::<Vec<_>>();
    let actions = plan(&inventory, &catalog, Some(&targets), PlanOptions::default());
    assert_eq!(actions.len(), 2);
    assert!(actions
        .iter()
        .all(|action| !matches!(action, ResolutionAction::Install { .. })));
}

#[test]
fn plan_replaces_compiled_modules_the_runtime_cannot_load() {
    let catalog = CatalogIndex::from_entries(vec![with_variant(
        catalog_entry("neopixel", Some("6.3.12")),
        9,
    )]);
    let inventory = inventory(
        Some("9.2.1"),
        vec![device_record("neopixel", Some("6.3.12"), compiled(5))],
    );

    assert_eq!(
        plan(&inventory, &catalog, None, PlanOptions::default()),
        vec![ResolutionAction::Update {
            name: "neopixel".to_string(),
            format: ChosenFormat::Precompiled(TargetAbi::new(9)),
            from: Some("6.3.12".to_string()),
            to: Some("6.3.12".to_string()),
            major: false,
            reason: UpdateReason::FormatMismatch,
        }]
    );
}

#[test]
fn plan_gates_corrupt_replacements_like_major_updates() {
    let catalog = CatalogIndex::from_entries(vec![catalog_entry("neopixel", Some("6.3.12"))]);
    let mut record = device_record("neopixel", None, ArtifactFormat::Unknown);
    record.corrupt = true;
    let inventory = inventory(Some("9.2.1"), vec![record]);

    let actions = plan(&inventory, &catalog, None, PlanOptions::default());
    assert!(matches!(
        &actions[0],
        ResolutionAction::Update {
            reason: UpdateReason::Corrupt,
            major: false,
            ..
        }
    ));
    assert!(actions[0].needs_confirmation());

    let unattended = PlanOptions {
        unattended: true,
        ..PlanOptions::default()
    };
    assert_eq!(
        plan(&inventory, &catalog, None, unattended),
        vec![ResolutionAction::Skip {
            name: "neopixel".to_string(),
            reason: SkipReason::ConfirmationRequired,
        }]
    );
}

#[test]
fn format_choice_prefers_compiled_only_when_it_fits() {
    let entry = with_variant(catalog_entry("neopixel", Some("6.3.12")), 9);
    let options = PlanOptions::default();
    let abi = Some(TargetAbi::new(9));

    assert_eq!(
        choose_format(&entry, None, abi, options),
        ChosenFormat::Precompiled(TargetAbi::new(9))
    );
    assert_eq!(
        choose_format(&entry, None, None, options),
        ChosenFormat::Source
    );
    assert_eq!(
        choose_format(&entry, None, Some(TargetAbi::new(8)), options),
        ChosenFormat::Source
    );

    let source_on_device = device_record("neopixel", Some("6.0.0"), ArtifactFormat::Source);
    assert_eq!(
        choose_format(&entry, Some(&source_on_device), abi, options),
        ChosenFormat::Source
    );

    let prefer_source = PlanOptions {
        prefer_source: true,
        ..PlanOptions::default()
    };
    assert_eq!(
        choose_format(&entry, None, abi, prefer_source),
        ChosenFormat::Source
    );
}

#[test]
fn removal_plan_skips_modules_that_are_not_installed() {
    let inventory = inventory(
        None,
        vec![device_record("neopixel", Some("6.3.12"), ArtifactFormat::Source)],
    );

    assert_eq!(
        plan_removal(&inventory, &names(&["NeoPixel", "simpleio", "neopixel"])),
        vec![
            ResolutionAction::Uninstall {
                name: "neopixel".to_string(),
            },
            ResolutionAction::Skip {
                name: "simpleio".to_string(),
                reason: SkipReason::NotInstalled,
            },
        ]
    );
}
