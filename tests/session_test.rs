use mpflash::firmware::{self, FirmwareImage, ImageError, LoadSource, Record};
use mpflash::storage::{StorageError, CHUNK_DATA_LEN, ENTRY_POINT};
use mpflash::{Config, MpFlashError, PyLoad, Session};

fn firmware_hex() -> String {
    let mut lines = vec![Record::extended_linear_address(0).to_line()];
    for i in 0..8u16 {
        lines.push(Record::data(i * 16, &[0xA5; 16]).to_line());
    }
    lines.push(Record::end_of_file().to_line());
    lines.join("\n")
}

fn session_with_main(main: &str) -> Session {
    let config = Config {
        initial_script: main.to_string(),
        ..Config::default()
    };
    Session::new(config, &firmware_hex()).unwrap()
}

fn small_file(i: usize) -> (String, Vec<u8>) {
    let name = format!("small{}.py", i);
    let content = format!("# Empty Python file < 128 bytes{}", name).into_bytes();
    (name, content)
}

#[test]
fn test_new_session_seeds_entry_point() {
    let session = Session::new(Config::default(), &firmware_hex()).unwrap();

    assert!(session.exists(ENTRY_POINT));
    assert!(session.main_script().unwrap().contains("from microbit import *"));
    assert!(session.listing().is_empty());
}

#[test]
fn test_session_exposes_config_and_firmware() {
    let config = Config {
        almost_full_ratio: 0.5,
        ..Config::default()
    };
    let session = Session::new(config, &firmware_hex()).unwrap();

    assert_eq!(session.config().almost_full_ratio, 0.5);
    assert_eq!(session.firmware().layout(), &session.config().layout);
    // extended address record plus eight data records
    assert_eq!(session.firmware().prefix_lines().len(), 9);
}

#[test]
fn test_small_files_fill_storage() {
    let mut session = session_with_main("from microbit import *");

    for i in 0..215 {
        let (name, content) = small_file(i);
        session.load_file(&name, &content).unwrap();
    }

    let (name, content) = small_file(215);
    let err = session.load_file(&name, &content).unwrap_err();
    assert!(matches!(err, MpFlashError::Storage(StorageError::OutOfSpace { .. })));
    assert!(err.to_string().contains("There is no storage space left"));
    assert_eq!(session.listing().len(), 215);
    assert!(session.usage().almost_full);
}

#[test]
fn test_default_script_takes_two_chunks() {
    let mut session = Session::new(Config::default(), &firmware_hex()).unwrap();

    let mut added = 0;
    for i in 0..300 {
        let (name, content) = small_file(i);
        if session.load_file(&name, &content).is_err() {
            break;
        }
        added += 1;
    }
    assert_eq!(added, 214);
}

#[test]
fn test_too_large_file_is_rejected() {
    let mut session = session_with_main("print('keep me')");
    let whole_region = vec![b'#'; 216 * CHUNK_DATA_LEN - 2 - "big.py".len()];

    let err = session.load_file("big.py", &whole_region).unwrap_err();
    assert!(matches!(
        err,
        MpFlashError::Storage(StorageError::OutOfSpace { needed: 216, available: 215 })
    ));
    assert!(!session.exists("big.py"));
    assert_eq!(session.main_script().unwrap(), "print('keep me')");
}

#[test]
fn test_entry_point_can_fill_storage_alone() {
    let mut session = session_with_main("pass");
    let code = "#".repeat(216 * CHUNK_DATA_LEN - 2 - ENTRY_POINT.len());

    let hex = session.generate_hex(&code).unwrap();
    assert_eq!(session.store().free_count(), 0);

    let mut reloaded = session_with_main("pass");
    let load = reloaded.load_hex(&hex).unwrap();
    assert_eq!(load.script.len(), code.len());
}

#[test]
fn test_modules_detected_by_marker() {
    let mut session = session_with_main("print('main')");

    let a = "# microbit-module: a@1.0.0\ndef hello():\n    return 'a'\n";
    let b = "# a module\n# microbit-module: b@1.0.0\nVALUE = 2\n";
    let c = "\"\"\"Docs\"\"\"\n\n# microbit-module: c@1.0.0\n";
    let d = "import a\n\n\n# microbit-module: d@1.0.0\n";

    assert_eq!(session.load_py("a.py", a).unwrap(), PyLoad::ModuleAdded("a.py".to_string()));
    assert_eq!(session.load_py("b.py", b).unwrap(), PyLoad::ModuleAdded("b.py".to_string()));
    assert_eq!(session.load_py("c.py", c).unwrap(), PyLoad::ModuleAdded("c.py".to_string()));
    assert_eq!(session.main_script().unwrap(), "print('main')");

    assert_eq!(session.load_py("d.py", d).unwrap(), PyLoad::EntryScriptReplaced);
    assert!(!session.exists("d.py"));
    assert_eq!(session.main_script().unwrap(), d);

    let names: Vec<String> = session.listing().into_iter().map(|f| f.name).collect();
    assert_eq!(names, vec!["a.py", "b.py", "c.py"]);

    assert_eq!(
        session.load_py("a.py", a).unwrap(),
        PyLoad::ModuleReplaced("a.py".to_string())
    );
}

#[test]
fn test_empty_script_is_rejected() {
    let mut session = session_with_main("print('main')");

    let err = session.load_py("empty.py", "").unwrap_err();
    assert!(matches!(err, MpFlashError::Storage(StorageError::EmptyContent(_))));
    assert!(err.to_string().contains("has to contain data"));

    assert!(session.load_file("empty.txt", b"").is_err());
    assert_eq!(session.main_script().unwrap(), "print('main')");
}

#[test]
fn test_load_file_reports_main_replacement() {
    let mut session = session_with_main("print('old')");

    assert!(!session.load_file("data.csv", b"1,2,3\n").unwrap());
    assert!(session.load_file(ENTRY_POINT, b"print('new')").unwrap());
    assert_eq!(session.main_script().unwrap(), "print('new')");

    let listing = session.listing();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].extension, "csv");
    assert_eq!(listing[0].size, 6);
}

#[test]
fn test_hex_round_trip_between_sessions() {
    let mut author = session_with_main("unused");
    author.load_py("lib.py", "# microbit-module: lib@0.1\nX = 1\n").unwrap();
    author.load_file("image.bin", &[0u8, 1, 2, 254, 255]).unwrap();
    let hex = author.generate_hex("import lib\nprint(lib.X)\n").unwrap();

    let mut reader = session_with_main("something else");
    let load = reader.load_hex(&hex).unwrap();

    assert_eq!(load.source, LoadSource::Filesystem);
    assert_eq!(load.script, "import lib\nprint(lib.X)\n");
    assert_eq!(load.files, vec!["image.bin".to_string(), "lib.py".to_string()]);
    assert!(load.warnings.is_empty());
    assert_eq!(
        reader.store().read("image.bin").unwrap().as_ref(),
        &[0u8, 1, 2, 254, 255][..]
    );
}

#[test]
fn test_load_legacy_hex() {
    let firmware = FirmwareImage::new(&firmware_hex(), Config::default().layout).unwrap();
    let hex = firmware::append_script(&firmware, b"from microbit import *\ndisplay.scroll('v0.9')")
        .unwrap();

    let mut session = session_with_main("print('current')");
    session.load_file("extra.txt", b"gone after load").unwrap();
    let load = session.load_hex(&hex).unwrap();

    assert_eq!(load.source, LoadSource::AppendedScript);
    assert_eq!(load.script, "from microbit import *\ndisplay.scroll('v0.9')");
    assert!(load.files.is_empty());
    assert!(!session.exists("extra.txt"));
}

#[test]
fn test_invalid_hex_leaves_session_untouched() {
    let mut session = session_with_main("print('safe')");

    let err = session.load_hex("this is not a hex file").unwrap_err();
    assert!(matches!(err, MpFlashError::Image(ImageError::MalformedImage { line: 1, .. })));

    let err = session.load_hex(&firmware_hex()).unwrap_err();
    assert!(matches!(err, MpFlashError::Image(ImageError::NoScriptFound)));

    assert_eq!(session.main_script().unwrap(), "print('safe')");
}

#[test]
fn test_empty_editor_drops_entry_point() {
    let mut session = session_with_main("print('x')");
    session.load_file("notes.txt", b"remember").unwrap();

    let hex = session.generate_hex("").unwrap();
    assert!(!session.exists(ENTRY_POINT));

    let mut reader = session_with_main("print('y')");
    let load = reader.load_hex(&hex).unwrap();
    assert_eq!(load.source, LoadSource::FilesOnly);
    assert_eq!(load.script, "");
    assert_eq!(load.files, vec!["notes.txt".to_string()]);
    assert_eq!(load.warnings.len(), 1);
}

#[test]
fn test_usage_breakdown() {
    let mut session = session_with_main("print('main')");
    session.load_file("a.py", &[b'a'; 200]).unwrap();
    session.load_file("b.txt", b"text").unwrap();

    let usage = session.usage();
    assert_eq!(usage.total, 216 * 128);
    assert_eq!(usage.main, 128);
    assert_eq!(usage.modules, 2 * 128);
    assert_eq!(usage.other, 128);
    assert_eq!(usage.free, usage.total - 4 * 128);
    assert!(!usage.almost_full);

    session.remove("a.py").unwrap();
    assert_eq!(session.usage().modules, 0);
}

#[test]
fn test_generated_images_are_reproducible() {
    let build = || {
        let mut session = session_with_main("print(1)");
        session.load_file("one.py", b"ONE = 1").unwrap();
        session.load_file("two.py", &[b'2'; 400]).unwrap();
        session.generate_hex("import one\n").unwrap()
    };

    let first = build();
    assert_eq!(first, build());
    assert_eq!(firmware::fingerprint(&first), firmware::fingerprint(&build()));
}
