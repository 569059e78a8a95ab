use anyhow::Result;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use stencil::{ConfigError, Notice, Opts, Orchestrator, PoolCaps, RewriteFn, Value};

/// Writer the tests can read back after the run.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

fn sink_orchestrator(buf: &SharedBuf) -> Orchestrator {
    let buf = buf.clone();
    Orchestrator::new().with_sink(Arc::new(move || Box::new(buf.clone()) as Box<dyn Write + Send>))
}

fn recorder(orchestrator: &mut Orchestrator) -> Arc<Mutex<Vec<Notice>>> {
    let notices = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&notices);
    orchestrator.set_observer(Box::new(move |n: &Notice| {
        sink.lock().unwrap().push(n.clone());
    }));
    notices
}

fn write_file(root: &Path, rel: &str, contents: &[u8]) -> Result<PathBuf> {
    let path = root.join(rel);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(&path, contents)?;
    Ok(path)
}

fn dir_opts(input: &Path, output: &Path) -> Opts {
    Opts {
        input_dir: Some(input.to_path_buf()),
        output_dir: Some(output.to_path_buf()),
        ..Opts::default()
    }
}

fn manifest_lines(written: &[PathBuf]) -> Vec<String> {
    written
        .iter()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .collect()
}

// --- directory output ---

#[test]
fn test_transforms_text_and_copies_binary() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write_file(&input, "a.txt", b"Hello #{NAME}#")?;
    write_file(&input, "b.bin", b"#{NAME}#\x00\x01")?;

    let opts = Opts {
        defines: vec![("NAME".to_string(), Value::from("World"))],
        ..dir_opts(&input, &output)
    };
    let report = stencil::run(&opts)?;

    assert!(report.is_success(), "{:?}", report.last_error);
    assert_eq!(report.files, 2);
    assert_eq!(fs::read(output.join("a.txt"))?, b"Hello World");
    assert_eq!(fs::read(output.join("b.bin"))?, b"#{NAME}#\x00\x01");
    assert_eq!(manifest_lines(&report.written), vec!["a.txt", "b.bin"]);
    assert_eq!(report.manifest(), "a.txt\nb.bin");
    Ok(())
}

#[test]
fn test_second_run_produces_identical_output() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write_file(&input, "page.txt", b"#{?FLAG}#on#{??}#off#{?}# #{=FILE.length > 0}#")?;
    let opts = Opts {
        defines: vec![("FLAG".to_string(), Value::Bool(true))],
        ..dir_opts(&input, &output)
    };

    let mut orchestrator = Orchestrator::new();
    let first = orchestrator.run(&opts)?;
    let once = fs::read(output.join("page.txt"))?;
    let second = orchestrator.run(&opts)?;
    let twice = fs::read(output.join("page.txt"))?;

    assert!(first.is_success() && second.is_success());
    assert_eq!(once, b"on true");
    assert_eq!(once, twice);
    assert_eq!(first.written, second.written);
    Ok(())
}

#[test]
fn test_small_chunks_match_default_chunks() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in");
    let body = "#{##T:title#}#<#{=T}#> #{~xs:x:i}#(#{=i}#:#{=x}#)#{~}# done\n".repeat(40);
    write_file(&input, "doc.txt", body.as_bytes())?;
    let vars = vec![("xs".to_string(), Value::from(vec!["p", "q", "r"]))];

    let big = Opts {
        vars: vars.clone(),
        ..dir_opts(&input, &tmp.path().join("big"))
    };
    let small = Opts {
        vars,
        chunk_size: 7,
        high_water_mark: 16,
        ..dir_opts(&input, &tmp.path().join("small"))
    };
    assert!(stencil::run(&big)?.is_success());
    assert!(stencil::run(&small)?.is_success());

    let expected = "<title> (0:p)(1:q)(2:r) done\n".repeat(40);
    assert_eq!(fs::read_to_string(tmp.path().join("big/doc.txt"))?, expected);
    assert_eq!(fs::read_to_string(tmp.path().join("small/doc.txt"))?, expected);
    Ok(())
}

#[test]
fn test_synthesized_defines() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write_file(&input, "only.txt", b"#{=BASENAME}#|#{=INDEX}#|#{=MIMETYPE}#|#{=DATE.length > 0}#")?;

    let report = stencil::run(&dir_opts(&input, &output))?;
    assert!(report.is_success());
    assert_eq!(
        fs::read_to_string(output.join("only.txt"))?,
        "only.txt|1|text/plain|true"
    );
    Ok(())
}

#[test]
fn test_markup_file_uses_comment_tags() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write_file(&input, "index.html", b"<h1><!--{!TITLE}--></h1>#{TITLE}#")?;
    let opts = Opts {
        defines: vec![("TITLE".to_string(), Value::from("A&B"))],
        ..dir_opts(&input, &output)
    };
    assert!(stencil::run(&opts)?.is_success());
    assert_eq!(
        fs::read_to_string(output.join("index.html"))?,
        "<h1>A&amp;B</h1>#{TITLE}#"
    );
    Ok(())
}

#[test]
fn test_empty_file_still_written() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write_file(&input, "empty.txt", b"")?;

    let report = stencil::run(&dir_opts(&input, &output))?;
    assert_eq!(report.files, 1);
    assert!(output.join("empty.txt").is_file());
    assert_eq!(fs::read(output.join("empty.txt"))?.len(), 0);
    Ok(())
}

#[test]
fn test_recursive_mirrors_tree() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write_file(&input, "top.txt", b"t")?;
    write_file(&input, "sub/deeper/leaf.txt", b"l")?;
    write_file(&input, ".hidden/secret.txt", b"s")?;

    let flat = stencil::run(&dir_opts(&input, &output))?;
    assert_eq!(manifest_lines(&flat.written), vec!["top.txt"]);

    let opts = Opts {
        recursive: true,
        ..dir_opts(&input, &output)
    };
    let deep = stencil::run(&opts)?;
    assert_eq!(
        manifest_lines(&deep.written),
        vec!["sub/deeper/leaf.txt", "top.txt"]
    );
    assert_eq!(fs::read(output.join("sub/deeper/leaf.txt"))?, b"l");
    assert!(!output.join(".hidden").exists());
    Ok(())
}

#[test]
fn test_recursive_pattern_expands_matched_dirs() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write_file(&input, "docs/a.txt", b"a")?;
    write_file(&input, "docs/more/b.txt", b"b")?;
    write_file(&input, "other/c.txt", b"c")?;

    let opts = Opts {
        patterns: vec!["docs".to_string(), "docs/*.txt".to_string()],
        recursive: true,
        ..dir_opts(&input, &output)
    };
    let report = stencil::run(&opts)?;
    assert_eq!(report.files, 2);
    assert_eq!(
        manifest_lines(&report.written),
        vec!["docs/a.txt", "docs/more/b.txt"]
    );
    Ok(())
}

#[test]
fn test_nested_output_dir_is_skipped() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("site");
    let output = input.join("dist");
    write_file(&input, "a.txt", b"a")?;
    write_file(&output, "stale.txt", b"old")?;

    let opts = Opts {
        recursive: true,
        ..dir_opts(&input, &output)
    };
    let report = stencil::run(&opts)?;
    assert_eq!(manifest_lines(&report.written), vec!["a.txt"]);
    assert!(!output.join("dist").exists());
    Ok(())
}

#[test]
fn test_simulate_touches_nothing() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write_file(&input, "a.txt", b"#{=1 + 1}#")?;
    write_file(&input, "nested/b.txt", b"b")?;

    let opts = Opts {
        simulate: true,
        recursive: true,
        ..dir_opts(&input, &output)
    };
    let report = stencil::run(&opts)?;
    assert!(report.is_success());
    assert_eq!(report.files, 2);
    assert_eq!(report.written.len(), 2);
    assert!(!output.exists());
    Ok(())
}

// --- concurrency caps ---

#[test]
fn test_single_read_slot_never_overlaps() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    for name in ["one.txt", "two.txt", "three.txt"] {
        write_file(&input, name, "x".repeat(5000).as_bytes())?;
    }
    let opts = Opts {
        caps: PoolCaps {
            reads: 1,
            ..PoolCaps::default()
        },
        chunk_size: 512,
        ..dir_opts(&input, &output)
    };

    let mut orchestrator = Orchestrator::new();
    let notices = recorder(&mut orchestrator);
    let report = orchestrator.run(&opts)?;
    assert!(report.is_success());

    let mut open = 0;
    let mut starts = 0;
    for notice in notices.lock().unwrap().iter() {
        match notice {
            Notice::ReadStart { .. } => {
                open += 1;
                starts += 1;
                assert_eq!(open, 1, "two reads open at once");
            }
            Notice::ReadEnd { .. } => open -= 1,
            _ => {}
        }
    }
    assert_eq!(starts, 3);
    assert_eq!(open, 0);
    Ok(())
}

#[test]
fn test_notices_bracket_each_file() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write_file(&input, "a.txt", b"a #{=1}#")?;

    let mut orchestrator = Orchestrator::new();
    let notices = recorder(&mut orchestrator);
    orchestrator.run(&dir_opts(&input, &output))?;

    let notices = notices.lock().unwrap();
    let first = notices.first().expect("no notices");
    assert!(
        matches!(first, Notice::ReadStart { content_type, .. } if content_type == "text/plain")
    );
    assert!(matches!(notices.last(), Some(Notice::WriteEnd { .. })));
    assert!(notices.iter().any(|n| matches!(n, Notice::WriteStart { .. })));
    assert!(notices.iter().any(|n| matches!(n, Notice::ReadEnd { .. })));
    Ok(())
}

#[test]
fn test_same_family_files_transform_concurrently() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    let body = "#{?1}#<#{=K}#>#{?}##{?0}#no#{??}#y#{?}#\n".repeat(20);
    for i in 0..16 {
        let contents = format!("#{{##K:v{i}#}}#{body}");
        write_file(&input, &format!("f{i:02}.txt"), contents.as_bytes())?;
    }
    let opts = Opts {
        caps: PoolCaps {
            reads: 4,
            writes: 2,
            ..PoolCaps::default()
        },
        chunk_size: 3,
        high_water_mark: 5,
        ..dir_opts(&input, &output)
    };

    let report = stencil::run(&opts)?;
    assert!(report.is_success(), "{:?}", report.last_error);
    assert_eq!(report.files, 16);
    for i in 0..16 {
        let out = fs::read_to_string(output.join(format!("f{i:02}.txt")))?;
        assert_eq!(out, format!("<v{i}>y\n").repeat(20), "f{i:02}.txt");
    }

    let (caps, peaks) = (report.caps, report.peaks);
    assert!(caps.reads <= 4 && caps.writes <= 2);
    assert!(peaks.expansions >= 1 && peaks.expansions <= caps.expansions);
    assert!(peaks.classifications >= 1 && peaks.classifications <= caps.classifications);
    assert!(peaks.reads >= 1 && peaks.reads <= caps.reads);
    assert!(peaks.directories >= 1 && peaks.directories <= caps.directories);
    assert!(peaks.writes >= 1 && peaks.writes <= caps.writes);
    Ok(())
}

// --- configuration errors ---

#[test]
fn test_output_equal_to_input_fails_before_io() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    write_file(tmp.path(), "a.txt", b"#{=1}#")?;

    let mut orchestrator = Orchestrator::new();
    let notices = recorder(&mut orchestrator);
    let err = orchestrator
        .run(&dir_opts(tmp.path(), tmp.path()))
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::UnsafeOutput(_))
    ));
    assert!(notices.lock().unwrap().is_empty());
    assert_eq!(fs::read(tmp.path().join("a.txt"))?, b"#{=1}#");
    Ok(())
}

#[test]
fn test_overwrite_in_place() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    write_file(tmp.path(), "a.txt", b"#{=1 + 1}#")?;
    let opts = Opts {
        overwrite: true,
        ..dir_opts(tmp.path(), tmp.path())
    };
    let report = stencil::run(&opts)?;
    assert!(report.is_success());
    assert_eq!(fs::read(tmp.path().join("a.txt"))?, b"2");
    Ok(())
}

#[test]
fn test_no_patterns_is_a_config_error() {
    let err = stencil::run(&Opts::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::EmptyPatterns)
    ));
}

// --- per-path failures ---

#[test]
fn test_template_error_does_not_stop_siblings() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write_file(&input, "bad.txt", b"before #{?}# after")?;
    write_file(&input, "nomul.txt", b"#{=2 * 0 + 1}#")?;
    write_file(&input, "fine.txt", b"ok")?;

    let report = stencil::run(&dir_opts(&input, &output))?;
    assert_eq!(report.errors, 2);
    assert!(!report.is_success());
    assert!(report.last_error.is_some());
    assert_eq!(fs::read(output.join("fine.txt"))?, b"ok");
    Ok(())
}

#[test]
fn test_deeply_nested_tag_does_not_stop_siblings() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write_file(&input, "ok.txt", b"#{=1 + 1}#")?;
    let deep = format!("#{{{}}}#", "(".repeat(50_000));
    write_file(&input, "deep.txt", deep.as_bytes())?;

    let report = stencil::run(&dir_opts(&input, &output))?;
    assert_eq!(report.errors, 1);
    assert!(report.last_error.as_deref().unwrap_or("").contains("nested"));
    assert_eq!(fs::read_to_string(output.join("ok.txt"))?, "2");
    Ok(())
}

#[test]
fn test_rewrite_collision_fails_one_path() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write_file(&input, "a.txt", b"a")?;
    write_file(&input, "b.txt", b"b")?;

    let target = output.join("same.txt");
    let rule: RewriteFn = Arc::new(move |_: &Path| target.clone());
    let mut orchestrator = Orchestrator::new().with_rewrite(rule);
    let report = orchestrator.run(&dir_opts(&input, &output))?;

    assert_eq!(report.errors, 1);
    assert_eq!(manifest_lines(&report.written), vec!["same.txt"]);
    let body = fs::read(output.join("same.txt"))?;
    assert!(body == b"a" || body == b"b");
    Ok(())
}

#[test]
fn test_custom_eligibility_copies_everything() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write_file(&input, "a.txt", b"#{=1}#")?;

    let mut orchestrator = Orchestrator::new().with_eligibility(Arc::new(|_: &str| false));
    let report = orchestrator.run(&dir_opts(&input, &output))?;
    assert!(report.is_success());
    assert_eq!(fs::read(output.join("a.txt"))?, b"#{=1}#");
    Ok(())
}

// --- sink output ---

#[test]
fn test_sink_keeps_each_file_contiguous() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let a = "a".repeat(3000);
    let b = "b".repeat(2000);
    write_file(tmp.path(), "a.txt", a.as_bytes())?;
    write_file(tmp.path(), "b.txt", b.as_bytes())?;

    let buf = SharedBuf::default();
    let opts = Opts {
        patterns: vec!["*.txt".to_string()],
        cwd: tmp.path().to_path_buf(),
        caps: PoolCaps {
            reads: 4,
            ..PoolCaps::default()
        },
        chunk_size: 256,
        ..Opts::default()
    };
    let report = sink_orchestrator(&buf).run(&opts)?;
    assert!(report.is_success());

    let out = String::from_utf8(buf.contents())?;
    assert!(out == format!("{a}{b}") || out == format!("{b}{a}"));
    assert_eq!(manifest_lines(&report.written), vec!["a.txt", "b.txt"]);
    Ok(())
}

#[test]
fn test_sink_transforms_with_vars() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    write_file(tmp.path(), "greet.txt", b"hi #{=who}#")?;

    let buf = SharedBuf::default();
    let opts = Opts {
        patterns: vec!["greet.txt".to_string()],
        cwd: tmp.path().to_path_buf(),
        vars: vec![("who".to_string(), Value::from("there"))],
        ..Opts::default()
    };
    let report = sink_orchestrator(&buf).run(&opts)?;
    assert_eq!(report.files, 1);
    assert_eq!(buf.contents(), b"hi there");
    Ok(())
}

// --- cancellation ---

#[test]
fn test_cancel_stops_new_work() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    for i in 0..20 {
        write_file(&input, &format!("f{i:02}.txt"), "y".repeat(4096).as_bytes())?;
    }
    let opts = Opts {
        caps: PoolCaps {
            reads: 1,
            ..PoolCaps::default()
        },
        chunk_size: 64,
        ..dir_opts(&input, &output)
    };

    let mut orchestrator = Orchestrator::new();
    let cancel = orchestrator.cancel_flag();
    orchestrator.set_observer(Box::new(move |n: &Notice| {
        if matches!(n, Notice::ReadStart { .. }) {
            cancel.store(true, Ordering::SeqCst);
        }
    }));
    let report = orchestrator.run(&opts)?;

    assert!(report.cancelled);
    assert!(!report.is_success());
    assert!(report.files <= 1);

    // The flag is cleared for the next run.
    orchestrator.set_observer(Box::new(|_: &Notice| {}));
    let again = orchestrator.run(&opts)?;
    assert!(!again.cancelled);
    assert_eq!(again.files, 20);
    Ok(())
}
