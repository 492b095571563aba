use slab_logger::message::{allocate_log, allocate_log_structured};
use slab_logger::slab::SlabAllocator;
use slab_logger::{
    log_record, log_structured, FileSink, JsonSink, Level, LoggerConfig, LoggerContext, Sink, LOG_GENERAL,
};
use serde_json::Value;
use std::fs;
use std::sync::Arc;

fn lines(path: &std::path::Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_owned)
        .collect()
}

#[test]
fn test_text_line_shape() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("game.log");
    let sink = FileSink::try_open(&path, false).unwrap();
    let allocator = Arc::new(SlabAllocator::new());

    let message = allocate_log(&allocator, &LOG_GENERAL, Level::Warning, slab_logger::site!(), "low memory");
    sink.log_message(&message);
    sink.close();

    let lines = lines(&path);
    assert_eq!(lines.len(), 1);
    let line = &lines[0];
    // [elapsed][thread][level][category] text
    assert!(line.starts_with('['));
    let fields: Vec<&str> = line.splitn(5, ']').collect();
    assert_eq!(fields[0].len(), 11, "elapsed is 10 wide: {line}");
    assert_eq!(fields[1].len(), 6, "thread hash is 5 wide: {line}");
    assert_eq!(fields[2], "[Warning  ");
    assert_eq!(fields[3], "[General");
    assert_eq!(fields[4], " low memory");
}

#[test]
fn test_json_line_shape() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("game.json");
    let sink = JsonSink::try_open(&path, false).unwrap();
    let allocator = Arc::new(SlabAllocator::new());

    let data = serde_json::json!({"slot": 4, "ok": true}).as_object().cloned().unwrap();
    let message = allocate_log_structured(
        &allocator,
        &LOG_GENERAL,
        Level::Error,
        slab_logger::site!(),
        format_args!("save {} failed", 4),
        data,
    );
    sink.log_message(&message);
    let plain = allocate_log(&allocator, &LOG_GENERAL, Level::Info, slab_logger::site!(), "plain");
    sink.log_message(&plain);
    sink.flush(true);

    let lines = lines(&path);
    assert_eq!(lines.len(), 2);
    let first: Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(first["category"], "General");
    assert_eq!(first["severity"], "Error");
    assert_eq!(first["message"], "save 4 failed");
    assert_eq!(first["data"]["slot"], 4);
    assert!(first["tid"].is_u64());
    assert!(first["timestamp"].as_str().unwrap().contains('T'));

    let second: Value = serde_json::from_str(&lines[1]).unwrap();
    assert!(second["data"].is_null());
}

#[test]
fn test_roll_on_open_moves_old_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.log");
    fs::write(&path, "previous run\n").unwrap();

    let sink = FileSink::try_open(&path, true).unwrap();
    sink.close();
    let second = FileSink::try_open(&path, true).unwrap();
    second.close();

    let mut names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    assert_eq!(names.len(), 3, "current file plus two rolled ones: {names:?}");
    assert!(names.contains(&"run.log".to_owned()));
    let rolled: Vec<&String> = names.iter().filter(|n| n.starts_with("run-")).collect();
    assert_eq!(rolled.len(), 2);
    assert!(rolled.iter().all(|n| n.ends_with(".log")));
    let contents: Vec<String> = rolled
        .iter()
        .map(|n| fs::read_to_string(dir.path().join(n)).unwrap())
        .collect();
    assert!(contents.contains(&"previous run\n".to_owned()));
}

#[test]
fn test_append_without_roll() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/dir/app.log");

    for text in ["first", "second"] {
        let sink = FileSink::try_open(&path, false).unwrap();
        let allocator = Arc::new(SlabAllocator::new());
        let message = allocate_log(&allocator, &LOG_GENERAL, Level::Info, slab_logger::site!(), text);
        sink.log_message(&message);
        sink.close();
    }

    let lines = lines(&path);
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("first"));
    assert!(lines[1].ends_with("second"));
}

#[test]
fn test_context_writes_json_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ctx.json");
    let config = LoggerConfig::default()
        .with_debugger_attached(false)
        .with_log_file(&path, false);
    let context = LoggerContext::create(config);
    context.start().unwrap();

    log_structured!(context, LOG_GENERAL, Level::Info, { "frame": 12 }, "frame {} done", 12);
    context.shutdown().unwrap();

    let lines = lines(&path);
    assert_eq!(lines.len(), 1);
    let record: Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(record["message"], "frame 12 done");
    assert_eq!(record["data"]["frame"], 12);
}

#[test]
fn test_context_writes_text_with_flag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ctx.log");
    let config = LoggerConfig::from_args(["-LOGTxt"])
        .with_debugger_attached(false)
        .with_log_file(&path, false);
    let context = LoggerContext::create(config);
    log_record!(context, LOG_GENERAL, Level::Info, "from before start");
    context.start().unwrap();
    log_record!(context, LOG_GENERAL, Level::Error, "after start");
    context.shutdown().unwrap();

    let lines = lines(&path);
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("[Info     ][General] from before start"));
    assert!(lines[1].ends_with("[Error    ][General] after start"));
}
