use log::LevelFilter;
use paintcore::logger;

#[test]
fn session_log_receives_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs").join("session.log");
    logger::init_with_path(&path, LevelFilter::Debug).unwrap();
    assert_eq!(logger::log_path(), Some(&path));

    log::info!("canvas opened");
    log::debug!("stamp cache rebuilt");
    assert!(logger::init_with_path(&path, LevelFilter::Info).is_err());

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("session started"));
    assert!(text.contains("[INFO] canvas opened"));
    assert!(text.contains("[DEBUG] stamp cache rebuilt"));
}
