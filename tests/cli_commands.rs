use predicates::prelude::*;

fn write_config(dir: &std::path::Path, name: &str) {
    std::fs::write(
        dir.join(name),
        r#"{
  "id": "lidl-20250106",
  "cover_image": "http://127.0.0.1:9/cover",
  "first_page": "http://127.0.0.1:9/flyer/page/1",
  "last_page": "http://127.0.0.1:9/flyer/page/3"
}
"#,
    )
    .unwrap();
}

#[test]
fn stores_lists_json_configs_sorted() {
    let temp = tempfile::TempDir::new().unwrap();
    write_config(temp.path(), "penny.json");
    write_config(temp.path(), "lidl.json");
    std::fs::write(temp.path().join("README.md"), "notes").unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("flyerscrape");
    cmd.args(["stores", "--configs"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout("lidl.json\npenny.json\n");
}

#[test]
fn list_prints_empty_array_without_index() {
    let temp = tempfile::TempDir::new().unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("flyerscrape");
    cmd.args(["list", "--data-dir"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout("[]\n");
}

#[test]
fn acquire_with_inverted_range_fails() {
    let temp = tempfile::TempDir::new().unwrap();
    let config = temp.path().join("bad.json");
    std::fs::write(
        &config,
        r#"{
  "id": "bad",
  "cover_image": "http://127.0.0.1:9/cover",
  "first_page": "http://127.0.0.1:9/flyer/page/7",
  "last_page": "http://127.0.0.1:9/flyer/page/2"
}
"#,
    )
    .unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("flyerscrape");
    cmd.arg("acquire")
        .arg("--config")
        .arg(&config)
        .arg("--data-dir")
        .arg(temp.path().join("data"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid page range"));
}

#[test]
fn acquire_with_service_renderer_requires_endpoint() {
    let temp = tempfile::TempDir::new().unwrap();
    write_config(temp.path(), "lidl.json");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("flyerscrape");
    cmd.env_remove("FLYERSCRAPE_RENDER_ENDPOINT")
        .arg("acquire")
        .arg("--config")
        .arg(temp.path().join("lidl.json"))
        .args(["--renderer", "service"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("render endpoint is required"));
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() {
    let temp = tempfile::TempDir::new().unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("flyerscrape");
    cmd.env("RUST_LOG", "debug")
        .args(["stores", "--configs"])
        .arg(temp.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));
}
