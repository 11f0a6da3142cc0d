use assert_cmd::Command;
use predicates::prelude::*;

fn ident_cli() -> Command {
    Command::cargo_bin("ident-cli").unwrap()
}

#[test]
fn version_prints_package_version() {
    ident_cli()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn keygen_prints_a_loadable_signing_key() {
    let output = ident_cli().args(["keygen", "--comment", "test"]).output().unwrap();
    assert!(output.status.success());

    let encoded = String::from_utf8(output.stdout).unwrap();
    let keys = ident_core::token::load_signing_key(encoded.trim()).unwrap();
    assert_eq!(keys.public.len(), 32);
}

#[test]
fn keygen_output_differs_between_runs() {
    let a = ident_cli().arg("keygen").output().unwrap().stdout;
    let b = ident_cli().arg("keygen").output().unwrap().stdout;
    assert_ne!(a, b);
}

#[test]
fn migrate_requires_database_url() {
    ident_cli()
        .arg("migrate")
        .env_remove("DATABASE_URL")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--database-url"));
}

#[test]
fn migrate_fails_on_unreachable_database() {
    ident_cli()
        .args([
            "migrate",
            "--database-url",
            "postgres://ident@127.0.0.1:1/ident",
            "--connect-timeout-secs",
            "1",
        ])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn unknown_command_fails() {
    ident_cli().arg("frobnicate").assert().failure();
}
