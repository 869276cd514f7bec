use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn camroll_help() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("camroll")?;
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Randomized camera-roll feed engine"));
    Ok(())
}

#[test]
fn camroll_assemble_without_credentials() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_home = TempDir::new()?;
    let mut cmd = Command::cargo_bin("camroll")?;
    cmd.arg("assemble");
    cmd.env("HOME", tmp_home.path());
    cmd.env_remove("CAMROLL_SUPABASE_URL");
    cmd.env_remove("CAMROLL_ANON_KEY");
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("CAMROLL_ANON_KEY"));
    Ok(())
}

#[test]
fn camroll_save_config_writes_file() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_home = TempDir::new()?;
    let mut cmd = Command::cargo_bin("camroll")?;
    cmd.arg("save-config");
    cmd.env("HOME", tmp_home.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Configuration saved"));
    assert!(tmp_home.path().join(".camroll").join("config").exists());
    Ok(())
}

#[test]
fn camroll_acquire_requires_id() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("camroll")?;
    cmd.arg("acquire");
    cmd.assert().failure();
    Ok(())
}
