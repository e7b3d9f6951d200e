// Tests for t3make
//
//  Copyright (C) 2014-2022 Ryan Specialty Group, LLC.
//
//  This file is part of t3make.
//
//  This program is free software: you can redistribute it and/or modify
//  it under the terms of the GNU General Public License as published by
//  the Free Software Foundation, either version 3 of the License, or
//  (at your option) any later version.
//
//  This program is distributed in the hope that it will be useful,
//  but WITHOUT ANY WARRANTY; without even the implied warranty of
//  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//  GNU General Public License for more details.
//
//  You should have received a copy of the GNU General Public License
//  along with this program.  If not, see <http://www.gnu.org/licenses/>.


use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::{fs, path::Path, process::Command};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const GAME: &str = r#"
object room;
room.name = "hall";
object lamp;
lamp.name = "lamp";
"#;

fn project(files: &[(&str, &str)]) -> Result<TempDir, std::io::Error> {
    let dir = tempfile::tempdir()?;

    for (name, text) in files {
        fs::write(dir.path().join(name), text)?;
    }

    Ok(dir)
}

fn t3make(dir: &Path) -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("t3make")?;
    cmd.current_dir(dir).env_remove("TADSLIB").env_remove("T3MAKE_LOG");

    Ok(cmd)
}

#[test]
fn no_arguments_prints_usage() -> TestResult {
    let dir = project(&[])?;

    t3make(dir.path())?
        .assert()
        .failure()
        .code(exitcode::USAGE)
        .stdout(predicate::str::contains("Usage:"));

    Ok(())
}

#[test]
fn invalid_option() -> TestResult {
    let dir = project(&[])?;

    t3make(dir.path())?
        .arg("-bogus")
        .arg("game.t")
        .assert()
        .failure()
        .code(exitcode::USAGE)
        .stderr(predicate::str::contains("Unrecognized option"));

    Ok(())
}

#[test]
fn builds_image_from_source() -> TestResult {
    let dir = project(&[("game.t", GAME)])?;

    t3make(dir.path())?
        .args(["-nobanner", "-nodef", "game.t"])
        .assert()
        .success();

    let image = fs::read(dir.path().join("game.t3"))?;
    assert_eq!(&b"T3-image\r\n\x1a"[..], &image[..11]);

    assert!(dir.path().join("game.t3s").exists());
    assert!(dir.path().join("game.t3o").exists());

    Ok(())
}

#[test]
fn compile_only_skips_link() -> TestResult {
    let dir = project(&[("game.t", GAME)])?;

    t3make(dir.path())?
        .args(["-nobanner", "-c", "game.t"])
        .assert()
        .success();

    assert!(dir.path().join("game.t3o").exists());
    assert!(!dir.path().join("game.t3").exists());

    Ok(())
}

#[test]
fn compile_error_fails_build() -> TestResult {
    let dir = project(&[("bad.t", "object box: crate;\n")])?;

    t3make(dir.path())?
        .args(["-nobanner", "-nodef", "bad.t"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("undefined symbol \"crate\""))
        .stdout(predicate::str::contains("Errors:   1"));

    assert!(!dir.path().join("bad.t3").exists());

    Ok(())
}

#[test]
fn default_project_file_is_read() -> TestResult {
    let dir = project(&[
        ("game.t", GAME),
        ("Makefile.t3m", "-nobanner -nodef\n-o out.t3\n-source game.t\n"),
    ])?;

    t3make(dir.path())?.assert().success();

    assert!(dir.path().join("out.t3").exists());

    Ok(())
}

#[test]
fn missing_option_file() -> TestResult {
    let dir = project(&[])?;

    t3make(dir.path())?
        .args(["-nobanner", "-f", "nothere"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("unable to read option file"));

    Ok(())
}

#[test]
fn nodef_library_with_excluded_member() -> TestResult {
    let dir = project(&[
        ("L.tl", "nodef\nsource: x\nsource: y\n"),
        ("x.t", "object gone;\n"),
        ("y.t", GAME),
    ])?;

    t3make(dir.path())?
        .args(["-nobanner", "-o", "game.t3", "-lib", "L.tl", "-x", "x"])
        .assert()
        .success();

    assert!(dir.path().join("game.t3").exists());
    assert!(dir.path().join("y.t3o").exists());
    assert!(!dir.path().join("x.t3o").exists());
    assert!(!dir.path().join("_main.t3o").exists());

    Ok(())
}

#[test]
fn library_without_nodef_adds_main() -> TestResult {
    let dir = project(&[("L.tl", "source: y\n"), ("y.t", GAME)])?;

    fs::create_dir(dir.path().join("sys"))?;
    fs::write(dir.path().join("sys").join("_main.t"), "object mainobj;\n")?;

    t3make(dir.path())?
        .args(["-nobanner", "-FL", "sys", "-o", "game.t3", "-lib", "L.tl"])
        .assert()
        .success();

    assert!(dir.path().join("game.t3").exists());
    assert!(dir.path().join("y.t3o").exists());
    assert!(dir.path().join("_main.t3o").exists());

    Ok(())
}
