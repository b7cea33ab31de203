// tests/args.rs

use std::error::Error;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use ingestflow::errors::EngineError;
use ingestflow::store::Package;
use ingestflow::types::UnitType;
use ingestflow::workflow::{resolve_arguments, ArgContext, FileItem};
use uuid::Uuid;

type TestResult = Result<(), Box<dyn Error>>;

fn args(template: &[&str]) -> Vec<String> {
    template.iter().map(|s| s.to_string()).collect()
}

fn context<'a>(package: &'a Package, file: Option<&'a FileItem>) -> ArgContext<'a> {
    ArgContext {
        package,
        shared_dir: Path::new("/var/shared"),
        job_id: Uuid::nil(),
        task_id: Uuid::nil(),
        now: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        file,
    }
}

#[test]
fn package_placeholders_resolve() -> TestResult {
    let uuid = Uuid::new_v4();
    let pkg = Package::new(
        uuid,
        UnitType::Sip,
        format!("/var/shared/currentlyProcessing/photos-{uuid}/"),
        None,
    );
    let ctx = context(&pkg, None);

    let resolved = resolve_arguments(
        &args(&[
            "%SIPUUID%",
            "%SIPName%",
            "%SIPDirectory%",
            "%SIPDirectoryBasename%",
            "%unitType%",
            "%sharedPath%",
            "--at=%date%",
        ]),
        &ctx,
        None,
    )?;

    assert_eq!(resolved[0], uuid.to_string());
    assert_eq!(resolved[1], "photos");
    assert_eq!(resolved[2], pkg.location);
    assert_eq!(resolved[3], format!("photos-{uuid}"));
    assert_eq!(resolved[4], "SIP");
    assert_eq!(resolved[5], "/var/shared/");
    assert!(resolved[6].starts_with("--at=2024-05-01T12:00:00"));
    Ok(())
}

#[test]
fn literal_text_is_kept_around_placeholders() -> TestResult {
    let pkg = Package::new(Uuid::new_v4(), UnitType::Transfer, "/in/t1/", None);
    let ctx = context(&pkg, None);
    let resolved = resolve_arguments(&args(&["%SIPDirectory%logs/out.txt", "plain"]), &ctx, None)?;
    assert_eq!(resolved, vec!["/in/t1/logs/out.txt".to_string(), "plain".to_string()]);
    Ok(())
}

#[test]
fn file_placeholders_need_a_file() -> TestResult {
    let pkg = Package::new(Uuid::new_v4(), UnitType::Transfer, "/in/t1/", None);

    let no_file = context(&pkg, None);
    assert!(matches!(
        resolve_arguments(&args(&["%inputFile%"]), &no_file, None),
        Err(EngineError::Argument(_))
    ));

    let file = FileItem {
        path: PathBuf::from("/in/t1/objects/a.tif"),
        relative: "objects/a.tif".to_string(),
    };
    let with_file = context(&pkg, Some(&file));
    let resolved = resolve_arguments(
        &args(&["%inputFile%", "%relativeLocation%", "%fileUUID%"]),
        &with_file,
        None,
    )?;
    assert_eq!(resolved[0], "/in/t1/objects/a.tif");
    assert_eq!(resolved[1], "objects/a.tif");
    assert_eq!(resolved[2], file.uuid(pkg.uuid).to_string());
    Ok(())
}

#[test]
fn file_uuid_is_stable_per_package() {
    let pkg = Uuid::new_v4();
    let file = FileItem {
        path: PathBuf::from("/x/a"),
        relative: "a".to_string(),
    };
    assert_eq!(file.uuid(pkg), file.uuid(pkg));
    assert_ne!(file.uuid(pkg), file.uuid(Uuid::new_v4()));
}

#[test]
fn unknown_placeholder_is_an_error() {
    let pkg = Package::new(Uuid::new_v4(), UnitType::Transfer, "/in/t1/", None);
    let ctx = context(&pkg, None);
    match resolve_arguments(&args(&["%nope%"]), &ctx, None) {
        Err(EngineError::Argument(msg)) => assert!(msg.contains("%nope%")),
        other => panic!("expected argument error, got {other:?}"),
    }
}

#[test]
fn declared_parameter_count_is_enforced() {
    let pkg = Package::new(Uuid::new_v4(), UnitType::Transfer, "/in/t1/", None);
    let ctx = context(&pkg, None);
    assert!(matches!(
        resolve_arguments(&args(&["%SIPUUID%"]), &ctx, Some(2)),
        Err(EngineError::Argument(_))
    ));
    assert!(resolve_arguments(&args(&["%SIPUUID%", "x"]), &ctx, Some(2)).is_ok());
}
