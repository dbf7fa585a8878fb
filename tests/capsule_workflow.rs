// tests/capsule_workflow.rs

//! End-to-end tests for minting, verifying and running capsules.

mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use capsule::capsule::format::{self, CapsuleBody, DEFAULT_PAYLOAD_WRAP};
use capsule::capsule::{
    LocatedCapsule, MintRequest, RunOptions, SigningKeyPair, assemble, encoder, meta, run, verify,
};
use capsule::{Error, GENESIS};
use common::{Fixture, keyring_for, list_dir, setup};
use std::fs;

const ECHO_HI: &[u8] = b"echo hi\n";

/// Byte range of the metadata line and the payload lines
fn tamperable_ranges(bytes: &[u8]) -> Vec<std::ops::Range<usize>> {
    let text = std::str::from_utf8(bytes).unwrap();
    let meta_start = text.find('\n').unwrap() + 1;
    let meta_end = meta_start + text[meta_start..].find('\n').unwrap();
    let payload_start = text.find("<<PAYLOAD>>\n").unwrap() + "<<PAYLOAD>>\n".len();
    let payload_end = text.find("\n</CAPSULE>").unwrap();
    vec![meta_start..meta_end, payload_start..payload_end]
}

#[test]
fn test_mint_verify_roundtrip() {
    let fx = setup();
    let request = MintRequest::new("Say hi", "prints a greeting")
        .with_id("cap-roundtrip")
        .with_session("session-1")
        .with_provenance("ticket", "OPS-12");
    let capsule = fx.mint(ECHO_HI, &request);
    let path = fx.path("hi.capsule");
    capsule.write_to(&path).unwrap();

    let verified = LocatedCapsule::open(&path).unwrap().verify(&fx.keyring).unwrap();
    assert_eq!(verified.payload(), ECHO_HI);

    let meta = verified.metadata();
    assert_eq!(meta.capsule_id, "cap-roundtrip");
    assert_eq!(meta.title, "Say hi");
    assert_eq!(meta.purpose, "prints a greeting");
    assert_eq!(meta.session_id, "session-1");
    assert_eq!(meta.chain_prev, GENESIS);
    assert_eq!(meta.payload_descriptor.size, ECHO_HI.len() as u64);
    assert_eq!(meta.provenance.get("ticket").map(String::as_str), Some("OPS-12"));
    assert_eq!(meta, capsule.metadata());
    assert_eq!(verified.signer().key_id.as_deref(), Some("test-signer"));
}

#[test]
fn test_capsule_file_layout() {
    let fx = setup();
    let (_, path) = fx.mint_to_file(ECHO_HI, "layout.capsule");
    let text = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines[0], "<<CAPSULE:V1>>");
    assert!(lines[1].starts_with('{'));
    assert_eq!(lines[2], "<<PAYLOAD>>");
    assert_eq!(lines[3], BASE64.encode(ECHO_HI));
    assert_eq!(lines[4], "</CAPSULE>");
    assert_eq!(lines[5], "-----BEGIN SIGNATURE-----");
    assert_eq!(*lines.last().unwrap(), "-----END SIGNATURE-----");
    assert!(text.ends_with('\n'));
}

#[test]
fn test_verify_is_repeatable_and_side_effect_free() {
    let fx = setup();
    let (_, path) = fx.mint_to_file(ECHO_HI, "repeat.capsule");
    let before_bytes = fs::read(&path).unwrap();
    let before_dir = list_dir(fx.dir.path());
    let before_ledger = fs::read(fx.ledger.path()).unwrap();

    let first = verify(&path, &fx.keyring).unwrap();
    let second = verify(&path, &fx.keyring).unwrap();

    assert_eq!(first, second);
    assert_eq!(fs::read(&path).unwrap(), before_bytes);
    assert_eq!(list_dir(fx.dir.path()), before_dir);
    assert_eq!(fs::read(fx.ledger.path()).unwrap(), before_ledger);
}

#[test]
fn test_any_flipped_byte_is_rejected() {
    let fx = setup();
    let payload = b"#!/bin/sh\nset -e\nprintf 'building %s\\n' \"$1\"\ntouch \"$1/done\"\n";
    let capsule = fx.mint(payload, &MintRequest::new("build", "touches a marker"));
    let original = capsule.as_bytes().to_vec();

    let mut checked = 0;
    for range in tamperable_ranges(&original) {
        for i in range {
            let mut tampered = original.clone();
            tampered[i] ^= 0x01;
            if tampered[i] == b'\n' {
                continue;
            }
            let err = LocatedCapsule::from_bytes(tampered)
                .and_then(|c| c.verify(&fx.keyring))
                .expect_err("tampered capsule must be rejected");
            assert!(
                matches!(err, Error::SignatureInvalid(_) | Error::HashMismatch { .. }),
                "byte {}: unexpected error {}",
                i,
                err
            );
            checked += 1;
        }
    }
    assert!(checked > 100);
}

#[test]
fn test_tampered_payload_fails_signature() {
    let fx = setup();
    let capsule = fx.mint(ECHO_HI, &MintRequest::new("hi", "greet"));
    let text = String::from_utf8(capsule.into_bytes()).unwrap();

    let evil = BASE64.encode(b"rm -rf /\n");
    let tampered = text.replacen(&BASE64.encode(ECHO_HI), &evil, 1);
    assert_ne!(tampered, text);

    let err = LocatedCapsule::from_bytes(tampered.into_bytes())
        .unwrap()
        .verify(&fx.keyring)
        .unwrap_err();
    assert!(matches!(err, Error::SignatureInvalid(_)), "got {}", err);
}

#[test]
fn test_signed_capsule_with_wrong_self_hash() {
    let fx = setup();
    let mut meta = fx.mint(ECHO_HI, &MintRequest::new("hi", "greet")).metadata().clone();
    meta.title = "renamed after sealing".into();

    let bytes = assemble(&meta, ECHO_HI, &fx.key, DEFAULT_PAYLOAD_WRAP).unwrap();
    let err = LocatedCapsule::from_bytes(bytes).unwrap().verify(&fx.keyring).unwrap_err();
    assert!(
        matches!(err, Error::HashMismatch { field: "self_hash", .. }),
        "got {}",
        err
    );
}

#[test]
fn test_signed_capsule_with_wrong_payload() {
    let fx = setup();
    let meta = fx.mint(ECHO_HI, &MintRequest::new("hi", "greet")).metadata().clone();

    // Correctly sealed and signed, but the descriptor describes another payload
    let bytes = assemble(&meta, b"echo bye\n", &fx.key, DEFAULT_PAYLOAD_WRAP).unwrap();
    let err = LocatedCapsule::from_bytes(bytes).unwrap().verify(&fx.keyring).unwrap_err();
    assert!(matches!(err, Error::HashMismatch { .. }), "got {}", err);
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_undecodable_payload_never_runs() {
    let fx = setup();
    let meta = fx.mint(ECHO_HI, &MintRequest::new("hi", "greet")).metadata().clone();

    let body = CapsuleBody {
        metadata_line: encoder::sealed_bytes(&meta).unwrap(),
        payload_b64: "ZWNobyBoaQo*".into(),
        wrap: DEFAULT_PAYLOAD_WRAP,
    };
    let region = body.render().unwrap();
    let armor = fx.key.sign(&region).to_armor().unwrap();
    let path = fx.path("bad-payload.capsule");
    fs::write(&path, format::attach_signature(region, &armor)).unwrap();

    let work = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let opts = RunOptions::default().with_work_root(work.path());
    let err = run(&path, out.path(), &fx.keyring, &opts).unwrap_err();

    assert!(err.is_untrusted(), "got {}", err);
    assert!(list_dir(work.path()).is_empty());
    assert!(list_dir(out.path()).is_empty());
}

#[test]
fn test_untrusted_signer_is_rejected_before_staging() {
    let fx = setup();
    let (_, path) = fx.mint_to_file(b"touch \"$1/ran\"\n", "marker.capsule");

    let stranger = SigningKeyPair::generate();
    let work = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let opts = RunOptions::default().with_work_root(work.path());
    let err = run(&path, out.path(), &keyring_for(&stranger), &opts).unwrap_err();

    assert!(matches!(err, Error::SignatureInvalid(_)), "got {}", err);
    assert!(list_dir(work.path()).is_empty());
    assert!(!out.path().join("ran").exists());
}

#[test]
fn test_duplicate_payload_marker_is_malformed() {
    let fx = setup();
    let capsule = fx.mint(ECHO_HI, &MintRequest::new("hi", "greet"));
    let text = String::from_utf8(capsule.into_bytes()).unwrap();
    let doubled = text.replacen("<<PAYLOAD>>\n", "<<PAYLOAD>>\n<<PAYLOAD>>\n", 1);
    let path = fx.path("doubled.capsule");
    fs::write(&path, doubled).unwrap();

    let err = verify(&path, &fx.keyring).unwrap_err();
    assert!(matches!(err, Error::MalformedCapsule(_)), "got {}", err);
}

#[test]
fn test_meta_reads_untrusted_capsules() {
    let fx = setup();
    let stranger = SigningKeyPair::generate();
    let stranger_fx = Fixture {
        key: stranger,
        ..setup()
    };
    let (capsule, path) = stranger_fx.mint_to_file(ECHO_HI, "stranger.capsule");

    assert!(verify(&path, &fx.keyring).is_err());
    let untrusted = meta(&path).unwrap();
    assert_eq!(untrusted.untrusted(), capsule.metadata());

    let malformed = fx.path("garbage.capsule");
    fs::write(&malformed, "not a capsule\n").unwrap();
    assert!(matches!(meta(&malformed), Err(Error::MalformedCapsule(_))));
}

#[cfg(unix)]
#[test]
fn test_run_echo_hi() {
    let fx = setup();
    let (_, path) = fx.mint_to_file(ECHO_HI, "hi.capsule");
    let out = tempfile::tempdir().unwrap();

    let result = run(&path, out.path(), &fx.keyring, &RunOptions::default().capture()).unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, b"hi\n");
}

#[cfg(unix)]
#[test]
fn test_run_writes_into_out_dir_and_cleans_up() {
    let fx = setup();
    let (capsule, path) = fx.mint_to_file(
        b"printf '%s' \"$CAPSULE_ID\" > \"$1/id.txt\"\n",
        "writer.capsule",
    );
    let work = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let opts = RunOptions::default().with_work_root(work.path());

    run(&path, out.path(), &fx.keyring, &opts).unwrap();

    let written = fs::read_to_string(out.path().join("id.txt")).unwrap();
    assert_eq!(written, capsule.metadata().capsule_id);
    assert!(list_dir(work.path()).is_empty());
}

#[cfg(unix)]
#[test]
fn test_failing_payload_reports_exit_code() {
    let fx = setup();
    let (_, path) = fx.mint_to_file(b"echo oops >&2\nexit 5\n", "fail.capsule");
    let out = tempfile::tempdir().unwrap();

    let err = run(&path, out.path(), &fx.keyring, &RunOptions::default().capture()).unwrap_err();
    match err {
        Error::ExecutionFailure { exit_code, .. } => assert_eq!(exit_code, Some(5)),
        other => panic!("expected ExecutionFailure, got {}", other),
    }
}
