use std::io::Write;

use listener::{decode_file, ListenerError};
use pipeline::{PullRequestId, TriggerEvent};

#[test]
fn decodes_a_payload_written_by_the_runner() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"{{
            "action": "closed",
            "number": 12,
            "pull_request": {{"number": 12, "state": "closed", "merged": false, "head": {{"ref": "feature"}}}},
            "repository": {{"full_name": "acme/widgets"}}
        }}"#
    )
    .expect("write payload");

    let event = decode_file("pull_request", file.path()).expect("decode");
    assert_eq!(
        event,
        Some(TriggerEvent::PullRequestClosed {
            pr: PullRequestId::new(12),
            merged: false,
        })
    );
}

#[test]
fn missing_payload_file_is_a_read_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = decode_file("issues", &dir.path().join("event.json")).expect_err("should fail");
    assert!(matches!(err, ListenerError::Read { .. }));
}
