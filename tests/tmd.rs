mod common;

use std::collections::HashSet;

use assert_matches::assert_matches;

use common::{Record, build_tmd};
use nus_sync::error::NusError;
use nus_sync::tmd::{self, DropReason, MAX_CONTENT_SIZE, MIN_TMD_SIZE, RECORD_SIZE};

#[test]
fn too_short_is_an_error() {
    let err = tmd::parse(&vec![0u8; MIN_TMD_SIZE - 1]).unwrap_err();
    assert_matches!(err, NusError::ManifestTooShort { len, .. } if len == MIN_TMD_SIZE - 1);
}

#[test]
fn header_only_with_zero_count_is_empty() {
    let parsed = tmd::parse(&build_tmd(0, 0, &[])).unwrap();
    assert!(parsed.contents.is_empty());
    assert!(!parsed.is_truncated());
}

#[test]
fn truncated_table_returns_preceding_records() {
    let mut raw = build_tmd(
        1,
        4,
        &[
            Record::raw(1, 0, 100),
            Record::raw(2, 1, 200),
            Record::raw(3, 2, 300),
        ],
    );
    // cut the third record in half
    raw.truncate(raw.len() - RECORD_SIZE / 2);

    let parsed = tmd::parse(&raw).unwrap();
    assert_eq!(parsed.declared_count, 4);
    assert_eq!(parsed.truncated_at, Some(2));
    let ids: Vec<_> = parsed.contents.iter().map(|c| c.content_id.as_str()).collect();
    assert_eq!(ids, vec!["00000001", "00000002"]);
}

#[test]
fn filters_keep_unique_sane_records_in_order() {
    let raw = build_tmd(
        0,
        7,
        &[
            Record::raw(5, 0, 10),
            Record::raw(0, 0, 0),
            Record::raw(6, 1, 0),
            Record::raw(7, 2, MAX_CONTENT_SIZE + 1),
            Record::raw(5, 3, 99),
            Record::raw(2, 9, 20),
            Record::raw(0, 4, 30),
        ],
    );

    let parsed = tmd::parse(&raw).unwrap();

    let ids: Vec<_> = parsed.contents.iter().map(|c| c.content_id.as_str()).collect();
    assert_eq!(ids, vec!["00000005", "00000002", "00000000"]);
    assert_eq!(parsed.contents[0].size, 10);
    assert_eq!(parsed.contents[1].index, 9);

    let reasons: Vec<_> = parsed.dropped.iter().map(|d| d.reason).collect();
    assert_eq!(
        reasons,
        vec![
            DropReason::Padding,
            DropReason::SuspiciousSize,
            DropReason::SuspiciousSize,
            DropReason::Duplicate,
        ]
    );

    let unique: HashSet<_> = parsed.contents.iter().map(|c| &c.content_id).collect();
    assert_eq!(unique.len(), parsed.contents.len());
    assert!(
        parsed
            .contents
            .iter()
            .all(|c| c.size > 0 && c.size <= MAX_CONTENT_SIZE)
    );
}

#[test]
fn digest_is_lowercase_hex() {
    let record = Record {
        id: 0xdeadbeef,
        index: 0,
        size: 1,
        digest: [0xAB; 32],
    };
    let parsed = tmd::parse(&build_tmd(0, 1, &[record])).unwrap();
    assert_eq!(parsed.contents[0].content_id, "deadbeef");
    assert_eq!(parsed.contents[0].expected_digest, "ab".repeat(32));
}
