//! End-to-end rewrite tests: build blocks on disk, rewrite them through
//! the compactor (with and without deletion modifiers), and verify the
//! output block's series, stats, change log, and meta document.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use blockdb::block::BlockReader;
use blockdb::{
    Block, BlockMeta, BlockStats, BlockWriter, ChunkPool, DiskWriter, Interval, Intervals, Labels,
    Matcher, NullWriter, Sample, SeriesCursor, encode_samples,
};
use compact::{
    ChangeLog, Compactor, DeletionModifier, DeletionRequest, Modifier, SeriesProgressLogger,
    compacted_meta,
};

type SeriesFixture = (Vec<(&'static str, &'static str)>, Vec<Vec<(i64, f64)>>);

fn labels(pairs: &[(&str, &str)]) -> Labels {
    Labels::from_pairs(pairs.iter().map(|(n, v)| (*n, *v)))
}

/// The three-series block most cases start from, mirroring one sealed
/// block with mixed chunk layouts.
fn base_block() -> Vec<SeriesFixture> {
    vec![
        (
            vec![("a", "1")],
            vec![vec![(0, 0.0), (1, 1.0), (2, 2.0), (10, 10.0), (11, 11.0), (20, 20.0)]],
        ),
        (
            vec![("a", "2")],
            vec![
                vec![(0, 0.0), (1, 1.0), (2, 2.0)],
                vec![(10, 11.0), (11, 11.0), (20, 20.0)],
            ],
        ),
        (
            vec![("a", "3")],
            vec![vec![(0, 0.0), (1, 1.0), (2, 2.0), (10, 12.0), (11, 11.0), (20, 20.0)]],
        ),
    ]
}

fn create_block(dir: &Path, series: &[SeriesFixture]) {
    let mut sorted: Vec<(Labels, Vec<Vec<Sample>>)> = series
        .iter()
        .map(|(pairs, chunks)| {
            let chunks = chunks
                .iter()
                .map(|chunk| chunk.iter().map(|(t, v)| Sample::new(*t, *v)).collect())
                .collect();
            (labels(pairs), chunks)
        })
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut writer = DiskWriter::new(dir).unwrap();

    let mut symbols = BTreeSet::new();
    for (lset, _) in &sorted {
        for label in lset {
            symbols.insert(label.name.clone());
            symbols.insert(label.value.clone());
        }
    }
    for symbol in &symbols {
        writer.add_symbol(symbol).unwrap();
    }

    for (lset, chunk_samples) in &sorted {
        let mut chunks = Vec::new();
        for samples in chunk_samples {
            chunks.push(encode_samples(samples).unwrap());
        }
        writer.write_chunks(&mut chunks).unwrap();
        writer.add_series(lset, &chunks).unwrap();
    }

    let stats = writer.flush().unwrap();
    let (min_time, max_time) = writer.time_range().unwrap_or((i64::MAX, i64::MIN));
    let mut meta = BlockMeta::new(uuid::Uuid::new_v4(), min_time, max_time);
    meta.stats = stats;
    meta.write_to_dir(dir).unwrap();
}

fn read_block_series(dir: &Path) -> Vec<(Labels, Vec<Vec<Sample>>)> {
    let block = Block::open(dir).unwrap();
    let mut cursor = block.series_cursor().unwrap();
    let mut out = Vec::new();
    while let Some(entry) = cursor.next().unwrap() {
        let chunks = entry
            .chunks
            .iter()
            .map(|c| c.iter().map(|s| s.unwrap()).collect())
            .collect();
        out.push((entry.labels, chunks));
    }
    cursor.close().unwrap();
    out
}

fn expected_series(series: &[SeriesFixture]) -> Vec<(Labels, Vec<Vec<Sample>>)> {
    let mut out: Vec<(Labels, Vec<Vec<Sample>>)> = series
        .iter()
        .map(|(pairs, chunks)| {
            let chunks = chunks
                .iter()
                .map(|chunk| chunk.iter().map(|(t, v)| Sample::new(*t, *v)).collect())
                .collect();
            (labels(pairs), chunks)
        })
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

struct RewriteOutput {
    stats: BlockStats,
    changes: String,
    output_dir: std::path::PathBuf,
    _tmp: tempfile::TempDir,
}

/// Build one block per input fixture, rewrite them with the given
/// deletion requests, and return the flushed result.
fn rewrite(inputs: &[Vec<SeriesFixture>], requests: Vec<DeletionRequest>) -> RewriteOutput {
    let tmp = tempfile::tempdir().unwrap();
    let mut blocks = Vec::new();
    for (i, input) in inputs.iter().enumerate() {
        let dir = tmp.path().join(format!("input-{}", i + 1));
        create_block(&dir, input);
        blocks.push(Block::open(&dir).unwrap());
    }
    let readers: Vec<&dyn BlockReader> = blocks.iter().map(|b| b as &dyn BlockReader).collect();
    let total_series: usize = inputs.iter().map(|b| b.len()).sum();

    let output_dir = tmp.path().join("output");
    let mut writer = DiskWriter::new(&output_dir).unwrap();

    let compactor = Compactor::new(Arc::new(ChunkPool::new()));
    let deletion = DeletionModifier::new(requests);
    let modifiers: Vec<&dyn Modifier> = vec![&deletion];
    let changes = ChangeLog::new(Vec::new());
    let progress = SeriesProgressLogger::new(total_series);

    let stats = compactor
        .write_series(
            &CancellationToken::new(),
            &readers,
            &mut writer,
            &changes,
            &progress,
            &modifiers,
        )
        .unwrap();

    let meta = compacted_meta(&readers, stats, writer.time_range());
    meta.write_to_dir(&output_dir).unwrap();

    RewriteOutput {
        stats,
        changes: String::from_utf8(changes.into_inner()).unwrap(),
        output_dir,
        _tmp: tmp,
    }
}

#[test]
fn should_fail_with_no_readers() {
    // given
    let compactor = Compactor::new(Arc::new(ChunkPool::new()));
    let mut writer = NullWriter::new();
    let changes = ChangeLog::new(Vec::new());
    let progress = SeriesProgressLogger::new(0);

    // when
    let err = compactor
        .write_series(
            &CancellationToken::new(),
            &[],
            &mut writer,
            &changes,
            &progress,
            &[],
        )
        .unwrap_err();

    // then
    assert_eq!(err.to_string(), "cannot write from no readers");
}

#[test]
fn should_rewrite_single_block_unchanged_without_modifiers() {
    // given/when
    let out = rewrite(&[base_block()], vec![]);

    // then
    assert_eq!(read_block_series(&out.output_dir), expected_series(&base_block()));
    assert_eq!(
        out.stats,
        BlockStats {
            num_samples: 18,
            num_series: 3,
            num_chunks: 4,
        }
    );
    assert!(out.changes.is_empty());
}

#[test]
fn should_compact_two_blocks_concatenating_chunks() {
    // given
    let block1: Vec<SeriesFixture> = vec![
        (vec![("a", "1")], vec![vec![(0, 0.0), (1, 1.0), (2, 2.0)]]),
        (vec![("a", "2")], vec![vec![(0, 0.0), (1, 1.0), (2, 2.0)]]),
        (vec![("a", "3")], vec![vec![(0, 0.0), (1, 1.0), (2, 2.0)]]),
    ];
    let block2: Vec<SeriesFixture> = vec![
        (vec![("a", "1")], vec![vec![(10, 10.0), (11, 11.0), (20, 20.0)]]),
        (vec![("a", "2")], vec![vec![(10, 11.0), (11, 11.0), (20, 20.0)]]),
        (vec![("a", "3")], vec![vec![(10, 12.0), (11, 11.0), (20, 20.0)]]),
        (vec![("a", "4")], vec![vec![(10, 12.0), (11, 11.0), (20, 20.0)]]),
    ];

    // when
    let out = rewrite(&[block1, block2], vec![]);

    // then
    let expected: Vec<SeriesFixture> = vec![
        (
            vec![("a", "1")],
            vec![
                vec![(0, 0.0), (1, 1.0), (2, 2.0)],
                vec![(10, 10.0), (11, 11.0), (20, 20.0)],
            ],
        ),
        (
            vec![("a", "2")],
            vec![
                vec![(0, 0.0), (1, 1.0), (2, 2.0)],
                vec![(10, 11.0), (11, 11.0), (20, 20.0)],
            ],
        ),
        (
            vec![("a", "3")],
            vec![
                vec![(0, 0.0), (1, 1.0), (2, 2.0)],
                vec![(10, 12.0), (11, 11.0), (20, 20.0)],
            ],
        ),
        (vec![("a", "4")], vec![vec![(10, 12.0), (11, 11.0), (20, 20.0)]]),
    ];
    assert_eq!(read_block_series(&out.output_dir), expected_series(&expected));
    assert_eq!(
        out.stats,
        BlockStats {
            num_samples: 21,
            num_series: 4,
            num_chunks: 7,
        }
    );
    assert!(out.changes.is_empty());
}

#[test]
fn should_not_modify_with_empty_deletion_modifier() {
    // given/when: a deletion modifier carrying no requests at all
    let out = rewrite(&[base_block()], Vec::<DeletionRequest>::new());

    // then: byte-identical rewrite, nothing logged
    assert_eq!(read_block_series(&out.output_dir), expected_series(&base_block()));
    assert_eq!(
        out.stats,
        BlockStats {
            num_samples: 18,
            num_series: 3,
            num_chunks: 4,
        }
    );
    assert!(out.changes.is_empty());
}

#[test]
fn should_not_delete_when_requests_match_nothing() {
    // given: one request matches no series, the other misses all data
    let requests = vec![
        DeletionRequest::full_range(vec![Matcher::eq("a", "0")]),
        DeletionRequest::new(
            vec![Matcher::eq("a", "1")],
            Intervals::from_iter([Interval::new(i64::MIN, -1)]),
        ),
    ];

    // when
    let out = rewrite(&[base_block()], requests);

    // then
    assert_eq!(read_block_series(&out.output_dir), expected_series(&base_block()));
    assert_eq!(
        out.stats,
        BlockStats {
            num_samples: 18,
            num_series: 3,
            num_chunks: 4,
        }
    );
    assert!(out.changes.is_empty());
}

#[test]
fn should_treat_matching_request_without_intervals_as_noop() {
    // given: the matcher hits a=2 but the request names no intervals
    let requests = vec![DeletionRequest::new(
        vec![Matcher::eq("a", "2")],
        Intervals::new(),
    )];

    // when
    let out = rewrite(&[base_block()], requests);

    // then: matching without intervals deletes nothing
    assert_eq!(read_block_series(&out.output_dir), expected_series(&base_block()));
    assert!(out.changes.is_empty());
}

#[test]
fn should_delete_whole_series_with_full_range_interval() {
    // given
    let requests = vec![
        DeletionRequest::full_range(vec![Matcher::eq("a", "2")]),
        DeletionRequest::new(
            vec![Matcher::eq("a", "1")],
            Intervals::from_iter([Interval::new(i64::MIN, -1)]),
        ),
    ];

    // when
    let out = rewrite(&[base_block()], requests);

    // then
    let expected: Vec<SeriesFixture> = vec![
        (
            vec![("a", "1")],
            vec![vec![(0, 0.0), (1, 1.0), (2, 2.0), (10, 10.0), (11, 11.0), (20, 20.0)]],
        ),
        (
            vec![("a", "3")],
            vec![vec![(0, 0.0), (1, 1.0), (2, 2.0), (10, 12.0), (11, 11.0), (20, 20.0)]],
        ),
    ];
    assert_eq!(read_block_series(&out.output_dir), expected_series(&expected));
    assert_eq!(out.changes, "Deleted {a=\"2\"} [{0 20}]\n");
    assert_eq!(
        out.stats,
        BlockStats {
            num_samples: 12,
            num_series: 2,
            num_chunks: 2,
        }
    );
}

#[test]
fn should_delete_series_and_partial_range_of_another() {
    // given
    let requests = vec![
        DeletionRequest::full_range(vec![Matcher::eq("a", "2")]),
        DeletionRequest::new(
            vec![Matcher::eq("a", "1")],
            Intervals::from_iter([Interval::new(i64::MIN, -1)]),
        ),
        DeletionRequest::new(
            vec![Matcher::eq("a", "3")],
            Intervals::from_iter([Interval::new(10, 11)]),
        ),
    ];

    // when
    let out = rewrite(&[base_block()], requests);

    // then: a=2 dropped, a=3 rebuilt without t in [10, 11]
    let expected: Vec<SeriesFixture> = vec![
        (
            vec![("a", "1")],
            vec![vec![(0, 0.0), (1, 1.0), (2, 2.0), (10, 10.0), (11, 11.0), (20, 20.0)]],
        ),
        (
            vec![("a", "3")],
            vec![vec![(0, 0.0), (1, 1.0), (2, 2.0), (20, 20.0)]],
        ),
    ];
    assert_eq!(read_block_series(&out.output_dir), expected_series(&expected));
    assert_eq!(
        out.changes,
        "Deleted {a=\"2\"} [{0 20}]\nDeleted {a=\"3\"} [{10 11}]\n"
    );
    assert_eq!(
        out.stats,
        BlockStats {
            num_samples: 10,
            num_series: 2,
            num_chunks: 2,
        }
    );
}

#[test]
fn should_delete_only_series_matching_every_matcher() {
    // given
    let input: Vec<SeriesFixture> = vec![
        (
            vec![("a", "1"), ("b", "1")],
            vec![vec![(0, 0.0), (1, 1.0), (2, 2.0), (10, 10.0), (11, 11.0), (20, 20.0)]],
        ),
        (
            vec![("a", "1"), ("b", "2")],
            vec![
                vec![(0, 0.0), (1, 1.0), (2, 2.0)],
                vec![(10, 11.0), (11, 11.0), (20, 20.0)],
            ],
        ),
        (
            vec![("a", "3")],
            vec![vec![(0, 0.0), (1, 1.0), (2, 2.0), (10, 12.0), (11, 11.0), (20, 20.0)]],
        ),
    ];
    let requests = vec![DeletionRequest::full_range(vec![
        Matcher::eq("a", "1"),
        Matcher::eq("b", "2"),
    ])];

    // when
    let out = rewrite(&[input.clone()], requests);

    // then
    let expected: Vec<SeriesFixture> = vec![input[0].clone(), input[2].clone()];
    assert_eq!(read_block_series(&out.output_dir), expected_series(&expected));
    assert_eq!(out.changes, "Deleted {a=\"1\", b=\"2\"} [{0 20}]\n");
    assert_eq!(
        out.stats,
        BlockStats {
            num_samples: 12,
            num_series: 2,
            num_chunks: 2,
        }
    );
}

#[test]
fn should_record_sources_in_compacted_meta() {
    // given
    let tmp = tempfile::tempdir().unwrap();
    let dir1 = tmp.path().join("input-1");
    let dir2 = tmp.path().join("input-2");
    create_block(&dir1, &base_block());
    create_block(&dir2, &base_block()[..1].to_vec());
    let block1 = Block::open(&dir1).unwrap();
    let block2 = Block::open(&dir2).unwrap();
    let readers: Vec<&dyn BlockReader> = vec![&block1, &block2];

    // when
    let meta = compacted_meta(
        &readers,
        BlockStats {
            num_samples: 1,
            num_series: 1,
            num_chunks: 1,
        },
        Some((0, 20)),
    );

    // then
    assert_eq!(meta.version, 1);
    assert_eq!(meta.min_time, 0);
    assert_eq!(meta.max_time, 20);
    assert_eq!(
        meta.compaction.sources,
        vec![block1.meta().ulid, block2.meta().ulid]
    );
    assert_ne!(meta.ulid, block1.meta().ulid);
}

#[test]
fn should_produce_stats_and_changes_without_output_on_dry_run() {
    // given
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("input-1");
    create_block(&dir, &base_block());
    let block = Block::open(&dir).unwrap();
    let readers: Vec<&dyn BlockReader> = vec![&block];

    let output_dir = tmp.path().join("output");
    let compactor = Compactor::new_dry_run(Arc::new(ChunkPool::new()));
    let deletion = DeletionModifier::new(vec![DeletionRequest::full_range(vec![Matcher::eq(
        "a", "2",
    )])]);
    let modifiers: Vec<&dyn Modifier> = vec![&deletion];
    let changes = ChangeLog::new(Vec::new());
    let progress = SeriesProgressLogger::new(3);
    let mut writer = DiskWriter::new(&output_dir).unwrap();

    // when
    let stats = compactor
        .write_series(
            &CancellationToken::new(),
            &readers,
            &mut writer,
            &changes,
            &progress,
            &modifiers,
        )
        .unwrap();

    // then: same stats and change log as a real run, but no block files
    assert_eq!(
        stats,
        BlockStats {
            num_samples: 12,
            num_series: 2,
            num_chunks: 2,
        }
    );
    assert_eq!(
        String::from_utf8(changes.into_inner()).unwrap(),
        "Deleted {a=\"2\"} [{0 20}]\n"
    );
    assert!(!output_dir.join("index").exists());
    assert!(!output_dir.join("chunks").exists());
}

#[test]
fn should_cancel_before_writing_series() {
    // given
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("input-1");
    create_block(&dir, &base_block());
    let block = Block::open(&dir).unwrap();
    let readers: Vec<&dyn BlockReader> = vec![&block];

    let compactor = Compactor::new(Arc::new(ChunkPool::new()));
    let changes = ChangeLog::new(Vec::new());
    let progress = SeriesProgressLogger::new(3);
    let mut writer = NullWriter::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    // when
    let err = compactor
        .write_series(&cancel, &readers, &mut writer, &changes, &progress, &[])
        .unwrap_err();

    // then
    assert!(matches!(err, compact::Error::Canceled));
}

#[test]
fn should_round_trip_block_and_recount_stats() {
    // given: rewrite once, then rewrite the output again with no modifiers
    let first = rewrite(&[base_block()], vec![]);
    let reopened = Block::open(&first.output_dir).unwrap();
    let readers: Vec<&dyn BlockReader> = vec![&reopened];

    let tmp = tempfile::tempdir().unwrap();
    let output_dir = tmp.path().join("second");
    let mut writer = DiskWriter::new(&output_dir).unwrap();
    let compactor = Compactor::new(Arc::new(ChunkPool::new()));
    let changes = ChangeLog::new(Vec::new());
    let progress = SeriesProgressLogger::new(3);

    // when
    let stats = compactor
        .write_series(
            &CancellationToken::new(),
            &readers,
            &mut writer,
            &changes,
            &progress,
            &[],
        )
        .unwrap();
    let meta = compacted_meta(&readers, stats, writer.time_range());
    meta.write_to_dir(&output_dir).unwrap();

    // then: series identical, stats match a recount
    assert_eq!(
        read_block_series(&output_dir),
        read_block_series(&first.output_dir)
    );
    assert_eq!(stats, first.stats);
    assert_eq!(stats, reopened.meta().stats);
}
