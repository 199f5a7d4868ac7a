use std::collections::BTreeMap;
use std::sync::Arc;

use msgstream_api::{MsgPack, ShapeError, TsMsg};

use crate::error::StreamError;

/// Splits a batch into per-bucket batches.
///
/// `hash_keys[i]` holds the bucket key of every row of `msgs[i]`. Buckets
/// are returned in ascending order; an error means no bucket was produced.
pub type RepackFn =
    Arc<dyn Fn(&[Arc<dyn TsMsg>], &[Vec<i32>]) -> Result<BTreeMap<i32, MsgPack>, StreamError> + Send + Sync>;

type Buckets = BTreeMap<i32, Vec<Arc<dyn TsMsg>>>;

/// Row-level fan-out. Every message must carry parallel row sequences;
/// row `r` of `msgs[i]` goes to bucket `hash_keys[i][r]`.
///
/// Rows of one input message that share a bucket are gathered into a single
/// message of the same kind, in row order. Messages keep their input order
/// inside each bucket.
pub fn by_row(msgs: &[Arc<dyn TsMsg>], hash_keys: &[Vec<i32>]) -> Result<BTreeMap<i32, MsgPack>, StreamError> {
    check_key_count(msgs, hash_keys)?;
    let mut buckets = Buckets::new();
    for (index, (msg, keys)) in msgs.iter().zip(hash_keys).enumerate() {
        split_rows(index, msg, keys, &mut buckets)?;
    }
    Ok(into_packs(buckets))
}

/// Whole-message routing: each message needs exactly one key and lands in
/// that bucket unchanged.
pub fn by_message(msgs: &[Arc<dyn TsMsg>], hash_keys: &[Vec<i32>]) -> Result<BTreeMap<i32, MsgPack>, StreamError> {
    check_key_count(msgs, hash_keys)?;
    let mut buckets = Buckets::new();
    for (index, (msg, keys)) in msgs.iter().zip(hash_keys).enumerate() {
        route_whole(index, msg, keys, &mut buckets)?;
    }
    Ok(into_packs(buckets))
}

/// Row-level fan-out for row-splittable kinds, whole-message routing for
/// the rest. Used by a stream unless another repack function is set.
pub fn default_repack(
    msgs: &[Arc<dyn TsMsg>],
    hash_keys: &[Vec<i32>],
) -> Result<BTreeMap<i32, MsgPack>, StreamError> {
    check_key_count(msgs, hash_keys)?;
    let mut buckets = Buckets::new();
    for (index, (msg, keys)) in msgs.iter().zip(hash_keys).enumerate() {
        if msg.as_rows().is_some() {
            split_rows(index, msg, keys, &mut buckets)?;
        } else {
            route_whole(index, msg, keys, &mut buckets)?;
        }
    }
    Ok(into_packs(buckets))
}

fn check_key_count(msgs: &[Arc<dyn TsMsg>], hash_keys: &[Vec<i32>]) -> Result<(), StreamError> {
    if msgs.len() != hash_keys.len() {
        return Err(StreamError::KeyCountMismatch {
            messages: msgs.len(),
            keys: hash_keys.len(),
        });
    }
    Ok(())
}

fn split_rows(index: usize, msg: &Arc<dyn TsMsg>, keys: &[i32], buckets: &mut Buckets) -> Result<(), StreamError> {
    let rows = msg.as_rows().ok_or(StreamError::UnsupportedRepackKind {
        index,
        kind: msg.kind(),
    })?;
    let count = rows
        .row_count()
        .map_err(|source| StreamError::ShapeMismatch { index, source })?;
    msg.base()
        .validate_rows(count)
        .and_then(|()| ShapeError::check("hash_keys", count, keys.len()))
        .map_err(|source| StreamError::ShapeMismatch { index, source })?;

    let mut rows_by_bucket: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (row, &key) in keys.iter().enumerate() {
        rows_by_bucket.entry(key).or_default().push(row);
    }
    for (bucket, picked) in rows_by_bucket {
        buckets.entry(bucket).or_default().push(rows.slice_rows(&picked));
    }
    Ok(())
}

fn route_whole(index: usize, msg: &Arc<dyn TsMsg>, keys: &[i32], buckets: &mut Buckets) -> Result<(), StreamError> {
    match keys {
        [bucket] => {
            buckets.entry(*bucket).or_default().push(msg.clone());
            Ok(())
        }
        _ => Err(StreamError::ShapeMismatch {
            index,
            source: ShapeError::new("hash_keys", 1, keys.len()),
        }),
    }
}

fn into_packs(buckets: Buckets) -> BTreeMap<i32, MsgPack> {
    buckets
        .into_iter()
        .map(|(bucket, msgs)| (bucket, MsgPack::new(msgs)))
        .collect()
}

#[cfg(test)]
mod tests {
    use msgstream_api::{BaseMsg, Blob, DeleteMsg, InsertMsg, MsgKind, SearchMsg, TimeTickMsg, downcast};

    use super::*;

    fn insert(req_id: i64, hash: u32) -> Arc<dyn TsMsg> {
        Arc::new(InsertMsg {
            base: BaseMsg::new(0, 0, vec![hash]),
            req_id,
            collection_name: "Collection".into(),
            partition_tag: "Partition".into(),
            segment_id: 1,
            channel_id: "1".into(),
            proxy_id: 1,
            timestamps: vec![1],
            row_ids: vec![1],
            row_data: vec![Blob::default()],
        })
    }

    fn wide_insert() -> Arc<dyn TsMsg> {
        Arc::new(InsertMsg {
            base: BaseMsg::new(5, 9, vec![0, 1, 2, 3]),
            req_id: 7,
            collection_name: "books".into(),
            partition_tag: "2024".into(),
            segment_id: 11,
            channel_id: "insert-0".into(),
            proxy_id: 2,
            timestamps: vec![5, 6, 7, 9],
            row_ids: vec![100, 101, 102, 103],
            row_data: (0u8..4).map(|b| Blob::new(vec![b])).collect(),
        })
    }

    fn as_insert(msg: &Arc<dyn TsMsg>) -> &InsertMsg {
        downcast::<InsertMsg>(msg.as_ref()).unwrap()
    }

    #[test]
    fn two_single_row_inserts_land_in_their_own_buckets() {
        let msgs = vec![insert(1, 1), insert(3, 3)];
        let out = by_row(&msgs, &[vec![1], vec![3]]).unwrap();

        assert_eq!(out.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        for (bucket, input) in [(1, 0), (3, 1)] {
            let pack = &out[&bucket];
            assert_eq!(pack.len(), 1);
            let msg = as_insert(&pack.msgs()[0]);
            assert_eq!(msg.timestamps.len(), 1);
            assert_eq!(msg, as_insert(&msgs[input]));
        }
    }

    #[test]
    fn every_row_appears_in_exactly_one_bucket() {
        let msgs = vec![wide_insert()];
        let out = by_row(&msgs, &[vec![1, 0, 1, 2]]).unwrap();

        let mut seen: Vec<(i64, u64, Vec<u8>)> = out
            .values()
            .flat_map(|pack| pack.msgs().iter())
            .flat_map(|m| {
                let m = as_insert(m);
                (0..m.row_ids.len())
                    .map(|r| (m.row_ids[r], m.timestamps[r], m.row_data[r].0.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        seen.sort();
        assert_eq!(
            seen,
            vec![(100, 5, vec![0]), (101, 6, vec![1]), (102, 7, vec![2]), (103, 9, vec![3])]
        );

        let bucket1 = as_insert(&out[&1].msgs()[0]);
        assert_eq!(bucket1.row_ids, vec![100, 102]);
        assert_eq!(bucket1.base.hash_values, vec![0, 2]);
        assert_eq!(bucket1.collection_name, "books");
        assert_eq!(bucket1.partition_tag, "2024");
        assert_eq!(bucket1.segment_id, 11);
    }

    #[test]
    fn repack_is_deterministic() {
        let msgs = vec![wide_insert(), insert(2, 0), wide_insert()];
        let keys = vec![vec![3, 1, 3, 0], vec![1], vec![0, 0, 2, 1]];
        let a = by_row(&msgs, &keys).unwrap();
        let b = by_row(&msgs, &keys).unwrap();

        let encode = |out: &BTreeMap<i32, MsgPack>| -> Vec<(i32, Vec<Vec<u8>>)> {
            out.iter()
                .map(|(k, p)| (*k, p.msgs().iter().map(|m| m.marshal().unwrap()).collect()))
                .collect()
        };
        assert_eq!(encode(&a), encode(&b));
    }

    #[test]
    fn key_length_mismatch_fails_whole_call() {
        let msgs = vec![insert(1, 1), wide_insert()];
        let err = by_row(&msgs, &[vec![0], vec![0, 1]]).unwrap_err();
        match err {
            StreamError::ShapeMismatch { index, source } => {
                assert_eq!(index, 1);
                assert_eq!(source, ShapeError::new("hash_keys", 4, 2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn inconsistent_row_sequences_are_rejected() {
        let broken: Arc<dyn TsMsg> = Arc::new(InsertMsg {
            timestamps: vec![1, 2],
            row_ids: vec![1],
            row_data: vec![Blob::default(), Blob::default()],
            ..Default::default()
        });
        let err = by_row(&[broken], &[vec![0, 1]]).unwrap_err();
        assert!(matches!(err, StreamError::ShapeMismatch { index: 0, .. }));
    }

    #[test]
    fn envelope_hash_values_must_cover_every_row() {
        let short_envelope: Arc<dyn TsMsg> = Arc::new(InsertMsg {
            base: BaseMsg::new(1, 2, Vec::new()),
            timestamps: vec![1, 2],
            row_ids: vec![1, 2],
            row_data: vec![Blob::default(), Blob::default()],
            ..Default::default()
        });
        type Policy = fn(&[Arc<dyn TsMsg>], &[Vec<i32>]) -> Result<BTreeMap<i32, MsgPack>, StreamError>;
        let policies: [Policy; 2] = [by_row, default_repack];
        for repack in policies {
            match repack(&[short_envelope.clone()], &[vec![0, 1]]).unwrap_err() {
                StreamError::ShapeMismatch { index, source } => {
                    assert_eq!(index, 0);
                    assert_eq!(source, ShapeError::new("hash_values", 2, 0));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn key_count_must_match_message_count() {
        let err = by_row(&[insert(1, 1)], &[]).unwrap_err();
        assert!(matches!(err, StreamError::KeyCountMismatch { messages: 1, keys: 0 }));
    }

    #[test]
    fn non_row_kind_is_unsupported_by_row() {
        let search: Arc<dyn TsMsg> = Arc::new(SearchMsg::default());
        let err = by_row(&[insert(1, 1), search], &[vec![0], vec![0]]).unwrap_err();
        assert!(matches!(
            err,
            StreamError::UnsupportedRepackKind { index: 1, kind: MsgKind::Search }
        ));
    }

    #[test]
    fn delete_rows_split_like_inserts() {
        let delete: Arc<dyn TsMsg> = Arc::new(DeleteMsg {
            base: BaseMsg::new(1, 2, vec![0, 1]),
            timestamps: vec![1, 2],
            primary_keys: vec![10, 20],
            ..Default::default()
        });
        let out = by_row(&[delete], &[vec![1, 0]]).unwrap();
        let pk = |bucket: i32| {
            downcast::<DeleteMsg>(out[&bucket].msgs()[0].as_ref()).unwrap().primary_keys.clone()
        };
        assert_eq!(pk(0), vec![20]);
        assert_eq!(pk(1), vec![10]);
    }

    #[test]
    fn by_message_routes_whole_messages() {
        let tick: Arc<dyn TsMsg> = Arc::new(TimeTickMsg::new(1, 50));
        let out = by_message(&[tick.clone(), wide_insert()], &[vec![2], vec![0]]).unwrap();
        assert!(Arc::ptr_eq(&out[&2].msgs()[0], &tick));
        assert_eq!(as_insert(&out[&0].msgs()[0]).row_ids.len(), 4);

        let err = by_message(&[tick], &[vec![0, 1]]).unwrap_err();
        assert!(matches!(err, StreamError::ShapeMismatch { index: 0, .. }));
    }

    #[test]
    fn default_repack_mixes_policies() {
        let tick: Arc<dyn TsMsg> = Arc::new(TimeTickMsg::new(1, 50));
        let out = default_repack(&[wide_insert(), tick], &[vec![0, 1, 0, 1], vec![1]]).unwrap();
        assert_eq!(out[&0].len(), 1);
        assert_eq!(out[&1].len(), 2);
        assert_eq!(out[&1].msgs()[1].kind(), MsgKind::TimeTick);
    }

    #[test]
    fn bucket_pack_keeps_time_range() {
        let out = by_row(&[wide_insert()], &[vec![0, 0, 0, 0]]).unwrap();
        assert_eq!((out[&0].begin_ts(), out[&0].end_ts()), (5, 9));
    }
}
