use colshard::{Router, bucket_for};

#[test]
fn routing_is_stable_across_runs() {
    // Adler-32 of the little-endian id bytes; these must never change.
    assert_eq!(bucket_for(1, 16), 2);
    assert_eq!(bucket_for(2, 4), 3);
    assert_eq!(bucket_for(3, 4), 0);
    assert_eq!(bucket_for(29_485_201, 64), 60);
    assert_eq!(bucket_for(0, u32::MAX), 524_289);
    assert_eq!(bucket_for(u64::MAX, u32::MAX), 602_146_809);
}

#[test]
fn routing_is_deterministic() {
    for id in (0..10_000u64).step_by(37) {
        let first = bucket_for(id, 64);
        assert!(first < 64);
        assert_eq!(bucket_for(id, 64), first);
    }
}

#[test]
fn router_matches_free_function() -> anyhow::Result<()> {
    let r = Router::new(12)?;
    assert_eq!(r.num_buckets(), 12);
    for id in [0, 1, 42, u64::MAX] {
        assert_eq!(r.route(id), bucket_for(id, 12));
    }
    Ok(())
}

#[test]
fn zero_buckets_rejected() {
    assert!(Router::new(0).is_err());
}
