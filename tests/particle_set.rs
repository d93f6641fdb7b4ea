use ocean_drift::floating_type_mod::FT;
use ocean_drift::{
    AttrValue, FieldSet, IdentityAllocator, ParticleSchema, ParticleSet, ReleaseTimes, Result, UniformFieldSet,
};
use std::sync::{Arc, Mutex};

fn still_water() -> Arc<FieldSet> {
    Arc::new(FieldSet::UniformFieldSet(UniformFieldSet::new(0., 0., 0.)))
}

fn line_set(n: usize) -> ParticleSet {
    let lon: Vec<FT> = (0..n).map(|i| i as FT).collect();
    let lat = vec![0 as FT; n];
    ParticleSet::new(
        still_water(),
        Arc::new(ParticleSchema::new()),
        Arc::new(Mutex::new(IdentityAllocator::new())),
        &lon,
        &lat,
        None,
        ReleaseTimes::Scalar(0.),
        None,
        &[],
    )
    .unwrap()
}

#[test]
fn size_matches_input_and_identities_are_unique() -> Result<()> {
    let ids = Arc::new(Mutex::new(IdentityAllocator::starting_at(100)));
    let pset = ParticleSet::new(
        still_water(),
        Arc::new(ParticleSchema::new()),
        ids,
        &[0., 1., 2., 3., 4., 5., 6.],
        &[0.; 7],
        None,
        ReleaseTimes::Unset,
        None,
        &[],
    )?;
    assert_eq!(pset.size(), 7);
    let mut seen: Vec<u64> = pset.iter().map(|p| p.id).collect();
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 7);
    assert!(seen.iter().all(|&id| (100..107).contains(&id)));
    Ok(())
}

#[test]
fn global_index_resolution_inverts_insertion_order() -> Result<()> {
    let pset = line_set(9000); // spans three default brackets
    for i in [0usize, 1, 4095, 4096, 8191, 8192, 8999] {
        assert_eq!(pset.get(i as i64)?.lon, i as FT);
    }
    Ok(())
}

#[test]
fn remove_and_readd_preserves_size_not_order() -> Result<()> {
    let mut pset = line_set(10);
    let removed = pset.pop(&[1, 5, 8])?;
    assert_eq!(pset.size(), 7);
    pset.append_bulk(removed);
    assert_eq!(pset.size(), 10);
    // order is insertion order: the re-added records sit at the tail
    assert_eq!(pset.get(9)?.lon, 8.);
    assert_eq!(pset.get(7)?.lon, 1.);
    Ok(())
}

#[test]
fn compaction_is_idempotent() -> Result<()> {
    let mut pset = line_set(16).with_bracket_capacity(4)?;
    pset.remove(&[0, 1, 2, 4, 5, 6, 8, 9, 10])?;
    let layout = |pset: &ParticleSet| -> Vec<Vec<u64>> {
        pset.brackets()
            .iter()
            .map(|b| b.records().iter().map(|p| p.id).collect())
            .collect()
    };
    let once = layout(&pset);
    pset.merge_brackets();
    assert_eq!(layout(&pset), once);
    pset.merge_brackets();
    assert_eq!(layout(&pset), once);
    Ok(())
}

#[test]
fn counts_and_bounds_hold_after_arbitrary_churn() -> Result<()> {
    let mut pset = line_set(30).with_bracket_capacity(8)?;
    pset.remove(&[2, 9, -1, 0])?;
    let popped = pset.pop(&[-3, 4])?;
    pset.append_bulk(popped);
    pset.remove(&[12])?;

    let total: usize = pset.brackets().iter().map(|b| b.bounds().count).sum();
    assert_eq!(total, pset.size());
    for bracket in pset.brackets() {
        assert_eq!(bracket.bounds().count, bracket.len());
        if bracket.bounds().count > 0 {
            for p in bracket.records() {
                assert!(bracket.bounds().contains(p.id));
            }
        }
    }
    Ok(())
}

#[test]
fn negative_one_removes_the_last_record() -> Result<()> {
    let mut pset = line_set(5);
    let removed = pset.pop(&[-1])?;
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].lon, 4.);
    assert_eq!(pset.size(), 4);
    assert_eq!(pset.get(-1)?.lon, 3.);
    Ok(())
}

#[test]
fn pop_by_identity_returns_the_right_record() -> Result<()> {
    let mut pset = line_set(6);
    let removed = pset.pop_by_id(3)?;
    assert_eq!(removed.lon, 3.);
    assert_eq!(pset.size(), 5);
    assert!(pset.resolve_by_identity(3).is_err());
    Ok(())
}

#[test]
fn attribute_columns_are_applied_per_particle() -> Result<()> {
    let schema = Arc::new(ParticleSchema::new().with_float("age", 0.).with_int("origin", -1));
    let pset = ParticleSet::new(
        still_water(),
        schema.clone(),
        Arc::new(Mutex::new(IdentityAllocator::new())),
        &[0., 1.],
        &[0., 0.],
        None,
        ReleaseTimes::Unset,
        None,
        &[("age", vec![AttrValue::Float(1.5), AttrValue::Float(2.5)])],
    )?;
    assert_eq!(pset.get(0)?.attr(&schema, "age")?, AttrValue::Float(1.5));
    assert_eq!(pset.get(1)?.attr(&schema, "age")?, AttrValue::Float(2.5));
    // undeclared column keeps its default
    assert_eq!(pset.get(0)?.attr(&schema, "origin")?, AttrValue::Int(-1));
    Ok(())
}
