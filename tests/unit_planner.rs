//! Unit tests for part planning
//!
//! Tests layout invariants, the part-count bound and edge sizes.

use upload_bench::plan::{plan_parts, tib, PartLimits, PartPlan};
use upload_bench::UploadError;

fn plan(total: u64, part: u64) -> PartPlan {
    plan_parts(total, part, &PartLimits::default()).unwrap()
}

fn assert_contiguous(plan: &PartPlan) {
    let mut offset = 0;
    for (idx, part) in plan.iter().enumerate() {
        assert_eq!(part.number as usize, idx + 1, "Part numbers must start at 1");
        assert_eq!(part.offset, offset, "Part {} not contiguous", part.number);
        assert!(part.size > 0, "Part {} is empty", part.number);
        offset += part.size;
    }
    assert_eq!(offset, plan.total_size(), "Sizes must sum to the total");
}

#[test]
fn test_layout_invariants_across_sizes() {
    let part = 150 * 1024;
    for total in [1, 1023, part - 1, part, part + 1, 10_000_000, 3 * part, 7 * part + 11] {
        let plan = plan(total, part);
        assert_contiguous(&plan);

        let expected = total.div_ceil(part) as usize;
        assert_eq!(plan.len(), expected, "Wrong part count for {}", total);

        let (last, rest) = plan.parts().split_last().unwrap();
        assert!(rest.iter().all(|p| p.size == plan.part_size()));
        assert!(last.size <= plan.part_size() || plan.len() == 1);
    }
}

#[test]
fn test_ten_megabytes_in_150k_parts() {
    let plan = plan(10_000_000, 150_000);
    assert_eq!(plan.len(), 67);
    assert!(plan.parts()[..66].iter().all(|p| p.size == 150_000));
    assert_eq!(plan.parts()[66].size, 100_000);
    assert_eq!(plan.parts()[66].offset, 9_900_000);
}

#[test]
fn test_empty_object() {
    let plan = plan(0, 150_000);
    assert!(plan.is_empty());
    assert_eq!(plan.total_size(), 0);
}

#[test]
fn test_single_part_collapse() {
    let short = plan(100, 150_000);
    assert_eq!(short.len(), 1);
    assert_eq!(short.parts()[0].size, 100);
    assert_eq!(short.part_size(), 100);

    let exact = plan(150_000, 150_000);
    assert_eq!(exact.len(), 1);
    assert_eq!(exact.parts()[0].size, 150_000);
}

#[test]
fn test_part_count_bound_grows_part_size() {
    let limits = PartLimits {
        max_parts: 10,
        ..Default::default()
    };
    let plan = plan_parts(1000, 10, &limits).unwrap();
    assert!((plan.len() as u64) < limits.max_parts + 1);
    assert_eq!(plan.part_size(), 100);
    assert_contiguous(&plan);
}

#[test]
fn test_object_ceiling() {
    let err = plan_parts(tib(5) + 1, 150_000, &PartLimits::default()).unwrap_err();
    assert!(matches!(err, UploadError::Configuration { .. }));

    assert!(plan_parts(tib(5), 1 << 30, &PartLimits::default()).is_ok());
}

#[test]
fn test_zero_part_size_rejected() {
    let err = plan_parts(100, 0, &PartLimits::default()).unwrap_err();
    assert!(matches!(err, UploadError::Configuration { .. }));
}

#[test]
fn test_from_sizes_validates_layout() {
    let plan = PartPlan::from_sizes(25, &[(2, 10), (1, 10), (3, 5)]).unwrap();
    assert_contiguous(&plan);
    assert_eq!(plan.get(3).unwrap().offset, 20);

    assert!(PartPlan::from_sizes(25, &[(1, 10), (3, 15)]).is_err());
    assert!(PartPlan::from_sizes(25, &[(1, 25), (2, 0)]).is_err());
    assert!(PartPlan::from_sizes(30, &[(1, 10), (2, 10)]).is_err());
}
