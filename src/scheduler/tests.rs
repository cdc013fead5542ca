use proptest::prelude::*;

use super::*;

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}

#[test]
fn test_three_devices_six_images() {
    let mut scheduler = DistributionScheduler::new();
    assert_eq!(scheduler.current(3, 6), vec![0, 1, 2]);

    assert_eq!(scheduler.next(3, 6), 0);
    assert_eq!(scheduler.current(3, 6), vec![3, 4, 5]);

    assert_eq!(scheduler.next(3, 6), 1);
    assert_eq!(scheduler.current(3, 6), vec![0, 1, 2]);
    assert_eq!(scheduler.cycles_completed(), 1);
}

#[test]
fn test_more_devices_than_images() {
    assert_eq!(assignment(0, 5, 2), vec![0, 1, 0, 1, 0]);
    assert_eq!(assignment(1, 5, 2), vec![1, 0, 1, 0, 1]);

    let mut scheduler = DistributionScheduler::new();
    // 5 shown per step over 2 images
    assert_eq!(scheduler.next(5, 2), 2);
    assert_eq!(scheduler.next(5, 2), 3);
}

#[test]
fn test_uneven_division() {
    // N=2, M=3: steps cover 0..2, 2..4, 4..6
    assert_eq!(assignment(0, 2, 3), vec![0, 1]);
    assert_eq!(assignment(1, 2, 3), vec![2, 0]);
    assert_eq!(assignment(2, 2, 3), vec![1, 2]);

    assert_eq!(cycles_crossed(0, 2, 3), 0);
    assert_eq!(cycles_crossed(1, 2, 3), 1);
    assert_eq!(cycles_crossed(2, 2, 3), 1);
}

#[test]
fn test_previous_floors_at_zero() {
    let mut scheduler = DistributionScheduler::new();
    assert!(!scheduler.previous());
    assert_eq!(scheduler.step(), 0);

    scheduler.next(1, 1);
    assert!(scheduler.previous());
    assert_eq!(scheduler.step(), 0);
    assert_eq!(scheduler.cycles_completed(), 1);
}

#[test]
fn test_device_count_change_keeps_step() {
    let mut scheduler = DistributionScheduler::new();
    scheduler.next(3, 6);
    assert_eq!(scheduler.current(2, 6), vec![2, 3]);
}

#[test]
fn test_huge_step_does_not_overflow() {
    assert_eq!(image_index(u64::MAX, 16, 15, 7), ((u128::from(u64::MAX) * 16 + 15) % 7) as usize);
    assert!(cycles_through(u64::MAX, 16, 1) == u64::MAX);
}

#[test]
fn test_preceding_step() {
    let mut scheduler = DistributionScheduler::new();
    assert!(scheduler.preceding(3, 6).is_none());
    scheduler.next(3, 6);
    assert_eq!(scheduler.preceding(3, 6), Some(vec![0, 1, 2]));
}

proptest! {
    #[test]
    fn prop_assignment_formula(n in 1usize..20, m in 1usize..50, k in 0u64..10_000) {
        let slots = assignment(k, n, m);
        prop_assert_eq!(slots.len(), n);
        for (i, image) in slots.into_iter().enumerate() {
            prop_assert_eq!(image, ((k as usize) * n + i) % m);
        }
    }

    #[test]
    fn prop_periodicity(n in 1usize..20, m in 1usize..50, k in 0u64..1_000) {
        let period = (lcm(n, m) / n) as u64;
        prop_assert_eq!(assignment(k, n, m), assignment(k + period, n, m));
    }

    #[test]
    fn prop_previous_inverts_next(n in 1usize..20, m in 1usize..50, steps in 0u64..100) {
        let mut scheduler = DistributionScheduler::new();
        for _ in 0..steps {
            scheduler.next(n, m);
        }
        let before = scheduler.step();
        scheduler.next(n, m);
        scheduler.previous();
        prop_assert_eq!(scheduler.step(), before);
    }

    #[test]
    fn prop_cycle_count_matches_images_shown(n in 1usize..20, m in 1usize..50, steps in 1u64..200) {
        let mut scheduler = DistributionScheduler::new();
        for _ in 0..steps {
            scheduler.next(n, m);
        }
        // Steps 0..steps-1 fully shown before reaching `steps`
        prop_assert_eq!(scheduler.cycles_completed(), cycles_through(steps - 1, n, m));
    }
}
