use proptest::prelude::*;
use stagekit_core::Vector;

fn coords() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1.0e9f64..1.0e9, 1..8)
}

proptest! {
    #[test]
    fn set_then_get_is_exact(
        values in coords(),
        replacement in -1.0e9f64..1.0e9,
        seed in any::<usize>(),
    ) {
        let mut v = Vector::new(values.clone()).unwrap();
        let index = seed % values.len();
        v.set(index, replacement).unwrap();
        prop_assert_eq!(v.get(index).unwrap(), replacement);
        for (i, original) in values.iter().enumerate() {
            if i != index {
                prop_assert_eq!(v.get(i).unwrap(), *original);
            }
        }
    }

    #[test]
    fn equality_is_reflexive_and_symmetric(a in coords(), b in coords()) {
        let va = Vector::new(a.clone()).unwrap();
        let vb = Vector::new(b.clone()).unwrap();
        prop_assert_eq!(&va, &va.clone());
        prop_assert_eq!(va == vb, vb == va);
        prop_assert_eq!(va == vb, a == b);
    }

    #[test]
    fn different_dimensions_never_equal(a in coords(), extra in -1.0e9f64..1.0e9) {
        let va = Vector::new(a.clone()).unwrap();
        let mut longer = a;
        longer.push(extra);
        let vb = Vector::new(longer).unwrap();
        prop_assert_ne!(va, vb);
    }

    #[test]
    fn out_of_range_index_fails(values in coords(), past in 0usize..4) {
        let mut v = Vector::new(values.clone()).unwrap();
        let index = values.len() + past;
        prop_assert!(v.get(index).is_err());
        prop_assert!(v.set(index, 1.0).is_err());
        prop_assert_eq!(v, Vector::new(values).unwrap());
    }

    #[test]
    fn add_then_sub_restores(a in coords()) {
        let va = Vector::new(a.clone()).unwrap();
        let vb = Vector::new(a.iter().map(|x| x * 0.5).collect::<Vec<_>>()).unwrap();
        let sum = (&va + &vb).unwrap();
        let back = (&sum - &vb).unwrap();
        for (x, y) in back.iter().zip(va.iter()) {
            prop_assert!((x - y).abs() <= 1e-6 * y.abs().max(1.0));
        }
    }
}
