use proptest::prelude::*;

use tanklab_core::actuator::quantize_duty;
use tanklab_core::plant::{GravityTank, LinearTank, PlantModel, saturate};
use tanklab_core::{Levels, LocalPredictor, PlantParams};

fn any_plant() -> impl Strategy<Value = PlantParams> {
    let linear = (0.001f64..0.1, 0.001f64..0.1, 0.1f64..1.0, 0.0f64..0.5).prop_map(
        |(k1, k2, kc, kp)| PlantModel::Linear(LinearTank { k1, k2, kc, kp }),
    );
    let gravity = (0.01f64..0.2, 0.01f64..0.1, 0.0f64..=1.0)
        .prop_map(|(c1, c2, valve)| PlantModel::Gravity(GravityTank { c1, c2, valve }));
    (prop_oneof![linear, gravity], 0.2f64..1.0)
        .prop_map(|(model, capacity)| PlantParams { model, capacity })
}

proptest! {
    #[test]
    fn quantized_duty_is_in_unit_interval(x in proptest::num::f64::ANY) {
        let d = quantize_duty(x);
        prop_assert!((0.0..=1.0).contains(&d));
        // two decimals
        prop_assert!(((d * 100.0).round() - d * 100.0).abs() < 1e-9);
    }

    #[test]
    fn saturation_zeroes_positive_derivative_at_capacity(
        cap in 0.01f64..10.0,
        over in 0.0f64..5.0,
        d in 1e-12f64..100.0,
    ) {
        prop_assert_eq!(saturate(cap + over, d, cap), 0.0);
        // draining and below-capacity derivatives pass through
        prop_assert_eq!(saturate(cap + over, -d, cap), -d);
        prop_assert_eq!(saturate(cap * 0.5, d, cap), d);
    }

    #[test]
    fn predicted_levels_stay_non_negative_and_bounded(
        plant in any_plant(),
        h1 in 0.0f64..0.2,
        h2 in 0.0f64..0.2,
        commands in proptest::collection::vec(-0.5f64..1.5, 1..40),
    ) {
        let p = LocalPredictor::new(plant);
        let mut l = Levels::new(h1, h2);
        for u in commands {
            l = p.step(l, u, 1.0).unwrap();
            prop_assert!(l.h1 >= 0.0 && l.h2 >= 0.0);
            prop_assert!(l.h1 <= plant.capacity + 1e-3, "h1 = {}", l.h1);
            prop_assert!(l.h2 <= plant.capacity + 1e-3, "h2 = {}", l.h2);
        }
    }
}
