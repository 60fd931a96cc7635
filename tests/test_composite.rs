//! Integration tests for composite models
//!
//! Models come from the built-in component library or from templates added
//! to it, and are checked from assembly through result finalization.

use std::sync::Arc;

use approx::assert_relative_eq;
use ndarray::{arr1, Array1, Array2};

use diffmodel::composite::{CompositeModelTemplate, ParameterValue, VolumeSelection};
use diffmodel::error::ModelError;
use diffmodel::functions::FunctionTemplate;
use diffmodel::library::ComponentLibrary;
use diffmodel::parameters::{ParameterCatalog, ParameterSpec};
use diffmodel::protocol::{ProblemData, Protocol, ProtocolProblem};
use diffmodel::results::ResultMaps;

fn library_with(template: CompositeModelTemplate) -> ComponentLibrary {
    let mut library = ComponentLibrary::builtin();
    library.add_composite(template);
    library
}

fn map(values: &[f64]) -> ndarray::ArrayD<f64> {
    arr1(values).into_dyn()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Assembly
// ═══════════════════════════════════════════════════════════════════════════════

mod assembly {
    use super::*;

    #[test]
    fn test_same_named_parameters_stay_separate() {
        let library = library_with(
            CompositeModelTemplate::new("TwoBalls")
                .model_expression("Ball(Fast) + Ball(Slow)"),
        );
        let model = library.build_composite("TwoBalls").unwrap();
        assert_eq!(model.parameter_names(), vec!["Fast.d", "Slow.d"]);
        assert_eq!(model.required_protocol_names(), vec!["b"]);

        let mut model = model;
        model.fix("Fast.d", 3e-9).unwrap();
        assert!(model.is_fixed("Fast.d"));
        assert!(!model.is_fixed("Slow.d"));
    }

    #[test]
    fn test_ball_stick_parameters() {
        let model = ComponentLibrary::builtin()
            .build_composite("BallStick_r1")
            .unwrap();
        assert_eq!(
            model.parameter_names(),
            vec![
                "S0.s0",
                "w_ball.w",
                "Ball.d",
                "w_stick0.w",
                "Stick0.d",
                "Stick0.theta",
                "Stick0.phi"
            ]
        );
        assert!(model.is_fixed("Ball.d"));
        assert_eq!(model.free_parameters().len(), 6);
    }

    #[test]
    fn test_template_inheritance() {
        let model = ComponentLibrary::builtin()
            .build_composite("BallStick_r1-ExVivo")
            .unwrap();
        assert_eq!(model.fixed_value("Ball.d"), Some(&ParameterValue::Scalar(2.0e-9)));
        assert_eq!(model.fixed_value("Stick0.d"), Some(&ParameterValue::Scalar(0.6e-9)));
        // the modifier of the base template is kept
        assert_eq!(model.modifiers().len(), 1);
    }

    #[test]
    fn test_duplicate_alias() {
        let library = library_with(
            CompositeModelTemplate::new("Twice").model_expression("Ball + Ball"),
        );
        assert!(matches!(
            library.build_composite("Twice"),
            Err(ModelError::DuplicateCompartment(ref alias)) if alias == "Ball"
        ));
    }

    #[test]
    fn test_unknown_fixed_parameter() {
        let library = library_with(
            CompositeModelTemplate::new("Wrong")
                .model_expression("S0 * Ball")
                .fix("Ball.dperp0", 1e-10),
        );
        assert!(matches!(
            library.build_composite("Wrong"),
            Err(ModelError::UnknownParameter { ref name, .. }) if name == "Ball.dperp0"
        ));
    }

    #[test]
    fn test_unknown_compartment() {
        let library = library_with(
            CompositeModelTemplate::new("Missing").model_expression("S0 * Nowhere"),
        );
        assert!(matches!(
            library.build_composite("Missing"),
            Err(ModelError::ComponentNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_expression() {
        let library = library_with(CompositeModelTemplate::new("Empty"));
        assert!(matches!(
            library.build_composite("Empty"),
            Err(ModelError::MissingDefinition(_))
        ));
    }

    #[test]
    fn test_prior_parameters_checked() {
        let mut library = ComponentLibrary::builtin();
        library.add_compartment(
            serde_json::from_str::<FunctionTemplate>(
                r#"{
                    "name": "Odd",
                    "parameters": ["d"],
                    "code": "return d;",
                    "prior": {
                        "body": "return nonexistent > 0;",
                        "parameters": ["nonexistent", "b"],
                        "function_name": "prior_Odd"
                    }
                }"#,
            )
            .unwrap(),
        );
        library.add_composite(CompositeModelTemplate::new("OddModel").model_expression("S0 * Odd"));
        assert!(matches!(
            library.build_composite("OddModel"),
            Err(ModelError::UnknownParameter { ref name, .. }) if name == "nonexistent"
        ));
    }

    #[test]
    fn test_kernel_variable_collision() {
        let mut library = ComponentLibrary::builtin();
        library.add_compartment(
            serde_json::from_str::<FunctionTemplate>(
                r#"{ "name": "Tilt", "parameters": ["flip_angle", "R"], "code": "return R;" }"#,
            )
            .unwrap(),
        );
        library.add_compartment(
            serde_json::from_str::<FunctionTemplate>(
                r#"{
                    "name": "Flip",
                    "parameters": [
                        { "name": "angle", "kind": { "category": "free", "init_value": 0.5, "lower_bound": 0, "upper_bound": 3.2 } }
                    ],
                    "code": "return angle;"
                }"#,
            )
            .unwrap(),
        );
        library.add_composite(
            CompositeModelTemplate::new("Clash").model_expression("Tilt * Flip(flip)"),
        );
        assert!(matches!(
            library.build_composite("Clash"),
            Err(ModelError::NameCollision(ref name)) if name == "flip_angle"
        ));
    }

    #[test]
    fn test_compartment_instances_are_independent() {
        let library = ComponentLibrary::builtin();
        let first = library.build_composite("BallStick_r1").unwrap();
        let second = library.build_composite("BallStick_r1").unwrap();
        assert!(!Arc::ptr_eq(
            first.compartment("Ball").unwrap().function(),
            second.compartment("Ball").unwrap().function()
        ));
    }

    #[test]
    fn test_callable_fix() {
        let library = library_with(
            CompositeModelTemplate::new("Callable")
                .model_expression("S0 * Ball")
                .fix_with("Ball.d", || 1.5e-9),
        );
        let model = library.build_composite("Callable").unwrap();
        assert_eq!(model.fixed_value("Ball.d"), Some(&ParameterValue::Scalar(1.5e-9)));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Parameters
// ═══════════════════════════════════════════════════════════════════════════════

mod parameters {
    use super::*;

    #[test]
    fn test_resolution_gives_independent_copies() {
        let catalog = ParameterCatalog::builtin();
        let specs: Vec<ParameterSpec> = vec!["d".into(), "theta".into(), "g".into()];
        let first = catalog.resolve(&specs, "test").unwrap();
        let second = catalog.resolve(&specs, "test").unwrap();
        assert_eq!(first, second);
        for (a, b) in first.iter().zip(&second) {
            assert!(!std::ptr::eq(a, b));
        }
    }

    #[test]
    fn test_static_parameter_is_fixed() {
        let mut library = ComponentLibrary::builtin();
        library.add_compartment(
            serde_json::from_str::<FunctionTemplate>(
                r#"{
                    "name": "Scaled",
                    "parameters": [
                        "s0",
                        { "name": "scale", "kind": { "category": "static", "value": 2.0 } }
                    ],
                    "code": "return s0 * scale;"
                }"#,
            )
            .unwrap(),
        );
        library.add_composite(CompositeModelTemplate::new("Scaled").model_expression("Scaled"));
        let model = library.build_composite("Scaled").unwrap();
        assert_eq!(
            model.fixed_value("Scaled.scale"),
            Some(&ParameterValue::Scalar(2.0))
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Problem data
// ═══════════════════════════════════════════════════════════════════════════════

mod problem_data {
    use super::*;

    fn protocol() -> Protocol {
        Protocol::new()
            .with_column("b", arr1(&[0.0, 1e9, 2e9, 3e9]))
            .unwrap()
            .with_column("gx", arr1(&[0.0, 1.0, 0.0, 0.0]))
            .unwrap()
            .with_column("gy", arr1(&[0.0, 0.0, 1.0, 0.0]))
            .unwrap()
            .with_column("gz", arr1(&[0.0, 0.0, 0.0, 1.0]))
            .unwrap()
    }

    #[test]
    fn test_protocol_problems() {
        let model = ComponentLibrary::builtin().build_composite("S0-T2").unwrap();
        assert_eq!(model.protocol_problems(None), vec![ProtocolProblem::NoProtocol]);
        assert_eq!(
            model.protocol_problems(Some(&protocol())),
            vec![ProtocolProblem::MissingColumn("TE".to_string())]
        );
    }

    #[test]
    fn test_optimization_input() {
        let mut model = ComponentLibrary::builtin()
            .build_composite("BallStick_r1")
            .unwrap();
        let signals = Array2::from_elem((2, 4), 100.0);
        model.set_problem_data(ProblemData::new(protocol(), signals).unwrap().shared());
        model.init("S0.s0", arr1(&[50.0, 60.0])).unwrap();

        let input = model.optimization_input().unwrap();
        assert_eq!(input.evaluate_function, "BallStick_r1_evaluate");
        assert_eq!(input.num_parameters(), 6);
        assert_eq!(input.initial_values.shape(), &[2, 6]);
        assert_eq!(input.initial_values[[1, 0]], 60.0);
        assert_eq!(input.fixed_names, vec!["Ball.d"]);
        assert_relative_eq!(input.fixed_values[[0, 0]], 3.0e-9);
        assert_eq!(input.protocol["g"].shape(), &[4, 3]);
        assert!(input.kernel_source.contains("BallStick_r1_data"));
    }

    #[test]
    fn test_map_length_mismatch() {
        let mut model = ComponentLibrary::builtin().build_composite("S0").unwrap();
        let signals = Array2::from_elem((3, 4), 100.0);
        model.set_problem_data(ProblemData::new(protocol(), signals).unwrap().shared());
        model.init("S0.s0", arr1(&[1.0, 2.0])).unwrap();
        assert!(model.optimization_input().is_err());
    }

    #[test]
    fn test_volume_selection() {
        let library = library_with(
            CompositeModelTemplate::new("LowB")
                .model_expression("S0 * Ball")
                .volume_selection(VolumeSelection::b_window(0.5e9, 2e9)),
        );
        let mut model = library.build_composite("LowB").unwrap();
        let signals = Array2::from_elem((1, 4), 100.0);
        model.set_problem_data(ProblemData::new(protocol(), signals).unwrap().shared());
        assert_eq!(model.volume_indices().unwrap(), vec![0, 1, 2]);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Results
// ═══════════════════════════════════════════════════════════════════════════════

mod results {
    use super::*;

    fn tensor_results(d: f64, dperp0: f64, dperp1: f64) -> ResultMaps {
        ResultMaps::from([
            ("S0.s0".to_string(), map(&[100.0])),
            ("Tensor.d".to_string(), map(&[d])),
            ("Tensor.dperp0".to_string(), map(&[dperp0])),
            ("Tensor.dperp1".to_string(), map(&[dperp1])),
            ("Tensor.theta".to_string(), map(&[0.3])),
            ("Tensor.phi".to_string(), map(&[1.2])),
            ("Tensor.psi".to_string(), map(&[0.7])),
        ])
    }

    #[test]
    fn test_tensor_eigen_values_with_tie() {
        let model = ComponentLibrary::builtin().build_composite("Tensor").unwrap();
        let results = model.finalize_results(tensor_results(2.0, 1.0, 1.0)).unwrap();

        let ranking = &results["Tensor.eigen_ranking"];
        assert_eq!(ranking.shape(), &[1, 3]);
        assert_eq!(ranking.iter().copied().collect::<Vec<_>>(), vec![0.0, 1.0, 2.0]);
        assert_relative_eq!(results["Tensor.AD"][[0]], 2.0);
        assert_relative_eq!(results["Tensor.RD"][[0]], 1.0);
        assert_relative_eq!(results["Tensor.MD"][[0]], 4.0 / 3.0);
        assert_eq!(results["Tensor.vec0"].shape(), &[1, 3]);
    }

    #[test]
    fn test_tensor_eigen_vectors_orthonormal() {
        let model = ComponentLibrary::builtin().build_composite("Tensor").unwrap();
        let results = model.finalize_results(tensor_results(1.0, 3.0, 2.0)).unwrap();
        let vector = |i: usize| -> Array1<f64> {
            results[&format!("Tensor.vec{}", i)]
                .iter()
                .copied()
                .collect()
        };
        for i in 0..3 {
            assert_relative_eq!(vector(i).dot(&vector(i)), 1.0, epsilon = 1e-12);
            for j in (i + 1)..3 {
                assert_relative_eq!(vector(i).dot(&vector(j)), 0.0, epsilon = 1e-12);
            }
        }
        assert_relative_eq!(results["Tensor.eigval0"][[0]], 3.0);
        assert_relative_eq!(results["Tensor.eigval2"][[0]], 1.0);
    }

    #[test]
    fn test_modifier_adds_map() {
        let model = ComponentLibrary::builtin()
            .build_composite("BallStick_r1")
            .unwrap();
        let results = ResultMaps::from([
            ("S0.s0".to_string(), map(&[1.0, 1.0])),
            ("w_ball.w".to_string(), map(&[0.25, 0.75])),
            ("w_stick0.w".to_string(), map(&[0.75, 0.25])),
            ("Stick0.d".to_string(), map(&[1e-9, 1e-9])),
            ("Stick0.theta".to_string(), map(&[0.0, 1.0])),
            ("Stick0.phi".to_string(), map(&[0.0, 1.0])),
        ]);
        let results = model.finalize_results(results).unwrap();
        assert_eq!(results["FS"], map(&[0.75, 0.25]));
        assert_eq!(results["Ball.d"], map(&[3e-9, 3e-9]));
        assert_eq!(results["Stick0.vec0"].shape(), &[2, 3]);
    }

    #[test]
    fn test_modifier_name_collision() {
        let library = library_with(
            CompositeModelTemplate::new("Colliding")
                .model_expression("S0 * Ball")
                .modifier("S0.s0", "S0.s0 * 2"),
        );
        let model = library.build_composite("Colliding").unwrap();
        let results = ResultMaps::from([
            ("S0.s0".to_string(), map(&[1.0])),
            ("Ball.d".to_string(), map(&[1e-9])),
        ]);
        assert!(matches!(
            model.finalize_results(results),
            Err(ModelError::NameCollision(_))
        ));
    }

    #[test]
    fn test_modifiers_run_in_order() {
        let library = library_with(
            CompositeModelTemplate::new("Chained")
                .model_expression("S0 * Ball")
                .modifier("double", "S0.s0 * 2")
                .modifier("quadruple", "double * 2"),
        );
        let model = library.build_composite("Chained").unwrap();
        let results = ResultMaps::from([
            ("S0.s0".to_string(), map(&[1.5])),
            ("Ball.d".to_string(), map(&[1e-9])),
        ]);
        let results = model.finalize_results(results).unwrap();
        assert_eq!(results["quadruple"], map(&[6.0]));
    }
}
