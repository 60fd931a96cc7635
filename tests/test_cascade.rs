//! Integration tests for cascade models
//!
//! Cascades are built from the built-in component library and driven either
//! by hand through `get_next` or by `fit_cascade` with a stand-in optimizer.

use std::f64::consts::FRAC_PI_2;
use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use ndarray::{arr1, Array1, Array2};

use diffmodel::cascade::{CascadeEntry, CascadeModel, CascadeState, CascadeTemplate};
use diffmodel::composite::ParameterValue;
use diffmodel::error::ModelError;
use diffmodel::library::ComponentLibrary;
use diffmodel::optimize::{fit_cascade, OptimizationInput, Optimizer};
use diffmodel::protocol::{ProblemData, Protocol};
use diffmodel::results::{ModelResults, ResultMaps};

fn protocol() -> Protocol {
    Protocol::from_csv_str(
        "#gx,gy,gz,b,TE,TI,TR\n\
         0,0,0,0,0.05,0.1,3\n\
         1,0,0,1e9,0.05,0.4,3\n\
         0,1,0,1e9,0.06,0.8,3\n\
         0,0,1,3e9,0.06,1.6,3\n",
    )
    .unwrap()
}

fn problem_data() -> Arc<ProblemData> {
    let signals = Array2::from_shape_fn((3, 4), |(voxel, volume)| {
        1000.0 * (voxel + 1) as f64 / (volume + 1) as f64
    });
    ProblemData::new(protocol(), signals).unwrap().shared()
}

fn s0_results(values: &[f64]) -> ResultMaps {
    ResultMaps::from([("S0.s0".to_string(), arr1(values).into_dyn())])
}

/// Moves every parameter a fixed step away from its starting point
struct Nudge {
    step: f64,
    inputs: Mutex<Vec<OptimizationInput>>,
}

impl Nudge {
    fn new(step: f64) -> Self {
        Self {
            step,
            inputs: Mutex::new(Vec::new()),
        }
    }
}

impl Optimizer for Nudge {
    fn minimize(&self, input: &OptimizationInput) -> anyhow::Result<ResultMaps> {
        self.inputs.lock().unwrap().push(input.clone());
        Ok(input
            .parameter_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let values: Array1<f64> = input.initial_values.column(i).mapv(|v| v + self.step);
                (name.clone(), values.into_dyn())
            })
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sequencing
// ═══════════════════════════════════════════════════════════════════════════════

mod sequencing {
    use super::*;

    #[test]
    fn test_s0_ballstick_example() {
        let mut cascade = ComponentLibrary::builtin()
            .build_cascade("BallStick_r1 (Cascade)")
            .unwrap();
        assert_eq!(cascade.state(), CascadeState::NotStarted);

        let first = cascade.get_next(&ModelResults::new()).unwrap();
        assert_eq!(first.name(), "S0");

        let previous = ModelResults::from([("S0".to_string(), s0_results(&[100.0, 200.0]))]);
        let second = cascade.get_next(&previous).unwrap();
        assert_eq!(second.name(), "BallStick_r1");
        let CascadeEntry::Leaf(model) = second else {
            panic!("BallStick_r1 is a composite model");
        };
        assert_eq!(
            model.initial_value("S0.s0").unwrap(),
            ParameterValue::Map(arr1(&[100.0, 200.0]))
        );

        assert!(!cascade.has_next());
        assert_eq!(cascade.state(), CascadeState::Complete);
        assert!(matches!(
            cascade.get_next(&previous),
            Err(ModelError::CascadeExhausted(_))
        ));
    }

    #[test]
    fn test_reset_replays_same_sequence() {
        let mut cascade = ComponentLibrary::builtin()
            .build_cascade("S0T1_MI_EPI (Cascade)")
            .unwrap();
        let results = ModelResults::from([
            ("S0".to_string(), s0_results(&[1.0])),
            ("S0T1_MI_EPI_fixed_eff".to_string(), s0_results(&[2.0])),
        ]);

        let drain = |cascade: &mut CascadeModel| {
            let mut names = Vec::new();
            while cascade.has_next() {
                names.push(cascade.get_next(&results).unwrap().name().to_string());
            }
            names
        };

        let first = drain(&mut cascade);
        cascade.reset();
        assert_eq!(cascade.cursor(), 0);
        let second = drain(&mut cascade);
        assert_eq!(first, vec!["S0", "S0T1_MI_EPI_fixed_eff", "S0T1_MI_EPI"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_has_next_counts_down() {
        let mut cascade = ComponentLibrary::builtin()
            .build_cascade("S0T1_MI_EPI (Cascade)")
            .unwrap();
        let n = cascade.len();
        let results = ModelResults::from([
            ("S0".to_string(), s0_results(&[1.0])),
            ("S0T1_MI_EPI_fixed_eff".to_string(), s0_results(&[2.0])),
        ]);

        let mut calls = 0;
        while cascade.has_next() {
            assert_eq!(n - cascade.cursor(), n - calls);
            cascade.get_next(&results).unwrap();
            calls += 1;
        }
        assert_eq!(calls, n);
    }

    #[test]
    fn test_missing_previous_results() {
        let mut cascade = ComponentLibrary::builtin()
            .build_cascade("BallStick_r1 (Cascade)")
            .unwrap();
        cascade.get_next(&ModelResults::new()).unwrap();
        assert!(matches!(
            cascade.get_next(&ModelResults::new()),
            Err(ModelError::MissingResults(ref name)) if name == "S0"
        ));
        assert_eq!(cascade.cursor(), 1);
    }

    #[test]
    fn test_fixes_apply_to_first_member() {
        let mut library = ComponentLibrary::builtin();
        library.add_cascade(
            CascadeTemplate::new("BallStick first")
                .model("BallStick_r1")
                .model("S0")
                .fix("BallStick_r1", "Stick0.d", 1e-9),
        );
        let mut cascade = library.build_cascade("BallStick first").unwrap();
        let CascadeEntry::Leaf(model) = cascade.get_next(&ModelResults::new()).unwrap() else {
            panic!("BallStick_r1 is a composite model");
        };
        assert_eq!(model.fixed_value("Stick0.d"), Some(&ParameterValue::Scalar(1e-9)));
    }

    #[test]
    fn test_fixes_apply_to_renamed_member_only() {
        let mut cascade = ComponentLibrary::builtin()
            .build_cascade("S0T1_MI_EPI (Cascade)")
            .unwrap();
        let results = ModelResults::from([
            ("S0".to_string(), s0_results(&[1.0])),
            ("S0T1_MI_EPI_fixed_eff".to_string(), s0_results(&[2.0])),
        ]);
        while cascade.has_next() {
            cascade.get_next(&results).unwrap();
        }

        let Some(CascadeEntry::Leaf(fixed_eff)) = cascade.get_model("S0T1_MI_EPI_fixed_eff") else {
            panic!("member missing");
        };
        assert!(fixed_eff.is_fixed("ExpT1DecIR.Efficiency"));

        let Some(CascadeEntry::Leaf(last)) = cascade.get_model("S0T1_MI_EPI") else {
            panic!("member missing");
        };
        assert!(!last.is_fixed("ExpT1DecIR.Efficiency"));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Protocol
// ═══════════════════════════════════════════════════════════════════════════════

mod protocol_checks {
    use super::*;

    #[test]
    fn test_required_protocol_names_union() {
        let cascade = ComponentLibrary::builtin()
            .build_cascade("BallStick_r1 (Cascade|Tensor)")
            .unwrap();
        let mut names = cascade.required_protocol_names();
        names.sort();
        assert_eq!(names, vec!["b", "g"]);
    }

    #[test]
    fn test_protocol_problems() {
        let cascade = ComponentLibrary::builtin()
            .build_cascade("S0-T2 (Cascade)")
            .unwrap();
        let without_te = Protocol::new().with_column("b", arr1(&[0.0])).unwrap();
        assert!(!cascade.is_protocol_sufficient(Some(&without_te)));
        assert!(cascade.is_protocol_sufficient(Some(&protocol())));
        assert!(!cascade.is_protocol_sufficient(None));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Fitting
// ═══════════════════════════════════════════════════════════════════════════════

mod fitting {
    use super::*;

    #[test]
    fn test_fit_nested_cascade_passes_orientation() {
        let mut cascade = ComponentLibrary::builtin()
            .build_cascade("BallStick_r1 (Cascade|Tensor)")
            .unwrap();
        cascade.set_problem_data(problem_data());

        let optimizer = Nudge::new(0.1);
        let results = fit_cascade(&mut cascade, &optimizer).unwrap();
        assert_eq!(results.len(), 2);

        let tensor = &results["Tensor (Cascade)"];
        assert_relative_eq!(tensor["Tensor.theta"][[0]], FRAC_PI_2 + 0.1, epsilon = 1e-9);
        assert!(tensor.contains_key("Tensor.FA"));

        let ball_stick = &results["BallStick_r1"];
        assert!(ball_stick.contains_key("FS"));
        assert!(ball_stick.contains_key("Stick0.vec0"));
        assert_relative_eq!(ball_stick["Ball.d"][[2]], 3.0e-9, epsilon = 1e-15);

        // S0, Tensor, BallStick_r1
        let inputs = optimizer.inputs.lock().unwrap();
        assert_eq!(inputs.len(), 3);
        let stage = &inputs[2];
        let theta = stage
            .parameter_names
            .iter()
            .position(|n| n == "Stick0.theta")
            .unwrap();
        assert_relative_eq!(stage.initial_values[[0, theta]], FRAC_PI_2 + 0.1, epsilon = 1e-9);
        let s0 = stage.parameter_names.iter().position(|n| n == "S0.s0").unwrap();
        assert_relative_eq!(stage.initial_values[[1, s0]], 1e4 + 0.2, epsilon = 1e-6);
    }

    #[test]
    fn test_volume_selection_in_cascade() {
        let mut cascade = ComponentLibrary::builtin()
            .build_cascade("Tensor (Cascade)")
            .unwrap();
        cascade.set_problem_data(problem_data());

        let optimizer = Nudge::new(0.0);
        fit_cascade(&mut cascade, &optimizer).unwrap();
        let inputs = optimizer.inputs.lock().unwrap();
        assert_eq!(inputs[0].volume_indices, vec![0, 1, 2, 3]);
        // the 3e9 shell is above the Tensor window
        assert_eq!(inputs[1].volume_indices, vec![0, 1, 2]);
        assert_eq!(inputs[1].observations.ncols(), 3);
        assert_eq!(inputs[1].protocol["g"].shape(), &[3, 3]);
    }

    #[test]
    fn test_fit_without_problem_data() {
        let mut cascade = ComponentLibrary::builtin()
            .build_cascade("S0-T2 (Cascade)")
            .unwrap();
        assert!(matches!(
            fit_cascade(&mut cascade, &Nudge::new(0.0)),
            Err(ModelError::MissingProblemData(_))
        ));
    }
}
