use burn::backend::Autodiff;
use burn::tensor::{Tensor, TensorData};
use burn_ndarray::NdArray;
use models::{l2_loss, RegularizationLosses};
use training::objective::scalar_value;
use training::{optimize, TrainError};

type Backend = Autodiff<NdArray<f32>>;

/// Scores `[1, 2, 2, 2]` favouring class 1 by `margin` at every pixel.
fn class_one_scores(margin: f32) -> Tensor<Backend, 4> {
    let mut data = vec![-margin; 4];
    data.extend(vec![margin; 4]);
    Tensor::from_data(TensorData::new(data, [1, 2, 2, 2]), &Default::default())
}

fn class_one_labels() -> Tensor<Backend, 4> {
    let data = [0.0f32, 1.0].repeat(4);
    Tensor::from_data(TensorData::new(data, [1, 2, 2, 2]), &Default::default())
}

#[test]
fn logits_are_flattened_per_pixel() {
    let scores = Tensor::<Backend, 4>::zeros([3, 2, 4, 5], &Default::default());
    let labels = Tensor::<Backend, 4>::zeros([3, 4, 5, 2], &Default::default());
    let terms = optimize(scores, labels, RegularizationLosses::new(), 2).unwrap();
    assert_eq!(terms.logits.dims(), [3 * 4 * 5, 2]);
}

#[test]
fn uniform_scores_cost_ln2() {
    let scores = class_one_scores(0.0);
    let terms = optimize(scores, class_one_labels(), RegularizationLosses::new(), 2).unwrap();
    let loss = scalar_value(terms.cross_entropy_loss);
    assert!((loss - std::f32::consts::LN_2).abs() < 1e-5, "loss {loss}");
}

#[test]
fn confident_correct_scores_cost_nothing() {
    let terms = optimize(class_one_scores(20.0), class_one_labels(), RegularizationLosses::new(), 2)
        .unwrap();
    let loss = scalar_value(terms.cross_entropy_loss);
    assert!(loss.is_finite() && loss >= 0.0);
    assert!(loss < 1e-6, "loss {loss}");

    let wrong = optimize(class_one_scores(-20.0), class_one_labels(), RegularizationLosses::new(), 2)
        .unwrap();
    assert!(scalar_value(wrong.cross_entropy_loss) > 10.0);
}

#[test]
fn weight_decay_enters_objective_only() {
    let device = Default::default();
    let mut reg = RegularizationLosses::new();
    reg.push(l2_loss(Tensor::<Backend, 2>::ones([2, 2], &device), 1e-3));
    let terms = optimize(class_one_scores(0.0), class_one_labels(), reg, 2).unwrap();
    let ce = scalar_value(terms.cross_entropy_loss);
    let objective = scalar_value(terms.objective);
    assert!((objective - ce - 2e-3).abs() < 1e-6);
}

#[test]
fn mismatched_labels_are_rejected() {
    let device = Default::default();
    let scores = Tensor::<Backend, 4>::zeros([1, 2, 4, 4], &device);
    let labels = Tensor::<Backend, 4>::zeros([1, 4, 2, 2], &device);
    let err = optimize(scores, labels, RegularizationLosses::new(), 2).unwrap_err();
    assert!(matches!(
        err,
        TrainError::ShapeMismatch {
            scores: [1, 4, 4, 2],
            labels: [1, 4, 2, 2],
            num_classes: 2
        }
    ));

    let scores = Tensor::<Backend, 4>::zeros([1, 3, 2, 2], &device);
    let labels = Tensor::<Backend, 4>::zeros([1, 2, 2, 3], &device);
    assert!(optimize(scores, labels, RegularizationLosses::new(), 2).is_err());
}
